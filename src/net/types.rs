use bytes::Bytes;
use reqwest::{Method, StatusCode};
use url::Url;

/// How a response relates to the dashboard's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response with CORS headers
  Cors,
  /// Cross-origin response without CORS access
  Opaque,
  /// Network error placeholder
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      "error" => Some(Self::Error),
      _ => None,
    }
  }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Bytes>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Case-insensitive header lookup
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Only GET requests are ever read from or written to the cache
  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }
}

/// A fully captured response. The body is `Bytes`, so cloning a response to
/// persist one copy and hand back the other never re-reads anything.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub url: Url,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub response_type: ResponseType,
}

impl Response {
  /// Same-origin response with the canonical reason phrase for `status`
  pub fn new(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
    let status_text = StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or_default()
      .to_string();

    Self {
      url,
      status,
      status_text,
      headers: Vec::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  #[cfg(test)]
  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  /// Status in the 2xx range
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Lowercased header names listed in the `Vary` header.
  pub fn vary(&self) -> Vec<String> {
    self
      .header("vary")
      .map(|v| {
        v.split(',')
          .map(|name| name.trim().to_lowercase())
          .filter(|name| !name.is_empty())
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_response_status_text() {
    let ok = Response::new(url("http://localhost:3000/"), 200, "hi");
    assert_eq!(ok.status_text, "OK");
    assert!(ok.is_ok());

    let missing = Response::new(url("http://localhost:3000/"), 404, "");
    assert_eq!(missing.status_text, "Not Found");
    assert!(!missing.is_ok());
  }

  #[test]
  fn test_header_lookup_ignores_case() {
    let request = Request::get(url("http://localhost:3000/")).with_header("Accept", "text/html");
    assert_eq!(request.header("accept"), Some("text/html"));
    assert_eq!(request.header("ACCEPT"), Some("text/html"));
    assert_eq!(request.header("cookie"), None);
  }

  #[test]
  fn test_vary_names() {
    let response = Response::new(url("http://localhost:3000/"), 200, "")
      .with_header("Vary", "Accept-Encoding, Accept ,");
    assert_eq!(response.vary(), vec!["accept-encoding", "accept"]);

    let plain = Response::new(url("http://localhost:3000/"), 200, "");
    assert!(plain.vary().is_empty());
  }

  #[test]
  fn test_response_type_parse() {
    for t in [
      ResponseType::Basic,
      ResponseType::Cors,
      ResponseType::Opaque,
      ResponseType::Error,
    ] {
      assert_eq!(ResponseType::parse(t.as_str()), Some(t));
    }
    assert_eq!(ResponseType::parse("weird"), None);
  }
}
