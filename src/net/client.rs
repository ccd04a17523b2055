use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;
use url::Origin;

use crate::config::Config;

use super::error::FetchError;
use super::types::{Request, Response, ResponseType};

/// Anything that can perform a live network fetch for the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// HTTP client used for live fetches.
/// Clone is cheap - reqwest::Client is reference counted internally.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  /// Responses from this origin are tagged `basic`, everything else `cors`
  app_origin: Origin,
}

impl HttpClient {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("panelcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      app_origin: config.app_url.origin(),
    })
  }
}

#[async_trait]
impl Fetcher for HttpClient {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;

    let url = response.url().clone();
    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let response_type = if url.origin() == self.app_origin {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    };
    let body = response.bytes().await?;

    debug!(method = %request.method, %url, status = status.as_u16(), "Fetched from network");

    Ok(Response {
      url,
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
      response_type,
    })
  }
}
