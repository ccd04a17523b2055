//! Network side of the worker: request/response types and the HTTP fetcher.

mod client;
mod error;
#[cfg(test)]
pub mod testing;
mod types;

pub use client::{Fetcher, HttpClient};
pub use error::FetchError;
pub use types::{Request, Response, ResponseType};
