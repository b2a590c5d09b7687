//! Core traits and types for the response cache.

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// How a request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// A page navigation; may fall back to the cached app shell.
  Navigate,
  /// Anything else (assets, data fetches).
  Other,
}

/// An outbound request as seen by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::Other,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Stable cache key for this request.
  ///
  /// Identity is the method plus the URL without its fragment.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    let input = format!("{} {}", self.method.to_ascii_uppercase(), url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response, either live, cached or synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
    }
  }

  /// The plain-text response returned when neither network nor cache can help.
  pub fn offline() -> Self {
    Self::new(
      503,
      vec![("Content-Type".to_string(), "text/plain".to_string())],
      "Offline",
    )
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(key, _)| key.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Network unavailable, served from the cache
  Cache,
  /// Network unavailable and no cached copy, served the cached app shell
  Shell,
  /// Nothing available, synthesized offline response
  Offline,
  /// Not intercepted (non-GET, or interceptor not active)
  Passthrough,
}

/// Result of handling one request.
#[derive(Debug, Clone)]
pub struct Intercepted {
  pub response: Response,
  pub source: ResponseSource,
}

/// Live transport for outbound requests.
#[async_trait]
pub trait Network: Send + Sync {
  /// Perform the request. Transport failures, timeouts and being offline
  /// are errors; any HTTP status is a successful fetch.
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Versioned response storage.
///
/// Responses live in named generations; a deployment creates a new
/// generation and retires the others once it takes over.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open(&self, generation: &str) -> Result<()>;

  /// Store a response for a request in the given generation.
  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()>;

  /// Look a request up across all generations.
  fn match_request(&self, request: &Request) -> Result<Option<Response>>;

  /// Existing generation names, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Drop a generation and everything in it. Returns whether it existed.
  fn delete(&self, generation: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_cache_key_ignores_fragment_and_mode() {
    let plain = Request::get(url("https://gate.example/announcements?tab=delay"));
    let with_fragment = Request::navigate(url("https://gate.example/announcements?tab=delay#top"));
    assert_eq!(plain.cache_key(), with_fragment.cache_key());
    assert_eq!(plain.cache_key().len(), 64);
  }

  #[test]
  fn test_cache_key_depends_on_query_and_method() {
    let a = Request::get(url("https://gate.example/data?tab=delay"));
    let b = Request::get(url("https://gate.example/data?tab=boarding"));
    assert_ne!(a.cache_key(), b.cache_key());

    let head = Request {
      method: "HEAD".to_string(),
      ..a.clone()
    };
    assert_ne!(a.cache_key(), head.cache_key());
  }

  #[test]
  fn test_offline_response() {
    let response = Response::offline();
    assert_eq!(response.status, 503);
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.body, b"Offline");
  }
}
