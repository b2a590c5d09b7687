//! Offline-resilient request handling.
//!
//! This module keeps the viewer's shell and data usable without a network:
//! - Responses are stored in named generations, one per deployment
//! - Installing a generation precaches the shell; activating it evicts the rest
//! - Requests go to the network first and fall back to the cache when offline

mod interceptor;
mod network;
mod storage;
mod traits;

pub use interceptor::{CacheInterceptor, Lifecycle};
pub use network::HttpNetwork;
pub use storage::SqliteCacheStorage;
pub use traits::{CacheStorage, Network, Request, ResponseSource};

#[cfg(test)]
pub use traits::Response;
