//! Versioned response cache for offline support.
//!
//! This module provides the request-level caching the worker relies on:
//! - Named, versioned cache stores (one current, the rest stale)
//! - Request identity keys with `Vary`-aware matching
//! - Network-first and cache-first strategies
//! - Atomic precaching of the static asset manifest

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
