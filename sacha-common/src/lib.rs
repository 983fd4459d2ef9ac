//! # Sacha Common Library
//!
//! Shared code for Sacha microservices including:
//! - Error types
//! - Configuration file discovery and loading
//! - TTL response cache and content-addressed cache keys
//! - Timestamp helpers

pub mod cache;
pub mod config;
pub mod error;
pub mod time;

pub use cache::{derive_key, CacheStats, TtlCache};
pub use error::{Error, Result};
