//! Container image size and exposed-port lookup.
//!
//! An external inspector (`skopeo`) does the registry work; this crate
//! normalizes references, classifies inspector failures, reconciles its
//! output shapes into one size record, and serves the result over HTTP
//! behind a response cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod inspector;
pub mod reference;
pub mod registry;
pub mod resolve;
pub mod server;
pub mod service;

pub use config::{Config, Settings};
pub use error::ApiError;
pub use reference::ImageReference;
pub use service::{CacheStatus, Endpoint, ImageService, Lookup};
