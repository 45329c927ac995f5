//! Client-side secure metadata synchronization for mirrored component repositories.
//!
//! This crate verifies a chain of four signed manifests (root, timestamp, snapshot, index)
//! fetched from an untrusted mirror, then uses that chain to resolve and download individual
//! component artifacts with rollback, freeze, and mix-and-match protection. It speaks no
//! particular transport: a [`mirror::Mirror`] just has to hand back bytes for a path.
//!
//! The starting point for most callers is [`client::Client`].

pub mod client;
pub mod crypto;
pub mod error;
pub mod fetch;
pub mod interchange;
pub mod metadata;
pub mod mirror;
pub mod resolver;
pub mod store;
pub mod trust;
pub mod verify;
pub mod version;

pub use error::Error;

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
