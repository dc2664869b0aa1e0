//! Reelcast Storage Library
//!
//! Artifact store abstraction with S3 (via `object_store`) and local
//! filesystem backends, plus an HTTP fetcher for source videos that live
//! outside the store.
//!
//! # Storage key format
//!
//! - originals: whatever key the upload handler chose
//! - processed clips: `processed/{video_id}_processed.mp4`
//!
//! Keys must not contain `..` or a leading `/`. Public URLs are always
//! `{public_base}/{key}`, which lets a stored URL be mapped back to its key.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod remote;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use keys::processed_key;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use reelcast_core::StorageBackend;
pub use remote::RemoteFetcher;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
