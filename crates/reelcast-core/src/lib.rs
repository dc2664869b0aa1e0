//! Reelcast Core Library
//!
//! Domain models, configuration, error types and the record-store contract
//! shared by every Reelcast component (dispatcher, worker, admin CLI).

pub mod config;
pub mod constants;
pub mod models;
pub mod storage_types;
pub mod store;
pub mod task_error;

// Re-export commonly used types
pub use config::{Config, ConfigError, QueueSettings, StorageSettings};
pub use storage_types::StorageBackend;
pub use store::VideoStore;
pub use task_error::{TaskError, TaskResultExt};
