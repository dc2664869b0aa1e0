//! Reelcast DB Library
//!
//! Connection setup, embedded migrations and the Postgres repositories for
//! the task queue and the `videos` table.

pub mod db;

pub use db::{connect, TaskRepository, VideoRepository, MIGRATOR};
