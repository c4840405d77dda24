//! Taskwright - declared command-line and container tasks on pluggable workers
//!
//! Tasks are described by typed input fields with positional metadata. A task
//! is assembled into an argument vector (optionally wrapped in a Docker or
//! Singularity invocation) and dispatched through a `Worker`: inline, on a
//! thread pool, as futures, to a batch queue or to a cluster client.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod runner;
pub mod spec;
pub mod worker;

// Re-export commonly used types
pub use error::{Result, TaskwrightError};

/// Current version of Taskwright
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
