//! Configuration parsing and validation
//!
//! This module handles parsing of taskwright.yml configuration files
//! and validation of the task declarations they contain.

pub mod parse;
pub mod schema;
pub mod types;

// Re-export main types
pub use parse::*;
pub use schema::*;
pub use types::*;
