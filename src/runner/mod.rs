//! Task execution engine
//!
//! This module turns resolved tasks into argument vectors and runs them:
//! command assembly, container wrapping, registered functions and output
//! collection.

pub mod command;
pub mod container;
pub mod function;
pub mod outputs;
pub mod serialized;
pub mod task;
pub mod template;

// Re-export main types
pub use command::*;
pub use container::*;
pub use function::*;
pub use outputs::*;
pub use serialized::*;
pub use task::*;
pub use template::*;
