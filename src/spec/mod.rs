//! Task input/output specifications
//!
//! Fields are declared explicitly as ordered (name, type, default, metadata)
//! records; nothing is derived from callables at run time.

pub mod field;
pub mod task_spec;
pub mod value;

// Re-export main types
pub use field::*;
pub use task_spec::*;
pub use value::*;
