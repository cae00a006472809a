//! Common library for gridsource
//!
//! Types shared by the data-source engine and its stores.
//!
//! Modules:
//! * `error`: Defines error types and the stable contract-violation codes.
//! * `value`: Defines the dynamic value type used for rows, keys and summaries.

pub mod error;
pub mod value;

// Re-export commonly used types at the base
pub use error::*;
pub use value::{Value, ValueType};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
