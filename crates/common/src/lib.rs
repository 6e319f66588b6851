//! Crosscheck Common Library
//!
//! Entity references, provisioning specs and response envelopes shared by
//! the crosscheck orchestration crates.

pub mod envelope;
pub mod error;
pub mod token;
pub mod types;

// Re-export commonly used types
pub use envelope::{Record, ResponseEnvelope};
pub use error::{Error, Result};
pub use types::*;

/// Crosscheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
