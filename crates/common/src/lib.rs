//! Common utilities and types shared across the MRP Rust components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
