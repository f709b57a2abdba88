//! Error types shared across the infrastructure layer

pub mod types;

pub use types::{Error, Result};
