//! # b2bua-infra-common
//!
//! Ambient infrastructure shared by the b2bua crates: logging setup,
//! configuration loading and the common error type.
//!
//! ```no_run
//! use b2bua_infra_common::logging::{setup_logging, LoggingConfig};
//!
//! setup_logging(LoggingConfig::default().with_file_info()).unwrap();
//! ```

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::types::{Error, Result};
