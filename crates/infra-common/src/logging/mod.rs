//! Logging setup built on `tracing-subscriber`

pub mod setup;

pub use setup::{parse_log_level, setup_logging, LoggingConfig, SIP_WIRE_TARGET};
