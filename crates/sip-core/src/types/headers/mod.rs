//! Header storage

pub mod header_name;
#[allow(clippy::module_inception)]
pub mod headers;

pub use header_name::HeaderName;
pub use headers::{Header, Headers};
