//! Dialog Manager Module
//!
//! The [`DialogManager`] glues the transaction layer to the call legs and
//! is the context value driven by the reactor's event loop.

pub mod core;
pub mod dialog_operations;
pub mod event_processing;
pub mod message_routing;

pub use core::{DialogManager, EngineTimer};
pub use event_processing::{forward_transport_events, install_signal_handlers};
pub use message_routing::{RequestDisposition, RequestHandler};
