//! Events exchanged with the application
//!
//! - [`CallEvent`]: call-control events. The application feeds them into a
//!   dialog with [`DialogManager::recv_event`](crate::manager::DialogManager::recv_event),
//!   and dialogs emit them when the peer acts.
//! - [`Notification`]: everything a dialog reports, delivered in order over
//!   an unbounded channel. It carries emitted events and lifecycle notices.

pub mod call_events;
pub mod notifications;

pub use call_events::{CallEvent, EventKind, FailData, Origin, RedirectData, StatusData, TryData};
pub use notifications::{LegNotice, Notification};
