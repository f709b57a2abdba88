//! # B2BUA Dialog-Core
//!
//! RFC 3261 transaction engine and back-to-back user agent call legs.
//!
//! ## Architecture Position
//!
//! ```text
//! application (call routing, B2BUA glue)
//!      ↓  CallEvent / Notification
//! dialog-core: dialogs + transactions  ← THIS CRATE
//!      ↓
//! sip-transport (UDP)
//! ```
//!
//! Everything runs on one [`reactor::EventLoop`] whose context value is the
//! [`DialogManager`]. The manager owns the [`transaction::TransactionManager`],
//! the timer [`reactor::Scheduler`] and every [`Dialog`]. Other threads talk
//! to it through a [`reactor::ReactorHandle`].
//!
//! ## What This Crate Does
//!
//! - **Transactions**: client and server INVITE and non-INVITE transactions,
//!   retransmission, CANCEL matching, ACK handling and a retransmission cache
//! - **Call legs**: the UAC and UAS state machines (trying, ringing,
//!   connected, re-INVITE, cancelling, disconnected, failed, dead)
//! - **Timers**: credit, expire, no-progress and no-reply deadlines, plus
//!   in-dialog re-INVITE keepalives
//! - **Routing**: route sets, strict and loose routers, REFER on disconnect
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use b2bua_dialog_core::config::EngineConfig;
//! use b2bua_dialog_core::manager::{forward_transport_events, install_signal_handlers};
//! use b2bua_dialog_core::reactor::EventLoop;
//! use b2bua_dialog_core::DialogManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let (transport, transport_rx) = b2bua_sip_transport::bind_udp("0.0.0.0:5060".parse()?).await?;
//!
//!     let mut event_loop = EventLoop::new(config.wake_interval);
//!     let (mut manager, mut notifications) =
//!         DialogManager::new(config, Arc::new(transport), event_loop.handle());
//!     forward_transport_events(transport_rx, event_loop.handle());
//!     install_signal_handlers(&mut event_loop)?;
//!
//!     tokio::spawn(async move {
//!         while let Some(notification) = notifications.recv().await {
//!             println!("{:?}", notification);
//!         }
//!     });
//!
//!     event_loop.run(&mut manager, None).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dialog;
pub mod errors;
pub mod events;
pub mod manager;
pub mod reactor;
pub mod sdp;
pub mod transaction;

// Re-export main types
pub use config::{EngineConfig, TimerSettings, UaConfig};
pub use dialog::{CallAccounting, Dialog, DialogId, DialogTimer, UaState};
pub use errors::{DialogError, DialogResult};
pub use events::{CallEvent, EventKind, LegNotice, Notification, Origin};
pub use manager::{DialogManager, RequestDisposition, RequestHandler};
pub use sdp::{MessageBody, SdpRewriter};

// Re-export for convenience
pub use b2bua_sip_core::{Address, HostPort, Method, Request, Response, StatusCode, Uri};
