//! # Call legs
//!
//! A B2BUA call is made of two legs, one towards the caller (the UAS side)
//! and one towards the callee (the UAC side). Each leg is a [`Dialog`]: a
//! state machine that turns SIP traffic into call-control events and
//! call-control events into SIP traffic.
//!
//! The per-state behavior lives in one module per group of states:
//!
//! | Module        | States                                        |
//! |---------------|-----------------------------------------------|
//! | `uac`         | Idle (outgoing), Trying, Ringing, Cancelling  |
//! | `uas`         | Idle (incoming), Trying, Ringing              |
//! | `connected`   | Connected                                     |
//! | `updating`    | Updating, both directions                     |
//! | `terminal`    | Disconnected, Failed                          |

mod connected;
pub mod dialog_id;
pub mod dialog_impl;
pub mod dialog_state;
mod routing;
mod terminal;
mod uac;
mod uas;
mod updating;

pub use dialog_id::DialogId;
pub use dialog_impl::{CallAccounting, Dialog, DialogTimers, UaContext};
pub use dialog_state::{DialogTimer, UaState};
