//! Call leg states
//!
//! ```text
//!            Try event                 1xx                  2xx
//!   Idle ───────────────▶ UacTrying ─────────▶ UacRinging ─────────▶ Connected
//!     │                     │   teardown event     │                  ▲   │
//!     │ INVITE              └──────────┬───────────┘                  │   │ re-INVITE
//!     ▼                                ▼                              │   ▼
//!   UasTrying ──▶ UasRinging     UacCancelling ──▶ Disconnected       UacUpdating
//!        Connect event ─────────────────────────────────────┘         UasUpdating
//!
//!   Disconnected / Failed ──(go-dead timer)──▶ Dead
//! ```

use std::fmt;
use std::time::Instant;

use crate::events::{LegNotice, Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UaState {
    Idle,
    UacTrying,
    UacRinging,
    UacCancelling,
    UasTrying,
    UasRinging,
    UacUpdating,
    UasUpdating,
    Connected,
    Disconnected,
    Failed,
    Dead,
}

impl UaState {
    /// An answered call, including re-INVITEs in flight
    pub fn is_connected(&self) -> bool {
        matches!(self, UaState::Connected | UaState::UacUpdating | UaState::UasUpdating)
    }

    pub fn is_dead(&self) -> bool {
        *self == UaState::Dead
    }

    /// Waiting to be reclaimed
    pub fn is_terminated(&self) -> bool {
        matches!(self, UaState::Disconnected | UaState::Failed | UaState::Dead)
    }
}

impl fmt::Display for UaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UaState::Idle => "Idle",
            UaState::UacTrying => "Trying(UAC)",
            UaState::UacRinging => "Ringing(UAC)",
            UaState::UacCancelling => "Cancelling(UAC)",
            UaState::UasTrying => "Trying(UAS)",
            UaState::UasRinging => "Ringing(UAS)",
            UaState::UacUpdating => "Updating(UAC)",
            UaState::UasUpdating => "Updating(UAS)",
            UaState::Connected => "Connected",
            UaState::Disconnected => "Disconnected",
            UaState::Failed => "Failed",
            UaState::Dead => "Dead",
        };
        f.write_str(name)
    }
}

/// Lifecycle timers owned by a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogTimer {
    /// Overall setup deadline
    Expire,
    /// No provisional response above 100 in time
    NoProgress,
    /// No response at all in time
    NoReply,
    /// Maximum connected time
    Credit,
    /// Next in-dialog re-INVITE probe
    Keepalive,
    /// Disconnect after a peer rejected the first keepalive
    KeepaliveGrace,
    /// Leave Disconnected or Failed for Dead
    GoDead,
    /// Stop waiting for the final answer to a CANCEL
    CancelGiveUp,
}

/// Result of a state handler that changes state.
///
/// The notice goes out after the new state has been entered.
#[derive(Debug, Clone)]
pub(crate) struct Transition {
    pub(crate) next: UaState,
    pub(crate) notice: Option<LegNotice>,
    pub(crate) rtime: Option<Instant>,
    pub(crate) origin: Option<Origin>,
}

impl Transition {
    pub(crate) fn to(next: UaState) -> Self {
        Transition { next, notice: None, rtime: None, origin: None }
    }

    pub(crate) fn notify(mut self, notice: LegNotice, rtime: Instant, origin: Option<Origin>) -> Self {
        self.notice = Some(notice);
        self.rtime = Some(rtime);
        self.origin = origin;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_states() {
        assert!(UaState::Connected.is_connected());
        assert!(UaState::UacUpdating.is_connected());
        assert!(UaState::UasUpdating.is_connected());
        assert!(!UaState::UasRinging.is_connected());
        assert!(!UaState::Disconnected.is_connected());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(UaState::UacTrying.to_string(), "Trying(UAC)");
        assert_eq!(UaState::UasUpdating.to_string(), "Updating(UAS)");
    }
}
