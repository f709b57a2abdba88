use std::time::Instant;

use super::call_events::{CallEvent, Origin};
use crate::dialog::DialogId;

/// Lifecycle notice, sent after the dialog has entered its new state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegNotice {
    Ringing { code: u16 },
    Connected,
    Disconnected { code: Option<u16> },
    Failed { code: u16 },
    Dead,
}

/// What the engine tells the application
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A call-control event emitted by a dialog
    Event { dialog: DialogId, event: CallEvent },
    /// A dialog changed state
    Leg {
        dialog: DialogId,
        notice: LegNotice,
        rtime: Instant,
        origin: Option<Origin>,
    },
}

impl Notification {
    pub fn dialog(&self) -> DialogId {
        match self {
            Notification::Event { dialog, .. } | Notification::Leg { dialog, .. } => *dialog,
        }
    }

    pub fn event(&self) -> Option<&CallEvent> {
        match self {
            Notification::Event { event, .. } => Some(event),
            Notification::Leg { .. } => None,
        }
    }

    pub fn notice(&self) -> Option<LegNotice> {
        match self {
            Notification::Leg { notice, .. } => Some(*notice),
            Notification::Event { .. } => None,
        }
    }
}
