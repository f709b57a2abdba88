//! Core DialogManager implementation
//!
//! The manager is the context value of the event loop. It owns the
//! scheduler, the transaction manager and every call leg, and is only ever
//! touched from the loop thread: other threads reach it through a
//! [`ReactorHandle`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace};

use b2bua_sip_transport::Transport;

use super::message_routing::RequestHandler;
use crate::config::EngineConfig;
use crate::dialog::{Dialog, DialogId, DialogTimer, UaContext};
use crate::events::Notification;
use crate::reactor::{Driver, ReactorHandle, Scheduler, TimerHandle};
use crate::sdp::SdpRewriter;
use crate::transaction::{TransactionId, TransactionManager, TxTimer};

/// Payload of every timer registered on the engine's scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTimer {
    Transaction(TransactionId, TxTimer),
    /// Rotation of the retransmission cache
    CachePurge,
    Dialog(DialogId, DialogTimer),
}

/// Owner of the transaction layer and all call legs
pub struct DialogManager {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) scheduler: Scheduler<EngineTimer>,
    pub(crate) tm: TransactionManager,
    pub(crate) dialogs: HashMap<DialogId, Dialog>,
    pub(crate) handle: ReactorHandle<DialogManager>,
    pub(crate) notifications: UnboundedSender<Notification>,
    pub(crate) sdp_rewriter: Option<Arc<dyn SdpRewriter>>,
    pub(crate) request_handler: Option<Box<dyn RequestHandler>>,
    exit: Option<i32>,
}

impl fmt::Debug for DialogManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogManager")
            .field("dialogs", &self.dialogs.len())
            .field("tm", &self.tm)
            .field("timers", &self.scheduler.len())
            .finish()
    }
}

impl DialogManager {
    /// Create the manager for the loop behind `handle`.
    ///
    /// Call-control events and lifecycle notices of every leg arrive on the
    /// returned receiver.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        handle: ReactorHandle<DialogManager>,
    ) -> (Self, UnboundedReceiver<Notification>) {
        let (notifications, rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new();
        let tm = TransactionManager::new(transport, &config, &mut scheduler);
        info!("dialog manager listening on {}", tm.local_addr());
        let manager = DialogManager {
            config: Arc::new(config),
            scheduler,
            tm,
            dialogs: HashMap::new(),
            handle,
            notifications,
            sdp_rewriter: None,
            request_handler: None,
            exit: None,
        };
        (manager, rx)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handle(&self) -> ReactorHandle<DialogManager> {
        self.handle.clone()
    }

    /// The engine's current time
    pub fn now(&self) -> Instant {
        self.scheduler.now()
    }

    /// Run `f` against one leg with the engine borrowed as its context
    pub(crate) fn with_dialog<R>(
        &mut self,
        id: DialogId,
        f: impl FnOnce(&mut Dialog, &mut UaContext<'_>) -> R,
    ) -> Option<R> {
        let DialogManager {
            config,
            scheduler,
            tm,
            dialogs,
            handle,
            notifications,
            sdp_rewriter,
            ..
        } = self;
        let dialog = dialogs.get_mut(&id)?;
        let mut ctx = UaContext {
            tm,
            sched: scheduler,
            config: config.as_ref(),
            handle,
            notify: notifications,
            sdp: sdp_rewriter.as_ref(),
        };
        Some(f(dialog, &mut ctx))
    }

    /// Deliver queued transaction events and drop dead legs
    pub(crate) fn settle(&mut self) {
        self.process_tm_events();
        let dead: Vec<DialogId> = self
            .dialogs
            .iter()
            .filter(|(_, d)| d.is_dead())
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            debug!("{} removed", id);
            self.dialogs.remove(&id);
        }
    }
}

impl Driver for DialogManager {
    type Timer = EngineTimer;

    fn scheduler(&mut self) -> &mut Scheduler<EngineTimer> {
        &mut self.scheduler
    }

    fn on_timer(&mut self, handle: TimerHandle, timer: EngineTimer) {
        trace!("timer {} fired: {:?}", handle, timer);
        match timer {
            EngineTimer::Transaction(tx, t) => self.tm.on_timer(&mut self.scheduler, tx, t),
            EngineTimer::CachePurge => self.tm.rotate_cache(),
            EngineTimer::Dialog(id, t) => {
                if self.with_dialog(id, |d, ctx| d.on_timer(ctx, handle, t)).is_none() {
                    trace!("timer {:?} for gone {}", t, id);
                }
            }
        }
        self.settle();
    }

    fn break_loop(&mut self, code: i32) {
        self.exit = Some(code);
    }

    fn take_exit(&mut self) -> Option<i32> {
        self.exit.take()
    }
}
