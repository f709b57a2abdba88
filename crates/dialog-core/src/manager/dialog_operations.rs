//! Dialog operations exposed to the application
//!
//! Every operation runs on the loop thread. From another thread wrap it in
//! [`ReactorHandle::schedule`](crate::reactor::ReactorHandle::schedule) or
//! [`ReactorHandle::call`](crate::reactor::ReactorHandle::call).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use b2bua_sip_core::HostPort;

use super::core::DialogManager;
use super::message_routing::RequestHandler;
use crate::config::UaConfig;
use crate::dialog::{CallAccounting, Dialog, DialogId};
use crate::errors::{DialogError, DialogResult};
use crate::events::{CallEvent, Origin};
use crate::reactor::Driver;
use crate::sdp::{MessageBody, SdpError, SdpRewriter, SdpSide};
use crate::transaction::TransactionManager;

impl DialogManager {
    /// New outgoing leg; it stays Idle until it receives a `Try` event.
    ///
    /// `next_hop` receives the initial INVITE.
    pub fn create_dialog(&mut self, config: UaConfig, next_hop: HostPort) -> DialogId {
        let id = DialogId::new();
        debug!("{} created towards {}", id, next_hop);
        self.dialogs.insert(id, Dialog::new(id, config, next_hop));
        id
    }

    /// Feed a call-control event to a leg
    pub fn recv_event(&mut self, id: DialogId, event: CallEvent) -> DialogResult<()> {
        let result = self
            .with_dialog(id, |d, ctx| d.recv_event(ctx, event))
            .ok_or(DialogError::DialogNotFound(id))?;
        self.settle();
        result
    }

    /// Tear a leg down, whatever its state
    pub fn disconnect(&mut self, id: DialogId, origin: Option<Origin>) -> DialogResult<()> {
        let now = self.now();
        self.with_dialog(id, |d, ctx| d.disconnect(ctx, now, origin))
            .ok_or(DialogError::DialogNotFound(id))?;
        self.settle();
        Ok(())
    }

    /// Tear down every leg that is still alive
    pub fn disconnect_all(&mut self) {
        let now = self.now();
        let live: Vec<DialogId> = self
            .dialogs
            .iter()
            .filter(|(_, d)| !d.state().is_terminated())
            .map(|(id, _)| *id)
            .collect();
        info!("disconnecting {} call legs", live.len());
        for id in live {
            self.with_dialog(id, |d, ctx| d.disconnect(ctx, now, None));
        }
        self.settle();
    }

    /// Add or replace credit deadlines of a leg
    pub fn reset_credit_time(
        &mut self,
        id: DialogId,
        credit_times: BTreeMap<u32, Instant>,
    ) -> DialogResult<()> {
        let now = self.now();
        self.with_dialog(id, |d, ctx| d.reset_credit_time(ctx, now, credit_times))
            .ok_or(DialogError::DialogNotFound(id))?;
        self.settle();
        Ok(())
    }

    /// Resume a leg suspended on the SDP rewriter
    pub fn complete_sdp(
        &mut self,
        id: DialogId,
        side: SdpSide,
        event: CallEvent,
        result: Result<MessageBody, SdpError>,
    ) {
        if self
            .with_dialog(id, |d, ctx| d.complete_sdp(ctx, side, event, result))
            .is_none()
        {
            debug!("SDP completion for gone {}", id);
        }
        self.settle();
    }

    pub fn set_sdp_rewriter(&mut self, rewriter: Arc<dyn SdpRewriter>) {
        self.sdp_rewriter = Some(rewriter);
    }

    pub fn set_request_handler(&mut self, handler: impl RequestHandler + 'static) {
        self.request_handler = Some(Box::new(handler));
    }

    pub fn dialog(&self, id: DialogId) -> Option<&Dialog> {
        self.dialogs.get(&id)
    }

    pub fn dialog_ids(&self) -> Vec<DialogId> {
        self.dialogs.keys().copied().collect()
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    /// Call duration figures of a leg as of now
    pub fn acct(&self, id: DialogId) -> Option<CallAccounting> {
        self.dialogs.get(&id).map(|d| d.acct(self.now()))
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.tm
    }

    /// Move the virtual clock and fire whatever became due.
    ///
    /// Returns the number of timers fired.
    pub fn advance(&mut self, by: Duration) -> usize {
        self.scheduler.advance(by);
        let mut fired = 0;
        while let Some((handle, timer)) = self.scheduler.pop_due() {
            self.on_timer(handle, timer);
            fired += 1;
        }
        fired
    }

    /// Disconnect all legs and stop every transaction and timer
    pub fn shutdown(&mut self) {
        self.disconnect_all();
        self.tm.shutdown(&mut self.scheduler);
        info!("dialog manager shut down");
    }
}
