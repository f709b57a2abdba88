//! Delivery of transaction events, transport input and signals

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use b2bua_sip_transport::TransportEvent;

use super::core::DialogManager;
use crate::errors::DialogResult;
use crate::reactor::{Driver, EventLoop, ReactorHandle};
use crate::transaction::{TmEvent, TxOwner};

const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

impl DialogManager {
    /// Hand every queued transaction event to the leg that owns it
    pub(crate) fn process_tm_events(&mut self) {
        while let Some(event) = self.tm.pop_event() {
            let delivered = match event {
                TmEvent::Response { owner, tx, response, rtime } => match owner {
                    TxOwner::Dialog(id) => self
                        .with_dialog(id, |d, ctx| d.recv_response(ctx, tx, response, rtime))
                        .is_some(),
                    TxOwner::Keepalive(id) => self
                        .with_dialog(id, |d, ctx| d.keepalive_response(ctx, &response))
                        .is_some(),
                    TxOwner::Refer(id) => self
                        .with_dialog(id, |d, ctx| d.refer_response(ctx, &response))
                        .is_some(),
                },
                TmEvent::Cancel { owner, request, rtime, .. } => self
                    .with_dialog(owner, |d, ctx| d.on_cancel(ctx, request, rtime))
                    .is_some(),
                TmEvent::Ack { owner, request, rtime } => self
                    .with_dialog(owner, |d, ctx| d.recv_ack(ctx, request, rtime))
                    .is_some(),
                TmEvent::NoAck { owner, rtime } => self
                    .with_dialog(owner, |d, ctx| {
                        warn!("{} final response was never ACKed", d.id());
                        d.disconnect(ctx, rtime, None)
                    })
                    .is_some(),
            };
            if !delivered {
                debug!("transaction event for a dialog that is gone");
            }
        }
    }
}

/// Forward datagrams from a transport onto the event loop.
///
/// The task ends when the transport closes or the loop goes away.
pub fn forward_transport_events(
    mut events: mpsc::Receiver<TransportEvent>,
    handle: ReactorHandle<DialogManager>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::DatagramReceived { data, source, received_at } => {
                    let scheduled = handle.schedule(move |mgr: &mut DialogManager| {
                        mgr.handle_incoming(&data, source, received_at)
                    });
                    if scheduled.is_err() {
                        debug!("event loop gone, transport forwarding stopped");
                        break;
                    }
                }
                TransportEvent::Error { error } => warn!("transport error: {}", error),
                TransportEvent::Closed => {
                    info!("transport closed");
                    break;
                }
            }
        }
    })
}

/// Disconnect every call and stop the loop on SIGTERM or SIGINT
pub fn install_signal_handlers(event_loop: &mut EventLoop<DialogManager>) -> DialogResult<()> {
    for signum in [SIGTERM, SIGINT] {
        event_loop.register_signal(signum, |mgr: &mut DialogManager, signum| {
            info!("signal {} received, disconnecting {} call legs", signum, mgr.dialog_count());
            mgr.disconnect_all();
            mgr.break_loop(0);
        })?;
    }
    Ok(())
}
