//! Requests reaching a leg that is already torn down

use tracing::debug;

use b2bua_sip_core::{Method, Request};

use super::dialog_impl::{Dialog, UaContext};
use super::dialog_state::Transition;
use crate::errors::DialogResult;
use crate::transaction::TransactionId;

impl Dialog {
    pub(crate) fn terminated_request(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        req: &Request,
    ) -> DialogResult<Option<Transition>> {
        debug!("{} {} after the call has ended", self.id, req.method);
        match req.method {
            Method::Bye => self.reply(ctx, tx, req, 200, "OK"),
            _ => self.reply(ctx, tx, req, 500, "Disconnected"),
        }
        Ok(None)
    }
}
