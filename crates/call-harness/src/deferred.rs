//! Deferred dial completion
//!
//! An outgoing call connects after a simulated network delay. Each pending
//! completion is a [`DialTicket`] tied to the call id and carrying its own
//! `CancellationToken`. Leaving `Dialing` for any reason cancels the ticket,
//! and a completion is only applied if its ticket is still the one on record.

use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::CallId;

/// A scheduled dial completion
#[derive(Debug, Clone)]
pub struct DialTicket {
    pub call_id: CallId,
    pub token_id: u64,
    pub token: CancellationToken,
}

/// Runs a ticket after `delay`
///
/// Implementations must report back through
/// [`TestConnectionService::complete_dial`](crate::service::TestConnectionService::complete_dial)
/// on the service's own control thread, and should drop the ticket once its
/// token is cancelled.
pub trait DialScheduler: Send {
    fn schedule(&self, ticket: DialTicket, delay: Duration);
}

#[derive(Debug, Default)]
pub struct DeferredTransitions {
    pending: HashMap<CallId, DialTicket>,
    next_token: u64,
}

impl DeferredTransitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket for `call_id`, cancelling any earlier one
    pub fn issue(&mut self, call_id: CallId) -> DialTicket {
        self.cancel(&call_id);
        self.next_token += 1;
        let ticket = DialTicket {
            call_id,
            token_id: self.next_token,
            token: CancellationToken::new(),
        };
        self.pending.insert(call_id, ticket.clone());
        ticket
    }

    /// Cancel the pending ticket for `call_id`, if any
    pub fn cancel(&mut self, call_id: &CallId) -> bool {
        match self.pending.remove(call_id) {
            Some(ticket) => {
                ticket.token.cancel();
                debug!("Cancelled pending dial {} for {}", ticket.token_id, call_id);
                true
            }
            None => false,
        }
    }

    /// Consume the ticket if `token_id` is still current and uncancelled
    pub fn redeem(&mut self, call_id: &CallId, token_id: u64) -> bool {
        let current = self
            .pending
            .get(call_id)
            .map(|ticket| ticket.token_id == token_id && !ticket.token.is_cancelled())
            .unwrap_or(false);
        if current {
            self.pending.remove(call_id);
        }
        current
    }

    pub fn pending_token(&self, call_id: &CallId) -> Option<u64> {
        self.pending.get(call_id).map(|ticket| ticket.token_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Cancel everything; used when the service shuts down
    pub fn cancel_all(&mut self) {
        for (_, ticket) in self.pending.drain() {
            ticket.token.cancel();
        }
    }
}
