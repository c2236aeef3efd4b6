//! Single control thread for the harness
//!
//! The [`Dispatcher`] owns a [`TestConnectionService`] on one tokio task and
//! processes messages from an mpsc channel one at a time. Platform events
//! and deferred dial completions share that channel, so a completion can
//! never interleave with an event touching the same call.
//!
//! Callers talk to it through a cloneable [`DispatcherHandle`]; every request
//! carries a oneshot sender for its reply.

use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deferred::{DialScheduler, DialTicket};
use crate::errors::{HarnessError, Result};
use crate::service::{EventOutcome, HarnessEvent, HarnessSnapshot, PlatformEvent, TestConnectionService};
use crate::types::{CallId, ConferenceId, ConnectionRequest};

const DISPATCHER_CHANNEL_BUFFER: usize = 256;

/// Messages processed by the dispatcher task
#[derive(Debug)]
pub enum DispatcherMessage {
    Platform {
        event: PlatformEvent,
        respond_to: oneshot::Sender<Result<EventOutcome>>,
    },
    /// Posted by a dial timer once its delay elapses
    DialComplete { call_id: CallId, token_id: u64 },
    Snapshot {
        respond_to: oneshot::Sender<HarnessSnapshot>,
    },
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Schedules dial completions as tokio timers posting back to the dispatcher
///
/// Holds a weak sender so pending timers do not keep the dispatcher alive.
pub struct TokioDialScheduler {
    sender: mpsc::WeakSender<DispatcherMessage>,
}

impl DialScheduler for TokioDialScheduler {
    fn schedule(&self, ticket: DialTicket, delay: Duration) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;

                () = ticket.token.cancelled() => {
                    debug!("Dial timer {} for {} cancelled", ticket.token_id, ticket.call_id);
                }

                () = tokio::time::sleep(delay) => {
                    let Some(sender) = sender.upgrade() else {
                        return;
                    };
                    let message = DispatcherMessage::DialComplete {
                        call_id: ticket.call_id,
                        token_id: ticket.token_id,
                    };
                    if sender.send(message).await.is_err() {
                        debug!("Dispatcher gone before dial {} completed", ticket.token_id);
                    }
                }
            }
        });
    }
}

pub struct Dispatcher {
    service: TestConnectionService,
    receiver: mpsc::Receiver<DispatcherMessage>,
    cancel_token: CancellationToken,
}

impl Dispatcher {
    /// Spawn the dispatcher task and return a handle to it
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut service: TestConnectionService) -> DispatcherHandle {
        let (sender, receiver) = mpsc::channel(DISPATCHER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        service.set_scheduler(Box::new(TokioDialScheduler {
            sender: sender.downgrade(),
        }));
        let events = service.event_sender();

        let dispatcher = Dispatcher {
            service,
            receiver,
            cancel_token: cancel_token.clone(),
        };
        tokio::spawn(dispatcher.run());

        DispatcherHandle {
            sender,
            events,
            cancel_token,
        }
    }

    async fn run(mut self) {
        info!("Dispatcher started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!("Dispatcher cancelled");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(DispatcherMessage::Shutdown { respond_to }) => {
                            self.service.shutdown();
                            let _ = respond_to.send(());
                            break;
                        }
                        Some(message) => self.handle_message(message),
                        None => {
                            info!("Dispatcher channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        self.service.shutdown();
        info!("Dispatcher stopped");
    }

    fn handle_message(&mut self, message: DispatcherMessage) {
        match message {
            DispatcherMessage::Platform { event, respond_to } => {
                let result = self.service.handle(event);
                if let Err(e) = &result {
                    debug!("Platform event failed: {}", e);
                }
                if respond_to.send(result).is_err() {
                    warn!("Platform event caller went away before the reply");
                }
            }
            DispatcherMessage::DialComplete { call_id, token_id } => {
                self.service.complete_dial(call_id, token_id);
            }
            DispatcherMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.service.snapshot());
            }
            DispatcherMessage::Shutdown { .. } => {}
        }
    }
}

/// Handle to a running [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherMessage>,
    events: broadcast::Sender<HarnessEvent>,
    cancel_token: CancellationToken,
}

impl DispatcherHandle {
    /// Deliver a platform event and wait for its outcome
    pub async fn send(&self, event: PlatformEvent) -> Result<EventOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherMessage::Platform { event, respond_to: tx })
            .await
            .map_err(|_| HarnessError::DispatcherClosed)?;

        rx.await.map_err(|_| HarnessError::DispatcherClosed)?
    }

    pub async fn create_outgoing(&self, request: ConnectionRequest) -> Result<CallId> {
        let outcome = self.send(PlatformEvent::CreateOutgoing(request)).await?;
        outcome
            .call_id()
            .ok_or_else(|| HarnessError::internal(format!("unexpected outcome {:?}", outcome)))
    }

    pub async fn create_incoming(&self, request: ConnectionRequest) -> Result<CallId> {
        let outcome = self.send(PlatformEvent::CreateIncoming(request)).await?;
        outcome
            .call_id()
            .ok_or_else(|| HarnessError::internal(format!("unexpected outcome {:?}", outcome)))
    }

    pub async fn conference(&self, a: CallId, b: CallId) -> Result<ConferenceId> {
        let outcome = self.send(PlatformEvent::Conference(a, b)).await?;
        outcome
            .conference_id()
            .ok_or_else(|| HarnessError::internal(format!("unexpected outcome {:?}", outcome)))
    }

    pub async fn snapshot(&self) -> Result<HarnessSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherMessage::Snapshot { respond_to: tx })
            .await
            .map_err(|_| HarnessError::DispatcherClosed)?;

        rx.await.map_err(|_| HarnessError::DispatcherClosed)
    }

    /// Stop the dispatcher after the messages already queued
    ///
    /// Pending dials are cancelled.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|_| HarnessError::DispatcherClosed)?;

        rx.await.map_err(|_| HarnessError::DispatcherClosed)
    }

    /// Stop immediately, dropping anything still queued
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HarnessEvent> {
        self.events.subscribe()
    }
}
