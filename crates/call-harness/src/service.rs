//! Test connection service
//!
//! The platform-facing surface of the harness. Connection requests become
//! calls in the registry, per-call events drive each call's state machine, and
//! conference events go through the aggregator. Everything here runs on one
//! control thread: the service is a plain `&mut self` object and the
//! [`Dispatcher`](crate::dispatcher::Dispatcher) is what serializes access.
//!
//! Every call that reaches `Disconnected` is torn down in one place: its
//! pending dial is cancelled, it leaves its conference, and it is removed from
//! the registry, which releases its media.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::call::state::{CallEvent, CallState, Transition};
use crate::call::Call;
use crate::conference::{Conference, ConferenceAggregator, ConferenceState, Detached};
use crate::config::HarnessConfig;
use crate::deferred::{DeferredTransitions, DialScheduler};
use crate::errors::{HarnessError, Result};
use crate::media::{AudioCue, LoopingTone, MediaResourceProvider, TestVideoProvider};
use crate::numbers::NumberGenerator;
use crate::registry::{CallRegistry, RegistryStats};
use crate::types::{
    CallDirection, CallId, ConferenceId, ConnectionRequest, DisconnectCause, PhoneNumber, VideoState,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Platform callbacks delivered to the service
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    CreateOutgoing(ConnectionRequest),
    CreateIncoming(ConnectionRequest),
    CreateUnknown(ConnectionRequest),
    Answer(CallId),
    Reject(CallId),
    Hold(CallId),
    Unhold(CallId),
    Disconnect(CallId),
    Abort(CallId),
    PlayDtmf(CallId, char),
    StopDtmf(CallId),
    /// Merge two calls into a new conference
    Conference(CallId, CallId),
    Separate {
        conference_id: ConferenceId,
        call_id: CallId,
    },
    ConferenceHold(ConferenceId),
    ConferenceUnhold(ConferenceId),
    ConferenceDisconnect(ConferenceId),
    Unbind,
}

impl PlatformEvent {
    /// The call and state machine event for per-call callbacks
    pub fn call_event(&self) -> Option<(CallId, CallEvent)> {
        let pair = match self {
            Self::Answer(id) => (*id, CallEvent::Answer),
            Self::Reject(id) => (*id, CallEvent::Reject),
            Self::Hold(id) => (*id, CallEvent::Hold),
            Self::Unhold(id) => (*id, CallEvent::Unhold),
            Self::Disconnect(id) => (*id, CallEvent::Disconnect),
            Self::Abort(id) => (*id, CallEvent::Abort),
            Self::PlayDtmf(id, digit) => (*id, CallEvent::PlayDtmf(*digit)),
            Self::StopDtmf(id) => (*id, CallEvent::StopDtmf),
            _ => return None,
        };
        Some(pair)
    }
}

/// What a platform event produced
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    CallCreated(CallId),
    CallUpdated(Transition),
    ConferenceCreated(ConferenceId),
    /// Result of a separate; `None` if the call was not a member
    Separated(Option<Detached>),
    Done,
}

impl EventOutcome {
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::CallCreated(id) => Some(*id),
            _ => None,
        }
    }

    pub fn conference_id(&self) -> Option<ConferenceId> {
        match self {
            Self::ConferenceCreated(id) => Some(*id),
            _ => None,
        }
    }
}

/// Lifecycle notifications published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum HarnessEvent {
    CallAdded {
        call_id: CallId,
        direction: CallDirection,
        address: PhoneNumber,
    },
    CallStateChanged {
        call_id: CallId,
        from: CallState,
        to: CallState,
    },
    CallRemoved {
        call_id: CallId,
        cause: Option<DisconnectCause>,
    },
    ConferenceCreated {
        conference_id: ConferenceId,
        members: Vec<CallId>,
    },
    ConferenceStateChanged {
        conference_id: ConferenceId,
        state: ConferenceState,
    },
    ConferenceDestroyed {
        conference_id: ConferenceId,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Deferred connects that were applied
    pub dials_completed: u64,
    /// Deferred connects that arrived after their ticket was cancelled
    pub stale_dials_ignored: u64,
    pub calls_added: usize,
    pub calls_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub id: CallId,
    pub direction: CallDirection,
    pub address: String,
    pub state: CallState,
    pub video_state: VideoState,
    pub conference: Option<ConferenceId>,
    pub has_media: bool,
    pub pending_dial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceSnapshot {
    pub id: ConferenceId,
    pub state: ConferenceState,
    pub members: Vec<CallId>,
}

/// Point-in-time view of the whole harness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessSnapshot {
    /// In registration order
    pub calls: Vec<CallSnapshot>,
    pub conferences: Vec<ConferenceSnapshot>,
    pub conferenceable: HashMap<CallId, Vec<CallId>>,
    pub tone_playing: bool,
    pub stats: ServiceStats,
}

impl HarnessSnapshot {
    pub fn call(&self, call_id: &CallId) -> Option<&CallSnapshot> {
        self.calls.iter().find(|call| call.id == *call_id)
    }

    pub fn conference(&self, conference_id: &ConferenceId) -> Option<&ConferenceSnapshot> {
        self.conferences.iter().find(|conference| conference.id == *conference_id)
    }
}

pub struct TestConnectionService {
    config: HarnessConfig,
    registry: CallRegistry,
    conferences: ConferenceAggregator,
    deferred: DeferredTransitions,
    scheduler: Option<Box<dyn DialScheduler>>,
    numbers: NumberGenerator,
    media: Arc<dyn MediaResourceProvider>,
    cue: Arc<dyn AudioCue>,
    events: broadcast::Sender<HarnessEvent>,
    dials_completed: u64,
    stale_dials_ignored: u64,
}

impl TestConnectionService {
    pub fn new(config: HarnessConfig, media: Arc<dyn MediaResourceProvider>, cue: Arc<dyn AudioCue>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            numbers: NumberGenerator::new(config.test_number_prefix.clone()),
            registry: CallRegistry::new(media.clone(), cue.clone()),
            conferences: ConferenceAggregator::new(),
            deferred: DeferredTransitions::new(),
            scheduler: None,
            config,
            media,
            cue,
            events,
            dials_completed: 0,
            stale_dials_ignored: 0,
        }
    }

    /// Build a service backed by the in-crate video provider and looping tone
    pub fn from_config(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let cue = Arc::new(LoopingTone::new(&config.tone)?);
        let media = Arc::new(TestVideoProvider::new());
        Ok(Self::new(config, media, cue))
    }

    /// Replace the number generator, e.g. with a seeded one
    pub fn with_numbers(mut self, numbers: NumberGenerator) -> Self {
        self.numbers = numbers;
        self
    }

    /// Without a scheduler outgoing calls stay in `Dialing` until
    /// [`complete_dial`](Self::complete_dial) is called by hand.
    pub fn set_scheduler(&mut self, scheduler: Box<dyn DialScheduler>) {
        self.scheduler = Some(scheduler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HarnessEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<HarnessEvent> {
        self.events.clone()
    }

    /// Single entry point for platform callbacks
    pub fn handle(&mut self, event: PlatformEvent) -> Result<EventOutcome> {
        if let Some((call_id, call_event)) = event.call_event() {
            return self.handle_call_event(call_id, call_event).map(EventOutcome::CallUpdated);
        }

        match event {
            PlatformEvent::CreateOutgoing(request) => self.create_outgoing(request).map(EventOutcome::CallCreated),
            PlatformEvent::CreateIncoming(request) => self.create_incoming(request).map(EventOutcome::CallCreated),
            PlatformEvent::CreateUnknown(request) => self.create_unknown(request).map(EventOutcome::CallCreated),
            PlatformEvent::Conference(a, b) => self.conference(a, b).map(EventOutcome::ConferenceCreated),
            PlatformEvent::Separate { conference_id, call_id } => {
                Ok(EventOutcome::Separated(self.separate(&conference_id, &call_id)))
            }
            PlatformEvent::ConferenceHold(id) => self.hold_conference(&id).map(|_| EventOutcome::Done),
            PlatformEvent::ConferenceUnhold(id) => self.unhold_conference(&id).map(|_| EventOutcome::Done),
            PlatformEvent::ConferenceDisconnect(id) => self.disconnect_conference(&id).map(|_| EventOutcome::Done),
            PlatformEvent::Unbind => {
                self.unbind();
                Ok(EventOutcome::Done)
            }
            other => Err(HarnessError::internal(format!("unrouted platform event {:?}", other))),
        }
    }

    /// Place an outgoing call
    ///
    /// Other active calls are put on hold and the new call connects after the
    /// configured dial delay.
    pub fn create_outgoing(&mut self, request: ConnectionRequest) -> Result<CallId> {
        let raw = request
            .address
            .as_deref()
            .ok_or_else(|| HarnessError::InvalidNumber(String::new()))?;
        info!("Outgoing call to {}", raw);
        let number = match PhoneNumber::parse(raw) {
            Ok(number) => number,
            Err(_) => {
                info!("Not a test number: {}", raw);
                return Err(HarnessError::NotATestNumber {
                    number: raw.to_string(),
                });
            }
        };

        if number.number() == self.config.crash_number {
            return Err(HarnessError::ProviderCrash {
                number: number.to_string(),
            });
        }
        if let Some(package) = &request.extras.gateway_package {
            info!(
                "Gateway package [{}], original address [{}]",
                package,
                request.extras.gateway_original_address.as_deref().unwrap_or("")
            );
        }
        if !self.numbers.is_test_number(&number) {
            info!("Not a test number: {}", number);
            return Err(HarnessError::NotATestNumber {
                number: number.to_string(),
            });
        }

        self.hold_active_calls();

        let call = Call::new(CallDirection::Outgoing, number, VideoState::from_video_flag(request.is_video));
        let call_id = self.register(call);
        self.schedule_dial(call_id);
        Ok(call_id)
    }

    /// Simulate an incoming call ringing on the harness account
    pub fn create_incoming(&mut self, request: ConnectionRequest) -> Result<CallId> {
        self.check_account(&request)?;
        let number = self.request_number(&request)?;
        let mut call = Call::new(CallDirection::Incoming, number, VideoState::from_video_flag(request.is_video));

        if request.is_video {
            let handle = self.media.acquire(call.id)?;
            debug!("Attached {} to incoming video call", handle);
            call = call.with_media(handle);
        }

        info!("Incoming call from {}", call.address);
        Ok(self.register(call))
    }

    /// A call the platform found that neither side explicitly placed
    pub fn create_unknown(&mut self, request: ConnectionRequest) -> Result<CallId> {
        self.check_account(&request)?;
        let number = self.request_number(&request)?;
        let call = Call::new(CallDirection::Unknown, number, VideoState::AudioOnly);
        info!("Unknown call with {}", call.address);
        Ok(self.register(call))
    }

    pub fn answer(&mut self, call_id: CallId) -> Result<Transition> {
        self.handle_call_event(call_id, CallEvent::Answer)
    }

    pub fn reject(&mut self, call_id: CallId) -> Result<Transition> {
        self.handle_call_event(call_id, CallEvent::Reject)
    }

    pub fn hold(&mut self, call_id: CallId) -> Result<Transition> {
        self.handle_call_event(call_id, CallEvent::Hold)
    }

    pub fn unhold(&mut self, call_id: CallId) -> Result<Transition> {
        self.handle_call_event(call_id, CallEvent::Unhold)
    }

    pub fn disconnect(&mut self, call_id: CallId) -> Result<Transition> {
        self.handle_call_event(call_id, CallEvent::Disconnect)
    }

    pub fn abort(&mut self, call_id: CallId) -> Result<Transition> {
        self.handle_call_event(call_id, CallEvent::Abort)
    }

    pub fn play_dtmf(&mut self, call_id: CallId, digit: char) -> Result<Transition> {
        self.handle_call_event(call_id, CallEvent::PlayDtmf(digit))
    }

    pub fn stop_dtmf(&mut self, call_id: CallId) -> Result<Transition> {
        self.handle_call_event(call_id, CallEvent::StopDtmf)
    }

    /// Apply `event` to one call, tearing it down if it disconnects
    pub fn handle_call_event(&mut self, call_id: CallId, event: CallEvent) -> Result<Transition> {
        let call = self.registry.get_mut(&call_id).ok_or(HarnessError::UnknownCall(call_id))?;
        let t = call.handle(event)?;

        if t.from == CallState::Dialing && t.to != CallState::Dialing {
            self.deferred.cancel(&call_id);
        }
        if t.changed() {
            self.publish(HarnessEvent::CallStateChanged {
                call_id,
                from: t.from,
                to: t.to,
            });
        }
        if t.entered_terminal() {
            self.teardown(&call_id);
        }
        Ok(t)
    }

    /// Apply a deferred connect if its ticket is still current
    ///
    /// Returns whether the call was connected.
    pub fn complete_dial(&mut self, call_id: CallId, token_id: u64) -> bool {
        if !self.deferred.redeem(&call_id, token_id) {
            debug!("Ignoring stale dial completion {} for {}", token_id, call_id);
            self.stale_dials_ignored += 1;
            return false;
        }

        let dialing = self
            .registry
            .get(&call_id)
            .map(|call| call.state() == CallState::Dialing)
            .unwrap_or(false);
        if !dialing {
            debug!("Dial completion for {} arrived after it left Dialing", call_id);
            self.stale_dials_ignored += 1;
            return false;
        }

        match self.handle_call_event(call_id, CallEvent::Connect) {
            Ok(_) => {
                info!("Call {} connected", call_id);
                self.dials_completed += 1;
                true
            }
            Err(e) => {
                warn!("Failed to connect {}: {}", call_id, e);
                false
            }
        }
    }

    /// Merge two calls into a new conference
    pub fn conference(&mut self, a: CallId, b: CallId) -> Result<ConferenceId> {
        let before: Vec<(CallId, CallState)> = [a, b]
            .iter()
            .filter_map(|id| self.registry.get(id).map(|call| (*id, call.state())))
            .collect();

        let conference_id = self.conferences.merge(&mut self.registry, a, b)?;

        for (call_id, from) in before {
            if from == CallState::Dialing {
                self.deferred.cancel(&call_id);
            }
            if from != CallState::Active {
                self.publish(HarnessEvent::CallStateChanged {
                    call_id,
                    from,
                    to: CallState::Active,
                });
            }
        }
        self.publish(HarnessEvent::ConferenceCreated {
            conference_id,
            members: vec![a, b],
        });
        Ok(conference_id)
    }

    /// Pull a call out of a conference without disconnecting it
    pub fn separate(&mut self, conference_id: &ConferenceId, call_id: &CallId) -> Option<Detached> {
        let detached = self.conferences.split(&mut self.registry, conference_id, call_id)?;
        if detached.destroyed {
            self.publish(HarnessEvent::ConferenceDestroyed {
                conference_id: *conference_id,
            });
        }
        Some(detached)
    }

    pub fn hold_conference(&mut self, conference_id: &ConferenceId) -> Result<()> {
        self.set_conference_state(conference_id, true)
    }

    pub fn unhold_conference(&mut self, conference_id: &ConferenceId) -> Result<()> {
        self.set_conference_state(conference_id, false)
    }

    /// Disconnect every member; the conference is destroyed with the last one
    pub fn disconnect_conference(&mut self, conference_id: &ConferenceId) -> Result<()> {
        let members = self.conferences.members_of(conference_id)?;
        info!("Disconnecting conference {} ({} members)", conference_id, members.len());
        for call_id in members {
            if let Err(e) = self.handle_call_event(call_id, CallEvent::Disconnect) {
                warn!("Failed to disconnect conference member {}: {}", call_id, e);
            }
        }
        Ok(())
    }

    /// The platform unbound from the service
    pub fn unbind(&mut self) {
        info!("Service unbound");
        if let Err(e) = self.cue.stop() {
            warn!("Failed to stop audio cue: {}", e);
        }
        self.cue.release();
    }

    /// Cancel every pending deferred transition
    pub fn shutdown(&mut self) {
        if !self.deferred.is_empty() {
            debug!("Cancelling {} pending dials", self.deferred.len());
        }
        self.deferred.cancel_all();
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn call(&self, call_id: &CallId) -> Option<&Call> {
        self.registry.get(call_id)
    }

    pub fn calls(&self) -> impl Iterator<Item = &Call> {
        self.registry.calls()
    }

    pub fn call_count(&self) -> usize {
        self.registry.len()
    }

    pub fn get_conference(&self, conference_id: &ConferenceId) -> Option<&Conference> {
        self.conferences.get(conference_id)
    }

    pub fn conference_count(&self) -> usize {
        self.conferences.len()
    }

    /// Calls `call_id` could currently be conferenced with
    pub fn eligible(&self, call_id: &CallId) -> Vec<CallId> {
        self.registry.eligible(call_id)
    }

    /// Token of the pending dial for `call_id`
    pub fn pending_dial(&self, call_id: &CallId) -> Option<u64> {
        self.deferred.pending_token(call_id)
    }

    pub fn stats(&self) -> ServiceStats {
        let RegistryStats {
            total_added,
            total_removed,
        } = self.registry.stats();
        ServiceStats {
            dials_completed: self.dials_completed,
            stale_dials_ignored: self.stale_dials_ignored,
            calls_added: total_added,
            calls_removed: total_removed,
        }
    }

    pub fn snapshot(&self) -> HarnessSnapshot {
        let calls = self
            .registry
            .calls()
            .map(|call| CallSnapshot {
                id: call.id,
                direction: call.direction,
                address: call.address.to_string(),
                state: call.state(),
                video_state: call.video_state,
                conference: call.conference(),
                has_media: call.media().is_some(),
                pending_dial: self.deferred.pending_token(&call.id).is_some(),
            })
            .collect();
        let conferences = self
            .conferences
            .conferences()
            .map(|conference| ConferenceSnapshot {
                id: conference.id,
                state: conference.state(),
                members: conference.members().to_vec(),
            })
            .collect();

        HarnessSnapshot {
            calls,
            conferences,
            conferenceable: self.registry.conferenceable().to_map(),
            tone_playing: self.cue.is_playing(),
            stats: self.stats(),
        }
    }

    fn register(&mut self, call: Call) -> CallId {
        let event = HarnessEvent::CallAdded {
            call_id: call.id,
            direction: call.direction,
            address: call.address.clone(),
        };
        let call_id = self.registry.add(call);
        self.publish(event);
        call_id
    }

    fn schedule_dial(&mut self, call_id: CallId) {
        let ticket = self.deferred.issue(call_id);
        match &self.scheduler {
            Some(scheduler) => {
                debug!("Scheduled dial {} for {} in {:?}", ticket.token_id, call_id, self.config.dial_delay());
                scheduler.schedule(ticket, self.config.dial_delay());
            }
            None => debug!("No dial scheduler; {} stays Dialing", call_id),
        }
    }

    /// Put every other active call on hold before a new outgoing call
    ///
    /// Active conferences are held as a whole first. Any call still `Active`
    /// after that is held on its own, including a member that was unheld
    /// individually inside a held conference.
    fn hold_active_calls(&mut self) {
        let conferences: Vec<ConferenceId> = self
            .conferences
            .conferences()
            .filter(|conference| conference.state() == ConferenceState::Active)
            .map(|conference| conference.id)
            .collect();
        for conference_id in conferences {
            if let Err(e) = self.hold_conference(&conference_id) {
                warn!("Failed to hold conference {}: {}", conference_id, e);
            }
        }

        let calls: Vec<CallId> = self
            .registry
            .calls()
            .filter(|call| call.state() == CallState::Active)
            .map(|call| call.id)
            .collect();
        for call_id in calls {
            if let Err(e) = self.hold(call_id) {
                warn!("Failed to hold {}: {}", call_id, e);
            }
        }
    }

    fn set_conference_state(&mut self, conference_id: &ConferenceId, hold: bool) -> Result<()> {
        let before: Vec<(CallId, CallState)> = self
            .conferences
            .members_of(conference_id)?
            .into_iter()
            .filter_map(|id| self.registry.get(&id).map(|call| (id, call.state())))
            .collect();

        if hold {
            self.conferences.hold(&mut self.registry, conference_id)?;
        } else {
            self.conferences.unhold(&mut self.registry, conference_id)?;
        }

        for (call_id, from) in before {
            if let Some(to) = self.registry.get(&call_id).map(|call| call.state()) {
                if to != from {
                    self.publish(HarnessEvent::CallStateChanged { call_id, from, to });
                }
            }
        }
        if let Some(state) = self.conferences.get(conference_id).map(|conference| conference.state()) {
            self.publish(HarnessEvent::ConferenceStateChanged {
                conference_id: *conference_id,
                state,
            });
        }
        Ok(())
    }

    fn check_account(&self, request: &ConnectionRequest) -> Result<()> {
        if request.account.as_deref() == Some(self.config.account_id.as_str()) {
            return Ok(());
        }
        info!("Refusing connection for account {:?}", request.account);
        Err(HarnessError::InvalidAccount {
            account: request.account.clone(),
            expected: self.config.account_id.clone(),
        })
    }

    fn request_number(&mut self, request: &ConnectionRequest) -> Result<PhoneNumber> {
        match request.extras.handle.as_deref().or(request.address.as_deref()) {
            Some(address) => PhoneNumber::parse(address),
            None => self.numbers.dummy_number(request.is_video),
        }
    }

    fn teardown(&mut self, call_id: &CallId) {
        self.deferred.cancel(call_id);

        if let Some(conference_id) = self.registry.get(call_id).and_then(|call| call.conference()) {
            let detached = self.conferences.detach(&mut self.registry, &conference_id, call_id);
            if detached.map(|d| d.destroyed).unwrap_or(false) {
                self.publish(HarnessEvent::ConferenceDestroyed { conference_id });
            }
        }

        if let Some(call) = self.registry.remove(call_id) {
            let cause = call.disconnect_cause().copied();
            info!(
                "Call {} disconnected ({})",
                call_id,
                cause.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
            );
            self.publish(HarnessEvent::CallRemoved {
                call_id: *call_id,
                cause,
            });
        }
    }

    fn publish(&self, event: HarnessEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for TestConnectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestConnectionService")
            .field("registry", &self.registry)
            .field("conferences", &self.conferences.len())
            .field("pending_dials", &self.deferred.len())
            .field("has_scheduler", &self.scheduler.is_some())
            .finish()
    }
}
