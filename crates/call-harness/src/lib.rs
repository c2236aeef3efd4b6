//! # rvoip-call-harness
//!
//! A simulated telephony provider for exercising call orchestration logic
//! without real telephony hardware. Fake calls move through a per-call state
//! machine, can be merged into conferences, and are tracked in a registry that
//! keeps the set of conferenceable calls up to date.
//!
//! ## Layers
//!
//! - [`call::state`]: pure `transition(state, event)` table
//! - [`call::Call`]: one leg, applying events to its own state
//! - [`registry::CallRegistry`]: owns live calls, drives the audio cue and the
//!   [`conferenceable::ConferenceabilityIndex`]
//! - [`conference::ConferenceAggregator`]: merge, split, hold and teardown
//! - [`service::TestConnectionService`]: platform callbacks
//! - [`dispatcher::Dispatcher`]: the single control task, with deferred dial
//!   completion from [`deferred`]
//!
//! ## Example
//!
//! ```no_run
//! use rvoip_call_harness::{ConnectionRequest, Dispatcher, HarnessConfig, TestConnectionService};
//!
//! # async fn example() -> rvoip_call_harness::Result<()> {
//! let config = HarnessConfig::default();
//! config.init_logging()?;
//! let service = TestConnectionService::from_config(config)?;
//! let harness = Dispatcher::spawn(service);
//!
//! let a = harness.create_outgoing(ConnectionRequest::outgoing("tel:5551234")).await?;
//! let b = harness
//!     .create_incoming(ConnectionRequest::incoming("rvoip-call-harness"))
//!     .await?;
//! let conference = harness.conference(a, b).await?;
//! println!("merged into {}", conference);
//!
//! harness.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod conference;
pub mod conferenceable;
pub mod config;
pub mod deferred;
pub mod dispatcher;
pub mod errors;
pub mod logging;
pub mod media;
pub mod numbers;
pub mod registry;
pub mod service;
pub mod types;

pub use call::state::{transition, CallEvent, CallState, Transition};
pub use call::Call;
pub use conference::{Conference, ConferenceAggregator, ConferenceState, Detached};
pub use conferenceable::ConferenceabilityIndex;
pub use config::HarnessConfig;
pub use deferred::{DeferredTransitions, DialScheduler, DialTicket};
pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherMessage};
pub use errors::{HarnessError, Result};
pub use logging::{setup_logging, LogSettings};
pub use media::{AudioCue, LoopingTone, MediaHandle, MediaResourceProvider, TestVideoProvider, ToneConfig};
pub use numbers::NumberGenerator;
pub use registry::CallRegistry;
pub use service::{
    EventOutcome, HarnessEvent, HarnessSnapshot, PlatformEvent, ServiceStats, TestConnectionService,
};
pub use types::{
    CallDirection, CallId, Capabilities, ConferenceId, ConnectionRequest, DisconnectCause, PhoneNumber,
    RequestExtras, VideoState,
};
