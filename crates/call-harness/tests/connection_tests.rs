//! Connection request handling
//!
//! Outgoing, incoming and unknown connection requests as the platform would
//! deliver them, including the refusal paths.

use std::io::Write;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rvoip_call_harness::{
    AudioCue, CallDirection, CallId, CallState, ConnectionRequest, DisconnectCause, HarnessConfig, HarnessError,
    LoopingTone, MediaHandle, MediaResourceProvider, NumberGenerator, PlatformEvent, TestConnectionService,
    TestVideoProvider, ToneConfig, VideoState,
};

const ACCOUNT: &str = "rvoip-call-harness";

struct NoCamera;

impl MediaResourceProvider for NoCamera {
    fn acquire(&self, _call_id: CallId) -> rvoip_call_harness::Result<MediaHandle> {
        Err(HarnessError::media("camera unavailable"))
    }

    fn release(&self, _handle: MediaHandle) -> rvoip_call_harness::Result<()> {
        Ok(())
    }
}

fn service() -> TestConnectionService {
    TestConnectionService::from_config(HarnessConfig::default())
        .unwrap()
        .with_numbers(NumberGenerator::seeded("555", 3))
}

#[test]
fn test_outgoing_accepts_tel_uri_and_gateway_extras() {
    let mut service = service();
    let request = ConnectionRequest::outgoing("tel:5554321").with_gateway("com.example.gateway", "16505554321");

    let id = service.create_outgoing(request).unwrap();
    let call = service.call(&id).unwrap();
    assert_eq!(call.address.to_uri(), "tel:5554321");
    assert_eq!(call.direction, CallDirection::Outgoing);
    assert_eq!(call.state(), CallState::Dialing);
    assert!(call.capabilities.hold);
}

#[test]
fn test_outgoing_video_flag() {
    let mut service = service();
    let id = service
        .create_outgoing(ConnectionRequest::outgoing("5554321").with_video(true))
        .unwrap();
    assert_eq!(service.call(&id).unwrap().video_state, VideoState::Bidirectional);
}

#[test]
fn test_outgoing_refusals_register_nothing() {
    let mut service = service();

    let err = service
        .handle(PlatformEvent::CreateOutgoing(ConnectionRequest::outgoing("tel:4155550100")))
        .unwrap_err();
    assert!(matches!(err, HarnessError::NotATestNumber { ref number } if number == "4155550100"));

    let err = service
        .create_outgoing(ConnectionRequest::outgoing("tel:5550340"))
        .unwrap_err();
    assert!(matches!(err, HarnessError::ProviderCrash { .. }));

    let err = service
        .create_outgoing(ConnectionRequest::outgoing("sip:x@y"))
        .unwrap_err();
    assert!(matches!(err, HarnessError::NotATestNumber { ref number } if number == "sip:x@y"));

    let err = service
        .create_outgoing(ConnectionRequest::default())
        .unwrap_err();
    assert!(matches!(err, HarnessError::InvalidNumber(_)));

    assert_eq!(service.call_count(), 0);
    assert!(!service.snapshot().tone_playing);
}

#[test]
fn test_custom_test_prefix() {
    let config = HarnessConfig::default().with_test_number_prefix("999");
    let mut service = TestConnectionService::from_config(config).unwrap();

    assert!(service.create_outgoing(ConnectionRequest::outgoing("5551234")).is_err());
    assert!(service.create_outgoing(ConnectionRequest::outgoing("9991234")).is_ok());

    let id = service.create_incoming(ConnectionRequest::incoming(ACCOUNT)).unwrap();
    assert!(service.call(&id).unwrap().address.number().starts_with("9990"));
}

#[test]
fn test_incoming_lifecycle() {
    let mut service = service();
    let id = service.create_incoming(ConnectionRequest::incoming(ACCOUNT)).unwrap();
    assert_eq!(service.call(&id).unwrap().state(), CallState::Ringing);

    service.answer(id).unwrap();
    service.hold(id).unwrap();
    service.unhold(id).unwrap();
    service.play_dtmf(id, '4').unwrap();
    service.stop_dtmf(id).unwrap();
    assert_eq!(service.call(&id).unwrap().dtmf_digits(), "4");
    assert_eq!(service.call(&id).unwrap().state(), CallState::Active);

    service.disconnect(id).unwrap();
    assert!(service.call(&id).is_none());
}

#[test]
fn test_incoming_rejects_foreign_account() {
    let mut service = service();

    let err = service
        .create_incoming(ConnectionRequest::incoming("other-account"))
        .unwrap_err();
    match err {
        HarnessError::InvalidAccount { account, expected } => {
            assert_eq!(account.as_deref(), Some("other-account"));
            assert_eq!(expected, ACCOUNT);
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert!(matches!(
        service.create_incoming(ConnectionRequest::default()),
        Err(HarnessError::InvalidAccount { account: None, .. })
    ));
}

#[test]
fn test_unknown_call_uses_address() {
    let mut service = service();
    let mut request = ConnectionRequest::incoming(ACCOUNT);
    request.address = Some("tel:5550999".to_string());

    let id = service.handle(PlatformEvent::CreateUnknown(request)).unwrap().call_id().unwrap();
    let call = service.call(&id).unwrap();
    assert_eq!(call.direction, CallDirection::Unknown);
    assert_eq!(call.address.number(), "5550999");
    assert_eq!(call.state(), CallState::Dialing);
}

#[test]
fn test_incoming_video_without_camera_fails_cleanly() {
    let tone = Arc::new(LoopingTone::new(&ToneConfig::default()).unwrap());
    let mut service = TestConnectionService::new(HarnessConfig::default(), Arc::new(NoCamera), tone.clone());

    let err = service
        .create_incoming(ConnectionRequest::incoming(ACCOUNT).with_video(true))
        .unwrap_err();
    assert!(err.is_collaborator_failure());
    assert_eq!(service.call_count(), 0);
    assert!(!tone.is_playing());

    // Audio calls do not need the camera
    assert!(service.create_incoming(ConnectionRequest::incoming(ACCOUNT)).is_ok());
}

#[test]
fn test_reject_and_abort_causes() {
    let media = Arc::new(TestVideoProvider::new());
    let tone = Arc::new(LoopingTone::new(&ToneConfig::default()).unwrap());
    let mut service = TestConnectionService::new(HarnessConfig::default(), media, tone);
    let mut events = service.subscribe();

    let ringing = service.create_incoming(ConnectionRequest::incoming(ACCOUNT)).unwrap();
    let dialing = service.create_outgoing(ConnectionRequest::outgoing("5551234")).unwrap();

    // Abort is only valid while dialing
    assert!(service.abort(ringing).is_err());
    service.reject(ringing).unwrap();
    service.abort(dialing).unwrap();

    let causes: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            rvoip_call_harness::HarnessEvent::CallRemoved { call_id, cause } => Some((call_id, cause)),
            _ => None,
        })
        .collect();
    assert_eq!(
        causes,
        vec![
            (ringing, Some(DisconnectCause::Rejected)),
            (dialing, Some(DisconnectCause::Canceled)),
        ]
    );
}

#[test]
fn test_service_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "account_id = \"lab-bench\"").unwrap();
    writeln!(file, "dial_delay_ms = 50").unwrap();

    let config = HarnessConfig::from_file(file.path()).unwrap();
    let mut service = TestConnectionService::from_config(config).unwrap();

    assert!(service.create_incoming(ConnectionRequest::incoming(ACCOUNT)).is_err());
    assert!(service.create_incoming(ConnectionRequest::incoming("lab-bench")).is_ok());
}
