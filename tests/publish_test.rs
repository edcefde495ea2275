//! Camera+microphone publishing tests
//!
//! These tests cover the publish life cycle against in-memory fakes:
//! - Idempotent publish and the one-session-per-room guard
//! - In-place toggles that never renegotiate
//! - Rollback of every acquired resource on failure
//! - Gateway-first unpublish that always resets local state
//! - Remote session end detected by the keep-alive

use classroom_media::testing::{GatewayCall, TestRig};
use classroom_media::{ClassroomError, MediaError, RoomId};
use std::time::Duration;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_publish_creates_one_session() {
    let rig = TestRig::new();
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");

    let info = assert_ok!(publisher.publish(&room).await);
    assert_eq!(info.room_id, room);
    assert_eq!(info.local_track_count, 2);
    assert!(info.gathering_complete);
    assert!(publisher.is_published(&room).await);
    assert_eq!(rig.gateway.publish_count(), 1);
    assert_eq!(rig.transports.open_count(), 1);

    let transport = rig.transports.last().unwrap();
    assert_eq!(transport.attached_tracks().len(), 2);
    assert!(transport.remote().is_some());
}

#[tokio::test]
async fn test_publish_again_is_noop() {
    let rig = TestRig::new();
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");

    let first = publisher.publish(&room).await.unwrap();
    let second = publisher.publish(&room).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(rig.gateway.publish_count(), 1);
    assert_eq!(rig.transports.transports().len(), 1);
    assert_eq!(rig.devices.issued_tracks().len(), 2);
}

#[tokio::test]
async fn test_publish_to_second_room_rejected() {
    let rig = TestRig::new();
    let publisher = rig.media_publisher();

    publisher.publish(&RoomId::from("room-a")).await.unwrap();
    let err = publisher.publish(&RoomId::from("room-b")).await.unwrap_err();

    assert!(matches!(err, ClassroomError::AlreadyActive(_)));
    assert!(publisher.is_published(&RoomId::from("room-a")).await);
    assert_eq!(rig.devices.live_tracks(), 2);
}

#[tokio::test]
async fn test_toggles_keep_session_ids() {
    let rig = TestRig::new();
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");
    let before = publisher.publish(&room).await.unwrap();

    assert_eq!(publisher.toggle_camera().await.unwrap(), false);
    assert_eq!(publisher.toggle_microphone().await.unwrap(), false);
    assert_eq!(publisher.toggle_camera().await.unwrap(), true);

    let after = publisher.session().await.unwrap();
    assert_eq!(after.session_id, before.session_id);
    assert_eq!(after.handle_id, before.handle_id);
    assert_eq!(rig.gateway.publish_count(), 1);

    let tracks = rig.devices.issued_tracks();
    let camera = tracks.iter().find(|t| t.label() == "fake-camera").unwrap();
    let microphone = tracks.iter().find(|t| t.label() == "fake-microphone").unwrap();
    assert!(camera.is_enabled());
    assert!(!microphone.is_enabled());
    assert!(camera.is_live() && microphone.is_live());
}

#[tokio::test]
async fn test_toggle_without_publication() {
    let rig = TestRig::new();
    let publisher = rig.media_publisher();

    let err = publisher.toggle_camera().await.unwrap_err();
    assert!(matches!(err, ClassroomError::NotPublished(_)));
}

#[tokio::test]
async fn test_permission_denied_leaves_nothing_behind() {
    let rig = TestRig::new();
    rig.devices.deny_camera();
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");

    let err = publisher.publish(&room).await.unwrap_err();
    assert!(matches!(
        err,
        ClassroomError::Acquisition(MediaError::PermissionDenied(_))
    ));
    assert!(!publisher.is_published(&room).await);
    assert!(rig.transports.transports().is_empty());
    assert_eq!(rig.gateway.publish_count(), 0);
}

#[tokio::test]
async fn test_gateway_rejection_rolls_back() {
    let rig = TestRig::new();
    rig.gateway.fail_publish("room is closed");
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");

    let err = publisher.publish(&room).await.unwrap_err();
    assert!(matches!(err, ClassroomError::Gateway(ref msg) if msg == "room is closed"));
    assert_eq!(rig.devices.live_tracks(), 0);
    assert_eq!(rig.transports.open_count(), 0);
    assert!(publisher.session().await.is_none());
    // The handle allocated alongside the refusal is handed back
    assert_eq!(rig.gateway.unpublished().len(), 1);
}

#[tokio::test]
async fn test_missing_answer_is_negotiation_failure() {
    let rig = TestRig::new();
    rig.gateway.publish_without_answer();
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");

    let err = publisher.publish(&room).await.unwrap_err();
    assert!(matches!(err, ClassroomError::Negotiation(_)));
    assert_eq!(rig.devices.live_tracks(), 0);
    assert_eq!(rig.transports.open_count(), 0);
    // The allocated handle is handed back
    assert_eq!(rig.gateway.unpublished().len(), 1);
}

#[tokio::test]
async fn test_transport_failure_rolls_back() {
    let rig = TestRig::new();
    rig.transports.fail_negotiation(true);
    let publisher = rig.media_publisher();

    let err = publisher.publish(&RoomId::from("physics-101")).await.unwrap_err();
    assert!(matches!(err, ClassroomError::Negotiation(_)));
    assert_eq!(rig.devices.live_tracks(), 0);
    assert_eq!(rig.transports.open_count(), 0);
    assert_eq!(rig.gateway.publish_count(), 0);
}

#[tokio::test]
async fn test_unpublish_notifies_gateway_before_stopping_tracks() {
    let rig = TestRig::new();
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");
    let info = publisher.publish(&room).await.unwrap();
    rig.gateway.observe_tracks(rig.devices.issued_tracks());

    publisher.unpublish(&room).await.unwrap();

    assert_eq!(
        rig.gateway.unpublished(),
        vec![(info.session_id, info.handle_id, 2)]
    );
    assert_eq!(rig.devices.live_tracks(), 0);
    assert_eq!(rig.transports.open_count(), 0);
    assert!(!publisher.is_published(&room).await);
}

#[tokio::test]
async fn test_unpublish_resets_even_when_gateway_fails() {
    let rig = TestRig::new();
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");
    publisher.publish(&room).await.unwrap();
    rig.gateway.unreachable_unpublish();

    let err = publisher.unpublish(&room).await.unwrap_err();
    assert!(matches!(err, ClassroomError::Gateway(_)));
    assert!(publisher.session().await.is_none());
    assert_eq!(rig.devices.live_tracks(), 0);

    // Publishing again starts from scratch
    publisher.publish(&room).await.unwrap();
    assert_eq!(rig.gateway.publish_count(), 2);
}

#[tokio::test]
async fn test_unpublish_unknown_room_is_noop() {
    let rig = TestRig::new();
    let publisher = rig.media_publisher();
    publisher.publish(&RoomId::from("room-a")).await.unwrap();

    publisher.unpublish(&RoomId::from("room-b")).await.unwrap();
    assert!(publisher.is_published(&RoomId::from("room-a")).await);
    assert!(rig.gateway.unpublished().is_empty());
}

#[tokio::test]
async fn test_publish_offer_reaches_gateway() {
    let rig = TestRig::new();
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");
    publisher.publish(&room).await.unwrap();

    match &rig.gateway.calls()[0] {
        GatewayCall::Publish { room: r, offer, .. } => {
            assert_eq!(r, &room);
            assert!(offer.sdp.contains("m=video"));
            assert!(offer.sdp.contains("m=audio"));
            assert_eq!(offer.candidate_count(), 1);
        }
        other => panic!("expected publish, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_remote_session_end_tears_down() {
    let rig = TestRig::new();
    rig.gateway.fail_keep_alive_after(1, "session timed out");
    let publisher = rig.media_publisher();
    let room = RoomId::from("physics-101");
    let mut status = publisher.watch_status();
    publisher.publish(&room).await.unwrap();
    assert!(status.borrow_and_update().is_some());

    tokio::time::timeout(Duration::from_secs(120), status.wait_for(|s| s.is_none()))
        .await
        .expect("publication should end")
        .unwrap();

    assert!(!publisher.is_published(&room).await);
    assert_eq!(rig.devices.live_tracks(), 0);
    assert_eq!(rig.transports.open_count(), 0);
    // The gateway already dropped the session, so nobody tells it again
    assert!(rig.gateway.unpublished().is_empty());
}
