//! Feed subscription tests

use classroom_media::testing::{wait_until, GatewayCall, GatherMode, TestRig};
use classroom_media::webrtc::SdpType;
use classroom_media::{subscribe_with_retry, ClassroomError, FeedId, RetryPolicy, RoomId};
use std::time::Duration;

#[tokio::test]
async fn test_subscribe_answers_gateway_offer() {
    let rig = TestRig::new();
    let subscriber = rig.subscriber();
    let room = RoomId::from("chem-303");

    let subscription = subscriber.subscribe(&room, FeedId(42)).await.unwrap();
    assert!(subscription.is_active());
    assert_eq!(subscription.feed_id(), FeedId(42));

    let calls = rig.gateway.calls();
    assert!(matches!(calls[0], GatewayCall::Subscribe { feed: FeedId(42), .. }));
    match &calls[1] {
        GatewayCall::StartSubscribe { handle, answer, .. } => {
            assert_eq!(*handle, subscription.handle_id());
            assert_eq!(answer.sdp_type, SdpType::Answer);
        }
        other => panic!("expected start_subscribe, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_stream_available() {
    let rig = TestRig::new();
    let subscription = rig
        .subscriber()
        .subscribe(&RoomId::from("chem-303"), FeedId(42))
        .await
        .unwrap();

    let stream = subscription
        .wait_for_stream(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(stream.tracks().len(), 2);
    assert!(subscription.remote_stream().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_gathering_bounded() {
    let rig = TestRig::new();
    rig.transports.set_gathering(GatherMode::Never);
    let started = tokio::time::Instant::now();

    let subscription = rig
        .subscriber()
        .subscribe(&RoomId::from("chem-303"), FeedId(42))
        .await
        .unwrap();

    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(5));
    assert!(waited < Duration::from_secs(6));
    assert!(!subscription.info().gathering_complete);
}

#[tokio::test]
async fn test_gateway_error_is_not_retried() {
    let rig = TestRig::new();
    rig.gateway.fail_subscribe("no such feed");

    let err = rig
        .subscriber()
        .subscribe(&RoomId::from("chem-303"), FeedId(7))
        .await
        .unwrap_err();
    assert!(matches!(err, ClassroomError::Gateway(ref msg) if msg == "no such feed"));
    assert_eq!(rig.gateway.subscribe_count(), 1);
    assert!(rig.transports.transports().is_empty());
}

#[tokio::test]
async fn test_missing_offer_releases_handle() {
    let rig = TestRig::new();
    rig.gateway.subscribe_without_offer();

    let err = rig
        .subscriber()
        .subscribe(&RoomId::from("chem-303"), FeedId(7))
        .await
        .unwrap_err();
    assert!(matches!(err, ClassroomError::Negotiation(_)));
    assert_eq!(rig.gateway.unpublished().len(), 1);
}

#[tokio::test]
async fn test_start_failure_closes_transport_and_leaves() {
    let rig = TestRig::new();
    rig.gateway.fail_start_subscribe("handle expired");

    let err = rig
        .subscriber()
        .subscribe(&RoomId::from("chem-303"), FeedId(7))
        .await
        .unwrap_err();
    assert!(matches!(err, ClassroomError::Gateway(_)));
    assert_eq!(rig.transports.open_count(), 0);
    assert_eq!(rig.gateway.unpublished().len(), 1);
}

#[tokio::test]
async fn test_leave_is_idempotent() {
    let rig = TestRig::new();
    let subscription = rig
        .subscriber()
        .subscribe(&RoomId::from("chem-303"), FeedId(42))
        .await
        .unwrap();

    subscription.leave().await.unwrap();
    subscription.leave().await.unwrap();

    assert!(!subscription.is_active());
    assert_eq!(rig.gateway.unpublished().len(), 1);
    assert_eq!(rig.transports.open_count(), 0);
}

#[tokio::test]
async fn test_dropped_subscription_releases_handle() {
    let rig = TestRig::new();
    let subscription = rig
        .subscriber()
        .subscribe(&RoomId::from("chem-303"), FeedId(42))
        .await
        .unwrap();
    let handle = subscription.handle_id();
    assert_eq!(rig.transports.open_count(), 1);

    drop(subscription);
    wait_until(Duration::from_secs(1), || {
        rig.gateway.unpublished().len() == 1 && rig.transports.open_count() == 0
    })
    .await
    .unwrap();
    assert_eq!(rig.gateway.unpublished()[0].1, handle);
}

#[tokio::test]
async fn test_drop_after_leave_releases_once() {
    let rig = TestRig::new();
    let subscription = rig
        .subscriber()
        .subscribe(&RoomId::from("chem-303"), FeedId(42))
        .await
        .unwrap();

    subscription.leave().await.unwrap();
    drop(subscription);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(rig.gateway.unpublished().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_feed_ready() {
    let rig = TestRig::new();
    rig.gateway.fail_first_subscribes(2);
    let subscriber = rig.subscriber();
    let started = tokio::time::Instant::now();

    let subscription = subscribe_with_retry(
        &subscriber,
        &RoomId::from("chem-303"),
        FeedId(42),
        RetryPolicy::default(),
    )
    .await
    .unwrap();

    assert!(subscription.is_active());
    assert_eq!(rig.gateway.subscribe_count(), 3);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_at_first_success() {
    let rig = TestRig::new();
    let subscriber = rig.subscriber();

    subscribe_with_retry(
        &subscriber,
        &RoomId::from("chem-303"),
        FeedId(42),
        RetryPolicy::default(),
    )
    .await
    .unwrap();
    assert_eq!(rig.gateway.subscribe_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_with_last_error() {
    let rig = TestRig::new();
    rig.gateway.fail_first_subscribes(10);
    let subscriber = rig.subscriber();

    let err = subscribe_with_retry(
        &subscriber,
        &RoomId::from("chem-303"),
        FeedId(42),
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(500),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ClassroomError::Gateway(ref msg) if msg.contains("not ready")));
    assert_eq!(rig.gateway.subscribe_count(), 3);
}
