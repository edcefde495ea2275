use anyhow::Context;
use classroom_media::recording::RecordingOptions;
use classroom_media::testing::TestRig;
use classroom_media::{
    subscribe_with_retry, ClassroomConfig, ClassroomError, FeedId, PeerSessionInfo, RecordingSummary, RetryPolicy,
    RoomId,
};
use serde::Serialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SimReport {
    room: RoomId,
    camera: PeerSessionInfo,
    screen: PeerSessionInfo,
    subscription: PeerSessionInfo,
    remote_tracks: usize,
    recording: Option<RecordingSummary>,
    upload_attempts: usize,
    gateway_calls: usize,
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Load the configuration and apply command-line overrides on top of it.
/// The result is validated again since an override can break it.
fn sim_config(args: &[String]) -> anyhow::Result<ClassroomConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => ClassroomConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path))?,
        None => ClassroomConfig::default(),
    };
    config.recording.chunk_duration_secs = match flag_value(args, "--chunk-secs") {
        Some(secs) => secs.parse().context("--chunk-secs must be a whole number")?,
        None => 1,
    };
    config
        .validate()
        .map_err(ClassroomError::Config)
        .context("invalid configuration after overrides")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    classroom_media::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: classroom-sim [--config <path>] [--room <id>] [--chunks <n>] [--chunk-secs <s>]");
        return Ok(());
    }

    let config = sim_config(&args)?;
    let chunks: u32 = match flag_value(&args, "--chunks") {
        Some(n) => n.parse().context("--chunks must be a whole number")?,
        None => 3,
    };
    let room = RoomId::from(flag_value(&args, "--room").unwrap_or("sim-room"));

    let rig = TestRig {
        config,
        ..TestRig::new()
    };

    let camera_publisher = rig.media_publisher();
    let screen_publisher = rig.screen_publisher();
    let camera = camera_publisher.publish(&room).await?;
    let screen = screen_publisher.publish(&room).await?;

    let subscriber = rig.subscriber();
    let subscription = subscribe_with_retry(
        &subscriber,
        &room,
        FeedId(1),
        RetryPolicy::from_config(&rig.config.gateway),
    )
    .await?;
    let remote = subscription.wait_for_stream(Duration::from_secs(1)).await?;

    let recorder = rig.recorder();
    recorder.start(&room, RecordingOptions::default()).await?;
    let recording_time = rig.config.recording.chunk_duration() * chunks + Duration::from_millis(100);
    tokio::time::sleep(recording_time).await;
    let recording = recorder.stop().await?;

    subscription.leave().await?;
    screen_publisher.unpublish(&room).await?;
    camera_publisher.unpublish(&room).await?;

    let report = SimReport {
        room,
        camera,
        screen,
        subscription: subscription.info(),
        remote_tracks: remote.tracks().len(),
        recording,
        upload_attempts: rig.chunks.uploads().len(),
        gateway_calls: rig.gateway.calls().len(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
