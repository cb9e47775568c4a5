//! End-to-end compression scenarios against the simulated runtime.

mod common;

use assert_matches::assert_matches;
use common::{compressor, recording_progress, Fixture};
use fp_compress::{resolve_recorder, CompressionRequest, Method, ResolveStrategy};
use fp_core::{Error, QualityTier};
use fp_media::sim::{SimRuntime, SimSource};
use fp_media::{Canvas, CaptureStream, RecorderState};

#[tokio::test]
async fn large_mp4_applies_top_bracket_and_tries_mp4_first() {
    let fixture = Fixture::new();
    let source = fixture.source("trip.mp4", 300).await;
    let rt = SimRuntime::new();

    let request = CompressionRequest::new(20.0)
        .with_tier(QualityTier::Balanced)
        .with_preserve_audio(true)
        .with_preserve_format(true);
    let result = compressor(&rt).compress(&source, request).await.unwrap();

    let requests = rt.recorder_requests();
    let first = requests[0].0.mime_type.as_deref().unwrap();
    assert!(first.starts_with("video/mp4"), "first attempt was {first}");

    assert_eq!(result.summary.video_bitrate_bps, 800_000);
    assert_eq!(result.summary.audio_bitrate_bps, 64_000);
    assert_eq!(result.summary.method, Method::Native);
    assert_eq!(result.original_size_mb, 300.0);
    assert!(result.output_size_mb < result.original_size_mb);
    assert_eq!(
        result.compression_ratio,
        result.original_size_mb / result.output_size_mb
    );
    assert!(result.output.name.starts_with("trip_balanced_native."));
}

#[tokio::test]
async fn large_mp4_hint_is_the_clamped_bracket() {
    let fixture = Fixture::new();
    let source = fixture.source("trip.mp4", 300).await;
    // Only bitrate-constrained requests are accepted, and never above 1 Mbps.
    let rt = SimRuntime::builder()
        .max_video_bitrate(1_000_000)
        .recorder_policy(|o| {
            o.video_bitrate_bps
                .is_none()
                .then(|| "NotSupportedError: needs a bitrate".to_string())
        })
        .build();

    let result = compressor(&rt)
        .compress(&source, CompressionRequest::new(20.0))
        .await
        .unwrap();

    let accepted: Vec<_> = rt
        .recorder_requests()
        .into_iter()
        .filter(|(_, ok)| *ok)
        .map(|(o, _)| o)
        .collect();
    assert_eq!(accepted[0].video_bitrate_bps, Some(800_000));
    assert_eq!(
        result.summary.strategy,
        ResolveStrategy::PreferredWithVideoBitrate.as_str()
    );
}

#[tokio::test]
async fn large_mp4_without_mp4_support_still_compresses() {
    let fixture = Fixture::new();
    let source = fixture.source("trip.mp4", 300).await;
    let rt = SimRuntime::builder().unsupport("video/mp4").build();

    let result = compressor(&rt)
        .compress(&source, CompressionRequest::new(20.0))
        .await
        .unwrap();

    assert_eq!(result.summary.method, Method::Best);
    assert!(result.output.mime_type.starts_with("video/webm"));
    assert!(!result.format_preserved);
}

#[tokio::test]
async fn small_source_passes_through_with_thumbnail() {
    let fixture = Fixture::new();
    let source = fixture.source("clip.webm", 5).await;
    let rt = SimRuntime::builder()
        .default_source(SimSource::new(12.0, 640, 360))
        .build();
    let (progress, log) = recording_progress();

    let result = compressor(&rt)
        .compress(&source, CompressionRequest::new(20.0).with_progress(progress))
        .await
        .unwrap();

    assert_eq!(result.compression_ratio, 1.0);
    assert_eq!(result.output_size_mb, 5.0);
    assert_eq!(result.output.data.len(), 5 * 1024 * 1024);
    assert_eq!(result.summary.method, Method::Original);
    assert!(result.format_preserved);
    assert!(rt.started_recorders().is_empty());

    let thumb = result.thumbnail.expect("thumbnail");
    assert_eq!(thumb.mime_type, "image/jpeg");
    assert_eq!(log.lock().last().copied(), Some(100.0));
}

#[tokio::test]
async fn failed_native_pass_falls_back_with_monotonic_progress() {
    let fixture = Fixture::new();
    let source = fixture.source("trip.mp4", 300).await;
    let rt = SimRuntime::builder().fail_writes(5, 2).build();
    let (progress, log) = recording_progress();

    let result = compressor(&rt)
        .compress(&source, CompressionRequest::new(20.0).with_progress(progress))
        .await
        .unwrap();

    assert_ne!(result.summary.method, Method::Native);
    let values = log.lock().clone();
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
    assert_eq!(values.last().copied(), Some(100.0));
    assert_eq!(rt.live_elements(), 0);
    assert_eq!(rt.live_audio_graphs(), 0);
}

#[tokio::test]
async fn resolver_reaches_platform_default() {
    let rt = SimRuntime::builder()
        .recorder_policy(|o| {
            o.mime_type
                .as_ref()
                .map(|m| format!("NotSupportedError: {m}"))
        })
        .build();
    let stream = CaptureStream::capture(&Canvas::new(64, 36), 24);

    let mut resolved = resolve_recorder(
        &rt,
        &stream,
        "video/mp4;codecs=avc1.640028,mp4a.40.2",
        Some(800_000),
        Some(64_000),
    )
    .unwrap();

    assert_eq!(resolved.strategy, ResolveStrategy::PlatformDefault);
    assert_eq!(resolved.options.mime_type, None);
    resolved.recorder.start().await.unwrap();
    assert_eq!(resolved.recorder.state(), RecorderState::Recording);
    resolved.recorder.abort().await;
}

#[tokio::test]
async fn invalid_target_is_rejected_before_any_work() {
    let fixture = Fixture::new();
    let source = fixture.source("trip.mp4", 1).await;
    let rt = SimRuntime::new();

    let err = compressor(&rt)
        .compress(&source, CompressionRequest::new(-1.0))
        .await
        .unwrap_err();

    assert_matches!(err, Error::Validation(_));
    assert!(rt.events().is_empty());
}

#[tokio::test]
async fn silent_source_under_target_does_not_claim_audio() {
    let fixture = Fixture::new();
    let source = fixture.source("silent.mp4", 5).await;
    let rt = SimRuntime::builder()
        .default_source(SimSource::new(8.0, 640, 360))
        .build();

    let result = compressor(&rt)
        .compress(
            &source,
            CompressionRequest::new(20.0).with_preserve_audio(true),
        )
        .await
        .unwrap();

    assert_eq!(result.summary.method, Method::Original);
    assert!(!result.audio_preserved);
    assert_eq!(rt.live_elements(), 0);
}

#[tokio::test]
async fn silent_source_reencoded_does_not_claim_audio() {
    let fixture = Fixture::new();
    let source = fixture.source("silent.mp4", 300).await;
    let rt = SimRuntime::builder()
        .default_source(SimSource::new(4.0, 320, 180))
        .build();

    let result = compressor(&rt)
        .compress(
            &source,
            CompressionRequest::new(20.0).with_preserve_audio(true),
        )
        .await
        .unwrap();

    assert_eq!(result.summary.method, Method::Native);
    assert!(!result.audio_preserved);
    assert_eq!(rt.live_audio_graphs(), 0);
}

#[tokio::test]
async fn source_with_audio_under_target_keeps_it() {
    let fixture = Fixture::new();
    let source = fixture.source("talk.mp4", 5).await;
    let rt = SimRuntime::new();

    let result = compressor(&rt)
        .compress(&source, CompressionRequest::new(20.0))
        .await
        .unwrap();

    assert_eq!(result.summary.method, Method::Original);
    assert!(result.audio_preserved);
}
