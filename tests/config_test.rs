//! Configuration loading and its effect on the engine.

mod common;

use assert_matches::assert_matches;
use common::Fixture;
use fp_compress::{CompressionRequest, Compressor, CompressorSettings};
use fp_core::config::Config;
use fp_core::{Error, QualityTier};
use fp_media::sim::SimRuntime;
use std::sync::Arc;

#[test]
fn empty_file_yields_defaults() {
    let config = Config::from_json("{}").unwrap();
    assert_eq!(config.compression.default_tier, QualityTier::Balanced);
    assert_eq!(config.bitrate_brackets.brackets().len(), 4);
    assert!(config.validate().is_empty());
}

#[test]
fn partial_sections_keep_other_defaults() {
    let config = Config::from_json(
        r#"{
            "compression": { "default_tier": "fast", "thumbnail_quality": 80 },
            "storage": { "enabled": true, "signing_secret": "s3cret" }
        }"#,
    )
    .unwrap();

    assert_eq!(config.compression.default_tier, QualityTier::Fast);
    assert_eq!(config.compression.thumbnail_quality, 80);
    assert_eq!(config.compression.thumbnail_width, 1280);
    assert!(config.storage.enabled);
    assert_eq!(config.storage.url_ttl_secs, 3600);
    assert!(config.validate().is_empty());
}

#[test]
fn questionable_values_produce_warnings() {
    let config = Config::from_json(
        r#"{
            "compression": { "thumbnail_quality": 0, "seek_timeout_secs": 0 },
            "storage": { "enabled": true }
        }"#,
    )
    .unwrap();

    let warnings = config.validate();
    assert!(warnings.iter().any(|w| w.contains("thumbnail_quality")));
    assert!(warnings.iter().any(|w| w.contains("seek_timeout_secs")));
    assert!(warnings.iter().any(|w| w.contains("signing_secret")));
}

#[test]
fn malformed_file_is_a_validation_error() {
    let fixture = Fixture::new();
    let path = fixture.dir.path().join("framepress.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert_matches!(Config::load(&path), Err(Error::Validation(_)));
    // The lenient loader falls back to defaults instead.
    let config = Config::load_or_default(Some(&path));
    assert_eq!(config.compression.default_tier, QualityTier::Balanced);
}

#[tokio::test]
async fn configured_brackets_drive_the_hint() {
    let config = Config::from_json(
        r#"{
            "bitrate_brackets": [
                { "above_mb": 0.0, "video_bitrate_bps": 500000, "audio_bitrate_bps": 48000 }
            ]
        }"#,
    )
    .unwrap();
    let fixture = Fixture::new();
    let source = fixture.source("trip.mp4", 300).await;
    let rt = SimRuntime::new();

    let compressor = Compressor::new(Arc::new(rt.clone()), CompressorSettings::from(&config));
    let result = compressor
        .compress(&source, CompressionRequest::new(20.0))
        .await
        .unwrap();

    assert_eq!(result.summary.video_bitrate_bps, 500_000);
    assert_eq!(result.summary.audio_bitrate_bps, 48_000);
}
