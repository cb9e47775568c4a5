//! Frame re-encoder: the seek/draw/capture/record loop.
//!
//! A source is decoded frame by frame at the preset's frame rate, drawn
//! onto a scaled canvas and pushed into a recorder built over a capture
//! stream of that canvas. Audio, when requested, is joined onto the stream
//! before the recorder exists. A recorder that fails mid-stream gets one
//! recovery attempt with a minimal-constraint recorder at a lower frame
//! rate and a coarser frame-skip cadence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use fp_core::{
    BitrateCeiling, ContainerFamily, Error, ImageBlob, JobId, MimeType, OutputFile, PresetProfile,
    QualityTier, SourceMedia,
};
use fp_media::{Canvas, CaptureStream, MediaRuntime, RecorderOptions, Smoothing};
use tokio_util::sync::CancellationToken;

use crate::audio::{attach_audio, AudioAttachment, AudioTimeouts};
use crate::orchestrator::CompressorSettings;
use crate::progress::ProgressTracker;
use crate::resolver::{resolve_recorder, try_attempts, Attempt, ResolveStrategy};
use crate::result::{compression_ratio, CompressionResult, EncodingSummary, Method};
use crate::session::EncodingSession;
use crate::thumbnail::{extract_thumbnail, ThumbnailOptions};

/// What one orchestrator pass asks the re-encoder to do.
#[derive(Debug, Clone)]
pub struct EncodePlan {
    pub preset: PresetProfile,
    pub preferred_mime: String,
    pub method: Method,
    /// Offer bracket-clamped bitrates to the resolver.
    pub bitrate_hints: bool,
    pub tier: QualityTier,
}

/// Output dimensions for a source scaled by `scale`; never below 2x2.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let scale_one = |v: u32| ((v as f64 * scale).floor() as u32).max(2);
    (scale_one(width), scale_one(height))
}

/// Frames to encode for `duration_secs` at `frame_rate`.
pub fn total_frames(duration_secs: f64, frame_rate: u32) -> u64 {
    (duration_secs * frame_rate as f64).floor().max(0.0) as u64
}

/// File extension for a negotiated recorder MIME type.
pub fn extension_for(mime_type: &str) -> String {
    let mime = MimeType::parse(mime_type);
    match mime.family() {
        Some(family) => family.extension().to_string(),
        None => mime
            .essence
            .rsplit('/')
            .next()
            .map(|s| s.trim_start_matches("x-").to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "bin".to_string()),
    }
}

/// Loop failures, split by whether recovery applies.
enum LoopError {
    /// The recorder rejected a frame or failed to finalize.
    Recorder(Error),
    /// Anything else: decode, seek, cancellation.
    Other(Error),
}

impl From<LoopError> for Error {
    fn from(e: LoopError) -> Self {
        match e {
            LoopError::Recorder(e) | LoopError::Other(e) => e,
        }
    }
}

/// Result of the encode phase, before the session is released.
struct Encoded {
    data: Bytes,
    mime_type: String,
    width: u32,
    height: u32,
    frame_rate: u32,
    frame_skip_interval: u32,
    ceiling: BitrateCeiling,
    strategy: ResolveStrategy,
    recovered: bool,
    frames: u64,
    audio_preserved: bool,
}

/// Runs one encoding pass.
pub struct Reencoder<'a> {
    runtime: &'a dyn MediaRuntime,
    settings: &'a CompressorSettings,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
    job_id: JobId,
}

impl<'a> Reencoder<'a> {
    pub fn new(runtime: &'a dyn MediaRuntime, settings: &'a CompressorSettings) -> Self {
        Self {
            runtime,
            settings,
            progress: Arc::new(ProgressTracker::default()),
            cancel: CancellationToken::new(),
            job_id: JobId::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    fn check_cancelled(&self) -> fp_core::Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Re-encode `source` according to `plan`.
    ///
    /// # Errors
    ///
    /// Fails when the source cannot be loaded, no recorder can be
    /// constructed, recovery after a mid-stream recorder failure fails
    /// ([`Error::CompressionFailed`]), or the job is cancelled. A failed
    /// thumbnail never fails the pass.
    pub async fn run(
        &self,
        source: &SourceMedia,
        plan: &EncodePlan,
        preserve_audio: bool,
    ) -> fp_core::Result<CompressionResult> {
        let started = Instant::now();
        self.check_cancelled()?;
        let config = &self.settings.compression;

        let element = tokio::time::timeout(config.metadata_timeout(), self.runtime.load(source))
            .await
            .map_err(|_| Error::timeout("source metadata", config.metadata_timeout()))??;
        let metadata = element.metadata().clone();
        let (width, height) =
            scaled_dimensions(metadata.width, metadata.height, plan.preset.scale_factor);

        let mut canvas = Canvas::new(width, height);
        canvas.set_smoothing(Smoothing::High);
        let stream = CaptureStream::capture(&canvas, plan.preset.frame_rate);
        let mut session = EncodingSession::new(element, canvas, stream);

        let outcome = if metadata.width == 0
            || metadata.height == 0
            || !(metadata.duration_secs.is_finite() && metadata.duration_secs > 0.0)
        {
            Err(Error::Media(format!(
                "{} has no decodable video ({}x{}, {:.2}s)",
                source.name(),
                metadata.width,
                metadata.height,
                metadata.duration_secs
            )))
        } else {
            tracing::info!(
                job = %self.job_id.short(),
                method = %plan.method,
                mime = %plan.preferred_mime,
                width,
                height,
                fps = plan.preset.frame_rate,
                skip = plan.preset.frame_skip_interval,
                "re-encoding"
            );
            self.encode(&mut session, source, plan, preserve_audio, metadata.duration_secs)
                .await
        };
        session.release().await;
        let encoded = outcome?;

        let thumbnail = self.thumbnail(source).await;

        let output = OutputFile {
            name: format!(
                "{}_{}_{}.{}",
                source.stem(),
                plan.tier,
                plan.method,
                extension_for(&encoded.mime_type)
            ),
            mime_type: encoded.mime_type.clone(),
            data: encoded.data,
        };
        let original_size_mb = source.size_mb();
        let output_size_mb = output.size_mb();
        let format_preserved = source
            .family()
            .is_some_and(|f| ContainerFamily::from_mime(&encoded.mime_type) == Some(f));

        tracing::info!(
            job = %self.job_id.short(),
            output = %output.name,
            original_mb = format!("{original_size_mb:.2}"),
            output_mb = format!("{output_size_mb:.2}"),
            recovered = encoded.recovered,
            "re-encode complete"
        );

        Ok(CompressionResult {
            job_id: self.job_id,
            original_size_mb,
            output_size_mb,
            compression_ratio: compression_ratio(original_size_mb, output_size_mb),
            elapsed_ms: started.elapsed().as_millis() as u64,
            tier: plan.tier,
            quality_score: plan.preset.quality_score,
            audio_preserved: encoded.audio_preserved,
            format_preserved,
            thumbnail,
            summary: EncodingSummary {
                method: plan.method,
                mime_type: encoded.mime_type,
                width: encoded.width,
                height: encoded.height,
                frame_rate: encoded.frame_rate,
                frame_skip_interval: encoded.frame_skip_interval,
                video_bitrate_bps: encoded.ceiling.video_bitrate_bps,
                audio_bitrate_bps: encoded.ceiling.audio_bitrate_bps,
                bitrate_hints: plan.bitrate_hints,
                strategy: encoded.strategy.to_string(),
                recovered: encoded.recovered,
                frames_encoded: encoded.frames,
            },
            output,
        })
    }

    /// Return `source` unchanged. The thumbnail is still produced.
    ///
    /// The source's own audio travels with it: `audio_preserved` is set when
    /// audio was requested and the source has at least one audio stream.
    pub async fn passthrough(
        &self,
        source: &SourceMedia,
        tier: QualityTier,
        preserve_audio: bool,
    ) -> fp_core::Result<CompressionResult> {
        let started = Instant::now();
        let data = source.read_bytes().await?;
        let audio_preserved = preserve_audio && self.source_has_audio(source).await;
        let thumbnail = self.thumbnail(source).await;

        let size_mb = source.size_mb();
        Ok(CompressionResult {
            job_id: self.job_id,
            output: OutputFile {
                name: source.name().to_string(),
                mime_type: source.mime_type().to_string(),
                data,
            },
            original_size_mb: size_mb,
            output_size_mb: size_mb,
            compression_ratio: 1.0,
            elapsed_ms: started.elapsed().as_millis() as u64,
            tier,
            quality_score: 10,
            audio_preserved,
            format_preserved: true,
            thumbnail,
            summary: EncodingSummary::passthrough(source.mime_type()),
        })
    }

    /// Whether `source` has an audio stream. Unreadable metadata counts as
    /// silent.
    async fn source_has_audio(&self, source: &SourceMedia) -> bool {
        let limit = self.settings.compression.metadata_timeout();
        match tokio::time::timeout(limit, self.runtime.load(source)).await {
            Ok(Ok(mut element)) => {
                let has_audio = element.metadata().has_audio();
                element.close().await;
                has_audio
            }
            Ok(Err(e)) => {
                tracing::warn!(job = %self.job_id.short(), "cannot read audio streams: {e}");
                false
            }
            Err(_) => {
                tracing::warn!(
                    job = %self.job_id.short(),
                    "audio stream lookup timed out after {limit:?}"
                );
                false
            }
        }
    }

    async fn thumbnail(&self, source: &SourceMedia) -> Option<ImageBlob> {
        let options = ThumbnailOptions::from(&self.settings.compression);
        match extract_thumbnail(self.runtime, source, &options).await {
            Ok(thumb) => Some(thumb),
            Err(e) => {
                tracing::warn!(job = %self.job_id.short(), "{e}; continuing without thumbnail");
                None
            }
        }
    }

    async fn encode(
        &self,
        session: &mut EncodingSession,
        source: &SourceMedia,
        plan: &EncodePlan,
        preserve_audio: bool,
        duration_secs: f64,
    ) -> fp_core::Result<Encoded> {
        let config = &self.settings.compression;

        // The recorder must see the audio tracks at construction time.
        if preserve_audio {
            let AudioAttachment { graph, .. } = attach_audio(
                self.runtime,
                &mut session.stream,
                source,
                AudioTimeouts::from(config),
            )
            .await;
            session.audio_graph = graph;
        }
        self.check_cancelled()?;

        let ceiling = self.settings.ladder.clamp(&plan.preset, source.size_mb());
        let (video_hint, audio_hint) = if plan.bitrate_hints {
            (
                Some(ceiling.video_bitrate_bps).filter(|v| *v > 0),
                Some(ceiling.audio_bitrate_bps).filter(|v| *v > 0),
            )
        } else {
            (None, None)
        };
        let resolved = resolve_recorder(
            self.runtime,
            &session.stream,
            &plan.preferred_mime,
            video_hint,
            audio_hint,
        )?;
        let mut strategy = resolved.strategy;
        session.recorder = Some(resolved.recorder);

        let mut frame_rate = plan.preset.frame_rate;
        let mut skip = plan.preset.frame_skip_interval.max(1);
        let mut recovered = false;

        match self.drive(session, skip, frame_rate, duration_secs).await {
            Ok(()) => {}
            Err(LoopError::Other(e)) => return Err(e),
            Err(LoopError::Recorder(original)) => {
                let failed_mime = session
                    .recorder
                    .as_ref()
                    .map(|r| r.mime_type().to_string())
                    .unwrap_or_else(|| plan.preferred_mime.clone());
                tracing::warn!(
                    job = %self.job_id.short(),
                    mime = %failed_mime,
                    frame = session.frame_count,
                    "recorder failed mid-stream: {original}; retrying with a minimal recorder"
                );

                frame_rate = config
                    .recovery_frame_rate
                    .min(plan.preset.frame_rate)
                    .max(1);
                skip = (skip * 2).max(2);
                strategy = match self
                    .recover_and_drive(session, &failed_mime, skip, frame_rate, duration_secs)
                    .await
                {
                    Ok(strategy) => strategy,
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => return Err(Error::compression_failed(e.to_string(), original)),
                };
                recovered = true;
            }
        }

        // Audio counts only if the recorder that produced the output wrote it.
        let (mime_type, audio_tracks) = session
            .recorder
            .as_ref()
            .map(|r| (r.mime_type().to_string(), r.audio_tracks()))
            .unwrap_or_default();
        let audio_preserved = preserve_audio && audio_tracks > 0;
        if preserve_audio && !audio_preserved {
            tracing::info!(job = %self.job_id.short(), mime = %mime_type, "output has no audio");
        }
        Ok(Encoded {
            data: session.take_output(),
            mime_type,
            width: session.canvas.width(),
            height: session.canvas.height(),
            frame_rate,
            frame_skip_interval: skip,
            ceiling,
            strategy,
            recovered,
            frames: session.frame_count,
            audio_preserved,
        })
    }

    /// Replace the failed recorder with a minimal-constraint one over a
    /// stream of the same canvas and tracks at `frame_rate`, then rerun the
    /// loop from the first frame.
    async fn recover_and_drive(
        &self,
        session: &mut EncodingSession,
        failed_mime: &str,
        skip: u32,
        frame_rate: u32,
        duration_secs: f64,
    ) -> fp_core::Result<ResolveStrategy> {
        if let Some(mut failed) = session.recorder.take() {
            failed.abort().await;
        }
        session.chunks.clear();
        session.frame_count = 0;

        let family = ContainerFamily::from_mime(failed_mime).unwrap_or(ContainerFamily::WebM);
        let plan = vec![
            Attempt {
                strategy: ResolveStrategy::GenericContainer,
                options: RecorderOptions::mime(family.mime_type()),
            },
            Attempt {
                strategy: ResolveStrategy::GenericContainer,
                options: RecorderOptions::mime(family.other().mime_type()),
            },
            Attempt {
                strategy: ResolveStrategy::PlatformDefault,
                options: RecorderOptions::platform_default(),
            },
        ];
        let stream = session.stream.with_frame_rate(frame_rate);
        let resolved = try_attempts(self.runtime, &stream, plan)
            .map_err(|e| Error::Recorder(format!("recovery recorder unavailable: {e}")))?;
        session.stream = stream;
        session.replace_recorder(resolved.recorder).await;

        self.drive(session, skip, frame_rate, duration_secs).await?;
        Ok(resolved.strategy)
    }

    /// Run the frame loop from frame 0 with the session's current recorder.
    async fn drive(
        &self,
        session: &mut EncodingSession,
        skip: u32,
        frame_rate: u32,
        duration_secs: f64,
    ) -> Result<(), LoopError> {
        let seek_timeout = self.settings.compression.seek_timeout();
        let total = total_frames(duration_secs, frame_rate);
        let skip = u64::from(skip.max(1));

        let Some(recorder) = session.recorder.as_mut() else {
            return Err(LoopError::Other(Error::Internal(
                "frame loop started without a recorder".to_string(),
            )));
        };

        bounded(seek_timeout, "seek to start", session.element.seek(0.0))
            .await
            .map_err(LoopError::Other)?;
        recorder.start().await.map_err(LoopError::Recorder)?;
        session.element.set_muted(true);
        session.element.set_volume(0.0);
        session.element.play().await.map_err(LoopError::Other)?;

        session.frame_count = 0;
        while session.frame_count < total && !session.element.ended() {
            if self.cancel.is_cancelled() {
                return Err(LoopError::Other(Error::Cancelled));
            }

            if session.frame_count % skip == 0 {
                let frame = bounded(seek_timeout, "frame decode", session.element.decode_frame())
                    .await
                    .map_err(LoopError::Other)?;
                session.canvas.draw_frame(&frame);
            }
            recorder
                .write_frame(session.canvas.surface())
                .await
                .map_err(LoopError::Recorder)?;

            session.frame_count += 1;
            let at = session.frame_count as f64 / frame_rate as f64;
            bounded(seek_timeout, "seek", session.element.seek(at))
                .await
                .map_err(LoopError::Other)?;

            self.progress.report(
                session.frame_count as f64 / total as f64 * 100.0,
                "encoding",
            );
            tokio::task::yield_now().await;
        }

        let chunks = recorder.stop().await.map_err(LoopError::Recorder)?;
        if chunks.iter().all(Bytes::is_empty) {
            return Err(LoopError::Recorder(Error::Recorder(
                "recorder produced no output".to_string(),
            )));
        }
        tracing::debug!(
            frames = session.frame_count,
            total,
            chunks = chunks.len(),
            "frame loop finished"
        );
        session.chunks = chunks;
        Ok(())
    }
}

async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl std::future::Future<Output = fp_core::Result<T>>,
) -> fp_core::Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::timeout(what, limit))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressSender;
    use assert_matches::assert_matches;
    use fp_media::sim::{ElementFault, Fault, SimEvent, SimRuntime, SimSource};
    use parking_lot::Mutex;
    use tokio_test::assert_ok;

    const WEBM_RICH: &str = "video/webm;codecs=vp9,opus";

    fn source(name: &str, mime: &str) -> SourceMedia {
        SourceMedia::from_bytes(name, mime, Bytes::from(vec![0u8; 4096]))
    }

    fn plan(preset: PresetProfile, mime: &str) -> EncodePlan {
        EncodePlan {
            preset,
            preferred_mime: mime.to_string(),
            method: Method::Native,
            bitrate_hints: true,
            tier: QualityTier::Balanced,
        }
    }

    fn balanced_native() -> PresetProfile {
        fp_core::PresetTable::default()
            .lookup(QualityTier::Balanced, fp_core::TargetContainer::Native)
    }

    #[test]
    fn dimensions_floor_and_minimum() {
        assert_eq!(scaled_dimensions(1920, 1080, 0.75), (1440, 810));
        assert_eq!(scaled_dimensions(333, 101, 0.5), (166, 50));
        assert_eq!(scaled_dimensions(3, 2, 0.1), (2, 2));
        assert_eq!(total_frames(4.0, 25), 100);
        assert_eq!(total_frames(1.99, 10), 19);
    }

    #[test]
    fn extensions() {
        assert_eq!(extension_for("video/mp4;codecs=avc1.42E01E"), "mp4");
        assert_eq!(extension_for("video/webm"), "webm");
        assert_eq!(extension_for("video/x-matroska"), "matroska");
    }

    #[tokio::test]
    async fn encodes_every_frame_and_names_output() {
        let rt = SimRuntime::new();
        let settings = CompressorSettings::default();
        let src = source("holiday.clip.webm", "video/webm");
        let result = Reencoder::new(&rt, &settings)
            .run(&src, &plan(balanced_native(), WEBM_RICH), true)
            .await
            .unwrap();

        assert_eq!(result.output.name, "holiday.clip_balanced_native.webm");
        assert_eq!(result.output.mime_type, WEBM_RICH);
        assert!(result.format_preserved);
        assert!(result.audio_preserved);
        assert!(result.thumbnail.is_some());
        assert_eq!(result.quality_score, 8);
        // 4s at 25 fps, 320x180 scaled by 0.75.
        assert_eq!(result.summary.frames_encoded, 100);
        assert_eq!((result.summary.width, result.summary.height), (240, 135));
        assert_eq!(result.output_size_mb, fp_core::bytes_to_mb(result.output.data.len() as u64));
        assert_eq!(result.compression_ratio, result.original_size_mb / result.output_size_mb);
        assert!(!result.summary.recovered);
        assert_eq!(rt.live_elements(), 0);
        assert_eq!(rt.live_audio_graphs(), 0);
    }

    #[tokio::test]
    async fn audio_joins_before_recorder_and_playback_is_silent() {
        let rt = SimRuntime::new();
        let settings = CompressorSettings::default();
        Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), true)
            .await
            .unwrap();

        let events = rt.events();
        let connected = events
            .iter()
            .position(|e| matches!(e, SimEvent::AudioConnected { tracks: 1 }))
            .unwrap();
        let requested = events
            .iter()
            .position(|e| matches!(e, SimEvent::RecorderRequested { .. }))
            .unwrap();
        assert!(connected < requested);
        assert!(events.contains(&SimEvent::RecorderRequested {
            options: RecorderOptions::mime(WEBM_RICH),
            accepted: true,
            audio_tracks: 1,
        }));
        assert!(events.contains(&SimEvent::Played {
            muted: true,
            volume: 0.0
        }));
    }

    #[tokio::test]
    async fn audio_not_requested_is_not_preserved() {
        let rt = SimRuntime::new();
        let settings = CompressorSettings::default();
        let result = Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), false)
            .await
            .unwrap();
        assert!(!result.audio_preserved);
        assert!(!rt
            .events()
            .iter()
            .any(|e| matches!(e, SimEvent::AudioConnected { .. })));
    }

    #[tokio::test]
    async fn frame_skip_holds_canvas() {
        let rt = SimRuntime::new();
        let settings = CompressorSettings::default();
        let mut every = balanced_native();
        every.frame_skip_interval = 1;
        let mut third = every;
        third.frame_skip_interval = 3;

        let src = source("a.webm", "video/webm");
        let full = Reencoder::new(&rt, &settings)
            .run(&src, &plan(every, WEBM_RICH), false)
            .await
            .unwrap();
        let skipped = Reencoder::new(&rt, &settings)
            .run(&src, &plan(third, WEBM_RICH), false)
            .await
            .unwrap();
        assert_eq!(full.summary.frames_encoded, skipped.summary.frames_encoded);
        assert!(skipped.output_size_mb < full.output_size_mb);
    }

    #[tokio::test]
    async fn bracket_ceiling_is_offered_only_with_hints() {
        let rt = SimRuntime::builder()
            .recorder_policy(|o| {
                o.video_bitrate_bps
                    .is_none()
                    .then(|| "NotSupportedError: needs a bitrate".to_string())
            })
            .build();
        let settings = CompressorSettings::default();
        let result = Reencoder::new(&rt, &settings)
            .run(&source("a.mp4", "video/mp4"), &plan(balanced_native(), "video/mp4"), false)
            .await
            .unwrap();
        // 4 KiB source: lowest bracket, preset 2.5M/96k are within it.
        assert_eq!(result.summary.strategy, "preferred_video_bitrate");
        assert_eq!(result.summary.video_bitrate_bps, 2_500_000);
        assert_eq!(result.summary.audio_bitrate_bps, 96_000);

        let mut no_hints = plan(balanced_native(), "video/mp4");
        no_hints.bitrate_hints = false;
        let err = Reencoder::new(&rt, &settings)
            .run(&source("a.mp4", "video/mp4"), &no_hints, false)
            .await
            .unwrap_err();
        assert_matches!(err, Error::RecorderUnavailable { .. });
        assert_eq!(rt.live_elements(), 0);
    }

    #[tokio::test]
    async fn mid_stream_failure_recovers() {
        let rt = SimRuntime::builder().fail_writes(10, 1).build();
        let settings = CompressorSettings::default();
        let result = Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), true)
            .await
            .unwrap();

        assert!(result.summary.recovered);
        assert_eq!(result.summary.frame_rate, 15);
        assert_eq!(result.summary.frame_skip_interval, 2);
        assert_eq!(result.summary.frames_encoded, 60);
        assert_eq!(result.output.mime_type, "video/webm");
        assert!(result.audio_preserved);
        assert_eq!(
            rt.started_recorders(),
            vec![WEBM_RICH.to_string(), "video/webm".to_string()]
        );
        assert!(rt.events().contains(&SimEvent::RecorderAborted {
            mime: WEBM_RICH.to_string()
        }));
        // The recovery recorder keeps the audio tracks.
        let last_request = rt.events().into_iter().rev().find_map(|e| match e {
            SimEvent::RecorderRequested { audio_tracks, .. } => Some(audio_tracks),
            _ => None,
        });
        assert_eq!(last_request, Some(1));
    }

    #[tokio::test]
    async fn failed_recovery_is_compression_failed() {
        let rt = SimRuntime::builder().fail_writes(5, 2).build();
        let settings = CompressorSettings::default();
        let err = Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), true)
            .await
            .unwrap_err();

        assert_matches!(
            err,
            Error::CompressionFailed { ref source, .. }
                if source.to_string().contains("simulated encoder failure")
        );
        assert_eq!(rt.live_elements(), 0);
        assert_eq!(rt.live_audio_graphs(), 0);
    }

    #[tokio::test]
    async fn decode_errors_do_not_trigger_recovery() {
        let rt = SimRuntime::builder()
            .fault_element(
                0,
                ElementFault {
                    decode: Some(Fault::Fail("bitstream error".into())),
                    ..ElementFault::default()
                },
            )
            .build();
        let settings = CompressorSettings::default();
        let err = Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), false)
            .await
            .unwrap_err();
        assert_matches!(err, Error::Media(_));
        assert_eq!(rt.started_recorders().len(), 1);
        assert_eq!(rt.live_elements(), 0);
    }

    #[tokio::test]
    async fn thumbnail_failure_is_not_fatal() {
        // Loads: 0 = encoder element, 1 = audio element, 2 = thumbnail.
        let rt = SimRuntime::builder()
            .fault_element(
                2,
                ElementFault {
                    load: Some(Fault::Fail("cannot open".into())),
                    ..ElementFault::default()
                },
            )
            .build();
        let settings = CompressorSettings::default();
        let result = Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), true)
            .await
            .unwrap();
        assert!(result.thumbnail.is_none());
        assert!(result.output.size_bytes() > 0);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let rt = SimRuntime::new();
        let settings = CompressorSettings::default();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sender = ProgressSender::new(move |pct, _| {
            sink.lock().push(pct);
            if pct >= 30.0 {
                trigger.cancel();
            }
        });

        let err = Reencoder::new(&rt, &settings)
            .with_progress(Arc::new(ProgressTracker::new(Arc::new(sender))))
            .with_cancellation(token)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), true)
            .await
            .unwrap_err();

        assert_matches!(err, Error::Cancelled);
        assert!(seen.lock().iter().all(|p| *p <= 31.0));
        assert_eq!(rt.live_elements(), 0);
        assert_eq!(rt.live_audio_graphs(), 0);
    }

    #[tokio::test]
    async fn passthrough_returns_source_bytes() {
        let rt = SimRuntime::new();
        let settings = CompressorSettings::default();
        let src = source("keep.mp4", "video/mp4");
        let result = Reencoder::new(&rt, &settings)
            .passthrough(&src, QualityTier::High, false)
            .await
            .unwrap();
        assert_eq!(result.output.data, src.read_bytes().await.unwrap());
        assert_eq!(result.output.name, "keep.mp4");
        assert_eq!(result.compression_ratio, 1.0);
        assert_eq!(result.quality_score, 10);
        assert_eq!(result.summary.method, Method::Original);
        assert!(!result.audio_preserved);
        assert!(result.thumbnail.is_some());
    }

    #[tokio::test]
    async fn passthrough_reports_audio_only_when_source_has_it() {
        let settings = CompressorSettings::default();
        let src = source("keep.mp4", "video/mp4");

        let rt = SimRuntime::new();
        let result = Reencoder::new(&rt, &settings)
            .passthrough(&src, QualityTier::Balanced, true)
            .await
            .unwrap();
        assert!(result.audio_preserved);

        let silent = SimRuntime::builder()
            .default_source(SimSource::new(4.0, 320, 180))
            .build();
        let result = Reencoder::new(&silent, &settings)
            .passthrough(&src, QualityTier::Balanced, true)
            .await
            .unwrap();
        assert!(!result.audio_preserved);
        assert!(result.thumbnail.is_some());
        assert_eq!(silent.live_elements(), 0);
    }

    #[test]
    fn passthrough_with_unreadable_metadata_claims_no_audio() {
        let rt = SimRuntime::builder()
            .fault_element(
                0,
                ElementFault {
                    load: Some(Fault::Fail("moov atom not found".into())),
                    ..ElementFault::default()
                },
            )
            .build();
        let settings = CompressorSettings::default();
        let result = assert_ok!(tokio_test::block_on(
            Reencoder::new(&rt, &settings).passthrough(
                &source("keep.mp4", "video/mp4"),
                QualityTier::Balanced,
                true
            )
        ));
        assert!(!result.audio_preserved);
        assert_eq!(result.compression_ratio, 1.0);
    }

    #[tokio::test]
    async fn silent_source_is_not_reported_as_audio() {
        let rt = SimRuntime::builder()
            .default_source(SimSource::new(4.0, 320, 180))
            .build();
        let settings = CompressorSettings::default();
        let result = Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), true)
            .await
            .unwrap();
        assert!(!result.audio_preserved);
        assert!(result.output.size_bytes() > 0);
        assert_eq!(rt.live_audio_graphs(), 0);
    }

    #[tokio::test]
    async fn video_only_container_does_not_preserve_audio() {
        let rt = SimRuntime::builder().video_only("video/webm").build();
        let settings = CompressorSettings::default();
        let result = Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), true)
            .await
            .unwrap();

        // The tracks were attached, the recorder just had nowhere to put them.
        assert!(rt
            .events()
            .contains(&SimEvent::AudioConnected { tracks: 1 }));
        assert_eq!(result.output.mime_type, WEBM_RICH);
        assert!(!result.audio_preserved);
    }

    #[tokio::test]
    async fn recovery_recorder_decides_audio() {
        let rt = SimRuntime::builder()
            .fail_writes(10, 1)
            .video_only("video/mp4")
            .recorder_policy(|o| {
                (o.mime_type.as_deref() == Some("video/webm"))
                    .then(|| "NotSupportedError: generic webm".to_string())
            })
            .build();
        let settings = CompressorSettings::default();
        let result = Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(balanced_native(), WEBM_RICH), true)
            .await
            .unwrap();

        assert!(result.summary.recovered);
        assert_eq!(result.output.mime_type, "video/mp4");
        assert!(!result.audio_preserved);
    }

    #[tokio::test]
    async fn recovery_never_raises_frame_rate() {
        let rt = SimRuntime::builder().fail_writes(10, 1).build();
        let settings = CompressorSettings::default();
        let mut slow = balanced_native();
        slow.frame_rate = 10;
        let result = Reencoder::new(&rt, &settings)
            .run(&source("a.webm", "video/webm"), &plan(slow, WEBM_RICH), false)
            .await
            .unwrap();

        assert!(result.summary.recovered);
        assert_eq!(result.summary.frame_rate, 10);
        assert_eq!(result.summary.frames_encoded, 40);
    }
}
