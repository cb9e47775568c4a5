//! Constraint resolver: find a recorder the runtime will actually build.
//!
//! Runtimes disagree about which MIME types and bitrate combinations they
//! accept, and some reject combinations they claim to support. The resolver
//! walks a fixed cascade of [`RecorderOptions`], from most to least
//! specific, and returns the first recorder the runtime constructs.

use std::fmt;

use fp_core::{ContainerFamily, Error};
use fp_media::{CaptureStream, MediaRuntime, Recorder, RecorderOptions};

/// Which cascade step produced a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// The preferred MIME type, no bitrates.
    Preferred,
    /// A codec variant from the family fallback chain.
    FamilyFallback,
    /// Bare `video/mp4` or `video/webm`.
    GenericContainer,
    /// Preferred MIME type plus the video bitrate.
    PreferredWithVideoBitrate,
    /// Preferred MIME type plus video and audio bitrates.
    PreferredWithBitrates,
    /// No constraints at all.
    PlatformDefault,
}

impl ResolveStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preferred => "preferred",
            Self::FamilyFallback => "family_fallback",
            Self::GenericContainer => "generic_container",
            Self::PreferredWithVideoBitrate => "preferred_video_bitrate",
            Self::PreferredWithBitrates => "preferred_bitrates",
            Self::PlatformDefault => "platform_default",
        }
    }
}

impl fmt::Display for ResolveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned construction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub strategy: ResolveStrategy,
    pub options: RecorderOptions,
}

/// A recorder plus how it was obtained.
pub struct ResolvedRecorder {
    pub recorder: Box<dyn Recorder>,
    pub strategy: ResolveStrategy,
    pub options: RecorderOptions,
    /// Construction attempts made, including the successful one.
    pub attempts: usize,
}

impl fmt::Debug for ResolvedRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedRecorder")
            .field("mime_type", &self.recorder.mime_type())
            .field("strategy", &self.strategy)
            .field("options", &self.options)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Build the ordered attempt list.
///
/// MIME-only attempts never repeat: a variant equal to one tried in an
/// earlier step is skipped. Bitrate steps only appear when their bitrates
/// are present.
pub fn plan_attempts(
    preferred_mime: &str,
    video_bitrate_bps: Option<u64>,
    audio_bitrate_bps: Option<u64>,
) -> Vec<Attempt> {
    let mut attempts = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    let mut push_mime = |attempts: &mut Vec<Attempt>, strategy, mime: &str| {
        let key = mime.to_ascii_lowercase();
        if seen.contains(&key) {
            return;
        }
        seen.push(key);
        attempts.push(Attempt {
            strategy,
            options: RecorderOptions::mime(mime),
        });
    };

    push_mime(&mut attempts, ResolveStrategy::Preferred, preferred_mime);

    let family = ContainerFamily::from_mime(preferred_mime).unwrap_or(ContainerFamily::Mp4);
    for mime in family.fallback_chain() {
        push_mime(&mut attempts, ResolveStrategy::FamilyFallback, mime);
    }

    for family in [ContainerFamily::Mp4, ContainerFamily::WebM] {
        push_mime(
            &mut attempts,
            ResolveStrategy::GenericContainer,
            family.mime_type(),
        );
    }

    if let Some(video) = video_bitrate_bps {
        attempts.push(Attempt {
            strategy: ResolveStrategy::PreferredWithVideoBitrate,
            options: RecorderOptions::mime(preferred_mime).with_video_bitrate(video),
        });
        if let Some(audio) = audio_bitrate_bps {
            attempts.push(Attempt {
                strategy: ResolveStrategy::PreferredWithBitrates,
                options: RecorderOptions::mime(preferred_mime)
                    .with_video_bitrate(video)
                    .with_audio_bitrate(audio),
            });
        }
    }

    attempts.push(Attempt {
        strategy: ResolveStrategy::PlatformDefault,
        options: RecorderOptions::platform_default(),
    });

    attempts
}

/// Return the first recorder the runtime constructs over `stream`.
///
/// # Errors
///
/// [`Error::RecorderUnavailable`] when every attempt is rejected.
pub fn resolve_recorder(
    runtime: &dyn MediaRuntime,
    stream: &CaptureStream,
    preferred_mime: &str,
    video_bitrate_bps: Option<u64>,
    audio_bitrate_bps: Option<u64>,
) -> fp_core::Result<ResolvedRecorder> {
    let plan = plan_attempts(preferred_mime, video_bitrate_bps, audio_bitrate_bps);
    try_attempts(runtime, stream, plan)
}

/// Try `plan` in order; shared with the in-loop recovery path.
pub(crate) fn try_attempts(
    runtime: &dyn MediaRuntime,
    stream: &CaptureStream,
    plan: Vec<Attempt>,
) -> fp_core::Result<ResolvedRecorder> {
    let total = plan.len();
    let mut last_error = String::from("no attempts planned");

    for (i, attempt) in plan.into_iter().enumerate() {
        match runtime.create_recorder(stream, &attempt.options) {
            Ok(recorder) => {
                tracing::debug!(
                    strategy = %attempt.strategy,
                    options = %attempt.options.describe(),
                    negotiated = recorder.mime_type(),
                    attempts = i + 1,
                    "recorder resolved"
                );
                return Ok(ResolvedRecorder {
                    recorder,
                    strategy: attempt.strategy,
                    options: attempt.options,
                    attempts: i + 1,
                });
            }
            Err(e) => {
                tracing::debug!(
                    strategy = %attempt.strategy,
                    options = %attempt.options.describe(),
                    "recorder rejected: {e}"
                );
                last_error = e.to_string();
            }
        }
    }

    tracing::warn!(
        runtime = runtime.name(),
        attempts = total,
        "no recorder could be constructed: {last_error}"
    );
    Err(Error::RecorderUnavailable {
        attempts: total,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fp_media::sim::SimRuntime;
    use fp_media::Canvas;
    use tokio_test::assert_ok;

    const MP4_RICH: &str = "video/mp4;codecs=avc1.640028,mp4a.40.2";

    fn stream() -> CaptureStream {
        CaptureStream::capture(&Canvas::new(32, 18), 30)
    }

    fn mimes(plan: &[Attempt]) -> Vec<Option<String>> {
        plan.iter().map(|a| a.options.mime_type.clone()).collect()
    }

    #[test]
    fn plan_order_for_mp4() {
        let plan = plan_attempts(MP4_RICH, Some(800_000), Some(64_000));

        assert_eq!(plan[0].strategy, ResolveStrategy::Preferred);
        assert_eq!(plan[0].options, RecorderOptions::mime(MP4_RICH));

        // The preferred entry is not repeated in the fallback chain.
        let fallback: Vec<&str> = plan
            .iter()
            .filter(|a| a.strategy == ResolveStrategy::FamilyFallback)
            .filter_map(|a| a.options.mime_type.as_deref())
            .collect();
        assert_eq!(fallback[0], "video/mp4;codecs=avc1.640028");
        assert!(!fallback.contains(&MP4_RICH));
        let first_webm = fallback.iter().position(|m| m.starts_with("video/webm")).unwrap();
        assert!(fallback[..first_webm].iter().all(|m| m.starts_with("video/mp4")));

        let tail: Vec<ResolveStrategy> = plan.iter().rev().take(5).map(|a| a.strategy).collect();
        assert_eq!(
            tail,
            vec![
                ResolveStrategy::PlatformDefault,
                ResolveStrategy::PreferredWithBitrates,
                ResolveStrategy::PreferredWithVideoBitrate,
                ResolveStrategy::GenericContainer,
                ResolveStrategy::GenericContainer,
            ]
        );
        let all = mimes(&plan);
        assert_eq!(
            all[plan.len() - 5..plan.len() - 3].to_vec(),
            vec![Some("video/mp4".to_string()), Some("video/webm".to_string())]
        );
        let both = &plan[plan.len() - 2].options;
        assert_eq!(both.video_bitrate_bps, Some(800_000));
        assert_eq!(both.audio_bitrate_bps, Some(64_000));
    }

    #[test]
    fn plan_for_webm_starts_with_webm_variants() {
        let plan = plan_attempts("video/webm", None, None);
        let mimes = mimes(&plan);
        assert_eq!(mimes[0].as_deref(), Some("video/webm"));
        assert_eq!(mimes[1].as_deref(), Some("video/webm;codecs=vp9,opus"));
        // Generic webm was already tried first; only generic mp4 remains.
        let generic: Vec<_> = plan
            .iter()
            .filter(|a| a.strategy == ResolveStrategy::GenericContainer)
            .collect();
        assert_eq!(generic.len(), 1);
        assert_eq!(generic[0].options.mime_type.as_deref(), Some("video/mp4"));
    }

    #[test]
    fn bitrate_steps_need_their_bitrates() {
        let none = plan_attempts("video/mp4", None, Some(64_000));
        assert!(none
            .iter()
            .all(|a| a.options.video_bitrate_bps.is_none() && a.options.audio_bitrate_bps.is_none()));

        let video_only = plan_attempts("video/mp4", Some(1_000_000), None);
        assert!(video_only
            .iter()
            .any(|a| a.strategy == ResolveStrategy::PreferredWithVideoBitrate));
        assert!(!video_only
            .iter()
            .any(|a| a.strategy == ResolveStrategy::PreferredWithBitrates));
    }

    #[test]
    fn unknown_preferred_falls_back_to_mp4_chain() {
        let plan = plan_attempts("video/quicktime", None, None);
        assert_eq!(
            plan[1].options.mime_type.as_deref(),
            Some("video/mp4;codecs=avc1.640028,mp4a.40.2")
        );
    }

    #[test]
    fn first_supported_wins() {
        let rt = SimRuntime::new();
        let resolved = assert_ok!(resolve_recorder(&rt, &stream(), MP4_RICH, None, None));
        assert_eq!(resolved.strategy, ResolveStrategy::Preferred);
        assert_eq!(resolved.attempts, 1);
        assert_eq!(resolved.recorder.mime_type(), MP4_RICH);
    }

    #[test]
    fn unsupported_preferred_walks_the_chain() {
        let rt = SimRuntime::builder().unsupport("video/mp4").build();
        let resolved = assert_ok!(resolve_recorder(&rt, &stream(), MP4_RICH, None, None));
        assert_eq!(resolved.strategy, ResolveStrategy::FamilyFallback);
        assert_eq!(resolved.recorder.mime_type(), "video/webm;codecs=vp9,opus");

        let tried: Vec<bool> = rt.recorder_requests().into_iter().map(|(_, ok)| ok).collect();
        assert_eq!(tried.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(tried.last(), Some(&true));
    }

    #[test]
    fn platform_default_is_the_sixth_strategy() {
        // Every explicit MIME type is rejected; only the unconstrained
        // request survives.
        let rt = SimRuntime::builder()
            .recorder_policy(|opts| {
                opts.mime_type
                    .as_ref()
                    .map(|m| format!("OverconstrainedError: {m}"))
            })
            .build();
        let resolved =
            resolve_recorder(&rt, &stream(), MP4_RICH, Some(800_000), Some(64_000)).unwrap();
        assert_eq!(resolved.strategy, ResolveStrategy::PlatformDefault);
        assert_eq!(resolved.options, RecorderOptions::platform_default());
        assert_eq!(resolved.recorder.mime_type(), "video/webm");

        let plan = plan_attempts(MP4_RICH, Some(800_000), Some(64_000));
        assert_eq!(resolved.attempts, plan.len());
        let requested: Vec<RecorderOptions> =
            rt.recorder_requests().into_iter().map(|(o, _)| o).collect();
        let planned: Vec<RecorderOptions> = plan.into_iter().map(|a| a.options).collect();
        assert_eq!(requested, planned);
    }

    #[test]
    fn exhaustion_reports_attempts() {
        let rt = SimRuntime::builder()
            .clear_support()
            .default_mime(None)
            .build();
        let err = resolve_recorder(&rt, &stream(), "video/webm", None, None).unwrap_err();
        assert_matches!(
            err,
            Error::RecorderUnavailable { attempts, ref last_error }
                if attempts == plan_attempts("video/webm", None, None).len()
                    && last_error.contains("NotSupportedError")
        );
    }
}
