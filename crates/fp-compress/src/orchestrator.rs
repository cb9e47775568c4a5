//! Format-preservation orchestrator.
//!
//! [`Compressor::compress`] is the library entry point. It short-circuits
//! sources already within budget, then runs up to three re-encode passes:
//! the source's own container family, the best container the runtime
//! supports, and a conservative last resort. The first pass that succeeds
//! wins.

use std::sync::Arc;
use std::time::Instant;

use fp_core::config::{CompressionConfig, Config};
use fp_core::{
    BitrateLadder, ContainerFamily, Error, JobId, PresetTable, SourceMedia, TargetContainer,
};
use fp_media::MediaRuntime;

use crate::progress::{ProgressSender, ProgressTracker};
use crate::reencode::{EncodePlan, Reencoder};
use crate::request::CompressionRequest;
use crate::result::{CompressionResult, Method};

/// Engine-wide settings, resolved once from [`Config`].
#[derive(Debug, Clone, Default)]
pub struct CompressorSettings {
    pub compression: CompressionConfig,
    pub presets: PresetTable,
    pub ladder: BitrateLadder,
}

impl From<&Config> for CompressorSettings {
    fn from(config: &Config) -> Self {
        Self {
            compression: config.compression.clone(),
            presets: config.presets.clone(),
            ladder: config.bitrate_brackets.clone(),
        }
    }
}

/// One planned pass: what to encode and whether to carry audio.
#[derive(Debug, Clone)]
pub struct Pass {
    pub plan: EncodePlan,
    pub preserve_audio: bool,
}

/// Compresses sources through a [`MediaRuntime`].
pub struct Compressor {
    runtime: Arc<dyn MediaRuntime>,
    settings: CompressorSettings,
}

impl Compressor {
    pub fn new(runtime: Arc<dyn MediaRuntime>, settings: CompressorSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn runtime(&self) -> &dyn MediaRuntime {
        self.runtime.as_ref()
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    /// First candidate of `candidates` the runtime can record.
    fn first_supported(&self, candidates: &[&str]) -> Option<String> {
        candidates
            .iter()
            .find(|m| self.runtime.is_type_supported(m))
            .map(|m| m.to_string())
    }

    /// The passes `compress` would run for `source`, in order.
    pub fn plan_passes(&self, source: &SourceMedia, request: &CompressionRequest) -> Vec<Pass> {
        let mut passes = Vec::with_capacity(3);
        let tier = request.tier;

        if request.preserve_format {
            match source.family() {
                Some(family) => match self.first_supported(family.native_candidates()) {
                    Some(mime) => passes.push(Pass {
                        plan: EncodePlan {
                            preset: self.settings.presets.lookup(tier, TargetContainer::Native),
                            preferred_mime: mime,
                            method: Method::Native,
                            bitrate_hints: true,
                            tier,
                        },
                        preserve_audio: request.preserve_audio,
                    }),
                    None => tracing::info!(
                        family = %family,
                        runtime = self.runtime.name(),
                        "no native recorder supported; skipping format preservation"
                    ),
                },
                None => tracing::info!(
                    mime = source.mime_type(),
                    "source container is not preservable"
                ),
            }
        }

        let best_candidates: Vec<&str> = ContainerFamily::WebM
            .native_candidates()
            .iter()
            .chain(ContainerFamily::Mp4.native_candidates())
            .copied()
            .collect();
        let best_mime = self
            .first_supported(&best_candidates)
            .unwrap_or_else(|| ContainerFamily::WebM.mime_type().to_string());
        passes.push(Pass {
            plan: EncodePlan {
                preset: self
                    .settings
                    .presets
                    .lookup(tier, TargetContainer::BestAvailable),
                preferred_mime: best_mime,
                method: Method::Best,
                bitrate_hints: true,
                tier,
            },
            preserve_audio: request.preserve_audio,
        });

        let safe_mime = self
            .first_supported(&[
                ContainerFamily::WebM.mime_type(),
                ContainerFamily::Mp4.mime_type(),
            ])
            .unwrap_or_else(|| ContainerFamily::WebM.mime_type().to_string());
        passes.push(Pass {
            plan: EncodePlan {
                preset: self.settings.compression.last_resort.profile(),
                preferred_mime: safe_mime,
                method: Method::Safe,
                bitrate_hints: false,
                tier,
            },
            preserve_audio: false,
        });

        passes
    }

    /// Compress `source` toward `request.target_size_mb`.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a bad request, [`Error::Cancelled`] as soon
    /// as cancellation is observed, and [`Error::AllStrategiesExhausted`]
    /// when every pass failed.
    pub async fn compress(
        &self,
        source: &SourceMedia,
        request: CompressionRequest,
    ) -> fp_core::Result<CompressionResult> {
        request.validate()?;
        let started = Instant::now();
        let job_id = JobId::new();
        let sender = request
            .progress
            .clone()
            .unwrap_or_else(|| Arc::new(ProgressSender::noop()));
        let tracker = Arc::new(ProgressTracker::new(sender));
        let reencoder = Reencoder::new(self.runtime.as_ref(), &self.settings)
            .with_progress(Arc::clone(&tracker))
            .with_cancellation(request.cancellation.clone())
            .with_job_id(job_id);

        tracing::info!(
            job = %job_id.short(),
            source = source.name(),
            size_mb = format!("{:.2}", source.size_mb()),
            target_mb = request.target_size_mb,
            tier = %request.tier,
            runtime = self.runtime.name(),
            "compression started"
        );

        if request.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if source.size_mb() <= request.target_size_mb {
            tracing::info!(job = %job_id.short(), "source already within target; passing through");
            let mut result = reencoder
                .passthrough(source, request.tier, request.preserve_audio)
                .await?;
            tracker.finish("complete");
            result.elapsed_ms = started.elapsed().as_millis() as u64;
            return Ok(result);
        }

        let mut failures = Vec::new();
        for pass in self.plan_passes(source, &request) {
            if request.cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let method = pass.plan.method;
            tracker.begin_pass(method.as_str());

            match reencoder.run(source, &pass.plan, pass.preserve_audio).await {
                Ok(mut result) => {
                    tracker.finish("complete");
                    result.elapsed_ms = started.elapsed().as_millis() as u64;
                    tracing::info!(
                        job = %job_id.short(),
                        method = %method,
                        output = %result.output.name,
                        ratio = format!("{:.2}", result.compression_ratio),
                        format_preserved = result.format_preserved,
                        audio_preserved = result.audio_preserved,
                        elapsed_ms = result.elapsed_ms,
                        "compression finished"
                    );
                    return Ok(result);
                }
                Err(Error::Cancelled) => {
                    tracing::info!(job = %job_id.short(), method = %method, "compression cancelled");
                    return Err(Error::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(job = %job_id.short(), method = %method, "pass failed: {e}");
                    failures.push(format!("{method}: {e}"));
                }
            }
        }

        tracing::error!(job = %job_id.short(), "every compression strategy failed");
        Err(Error::AllStrategiesExhausted { failures })
    }
}
