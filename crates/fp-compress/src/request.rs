//! Per-job compression request.

use std::sync::Arc;

use fp_core::{Error, QualityTier};
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressSender;

/// What the caller wants from one compression job.
#[derive(Debug, Clone)]
pub struct CompressionRequest {
    /// Target output size in MB. Used once to pick the bitrate bracket.
    pub target_size_mb: f64,
    pub tier: QualityTier,
    pub preserve_audio: bool,
    pub preserve_format: bool,
    pub progress: Option<Arc<ProgressSender>>,
    /// Checked before every pass and on every frame.
    pub cancellation: CancellationToken,
}

impl CompressionRequest {
    /// A request with the balanced tier, audio and format preservation on.
    pub fn new(target_size_mb: f64) -> Self {
        Self {
            target_size_mb,
            tier: QualityTier::Balanced,
            preserve_audio: true,
            preserve_format: true,
            progress: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_tier(mut self, tier: QualityTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_preserve_audio(mut self, preserve: bool) -> Self {
        self.preserve_audio = preserve;
        self
    }

    pub fn with_preserve_format(mut self, preserve: bool) -> Self {
        self.preserve_format = preserve;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Reject non-finite or non-positive targets.
    pub fn validate(&self) -> fp_core::Result<()> {
        if !self.target_size_mb.is_finite() || self.target_size_mb <= 0.0 {
            return Err(Error::Validation(format!(
                "target size must be a positive number of MB, got {}",
                self.target_size_mb
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let req = CompressionRequest::new(20.0);
        assert_eq!(req.tier, QualityTier::Balanced);
        assert!(req.preserve_audio);
        assert!(req.preserve_format);
        assert!(req.progress.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let req = CompressionRequest::new(5.0)
            .with_tier(QualityTier::Fast)
            .with_preserve_audio(false)
            .with_preserve_format(false)
            .with_progress(ProgressSender::noop());
        assert_eq!(req.tier, QualityTier::Fast);
        assert!(!req.preserve_audio);
        assert!(!req.preserve_format);
        assert!(req.progress.is_some());
    }

    #[test]
    fn invalid_targets() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert_matches!(
                CompressionRequest::new(bad).validate(),
                Err(Error::Validation(_))
            );
        }
    }
}
