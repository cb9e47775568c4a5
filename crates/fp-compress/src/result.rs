//! Compression results.

use std::fmt;

use fp_core::{ImageBlob, JobId, OutputFile, QualityTier};
use serde::Serialize;

/// Which orchestrator pass produced an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Same container family as the source.
    Native,
    /// Best container the runtime supports.
    Best,
    /// Last-resort conservative pass.
    Safe,
    /// Source returned unchanged.
    Original,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Native => "native",
            Method::Best => "best",
            Method::Safe => "safe",
            Method::Original => "original",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an output was encoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodingSummary {
    pub method: Method,
    /// MIME type the recorder negotiated.
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub frame_skip_interval: u32,
    /// Bracket ceilings after clamping against the preset.
    pub video_bitrate_bps: u64,
    pub audio_bitrate_bps: u64,
    /// Whether bitrate hints were offered to the resolver at all.
    pub bitrate_hints: bool,
    /// Resolver strategy that produced the recorder.
    pub strategy: String,
    /// Whether the in-loop recovery recorder produced the output.
    pub recovered: bool,
    pub frames_encoded: u64,
}

impl EncodingSummary {
    /// Summary for an unchanged source.
    pub fn passthrough(mime_type: &str) -> Self {
        Self {
            method: Method::Original,
            mime_type: mime_type.to_string(),
            width: 0,
            height: 0,
            frame_rate: 0,
            frame_skip_interval: 0,
            video_bitrate_bps: 0,
            audio_bitrate_bps: 0,
            bitrate_hints: false,
            strategy: "none".to_string(),
            recovered: false,
            frames_encoded: 0,
        }
    }
}

/// Everything a finished job returns. The engine keeps no copy.
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub job_id: JobId,
    pub output: OutputFile,
    pub original_size_mb: f64,
    /// Measured from the output bytes.
    pub output_size_mb: f64,
    /// `original_size_mb / output_size_mb`.
    pub compression_ratio: f64,
    pub elapsed_ms: u64,
    pub tier: QualityTier,
    pub quality_score: u8,
    pub audio_preserved: bool,
    pub format_preserved: bool,
    pub thumbnail: Option<ImageBlob>,
    pub summary: EncodingSummary,
}

/// Ratio of two sizes; an empty output counts as no compression.
pub fn compression_ratio(original_size_mb: f64, output_size_mb: f64) -> f64 {
    if output_size_mb > 0.0 {
        original_size_mb / output_size_mb
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_exact_quotient() {
        assert_eq!(compression_ratio(300.0, 20.0), 15.0);
        assert_eq!(compression_ratio(5.0, 5.0), 1.0);
        assert_eq!(compression_ratio(1.0, 0.0), 1.0);
    }

    #[test]
    fn method_labels() {
        let labels: Vec<&str> = [Method::Native, Method::Best, Method::Safe, Method::Original]
            .iter()
            .map(Method::as_str)
            .collect();
        assert_eq!(labels, vec!["native", "best", "safe", "original"]);
        assert_eq!(
            serde_json::to_string(&Method::Safe).unwrap(),
            "\"safe\""
        );
    }
}
