//! Human and JSON renderings of CLI results.

use std::fmt::Write as _;
use std::path::PathBuf;

use fp_compress::{CompressionResult, EncodingSummary};
use fp_core::{BitrateLadder, PresetTable, QualityTier};
use serde::Serialize;

/// Thumbnail details in a [`CompressionReport`].
#[derive(Debug, Clone, Serialize)]
pub struct ThumbnailReport {
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// What `framepress compress` prints.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionReport {
    pub job_id: String,
    pub output_name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_url: Option<String>,
    pub original_size_mb: f64,
    pub output_size_mb: f64,
    pub compression_ratio: f64,
    pub elapsed_ms: u64,
    pub tier: QualityTier,
    pub quality_score: u8,
    pub audio_preserved: bool,
    pub format_preserved: bool,
    pub thumbnail: Option<ThumbnailReport>,
    pub summary: EncodingSummary,
}

impl CompressionReport {
    pub fn new(result: &CompressionResult) -> Self {
        Self {
            job_id: result.job_id.to_string(),
            output_name: result.output.name.clone(),
            mime_type: result.output.mime_type.clone(),
            output_path: None,
            signed_url: None,
            original_size_mb: result.original_size_mb,
            output_size_mb: result.output_size_mb,
            compression_ratio: result.compression_ratio,
            elapsed_ms: result.elapsed_ms,
            tier: result.tier,
            quality_score: result.quality_score,
            audio_preserved: result.audio_preserved,
            format_preserved: result.format_preserved,
            thumbnail: result.thumbnail.as_ref().map(|t| ThumbnailReport {
                width: t.width,
                height: t.height,
                bytes: t.data.len(),
                path: None,
            }),
            summary: result.summary.clone(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let s = &self.summary;
        let _ = writeln!(out, "Job: {}", self.job_id);
        let _ = writeln!(out, "Output: {} ({})", self.output_name, self.mime_type);
        if let Some(ref path) = self.output_path {
            let _ = writeln!(out, "Written to: {}", path.display());
        }
        let _ = writeln!(
            out,
            "Size: {:.2} MB -> {:.2} MB (ratio {:.2}x)",
            self.original_size_mb, self.output_size_mb, self.compression_ratio
        );
        let _ = writeln!(
            out,
            "Tier: {} via {} (quality {}/10)",
            self.tier, s.method, self.quality_score
        );
        if s.frames_encoded > 0 {
            let _ = writeln!(
                out,
                "Encoding: {}x{} @ {} fps, skip {}, {} frames",
                s.width, s.height, s.frame_rate, s.frame_skip_interval, s.frames_encoded
            );
            if s.bitrate_hints {
                let _ = writeln!(
                    out,
                    "Bitrates: video {} bps, audio {} bps",
                    s.video_bitrate_bps, s.audio_bitrate_bps
                );
            }
            let _ = writeln!(out, "Recorder strategy: {}", s.strategy);
            if s.recovered {
                let _ = writeln!(out, "Recovered from a mid-stream recorder failure");
            }
        }
        let _ = writeln!(out, "Audio preserved: {}", yes_no(self.audio_preserved));
        let _ = writeln!(out, "Format preserved: {}", yes_no(self.format_preserved));
        match self.thumbnail {
            Some(ref t) => {
                let _ = write!(out, "Thumbnail: {}x{} ({} bytes)", t.width, t.height, t.bytes);
                if let Some(ref path) = t.path {
                    let _ = write!(out, " - {}", path.display());
                }
                let _ = writeln!(out);
            }
            None => {
                let _ = writeln!(out, "Thumbnail: none");
            }
        }
        if let Some(ref url) = self.signed_url {
            let _ = writeln!(out, "Signed URL: {url}");
        }
        let _ = writeln!(out, "Elapsed: {} ms", self.elapsed_ms);
        out
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

/// The resolved preset table and bracket ladder as a table.
pub fn render_presets(presets: &PresetTable, ladder: &BitrateLadder) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<9} {:<15} {:>5} {:>4} {:>4} {:>10} {:>8} {:>7}",
        "tier", "target", "scale", "fps", "skip", "video bps", "audio", "quality"
    );
    for tier in QualityTier::ALL {
        let entry = presets.tier(tier);
        for (target, p) in [("native", &entry.native), ("best_available", &entry.best_available)] {
            let _ = writeln!(
                out,
                "{:<9} {:<15} {:>5.2} {:>4} {:>4} {:>10} {:>8} {:>7}",
                tier.as_str(),
                target,
                p.scale_factor,
                p.frame_rate,
                p.frame_skip_interval,
                p.video_bitrate_bps,
                p.audio_bitrate_bps,
                p.quality_score
            );
        }
    }

    let _ = writeln!(out, "\nBitrate brackets:");
    let mut brackets = ladder.brackets().to_vec();
    brackets.sort_by(|a, b| b.above_mb.total_cmp(&a.above_mb));
    for b in &brackets {
        let _ = writeln!(
            out,
            "  > {:>6.1} MB: video {} bps, audio {} bps",
            b.above_mb, b.video_bitrate_bps, b.audio_bitrate_bps
        );
    }
    out
}
