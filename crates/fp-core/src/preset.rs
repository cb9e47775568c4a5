//! Preset Policy Table and bitrate bracket ladder.
//!
//! Both are pure data: the encoder looks values up and never branches on a
//! tier name. The numbers are empirical calibration, so both tables can be
//! overridden from the configuration file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// ---------------------------------------------------------------------------
// QualityTier
// ---------------------------------------------------------------------------

/// Named quality/speed preset, highest fidelity first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Highest,
    High,
    #[default]
    Balanced,
    Fast,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [Self::Highest, Self::High, Self::Balanced, Self::Fast];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Highest => "highest",
            Self::High => "high",
            Self::Balanced => "balanced",
            Self::Fast => "fast",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "highest" => Ok(Self::Highest),
            "high" => Ok(Self::High),
            "balanced" => Ok(Self::Balanced),
            "fast" => Ok(Self::Fast),
            other => Err(Error::Validation(format!(
                "unknown quality tier '{other}' (valid: highest, high, balanced, fast)"
            ))),
        }
    }
}

/// Which container a preset targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetContainer {
    /// Same family as the source.
    Native,
    /// Whatever the runtime supports best.
    BestAvailable,
}

// ---------------------------------------------------------------------------
// PresetProfile
// ---------------------------------------------------------------------------

/// Resolved encoding parameters for one (tier, target) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresetProfile {
    /// Output dimension multiplier, in (0, 1].
    pub scale_factor: f64,
    /// Capture frame rate.
    pub frame_rate: u32,
    /// Redraw the canvas every N frames; the others hold.
    pub frame_skip_interval: u32,
    pub video_bitrate_bps: u64,
    pub audio_bitrate_bps: u64,
    /// 1 (worst) to 10 (best).
    pub quality_score: u8,
}

impl PresetProfile {
    const fn new(
        scale_factor: f64,
        frame_rate: u32,
        frame_skip_interval: u32,
        video_bitrate_bps: u64,
        audio_bitrate_bps: u64,
        quality_score: u8,
    ) -> Self {
        Self {
            scale_factor,
            frame_rate,
            frame_skip_interval,
            video_bitrate_bps,
            audio_bitrate_bps,
            quality_score,
        }
    }

    /// Return a list of problems with this profile, prefixed by `label`.
    pub fn validate(&self, label: &str) -> Vec<String> {
        let mut problems = Vec::new();
        if !(self.scale_factor > 0.0 && self.scale_factor <= 1.0) {
            problems.push(format!("{label}.scale_factor must be in (0, 1]"));
        }
        if self.frame_rate == 0 {
            problems.push(format!("{label}.frame_rate must be positive"));
        }
        if self.frame_skip_interval == 0 {
            problems.push(format!("{label}.frame_skip_interval must be positive"));
        }
        if !(1..=10).contains(&self.quality_score) {
            problems.push(format!("{label}.quality_score must be in 1..=10"));
        }
        problems
    }
}

/// Native and best-available profiles for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPresets {
    pub native: PresetProfile,
    pub best_available: PresetProfile,
}

// ---------------------------------------------------------------------------
// PresetTable
// ---------------------------------------------------------------------------

/// Lookup table from (tier, target) to [`PresetProfile`].
///
/// Overriding a tier in the configuration replaces both of its profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetTable {
    pub highest: TierPresets,
    pub high: TierPresets,
    pub balanced: TierPresets,
    pub fast: TierPresets,
}

impl Default for PresetTable {
    fn default() -> Self {
        Self {
            highest: TierPresets {
                native: PresetProfile::new(0.9, 30, 1, 4_000_000, 128_000, 10),
                best_available: PresetProfile::new(0.85, 30, 1, 3_500_000, 128_000, 10),
            },
            high: TierPresets {
                native: PresetProfile::new(0.85, 30, 1, 3_000_000, 128_000, 9),
                best_available: PresetProfile::new(0.8, 30, 1, 3_000_000, 128_000, 9),
            },
            balanced: TierPresets {
                native: PresetProfile::new(0.75, 25, 1, 2_500_000, 96_000, 8),
                best_available: PresetProfile::new(0.7, 24, 2, 2_000_000, 96_000, 7),
            },
            fast: TierPresets {
                native: PresetProfile::new(0.7, 24, 2, 2_000_000, 96_000, 7),
                best_available: PresetProfile::new(0.6, 20, 3, 1_200_000, 64_000, 7),
            },
        }
    }
}

impl PresetTable {
    /// Profiles for a tier.
    pub fn tier(&self, tier: QualityTier) -> &TierPresets {
        match tier {
            QualityTier::Highest => &self.highest,
            QualityTier::High => &self.high,
            QualityTier::Balanced => &self.balanced,
            QualityTier::Fast => &self.fast,
        }
    }

    /// Resolve the profile for a tier and target container.
    pub fn lookup(&self, tier: QualityTier, target: TargetContainer) -> PresetProfile {
        let presets = self.tier(tier);
        match target {
            TargetContainer::Native => presets.native,
            TargetContainer::BestAvailable => presets.best_available,
        }
    }

    /// Return a list of validation problems across all entries.
    pub fn validate(&self) -> Vec<String> {
        QualityTier::ALL
            .iter()
            .flat_map(|tier| {
                let presets = self.tier(*tier);
                let mut problems = presets.native.validate(&format!("presets.{tier}.native"));
                problems.extend(
                    presets
                        .best_available
                        .validate(&format!("presets.{tier}.best_available")),
                );
                problems
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Bitrate brackets
// ---------------------------------------------------------------------------

/// Bitrate ceilings applied to sources strictly larger than `above_mb`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BitrateBracket {
    pub above_mb: f64,
    pub video_bitrate_bps: u64,
    pub audio_bitrate_bps: u64,
}

/// Video/audio ceilings selected for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateCeiling {
    pub video_bitrate_bps: u64,
    pub audio_bitrate_bps: u64,
}

/// Size-keyed ladder of bitrate ceilings. Larger inputs get lower ceilings
/// so the runtime does not reject the combination as overconstrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BitrateLadder(Vec<BitrateBracket>);

impl Default for BitrateLadder {
    fn default() -> Self {
        Self(vec![
            BitrateBracket {
                above_mb: 200.0,
                video_bitrate_bps: 800_000,
                audio_bitrate_bps: 64_000,
            },
            BitrateBracket {
                above_mb: 100.0,
                video_bitrate_bps: 1_200_000,
                audio_bitrate_bps: 80_000,
            },
            BitrateBracket {
                above_mb: 50.0,
                video_bitrate_bps: 1_800_000,
                audio_bitrate_bps: 96_000,
            },
            BitrateBracket {
                above_mb: 0.0,
                video_bitrate_bps: 2_500_000,
                audio_bitrate_bps: 128_000,
            },
        ])
    }
}

impl BitrateLadder {
    pub fn new(brackets: Vec<BitrateBracket>) -> Self {
        Self(brackets)
    }

    pub fn brackets(&self) -> &[BitrateBracket] {
        &self.0
    }

    /// Ceilings for a source of `size_mb`.
    ///
    /// Brackets are matched from the highest threshold down; sizes at or
    /// below every threshold use the lowest bracket. `None` only for an
    /// empty ladder.
    pub fn ceiling_for(&self, size_mb: f64) -> Option<BitrateCeiling> {
        let mut sorted: Vec<&BitrateBracket> = self.0.iter().collect();
        sorted.sort_by(|a, b| b.above_mb.total_cmp(&a.above_mb));

        sorted
            .iter()
            .find(|b| size_mb > b.above_mb)
            .or_else(|| sorted.last())
            .map(|b| BitrateCeiling {
                video_bitrate_bps: b.video_bitrate_bps,
                audio_bitrate_bps: b.audio_bitrate_bps,
            })
    }

    /// Clamp a profile's bitrates by the ceiling for `size_mb`.
    pub fn clamp(&self, profile: &PresetProfile, size_mb: f64) -> BitrateCeiling {
        match self.ceiling_for(size_mb) {
            Some(ceiling) => BitrateCeiling {
                video_bitrate_bps: profile.video_bitrate_bps.min(ceiling.video_bitrate_bps),
                audio_bitrate_bps: profile.audio_bitrate_bps.min(ceiling.audio_bitrate_bps),
            },
            None => BitrateCeiling {
                video_bitrate_bps: profile.video_bitrate_bps,
                audio_bitrate_bps: profile.audio_bitrate_bps,
            },
        }
    }

    /// Return a list of validation problems.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.0.is_empty() {
            problems.push("bitrate_brackets is empty; preset bitrates are used unclamped".into());
        }
        for (i, b) in self.0.iter().enumerate() {
            if b.above_mb < 0.0 || !b.above_mb.is_finite() {
                problems.push(format!("bitrate_brackets[{i}].above_mb must be >= 0"));
            }
            if b.video_bitrate_bps == 0 {
                problems.push(format!("bitrate_brackets[{i}].video_bitrate_bps is 0"));
            }
        }
        problems
    }
}
