//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! compression defaults, the preset and bitrate tables, tool paths and the
//! storage settings. Every section defaults sensibly so a completely empty
//! `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::preset::{BitrateLadder, PresetProfile, PresetTable, QualityTier};
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compression: CompressionConfig,
    pub presets: PresetTable,
    pub bitrate_brackets: BitrateLadder,
    pub tools: ToolsConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Load configuration strictly: a missing or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let c = &self.compression;

        if c.thumbnail_at_secs < 0.0 || !c.thumbnail_at_secs.is_finite() {
            warnings.push("compression.thumbnail_at_secs must be a non-negative number".into());
        }
        if c.thumbnail_width == 0 || c.thumbnail_height == 0 {
            warnings.push("compression.thumbnail_width/height must be positive".into());
        }
        if !(1..=100).contains(&c.thumbnail_quality) {
            warnings.push(format!(
                "compression.thumbnail_quality {} is outside 1..=100",
                c.thumbnail_quality
            ));
        }
        for (name, secs) in [
            ("metadata_timeout_secs", c.metadata_timeout_secs),
            ("seek_timeout_secs", c.seek_timeout_secs),
            ("audio_timeout_secs", c.audio_timeout_secs),
        ] {
            if secs == 0 {
                warnings.push(format!("compression.{name} is 0; every wait will time out"));
            }
        }
        if c.recovery_frame_rate == 0 {
            warnings.push("compression.recovery_frame_rate must be positive".into());
        }
        warnings.extend(c.last_resort.profile().validate("compression.last_resort"));

        warnings.extend(self.presets.validate());
        warnings.extend(self.bitrate_brackets.validate());

        if self.storage.enabled && self.storage.signing_secret.is_none() {
            warnings.push(
                "storage is enabled but no signing_secret is set; signed URLs will not survive a restart"
                    .into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Compression engine defaults and bounded-wait limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub default_tier: QualityTier,
    pub thumbnail_at_secs: f64,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    /// JPEG quality for thumbnails (1-100).
    pub thumbnail_quality: u8,
    pub metadata_timeout_secs: u64,
    pub seek_timeout_secs: u64,
    pub audio_timeout_secs: u64,
    /// Frame rate of the in-loop recovery recorder.
    pub recovery_frame_rate: u32,
    pub last_resort: LastResortConfig,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            default_tier: QualityTier::Balanced,
            thumbnail_at_secs: 5.0,
            thumbnail_width: 1280,
            thumbnail_height: 720,
            thumbnail_quality: 92,
            metadata_timeout_secs: 15,
            seek_timeout_secs: 10,
            audio_timeout_secs: 10,
            recovery_frame_rate: 15,
            last_resort: LastResortConfig::default(),
        }
    }
}

impl CompressionConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_secs(self.seek_timeout_secs)
    }

    pub fn audio_timeout(&self) -> Duration {
        Duration::from_secs(self.audio_timeout_secs)
    }
}

/// Parameters of the maximally conservative final pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LastResortConfig {
    pub scale_factor: f64,
    pub frame_rate: u32,
    pub quality_score: u8,
}

impl Default for LastResortConfig {
    fn default() -> Self {
        Self {
            scale_factor: 0.7,
            frame_rate: 15,
            quality_score: 5,
        }
    }
}

impl LastResortConfig {
    /// The fixed profile used by the last-resort pass. Bitrates are zero
    /// because this pass never offers bitrate hints.
    pub fn profile(&self) -> PresetProfile {
        PresetProfile {
            scale_factor: self.scale_factor,
            frame_rate: self.frame_rate,
            frame_skip_interval: 1,
            video_bitrate_bps: 0,
            audio_bitrate_bps: 0,
            quality_score: self.quality_score,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Where compressed outputs are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub root: PathBuf,
    pub url_ttl_secs: u64,
    pub signing_secret: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: PathBuf::from("./data/outputs"),
            url_ttl_secs: 3600,
            signing_secret: None,
        }
    }
}
