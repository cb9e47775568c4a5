//! Media-domain types: container families, MIME parsing, source and output
//! blobs, and decoded-source metadata.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Sizes are reported in binary megabytes.
pub const BYTES_PER_MB: f64 = 1_048_576.0;

/// Convert a byte count to megabytes.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

// ---------------------------------------------------------------------------
// ContainerFamily
// ---------------------------------------------------------------------------

/// Output container families the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFamily {
    Mp4,
    #[serde(rename = "webm")]
    WebM,
}

const MP4_CANDIDATES: &[&str] = &[
    "video/mp4;codecs=avc1.640028,mp4a.40.2",
    "video/mp4;codecs=avc1.4D401F,mp4a.40.2",
    "video/mp4;codecs=avc1.42E01E,mp4a.40.2",
    "video/mp4;codecs=avc1.42E01E",
    "video/mp4;codecs=h264",
    "video/mp4",
];

const WEBM_CANDIDATES: &[&str] = &[
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm",
];

const MP4_VARIANTS: &[&str] = &[
    "video/mp4;codecs=avc1.640028,mp4a.40.2",
    "video/mp4;codecs=avc1.640028",
    "video/mp4;codecs=avc1.4D401F,mp4a.40.2",
    "video/mp4;codecs=avc1.4D401F",
    "video/mp4;codecs=avc1.42E01E,mp4a.40.2",
    "video/mp4;codecs=avc1.42E01E",
];

const WEBM_VARIANTS: &[&str] = &[
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=vp8",
];

impl ContainerFamily {
    /// The bare container MIME type.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::WebM => "video/webm",
        }
    }

    /// File extension for outputs in this family.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::WebM => "webm",
        }
    }

    /// The other family.
    pub fn other(&self) -> Self {
        match self {
            Self::Mp4 => Self::WebM,
            Self::WebM => Self::Mp4,
        }
    }

    /// Format-preserving candidates, codec+audio combos first, bare
    /// container last.
    pub fn native_candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Mp4 => MP4_CANDIDATES,
            Self::WebM => WEBM_CANDIDATES,
        }
    }

    /// Codec variants of this family, richest first.
    pub fn codec_variants(&self) -> &'static [&'static str] {
        match self {
            Self::Mp4 => MP4_VARIANTS,
            Self::WebM => WEBM_VARIANTS,
        }
    }

    /// Recorder fallback chain: this family's codec variants, then the
    /// other family's.
    pub fn fallback_chain(&self) -> Vec<&'static str> {
        self.codec_variants()
            .iter()
            .chain(self.other().codec_variants())
            .copied()
            .collect()
    }

    /// Classify a MIME type (parameters allowed) into a preservable family.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match MimeType::parse(mime).essence.as_str() {
            "video/mp4" | "video/x-m4v" | "audio/mp4" => Some(Self::Mp4),
            "video/webm" | "audio/webm" => Some(Self::WebM),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mp4 => write!(f, "mp4"),
            Self::WebM => write!(f, "webm"),
        }
    }
}

// ---------------------------------------------------------------------------
// MimeType
// ---------------------------------------------------------------------------

/// A parsed `type/subtype;codecs=...` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    /// Lowercased `type/subtype`.
    pub essence: String,
    /// Codec identifiers from the `codecs` parameter, in order.
    pub codecs: Vec<String>,
}

impl MimeType {
    /// Parse a MIME string. Unknown parameters are ignored and quotes
    /// around the codec list are stripped.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let mut codecs = Vec::new();

        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if !key.trim().eq_ignore_ascii_case("codecs") {
                continue;
            }
            codecs.extend(
                value
                    .trim()
                    .trim_matches('"')
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty()),
            );
        }

        Self { essence, codecs }
    }

    /// Container family of this MIME type, if preservable.
    pub fn family(&self) -> Option<ContainerFamily> {
        ContainerFamily::from_mime(&self.essence)
    }
}

/// Infer a MIME type from a file extension.
pub fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "3gp" => "video/3gpp",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// SourceMedia
// ---------------------------------------------------------------------------

/// Where the bytes of a [`SourceMedia`] live.
#[derive(Debug, Clone)]
pub enum SourceLocation {
    /// A file on disk.
    Path(PathBuf),
    /// An in-memory buffer.
    Memory(Bytes),
}

/// The caller's original file. The engine only reads it.
#[derive(Debug, Clone)]
pub struct SourceMedia {
    name: String,
    mime_type: String,
    size_bytes: u64,
    location: SourceLocation,
}

impl SourceMedia {
    /// Wrap an in-memory buffer.
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes: data.len() as u64,
            location: SourceLocation::Memory(data),
        }
    }

    /// Reference a file on disk; the MIME type is inferred from the
    /// extension and the size read from filesystem metadata.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(Error::Validation(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());

        Ok(Self {
            name,
            mime_type: mime_from_extension(path).to_string(),
            size_bytes: meta.len(),
            location: SourceLocation::Path(path.to_path_buf()),
        })
    }

    /// Override the declared MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.size_bytes)
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// Declared container family, if preservable.
    pub fn family(&self) -> Option<ContainerFamily> {
        ContainerFamily::from_mime(&self.mime_type)
    }

    /// Read the whole payload.
    pub async fn read_bytes(&self) -> Result<Bytes> {
        match &self.location {
            SourceLocation::Memory(data) => Ok(data.clone()),
            SourceLocation::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }

    /// File stem of the declared name (`clip.final.mp4` → `clip.final`).
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// An encoded output file.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl OutputFile {
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.size_bytes())
    }
}

/// A rasterized still image.
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

// ---------------------------------------------------------------------------
// MediaMetadata
// ---------------------------------------------------------------------------

/// An audio stream present in a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    /// Stream index inside the container.
    pub index: usize,
    pub codec: Option<String>,
    pub channels: u16,
    pub sample_rate: Option<u32>,
}

/// Metadata available once a source has been loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
    #[serde(default)]
    pub audio_streams: Vec<AudioStreamInfo>,
}

impl MediaMetadata {
    pub fn has_audio(&self) -> bool {
        !self.audio_streams.is_empty()
    }

    /// Width divided by height; 16:9 when the height is unknown.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            16.0 / 9.0
        } else {
            self.width as f64 / self.height as f64
        }
    }
}
