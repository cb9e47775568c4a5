//! Encoder and muxer capability probing.
//!
//! Answers "could a recorder be built for this MIME type?" for the ffmpeg
//! runtime by parsing `ffmpeg -encoders` and `ffmpeg -muxers` once, then
//! mapping each RFC 6381 codec string onto an available ffmpeg encoder.

use std::collections::HashSet;
use std::path::Path;

use fp_core::{ContainerFamily, MimeType};

use crate::command::ToolCommand;

/// Stream kind of a codec identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Video,
    Audio,
}

/// Encoders and muxers the local ffmpeg build provides.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    video_encoders: HashSet<String>,
    audio_encoders: HashSet<String>,
    muxers: HashSet<String>,
}

/// The ffmpeg settings behind one MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderChoice {
    pub family: ContainerFamily,
    /// Muxer passed to `-f`.
    pub muxer: &'static str,
    pub video_encoder: String,
    /// Encoder for audio tracks, if the container can carry one.
    pub audio_encoder: Option<String>,
}

/// Candidate ffmpeg encoders for a codec identifier, preferred first.
fn encoders_for(codec: &str) -> Option<(CodecKind, &'static [&'static str])> {
    let c = codec.to_ascii_lowercase();
    if c.starts_with("avc1") || c.starts_with("avc3") || c == "h264" {
        Some((CodecKind::Video, &["libx264", "libopenh264", "h264_v4l2m2m"]))
    } else if c.starts_with("vp09") || c == "vp9" {
        Some((CodecKind::Video, &["libvpx-vp9"]))
    } else if c.starts_with("vp8") {
        Some((CodecKind::Video, &["libvpx"]))
    } else if c == "opus" {
        Some((CodecKind::Audio, &["libopus", "opus"]))
    } else if c == "vorbis" {
        Some((CodecKind::Audio, &["libvorbis", "vorbis"]))
    } else if c.starts_with("mp4a") || c == "aac" {
        Some((CodecKind::Audio, &["aac", "libfdk_aac"]))
    } else {
        None
    }
}

/// Whether a codec may be carried by the container family.
fn allowed_in(family: ContainerFamily, codec: &str) -> bool {
    let c = codec.to_ascii_lowercase();
    match family {
        ContainerFamily::Mp4 => {
            c.starts_with("avc1") || c.starts_with("avc3") || c == "h264" || c.starts_with("mp4a") || c == "aac"
        }
        ContainerFamily::WebM => {
            c.starts_with("vp8") || c.starts_with("vp09") || c == "vp9" || c == "opus" || c == "vorbis"
        }
    }
}

fn default_codecs(family: ContainerFamily) -> (&'static [&'static str], &'static str) {
    match family {
        ContainerFamily::Mp4 => (&["h264"], "mp4a"),
        ContainerFamily::WebM => (&["vp9", "vp8"], "opus"),
    }
}

impl Capabilities {
    /// Query the ffmpeg binary at `ffmpeg`.
    pub async fn probe(ffmpeg: &Path) -> fp_core::Result<Self> {
        let encoders = ToolCommand::new(ffmpeg.to_path_buf())
            .args(["-hide_banner", "-encoders"])
            .execute()
            .await?;
        let muxers = ToolCommand::new(ffmpeg.to_path_buf())
            .args(["-hide_banner", "-muxers"])
            .execute()
            .await?;
        let caps = Self::parse(&encoders.stdout, &muxers.stdout);
        tracing::debug!(
            video = caps.video_encoders.len(),
            audio = caps.audio_encoders.len(),
            muxers = caps.muxers.len(),
            "probed ffmpeg capabilities"
        );
        Ok(caps)
    }

    /// Build from `-encoders` and `-muxers` listings.
    pub fn parse(encoders: &str, muxers: &str) -> Self {
        let mut caps = Self::default();

        for (flags, name) in listing_rows(encoders, "------") {
            match flags.chars().next() {
                Some('V') => {
                    caps.video_encoders.insert(name.to_string());
                }
                Some('A') => {
                    caps.audio_encoders.insert(name.to_string());
                }
                _ => {}
            }
        }

        for (flags, names) in listing_rows(muxers, "--") {
            if flags.contains('E') {
                caps.muxers.extend(names.split(',').map(str::to_string));
            }
        }

        caps
    }

    /// Explicit capabilities, mainly for tests.
    pub fn from_parts(video: &[&str], audio: &[&str], muxers: &[&str]) -> Self {
        Self {
            video_encoders: video.iter().map(|s| s.to_string()).collect(),
            audio_encoders: audio.iter().map(|s| s.to_string()).collect(),
            muxers: muxers.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn has_encoder(&self, kind: CodecKind, name: &str) -> bool {
        match kind {
            CodecKind::Video => self.video_encoders.contains(name),
            CodecKind::Audio => self.audio_encoders.contains(name),
        }
    }

    fn pick(&self, codec: &str) -> Option<(CodecKind, String)> {
        let (kind, candidates) = encoders_for(codec)?;
        candidates
            .iter()
            .find(|e| self.has_encoder(kind, e))
            .map(|e| (kind, e.to_string()))
    }

    /// Resolve a MIME type into concrete ffmpeg settings.
    ///
    /// Returns `None` for unknown containers, codecs the container cannot
    /// carry, and codecs without an available encoder.
    pub fn resolve(&self, mime_type: &str) -> Option<EncoderChoice> {
        let mime = MimeType::parse(mime_type);
        let family = match mime.essence.as_str() {
            "video/mp4" => ContainerFamily::Mp4,
            "video/webm" => ContainerFamily::WebM,
            _ => return None,
        };
        let muxer = family.extension();
        if !self.muxers.contains(muxer) {
            return None;
        }

        let mut video = None;
        let mut audio = None;
        for codec in &mime.codecs {
            if !allowed_in(family, codec) {
                return None;
            }
            match self.pick(codec)? {
                (CodecKind::Video, enc) => video = video.or(Some(enc)),
                (CodecKind::Audio, enc) => audio = audio.or(Some(enc)),
            }
        }

        let (video_defaults, audio_default) = default_codecs(family);
        let video_encoder = match video {
            Some(v) => v,
            None => video_defaults
                .iter()
                .find_map(|c| self.pick(c))
                .map(|(_, e)| e)?,
        };
        let audio_encoder = audio.or_else(|| self.pick(audio_default).map(|(_, e)| e));

        Some(EncoderChoice {
            family,
            muxer,
            video_encoder,
            audio_encoder,
        })
    }

    pub fn supports(&self, mime_type: &str) -> bool {
        self.resolve(mime_type).is_some()
    }
}

/// Rows of an ffmpeg listing after the separator line, as `(flags, name)`.
fn listing_rows<'a>(text: &'a str, separator: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
    text.lines()
        .skip_while(move |l| l.trim() != separator)
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            Some((cols.next()?, cols.next()?))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODERS: &str = "\
Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (codec h264)
 V....D libvpx               libvpx VP8 (codec vp8)
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libopus              libopus Opus (codec opus)
 S..... mov_text             3GPP Timed Text subtitle
";

    const MUXERS: &str = "\
File formats:
 D. = Demuxing supported
 .E = Muxing supported
 --
  E mp4             MP4 (MPEG-4 Part 14)
  E webm            WebM
 D  matroska,webm   Matroska / WebM
";

    #[test]
    fn parse_listings() {
        let caps = Capabilities::parse(ENCODERS, MUXERS);
        assert!(caps.video_encoders.contains("libx264"));
        assert!(caps.audio_encoders.contains("libopus"));
        assert!(!caps.video_encoders.contains("mov_text"));
        assert!(caps.muxers.contains("mp4"));
        assert!(caps.muxers.contains("webm"));
        assert!(!caps.muxers.contains("matroska"));
    }

    #[test]
    fn resolves_codec_strings() {
        let caps = Capabilities::parse(ENCODERS, MUXERS);
        let choice = caps.resolve("video/mp4;codecs=avc1.640028,mp4a.40.2").unwrap();
        assert_eq!(choice.family, ContainerFamily::Mp4);
        assert_eq!(choice.video_encoder, "libx264");
        assert_eq!(choice.audio_encoder.as_deref(), Some("aac"));

        let choice = caps.resolve("video/webm;codecs=vp8").unwrap();
        assert_eq!(choice.video_encoder, "libvpx");
        assert_eq!(choice.audio_encoder.as_deref(), Some("libopus"));
    }

    #[test]
    fn bare_container_uses_defaults() {
        let caps = Capabilities::parse(ENCODERS, MUXERS);
        assert_eq!(caps.resolve("video/webm").unwrap().video_encoder, "libvpx-vp9");
        assert_eq!(caps.resolve("video/mp4").unwrap().muxer, "mp4");
    }

    #[test]
    fn rejects_cross_family_and_unknown() {
        let caps = Capabilities::parse(ENCODERS, MUXERS);
        assert!(!caps.supports("video/mp4;codecs=vp9"));
        assert!(!caps.supports("video/webm;codecs=avc1.42E01E"));
        assert!(!caps.supports("video/mp4;codecs=hvc1"));
        assert!(!caps.supports("video/quicktime"));
    }

    #[test]
    fn missing_encoder_or_muxer() {
        let caps = Capabilities::from_parts(&["libvpx"], &[], &["webm"]);
        assert!(caps.supports("video/webm;codecs=vp8"));
        assert!(!caps.supports("video/webm;codecs=vp9"));
        assert!(!caps.supports("video/webm;codecs=vp8,opus"));
        assert!(caps.resolve("video/webm").unwrap().audio_encoder.is_none());
        assert!(!caps.supports("video/mp4"));
    }
}
