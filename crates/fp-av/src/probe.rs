//! ffprobe metadata.
//!
//! Runs `ffprobe -v quiet -print_format json -show_format -show_streams` and
//! maps the first video stream and every audio stream into
//! [`fp_core::MediaMetadata`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use fp_core::{AudioStreamInfo, Error, MediaMetadata};
use serde::Deserialize;

use crate::command::ToolCommand;

/// Metadata prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self {
            ffprobe_path,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn probe(&self, path: &Path) -> fp_core::Result<MediaMetadata> {
        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
        ]);
        cmd.arg(path.to_string_lossy().as_ref());
        cmd.timeout(self.timeout);

        let output = cmd.execute().await?;
        parse_ffprobe_json(&output.stdout)
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    channels: Option<u16>,
    sample_rate: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse ffprobe JSON into metadata. A source without a video stream is a
/// [`Error::Probe`].
pub fn parse_ffprobe_json(json: &str) -> fp_core::Result<MediaMetadata> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Error::Probe("no video stream".to_string()))?;

    let duration_secs = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| video.duration.as_deref().and_then(|d| d.parse().ok()))
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let frame_rate = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate));

    let audio_streams = output
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|s| AudioStreamInfo {
            index: s.index,
            codec: s.codec_name.clone(),
            channels: s.channels.unwrap_or(2),
            sample_rate: s.sample_rate.as_deref().and_then(|r| r.parse().ok()),
        })
        .collect();

    Ok(MediaMetadata {
        duration_secs,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        frame_rate,
        audio_streams,
    })
}

/// Parse `num/den` or a plain number. `0/0` yields `None`.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };
    (value > 0.0 && value.is_finite()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "avg_frame_rate": "30000/1001", "r_frame_rate": "30000/1001"},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "channels": 2, "sample_rate": "48000"},
            {"index": 2, "codec_type": "audio", "codec_name": "ac3", "channels": 6, "sample_rate": "48000"},
            {"index": 3, "codec_type": "subtitle", "codec_name": "mov_text"}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "95.440000", "size": "314572800"}
    }"#;

    #[test]
    fn parse_sample() {
        let meta = parse_ffprobe_json(SAMPLE).unwrap();
        assert_eq!((meta.width, meta.height), (1920, 1080));
        assert!((meta.duration_secs - 95.44).abs() < 1e-9);
        assert!((meta.frame_rate.unwrap() - 29.97).abs() < 0.01);
        assert_eq!(meta.audio_streams.len(), 2);
        assert_eq!(meta.audio_streams[1].index, 2);
        assert_eq!(meta.audio_streams[1].channels, 6);
        assert_eq!(meta.audio_streams[0].sample_rate, Some(48_000));
    }

    #[test]
    fn duration_falls_back_to_stream() {
        let json = r#"{"streams": [{"index": 0, "codec_type": "video", "width": 640, "height": 360,
                       "duration": "12.5", "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}]}"#;
        let meta = parse_ffprobe_json(json).unwrap();
        assert_eq!(meta.duration_secs, 12.5);
        assert_eq!(meta.frame_rate, Some(25.0));
        assert!(!meta.has_audio());
    }

    #[test]
    fn audio_only_is_probe_error() {
        let json = r#"{"streams": [{"index": 0, "codec_type": "audio", "channels": 2}], "format": {}}"#;
        let err = parse_ffprobe_json(json).unwrap_err();
        assert!(matches!(err, Error::Probe(_)));
    }

    #[test]
    fn garbage_is_probe_error() {
        assert!(matches!(parse_ffprobe_json("not json"), Err(Error::Probe(_))));
    }

    #[test]
    fn frame_rate_forms() {
        assert!((parse_frame_rate("24000/1001").unwrap() - 23.976).abs() < 0.01);
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("invalid"), None);
    }
}
