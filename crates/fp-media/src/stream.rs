//! Capture streams and recorder options.

use std::path::PathBuf;

use crate::canvas::Canvas;

/// Where an audio track's samples come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOrigin {
    /// A stream inside a file on disk.
    File { path: PathBuf, stream_index: usize },
    /// Produced by a simulated or generated source.
    Synthetic,
}

/// One audio track attached to a capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub label: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub origin: TrackOrigin,
}

/// A live stream captured from a canvas, optionally carrying audio tracks.
///
/// The video side is described only by geometry and frame rate: frames are
/// pushed to the recorder explicitly by the frame loop.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureStream {
    width: u32,
    height: u32,
    frame_rate: u32,
    audio_tracks: Vec<AudioTrack>,
}

impl CaptureStream {
    /// Capture `canvas` at `frame_rate` frames per second.
    pub fn capture(canvas: &Canvas, frame_rate: u32) -> Self {
        Self {
            width: canvas.width(),
            height: canvas.height(),
            frame_rate: frame_rate.max(1),
            audio_tracks: Vec::new(),
        }
    }

    /// A stream over the same canvas and tracks at a different frame rate.
    pub fn with_frame_rate(&self, frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
            ..self.clone()
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn add_track(&mut self, track: AudioTrack) {
        tracing::trace!(
            label = %track.label,
            channels = track.channels,
            sample_rate = track.sample_rate,
            "audio track joined capture stream"
        );
        self.audio_tracks.push(track);
    }

    pub fn audio_tracks(&self) -> &[AudioTrack] {
        &self.audio_tracks
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_tracks.is_empty()
    }
}

/// Construction options offered to [`crate::MediaRuntime::create_recorder`].
///
/// `None` fields are left to the runtime's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderOptions {
    pub mime_type: Option<String>,
    pub video_bitrate_bps: Option<u64>,
    pub audio_bitrate_bps: Option<u64>,
}

impl RecorderOptions {
    /// Options with only a MIME type.
    pub fn mime(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: Some(mime_type.into()),
            ..Self::default()
        }
    }

    /// No constraints at all: the platform default.
    pub fn platform_default() -> Self {
        Self::default()
    }

    pub fn with_video_bitrate(mut self, bps: u64) -> Self {
        self.video_bitrate_bps = Some(bps);
        self
    }

    pub fn with_audio_bitrate(mut self, bps: u64) -> Self {
        self.audio_bitrate_bps = Some(bps);
        self
    }

    /// Short human-readable description for logs.
    pub fn describe(&self) -> String {
        let mut out = self
            .mime_type
            .clone()
            .unwrap_or_else(|| "<platform default>".to_string());
        if let Some(v) = self.video_bitrate_bps {
            out.push_str(&format!(" video={v}bps"));
        }
        if let Some(a) = self.audio_bitrate_bps {
            out.push_str(&format!(" audio={a}bps"));
        }
        out
    }
}

/// Lifecycle state of a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
    Stopped,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_copies_canvas_geometry() {
        let canvas = Canvas::new(640, 360);
        let stream = CaptureStream::capture(&canvas, 24);
        assert_eq!((stream.width(), stream.height(), stream.frame_rate()), (640, 360, 24));
        assert!(!stream.has_audio());
    }

    #[test]
    fn with_frame_rate_keeps_tracks() {
        let canvas = Canvas::new(8, 8);
        let mut stream = CaptureStream::capture(&canvas, 30);
        stream.add_track(AudioTrack {
            label: "a0".into(),
            channels: 2,
            sample_rate: 48_000,
            origin: TrackOrigin::Synthetic,
        });
        let slower = stream.with_frame_rate(15);
        assert_eq!(slower.frame_rate(), 15);
        assert_eq!(slower.audio_tracks().len(), 1);
    }

    #[test]
    fn describe_options() {
        assert_eq!(RecorderOptions::platform_default().describe(), "<platform default>");
        let opts = RecorderOptions::mime("video/webm")
            .with_video_bitrate(800_000)
            .with_audio_bitrate(64_000);
        assert_eq!(opts.describe(), "video/webm video=800000bps audio=64000bps");
    }
}
