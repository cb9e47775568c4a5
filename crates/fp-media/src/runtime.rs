//! The media runtime seam.
//!
//! A [`MediaRuntime`] is the platform media stack: it can tell which
//! recorder MIME types it supports, open a source for decoding, build
//! recorders over a capture stream and create audio graphs. The compression
//! engine only ever talks to these traits.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use fp_core::{MediaMetadata, Result, SourceMedia};

use crate::canvas::VideoFrame;
use crate::stream::{AudioTrack, CaptureStream, RecorderOptions, RecorderState};

/// Platform media stack.
#[async_trait]
pub trait MediaRuntime: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Whether a recorder could be constructed for `mime_type`.
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Open `source` for decoding. Resolves once metadata is available.
    async fn load(&self, source: &SourceMedia) -> Result<Box<dyn MediaElement>>;

    /// Construct a recorder over `stream`.
    ///
    /// Fails when the runtime rejects the options (unsupported MIME type or
    /// an overconstrained codec/bitrate combination).
    fn create_recorder(
        &self,
        stream: &CaptureStream,
        options: &RecorderOptions,
    ) -> Result<Box<dyn Recorder>>;

    /// Create a fresh audio graph scoped to one encoding session.
    fn create_audio_graph(&self) -> Result<Box<dyn AudioGraph>>;
}

/// A loaded source: seekable, playable, decodable.
#[async_trait]
pub trait MediaElement: Send {
    fn metadata(&self) -> &MediaMetadata;

    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    fn set_muted(&mut self, muted: bool);

    fn muted(&self) -> bool;

    /// Set the output volume, clamped to `0.0..=1.0`.
    fn set_volume(&mut self, volume: f64);

    fn volume(&self) -> f64;

    /// True once a seek or decode ran past the end of the source.
    fn ended(&self) -> bool;

    /// The file backing this element, when there is one.
    fn source_path(&self) -> Option<&Path> {
        None
    }

    /// Move the playback position; resolves when the seek completed.
    async fn seek(&mut self, secs: f64) -> Result<()>;

    /// Begin playback.
    async fn play(&mut self) -> Result<()>;

    /// Decode the frame at the current position.
    async fn decode_frame(&mut self) -> Result<VideoFrame>;

    /// Release decoder resources. Idempotent.
    async fn close(&mut self);
}

/// Records a capture stream into encoded chunks.
#[async_trait]
pub trait Recorder: Send {
    /// The MIME type the recorder actually negotiated.
    fn mime_type(&self) -> &str;

    /// Audio tracks that end up in the output. Can be fewer than the
    /// stream carries when the container has no audio encoder.
    fn audio_tracks(&self) -> usize;

    fn state(&self) -> RecorderState;

    async fn start(&mut self) -> Result<()>;

    /// Push the current canvas contents as the next frame.
    async fn write_frame(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Finalize and return the emitted chunks in order.
    async fn stop(&mut self) -> Result<Vec<Bytes>>;

    /// Tear down without producing output. Idempotent.
    async fn abort(&mut self);
}

/// Routes a media element's audio into stream tracks.
#[async_trait]
pub trait AudioGraph: Send {
    /// Resume a suspended graph.
    async fn resume(&mut self) -> Result<()>;

    /// Connect `element` to a stream destination and return the tracks it
    /// produced. The graph takes ownership of the element.
    async fn connect(&mut self, element: Box<dyn MediaElement>) -> Result<Vec<AudioTrack>>;

    /// Dispose the graph and any connected element. Idempotent.
    async fn close(&mut self);
}
