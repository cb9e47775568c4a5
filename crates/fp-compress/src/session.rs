//! Per-call encoding state.

use bytes::{Bytes, BytesMut};
use fp_media::{AudioGraph, Canvas, CaptureStream, MediaElement, Recorder, RecorderState};

/// Everything one re-encode call holds open.
///
/// Exactly one session exists per call; [`EncodingSession::release`] must
/// run on every exit path.
pub struct EncodingSession {
    pub element: Box<dyn MediaElement>,
    pub canvas: Canvas,
    pub stream: CaptureStream,
    pub recorder: Option<Box<dyn Recorder>>,
    pub chunks: Vec<Bytes>,
    pub frame_count: u64,
    pub audio_graph: Option<Box<dyn AudioGraph>>,
    released: bool,
}

impl EncodingSession {
    pub fn new(element: Box<dyn MediaElement>, canvas: Canvas, stream: CaptureStream) -> Self {
        Self {
            element,
            canvas,
            stream,
            recorder: None,
            chunks: Vec::new(),
            frame_count: 0,
            audio_graph: None,
            released: false,
        }
    }

    /// Swap in a new recorder, aborting the previous one and dropping its
    /// chunks.
    pub async fn replace_recorder(&mut self, recorder: Box<dyn Recorder>) {
        if let Some(mut old) = self.recorder.replace(recorder) {
            old.abort().await;
        }
        self.chunks.clear();
        self.frame_count = 0;
    }

    /// Total bytes of the collected chunks.
    pub fn output_len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Concatenate the collected chunks in order.
    pub fn take_output(&mut self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.output_len());
        for chunk in self.chunks.drain(..) {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Abort a still-active recorder, then close the element and the audio
    /// graph. Idempotent.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        if let Some(mut recorder) = self.recorder.take() {
            if recorder.state() != RecorderState::Stopped {
                recorder.abort().await;
            }
        }
        self.element.close().await;
        if let Some(mut graph) = self.audio_graph.take() {
            graph.close().await;
        }
        self.released = true;
        tracing::trace!(frames = self.frame_count, "encoding session released");
    }
}
