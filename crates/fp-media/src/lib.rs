//! Media runtime abstraction for framepress.
//!
//! The compression engine never touches a decoder or encoder directly.
//! It works against the [`MediaRuntime`] trait family, draws onto a
//! [`Canvas`], and records a [`CaptureStream`]. Two runtimes exist: the
//! ffmpeg-backed one in `fp-av`, and `sim::SimRuntime` here, a
//! deterministic stand-in for tests (enabled by the `sim` feature).

pub mod canvas;
pub mod runtime;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod stream;

pub use canvas::{Canvas, Smoothing, VideoFrame};
pub use runtime::{AudioGraph, MediaElement, MediaRuntime, Recorder};
pub use stream::{AudioTrack, CaptureStream, RecorderOptions, RecorderState, TrackOrigin};
