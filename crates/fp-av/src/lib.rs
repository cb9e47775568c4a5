//! # fp-av
//!
//! ffmpeg-backed media runtime for framepress.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder for short runs
//!   with a timeout, and piped spawning for long-lived processes.
//! - **Metadata** ([`FfprobeProber`]) -- ffprobe JSON into
//!   [`fp_core::MediaMetadata`].
//! - **Capabilities** ([`Capabilities`]) -- which recorder MIME types the
//!   local ffmpeg build can encode.
//! - **Runtime** ([`FfmpegRuntime`]) -- the [`fp_media::MediaRuntime`]
//!   implementation: piped RGBA decoding and encoding.

pub mod capabilities;
pub mod command;
pub mod probe;
pub mod recorder;
pub mod runtime;
pub mod source;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use capabilities::{Capabilities, EncoderChoice};
pub use command::{ToolCommand, ToolOutput};
pub use probe::FfprobeProber;
pub use recorder::{EncoderSpec, FfmpegRecorder};
pub use runtime::{FfmpegAudioGraph, FfmpegRuntime};
pub use source::FfmpegElement;
pub use tools::{ToolInfo, ToolRegistry};
pub use workspace::Workspace;
