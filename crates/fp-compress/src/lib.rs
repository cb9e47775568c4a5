//! # fp-compress
//!
//! The adaptive compression engine.
//!
//! This crate provides:
//!
//! - **[`Compressor`]** -- the format-preservation orchestrator: passthrough
//!   short-circuit, then native, best-available and last-resort passes.
//! - **[`Reencoder`]** -- the seek/draw/capture/record frame loop with
//!   mid-stream recorder recovery.
//! - **[`resolve_recorder`]** -- the cascading recorder constraint resolver.
//! - **[`attach_audio`]** -- joins source audio onto a capture stream.
//! - **[`extract_thumbnail`]** -- letterboxed JPEG stills.
//! - **[`ProgressSender`]** / **[`ProgressTracker`]** -- progress reporting
//!   that stays monotonic across fallback passes.

pub mod audio;
pub mod orchestrator;
pub mod progress;
pub mod reencode;
pub mod request;
pub mod resolver;
pub mod result;
pub mod session;
pub mod thumbnail;

// Re-export key types at the crate root.
pub use audio::{attach_audio, AudioAttachment, AudioTimeouts};
pub use orchestrator::{Compressor, CompressorSettings, Pass};
pub use progress::{ProgressSender, ProgressTracker};
pub use reencode::{EncodePlan, Reencoder};
pub use request::CompressionRequest;
pub use resolver::{plan_attempts, resolve_recorder, Attempt, ResolveStrategy, ResolvedRecorder};
pub use result::{CompressionResult, EncodingSummary, Method};
pub use session::EncodingSession;
pub use thumbnail::{extract_thumbnail, ThumbnailOptions};
