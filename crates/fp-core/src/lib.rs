//! fp-core: shared types, errors, configuration, and the preset tables.
//!
//! This crate is the foundational dependency for all other fp-* crates,
//! providing the unified error type, media-domain types (container
//! families, MIME parsing, source and output blobs), the Preset Policy
//! Table with its bitrate bracket ladder, and application configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod media;
pub mod preset;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::JobId;
pub use media::*;
pub use preset::{
    BitrateBracket, BitrateCeiling, BitrateLadder, PresetProfile, PresetTable, QualityTier,
    TargetContainer, TierPresets,
};
