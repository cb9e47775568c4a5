//! framepress - adaptive video compression
//!
//! This library crate exposes the CLI's support modules for integration
//! testing. The engine itself lives in `fp-compress`.

pub mod report;
pub mod storage;
