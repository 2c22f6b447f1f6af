//! Domain logic for the reelsmith video-generation worker.
//!
//! Everything in this crate is free of network I/O: job parameter
//! validation, settings resolution, progress arithmetic, preview
//! encoding, and storage-key naming. The pipeline, cloud and worker
//! crates build on these types.

pub mod assets;
pub mod error;
pub mod job;
pub mod preview;
pub mod progress;
pub mod settings;
pub mod storage;
