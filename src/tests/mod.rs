//! Integration testing module
//!
//! End-to-end tests across sessions, the container layer and FFmpeg:
//! - Output invariance under arbitrary input/output chunking
//! - Granule bookkeeping and idempotent finish
//! - MP3 and Ogg/Vorbis encode, decoded back through a decode session
//! - Starved and failing media sources

pub mod fixtures;
