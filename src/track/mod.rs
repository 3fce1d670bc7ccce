// src/track/mod.rs
//! Track buffering and GPX persistence

pub mod buffer;
pub mod gpx;
pub mod job;

pub use buffer::TrackBuffer;
pub use job::{WriteJob, WriteKind};
