// src/lib.rs
//! GPS Tracker Library
//!
//! Records GPS sessions into GPX track files. Fixes from gpsd or a serial
//! NMEA receiver are buffered by a session recorder, flushed into the track
//! file periodically, and written out with any waypoints when the session
//! stops.

pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod gps;
pub mod monitor;
pub mod recorder;
pub mod storage;
pub mod track;

// Re-export main types for convenience
pub use error::{Result, TrackerError};
pub use gps::{Fix, GpsEvent, SatelliteSnapshot, SignalQuality, StepReading};
pub use monitor::{GpsMonitor, GpsSource};
pub use recorder::{RecorderHandle, RecorderService, RecorderState, SessionRecorder};
pub use storage::{FsStorage, MemoryStorage, TrackStorage};
