// src/gps/mod.rs
//! GPS data handling and parsing

pub mod data;
pub mod gpsd;
pub mod nmea;

pub use data::{Fix, GpsEvent, SatelliteSnapshot, SatelliteStatus, SignalQuality, StepReading};
