// src/gps/data.rs
//! Position fixes and the other samples delivered by GPS collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One observed position sample.
///
/// Altitude and speed may be unknown; the track writer renders a missing
/// value as zero. Coordinates are not range-checked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>, // meters
    pub speed: Option<f64>,    // m/s
    pub timestamp_ms: i64,     // milliseconds since the Unix epoch
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            speed: None,
            timestamp_ms,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn altitude_or_zero(&self) -> f64 {
        self.altitude.unwrap_or(0.0)
    }

    pub fn speed_or_zero(&self) -> f64 {
        self.speed.unwrap_or(0.0)
    }

    /// Timestamp as a UTC date, if it is within chrono's range
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// Format coordinate for display
    pub fn format_coordinate(coord: f64) -> String {
        format!("{:>12.6}°", coord)
    }
}

/// Per-satellite status reported by the receiver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SatelliteStatus {
    pub prn: u16,
    pub used_in_fix: bool,
    pub cn0: f32, // carrier-to-noise density, dB-Hz
}

impl SatelliteStatus {
    pub fn new(used_in_fix: bool, cn0: f32) -> Self {
        Self {
            prn: 0,
            used_in_fix,
            cn0,
        }
    }

    pub fn with_prn(mut self, prn: u16) -> Self {
        self.prn = prn;
        self
    }
}

/// All satellites reported for one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SatelliteSnapshot {
    pub satellites: Vec<SatelliteStatus>,
}

impl SatelliteSnapshot {
    pub fn new(satellites: Vec<SatelliteStatus>) -> Self {
        Self { satellites }
    }

    pub fn satellite_count(&self) -> usize {
        self.satellites.len()
    }

    pub fn used_count(&self) -> usize {
        self.satellites.iter().filter(|sat| sat.used_in_fix).count()
    }

    /// Mean C/N0 over satellites used in the fix, or 0 when none are used
    pub fn average_cn0(&self) -> f32 {
        let (count, total) = self
            .satellites
            .iter()
            .filter(|sat| sat.used_in_fix)
            .fold((0usize, 0f32), |(count, total), sat| (count + 1, total + sat.cn0));

        if count > 0 {
            total / count as f32
        } else {
            0.0
        }
    }

    pub fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from_average_cn0(self.average_cn0())
    }
}

/// Coarse signal-quality band derived from the average C/N0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalQuality {
    NoSignal,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl SignalQuality {
    pub fn from_average_cn0(avg_cn0: f32) -> Self {
        match avg_cn0 {
            avg if avg >= 40.0 => SignalQuality::Excellent,
            avg if avg >= 30.0 => SignalQuality::Good,
            avg if avg >= 20.0 => SignalQuality::Fair,
            avg if avg > 0.0 => SignalQuality::Poor,
            _ => SignalQuality::NoSignal,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SignalQuality::Excellent => "Excellent",
            SignalQuality::Good => "Good",
            SignalQuality::Fair => "Fair",
            SignalQuality::Poor => "Poor",
            SignalQuality::NoSignal => "No Signal",
        }
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cumulative step-counter value as reported by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReading(pub i64);

/// Samples delivered by the position, GNSS-status and step collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum GpsEvent {
    Fix(Fix),
    Satellites(SatelliteSnapshot),
    Steps(StepReading),
}
