// src/gps/nmea.rs
//! NMEA sentence parsing
//!
//! Sentences arrive one at a time, so the parser keeps a little state
//! between them: GGA altitude is attached to the next RMC fix, GSA marks
//! which satellites are used, and GSV groups are collected until the last
//! message of a group arrives.

use super::data::{Fix, GpsEvent, SatelliteSnapshot, SatelliteStatus};
use chrono::{NaiveDate, NaiveTime};
use std::collections::{BTreeMap, HashSet};

const KNOTS_TO_MPS: f64 = 0.514_444;

#[derive(Debug, Default)]
pub struct NmeaParser {
    altitude: Option<f64>,
    used_prns: HashSet<u16>,
    // Satellites in view per talker ("GP", "GL", ...)
    in_view: BTreeMap<String, Vec<SatelliteStatus>>,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single NMEA sentence, returning an event once one is complete
    pub fn parse_sentence(&mut self, line: &str) -> Option<GpsEvent> {
        let line = line.trim();
        if !line.starts_with('$') || line.len() < 6 || !line.is_ascii() {
            return None;
        }

        // Drop the checksum so the last field parses cleanly
        let body = line.split('*').next().unwrap_or(line);
        let parts: Vec<&str> = body.split(',').collect();
        let talker = &line[1..3];

        match &line[3..6] {
            "GGA" => {
                self.parse_gga(&parts);
                None
            }
            "RMC" => self.parse_rmc(&parts).map(GpsEvent::Fix),
            "GSA" => {
                self.parse_gsa(&parts);
                None
            }
            "GSV" => self.parse_gsv(talker, &parts).map(GpsEvent::Satellites),
            _ => None,
        }
    }

    /// Parse GGA (Global Positioning System Fix Data) sentence
    fn parse_gga(&mut self, parts: &[&str]) {
        if parts.len() < 10 {
            return;
        }

        // Fix quality 0 means the altitude field is stale
        if parts[6].is_empty() || parts[6] == "0" {
            self.altitude = None;
            return;
        }

        // Altitude (field 9)
        self.altitude = parts[9].parse::<f64>().ok();
    }

    /// Parse RMC (Recommended Minimum Course) sentence
    fn parse_rmc(&mut self, parts: &[&str]) -> Option<Fix> {
        if parts.len() < 10 {
            return None;
        }

        // Status (field 2): A = valid, V = warning
        if parts[2] != "A" {
            return None;
        }

        let latitude = parse_coordinate(parts[3], parts[4], "S")?;
        let longitude = parse_coordinate(parts[5], parts[6], "W")?;
        let timestamp_ms = parse_timestamp(parts[1], parts[9])?;

        let mut fix = Fix::new(latitude, longitude, timestamp_ms);
        fix.altitude = self.altitude;

        // Speed over ground in knots (field 7)
        fix.speed = parts[7].parse::<f64>().ok().map(|knots| knots * KNOTS_TO_MPS);

        Some(fix)
    }

    /// Parse GSA (DOP and active satellites) sentence
    fn parse_gsa(&mut self, parts: &[&str]) {
        if parts.len() < 15 {
            return;
        }

        // Satellite IDs used in the fix (fields 3-14)
        self.used_prns = parts[3..15]
            .iter()
            .filter_map(|field| field.parse::<u16>().ok())
            .collect();
    }

    /// Parse GSV (Satellites in View) sentence
    fn parse_gsv(&mut self, talker: &str, parts: &[&str]) -> Option<SatelliteSnapshot> {
        if parts.len() < 4 {
            return None;
        }

        let total_messages = parts[1].parse::<u8>().unwrap_or(0);
        let message_num = parts[2].parse::<u8>().unwrap_or(0);

        let satellites = self.in_view.entry(talker.to_string()).or_default();

        // If this is the first message, clear existing satellites for this talker
        if message_num == 1 {
            satellites.clear();
        }

        // Up to 4 satellites per message, 4 fields each
        let mut sat_index = 4;
        while sat_index < parts.len() {
            if let Ok(prn) = parts[sat_index].parse::<u16>() {
                // SNR may be empty when the satellite is not tracked
                let cn0 = parts
                    .get(sat_index + 3)
                    .and_then(|snr| snr.parse::<f32>().ok())
                    .unwrap_or(0.0);
                satellites.push(SatelliteStatus::new(false, cn0).with_prn(prn));
            }

            sat_index += 4;
        }

        if message_num == 0 || message_num != total_messages {
            return None;
        }

        let snapshot = self
            .in_view
            .values()
            .flatten()
            .map(|sat| SatelliteStatus {
                used_in_fix: self.used_prns.contains(&sat.prn),
                ..sat.clone()
            })
            .collect();

        Some(SatelliteSnapshot::new(snapshot))
    }
}

/// Convert `ddmm.mmmm` plus hemisphere into signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, negative: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }

    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let coord = degrees + minutes / 60.0;

    Some(if hemisphere == negative { -coord } else { coord })
}

/// Combine RMC `hhmmss.ss` and `ddmmyy` fields into epoch milliseconds
fn parse_timestamp(time: &str, date: &str) -> Option<i64> {
    if date.len() != 6 || time.len() < 6 {
        return None;
    }

    let day = date[0..2].parse::<u32>().ok()?;
    let month = date[2..4].parse::<u32>().ok()?;
    let yy = date[4..6].parse::<i32>().ok()?;
    let year = if yy >= 80 { 1900 + yy } else { 2000 + yy };

    let hour = time[0..2].parse::<u32>().ok()?;
    let minute = time[2..4].parse::<u32>().ok()?;
    let seconds = time[4..].parse::<f64>().ok()?;
    let millis = (seconds.fract() * 1000.0).round() as u32;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_milli_opt(hour, minute, seconds.trunc() as u32, millis)?;

    Some(date.and_time(time).and_utc().timestamp_millis())
}
