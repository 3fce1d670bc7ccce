// src/gps/gpsd.rs
//! GPSD client implementation

use super::data::{Fix, GpsEvent, SatelliteSnapshot, SatelliteStatus};
use crate::error::{Result, TrackerError};
use chrono::DateTime;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
};

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| TrackerError::Connection(format!("Failed to connect to gpsd at {}:{}: {}", host, port, e)))?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| TrackerError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON data.
///
/// `received_ms` stamps fixes whose TPV report carries no usable time.
pub fn parse_gpsd_json(line: &str, received_ms: i64) -> Result<Option<GpsEvent>> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| TrackerError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    let event = match msg.class.as_str() {
        "TPV" => parse_tpv_message(&msg.data, received_ms).map(GpsEvent::Fix),
        "SKY" => parse_sky_message(&msg.data).map(GpsEvent::Satellites),
        "VERSION" => {
            parse_version_message(&msg.data);
            None
        }
        "DEVICES" => {
            parse_devices_message(&msg.data);
            None
        }
        _ => None,
    };

    Ok(event)
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(msg_data: &HashMap<String, serde_json::Value>, received_ms: i64) -> Option<Fix> {
    // mode 0/1 means no fix yet
    let mode = msg_data.get("mode").and_then(|v| v.as_u64()).unwrap_or(0);
    if mode < 2 {
        return None;
    }

    let lat = msg_data.get("lat").and_then(|v| v.as_f64())?;
    let lon = msg_data.get("lon").and_then(|v| v.as_f64())?;

    let timestamp_ms = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.timestamp_millis())
        .unwrap_or(received_ms);

    let mut fix = Fix::new(lat, lon, timestamp_ms);

    // gpsd 3.20+ reports altHAE, older versions only alt
    fix.altitude = msg_data
        .get("altHAE")
        .or_else(|| msg_data.get("alt"))
        .and_then(|v| v.as_f64());

    // Already m/s
    fix.speed = msg_data.get("speed").and_then(|v| v.as_f64());

    Some(fix)
}

/// Parse SKY (satellite data) message
fn parse_sky_message(msg_data: &HashMap<String, serde_json::Value>) -> Option<SatelliteSnapshot> {
    let satellites = msg_data.get("satellites").and_then(|v| v.as_array())?;

    let statuses = satellites
        .iter()
        .filter_map(|sat_value| sat_value.as_object())
        .filter_map(|sat_obj| {
            let prn = sat_obj.get("PRN").and_then(|v| v.as_u64())?;
            let cn0 = sat_obj.get("ss").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let used = sat_obj.get("used").and_then(|v| v.as_bool()).unwrap_or(false);
            Some(SatelliteStatus::new(used, cn0 as f32).with_prn(prn as u16))
        })
        .collect();

    Some(SatelliteSnapshot::new(statuses))
}

/// Parse VERSION message (informational)
fn parse_version_message(msg_data: &HashMap<String, serde_json::Value>) {
    if let Some(version) = msg_data.get("release").and_then(|v| v.as_str()) {
        log::info!("Connected to gpsd version: {}", version);
    }
}

/// Parse DEVICES message (informational)
fn parse_devices_message(msg_data: &HashMap<String, serde_json::Value>) {
    if let Some(devices) = msg_data.get("devices").and_then(|v| v.as_array()) {
        log::info!("gpsd managing {} device(s)", devices.len());
        for device in devices {
            if let Some(path) = device.get("path").and_then(|v| v.as_str()) {
                log::debug!("  Device: {}", path);
            }
        }
    }
}
