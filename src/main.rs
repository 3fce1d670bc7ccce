// src/main.rs
//! GPS Tracker - record GPS sessions as GPX tracks

use anyhow::Context;
use clap::Parser;
use gps_tracker::{
    config::TrackerConfig,
    display::{self, SessionSettings, TerminalDisplay},
    monitor::{self, AlwaysGranted, GpsMonitor, GpsSource, LocationPermission},
    FsStorage, RecorderService, SessionRecorder,
};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "gps-tracker", version, about = "Record GPS sessions as GPX track files")]
struct Cli {
    /// GPS source to read from
    #[arg(long, value_parser = ["gpsd", "serial"])]
    source: Option<String>,

    /// Serial device for the NMEA receiver
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// gpsd host
    #[arg(long)]
    host: Option<String>,

    /// gpsd port
    #[arg(long)]
    gpsd_port: Option<u16>,

    /// Directory for track files
    #[arg(long)]
    dir: Option<String>,

    /// Seconds between periodic flushes; a value that is not a number is ignored
    #[arg(long)]
    interval: Option<String>,

    /// Start recording immediately
    #[arg(long)]
    record: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Persist the effective settings to the config file
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut TrackerConfig) {
        if let Some(source) = &self.source {
            config.source_type = source.clone();
        }
        if let Some(port) = &self.port {
            config.update_serial(port.clone(), self.baud.or(config.serial_baudrate).unwrap_or(9600));
        } else if let Some(baud) = self.baud {
            config.serial_baudrate = Some(baud);
        }
        if self.host.is_some() || self.gpsd_port.is_some() {
            let host = self
                .host
                .clone()
                .or_else(|| config.gpsd_host.clone())
                .unwrap_or_else(|| "localhost".to_string());
            let port = self.gpsd_port.or(config.gpsd_port).unwrap_or(2947);
            config.update_gpsd(host, port);
        }
        config.apply_settings_input(
            self.dir.as_deref().unwrap_or_default(),
            self.interval.as_deref().unwrap_or_default(),
        );
    }
}

fn permission_for(source: &GpsSource) -> Arc<dyn LocationPermission> {
    match source {
        GpsSource::Serial { port, .. } => {
            let port = port.clone();
            Arc::new(move || std::fs::OpenOptions::new().read(true).open(&port).is_ok())
        }
        GpsSource::Gpsd { .. } => Arc::new(AlwaysGranted),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let interactive = display::should_use_terminal();
    let default_filter = if interactive { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let cli = Cli::parse();

    if cli.list_ports {
        let ports = monitor::list_serial_ports()?;
        if ports.is_empty() {
            println!("No serial ports found.");
        } else {
            println!("Available serial ports:");
            for port in ports {
                println!("  {}", port);
            }
        }
        return Ok(());
    }

    let mut config = TrackerConfig::load().unwrap_or_else(|e| {
        log::warn!("Using default configuration: {}", e);
        TrackerConfig::default()
    });
    cli.apply(&mut config);

    if cli.save_config {
        config.save().context("saving configuration")?;
    }

    let source = config.gps_source()?;
    let settings = SessionSettings {
        target_dir: Some(config.track_dir()?),
        flush_interval_secs: config.save_interval_seconds,
    };

    let (handle, service) = RecorderService::spawn(SessionRecorder::with_system_clock(), Arc::new(FsStorage));

    let gps = GpsMonitor::new(permission_for(&source));
    let reader = gps
        .start(source, handle.sender())
        .await
        .context("starting GPS source")?;

    if cli.record || !interactive {
        handle
            .start_recording(settings.target_dir.clone(), settings.flush_interval_secs)
            .await?;
    }

    if interactive {
        TerminalDisplay::new(settings).run(handle.clone()).await?;
    } else {
        log::info!("Recording, press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
    }

    gps.stop();
    reader.abort();
    handle.shutdown().await?;
    service.await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_settings_go_through_settings_input() {
        let mut config = TrackerConfig::default();
        config.storage_dir = "/data/tracks".to_string();

        Cli::parse_from(["gps-tracker", "--interval", "60"]).apply(&mut config);
        assert_eq!(config.storage_dir, "/data/tracks");
        assert_eq!(config.save_interval_seconds, 60);

        Cli::parse_from(["gps-tracker", "--dir", "/mnt/sd", "--interval", "soon"]).apply(&mut config);
        assert_eq!(config.storage_dir, "/mnt/sd");
        assert_eq!(config.save_interval_seconds, 60);
    }

    #[test]
    fn test_cli_serial_port_switches_source() {
        let mut config = TrackerConfig::default();
        Cli::parse_from(["gps-tracker", "--port", "/dev/ttyUSB0", "--baud", "4800"]).apply(&mut config);
        assert_eq!(
            config.gps_source().unwrap(),
            GpsSource::Serial {
                port: "/dev/ttyUSB0".to_string(),
                baudrate: 4800
            }
        );
    }
}
