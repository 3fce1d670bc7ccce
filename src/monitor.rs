// src/monitor.rs
//! Position fix delivery from a GPS source into the recorder

use crate::{
    clock::{Clock, SystemClock},
    error::{Result, TrackerError},
    gps::{gpsd, nmea::NmeaParser, GpsEvent},
    recorder::RecorderEvent,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;

/// GPS data source configuration
#[derive(Debug, Clone, PartialEq)]
pub enum GpsSource {
    Serial { port: String, baudrate: u32 },
    Gpsd { host: String, port: u16 },
}

/// Whether the process may receive location data at all
pub trait LocationPermission: Send + Sync {
    fn has_location_permission(&self) -> bool;
}

impl<F> LocationPermission for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn has_location_permission(&self) -> bool {
        self()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

impl LocationPermission for AlwaysGranted {
    fn has_location_permission(&self) -> bool {
        true
    }
}

/// Reads a GPS source and forwards its events to the recorder task
pub struct GpsMonitor {
    permission: Arc<dyn LocationPermission>,
    running: Arc<AtomicBool>,
}

impl GpsMonitor {
    pub fn new(permission: Arc<dyn LocationPermission>) -> Self {
        Self {
            permission,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Start delivering events from `source` into `events`
    pub async fn start(&self, source: GpsSource, events: mpsc::Sender<RecorderEvent>) -> Result<JoinHandle<()>> {
        if !self.permission.has_location_permission() {
            return Err(TrackerError::PermissionDenied(format!(
                "location access not granted for {:?}",
                source
            )));
        }

        match source {
            GpsSource::Serial { port, baudrate } => self.connect_serial(&port, baudrate, events).await,
            GpsSource::Gpsd { host, port } => self.connect_gpsd(&host, port, events).await,
        }
    }

    /// Connect to a GPS device via serial port
    async fn connect_serial(
        &self,
        port: &str,
        baudrate: u32,
        events: mpsc::Sender<RecorderEvent>,
    ) -> Result<JoinHandle<()>> {
        log::info!("Connecting to GPS on {} at {} baud...", port, baudrate);

        let serial = tokio_serial::new(port, baudrate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| TrackerError::Connection(format!("Failed to open serial port {}: {}", port, e)))?;

        log::info!("Connected to {}", port);

        let mut parser = NmeaParser::new();
        Ok(self.spawn_reader(BufReader::new(serial), "serial port", events, move |line, _| {
            Ok(parser.parse_sentence(line))
        }))
    }

    /// Connect to gpsd daemon
    async fn connect_gpsd(&self, host: &str, port: u16, events: mpsc::Sender<RecorderEvent>) -> Result<JoinHandle<()>> {
        log::info!("Connecting to gpsd at {}:{}...", host, port);

        let reader = gpsd::connect_gpsd(host, port).await?;
        log::info!("Connected to gpsd");

        Ok(self.spawn_reader(reader, "gpsd", events, gpsd::parse_gpsd_json))
    }

    /// Read lines until EOF, an error, or [`GpsMonitor::stop`]
    fn spawn_reader<R, P>(
        &self,
        mut reader: R,
        name: &'static str,
        events: mpsc::Sender<RecorderEvent>,
        mut parse: P,
    ) -> JoinHandle<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        P: FnMut(&str, i64) -> Result<Option<GpsEvent>> + Send + 'static,
    {
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut line = String::new();

            while running.load(Ordering::Relaxed) {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        log::warn!("{} closed the connection", name);
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match parse(line, SystemClock.now_ms()) {
                            Ok(Some(event)) => {
                                if events.send(RecorderEvent::Gps(event)).await.is_err() {
                                    log::debug!("Recorder gone, stopping {} reader", name);
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => log::debug!("Skipping line from {}: {}", name, e),
                        }
                    }
                    Err(e) => {
                        log::error!("Error reading from {}: {}", name, e);
                        break;
                    }
                }
            }
        })
    }

    /// Stop the monitor
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Check if the monitor is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Default for GpsMonitor {
    fn default() -> Self {
        Self::new(Arc::new(AlwaysGranted))
    }
}

/// List available serial ports
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| TrackerError::Other(format!("Failed to list serial ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|port| format!("{} - {:?}", port.port_name, port.port_type))
        .collect())
}
