// src/recorder/mod.rs
//! Session recording state machine
//!
//! `SessionRecorder` owns the active session and decides when buffered
//! fixes should be written. It never touches storage itself: writes come
//! back as [`WriteJob`]s for the caller to run, and the outcome is handed
//! back through [`SessionRecorder::complete_write`]. [`service`] wraps it
//! in a tokio task that does exactly that.

pub mod service;

use crate::{
    clock::{Clock, SystemClock},
    error::Result,
    gps::{Fix, GpsEvent, SatelliteSnapshot, SignalQuality, StepReading},
    storage::TrackStorage,
    track::{gpx, TrackBuffer, WriteJob, WriteKind},
};
use std::path::PathBuf;

pub use service::{RecorderEvent, RecorderHandle, RecorderService};

/// Flush interval used when the configuration does not set one
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 300;

/// Everything the UI layer can observe about the recorder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderState {
    pub recording: bool,
    pub elapsed_seconds: u64,
    pub steps: i64,
    pub signal_quality: Option<SignalQuality>,
    pub satellite_count: usize,
    pub current_position: Option<Fix>,
    pub buffered_fixes: usize,
    /// A periodic flush has been issued and not yet reported back
    pub saving: bool,
    pub waypoint_count: usize,
    pub track_file: Option<String>,
}

impl RecorderState {
    pub fn signal_label(&self) -> &'static str {
        self.signal_quality.map_or("N/A", |quality| quality.label())
    }

    pub fn format_elapsed(&self) -> String {
        let hours = self.elapsed_seconds / 3600;
        let minutes = (self.elapsed_seconds % 3600) / 60;
        let seconds = self.elapsed_seconds % 60;
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

#[derive(Debug)]
struct Session {
    start_ms: i64,
    target_dir: Option<PathBuf>,
    flush_interval_ms: i64,
    last_flush_ms: i64,
    buffer: TrackBuffer,
    waypoints: Vec<Fix>,
    initial_steps: Option<i64>,
    flush_in_flight: bool,
}

impl Session {
    fn file_name(&self, now_ms: i64) -> String {
        gpx::track_file_name(self.start_ms, now_ms)
    }
}

pub struct SessionRecorder<C: Clock = SystemClock> {
    clock: C,
    session: Option<Session>,
    state: RecorderState,
}

impl SessionRecorder<SystemClock> {
    pub fn with_system_clock() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> SessionRecorder<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            session: None,
            state: RecorderState::default(),
        }
    }

    pub fn state(&self) -> &RecorderState {
        &self.state
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Fixes waiting for the next flush, if recording
    pub fn buffer(&self) -> Option<&TrackBuffer> {
        self.session.as_ref().map(|session| &session.buffer)
    }

    pub fn waypoints(&self) -> &[Fix] {
        self.session
            .as_ref()
            .map_or(&[][..], |session| session.waypoints.as_slice())
    }

    pub fn flush_in_flight(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.flush_in_flight)
    }

    /// Begin a session writing to `target_dir`; `None` records without saving
    pub fn start_recording(&mut self, target_dir: Option<PathBuf>, flush_interval_secs: u64) {
        if self.session.is_some() {
            log::warn!("Recording already in progress, ignoring start request");
            return;
        }

        let start_ms = self.clock.now_ms();
        let session = Session {
            start_ms,
            target_dir,
            flush_interval_ms: i64::try_from(flush_interval_secs)
                .unwrap_or(i64::MAX)
                .saturating_mul(1000),
            last_flush_ms: start_ms,
            buffer: TrackBuffer::new(),
            waypoints: Vec::new(),
            initial_steps: None,
            flush_in_flight: false,
        };

        self.state.recording = true;
        self.state.steps = 0;
        self.state.elapsed_seconds = 0;
        self.state.track_file = (start_ms > 0).then(|| session.file_name(start_ms));

        log::info!(
            "Recording started (flush every {}s, target {})",
            flush_interval_secs,
            session
                .target_dir
                .as_ref()
                .map_or_else(|| "<none>".to_string(), |dir| dir.display().to_string())
        );

        self.session = Some(session);
        self.refresh_counts();
    }

    /// Record a new position; returns a flush job when one is due
    pub fn update_location(&mut self, fix: Fix) -> Option<WriteJob> {
        self.state.current_position = Some(fix);

        let now_ms = self.clock.now_ms();
        let session = self.session.as_mut()?;
        session.buffer.append(fix);

        let due = now_ms - session.last_flush_ms >= session.flush_interval_ms;
        let job = match &session.target_dir {
            Some(dir) if due && !session.buffer.is_empty() && !session.flush_in_flight => {
                session.flush_in_flight = true;
                session.last_flush_ms = now_ms;
                Some(WriteJob {
                    dir: dir.clone(),
                    file_name: session.file_name(now_ms),
                    kind: WriteKind::Append(session.buffer.drain()),
                })
            }
            _ => None,
        };

        self.refresh_counts();
        job
    }

    /// Report how a job returned by this recorder went.
    ///
    /// A failed flush puts its fixes back at the front of the buffer so the
    /// next flush retries them.
    pub fn complete_write(&mut self, job: WriteJob, outcome: Result<()>) {
        let path = job.path();

        match (job.kind, outcome) {
            (WriteKind::Append(_), Ok(())) => {
                if let Some(session) = self.session.as_mut() {
                    session.flush_in_flight = false;
                }
            }
            (WriteKind::Append(fixes), Err(e)) => match self.session.as_mut() {
                Some(session) => {
                    log::warn!(
                        "Flush to {} failed, keeping {} point(s) for retry: {}",
                        path.display(),
                        fixes.len(),
                        e
                    );
                    session.flush_in_flight = false;
                    session.buffer.requeue(fixes);
                }
                None => log::error!(
                    "Flush to {} failed after recording stopped, {} point(s) lost: {}",
                    path.display(),
                    fixes.len(),
                    e
                ),
            },
            (WriteKind::Replace(_), Ok(())) => {}
            (WriteKind::Replace(_), Err(e)) => {
                log::error!("Failed to write track {}, unsaved points lost: {}", path.display(), e);
            }
        }

        self.refresh_counts();
    }

    /// Run a job synchronously against `storage` and record the outcome
    pub fn write_now<S: TrackStorage + ?Sized>(&mut self, job: WriteJob, storage: &S) {
        let outcome = job.run(storage);
        self.complete_write(job, outcome);
    }

    /// Mark a waypoint; ignored unless recording
    pub fn add_waypoint(&mut self, fix: Fix) -> bool {
        let Some(session) = self.session.as_mut() else {
            log::debug!("Ignoring waypoint while not recording");
            return false;
        };

        session.waypoints.push(fix);
        log::info!("Waypoint saved ({:.6}, {:.6})", fix.latitude, fix.longitude);
        self.refresh_counts();
        true
    }

    /// End the session; returns the final write if unsaved fixes remain
    pub fn stop_recording(&mut self) -> Option<WriteJob> {
        let mut session = self.session.take()?;
        let now_ms = self.clock.now_ms();

        self.state.recording = false;
        self.state.track_file = None;
        self.refresh_counts();

        if session.flush_in_flight {
            log::warn!("Stopping while a flush is still in flight");
        }

        if session.buffer.is_empty() {
            log::info!("Recording stopped, nothing left to write");
            return None;
        }

        let fixes = session.buffer.drain();
        let Some(dir) = session.target_dir.take() else {
            log::warn!("Recording stopped without a target directory, {} point(s) discarded", fixes.len());
            return None;
        };

        log::info!(
            "Recording stopped, writing {} point(s) and {} waypoint(s)",
            fixes.len(),
            session.waypoints.len()
        );

        Some(WriteJob {
            dir,
            file_name: session.file_name(now_ms),
            kind: WriteKind::Replace(gpx::render(&fixes, &session.waypoints)),
        })
    }

    /// One second of recording time has passed
    pub fn tick(&mut self) {
        if self.session.is_some() {
            self.state.elapsed_seconds += 1;
        }
    }

    pub fn update_steps(&mut self, reading: StepReading) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let baseline = *session.initial_steps.get_or_insert(reading.0);
        self.state.steps = reading.0 - baseline;
    }

    pub fn update_satellites(&mut self, snapshot: &SatelliteSnapshot) {
        self.state.satellite_count = snapshot.satellite_count();
        self.state.signal_quality = Some(snapshot.signal_quality());
    }

    /// Dispatch an event from one of the GPS collaborators
    pub fn handle_gps_event(&mut self, event: GpsEvent) -> Option<WriteJob> {
        match event {
            GpsEvent::Fix(fix) => self.update_location(fix),
            GpsEvent::Satellites(snapshot) => {
                self.update_satellites(&snapshot);
                None
            }
            GpsEvent::Steps(reading) => {
                self.update_steps(reading);
                None
            }
        }
    }

    fn refresh_counts(&mut self) {
        self.state.buffered_fixes = self.session.as_ref().map_or(0, |s| s.buffer.len());
        self.state.saving = self.flush_in_flight();
        self.state.waypoint_count = self.session.as_ref().map_or(0, |s| s.waypoints.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::gps::SatelliteStatus;
    use crate::storage::MemoryStorage;
    use std::path::Path;
    use std::time::Duration;

    // 2023-11-14T22:13:20Z
    const T0: i64 = 1_700_000_000_000;
    const TRACK_FILE: &str = "/tracks/2023-11-14-221320.gpx";

    fn fix(n: i64) -> Fix {
        Fix::new(48.0 + n as f64 * 0.001, 11.0, T0 + n * 1_000).with_altitude(500.0)
    }

    fn recorder() -> (SessionRecorder<ManualClock>, ManualClock) {
        let clock = ManualClock::new(T0);
        (SessionRecorder::new(clock.clone()), clock)
    }

    fn buffered(recorder: &SessionRecorder<ManualClock>) -> Vec<Fix> {
        recorder.buffer().map(|b| b.iter().copied().collect()).unwrap_or_default()
    }

    #[test]
    fn test_buffer_holds_fixes_in_call_order() {
        let (mut recorder, clock) = recorder();
        recorder.start_recording(Some(PathBuf::from("/tracks")), 300);

        let fixes: Vec<Fix> = (0..20).map(fix).collect();
        for f in &fixes {
            clock.advance(Duration::from_secs(1));
            assert!(recorder.update_location(*f).is_none());
        }

        assert_eq!(buffered(&recorder), fixes);
        assert_eq!(recorder.state().buffered_fixes, 20);
        assert_eq!(recorder.state().current_position, Some(fixes[19]));
    }

    #[test]
    fn test_stop_writes_single_file_without_waypoints() {
        let (mut recorder, clock) = recorder();
        let storage = MemoryStorage::new();
        recorder.start_recording(Some(PathBuf::from("/tracks")), 300);

        assert!(recorder.update_location(fix(1)).is_none());
        clock.advance(Duration::from_secs(10));
        assert!(recorder.update_location(fix(2)).is_none());
        clock.advance(Duration::from_secs(10));

        let job = recorder.stop_recording().expect("final write");
        recorder.write_now(job, &storage);

        assert_eq!(storage.write_count(), 1);
        let doc = storage.file(Path::new(TRACK_FILE)).unwrap();
        assert_eq!(doc, gpx::render(&[fix(1), fix(2)], &[]));
        assert!(!doc.contains("<wpt"));
        assert!(recorder.buffer().is_none());
        assert_eq!(recorder.state().buffered_fixes, 0);
        assert!(!recorder.state().recording);
    }

    #[test]
    fn test_flush_after_interval() {
        let (mut recorder, clock) = recorder();
        let storage = MemoryStorage::new();
        recorder.start_recording(Some(PathBuf::from("/tracks")), 1);

        assert!(recorder.update_location(fix(1)).is_none());
        clock.advance(Duration::from_millis(1_500));

        let job = recorder.update_location(fix(2)).expect("flush due");
        assert_eq!(job.kind, WriteKind::Append(vec![fix(1), fix(2)]));
        assert!(recorder.flush_in_flight());
        recorder.write_now(job, &storage);

        assert!(!recorder.flush_in_flight());
        assert!(recorder.buffer().unwrap().is_empty());
        assert_eq!(
            storage.file(Path::new(TRACK_FILE)),
            Some(gpx::render(&[fix(1), fix(2)], &[]))
        );

        // Nothing buffered, so stopping writes nothing
        assert!(recorder.stop_recording().is_none());
        assert_eq!(storage.write_count(), 1);
    }

    #[test]
    fn test_successive_flushes_append_to_same_file() {
        let (mut recorder, clock) = recorder();
        let storage = MemoryStorage::new();
        recorder.start_recording(Some(PathBuf::from("/tracks")), 1);

        for n in 1..=4 {
            clock.advance(Duration::from_secs(1));
            let job = recorder.update_location(fix(n)).expect("flush due");
            recorder.write_now(job, &storage);
        }

        assert_eq!(storage.file_names().len(), 1);
        assert_eq!(
            storage.file(Path::new(TRACK_FILE)),
            Some(gpx::render(&[fix(1), fix(2), fix(3), fix(4)], &[]))
        );
    }

    #[test]
    fn test_failed_flush_keeps_fixes() {
        let (mut recorder, clock) = recorder();
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        recorder.start_recording(Some(PathBuf::from("/tracks")), 1);

        recorder.update_location(fix(1));
        clock.advance(Duration::from_secs(1));
        let job = recorder.update_location(fix(2)).expect("flush due");

        // A second flush is never issued while one is outstanding
        clock.advance(Duration::from_secs(5));
        assert!(recorder.update_location(fix(3)).is_none());

        recorder.write_now(job, &storage);
        assert_eq!(storage.write_count(), 0);
        assert_eq!(buffered(&recorder), vec![fix(1), fix(2), fix(3)]);

        storage.set_fail_writes(false);
        clock.advance(Duration::from_secs(1));
        let job = recorder.update_location(fix(4)).expect("retry flush");
        recorder.write_now(job, &storage);

        assert!(recorder.buffer().unwrap().is_empty());
        assert_eq!(
            storage.file(Path::new(TRACK_FILE)),
            Some(gpx::render(&[fix(1), fix(2), fix(3), fix(4)], &[]))
        );
    }

    #[test]
    fn test_huge_interval_never_flushes() {
        let (mut recorder, clock) = recorder();
        recorder.start_recording(Some(PathBuf::from("/tracks")), u64::MAX);

        assert!(recorder.update_location(fix(1)).is_none());
        clock.advance(Duration::from_secs(86_400 * 365));
        assert!(recorder.update_location(fix(2)).is_none());
        assert_eq!(recorder.state().buffered_fixes, 2);
    }

    #[test]
    fn test_saving_tracks_outstanding_flush() {
        let (mut recorder, clock) = recorder();
        let storage = MemoryStorage::new();
        recorder.start_recording(Some(PathBuf::from("/tracks")), 1);
        assert!(!recorder.state().saving);

        clock.advance(Duration::from_secs(1));
        let job = recorder.update_location(fix(1)).expect("flush due");
        assert!(recorder.state().saving);

        recorder.write_now(job, &storage);
        assert!(!recorder.state().saving);
    }

    #[test]
    fn test_no_flush_without_target_dir() {
        let (mut recorder, clock) = recorder();
        recorder.start_recording(None, 1);

        recorder.update_location(fix(1));
        clock.advance(Duration::from_secs(10));
        assert!(recorder.update_location(fix(2)).is_none());
        assert_eq!(recorder.state().buffered_fixes, 2);
        assert!(recorder.stop_recording().is_none());
    }

    #[test]
    fn test_waypoints_written_only_at_stop() {
        let (mut recorder, clock) = recorder();
        let storage = MemoryStorage::new();
        recorder.start_recording(Some(PathBuf::from("/tracks")), 1);

        recorder.update_location(fix(1));
        assert!(recorder.add_waypoint(fix(1)));
        clock.advance(Duration::from_secs(1));
        let job = recorder.update_location(fix(2)).expect("flush due");
        recorder.write_now(job, &storage);

        let flushed = storage.file(Path::new(TRACK_FILE)).unwrap();
        assert!(!flushed.contains("<wpt"));

        recorder.update_location(fix(3));
        assert_eq!(recorder.waypoints(), &[fix(1)]);
        let job = recorder.stop_recording().expect("final write");
        recorder.write_now(job, &storage);

        // The final write replaces the file with the unflushed tail and waypoints
        let doc = storage.file(Path::new(TRACK_FILE)).unwrap();
        assert_eq!(doc, gpx::render(&[fix(3)], &[fix(1)]));
        assert!(recorder.waypoints().is_empty());
    }

    #[test]
    fn test_waypoint_ignored_when_idle() {
        let (mut recorder, _clock) = recorder();
        assert!(!recorder.add_waypoint(fix(1)));
        assert_eq!(recorder.state().waypoint_count, 0);
    }

    #[test]
    fn test_location_updates_position_when_idle() {
        let (mut recorder, _clock) = recorder();
        assert!(recorder.update_location(fix(1)).is_none());
        assert_eq!(recorder.state().current_position, Some(fix(1)));
        assert!(recorder.buffer().is_none());
    }

    #[test]
    fn test_step_baseline() {
        let (mut recorder, _clock) = recorder();
        recorder.start_recording(None, 300);

        recorder.update_steps(StepReading(100));
        assert_eq!(recorder.state().steps, 0);
        recorder.update_steps(StepReading(107));
        assert_eq!(recorder.state().steps, 7);

        recorder.stop_recording();
        recorder.update_steps(StepReading(150));
        assert_eq!(recorder.state().steps, 7);

        // A new session takes a new baseline
        recorder.start_recording(None, 300);
        assert_eq!(recorder.state().steps, 0);
        recorder.update_steps(StepReading(160));
        recorder.update_steps(StepReading(161));
        assert_eq!(recorder.state().steps, 1);
    }

    #[test]
    fn test_tick_only_while_recording() {
        let (mut recorder, _clock) = recorder();
        recorder.tick();
        assert_eq!(recorder.state().elapsed_seconds, 0);

        recorder.start_recording(None, 300);
        recorder.tick();
        recorder.tick();
        assert_eq!(recorder.state().elapsed_seconds, 2);
        assert_eq!(recorder.state().format_elapsed(), "00:00:02");

        recorder.stop_recording();
        recorder.tick();
        assert_eq!(recorder.state().elapsed_seconds, 2);
    }

    #[test]
    fn test_satellites_tracked_regardless_of_recording() {
        let (mut recorder, _clock) = recorder();
        assert_eq!(recorder.state().signal_label(), "N/A");

        let snapshot = SatelliteSnapshot::new(vec![
            SatelliteStatus::new(true, 35.0),
            SatelliteStatus::new(true, 15.0),
            SatelliteStatus::new(false, 50.0),
        ]);
        recorder.handle_gps_event(GpsEvent::Satellites(snapshot));

        assert_eq!(recorder.state().satellite_count, 3);
        assert_eq!(recorder.state().signal_label(), "Fair");
    }

    #[test]
    fn test_start_while_recording_is_ignored() {
        let (mut recorder, clock) = recorder();
        recorder.start_recording(Some(PathBuf::from("/tracks")), 300);
        recorder.update_location(fix(1));

        clock.advance(Duration::from_secs(60));
        recorder.start_recording(Some(PathBuf::from("/elsewhere")), 1);

        assert_eq!(recorder.state().buffered_fixes, 1);
        assert_eq!(recorder.state().track_file.as_deref(), Some("2023-11-14-221320.gpx"));
    }

    #[test]
    fn test_fallback_file_name_without_start_time() {
        let clock = ManualClock::new(0);
        let mut recorder = SessionRecorder::new(clock.clone());
        recorder.start_recording(Some(PathBuf::from("/tracks")), 300);
        assert_eq!(recorder.state().track_file, None);

        recorder.update_location(fix(1));
        clock.set(5_000);
        let job = recorder.stop_recording().expect("final write");
        assert_eq!(job.file_name, "track_5000.gpx");
    }
}
