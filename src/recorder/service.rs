// src/recorder/service.rs
//! Async wrapper that serializes all recorder access onto one task

use super::{RecorderState, SessionRecorder};
use crate::{
    clock::Clock,
    error::{Result, TrackerError},
    gps::{Fix, GpsEvent},
    storage::TrackStorage,
    track::WriteJob,
};
use std::{collections::VecDeque, path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::{JoinError, JoinHandle},
    time::{self, Instant, Interval},
};

const EVENT_QUEUE: usize = 256;
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Inbound messages for the recorder task
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    Start {
        target_dir: Option<PathBuf>,
        flush_interval_secs: u64,
    },
    Stop,
    Waypoint(Fix),
    /// Save the last known position as a waypoint
    MarkWaypoint,
    Gps(GpsEvent),
    Shutdown,
}

/// Cloneable handle for talking to a running [`RecorderService`]
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    events: mpsc::Sender<RecorderEvent>,
    state: watch::Receiver<RecorderState>,
}

impl RecorderHandle {
    pub async fn send(&self, event: RecorderEvent) -> Result<()> {
        self.events.send(event).await?;
        Ok(())
    }

    pub async fn start_recording(&self, target_dir: Option<PathBuf>, flush_interval_secs: u64) -> Result<()> {
        self.send(RecorderEvent::Start {
            target_dir,
            flush_interval_secs,
        })
        .await
    }

    pub async fn stop_recording(&self) -> Result<()> {
        self.send(RecorderEvent::Stop).await
    }

    pub async fn add_waypoint(&self, fix: Fix) -> Result<()> {
        self.send(RecorderEvent::Waypoint(fix)).await
    }

    pub async fn mark_waypoint(&self) -> Result<()> {
        self.send(RecorderEvent::MarkWaypoint).await
    }

    pub async fn push(&self, event: GpsEvent) -> Result<()> {
        self.send(RecorderEvent::Gps(event)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(RecorderEvent::Shutdown).await
    }

    /// Raw sender, for feeding events from other tasks
    pub fn sender(&self) -> mpsc::Sender<RecorderEvent> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecorderState> {
        self.state.clone()
    }

    /// Snapshot of the latest published state
    pub fn state(&self) -> RecorderState {
        self.state.borrow().clone()
    }
}

struct PendingWrite {
    job: Arc<WriteJob>,
    task: JoinHandle<Result<()>>,
}

/// Owns a [`SessionRecorder`] and runs it on a single task.
///
/// Events arrive over a channel, the elapsed-time tick runs only while
/// recording, and write jobs go to the blocking pool one at a time so
/// two writes to the same file never overlap.
pub struct RecorderService<C: Clock, S: TrackStorage + 'static> {
    recorder: SessionRecorder<C>,
    storage: Arc<S>,
    events: mpsc::Receiver<RecorderEvent>,
    state_tx: watch::Sender<RecorderState>,
    ticker: Option<Interval>,
    in_flight: Option<PendingWrite>,
    queued: VecDeque<WriteJob>,
}

impl<C: Clock, S: TrackStorage + 'static> RecorderService<C, S> {
    /// Spawn the service on the current tokio runtime
    pub fn spawn(recorder: SessionRecorder<C>, storage: Arc<S>) -> (RecorderHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (state_tx, state_rx) = watch::channel(recorder.state().clone());

        let service = Self {
            recorder,
            storage,
            events: events_rx,
            state_tx,
            ticker: None,
            in_flight: None,
            queued: VecDeque::new(),
        };

        let task = tokio::spawn(service.run());
        let handle = RecorderHandle {
            events: events_tx,
            state: state_rx,
        };

        (handle, task)
    }

    async fn run(mut self) {
        loop {
            // A finished write is recorded before the next fix can ask for a flush
            let keep_running = tokio::select! {
                biased;

                result = wait_write(&mut self.in_flight) => {
                    if let Some(pending) = self.in_flight.take() {
                        self.finish_write(pending.job, result);
                    }
                    self.start_next_write();
                    true
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => false,
                },
                _ = next_tick(&mut self.ticker) => {
                    self.recorder.tick();
                    true
                }
            };

            self.publish();

            if !keep_running {
                break;
            }
        }

        self.shutdown().await;
        log::debug!("Recorder service stopped");
    }

    async fn handle_event(&mut self, event: RecorderEvent) -> bool {
        match event {
            RecorderEvent::Start {
                target_dir,
                flush_interval_secs,
            } => {
                self.recorder.start_recording(target_dir, flush_interval_secs);
                if self.recorder.is_recording() && self.ticker.is_none() {
                    self.ticker = Some(time::interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD));
                }
            }
            RecorderEvent::Stop => self.stop().await,
            RecorderEvent::Waypoint(fix) => {
                self.recorder.add_waypoint(fix);
            }
            RecorderEvent::MarkWaypoint => match self.recorder.state().current_position {
                Some(fix) => {
                    self.recorder.add_waypoint(fix);
                }
                None => log::warn!("No position yet, waypoint not saved"),
            },
            RecorderEvent::Gps(event) => {
                if let Some(job) = self.recorder.handle_gps_event(event) {
                    self.enqueue(job);
                }
            }
            RecorderEvent::Shutdown => return false,
        }

        true
    }

    async fn stop(&mut self) {
        if !self.recorder.is_recording() {
            return;
        }

        // No further ticks once stop is processed
        self.ticker = None;

        // Let any outstanding flush finish first; a failed batch goes back
        // into the buffer and ends up in the final write
        self.drain_writes().await;

        if let Some(job) = self.recorder.stop_recording() {
            self.enqueue(job);
        }
    }

    async fn shutdown(&mut self) {
        self.stop().await;
        self.drain_writes().await;
        self.publish();
    }

    fn enqueue(&mut self, job: WriteJob) {
        self.queued.push_back(job);
        self.start_next_write();
    }

    fn start_next_write(&mut self) {
        if self.in_flight.is_some() {
            return;
        }

        let Some(job) = self.queued.pop_front() else {
            return;
        };

        let job = Arc::new(job);
        let task_job = Arc::clone(&job);
        let storage = Arc::clone(&self.storage);
        let task = tokio::task::spawn_blocking(move || task_job.run(storage.as_ref()));

        self.in_flight = Some(PendingWrite { job, task });
    }

    async fn drain_writes(&mut self) {
        while let Some(pending) = self.in_flight.take() {
            let result = pending.task.await;
            self.finish_write(pending.job, result);
            self.start_next_write();
        }
    }

    fn finish_write(&mut self, job: Arc<WriteJob>, result: std::result::Result<Result<()>, JoinError>) {
        let outcome = result.unwrap_or_else(|e| Err(TrackerError::Other(format!("write task failed: {}", e))));
        let job = Arc::try_unwrap(job).unwrap_or_else(|shared| (*shared).clone());
        self.recorder.complete_write(job, outcome);
    }

    fn publish(&self) {
        let state = self.recorder.state();
        self.state_tx.send_if_modified(|current| {
            if *current != *state {
                *current = state.clone();
                true
            } else {
                false
            }
        });
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn wait_write(in_flight: &mut Option<PendingWrite>) -> std::result::Result<Result<()>, JoinError> {
    match in_flight {
        Some(pending) => (&mut pending.task).await,
        None => std::future::pending().await,
    }
}
