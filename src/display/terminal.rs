// src/display/terminal.rs
//! Terminal status screen and key controls

use crate::{
    error::{Result, TrackerError},
    gps::Fix,
    recorder::{RecorderEvent, RecorderHandle, RecorderState},
};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, DisableLineWrap, EnableLineWrap},
};
use std::{
    io::{self, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    ToggleRecording,
    MarkWaypoint,
    Quit,
}

pub fn key_action(key: &KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(KeyAction::Quit),
        KeyCode::Char('r') | KeyCode::Char(' ') => Some(KeyAction::ToggleRecording),
        KeyCode::Char('w') => Some(KeyAction::MarkWaypoint),
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

/// Session settings used when recording is started from the keyboard
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub target_dir: Option<PathBuf>,
    pub flush_interval_secs: u64,
}

pub struct TerminalDisplay {
    settings: SessionSettings,
}

impl TerminalDisplay {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }

    /// Run the status screen until the user quits
    pub async fn run(&self, handle: RecorderHandle) -> Result<()> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        execute!(stdout, Hide, DisableLineWrap)?;

        let running = Arc::new(AtomicBool::new(true));
        let input = self.spawn_input(handle.clone(), Arc::clone(&running));

        let mut state_rx = handle.subscribe();
        let result = async {
            while running.load(Ordering::Relaxed) {
                let state = state_rx.borrow_and_update().clone();
                execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
                self.render_display(&mut stdout, &state)?;
                stdout.flush()?;

                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep(Duration::from_millis(250)) => {}
                }
            }
            Ok::<(), TrackerError>(())
        }
        .await;

        running.store(false, Ordering::Relaxed);
        if let Err(e) = input.await {
            log::error!("Terminal input thread failed: {}", e);
        }

        execute!(stdout, Show, EnableLineWrap)?;
        terminal::disable_raw_mode()?;
        println!("\nShutting down...");
        result
    }

    /// Poll the keyboard on a blocking thread and turn keys into events
    fn spawn_input(&self, handle: RecorderHandle, running: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
        let settings = self.settings.clone();
        let events = handle.sender();

        tokio::task::spawn_blocking(move || {
            while running.load(Ordering::Relaxed) {
                let ready = match event::poll(Duration::from_millis(200)) {
                    Ok(ready) => ready,
                    Err(e) => {
                        log::error!("Failed to poll terminal input: {}", e);
                        break;
                    }
                };
                if !ready {
                    continue;
                }

                let action = match event::read() {
                    Ok(Event::Key(key)) => key_action(&key),
                    Ok(_) => None,
                    Err(e) => {
                        log::error!("Failed to read terminal input: {}", e);
                        break;
                    }
                };

                let command = match action {
                    Some(KeyAction::ToggleRecording) if handle.state().recording => RecorderEvent::Stop,
                    Some(KeyAction::ToggleRecording) => RecorderEvent::Start {
                        target_dir: settings.target_dir.clone(),
                        flush_interval_secs: settings.flush_interval_secs,
                    },
                    Some(KeyAction::MarkWaypoint) => RecorderEvent::MarkWaypoint,
                    Some(KeyAction::Quit) => {
                        running.store(false, Ordering::Relaxed);
                        break;
                    }
                    None => continue,
                };

                if events.blocking_send(command).is_err() {
                    running.store(false, Ordering::Relaxed);
                    break;
                }
            }
        })
    }

    /// Render the recorder state to the terminal
    pub fn render_display(&self, stdout: &mut impl Write, state: &RecorderState) -> Result<()> {
        // Raw mode needs explicit carriage returns
        execute!(
            stdout,
            SetForegroundColor(Color::Green),
            Print("=".repeat(60)),
            Print("\r\n"),
            Print("GPS Tracker"),
            Print("\r\n"),
            Print("=".repeat(60)),
            Print("\r\n"),
            ResetColor
        )?;

        self.render_session_section(stdout, state)?;
        self.render_position_section(stdout, state.current_position.as_ref())?;
        self.render_signal_section(stdout, state)?;

        execute!(
            stdout,
            SetForegroundColor(Color::Green),
            Print("=".repeat(60)),
            Print("\r\n"),
            Print("[r] start/stop  [w] waypoint  [q] quit"),
            Print("\r\n"),
            ResetColor
        )?;

        Ok(())
    }

    fn render_session_section(&self, stdout: &mut impl Write, state: &RecorderState) -> Result<()> {
        let (label, color) = if state.recording {
            ("RECORDING", Color::Red)
        } else {
            ("IDLE", Color::DarkGrey)
        };

        execute!(
            stdout,
            SetForegroundColor(Color::Yellow),
            Print("SESSION:\r\n"),
            ResetColor,
            Print("  Status:     "),
            SetForegroundColor(color),
            Print(label),
            ResetColor,
            Print("\r\n"),
            Print(format!("  Elapsed:    {}\r\n", state.format_elapsed())),
            Print(format!("  Steps:      {}\r\n", state.steps)),
            Print(format!("  Buffered:   {} point(s)\r\n", state.buffered_fixes)),
            Print(format!("  Waypoints:  {}\r\n", state.waypoint_count)),
            Print(format!(
                "  File:       {}{}\r\n\r\n",
                state.track_file.as_deref().unwrap_or("-"),
                if state.saving { " (saving)" } else { "" }
            ))
        )?;

        Ok(())
    }

    fn render_position_section(&self, stdout: &mut impl Write, position: Option<&Fix>) -> Result<()> {
        execute!(
            stdout,
            SetForegroundColor(Color::Cyan),
            Print("POSITION:\r\n"),
            ResetColor
        )?;

        let Some(fix) = position else {
            execute!(stdout, Print("  No fix\r\n\r\n"))?;
            return Ok(());
        };

        let time = fix
            .time()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        execute!(
            stdout,
            Print(format!("  Latitude:   {}\r\n", Fix::format_coordinate(fix.latitude))),
            Print(format!("  Longitude:  {}\r\n", Fix::format_coordinate(fix.longitude))),
            Print(format!("  Altitude:   {:>12.1} m\r\n", fix.altitude_or_zero())),
            Print(format!("  Speed:      {:>12.1} m/s\r\n", fix.speed_or_zero())),
            Print(format!("  Time:       {}\r\n\r\n", time))
        )?;

        Ok(())
    }

    fn render_signal_section(&self, stdout: &mut impl Write, state: &RecorderState) -> Result<()> {
        execute!(
            stdout,
            SetForegroundColor(Color::Magenta),
            Print("SIGNAL:\r\n"),
            ResetColor,
            Print(format!("  Satellites: {}\r\n", state.satellite_count)),
            Print(format!("  Quality:    {}\r\n\r\n", state.signal_label()))
        )?;

        Ok(())
    }
}
