// src/display/mod.rs
//! Display modules for different interfaces

pub mod terminal;

pub use terminal::{SessionSettings, TerminalDisplay};

/// Check if the interactive status screen can be used
pub fn should_use_terminal() -> bool {
    use crossterm::tty::IsTty;
    std::io::stdout().is_tty() && std::io::stdin().is_tty()
}
