//! Interactive menu: the text shown, the parsing of what comes back, and
//! a stdin reader that gives up as soon as a stop is requested.
//!
//! Lines are read on a helper thread and handed over a channel, so the
//! prompt can keep polling the stop flag while the user types.

use crate::error::SelectionError;
use crate::pattern::Pattern;
use crate::{StopSignal, is_running};
use std::fmt::Write;
use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// How often a waiting prompt looks at the stop flag.
const PROMPT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuChoice {
    /// Loop the full show.
    All,
    /// Loop one pattern.
    Pattern(Pattern),
    Quit,
}

/// Patterns listed in the menu, numbered from 1.
pub fn entries() -> Vec<Pattern> {
    Pattern::show().collect()
}

/// Parse one line: `A`, `Q` (any case) or a number from 1 to the entry count.
pub fn parse(input: &str) -> Result<MenuChoice, SelectionError> {
    let entries = entries();
    let trimmed = input.trim();
    let invalid = || SelectionError::InvalidSelection {
        input: trimmed.to_string(),
        max: entries.len(),
    };

    if trimmed.eq_ignore_ascii_case("a") {
        return Ok(MenuChoice::All);
    }
    if trimmed.eq_ignore_ascii_case("q") {
        return Ok(MenuChoice::Quit);
    }
    let number: usize = trimmed.parse().map_err(|_| invalid())?;
    number
        .checked_sub(1)
        .and_then(|i| entries.get(i))
        .map(|&p| MenuChoice::Pattern(p))
        .ok_or_else(invalid)
}

pub fn render_menu() -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(40));
    let _ = writeln!(out, "LED LIGHT SHOW");
    let _ = writeln!(out, "{}", "=".repeat(40));
    let _ = writeln!(out, "  A. Run all patterns (loop)");
    for (i, pattern) in entries().iter().enumerate() {
        let _ = writeln!(out, "{:>3}. {}", i + 1, pattern.title());
    }
    let _ = writeln!(out, "  Q. Quit");
    out
}

/// Read stdin on a background thread, one message per line.
///
/// The channel closes at end of input or on a read error.
pub fn spawn_stdin_lines() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Wait for the next line of input.
///
/// Returns `None` once a stop is requested or the input has closed.
pub fn wait_for_line(lines: &Receiver<String>, stop: &StopSignal) -> Option<String> {
    while is_running(stop) {
        match lines.recv_timeout(PROMPT_POLL) {
            Ok(line) => return Some(line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
    None
}
