//! LED light show sequencer for GPIO-driven LEDs.
//!
//! This crate drives a small bank of LEDs through timed patterns:
//! - An output bank that owns every line handle and switches between
//!   on/off and dimmable (PWM) representations
//! - A pattern library (chase, bounce, binary counter, breathing, ...)
//! - A playlist runner with cooperative cancellation
//! - A lifecycle manager that always leaves the hardware off and released
//!
//! It also provides the outer surfaces used by the binary: the menu, the
//! button color cycler and an HTTP control API.

pub mod bank;
pub mod cycler;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod menu;
pub mod pattern;
pub mod runner;
pub mod server;

use error::ConfigError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

// ── Show configuration ─────────────────────────────────────────────

/// Most lines a bank may have. Keeps the binary counter at 2^16 steps.
pub const MAX_LINES: usize = 16;

/// Pins of the three-LED breadboard: GPIO 4, 17 and 27.
pub const DEFAULT_PINS: [u8; 3] = [4, 17, 27];

/// Settings shared by every run mode.
#[derive(Clone, Debug, PartialEq)]
pub struct ShowConfig {
    /// GPIO pins in wiring order; index 0 is the first line.
    pub pins: Vec<u8>,
    pub tempo: Tempo,
    /// Software PWM frequency for intensity mode, in Hz.
    pub pwm_frequency: f64,
}

impl ShowConfig {
    pub fn new(pins: Vec<u8>, speed: f64, pwm_frequency: f64) -> Result<Self, ConfigError> {
        let config = Self {
            pins,
            tempo: Tempo::from_speed(speed)?,
            pwm_frequency,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pins.is_empty() {
            return Err(ConfigError::NoPins);
        }
        if self.pins.len() > MAX_LINES {
            return Err(ConfigError::TooManyPins {
                max: MAX_LINES,
                got: self.pins.len(),
            });
        }
        for (i, pin) in self.pins.iter().enumerate() {
            if self.pins[..i].contains(pin) {
                return Err(ConfigError::DuplicatePin(*pin));
            }
        }
        Ok(())
    }

    pub fn line_count(&self) -> usize {
        self.pins.len()
    }
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            pins: DEFAULT_PINS.to_vec(),
            tempo: Tempo::realtime(),
            pwm_frequency: 100.0,
        }
    }
}

// ── Tempo ──────────────────────────────────────────────────────────

/// Converts pattern time units into wall-clock durations.
///
/// One unit is one second at normal speed. A scale of zero makes every
/// hold instant, which is what the tests use.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tempo {
    scale: f64,
}

impl Tempo {
    pub fn realtime() -> Self {
        Self { scale: 1.0 }
    }

    pub fn instant() -> Self {
        Self { scale: 0.0 }
    }

    /// `speed` 2.0 plays everything twice as fast.
    pub fn from_speed(speed: f64) -> Result<Self, ConfigError> {
        if speed.is_finite() && speed > 0.0 {
            Ok(Self { scale: 1.0 / speed })
        } else {
            Err(ConfigError::InvalidSpeed(speed.to_string()))
        }
    }

    /// Seconds per time unit.
    pub fn with_scale(scale: f64) -> Self {
        Self {
            scale: scale.max(0.0),
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn duration(&self, units: f64) -> Duration {
        let secs = units * self.scale;
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

// ── Stop signal ────────────────────────────────────────────────────

/// Why a run should stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Stop the current playlist but keep the hardware claimed.
    Preempt,
    /// The process is exiting; release everything.
    Shutdown,
}

const RUNNING: u8 = 0;
const PREEMPT: u8 = 1;
const SHUTDOWN: u8 = 2;

/// Cooperative stop flag shared between the runner and whoever stops it.
///
/// # Rust concept: Arc and atomics
/// Cloning the signal clones the `Arc`, so every clone sees the same flag.
/// A shutdown request is sticky: `clear` only resets a preempt.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    state: Arc<AtomicU8>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, reason: StopReason) {
        let value = match reason {
            StopReason::Preempt => PREEMPT,
            StopReason::Shutdown => SHUTDOWN,
        };
        self.state.fetch_max(value, Ordering::SeqCst);
    }

    pub fn reason(&self) -> Option<StopReason> {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => None,
            PREEMPT => Some(StopReason::Preempt),
            _ => Some(StopReason::Shutdown),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.reason().is_some()
    }

    /// Forget a preempt so the next playlist can run.
    pub fn clear(&self) {
        let _ = self
            .state
            .compare_exchange(PREEMPT, RUNNING, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Set up a Ctrl+C handler that requests a shutdown.
///
/// The handler only flips the flag; the runner sees it at the next
/// timestep and the lifecycle manager does the cleanup.
pub fn setup_signal_handler() -> StopSignal {
    let stop = StopSignal::new();
    let s = stop.clone();

    ctrlc::set_handler(move || {
        s.request(StopReason::Shutdown);
    })
    .expect("Error setting Ctrl-C handler");

    stop
}

/// Check if the main loop should keep running.
pub fn is_running(stop: &StopSignal) -> bool {
    !stop.is_requested()
}

// ── Tests ──────────────────────────────────────────────────────────
