//! Playlist runner: plays patterns one after another on a single thread.
//!
//! The runner moves through `Idle → Running → Stopping → Idle`. While
//! running it calls each playlist entry in order and, for looped playlists,
//! starts over after the last one. A stop request is seen at the next
//! timestep checkpoint and sends the runner straight to `Stopping`.
//!
//! On the way out the runner either settles the bank (everything off,
//! handles kept) or, for a process shutdown or a fatal fault, hands over
//! to [`Lifecycle::shutdown`].
//!
//! ## Rust concepts
//! - Loop labels (`'show: loop`) with `break 'show value`
//! - Borrowing disjoint struct fields at the same time
//! - `Arc<Mutex<T>>` status shared with the HTTP server

use crate::bank::LineMode;
use crate::error::{ConfigError, PatternError};
use crate::lifecycle::Lifecycle;
use crate::pattern::{Pattern, Routine, Stage};
use crate::{StopReason, StopSignal, Tempo};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::sync::{Arc, Mutex};

// ── Playlist ─────────────────────────────────────────────────────────

/// One pattern with its parameter, resolved to a routine up front.
#[derive(Clone, Copy, Debug)]
pub struct Entry {
    pub pattern: Pattern,
    pub param: u32,
    routine: Routine,
}

impl Entry {
    pub fn new(pattern: Pattern, param: u32) -> Self {
        Self {
            pattern,
            param,
            routine: pattern.routine(),
        }
    }

    /// Parse `id` or `id:param`, e.g. `chase:3`.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let (id, param) = match input.split_once(':') {
            Some((id, param)) => {
                let param = param
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| ConfigError::UnknownPattern(input.to_string()))?;
                (id, Some(param))
            }
            None => (input, None),
        };
        let pattern: Pattern = id.parse()?;
        Ok(Self::new(
            pattern,
            param.unwrap_or_else(|| pattern.default_param()),
        ))
    }
}

impl From<Pattern> for Entry {
    fn from(pattern: Pattern) -> Self {
        Self::new(pattern, pattern.default_param())
    }
}

/// Ordered patterns plus the pauses between them, in time units.
#[derive(Clone, Debug)]
pub struct Playlist {
    entries: Vec<Entry>,
    /// Pause after each pattern.
    pub gap: f64,
    /// Pause before a looped playlist starts over.
    pub cycle_pause: f64,
}

impl Playlist {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            gap: 0.0,
            cycle_pause: 0.0,
        }
    }

    /// Every show pattern with its default parameter.
    pub fn full_show() -> Self {
        Self {
            entries: Pattern::show().map(Entry::from).collect(),
            gap: 0.5,
            cycle_pause: 2.0,
        }
    }

    /// A single pattern meant to be looped.
    pub fn repeat(pattern: Pattern) -> Self {
        Self {
            entries: vec![Entry::from(pattern)],
            gap: 0.3,
            cycle_pause: 0.0,
        }
    }

    /// Build from `id[:param]` strings. An empty list means the full show.
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Ok(Self::full_show());
        }
        let entries = specs
            .iter()
            .map(|s| Entry::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            entries,
            ..Self::full_show()
        })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Status ───────────────────────────────────────────────────────────

/// Where the runner is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Running,
    Stopping,
}

/// Snapshot of the show for anyone watching from another thread.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ShowStatus {
    /// Current runner state
    pub state: RunnerState,
    /// Identifier of the pattern playing now (if any)
    pub pattern: Option<String>,
    /// How many times the playlist has started
    pub cycle: u64,
    /// Line representation in use
    pub mode: LineMode,
    /// Level of each line, 0.0-1.0, in wiring order
    pub lines: Vec<f64>,
    /// Program version
    pub version: String,
}

impl ShowStatus {
    pub fn new(line_count: usize) -> Self {
        Self {
            state: RunnerState::Idle,
            pattern: None,
            cycle: 0,
            mode: LineMode::Binary,
            lines: vec![0.0; line_count],
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub type StatusHandle = Arc<Mutex<ShowStatus>>;

// ── Runner ───────────────────────────────────────────────────────────

/// How a run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// A run-once playlist reached its end.
    Completed,
    Stopped(StopReason),
    /// A fault that left the hardware in an unknown state.
    Failed(PatternError),
}

pub struct Runner<'a> {
    lifecycle: &'a mut Lifecycle,
    stop: StopSignal,
    tempo: Tempo,
    rng: StdRng,
    state: RunnerState,
    status: Option<StatusHandle>,
}

impl<'a> Runner<'a> {
    pub fn new(lifecycle: &'a mut Lifecycle, stop: StopSignal, tempo: Tempo) -> Self {
        Self {
            lifecycle,
            stop,
            tempo,
            rng: StdRng::from_entropy(),
            state: RunnerState::Idle,
            status: None,
        }
    }

    /// Make the random patterns repeatable.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_status(mut self, status: StatusHandle) -> Self {
        self.status = Some(status);
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Play the playlist once, then settle.
    pub fn run_once(&mut self, playlist: &Playlist) -> Outcome {
        self.run(playlist, false)
    }

    /// Play the playlist over and over until a stop is requested.
    pub fn run_looped(&mut self, playlist: &Playlist) -> Outcome {
        self.run(playlist, true)
    }

    fn update_status<F: FnOnce(&mut ShowStatus)>(&self, f: F) {
        if let Some(status) = &self.status {
            if let Ok(mut s) = status.lock() {
                f(&mut s);
            }
        }
    }

    fn enter(&mut self, state: RunnerState) {
        tracing::debug!("Runner {:?} -> {:?}", self.state, state);
        self.state = state;
        self.update_status(|s| s.state = state);
    }

    fn stopped(&self) -> Outcome {
        Outcome::Stopped(self.stop.reason().unwrap_or(StopReason::Preempt))
    }

    fn perform(&mut self, routine: Routine, param: u32) -> Result<(), PatternError> {
        let mut stage = Stage::new(
            self.lifecycle.bank_mut(),
            &self.stop,
            self.tempo,
            &mut self.rng,
        );
        if let Some(status) = &self.status {
            stage = stage.with_status(status);
        }
        routine(&mut stage, param)
    }

    fn pause(&mut self, units: f64) -> Result<(), PatternError> {
        if units <= 0.0 {
            return Ok(());
        }
        let mut stage = Stage::new(
            self.lifecycle.bank_mut(),
            &self.stop,
            self.tempo,
            &mut self.rng,
        );
        stage.hold(units)
    }

    fn run(&mut self, playlist: &Playlist, looped: bool) -> Outcome {
        if self.lifecycle.is_shut_down() {
            return Outcome::Stopped(StopReason::Shutdown);
        }
        if playlist.is_empty() {
            return Outcome::Completed;
        }

        self.enter(RunnerState::Running);
        let total = playlist.len();
        let mut cycle: u64 = 0;

        let outcome = 'show: loop {
            cycle += 1;
            self.update_status(|s| s.cycle = cycle);

            for (i, entry) in playlist.entries().iter().enumerate() {
                if self.stop.is_requested() {
                    break 'show self.stopped();
                }

                tracing::info!("[Pattern {}/{}] {}", i + 1, total, entry.pattern.title());
                let id = entry.pattern.id().to_string();
                self.update_status(|s| s.pattern = Some(id));

                match self.perform(entry.routine, entry.param) {
                    Ok(()) => {}
                    Err(PatternError::Interrupted) => break 'show self.stopped(),
                    Err(PatternError::StepFault(e)) => {
                        tracing::warn!("{} ended early: {}", entry.pattern.title(), e);
                        self.lifecycle.settle();
                    }
                    Err(e) => {
                        tracing::error!("{} failed: {}", entry.pattern.title(), e);
                        break 'show Outcome::Failed(e);
                    }
                }

                if self.pause(playlist.gap).is_err() {
                    break 'show self.stopped();
                }
            }

            if !looped {
                break Outcome::Completed;
            }
            if self.stop.is_requested() {
                break self.stopped();
            }
            tracing::info!("Show complete! Starting over...");
            if self.pause(playlist.cycle_pause).is_err() {
                break self.stopped();
            }
        };

        self.enter(RunnerState::Stopping);
        match &outcome {
            Outcome::Stopped(StopReason::Shutdown) | Outcome::Failed(_) => {
                self.lifecycle.shutdown();
            }
            Outcome::Completed | Outcome::Stopped(StopReason::Preempt) => {
                self.lifecycle.settle();
            }
        }

        let levels = self.lifecycle.bank().levels();
        self.update_status(|s| {
            s.pattern = None;
            s.mode = LineMode::Binary;
            s.lines = levels;
        });
        self.enter(RunnerState::Idle);
        tracing::info!("Show finished: {:?}", outcome);
        outcome
    }
}
