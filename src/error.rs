//! Error types for the output bank, patterns, configuration and the menu.
//!
//! ## Rust concepts
//! - `thiserror` derives `Display` and `std::error::Error` from attributes
//! - `#[from]` gives us `?` conversion from one error type into another

use crate::bank::LineMode;
use thiserror::Error;

/// Failures raised by the output bank or the driver underneath it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BankError {
    /// Caller addressed a line outside the bank. Programmer error.
    #[error("line index {index} out of range for a bank of {len} lines")]
    InvalidIndex { index: usize, len: usize },

    /// The I/O driver rejected a claim, write or release.
    #[error("hardware fault on pin {pin}: {reason}")]
    HardwareFault { pin: u8, reason: String },

    /// A value of the wrong representation was written to a line.
    #[error("line {index} is in {mode} mode")]
    ModeMismatch { index: usize, mode: LineMode },

    /// The bank has already released its handles.
    #[error("output bank has been released")]
    Released,

    /// Several lines failed during a bulk operation.
    #[error("{} lines failed: {}", .0.len(), join_faults(.0))]
    Faults(Vec<BankError>),
}

impl BankError {
    pub fn hardware(pin: u8, reason: impl Into<String>) -> Self {
        Self::HardwareFault {
            pin,
            reason: reason.into(),
        }
    }

    /// Short name of the fault kind, used when recording shutdown faults.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIndex { .. } => "invalid_index",
            Self::HardwareFault { .. } => "hardware_fault",
            Self::ModeMismatch { .. } => "mode_mismatch",
            Self::Released => "released",
            Self::Faults(_) => "faults",
        }
    }

    /// True when every fault underneath is a hardware fault, which ends
    /// the pattern but not the show.
    pub fn is_hardware(&self) -> bool {
        match self {
            Self::HardwareFault { .. } => true,
            Self::Faults(faults) => faults.iter().all(BankError::is_hardware),
            _ => false,
        }
    }
}

fn join_faults(faults: &[BankError]) -> String {
    faults
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a pattern stopped before finishing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatternError {
    /// A stop was requested at a timestep checkpoint.
    #[error("pattern interrupted")]
    Interrupted,

    /// A hardware write failed partway through; the pattern ends here but
    /// the playlist goes on.
    #[error("step failed: {0}")]
    StepFault(BankError),

    #[error(transparent)]
    Bank(#[from] BankError),
}

impl PatternError {
    /// Fatal errors abandon the playlist and shut the hardware down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bank(_))
    }
}

/// Invalid settings detected before any hardware is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one output pin is required")]
    NoPins,

    #[error("at most {max} output pins are supported, got {got}")]
    TooManyPins { max: usize, got: usize },

    #[error("pin {0} is listed more than once")]
    DuplicatePin(u8),

    #[error("speed must be a positive number, got {0}")]
    InvalidSpeed(String),

    #[error("unknown pattern '{0}'")]
    UnknownPattern(String),
}

/// Menu input that does not name an option.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("invalid choice '{input}', choose A, 1-{max} or Q")]
    InvalidSelection { input: String, max: usize },
}
