//! Hardware output collaborators.
//!
//! The bank never touches GPIO directly. It talks to an [`OutputDriver`],
//! which either drives real pins through `rppal` (feature `hardware`) or
//! records writes in memory for simulation and tests.
//!
//! ## Rust concepts
//! - Trait objects (`Box<dyn OutputDriver>`) so the bank is not generic
//! - `Arc<Mutex<T>>` so a test can keep inspecting a driver the bank owns

use crate::bank::LineMode;
use crate::error::BankError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Pin-level contract the output bank needs from an I/O driver.
///
/// Every call either succeeds or returns [`BankError::HardwareFault`].
pub trait OutputDriver: Send {
    /// Acquire a handle on `pin` in the given representation.
    fn claim(&mut self, pin: u8, mode: LineMode) -> Result<(), BankError>;

    fn set_binary(&mut self, pin: u8, on: bool) -> Result<(), BankError>;

    /// `value` is already clamped to [0.0, 1.0] by the bank.
    fn set_intensity(&mut self, pin: u8, value: f64) -> Result<(), BankError>;

    /// Give the handle back. Releasing an unclaimed pin is not an error.
    fn release(&mut self, pin: u8) -> Result<(), BankError>;
}

// ── In-memory driver ───────────────────────────────────────────────

/// State of one simulated pin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinState {
    /// `None` once released (or never claimed).
    pub claimed: Option<LineMode>,
    pub level: f64,
}

#[derive(Debug, Default)]
struct MemoryState {
    pins: HashMap<u8, PinState>,
    failing_pins: Vec<u8>,
    fail_claims: bool,
    writes: usize,
    claims: usize,
    releases: usize,
}

/// Driver that keeps pin state in memory.
///
/// Clones share the same pin table, so a test can hand one clone to the
/// bank and keep another to look at what happened.
#[derive(Clone, Debug, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned table is still a valid table of pin levels.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every write to `pin` fail from now on.
    pub fn fail_pin(&self, pin: u8) {
        self.lock().failing_pins.push(pin);
    }

    /// Make claims fail, as if another process held the pins.
    pub fn fail_claims(&self, fail: bool) {
        self.lock().fail_claims = fail;
    }

    /// Clear all injected faults.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing_pins.clear();
        state.fail_claims = false;
    }

    pub fn pin(&self, pin: u8) -> Option<PinState> {
        self.lock().pins.get(&pin).copied()
    }

    pub fn level(&self, pin: u8) -> f64 {
        self.pin(pin).map_or(0.0, |p| p.level)
    }

    pub fn is_claimed(&self, pin: u8) -> bool {
        self.pin(pin).is_some_and(|p| p.claimed.is_some())
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn claim_count(&self) -> usize {
        self.lock().claims
    }

    pub fn release_count(&self) -> usize {
        self.lock().releases
    }

    fn write(&self, pin: u8, level: f64) -> Result<(), BankError> {
        let mut state = self.lock();
        if state.failing_pins.contains(&pin) {
            return Err(BankError::hardware(pin, "write rejected"));
        }
        let entry = state
            .pins
            .get_mut(&pin)
            .filter(|p| p.claimed.is_some())
            .ok_or_else(|| BankError::hardware(pin, "pin not claimed"))?;
        entry.level = level;
        state.writes += 1;
        Ok(())
    }
}

impl OutputDriver for MemoryDriver {
    fn claim(&mut self, pin: u8, mode: LineMode) -> Result<(), BankError> {
        let mut state = self.lock();
        if state.fail_claims {
            return Err(BankError::hardware(pin, "pin unavailable"));
        }
        let entry = state.pins.entry(pin).or_insert(PinState {
            claimed: None,
            level: 0.0,
        });
        if let Some(held) = entry.claimed {
            return Err(BankError::hardware(pin, format!("already claimed in {held} mode")));
        }
        entry.claimed = Some(mode);
        entry.level = 0.0;
        state.claims += 1;
        Ok(())
    }

    fn set_binary(&mut self, pin: u8, on: bool) -> Result<(), BankError> {
        self.write(pin, if on { 1.0 } else { 0.0 })
    }

    fn set_intensity(&mut self, pin: u8, value: f64) -> Result<(), BankError> {
        self.write(pin, value)
    }

    fn release(&mut self, pin: u8) -> Result<(), BankError> {
        let mut state = self.lock();
        if state.failing_pins.contains(&pin) {
            return Err(BankError::hardware(pin, "release rejected"));
        }
        if let Some(entry) = state.pins.get_mut(&pin) {
            if entry.claimed.take().is_some() {
                entry.level = 0.0;
                state.releases += 1;
            }
        }
        Ok(())
    }
}

// ── GPIO driver ────────────────────────────────────────────────────

#[cfg(feature = "hardware")]
pub use gpio::GpioDriver;

#[cfg(feature = "hardware")]
mod gpio {
    use super::OutputDriver;
    use crate::bank::LineMode;
    use crate::error::BankError;
    use rppal::gpio::{Gpio, OutputPin};
    use std::collections::HashMap;

    struct Handle {
        pin: OutputPin,
        mode: LineMode,
    }

    /// Drives Raspberry Pi GPIO lines through `rppal`.
    ///
    /// Binary lines are plain output levels. Intensity lines use software
    /// PWM at `pwm_frequency` Hz. Dropping an `OutputPin` resets the pin,
    /// so release drives it low first and then lets go of the handle.
    pub struct GpioDriver {
        gpio: Gpio,
        pwm_frequency: f64,
        handles: HashMap<u8, Handle>,
    }

    impl GpioDriver {
        pub fn new(pwm_frequency: f64) -> Result<Self, BankError> {
            let gpio = Gpio::new().map_err(|e| BankError::hardware(0, e.to_string()))?;
            Ok(Self {
                gpio,
                pwm_frequency,
                handles: HashMap::new(),
            })
        }

        fn handle(&mut self, pin: u8) -> Result<&mut Handle, BankError> {
            self.handles
                .get_mut(&pin)
                .ok_or_else(|| BankError::hardware(pin, "pin not claimed"))
        }
    }

    impl OutputDriver for GpioDriver {
        fn claim(&mut self, pin: u8, mode: LineMode) -> Result<(), BankError> {
            if self.handles.contains_key(&pin) {
                return Err(BankError::hardware(pin, "already claimed"));
            }
            let mut output = self
                .gpio
                .get(pin)
                .map_err(|e| BankError::hardware(pin, e.to_string()))?
                .into_output_low();
            output.set_reset_on_drop(true);
            self.handles.insert(pin, Handle { pin: output, mode });
            tracing::debug!("Claimed GPIO{} in {} mode", pin, mode);
            Ok(())
        }

        fn set_binary(&mut self, pin: u8, on: bool) -> Result<(), BankError> {
            let handle = self.handle(pin)?;
            if on {
                handle.pin.set_high();
            } else {
                handle.pin.set_low();
            }
            Ok(())
        }

        fn set_intensity(&mut self, pin: u8, value: f64) -> Result<(), BankError> {
            let frequency = self.pwm_frequency;
            let handle = self.handle(pin)?;
            if handle.mode != LineMode::Intensity {
                return Err(BankError::hardware(pin, "pin claimed without PWM"));
            }
            handle
                .pin
                .set_pwm_frequency(frequency, value)
                .map_err(|e| BankError::hardware(pin, e.to_string()))
        }

        fn release(&mut self, pin: u8) -> Result<(), BankError> {
            let Some(mut handle) = self.handles.remove(&pin) else {
                return Ok(());
            };
            let result = if handle.mode == LineMode::Intensity {
                handle.pin.clear_pwm()
            } else {
                Ok(())
            };
            handle.pin.set_low();
            drop(handle);
            tracing::debug!("Released GPIO{}", pin);
            result.map_err(|e| BankError::hardware(pin, e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn claim_then_write_records_level() {
        let mut driver = MemoryDriver::new();
        driver.claim(4, LineMode::Intensity).unwrap();
        driver.set_intensity(4, 0.25).unwrap();
        assert_eq!(driver.level(4), 0.25);
        assert!(driver.is_claimed(4));
    }

    #[test]
    fn write_to_unclaimed_pin_is_a_fault() {
        let mut driver = MemoryDriver::new();
        let err = driver.set_binary(4, true).unwrap_err();
        assert!(matches!(err, BankError::HardwareFault { pin: 4, .. }));
    }

    #[test]
    fn double_claim_is_a_fault() {
        let mut driver = MemoryDriver::new();
        driver.claim(17, LineMode::Binary).unwrap();
        assert!(driver.claim(17, LineMode::Intensity).is_err());
    }

    #[test]
    fn release_is_idempotent_and_zeroes_level() {
        let mut driver = MemoryDriver::new();
        driver.claim(27, LineMode::Binary).unwrap();
        driver.set_binary(27, true).unwrap();
        driver.release(27).unwrap();
        driver.release(27).unwrap();
        assert!(!driver.is_claimed(27));
        assert_eq!(driver.level(27), 0.0);
        assert_eq!(driver.release_count(), 1);
    }

    #[test]
    fn clones_share_state() {
        let observer = MemoryDriver::new();
        let mut owned = observer.clone();
        owned.claim(4, LineMode::Binary).unwrap();
        owned.set_binary(4, true).unwrap();
        assert_eq!(observer.level(4), 1.0);
        assert_eq!(observer.write_count(), 1);
    }

    #[test]
    fn injected_faults_can_be_healed() {
        let mut driver = MemoryDriver::new();
        driver.fail_claims(true);
        assert!(driver.claim(4, LineMode::Binary).is_err());
        driver.heal();
        assert!(driver.claim(4, LineMode::Binary).is_ok());
    }
}
