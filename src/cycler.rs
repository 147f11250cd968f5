//! Button color cycler: each press lights the next line.
//!
//! The cycle goes Off → line 0 → line 1 → ... → last line → Off. Presses
//! arrive over a channel, either from a GPIO button polled on its own
//! thread (with software debounce) or from the Enter key in simulation.
//!
//! ## Rust concepts
//! - `Option<usize>` as a small state machine
//! - `recv_timeout` so a blocking receive still notices a stop request

use crate::bank::OutputBank;
use crate::error::BankError;
use crate::lifecycle::Lifecycle;
use crate::{StopSignal, is_running};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Presses closer together than this count as one.
pub const DEBOUNCE: Duration = Duration::from_millis(50);

/// Which line is lit, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorCycle {
    width: usize,
    lit: Option<usize>,
}

impl ColorCycle {
    pub fn new(width: usize) -> Self {
        Self { width, lit: None }
    }

    pub fn lit(&self) -> Option<usize> {
        self.lit
    }

    /// Move to the next state and return it.
    pub fn advance(&mut self) -> Option<usize> {
        self.lit = match self.lit {
            None if self.width > 0 => Some(0),
            Some(i) if i + 1 < self.width => Some(i + 1),
            _ => None,
        };
        self.lit
    }

    /// All off, then light the current line.
    pub fn apply(&self, bank: &mut OutputBank) -> Result<(), BankError> {
        bank.all_off()?;
        match self.lit {
            Some(index) => bank.set_on(index, true),
            None => Ok(()),
        }
    }
}

/// Turns a noisy raw button level into clean press events.
#[derive(Clone, Debug)]
pub struct Debouncer {
    window: Duration,
    raw: bool,
    stable: bool,
    changed_at: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            raw: false,
            stable: false,
            changed_at: None,
        }
    }

    /// Feed one sample; true exactly once per settled press.
    pub fn feed(&mut self, pressed: bool, now: Instant) -> bool {
        if pressed != self.raw {
            self.raw = pressed;
            self.changed_at = Some(now);
        }
        let settled = self
            .changed_at
            .is_some_and(|at| now.duration_since(at) >= self.window);
        if settled && self.stable != self.raw {
            self.stable = self.raw;
            return self.stable;
        }
        false
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE)
    }
}

/// Advance the cycle on every press until the channel closes or a stop
/// is requested. Lines are left off when it returns.
pub fn run(lifecycle: &mut Lifecycle, stop: &StopSignal, presses: &Receiver<()>) {
    let mut cycle = ColorCycle::new(lifecycle.bank().len());
    while is_running(stop) {
        match presses.recv_timeout(DEBOUNCE) {
            Ok(()) => {
                match cycle.advance() {
                    Some(i) => tracing::info!("Line {} on (GPIO{})", i, lifecycle.bank().pins()[i]),
                    None => tracing::info!("All off"),
                }
                if let Err(e) = cycle.apply(lifecycle.bank_mut()) {
                    tracing::warn!("Could not update lines: {}", e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    lifecycle.settle();
}

#[cfg(feature = "hardware")]
pub use gpio::spawn_button;

#[cfg(feature = "hardware")]
mod gpio {
    use super::Debouncer;
    use crate::error::BankError;
    use crate::{StopSignal, is_running};
    use rppal::gpio::Gpio;
    use std::sync::mpsc::Sender;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    const SAMPLE: Duration = Duration::from_millis(5);

    /// Poll a pull-up button on `pin` and send one message per press.
    /// The button pulls the pin low when pressed.
    pub fn spawn_button(
        pin: u8,
        presses: Sender<()>,
        stop: StopSignal,
    ) -> Result<JoinHandle<()>, BankError> {
        let input = Gpio::new()
            .and_then(|gpio| gpio.get(pin))
            .map_err(|e| BankError::hardware(pin, e.to_string()))?
            .into_input_pullup();

        Ok(thread::spawn(move || {
            let mut debouncer = Debouncer::default();
            while is_running(&stop) {
                if debouncer.feed(input.is_low(), Instant::now()) && presses.send(()).is_err() {
                    break;
                }
                thread::sleep(SAMPLE);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;

    #[test]
    fn cycle_wraps_through_off() {
        let mut cycle = ColorCycle::new(3);
        let seen: Vec<Option<usize>> = (0..5).map(|_| cycle.advance()).collect();
        assert_eq!(seen, vec![Some(0), Some(1), Some(2), None, Some(0)]);
    }

    #[test]
    fn apply_lights_only_the_current_line() {
        let driver = MemoryDriver::new();
        let mut bank = OutputBank::new(Box::new(driver.clone()), &[4, 17, 27]).unwrap();
        let mut cycle = ColorCycle::new(3);
        cycle.advance();
        cycle.advance();
        cycle.apply(&mut bank).unwrap();
        assert_eq!(bank.levels(), vec![0.0, 1.0, 0.0]);
        assert_eq!(driver.level(17), 1.0);
    }

    #[test]
    fn debouncer_ignores_bounce() {
        let start = Instant::now();
        let ms = |n| start + Duration::from_millis(n);
        let mut d = Debouncer::default();

        assert!(!d.feed(true, ms(0)));
        assert!(!d.feed(false, ms(5)));
        assert!(!d.feed(true, ms(10)));
        assert!(!d.feed(true, ms(40)));
        assert!(d.feed(true, ms(60)));
        // Held down: no repeat.
        assert!(!d.feed(true, ms(200)));
        // Release settles without a press event.
        assert!(!d.feed(false, ms(210)));
        assert!(!d.feed(false, ms(270)));
        assert!(!d.feed(true, ms(280)));
        assert!(d.feed(true, ms(330)));
    }

    #[test]
    fn run_follows_presses_and_settles_on_close() {
        let driver = MemoryDriver::new();
        let bank = OutputBank::new(Box::new(driver.clone()), &[4, 17]).unwrap();
        let mut life = Lifecycle::new(bank);
        let (tx, rx) = mpsc::channel();
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        drop(tx);

        run(&mut life, &StopSignal::new(), &rx);

        assert_eq!(life.bank().levels(), vec![0.0, 0.0]);
        assert!(driver.is_claimed(4));
    }
}
