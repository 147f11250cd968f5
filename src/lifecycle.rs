//! Lifecycle manager: the single place hardware gets handed back.
//!
//! [`Lifecycle`] owns the output bank for the whole run. `shutdown()` puts
//! the bank back in binary mode and releases every pin, which drives each
//! line off on the way. It runs once; later calls (including the one from `Drop` when the
//! value goes away, or when a panic unwinds past it) do nothing.
//!
//! ## Rust concepts
//! - `Drop` as a cleanup path that runs on every exit, panics included
//! - Logging and recording errors instead of returning them

use crate::bank::{LineMode, OutputBank};
use crate::error::BankError;

pub struct Lifecycle {
    bank: OutputBank,
    shut_down: bool,
    faults: Vec<BankError>,
}

impl Lifecycle {
    pub fn new(bank: OutputBank) -> Self {
        Self {
            bank,
            shut_down: false,
            faults: Vec::new(),
        }
    }

    pub fn bank(&self) -> &OutputBank {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut OutputBank {
        &mut self.bank
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Faults seen during shutdown or settling, oldest first.
    pub fn faults(&self) -> &[BankError] {
        &self.faults
    }

    fn record(&mut self, step: &str, result: Result<(), BankError>) {
        if let Err(e) = result {
            tracing::warn!("{} failed during cleanup ({}): {}", step, e.kind(), e);
            self.faults.push(e);
        }
    }

    /// Everything off, binary mode, handles kept. Used between playlists.
    pub fn settle(&mut self) {
        if self.shut_down {
            return;
        }
        let off = self.bank.all_off();
        self.record("all_off", off);
        let mode = self.bank.switch_mode(LineMode::Binary);
        self.record("switch_mode", mode);
    }

    /// Reset to binary mode, then release all pins. Both steps leave the
    /// lines off, so no separate all-off pass is made.
    ///
    /// Never fails and never panics; faults are logged and kept in
    /// [`Lifecycle::faults`]. Only the first call does any work.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let mode = self.bank.switch_mode(LineMode::Binary);
        self.record("switch_mode", mode);
        let released = self.bank.release();
        self.record("release", released);

        tracing::info!("All LEDs turned off, GPIO released");
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use pretty_assertions::assert_eq;

    fn lifecycle(pins: &[u8]) -> (Lifecycle, MemoryDriver) {
        let driver = MemoryDriver::new();
        let bank = OutputBank::new(Box::new(driver.clone()), pins).unwrap();
        (Lifecycle::new(bank), driver)
    }

    #[test]
    fn shutdown_turns_off_resets_mode_and_releases() {
        let (mut life, driver) = lifecycle(&[4, 17, 27]);
        life.bank_mut().switch_mode(LineMode::Intensity).unwrap();
        life.bank_mut().show_levels(&[1.0, 0.5, 0.3]).unwrap();

        life.shutdown();

        assert!(life.is_shut_down());
        assert_eq!(life.bank().mode(), LineMode::Binary);
        assert!(life.bank().is_released());
        assert_eq!(life.bank().levels(), vec![0.0, 0.0, 0.0]);
        assert!([4, 17, 27].iter().all(|&p| !driver.is_claimed(p)));
        assert!(life.faults().is_empty());
    }

    #[test]
    fn shutdown_writes_each_line_once() {
        let (mut life, driver) = lifecycle(&[4, 17, 27]);
        life.bank_mut().all_on().unwrap();
        let writes = driver.write_count();
        life.shutdown();
        assert_eq!(driver.write_count(), writes + 3);
        assert_eq!(driver.level(27), 0.0);
    }

    #[test]
    fn second_shutdown_does_nothing() {
        let (mut life, driver) = lifecycle(&[4, 17]);
        life.shutdown();
        let writes = driver.write_count();
        let releases = driver.release_count();
        life.shutdown();
        assert_eq!(driver.write_count(), writes);
        assert_eq!(driver.release_count(), releases);
    }

    #[test]
    fn drop_runs_shutdown() {
        let (mut life, driver) = lifecycle(&[4]);
        life.bank_mut().all_on().unwrap();
        drop(life);
        assert!(!driver.is_claimed(4));
        assert_eq!(driver.level(4), 0.0);
    }

    #[test]
    fn faults_are_recorded_not_raised() {
        let (mut life, driver) = lifecycle(&[4, 17]);
        life.bank_mut().all_on().unwrap();
        driver.fail_pin(17);
        life.shutdown();
        assert!(life.is_shut_down());
        assert!(!life.faults().is_empty());
        assert!(life.faults().iter().all(BankError::is_hardware));
        assert!(!driver.is_claimed(4));
    }

    #[test]
    fn settle_keeps_handles() {
        let (mut life, driver) = lifecycle(&[4, 17]);
        life.bank_mut().switch_mode(LineMode::Intensity).unwrap();
        life.bank_mut().all_on().unwrap();
        life.settle();
        assert_eq!(life.bank().mode(), LineMode::Binary);
        assert_eq!(life.bank().levels(), vec![0.0, 0.0]);
        assert!(driver.is_claimed(4));
        assert!(!life.is_shut_down());
    }

    #[test]
    fn shutdown_survives_a_panicking_pattern() {
        let driver = MemoryDriver::new();
        let observer = driver.clone();
        let result = std::panic::catch_unwind(move || {
            let bank = OutputBank::new(Box::new(driver), &[4, 17]).unwrap();
            let mut life = Lifecycle::new(bank);
            life.bank_mut().all_on().unwrap();
            panic!("pattern blew up");
        });
        assert!(result.is_err());
        assert!(!observer.is_claimed(4));
        assert_eq!(observer.level(17), 0.0);
    }
}
