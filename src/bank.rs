//! Output bank: the ordered set of LED lines a show drives.
//!
//! The bank owns every line handle privately. Patterns never hold pins
//! themselves; switching between on/off and dimmable representations goes
//! through [`OutputBank::switch_mode`], which releases every handle before
//! claiming it again in the new mode.
//!
//! ## Rust concepts
//! - `enum` with data (`LineValue`) as a tagged union per line
//! - `&mut self` methods: only one caller can mutate the bank at a time

use crate::driver::OutputDriver;
use crate::error::BankError;
use serde::Serialize;
use std::fmt;

// ── Line types ─────────────────────────────────────────────────────

/// Which representation is live on every line of the bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LineMode {
    Binary,
    Intensity,
}

impl fmt::Display for LineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Intensity => f.write_str("intensity"),
        }
    }
}

/// Current value of one line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LineValue {
    Binary(bool),
    Intensity(f64),
}

impl LineValue {
    /// The value as a level in [0.0, 1.0].
    pub fn level(self) -> f64 {
        match self {
            Self::Binary(on) => {
                if on {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Intensity(v) => v,
        }
    }

    pub fn is_off(self) -> bool {
        self.level() <= 0.0
    }

    fn off(mode: LineMode) -> Self {
        match mode {
            LineMode::Binary => Self::Binary(false),
            LineMode::Intensity => Self::Intensity(0.0),
        }
    }

    fn on(mode: LineMode) -> Self {
        match mode {
            LineMode::Binary => Self::Binary(true),
            LineMode::Intensity => Self::Intensity(1.0),
        }
    }
}

/// One physical indicator, addressed by its GPIO pin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputLine {
    pub pin: u8,
    pub value: LineValue,
}

/// Clamp an intensity into [0.0, 1.0]. NaN counts as off.
pub fn clamp_intensity(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ── Output bank ────────────────────────────────────────────────────

/// Fixed-size, ordered bank of output lines, index 0 first in wiring order.
pub struct OutputBank {
    driver: Box<dyn OutputDriver>,
    lines: Vec<OutputLine>,
    mode: LineMode,
    released: bool,
}

impl OutputBank {
    /// Claim every pin in binary mode, all off.
    ///
    /// If a claim fails, the pins already claimed are released again
    /// before the error is returned.
    pub fn new(mut driver: Box<dyn OutputDriver>, pins: &[u8]) -> Result<Self, BankError> {
        let mut lines: Vec<OutputLine> = Vec::with_capacity(pins.len());
        for &pin in pins {
            let ready = driver.claim(pin, LineMode::Binary).and_then(|()| {
                driver.set_binary(pin, false).map_err(|e| {
                    let _ = driver.release(pin);
                    e
                })
            });
            if let Err(e) = ready {
                for line in &lines {
                    let _ = driver.release(line.pin);
                }
                return Err(e);
            }
            lines.push(OutputLine {
                pin,
                value: LineValue::Binary(false),
            });
        }
        tracing::debug!("Output bank ready on pins {:?}", pins);
        Ok(Self {
            driver,
            lines,
            mode: LineMode::Binary,
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn mode(&self) -> LineMode {
        self.mode
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }

    pub fn pins(&self) -> Vec<u8> {
        self.lines.iter().map(|l| l.pin).collect()
    }

    pub fn value(&self, index: usize) -> Result<LineValue, BankError> {
        self.lines
            .get(index)
            .map(|l| l.value)
            .ok_or(BankError::InvalidIndex {
                index,
                len: self.lines.len(),
            })
    }

    /// Current level of every line, in wiring order.
    pub fn levels(&self) -> Vec<f64> {
        self.lines.iter().map(|l| l.value.level()).collect()
    }

    /// Compact glyph strip for log lines, e.g. `[#.:]`.
    pub fn render(&self) -> String {
        let glyphs: String = self
            .lines
            .iter()
            .map(|l| match l.value.level() {
                v if v <= 0.0 => '.',
                v if v < 0.5 => ':',
                v if v < 1.0 => '*',
                _ => '#',
            })
            .collect();
        format!("[{glyphs}]")
    }

    fn check_live(&self) -> Result<(), BankError> {
        if self.released {
            Err(BankError::Released)
        } else {
            Ok(())
        }
    }

    /// Write one line.
    ///
    /// Binary values are accepted in either mode (on maps to full
    /// intensity). Intensity values are clamped to [0.0, 1.0] and need
    /// intensity mode.
    pub fn set(&mut self, index: usize, value: LineValue) -> Result<(), BankError> {
        self.check_live()?;
        let len = self.lines.len();
        let line = self
            .lines
            .get_mut(index)
            .ok_or(BankError::InvalidIndex { index, len })?;

        let value = match (self.mode, value) {
            (LineMode::Binary, LineValue::Binary(on)) => {
                self.driver.set_binary(line.pin, on)?;
                LineValue::Binary(on)
            }
            (LineMode::Intensity, v) => {
                let level = clamp_intensity(v.level());
                self.driver.set_intensity(line.pin, level)?;
                LineValue::Intensity(level)
            }
            (LineMode::Binary, LineValue::Intensity(_)) => {
                return Err(BankError::ModeMismatch {
                    index,
                    mode: LineMode::Binary,
                });
            }
        };
        line.value = value;
        Ok(())
    }

    pub fn set_on(&mut self, index: usize, on: bool) -> Result<(), BankError> {
        self.set(index, LineValue::Binary(on))
    }

    pub fn set_intensity(&mut self, index: usize, value: f64) -> Result<(), BankError> {
        self.set(index, LineValue::Intensity(value))
    }

    /// Apply a value to every line, continuing past failures and
    /// returning them together.
    fn apply_each<F>(&mut self, mut value_for: F) -> Result<(), BankError>
    where
        F: FnMut(usize) -> LineValue,
    {
        self.check_live()?;
        let mut faults = Vec::new();
        for index in 0..self.lines.len() {
            if let Err(e) = self.set(index, value_for(index)) {
                faults.push(e);
            }
        }
        match faults.len() {
            0 => Ok(()),
            1 => Err(faults.remove(0)),
            _ => Err(BankError::Faults(faults)),
        }
    }

    pub fn all_off(&mut self) -> Result<(), BankError> {
        let mode = self.mode;
        self.apply_each(|_| LineValue::off(mode))
    }

    pub fn all_on(&mut self) -> Result<(), BankError> {
        let mode = self.mode;
        self.apply_each(|_| LineValue::on(mode))
    }

    /// Light exactly the lines for which `frame[i]` is true.
    pub fn show_binary(&mut self, frame: &[bool]) -> Result<(), BankError> {
        self.check_frame(frame.len())?;
        self.apply_each(|i| LineValue::Binary(frame[i]))
    }

    /// Set every line's intensity from `frame` in one pass.
    pub fn show_levels(&mut self, frame: &[f64]) -> Result<(), BankError> {
        self.check_frame(frame.len())?;
        if self.mode == LineMode::Binary {
            return Err(BankError::ModeMismatch {
                index: 0,
                mode: LineMode::Binary,
            });
        }
        self.apply_each(|i| LineValue::Intensity(frame[i]))
    }

    fn check_frame(&self, width: usize) -> Result<(), BankError> {
        if width == self.lines.len() {
            Ok(())
        } else {
            Err(BankError::InvalidIndex {
                index: width.min(self.lines.len()),
                len: self.lines.len(),
            })
        }
    }

    /// Release every handle and claim it again in `mode`.
    ///
    /// A no-op when the bank is already in `mode`. Lines come back off.
    pub fn switch_mode(&mut self, mode: LineMode) -> Result<(), BankError> {
        self.check_live()?;
        if self.mode == mode {
            return Ok(());
        }
        let _ = self.all_off();
        for line in &self.lines {
            self.driver.release(line.pin)?;
        }
        // From here on the bank is in the new mode, even if a claim fails.
        self.mode = mode;
        for line in &mut self.lines {
            line.value = LineValue::off(mode);
        }
        for line in &self.lines {
            self.driver.claim(line.pin, mode)?;
        }
        tracing::debug!("Output bank switched to {} mode", mode);
        Ok(())
    }

    /// Drive every line to off and give back every handle.
    ///
    /// Safe to call repeatedly; calls after the first do nothing. Faults
    /// are collected, and the bank counts as released either way.
    pub fn release(&mut self) -> Result<(), BankError> {
        if self.released {
            return Ok(());
        }
        let mut faults = Vec::new();
        if let Err(e) = self.all_off() {
            faults.push(e);
        }
        for line in &mut self.lines {
            if let Err(e) = self.driver.release(line.pin) {
                faults.push(e);
            }
            line.value = LineValue::off(self.mode);
        }
        self.released = true;
        match faults.len() {
            0 => Ok(()),
            1 => Err(faults.remove(0)),
            _ => Err(BankError::Faults(faults)),
        }
    }
}

impl fmt::Debug for OutputBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBank")
            .field("pins", &self.pins())
            .field("mode", &self.mode)
            .field("levels", &self.render())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn bank(pins: &[u8]) -> (OutputBank, MemoryDriver) {
        let driver = MemoryDriver::new();
        let bank = OutputBank::new(Box::new(driver.clone()), pins).unwrap();
        (bank, driver)
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(6)]
    #[case(16)]
    fn all_off_leaves_every_line_at_minimum(#[case] n: u8) {
        let pins: Vec<u8> = (0..n).collect();
        let (mut bank, driver) = bank(&pins);
        bank.all_on().unwrap();
        bank.all_off().unwrap();
        assert!(bank.levels().iter().all(|&v| v == 0.0));
        assert!(pins.iter().all(|&p| driver.level(p) == 0.0));

        bank.switch_mode(LineMode::Intensity).unwrap();
        bank.all_on().unwrap();
        bank.all_off().unwrap();
        assert!(bank.levels().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn set_out_of_range_is_invalid_index() {
        let (mut bank, _) = bank(&[4, 17, 27]);
        assert_eq!(
            bank.set_on(3, true),
            Err(BankError::InvalidIndex { index: 3, len: 3 })
        );
    }

    #[rstest]
    #[case(1.7, 1.0)]
    #[case(-0.2, 0.0)]
    #[case(0.42, 0.42)]
    #[case(f64::NAN, 0.0)]
    fn intensity_is_clamped(#[case] input: f64, #[case] expected: f64) {
        let (mut bank, driver) = bank(&[4]);
        bank.switch_mode(LineMode::Intensity).unwrap();
        bank.set_intensity(0, input).unwrap();
        assert_eq!(bank.value(0).unwrap(), LineValue::Intensity(expected));
        assert_eq!(driver.level(4), expected);
    }

    #[test]
    fn intensity_in_binary_mode_is_rejected() {
        let (mut bank, _) = bank(&[4]);
        assert_eq!(
            bank.set_intensity(0, 0.5),
            Err(BankError::ModeMismatch {
                index: 0,
                mode: LineMode::Binary
            })
        );
    }

    #[test]
    fn all_off_continues_past_a_failing_line() {
        let (mut bank, driver) = bank(&[4, 17, 27]);
        bank.all_on().unwrap();
        driver.fail_pin(17);
        let err = bank.all_off().unwrap_err();
        assert!(matches!(err, BankError::HardwareFault { pin: 17, .. }));
        assert_eq!(driver.level(4), 0.0);
        assert_eq!(driver.level(27), 0.0);
    }

    #[test]
    fn several_failures_are_aggregated() {
        let (mut bank, driver) = bank(&[4, 17, 27]);
        driver.fail_pin(4);
        driver.fail_pin(27);
        match bank.all_on() {
            Err(BankError::Faults(faults)) => assert_eq!(faults.len(), 2),
            other => panic!("expected aggregated faults, got {other:?}"),
        }
        assert_eq!(driver.level(17), 1.0);
    }

    #[test]
    fn switch_mode_reclaims_every_pin() {
        let (mut bank, driver) = bank(&[4, 17]);
        bank.all_on().unwrap();
        bank.switch_mode(LineMode::Intensity).unwrap();
        assert_eq!(bank.mode(), LineMode::Intensity);
        assert_eq!(driver.pin(4).unwrap().claimed, Some(LineMode::Intensity));
        assert_eq!(bank.levels(), vec![0.0, 0.0]);
        assert_eq!(driver.release_count(), 2);
    }

    #[test]
    fn failed_reclaim_leaves_the_bank_in_the_new_mode() {
        let (mut bank, driver) = bank(&[4, 17]);
        bank.all_on().unwrap();
        driver.fail_claims(true);

        assert!(bank.switch_mode(LineMode::Intensity).is_err());
        assert_eq!(bank.mode(), LineMode::Intensity);
        assert!(bank.lines().iter().all(|l| l.value == LineValue::Intensity(0.0)));

        driver.heal();
        assert!(bank.release().is_err());
        assert!(bank.is_released());
    }

    #[test]
    fn switch_mode_to_current_mode_is_a_noop() {
        let (mut bank, driver) = bank(&[4, 17]);
        bank.set_on(1, true).unwrap();
        bank.switch_mode(LineMode::Binary).unwrap();
        assert_eq!(driver.release_count(), 0);
        assert_eq!(bank.value(1).unwrap(), LineValue::Binary(true));
    }

    #[test]
    fn failed_claim_during_construction_releases_earlier_pins() {
        let driver = MemoryDriver::new();
        let mut squatter = driver.clone();
        squatter.claim(17, LineMode::Binary).unwrap();
        let result = OutputBank::new(Box::new(driver.clone()), &[4, 17, 27]);
        assert!(result.is_err());
        assert!(!driver.is_claimed(4));
        assert!(!driver.is_claimed(27));
    }

    #[test]
    fn release_twice_is_safe() {
        let (mut bank, driver) = bank(&[4, 17, 27]);
        bank.all_on().unwrap();
        bank.release().unwrap();
        let writes = driver.write_count();
        bank.release().unwrap();
        assert!(bank.is_released());
        assert_eq!(driver.write_count(), writes);
        assert!([4, 17, 27].iter().all(|&p| !driver.is_claimed(p)));
        assert!(bank.levels().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn writes_after_release_are_refused() {
        let (mut bank, _) = bank(&[4]);
        bank.release().unwrap();
        assert_eq!(bank.set_on(0, true), Err(BankError::Released));
    }

    #[test]
    fn show_binary_needs_a_full_frame() {
        let (mut bank, _) = bank(&[4, 17, 27]);
        assert!(bank.show_binary(&[true, false]).is_err());
        bank.show_binary(&[true, false, true]).unwrap();
        assert_eq!(bank.render(), "[#.#]");
    }

    #[test]
    fn render_uses_level_glyphs() {
        let (mut bank, _) = bank(&[1, 2, 3, 4]);
        bank.switch_mode(LineMode::Intensity).unwrap();
        bank.show_levels(&[0.0, 0.3, 0.7, 1.0]).unwrap();
        assert_eq!(bank.render(), "[.:*#]");
    }
}
