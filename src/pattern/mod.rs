//! Pattern library and the stage patterns perform on.
//!
//! A pattern is a plain function `fn(&mut Stage, u32)`: it owns nothing
//! between runs, blocks for its own duration, and touches the hardware
//! only through the [`Stage`], which wraps the output bank with timing,
//! cancellation checkpoints and fault handling.
//!
//! ## Rust concepts
//! - Function pointers (`Routine`) as first-class values in playlists
//! - Closures taking `&mut Stage` for scoped mode changes
//! - `FromStr` so pattern names parse straight from the command line

pub mod binary;
pub mod intensity;

use crate::bank::{LineMode, OutputBank};
use crate::error::{BankError, ConfigError, PatternError};
use crate::runner::StatusHandle;
use crate::{StopSignal, Tempo};
use rand::rngs::StdRng;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

/// Signature shared by every pattern: the stage and the pattern's
/// repetition/duration parameter.
pub type Routine = fn(&mut Stage<'_>, u32) -> Result<(), PatternError>;

/// Longest single sleep before the stop flag is checked again.
const POLL_SLICE: Duration = Duration::from_millis(50);

// ── Stage ──────────────────────────────────────────────────────────

/// Everything a pattern needs while it runs.
pub struct Stage<'a> {
    bank: &'a mut OutputBank,
    stop: &'a StopSignal,
    tempo: Tempo,
    rng: &'a mut StdRng,
    status: Option<&'a StatusHandle>,
}

impl<'a> Stage<'a> {
    pub fn new(
        bank: &'a mut OutputBank,
        stop: &'a StopSignal,
        tempo: Tempo,
        rng: &'a mut StdRng,
    ) -> Self {
        Self {
            bank,
            stop,
            tempo,
            rng,
            status: None,
        }
    }

    /// Mirror line levels into a shared status on every hold.
    pub fn with_status(mut self, status: &'a StatusHandle) -> Self {
        self.status = Some(status);
        self
    }

    /// Number of lines in the bank.
    pub fn width(&self) -> usize {
        self.bank.len()
    }

    pub fn bank(&self) -> &OutputBank {
        &*self.bank
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut *self.rng
    }

    /// Fail with `Interrupted` if a stop has been requested.
    pub fn checkpoint(&self) -> Result<(), PatternError> {
        if self.stop.is_requested() {
            Err(PatternError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Keep the current frame for `units` time units.
    ///
    /// The stop flag is polled before, during and after the sleep, so a
    /// stop lands within one timestep.
    pub fn hold(&mut self, units: f64) -> Result<(), PatternError> {
        self.checkpoint()?;
        tracing::trace!("{} hold {:.2}", self.bank.render(), units);
        if let Some(status) = self.status {
            let levels = self.bank.levels();
            let mode = self.bank.mode();
            if let Ok(mut s) = status.lock() {
                s.lines = levels;
                s.mode = mode;
            }
        }

        let deadline = Instant::now() + self.tempo.duration(units);
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(POLL_SLICE));
            self.checkpoint()?;
        }
        self.checkpoint()
    }

    /// A write failure that only concerns hardware ends this pattern as a
    /// step fault; any other bank error is fatal.
    fn absorb(&self, result: Result<(), BankError>) -> Result<(), PatternError> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_hardware() => Err(PatternError::StepFault(e)),
            Err(e) => Err(e.into()),
        }
    }

    /// Light exactly the lines marked true.
    pub fn show(&mut self, frame: &[bool]) -> Result<(), PatternError> {
        let result = self.bank.show_binary(frame);
        self.absorb(result)
    }

    /// Light one line, everything else off.
    pub fn only(&mut self, index: usize) -> Result<(), PatternError> {
        let frame = binary::single(self.width(), index);
        self.show(&frame)
    }

    pub fn all_on(&mut self) -> Result<(), PatternError> {
        let result = self.bank.all_on();
        self.absorb(result)
    }

    pub fn all_off(&mut self) -> Result<(), PatternError> {
        let result = self.bank.all_off();
        self.absorb(result)
    }

    /// Set every line's intensity at once. Needs intensity mode.
    pub fn levels(&mut self, frame: &[f64]) -> Result<(), PatternError> {
        let result = self.bank.show_levels(frame);
        self.absorb(result)
    }

    /// Run `body` with the bank in intensity mode.
    ///
    /// The bank goes back to binary mode, all off, whichever way `body`
    /// returns. A failed mode switch is returned as a fatal error.
    pub fn with_intensity<F>(&mut self, body: F) -> Result<(), PatternError>
    where
        F: FnOnce(&mut Stage<'_>) -> Result<(), PatternError>,
    {
        let _ = self.bank.all_off();
        self.bank.switch_mode(LineMode::Intensity)?;

        let outcome = body(self);

        let _ = self.bank.all_off();
        let restored = self.bank.switch_mode(LineMode::Binary);
        match (outcome, restored) {
            (Err(e), _) if e.is_fatal() => Err(e),
            (_, Err(e)) => Err(e.into()),
            (outcome, Ok(())) => outcome,
        }
    }
}

// ── Pattern catalog ────────────────────────────────────────────────

/// Which representation a pattern drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Binary,
    Intensity,
}

/// Every pattern the show knows, in show order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pattern {
    Chase,
    ChaseReverse,
    Bounce,
    Flash,
    Alternating,
    Breathing,
    Sparkle,
    Wave,
    BinaryCount,
    KnightRider,
    Sos,
    TrafficLight,
    MultiChase,
    Lightning,
    Fire,
    Heartbeat,
    SineWave,
    Pendulum,
    Spectrum,
    WiringCheck,
}

impl Pattern {
    pub const ALL: [Pattern; 20] = [
        Pattern::Chase,
        Pattern::ChaseReverse,
        Pattern::Bounce,
        Pattern::Flash,
        Pattern::Alternating,
        Pattern::Breathing,
        Pattern::Sparkle,
        Pattern::Wave,
        Pattern::BinaryCount,
        Pattern::KnightRider,
        Pattern::Sos,
        Pattern::TrafficLight,
        Pattern::MultiChase,
        Pattern::Lightning,
        Pattern::Fire,
        Pattern::Heartbeat,
        Pattern::SineWave,
        Pattern::Pendulum,
        Pattern::Spectrum,
        Pattern::WiringCheck,
    ];

    /// Patterns that make up the full show. The wiring check is left out.
    pub fn show() -> impl Iterator<Item = Pattern> {
        Self::ALL.into_iter().filter(|p| *p != Pattern::WiringCheck)
    }

    /// Command-line identifier.
    pub fn id(self) -> &'static str {
        match self {
            Self::Chase => "chase",
            Self::ChaseReverse => "chase-reverse",
            Self::Bounce => "bounce",
            Self::Flash => "flash",
            Self::Alternating => "alternating",
            Self::Breathing => "breathing",
            Self::Sparkle => "sparkle",
            Self::Wave => "wave",
            Self::BinaryCount => "binary",
            Self::KnightRider => "knight-rider",
            Self::Sos => "sos",
            Self::TrafficLight => "traffic-light",
            Self::MultiChase => "multi-chase",
            Self::Lightning => "lightning",
            Self::Fire => "fire",
            Self::Heartbeat => "heartbeat",
            Self::SineWave => "sine-wave",
            Self::Pendulum => "pendulum",
            Self::Spectrum => "spectrum",
            Self::WiringCheck => "wiring-check",
        }
    }

    /// Human-readable name for menus and logs.
    pub fn title(self) -> &'static str {
        match self {
            Self::Chase => "Chase Left to Right",
            Self::ChaseReverse => "Chase Right to Left",
            Self::Bounce => "Bounce",
            Self::Flash => "Flash All",
            Self::Alternating => "Alternating",
            Self::Breathing => "Breathing Effect",
            Self::Sparkle => "Random Sparkle",
            Self::Wave => "Wave",
            Self::BinaryCount => "Binary Counter",
            Self::KnightRider => "Knight Rider",
            Self::Sos => "SOS Morse Code",
            Self::TrafficLight => "Traffic Light",
            Self::MultiChase => "Multi Chase",
            Self::Lightning => "Lightning Storm",
            Self::Fire => "Fire Flicker",
            Self::Heartbeat => "Heartbeat",
            Self::SineWave => "Sine Wave",
            Self::Pendulum => "Pendulum",
            Self::Spectrum => "Spectrum Analyzer",
            Self::WiringCheck => "Wiring Check",
        }
    }

    pub fn family(self) -> Family {
        match self {
            Self::Breathing
            | Self::KnightRider
            | Self::Fire
            | Self::Heartbeat
            | Self::SineWave
            | Self::Pendulum
            | Self::Spectrum => Family::Intensity,
            _ => Family::Binary,
        }
    }

    /// Parameter used when a playlist entry does not give one. Counts
    /// repetitions, except fire and spectrum which take time units.
    pub fn default_param(self) -> u32 {
        match self {
            Self::Flash => 4,
            Self::Alternating => 6,
            Self::Breathing | Self::KnightRider | Self::MultiChase | Self::SineWave => 3,
            Self::Sparkle => 15,
            Self::Wave | Self::Pendulum => 4,
            Self::TrafficLight => 2,
            Self::Lightning | Self::Heartbeat => 5,
            Self::Fire => 8,
            Self::Spectrum => 10,
            _ => 1,
        }
    }

    pub fn routine(self) -> Routine {
        match self {
            Self::Chase => binary::chase,
            Self::ChaseReverse => binary::chase_reverse,
            Self::Bounce => binary::bounce,
            Self::Flash => binary::flash,
            Self::Alternating => binary::alternating,
            Self::Breathing => intensity::breathing,
            Self::Sparkle => binary::sparkle,
            Self::Wave => binary::wave,
            Self::BinaryCount => binary::binary_count,
            Self::KnightRider => intensity::knight_rider,
            Self::Sos => binary::sos,
            Self::TrafficLight => binary::traffic_light,
            Self::MultiChase => binary::multi_chase,
            Self::Lightning => binary::lightning,
            Self::Fire => intensity::fire,
            Self::Heartbeat => intensity::heartbeat,
            Self::SineWave => intensity::sine_wave,
            Self::Pendulum => intensity::pendulum,
            Self::Spectrum => intensity::spectrum,
            Self::WiringCheck => binary::wiring_check,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Pattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|p| p.id() == wanted)
            .ok_or_else(|| ConfigError::UnknownPattern(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rstest::rstest;

    #[rstest]
    #[case("chase", Pattern::Chase)]
    #[case("Knight_Rider", Pattern::KnightRider)]
    #[case(" binary ", Pattern::BinaryCount)]
    #[case("SINE-WAVE", Pattern::SineWave)]
    fn pattern_ids_parse(#[case] input: &str, #[case] expected: Pattern) {
        assert_eq!(input.parse::<Pattern>().unwrap(), expected);
    }

    #[test]
    fn unknown_pattern_is_a_config_error() {
        assert_eq!(
            "disco".parse::<Pattern>(),
            Err(ConfigError::UnknownPattern("disco".to_string()))
        );
    }

    #[test]
    fn ids_are_unique_and_round_trip() {
        for p in Pattern::ALL {
            assert_eq!(p.id().parse::<Pattern>().unwrap(), p);
        }
    }

    #[test]
    fn show_skips_wiring_check() {
        assert_eq!(Pattern::show().count(), Pattern::ALL.len() - 1);
        assert!(Pattern::show().all(|p| p != Pattern::WiringCheck));
    }

    #[test]
    fn show_opens_with_the_classic_eleven() {
        let first: Vec<&str> = Pattern::show().take(11).map(Pattern::id).collect();
        assert_eq!(
            first,
            vec![
                "chase",
                "chase-reverse",
                "bounce",
                "flash",
                "alternating",
                "breathing",
                "sparkle",
                "wave",
                "binary",
                "knight-rider",
                "sos"
            ]
        );
    }

    fn fixture(pins: &[u8]) -> (OutputBank, MemoryDriver, StdRng) {
        let driver = MemoryDriver::new();
        let bank = OutputBank::new(Box::new(driver.clone()), pins).unwrap();
        (bank, driver, StdRng::seed_from_u64(7))
    }

    #[test]
    fn with_intensity_restores_binary_after_error() {
        let (mut bank, _, mut rng) = fixture(&[4, 17, 27]);
        let stop = StopSignal::new();
        let mut stage = Stage::new(&mut bank, &stop, Tempo::instant(), &mut rng);
        let result = stage.with_intensity(|s| {
            s.levels(&[1.0, 0.5, 0.2])?;
            Err(PatternError::Interrupted)
        });
        assert_eq!(result, Err(PatternError::Interrupted));
        assert_eq!(bank.mode(), LineMode::Binary);
        assert_eq!(bank.levels(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn failed_switch_to_intensity_is_fatal() {
        let (mut bank, driver, mut rng) = fixture(&[4]);
        let stop = StopSignal::new();
        driver.fail_claims(true);
        let mut stage = Stage::new(&mut bank, &stop, Tempo::instant(), &mut rng);
        let result = stage.with_intensity(|_| Ok(()));
        assert!(result.is_err_and(|e| e.is_fatal()));
    }

    #[test]
    fn hardware_fault_in_a_step_is_a_step_fault() {
        let (mut bank, driver, mut rng) = fixture(&[4, 17]);
        let stop = StopSignal::new();
        driver.fail_pin(17);
        let mut stage = Stage::new(&mut bank, &stop, Tempo::instant(), &mut rng);
        let result = stage.all_on();
        assert!(matches!(
            result,
            Err(PatternError::StepFault(BankError::HardwareFault { pin: 17, .. }))
        ));
        assert!(!result.is_err_and(|e| e.is_fatal()));
        // The healthy line was still written.
        assert_eq!(driver.level(4), 1.0);
    }

    #[test]
    fn step_fault_inside_intensity_scope_still_restores_binary() {
        let (mut bank, driver, mut rng) = fixture(&[4, 17]);
        let stop = StopSignal::new();
        let mut stage = Stage::new(&mut bank, &stop, Tempo::instant(), &mut rng);
        let result = stage.with_intensity(|s| {
            driver.fail_pin(17);
            let step = s.levels(&[1.0, 1.0]);
            driver.heal();
            step
        });
        assert!(matches!(result, Err(PatternError::StepFault(_))));
        assert_eq!(bank.mode(), LineMode::Binary);
    }

    #[test]
    fn hold_reports_interruption() {
        let (mut bank, _, mut rng) = fixture(&[4]);
        let stop = StopSignal::new();
        stop.request(crate::StopReason::Preempt);
        let mut stage = Stage::new(&mut bank, &stop, Tempo::instant(), &mut rng);
        assert_eq!(stage.hold(0.3), Err(PatternError::Interrupted));
    }
}
