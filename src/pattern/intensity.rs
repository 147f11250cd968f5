//! Dimming patterns.
//!
//! Every pattern here runs inside [`Stage::with_intensity`], so the bank is
//! back in binary mode, all off, however the pattern ends. Frames are
//! computed for every line first and then applied in one pass.

use super::Stage;
use crate::error::PatternError;
use rand::Rng;
use std::f64::consts::TAU;
use std::ops::RangeInclusive;

/// Brightness of the lines right behind a sweeping head.
pub const TRAIL: f64 = 0.3;

/// Steps in one full sine period for the wave and pendulum.
const STEPS_PER_CYCLE: u32 = 40;

pub const FIRE_LEVEL: RangeInclusive<f64> = 0.2..=1.0;
pub const FIRE_HOLD: RangeInclusive<f64> = 0.05..=0.15;

// ── Frame helpers ──────────────────────────────────────────────────

/// Map the sine range [-1, 1] onto [0, 1].
pub fn sine_level(theta: f64) -> f64 {
    (theta.sin() + 1.0) / 2.0
}

/// Direction a sweep head is travelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sweep {
    /// Towards higher line indices.
    Up,
    Down,
}

/// Head at full brightness, the line it just left at [`TRAIL`].
pub fn trail_frame(width: usize, head: usize, sweep: Sweep) -> Vec<f64> {
    let behind = match sweep {
        Sweep::Up => head.checked_sub(1),
        Sweep::Down => Some(head + 1).filter(|&i| i < width),
    };
    (0..width)
        .map(|i| {
            if i == head {
                1.0
            } else if Some(i) == behind {
                TRAIL
            } else {
                0.0
            }
        })
        .collect()
}

/// Knight rider sweep: up across every line, then down across every line.
pub fn knight_rider_path(width: usize) -> Vec<(usize, Sweep)> {
    (0..width)
        .map(|i| (i, Sweep::Up))
        .chain((0..width).rev().map(|i| (i, Sweep::Down)))
        .collect()
}

/// Fade up then down in 5% steps.
pub fn breathing_ramp() -> Vec<f64> {
    (0..=100u32)
        .step_by(5)
        .chain((0..=100u32).rev().step_by(5))
        .map(|pct| f64::from(pct) / 100.0)
        .collect()
}

/// Sine wave travelling across the bank, one period per cycle.
pub fn sine_wave_frame(width: usize, step: u32) -> Vec<f64> {
    let theta = TAU * f64::from(step) / f64::from(STEPS_PER_CYCLE);
    (0..width)
        .map(|i| sine_level(theta - TAU * i as f64 / width as f64))
        .collect()
}

/// Pendulum bob position and direction at `step`.
pub fn pendulum_head(width: usize, step: u32) -> (usize, Sweep) {
    let theta = TAU * f64::from(step) / f64::from(STEPS_PER_CYCLE);
    let span = width.saturating_sub(1) as f64;
    let head = (span * sine_level(theta)).round() as usize;
    let sweep = if theta.cos() >= 0.0 {
        Sweep::Up
    } else {
        Sweep::Down
    };
    (head.min(width.saturating_sub(1)), sweep)
}

/// Equalizer bars: every line below `level` full, the line the level
/// falls in partly lit.
pub fn spectrum_frame(width: usize, level: f64) -> Vec<f64> {
    (0..width)
        .map(|i| (level - i as f64).clamp(0.0, 1.0))
        .collect()
}

/// Heartbeat: a strong "lub", a short pause, a softer "dub", then rest.
/// Each entry is (level for every line, hold).
pub fn heartbeat_timeline() -> Vec<(f64, f64)> {
    const BEAT: f64 = 0.04;
    let pulse = |peak: f64| {
        [0.0, peak / 2.0, peak, peak / 2.0, 0.0]
            .into_iter()
            .map(move |level| (level, BEAT))
    };
    pulse(1.0)
        .chain([(0.0, 0.1)])
        .chain(pulse(0.6))
        .chain([(0.0, 0.6)])
        .collect()
}

pub fn draw_fire<R: Rng>(rng: &mut R, width: usize) -> Vec<f64> {
    (0..width).map(|_| rng.gen_range(FIRE_LEVEL)).collect()
}

// ── Patterns ───────────────────────────────────────────────────────

pub fn breathing(stage: &mut Stage<'_>, cycles: u32) -> Result<(), PatternError> {
    stage.with_intensity(|stage| {
        let width = stage.width();
        let ramp = breathing_ramp();
        for _ in 0..cycles {
            for &level in &ramp {
                stage.levels(&vec![level; width])?;
                stage.hold(0.05)?;
            }
        }
        Ok(())
    })
}

pub fn knight_rider(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    stage.with_intensity(|stage| {
        let width = stage.width();
        let path = knight_rider_path(width);
        for _ in 0..reps {
            for &(head, sweep) in &path {
                stage.levels(&trail_frame(width, head, sweep))?;
                stage.hold(0.15)?;
            }
        }
        Ok(())
    })
}

/// Random flicker for `seconds` time units.
pub fn fire(stage: &mut Stage<'_>, seconds: u32) -> Result<(), PatternError> {
    stage.with_intensity(|stage| {
        let width = stage.width();
        let mut elapsed = 0.0;
        while elapsed < f64::from(seconds) {
            let frame = draw_fire(stage.rng(), width);
            let hold = stage.rng().gen_range(FIRE_HOLD);
            stage.levels(&frame)?;
            stage.hold(hold)?;
            elapsed += hold;
        }
        Ok(())
    })
}

pub fn heartbeat(stage: &mut Stage<'_>, beats: u32) -> Result<(), PatternError> {
    stage.with_intensity(|stage| {
        let width = stage.width();
        let timeline = heartbeat_timeline();
        for _ in 0..beats {
            for &(level, units) in &timeline {
                stage.levels(&vec![level; width])?;
                stage.hold(units)?;
            }
        }
        Ok(())
    })
}

pub fn sine_wave(stage: &mut Stage<'_>, cycles: u32) -> Result<(), PatternError> {
    stage.with_intensity(|stage| {
        let width = stage.width();
        for _ in 0..cycles {
            for step in 0..STEPS_PER_CYCLE {
                stage.levels(&sine_wave_frame(width, step))?;
                stage.hold(0.05)?;
            }
        }
        Ok(())
    })
}

pub fn pendulum(stage: &mut Stage<'_>, swings: u32) -> Result<(), PatternError> {
    stage.with_intensity(|stage| {
        let width = stage.width();
        for _ in 0..swings {
            for step in 0..STEPS_PER_CYCLE {
                let (head, sweep) = pendulum_head(width, step);
                stage.levels(&trail_frame(width, head, sweep))?;
                stage.hold(0.05)?;
            }
        }
        Ok(())
    })
}

/// Random equalizer bars for `seconds` time units, 10 steps per unit.
pub fn spectrum(stage: &mut Stage<'_>, seconds: u32) -> Result<(), PatternError> {
    stage.with_intensity(|stage| {
        let width = stage.width();
        for _ in 0..seconds {
            for _ in 0..10 {
                let level = stage.rng().gen_range(0.0..=width as f64);
                stage.levels(&spectrum_frame(width, level))?;
                stage.hold(0.1)?;
            }
        }
        Ok(())
    })
}
