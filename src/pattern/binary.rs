//! On/off patterns.
//!
//! Each pattern works out which lines are lit at a step from the step
//! index alone (the frame helpers below), shows that frame, then holds.
//! Only sparkle and lightning draw random numbers.

use super::Stage;
use crate::error::PatternError;
use rand::Rng;
use rand::seq::index;
use std::ops::RangeInclusive;

// ── Frame helpers ──────────────────────────────────────────────────

/// Exactly line `index` lit.
pub fn single(width: usize, index: usize) -> Vec<bool> {
    (0..width).map(|i| i == index).collect()
}

/// Lines `0..count` lit.
pub fn filled(width: usize, count: usize) -> Vec<bool> {
    (0..width).map(|i| i < count).collect()
}

/// Line `k` lit iff bit `k` of `count` is set, most significant bit on
/// line 0. `count` is taken modulo 2^width.
pub fn binary_frame(count: u32, width: usize) -> Vec<bool> {
    (0..width)
        .map(|k| {
            let shift = width - 1 - k;
            shift < 32 && (count >> shift) & 1 == 1
        })
        .collect()
}

/// Head positions of a bounce: out to the last line and back, without
/// repeating either end.
pub fn bounce_path(width: usize) -> Vec<usize> {
    let mut path: Vec<usize> = (0..width).collect();
    if width > 2 {
        path.extend((1..width - 1).rev());
    }
    path
}

/// Fill counts of a wave: grow to full, then shrink back to one line.
pub fn wave_path(width: usize) -> Vec<usize> {
    let mut path: Vec<usize> = (1..=width).collect();
    path.extend((1..width).rev());
    path
}

/// Even lines on phase 0, odd lines on phase 1.
pub fn alternating_frame(width: usize, phase: usize) -> Vec<bool> {
    (0..width).map(|i| i % 2 == phase % 2).collect()
}

/// Two heads half a bank apart, both moving right.
pub fn multi_chase_frame(width: usize, step: usize) -> Vec<bool> {
    let first = step % width;
    let second = (step + width / 2) % width;
    (0..width).map(|i| i == first || i == second).collect()
}

/// Role of a line in the traffic light: 0 red, 1 amber, 2 green.
fn light_role(index: usize) -> usize {
    index % 3
}

/// Traffic light phases: (lit roles, hold).
const TRAFFIC_PHASES: [(&[usize], f64); 4] = [
    (&[2], 2.0),
    (&[1], 0.7),
    (&[0], 2.0),
    (&[0, 1], 0.7),
];

pub fn traffic_frame(width: usize, phase: usize) -> Vec<bool> {
    let (roles, _) = TRAFFIC_PHASES[phase % TRAFFIC_PHASES.len()];
    (0..width).map(|i| roles.contains(&light_role(i))).collect()
}

// ── Morse ──────────────────────────────────────────────────────────

const DOT: f64 = 0.2;
const DASH: f64 = 0.6;
const SYMBOL_GAP: f64 = 0.2;
const LETTER_GAP: f64 = 0.4;
const WORD_GAP: f64 = 1.0;

/// SOS as (all lines on?, hold) steps.
pub fn sos_timeline() -> Vec<(bool, f64)> {
    let letter = |on: f64| [(true, on), (false, SYMBOL_GAP)].repeat(3);
    let mut steps = letter(DOT);
    steps.push((false, LETTER_GAP));
    steps.extend(letter(DASH));
    steps.push((false, LETTER_GAP));
    steps.extend(letter(DOT));
    steps.push((false, WORD_GAP));
    steps
}

// ── Lightning ──────────────────────────────────────────────────────

pub const LIGHTNING_FLASH: RangeInclusive<f64> = 0.05..=0.15;
pub const LIGHTNING_GAP: RangeInclusive<f64> = 0.05..=0.10;
pub const LIGHTNING_DARK: RangeInclusive<f64> = 0.5..=2.0;
pub const LIGHTNING_FLASHES: RangeInclusive<usize> = 1..=3;

/// One lightning strike: which lines flash, each flash's (on, off)
/// durations, and the dark pause after it.
#[derive(Clone, Debug, PartialEq)]
pub struct Strike {
    pub frame: Vec<bool>,
    pub flashes: Vec<(f64, f64)>,
    pub dark: f64,
}

pub fn draw_strike<R: Rng>(rng: &mut R, width: usize) -> Strike {
    let count = rng.gen_range(1..=width);
    let mut frame = vec![false; width];
    for i in index::sample(rng, width, count) {
        frame[i] = true;
    }
    let flashes = (0..rng.gen_range(LIGHTNING_FLASHES))
        .map(|_| (rng.gen_range(LIGHTNING_FLASH), rng.gen_range(LIGHTNING_GAP)))
        .collect();
    Strike {
        frame,
        flashes,
        dark: rng.gen_range(LIGHTNING_DARK),
    }
}

/// Most lines a sparkle step lights: two thirds of the bank, at least one.
pub fn sparkle_limit(width: usize) -> usize {
    (width * 2 / 3).max(1)
}

pub fn draw_sparkle<R: Rng>(rng: &mut R, width: usize) -> Vec<bool> {
    let count = rng.gen_range(1..=sparkle_limit(width));
    let mut frame = vec![false; width];
    for i in index::sample(rng, width, count) {
        frame[i] = true;
    }
    frame
}

// ── Patterns ───────────────────────────────────────────────────────

pub fn chase(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    for _ in 0..reps {
        for i in 0..stage.width() {
            stage.only(i)?;
            stage.hold(0.3)?;
        }
    }
    Ok(())
}

pub fn chase_reverse(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    for _ in 0..reps {
        for i in (0..stage.width()).rev() {
            stage.only(i)?;
            stage.hold(0.3)?;
        }
    }
    Ok(())
}

pub fn bounce(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    let path = bounce_path(stage.width());
    for _ in 0..reps {
        for &i in &path {
            stage.only(i)?;
            stage.hold(0.2)?;
        }
    }
    Ok(())
}

pub fn flash(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    for _ in 0..reps {
        stage.all_on()?;
        stage.hold(0.2)?;
        stage.all_off()?;
        stage.hold(0.2)?;
    }
    Ok(())
}

pub fn alternating(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    let width = stage.width();
    for _ in 0..reps {
        for phase in 0..2 {
            stage.show(&alternating_frame(width, phase))?;
            stage.hold(0.3)?;
        }
    }
    Ok(())
}

pub fn sparkle(stage: &mut Stage<'_>, steps: u32) -> Result<(), PatternError> {
    let width = stage.width();
    for _ in 0..steps {
        let frame = draw_sparkle(stage.rng(), width);
        stage.show(&frame)?;
        stage.hold(0.15)?;
    }
    Ok(())
}

pub fn wave(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    let width = stage.width();
    let path = wave_path(width);
    for _ in 0..reps {
        for &count in &path {
            stage.show(&filled(width, count))?;
            stage.hold(0.2)?;
        }
    }
    Ok(())
}

pub fn binary_count(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    let width = stage.width();
    let states = 1u32 << width.min(31);
    for _ in 0..reps {
        for count in 0..states {
            stage.show(&binary_frame(count, width))?;
            stage.hold(0.5)?;
        }
    }
    Ok(())
}

pub fn sos(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    let timeline = sos_timeline();
    for _ in 0..reps {
        for &(on, units) in &timeline {
            if on {
                stage.all_on()?;
            } else {
                stage.all_off()?;
            }
            stage.hold(units)?;
        }
    }
    Ok(())
}

pub fn traffic_light(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    let width = stage.width();
    for _ in 0..reps {
        for (phase, &(_, units)) in TRAFFIC_PHASES.iter().enumerate() {
            stage.show(&traffic_frame(width, phase))?;
            stage.hold(units)?;
        }
    }
    Ok(())
}

pub fn multi_chase(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    let width = stage.width();
    for _ in 0..reps {
        for step in 0..width {
            stage.show(&multi_chase_frame(width, step))?;
            stage.hold(0.15)?;
        }
    }
    Ok(())
}

pub fn lightning(stage: &mut Stage<'_>, strikes: u32) -> Result<(), PatternError> {
    let width = stage.width();
    for _ in 0..strikes {
        let strike = draw_strike(stage.rng(), width);
        for &(on, off) in &strike.flashes {
            stage.show(&strike.frame)?;
            stage.hold(on)?;
            stage.all_off()?;
            stage.hold(off)?;
        }
        stage.hold(strike.dark)?;
    }
    Ok(())
}

/// Light each line alone for 0.5 units, then turn it off, in wiring
/// order. Same timing as the menu's startup check; there is no all-on
/// phase.
pub fn wiring_check(stage: &mut Stage<'_>, reps: u32) -> Result<(), PatternError> {
    for _ in 0..reps {
        for i in 0..stage.width() {
            tracing::info!("Testing line {} (GPIO{})", i, stage.bank().lines()[i].pin);
            stage.only(i)?;
            stage.hold(0.5)?;
            stage.all_off()?;
        }
    }
    Ok(())
}
