//! Bounded stat arithmetic, wellbeing and reward issuance.
//!
//! Everything here is pure. The reward roll is the only random element and
//! goes through [`RandomSource`] so callers can pin it.

use crate::model::{millis_to_utc, PetState, RawPet, STAT_MAX, STAT_MIN};
use log::warn;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Upper bound applied when sanitizing persisted coin balances.
pub const COINS_MAX: u64 = 999_999;

pub const REWARD_THRESHOLD: f64 = 70.0;
pub const REWARD_CHOICES: [u64; 3] = [1, 2, 3];

/// Clamp a percentage stat into `[0, 100]`. NaN maps to 0.
pub fn clamp_stat(value: f64) -> f64 {
    if value.is_nan() {
        return STAT_MIN;
    }
    value.clamp(STAT_MIN, STAT_MAX)
}

/// `max(0, floor(value))`, saturating at `u64::MAX`. NaN maps to 0.
pub fn clamp_coins(value: f64) -> u64 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    // `as` saturates for out-of-range floats.
    value.floor() as u64
}

/// Composite 0..=100 score. Hunger is inverted since lower is better.
pub fn wellbeing(state: &PetState) -> f64 {
    (state.happiness + (STAT_MAX - state.hunger) + state.cleanliness + state.energy) / 4.0
}

pub trait RandomSource {
    /// Uniform index in `0..n`. `n` is never zero.
    fn next_index(&mut self, n: usize) -> usize;
}

pub struct ThreadRandom(StdRng);

impl ThreadRandom {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for ThreadRandom {
    fn next_index(&mut self, n: usize) -> usize {
        self.0.gen_range(0..n)
    }
}

/// Always returns the same index (wrapped into range).
#[derive(Clone, Copy, Debug)]
pub struct FixedRandom(pub usize);

impl RandomSource for FixedRandom {
    fn next_index(&mut self, n: usize) -> usize {
        self.0 % n
    }
}

/// Coins earned for reaching `wellbeing`: one of {1,2,3} above the
/// threshold, otherwise 0. The source is only consulted when a reward is due.
pub fn reward_for(wellbeing: f64, rng: &mut dyn RandomSource) -> u64 {
    if wellbeing > REWARD_THRESHOLD {
        REWARD_CHOICES[rng.next_index(REWARD_CHOICES.len())]
    } else {
        0
    }
}

/// One field that had to be corrected while sanitizing persisted data.
/// `from` is `None` when the field was missing or not a number.
#[derive(Clone, Debug, PartialEq)]
pub struct Correction {
    pub field: &'static str,
    pub from: Option<f64>,
    pub to: f64,
}

/// Turn a possibly malformed stored pet into a valid one, recording every
/// value that changed. Stats are clamped, coins floored into
/// `[0, COINS_MAX]`, and only missing fields take the default.
pub fn sanitize(raw: &RawPet, now_ms: i64) -> (PetState, Vec<Correction>) {
    let defaults = PetState::new_default(now_ms);
    let mut corrections = Vec::new();
    let mut fix = |field: &'static str, from: Option<f64>, default: f64, clamp: fn(f64) -> f64| {
        let to = from.map_or(default, clamp);
        if from != Some(to) {
            corrections.push(Correction { field, from, to });
        }
        to
    };

    let happiness = fix("happiness", raw.happiness, defaults.happiness, clamp_stat);
    let hunger = fix("hunger", raw.hunger, defaults.hunger, clamp_stat);
    let cleanliness = fix("cleanliness", raw.cleanliness, defaults.cleanliness, clamp_stat);
    let energy = fix("energy", raw.energy, defaults.energy, clamp_stat);
    let coins = fix("coins", raw.coins, defaults.coins as f64, |c| {
        clamp_coins(c).min(COINS_MAX) as f64
    });

    let state = PetState {
        happiness,
        hunger,
        cleanliness,
        energy,
        coins: coins as u64,
        last_update_time: raw.last_update_time.unwrap_or(now_ms),
    };
    (state, corrections)
}

pub(crate) fn log_corrections(source: &str, corrections: &[Correction]) {
    for c in corrections {
        match c.from {
            Some(from) => warn!("{source}: {} corrected from {from} to {}", c.field, c.to),
            None => warn!("{source}: {} missing, defaulted to {}", c.field, c.to),
        }
    }
}

/// Human-readable stamp for log lines.
pub(crate) fn stamp(ms: i64) -> String {
    millis_to_utc(ms).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_handles_nan_and_bounds() {
        assert_eq!(clamp_stat(f64::NAN), 0.0);
        assert_eq!(clamp_stat(-5.0), 0.0);
        assert_eq!(clamp_stat(140.0), 100.0);
        assert_eq!(clamp_stat(f64::INFINITY), 100.0);
        assert_eq!(clamp_stat(42.5), 42.5);
    }

    #[test]
    fn coins_floor_and_floor_at_zero() {
        assert_eq!(clamp_coins(12.9), 12);
        assert_eq!(clamp_coins(-3.0), 0);
        assert_eq!(clamp_coins(f64::NAN), 0);
    }

    #[test]
    fn wellbeing_inverts_hunger() {
        let st = PetState {
            happiness: 85.0,
            hunger: 0.0,
            cleanliness: 85.0,
            energy: 80.0,
            coins: 0,
            last_update_time: 0,
        };
        assert_eq!(wellbeing(&st), 87.5);
    }

    #[test]
    fn reward_is_gated_on_threshold() {
        let mut rng = FixedRandom(2);
        assert_eq!(reward_for(70.0, &mut rng), 0);
        assert_eq!(reward_for(70.01, &mut rng), 3);
        assert_eq!(reward_for(99.0, &mut FixedRandom(0)), 1);
    }

    #[test]
    fn seeded_rewards_stay_in_set() {
        let mut rng = ThreadRandom::seeded(7);
        for _ in 0..200 {
            let r = reward_for(90.0, &mut rng);
            assert!(REWARD_CHOICES.contains(&r));
        }
    }

    #[test]
    fn sanitize_records_each_correction() {
        let raw = RawPet {
            happiness: Some(120.0),
            hunger: Some(-4.0),
            cleanliness: Some(50.0),
            energy: Some(100.0),
            coins: Some(-7.0),
            last_update_time: Some(5),
        };
        let (state, corrections) = sanitize(&raw, 99);
        assert_eq!(state.happiness, 100.0);
        assert_eq!(state.hunger, 0.0);
        assert_eq!(state.coins, 0);
        assert_eq!(state.last_update_time, 5);
        let fields: Vec<_> = corrections.iter().map(|c| c.field).collect();
        assert_eq!(fields, vec!["happiness", "hunger", "coins"]);
    }

    #[test]
    fn sanitize_caps_huge_balances() {
        let mut raw = RawPet::from(&PetState::new_default(0));
        raw.coins = Some(5_000_000.0);
        let (state, corrections) = sanitize(&raw, 0);
        assert_eq!(state.coins, COINS_MAX);
        assert_eq!(corrections.len(), 1);
    }

    #[test]
    fn sanitize_floors_fractional_coins() {
        let mut raw = RawPet::from(&PetState::new_default(0));
        raw.coins = Some(12.5);
        let (state, corrections) = sanitize(&raw, 0);
        assert_eq!(state.coins, 12);
        assert_eq!(
            corrections,
            vec![Correction { field: "coins", from: Some(12.5), to: 12.0 }]
        );
    }

    #[test]
    fn sanitize_defaults_only_missing_fields() {
        let raw = RawPet {
            hunger: Some(60.0),
            coins: Some(3.0),
            ..RawPet::default()
        };
        let (state, corrections) = sanitize(&raw, 42);
        let defaults = PetState::new_default(42);
        assert_eq!(state.hunger, 60.0);
        assert_eq!(state.coins, 3);
        assert_eq!(state.happiness, defaults.happiness);
        assert_eq!(state.energy, defaults.energy);
        assert_eq!(state.last_update_time, 42);
        assert!(corrections.iter().all(|c| c.from.is_none()));
        assert_eq!(corrections.len(), 3);
    }

    #[test]
    fn valid_state_needs_no_corrections() {
        let st = PetState::new_default(7);
        assert_eq!(sanitize(&RawPet::from(&st), 0), (st, Vec::new()));
    }
}
