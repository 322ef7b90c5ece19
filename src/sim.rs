use crate::model::{ActionKind, PetState, StatDeltas};
use crate::stats::{clamp_stat, reward_for, wellbeing, RandomSource};
use serde::{Deserialize, Serialize};

/// Ticks closer together than this (in minutes) leave the state alone.
pub const MIN_DECAY_MINUTES: f64 = 0.1;

/// Linear drift per elapsed minute.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecayRates {
    pub happiness: f64,
    pub hunger: f64,
    pub cleanliness: f64,
    pub energy: f64,
}

impl Default for DecayRates {
    fn default() -> Self {
        Self {
            happiness: 0.5,
            hunger: 1.2,
            cleanliness: 0.8,
            energy: 0.6,
        }
    }
}

/// Apply time-proportional decay up to `now_ms`.
///
/// Returns `false` (state untouched) when less than [`MIN_DECAY_MINUTES`]
/// elapsed since the last update.
pub fn apply_decay(state: &mut PetState, now_ms: i64, rates: &DecayRates) -> bool {
    let minutes = (now_ms - state.last_update_time) as f64 / 60_000.0;
    if minutes < MIN_DECAY_MINUTES {
        return false;
    }

    state.happiness = clamp_stat(state.happiness - rates.happiness * minutes);
    state.hunger = clamp_stat(state.hunger + rates.hunger * minutes);
    state.cleanliness = clamp_stat(state.cleanliness - rates.cleanliness * minutes);
    state.energy = clamp_stat(state.energy - rates.energy * minutes);
    state.touch(now_ms);
    true
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActionOutcome {
    Applied { reward: u64 },
    /// Precondition failed; nothing changed.
    TooTired,
}

/// Apply `kind` to `state`: deltas, clamping, timestamp, then the reward
/// computed on the resulting state.
pub fn apply_action(
    state: &mut PetState,
    kind: ActionKind,
    now_ms: i64,
    rng: &mut dyn RandomSource,
) -> ActionOutcome {
    if let Some(min) = kind.min_energy() {
        if state.energy < min {
            return ActionOutcome::TooTired;
        }
    }

    apply_deltas(state, &kind.deltas());
    state.touch(now_ms);

    let reward = reward_for(wellbeing(state), rng);
    state.coins = state.coins.saturating_add(reward);
    ActionOutcome::Applied { reward }
}

fn apply_deltas(state: &mut PetState, d: &StatDeltas) {
    state.happiness = clamp_stat(state.happiness + d.happiness);
    state.hunger = clamp_stat(state.hunger + d.hunger);
    state.cleanliness = clamp_stat(state.cleanliness + d.cleanliness);
    state.energy = clamp_stat(state.energy + d.energy);
}
