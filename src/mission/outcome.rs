//! Pre-committed action outcomes.
//!
//! Every action draws its whole outcome queue once, at construction, from a
//! stream seeded by the mission seed and the action id. Live execution only
//! pops from the queue and never touches the RNG, so a mission with the same
//! seed always plays out the same sequence of draws. A draw is judged against
//! the action's success chance at the moment it is popped, so chance
//! modifiers applied by effects change the results of later executions.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Hard cap on the number of outcomes generated per action.
pub const MAX_POTENTIAL_OUTCOMES: usize = 1000;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// An outcome drawn ahead of time, waiting to be consumed by an execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PotentialOutcome {
    /// Uniform draw in `[0, 1)`.
    pub draw: f64,
}

impl PotentialOutcome {
    /// Whether this draw succeeds at `success_chance`: it must exceed the
    /// failure chance `1 - success_chance`.
    #[must_use]
    pub fn succeeds(&self, success_chance: f64) -> bool {
        self.draw > 1.0 - success_chance.clamp(0.0, 1.0)
    }
}

/// An outcome that has been consumed by a completed or aborted execution.
///
/// Realized outcomes are appended to their node's history and never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedOutcome {
    /// Action that was executed.
    pub action_id: String,
    /// Node the action belongs to.
    pub node_id: String,
    /// Whether the execution succeeded. Always `false` when aborted.
    pub successful: bool,
    /// Whether the execution was aborted before completing.
    pub aborted: bool,
    /// Completion time in epoch milliseconds.
    pub timestamp: i64,
}

/// Returns how many outcomes an action should pre-generate.
///
/// `min(floor(initial_resources / resource_cost), MAX_POTENTIAL_OUTCOMES)`;
/// a zero cost can be executed without bound and gets the cap.
#[must_use]
pub fn outcome_count(initial_resources: u64, resource_cost: u64) -> usize {
    if resource_cost == 0 {
        return MAX_POTENTIAL_OUTCOMES;
    }
    let affordable = initial_resources / resource_cost;
    usize::try_from(affordable)
        .unwrap_or(MAX_POTENTIAL_OUTCOMES)
        .min(MAX_POTENTIAL_OUTCOMES)
}

/// Derives the per-action RNG seed from the mission seed and the action id.
///
/// FNV-1a over `seed \0 action_id`; the result must not change across
/// platforms or Rust releases.
#[must_use]
pub fn derive_action_seed(mission_seed: &str, action_id: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in mission_seed
        .bytes()
        .chain(std::iter::once(0u8))
        .chain(action_id.bytes())
    {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Draws the outcome queue for one action.
#[must_use]
pub fn generate_outcomes(mission_seed: &str, action_id: &str, count: usize) -> VecDeque<PotentialOutcome> {
    let mut rng = StdRng::seed_from_u64(derive_action_seed(mission_seed, action_id));
    (0..count)
        .map(|_| PotentialOutcome { draw: rng.random() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_is_floor_of_resources_over_cost() {
        assert_eq!(outcome_count(2, 1), 2);
        assert_eq!(outcome_count(10, 3), 3);
        assert_eq!(outcome_count(2, 5), 0);
    }

    #[test]
    fn count_is_capped() {
        assert_eq!(outcome_count(1_000_000, 1), MAX_POTENTIAL_OUTCOMES);
        assert_eq!(outcome_count(5, 0), MAX_POTENTIAL_OUTCOMES);
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = generate_outcomes("abc", "action-1", 50);
        let b = generate_outcomes("abc", "action-1", 50);
        assert_eq!(a, b);
    }

    #[test]
    fn streams_differ_per_action() {
        let a = generate_outcomes("abc", "action-1", 64);
        let b = generate_outcomes("abc", "action-2", 64);
        assert_ne!(a, b);
    }

    #[test]
    fn certain_chances_are_certain() {
        let queue = generate_outcomes("s", "a", 100);
        assert!(queue.iter().all(|o| o.succeeds(1.0)));
        assert!(queue.iter().all(|o| !o.succeeds(0.0)));
    }

    #[test]
    fn higher_chance_never_loses_a_success() {
        let queue = generate_outcomes("abc", "a", 200);
        for o in &queue {
            if o.succeeds(0.3) {
                assert!(o.succeeds(0.7));
            }
        }
        let low = queue.iter().filter(|o| o.succeeds(0.3)).count();
        let high = queue.iter().filter(|o| o.succeeds(0.7)).count();
        assert!(low < high);
    }

    #[test]
    fn seed_derivation_is_stable() {
        assert_eq!(derive_action_seed("abc", "x"), derive_action_seed("abc", "x"));
        assert_ne!(derive_action_seed("abc", "x"), derive_action_seed("abd", "x"));
        // The separator keeps ("ab", "cx") and ("abc", "x") apart.
        assert_ne!(derive_action_seed("ab", "cx"), derive_action_seed("abc", "x"));
    }
}
