use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Item;

/// Source of shuffles and coin flips for the ranking engine.
///
/// Implementations are serialized into every snapshot, so a restored engine continues
/// the exact random stream it was interrupted in.
pub trait RandomnessPort: Clone + Serialize + DeserializeOwned {
    /// Uniform random permutation, in place
    fn shuffle(&mut self, items: &mut [Item]);

    /// Unbiased coin flip
    fn coin_flip(&mut self) -> bool;
}

/// ChaCha8 stream seeded from a `u64` or from OS entropy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeededRandomness {
    rng: ChaCha8Rng,
}

impl SeededRandomness {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }
}

impl RandomnessPort for SeededRandomness {
    fn shuffle(&mut self, items: &mut [Item]) {
        items.shuffle(&mut self.rng);
    }

    fn coin_flip(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }
}

/// Leaves every permutation untouched and answers coin flips from a queue, falling
/// back to `default_flip` once the queue runs dry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedRandomness {
    flips: VecDeque<bool>,
    default_flip: bool,
}

impl ScriptedRandomness {
    pub fn new(flips: impl IntoIterator<Item = bool>, default_flip: bool) -> Self {
        Self {
            flips: flips.into_iter().collect(),
            default_flip,
        }
    }

    pub fn remaining_flips(&self) -> usize {
        self.flips.len()
    }
}

impl RandomnessPort for ScriptedRandomness {
    fn shuffle(&mut self, _items: &mut [Item]) {}

    fn coin_flip(&mut self) -> bool {
        self.flips.pop_front().unwrap_or(self.default_flip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<Item> {
        (0..n)
            .map(|i| Item::new(format!("i{}", i), "", i as i64))
            .collect()
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SeededRandomness::from_seed(7);
        let mut b = SeededRandomness::from_seed(7);
        let mut xs = items(10);
        let mut ys = items(10);
        a.shuffle(&mut xs);
        b.shuffle(&mut ys);
        assert_eq!(xs, ys);
        assert_eq!(a.coin_flip(), b.coin_flip());
    }

    #[test]
    fn test_serialized_stream_resumes() {
        let mut a = SeededRandomness::from_seed(99);
        a.coin_flip();
        let json = serde_json::to_string(&a).unwrap();
        let mut b: SeededRandomness = serde_json::from_str(&json).unwrap();
        let left: Vec<bool> = (0..32).map(|_| a.coin_flip()).collect();
        let right: Vec<bool> = (0..32).map(|_| b.coin_flip()).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_scripted() {
        let mut r = ScriptedRandomness::new([false, true], true);
        let mut xs = items(4);
        r.shuffle(&mut xs);
        assert_eq!(items(4), xs);
        assert!(!r.coin_flip());
        assert!(r.coin_flip());
        assert_eq!(0, r.remaining_flips());
        assert!(r.coin_flip());
    }
}
