use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::DecisionUnavailable;
use crate::{Item, ItemId};

/// Identifier of a question put to the decision source. Unique and increasing within
/// one engine, stable across snapshot/restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingId(pub u64);

impl Display for PairingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Winner(ItemId),
    Draw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingKind {
    /// A scheduled match between two entrants of the current round
    Match,
    /// An extra comparison locating an eliminated item in the ranking. `first` is
    /// always the item being placed.
    Probe,
}

/// One pending question: which of these two is stronger?
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub id: PairingId,
    pub round: u32,
    pub kind: PairingKind,
    pub first: Item,
    pub second: Item,
    /// Tentative pick recorded by the caller, not yet confirmed
    pub provisional: Option<Decision>,
}

impl Pairing {
    pub fn involves(&self, id: &ItemId) -> bool {
        &self.first.id == id || &self.second.id == id
    }
}

/// Whatever decides pairwise outcomes: a person tapping a screen, a game runner, or
/// a comparator in a test.
pub trait DecisionSource {
    fn decide(&mut self, pairing: &Pairing) -> Result<Decision, DecisionUnavailable>;
}

impl<F> DecisionSource for F
where
    F: FnMut(&Pairing) -> Result<Decision, DecisionUnavailable>,
{
    fn decide(&mut self, pairing: &Pairing) -> Result<Decision, DecisionUnavailable> {
        self(pairing)
    }
}

/// Decides by comparing seeds: higher seed wins, equal seeds draw. Total and
/// transitive, which makes it the reference oracle for ranking tests.
#[derive(Clone, Debug, Default)]
pub struct SeedOracle {
    pub questions_asked: usize,
}

impl DecisionSource for SeedOracle {
    fn decide(&mut self, pairing: &Pairing) -> Result<Decision, DecisionUnavailable> {
        self.questions_asked += 1;
        Ok(match pairing.first.seed.cmp(&pairing.second.seed) {
            Ordering::Greater => Decision::Winner(pairing.first.id.clone()),
            Ordering::Less => Decision::Winner(pairing.second.id.clone()),
            Ordering::Equal => Decision::Draw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairing(a: i64, b: i64) -> Pairing {
        Pairing {
            id: PairingId(1),
            round: 1,
            kind: PairingKind::Match,
            first: Item::new("a", "A", a),
            second: Item::new("b", "B", b),
            provisional: None,
        }
    }

    #[test]
    fn test_seed_oracle() {
        let mut oracle = SeedOracle::default();
        assert_eq!(
            Decision::Winner("a".into()),
            oracle.decide(&pairing(5, 3)).unwrap()
        );
        assert_eq!(
            Decision::Winner("b".into()),
            oracle.decide(&pairing(1, 3)).unwrap()
        );
        assert_eq!(Decision::Draw, oracle.decide(&pairing(3, 3)).unwrap());
        assert_eq!(3, oracle.questions_asked);
    }

    #[test]
    fn test_closure_source() {
        let mut source =
            |_: &Pairing| -> Result<Decision, DecisionUnavailable> { Err(DecisionUnavailable::new("asleep")) };
        assert_eq!(
            Err(DecisionUnavailable::new("asleep")),
            source.decide(&pairing(1, 2))
        );
    }
}
