//! Elimination-with-reinsertion ranking ("Usul" ranking).
//!
//! Each round shuffles the survivors, pairs them off and eliminates the losers. Every
//! loser is placed into the running ranking by binary-search probes: extra pairwise
//! questions against already ranked items, put to the same decision source as the
//! matches. Winners go on to the next round until one survivor is left, or until the
//! early-exit rule fires and the remaining survivors are placed by probing as well.
//!
//! The engine never blocks on a decision. [`UsulEngine::advance`] hands out the
//! pending questions, [`UsulEngine::submit_decision`] answers one, and every step is
//! snapshotted before the call returns.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::decision::{Decision, DecisionSource, Pairing, PairingId, PairingKind};
use crate::error::{EngineError, EngineResult};
use crate::item::find_duplicate;
use crate::randomness::{RandomnessPort, SeededRandomness};
use crate::snapshot::{EngineKind, Journal, PersistenceGateway, SnapshotBlob};
use crate::Item;

/// `ceil(log2(n))`, with `n <= 1` mapped to 0
pub fn minimum_rounds(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsulConfig {
    /// Replaces `ceil(log2(n))` as the round count before early exit may fire
    pub minimum_rounds_override: Option<u32>,
}

impl UsulConfig {
    pub fn with_minimum_rounds(minimum_rounds: u32) -> Self {
        Self {
            minimum_rounds_override: Some(minimum_rounds),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsulPhase {
    RoundPending,
    MatchInProgress,
    RoundComplete,
    Done,
    Abandoned,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsulState {
    /// Items not yet placed in `final_ranking`
    pub survivors: Vec<Item>,
    /// Strongest first
    pub final_ranking: Vec<Item>,
    pub round: u32,
    pub minimum_rounds: u32,
    pub early_exit_armed: bool,
    pub early_exit_fired: bool,
    pub phase: UsulPhase,
    work: Option<RoundWork>,
    next_pairing: u64,
}

/// Matches and placements of the round in progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct RoundWork {
    matches: Vec<RoundMatch>,
    bye: Option<Item>,
    placing: Option<Placement>,
    /// Placing the last survivors rather than a round's losers
    finishing: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct RoundMatch {
    pairing: Pairing,
    first_won: Option<bool>,
}

impl RoundMatch {
    fn winner_and_loser(&self) -> Option<(&Item, &Item)> {
        self.first_won.map(|first_won| {
            if first_won {
                (&self.pairing.first, &self.pairing.second)
            } else {
                (&self.pairing.second, &self.pairing.first)
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Placement {
    queue: VecDeque<Item>,
    probe: Option<Probe>,
}

/// Binary search for `candidate`'s slot in `final_ranking[lo..hi]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Probe {
    candidate: Item,
    lo: usize,
    hi: usize,
    pairing: Option<Pairing>,
}

impl Probe {
    fn mid(&self) -> usize {
        (self.lo + self.hi) / 2
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ExitSignal {
    pub armed: bool,
    pub fire: bool,
}

/// The early-exit rule: a round in which the positionally first item of every pair
/// won arms the exit once `round >= minimum_rounds`; the next such round fires it. Any
/// other round disarms.
pub(crate) fn early_exit_signal(
    all_first_wins: bool,
    round: u32,
    minimum_rounds: u32,
    armed: bool,
) -> ExitSignal {
    if !all_first_wins {
        ExitSignal {
            armed: false,
            fire: false,
        }
    } else if round < minimum_rounds {
        ExitSignal { armed, fire: false }
    } else {
        ExitSignal {
            armed: true,
            fire: armed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UsulStep {
    /// Questions waiting for a decision, in any order
    Decide(Vec<Pairing>),
    Completed(Vec<Item>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct UsulCore<R> {
    config: UsulConfig,
    state: UsulState,
    rng: R,
}

impl<R: RandomnessPort> UsulCore<R> {
    fn allocate_pairing(
        next_pairing: &mut u64,
        round: u32,
        kind: PairingKind,
        first: Item,
        second: Item,
    ) -> Pairing {
        *next_pairing += 1;
        Pairing {
            id: PairingId(*next_pairing),
            round,
            kind,
            first,
            second,
            provisional: None,
        }
    }

    /// Leaves `RoundPending`/`RoundComplete`: either plays another round or places the
    /// remaining survivors.
    fn step_forward(&mut self) {
        if self.state.early_exit_fired || self.state.survivors.len() <= 1 {
            self.finish();
        } else {
            self.start_round();
        }
    }

    fn start_round(&mut self) {
        let state = &mut self.state;
        state.round += 1;
        let mut order = state.survivors.clone();
        self.rng.shuffle(&mut order);

        let pairs = order.chunks_exact(2);
        let bye = pairs.remainder().first().cloned();
        let matches = pairs
            .map(|pair| RoundMatch {
                pairing: Self::allocate_pairing(
                    &mut state.next_pairing,
                    state.round,
                    PairingKind::Match,
                    pair[0].clone(),
                    pair[1].clone(),
                ),
                first_won: None,
            })
            .collect::<Vec<_>>();

        info!(
            round = state.round,
            matches = matches.len(),
            bye = ?bye.as_ref().map(|b| &b.id),
            "usul round started"
        );
        state.work = Some(RoundWork {
            matches,
            bye,
            placing: None,
            finishing: false,
        });
        state.phase = UsulPhase::MatchInProgress;
    }

    fn finish(&mut self) {
        let state = &mut self.state;
        if state.survivors.len() == 1 {
            // never lost, so it is above everything it eliminated
            let champion = state.survivors.remove(0);
            state.final_ranking.insert(0, champion);
            state.phase = UsulPhase::Done;
            info!(rounds = state.round, "usul ranking complete");
            return;
        }
        debug!(survivors = state.survivors.len(), "placing remaining survivors");
        state.work = Some(RoundWork {
            matches: vec![],
            bye: None,
            placing: Some(Placement {
                queue: state.survivors.iter().cloned().collect(),
                probe: None,
            }),
            finishing: true,
        });
        state.phase = UsulPhase::MatchInProgress;
        self.pump_placement();
    }

    fn settle(&mut self, pairing: &Pairing, decision: &Decision) -> EngineResult<()> {
        let first_won = match decision {
            Decision::Winner(id) => *id == pairing.first.id,
            Decision::Draw => self.rng.coin_flip(),
        };
        let work = self
            .state
            .work
            .as_mut()
            .ok_or_else(|| EngineError::StaleState("no round in progress".to_string()))?;

        match pairing.kind {
            PairingKind::Match => {
                let m = work
                    .matches
                    .iter_mut()
                    .find(|m| m.pairing.id == pairing.id)
                    .ok_or_else(|| {
                        EngineError::StaleState(format!("unknown match {}", pairing.id))
                    })?;
                m.first_won = Some(first_won);
                m.pairing.provisional = None;
                debug!(pairing = %pairing.id, first_won, "match settled");

                if work.matches.iter().all(|m| m.first_won.is_some()) {
                    let losers = work
                        .matches
                        .iter()
                        .filter_map(|m| m.winner_and_loser().map(|(_, l)| l.clone()))
                        .collect();
                    work.placing = Some(Placement {
                        queue: losers,
                        probe: None,
                    });
                }
            }
            PairingKind::Probe => {
                let probe = work
                    .placing
                    .as_mut()
                    .and_then(|p| p.probe.as_mut())
                    .ok_or_else(|| EngineError::StaleState("no probe pending".to_string()))?;
                let mid = probe.mid();
                if first_won {
                    probe.hi = mid;
                } else {
                    probe.lo = mid + 1;
                }
                probe.pairing = None;
            }
        }
        self.pump_placement();
        Ok(())
    }

    /// Places queued items until a probe needs an answer or the queue is empty.
    fn pump_placement(&mut self) {
        let state = &mut self.state;
        loop {
            let Some(placing) = state.work.as_mut().and_then(|w| w.placing.as_mut()) else {
                return;
            };
            if placing.probe.is_none() {
                let Some(candidate) = placing.queue.pop_front() else {
                    break;
                };
                placing.probe = Some(Probe {
                    candidate,
                    lo: 0,
                    hi: state.final_ranking.len(),
                    pairing: None,
                });
            }
            let Some(probe) = placing.probe.as_mut() else {
                break;
            };

            if probe.lo == probe.hi {
                if let Some(placed) = placing.probe.take() {
                    debug!(item = %placed.candidate.id, slot = placed.lo, "item placed");
                    state.survivors.retain(|s| s.id != placed.candidate.id);
                    state.final_ranking.insert(placed.lo, placed.candidate);
                }
                continue;
            }
            if probe.pairing.is_none() {
                let opponent = state.final_ranking[probe.mid()].clone();
                probe.pairing = Some(Self::allocate_pairing(
                    &mut state.next_pairing,
                    state.round,
                    PairingKind::Probe,
                    probe.candidate.clone(),
                    opponent,
                ));
            }
            return;
        }
        self.close_work();
    }

    fn close_work(&mut self) {
        let state = &mut self.state;
        let Some(work) = state.work.take() else {
            return;
        };
        if work.finishing {
            state.phase = UsulPhase::Done;
            info!(rounds = state.round, "usul ranking complete");
            return;
        }

        let all_first_wins =
            !work.matches.is_empty() && work.matches.iter().all(|m| m.first_won == Some(true));
        let signal = early_exit_signal(
            all_first_wins,
            state.round,
            state.minimum_rounds,
            state.early_exit_armed,
        );
        state.early_exit_armed = signal.armed;
        state.early_exit_fired = signal.fire;

        state.survivors = work
            .matches
            .iter()
            .filter_map(|m| m.winner_and_loser().map(|(w, _)| w.clone()))
            .chain(work.bye)
            .collect();
        state.phase = UsulPhase::RoundComplete;
        info!(
            round = state.round,
            survivors = state.survivors.len(),
            ranked = state.final_ranking.len(),
            all_first_wins,
            armed = signal.armed,
            fire = signal.fire,
            "usul round complete"
        );
    }

    fn pending_pairings(&self) -> Vec<Pairing> {
        let Some(work) = &self.state.work else {
            return vec![];
        };
        if let Some(probe) = work
            .placing
            .as_ref()
            .and_then(|p| p.probe.as_ref())
            .and_then(|p| p.pairing.clone())
        {
            return vec![probe];
        }
        work.matches
            .iter()
            .filter(|m| m.first_won.is_none())
            .map(|m| m.pairing.clone())
            .collect()
    }

    fn pending_mut(&mut self, id: PairingId) -> Option<&mut Pairing> {
        let work = self.state.work.as_mut()?;
        if let Some(probe) = work.placing.as_mut().and_then(|p| p.probe.as_mut()) {
            return probe.pairing.as_mut().filter(|p| p.id == id);
        }
        work.matches
            .iter_mut()
            .find(|m| m.first_won.is_none() && m.pairing.id == id)
            .map(|m| &mut m.pairing)
    }
}

/// Resumable ranking engine over a fixed item set.
pub struct UsulEngine<R = SeededRandomness> {
    core: UsulCore<R>,
    journal: Journal,
}

impl<R: RandomnessPort> UsulEngine<R> {
    /// Starts a ranking. A single item is ranked immediately.
    pub fn create(
        items: Vec<Item>,
        config: UsulConfig,
        rng: R,
        gateway: Box<dyn PersistenceGateway>,
    ) -> EngineResult<Self> {
        if items.is_empty() {
            return Err(EngineError::InvalidInput(
                "cannot rank an empty item set".to_string(),
            ));
        }
        if let Some(id) = find_duplicate(&items) {
            return Err(EngineError::InvalidInput(format!("duplicate item id {}", id)));
        }

        let minimum_rounds = config
            .minimum_rounds_override
            .unwrap_or_else(|| minimum_rounds(items.len()));
        let (survivors, final_ranking, phase) = if items.len() == 1 {
            (vec![], items, UsulPhase::Done)
        } else {
            (items, vec![], UsulPhase::RoundPending)
        };
        let mut engine = Self {
            core: UsulCore {
                config,
                state: UsulState {
                    survivors,
                    final_ranking,
                    round: 0,
                    minimum_rounds,
                    early_exit_armed: false,
                    early_exit_fired: false,
                    phase,
                    work: None,
                    next_pairing: 0,
                },
                rng,
            },
            journal: Journal::new(EngineKind::Usul, gateway),
        };
        engine.journal.commit(&engine.core)?;
        info!(
            items = engine.core.state.survivors.len() + engine.core.state.final_ranking.len(),
            minimum_rounds, "usul ranking created"
        );
        Ok(engine)
    }

    /// Resumes from a snapshot. Fails if `gateway` already holds a newer one.
    pub fn restore(blob: &SnapshotBlob, gateway: Box<dyn PersistenceGateway>) -> EngineResult<Self> {
        let core: UsulCore<R> = blob.decode(EngineKind::Usul)?;
        let journal = Journal::resume(blob, gateway)?;
        debug!(sequence = blob.sequence, phase = ?core.state.phase, "usul ranking restored");
        Ok(Self { core, journal })
    }

    pub fn state(&self) -> &UsulState {
        &self.core.state
    }

    pub fn config(&self) -> &UsulConfig {
        &self.core.config
    }

    pub fn phase(&self) -> UsulPhase {
        self.core.state.phase
    }

    pub fn sequence(&self) -> u64 {
        self.journal.sequence()
    }

    pub fn snapshot(&self) -> EngineResult<SnapshotBlob> {
        self.journal.current(&self.core)
    }

    pub fn pending_pairings(&self) -> Vec<Pairing> {
        self.core.pending_pairings()
    }

    /// Moves the ranking forward as far as it can go without a decision.
    ///
    /// While questions are outstanding this only repeats them and writes nothing.
    pub fn advance(&mut self) -> EngineResult<UsulStep> {
        match self.core.state.phase {
            UsulPhase::Abandoned => return Err(EngineError::Abandoned),
            UsulPhase::Done => {
                return Ok(UsulStep::Completed(self.core.state.final_ranking.clone()))
            }
            UsulPhase::MatchInProgress => return Ok(UsulStep::Decide(self.pending_pairings())),
            UsulPhase::RoundPending | UsulPhase::RoundComplete => {}
        }
        self.mutate(|core| {
            core.step_forward();
            Ok(())
        })?;
        Ok(match self.core.state.phase {
            UsulPhase::Done => UsulStep::Completed(self.core.state.final_ranking.clone()),
            _ => UsulStep::Decide(self.pending_pairings()),
        })
    }

    /// Answers a pending question. Draws are settled by a coin flip.
    pub fn submit_decision(&mut self, id: PairingId, decision: Decision) -> EngineResult<()> {
        let pairing = self.find_pending(id)?;
        check_decision(&pairing, &decision)?;
        self.mutate(|core| core.settle(&pairing, &decision))
    }

    /// Stores a tentative pick on a pending question without settling it.
    pub fn record_provisional_pick(&mut self, id: PairingId, decision: Decision) -> EngineResult<()> {
        let pairing = self.find_pending(id)?;
        check_decision(&pairing, &decision)?;
        self.mutate(|core| {
            let pending = core
                .pending_mut(id)
                .ok_or_else(|| EngineError::StaleState(format!("pairing {} is not pending", id)))?;
            pending.provisional = Some(decision);
            Ok(())
        })
    }

    pub fn abandon(&mut self) -> EngineResult<()> {
        match self.core.state.phase {
            UsulPhase::Abandoned => Err(EngineError::Abandoned),
            UsulPhase::Done => Err(EngineError::StaleState(
                "ranking already completed".to_string(),
            )),
            _ => self.mutate(|core| {
                core.state.phase = UsulPhase::Abandoned;
                info!(round = core.state.round, "usul ranking abandoned");
                Ok(())
            }),
        }
    }

    /// Drives the ranking to completion with a synchronous decision source.
    pub fn run_with<D: DecisionSource + ?Sized>(&mut self, source: &mut D) -> EngineResult<Vec<Item>> {
        loop {
            match self.advance()? {
                UsulStep::Completed(ranking) => return Ok(ranking),
                UsulStep::Decide(pairings) => {
                    for pairing in pairings {
                        let decision = source.decide(&pairing).map_err(|e| {
                            EngineError::DecisionUnavailable {
                                pairing: pairing.id,
                                reason: e.reason,
                            }
                        })?;
                        self.submit_decision(pairing.id, decision)?;
                    }
                }
            }
        }
    }

    fn find_pending(&self, id: PairingId) -> EngineResult<Pairing> {
        match self.core.state.phase {
            UsulPhase::Abandoned => return Err(EngineError::Abandoned),
            UsulPhase::MatchInProgress => {}
            phase => {
                return Err(EngineError::StaleState(format!(
                    "pairing {} submitted while {:?}",
                    id, phase
                )))
            }
        }
        self.pending_pairings()
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| {
                warn!(pairing = %id, "submission for a pairing that is not pending");
                EngineError::StaleState(format!("pairing {} is not pending", id))
            })
    }

    /// Applies `f` to a copy of the core and keeps it only once its snapshot is stored.
    fn mutate<T>(
        &mut self,
        f: impl FnOnce(&mut UsulCore<R>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut next = self.core.clone();
        let out = f(&mut next)?;
        self.journal.commit(&next)?;
        self.core = next;
        Ok(out)
    }
}

fn check_decision(pairing: &Pairing, decision: &Decision) -> EngineResult<()> {
    match decision {
        Decision::Winner(id) if !pairing.involves(id) => Err(EngineError::InvalidInput(format!(
            "{} is not part of pairing {}",
            id, pairing.id
        ))),
        _ => Ok(()),
    }
}
