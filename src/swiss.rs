//! Resumable Swiss tournament.
//!
//! The tournament is driven from outside: [`SwissEngine::current_round_pairings`]
//! pairs the next round when the previous one is complete, and
//! [`SwissEngine::submit_match_result`] settles matches one at a time. Each of those
//! steps is snapshotted before the call returns.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::decision::{Decision, DecisionSource, Pairing, PairingId, PairingKind};
use crate::error::{EngineError, EngineResult};
use crate::item::find_duplicate;
use crate::pairing::{calculate_rounds, dutch_pairings, first_round_pairings};
use crate::snapshot::{EngineKind, Journal, PersistenceGateway, SnapshotBlob};
use crate::{Item, ItemId};

pub type MatchId = PairingId;

/// Points are kept as integer half-points. 1/0.5/0 is stored as 2/1/0.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Points(u32);

impl Points {
    pub const ZERO: Points = Points(0);
    pub const HALF: Points = Points(1);
    pub const ONE: Points = Points(2);

    pub const fn from_halves(halves: u32) -> Self {
        Self(halves)
    }

    pub const fn halves(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 2.0
    }
}

impl Add for Points {
    type Output = Points;

    fn add(self, rhs: Self) -> Self::Output {
        Points(self.0 + rhs.0)
    }
}

impl AddAssign for Points {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Display for Points {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0 % 2 == 0 {
            write!(f, "{}", self.0 / 2)
        } else {
            write!(f, "{}.5", self.0 / 2)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwissConfig {
    pub points_per_win: Points,
    pub points_per_draw: Points,
    pub points_per_loss: Points,
    /// Replaces the field-size round table
    pub max_rounds_override: Option<u32>,
}

impl Default for SwissConfig {
    fn default() -> Self {
        Self {
            points_per_win: Points::ONE,
            points_per_draw: Points::HALF,
            points_per_loss: Points::ZERO,
            max_rounds_override: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwissPlayer {
    pub item: Item,
    pub points: Points,
    pub opponents_played: BTreeSet<ItemId>,
    pub byes: u32,
}

impl SwissPlayer {
    pub fn new(item: Item) -> Self {
        Self {
            item,
            points: Points::ZERO,
            opponents_played: BTreeSet::new(),
            byes: 0,
        }
    }

    pub fn has_played(&self, other: &ItemId) -> bool {
        self.opponents_played.contains(other)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Pending,
    WinP1,
    WinP2,
    Draw,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwissMatch {
    pub id: MatchId,
    pub round: u32,
    pub player1: ItemId,
    pub player2: ItemId,
    pub outcome: MatchOutcome,
    /// Tentative pick recorded by the caller, not yet confirmed
    pub provisional: Option<MatchOutcome>,
}

impl SwissMatch {
    pub fn is_settled(&self) -> bool {
        self.outcome != MatchOutcome::Pending
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bye {
    pub round: u32,
    pub player: ItemId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwissPhase {
    RoundPendingPairing,
    RoundInProgress,
    RoundComplete,
    /// `partial_rounds` is set when pairing ran dry before `max_rounds`
    Done { partial_rounds: bool },
    Abandoned,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwissState {
    /// Roster in insertion order, which is also the last standings tie-break
    pub players: Vec<SwissPlayer>,
    pub round: u32,
    pub max_rounds: u32,
    pub match_history: Vec<SwissMatch>,
    pub byes: Vec<Bye>,
    pub phase: SwissPhase,
    next_match: u64,
}

impl SwissState {
    pub fn player(&self, id: &ItemId) -> Option<&SwissPlayer> {
        self.players.iter().find(|p| &p.item.id == id)
    }

    fn player_mut(&mut self, id: &ItemId) -> Option<&mut SwissPlayer> {
        self.players.iter_mut().find(|p| &p.item.id == id)
    }

    pub fn current_round_matches(&self) -> impl Iterator<Item = &SwissMatch> {
        let round = self.round;
        self.match_history.iter().filter(move |m| m.round == round)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Standing {
    pub rank: usize,
    pub item: Item,
    pub points: Points,
    pub played: usize,
    pub byes: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundView {
    Pairings {
        round: u32,
        matches: Vec<SwissMatch>,
        byes: Vec<ItemId>,
    },
    Completed {
        partial_rounds: bool,
        standings: Vec<Standing>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SwissCore {
    config: SwissConfig,
    state: SwissState,
}

impl SwissCore {
    fn pair_next_round(&mut self) {
        let state = &mut self.state;
        if state.round >= state.max_rounds {
            state.phase = SwissPhase::Done {
                partial_rounds: false,
            };
            return;
        }

        let round = state.round + 1;
        let plan = if round == 1 {
            first_round_pairings(&state.players)
        } else {
            dutch_pairings(&state.players)
        };
        if plan.pairs.is_empty() {
            warn!(round, "no legal pairings left, ending tournament early");
            state.phase = SwissPhase::Done {
                partial_rounds: true,
            };
            return;
        }

        state.round = round;
        for (player1, player2) in plan.pairs {
            state.next_match += 1;
            debug!(round, %player1, %player2, "paired");
            state.match_history.push(SwissMatch {
                id: PairingId(state.next_match),
                round,
                player1,
                player2,
                outcome: MatchOutcome::Pending,
                provisional: None,
            });
        }
        for player in plan.byes {
            warn!(round, %player, "bye");
            if let Some(p) = state.player_mut(&player) {
                p.byes += 1;
            }
            state.byes.push(Bye { round, player });
        }
        state.phase = SwissPhase::RoundInProgress;
        info!(
            round,
            max_rounds = state.max_rounds,
            matches = state.current_round_matches().count(),
            "swiss round paired"
        );
    }

    fn settle(&mut self, id: MatchId, outcome: MatchOutcome) -> EngineResult<()> {
        let config = &self.config;
        let (points1, points2) = match outcome {
            MatchOutcome::WinP1 => (config.points_per_win, config.points_per_loss),
            MatchOutcome::WinP2 => (config.points_per_loss, config.points_per_win),
            MatchOutcome::Draw => (config.points_per_draw, config.points_per_draw),
            MatchOutcome::Pending => {
                return Err(EngineError::InvalidInput(
                    "cannot settle a match as pending".to_string(),
                ))
            }
        };

        let state = &mut self.state;
        let m = state
            .match_history
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| EngineError::StaleState(format!("unknown match {}", id)))?;
        m.outcome = outcome;
        m.provisional = None;
        let (p1, p2) = (m.player1.clone(), m.player2.clone());

        for (me, them, points) in [(&p1, &p2, points1), (&p2, &p1, points2)] {
            let player = state.player_mut(me).ok_or_else(|| {
                EngineError::InvalidInput(format!("match {} names unknown player {}", id, me))
            })?;
            player.points += points;
            player.opponents_played.insert(them.clone());
        }
        debug!(match_id = %id, ?outcome, "match settled");

        if state.current_round_matches().all(SwissMatch::is_settled) {
            state.phase = if state.round >= state.max_rounds {
                info!(rounds = state.round, "swiss tournament complete");
                SwissPhase::Done {
                    partial_rounds: false,
                }
            } else {
                info!(round = state.round, "swiss round complete");
                SwissPhase::RoundComplete
            };
        }
        Ok(())
    }
}

/// Standings order: points, then seed, then roster order.
pub fn standings(state: &SwissState) -> Vec<Standing> {
    let mut order = state.players.iter().enumerate().collect::<Vec<_>>();
    order.sort_by(|(ia, a), (ib, b)| {
        b.points
            .cmp(&a.points)
            .then_with(|| b.item.seed.cmp(&a.item.seed))
            .then_with(|| ia.cmp(ib))
    });
    order
        .into_iter()
        .enumerate()
        .map(|(rank, (_, p))| Standing {
            rank: rank + 1,
            item: p.item.clone(),
            points: p.points,
            played: state
                .match_history
                .iter()
                .filter(|m| m.is_settled() && (m.player1 == p.item.id || m.player2 == p.item.id))
                .count(),
            byes: p.byes,
        })
        .collect()
}

pub struct SwissEngine {
    core: SwissCore,
    journal: Journal,
}

impl SwissEngine {
    pub fn create(
        players: Vec<Item>,
        config: SwissConfig,
        gateway: Box<dyn PersistenceGateway>,
    ) -> EngineResult<Self> {
        if players.len() < 2 {
            return Err(EngineError::InvalidInput(format!(
                "a swiss tournament needs at least 2 players, got {}",
                players.len()
            )));
        }
        if let Some(id) = find_duplicate(&players) {
            return Err(EngineError::InvalidInput(format!("duplicate player id {}", id)));
        }

        let max_rounds = config
            .max_rounds_override
            .unwrap_or_else(|| calculate_rounds(players.len()));
        let mut engine = Self {
            core: SwissCore {
                config,
                state: SwissState {
                    players: players.into_iter().map(SwissPlayer::new).collect(),
                    round: 0,
                    max_rounds,
                    match_history: vec![],
                    byes: vec![],
                    phase: SwissPhase::RoundPendingPairing,
                    next_match: 0,
                },
            },
            journal: Journal::new(EngineKind::Swiss, gateway),
        };
        engine.journal.commit(&engine.core)?;
        info!(
            players = engine.core.state.players.len(),
            max_rounds, "swiss tournament created"
        );
        Ok(engine)
    }

    /// Resumes from a snapshot. Fails if `gateway` already holds a newer one.
    pub fn restore(blob: &SnapshotBlob, gateway: Box<dyn PersistenceGateway>) -> EngineResult<Self> {
        let core: SwissCore = blob.decode(EngineKind::Swiss)?;
        let journal = Journal::resume(blob, gateway)?;
        debug!(sequence = blob.sequence, phase = ?core.state.phase, "swiss tournament restored");
        Ok(Self { core, journal })
    }

    pub fn state(&self) -> &SwissState {
        &self.core.state
    }

    pub fn config(&self) -> &SwissConfig {
        &self.core.config
    }

    pub fn phase(&self) -> SwissPhase {
        self.core.state.phase
    }

    pub fn sequence(&self) -> u64 {
        self.journal.sequence()
    }

    pub fn snapshot(&self) -> EngineResult<SnapshotBlob> {
        self.journal.current(&self.core)
    }

    pub fn standings(&self) -> Vec<Standing> {
        standings(&self.core.state)
    }

    /// Pairings of the round in play, pairing the next round first if the previous
    /// one is complete. Writes nothing while a round is in progress.
    pub fn current_round_pairings(&mut self) -> EngineResult<RoundView> {
        match self.core.state.phase {
            SwissPhase::Abandoned => return Err(EngineError::Abandoned),
            SwissPhase::RoundPendingPairing | SwissPhase::RoundComplete => {
                self.mutate(|core| {
                    core.pair_next_round();
                    Ok(())
                })?;
            }
            SwissPhase::RoundInProgress | SwissPhase::Done { .. } => {}
        }
        Ok(self.round_view())
    }

    fn round_view(&self) -> RoundView {
        let state = &self.core.state;
        match state.phase {
            SwissPhase::Done { partial_rounds } => RoundView::Completed {
                partial_rounds,
                standings: self.standings(),
            },
            _ => RoundView::Pairings {
                round: state.round,
                matches: state.current_round_matches().cloned().collect(),
                byes: state
                    .byes
                    .iter()
                    .filter(|b| b.round == state.round)
                    .map(|b| b.player.clone())
                    .collect(),
            },
        }
    }

    pub fn submit_match_result(&mut self, id: MatchId, outcome: MatchOutcome) -> EngineResult<()> {
        if outcome == MatchOutcome::Pending {
            return Err(EngineError::InvalidInput(
                "a result cannot be pending".to_string(),
            ));
        }
        self.find_pending(id)?;
        self.mutate(|core| core.settle(id, outcome))
    }

    /// Stores a tentative pick on a pending match without settling it.
    pub fn record_provisional_pick(&mut self, id: MatchId, outcome: MatchOutcome) -> EngineResult<()> {
        self.find_pending(id)?;
        self.mutate(|core| {
            let m = core
                .state
                .match_history
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| EngineError::StaleState(format!("unknown match {}", id)))?;
            m.provisional = Some(outcome).filter(|o| *o != MatchOutcome::Pending);
            Ok(())
        })
    }

    pub fn abandon(&mut self) -> EngineResult<()> {
        match self.core.state.phase {
            SwissPhase::Abandoned => Err(EngineError::Abandoned),
            SwissPhase::Done { .. } => Err(EngineError::StaleState(
                "tournament already completed".to_string(),
            )),
            _ => self.mutate(|core| {
                core.state.phase = SwissPhase::Abandoned;
                info!(round = core.state.round, "swiss tournament abandoned");
                Ok(())
            }),
        }
    }

    /// The question a decision source is asked for a pending match.
    pub fn pairing_for(&self, id: MatchId) -> Option<Pairing> {
        let state = &self.core.state;
        let m = state.match_history.iter().find(|m| m.id == id)?;
        let first = state.player(&m.player1)?.item.clone();
        let second = state.player(&m.player2)?.item.clone();
        let provisional = m.provisional.and_then(|o| match o {
            MatchOutcome::WinP1 => Some(Decision::Winner(first.id.clone())),
            MatchOutcome::WinP2 => Some(Decision::Winner(second.id.clone())),
            MatchOutcome::Draw => Some(Decision::Draw),
            MatchOutcome::Pending => None,
        });
        Some(Pairing {
            id,
            round: m.round,
            kind: PairingKind::Match,
            first,
            second,
            provisional,
        })
    }

    /// Plays the tournament out with a synchronous decision source.
    pub fn run_with<D: DecisionSource + ?Sized>(&mut self, source: &mut D) -> EngineResult<Vec<Standing>> {
        loop {
            let matches = match self.current_round_pairings()? {
                RoundView::Completed { standings, .. } => return Ok(standings),
                RoundView::Pairings { matches, .. } => matches,
            };
            for m in matches.iter().filter(|m| !m.is_settled()) {
                let pairing = self.pairing_for(m.id).ok_or_else(|| {
                    EngineError::StaleState(format!("match {} disappeared", m.id))
                })?;
                let decision =
                    source
                        .decide(&pairing)
                        .map_err(|e| EngineError::DecisionUnavailable {
                            pairing: m.id,
                            reason: e.reason,
                        })?;
                let outcome = match decision {
                    Decision::Draw => MatchOutcome::Draw,
                    Decision::Winner(id) if id == m.player1 => MatchOutcome::WinP1,
                    Decision::Winner(id) if id == m.player2 => MatchOutcome::WinP2,
                    Decision::Winner(id) => {
                        return Err(EngineError::InvalidInput(format!(
                            "{} is not part of match {}",
                            id, m.id
                        )))
                    }
                };
                self.submit_match_result(m.id, outcome)?;
            }
        }
    }

    fn find_pending(&self, id: MatchId) -> EngineResult<&SwissMatch> {
        let state = &self.core.state;
        match state.phase {
            SwissPhase::Abandoned => return Err(EngineError::Abandoned),
            SwissPhase::RoundInProgress => {}
            phase => {
                return Err(EngineError::StaleState(format!(
                    "match {} submitted while {:?}",
                    id, phase
                )))
            }
        }
        state
            .current_round_matches()
            .find(|m| m.id == id && !m.is_settled())
            .ok_or_else(|| {
                warn!(match_id = %id, "submission for a match that is not pending");
                EngineError::StaleState(format!("match {} is not pending", id))
            })
    }

    /// Applies `f` to a copy of the core and keeps it only once its snapshot is stored.
    fn mutate<T>(&mut self, f: impl FnOnce(&mut SwissCore) -> EngineResult<T>) -> EngineResult<T> {
        let mut next = self.core.clone();
        let out = f(&mut next)?;
        self.journal.commit(&next)?;
        self.core = next;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::decision::SeedOracle;
    use crate::error::DecisionUnavailable;
    use crate::snapshot::MemoryGateway;

    fn field(seeds: &[i64]) -> Vec<Item> {
        seeds
            .iter()
            .map(|s| Item::new(format!("p{}", s), format!("Player {}", s), *s))
            .collect()
    }

    fn engine(seeds: &[i64]) -> (SwissEngine, MemoryGateway) {
        let gateway = MemoryGateway::new();
        let engine =
            SwissEngine::create(field(seeds), SwissConfig::default(), Box::new(gateway.clone()))
                .unwrap();
        (engine, gateway)
    }

    fn expect_pairings(view: RoundView) -> Vec<SwissMatch> {
        match view {
            RoundView::Pairings { matches, .. } => matches,
            other => panic!("expected pairings, got {:?}", other),
        }
    }

    fn ids(matches: &[SwissMatch]) -> Vec<(&str, &str)> {
        matches
            .iter()
            .map(|m| (m.player1.as_str(), m.player2.as_str()))
            .collect()
    }

    #[test]
    fn test_points_display() {
        assert_eq!("0", Points::ZERO.to_string());
        assert_eq!("0.5", Points::HALF.to_string());
        assert_eq!("3.5", Points::from_halves(7).to_string());
        assert_eq!(1.5, (Points::ONE + Points::HALF).as_f64());
    }

    #[test]
    fn test_create_rejects_bad_fields() {
        let gateway = MemoryGateway::new();
        let one = SwissEngine::create(field(&[1]), SwissConfig::default(), Box::new(gateway.clone()));
        assert!(matches!(one, Err(EngineError::InvalidInput(_))));
        let dup = SwissEngine::create(field(&[1, 1]), SwissConfig::default(), Box::new(gateway));
        assert!(matches!(dup, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_round_one_seeding() {
        let (mut engine, _) = engine(&[60, 100, 80, 50, 90, 70]);
        assert_eq!(4, engine.state().max_rounds);
        let matches = expect_pairings(engine.current_round_pairings().unwrap());
        assert_eq!(
            vec![("p100", "p70"), ("p90", "p60"), ("p80", "p50")],
            ids(&matches)
        );
        assert_eq!(SwissPhase::RoundInProgress, engine.phase());
    }

    #[test]
    fn test_pairings_are_idempotent_while_in_progress() {
        let (mut engine, gateway) = engine(&[4, 3, 2, 1]);
        let first = engine.current_round_pairings().unwrap();
        let writes = gateway.writes();
        let second = engine.current_round_pairings().unwrap();
        assert_eq!(first, second);
        assert_eq!(writes, gateway.writes());
    }

    #[test]
    fn test_settlement_and_round_completion() {
        let (mut engine, _) = engine(&[4, 3, 2, 1]);
        let matches = expect_pairings(engine.current_round_pairings().unwrap());
        assert_eq!(vec![("p4", "p2"), ("p3", "p1")], ids(&matches));

        engine
            .submit_match_result(matches[0].id, MatchOutcome::WinP1)
            .unwrap();
        assert_eq!(SwissPhase::RoundInProgress, engine.phase());
        engine
            .submit_match_result(matches[1].id, MatchOutcome::Draw)
            .unwrap();
        assert_eq!(SwissPhase::RoundComplete, engine.phase());

        let state = engine.state();
        let p4 = state.player(&"p4".into()).unwrap();
        assert_eq!(Points::ONE, p4.points);
        assert!(p4.has_played(&"p2".into()));
        assert!(state.player(&"p2".into()).unwrap().has_played(&"p4".into()));
        assert_eq!(Points::HALF, state.player(&"p1".into()).unwrap().points);

        let again = engine.submit_match_result(matches[0].id, MatchOutcome::WinP2);
        assert!(matches!(again, Err(EngineError::StaleState(_))));
    }

    #[test]
    fn test_rejects_pending_outcome_and_stale_ids() {
        let (mut engine, _) = engine(&[4, 3, 2, 1]);
        let matches = expect_pairings(engine.current_round_pairings().unwrap());
        assert!(matches!(
            engine.submit_match_result(matches[0].id, MatchOutcome::Pending),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.submit_match_result(PairingId(77), MatchOutcome::Draw),
            Err(EngineError::StaleState(_))
        ));
    }

    #[test]
    fn test_full_tournament_with_seed_oracle() {
        let (mut engine, _) = engine(&[8, 7, 6, 5, 4, 3, 2, 1]);
        let standings = engine.run_with(&mut SeedOracle::default()).unwrap();

        assert_eq!(SwissPhase::Done { partial_rounds: false }, engine.phase());
        assert_eq!(4, engine.state().round);
        assert_eq!("p8", standings[0].item.id.as_str());
        // three wins and a final-round bye, level with p7 on points
        assert_eq!(Points::from_halves(6), standings[0].points);
        assert_eq!("p7", standings[1].item.id.as_str());
        assert_eq!(1, standings[0].byes);

        let history = &engine.state().match_history;
        let unique: HashSet<_> = history
            .iter()
            .map(|m| {
                let mut pair = [m.player1.clone(), m.player2.clone()];
                pair.sort();
                pair
            })
            .collect();
        assert_eq!(history.len(), unique.len());

        let total: u32 = engine.state().players.iter().map(|p| p.points.halves()).sum();
        assert_eq!(2 * history.len() as u32, total);
    }

    #[test]
    fn test_two_players_run_out_of_pairings() {
        let (mut engine, _) = engine(&[2, 1]);
        let standings = engine.run_with(&mut SeedOracle::default()).unwrap();
        assert_eq!(SwissPhase::Done { partial_rounds: true }, engine.phase());
        assert_eq!(1, engine.state().round);
        assert_eq!(1, engine.state().match_history.len());
        assert_eq!(1, standings[0].played);
        assert_eq!("p2", standings[0].item.id.as_str());
        // the abandoned second round records no byes
        assert!(engine.state().byes.is_empty());
    }

    #[test]
    fn test_standings_tie_breaks() {
        let roster = vec![
            Item::new("late", "Late", 5),
            Item::new("high", "High", 9),
            Item::new("early", "Early", 5),
        ];
        let gateway = MemoryGateway::new();
        let engine = SwissEngine::create(roster, SwissConfig::default(), Box::new(gateway)).unwrap();
        let order = engine
            .standings()
            .into_iter()
            .map(|s| s.item.id.to_string())
            .collect::<Vec<_>>();
        assert_eq!(vec!["high", "late", "early"], order);
    }

    #[test]
    fn test_odd_field_records_byes() {
        let (mut engine, _) = engine(&[5, 4, 3, 2, 1]);
        match engine.current_round_pairings().unwrap() {
            RoundView::Pairings { byes, .. } => assert_eq!(vec![ItemId::from("p1")], byes),
            other => panic!("expected pairings, got {:?}", other),
        }
        assert_eq!(1, engine.state().player(&"p1".into()).unwrap().byes);
    }

    #[test]
    fn test_provisional_pick_and_restore() {
        let (mut engine, gateway) = engine(&[4, 3, 2, 1]);
        let matches = expect_pairings(engine.current_round_pairings().unwrap());
        engine
            .record_provisional_pick(matches[1].id, MatchOutcome::WinP2)
            .unwrap();

        let blob = gateway.latest().unwrap().unwrap();
        let mut restored = SwissEngine::restore(&blob, Box::new(gateway.clone())).unwrap();
        let pairing = restored.pairing_for(matches[1].id).unwrap();
        assert_eq!(Some(Decision::Winner("p1".into())), pairing.provisional);

        restored
            .submit_match_result(matches[1].id, MatchOutcome::WinP2)
            .unwrap();
        let settled = restored
            .state()
            .match_history
            .iter()
            .find(|m| m.id == matches[1].id)
            .unwrap();
        assert_eq!(None, settled.provisional);

        // the original handle is now behind the gateway
        let stale = engine.snapshot().unwrap();
        assert!(matches!(
            SwissEngine::restore(&stale, Box::new(gateway)),
            Err(EngineError::Snapshot(_))
        ));
    }

    #[test]
    fn test_abandon_blocks_further_calls() {
        let (mut engine, _) = engine(&[4, 3, 2, 1]);
        let matches = expect_pairings(engine.current_round_pairings().unwrap());
        engine.abandon().unwrap();
        assert!(matches!(
            engine.submit_match_result(matches[0].id, MatchOutcome::WinP1),
            Err(EngineError::Abandoned)
        ));
        assert!(matches!(
            engine.current_round_pairings(),
            Err(EngineError::Abandoned)
        ));
    }

    #[test]
    fn test_old_handle_cannot_overwrite_resumed_result() {
        let (mut old, gateway) = engine(&[4, 3, 2, 1]);
        let matches = expect_pairings(old.current_round_pairings().unwrap());
        let first = matches[0].id;

        let blob = gateway.latest().unwrap().unwrap();
        let mut resumed = SwissEngine::restore(&blob, Box::new(gateway.clone())).unwrap();
        resumed
            .submit_match_result(first, MatchOutcome::WinP1)
            .unwrap();

        assert!(matches!(
            old.submit_match_result(first, MatchOutcome::WinP2),
            Err(EngineError::StaleState(_))
        ));
        assert_eq!(2, old.sequence());

        let latest = gateway.latest().unwrap().unwrap();
        assert_eq!(3, latest.sequence);
        let stored = SwissEngine::restore(&latest, Box::new(gateway)).unwrap();
        let settled = stored
            .state()
            .match_history
            .iter()
            .find(|m| m.id == first)
            .unwrap();
        assert_eq!(MatchOutcome::WinP1, settled.outcome);
    }

    #[test]
    fn test_failed_snapshot_keeps_previous_state() {
        let (mut engine, gateway) = engine(&[4, 3, 2, 1]);
        let matches = expect_pairings(engine.current_round_pairings().unwrap());
        let sequence = engine.sequence();

        gateway.set_fail_writes(true);
        assert!(matches!(
            engine.submit_match_result(matches[0].id, MatchOutcome::WinP1),
            Err(EngineError::Persistence(_))
        ));
        assert_eq!(sequence, engine.sequence());
        assert_eq!(SwissPhase::RoundInProgress, engine.phase());
        assert!(engine.state().match_history.iter().all(|m| !m.is_settled()));
        assert!(engine.state().players.iter().all(|p| p.points == Points::ZERO));

        gateway.set_fail_writes(false);
        engine
            .submit_match_result(matches[0].id, MatchOutcome::WinP1)
            .unwrap();
        assert_eq!(sequence + 1, engine.sequence());
        assert_eq!(sequence + 1, gateway.latest().unwrap().unwrap().sequence);
    }

    #[test]
    fn test_unavailable_decision_changes_nothing() {
        let (mut engine, gateway) = engine(&[4, 3, 2, 1]);
        let mut asleep = |_: &Pairing| -> Result<Decision, DecisionUnavailable> {
            Err(DecisionUnavailable::new("asleep"))
        };
        let result = engine.run_with(&mut asleep);
        assert!(matches!(
            result,
            Err(EngineError::DecisionUnavailable { pairing: PairingId(1), .. })
        ));

        // only creation and the round 1 pairing were written
        assert_eq!(2, gateway.writes());
        assert_eq!(SwissPhase::RoundInProgress, engine.phase());
        assert!(engine.state().match_history.iter().all(|m| !m.is_settled()));

        let standings = engine.run_with(&mut SeedOracle::default()).unwrap();
        assert_eq!("p4", standings[0].item.id.as_str());
    }
}
