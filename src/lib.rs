//! Pairwise ranking engines driven by an external decision source.
//!
//! Two engines share one persistence and decision model:
//!
//! * [`UsulEngine`] ranks a fixed item set by elimination rounds, placing every
//!   eliminated item into the final ranking with extra comparisons.
//! * [`SwissEngine`] runs a Swiss tournament and reports standings.
//!
//! Neither engine blocks waiting for an answer. Callers fetch the pending pairings,
//! submit decisions whenever they arrive, and can snapshot/restore in between.

use itertools::Itertools;

pub mod decision;
pub mod error;
pub mod ingest;
pub mod item;
pub mod pairing;
pub mod randomness;
pub mod snapshot;
pub mod swiss;
pub mod usul;

pub use decision::{Decision, DecisionSource, Pairing, PairingId, PairingKind, SeedOracle};
pub use error::{DecisionUnavailable, EngineError, EngineResult, MalformedRow, PersistenceError};
pub use ingest::{parse_items, IngestConfig, IngestReport, ItemColumns};
pub use item::{Item, ItemId};
pub use randomness::{RandomnessPort, ScriptedRandomness, SeededRandomness};
pub use snapshot::{
    EngineKind, FileGateway, MemoryGateway, PersistenceGateway, SnapshotBlob, FORMAT_VERSION,
};
pub use swiss::{
    MatchId, MatchOutcome, Points, RoundView, Standing, SwissConfig, SwissEngine, SwissMatch,
    SwissPhase, SwissPlayer, SwissState,
};
pub use usul::{minimum_rounds, UsulConfig, UsulEngine, UsulPhase, UsulState, UsulStep};

/// One line per match: `a > b` when player 1 won, `a < b` when player 2 won, `a = b`
/// for a draw and `a ? b` while undecided.
pub fn format_round(matches: &[SwissMatch]) -> String {
    matches
        .iter()
        .map(|m| {
            let sign = match m.outcome {
                MatchOutcome::WinP1 => ">",
                MatchOutcome::WinP2 => "<",
                MatchOutcome::Draw => "=",
                MatchOutcome::Pending => "?",
            };
            format!("{} {} {}", m.player1, sign, m.player2)
        })
        .join("\n")
}

pub fn format_bracket(state: &SwissState) -> String {
    let mut rounds_out = vec![];
    for (round, matches) in &state.match_history.iter().group_by(|m| m.round) {
        rounds_out.push(format!("Round {}:", round));
        rounds_out.push("".to_string());
        rounds_out.push(format_round(&matches.cloned().collect::<Vec<_>>()));
        let byes = state
            .byes
            .iter()
            .filter(|b| b.round == round)
            .map(|b| b.player.to_string())
            .join(", ");
        if !byes.is_empty() {
            rounds_out.push(format!("bye: {}", byes));
        }
        rounds_out.push("".to_string());
    }
    rounds_out.join("\n")
}

/// `1. label (id)` per line, best first
pub fn format_ranking(ranking: &[Item]) -> String {
    ranking
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {} ({})", i + 1, item.label, item.id))
        .join("\n")
}

pub fn format_standings(standings: &[Standing]) -> String {
    standings
        .iter()
        .map(|s| {
            format!(
                "{}. {} {} pts ({} played, {} byes)",
                s.rank, s.item.id, s.points, s.played, s.byes
            )
        })
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settled(id: u64, round: u32, p1: &str, p2: &str, outcome: MatchOutcome) -> SwissMatch {
        SwissMatch {
            id: PairingId(id),
            round,
            player1: p1.into(),
            player2: p2.into(),
            outcome,
            provisional: None,
        }
    }

    #[test]
    fn test_format_round() {
        let round = vec![
            settled(1, 1, "a", "b", MatchOutcome::WinP1),
            settled(2, 1, "c", "d", MatchOutcome::WinP2),
            settled(3, 1, "e", "f", MatchOutcome::Draw),
            settled(4, 1, "g", "h", MatchOutcome::Pending),
        ];
        assert_eq!("a > b\nc < d\ne = f\ng ? h", format_round(&round));
        assert_eq!("", format_round(&[]));
    }

    #[test]
    fn test_format_bracket() {
        let mut engine = SwissEngine::create(
            vec![
                Item::new("a", "A", 3),
                Item::new("b", "B", 2),
                Item::new("c", "C", 1),
            ],
            SwissConfig {
                max_rounds_override: Some(1),
                ..Default::default()
            },
            Box::new(MemoryGateway::new()),
        )
        .unwrap();
        engine.run_with(&mut SeedOracle::default()).unwrap();
        assert_eq!(
            "Round 1:\n\na > b\nbye: c\n",
            format_bracket(engine.state())
        );
    }

    #[test]
    fn test_format_ranking_and_standings() {
        let ranking = vec![Item::new("x", "Ex", 2), Item::new("y", "Why", 1)];
        assert_eq!("1. Ex (x)\n2. Why (y)", format_ranking(&ranking));

        let standings = vec![Standing {
            rank: 1,
            item: Item::new("x", "Ex", 2),
            points: Points::from_halves(3),
            played: 2,
            byes: 1,
        }];
        assert_eq!(
            "1. x 1.5 pts (2 played, 1 byes)",
            format_standings(&standings)
        );
    }
}
