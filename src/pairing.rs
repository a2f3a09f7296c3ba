//! Swiss pairing rules.
//!
//! Round one seeds by `seed` descending and pairs the top half against the bottom
//! half. Later rounds use Dutch pairing inside each score group, with a greedy
//! fallback pass for whoever the top/bottom split could not place. Anyone left over
//! gets a bye; players are never carried into another score group.

use std::collections::VecDeque;

use itertools::Itertools;

use crate::swiss::SwissPlayer;
use crate::ItemId;

/// Rounds to play for a given field size
pub fn calculate_rounds(player_count: usize) -> u32 {
    match player_count {
        0..=4 => 3,
        5..=8 => 4,
        9..=16 => 5,
        17..=32 => 6,
        33..=64 => 7,
        65..=128 => 8,
        _ => 9,
    }
}

/// Matches and byes for one round, in pairing order. `pairs.0` is player 1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundPlan {
    pub pairs: Vec<(ItemId, ItemId)>,
    pub byes: Vec<ItemId>,
}

/// Stable: players with equal seeds keep roster order
fn by_seed<'a>(players: impl IntoIterator<Item = &'a SwissPlayer>) -> Vec<&'a SwissPlayer> {
    players
        .into_iter()
        .sorted_by(|a, b| b.item.seed.cmp(&a.item.seed))
        .collect()
}

/// i.e. with six players seeded 1..6: 1v4, 2v5, 3v6
pub fn first_round_pairings(players: &[SwissPlayer]) -> RoundPlan {
    let seeded = by_seed(players);
    let half = seeded.len() / 2;
    let mut plan = RoundPlan::default();
    for i in 0..half {
        plan.pairs
            .push((seeded[i].item.id.clone(), seeded[i + half].item.id.clone()));
    }
    if seeded.len() % 2 == 1 {
        plan.byes.push(seeded[seeded.len() - 1].item.id.clone());
    }
    plan
}

pub fn dutch_pairings(players: &[SwissPlayer]) -> RoundPlan {
    let ordered = players
        .iter()
        .sorted_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then_with(|| b.item.seed.cmp(&a.item.seed))
        })
        .collect::<Vec<_>>();

    let mut plan = RoundPlan::default();
    for (_, group) in &ordered.into_iter().group_by(|p| p.points) {
        pair_score_group(&group.collect::<Vec<_>>(), &mut plan);
    }
    plan
}

/// `group` must already be in seed order.
fn pair_score_group(group: &[&SwissPlayer], plan: &mut RoundPlan) {
    let half = group.len() / 2;
    let mut taken = vec![false; group.len()];

    for top in 0..half {
        let candidate = (half..group.len())
            .find(|&bottom| !taken[bottom] && !group[top].has_played(&group[bottom].item.id));
        if let Some(bottom) = candidate {
            taken[top] = true;
            taken[bottom] = true;
            plan.pairs
                .push((group[top].item.id.clone(), group[bottom].item.id.clone()));
        }
    }

    let mut pool = group
        .iter()
        .zip(&taken)
        .filter(|(_, taken)| !**taken)
        .map(|(p, _)| *p)
        .collect::<VecDeque<_>>();
    while let Some(p1) = pool.pop_front() {
        match pool.iter().position(|p2| !p1.has_played(&p2.item.id)) {
            Some(k) => {
                if let Some(p2) = pool.remove(k) {
                    plan.pairs.push((p1.item.id.clone(), p2.item.id.clone()));
                }
            }
            None => plan.byes.push(p1.item.id.clone()),
        }
    }
}
