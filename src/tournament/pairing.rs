//! Swiss standings and round pairing.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Nodes the rematch-free search may visit before giving up.
const SEARCH_BUDGET: usize = 200_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub id: String,
    /// Bout wins; a bye counts as a win.
    pub wins: u32,
    pub losses: u32,
    pub byes: u32,
    /// Void bouts and byes do not count here.
    pub bouts: u32,
    /// Seeded draw that orders otherwise equal records.
    pub tie_break: u64,
}

impl Standing {
    fn rank_cmp(&self, other: &Standing) -> Ordering {
        other
            .wins
            .cmp(&self.wins)
            .then(self.losses.cmp(&other.losses))
            .then(self.tie_break.cmp(&other.tie_break))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Running records plus who has met whom.
#[derive(Debug, Clone, Default)]
pub struct Standings {
    records: BTreeMap<String, Standing>,
    met: BTreeSet<(String, String)>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl Standings {
    /// Each candidate id with its tie-break draw.
    pub fn new(entries: impl IntoIterator<Item = (String, u64)>) -> Self {
        let records = entries
            .into_iter()
            .map(|(id, tie_break)| {
                (
                    id.clone(),
                    Standing {
                        id,
                        wins: 0,
                        losses: 0,
                        byes: 0,
                        bouts: 0,
                        tie_break,
                    },
                )
            })
            .collect();
        Self {
            records,
            met: BTreeSet::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Standing> {
        self.records.get(id)
    }

    pub fn have_met(&self, a: &str, b: &str) -> bool {
        self.met.contains(&pair_key(a, b))
    }

    pub fn had_bye(&self, id: &str) -> bool {
        self.records.get(id).is_some_and(|s| s.byes > 0)
    }

    pub fn record_pairing(&mut self, a: &str, b: &str) {
        self.met.insert(pair_key(a, b));
    }

    pub fn record_result(&mut self, winner: &str, loser: &str) {
        if let Some(s) = self.records.get_mut(winner) {
            s.wins += 1;
            s.bouts += 1;
        }
        if let Some(s) = self.records.get_mut(loser) {
            s.losses += 1;
            s.bouts += 1;
        }
    }

    pub fn record_bye(&mut self, id: &str) {
        if let Some(s) = self.records.get_mut(id) {
            s.wins += 1;
            s.byes += 1;
        }
    }

    /// `field` sorted by rank key `(-wins, losses, tie_break, id)`.
    pub fn rank(&self, field: &[String]) -> Vec<String> {
        let mut entries: Vec<&Standing> = field.iter().filter_map(|id| self.records.get(id)).collect();
        entries.sort_by(|a, b| a.rank_cmp(b));
        entries.into_iter().map(|s| s.id.clone()).collect()
    }

    /// Every record in rank order.
    pub fn ranked(&self) -> Vec<Standing> {
        let mut all: Vec<Standing> = self.records.values().cloned().collect();
        all.sort_by(|a, b| a.rank_cmp(b));
        all
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundPairing {
    pub pairs: Vec<(String, String)>,
    pub bye: Option<String>,
    pub forced_rematches: usize,
}

/// Pair a ranked field for one round.
///
/// With an odd field the lowest-ranked candidate without a previous bye sits out.
/// The rest are paired as close to standings order as a rematch-free pairing
/// allows; if none is found within the search budget, adjacent pairs are repaired
/// by swaps and any rematches left are counted.
pub fn pair_round(ranked: &[String], standings: &Standings) -> RoundPairing {
    let mut pool: Vec<String> = ranked.to_vec();
    let mut bye = None;
    if pool.len() % 2 == 1 {
        let idx = pool
            .iter()
            .rposition(|id| !standings.had_bye(id))
            .unwrap_or(pool.len() - 1);
        bye = Some(pool.remove(idx));
    }

    let mut budget = SEARCH_BUDGET;
    let mut used = vec![false; pool.len()];
    let mut out = Vec::with_capacity(pool.len() / 2);
    if search(&pool, standings, &mut used, &mut out, &mut budget) {
        let pairs = out
            .into_iter()
            .map(|(i, j)| (pool[i].clone(), pool[j].clone()))
            .collect();
        return RoundPairing {
            pairs,
            bye,
            forced_rematches: 0,
        };
    }

    let mut pairs: Vec<(String, String)> = pool
        .chunks(2)
        .filter_map(|c| match c {
            [a, b] => Some((a.clone(), b.clone())),
            _ => None,
        })
        .collect();
    repair_by_swaps(&mut pairs, standings);
    let forced_rematches = pairs
        .iter()
        .filter(|(a, b)| standings.have_met(a, b))
        .count();
    RoundPairing {
        pairs,
        bye,
        forced_rematches,
    }
}

fn search(
    pool: &[String],
    standings: &Standings,
    used: &mut [bool],
    out: &mut Vec<(usize, usize)>,
    budget: &mut usize,
) -> bool {
    let Some(first) = used.iter().position(|u| !u) else {
        return true;
    };
    used[first] = true;
    for partner in first + 1..pool.len() {
        if used[partner] || standings.have_met(&pool[first], &pool[partner]) {
            continue;
        }
        if *budget == 0 {
            break;
        }
        *budget -= 1;
        used[partner] = true;
        out.push((first, partner));
        if search(pool, standings, used, out, budget) {
            return true;
        }
        out.pop();
        used[partner] = false;
    }
    used[first] = false;
    false
}

/// Swap partners between a rematch pair and a later pair when that clears both.
fn repair_by_swaps(pairs: &mut [(String, String)], standings: &Standings) {
    for i in 0..pairs.len() {
        if !standings.have_met(&pairs[i].0, &pairs[i].1) {
            continue;
        }
        for j in i + 1..pairs.len() {
            let (a, b) = pairs[i].clone();
            let (c, d) = pairs[j].clone();
            if !standings.have_met(&a, &c) && !standings.have_met(&b, &d) {
                pairs[i] = (a, c);
                pairs[j] = (b, d);
                break;
            }
            if !standings.have_met(&a, &d) && !standings.have_met(&b, &c) {
                pairs[i] = (a, d);
                pairs[j] = (c, b);
                break;
            }
        }
    }
}
