//! Generation channels.
//!
//! A channel is a strategy for proposing candidates. The feedback loop only ever sees
//! channel identities and outcomes; what a channel does with its context lives here.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::concept_graph::StructuralHole;
use crate::model::Candidate;

/// Upstream generation channel (one bandit arm each).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Bridges structural holes in the concept graph.
    GraphExplorer,
    /// Moves a mechanism from one concept's territory into another's.
    AnalogyTransfer,
    /// Refines the previous run's winners.
    ExploitRefiner,
    /// Restates the theme under an explicit constraint.
    ConstraintInjection,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::GraphExplorer,
        Channel::AnalogyTransfer,
        Channel::ExploitRefiner,
        Channel::ConstraintInjection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::GraphExplorer => "graph_explorer",
            Channel::AnalogyTransfer => "analogy_transfer",
            Channel::ExploitRefiner => "exploit_refiner",
            Channel::ConstraintInjection => "constraint_injection",
        }
    }

    fn code(self) -> &'static str {
        match self {
            Channel::GraphExplorer => "ge",
            Channel::AnalogyTransfer => "at",
            Channel::ExploitRefiner => "er",
            Channel::ConstraintInjection => "ci",
        }
    }

    /// Produce up to `ctx.count` seed proposals, deterministically for a given seed.
    ///
    /// Channels fall back to top concepts, then to the bare theme, when their own
    /// source material is empty, so a non-zero count always yields candidates.
    pub fn generate(&self, seed: u64, ctx: &GenerationContext) -> Vec<Candidate> {
        if ctx.count == 0 {
            return Vec::new();
        }
        let mut rng = StdRng::seed_from_u64(seed ^ channel_salt(*self));
        let theme = ctx.theme_or_default();

        let drafts: Vec<(String, Vec<String>)> = match self {
            Channel::GraphExplorer => {
                let mut drafts: Vec<_> = ctx
                    .holes
                    .iter()
                    .map(|hole| {
                        (
                            format!(
                                "Bridge {} and {} for {theme}: both concepts share context \
                                 in the literature but are rarely studied together.",
                                hole.concept_a, hole.concept_b
                            ),
                            vec![hole.concept_a.clone(), hole.concept_b.clone()],
                        )
                    })
                    .collect();
                if drafts.is_empty() {
                    drafts = concept_pairs(&ctx.concepts, &mut rng)
                        .into_iter()
                        .map(|(a, b)| {
                            (
                                format!("Combine {a} with {b} to open a new angle on {theme}."),
                                vec![a, b],
                            )
                        })
                        .collect();
                }
                drafts
            }
            Channel::AnalogyTransfer => concept_pairs(&ctx.concepts, &mut rng)
                .into_iter()
                .map(|(source, target)| {
                    (
                        format!(
                            "Transfer the core mechanism behind {source} into {target} \
                             and test whether it improves {theme}."
                        ),
                        vec![source, target],
                    )
                })
                .collect(),
            Channel::ExploitRefiner => {
                let mut drafts = Vec::new();
                for (i, winner) in ctx.prior_winners.iter().enumerate() {
                    let focus = ctx.concepts.get(i % ctx.concepts.len().max(1));
                    let text = match focus {
                        Some(concept) => format!(
                            "Refine the prior winner with a sharper focus on {concept}: {}",
                            winner.text
                        ),
                        None => format!("Refine the prior winner: {}", winner.text),
                    };
                    let labels: Vec<String> = winner.taxonomy_labels.iter().cloned().collect();
                    drafts.push((text, labels));
                }
                drafts
            }
            Channel::ConstraintInjection => {
                let mut constraints = ctx.constraints.clone();
                constraints.shuffle(&mut rng);
                constraints
                    .into_iter()
                    .enumerate()
                    .map(|(i, constraint)| {
                        let concept = ctx.concepts.get(i % ctx.concepts.len().max(1));
                        let text = match concept {
                            Some(c) => format!("Pursue {theme} through {c} under the constraint: {constraint}."),
                            None => format!("Pursue {theme} under the constraint: {constraint}."),
                        };
                        let labels: Vec<String> = concept.cloned().into_iter().collect();
                        (text, labels)
                    })
                    .collect()
            }
        };

        let drafts = if drafts.is_empty() {
            fallback_drafts(&ctx.concepts, &theme, ctx.count)
        } else {
            drafts
        };

        drafts
            .into_iter()
            .cycle()
            .take(ctx.count)
            .enumerate()
            .map(|(i, (text, labels))| {
                Candidate::new(format!("{}-{:03}", self.code(), i + 1), text)
                    .with_labels(labels)
                    .with_channel(*self)
            })
            .collect()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown channel '{s}'"))
    }
}

/// What a channel can draw on when proposing candidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationContext {
    pub theme: String,
    /// Ranked structural holes from the concept graph.
    pub holes: Vec<StructuralHole>,
    /// Top concepts, most frequent first.
    pub concepts: Vec<String>,
    /// Winners of the previous run.
    pub prior_winners: Vec<Candidate>,
    pub constraints: Vec<String>,
    /// Number of candidates to produce.
    pub count: usize,
}

impl GenerationContext {
    fn theme_or_default(&self) -> String {
        if self.theme.trim().is_empty() {
            "the research theme".to_string()
        } else {
            self.theme.trim().to_string()
        }
    }
}

/// Split `total` across channels in proportion to `weights` (largest remainder).
///
/// Non-finite or negative weights count as zero. With no positive weight the
/// budget is split evenly across [`Channel::ALL`].
pub fn allocate(weights: &BTreeMap<Channel, f64>, total: usize) -> BTreeMap<Channel, usize> {
    let mut clean: BTreeMap<Channel, f64> = weights
        .iter()
        .map(|(c, w)| (*c, if w.is_finite() && *w > 0.0 { *w } else { 0.0 }))
        .collect();
    let mut sum: f64 = clean.values().sum();
    if sum <= 0.0 {
        clean = Channel::ALL.into_iter().map(|c| (c, 1.0)).collect();
        sum = clean.len() as f64;
    }

    let mut out = BTreeMap::new();
    let mut remainders = Vec::with_capacity(clean.len());
    let mut assigned = 0usize;
    for (channel, weight) in &clean {
        let exact = total as f64 * weight / sum;
        let floor = exact.floor() as usize;
        assigned += floor;
        out.insert(*channel, floor);
        remainders.push((*channel, exact - floor as f64));
    }
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    for (channel, _) in remainders.into_iter().take(total.saturating_sub(assigned)) {
        if let Some(n) = out.get_mut(&channel) {
            *n += 1;
        }
    }
    out
}

/// Generate a full mix: allocate `total` by weight, then let every channel fill its share.
pub fn generate_mix(
    weights: &BTreeMap<Channel, f64>,
    total: usize,
    seed: u64,
    ctx: &GenerationContext,
) -> Vec<Candidate> {
    let plan = allocate(weights, total);
    let mut out = Vec::with_capacity(total);
    for (channel, count) in plan {
        let sub = GenerationContext {
            count,
            ..ctx.clone()
        };
        out.extend(channel.generate(seed, &sub));
    }
    out
}

fn channel_salt(channel: Channel) -> u64 {
    let hash = blake3::hash(channel.as_str().as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(buf)
}

/// Shuffled ordered pairs of distinct concepts.
fn concept_pairs(concepts: &[String], rng: &mut StdRng) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (i, a) in concepts.iter().enumerate() {
        for b in concepts.iter().skip(i + 1) {
            pairs.push((a.clone(), b.clone()));
        }
    }
    pairs.shuffle(rng);
    pairs
}

fn fallback_drafts(concepts: &[String], theme: &str, count: usize) -> Vec<(String, Vec<String>)> {
    if concepts.is_empty() {
        return (1..=count)
            .map(|i| (format!("Direction {i} for {theme}."), Vec::new()))
            .collect();
    }
    concepts
        .iter()
        .map(|c| (format!("Investigate {c} as a lever for {theme}."), vec![c.clone()]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(count: usize) -> GenerationContext {
        GenerationContext {
            theme: "battery recycling".into(),
            concepts: vec!["electrolyte".into(), "solvent".into(), "membrane".into()],
            constraints: vec!["no rare earths".into(), "room temperature".into()],
            count,
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_is_deterministic_and_tagged() {
        for channel in Channel::ALL {
            let a = channel.generate(7, &ctx(5));
            let b = channel.generate(7, &ctx(5));
            assert_eq!(a, b);
            assert_eq!(a.len(), 5);
            assert!(a.iter().all(|c| c.origin_channel == Some(channel)));
        }
    }

    #[test]
    fn test_generate_ids_unique_across_channels() {
        let mut ids: Vec<String> = Channel::ALL
            .iter()
            .flat_map(|c| c.generate(1, &ctx(3)))
            .map(|c| c.id)
            .collect();
        let n = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), n);
    }

    #[test]
    fn test_generate_zero_count_and_empty_context() {
        assert!(Channel::GraphExplorer.generate(1, &ctx(0)).is_empty());
        let bare = GenerationContext {
            count: 2,
            ..Default::default()
        };
        assert_eq!(Channel::ExploitRefiner.generate(1, &bare).len(), 2);
    }

    #[test]
    fn test_allocate_largest_remainder() {
        let weights: BTreeMap<Channel, f64> = [
            (Channel::GraphExplorer, 0.5),
            (Channel::AnalogyTransfer, 0.3),
            (Channel::ExploitRefiner, 0.2),
        ]
        .into_iter()
        .collect();
        let plan = allocate(&weights, 11);
        assert_eq!(plan.values().sum::<usize>(), 11);
        assert_eq!(plan[&Channel::GraphExplorer], 6);
        assert_eq!(plan[&Channel::AnalogyTransfer], 3);
        assert_eq!(plan[&Channel::ExploitRefiner], 2);
    }

    #[test]
    fn test_allocate_without_positive_weights_is_even() {
        let plan = allocate(&BTreeMap::new(), 8);
        assert!(plan.values().all(|n| *n == 2));
    }

    #[test]
    fn test_channel_round_trips_as_str() {
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
            let json = serde_json::to_string(&channel).unwrap();
            assert_eq!(json, format!("\"{}\"", channel.as_str()));
        }
    }
}
