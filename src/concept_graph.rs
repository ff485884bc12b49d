//! Concept co-occurrence graph and structural-hole detection.
//!
//! Documents are reduced to sets of concepts (document frequency, not term
//! frequency). Edge weight is PMI of document-level co-occurrence. A structural hole
//! is a pair of frequent concepts that rarely co-occur despite sharing neighbours.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::similarity::{jaccard, tokenize};

/// One corpus entry (an abstract, a paragraph, a prior idea).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "abstract", alias = "body")]
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// Config
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Below this many documents the statistics are unstable; frequency only.
    /// Default: 5
    pub min_documents: usize,
    /// Minimum document frequency for a concept to become a node.
    /// Default: 2
    pub min_freq: usize,
    /// Upper bound on nodes considered in the pairwise scan (most frequent first).
    /// Default: 200
    pub max_concepts: usize,
    /// Minimum document frequency for each side of a hole. Default: 2
    pub hole_min_freq: usize,
    /// Holes must have PMI strictly below this. Default: 1.0
    pub pmi_threshold: f64,
    /// Holes must have neighbour Jaccard at least this. Default: 0.1
    pub min_jaccard: f64,
    /// Exponent on Jaccard in the hole score. Default: 1.0
    pub alpha: f64,
    /// Number of holes kept. Default: 20
    pub max_holes: usize,
    /// Add adjacent-token bigrams as concepts. Default: true
    pub include_bigrams: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            min_documents: 5,
            min_freq: 2,
            max_concepts: 200,
            hole_min_freq: 2,
            pmi_threshold: 1.0,
            min_jaccard: 0.1,
            alpha: 1.0,
            max_holes: 20,
            include_bigrams: true,
        }
    }
}

// -----------------------------------------------------------------------------
// Output
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphMode {
    Full,
    /// Corpus too small: nodes ranked by frequency, no edges or holes.
    FrequencyOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptNode {
    pub concept: String,
    pub freq: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptEdge {
    pub source: String,
    pub target: String,
    pub co_occurrences: usize,
    pub pmi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralHole {
    pub concept_a: String,
    pub concept_b: String,
    pub hole_score: f64,
    pub jaccard: f64,
    pub pmi: f64,
    pub freq_a: usize,
    pub freq_b: usize,
    pub co_occurrences: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptGraph {
    pub mode: GraphMode,
    pub documents: usize,
    /// Most frequent first.
    pub nodes: Vec<ConceptNode>,
    /// Highest PMI first.
    pub edges: Vec<ConceptEdge>,
    /// Highest score first.
    pub holes: Vec<StructuralHole>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ConceptGraph {
    pub fn top_concepts(&self, n: usize) -> Vec<String> {
        self.nodes.iter().take(n).map(|n| n.concept.clone()).collect()
    }
}

// -----------------------------------------------------------------------------
// Build
// -----------------------------------------------------------------------------

/// Concepts of one document: non-stopword tokens of length >= 3 plus bigrams.
pub fn extract_concepts(text: &str, include_bigrams: bool) -> BTreeSet<String> {
    let tokens: Vec<String> = tokenize(text)
        .into_iter()
        .filter(|t| t.len() >= 3 && !t.chars().all(|c| c.is_ascii_digit()))
        .collect();
    let mut concepts: BTreeSet<String> = tokens.iter().cloned().collect();
    if include_bigrams {
        for pair in tokens.windows(2) {
            concepts.insert(format!("{} {}", pair[0], pair[1]));
        }
    }
    concepts
}

pub fn build_concept_graph(docs: &[Document], config: &GraphConfig) -> ConceptGraph {
    let doc_concepts: Vec<BTreeSet<String>> = docs
        .iter()
        .map(|d| extract_concepts(&d.text, config.include_bigrams))
        .collect();
    let n_docs = doc_concepts.len();

    let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
    for concepts in &doc_concepts {
        for c in concepts {
            *freq.entry(c.as_str()).or_insert(0) += 1;
        }
    }

    let mut nodes: Vec<ConceptNode> = freq
        .iter()
        .filter(|(_, f)| **f >= config.min_freq)
        .map(|(c, f)| ConceptNode {
            concept: (*c).to_string(),
            freq: *f,
        })
        .collect();
    nodes.sort_by(|a, b| b.freq.cmp(&a.freq).then_with(|| a.concept.cmp(&b.concept)));
    nodes.truncate(config.max_concepts);

    let mut warnings = Vec::new();
    if n_docs < config.min_documents || nodes.is_empty() {
        let message = format!(
            "corpus too small for co-occurrence statistics ({n_docs} documents, {} concepts); \
             falling back to frequency ranking",
            nodes.len()
        );
        warn!(documents = n_docs, concepts = nodes.len(), "{message}");
        warnings.push(message);
        return ConceptGraph {
            mode: GraphMode::FrequencyOnly,
            documents: n_docs,
            nodes,
            edges: Vec::new(),
            holes: Vec::new(),
            warnings,
        };
    }

    let kept: BTreeMap<&str, usize> = nodes
        .iter()
        .map(|n| (n.concept.as_str(), n.freq))
        .collect();

    let mut co: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for concepts in &doc_concepts {
        let present: Vec<&str> = concepts
            .iter()
            .map(String::as_str)
            .filter(|c| kept.contains_key(c))
            .collect();
        for (i, a) in present.iter().enumerate() {
            for b in &present[i + 1..] {
                *co.entry((*a, *b)).or_insert(0) += 1;
            }
        }
    }

    let mut neighbours: BTreeMap<&str, BTreeSet<&str>> =
        kept.keys().map(|c| (*c, BTreeSet::new())).collect();
    for (a, b) in co.keys() {
        if let Some(set) = neighbours.get_mut(a) {
            set.insert(*b);
        }
        if let Some(set) = neighbours.get_mut(b) {
            set.insert(*a);
        }
    }

    let max_pmi = (n_docs as f64).log2().max(0.0);
    let pmi_of = |a: &str, b: &str, count: usize| -> f64 {
        let fa = kept.get(a).copied().unwrap_or(0) as f64;
        let fb = kept.get(b).copied().unwrap_or(0) as f64;
        if count == 0 || fa == 0.0 || fb == 0.0 {
            return 0.0;
        }
        (n_docs as f64 * count as f64 / (fa * fb))
            .log2()
            .clamp(0.0, max_pmi)
    };

    let mut edges: Vec<ConceptEdge> = co
        .iter()
        .filter_map(|((a, b), count)| {
            let pmi = pmi_of(a, b, *count);
            (pmi > 0.0).then(|| ConceptEdge {
                source: (*a).to_string(),
                target: (*b).to_string(),
                co_occurrences: *count,
                pmi,
            })
        })
        .collect();
    edges.sort_by(|x, y| {
        y.pmi
            .total_cmp(&x.pmi)
            .then_with(|| y.co_occurrences.cmp(&x.co_occurrences))
            .then_with(|| x.source.cmp(&y.source))
            .then_with(|| x.target.cmp(&y.target))
    });

    let frequent: Vec<(&str, usize)> = kept
        .iter()
        .filter(|(_, f)| **f >= config.hole_min_freq)
        .map(|(c, f)| (*c, *f))
        .collect();
    let empty = BTreeSet::new();
    let mut holes = Vec::new();
    for (i, &(a, fa)) in frequent.iter().enumerate() {
        let na = neighbours.get(a).unwrap_or(&empty);
        for &(b, fb) in &frequent[i + 1..] {
            let nb = neighbours.get(b).unwrap_or(&empty);
            let j = jaccard(na, nb);
            if j <= 0.0 || j < config.min_jaccard {
                continue;
            }
            let count = co.get(&(a, b)).copied().unwrap_or(0);
            let pmi = pmi_of(a, b, count);
            if pmi >= config.pmi_threshold {
                continue;
            }
            let score = (fa * fb) as f64 * j.powf(config.alpha) / (1.0 + count as f64);
            if score <= 0.0 {
                continue;
            }
            holes.push(StructuralHole {
                concept_a: a.to_string(),
                concept_b: b.to_string(),
                hole_score: score,
                jaccard: j,
                pmi,
                freq_a: fa,
                freq_b: fb,
                co_occurrences: count,
            });
        }
    }
    holes.sort_by(|x, y| {
        y.hole_score
            .total_cmp(&x.hole_score)
            .then_with(|| y.jaccard.total_cmp(&x.jaccard))
            .then_with(|| x.concept_a.cmp(&y.concept_a))
            .then_with(|| x.concept_b.cmp(&y.concept_b))
    });
    holes.truncate(config.max_holes);

    ConceptGraph {
        mode: GraphMode::Full,
        documents: n_docs,
        nodes,
        edges,
        holes,
        warnings,
    }
}
