//! Tokenization and TF-IDF cosine similarity over candidate texts.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").expect("Invalid token regex"));

/// Common English function words, dropped from both concept extraction and TF-IDF.
pub const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "him", "his", "how", "however", "i", "if", "in", "into", "is", "it", "its", "itself",
    "just", "may", "me", "might", "more", "most", "must", "my", "no", "nor", "not", "now", "of",
    "off", "on", "once", "one", "only", "or", "other", "our", "ours", "out", "over", "own",
    "same", "she", "should", "so", "some", "such", "than", "that", "the", "their", "theirs",
    "them", "then", "there", "these", "they", "this", "those", "through", "thus", "to", "too",
    "under", "until", "up", "upon", "us", "use", "used", "using", "very", "via", "was", "we",
    "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "within", "without", "would", "you", "your", "yours",
];

static STOPWORD_SET: Lazy<BTreeSet<&'static str>> =
    Lazy::new(|| STOPWORDS.iter().copied().collect());

pub fn is_stopword(token: &str) -> bool {
    STOPWORD_SET.contains(token)
}

/// Lowercase alphanumeric tokens with stopwords removed, in text order.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| !is_stopword(t))
        .map(str::to_string)
        .collect()
}

/// Sparse unit-length TF-IDF vectors for a fixed document set.
#[derive(Debug, Clone)]
pub struct TfIdfIndex {
    vectors: BTreeMap<String, BTreeMap<String, f64>>,
}

impl TfIdfIndex {
    /// Build an index over `(id, text)` pairs. idf = ln((1 + n) / (1 + df)) + 1.
    pub fn build<'a, I>(docs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let tokenized: Vec<(String, Vec<String>)> = docs
            .into_iter()
            .map(|(id, text)| (id.to_string(), tokenize(text)))
            .collect();
        let n = tokenized.len() as f64;

        let mut df: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, tokens) in &tokenized {
            let unique: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
            for t in unique {
                *df.entry(t).or_insert(0) += 1;
            }
        }

        let mut vectors = BTreeMap::new();
        for (id, tokens) in &tokenized {
            let mut tf: BTreeMap<String, f64> = BTreeMap::new();
            for t in tokens {
                *tf.entry(t.clone()).or_insert(0.0) += 1.0;
            }
            for (term, weight) in tf.iter_mut() {
                let d = df.get(term.as_str()).copied().unwrap_or(0) as f64;
                *weight *= ((1.0 + n) / (1.0 + d)).ln() + 1.0;
            }
            let norm = tf.values().map(|w| w * w).sum::<f64>().sqrt();
            if norm > 0.0 {
                for w in tf.values_mut() {
                    *w /= norm;
                }
            }
            vectors.insert(id.clone(), tf);
        }
        Self { vectors }
    }

    /// Cosine similarity in [0, 1]. Unknown ids and empty texts score 0.
    pub fn cosine(&self, a: &str, b: &str) -> f64 {
        let (Some(va), Some(vb)) = (self.vectors.get(a), self.vectors.get(b)) else {
            return 0.0;
        };
        let (small, large) = if va.len() <= vb.len() { (va, vb) } else { (vb, va) };
        small
            .iter()
            .filter_map(|(term, w)| large.get(term).map(|v| w * v))
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }
}

pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_drops_stopwords() {
        assert_eq!(
            tokenize("The Solid-State battery, and its ELECTROLYTE!"),
            vec!["solid", "state", "battery", "electrolyte"]
        );
    }

    #[test]
    fn test_cosine_identical_and_disjoint() {
        let index = TfIdfIndex::build([
            ("a", "graphene membrane desalination"),
            ("b", "graphene membrane desalination"),
            ("c", "protein folding kinetics"),
        ]);
        assert!((index.cosine("a", "b") - 1.0).abs() < 1e-9);
        assert_eq!(index.cosine("a", "c"), 0.0);
        assert_eq!(index.cosine("a", "missing"), 0.0);
    }

    #[test]
    fn test_cosine_partial_overlap_is_between() {
        let index = TfIdfIndex::build([
            ("a", "graphene membrane desalination"),
            ("b", "graphene sensor arrays"),
        ]);
        let sim = index.cosine("a", "b");
        assert!(sim > 0.0 && sim < 1.0);
        assert!((sim - index.cosine("b", "a")).abs() < 1e-12);
    }

    #[test]
    fn test_jaccard() {
        let a: BTreeSet<_> = [1, 2, 3].into_iter().collect();
        let b: BTreeSet<_> = [2, 3, 4].into_iter().collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-12);
        assert_eq!(jaccard::<i32>(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }
}
