//! TF-IDF feature extraction.
//!
//! A [`Vocabulary`] is fitted once over a corpus and then reused to turn any
//! text into a [`FeatureVector`] of fixed dimension. Vectors remember the
//! vocabulary version that produced them so stale vectors can be told apart
//! from current ones after a refit.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Upper bound on vocabulary size when none is configured.
pub const DEFAULT_MAX_FEATURES: usize = 5000;

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "all", "am", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "being", "below", "between", "both", "but", "by", "can", "could",
    "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from", "further",
    "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how", "if", "in",
    "into", "is", "it", "its", "itself", "me", "more", "most", "my", "no", "nor", "not", "of",
    "off", "on", "once", "only", "or", "other", "our", "ours", "out", "over", "own", "same",
    "she", "should", "so", "some", "such", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "until", "up",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why",
    "will", "with", "would", "you", "your", "yours",
];

#[derive(Debug, Clone)]
pub struct FitOptions {
    pub max_features: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_features: DEFAULT_MAX_FEATURES,
        }
    }
}

/// Term-to-index mapping plus per-term IDF weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub version: u64,
    index: BTreeMap<String, usize>,
    idf: Vec<f32>,
}

/// Dense TF-IDF vector tagged with the vocabulary version that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub vocab_version: u64,
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(vocab_version: u64, values: Vec<f32>) -> Self {
        Self {
            vocab_version,
            values,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

impl Vocabulary {
    /// Fit a vocabulary over `corpus`.
    ///
    /// Terms are unigrams and adjacent bigrams of the normalized tokens. The
    /// `max_features` most frequent terms (by document frequency, ties broken
    /// by the term itself) are kept and indexed in lexicographic order so the
    /// same corpus always produces the same layout. An empty or single
    /// document corpus is accepted and yields a degenerate vocabulary.
    pub fn fit<'a, I>(corpus: I, options: &FitOptions, version: u64) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut n_docs = 0usize;

        for doc in corpus {
            n_docs += 1;
            let unique: HashSet<String> = terms(doc).into_iter().collect();
            for term in unique {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = doc_freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(options.max_features);
        ranked.sort_by(|a, b| a.0.cmp(&b.0));

        let mut index = BTreeMap::new();
        let mut idf = Vec::with_capacity(ranked.len());
        let n = n_docs as f32;
        for (i, (term, df)) in ranked.into_iter().enumerate() {
            idf.push(((1.0 + n) / (1.0 + df as f32)).ln() + 1.0);
            index.insert(term, i);
        }

        Self {
            version,
            index,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.idf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idf.is_empty()
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }

    /// Turn `text` into a vector of exactly `self.len()` entries.
    ///
    /// Raw term counts are weighted by IDF and L2-normalized. Unknown terms
    /// are ignored; empty text gives the zero vector.
    pub fn transform(&self, text: &str) -> FeatureVector {
        let mut values = vec![0.0f32; self.len()];
        for term in terms(text) {
            if let Some(&idx) = self.index.get(&term) {
                values[idx] += 1.0;
            }
        }
        for (v, w) in values.iter_mut().zip(&self.idf) {
            *v *= w;
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        FeatureVector::new(self.version, values)
    }

    /// Check structural invariants after deserialization.
    pub fn validate(&self) -> Result<(), String> {
        if self.index.len() != self.idf.len() {
            return Err(format!(
                "vocabulary has {} terms but {} weights",
                self.index.len(),
                self.idf.len()
            ));
        }
        let mut seen = vec![false; self.idf.len()];
        for (term, &idx) in &self.index {
            match seen.get_mut(idx) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(format!("term '{term}' has invalid index {idx}")),
            }
        }
        if self.idf.iter().any(|w| !w.is_finite()) {
            return Err("vocabulary contains non-finite weights".to_string());
        }
        Ok(())
    }
}

/// Case-folded word tokens of at least two characters, stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn terms(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let mut out = Vec::with_capacity(tokens.len() * 2);
    for pair in tokens.windows(2) {
        out.push(format!("{} {}", pair[0], pair[1]));
    }
    out.extend(tokens);
    out
}
