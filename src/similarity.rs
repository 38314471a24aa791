//! Weighted cosine similarity between two token fields (§4.1).
//!
//! Mirrors the normalization-and-combine shape of `fusion::normalize_scores`
//! in the teacher crate, but over sparse token-count vectors rather than
//! ranked score lists: build counts, apply a per-token weight, cosine.
use std::collections::HashMap;

/// Result of comparing two text fields (§4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityResult {
    pub similarity: f32,
    pub both_empty: bool,
}

/// Per-token weights, loaded from an external artifact; absent weights
/// default to 1.0 (§4.1, §9 "Similarity weights").
#[derive(Debug, Clone, Default)]
pub struct TokenWeights {
    weights: HashMap<String, f32>,
}

impl TokenWeights {
    pub fn uniform() -> Self {
        Self::default()
    }

    pub fn from_map(weights: HashMap<String, f32>) -> Self {
        Self { weights }
    }

    /// Load a `token<TAB>weight` artifact; missing/unreadable file falls
    /// back to uniform weights (§9 "Similarity weights ... if missing,
    /// default to uniform weights").
    pub fn load(path: impl AsRef<std::path::Path>) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => {
                let mut weights = HashMap::new();
                for line in content.lines() {
                    if let Some((token, weight)) = line.split_once('\t')
                        && let Ok(w) = weight.trim().parse::<f32>()
                    {
                        weights.insert(token.to_string(), w);
                    }
                }
                Self { weights }
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "similarity weights artifact unreadable; using uniform weights"
                );
                Self::uniform()
            }
        }
    }

    fn weight_of(&self, token: &str) -> f32 {
        self.weights.get(token).copied().unwrap_or(1.0)
    }
}

/// Pure, injectable similarity scorer (§9 "Keep the scorer pure and
/// injectable").
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    weights: TokenWeights,
    min_word_length: usize,
}

impl SimilarityScorer {
    pub fn new(weights: TokenWeights, min_word_length: usize) -> Self {
        Self {
            weights,
            min_word_length,
        }
    }

    fn token_counts(&self, text: &str) -> HashMap<&str, u32> {
        let mut counts = HashMap::new();
        for tok in text.split_whitespace() {
            if tok.chars().count() < self.min_word_length {
                continue;
            }
            *counts.entry(tok).or_insert(0) += 1;
        }
        counts
    }

    /// Cosine similarity between two token strings over the same field
    /// (§4.1). `both_empty` is set when neither side contributes a token
    /// after filtering; callers must then fall back to a secondary field.
    pub fn score(&self, a: &str, b: &str) -> SimilarityResult {
        let va = self.token_counts(a);
        let vb = self.token_counts(b);

        if va.is_empty() && vb.is_empty() {
            return SimilarityResult {
                similarity: 0.0,
                both_empty: true,
            };
        }

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (tok, &count) in &va {
            let w = self.weights.weight_of(tok) as f64;
            let wv = w * count as f64;
            norm_a += wv * wv;
            if let Some(&count_b) = vb.get(tok) {
                dot += wv * (w * count_b as f64);
            }
        }
        for (tok, &count) in &vb {
            let w = self.weights.weight_of(tok) as f64;
            let wv = w * count as f64;
            norm_b += wv * wv;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        let similarity = if denom > 0.0 { (dot / denom) as f32 } else { 0.0 };

        SimilarityResult {
            similarity: similarity.clamp(0.0, 1.0),
            both_empty: false,
        }
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new(TokenWeights::uniform(), 2)
    }
}
