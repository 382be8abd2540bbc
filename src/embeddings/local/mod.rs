
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::morphology::{MorphologyAnalyzer, SemanticFeature};

const TECHNICAL_TERMS: &[&str] = &[
    "서버",
    "모니터링",
    "cpu",
    "메모리",
    "성능",
    "오류",
    "로그",
    "데이터베이스",
    "api",
];
const POSITIVE_TERMS: &[&str] = &["정상", "성공", "완료", "향상", "최적화"];
const NEGATIVE_TERMS: &[&str] = &["오류", "실패", "문제", "경고", "장애"];

const SHORT_TEXT_CHARS: usize = 50;
const LONG_TEXT_CHARS: usize = 200;

/// Text-level features mixed into every dimension
#[derive(Debug, Clone, Copy, PartialEq)]
struct SemanticFeatures {
    technical: f64,
    sentiment: f64,
    complexity: f64,
}

/// Deterministic embedding synthesized from morphology stems.
///
/// Equal `(text, dimension)` always yields the same unit-length vector; no
/// model or network access is involved.
#[derive(Debug, Clone, Default)]
pub struct LocalEmbedder {
    analyzer: MorphologyAnalyzer,
}

impl LocalEmbedder {
    #[inline]
    pub fn new(analyzer: MorphologyAnalyzer) -> Self {
        Self { analyzer }
    }

    #[inline]
    pub fn embed(&self, text: &str, dimension: usize) -> Vec<f32> {
        if dimension == 0 {
            return Vec::new();
        }

        let normalized = text.trim().to_lowercase();
        let analysis = self.analyzer.analyze(&normalized);

        let tokens: Vec<String> = analysis
            .stems
            .iter()
            .map(|stem| stem.to_lowercase())
            .filter(|stem| !stem.is_empty())
            .collect();
        if tokens.is_empty() {
            debug!("No stems found, using hash embedding");
            return hash_embedding(&normalized, dimension);
        }

        let domain_stems: HashSet<String> = analysis
            .stem_morphemes()
            .filter(|m| m.semantic != SemanticFeature::General)
            .map(|m| m.surface.to_lowercase())
            .collect();

        let weights = term_weights(&tokens);
        let features = semantic_features(&normalized, &tokens, &domain_stems);
        let working_dimension = dynamic_dimension(normalized.chars().count(), dimension);

        let mut values: Vec<f64> = (0..working_dimension)
            .map(|i| {
                let step = i as f64;
                let mut value = tfidf_weight(&tokens, &weights, i) * 0.4;
                value = (features.technical * (step * 0.1).cos()).mul_add(0.3, value);
                value = (features.sentiment * (step * 0.2).sin()).mul_add(0.2, value);
                value = (features.complexity * (step * 0.05).cos()).mul_add(0.1, value);
                context_weight(&tokens, i).mul_add(0.1, value)
            })
            .collect();

        adjust_dimension(&mut values, dimension);

        match normalize(&values) {
            Some(unit) => unit,
            None => hash_embedding(&normalized, dimension),
        }
    }
}

/// `0.5 + 0.5 * tf / max_tf` per distinct term
fn term_weights(tokens: &[String]) -> HashMap<&str, f64> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }

    let max = counts.values().copied().max().unwrap_or(1) as f64;
    counts
        .into_iter()
        .map(|(term, count)| (term, (count as f64 / max).mul_add(0.5, 0.5)))
        .collect()
}

fn semantic_features(
    text: &str,
    tokens: &[String],
    domain_stems: &HashSet<String>,
) -> SemanticFeatures {
    let n = tokens.len() as f64;
    let contains_any =
        |token: &str, terms: &[&str]| terms.iter().any(|term| token.contains(term));

    let technical = tokens
        .iter()
        .filter(|token| domain_stems.contains(*token) || contains_any(token.as_str(), TECHNICAL_TERMS))
        .count() as f64;
    let positive = tokens
        .iter()
        .filter(|token| contains_any(token.as_str(), POSITIVE_TERMS))
        .count() as f64;
    let negative = tokens
        .iter()
        .filter(|token| contains_any(token.as_str(), NEGATIVE_TERMS))
        .count() as f64;
    let unique = tokens.iter().collect::<HashSet<_>>().len() as f64;

    SemanticFeatures {
        technical: (technical / n).min(1.0),
        sentiment: (positive - negative) / n,
        complexity: ((text.chars().count() as f64) + 1.0).ln() / 10.0 + unique / n,
    }
}

/// Short texts use two thirds of the requested size, long texts four thirds
pub(crate) fn dynamic_dimension(chars: usize, dimension: usize) -> usize {
    if chars < SHORT_TEXT_CHARS {
        (dimension as f64 * 0.67).floor() as usize
    } else if chars > LONG_TEXT_CHARS {
        (dimension as f64 * 1.33).floor() as usize
    } else {
        dimension
    }
}

fn first_char_code(term: &str) -> u32 {
    term.chars().next().map_or(0, u32::from)
}

fn tfidf_weight(tokens: &[String], weights: &HashMap<&str, f64>, i: usize) -> f64 {
    let term = &tokens[i % tokens.len()];
    let weight = weights.get(term.as_str()).copied().unwrap_or(0.5);
    let idf = (100.0 / f64::from(1 + first_char_code(term) % 20)).ln();
    weight * idf
}

/// Relatedness of the token at `i` and its neighbour: length similarity and
/// a 0.5 bonus for a shared first character, averaged
fn context_weight(tokens: &[String], i: usize) -> f64 {
    if tokens.len() < 2 {
        return 0.0;
    }

    let left = &tokens[i % tokens.len()];
    let right = &tokens[(i + 1) % tokens.len()];
    let left_len = left.chars().count();
    let right_len = right.chars().count();

    let longest = left_len.max(right_len).max(1) as f64;
    let length_similarity = 1.0 - (left_len.abs_diff(right_len) as f64 / longest);
    let char_similarity = if first_char_code(left) == first_char_code(right) {
        0.5
    } else {
        0.0
    };

    (length_similarity + char_similarity) / 2.0
}

/// Truncate to `dimension`, or pad with a tenth of the mean
fn adjust_dimension(values: &mut Vec<f64>, dimension: usize) {
    if values.len() >= dimension {
        values.truncate(dimension);
        return;
    }

    let mean = if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    };
    values.resize(dimension, mean * 0.1);
}

fn normalize(values: &[f64]) -> Option<Vec<f32>> {
    let magnitude = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if magnitude == 0.0 || !magnitude.is_finite() {
        return None;
    }
    Some(values.iter().map(|v| (v / magnitude) as f32).collect())
}

/// Vector derived from the blake3 hex digest of `text`; used when no stems
/// survive analysis or the feature vector degenerates to zero
pub(crate) fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    if dimension == 0 {
        return Vec::new();
    }

    let digest = blake3::hash(text.as_bytes()).to_hex();
    let hex = digest.as_bytes();
    let scale = (dimension as f64).sqrt();

    let values: Vec<f64> = (0..dimension)
        .map(|i| (f64::from(hex[i % hex.len()]) * (i as f64 + 1.0)).sin() / scale)
        .collect();

    normalize(&values).unwrap_or_else(|| vec![0.0; dimension])
}
