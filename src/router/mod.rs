// Query complexity router
// Scores a query on four 0-25 axes and picks the local or remote engine


use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RouterConfig;
use crate::{RagError, Result};

const AXIS_MAX: f32 = 25.0;
const CHARS_PER_LENGTH_POINT: f32 = 8.0;
const CONTEXT_CHARS_PER_POINT: f32 = 100.0;
const POINTS_PER_SIGNAL: f32 = 8.0;
const CODE_FENCE_POINTS: f32 = 12.0;
const MULTI_QUESTION_POINTS: f32 = 6.0;
const NUMBERED_LIST_POINTS: f32 = 6.0;
const CONNECTOR_POINTS: f32 = 5.0;

/// Words that suggest reasoning beyond lookup
const SIGNAL_WORDS: &[&str] = &[
    "분석",
    "비교",
    "예측",
    "원인",
    "왜",
    "어떻게",
    "추천",
    "최적화",
    "상관관계",
    "추세",
    "종합",
    "전략",
    "설명",
    "analyze",
    "analysis",
    "compare",
    "predict",
    "why",
    "how",
    "recommend",
    "optimize",
    "correlation",
    "trend",
    "explain",
    "strategy",
];

const CONNECTORS: &[&str] = &[
    "그리고", "또한", "그러면", "하지만", "also", "versus", "vs", "and then",
];

static NUMBERED_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Local,
    Remote,
}

impl EngineKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(RagError::RouterMisconfiguration(format!(
                "Unknown engine '{}', expected local or remote",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    #[default]
    Auto,
    Local,
    Remote,
}

impl RoutingMode {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(RagError::RouterMisconfiguration(format!(
                "Unknown routing mode '{}', expected auto, local or remote",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueryComplexityScore {
    pub length_score: f32,
    pub keyword_score: f32,
    pub pattern_score: f32,
    pub context_score: f32,
    pub total: f32,
    pub recommendation: EngineKind,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequest {
    pub mode: RoutingMode,
    pub preferred_engine: Option<EngineKind>,
    /// Characters of conversation or external context accompanying the query
    pub context_chars: usize,
    pub remote_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub engine: EngineKind,
    pub score: QueryComplexityScore,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryComplexityRouter {
    threshold: f32,
    auto_min_confidence: f32,
}

impl Default for QueryComplexityRouter {
    fn default() -> Self {
        Self::new(&RouterConfig::default())
    }
}

impl QueryComplexityRouter {
    #[inline]
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            threshold: config.threshold,
            auto_min_confidence: config.auto_min_confidence,
        }
    }

    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    #[inline]
    pub fn analyze(&self, query: &str, context_chars: usize) -> QueryComplexityScore {
        let lowered = query.to_lowercase();
        let words: Vec<&str> = lowered
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect();

        let length_score =
            (query.chars().count() as f32 / CHARS_PER_LENGTH_POINT).min(AXIS_MAX);
        let keyword_score = (signal_hits(&lowered, &words) as f32 * POINTS_PER_SIGNAL).min(AXIS_MAX);
        let pattern_score = pattern_points(query, &lowered, &words).min(AXIS_MAX);
        let context_score = (context_chars as f32 / CONTEXT_CHARS_PER_POINT).min(AXIS_MAX);

        let total = length_score + keyword_score + pattern_score + context_score;
        let (recommendation, confidence) = if total > self.threshold {
            (
                EngineKind::Remote,
                (total - self.threshold) / (100.0 - self.threshold),
            )
        } else {
            (EngineKind::Local, (self.threshold - total) / self.threshold)
        };

        QueryComplexityScore {
            length_score,
            keyword_score,
            pattern_score,
            context_score,
            total,
            recommendation,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Choose the engine for `query` under the requested mode
    #[inline]
    pub fn route(&self, query: &str, request: &RouteRequest) -> Result<RoutingDecision> {
        let score = self.analyze(query, request.context_chars);

        let (engine, reason) = match request.mode {
            RoutingMode::Local => (EngineKind::Local, "local mode requested".to_string()),
            RoutingMode::Remote => {
                if !request.remote_available {
                    return Err(RagError::RouterMisconfiguration(
                        "remote mode requested but no remote engine is configured".to_string(),
                    ));
                }
                (EngineKind::Remote, "remote mode requested".to_string())
            }
            RoutingMode::Auto => self.auto_route(&score, request),
        };

        debug!(
            engine = engine.as_str(),
            total = score.total,
            confidence = score.confidence,
            "Routed query: {}",
            reason
        );

        Ok(RoutingDecision {
            engine,
            score,
            reason,
        })
    }

    fn auto_route(&self, score: &QueryComplexityScore, request: &RouteRequest) -> (EngineKind, String) {
        if let Some(preferred) = request.preferred_engine {
            return match (preferred, request.remote_available) {
                (EngineKind::Remote, false) => (
                    EngineKind::Local,
                    "preferred remote engine unavailable".to_string(),
                ),
                (engine, _) => (engine, format!("preferred engine {}", engine)),
            };
        }

        match score.recommendation {
            EngineKind::Local => (
                EngineKind::Local,
                format!("complexity {:.1} within local threshold {:.1}", score.total, self.threshold),
            ),
            EngineKind::Remote if !request.remote_available => (
                EngineKind::Local,
                format!("complexity {:.1} favours remote but none is configured", score.total),
            ),
            EngineKind::Remote if score.confidence < self.auto_min_confidence => (
                EngineKind::Local,
                format!(
                    "complexity {:.1} barely above threshold (confidence {:.2})",
                    score.total, score.confidence
                ),
            ),
            EngineKind::Remote => (
                EngineKind::Remote,
                format!("complexity {:.1} above threshold {:.1}", score.total, self.threshold),
            ),
        }
    }
}

fn signal_hits(lowered: &str, words: &[&str]) -> usize {
    SIGNAL_WORDS
        .iter()
        .filter(|signal| {
            if signal.is_ascii() {
                words.iter().any(|word| word.starts_with(**signal))
            } else {
                // Korean signals carry attached particles and endings
                lowered.contains(**signal)
            }
        })
        .count()
}

fn pattern_points(query: &str, lowered: &str, words: &[&str]) -> f32 {
    let mut points = 0.0;

    if query.contains("```") {
        points += CODE_FENCE_POINTS;
    }
    if query.matches('?').count() >= 2 {
        points += MULTI_QUESTION_POINTS;
    }
    if NUMBERED_LIST.is_match(query).unwrap_or(false) {
        points += NUMBERED_LIST_POINTS;
    }

    let connectors: usize = CONNECTORS
        .iter()
        .map(|connector| {
            if connector.contains(' ') {
                lowered.matches(*connector).count()
            } else {
                words.iter().filter(|word| **word == *connector).count()
            }
        })
        .sum();

    (connectors as f32).mul_add(CONNECTOR_POINTS, points)
}
