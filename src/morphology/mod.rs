// Morphology module
// Rule-based Korean tokenizer: particle and ending stripping, domain tagging,
// keyword and entity extraction

mod lexicon;


use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use fancy_regex::Regex;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use lexicon::{DOMAIN_VOCABULARY, ENDINGS, INTENT_KEYWORDS, PARTICLES, SYNONYM_GROUPS};

/// Minimum number of characters a stem must keep after suffix stripping
const MIN_STEM_CHARS: usize = 2;

static IP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("valid regex"));

static HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z][A-Za-z0-9]*-[A-Za-z]+-\d+\b").expect("valid regex")
});

static PORT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<=[A-Za-z0-9]):(\d{2,5})\b").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartOfSpeech {
    Noun,
    Verb,
    Particle,
    Ending,
    Number,
    Abbreviation,
    Foreign,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticFeature {
    Server,
    Performance,
    Resource,
    Status,
    Action,
    Database,
    General,
}

impl SemanticFeature {
    /// Categories whose stems are reported as entities
    #[inline]
    pub fn is_high_value(self) -> bool {
        matches!(self, Self::Server | Self::Resource | Self::Database)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Morpheme {
    pub surface: String,
    pub pos: PartOfSpeech,
    pub semantic: SemanticFeature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    IpAddress,
    Hostname,
    Port,
    Domain(SemanticFeature),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub kind: EntityKind,
}

/// Result of [`MorphologyAnalyzer::analyze`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphologyAnalysis {
    /// Stems, particles and endings in surface order
    pub morphemes: Vec<Morpheme>,
    /// One stem per whitespace token
    pub stems: Vec<String>,
    pub keywords: Vec<String>,
    pub entities: Vec<Entity>,
    pub confidence: f32,
}

impl MorphologyAnalysis {
    /// Stem morphemes only, skipping particles and endings
    #[inline]
    pub fn stem_morphemes(&self) -> impl Iterator<Item = &Morpheme> {
        self.morphemes
            .iter()
            .filter(|m| !matches!(m.pos, PartOfSpeech::Particle | PartOfSpeech::Ending))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentCategory {
    Performance,
    Troubleshooting,
    Monitoring,
    Security,
    Analysis,
    General,
}

impl IntentCategory {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Troubleshooting => "troubleshooting",
            Self::Monitoring => "monitoring",
            Self::Security => "security",
            Self::Analysis => "analysis",
            Self::General => "general",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub category: IntentCategory,
    pub confidence: f32,
    /// Stems that matched the winning category
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MorphologyAnalyzer {
    extra_terms: HashMap<String, SemanticFeature>,
}

impl MorphologyAnalyzer {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an additional domain term (matched case-insensitively)
    #[inline]
    pub fn with_term(mut self, term: &str, semantic: SemanticFeature) -> Self {
        self.extra_terms.insert(term.to_lowercase(), semantic);
        self
    }

    #[inline]
    pub fn analyze(&self, text: &str) -> MorphologyAnalysis {
        let normalized = normalize(text);

        let mut morphemes = Vec::new();
        let mut stems = Vec::new();

        for raw in normalized.split_whitespace() {
            let token = raw.trim_matches(|c: char| "?!,.()'\":".contains(c));
            if token.is_empty() {
                continue;
            }

            let stem = if token.chars().any(is_hangul) {
                self.split_hangul_token(token, &mut morphemes)
            } else {
                let morpheme = self.classify_foreign_token(token);
                let stem = morpheme.surface.clone();
                morphemes.push(morpheme);
                stem
            };
            stems.push(stem);
        }

        let keywords = morphemes
            .iter()
            .filter(|m| {
                matches!(
                    m.pos,
                    PartOfSpeech::Noun
                        | PartOfSpeech::Verb
                        | PartOfSpeech::Foreign
                        | PartOfSpeech::Abbreviation
                ) && m.semantic != SemanticFeature::General
            })
            .map(|m| m.surface.clone())
            .unique()
            .collect();

        let entities = extract_entities(&normalized, &morphemes);
        let confidence = confidence(&morphemes, stems.len());

        MorphologyAnalysis {
            morphemes,
            stems,
            keywords,
            entities,
            confidence,
        }
    }

    /// Jaccard similarity of the lower-cased stem sets of `a` and `b`, plus a
    /// synonym bonus weighted at 0.3, capped at 1.0.
    #[inline]
    pub fn stem_similarity(&self, a: &str, b: &str) -> f32 {
        let left = self.lowercase_stems(a);
        let right = self.lowercase_stems(b);

        let union = left.union(&right).count();
        if union == 0 {
            return 0.0;
        }
        let jaccard = left.intersection(&right).count() as f32 / union as f32;

        let mut touched = 0_usize;
        let mut shared = 0_usize;
        for group in SYNONYM_GROUPS {
            let in_left = group.iter().any(|term| left.contains(*term));
            let in_right = group.iter().any(|term| right.contains(*term));
            if in_left || in_right {
                touched += 1;
            }
            if in_left && in_right {
                shared += 1;
            }
        }
        let bonus = if touched == 0 {
            0.0
        } else {
            shared as f32 / touched as f32
        };

        bonus.mul_add(0.3, jaccard).min(1.0)
    }

    /// Score the fixed intent categories by stem overlap
    #[inline]
    pub fn analyze_intent(&self, text: &str) -> IntentAnalysis {
        let stems = self.lowercase_stems(text);

        let mut best: Option<(IntentCategory, Vec<String>)> = None;
        for (category, keywords) in INTENT_KEYWORDS {
            let evidence: Vec<String> = keywords
                .iter()
                .filter(|keyword| stems.contains(**keyword))
                .map(|keyword| (*keyword).to_string())
                .collect();

            let better = best
                .as_ref()
                .is_none_or(|(_, current)| evidence.len() > current.len());
            if !evidence.is_empty() && better {
                best = Some((*category, evidence));
            }
        }

        match best {
            Some((category, evidence)) => IntentAnalysis {
                category,
                confidence: (evidence.len() as f32).mul_add(0.2, 0.3).min(0.9),
                evidence,
            },
            None => IntentAnalysis {
                category: IntentCategory::General,
                confidence: 0.3,
                evidence: Vec::new(),
            },
        }
    }

    fn lowercase_stems(&self, text: &str) -> HashSet<String> {
        self.analyze(text)
            .stems
            .into_iter()
            .map(|stem| stem.to_lowercase())
            .collect()
    }

    fn lookup(&self, term: &str) -> Option<(SemanticFeature, PartOfSpeech)> {
        let lowered = term.to_lowercase();
        if let Some(semantic) = self.extra_terms.get(&lowered) {
            return Some((*semantic, PartOfSpeech::Noun));
        }
        DOMAIN_VOCABULARY.get(lowered.as_str()).copied()
    }

    /// Push the stem, ending and particle morphemes of `token`; returns the stem
    fn split_hangul_token(&self, token: &str, out: &mut Vec<Morpheme>) -> String {
        if let Some((semantic, pos)) = self.lookup(token) {
            out.push(Morpheme {
                surface: token.to_string(),
                pos,
                semantic,
            });
            return token.to_string();
        }

        let (rest, particle) = strip_longest_suffix(token, PARTICLES);
        let (stem, ending) = if self.lookup(rest).is_some() {
            (rest, None)
        } else {
            strip_longest_suffix(rest, ENDINGS)
        };

        let (semantic, pos) = match self.lookup(stem) {
            Some(tag) => tag,
            None if ending.is_some() => (SemanticFeature::General, PartOfSpeech::Verb),
            None if stem.chars().count() >= MIN_STEM_CHARS => {
                (SemanticFeature::General, PartOfSpeech::Noun)
            }
            None => (SemanticFeature::General, PartOfSpeech::Unknown),
        };

        out.push(Morpheme {
            surface: stem.to_string(),
            pos,
            semantic,
        });
        if let Some(ending) = ending {
            out.push(Morpheme {
                surface: ending.to_string(),
                pos: PartOfSpeech::Ending,
                semantic: SemanticFeature::General,
            });
        }
        if let Some(particle) = particle {
            out.push(Morpheme {
                surface: particle.to_string(),
                pos: PartOfSpeech::Particle,
                semantic: SemanticFeature::General,
            });
        }

        stem.to_string()
    }

    fn classify_foreign_token(&self, token: &str) -> Morpheme {
        let pos = if is_numeric(token) {
            PartOfSpeech::Number
        } else if is_abbreviation(token) {
            PartOfSpeech::Abbreviation
        } else {
            PartOfSpeech::Foreign
        };

        let semantic = self
            .lookup(token)
            .map_or(SemanticFeature::General, |(semantic, _)| semantic);

        Morpheme {
            surface: token.to_string(),
            pos,
            semantic,
        }
    }
}

#[inline]
fn is_hangul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

fn is_allowed(c: char) -> bool {
    is_hangul(c) || c.is_ascii_alphanumeric() || c.is_whitespace() || ".,:-_/%?!()'\"".contains(c)
}

/// Replace characters outside the allowed set with spaces and collapse whitespace
#[inline]
pub fn normalize(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| if is_allowed(c) { c } else { ' ' })
        .collect();
    replaced.split_whitespace().join(" ")
}

fn strip_longest_suffix<'a>(
    token: &'a str,
    suffixes: &[&'static str],
) -> (&'a str, Option<&'static str>) {
    let best = suffixes
        .iter()
        .filter_map(|suffix| {
            token
                .strip_suffix(*suffix)
                .filter(|stem| stem.chars().count() >= MIN_STEM_CHARS)
                .map(|stem| (stem, *suffix))
        })
        .max_by_key(|(_, suffix)| suffix.chars().count());

    match best {
        Some((stem, suffix)) => (stem, Some(suffix)),
        None => (token, None),
    }
}

fn is_numeric(token: &str) -> bool {
    let digits = token.trim_end_matches('%');
    !digits.is_empty()
        && digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn is_abbreviation(token: &str) -> bool {
    let len = token.chars().count();
    (2..=6).contains(&len)
        && token.chars().any(|c| c.is_ascii_uppercase())
        && token
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

fn extract_entities(normalized: &str, morphemes: &[Morpheme]) -> Vec<Entity> {
    let mut entities = Vec::new();

    for found in IP_PATTERN.find_iter(normalized).flatten() {
        if found.as_str().parse::<Ipv4Addr>().is_ok() {
            entities.push(Entity {
                text: found.as_str().to_string(),
                kind: EntityKind::IpAddress,
            });
        }
    }

    for found in HOST_PATTERN.find_iter(normalized).flatten() {
        entities.push(Entity {
            text: found.as_str().to_string(),
            kind: EntityKind::Hostname,
        });
    }

    for captures in PORT_PATTERN.captures_iter(normalized).flatten() {
        let Some(port) = captures.get(1) else {
            continue;
        };
        if port.as_str().parse::<u16>().is_ok() {
            entities.push(Entity {
                text: port.as_str().to_string(),
                kind: EntityKind::Port,
            });
        }
    }

    for morpheme in morphemes {
        if morpheme.semantic.is_high_value() {
            entities.push(Entity {
                text: morpheme.surface.clone(),
                kind: EntityKind::Domain(morpheme.semantic),
            });
        }
    }

    entities.into_iter().unique().collect()
}

fn confidence(morphemes: &[Morpheme], token_count: usize) -> f32 {
    if token_count == 0 {
        return 0.1;
    }

    let tagged = morphemes
        .iter()
        .filter(|m| !matches!(m.pos, PartOfSpeech::Particle | PartOfSpeech::Ending))
        .filter(|m| m.semantic != SemanticFeature::General)
        .count();
    let distinct_pos = morphemes.iter().map(|m| m.pos).unique().count();

    let coverage = tagged as f32 / token_count as f32;
    let variety = (distinct_pos as f32 * 0.05).min(0.2);

    coverage.mul_add(0.3, 0.5 + variety).clamp(0.1, 0.95)
}
