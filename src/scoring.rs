//! Classification and scoring of patterns from raw mining statistics
//!
//! Two tiering schemes coexist in the domain. The threshold scheme
//! (lift/support/stability) is canonical and drives promotion decisions; the
//! accuracy-bucket scheme over directional win rate is auxiliary display
//! only. Their cutoffs are never merged.
//!
//! Scoring is a pure function of a pattern's own statistics plus shared
//! read-only baselines, so the per-pattern pass is parallelized with rayon;
//! everything that writes back into the graph stays sequential.

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::KbError;
use crate::model::{Direction, PatternRule, PatternType};

// ============================================================================
// Statistical inputs
// ============================================================================

/// Raw statistics for one pattern, supplied by the external mining step
///
/// Either attached inline or loaded from a companion performance-summary
/// document keyed by pattern ID. Missing fields are tolerated at parse time;
/// they surface as `no_signal` when the pattern is classified.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatternStats {
    pub support: u64,
    #[serde(default)]
    pub lift: Option<f64>,
    #[serde(default)]
    pub stability: Option<f64>,
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub baseline_win_rate: Option<f64>,
    #[serde(default)]
    pub avg_ret: Option<f64>,
    #[serde(default)]
    pub n_up: Option<u64>,
    #[serde(default)]
    pub n_down: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatsRecord {
    id: String,
    #[serde(flatten)]
    stats: PatternStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PerformanceDoc {
    #[serde(default)]
    meta: Option<serde_yaml::Value>,
    #[serde(default)]
    patterns: Vec<StatsRecord>,
}

/// Performance summary keyed by pattern ID, preserving declaration order
#[derive(Debug, Clone, Default)]
pub struct StatsIndex {
    map: IndexMap<String, PatternStats>,
}

impl StatsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a companion performance-summary YAML document
    pub fn load(path: &Path) -> Result<Self, KbError> {
        let raw = fs::read_to_string(path).map_err(|source| KbError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: PerformanceDoc = serde_yaml::from_str(&raw).map_err(|source| KbError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut index = Self::new();
        for record in doc.patterns {
            index.map.insert(record.id, record.stats);
        }
        debug!("loaded {} stat records from {:?}", index.map.len(), path);
        Ok(index)
    }

    pub fn get(&self, pattern_id: &str) -> Option<&PatternStats> {
        self.map.get(pattern_id)
    }

    pub fn insert(&mut self, pattern_id: impl Into<String>, stats: PatternStats) {
        self.map.insert(pattern_id.into(), stats);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ============================================================================
// Threshold tiering (canonical)
// ============================================================================

/// Tuning knobs for the threshold tiering scheme
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Strong cut on lift
    pub strong_lift: f64,
    /// Strong cut on support count
    pub strong_support: u64,
    /// Strong cut on stability
    pub strong_stability: f64,
    /// Medium band: fraction below each strong cut that still counts as
    /// "close to strong, needs deeper mining"
    pub proximity: f64,
    /// Below this support the pattern is tagged `too_rare` instead of scored
    pub min_support: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            strong_lift: 1.35,
            strong_support: 30,
            strong_stability: 0.25,
            proximity: 0.15,
            min_support: 10,
        }
    }
}

/// Classification outcome for one pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierOutcome {
    Strong,
    Medium,
    Weak,
    /// Support below the configured minimum; not scored
    TooRare,
    /// Required statistics missing; not scored
    NoSignal,
}

impl TierOutcome {
    pub fn is_strong(self) -> bool {
        self == TierOutcome::Strong
    }

    /// Tiers that get re-submitted to deeper mining in later waves
    ///
    /// Everything short of strong qualifies: medium and weak for condition
    /// refinement, too_rare and no_signal because only new evidence can
    /// move them.
    pub fn needs_remining(self) -> bool {
        !self.is_strong()
    }
}

impl fmt::Display for TierOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierOutcome::Strong => write!(f, "strong"),
            TierOutcome::Medium => write!(f, "medium"),
            TierOutcome::Weak => write!(f, "weak"),
            TierOutcome::TooRare => write!(f, "too_rare"),
            TierOutcome::NoSignal => write!(f, "no_signal"),
        }
    }
}

/// Classify one pattern's statistics under the threshold scheme
///
/// Strong requires every cut to hold; medium requires every relaxed cut
/// (within the proximity band) to hold; anything else is weak. Patterns
/// below `min_support` or missing lift/stability are tagged instead of
/// tiered, to avoid spurious strength on small or incomplete samples.
pub fn classify(stats: &PatternStats, cfg: &ScoringConfig) -> TierOutcome {
    if stats.support < cfg.min_support {
        return TierOutcome::TooRare;
    }
    let (Some(lift), Some(stability)) = (stats.lift, stats.stability) else {
        return TierOutcome::NoSignal;
    };

    let support = stats.support as f64;
    if lift >= cfg.strong_lift
        && stats.support >= cfg.strong_support
        && stability >= cfg.strong_stability
    {
        return TierOutcome::Strong;
    }

    let relax = 1.0 - cfg.proximity;
    if lift >= cfg.strong_lift * relax
        && support >= cfg.strong_support as f64 * relax
        && stability >= cfg.strong_stability * relax
    {
        return TierOutcome::Medium;
    }

    TierOutcome::Weak
}

// ============================================================================
// Accuracy buckets (auxiliary display)
// ============================================================================

/// Win-rate bucket over directional accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyBucket {
    VeryStrong,
    Strong,
    Medium,
    Weak,
    VeryWeak,
}

impl fmt::Display for AccuracyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccuracyBucket::VeryStrong => write!(f, "very_strong"),
            AccuracyBucket::Strong => write!(f, "strong"),
            AccuracyBucket::Medium => write!(f, "medium"),
            AccuracyBucket::Weak => write!(f, "weak"),
            AccuracyBucket::VeryWeak => write!(f, "very_weak"),
        }
    }
}

/// Bucket a directional win rate
pub fn accuracy_bucket(win_rate: f64) -> AccuracyBucket {
    if win_rate >= 0.80 {
        AccuracyBucket::VeryStrong
    } else if win_rate >= 0.60 {
        AccuracyBucket::Strong
    } else if win_rate >= 0.55 {
        AccuracyBucket::Medium
    } else if win_rate >= 0.52 {
        AccuracyBucket::Weak
    } else {
        AccuracyBucket::VeryWeak
    }
}

// ============================================================================
// Direction-aware win rate
// ============================================================================

/// Realized move of the target candle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Up,
    Down,
    Flat,
}

/// Directional win rate relative to the pattern's expected direction
///
/// A DOWN-expecting pattern scores a win only on a realized down move; flat
/// outcomes are excluded from the effective sample. Returns `None` when no
/// effective outcomes exist or the pattern is filter-only.
pub fn directional_win_rate(outcomes: &[Move], expected: Direction) -> Option<f64> {
    let n_up = outcomes.iter().filter(|m| **m == Move::Up).count();
    let n_down = outcomes.iter().filter(|m| **m == Move::Down).count();
    let n_eff = n_up + n_down;
    if n_eff == 0 {
        return None;
    }
    match expected {
        Direction::Long => Some(n_up as f64 / n_eff as f64),
        Direction::Short => Some(n_down as f64 / n_eff as f64),
        Direction::FilterOnly => None,
    }
}

// ============================================================================
// Family scoring
// ============================================================================

/// Ranking score for a pattern family
///
/// `0.5*max(lift-1,0) + 0.3*ln(support+1) + 0.2*max(stability,0)`, with a
/// 10% multiplicative bonus for families already tiered strong. This is a
/// triage heuristic, not a probability; it is deliberately not normalized.
pub fn family_score(lift: f64, support: f64, stability: f64, strong: bool) -> f64 {
    let base =
        0.5 * (lift - 1.0).max(0.0) + 0.3 * (support + 1.0).ln() + 0.2 * stability.max(0.0);
    if strong {
        base * 1.10
    } else {
        base
    }
}

/// Grouping key for related patterns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FamilyKey {
    pub timeframe: String,
    pub pattern_type: PatternType,
    pub window_length: u32,
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/w{}",
            self.timeframe, self.pattern_type, self.window_length
        )
    }
}

/// Aggregated strength and score for one family
#[derive(Debug, Clone, Serialize)]
pub struct FamilyScore {
    pub key: FamilyKey,
    pub members: usize,
    pub agg_support: u64,
    pub agg_lift: f64,
    pub agg_stability: f64,
    pub tier: TierOutcome,
    pub score: f64,
}

/// Group patterns into families and score each on aggregated statistics
///
/// Families aggregate support by sum and lift/stability by mean over members
/// with stats; members without stats are skipped. Output preserves the
/// encounter order of families, sorted by score descending for triage.
pub fn score_families(
    patterns: &[PatternRule],
    stats: &StatsIndex,
    cfg: &ScoringConfig,
) -> Vec<FamilyScore> {
    let mut groups: IndexMap<FamilyKey, Vec<&PatternStats>> = IndexMap::new();
    for pattern in patterns {
        let Some(pattern_stats) = stats.get(&pattern.id) else {
            continue;
        };
        let key = FamilyKey {
            timeframe: pattern.timeframe.clone(),
            pattern_type: pattern.pattern_type,
            window_length: pattern.window_length,
        };
        groups.entry(key).or_default().push(pattern_stats);
    }

    let mut scored: Vec<FamilyScore> = groups
        .into_iter()
        .map(|(key, members)| {
            let agg_support: u64 = members.iter().map(|s| s.support).sum();
            let lifts: Vec<f64> = members.iter().filter_map(|s| s.lift).collect();
            let stabilities: Vec<f64> = members.iter().filter_map(|s| s.stability).collect();
            let agg_lift = mean(&lifts);
            let agg_stability = mean(&stabilities);
            let agg_stats = PatternStats {
                support: agg_support,
                lift: Some(agg_lift),
                stability: Some(agg_stability),
                ..PatternStats::default()
            };
            let tier = classify(&agg_stats, cfg);
            let score = family_score(agg_lift, agg_support as f64, agg_stability, tier.is_strong());
            FamilyScore {
                members: members.len(),
                key,
                agg_support,
                agg_lift,
                agg_stability,
                tier,
                score,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// ============================================================================
// Per-pattern scoring pass
// ============================================================================

/// Scoring result for one pattern
#[derive(Debug, Clone, Serialize)]
pub struct PatternScore {
    pub id: String,
    pub tier: TierOutcome,
    pub accuracy: Option<AccuracyBucket>,
    pub score: Option<f64>,
}

/// Score every pattern against the stats index
///
/// Patterns missing from the index get `no_signal`. Independent patterns are
/// scored concurrently; results come back in input order.
pub fn score_patterns(
    patterns: &[PatternRule],
    stats: &StatsIndex,
    cfg: &ScoringConfig,
) -> Vec<PatternScore> {
    patterns
        .par_iter()
        .map(|pattern| match stats.get(&pattern.id) {
            Some(pattern_stats) => {
                let tier = classify(pattern_stats, cfg);
                let accuracy = pattern_stats.win_rate.map(accuracy_bucket);
                let score = match (pattern_stats.lift, pattern_stats.stability) {
                    (Some(lift), Some(stability)) => Some(family_score(
                        lift,
                        pattern_stats.support as f64,
                        stability,
                        tier.is_strong(),
                    )),
                    _ => None,
                };
                PatternScore {
                    id: pattern.id.clone(),
                    tier,
                    accuracy,
                    score,
                }
            }
            None => PatternScore {
                id: pattern.id.clone(),
                tier: TierOutcome::NoSignal,
                accuracy: None,
                score: None,
            },
        })
        .collect()
}

#[cfg(test)]
#[path = "scoring_tests.rs"]
mod tests;
