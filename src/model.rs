//! Typed entity model for every knowledge base section
//!
//! One YAML document (or a merged set of fragments) deserializes into
//! [`KnowledgeBase`]. Parsing is pure: structural problems (missing required
//! field, wrong type, value outside an enforced enum) fail here; referential
//! integrity is checked separately by the validator so a single load reports
//! every violation at once.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Enforced enums
// ============================================================================

/// Direction-of-discovery for a pattern rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Forward,
    Backward,
    Meta,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternType::Forward => write!(f, "forward"),
            PatternType::Backward => write!(f, "backward"),
            PatternType::Meta => write!(f, "meta"),
        }
    }
}

/// Lifecycle status of a pattern, trading rule, or cross-market pattern
///
/// Entities are never physically deleted; `deprecated` is the terminal
/// status, preserving auditability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Exploratory,
    Candidate,
    Active,
    Watchlist,
    Deprecated,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Exploratory => write!(f, "exploratory"),
            Status::Candidate => write!(f, "candidate"),
            Status::Active => write!(f, "active"),
            Status::Watchlist => write!(f, "watchlist"),
            Status::Deprecated => write!(f, "deprecated"),
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exploratory" => Ok(Status::Exploratory),
            "candidate" => Ok(Status::Candidate),
            "active" => Ok(Status::Active),
            "watchlist" => Ok(Status::Watchlist),
            "deprecated" => Ok(Status::Deprecated),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Trade direction a pattern or rule expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    FilterOnly,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
            Direction::FilterOnly => write!(f, "filter_only"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            "filter_only" => Ok(Direction::FilterOnly),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// Logical relationship between two rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Conflict,
    Confirm,
    Complement,
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationType::Conflict => write!(f, "conflict"),
            RelationType::Confirm => write!(f, "confirm"),
            RelationType::Complement => write!(f, "complement"),
        }
    }
}

// ============================================================================
// Shared primitives
// ============================================================================

/// Inclusive start/end window
///
/// Dates are kept as the raw ISO-8601 strings the document declared (date or
/// datetime), so round-tripping is lossless; [`parse_kb_date`] gives the
/// validator a comparable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

/// Parse a KB date field: bare date, naive datetime, or RFC 3339
pub fn parse_kb_date(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d.and_time(NaiveTime::MIN));
    }
    None
}

/// Feature/operator/value condition on an engineered candle feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub feature: String,
    pub operator: String,
    pub value: serde_yaml::Value,
}

/// Condition tied to a specific market (cross-market patterns)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossMarketCondition {
    pub market: String,
    pub feature: String,
    pub operator: String,
    pub value: serde_yaml::Value,
}

// ============================================================================
// Meta block
// ============================================================================

/// One entry in `meta.version_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionRecord {
    pub kb_version: String,
    pub schema_version: String,
    pub changed_at: String,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Metadata block of a KB document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KbMeta {
    pub kb_version: String,
    pub schema_version: String,
    pub symbol: String,
    pub market: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub version_history: Vec<VersionRecord>,
}

// ============================================================================
// Sections
// ============================================================================

/// A versioned slice of engineered market data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dataset {
    pub id: String,
    pub symbol: String,
    pub market: String,
    pub timeframe: String,
    pub source: Vec<String>,
    pub date_range: DateRange,
    pub n_candles: u64,
    pub file_path: String,
}

/// A named derived signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureDefinition {
    pub name: String,
    pub description: String,
    pub dtype: String,
    pub origin_level: String,
    pub formula: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A grouping of feature space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterDefinition {
    pub id: String,
    pub name: String,
    pub method: String,
    pub timeframe: String,
    #[serde(default)]
    pub feature_set: Vec<String>,
    pub n_clusters: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub centroid_features: IndexMap<String, f64>,
}

/// Optional metadata attached to a discovered pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternMetadata {
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sample_count: Option<u64>,
    #[serde(default)]
    pub discovered_by: Option<String>,
    #[serde(default)]
    pub discovery_date: Option<String>,
    #[serde(default)]
    pub regime: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// A discovered candle-behavior rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub window_length: u32,
    pub timeframe: String,
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub target: String,
    #[serde(default)]
    pub dataset_used: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sample_size: Option<u64>,
    #[serde(default)]
    pub regime: Option<String>,
    #[serde(default)]
    pub metadata: Option<PatternMetadata>,
}

impl PatternRule {
    /// Best-available confidence (direct field wins over metadata)
    pub fn effective_confidence(&self) -> Option<f64> {
        self.confidence
            .or_else(|| self.metadata.as_ref().and_then(|m| m.confidence))
    }

    /// Regime from the pattern itself or its metadata
    pub fn effective_regime(&self) -> Option<&str> {
        self.regime
            .as_deref()
            .or_else(|| self.metadata.as_ref().and_then(|m| m.regime.as_deref()))
    }

    /// Combined tags from the pattern and its metadata, lowercased
    pub fn effective_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.tags.iter().map(|t| t.to_ascii_lowercase()).collect();
        if let Some(meta) = &self.metadata {
            tags.extend(meta.tags.iter().map(|t| t.to_ascii_lowercase()));
        }
        tags.sort();
        tags.dedup();
        tags
    }
}

/// Entry configuration for a trading rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradingRuleEntry {
    #[serde(default)]
    pub pattern_refs: Vec<String>,
    #[serde(default)]
    pub extra_conditions: Vec<Condition>,
}

/// Take-profit / stop-loss configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TpSl {
    pub tp_multiple: f64,
    pub sl_multiple: f64,
    #[serde(default)]
    pub tstop_n_bars: Option<u32>,
}

/// Exit configuration for a trading rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradingRuleExit {
    #[serde(default)]
    pub tp_sl: Option<TpSl>,
}

/// Risk controls for a trading rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradingRuleRisk {
    #[serde(default)]
    pub max_leverage: Option<u32>,
    #[serde(default)]
    pub position_size_factor: Option<f64>,
}

/// A rule combining patterns into an actionable signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradingRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub symbol: String,
    pub direction: Direction,
    pub entry: TradingRuleEntry,
    #[serde(default)]
    pub exit: Option<TradingRuleExit>,
    #[serde(default)]
    pub risk: Option<TradingRuleRisk>,
    #[serde(default)]
    pub dataset_used: Option<String>,
    pub status: Status,
}

/// Evidence supporting a relation between two rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationEvidence {
    #[serde(default)]
    pub backtests: Vec<String>,
    #[serde(default)]
    pub logical_reasoning: Option<String>,
}

/// Logical relationship between two rules or patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleRelation {
    pub id: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub rule_a: String,
    pub rule_b: String,
    #[serde(default)]
    pub evidence: Option<RelationEvidence>,
}

/// Pattern spanning multiple markets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossMarketPattern {
    pub id: String,
    pub markets: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Vec<CrossMarketCondition>,
    pub target_market: String,
    pub target_prediction: String,
    pub status: Status,
}

/// Lead/lag statistics for a market pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeadLag {
    #[serde(default)]
    pub best_lag: Option<i32>,
    #[serde(default)]
    pub corr: Option<f64>,
    #[serde(default)]
    pub p_value: Option<f64>,
}

/// Indicator metrics describing a market pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationIndicators {
    #[serde(default)]
    pub rolling_corr_mean: Option<f64>,
    #[serde(default)]
    pub rolling_corr_std: Option<f64>,
    #[serde(default)]
    pub granger_p_value: Option<f64>,
}

/// Lead-lag/correlation between two markets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarketRelation {
    pub id: String,
    pub base_market: String,
    pub other_market: String,
    pub timeframe: String,
    #[serde(default)]
    pub lead_lag: Option<LeadLag>,
    #[serde(default)]
    pub indicators: Option<RelationIndicators>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Evaluation metrics for a backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacktestMetrics {
    #[serde(default)]
    pub trades: Option<u64>,
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub avg_r_multiple: Option<f64>,
    #[serde(default)]
    pub max_drawdown: Option<f64>,
    #[serde(default)]
    pub sharpe_like: Option<f64>,
    #[serde(default)]
    pub expected_value: Option<f64>,
}

/// A backtest run's metrics for a trading rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacktestRef {
    pub id: String,
    pub rule_id: String,
    pub date_range: DateRange,
    #[serde(default)]
    pub metrics: Option<BacktestMetrics>,
    #[serde(default)]
    pub equity_curve_path: Option<String>,
    #[serde(default)]
    pub parameters_used: IndexMap<String, serde_yaml::Value>,
}

/// Performance statistics over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerformanceStats {
    #[serde(default)]
    pub trades: Option<u64>,
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub avg_r: Option<f64>,
    #[serde(default)]
    pub ev: Option<f64>,
    #[serde(default)]
    pub sample_weight: Option<f64>,
}

/// Rolling performance snapshot for a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerformanceOverTime {
    pub pattern_id: String,
    pub window_id: String,
    pub window_range: DateRange,
    pub stats: PerformanceStats,
}

/// One immutable row of the lifecycle audit ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusHistory {
    pub pattern_id: String,
    pub date: String,
    pub old_status: Status,
    pub new_status: Status,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub backtest_refs: Vec<String>,
}

// ============================================================================
// Root document
// ============================================================================

/// Root object of a KB document or merged fragment set
///
/// The graph is the single owner of all entities. Datasets and feature
/// definitions are shared by reference (ID lookup) from patterns and
/// clusters; no entity owns another across sections, which keeps the graph
/// serializable and cycle-free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeBase {
    pub meta: KbMeta,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
    #[serde(default)]
    pub features: Vec<FeatureDefinition>,
    #[serde(default)]
    pub clusters: Vec<ClusterDefinition>,
    #[serde(default)]
    pub patterns: Vec<PatternRule>,
    #[serde(default)]
    pub trading_rules: Vec<TradingRule>,
    #[serde(default)]
    pub rule_relations: Vec<RuleRelation>,
    #[serde(default)]
    pub cross_market_patterns: Vec<CrossMarketPattern>,
    #[serde(default)]
    pub market_relations: Vec<MarketRelation>,
    #[serde(default)]
    pub backtests: Vec<BacktestRef>,
    #[serde(default)]
    pub performance_over_time: Vec<PerformanceOverTime>,
    #[serde(default)]
    pub status_history: Vec<StatusHistory>,
}

impl KnowledgeBase {
    /// Look up a pattern by ID
    pub fn pattern(&self, id: &str) -> Option<&PatternRule> {
        self.patterns.iter().find(|p| p.id == id)
    }

    /// Look up a dataset by ID
    pub fn dataset(&self, id: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.id == id)
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
