//! Referential integrity validation over the merged KB graph
//!
//! The KB files carry no enforced foreign keys, so integrity checking is
//! deferred to load time and must be exhaustive: one pass builds a lookup
//! table per section, a second pass resolves every cross-reference. All
//! violations are collected in encounter order before the load is aborted,
//! so operators can fix a whole batch of problems in one edit-revalidate
//! cycle.

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::error::KbError;
use crate::model::{parse_kb_date, KnowledgeBase};

/// KB section names, used in violation reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Datasets,
    Features,
    Clusters,
    Patterns,
    TradingRules,
    RuleRelations,
    CrossMarketPatterns,
    MarketRelations,
    Backtests,
    PerformanceOverTime,
    StatusHistory,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Datasets => "datasets",
            Section::Features => "features",
            Section::Clusters => "clusters",
            Section::Patterns => "patterns",
            Section::TradingRules => "trading_rules",
            Section::RuleRelations => "rule_relations",
            Section::CrossMarketPatterns => "cross_market_patterns",
            Section::MarketRelations => "market_relations",
            Section::Backtests => "backtests",
            Section::PerformanceOverTime => "performance_over_time",
            Section::StatusHistory => "status_history",
        };
        write!(f, "{name}")
    }
}

/// One integrity violation found during validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("duplicate id '{id}' in section {section}")]
    DuplicateId { section: Section, id: String },

    #[error("{section} '{id}' references unknown {target_section} '{target}'")]
    DanglingReference {
        section: Section,
        id: String,
        target_section: Section,
        target: String,
    },

    #[error("rule_relation '{id}' relates '{rule}' to itself")]
    SelfRelation { id: String, rule: String },

    #[error("cross_market_pattern '{id}': target_market '{market}' is not in its markets list")]
    TargetMarketNotListed { id: String, market: String },

    #[error("market_relation '{id}': base_market and other_market are both '{market}'")]
    SelfMarketRelation { id: String, market: String },

    #[error("{section} '{id}': date_range start '{start}' is not before end '{end}'")]
    EmptyDateRange {
        section: Section,
        id: String,
        start: String,
        end: String,
    },

    #[error("{section} '{id}': unparseable date '{date}'")]
    BadDate {
        section: Section,
        id: String,
        date: String,
    },

    #[error("dataset '{id}': n_candles must be positive")]
    NoCandles { id: String },

    #[error("status_history for '{pattern_id}': date '{date}' precedes previous entry '{prev}'")]
    NonMonotonicHistory {
        pattern_id: String,
        date: String,
        prev: String,
    },
}

/// Collect every integrity violation in the graph, in encounter order
pub fn collect_violations(kb: &KnowledgeBase) -> Vec<Violation> {
    let mut out = Vec::new();

    check_unique(
        kb.datasets.iter().map(|d| d.id.as_str()),
        Section::Datasets,
        &mut out,
    );
    check_unique(
        kb.features.iter().map(|f| f.name.as_str()),
        Section::Features,
        &mut out,
    );
    check_unique(
        kb.clusters.iter().map(|c| c.id.as_str()),
        Section::Clusters,
        &mut out,
    );
    check_unique(
        kb.patterns.iter().map(|p| p.id.as_str()),
        Section::Patterns,
        &mut out,
    );
    check_unique(
        kb.trading_rules.iter().map(|r| r.id.as_str()),
        Section::TradingRules,
        &mut out,
    );
    check_unique(
        kb.rule_relations.iter().map(|r| r.id.as_str()),
        Section::RuleRelations,
        &mut out,
    );
    check_unique(
        kb.cross_market_patterns.iter().map(|p| p.id.as_str()),
        Section::CrossMarketPatterns,
        &mut out,
    );
    check_unique(
        kb.market_relations.iter().map(|r| r.id.as_str()),
        Section::MarketRelations,
        &mut out,
    );
    check_unique(
        kb.backtests.iter().map(|b| b.id.as_str()),
        Section::Backtests,
        &mut out,
    );

    // Lookup tables, built once per load (O(n))
    let dataset_ids: HashSet<&str> = kb.datasets.iter().map(|d| d.id.as_str()).collect();
    let feature_names: HashSet<&str> = kb.features.iter().map(|f| f.name.as_str()).collect();
    let pattern_ids: HashSet<&str> = kb.patterns.iter().map(|p| p.id.as_str()).collect();
    let rule_ids: HashSet<&str> = kb.trading_rules.iter().map(|r| r.id.as_str()).collect();

    for dataset in &kb.datasets {
        if dataset.n_candles == 0 {
            out.push(Violation::NoCandles {
                id: dataset.id.clone(),
            });
        }
        check_date_range(
            Section::Datasets,
            &dataset.id,
            &dataset.date_range.start,
            &dataset.date_range.end,
            &mut out,
        );
    }

    for cluster in &kb.clusters {
        for feature in &cluster.feature_set {
            if !feature_names.contains(feature.as_str()) {
                out.push(Violation::DanglingReference {
                    section: Section::Clusters,
                    id: cluster.id.clone(),
                    target_section: Section::Features,
                    target: feature.clone(),
                });
            }
        }
    }

    for pattern in &kb.patterns {
        if let Some(ds) = &pattern.dataset_used {
            if !dataset_ids.contains(ds.as_str()) {
                out.push(Violation::DanglingReference {
                    section: Section::Patterns,
                    id: pattern.id.clone(),
                    target_section: Section::Datasets,
                    target: ds.clone(),
                });
            }
        }
        for condition in &pattern.conditions {
            if !feature_names.contains(condition.feature.as_str()) {
                out.push(Violation::DanglingReference {
                    section: Section::Patterns,
                    id: pattern.id.clone(),
                    target_section: Section::Features,
                    target: condition.feature.clone(),
                });
            }
        }
    }

    for rule in &kb.trading_rules {
        for pattern_ref in &rule.entry.pattern_refs {
            if !pattern_ids.contains(pattern_ref.as_str()) {
                out.push(Violation::DanglingReference {
                    section: Section::TradingRules,
                    id: rule.id.clone(),
                    target_section: Section::Patterns,
                    target: pattern_ref.clone(),
                });
            }
        }
        if let Some(ds) = &rule.dataset_used {
            if !dataset_ids.contains(ds.as_str()) {
                out.push(Violation::DanglingReference {
                    section: Section::TradingRules,
                    id: rule.id.clone(),
                    target_section: Section::Datasets,
                    target: ds.clone(),
                });
            }
        }
    }

    for relation in &kb.rule_relations {
        if relation.rule_a == relation.rule_b {
            out.push(Violation::SelfRelation {
                id: relation.id.clone(),
                rule: relation.rule_a.clone(),
            });
        }
        // A relation endpoint may be either a trading rule or a pattern.
        for endpoint in [&relation.rule_a, &relation.rule_b] {
            if !rule_ids.contains(endpoint.as_str()) && !pattern_ids.contains(endpoint.as_str()) {
                out.push(Violation::DanglingReference {
                    section: Section::RuleRelations,
                    id: relation.id.clone(),
                    target_section: Section::TradingRules,
                    target: endpoint.clone(),
                });
            }
        }
    }

    for cross in &kb.cross_market_patterns {
        if !cross.markets.contains(&cross.target_market) {
            out.push(Violation::TargetMarketNotListed {
                id: cross.id.clone(),
                market: cross.target_market.clone(),
            });
        }
    }

    for relation in &kb.market_relations {
        if relation.base_market == relation.other_market {
            out.push(Violation::SelfMarketRelation {
                id: relation.id.clone(),
                market: relation.base_market.clone(),
            });
        }
    }

    for backtest in &kb.backtests {
        if !rule_ids.contains(backtest.rule_id.as_str()) {
            out.push(Violation::DanglingReference {
                section: Section::Backtests,
                id: backtest.id.clone(),
                target_section: Section::TradingRules,
                target: backtest.rule_id.clone(),
            });
        }
        check_date_range(
            Section::Backtests,
            &backtest.id,
            &backtest.date_range.start,
            &backtest.date_range.end,
            &mut out,
        );
    }

    for perf in &kb.performance_over_time {
        if !pattern_ids.contains(perf.pattern_id.as_str()) {
            out.push(Violation::DanglingReference {
                section: Section::PerformanceOverTime,
                id: perf.window_id.clone(),
                target_section: Section::Patterns,
                target: perf.pattern_id.clone(),
            });
        }
    }

    check_status_history(kb, &pattern_ids, &mut out);

    out
}

/// Validate the graph, failing with the full violation list
pub fn validate(kb: &KnowledgeBase) -> Result<(), KbError> {
    let violations = collect_violations(kb);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(KbError::Integrity { violations })
    }
}

fn check_unique<'a>(
    ids: impl Iterator<Item = &'a str>,
    section: Section,
    out: &mut Vec<Violation>,
) {
    let mut seen: HashSet<&str> = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            out.push(Violation::DuplicateId {
                section,
                id: id.to_string(),
            });
        }
    }
}

fn check_date_range(
    section: Section,
    id: &str,
    start: &str,
    end: &str,
    out: &mut Vec<Violation>,
) {
    let parsed_start = parse_kb_date(start);
    let parsed_end = parse_kb_date(end);
    if parsed_start.is_none() {
        out.push(Violation::BadDate {
            section,
            id: id.to_string(),
            date: start.to_string(),
        });
    }
    if parsed_end.is_none() {
        out.push(Violation::BadDate {
            section,
            id: id.to_string(),
            date: end.to_string(),
        });
    }
    if let (Some(s), Some(e)) = (parsed_start, parsed_end) {
        if s >= e {
            out.push(Violation::EmptyDateRange {
                section,
                id: id.to_string(),
                start: start.to_string(),
                end: end.to_string(),
            });
        }
    }
}

fn check_status_history(
    kb: &KnowledgeBase,
    pattern_ids: &HashSet<&str>,
    out: &mut Vec<Violation>,
) {
    // Dates must be non-decreasing per pattern, in declaration order.
    let mut last_seen: Vec<(&str, &str)> = Vec::new();
    for row in &kb.status_history {
        if !pattern_ids.contains(row.pattern_id.as_str()) {
            out.push(Violation::DanglingReference {
                section: Section::StatusHistory,
                id: row.pattern_id.clone(),
                target_section: Section::Patterns,
                target: row.pattern_id.clone(),
            });
        }
        let Some(date) = parse_kb_date(&row.date) else {
            out.push(Violation::BadDate {
                section: Section::StatusHistory,
                id: row.pattern_id.clone(),
                date: row.date.clone(),
            });
            continue;
        };
        match last_seen.iter_mut().find(|(id, _)| *id == row.pattern_id) {
            Some(entry) => {
                let prev = parse_kb_date(entry.1);
                if let Some(prev_date) = prev {
                    if date < prev_date {
                        out.push(Violation::NonMonotonicHistory {
                            pattern_id: row.pattern_id.clone(),
                            date: row.date.clone(),
                            prev: entry.1.to_string(),
                        });
                    }
                }
                entry.1 = &row.date;
            }
            None => last_seen.push((&row.pattern_id, &row.date)),
        }
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
