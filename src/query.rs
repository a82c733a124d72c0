//! Pure, side-effect-free read views over a validated KB graph
//!
//! No query mutates the graph; all return fresh sequences. Market resolution
//! goes through `dataset_used` when the pattern declares it, falling back to
//! the KB meta market/symbol for patterns without a dataset reference.

use std::collections::HashMap;

use crate::model::{Direction, KnowledgeBase, PatternRule, Status};

/// Conjunctive pattern filter
///
/// Every populated field must match. The direction filter is fail-closed: a
/// pattern without a declared direction is excluded whenever a direction
/// filter is supplied, so ambiguous patterns can never leak into
/// direction-sensitive downstream logic.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    pub min_confidence: Option<f64>,
    pub tags: Vec<String>,
    pub regime: Option<String>,
    pub direction: Option<Direction>,
    pub window_size: Option<u32>,
    pub status: Option<Status>,
}

impl PatternFilter {
    fn matches(&self, pattern: &PatternRule) -> bool {
        if let Some(min_conf) = self.min_confidence {
            match pattern.effective_confidence() {
                Some(conf) if conf >= min_conf => {}
                _ => return false,
            }
        }

        if let Some(status) = self.status {
            if pattern.status != status {
                return false;
            }
        }

        if let Some(direction) = self.direction {
            match pattern.direction {
                Some(d) if d == direction => {}
                // Fail-closed: missing direction never matches a direction filter.
                _ => return false,
            }
        }

        if let Some(window) = self.window_size {
            if pattern.window_length != window {
                return false;
            }
        }

        if let Some(regime) = &self.regime {
            match pattern.effective_regime() {
                Some(r) if r.eq_ignore_ascii_case(regime) => {}
                _ => return false,
            }
        }

        if !self.tags.is_empty() {
            let pattern_tags = pattern.effective_tags();
            let all_present = self
                .tags
                .iter()
                .all(|t| pattern_tags.contains(&t.to_ascii_lowercase()));
            if !all_present {
                return false;
            }
        }

        true
    }
}

/// Patterns whose dataset-derived market and own timeframe match exactly
/// (case-insensitive), in declaration order
pub fn patterns_by_market_timeframe<'a>(
    kb: &'a KnowledgeBase,
    market: &str,
    timeframe: &str,
) -> Vec<&'a PatternRule> {
    let dataset_markets: HashMap<&str, &str> = kb
        .datasets
        .iter()
        .map(|d| (d.id.as_str(), d.market.as_str()))
        .collect();

    kb.patterns
        .iter()
        .filter(|p| p.timeframe.eq_ignore_ascii_case(timeframe))
        .filter(|p| {
            let dataset_market = p
                .dataset_used
                .as_deref()
                .and_then(|id| dataset_markets.get(id).copied());
            match dataset_market {
                Some(m) => m.eq_ignore_ascii_case(market),
                None => {
                    kb.meta.market.eq_ignore_ascii_case(market)
                        || kb.meta.symbol.eq_ignore_ascii_case(market)
                }
            }
        })
        .collect()
}

/// Apply a conjunctive filter over the KB's patterns, in declaration order
pub fn filter_patterns<'a>(kb: &'a KnowledgeBase, filter: &PatternFilter) -> Vec<&'a PatternRule> {
    filter_pattern_slice(kb.patterns.iter(), filter)
}

/// Apply a conjunctive filter over an arbitrary pattern sequence
pub fn filter_pattern_slice<'a>(
    patterns: impl IntoIterator<Item = &'a PatternRule>,
    filter: &PatternFilter,
) -> Vec<&'a PatternRule> {
    patterns
        .into_iter()
        .filter(|p| filter.matches(p))
        .collect()
}

/// Distinct markets derived from Dataset entities, sorted
pub fn list_markets(kb: &KnowledgeBase) -> Vec<String> {
    let mut markets: Vec<String> = kb.datasets.iter().map(|d| d.market.clone()).collect();
    markets.sort();
    markets.dedup();
    markets
}

/// Distinct timeframes for a market's datasets, sorted
pub fn list_timeframes(kb: &KnowledgeBase, market: &str) -> Vec<String> {
    let mut timeframes: Vec<String> = kb
        .datasets
        .iter()
        .filter(|d| d.market.eq_ignore_ascii_case(market))
        .map(|d| d.timeframe.clone())
        .collect();
    timeframes.sort();
    timeframes.dedup();
    timeframes
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
