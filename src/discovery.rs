//! Multi-wave discovery loop: promote, hold, or retire patterns
//!
//! The lifecycle state machine is `exploratory → candidate → active →
//! watchlist → deprecated`; intra-wave tiers are strong/medium/weak. The
//! actual numerical mining lives outside this subsystem behind the [`Miner`]
//! seam; this module only consumes its output contract (re-scored pattern
//! statistics) and drives the state machine.
//!
//! Every transition appends an immutable [`StatusHistory`] row. The ledger is
//! never edited, only appended, and deprecation is a status value rather than
//! a deletion, so the full audit trail survives.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::KbError;
use crate::loader;
use crate::model::{KnowledgeBase, PatternRule, Status, StatusHistory};
use crate::scoring::{classify, PatternStats, ScoringConfig, StatsIndex, TierOutcome};
use crate::validate;
use crate::versioning::{self, BumpLevel};

// ============================================================================
// External mining seam
// ============================================================================

/// Output contract of the external mining/evaluation step
///
/// Wave 2 re-submits medium and weak patterns with refined conditions; wave 3
/// runs cross-timeframe alignment and regime-conditional re-evaluation. Both
/// return re-scored statistics, or `None` when no new evidence was produced.
pub trait Miner {
    fn refine(&self, pattern: &PatternRule, current: Option<&PatternStats>)
        -> Option<PatternStats>;

    fn realign(
        &self,
        _pattern: &PatternRule,
        _current: Option<&PatternStats>,
    ) -> Option<PatternStats> {
        None
    }
}

/// Miner that never produces new evidence
///
/// Used when re-evaluation happens upstream and the loop only needs to drive
/// the promote/hold/retire decisions to their fixed point.
pub struct PassthroughMiner;

impl Miner for PassthroughMiner {
    fn refine(
        &self,
        _pattern: &PatternRule,
        _current: Option<&PatternStats>,
    ) -> Option<PatternStats> {
        None
    }
}

// ============================================================================
// Wave loop
// ============================================================================

/// Tuning for the discovery loop
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub scoring: ScoringConfig,
    /// Safety cap; the loop normally halts at its fixed point well before
    pub max_waves: usize,
    /// Consecutive unproductive waves before a pattern is demoted
    pub max_unproductive_waves: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            max_waves: 16,
            max_unproductive_waves: 3,
        }
    }
}

/// What one wave did
#[derive(Debug, Clone)]
pub struct WaveOutcome {
    pub wave: usize,
    pub promoted: Vec<String>,
    pub recycled: Vec<String>,
    pub demoted: Vec<String>,
}

impl WaveOutcome {
    fn new(wave: usize) -> Self {
        Self {
            wave,
            promoted: Vec::new(),
            recycled: Vec::new(),
            demoted: Vec::new(),
        }
    }
}

/// Full report of a discovery run
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    /// Initial-wave tier per pattern, in declaration order
    pub tiers: Vec<(String, TierOutcome)>,
    pub waves: Vec<WaveOutcome>,
}

/// Next status when a pattern crosses the strong thresholds
fn promote_step(status: Status) -> Option<Status> {
    match status {
        Status::Exploratory => Some(Status::Candidate),
        Status::Candidate => Some(Status::Active),
        Status::Watchlist => Some(Status::Active),
        Status::Active | Status::Deprecated => None,
    }
}

/// Next status when a pattern stays unproductive past the strike limit
fn demote_step(status: Status) -> Option<Status> {
    match status {
        Status::Active => Some(Status::Watchlist),
        Status::Exploratory | Status::Candidate | Status::Watchlist => Some(Status::Deprecated),
        Status::Deprecated => None,
    }
}

fn apply_transition(
    kb: &mut KnowledgeBase,
    idx: usize,
    new_status: Status,
    date: &str,
    reason: String,
) {
    let old_status = kb.patterns[idx].status;
    kb.patterns[idx].status = new_status;
    kb.status_history.push(StatusHistory {
        pattern_id: kb.patterns[idx].id.clone(),
        date: date.to_string(),
        old_status,
        new_status,
        reason: Some(reason),
        backtest_refs: Vec::new(),
    });
}

/// Run the discovery loop to its fixed point
///
/// The initial wave tiers every pattern from the stats index. Each later wave
/// re-submits medium/weak/unscored patterns to the miner, reclassifies, then
/// promotes every pattern currently tiered strong by one lifecycle step.
/// Unproductive patterns accumulate strikes and are demoted once the strike
/// limit is hit. The loop halts at the first wave with zero promotions.
pub fn run_waves(
    kb: &mut KnowledgeBase,
    stats: &mut StatsIndex,
    miner: &dyn Miner,
    cfg: &DiscoveryConfig,
    date: &str,
) -> DiscoveryReport {
    let mut tiers: HashMap<String, TierOutcome> = HashMap::new();
    let mut initial = Vec::with_capacity(kb.patterns.len());
    for pattern in &kb.patterns {
        let tier = match stats.get(&pattern.id) {
            Some(s) => classify(s, &cfg.scoring),
            None => TierOutcome::NoSignal,
        };
        tiers.insert(pattern.id.clone(), tier);
        initial.push((pattern.id.clone(), tier));
    }
    info!(
        "initial wave tiered {} patterns ({} strong)",
        initial.len(),
        initial.iter().filter(|(_, t)| t.is_strong()).count()
    );

    let mut strikes: HashMap<String, u32> = HashMap::new();
    let mut waves = Vec::new();

    for wave in 2..=cfg.max_waves {
        let mut outcome = WaveOutcome::new(wave);

        for idx in 0..kb.patterns.len() {
            let (id, status) = {
                let p = &kb.patterns[idx];
                (p.id.clone(), p.status)
            };
            if status == Status::Deprecated {
                continue;
            }

            let mut tier = tiers.get(&id).copied().unwrap_or(TierOutcome::NoSignal);
            if tier.needs_remining() {
                let refined = if wave == 2 {
                    miner.refine(&kb.patterns[idx], stats.get(&id))
                } else {
                    miner.realign(&kb.patterns[idx], stats.get(&id))
                };
                if let Some(new_stats) = refined {
                    debug!("wave {wave}: new evidence for '{id}'");
                    stats.insert(id.clone(), new_stats);
                }
                tier = match stats.get(&id) {
                    Some(s) => classify(s, &cfg.scoring),
                    None => TierOutcome::NoSignal,
                };
                tiers.insert(id.clone(), tier);
            }

            if tier.is_strong() {
                strikes.remove(&id);
                if let Some(next) = promote_step(status) {
                    apply_transition(
                        kb,
                        idx,
                        next,
                        date,
                        format!("wave {wave}: crossed strong thresholds"),
                    );
                    outcome.promoted.push(id);
                }
                // Already active: hold.
            } else {
                let count = strikes.entry(id.clone()).or_insert(0);
                *count += 1;
                if *count >= cfg.max_unproductive_waves {
                    if let Some(next) = demote_step(status) {
                        apply_transition(
                            kb,
                            idx,
                            next,
                            date,
                            format!(
                                "wave {wave}: unproductive for {} waves ({tier})",
                                cfg.max_unproductive_waves
                            ),
                        );
                        outcome.demoted.push(id.clone());
                    }
                    // Fresh strike cycle at the new status.
                    strikes.remove(&id);
                } else {
                    outcome.recycled.push(id);
                }
            }
        }

        let fixed_point = outcome.promoted.is_empty();
        info!(
            "wave {wave}: promoted={} recycled={} demoted={}",
            outcome.promoted.len(),
            outcome.recycled.len(),
            outcome.demoted.len()
        );
        waves.push(outcome);
        if fixed_point {
            break;
        }
    }

    DiscoveryReport {
        tiers: initial,
        waves,
    }
}

// ============================================================================
// Commit path
// ============================================================================

/// A validated KB plus the version marker it was validated against
///
/// All mutation flows through [`KbHandle::commit`], which owns the
/// exclusive-write discipline: optimistic concurrency on `kb_version`, atomic
/// write, and re-validation so a failed wave can never leave a
/// partially-promoted KB on disk.
pub struct KbHandle {
    pub kb: KnowledgeBase,
    path: PathBuf,
    loaded_version: String,
}

impl KbHandle {
    /// Load and validate a canonical KB file
    pub fn open(path: &Path) -> Result<Self, KbError> {
        let kb = loader::load(&[path.to_path_buf()])?;
        let loaded_version = kb.meta.kb_version.clone();
        Ok(Self {
            kb,
            path: path.to_path_buf(),
            loaded_version,
        })
    }

    /// The version this handle validated against
    pub fn loaded_version(&self) -> &str {
        &self.loaded_version
    }

    /// Validate, bump `kb_version`, and write atomically
    ///
    /// Fails with a version conflict if the on-disk version has advanced
    /// since this handle validated; the caller must reload and retry. The
    /// proposed changes are never partially written.
    pub fn commit(&mut self, reason: &str, level: BumpLevel) -> Result<(), KbError> {
        if self.path.is_file() {
            let on_disk = loader::read_document(&self.path)?;
            if on_disk.meta.kb_version != self.loaded_version {
                return Err(KbError::VersionConflict {
                    expected: self.loaded_version.clone(),
                    found: on_disk.meta.kb_version,
                });
            }
        }
        validate::validate(&self.kb)?;
        versioning::bump_kb_version(&mut self.kb.meta, reason, level, Utc::now())?;
        loader::write_atomic(&self.path, &self.kb)?;
        self.loaded_version = self.kb.meta.kb_version.clone();
        info!("committed KB v{} to {:?}", self.loaded_version, self.path);
        Ok(())
    }
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
