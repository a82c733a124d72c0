//! Loading, merging, and persisting KB documents
//!
//! A KB may live in one canonical file or be split across fragments. Fragment
//! sections are concatenated; duplicate IDs across fragments are a hard
//! validation failure rather than a silent overwrite, so splitting a KB
//! across files can never shadow an entity. No partially-validated graph is
//! ever returned.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::KbError;
use crate::model::KnowledgeBase;
use crate::validate;

/// Parse a single YAML document without integrity validation
///
/// Structural errors (missing fields, wrong types, bad enum values) surface
/// here with the file path attached.
pub fn read_document(path: &Path) -> Result<KnowledgeBase, KbError> {
    let raw = fs::read_to_string(path).map_err(|source| KbError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let kb: KnowledgeBase = serde_yaml::from_str(&raw).map_err(|source| KbError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(
        "parsed {:?}: {} patterns, {} datasets",
        path,
        kb.patterns.len(),
        kb.datasets.len()
    );
    Ok(kb)
}

/// Merge fragment documents into one in-memory KB
///
/// The first fragment's meta block wins (`kb_version` marker included); every
/// fragment must declare the same `schema_version`. Section sequences are
/// concatenated in fragment order, preserving declaration order within each.
pub fn merge_fragments(fragments: Vec<KnowledgeBase>) -> Result<KnowledgeBase, KbError> {
    let mut iter = fragments.into_iter();
    let mut merged = match iter.next() {
        Some(first) => first,
        None => {
            return Err(KbError::NoFragments {
                path: PathBuf::new(),
            })
        }
    };

    let mut schema_versions = vec![merged.meta.schema_version.clone()];
    for fragment in iter {
        if fragment.meta.schema_version != merged.meta.schema_version {
            schema_versions.push(fragment.meta.schema_version.clone());
        }
        merged.datasets.extend(fragment.datasets);
        merged.features.extend(fragment.features);
        merged.clusters.extend(fragment.clusters);
        merged.patterns.extend(fragment.patterns);
        merged.trading_rules.extend(fragment.trading_rules);
        merged.rule_relations.extend(fragment.rule_relations);
        merged
            .cross_market_patterns
            .extend(fragment.cross_market_patterns);
        merged.market_relations.extend(fragment.market_relations);
        merged.backtests.extend(fragment.backtests);
        merged
            .performance_over_time
            .extend(fragment.performance_over_time);
        merged.status_history.extend(fragment.status_history);
    }

    if schema_versions.len() > 1 {
        return Err(KbError::SchemaMismatch {
            found: schema_versions,
        });
    }

    Ok(merged)
}

/// Load one or more KB files into a single validated graph
pub fn load(paths: &[PathBuf]) -> Result<KnowledgeBase, KbError> {
    let fragments = paths
        .iter()
        .map(|p| read_document(p))
        .collect::<Result<Vec<_>, _>>()?;
    let merged = merge_fragments(fragments)?;
    validate::validate(&merged)?;
    info!(
        "loaded KB v{} ({} patterns across {} files)",
        merged.meta.kb_version,
        merged.patterns.len(),
        paths.len()
    );
    Ok(merged)
}

/// Load every `*.yaml`/`*.yml` fragment in a directory, sorted by file name
pub fn load_dir(dir: &Path) -> Result<KnowledgeBase, KbError> {
    let entries = fs::read_dir(dir).map_err(|source| KbError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(KbError::NoFragments {
            path: dir.to_path_buf(),
        });
    }
    load(&paths)
}

/// Load a path that may be a canonical file or a fragment directory
pub fn load_path(path: &Path) -> Result<KnowledgeBase, KbError> {
    if path.is_dir() {
        load_dir(path)
    } else {
        load(std::slice::from_ref(&path.to_path_buf()))
    }
}

/// Serialize and write a KB atomically (temp file + rename)
pub fn write_atomic(path: &Path, kb: &KnowledgeBase) -> Result<(), KbError> {
    let rendered = serde_yaml::to_string(kb).map_err(|source| KbError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, rendered).map_err(|source| KbError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| KbError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("wrote KB v{} to {:?}", kb.meta.kb_version, path);
    Ok(())
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;
