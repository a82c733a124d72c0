//! Semver-style KB version bumping and history tracking

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::KbError;
use crate::model::{KbMeta, VersionRecord};

/// Which component of the version to bump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpLevel {
    Major,
    Minor,
    Patch,
}

impl fmt::Display for BumpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BumpLevel::Major => write!(f, "major"),
            BumpLevel::Minor => write!(f, "minor"),
            BumpLevel::Patch => write!(f, "patch"),
        }
    }
}

impl FromStr for BumpLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "major" => Ok(BumpLevel::Major),
            "minor" => Ok(BumpLevel::Minor),
            "patch" => Ok(BumpLevel::Patch),
            other => Err(format!("unknown bump level '{other}'")),
        }
    }
}

/// Parse a semantic-ish version string into (major, minor, patch)
///
/// Tolerates a leading `v` and missing trailing components (`1.2` → 1.2.0).
pub fn parse_semver(version: &str) -> Result<(u64, u64, u64), KbError> {
    let trimmed = version.trim().trim_start_matches('v');
    if trimmed.is_empty() {
        return Err(KbError::InvalidVersion(version.to_string()));
    }
    let mut parts = [0u64; 3];
    for (idx, piece) in trimmed.split('.').enumerate() {
        if idx >= 3 {
            return Err(KbError::InvalidVersion(version.to_string()));
        }
        parts[idx] = piece
            .parse::<u64>()
            .map_err(|_| KbError::InvalidVersion(version.to_string()))?;
    }
    Ok((parts[0], parts[1], parts[2]))
}

/// Bump a version string at the given level
pub fn bump(version: &str, level: BumpLevel) -> Result<String, KbError> {
    let (major, minor, patch) = parse_semver(version)?;
    let overflow = || KbError::InvalidVersion(version.to_string());
    let next = match level {
        BumpLevel::Major => (major.checked_add(1).ok_or_else(overflow)?, 0, 0),
        BumpLevel::Minor => (major, minor.checked_add(1).ok_or_else(overflow)?, 0),
        BumpLevel::Patch => (major, minor, patch.checked_add(1).ok_or_else(overflow)?),
    };
    Ok(format!("{}.{}.{}", next.0, next.1, next.2))
}

/// Bump `meta.kb_version` and append to the version history
pub fn bump_kb_version(
    meta: &mut KbMeta,
    reason: &str,
    level: BumpLevel,
    now: DateTime<Utc>,
) -> Result<(), KbError> {
    meta.kb_version = bump(&meta.kb_version, level)?;
    let stamp = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    meta.updated_at = Some(stamp.clone());
    meta.version_history.push(VersionRecord {
        kb_version: meta.kb_version.clone(),
        schema_version: meta.schema_version.clone(),
        changed_at: stamp,
        notes: vec![reason.to_string()],
    });
    Ok(())
}

#[cfg(test)]
#[path = "versioning_tests.rs"]
mod tests;
