use chrono::{DateTime, Utc};
use ledgerfill_core::{RuleSet, RuleSetError};
use serde::Serialize;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::hash::payload_fingerprint;

const ID_PREFIX: &str = "rules_";
const FILE_EXT: &str = "json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Rule set error: {0}")]
    RuleSet(#[from] RuleSetError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("No rule set found in {0}")]
    NotFound(String),
    #[error("Rule set {0} already exists")]
    AlreadyExists(RuleSetId),
    #[error("Invalid rule set identifier: '{0}'")]
    InvalidId(String),
}

impl StoreError {
    /// Callers treat this as "no rules available" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Identifier of a persisted rule set:
/// `rules_<yyyymmddTHHMMSS.ffffff>Z_<first 8 hex of SHA-256(payload)>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RuleSetId(String);

impl RuleSetId {
    pub fn new(created: DateTime<Utc>, payload: &[u8]) -> Self {
        Self(format!(
            "{ID_PREFIX}{}Z_{}",
            created.format("%Y%m%dT%H%M%S%.6f"),
            payload_fingerprint(payload)
        ))
    }

    /// Accepts an identifier typed by a user. Only the characters that
    /// [`RuleSetId::new`] produces are allowed, so the id is always a plain
    /// file name.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let raw = raw.trim();
        let raw = raw
            .strip_suffix(&format!(".{FILE_EXT}"))
            .unwrap_or(raw);
        let valid = raw.starts_with(ID_PREFIX)
            && raw.len() > ID_PREFIX.len()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(StoreError::InvalidId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn file_name(&self) -> String {
        format!("{}.{FILE_EXT}", self.0)
    }
}

impl fmt::Display for RuleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSetSummary {
    pub id: RuleSetId,
    pub creation_timestamp: DateTime<Utc>,
    pub total_rule_count: usize,
}

/// Versioned rule-set persistence. Saves always create a new identifier;
/// `load_latest` picks by the recorded creation timestamp.
pub trait RuleStore {
    fn save(&self, rule_set: &RuleSet) -> Result<RuleSetId, StoreError>;
    fn load(&self, id: &RuleSetId) -> Result<RuleSet, StoreError>;
    fn load_latest(&self) -> Result<RuleSet, StoreError>;
    /// Stored rule sets, oldest first.
    fn list(&self) -> Result<Vec<RuleSetSummary>, StoreError>;
}

/// One JSON file per rule set in a single directory.
#[derive(Debug, Clone)]
pub struct DirectoryRuleStore {
    dir: PathBuf,
}

impl DirectoryRuleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Like [`DirectoryRuleStore::new`], creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(dir);
        fs::create_dir_all(&store.dir)?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rule-set files in the directory, skipping temporaries. A missing
    /// directory holds nothing.
    fn entries(&self) -> Result<Vec<(RuleSetId, PathBuf)>, StoreError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(&format!(".{FILE_EXT}")) {
                continue;
            }
            if let Ok(id) = RuleSetId::parse(name) {
                entries.push((id, path));
            }
        }
        Ok(entries)
    }

    /// Every readable rule set with its id. Unreadable files are logged and
    /// skipped.
    fn readable(&self) -> Result<Vec<(RuleSetId, RuleSet)>, StoreError> {
        let mut sets = Vec::new();
        for (id, path) in self.entries()? {
            match read_rule_set(&path) {
                Ok(set) => sets.push((id, set)),
                Err(e) => tracing::warn!("Skipping unreadable rule set {}: {e}", path.display()),
            }
        }
        Ok(sets)
    }

    fn not_found(&self) -> StoreError {
        StoreError::NotFound(self.dir.display().to_string())
    }
}

fn read_rule_set(path: &Path) -> Result<RuleSet, StoreError> {
    let bytes = fs::read(path)?;
    Ok(RuleSet::from_slice(&bytes)?)
}

impl RuleStore for DirectoryRuleStore {
    fn save(&self, rule_set: &RuleSet) -> Result<RuleSetId, StoreError> {
        fs::create_dir_all(&self.dir)?;
        let payload = serde_json::to_vec_pretty(rule_set)?;
        let id = RuleSetId::new(rule_set.creation_timestamp, &payload);
        let target = self.dir.join(id.file_name());
        if target.exists() {
            return Err(StoreError::AlreadyExists(id));
        }

        let tmp = self.dir.join(format!(".{}.tmp", id.file_name()));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&tmp) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(id));
            }
            Err(e) => return Err(e.into()),
        };
        let written = file.write_all(&payload).and_then(|_| file.sync_all());
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::info!(id = %id, rules = rule_set.len(), "Rule set saved");
        Ok(id)
    }

    fn load(&self, id: &RuleSetId) -> Result<RuleSet, StoreError> {
        let path = self.dir.join(id.file_name());
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        read_rule_set(&path)
    }

    fn load_latest(&self) -> Result<RuleSet, StoreError> {
        let (id, set) = self
            .readable()?
            .into_iter()
            .max_by(|(a_id, a), (b_id, b)| {
                a.creation_timestamp
                    .cmp(&b.creation_timestamp)
                    .then_with(|| a_id.cmp(b_id))
            })
            .ok_or_else(|| self.not_found())?;
        tracing::info!(id = %id, rules = set.len(), "Loaded latest rule set");
        Ok(set)
    }

    fn list(&self) -> Result<Vec<RuleSetSummary>, StoreError> {
        let mut summaries: Vec<RuleSetSummary> = self
            .readable()?
            .into_iter()
            .map(|(id, set)| RuleSetSummary {
                id,
                creation_timestamp: set.creation_timestamp,
                total_rule_count: set.total_rule_count,
            })
            .collect();
        summaries.sort_by(|a, b| {
            a.creation_timestamp
                .cmp(&b.creation_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ledgerfill_core::{Rule, RuleKind};
    use std::collections::BTreeMap;

    fn rule_set(ts: DateTime<Utc>, pattern: &str) -> RuleSet {
        let rule = Rule {
            pattern: pattern.to_string(),
            context: None,
            support: 3,
            priority: 1,
            rule_type: RuleKind::HybridFill,
            fixed_columns: BTreeMap::from([("Service".to_string(), "OHD".to_string())]),
            variable_columns: BTreeMap::new(),
            global_confidence: 1.0,
        };
        RuleSet::new(vec![rule], ts)
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, hour, 0, 0).unwrap()
    }

    #[test]
    fn id_embeds_timestamp_and_digest() {
        let id = RuleSetId::new(at(9), b"{}");
        assert!(id.as_str().starts_with("rules_20260504T090000.000000Z_"));
        assert_eq!(id.as_str().len(), "rules_20260504T090000.000000Z_".len() + 8);
        assert_eq!(RuleSetId::parse(&format!("{id}.json")).unwrap(), id);
    }

    #[test]
    fn parse_rejects_paths() {
        assert!(RuleSetId::parse("../rules_x").is_err());
        assert!(RuleSetId::parse("rules_/etc").is_err());
        assert!(RuleSetId::parse("notes.json").is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryRuleStore::open(dir.path()).unwrap();
        let original = rule_set(at(9), "advicepro");
        let id = store.save(&original).unwrap();
        assert_eq!(store.load(&id).unwrap(), original);
        assert_eq!(store.load_latest().unwrap(), original);
    }

    #[test]
    fn save_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryRuleStore::open(dir.path()).unwrap();
        let set = rule_set(at(9), "advicepro");
        store.save(&set).unwrap();
        assert!(matches!(store.save(&set), Err(StoreError::AlreadyExists(_))));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn latest_is_chosen_by_recorded_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryRuleStore::open(dir.path()).unwrap();
        // Saved out of order: file system times say nothing about recency.
        store.save(&rule_set(at(12), "newest")).unwrap();
        store.save(&rule_set(at(8), "oldest")).unwrap();
        store.save(&rule_set(at(10), "middle")).unwrap();

        let latest = store.load_latest().unwrap();
        assert_eq!(latest.rules[0].pattern, "newest");

        let listed: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|s| s.creation_timestamp)
            .collect();
        assert_eq!(listed, [at(8), at(10), at(12)]);
    }

    #[test]
    fn corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryRuleStore::open(dir.path()).unwrap();
        store.save(&rule_set(at(8), "advicepro")).unwrap();
        fs::write(dir.path().join("rules_20990101T000000.000000Z_deadbeef.json"), "{not json").unwrap();

        let latest = store.load_latest().unwrap();
        assert_eq!(latest.creation_timestamp, at(8));
    }

    #[test]
    fn empty_or_missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryRuleStore::new(dir.path().join("absent"));
        let err = store.load_latest().unwrap_err();
        assert!(err.is_not_found());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn temporaries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryRuleStore::open(dir.path()).unwrap();
        fs::write(dir.path().join(".rules_x.json.tmp"), "{}").unwrap();
        assert!(store.load_latest().unwrap_err().is_not_found());
    }
}
