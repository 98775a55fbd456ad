//! Content-addressed cache of file and rule facts.
//!
//! The store lives in memory for the duration of a run and is loaded from
//! and saved to a snapshot file at process start and end. A snapshot that
//! cannot be read is not an error: the store starts empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::facts::{self, FileFacts, RuleFacts, RuleSet};

/// In-memory fact cache keyed by filename and rule label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactStore {
    files: BTreeMap<String, FileFacts>,
    rules: BTreeMap<String, RuleFacts>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default snapshot location in the user cache directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "scala-depfix").map(|dirs| dirs.cache_dir().join("facts.bin"))
    }

    /// Load a snapshot. Missing or unreadable snapshots yield an empty store.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no fact store snapshot, starting empty");
            return Self::new();
        }
        match codec::read_file::<FactStore>(path) {
            Ok(store) => {
                tracing::debug!(
                    path = %path.display(),
                    rules = store.rules.len(),
                    files = store.files.len(),
                    "loaded fact store"
                );
                store
            }
            Err(e) => {
                tracing::warn!("discarding unreadable fact store: {}", e);
                Self::new()
            }
        }
    }

    /// Save a snapshot.
    pub fn save(&self, path: &Path) -> Result<(), CodecError> {
        codec::write_file(path, self)
    }

    pub fn lookup_file(&self, filename: &str) -> Option<&FileFacts> {
        self.files.get(filename)
    }

    pub fn lookup_rule(&self, label: &str) -> Option<&RuleFacts> {
        self.rules.get(label)
    }

    /// Store a file record, replacing any previous record for the filename.
    pub fn store_file(&mut self, file: FileFacts) {
        self.files.insert(file.filename.clone(), file);
    }

    /// Store a rule record and each of its files.
    pub fn store_rule(&mut self, rule: RuleFacts) {
        for file in &rule.files {
            self.files.insert(file.filename.clone(), file.clone());
        }
        self.rules.insert(rule.label.clone(), rule);
    }

    /// See [`facts::fingerprint_rule`].
    pub fn fingerprint_rule(files: &[FileFacts]) -> String {
        facts::fingerprint_rule(files)
    }

    /// Return the cached rule when its stored fingerprint matches the
    /// fingerprint of the given `(filename, sha256)` pairs.
    pub fn current_rule(&self, label: &str, fingerprints: &[(String, String)]) -> Option<&RuleFacts> {
        let rule = self.rules.get(label)?;
        let probe: Vec<FileFacts> = fingerprints
            .iter()
            .map(|(filename, sha256)| FileFacts {
                filename: filename.clone(),
                sha256: sha256.clone(),
                ..Default::default()
            })
            .collect();
        if rule.sha256 == facts::fingerprint_rule(&probe) {
            Some(rule)
        } else {
            None
        }
    }

    /// Return the cached file when its fingerprint is unchanged.
    pub fn current_file(&self, filename: &str, sha256: &str) -> Option<&FileFacts> {
        self.files
            .get(filename)
            .filter(|f| f.sha256 == sha256 && !f.has_error())
    }

    pub fn rules(&self) -> impl Iterator<Item = &RuleFacts> {
        self.rules.values()
    }

    pub fn files(&self) -> impl Iterator<Item = &FileFacts> {
        self.files.values()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Export the rules as a label-sorted rule set.
    pub fn to_rule_set(&self) -> RuleSet {
        RuleSet::new(self.rules.values().cloned().collect())
    }

    /// Build a store from a rule set.
    pub fn from_rule_set(set: RuleSet) -> Self {
        let mut store = Self::new();
        for rule in set.rules {
            store.store_rule(rule);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file(name: &str, sha: &str) -> FileFacts {
        let mut f = FileFacts::new(name);
        f.sha256 = sha.to_string();
        f
    }

    #[test]
    fn test_lookup_miss_is_none() {
        let store = FactStore::new();
        assert!(store.lookup_file("a.scala").is_none());
        assert!(store.lookup_rule("//a").is_none());
    }

    #[test]
    fn test_store_overwrites_by_key() {
        let mut store = FactStore::new();
        store.store_file(file("a.scala", "1"));
        store.store_file(file("a.scala", "2"));
        assert_eq!(store.file_count(), 1);
        assert_eq!(store.lookup_file("a.scala").unwrap().sha256, "2");
    }

    #[test]
    fn test_current_rule_requires_matching_fingerprint() {
        let mut store = FactStore::new();
        store.store_rule(RuleFacts::new("//a", "scala_library", vec![file("a.scala", "1")]));

        let same = vec![("a.scala".to_string(), "1".to_string())];
        let changed = vec![("a.scala".to_string(), "2".to_string())];
        assert!(store.current_rule("//a", &same).is_some());
        assert!(store.current_rule("//a", &changed).is_none());
        assert!(store.current_file("a.scala", "1").is_some());
        assert!(store.current_file("a.scala", "2").is_none());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = FactStore::new();
        store.store_rule(RuleFacts::new("//a", "scala_library", vec![file("a.scala", "1")]));
        store.store_file(file("loose.scala", "9"));

        for name in ["facts.json", "facts.bin"] {
            let path = dir.path().join(name);
            store.save(&path).unwrap();
            assert_eq!(FactStore::load(&path), store);
        }
    }

    #[test]
    fn test_load_corrupt_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("facts.bin");
        std::fs::write(&path, b"\xff\xff\xff").unwrap();
        let store = FactStore::load(&path);
        assert_eq!(store.rule_count(), 0);
        assert_eq!(FactStore::load(&dir.path().join("missing.json")).file_count(), 0);
    }
}
