//! Fingerprint-keyed caching around a [`LanguageParser`].

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use super::{LanguageParser, ParseBatch, ParseError};
use crate::facts::{self, FileFacts, RuleFacts};
use crate::store::FactStore;

/// A request to produce the facts of one rule.
#[derive(Debug, Clone)]
pub struct RuleRequest {
    pub label: String,
    pub kind: String,
    /// Absolute source paths.
    pub srcs: Vec<PathBuf>,
}

/// Parser wrapper that only re-parses what changed.
///
/// A rule whose fingerprint matches the stored one is returned from the
/// store without talking to the parser. Otherwise only files whose own
/// fingerprint changed are sent to the parser.
pub struct MemoParser<P: LanguageParser> {
    inner: P,
    store: FactStore,
    root: PathBuf,
    hits: usize,
    misses: usize,
}

struct Fingerprinted {
    abs: PathBuf,
    rel: String,
    sha256: String,
}

impl<P: LanguageParser> MemoParser<P> {
    /// `root` is the workspace root that filenames are made relative to.
    pub fn new(inner: P, store: FactStore, root: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            store,
            root: root.into(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn store(&self) -> &FactStore {
        &self.store
    }

    pub fn into_store(self) -> FactStore {
        self.store
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Rule cache (hits, misses).
    pub fn cache_stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    /// Produce the facts for one rule.
    pub fn parse_rule(&mut self, request: &RuleRequest) -> Result<RuleFacts, ParseError> {
        let mut out = self.parse_rules(std::slice::from_ref(request));
        out.pop().unwrap_or(Err(ParseError::NotStarted))
    }

    /// Produce the facts for several rules, batching the parser calls.
    pub fn parse_rules(&mut self, requests: &[RuleRequest]) -> Vec<Result<RuleFacts, ParseError>> {
        let mut results: Vec<Option<Result<RuleFacts, ParseError>>> =
            (0..requests.len()).map(|_| None).collect();
        let mut pending: Vec<(usize, Vec<Fingerprinted>, Vec<FileFacts>)> = Vec::new();
        let mut batches = Vec::new();

        for (i, request) in requests.iter().enumerate() {
            let prints = match fingerprint_all(&self.root, &request.srcs) {
                Ok(p) => p,
                Err(e) => {
                    results[i] = Some(Err(e));
                    continue;
                }
            };

            let pairs: Vec<(String, String)> = prints
                .iter()
                .map(|f| (f.rel.clone(), f.sha256.clone()))
                .collect();
            if let Some(rule) = self.store.current_rule(&request.label, &pairs) {
                if rule.kind == request.kind {
                    tracing::debug!(label = %request.label, "rule cache hit");
                    self.hits += 1;
                    results[i] = Some(Ok(rule.clone()));
                    continue;
                }
            }
            self.misses += 1;

            let mut unchanged = Vec::new();
            let mut changed = Vec::new();
            for print in prints {
                match self.store.current_file(&print.rel, &print.sha256) {
                    Some(cached) => unchanged.push(cached.clone()),
                    None => changed.push(print),
                }
            }
            tracing::debug!(
                label = %request.label,
                changed = changed.len(),
                unchanged = unchanged.len(),
                "rule cache miss"
            );

            if !changed.is_empty() {
                batches.push(ParseBatch {
                    label: request.label.clone(),
                    paths: changed.iter().map(|f| f.abs.clone()).collect(),
                });
            }
            pending.push((i, changed, unchanged));
        }

        let mut parsed = self.inner.parse_many(&batches).into_iter();

        for (i, changed, mut files) in pending {
            let request = &requests[i];
            if !changed.is_empty() {
                match parsed.next() {
                    Some(Ok(fresh)) => files.extend(attach_fingerprints(fresh, &changed)),
                    Some(Err(e)) => {
                        results[i] = Some(Err(e));
                        continue;
                    }
                    None => {
                        results[i] = Some(Err(ParseError::Worker(format!(
                            "{}: no result from parser",
                            request.label
                        ))));
                        continue;
                    }
                }
            }
            let rule = RuleFacts::new(request.label.clone(), request.kind.clone(), files);
            self.store.store_rule(rule.clone());
            results[i] = Some(Ok(rule));
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(ParseError::NotStarted)))
            .collect()
    }
}

fn fingerprint_all(root: &Path, srcs: &[PathBuf]) -> Result<Vec<Fingerprinted>, ParseError> {
    let mut prints = srcs
        .par_iter()
        .map(|abs| {
            let sha256 = facts::fingerprint_file(abs).map_err(|source| ParseError::Io {
                path: abs.display().to_string(),
                source,
            })?;
            Ok(Fingerprinted {
                abs: abs.clone(),
                rel: relative_name(root, abs),
                sha256,
            })
        })
        .collect::<Result<Vec<_>, ParseError>>()?;
    prints.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(prints)
}

/// Replace the parser's filenames with workspace-relative ones and record
/// the content fingerprints.
fn attach_fingerprints(fresh: Vec<FileFacts>, changed: &[Fingerprinted]) -> Vec<FileFacts> {
    fresh
        .into_iter()
        .map(|mut f| {
            if let Some(print) = changed
                .iter()
                .find(|c| c.abs.display().to_string() == f.filename || c.rel == f.filename)
            {
                f.filename = print.rel.clone();
                f.sha256 = print.sha256.clone();
            }
            f
        })
        .collect()
}

/// Path relative to `root`, or the path itself when outside of it.
pub fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::FakeParser;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a/A.scala");
        let b = dir.path().join("a/B.scala");
        fs::create_dir_all(a.parent().unwrap()).unwrap();
        fs::write(&a, "package a\nclass A\n").unwrap();
        fs::write(&b, "package a\nclass B\n").unwrap();
        (dir, a, b)
    }

    fn fake(a: &Path, b: &Path) -> FakeParser {
        let mut fa = FileFacts::new("");
        fa.packages = vec!["a".into()];
        fa.classes = vec!["a.A".into()];
        let mut fb = FileFacts::new("");
        fb.packages = vec!["a".into()];
        fb.classes = vec!["a.B".into()];
        FakeParser::new().with_file(a, fa).with_file(b, fb)
    }

    #[test]
    fn test_first_parse_misses_then_hits() {
        let (dir, a, b) = setup();
        let mut memo = MemoParser::new(fake(&a, &b), FactStore::new(), dir.path());
        let request = RuleRequest {
            label: "//a".into(),
            kind: "scala_library".into(),
            srcs: vec![b.clone(), a.clone()],
        };

        let rule = memo.parse_rule(&request).unwrap();
        assert_eq!(rule.files.len(), 2);
        assert_eq!(rule.files[0].filename, "a/A.scala");
        assert!(!rule.files[0].sha256.is_empty());
        assert_eq!(rule.sha256, facts::fingerprint_rule(&rule.files));

        let again = memo.parse_rule(&request).unwrap();
        assert_eq!(again, rule);
        assert_eq!(memo.cache_stats(), (1, 1));
        assert_eq!(memo.inner().calls(), 1);
    }

    #[test]
    fn test_only_changed_files_are_reparsed() {
        let (dir, a, b) = setup();
        let mut memo = MemoParser::new(fake(&a, &b), FactStore::new(), dir.path());
        let request = RuleRequest {
            label: "//a".into(),
            kind: "scala_library".into(),
            srcs: vec![a.clone(), b.clone()],
        };
        let first = memo.parse_rule(&request).unwrap();

        fs::write(&b, "package a\nclass B { }\n").unwrap();
        let second = memo.parse_rule(&request).unwrap();

        assert_ne!(first.sha256, second.sha256);
        assert_eq!(memo.inner().files_parsed(), 3);
        assert_eq!(memo.store().rule_count(), 1);
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let (dir, a, _) = setup();
        let mut memo = MemoParser::new(FakeParser::new(), FactStore::new(), dir.path());
        let request = RuleRequest {
            label: "//a".into(),
            kind: "scala_library".into(),
            srcs: vec![a, dir.path().join("missing.scala")],
        };
        assert!(matches!(memo.parse_rule(&request), Err(ParseError::Io { .. })));
    }
}
