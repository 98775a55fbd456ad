//! Source parsing interface.
//!
//! This module provides:
//! - `LanguageParser` trait: turns a batch of source paths into fact records
//! - `ParserServer`: the out-of-process worker spoken to over HTTP/JSON
//! - `FakeParser`: in-memory parser for tests and dry runs
//! - `MemoParser`: fingerprint-keyed caching on top of any parser

mod memo;
mod server;

pub use memo::{MemoParser, RuleRequest};
pub use server::{ParserServer, ParserServerOptions};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::facts::FileFacts;

/// Errors that fail a whole parse batch.
///
/// Problems with individual files are not errors: they are recorded on the
/// file's [`FileFacts::error`].
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to launch parser worker: {0}")]
    Launch(#[source] std::io::Error),
    #[error("parser worker exited during startup ({0})")]
    Exited(String),
    #[error("parser worker did not accept connections on port {port} within {timeout:?}")]
    Probe { port: u16, timeout: Duration },
    #[error("parser worker not started")]
    NotStarted,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("parse request timed out")]
    Timeout,
    #[error("parser worker returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("parser worker returned content type {0:?}, want application/json")]
    ContentType(String),
    #[error("decoding parser response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("parser worker error: {0}")]
    Worker(String),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One batch of files belonging to a single rule.
#[derive(Debug, Clone)]
pub struct ParseBatch {
    pub label: String,
    pub paths: Vec<PathBuf>,
}

/// A parser producing one fact record per source path.
pub trait LanguageParser: Send + Sync {
    /// Parse a batch of absolute source paths belonging to `label`.
    ///
    /// Returned facts carry the path as given in `filename`; callers
    /// relativize it.
    fn parse(&self, label: &str, paths: &[PathBuf]) -> Result<Vec<FileFacts>, ParseError>;

    /// Parse several batches. The default runs them one after another.
    fn parse_many(&self, batches: &[ParseBatch]) -> Vec<Result<Vec<FileFacts>, ParseError>> {
        batches
            .iter()
            .map(|b| self.parse(&b.label, &b.paths))
            .collect()
    }
}

/// In-memory parser returning canned facts keyed by path.
#[derive(Debug, Default)]
pub struct FakeParser {
    facts: HashMap<PathBuf, FileFacts>,
    calls: AtomicUsize,
    files_parsed: AtomicUsize,
}

impl FakeParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the facts returned for `path`. The record's filename is
    /// replaced by the path.
    pub fn with_file(mut self, path: impl AsRef<Path>, mut facts: FileFacts) -> Self {
        let path = path.as_ref().to_path_buf();
        facts.filename = path.display().to_string();
        self.facts.insert(path, facts);
        self
    }

    /// Number of `parse` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of individual files parsed so far.
    pub fn files_parsed(&self) -> usize {
        self.files_parsed.load(Ordering::SeqCst)
    }
}

impl LanguageParser for FakeParser {
    fn parse(&self, _label: &str, paths: &[PathBuf]) -> Result<Vec<FileFacts>, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.files_parsed.fetch_add(paths.len(), Ordering::SeqCst);
        Ok(paths
            .iter()
            .map(|path| match self.facts.get(path) {
                Some(facts) => {
                    let mut facts = facts.clone();
                    facts.normalize();
                    facts
                }
                None => FileFacts {
                    filename: path.display().to_string(),
                    error: Some("no facts registered for path".to_string()),
                    ..Default::default()
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_parser_returns_registered_facts() {
        let mut facts = FileFacts::new("ignored");
        facts.classes = vec!["b.B".into(), "a.A".into()];
        let parser = FakeParser::new().with_file("/ws/A.scala", facts);

        let out = parser
            .parse("//a", &[PathBuf::from("/ws/A.scala"), PathBuf::from("/ws/B.scala")])
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].filename, "/ws/A.scala");
        assert_eq!(out[0].classes, vec!["a.A", "b.B"]);
        assert!(out[1].has_error());
        assert_eq!(parser.calls(), 1);
        assert_eq!(parser.files_parsed(), 2);
    }

    #[test]
    fn test_parse_many_default_is_sequential() {
        let parser = FakeParser::new();
        let batches = vec![
            ParseBatch {
                label: "//a".into(),
                paths: vec![PathBuf::from("a.scala")],
            },
            ParseBatch {
                label: "//b".into(),
                paths: vec![PathBuf::from("b.scala")],
            },
        ];
        let results = parser.parse_many(&batches);
        assert_eq!(results.len(), 2);
        assert_eq!(parser.calls(), 2);
    }
}
