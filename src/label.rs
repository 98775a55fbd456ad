//! Bazel target labels.
//!
//! Labels are written `@repo//pkg:name`. The repository and the `:name`
//! suffix are optional: `//foo/bar` is shorthand for `//foo/bar:bar`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing a label string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("empty label")]
    Empty,
    #[error("invalid label {0:?}: {1}")]
    Invalid(String, &'static str),
}

/// A parsed Bazel label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub repo: String,
    pub pkg: String,
    pub name: String,
    /// True for labels of the form `:name`.
    pub relative: bool,
}

impl Label {
    pub fn new(repo: &str, pkg: &str, name: &str) -> Self {
        Self {
            repo: repo.to_string(),
            pkg: pkg.to_string(),
            name: name.to_string(),
            relative: false,
        }
    }

    /// The sentinel label for symbols provided by the platform (JDK, scala
    /// stdlib). A symbol resolving here never becomes a dependency.
    pub fn platform() -> Self {
        Self::new("platform", "", "do_not_import")
    }

    pub fn is_platform(&self) -> bool {
        self.repo == "platform" && self.pkg.is_empty() && self.name == "do_not_import"
    }

    /// The empty label.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.repo.is_empty() && self.pkg.is_empty() && self.name.is_empty()
    }

    /// Parse a label string.
    pub fn parse(s: &str) -> Result<Self, LabelError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LabelError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(LabelError::Invalid(s.to_string(), "contains whitespace"));
        }

        let mut repo = String::new();
        let mut rest = s;
        if let Some(stripped) = rest.strip_prefix('@') {
            let stripped = stripped.trim_start_matches('@');
            match stripped.find("//") {
                Some(idx) => {
                    repo = stripped[..idx].to_string();
                    rest = &stripped[idx..];
                }
                None => {
                    // @repo is shorthand for @repo//:repo
                    if stripped.is_empty() {
                        return Err(LabelError::Invalid(s.to_string(), "empty repository"));
                    }
                    if stripped.contains([':', '/']) {
                        return Err(LabelError::Invalid(s.to_string(), "missing //"));
                    }
                    return Ok(Self::new(stripped, "", stripped));
                }
            }
        }

        if let Some(absolute) = rest.strip_prefix("//") {
            let (pkg, name) = match absolute.split_once(':') {
                Some((pkg, name)) => (pkg, name.to_string()),
                None => (absolute, last_segment(absolute).to_string()),
            };
            if name.is_empty() {
                return Err(LabelError::Invalid(s.to_string(), "empty target name"));
            }
            if pkg.starts_with('/') || pkg.ends_with('/') {
                return Err(LabelError::Invalid(s.to_string(), "malformed package"));
            }
            return Ok(Self {
                repo,
                pkg: pkg.to_string(),
                name,
                relative: false,
            });
        }

        if !repo.is_empty() {
            return Err(LabelError::Invalid(s.to_string(), "missing //"));
        }

        let name = rest.strip_prefix(':').unwrap_or(rest);
        if name.is_empty() || name.contains(':') || name.starts_with('/') {
            return Err(LabelError::Invalid(s.to_string(), "malformed relative label"));
        }
        Ok(Self {
            repo: String::new(),
            pkg: String::new(),
            name: name.to_string(),
            relative: true,
        })
    }

    /// Resolve a relative label against a package.
    pub fn abs(&self, repo: &str, pkg: &str) -> Self {
        if !self.relative {
            return self.clone();
        }
        Self::new(repo, pkg, &self.name)
    }
}

fn last_segment(pkg: &str) -> &str {
    pkg.rsplit('/').next().unwrap_or(pkg)
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relative {
            return write!(f, ":{}", self.name);
        }
        if !self.repo.is_empty() {
            write!(f, "@{}", self.repo)?;
        }
        if !self.pkg.is_empty() && last_segment(&self.pkg) == self.name {
            write!(f, "//{}", self.pkg)
        } else {
            write!(f, "//{}:{}", self.pkg, self.name)
        }
    }
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::parse(s)
    }
}
