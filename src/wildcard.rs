//! Expanding a wildcard import into the names it actually provides.
//!
//! The file is built with the wildcard import commented out. Every name the
//! compiler then cannot find is added to an explicit import, and the build
//! is repeated until it passes.

use std::collections::BTreeSet;
use std::fs::{self, Permissions};
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::bazel::{BuildTool, ExecError};

lazy_static! {
    static ref NOT_FOUND_LINE: Regex =
        Regex::new(r"^(.*):\d+: error: .*not found: (value|type) ([A-Z].*)$").unwrap();
}

#[derive(Debug, Error)]
pub enum WildcardError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: import line not found: {line}")]
    ImportLineNotFound { path: String, line: String },
    #[error("{label}: target must build first time: {output}")]
    MustBuildFirst { label: String, output: String },
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("expand wildcard failed: final set of not-found symbols: {}", .symbols.join(", "))]
    NoProgress { symbols: Vec<String> },
    #[error("import prefix must not be empty")]
    EmptyPrefix,
    #[error("must have at least one symbol in list")]
    NoSymbols,
}

/// A source file split around one import line.
#[derive(Debug, Clone)]
pub struct TextFile {
    path: PathBuf,
    permissions: Option<Permissions>,
    before: Vec<String>,
    target: String,
    after: Vec<String>,
}

impl TextFile {
    pub fn load(path: &Path, target: &str) -> Result<Self, WildcardError> {
        let io_err = |source| WildcardError::Io {
            path: path.display().to_string(),
            source,
        };
        let text = fs::read_to_string(path).map_err(io_err)?;
        let permissions = fs::metadata(path).map_err(io_err)?.permissions();
        let mut file = Self::parse(path, &text, target)?;
        file.permissions = Some(permissions);
        Ok(file)
    }

    /// Split `text` at `target`. A commented-out `// target` from an
    /// earlier run also counts.
    pub fn parse(path: &Path, text: &str, target: &str) -> Result<Self, WildcardError> {
        let commented = format!("// {}", target);
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut found = false;
        for line in text.lines() {
            if line == target || line == commented {
                found = true;
                continue;
            }
            if found {
                after.push(line.to_string());
            } else {
                before.push(line.to_string());
            }
        }
        if !found {
            return Err(WildcardError::ImportLineNotFound {
                path: path.display().to_string(),
                line: target.to_string(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            permissions: None,
            before,
            target: target.to_string(),
            after,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File content with `line` in place of the import. Always ends with a
    /// single newline.
    pub fn render(&self, line: &str) -> String {
        let mut lines: Vec<&str> = self.before.iter().map(String::as_str).collect();
        lines.push(line);
        lines.extend(self.after.iter().map(String::as_str));
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    pub fn write(&self, line: &str) -> Result<(), WildcardError> {
        let io_err = |source| WildcardError::Io {
            path: self.path.display().to_string(),
            source,
        };
        fs::write(&self.path, self.render(line)).map_err(io_err)?;
        if let Some(permissions) = &self.permissions {
            fs::set_permissions(&self.path, permissions.clone()).map_err(io_err)?;
        }
        Ok(())
    }

    pub fn write_original(&self) -> Result<(), WildcardError> {
        self.write(&self.target)
    }

    pub fn write_commented(&self) -> Result<(), WildcardError> {
        self.write(&format!("// {}", self.target))
    }
}

/// Names reported as `not found: type|value N` in build output, sorted.
pub fn scan_not_found(output: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(output);
    let names: BTreeSet<String> = text
        .lines()
        .map(str::trim)
        .filter_map(|line| NOT_FOUND_LINE.captures(line))
        .map(|m| m[3].to_string())
        .collect();
    names.into_iter().collect()
}

/// `import p.N` for one name, `import p.{A, B}` for several.
pub fn make_import_line(prefix: &str, symbols: &[String]) -> Result<String, WildcardError> {
    if prefix.is_empty() {
        return Err(WildcardError::EmptyPrefix);
    }
    let mut symbols: Vec<&str> = symbols.iter().map(String::as_str).collect();
    symbols.sort_unstable();
    symbols.dedup();
    match symbols.as_slice() {
        [] => Err(WildcardError::NoSymbols),
        [one] => Ok(format!("import {}.{}", prefix, one)),
        many => Ok(format!("import {}.{{{}}}", prefix, many.join(", "))),
    }
}

pub struct WildcardFixer<B: BuildTool> {
    build: B,
}

impl<B: BuildTool> WildcardFixer<B> {
    pub fn new(build: B) -> Self {
        Self { build }
    }

    /// Replace `import PREFIX._` in `filename` with the names it provides,
    /// building `rule_label` to find them. Returns the names, sorted.
    pub fn fix(&self, rule_label: &str, filename: &Path, import_prefix: &str) -> Result<Vec<String>, WildcardError> {
        let target = format!("import {}._", import_prefix);
        let file = TextFile::load(filename, &target)?;
        self.fix_file(rule_label, &file, import_prefix)
    }

    fn fix_file(&self, rule_label: &str, file: &TextFile, import_prefix: &str) -> Result<Vec<String>, WildcardError> {
        let targets = [rule_label.to_string()];
        let mut completion: BTreeSet<String> = BTreeSet::new();

        file.write_original()?;
        let first = self.build.build(&targets)?;
        if !first.success() {
            return Err(WildcardError::MustBuildFirst {
                label: rule_label.to_string(),
                output: first.text(),
            });
        }

        file.write_commented()?;
        let mut iteration = 1;
        loop {
            let out = self.build.build(&targets)?;
            if out.success() {
                return Ok(completion.into_iter().collect());
            }
            tracing::info!(
                ">>> fixing {} [{}] (iteration {})",
                file.path().display(),
                import_prefix,
                iteration
            );
            tracing::debug!(">>> {}", out.text());

            let before = completion.len();
            completion.extend(scan_not_found(&out.output));
            if completion.len() == before {
                return Err(WildcardError::NoProgress {
                    symbols: completion.into_iter().collect(),
                });
            }

            let names: Vec<String> = completion.iter().cloned().collect();
            file.write(&make_import_line(import_prefix, &names)?)?;
            iteration += 1;
        }
    }
}
