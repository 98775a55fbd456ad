//! Scanning build tool output into typed diagnostics.
//!
//! Output is read line by line after ANSI escapes are stripped. A
//! compiler header (`ERROR: ... scalac failed ... (from target T)`) sets the
//! compilation unit for the events that follow it. A missing-symbol error is
//! held back until the next event, header or end of input so that a
//! following `This symbol is required by ...` line can complete it.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::label::Label;

lazy_static! {
    static ref ANSI: Regex = Regex::new(
        r"[\x1B\x{9B}][\[\]()#;?]*(?:(?:(?:[a-zA-Z\d]*(?:;[a-zA-Z\d]*)*)?\x07)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PRZcf-ntqry=><~]))"
    )
    .unwrap();
    static ref UNIT_HEADER: Regex =
        Regex::new(r"^ERROR: ([^:]+):.*scalac failed.*\(from target ([^\)]+)\).*$").unwrap();
    static ref NOT_FOUND: Regex =
        Regex::new(r"^([^:]+):(\d+): error: not found: (type|value|object) (.*)$").unwrap();
    static ref CLASS_NOT_FOUND: Regex =
        Regex::new(r"^([^:]+):(\d+): error: Class (.*) not found - continuing with a stub\.$").unwrap();
    static ref SYMBOL_MISSING: Regex =
        Regex::new(r"^([^:]+):(\d+): error: Symbol '(.*)' is missing from the classpath\.$").unwrap();
    static ref SYMBOL_MISSING_NO_FILE: Regex =
        Regex::new(r"^error: Symbol '(.*)' is missing from the classpath\.$").unwrap();
    static ref REQUIRED_BY: Regex = Regex::new(r"^This symbol is required by '(.*)'\.$").unwrap();
    static ref NOT_A_MEMBER: Regex = Regex::new(
        r"^([^:]+):(\d+): error: .* object ([A-Z][_a-zA-Z0-9]*) is not a member of package (.*)$"
    )
    .unwrap();
    static ref UNUSED_DEP: Regex = Regex::new(
        r"^(?:warning|error): Target '(.*)' is specified as a dependency to (.*) but isn't used, please remove it from the deps\.$"
    )
    .unwrap();
    static ref NO_SUCH_TARGET: Regex = Regex::new(
        r"^ERROR: ([^:]+):(\d+):(\d+): no such target '(.*)': .* and referenced by '(.*)'$"
    )
    .unwrap();
    static ref RECOMMENDED_EDIT: Regex = Regex::new(r"^buildozer '(.*)' (.*)$").unwrap();
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What kind of name a `not found` error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotFoundKind {
    Type,
    Value,
    Object,
    Class,
}

impl NotFoundKind {
    fn parse(s: &str) -> Self {
        match s {
            "value" => NotFoundKind::Value,
            "object" => NotFoundKind::Object,
            "class" => NotFoundKind::Class,
            _ => NotFoundKind::Type,
        }
    }
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotFoundKind::Type => "type",
            NotFoundKind::Value => "value",
            NotFoundKind::Object => "object",
            NotFoundKind::Class => "class",
        };
        f.write_str(s)
    }
}

/// A recognized diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Diagnostic {
    NotFound {
        file: String,
        line: u32,
        kind: NotFoundKind,
        name: String,
    },
    MissingSymbol {
        file: Option<String>,
        line: Option<u32>,
        full_name: String,
        required_by: Option<String>,
    },
    NotAMemberOfPackage {
        file: String,
        line: u32,
        symbol: String,
        package: String,
    },
    UnusedDep {
        target: Label,
        dep: Label,
    },
    NoSuchTarget {
        file: String,
        line: u32,
        col: u32,
        missing_dep: Label,
        referenced_by: Label,
    },
    RecommendedEdit {
        command: String,
        target: Label,
    },
}

impl Diagnostic {
    /// Identity used to drop repeats.
    pub fn id(&self) -> String {
        match self {
            Diagnostic::NotFound { file, name, .. } => format!("nf:filename={},type:{}", file, name),
            Diagnostic::MissingSymbol {
                file,
                full_name,
                required_by,
                ..
            } => format!(
                "ms:filename={},missingType={},requiredType={}",
                file.as_deref().unwrap_or(""),
                full_name,
                required_by.as_deref().unwrap_or("")
            ),
            Diagnostic::NotAMemberOfPackage {
                file,
                symbol,
                package,
                ..
            } => format!("nam:filename={},symbol={},package={}", file, symbol, package),
            Diagnostic::UnusedDep { target, dep } => format!("ud:target={},dep={}", target, dep),
            Diagnostic::NoSuchTarget {
                file,
                missing_dep,
                referenced_by,
                ..
            } => format!("nst:filename={},dep:{},from:{}", file, missing_dep, referenced_by),
            Diagnostic::RecommendedEdit { command, target } => {
                format!("br:command:{},from:{}", command, target)
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::NotFound { file, line, kind, name } => {
                write!(f, "{}:{}: not found: {} {}", file, line, kind, name)
            }
            Diagnostic::MissingSymbol {
                file,
                line,
                full_name,
                required_by,
            } => {
                if let Some(file) = file {
                    write!(f, "{}:{}: ", file, line.unwrap_or(0))?;
                }
                write!(f, "missing symbol {}", full_name)?;
                if let Some(by) = required_by {
                    write!(f, " (required by {})", by)?;
                }
                Ok(())
            }
            Diagnostic::NotAMemberOfPackage {
                file,
                line,
                symbol,
                package,
            } => write!(f, "{}:{}: {} is not a member of package {}", file, line, symbol, package),
            Diagnostic::UnusedDep { target, dep } => write!(f, "{}: unused dep {}", target, dep),
            Diagnostic::NoSuchTarget {
                file,
                line,
                col,
                missing_dep,
                referenced_by,
            } => write!(
                f,
                "{}:{}:{}: no such target {} (referenced by {})",
                file, line, col, missing_dep, referenced_by
            ),
            Diagnostic::RecommendedEdit { command, target } => {
                write!(f, "buildozer '{}' {}", command, target)
            }
        }
    }
}

/// A diagnostic and the compilation unit it was reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub unit: Option<Label>,
    pub diagnostic: Diagnostic,
}

pub fn strip_ansi(s: &str) -> Cow<'_, str> {
    ANSI.replace_all(s, "")
}

fn number(s: &str) -> u32 {
    s.parse().unwrap_or(0)
}

fn parse_label(s: &str, what: &str) -> Option<Label> {
    match Label::parse(s) {
        Ok(label) => Some(label),
        Err(e) => {
            tracing::warn!("failed to parse {} label {:?}: {}", what, s, e);
            None
        }
    }
}

/// Line-oriented diagnostic scanner.
#[derive(Debug, Default)]
pub struct Scanner {
    unit: Option<Label>,
    pending: Option<(Option<Label>, Diagnostic)>,
    events: Vec<Event>,
    seen: HashSet<String>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a known compilation unit, e.g. the label of a failed action.
    pub fn with_unit(unit: Label) -> Self {
        Self {
            unit: Some(unit),
            ..Self::default()
        }
    }

    fn emit(&mut self, unit: Option<Label>, diagnostic: Diagnostic) {
        if self.seen.insert(diagnostic.id()) {
            tracing::debug!("matched {}", diagnostic.id());
            self.events.push(Event { unit, diagnostic });
        }
    }

    fn flush_pending(&mut self) {
        if let Some((unit, diagnostic)) = self.pending.take() {
            self.emit(unit, diagnostic);
        }
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        self.flush_pending();
        let unit = self.unit.clone();
        self.emit(unit, diagnostic);
    }

    fn hold_missing(&mut self, file: Option<String>, line: Option<u32>, symbol: &str) {
        // `type a.b.C` or `term a.b.c`
        let fields: Vec<&str> = symbol.split_whitespace().collect();
        if fields.len() != 2 {
            return;
        }
        self.flush_pending();
        self.pending = Some((
            self.unit.clone(),
            Diagnostic::MissingSymbol {
                file,
                line,
                full_name: fields[1].to_string(),
                required_by: None,
            },
        ));
    }

    /// Feed one line of output.
    pub fn scan_line(&mut self, raw: &str) {
        let stripped = strip_ansi(raw);
        let line = stripped.trim();
        if line.is_empty() {
            return;
        }

        if let Some(m) = UNIT_HEADER.captures(line) {
            self.flush_pending();
            let target = m[2].trim_end_matches("_testlib");
            self.unit = parse_label(target, "unit");
            return;
        }
        if let Some(m) = NOT_FOUND.captures(line) {
            self.push(Diagnostic::NotFound {
                file: m[1].to_string(),
                line: number(&m[2]),
                kind: NotFoundKind::parse(&m[3]),
                name: m[4].to_string(),
            });
            return;
        }
        if let Some(m) = CLASS_NOT_FOUND.captures(line) {
            self.push(Diagnostic::NotFound {
                file: m[1].to_string(),
                line: number(&m[2]),
                kind: NotFoundKind::Class,
                name: m[3].to_string(),
            });
            return;
        }
        if let Some(m) = SYMBOL_MISSING.captures(line) {
            self.hold_missing(Some(m[1].to_string()), Some(number(&m[2])), &m[3]);
            return;
        }
        if let Some(m) = SYMBOL_MISSING_NO_FILE.captures(line) {
            self.hold_missing(None, None, &m[1]);
            return;
        }
        if let Some(m) = REQUIRED_BY.captures(line) {
            if let Some((_, Diagnostic::MissingSymbol { required_by, .. })) = self.pending.as_mut() {
                *required_by = m[1].split_whitespace().last().map(str::to_string);
            }
            return;
        }
        if let Some(m) = NOT_A_MEMBER.captures(line) {
            self.push(Diagnostic::NotAMemberOfPackage {
                file: m[1].to_string(),
                line: number(&m[2]),
                symbol: m[3].to_string(),
                package: m[4].to_string(),
            });
            return;
        }
        if let Some(m) = UNUSED_DEP.captures(line) {
            if let (Some(dep), Some(target)) = (parse_label(&m[1], "dep"), parse_label(&m[2], "target")) {
                self.push(Diagnostic::UnusedDep { target, dep });
            }
            return;
        }
        if let Some(m) = NO_SUCH_TARGET.captures(line) {
            if let (Some(missing_dep), Some(referenced_by)) =
                (parse_label(&m[4], "dep"), parse_label(&m[5], "from"))
            {
                self.push(Diagnostic::NoSuchTarget {
                    file: m[1].to_string(),
                    line: number(&m[2]),
                    col: number(&m[3]),
                    missing_dep,
                    referenced_by,
                });
            }
            return;
        }
        if let Some(m) = RECOMMENDED_EDIT.captures(line) {
            if let Some(target) = parse_label(&m[2], "to") {
                self.push(Diagnostic::RecommendedEdit {
                    command: m[1].to_string(),
                    target,
                });
            }
        }
    }

    /// Feed a block of output.
    pub fn scan_text(&mut self, text: &str) {
        for line in text.lines() {
            self.scan_line(line);
        }
    }

    pub fn finish(mut self) -> Vec<Event> {
        self.flush_pending();
        self.events
    }
}

/// Scan build output.
pub fn scan(output: &[u8]) -> Vec<Event> {
    let mut scanner = Scanner::new();
    scanner.scan_text(&String::from_utf8_lossy(output));
    scanner.finish()
}

/// Scan a file of build output under a known unit.
pub fn scan_file(path: &Path, unit: Option<Label>) -> Result<Vec<Event>, ScanError> {
    let data = fs::read(path).map_err(|source| ScanError::Io {
        path: path.display().to_string(),
        source,
    })?;
    tracing::debug!("--- SCAN: {}", path.display());
    let mut scanner = match unit {
        Some(unit) => Scanner::with_unit(unit),
        None => Scanner::new(),
    };
    scanner.scan_text(&String::from_utf8_lossy(&data));
    Ok(scanner.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_under_unit_header() {
        let output = "\
ERROR: /ws/a/BUILD.bazel:3:14: scala @//a:lib failed: (Exit 1): scalac failed: error executing command (from target //a:lib_testlib) bazel-out/bin
a/A.scala:7: error: not found: type Foo
a/A.scala:9: error: not found: value bar
";
        let events = scan(output.as_bytes());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].unit.as_ref().map(|l| l.to_string()).as_deref(), Some("//a:lib"));
        assert_eq!(
            events[0].diagnostic,
            Diagnostic::NotFound {
                file: "a/A.scala".to_string(),
                line: 7,
                kind: NotFoundKind::Type,
                name: "Foo".to_string(),
            }
        );
        assert_eq!(events[1].diagnostic.id(), "nf:filename=a/A.scala,type:bar");
    }

    #[test]
    fn test_missing_symbol_with_required_by() {
        let output = "\
error: Symbol 'type com.google.protobuf.GeneratedMessageV3' is missing from the classpath.
This symbol is required by 'class com.foo.Msg'.
";
        let events = scan(output.as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].diagnostic,
            Diagnostic::MissingSymbol {
                file: None,
                line: None,
                full_name: "com.google.protobuf.GeneratedMessageV3".to_string(),
                required_by: Some("com.foo.Msg".to_string()),
            }
        );
    }

    #[test]
    fn test_missing_symbol_flushed_by_next_event() {
        let output = "\
a/A.scala:1: error: Symbol 'type x.Y' is missing from the classpath.
a/A.scala:2: error: not found: type Z
";
        let events = scan(output.as_bytes());
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0].diagnostic,
            Diagnostic::MissingSymbol { required_by: None, full_name, .. } if full_name == "x.Y"
        ));
    }

    #[test]
    fn test_missing_symbol_needs_two_fields() {
        let events = scan(b"error: Symbol 'weird' is missing from the classpath.\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_ansi_and_blank_lines() {
        let output = "\x1b[31mERROR: \x1b[0m/ws/BUILD:1:2: no such target '//x:gone': target 'gone' not declared in package 'x' and referenced by '//y:user'\n\n   \n";
        let events = scan(output.as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].diagnostic.id(), "nst:filename=/ws/BUILD,dep://x:gone,from://y:user");
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let output = "a/A.scala:7: error: not found: type Foo\na/A.scala:8: error: not found: type Foo\n";
        assert_eq!(scan(output.as_bytes()).len(), 1);
    }

    #[test]
    fn test_recommended_edit_and_unused_dep() {
        let output = "\
buildozer 'add deps //b' //a:lib
warning: Target '//c' is specified as a dependency to //a:lib but isn't used, please remove it from the deps.
";
        let events = scan(output.as_bytes());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].diagnostic.id(), "br:command:add deps //b,from://a:lib");
        assert_eq!(events[1].diagnostic.id(), "ud:target=//a:lib,dep=//c");
    }

    #[test]
    fn test_not_a_member_of_package() {
        let output = "a/A.scala:3: error: [rewritten by -quickfix] object Foo is not a member of package com.bar\n";
        let events = scan(output.as_bytes());
        assert_eq!(events[0].diagnostic.id(), "nam:filename=a/A.scala,symbol=Foo,package=com.bar");
    }
}
