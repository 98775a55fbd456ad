//! A minimal BUILD file editor.
//!
//! Only top-level rule calls, their `name` attribute and their `deps` list
//! are understood. Everything else in the file is carried through as text,
//! so a file that is loaded and saved without edits is byte-identical.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec;
use crate::label::Label;

/// Build file names, in lookup order.
pub const BUILD_FILE_NAMES: &[&str] = &["BUILD.bazel", "BUILD"];

const KEEP_COMMENT: &str = "# keep";

#[derive(Debug, Error)]
pub enum EditError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: rule not found: {name}")]
    RuleNotFound { path: String, name: String },
    #[error("{path}: deps of {name} is not a list")]
    UnsupportedDeps { path: String, name: String },
    #[error("{rule}: no such dep: {dep}")]
    DepNotFound { rule: String, dep: String },
    #[error("unsupported command: {0:?}")]
    UnsupportedCommand(String),
    #[error("no BUILD file found for package {0:?}")]
    NoBuildFile(String),
    #[error("invalid label {0:?}")]
    InvalidLabel(String),
}

/// One BUILD-file edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Edit {
    AddDep { target: Label, dep: Label, keep: bool },
    RemoveDep { target: Label, dep: Label },
    AddSingleCommand { target: Label, command: String },
    CommentDep { target: Label, dep: Label, comment: String },
}

impl Edit {
    pub fn target(&self) -> &Label {
        match self {
            Edit::AddDep { target, .. }
            | Edit::RemoveDep { target, .. }
            | Edit::AddSingleCommand { target, .. }
            | Edit::CommentDep { target, .. } => target,
        }
    }

    /// buildozer `-f` lines for this edit.
    pub fn to_commands(&self) -> Vec<String> {
        match self {
            Edit::AddDep { target, dep, keep } => {
                let mut out = vec![format!("add deps {}|{}", dep, target)];
                if *keep {
                    out.push(format!("comment deps {} keep|{}", dep, target));
                }
                out
            }
            Edit::RemoveDep { target, dep } => vec![format!("remove deps {}|{}", dep, target)],
            Edit::AddSingleCommand { target, command } => vec![format!("{}|{}", command, target)],
            Edit::CommentDep { target, dep, comment } => {
                vec![format!("comment deps {} {}|{}", dep, comment, target)]
            }
        }
    }
}

/// An entry of a `deps` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEntry {
    /// Expression text, quotes included.
    pub expr: String,
    /// Trailing comment, `#` included.
    pub comment: Option<String>,
}

impl DepEntry {
    pub fn new(value: &str, keep: bool) -> Self {
        Self {
            expr: format!("\"{}\"", value),
            comment: keep.then(|| KEEP_COMMENT.to_string()),
        }
    }

    /// The string value, when the expression is a plain string literal.
    pub fn value(&self) -> Option<&str> {
        let expr = self.expr.trim();
        for quote in ['"', '\''] {
            if expr.len() >= 2 && expr.starts_with(quote) && expr.ends_with(quote) {
                let inner = &expr[1..expr.len() - 1];
                if !inner.contains(quote) {
                    return Some(inner);
                }
            }
        }
        None
    }

    pub fn has_keep_comment(&self) -> bool {
        self.comment
            .as_deref()
            .map(|c| c.trim_start_matches('#').trim() == "keep")
            .unwrap_or(false)
    }

    pub fn has_comment(&self, token: &str) -> bool {
        self.comment.as_deref().map(|c| c.trim() == token).unwrap_or(false)
    }
}

/// True when an entry is not managed by the editor: it is marked
/// `# keep`, or it is not a string literal holding a label.
pub fn should_keep(entry: &DepEntry) -> bool {
    if entry.has_keep_comment() {
        return true;
    }
    match entry.value() {
        Some(value) => Label::parse(value).is_err(),
        None => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ListItem {
    Dep(DepEntry),
    Comment(String),
}

/// A rule call located in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRef {
    pub kind: String,
    pub name: String,
    /// Byte offset of the rule kind.
    pub start: usize,
    /// Byte offset one past the closing parenthesis.
    pub end: usize,
}

#[derive(Debug, Clone)]
struct Attr {
    name: String,
    start: usize,
    value_start: usize,
    value_end: usize,
    comma: Option<usize>,
}

#[derive(Debug, Clone)]
struct Call {
    kind: String,
    start: usize,
    close: usize,
    attrs: Vec<Attr>,
}

impl Call {
    fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name == name)
    }
}

/// A loaded BUILD file.
#[derive(Debug, Clone)]
pub struct BuildFile {
    path: PathBuf,
    pkg: String,
    content: String,
    modified: bool,
}

impl BuildFile {
    pub fn load(path: &Path, pkg: &str) -> Result<Self, EditError> {
        let content = fs::read_to_string(path).map_err(|source| EditError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(content, path, pkg))
    }

    pub fn parse(content: impl Into<String>, path: &Path, pkg: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            pkg: pkg.to_string(),
            content: content.into(),
            modified: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pkg(&self) -> &str {
        &self.pkg
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    fn calls(&self) -> Vec<Call> {
        scan_calls(&self.content)
    }

    fn rule_name(&self, call: &Call) -> Option<String> {
        let attr = call.attr("name")?;
        let entry = DepEntry {
            expr: self.content[attr.value_start..attr.value_end].to_string(),
            comment: None,
        };
        entry.value().map(str::to_string)
    }

    /// All named rules, in file order.
    pub fn rules(&self) -> Vec<RuleRef> {
        self.calls()
            .iter()
            .filter_map(|call| {
                self.rule_name(call).map(|name| RuleRef {
                    kind: call.kind.clone(),
                    name,
                    start: call.start,
                    end: call.close + 1,
                })
            })
            .collect()
    }

    pub fn find_rule(&self, name: &str) -> Result<RuleRef, EditError> {
        self.rules()
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| self.not_found(name))
    }

    fn not_found(&self, name: &str) -> EditError {
        EditError::RuleNotFound {
            path: self.path.display().to_string(),
            name: name.to_string(),
        }
    }

    fn find_call(&self, name: &str) -> Result<Call, EditError> {
        self.calls()
            .into_iter()
            .find(|c| self.rule_name(c).as_deref() == Some(name))
            .ok_or_else(|| self.not_found(name))
    }

    /// Location of the rule's `deps` list: the attribute and the index of
    /// the closing bracket.
    fn deps_list(&self, call: &Call, name: &str) -> Result<Option<(Attr, usize)>, EditError> {
        let Some(attr) = call.attr("deps") else {
            return Ok(None);
        };
        let b = self.content.as_bytes();
        let unsupported = || EditError::UnsupportedDeps {
            path: self.path.display().to_string(),
            name: name.to_string(),
        };
        if b.get(attr.value_start) != Some(&b'[') {
            return Err(unsupported());
        }
        let close = matching_close(b, attr.value_start).ok_or_else(unsupported)?;
        Ok(Some((attr.clone(), close)))
    }

    /// The rule's deps entries; empty when it has no `deps`.
    pub fn deps(&self, name: &str) -> Result<Vec<DepEntry>, EditError> {
        let call = self.find_call(name)?;
        Ok(match self.deps_list(&call, name)? {
            Some((attr, close)) => parse_list_items(&self.content, attr.value_start, close)
                .into_iter()
                .filter_map(|item| match item {
                    ListItem::Dep(d) => Some(d),
                    ListItem::Comment(_) => None,
                })
                .collect(),
            None => Vec::new(),
        })
    }

    fn edit_deps<F>(&mut self, name: &str, f: F) -> Result<bool, EditError>
    where
        F: FnOnce(&mut Vec<ListItem>) -> Result<bool, EditError>,
    {
        let call = self.find_call(name)?;
        match self.deps_list(&call, name)? {
            Some((attr, close)) => {
                let mut items = parse_list_items(&self.content, attr.value_start, close);
                if !f(&mut items)? {
                    return Ok(false);
                }
                let indent = line_indent(&self.content, attr.start);
                let rendered = render_list(&items, &indent);
                self.content.replace_range(attr.value_start..close + 1, &rendered);
            }
            None => {
                let mut items = Vec::new();
                if !f(&mut items)? {
                    return Ok(false);
                }
                self.insert_deps_attr(&call, &items);
            }
        }
        self.modified = true;
        Ok(true)
    }

    fn insert_deps_attr(&mut self, call: &Call, items: &[ListItem]) {
        let indent = call
            .attrs
            .first()
            .map(|a| line_indent(&self.content, a.start))
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| "    ".to_string());
        let rendered = format!("{}deps = {},", indent, render_list(items, &indent));

        let Some(last) = call.attrs.last() else {
            let text = format!("\n{}\n", rendered);
            self.content.insert_str(call.close, &text);
            return;
        };
        let (anchor, prefix) = match last.comma {
            Some(comma) => (comma + 1, String::new()),
            None => (last.value_end, ",".to_string()),
        };
        let mut text = format!("{}\n{}", prefix, rendered);
        if !self.content[anchor..call.close].contains('\n') {
            text.push('\n');
        }
        self.content.insert_str(anchor, &text);
    }

    fn dep_text(&self, dep: &Label) -> String {
        if dep.relative || (dep.repo.is_empty() && dep.pkg == self.pkg) {
            format!(":{}", dep.name)
        } else {
            dep.to_string()
        }
    }

    /// Add `dep` to the rule's deps in sorted position. An existing entry
    /// only gains `# keep` when asked. Returns whether the file changed.
    pub fn append_dep(&mut self, name: &str, dep: &Label, keep: bool) -> Result<bool, EditError> {
        let text = self.dep_text(dep);
        let pkg = self.pkg.clone();
        self.edit_deps(name, |items| {
            for item in items.iter_mut() {
                if let ListItem::Dep(entry) = item {
                    if same_dep(&pkg, entry, dep) {
                        if keep && !entry.has_keep_comment() {
                            entry.comment = Some(KEEP_COMMENT.to_string());
                            return Ok(true);
                        }
                        return Ok(false);
                    }
                }
            }
            let position = items
                .iter()
                .position(|item| match item {
                    ListItem::Dep(entry) => entry
                        .value()
                        .map(|v| compare_deps(v, &text) == Ordering::Greater)
                        .unwrap_or(false),
                    ListItem::Comment(_) => false,
                })
                .unwrap_or(items.len());
            items.insert(position, ListItem::Dep(DepEntry::new(&text, keep)));
            Ok(true)
        })
    }

    /// Remove every entry naming `dep`.
    pub fn remove_dep(&mut self, name: &str, dep: &Label) -> Result<bool, EditError> {
        let pkg = self.pkg.clone();
        self.edit_deps(name, |items| {
            let before = items.len();
            items.retain(|item| match item {
                ListItem::Dep(entry) => !same_dep(&pkg, entry, dep),
                ListItem::Comment(_) => true,
            });
            Ok(items.len() != before)
        })
    }

    /// Set the trailing comment of the entry naming `dep`.
    pub fn comment_dep(&mut self, name: &str, dep: &Label, comment: &str) -> Result<bool, EditError> {
        let pkg = self.pkg.clone();
        let comment = format!("# {}", comment.trim_start_matches('#').trim());
        self.edit_deps(name, |items| {
            for item in items.iter_mut() {
                if let ListItem::Dep(entry) = item {
                    if same_dep(&pkg, entry, dep) {
                        if entry.comment.as_deref() == Some(comment.as_str()) {
                            return Ok(false);
                        }
                        entry.comment = Some(comment);
                        return Ok(true);
                    }
                }
            }
            Err(EditError::DepNotFound {
                rule: name.to_string(),
                dep: dep.to_string(),
            })
        })
    }

    /// Apply a buildozer-style command: `add deps D...`, `remove deps D...`
    /// or `comment deps D TEXT`.
    pub fn add_single_command(&mut self, name: &str, command: &str) -> Result<bool, EditError> {
        let fields: Vec<&str> = command.split_whitespace().collect();
        match fields.as_slice() {
            ["add", "deps", deps @ ..] if !deps.is_empty() => {
                let mut changed = false;
                for dep in deps {
                    changed |= self.append_dep(name, &parse_dep(dep)?, false)?;
                }
                Ok(changed)
            }
            ["remove", "deps", deps @ ..] if !deps.is_empty() => {
                let mut changed = false;
                for dep in deps {
                    changed |= self.remove_dep(name, &parse_dep(dep)?)?;
                }
                Ok(changed)
            }
            ["comment", "deps", dep, text @ ..] if !text.is_empty() => {
                self.comment_dep(name, &parse_dep(dep)?, &text.join(" "))
            }
            _ => Err(EditError::UnsupportedCommand(command.to_string())),
        }
    }

    /// Write the file with mode 0o644.
    pub fn save(&self) -> Result<(), EditError> {
        codec::write_with_mode(&self.path, self.content.as_bytes()).map_err(|source| EditError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Apply one edit to the rule it targets.
    pub fn apply(&mut self, edit: &Edit) -> Result<bool, EditError> {
        let name = edit.target().name.clone();
        match edit {
            Edit::AddDep { dep, keep, .. } => self.append_dep(&name, dep, *keep),
            Edit::RemoveDep { dep, .. } => self.remove_dep(&name, dep),
            Edit::AddSingleCommand { command, .. } => self.add_single_command(&name, command),
            Edit::CommentDep { dep, comment, .. } => self.comment_dep(&name, dep, comment),
        }
    }
}

/// Whether `entry` names `dep`, relative labels resolved against `pkg`.
fn same_dep(pkg: &str, entry: &DepEntry, dep: &Label) -> bool {
    let want = dep.abs("", pkg);
    entry
        .value()
        .and_then(|v| Label::parse(v).ok())
        .map(|l| l.abs("", pkg) == want)
        .unwrap_or(false)
}

fn parse_dep(s: &str) -> Result<Label, EditError> {
    Label::parse(s).map_err(|_| EditError::InvalidLabel(s.to_string()))
}

/// Path of the BUILD file for `pkg` under the workspace.
pub fn find_build_file(workspace: &Path, pkg: &str) -> Option<PathBuf> {
    BUILD_FILE_NAMES
        .iter()
        .map(|name| workspace.join(pkg).join(name))
        .find(|p| p.is_file())
}

/// Apply edits in-process, one load and save per BUILD file. Returns the
/// files that changed.
pub fn apply_edits(workspace: &Path, edits: &[Edit]) -> Result<Vec<PathBuf>, EditError> {
    let mut by_pkg: BTreeMap<&str, Vec<&Edit>> = BTreeMap::new();
    for edit in edits {
        by_pkg.entry(edit.target().pkg.as_str()).or_default().push(edit);
    }

    let mut changed = Vec::new();
    for (pkg, edits) in by_pkg {
        let path = find_build_file(workspace, pkg).ok_or_else(|| EditError::NoBuildFile(pkg.to_string()))?;
        let mut file = BuildFile::load(&path, pkg)?;
        for edit in edits {
            if file.apply(edit)? {
                tracing::info!("{}: {:?}", path.display(), edit.to_commands());
            }
        }
        if file.is_modified() {
            file.save()?;
            changed.push(path);
        }
    }
    Ok(changed)
}

/// Order of dep strings in a sorted list: `:local`, `//pkg`, `@repo`, then
/// anything else.
pub fn compare_deps(a: &str, b: &str) -> Ordering {
    fn rank(s: &str) -> u8 {
        if s.starts_with(':') {
            0
        } else if s.starts_with("//") {
            1
        } else if s.starts_with('@') {
            2
        } else {
            3
        }
    }
    rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
}

fn line_indent(text: &str, offset: usize) -> String {
    let line_start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    text[line_start..offset]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect()
}

fn render_list(items: &[ListItem], indent: &str) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    let mut out = String::from("[\n");
    for item in items {
        out.push_str(indent);
        out.push_str("    ");
        match item {
            ListItem::Dep(entry) => {
                out.push_str(&entry.expr);
                out.push(',');
                if let Some(comment) = &entry.comment {
                    out.push_str("  ");
                    out.push_str(comment);
                }
            }
            ListItem::Comment(comment) => out.push_str(comment),
        }
        out.push('\n');
    }
    out.push_str(indent);
    out.push(']');
    out
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Index one past the end of the string literal starting at `i`.
fn skip_string(b: &[u8], i: usize) -> usize {
    let quote = b[i];
    let triple = i + 2 < b.len() && b[i + 1] == quote && b[i + 2] == quote;
    let mut j = if triple { i + 3 } else { i + 1 };
    while j < b.len() {
        match b[j] {
            b'\\' => j += 2,
            c if c == quote => {
                if !triple {
                    return j + 1;
                }
                if j + 2 < b.len() && b[j + 1] == quote && b[j + 2] == quote {
                    return j + 3;
                }
                j += 1;
            }
            b'\n' if !triple => return j,
            _ => j += 1,
        }
    }
    b.len()
}

/// Index of the newline ending the comment at `i`.
fn skip_comment(b: &[u8], i: usize) -> usize {
    b[i..].iter().position(|c| *c == b'\n').map(|p| i + p).unwrap_or(b.len())
}

/// Index of the bracket closing the one at `open`.
fn matching_close(b: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < b.len() {
        match b[i] {
            b'#' => i = skip_comment(b, i),
            b'"' | b'\'' => i = skip_string(b, i),
            b'(' | b'[' | b'{' => {
                depth += 1;
                i += 1;
            }
            b')' | b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

fn scan_calls(text: &str) -> Vec<Call> {
    let b = text.as_bytes();
    let mut calls = Vec::new();
    let mut depth = 0i32;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'#' => i = skip_comment(b, i),
            b'"' | b'\'' => i = skip_string(b, i),
            b'(' | b'[' | b'{' => {
                depth += 1;
                i += 1;
            }
            b')' | b']' | b'}' => {
                depth -= 1;
                i += 1;
            }
            c if depth == 0
                && (c.is_ascii_alphabetic() || c == b'_')
                && (i == 0 || !is_ident_char(b[i - 1])) =>
            {
                let start = i;
                let mut j = i;
                while j < b.len() && (is_ident_char(b[j]) || b[j] == b'.') {
                    j += 1;
                }
                let mut k = j;
                while k < b.len() && (b[k] == b' ' || b[k] == b'\t') {
                    k += 1;
                }
                if k < b.len() && b[k] == b'(' {
                    if let Some(close) = matching_close(b, k) {
                        calls.push(Call {
                            kind: text[start..j].to_string(),
                            start,
                            close,
                            attrs: scan_attrs(text, k + 1, close),
                        });
                        i = close + 1;
                        continue;
                    }
                }
                i = j;
            }
            _ => i += 1,
        }
    }
    calls
}

/// Scan one argument value from `start`. Returns the end of its last
/// significant character and the index of the terminating comma (or
/// `limit`).
fn scan_value(b: &[u8], start: usize, limit: usize) -> (usize, usize) {
    let mut depth = 0i32;
    let mut last = start;
    let mut i = start;
    while i < limit {
        match b[i] {
            b'#' => i = skip_comment(b, i),
            b'"' | b'\'' => {
                i = skip_string(b, i).min(limit);
                last = i;
            }
            b'(' | b'[' | b'{' => {
                depth += 1;
                i += 1;
                last = i;
            }
            b')' | b']' | b'}' => {
                depth -= 1;
                i += 1;
                last = i;
            }
            b',' if depth == 0 => return (last, i),
            c if c.is_ascii_whitespace() => i += 1,
            _ => {
                i += 1;
                last = i;
            }
        }
    }
    (last, limit)
}

fn scan_attrs(text: &str, from: usize, to: usize) -> Vec<Attr> {
    let b = text.as_bytes();
    let mut attrs = Vec::new();
    let mut i = from;
    while i < to {
        if b[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if b[i] == b'#' {
            i = skip_comment(b, i);
            continue;
        }
        let start = i;
        let mut j = i;
        while j < to && is_ident_char(b[j]) {
            j += 1;
        }
        let mut k = j;
        while k < to && (b[k] == b' ' || b[k] == b'\t') {
            k += 1;
        }
        let keyword = j > start && k < to && b[k] == b'=' && b.get(k + 1) != Some(&b'=');
        let value_start = if keyword {
            let mut v = k + 1;
            while v < to && b[v].is_ascii_whitespace() {
                v += 1;
            }
            v
        } else {
            start
        };
        let (value_end, stop) = scan_value(b, value_start, to);
        if keyword {
            attrs.push(Attr {
                name: text[start..j].to_string(),
                start,
                value_start,
                value_end,
                comma: (stop < to).then_some(stop),
            });
        }
        i = stop + 1;
    }
    attrs
}

fn parse_list_items(text: &str, open: usize, close: usize) -> Vec<ListItem> {
    let b = text.as_bytes();
    let mut items = Vec::new();
    let mut expr_start: Option<usize> = None;
    let mut expr_end = open + 1;
    let mut depth = 0i32;
    // the previous entry's comma is on the current line
    let mut same_line = false;
    let mut i = open + 1;

    while i < close {
        match b[i] {
            b'\n' => {
                if expr_start.is_none() {
                    same_line = false;
                }
                i += 1;
            }
            c if c.is_ascii_whitespace() => i += 1,
            b'#' => {
                let end = skip_comment(b, i).min(close);
                if depth > 0 {
                    i = end;
                    continue;
                }
                let comment = text[i..end].trim_end().to_string();
                if let Some(start) = expr_start.take() {
                    items.push(ListItem::Dep(DepEntry {
                        expr: text[start..expr_end].to_string(),
                        comment: Some(comment),
                    }));
                } else if same_line {
                    if let Some(ListItem::Dep(entry)) = items.last_mut() {
                        entry.comment = Some(comment);
                    }
                } else {
                    items.push(ListItem::Comment(comment));
                }
                same_line = false;
                i = end;
            }
            b',' if depth == 0 => {
                if let Some(start) = expr_start.take() {
                    items.push(ListItem::Dep(DepEntry {
                        expr: text[start..expr_end].to_string(),
                        comment: None,
                    }));
                    same_line = true;
                }
                i += 1;
            }
            b'"' | b'\'' => {
                expr_start.get_or_insert(i);
                i = skip_string(b, i).min(close);
                expr_end = i;
            }
            b'(' | b'[' | b'{' => {
                expr_start.get_or_insert(i);
                depth += 1;
                i += 1;
                expr_end = i;
            }
            b')' | b']' | b'}' => {
                depth -= 1;
                i += 1;
                expr_end = i;
            }
            _ => {
                expr_start.get_or_insert(i);
                i += 1;
                expr_end = i;
            }
        }
    }
    if let Some(start) = expr_start {
        items.push(ListItem::Dep(DepEntry {
            expr: text[start..expr_end].to_string(),
            comment: None,
        }));
    }
    items
}
