//! Per-directory configuration from `# gazelle:NAME VALUE` directives.
//!
//! A [`Config`] is built for a directory by cloning its parent's config
//! ([`Config::child`]) and applying the directives found in the
//! directory's BUILD file, in order.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use globset::{GlobBuilder, GlobMatcher};
use lazy_static::lazy_static;
use phf::phf_map;
use regex::Regex;
use thiserror::Error;

use crate::buildfile::{should_keep, DepEntry};
use crate::label::Label;
use crate::resolve::ResolverRegistry;

/// Deps cleaners that `scala_deps_cleaner` may enable.
pub const DEPS_CLEANERS: &[&str] = &["unused_deps"];

lazy_static! {
    static ref DIRECTIVE_LINE: Regex = Regex::new(r"^#\s*gazelle:(\w+)\s*(.*)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectiveKind {
    ScalaRule,
    ResolveGlob,
    ResolveWith,
    ResolveFileSymbolName,
    FixWildcardImports,
    KindRewriteName,
    ResolveConflicts,
    DepsCleaner,
    Debug,
    LogLevel,
    GenerateBuildFiles,
}

static DIRECTIVES: phf::Map<&'static str, DirectiveKind> = phf_map! {
    "scala_rule" => DirectiveKind::ScalaRule,
    "resolve_glob" => DirectiveKind::ResolveGlob,
    "resolve_with" => DirectiveKind::ResolveWith,
    "resolve_file_symbol_name" => DirectiveKind::ResolveFileSymbolName,
    "scala_fix_wildcard_imports" => DirectiveKind::FixWildcardImports,
    "resolve_kind_rewrite_name" => DirectiveKind::KindRewriteName,
    "resolve_conflicts" => DirectiveKind::ResolveConflicts,
    "scala_deps_cleaner" => DirectiveKind::DepsCleaner,
    "scala_debug" => DirectiveKind::Debug,
    "scala_log_level" => DirectiveKind::LogLevel,
    "scala_generate_build_files" => DirectiveKind::GenerateBuildFiles,
};

/// Names of every directive understood here, sorted.
pub fn directive_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = DIRECTIVES.keys().copied().collect();
    names.sort_unstable();
    names
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid directive \"gazelle:{name} {value}\": {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn invalid(name: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// A `[+|-]VALUE` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub value: String,
    pub want: bool,
}

impl Intent {
    pub fn parse(token: &str) -> Self {
        if let Some(rest) = token.strip_prefix('-') {
            Self {
                value: rest.to_string(),
                want: false,
            }
        } else {
            Self {
                value: token.strip_prefix('+').unwrap_or(token).to_string(),
                want: true,
            }
        }
    }
}

fn glob(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

/// Settings of one rule kind from `scala_rule NAME PARAM VALUE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleConfig {
    pub name: String,
    pub implementation: String,
    pub deps: BTreeSet<String>,
    pub options: BTreeSet<String>,
    /// attr name → value → wanted
    pub attrs: BTreeMap<String, BTreeMap<String, bool>>,
    pub enabled: bool,
}

impl RuleConfig {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            implementation: name.to_string(),
            deps: BTreeSet::new(),
            options: BTreeSet::new(),
            attrs: BTreeMap::new(),
            enabled: true,
        }
    }

    fn parse_param(&mut self, param: &str, value: &str) -> Result<(), String> {
        let intent = Intent::parse(param);
        match intent.value.as_str() {
            "dep" | "deps" => {
                if intent.want {
                    self.deps.insert(value.to_string());
                } else {
                    self.deps.remove(value);
                }
            }
            "option" => {
                if intent.want {
                    self.options.insert(value.to_string());
                } else {
                    self.options.remove(value);
                }
            }
            "attr" => {
                let kv: Vec<&str> = value.split_whitespace().collect();
                let key = match kv.first() {
                    Some(k) => Intent::parse(k),
                    None => return Err(format!("malformed attr {:?}: missing attr name", value)),
                };
                if kv.len() == 1 {
                    if intent.want {
                        return Err(format!("malformed attr {:?}: missing attr value", value));
                    }
                    self.attrs.remove(&key.value);
                    return Ok(());
                }
                if intent.want {
                    self.attrs
                        .entry(key.value)
                        .or_default()
                        .insert(kv[1..].join(" "), key.want);
                } else {
                    self.attrs.remove(&key.value);
                }
            }
            "implementation" => self.implementation = value.to_string(),
            "enabled" => {
                self.enabled = value
                    .parse::<bool>()
                    .map_err(|e| format!("enabled {}: {}", value, e))?;
            }
            other => return Err(format!("unknown parameter {:?}", other)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ResolveGlob {
    lang: String,
    import: GlobMatcher,
    label: Label,
}

#[derive(Debug, Clone)]
struct ImplicitImport {
    lang: String,
    import: String,
    deps: Vec<String>,
}

#[derive(Debug, Clone)]
struct FileSymbolName {
    file: GlobMatcher,
    symbol: GlobMatcher,
    want: bool,
}

#[derive(Debug, Clone)]
enum FilePattern {
    Glob(GlobMatcher),
    Suffix(String),
}

impl FilePattern {
    fn matches(&self, filename: &str) -> bool {
        match self {
            FilePattern::Glob(m) => m.is_match(filename),
            FilePattern::Suffix(s) => filename.ends_with(s.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct FixWildcard {
    file: FilePattern,
    import: GlobMatcher,
    want: bool,
}

/// Rewrite of a label name: `%{name}` stands for the original name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRewrite {
    pub src: String,
    pub dst: String,
}

impl NameRewrite {
    pub fn rewrite(&self, from: &Label) -> Label {
        if self.src != from.name && self.src != "%{name}" {
            return from.clone();
        }
        let mut to = from.clone();
        to.name = self.dst.replace("%{name}", &from.name);
        to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugAnnotation {
    Imports,
    Exports,
    Deps,
    Rule,
    DepLabelOrigin,
}

impl DebugAnnotation {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "imports" => Some(DebugAnnotation::Imports),
            "exports" => Some(DebugAnnotation::Exports),
            "deps" => Some(DebugAnnotation::Deps),
            "rule" => Some(DebugAnnotation::Rule),
            "dep_label_origin" => Some(DebugAnnotation::DepLabelOrigin),
            _ => None,
        }
    }
}

/// Configuration in effect for one directory.
#[derive(Debug, Clone)]
pub struct Config {
    rel: String,
    rules: BTreeMap<String, RuleConfig>,
    resolve_globs: Vec<ResolveGlob>,
    implicit_imports: Vec<ImplicitImport>,
    file_symbol_names: Vec<FileSymbolName>,
    fix_wildcard_imports: Vec<FixWildcard>,
    kind_rewrites: BTreeMap<String, NameRewrite>,
    annotations: BTreeSet<DebugAnnotation>,
    conflict_resolvers: Vec<String>,
    deps_cleaners: Vec<String>,
    log_level: tracing::Level,
    generate_build_files: bool,
    known_resolvers: Vec<String>,
}

impl Config {
    /// A root config for the directory `rel` (empty for the workspace root).
    pub fn new(rel: &str) -> Self {
        Self {
            rel: rel.to_string(),
            rules: BTreeMap::new(),
            resolve_globs: Vec::new(),
            implicit_imports: Vec::new(),
            file_symbol_names: Vec::new(),
            fix_wildcard_imports: Vec::new(),
            kind_rewrites: BTreeMap::new(),
            annotations: BTreeSet::new(),
            conflict_resolvers: Vec::new(),
            deps_cleaners: Vec::new(),
            log_level: tracing::Level::DEBUG,
            generate_build_files: false,
            known_resolvers: ResolverRegistry::with_defaults()
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Config for a subdirectory, inheriting everything set so far.
    pub fn child(&self, rel: &str) -> Self {
        let mut child = self.clone();
        child.rel = rel.to_string();
        child
    }

    pub fn rel(&self) -> &str {
        &self.rel
    }

    /// Apply `# gazelle:` directives found in BUILD file text.
    pub fn parse_build_file(&mut self, text: &str) -> Result<(), ConfigError> {
        let directives: Vec<(String, String)> = text
            .lines()
            .filter_map(|line| DIRECTIVE_LINE.captures(line.trim()))
            .map(|m| (m[1].to_string(), m[2].trim().to_string()))
            .collect();
        let borrowed: Vec<(&str, &str)> = directives
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.parse_directives(&borrowed)
    }

    pub fn load(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.parse_build_file(&text)
    }

    /// Apply `(name, value)` directives in order. Directives of other
    /// extensions are ignored.
    pub fn parse_directives(&mut self, directives: &[(&str, &str)]) -> Result<(), ConfigError> {
        for (name, value) in directives {
            let kind = match DIRECTIVES.get(*name) {
                Some(kind) => *kind,
                None => {
                    tracing::trace!("ignoring directive gazelle:{}", name);
                    continue;
                }
            };
            self.parse_directive(kind, name, value)?;
        }
        Ok(())
    }

    fn parse_directive(&mut self, kind: DirectiveKind, name: &str, value: &str) -> Result<(), ConfigError> {
        let fields: Vec<&str> = value.split_whitespace().collect();
        match kind {
            DirectiveKind::ScalaRule => {
                if fields.len() < 3 {
                    return Err(invalid(
                        name,
                        value,
                        format!("expected three or more fields, got {}", fields.len()),
                    ));
                }
                let rule = self
                    .rules
                    .entry(fields[0].to_string())
                    .or_insert_with(|| RuleConfig::new(fields[0]));
                rule.parse_param(fields[1], &fields[2..].join(" "))
                    .map_err(|reason| invalid(name, value, reason))?;
            }
            DirectiveKind::ResolveGlob => {
                if fields.len() != 4 {
                    return Err(invalid(name, value, "expected [scala LANG IMPORT_GLOB LABEL]"));
                }
                if fields[0] != "scala" {
                    return Ok(());
                }
                let import = glob(fields[2]).map_err(|e| invalid(name, value, e.to_string()))?;
                let label = Label::parse(fields[3]).map_err(|e| invalid(name, value, e.to_string()))?;
                self.resolve_globs.push(ResolveGlob {
                    lang: fields[1].to_string(),
                    import,
                    label,
                });
            }
            DirectiveKind::ResolveWith => {
                if fields.len() < 3 {
                    return Err(invalid(name, value, "expected [LANG IMPORT DEPS...]"));
                }
                self.implicit_imports.push(ImplicitImport {
                    lang: fields[0].to_string(),
                    import: fields[1].to_string(),
                    deps: fields[2..].iter().map(|s| s.to_string()).collect(),
                });
            }
            DirectiveKind::ResolveFileSymbolName => {
                if fields.len() < 2 {
                    return Err(invalid(name, value, "expected [FILENAME_PATTERN [+|-]SYMBOLS...]"));
                }
                let file = glob(fields[0]).map_err(|e| invalid(name, value, e.to_string()))?;
                for part in &fields[1..] {
                    let intent = Intent::parse(part);
                    let symbol = glob(&intent.value).map_err(|e| invalid(name, value, e.to_string()))?;
                    self.file_symbol_names.push(FileSymbolName {
                        file: file.clone(),
                        symbol,
                        want: intent.want,
                    });
                }
            }
            DirectiveKind::FixWildcardImports => {
                if fields.len() < 2 {
                    return Err(invalid(
                        name,
                        value,
                        "expected [FILENAME_PATTERN [+|-]IMPORT_PATTERN...]",
                    ));
                }
                let file = if fields[0].contains('*') {
                    FilePattern::Glob(glob(fields[0]).map_err(|e| invalid(name, value, e.to_string()))?)
                } else {
                    FilePattern::Suffix(fields[0].to_string())
                };
                for part in &fields[1..] {
                    let intent = Intent::parse(part);
                    let import = glob(&intent.value).map_err(|e| invalid(name, value, e.to_string()))?;
                    self.fix_wildcard_imports.push(FixWildcard {
                        file: file.clone(),
                        import,
                        want: intent.want,
                    });
                }
            }
            DirectiveKind::KindRewriteName => {
                if fields.len() != 3 {
                    return Err(invalid(name, value, "expected [KIND SRC_NAME DST_NAME]"));
                }
                self.kind_rewrites.insert(
                    fields[0].to_string(),
                    NameRewrite {
                        src: fields[1].to_string(),
                        dst: fields[2].to_string(),
                    },
                );
            }
            DirectiveKind::ResolveConflicts => {
                for field in &fields {
                    let intent = Intent::parse(field);
                    if !self.known_resolvers.contains(&intent.value) {
                        return Err(invalid(
                            name,
                            value,
                            format!("unknown conflict resolver {:?}", intent.value),
                        ));
                    }
                    update_list(&mut self.conflict_resolvers, intent);
                }
            }
            DirectiveKind::DepsCleaner => {
                for field in &fields {
                    let intent = Intent::parse(field);
                    if !DEPS_CLEANERS.contains(&intent.value.as_str()) {
                        return Err(invalid(
                            name,
                            value,
                            format!("unknown scala deps cleaner {:?}", intent.value),
                        ));
                    }
                    update_list(&mut self.deps_cleaners, intent);
                }
            }
            DirectiveKind::Debug => {
                for field in &fields {
                    let intent = Intent::parse(field);
                    let annotation = DebugAnnotation::parse(&intent.value).ok_or_else(|| {
                        invalid(name, value, format!("unknown annotation value {:?}", intent.value))
                    })?;
                    if intent.want {
                        self.annotations.insert(annotation);
                    } else {
                        self.annotations.remove(&annotation);
                    }
                }
            }
            DirectiveKind::LogLevel => {
                self.log_level =
                    tracing::Level::from_str(value.trim()).map_err(|e| invalid(name, value, e.to_string()))?;
            }
            DirectiveKind::GenerateBuildFiles => {
                self.generate_build_files = value
                    .trim()
                    .parse::<bool>()
                    .map_err(|e| invalid(name, value, e.to_string()))?;
            }
        }
        Ok(())
    }

    pub fn rules(&self) -> impl Iterator<Item = &RuleConfig> {
        self.rules.values()
    }

    pub fn rule(&self, name: &str) -> Option<&RuleConfig> {
        self.rules.get(name)
    }

    /// The label a `resolve_glob` override assigns to `import`.
    pub fn resolve_glob(&self, lang: &str, import: &str) -> Option<&Label> {
        self.resolve_globs
            .iter()
            .find(|g| g.lang == lang && g.import.is_match(import))
            .map(|g| &g.label)
    }

    /// Extra imports implied by `import` (from `resolve_with`).
    pub fn implicit_imports(&self, lang: &str, import: &str) -> Vec<&str> {
        self.implicit_imports
            .iter()
            .filter(|i| i.lang == lang && i.import == import)
            .flat_map(|i| i.deps.iter().map(String::as_str))
            .collect()
    }

    pub fn should_annotate_imports(&self) -> bool {
        self.annotations.contains(&DebugAnnotation::Imports)
    }

    pub fn should_annotate_exports(&self) -> bool {
        self.annotations.contains(&DebugAnnotation::Exports)
    }

    pub fn should_annotate_deps(&self) -> bool {
        self.annotations.contains(&DebugAnnotation::Deps)
    }

    pub fn should_annotate_rule(&self) -> bool {
        self.annotations.contains(&DebugAnnotation::Rule)
    }

    pub fn should_annotate_dep_label_origin(&self) -> bool {
        self.annotations.contains(&DebugAnnotation::DepLabelOrigin)
    }

    /// First matching `resolve_file_symbol_name` directive decides.
    pub fn should_resolve_file_symbol_name(&self, filename: &str, name: &str) -> bool {
        self.file_symbol_names
            .iter()
            .find(|s| s.file.is_match(filename) && s.symbol.is_match(name))
            .map(|s| s.want)
            .unwrap_or(false)
    }

    /// First matching `scala_fix_wildcard_imports` directive decides.
    pub fn should_fix_wildcard_import(&self, filename: &str, import: &str) -> bool {
        self.fix_wildcard_imports
            .iter()
            .find(|s| s.file.matches(filename) && s.import.is_match(import))
            .map(|s| s.want)
            .unwrap_or(false)
    }

    /// Apply the name rewrite registered for rules of `kind`.
    pub fn rewrite_label(&self, kind: &str, label: &Label) -> Label {
        match self.kind_rewrites.get(kind) {
            Some(rewrite) => rewrite.rewrite(label),
            None => label.clone(),
        }
    }

    pub fn conflict_resolvers(&self) -> &[String] {
        &self.conflict_resolvers
    }

    pub fn deps_cleaners(&self) -> &[String] {
        &self.deps_cleaners
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level
    }

    pub fn generate_build_files(&self) -> bool {
        self.generate_build_files
    }

    fn dep_text(&self, label: &Label) -> String {
        if label.repo.is_empty() && label.pkg == self.rel {
            format!(":{}", label.name)
        } else {
            label.to_string()
        }
    }

    fn entry_label(&self, entry: &DepEntry) -> Option<Label> {
        entry
            .value()
            .and_then(|v| Label::parse(v).ok())
            .map(|l| l.abs("", &self.rel))
    }

    /// Merge resolved deps into an existing `deps` list.
    ///
    /// Entries that are not labels are kept. An entry also present in
    /// `new` is replaced by the plain new entry, dropping any `# keep`.
    /// Everything else is kept. String entries are sorted lexicographically
    /// among themselves; other expressions keep their slots.
    pub fn merge_deps(&self, current: &[DepEntry], new: &[Label]) -> Vec<DepEntry> {
        let wanted: BTreeSet<Label> = new.iter().map(|l| l.abs("", &self.rel)).collect();
        let mut merged = Vec::new();
        for entry in current {
            match self.entry_label(entry) {
                Some(label) if wanted.contains(&label) => {
                    if entry.has_keep_comment() {
                        tracing::info!("{}: {} does not need a '# keep' directive (fixed)", self.rel, label);
                    }
                }
                _ => merged.push(entry.clone()),
            }
        }
        for label in &wanted {
            merged.push(DepEntry::new(&self.dep_text(label), false));
        }
        sort_string_deps(&mut merged);
        merged
    }

    /// Drop managed deps that are not in `new_imports`; keep the rest
    /// verbatim.
    pub fn clean_deps(&self, current: &[DepEntry], new_imports: &[Label]) -> Vec<DepEntry> {
        let wanted: BTreeSet<Label> = new_imports.iter().map(|l| l.abs("", &self.rel)).collect();
        current
            .iter()
            .filter(|entry| {
                if should_keep(entry) {
                    return true;
                }
                self.entry_label(entry)
                    .map(|l| wanted.contains(&l))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}

fn sort_string_deps(entries: &mut [DepEntry]) {
    let slots: Vec<usize> = (0..entries.len()).filter(|&i| entries[i].value().is_some()).collect();
    let mut strings: Vec<DepEntry> = slots.iter().map(|&i| entries[i].clone()).collect();
    strings.sort_by(|a, b| a.value().cmp(&b.value()));
    for (slot, entry) in slots.into_iter().zip(strings) {
        entries[slot] = entry;
    }
}

fn update_list(list: &mut Vec<String>, intent: Intent) {
    if intent.want {
        if !list.contains(&intent.value) {
            list.push(intent.value);
        }
    } else {
        list.retain(|v| *v != intent.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    fn entry(expr: &str, comment: Option<&str>) -> DepEntry {
        DepEntry {
            expr: expr.to_string(),
            comment: comment.map(str::to_string),
        }
    }

    #[test]
    fn test_directive_names_sorted() {
        let names = directive_names();
        assert_eq!(names.len(), 11);
        assert_eq!(names[0], "resolve_conflicts");
        assert!(names.contains(&"scala_fix_wildcard_imports"));
    }

    #[test]
    fn test_parse_build_file_directives() {
        let text = r#"
# gazelle:scala_rule scala_library implementation @io_bazel_rules_scala//scala:scala.bzl%scala_library
# gazelle:scala_debug imports deps
# gazelle:go_prefix example.com/ignored
# gazelle:scala_generate_build_files true
scala_library(name = "x")
"#;
        let mut config = Config::new("");
        config.parse_build_file(text).unwrap();
        assert_eq!(
            config.rule("scala_library").unwrap().implementation,
            "@io_bazel_rules_scala//scala:scala.bzl%scala_library"
        );
        assert!(config.should_annotate_imports());
        assert!(config.should_annotate_deps());
        assert!(!config.should_annotate_exports());
        assert!(config.generate_build_files());
    }

    #[test]
    fn test_bad_directives_are_errors() {
        let cases = [
            ("scala_rule", "scala_library implementation"),
            ("scala_rule", "scala_library bogus x"),
            ("resolve_glob", "scala scala com.foo.*"),
            ("resolve_conflicts", "+no_such_resolver"),
            ("scala_deps_cleaner", "nope"),
            ("scala_debug", "everything"),
            ("resolve_kind_rewrite_name", "a b"),
            ("scala_log_level", "loud"),
            ("scala_generate_build_files", "maybe"),
        ];
        for (name, value) in cases {
            let mut config = Config::new("");
            assert!(
                config.parse_directives(&[(name, value)]).is_err(),
                "{} {} should fail",
                name,
                value
            );
        }
    }

    #[test]
    fn test_rule_params() {
        let mut config = Config::new("");
        config
            .parse_directives(&[
                ("scala_rule", "scala_binary deps //x"),
                ("scala_rule", "scala_binary deps //y"),
                ("scala_rule", "scala_binary -deps //x"),
                ("scala_rule", "scala_binary attr main_class Main"),
                ("scala_rule", "scala_binary option -Xfatal-warnings"),
                ("scala_rule", "scala_binary enabled false"),
            ])
            .unwrap();
        let rule = config.rule("scala_binary").unwrap();
        assert_eq!(rule.deps.iter().collect::<Vec<_>>(), vec!["//y"]);
        assert!(rule.attrs["main_class"]["Main"]);
        assert!(rule.options.contains("-Xfatal-warnings"));
        assert!(!rule.enabled);
    }

    #[test]
    fn test_conflict_resolvers_and_cleaners() {
        let mut config = Config::new("");
        config
            .parse_directives(&[
                ("resolve_conflicts", "+preferred_deps file_scope"),
                ("resolve_conflicts", "-preferred_deps"),
                ("scala_deps_cleaner", "unused_deps"),
            ])
            .unwrap();
        assert_eq!(config.conflict_resolvers().to_vec(), vec!["file_scope".to_string()]);
        assert_eq!(config.deps_cleaners().to_vec(), vec!["unused_deps".to_string()]);
    }

    #[test]
    fn test_should_fix_wildcard_import_first_match_wins() {
        let mut config = Config::new("");
        config
            .parse_directives(&[
                ("scala_fix_wildcard_imports", "Main.scala -com.foo.internal._"),
                ("scala_fix_wildcard_imports", "src/**/*.scala +com.foo.*"),
            ])
            .unwrap();
        assert!(!config.should_fix_wildcard_import("src/app/Main.scala", "com.foo.internal._"));
        assert!(config.should_fix_wildcard_import("src/app/Other.scala", "com.foo._"));
        assert!(!config.should_fix_wildcard_import("lib/Other.scala", "com.foo._"));
    }

    #[test]
    fn test_should_resolve_file_symbol_name() {
        let mut config = Config::new("");
        config
            .parse_directives(&[("resolve_file_symbol_name", "app/*.scala +Foo* -Bar")])
            .unwrap();
        assert!(config.should_resolve_file_symbol_name("app/Main.scala", "FooBar"));
        assert!(!config.should_resolve_file_symbol_name("app/Main.scala", "Bar"));
        assert!(!config.should_resolve_file_symbol_name("app/sub/Main.scala", "Foo"));
        assert!(!config.should_resolve_file_symbol_name("app/Main.scala", "Baz"));
    }

    #[test]
    fn test_resolve_glob_and_implicit_imports() {
        let mut config = Config::new("");
        config
            .parse_directives(&[
                ("resolve_glob", "scala scala com.google.protobuf.* @maven//:protobuf_java"),
                ("resolve_glob", "java java com.x.* //ignored"),
                ("resolve_with", "scala com.foo.Foo com.foo.FooImplicits com.foo.Codec"),
            ])
            .unwrap();
        assert_eq!(
            config.resolve_glob("scala", "com.google.protobuf.Any"),
            Some(&label("@maven//:protobuf_java"))
        );
        assert_eq!(config.resolve_glob("java", "com.x.Y"), None);
        assert_eq!(
            config.implicit_imports("scala", "com.foo.Foo"),
            vec!["com.foo.FooImplicits", "com.foo.Codec"]
        );
    }

    #[test]
    fn test_rewrite_label() {
        let mut config = Config::new("");
        config
            .parse_directives(&[
                ("resolve_kind_rewrite_name", "custom_library %{name} %{name}_lib"),
                ("resolve_kind_rewrite_name", "proto_bundle bundle bundle_scala"),
            ])
            .unwrap();
        assert_eq!(
            config.rewrite_label("custom_library", &label("//a:x")),
            label("//a:x_lib")
        );
        assert_eq!(
            config.rewrite_label("proto_bundle", &label("//a:other")),
            label("//a:other")
        );
        assert_eq!(
            config.rewrite_label("proto_bundle", &label("//a:bundle")),
            label("//a:bundle_scala")
        );
        assert_eq!(config.rewrite_label("scala_library", &label("//a:x")), label("//a:x"));
    }

    #[test]
    fn test_child_inherits_and_diverges() {
        let mut root = Config::new("");
        root.parse_directives(&[("scala_debug", "imports")]).unwrap();
        let mut child = root.child("app");
        child.parse_directives(&[("scala_debug", "-imports")]).unwrap();
        assert_eq!(child.rel(), "app");
        assert!(root.should_annotate_imports());
        assert!(!child.should_annotate_imports());
    }

    #[test]
    fn test_merge_deps() {
        let config = Config::new("app");
        let current = vec![
            entry("\"//lib:b\"", Some("# keep")),
            entry("\"//lib:z\"", None),
            entry("\"//lib:kept\"", Some("# keep")),
            entry("SOME_MACRO_DEPS", None),
        ];
        let merged = config.merge_deps(&current, &[label("//lib:b"), label(":util"), label("//lib:a")]);
        let exprs: Vec<&str> = merged.iter().map(|e| e.expr.as_str()).collect();
        assert_eq!(
            exprs,
            vec!["\"//lib:a\"", "\"//lib:b\"", "SOME_MACRO_DEPS", "\"//lib:kept\"", "\"//lib:z\"", "\":util\""]
        );
        // the re-added //lib:b lost its keep comment
        assert_eq!(merged[1].comment, None);
        assert_eq!(merged[3].comment.as_deref(), Some("# keep"));
    }

    #[test]
    fn test_merge_deps_sorts_plain_text() {
        let config = Config::new("app");
        let current = vec![DepEntry::new("@maven//:guava", false), DepEntry::new("//lib:b", false)];
        let merged = config.merge_deps(&current, &[label(":util")]);
        let values: Vec<&str> = merged.iter().filter_map(|e| e.value()).collect();
        assert_eq!(values, vec!["//lib:b", ":util", "@maven//:guava"]);
    }

    #[test]
    fn test_clean_deps() {
        let config = Config::new("app");
        let current = vec![
            entry("\"//lib:used\"", None),
            entry("\"//lib:unused\"", None),
            entry("\"//lib:pinned\"", Some("# keep")),
            entry("\":local\"", None),
            entry("select({})", None),
        ];
        let cleaned = config.clean_deps(&current, &[label("//lib:used"), label("//app:local")]);
        let exprs: Vec<&str> = cleaned.iter().map(|e| e.expr.as_str()).collect();
        assert_eq!(exprs, vec!["\"//lib:used\"", "\"//lib:pinned\"", "\":local\"", "select({})"]);
    }
}
