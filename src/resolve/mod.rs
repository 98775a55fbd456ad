//! Cross-resolution: mapping a symbol reference to the target that
//! provides it.
//!
//! Lookup order for a name `R`:
//!
//! 1. exact match of `R`
//! 2. `X._` looks up package `X`
//! 3. a short name (no dot) matches every `*.R`
//! 4. parents of `R`, nearest first (`a.b.C` → `a.b` → `a`)
//! 5. aliases from the symbol mappings, with steps 1–4 repeated
//!
//! Several providers for one name go through the [`ResolverRegistry`].

mod conflict;
mod provider;

pub use conflict::{ConflictResolver, FileScope, PredefinedLabel, PreferredDeps, ResolverRegistry};
pub use provider::{
    imports_by_label, maven_label, read_import_lines, ArchiveProvider, MavenProvider, ProtoProvider,
    ProviderError, ProviderRegistry, SourceProvider, SymbolProvider,
};

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::facts::FileFacts;
use crate::label::Label;
use crate::symbols::{parent_name, Symbol, SymbolTable};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("failed to resolve concrete type: {0}")]
    NotFound(String),
    #[error("resolved multiple concrete types for {name}: {}", .candidates.join(", "))]
    Ambiguous { name: String, candidates: Vec<String> },
    #[error("hint for {name} is not a known symbol: {hint}")]
    BadHint { name: String, hint: String },
    #[error("unknown conflict resolver: {0}")]
    UnknownResolver(String),
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Add this target as a dependency.
    Label(Label),
    /// Provided by the platform; no edit.
    Platform,
}

impl Resolution {
    pub fn label(&self) -> Option<&Label> {
        match self {
            Resolution::Label(label) => Some(label),
            Resolution::Platform => None,
        }
    }
}

/// What the referencing site knows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveContext<'a> {
    /// Facts of the file containing the reference.
    pub file: Option<&'a FileFacts>,
    /// Short name → fully-qualified name.
    pub hints: Option<&'a BTreeMap<String, String>>,
}

impl<'a> ResolveContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file: &'a FileFacts) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_hints(mut self, hints: &'a BTreeMap<String, String>) -> Self {
        self.hints = Some(hints);
        self
    }

    pub fn hint(&self, short: &str) -> Option<&'a str> {
        self.hints.and_then(|h| h.get(short)).map(String::as_str)
    }
}

/// Layered resolver over a frozen symbol table.
#[derive(Debug)]
pub struct CrossResolver {
    table: SymbolTable,
    conflicts: ResolverRegistry,
    mappings: HashMap<String, Vec<String>>,
}

impl CrossResolver {
    pub fn new(mut table: SymbolTable, conflicts: ResolverRegistry) -> Self {
        table.freeze();
        Self {
            table,
            conflicts,
            mappings: HashMap::new(),
        }
    }

    /// Add `SYMBOL ALIAS` mappings consulted when a name is unknown.
    pub fn with_mappings(mut self, mappings: Vec<(String, String)>) -> Self {
        for (symbol, alias) in mappings {
            self.mappings.entry(symbol).or_default().push(alias);
        }
        self
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    /// Resolve `name` to a target or to the platform.
    pub fn resolve(&self, name: &str, ctx: &ResolveContext<'_>) -> Result<Resolution, ResolveError> {
        let symbol = self.resolve_symbol(name, ctx)?;
        Ok(self.classify(&symbol))
    }

    fn classify(&self, symbol: &Symbol) -> Resolution {
        if symbol.label.is_none() || self.table.is_platform(&symbol.label) {
            Resolution::Platform
        } else {
            Resolution::Label(symbol.label.clone())
        }
    }

    /// Resolve `name` to the providing symbol.
    pub fn resolve_symbol(&self, name: &str, ctx: &ResolveContext<'_>) -> Result<Symbol, ResolveError> {
        if let Some(symbol) = self.lookup(name, ctx)? {
            return Ok(symbol);
        }
        if !name.contains('.') {
            if let Some(symbol) = self.lookup_in_file_scope(name, ctx)? {
                return Ok(symbol);
            }
        }

        let mut current = Some(name);
        while let Some(n) = current {
            if let Some(aliases) = self.mappings.get(n) {
                for alias in aliases {
                    tracing::debug!("{} is mapped to {}", n, alias);
                    if let Some(symbol) = self.lookup(alias, ctx)? {
                        return Ok(symbol);
                    }
                }
            }
            current = parent_name(n);
        }

        Err(ResolveError::NotFound(name.to_string()))
    }

    /// Resolve only by exact name, with conflict resolution.
    pub fn resolve_exact(&self, name: &str, ctx: &ResolveContext<'_>) -> Result<Resolution, ResolveError> {
        let providers = self.table.get_exact(name);
        if providers.is_empty() {
            return Err(ResolveError::NotFound(name.to_string()));
        }
        let candidates: Vec<&Symbol> = providers.iter().collect();
        let symbol = self.pick(name, &candidates, ctx)?;
        Ok(self.classify(&symbol))
    }

    /// Steps 1 through 4.
    fn lookup(&self, name: &str, ctx: &ResolveContext<'_>) -> Result<Option<Symbol>, ResolveError> {
        let exact = self.table.get_exact(name);
        if !exact.is_empty() {
            let candidates: Vec<&Symbol> = exact.iter().collect();
            return self.pick(name, &candidates, ctx).map(Some);
        }

        if let Some(pkg) = name.strip_suffix("._") {
            let providers = self.table.get_package(pkg);
            if !providers.is_empty() {
                let candidates: Vec<&Symbol> = providers.iter().collect();
                return self.pick(pkg, &candidates, ctx).map(Some);
            }
            return Ok(None);
        }

        if !name.contains('.') {
            let candidates = self.table.find_suffix(name);
            if !candidates.is_empty() {
                return self.pick(name, &candidates, ctx).map(Some);
            }
            return Ok(None);
        }

        let mut current = parent_name(name);
        while let Some(parent) = current {
            let exact = self.table.get_exact(parent);
            if !exact.is_empty() {
                let candidates: Vec<&Symbol> = exact.iter().collect();
                return self.pick(parent, &candidates, ctx).map(Some);
            }
            let packages = self.table.get_package(parent);
            if !packages.is_empty() {
                let candidates: Vec<&Symbol> = packages.iter().collect();
                return self.pick(parent, &candidates, ctx).map(Some);
            }
            current = parent_name(parent);
        }
        Ok(None)
    }

    /// Unknown short name: try the hint, then the file's imports.
    fn lookup_in_file_scope(&self, short: &str, ctx: &ResolveContext<'_>) -> Result<Option<Symbol>, ResolveError> {
        if let Some(hint) = ctx.hint(short) {
            return match self.lookup(hint, ctx)? {
                Some(symbol) => Ok(Some(symbol)),
                None => Err(ResolveError::BadHint {
                    name: short.to_string(),
                    hint: hint.to_string(),
                }),
            };
        }
        let Some(file) = ctx.file else {
            return Ok(None);
        };
        let suffix = format!(".{}", short);
        for imp in &file.imports {
            let qualified = match imp.strip_suffix("._") {
                Some(pkg) => format!("{}{}", pkg, suffix),
                None if imp.ends_with(&suffix) => imp.clone(),
                None => continue,
            };
            if !self.table.get_exact(&qualified).is_empty() {
                return self.lookup(&qualified, ctx);
            }
        }
        Ok(None)
    }

    fn pick(&self, name: &str, candidates: &[&Symbol], ctx: &ResolveContext<'_>) -> Result<Symbol, ResolveError> {
        let first = candidates[0];
        if candidates.iter().all(|c| c.label == first.label) {
            return Ok(first.clone());
        }
        if let Some(symbol) = self.conflicts.resolve(&self.table, name, candidates, ctx)? {
            return Ok(symbol);
        }
        let mut labels: Vec<String> = candidates.iter().map(|c| c.label.to_string()).collect();
        labels.sort();
        labels.dedup();
        Err(ResolveError::Ambiguous {
            name: name.to_string(),
            candidates: labels,
        })
    }
}

/// Parse `SYMBOL ALIAS` lines.
pub fn parse_symbol_mappings(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() == 2 {
                Some((fields[0].to_string(), fields[1].to_string()))
            } else {
                tracing::warn!("bad symbol mapping line: {:?}", line);
                None
            }
        })
        .collect()
}
