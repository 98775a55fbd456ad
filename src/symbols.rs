//! The merged symbol table.
//!
//! Maps fully-qualified names to the build targets that provide them. The
//! table is filled by symbol providers and then frozen; resolution only
//! reads it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::label::Label;

/// Where a symbol came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Object,
    Trait,
    Type,
    Value,
    Package,
    ArchiveClass,
    ArchivePackage,
    Proto,
    Maven,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Object => "object",
            SymbolKind::Trait => "trait",
            SymbolKind::Type => "type",
            SymbolKind::Value => "value",
            SymbolKind::Package => "package",
            SymbolKind::ArchiveClass => "archive_class",
            SymbolKind::ArchivePackage => "archive_package",
            SymbolKind::Proto => "proto",
            SymbolKind::Maven => "maven",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named symbol and its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub kind: SymbolKind,
    /// Fully-qualified name.
    pub name: String,
    /// Providing target.
    pub label: Label,
    /// Name of the provider layer that registered the symbol.
    pub provider: String,
    /// Names this symbol needs at compile time (supertypes).
    pub requires: Vec<String>,
}

impl Symbol {
    pub fn new(kind: SymbolKind, name: impl Into<String>, label: Label, provider: &str) -> Self {
        Self {
            kind,
            name: name.into(),
            label,
            provider: provider.to_string(),
            requires: Vec::new(),
        }
    }

    pub fn with_requires(mut self, requires: Vec<String>) -> Self {
        self.requires = requires;
        self
    }

    /// Last dotted component of the name.
    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} via {})", self.kind, self.name, self.label, self.provider)
    }
}

/// Last dotted component of a name.
pub fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Parent of a dotted name: `a.b.C` → `a.b`. None when no dot remains.
pub fn parent_name(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(idx) if idx > 0 => Some(&name[..idx]),
        _ => None,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    #[error("symbol table is frozen; cannot add {0}")]
    Frozen(String),
}

/// Name → providers multimap with a package index.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: HashMap<String, Vec<Symbol>>,
    packages: HashMap<String, Vec<Symbol>>,
    by_short_name: HashMap<String, Vec<String>>,
    preferred: HashMap<String, Label>,
    platform: HashSet<Label>,
    frozen: bool,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut platform = HashSet::new();
        platform.insert(Label::platform());
        Self {
            symbols: HashMap::new(),
            packages: HashMap::new(),
            by_short_name: HashMap::new(),
            preferred: HashMap::new(),
            platform,
            frozen: false,
        }
    }

    fn check_open(&self, what: &str) -> Result<(), SymbolError> {
        if self.frozen {
            return Err(SymbolError::Frozen(what.to_string()));
        }
        Ok(())
    }

    /// Add a provider for a name. A second provider with the same label is
    /// ignored.
    pub fn put(&mut self, symbol: Symbol) -> Result<(), SymbolError> {
        self.check_open(&symbol.name)?;
        let providers = self.symbols.entry(symbol.name.clone()).or_default();
        if providers.iter().any(|s| s.label == symbol.label) {
            return Ok(());
        }
        if providers.is_empty() {
            self.by_short_name
                .entry(short_name(&symbol.name).to_string())
                .or_default()
                .push(symbol.name.clone());
        }
        providers.push(symbol);
        Ok(())
    }

    /// Add a provider for a package.
    pub fn put_package(&mut self, symbol: Symbol) -> Result<(), SymbolError> {
        self.check_open(&symbol.name)?;
        let providers = self.packages.entry(symbol.name.clone()).or_default();
        if !providers.iter().any(|s| s.label == symbol.label) {
            providers.push(symbol);
        }
        Ok(())
    }

    /// Declare the preferred provider label for a name.
    pub fn set_preferred(&mut self, name: &str, label: Label) -> Result<(), SymbolError> {
        self.check_open(name)?;
        self.preferred.insert(name.to_string(), label);
        Ok(())
    }

    /// Mark a label as meaning "provided by the platform".
    pub fn add_platform_label(&mut self, label: Label) -> Result<(), SymbolError> {
        self.check_open(&label.to_string())?;
        self.platform.insert(label);
        Ok(())
    }

    /// End population.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Providers of an exact name, in insertion order.
    pub fn get_exact(&self, name: &str) -> &[Symbol] {
        self.symbols.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Providers of a package.
    pub fn get_package(&self, pkg: &str) -> &[Symbol] {
        self.packages.get(pkg).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All providers of names ending in `.short` (or equal to `short`),
    /// ordered by name then insertion.
    pub fn find_suffix(&self, short: &str) -> Vec<&Symbol> {
        let mut names: Vec<&String> = self
            .by_short_name
            .get(short)
            .map(|v| v.iter().collect())
            .unwrap_or_default();
        names.sort();
        names
            .into_iter()
            .flat_map(|n| self.get_exact(n).iter())
            .collect()
    }

    pub fn preferred_for(&self, name: &str) -> Option<&Label> {
        self.preferred.get(name)
    }

    pub fn is_platform(&self, label: &Label) -> bool {
        self.platform.contains(label)
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, label: &str) -> Symbol {
        Symbol::new(SymbolKind::Class, name, Label::parse(label).unwrap(), "test")
    }

    #[test]
    fn test_put_and_get_exact_keeps_order() {
        let mut table = SymbolTable::new();
        table.put(sym("a.X", "//b")).unwrap();
        table.put(sym("a.X", "//a")).unwrap();
        table.put(sym("a.X", "//b")).unwrap();
        let labels: Vec<String> = table.get_exact("a.X").iter().map(|s| s.label.to_string()).collect();
        assert_eq!(labels, vec!["//b", "//a"]);
        assert!(table.get_exact("a.Y").is_empty());
    }

    #[test]
    fn test_find_suffix() {
        let mut table = SymbolTable::new();
        table.put(sym("b.other.Name", "//b")).unwrap();
        table.put(sym("a.pkg.Name", "//a")).unwrap();
        table.put(sym("a.pkg.Names", "//c")).unwrap();
        let found: Vec<&str> = table.find_suffix("Name").iter().map(|s| s.name.as_str()).collect();
        assert_eq!(found, vec!["a.pkg.Name", "b.other.Name"]);
    }

    #[test]
    fn test_frozen_table_rejects_writes() {
        let mut table = SymbolTable::new();
        table.freeze();
        assert_eq!(
            table.put(sym("a.X", "//a")),
            Err(SymbolError::Frozen("a.X".to_string()))
        );
    }

    #[test]
    fn test_platform_label_is_builtin() {
        let table = SymbolTable::new();
        assert!(table.is_platform(&Label::platform()));
        assert!(!table.is_platform(&Label::parse("//a").unwrap()));
    }

    #[test]
    fn test_parent_and_short_names() {
        assert_eq!(parent_name("a.b.C"), Some("a.b"));
        assert_eq!(parent_name("a"), None);
        assert_eq!(short_name("a.b.C"), "C");
        assert_eq!(short_name("C"), "C");
    }
}
