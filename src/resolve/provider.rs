//! Symbol providers: the layers that populate the symbol table.

use std::collections::BTreeMap;
use std::fs;
use std::io::BufRead;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::archive::ArchiveIndex;
use crate::facts::{DeclarationKind, RuleFacts};
use crate::label::Label;
use crate::symbols::{Symbol, SymbolError, SymbolKind, SymbolTable};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Symbol(#[from] SymbolError),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// One layer of symbols.
pub trait SymbolProvider {
    fn name(&self) -> &'static str;

    /// Add this layer's symbols to the table. Returns the number added.
    fn provide(&self, table: &mut SymbolTable) -> Result<usize, ProviderError>;
}

fn declaration_kind(kind: DeclarationKind) -> SymbolKind {
    match kind {
        DeclarationKind::Class => SymbolKind::Class,
        DeclarationKind::Object => SymbolKind::Object,
        DeclarationKind::Trait => SymbolKind::Trait,
        DeclarationKind::Type => SymbolKind::Type,
        DeclarationKind::Val => SymbolKind::Value,
    }
}

/// Declarations parsed from workspace sources.
#[derive(Debug, Clone, Default)]
pub struct SourceProvider {
    rules: Vec<RuleFacts>,
}

impl SourceProvider {
    pub fn new(rules: Vec<RuleFacts>) -> Self {
        Self { rules }
    }
}

impl SymbolProvider for SourceProvider {
    fn name(&self) -> &'static str {
        "source"
    }

    fn provide(&self, table: &mut SymbolTable) -> Result<usize, ProviderError> {
        let mut count = 0;
        for rule in &self.rules {
            let label = match Label::parse(&rule.label) {
                Ok(label) => label,
                Err(e) => {
                    tracing::warn!("skipping rule with bad label: {}", e);
                    continue;
                }
            };
            for file in &rule.files {
                for (kind, name) in file.declarations() {
                    let requires = file
                        .extends
                        .get(&format!("{} {}", kind, name))
                        .cloned()
                        .unwrap_or_default();
                    table.put(
                        Symbol::new(declaration_kind(kind), name, label.clone(), self.name())
                            .with_requires(requires),
                    )?;
                    count += 1;
                }
                for pkg in &file.packages {
                    table.put_package(Symbol::new(SymbolKind::Package, pkg, label.clone(), self.name()))?;
                }
            }
        }
        Ok(count)
    }
}

/// Classes and packages from indexed archives.
#[derive(Debug, Clone, Default)]
pub struct ArchiveProvider {
    index: ArchiveIndex,
}

impl ArchiveProvider {
    pub fn new(index: ArchiveIndex) -> Self {
        Self { index }
    }
}

impl SymbolProvider for ArchiveProvider {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn provide(&self, table: &mut SymbolTable) -> Result<usize, ProviderError> {
        let mut count = 0;
        for name in &self.index.predefined {
            if let Ok(label) = Label::parse(name) {
                table.add_platform_label(label)?;
            }
        }

        for archive in &self.index.archives {
            let label = if archive.label.is_empty() || self.index.predefined.contains(&archive.label) {
                Label::platform()
            } else {
                match Label::parse(&archive.label) {
                    Ok(label) => label,
                    Err(e) => {
                        tracing::warn!("skipping archive {}: {}", archive.filename, e);
                        continue;
                    }
                }
            };

            for class in &archive.classes {
                let requires: Vec<String> = class
                    .superclass
                    .iter()
                    .chain(class.interfaces.iter())
                    .cloned()
                    .collect();
                table.put(
                    Symbol::new(SymbolKind::ArchiveClass, &class.name, label.clone(), self.name())
                        .with_requires(requires),
                )?;
                if let Some(alias) = &class.alias {
                    table.put(Symbol::new(SymbolKind::ArchiveClass, alias, label.clone(), self.name()))?;
                }
                count += 1;
            }
            for pkg in &archive.packages {
                table.put_package(Symbol::new(SymbolKind::ArchivePackage, pkg, label.clone(), self.name()))?;
            }
        }

        for name in &self.index.predefined_symbols {
            table.put(Symbol::new(SymbolKind::ArchiveClass, name, Label::platform(), self.name()))?;
        }
        for (name, label) in &self.index.preferred {
            match Label::parse(label) {
                Ok(label) => table.set_preferred(name, label)?,
                Err(e) => tracing::warn!("bad preferred label for {}: {}", name, e),
            }
        }
        Ok(count)
    }
}

/// Parse `IMPORT LABEL` lines. Blank lines and `#` comments are skipped;
/// malformed lines are logged and skipped.
pub fn read_import_lines<R: BufRead>(reader: R) -> Result<Vec<(String, Label)>, std::io::Error> {
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 2 {
            tracing::warn!("bad line: {:?}", line);
            continue;
        }
        match Label::parse(fields[1]) {
            Ok(label) => out.push((fields[0].to_string(), label)),
            Err(e) => tracing::warn!("bad line: {:?}: {}", line, e),
        }
    }
    Ok(out)
}

/// Symbols listed in an `IMPORT LABEL` file, typically generated from
/// proto rules.
#[derive(Debug, Clone, Default)]
pub struct ProtoProvider {
    imports: Vec<(String, Label)>,
}

impl ProtoProvider {
    pub fn new(imports: Vec<(String, Label)>) -> Self {
        Self { imports }
    }

    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        let file = fs::File::open(path).map_err(|source| ProviderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let imports = read_import_lines(std::io::BufReader::new(file)).map_err(|source| {
            ProviderError::Io {
                path: path.display().to_string(),
                source,
            }
        })?;
        Ok(Self::new(imports))
    }
}

impl SymbolProvider for ProtoProvider {
    fn name(&self) -> &'static str {
        "proto"
    }

    fn provide(&self, table: &mut SymbolTable) -> Result<usize, ProviderError> {
        for (import, label) in &self.imports {
            table.put(Symbol::new(SymbolKind::Proto, import, label.clone(), self.name()))?;
        }
        Ok(self.imports.len())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MavenDependency {
    coord: String,
    direct_dependencies: Vec<String>,
    packages: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MavenDependencyTree {
    dependencies: Vec<MavenDependency>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MavenInstall {
    dependency_tree: MavenDependencyTree,
}

lazy_static::lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w]").unwrap();
}

/// Label of a maven coordinate in the named external repository:
/// `com.google.guava:guava:31.1-jre` → `@maven//:com_google_guava_guava`.
pub fn maven_label(repo: &str, coord: &str) -> Result<Label, ProviderError> {
    let parts: Vec<&str> = coord.split(':').collect();
    let artifact = match parts.len() {
        3 | 4 => format!("{}:{}", parts[0], parts[1]),
        5 => format!("{}:{}:{}", parts[0], parts[1], parts[3]),
        _ => return Err(ProviderError::Invalid(format!("bad maven coordinate {:?}", coord))),
    };
    Ok(Label::new(repo, "", &NON_WORD.replace_all(&artifact, "_")))
}

/// Packages from a pinned `NAME_install.json` file.
#[derive(Debug, Clone, Default)]
pub struct MavenProvider {
    packages: Vec<(String, Label)>,
}

impl MavenProvider {
    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        let display = path.display().to_string();
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let repo = basename.strip_suffix("_install.json").ok_or_else(|| {
            ProviderError::Invalid(format!(
                "maven install file name must match {{name}}_install.json (got {})",
                basename
            ))
        })?;
        let data = fs::read(path).map_err(|source| ProviderError::Io {
            path: display.clone(),
            source,
        })?;
        Self::parse(repo, &data).map_err(|e| match e {
            ProviderError::Json { source, .. } => ProviderError::Json { path: display, source },
            other => other,
        })
    }

    pub fn parse(repo: &str, data: &[u8]) -> Result<Self, ProviderError> {
        let install: MavenInstall = serde_json::from_slice(data).map_err(|source| ProviderError::Json {
            path: String::new(),
            source,
        })?;
        let mut packages = Vec::new();
        for dep in install.dependency_tree.dependencies {
            let label = maven_label(repo, &dep.coord)?;
            tracing::trace!(
                "{} has {} direct dependencies",
                label,
                dep.direct_dependencies.len()
            );
            packages.extend(dep.packages.into_iter().map(|pkg| (pkg, label.clone())));
        }
        Ok(Self { packages })
    }
}

impl SymbolProvider for MavenProvider {
    fn name(&self) -> &'static str {
        "maven"
    }

    fn provide(&self, table: &mut SymbolTable) -> Result<usize, ProviderError> {
        for (pkg, label) in &self.packages {
            table.put_package(Symbol::new(SymbolKind::Maven, pkg, label.clone(), self.name()))?;
        }
        Ok(self.packages.len())
    }
}

/// The ordered provider layers used to build a symbol table.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Box<dyn SymbolProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<dyn SymbolProvider>) {
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Run every provider in registration order and freeze the result.
    pub fn build_table(&self) -> Result<SymbolTable, ProviderError> {
        let mut table = SymbolTable::new();
        for provider in &self.providers {
            let count = provider.provide(&mut table)?;
            tracing::debug!("provider {} added {} symbols", provider.name(), count);
        }
        table.freeze();
        tracing::info!(
            "symbol table ready: {} names, {} packages",
            table.len(),
            table.package_count()
        );
        Ok(table)
    }
}

/// Group `IMPORT LABEL` pairs by label.
pub fn imports_by_label(imports: &[(String, Label)]) -> BTreeMap<Label, Vec<String>> {
    let mut out: BTreeMap<Label, Vec<String>> = BTreeMap::new();
    for (import, label) in imports {
        out.entry(label.clone()).or_default().push(import.clone());
    }
    out
}
