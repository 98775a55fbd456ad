//! Conflict resolution strategies.
//!
//! When a name has more than one provider, the enabled strategies are asked
//! in order; the first one that picks a candidate wins.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{ResolveContext, ResolveError};
use crate::symbols::{parent_name, short_name, Symbol, SymbolTable};

/// A named strategy for picking one of several providers.
pub trait ConflictResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pick one of `candidates` for `name`, or `None` to defer to the next
    /// strategy.
    fn resolve_conflict(
        &self,
        table: &SymbolTable,
        name: &str,
        candidates: &[&Symbol],
        ctx: &ResolveContext<'_>,
    ) -> Result<Option<Symbol>, ResolveError>;
}

/// Picks the provider declared preferred for the candidate's name or its
/// package.
#[derive(Debug, Default)]
pub struct PreferredDeps;

impl ConflictResolver for PreferredDeps {
    fn name(&self) -> &'static str {
        "preferred_deps"
    }

    fn resolve_conflict(
        &self,
        table: &SymbolTable,
        name: &str,
        candidates: &[&Symbol],
        _ctx: &ResolveContext<'_>,
    ) -> Result<Option<Symbol>, ResolveError> {
        let wanted = table.preferred_for(name).or_else(|| {
            candidates.iter().find_map(|c| {
                table
                    .preferred_for(&c.name)
                    .or_else(|| parent_name(&c.name).and_then(|p| table.preferred_for(p)))
            })
        });
        Ok(wanted.and_then(|want| {
            candidates
                .iter()
                .find(|c| &c.label == want)
                .map(|c| (*c).clone())
        }))
    }
}

/// Picks a provider that is part of the platform.
#[derive(Debug, Default)]
pub struct PredefinedLabel;

impl ConflictResolver for PredefinedLabel {
    fn name(&self) -> &'static str {
        "predefined_label"
    }

    fn resolve_conflict(
        &self,
        table: &SymbolTable,
        _name: &str,
        candidates: &[&Symbol],
        _ctx: &ResolveContext<'_>,
    ) -> Result<Option<Symbol>, ResolveError> {
        Ok(candidates
            .iter()
            .find(|c| c.label.is_none() || table.is_platform(&c.label))
            .map(|c| (*c).clone()))
    }
}

/// Uses what the referencing file says: hints first, then the file's own
/// packages, then its imports.
#[derive(Debug, Default)]
pub struct FileScope;

impl ConflictResolver for FileScope {
    fn name(&self) -> &'static str {
        "file_scope"
    }

    fn resolve_conflict(
        &self,
        table: &SymbolTable,
        name: &str,
        candidates: &[&Symbol],
        ctx: &ResolveContext<'_>,
    ) -> Result<Option<Symbol>, ResolveError> {
        let short = short_name(name);

        if let Some(hint) = ctx.hint(short) {
            let providers = table.get_exact(hint);
            if providers.is_empty() {
                return Err(ResolveError::BadHint {
                    name: short.to_string(),
                    hint: hint.to_string(),
                });
            }
            let chosen = candidates
                .iter()
                .find(|c| c.name == hint)
                .map(|c| (*c).clone())
                .unwrap_or_else(|| providers[0].clone());
            return Ok(Some(chosen));
        }

        let Some(file) = ctx.file else {
            return Ok(None);
        };

        for pkg in &file.packages {
            let qualified = format!("{}.{}", pkg, short);
            if let Some(c) = candidates.iter().find(|c| c.name == qualified) {
                return Ok(Some((*c).clone()));
            }
        }

        for imp in &file.imports {
            let qualified = match imp.strip_suffix("._") {
                Some(pkg) => format!("{}.{}", pkg, short),
                None => imp.clone(),
            };
            if let Some(c) = candidates.iter().find(|c| c.name == qualified) {
                return Ok(Some((*c).clone()));
            }
        }

        Ok(None)
    }
}

/// The ordered set of enabled conflict strategies.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Arc<dyn ConflictResolver>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ResolverRegistry {
    /// An empty registry; every conflict is reported as ambiguous.
    pub fn new() -> Self {
        Self::default()
    }

    /// `preferred_deps`, `predefined_label`, `file_scope`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PreferredDeps));
        registry.register(Arc::new(PredefinedLabel));
        registry.register(Arc::new(FileScope));
        registry
    }

    pub fn register(&mut self, resolver: Arc<dyn ConflictResolver>) {
        self.resolvers.retain(|r| r.name() != resolver.name());
        self.resolvers.push(resolver);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ConflictResolver>> {
        self.resolvers.iter().find(|r| r.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// A registry holding only the named strategies, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Self, ResolveError> {
        let mut seen = BTreeSet::new();
        let mut resolvers = Vec::new();
        for name in names {
            let resolver = self
                .get(name)
                .ok_or_else(|| ResolveError::UnknownResolver(name.clone()))?;
            if seen.insert(name.as_str()) {
                resolvers.push(Arc::clone(resolver));
            }
        }
        Ok(Self { resolvers })
    }

    /// Ask each strategy in turn.
    pub fn resolve(
        &self,
        table: &SymbolTable,
        name: &str,
        candidates: &[&Symbol],
        ctx: &ResolveContext<'_>,
    ) -> Result<Option<Symbol>, ResolveError> {
        for resolver in &self.resolvers {
            if let Some(symbol) = resolver.resolve_conflict(table, name, candidates, ctx)? {
                tracing::debug!("{} resolved conflict for {}: {}", resolver.name(), name, symbol.label);
                return Ok(Some(symbol));
            }
        }
        Ok(None)
    }
}
