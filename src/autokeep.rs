//! Deps to add or remove per rule, derived from build diagnostics.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::buildfile::{apply_edits, Edit, EditError};
use crate::diagnostics::{Diagnostic, Event};
use crate::label::Label;
use crate::resolve::{read_import_lines, CrossResolver, Resolution, ResolveContext};
use crate::store::FactStore;

/// Fully-qualified symbol → providing rule.
pub type DepsMap = BTreeMap<String, Label>;

/// Deps to add and remove, keyed by rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaDeps {
    pub add: BTreeMap<Label, Vec<Label>>,
    pub remove: BTreeMap<Label, Vec<Label>>,
}

impl DeltaDeps {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    fn push(map: &mut BTreeMap<Label, Vec<Label>>, rule: &Label, dep: Label) {
        let deps = map.entry(rule.clone()).or_default();
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }

    /// Every rule with a pending change.
    pub fn rules(&self) -> Vec<&Label> {
        let mut rules: Vec<&Label> = self.add.keys().chain(self.remove.keys()).collect();
        rules.sort();
        rules.dedup();
        rules
    }

    pub fn to_edits(&self, keep: bool) -> Vec<Edit> {
        let mut edits = Vec::new();
        for (target, deps) in &self.add {
            for dep in deps {
                edits.push(Edit::AddDep {
                    target: target.clone(),
                    dep: dep.clone(),
                    keep,
                });
            }
        }
        for (target, deps) in &self.remove {
            for dep in deps {
                edits.push(Edit::RemoveDep {
                    target: target.clone(),
                    dep: dep.clone(),
                });
            }
        }
        edits
    }
}

/// Looks up the provider of a name, first through the resolver (when
/// there is one), then through the deps map.
struct Lookup<'a> {
    deps: &'a DepsMap,
    resolver: Option<&'a CrossResolver>,
    store: Option<&'a FactStore>,
}

impl Lookup<'_> {
    fn find(&self, file: Option<&str>, name: &str, exact: bool) -> Option<Label> {
        if let Some(resolver) = self.resolver {
            let mut ctx = ResolveContext::new();
            if let Some(facts) = file.and_then(|f| self.store.and_then(|s| s.lookup_file(f))) {
                ctx = ctx.with_file(facts);
            }
            let resolved = if exact {
                resolver.resolve_exact(name, &ctx)
            } else {
                resolver.resolve(name, &ctx)
            };
            match resolved {
                Ok(Resolution::Label(label)) => return Some(label),
                Ok(Resolution::Platform) => return None,
                Err(e) => tracing::debug!("{}", e),
            }
        }
        self.deps.get(name).cloned()
    }
}

/// Group the fixes implied by `events` per rule.
pub fn make_delta_deps(
    events: &[Event],
    deps: &DepsMap,
    resolver: Option<&CrossResolver>,
    store: Option<&FactStore>,
) -> DeltaDeps {
    let lookup = Lookup { deps, resolver, store };
    let mut delta = DeltaDeps::default();

    for event in events {
        let unit = event.unit.as_ref();
        match &event.diagnostic {
            Diagnostic::NotFound { file, name, .. } => {
                let (Some(rule), Some(dep)) = (unit, lookup.find(Some(file), name, false)) else {
                    tracing::info!("MISS (not found): {} {}", file, name);
                    continue;
                };
                tracing::info!("MATCH: {} satisfies not found type {}", dep, name);
                DeltaDeps::push(&mut delta.add, rule, dep);
            }
            Diagnostic::MissingSymbol { file, full_name, .. } => {
                let (Some(rule), Some(dep)) = (unit, lookup.find(file.as_deref(), full_name, false)) else {
                    tracing::info!("MISS (missing symbol not found): {:?}", full_name);
                    continue;
                };
                tracing::info!("MATCH: {} is provided by {}", full_name, dep);
                DeltaDeps::push(&mut delta.add, rule, dep);
            }
            Diagnostic::NotAMemberOfPackage {
                file, symbol, package, ..
            } => {
                let name = format!("{}.{}", package, symbol);
                let (Some(rule), Some(dep)) = (unit, lookup.find(Some(file), &name, true)) else {
                    tracing::info!("MISS (not a member): {} {}", file, name);
                    continue;
                };
                tracing::info!("MATCH: {} satisfies not a member of package type {}", dep, name);
                DeltaDeps::push(&mut delta.add, rule, dep);
            }
            Diagnostic::UnusedDep { target, dep } => {
                DeltaDeps::push(&mut delta.remove, target, dep.clone());
            }
            Diagnostic::NoSuchTarget {
                missing_dep,
                referenced_by,
                ..
            } => {
                DeltaDeps::push(&mut delta.remove, referenced_by, missing_dep.clone());
            }
            Diagnostic::RecommendedEdit { command, target } => {
                tracing::debug!("ignoring recommendation {:?} for {}", command, target);
            }
        }
    }
    delta
}

/// Map every class, object, trait and type of the stored rules to its rule.
pub fn merge_deps_from_store(deps: &mut DepsMap, store: &FactStore) {
    for rule in store.rules() {
        let label = match Label::parse(&rule.label) {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!("skipping rule {:?}: {}", rule.label, e);
                continue;
            }
        };
        for file in &rule.files {
            for name in file
                .classes
                .iter()
                .chain(&file.objects)
                .chain(&file.traits)
                .chain(&file.types)
            {
                deps.insert(name.clone(), label.clone());
            }
        }
    }
}

/// Read `IMPORT LABEL` lines into the map. Bad lines are logged and skipped.
pub fn merge_deps_from_imports<R: BufRead>(deps: &mut DepsMap, reader: R) -> std::io::Result<()> {
    for (import, label) in read_import_lines(reader)? {
        deps.insert(import, label);
    }
    Ok(())
}

/// Write the delta into the BUILD files under `workspace`.
pub fn apply_delta_deps(workspace: &Path, delta: &DeltaDeps, keep: bool) -> Result<Vec<PathBuf>, EditError> {
    for (rule, deps) in &delta.add {
        for dep in deps {
            tracing::info!("{}: adding dep {}", rule, dep);
        }
    }
    for (rule, deps) in &delta.remove {
        for dep in deps {
            tracing::info!("{}: removing dep {}", rule, dep);
        }
    }
    apply_edits(workspace, &delta.to_edits(keep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::scan;
    use crate::facts::{FileFacts, RuleFacts};
    use std::fs;
    use tempfile::TempDir;

    fn label(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    const OUTPUT: &str = "\
ERROR: /ws/app/BUILD.bazel:3:14: scala @//app:app failed: (Exit 1): scalac failed: error executing command (from target //app:app) scalac ...
app/Main.scala:4: error: Symbol 'type com.foo.Foo' is missing from the classpath.
This symbol is required by 'class com.bar.Bar'.
app/Main.scala:9: error: [rewritten by -quickfix] object Codec is not a member of package com.codec
warning: Target '//lib:old' is specified as a dependency to //app:app but isn't used, please remove it from the deps.
";

    fn deps_map() -> DepsMap {
        let mut deps = DepsMap::new();
        merge_deps_from_imports(
            &mut deps,
            "com.foo.Foo //lib:foo\ncom.codec.Codec @maven//:codec\nthis line is bad\n".as_bytes(),
        )
        .unwrap();
        deps
    }

    #[test]
    fn test_merge_deps_from_imports_skips_bad_lines() {
        let deps = deps_map();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps["com.foo.Foo"], label("//lib:foo"));
    }

    #[test]
    fn test_merge_deps_from_store() {
        let mut f = FileFacts::new("lib/A.scala");
        f.classes = vec!["a.A".to_string()];
        f.objects = vec!["a.AObj".to_string()];
        f.traits = vec!["a.T".to_string()];
        f.vals = vec!["a.v".to_string()];
        let mut store = FactStore::new();
        store.store_rule(RuleFacts::new("//lib:a", "scala_library", vec![f]));

        let mut deps = DepsMap::new();
        merge_deps_from_store(&mut deps, &store);
        assert_eq!(deps.len(), 3);
        assert_eq!(deps["a.T"], label("//lib:a"));
        assert!(!deps.contains_key("a.v"));
    }

    #[test]
    fn test_make_delta_deps_from_output() {
        let events = scan(OUTPUT.as_bytes());
        let delta = make_delta_deps(&events, &deps_map(), None, None);
        assert_eq!(
            delta.add[&label("//app:app")],
            vec![label("//lib:foo"), label("@maven//:codec")]
        );
        assert_eq!(delta.remove[&label("//app:app")], vec![label("//lib:old")]);
        assert_eq!(delta.rules(), vec![&label("//app:app")]);
    }

    #[test]
    fn test_apply_delta_deps_with_keep() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        let build = dir.path().join("app/BUILD.bazel");
        fs::write(
            &build,
            "scala_library(\n    name = \"app\",\n    deps = [\n        \"//lib:old\",\n    ],\n)\n",
        )
        .unwrap();

        let events = scan(OUTPUT.as_bytes());
        let delta = make_delta_deps(&events, &deps_map(), None, None);
        let changed = apply_delta_deps(dir.path(), &delta, true).unwrap();
        assert_eq!(changed, vec![build.clone()]);

        let text = fs::read_to_string(&build).unwrap();
        assert!(text.contains("\"//lib:foo\",  # keep"));
        assert!(text.contains("\"@maven//:codec\",  # keep"));
        assert!(!text.contains("//lib:old"));
    }
}
