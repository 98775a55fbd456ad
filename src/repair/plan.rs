//! Turning diagnostics into BUILD edits.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::buildfile::Edit;
use crate::config::Config;
use crate::diagnostics::{Diagnostic, Event};
use crate::label::Label;
use crate::resolve::{CrossResolver, Resolution, ResolveContext};
use crate::store::FactStore;

use super::RepairError;

/// Default suffix of deps accepted in proto-only mode.
pub const PROTO_DEP_SUFFIX: &str = "_scala_library";

/// Per-file hints: filename → short name → fully-qualified name.
pub type Hints = BTreeMap<String, BTreeMap<String, String>>;

/// An ordered set of edits.
#[derive(Debug, Clone, Default)]
pub struct EditPlan {
    edits: Vec<Edit>,
    seen: HashSet<Edit>,
}

impl EditPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edit unless an equal one is already planned.
    pub fn push(&mut self, edit: Edit) -> bool {
        if self.seen.contains(&edit) {
            return false;
        }
        self.seen.insert(edit.clone());
        self.edits.push(edit);
        true
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn into_edits(self) -> Vec<Edit> {
        self.edits
    }

    /// buildozer lines in plan order, without repeats.
    pub fn commands(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.edits
            .iter()
            .flat_map(Edit::to_commands)
            .filter(|c| seen.insert(c.clone()))
            .collect()
    }
}

/// Decides the edit for each diagnostic.
pub struct Planner<'a> {
    resolver: &'a CrossResolver,
    label_mappings: Option<&'a HashMap<Label, Label>>,
    store: Option<&'a FactStore>,
    hints: Option<&'a Hints>,
    config: Option<&'a Config>,
    proto_suffix: Option<String>,
}

impl<'a> Planner<'a> {
    pub fn new(resolver: &'a CrossResolver) -> Self {
        Self {
            resolver,
            label_mappings: None,
            store: None,
            hints: None,
            config: None,
            proto_suffix: None,
        }
    }

    pub fn with_label_mappings(mut self, mappings: &'a HashMap<Label, Label>) -> Self {
        self.label_mappings = Some(mappings);
        self
    }

    /// Source facts used for file-scoped resolution and rule kinds.
    pub fn with_store(mut self, store: &'a FactStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_hints(mut self, hints: &'a Hints) -> Self {
        self.hints = Some(hints);
        self
    }

    /// Directives providing kind rewrites.
    pub fn with_config(mut self, config: &'a Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Only add deps whose name ends with `suffix`.
    pub fn proto_only(mut self, suffix: impl Into<String>) -> Self {
        self.proto_suffix = Some(suffix.into());
        self
    }

    /// Plan every event into `plan`. Failures are returned rather than
    /// stopping the remaining events.
    pub fn plan(&self, events: &[Event], plan: &mut EditPlan) -> Vec<RepairError> {
        let mut errors = Vec::new();
        for event in events {
            match self.plan_event(event) {
                Ok(Some(edit)) => {
                    if plan.push(edit.clone()) {
                        tracing::debug!("planned {:?}", edit);
                    }
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }
        errors
    }

    pub fn plan_event(&self, event: &Event) -> Result<Option<Edit>, RepairError> {
        match &event.diagnostic {
            Diagnostic::NotFound { file, line, name, .. } => {
                let unit = unit_of(event)?;
                let location = format!("{}:{}", file, line);
                let resolution = self
                    .resolver
                    .resolve(name, &self.context(Some(file)))
                    .map_err(|source| RepairError::Resolve { location, source })?;
                self.add_dep(name, resolution, unit)
            }
            Diagnostic::MissingSymbol {
                file,
                line,
                full_name,
                required_by,
            } => {
                let location = location(file.as_deref(), *line);
                if required_by.is_none() {
                    return Err(RepairError::IncompleteMatch {
                        location,
                        name: full_name.clone(),
                    });
                }
                let unit = unit_of(event)?;
                let resolution = self
                    .resolver
                    .resolve(full_name, &self.context(file.as_deref()))
                    .map_err(|source| RepairError::Resolve { location, source })?;
                self.add_dep(full_name, resolution, unit)
            }
            Diagnostic::NotAMemberOfPackage {
                file,
                line,
                symbol,
                package,
            } => {
                let unit = unit_of(event)?;
                let name = format!("{}.{}", package, symbol);
                let resolution = self
                    .resolver
                    .resolve_exact(&name, &self.context(Some(file)))
                    .map_err(|source| RepairError::Resolve {
                        location: format!("{}:{}", file, line),
                        source,
                    })?;
                self.add_dep(&name, resolution, unit)
            }
            Diagnostic::UnusedDep { target, dep } => Ok(self.remove_dep(dep, target)),
            Diagnostic::NoSuchTarget {
                missing_dep,
                referenced_by,
                ..
            } => Ok(self.remove_dep(missing_dep, referenced_by)),
            Diagnostic::RecommendedEdit { command, target } => Ok(Some(Edit::AddSingleCommand {
                target: self.map_target(target),
                command: command.clone(),
            })),
        }
    }

    fn context(&self, file: Option<&str>) -> ResolveContext<'a> {
        let mut ctx = ResolveContext::new();
        if let Some(file) = file {
            if let Some(facts) = self.store.and_then(|s| s.lookup_file(file)) {
                ctx = ctx.with_file(facts);
            }
            if let Some(hints) = self.hints.and_then(|h| h.get(file)) {
                ctx = ctx.with_hints(hints);
            }
        }
        ctx
    }

    fn add_dep(&self, name: &str, resolution: Resolution, target: &Label) -> Result<Option<Edit>, RepairError> {
        let dep = match resolution {
            Resolution::Platform => return Ok(None),
            Resolution::Label(dep) if dep.is_none() || dep.is_platform() => return Ok(None),
            Resolution::Label(dep) => self.map_target(&dep),
        };
        let target = self.map_target(target);
        if let Some(suffix) = &self.proto_suffix {
            if !dep.name.ends_with(suffix.as_str()) {
                return Err(RepairError::Skipped {
                    name: name.to_string(),
                    dep: dep.to_string(),
                    target: target.to_string(),
                });
            }
        }
        Ok(Some(Edit::AddDep {
            target,
            dep,
            keep: false,
        }))
    }

    fn remove_dep(&self, dep: &Label, target: &Label) -> Option<Edit> {
        if dep.is_none() {
            return None;
        }
        Some(Edit::RemoveDep {
            target: self.map_target(target),
            dep: self.map_target(dep),
        })
    }

    /// Apply label mappings, then kind rewrites.
    fn map_target(&self, label: &Label) -> Label {
        let mapped = self
            .label_mappings
            .and_then(|m| m.get(label))
            .cloned()
            .unwrap_or_else(|| label.clone());
        match (self.config, self.rule_kind(&mapped)) {
            (Some(config), Some(kind)) => config.rewrite_label(kind, &mapped),
            _ => mapped,
        }
    }

    fn rule_kind(&self, label: &Label) -> Option<&'a str> {
        let store = self.store?;
        let repo = if label.repo.is_empty() {
            String::new()
        } else {
            format!("@{}", label.repo)
        };
        let long = format!("{}//{}:{}", repo, label.pkg, label.name);
        store
            .lookup_rule(&label.to_string())
            .or_else(|| store.lookup_rule(&long))
            .map(|rule| rule.kind.as_str())
    }
}

fn unit_of(event: &Event) -> Result<&Label, RepairError> {
    event
        .unit
        .as_ref()
        .ok_or_else(|| RepairError::NoUnit(event.diagnostic.id()))
}

fn location(file: Option<&str>, line: Option<u32>) -> String {
    match (file, line) {
        (Some(file), Some(line)) => format!("{}:{}", file, line),
        (Some(file), None) => file.to_string(),
        _ => "<classpath>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::NotFoundKind;
    use crate::facts::{FileFacts, RuleFacts};
    use crate::resolve::{ResolverRegistry, SymbolProvider, SourceProvider};
    use crate::symbols::SymbolTable;

    fn label(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    fn resolver() -> CrossResolver {
        let mut f = FileFacts::new("lib/Foo.scala");
        f.packages = vec!["com.foo".to_string()];
        f.classes = vec!["com.foo.Foo".to_string()];
        let mut g = FileFacts::new("proto/Bar.scala");
        g.classes = vec!["com.bar.Bar".to_string()];
        let rules = vec![
            RuleFacts::new("//lib:foo", "scala_library", vec![f]),
            RuleFacts::new("//proto:bar_scala_library", "scala_library", vec![g]),
        ];
        let mut table = SymbolTable::new();
        SourceProvider::new(rules).provide(&mut table).unwrap();
        CrossResolver::new(table, ResolverRegistry::with_defaults())
    }

    fn event(unit: &str, diagnostic: Diagnostic) -> Event {
        Event {
            unit: Some(label(unit)),
            diagnostic,
        }
    }

    fn not_found(name: &str) -> Diagnostic {
        Diagnostic::NotFound {
            file: "app/Main.scala".to_string(),
            line: 3,
            kind: NotFoundKind::Type,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_not_found_adds_dep() {
        let resolver = resolver();
        let planner = Planner::new(&resolver);
        let edit = planner.plan_event(&event("//app:app", not_found("Foo"))).unwrap();
        assert_eq!(
            edit,
            Some(Edit::AddDep {
                target: label("//app:app"),
                dep: label("//lib:foo"),
                keep: false,
            })
        );
    }

    #[test]
    fn test_unknown_name_is_error() {
        let resolver = resolver();
        let planner = Planner::new(&resolver);
        let err = planner
            .plan_event(&event("//app:app", not_found("Nope")))
            .unwrap_err();
        assert!(err.to_string().contains("app/Main.scala:3"));
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn test_missing_symbol_without_required_by() {
        let resolver = resolver();
        let planner = Planner::new(&resolver);
        let diagnostic = Diagnostic::MissingSymbol {
            file: None,
            line: None,
            full_name: "com.foo.Foo".to_string(),
            required_by: None,
        };
        let err = planner.plan_event(&event("//app", diagnostic)).unwrap_err();
        assert!(matches!(err, RepairError::IncompleteMatch { .. }));
    }

    #[test]
    fn test_missing_symbol_resolves_with_parent_walk() {
        let resolver = resolver();
        let planner = Planner::new(&resolver);
        let diagnostic = Diagnostic::MissingSymbol {
            file: None,
            line: None,
            full_name: "com.foo.Foo.Inner".to_string(),
            required_by: Some("com.other.Thing".to_string()),
        };
        let edit = planner.plan_event(&event("//app", diagnostic)).unwrap().unwrap();
        assert_eq!(edit.to_commands(), vec!["add deps //lib:foo|//app".to_string()]);
    }

    #[test]
    fn test_label_mappings_apply_to_both_sides() {
        let resolver = resolver();
        let mut mappings = HashMap::new();
        mappings.insert(label("//lib:foo"), label("//lib:foo_v2"));
        mappings.insert(label("//app:app"), label("//app:app_lib"));
        let planner = Planner::new(&resolver).with_label_mappings(&mappings);
        let edit = planner.plan_event(&event("//app:app", not_found("Foo"))).unwrap();
        assert_eq!(
            edit,
            Some(Edit::AddDep {
                target: label("//app:app_lib"),
                dep: label("//lib:foo_v2"),
                keep: false,
            })
        );
    }

    #[test]
    fn test_proto_only_skips_other_deps() {
        let resolver = resolver();
        let planner = Planner::new(&resolver).proto_only(PROTO_DEP_SUFFIX);
        let err = planner
            .plan_event(&event("//app", not_found("Foo")))
            .unwrap_err();
        assert!(matches!(err, RepairError::Skipped { .. }));

        let edit = planner.plan_event(&event("//app", not_found("Bar"))).unwrap();
        assert!(edit.is_some());
    }

    #[test]
    fn test_removals_and_recommendations() {
        let resolver = resolver();
        let planner = Planner::new(&resolver);
        let mut plan = EditPlan::new();
        let events = vec![
            Event {
                unit: None,
                diagnostic: Diagnostic::NoSuchTarget {
                    file: "app/BUILD".to_string(),
                    line: 1,
                    col: 1,
                    missing_dep: label("//gone"),
                    referenced_by: label("//app"),
                },
            },
            Event {
                unit: None,
                diagnostic: Diagnostic::UnusedDep {
                    target: label("//app"),
                    dep: label("//gone"),
                },
            },
            Event {
                unit: None,
                diagnostic: Diagnostic::RecommendedEdit {
                    command: "add deps //x".to_string(),
                    target: label("//app"),
                },
            },
        ];
        let errors = planner.plan(&events, &mut plan);
        assert!(errors.is_empty());
        // the two removals are the same edit
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.commands(),
            vec!["remove deps //gone|//app".to_string(), "add deps //x|//app".to_string()]
        );
    }

    #[test]
    fn test_missing_unit_is_error() {
        let resolver = resolver();
        let planner = Planner::new(&resolver);
        let err = planner
            .plan_event(&Event {
                unit: None,
                diagnostic: not_found("Foo"),
            })
            .unwrap_err();
        assert!(matches!(err, RepairError::NoUnit(_)));
    }

    #[test]
    fn test_kind_rewrite_uses_store_kinds() {
        let resolver = resolver();
        let mut store = FactStore::new();
        store.store_rule(RuleFacts::new("//lib:foo", "custom_library", vec![]));
        let mut config = Config::new("");
        config
            .parse_directives(&[("resolve_kind_rewrite_name", "custom_library %{name} %{name}_lib")])
            .unwrap();
        let planner = Planner::new(&resolver).with_store(&store).with_config(&config);
        let edit = planner.plan_event(&event("//app", not_found("Foo"))).unwrap().unwrap();
        assert_eq!(edit.to_commands(), vec!["add deps //lib:foo_lib|//app".to_string()]);
    }
}
