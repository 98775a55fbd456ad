//! End-to-end checks of the documented seed scenarios.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use scala_depfix::archive::{convert_class_name, package_of};
use scala_depfix::bazel::{BuildOutput, BuildTool, ExecError};
use scala_depfix::buildfile::{BuildFile, Edit};
use scala_depfix::diagnostics::{scan, Diagnostic};
use scala_depfix::facts::{FileFacts, RuleFacts};
use scala_depfix::repair::{EditPlan, Planner};
use scala_depfix::resolve::{
    CrossResolver, Resolution, ResolveContext, ResolverRegistry, SourceProvider, SymbolProvider,
};
use scala_depfix::symbols::SymbolTable;
use scala_depfix::wildcard::{make_import_line, WildcardFixer};
use scala_depfix::Label;
use tempfile::TempDir;

fn label(s: &str) -> Label {
    Label::parse(s).expect("valid label")
}

#[test]
fn test_archive_class_name_conversion() {
    let internal = "javax/activation/CommandInfo$Beans";
    assert_eq!(convert_class_name(internal), "javax.activation.CommandInfo.Beans");
    assert_eq!(package_of(internal), "javax.activation");
}

#[test]
fn test_missing_symbol_parse() {
    let output = b"omnistac/gum/dao/AuthDao.scala:32: error: Symbol 'type omnistac.gum.entity.Foo' is missing from the classpath.
This symbol is required by 'value omnistac.core.util.data.DataUtil.bar'.
";
    let events = scan(output);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].diagnostic,
        Diagnostic::MissingSymbol {
            file: Some("omnistac/gum/dao/AuthDao.scala".to_string()),
            line: Some(32),
            full_name: "omnistac.gum.entity.Foo".to_string(),
            required_by: Some("omnistac.core.util.data.DataUtil.bar".to_string()),
        }
    );
}

#[test]
fn test_no_such_target_becomes_remove_dep() {
    let output = b"ERROR: /ws/a/BUILD.bazel:177:18: no such target '//b:c': target 'c' not declared in package 'b' defined by /ws/b/BUILD.bazel and referenced by '//x:y'\n";
    let events = scan(output);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].diagnostic,
        Diagnostic::NoSuchTarget {
            file: "/ws/a/BUILD.bazel".to_string(),
            line: 177,
            col: 18,
            missing_dep: label("//b:c"),
            referenced_by: label("//x:y"),
        }
    );

    let resolver = CrossResolver::new(SymbolTable::new(), ResolverRegistry::with_defaults());
    let edit = Planner::new(&resolver).plan_event(&events[0]).unwrap();
    assert_eq!(
        edit,
        Some(Edit::RemoveDep {
            target: label("//x:y"),
            dep: label("//b:c"),
        })
    );
}

/// Builds green unless the wildcard is gone and a used name is missing.
struct WildcardBuild {
    file: PathBuf,
    calls: RefCell<usize>,
}

impl BuildTool for WildcardBuild {
    fn build(&self, _targets: &[String]) -> Result<BuildOutput, ExecError> {
        *self.calls.borrow_mut() += 1;
        let text = fs::read_to_string(&self.file).unwrap();
        let has = |line: &str| text.lines().any(|l| l.trim() == line);
        let ok = has("import foo._") || has("import foo.{Bar, Baz}");
        let output = if ok {
            Vec::new()
        } else {
            b"app/A.scala:5: error: not found: type Bar\napp/A.scala:6: error: not found: value Baz\n".to_vec()
        };
        Ok(BuildOutput {
            output,
            exit_code: if ok { 0 } else { 1 },
        })
    }
}

#[test]
fn test_wildcard_expansion() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("A.scala");
    fs::write(
        &file,
        "package app\n\nimport foo._\n\nobject A {\n  val b: Bar = ???\n  val z = Baz\n}\n",
    )
    .unwrap();

    let build = WildcardBuild {
        file: file.clone(),
        calls: RefCell::new(0),
    };
    let fixer = WildcardFixer::new(build);
    let names = fixer.fix("//app", &file, "foo").unwrap();
    assert_eq!(names, vec!["Bar", "Baz"]);
    assert_eq!(make_import_line("foo", &names).unwrap(), "import foo.{Bar, Baz}");

    let text = fs::read_to_string(&file).unwrap();
    assert!(text.contains("\nimport foo.{Bar, Baz}\n"));
    assert!(!text.contains("foo._"));
    assert!(text.ends_with("}\n"));
}

#[test]
fn test_conflict_file_scope_tiebreak() {
    let mut a = FileFacts::new("a/Name.scala");
    a.classes = vec!["a.pkg.Name".to_string()];
    let mut b = FileFacts::new("b/Name.scala");
    b.classes = vec!["b.other.Name".to_string()];

    let mut table = SymbolTable::new();
    SourceProvider::new(vec![
        RuleFacts::new("//a", "scala_library", vec![a]),
        RuleFacts::new("//b", "scala_library", vec![b]),
    ])
    .provide(&mut table)
    .unwrap();
    let resolver = CrossResolver::new(table, ResolverRegistry::with_defaults());

    let mut referencing = FileFacts::new("a/Use.scala");
    referencing.packages = vec!["a.pkg".to_string()];
    let ctx = ResolveContext::new().with_file(&referencing);
    assert_eq!(resolver.resolve("Name", &ctx).unwrap(), Resolution::Label(label("//a")));

    // Without a file scope the name stays ambiguous.
    assert!(resolver.resolve("Name", &ResolveContext::new()).is_err());
}

#[test]
fn test_duplicate_keep_dep_added_once() {
    let edit = Edit::AddDep {
        target: label("//app"),
        dep: label("//lib:foo"),
        keep: true,
    };
    let mut plan = EditPlan::new();
    assert!(plan.push(edit.clone()));
    assert!(!plan.push(edit.clone()));
    assert_eq!(plan.len(), 1);

    let mut file = BuildFile::parse(
        "scala_library(\n    name = \"app\",\n    deps = [\n        \"//a\",\n    ],\n)\n",
        &PathBuf::from("app/BUILD"),
        "app",
    );
    assert!(file.apply(&edit).unwrap());
    assert!(!file.apply(&edit).unwrap());
    assert_eq!(file.content().matches("//lib:foo").count(), 1);
    assert!(file.content().contains("\"//lib:foo\",  # keep"));
}
