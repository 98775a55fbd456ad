//! The repair loop against recorded compiler output, with every resolver
//! layer populated.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use scala_depfix::archive::{ArchiveIndex, ArchiveRecord, ClassRecord};
use scala_depfix::diagnostics::{scan, Diagnostic};
use scala_depfix::facts::{FileFacts, RuleFacts};
use scala_depfix::repair::{read_commands, Planner, RepairDriver, RepairError, RepairOptions};
use scala_depfix::resolve::{ArchiveProvider, CrossResolver, ProtoProvider, ProviderRegistry, ResolverRegistry, SourceProvider};
use scala_depfix::Label;
use tempfile::TempDir;

fn testdata_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
}

fn label(s: &str) -> Label {
    Label::parse(s).expect("valid label")
}

fn resolver() -> CrossResolver {
    let mut foo = FileFacts::new("lib/Foo.scala");
    foo.packages = vec!["com.foo".to_string()];
    foo.classes = vec!["com.foo.Foo".to_string()];

    let index = ArchiveIndex {
        archives: vec![ArchiveRecord {
            filename: "guava.jar".to_string(),
            label: "@maven//:guava".to_string(),
            packages: vec!["com.google.common.collect".to_string()],
            classes: vec![ClassRecord {
                name: "com.google.common.collect.Lists".to_string(),
                ..Default::default()
            }],
        }],
        ..Default::default()
    };

    let mut providers = ProviderRegistry::new();
    providers.register(Box::new(SourceProvider::new(vec![RuleFacts::new(
        "//lib:foo",
        "scala_library",
        vec![foo],
    )])));
    providers.register(Box::new(ArchiveProvider::new(index)));
    providers.register(Box::new(ProtoProvider::new(vec![(
        "com.proto.Msg".to_string(),
        label("//proto:msg_scala_library"),
    )])));
    let table = providers.build_table().unwrap();
    CrossResolver::new(table, ResolverRegistry::with_defaults())
}

fn options(dir: &Path) -> RepairOptions {
    RepairOptions {
        shell: PathBuf::from("/bin/sh"),
        script: dir.join("build.sh"),
        script_args: Vec::new(),
        build_events_file: dir.join("events.json"),
        buildozer_commands_file: dir.join("commands.txt"),
        iterations: 5,
    }
}

fn write_events(dir: &Path, progress: &str) {
    let stderr = testdata_path().join("scalac_output.txt");
    let events = format!(
        "{{\"id\":{{\"started\":{{}}}},\"started\":{{\"uuid\":\"1\"}}}}\n\
         {{\"action\":{{\"label\":\"//app:app\",\"exitCode\":1,\"stderr\":{{\"name\":\"stderr\",\"uri\":\"file://{}\"}}}}}}\n\
         {{\"progress\":{{\"stderr\":{}}}}}\n",
        stderr.display(),
        serde_json::to_string(progress).unwrap(),
    );
    fs::write(dir.join("events.json"), events).unwrap();
}

#[test]
fn test_recorded_output_scans_in_order() {
    let output = fs::read(testdata_path().join("scalac_output.txt")).unwrap();
    let events = scan(&output);
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match &e.diagnostic {
            Diagnostic::NotFound { .. } => "not_found",
            Diagnostic::MissingSymbol { .. } => "missing_symbol",
            Diagnostic::NotAMemberOfPackage { .. } => "not_a_member",
            Diagnostic::UnusedDep { .. } => "unused_dep",
            Diagnostic::NoSuchTarget { .. } => "no_such_target",
            Diagnostic::RecommendedEdit { .. } => "recommended_edit",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "not_found",
            "missing_symbol",
            "not_a_member",
            "unused_dep",
            "no_such_target",
            "recommended_edit",
        ]
    );
    assert_eq!(events[0].unit, Some(label("//app:app")));

    // Scanning is stable.
    let again: Vec<String> = scan(&output).iter().map(|e| e.diagnostic.id()).collect();
    let first: Vec<String> = events.iter().map(|e| e.diagnostic.id()).collect();
    assert_eq!(first, again);
}

#[test]
fn test_repair_plans_every_layer() {
    let dir = TempDir::new().unwrap();
    write_events(dir.path(), "");
    let resolver = resolver();
    let driver = RepairDriver::new(options(dir.path()), Planner::new(&resolver));

    let calls = Cell::new(0);
    let summary = driver
        .run_with(|| {
            calls.set(calls.get() + 1);
            Ok(calls.get() > 1)
        })
        .unwrap();
    assert_eq!(summary.builds, 2);
    assert_eq!(summary.errors, 0);

    let commands = read_commands(&dir.path().join("commands.txt")).unwrap();
    assert_eq!(
        commands,
        vec![
            "add deps //lib:foo|//app",
            "add deps //proto:msg_scala_library|//app",
            "add deps @maven//:guava|//app",
            "remove deps //lib:old|//app",
            "remove deps //gone:lib|//app",
            "add deps //lib:extra|//app",
        ]
    );
}

#[test]
fn test_progress_stderr_is_scanned() {
    let dir = TempDir::new().unwrap();
    write_events(
        dir.path(),
        "warning: Target '//lib:stale' is specified as a dependency to //other:lib but isn't used, please remove it from the deps.\n",
    );
    let resolver = resolver();
    let driver = RepairDriver::new(options(dir.path()), Planner::new(&resolver));

    let calls = Cell::new(0);
    driver
        .run_with(|| {
            calls.set(calls.get() + 1);
            Ok(calls.get() > 1)
        })
        .unwrap();
    let commands = read_commands(&dir.path().join("commands.txt")).unwrap();
    assert_eq!(commands.last().map(String::as_str), Some("remove deps //lib:stale|//other:lib"));
}

#[test]
fn test_second_pass_without_new_commands_aborts() {
    let dir = TempDir::new().unwrap();
    write_events(dir.path(), "");
    let resolver = resolver();
    let driver = RepairDriver::new(options(dir.path()), Planner::new(&resolver));

    // The same output twice: the second iteration has nothing new to say.
    let err = driver.run_with(|| Ok(false)).unwrap_err();
    assert!(matches!(err, RepairError::NoProgress));
    assert_eq!(read_commands(&dir.path().join("commands.txt")).unwrap().len(), 6);
}
