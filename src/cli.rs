//! Command-line interface for scala-depfix.

use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use walkdir::WalkDir;

use crate::archive::{index_archive, merge_archives, ArchiveIndex, ArchiveRecord};
use crate::autokeep::{apply_delta_deps, make_delta_deps, merge_deps_from_imports, merge_deps_from_store, DepsMap};
use crate::bazel::{workspace_dir, Bazel, BuildTool};
use crate::buildfile::find_build_file;
use crate::codec;
use crate::config::Config;
use crate::diagnostics;
use crate::facts::{RuleFacts, RuleSet};
use crate::label::Label;
use crate::parser::{MemoParser, ParserServer, ParserServerOptions, RuleRequest};
use crate::repair::{load_hints, load_label_mappings, Planner, RepairDriver, RepairOptions, PROTO_DEP_SUFFIX};
use crate::report;
use crate::resolve::{
    parse_symbol_mappings, ArchiveProvider, CrossResolver, MavenProvider, ProtoProvider, ProviderRegistry,
    ResolverRegistry, SourceProvider,
};
use crate::store::FactStore;
use crate::sweep::Sweeper;
use crate::wildcard::{make_import_line, WildcardFixer};

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;

/// Extensions picked up when walking directories.
const SOURCE_EXTENSIONS: &[&str] = &["scala", "java"];

/// Rules parsed per progress-bar step.
const INDEX_BATCH: usize = 16;

static DEFAULT_CACHE_FILE: Lazy<Option<PathBuf>> = Lazy::new(FactStore::default_path);

/// Build-graph tooling for Scala/Bazel repositories.
///
/// Indexes the symbols provided by sources and jars, resolves the targets
/// that provide them, and repairs BUILD file deps from compiler output.
#[derive(Parser)]
#[command(name = "scala-depfix")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse source files under the given paths into a fact store
    Indexer(IndexerArgs),
    /// Index the classes of one jar
    ArchiveIndexer(ArchiveIndexerArgs),
    /// Merge archive records into one index
    MergeIndex(MergeIndexArgs),
    /// Parse the sources of one rule into a rule record
    FactExtract(FactExtractArgs),
    /// Merge rule records into a rule set
    FactMerge(FactMergeArgs),
    /// Build, scan and write buildozer commands until the build is green
    RepairDriver(RepairDriverArgs),
    /// Replace a wildcard import with the names it provides
    WildcardFixer(WildcardFixerArgs),
    /// Add missing deps (marked `# keep`) and drop unused ones
    Autokeep(AutokeepArgs),
    /// Remove `# TRANSITIVE` deps that the target builds without
    Sweep(SweepArgs),
}

/// How to launch the parser worker.
#[derive(Args, Clone)]
pub struct ParserArgs {
    /// Worker script
    #[arg(long = "parser_script")]
    pub parser_script: PathBuf,

    /// Interpreter that runs the worker script
    #[arg(long = "parser_interpreter", default_value = "node")]
    pub parser_interpreter: PathBuf,
}

#[derive(Parser)]
pub struct IndexerArgs {
    /// Source files or directories to walk
    pub paths: Vec<PathBuf>,

    #[arg(long = "output_file")]
    pub output_file: PathBuf,

    #[command(flatten)]
    pub parser: ParserArgs,

    /// Fact cache (default: user cache directory)
    #[arg(long = "cache_file")]
    pub cache_file: Option<PathBuf>,

    /// Kind recorded for each indexed package
    #[arg(long = "rule_kind", default_value = "scala_library")]
    pub rule_kind: String,
}

#[derive(Parser)]
pub struct ArchiveIndexerArgs {
    #[arg(long = "input_file")]
    pub input_file: PathBuf,

    #[arg(long = "output_file")]
    pub output_file: PathBuf,

    /// Label of the rule producing the jar; empty means the platform
    #[arg(long = "label", default_value = "")]
    pub label: String,
}

#[derive(Parser)]
pub struct MergeIndexArgs {
    /// Archive records to merge
    pub inputs: Vec<PathBuf>,

    #[arg(long = "output_file")]
    pub output_file: PathBuf,

    /// Labels whose classes are provided by the platform
    #[arg(long = "predefined", value_delimiter = ',')]
    pub predefined: Vec<String>,

    /// Preferred provider, as `NAME=LABEL`
    #[arg(long = "preferred")]
    pub preferred: Vec<String>,
}

#[derive(Parser)]
pub struct FactExtractArgs {
    /// Source files of the rule
    pub files: Vec<PathBuf>,

    #[arg(long = "output_file")]
    pub output_file: PathBuf,

    #[arg(long = "rule_label")]
    pub rule_label: String,

    #[arg(long = "rule_kind", default_value = "scala_library")]
    pub rule_kind: String,

    #[command(flatten)]
    pub parser: ParserArgs,

    /// Fact cache consulted before parsing
    #[arg(long = "cache_file")]
    pub cache_file: Option<PathBuf>,
}

#[derive(Parser)]
pub struct FactMergeArgs {
    /// Rule records to merge
    pub inputs: Vec<PathBuf>,

    #[arg(long = "output_file")]
    pub output_file: PathBuf,
}

#[derive(Parser)]
pub struct RepairDriverArgs {
    #[arg(long = "build_events_file")]
    pub build_events_file: PathBuf,

    #[arg(long = "shell", default_value = "/bin/bash")]
    pub shell: PathBuf,

    /// Build script; exits 0 when the build is green
    #[arg(long = "script")]
    pub script: PathBuf,

    #[arg(long = "script_args", value_delimiter = ',')]
    pub script_args: Vec<String>,

    /// Iteration limit; 0 means no limit
    #[arg(long = "iterations", default_value_t = 0)]
    pub iterations: usize,

    #[arg(long = "buildozer_commands_file")]
    pub buildozer_commands_file: PathBuf,

    /// `FROM TO` label rewrites
    #[arg(long = "label_mappings_file")]
    pub label_mappings_file: Option<PathBuf>,

    /// `SYMBOL ALIAS` lines
    #[arg(long = "symbol_mappings_file")]
    pub symbol_mappings_file: Option<PathBuf>,

    /// `IMPORT LABEL` lines
    #[arg(long = "imports_file")]
    pub imports_file: Option<PathBuf>,

    /// Fact store with source rules
    #[arg(long = "fact_store_file")]
    pub fact_store_file: Option<PathBuf>,

    /// Merged archive indexes
    #[arg(long = "index_file")]
    pub index_files: Vec<PathBuf>,

    /// Pinned maven `NAME_install.json` files
    #[arg(long = "maven_install_file")]
    pub maven_install_files: Vec<PathBuf>,

    /// YAML map of file → short name → full name
    #[arg(long = "hints_file")]
    pub hints_file: Option<PathBuf>,

    /// File holding `# gazelle:` directives
    #[arg(long = "config_file")]
    pub config_file: Option<PathBuf>,

    /// Only add deps on generated proto libraries
    #[arg(long = "proto_only")]
    pub proto_only: bool,
}

#[derive(Parser)]
pub struct WildcardFixerArgs {
    #[arg(long = "rule_label")]
    pub rule_label: String,

    #[arg(long = "target_filename")]
    pub target_filename: PathBuf,

    #[arg(long = "import_prefix")]
    pub import_prefix: String,

    #[arg(long = "bazel_executable", default_value = "bazel")]
    pub bazel_executable: PathBuf,
}

/// Sources of the `IMPORT → LABEL` map.
#[derive(Args, Clone)]
pub struct DepsMapArgs {
    /// Fact store whose declarations map to their rules
    #[arg(long = "cache_file")]
    pub cache_file: Option<PathBuf>,

    /// `IMPORT LABEL` lines
    #[arg(long = "imports_file")]
    pub imports_file: Option<PathBuf>,
}

#[derive(Parser)]
pub struct AutokeepArgs {
    /// Targets to build
    pub targets: Vec<String>,

    #[command(flatten)]
    pub deps: DepsMapArgs,

    /// Mark added deps `# keep`
    #[arg(long = "keep")]
    pub keep: bool,

    #[arg(long = "bazel_executable", default_value = "bazel")]
    pub bazel_executable: PathBuf,
}

#[derive(Parser)]
pub struct SweepArgs {
    /// Target whose transitive deps are swept
    pub target: String,

    #[arg(long = "bazel_executable", default_value = "bazel")]
    pub bazel_executable: PathBuf,

    /// BUILD file of the target (default: found from its package)
    #[arg(long = "build_file")]
    pub build_file: Option<PathBuf>,

    /// Repair the target until it builds before sweeping
    #[arg(long = "fix")]
    pub fix: bool,

    #[command(flatten)]
    pub deps: DepsMapArgs,

    /// Mark deps added by --fix `# keep`
    #[arg(long = "keep")]
    pub keep: bool,
}

/// Replace `@FILE` arguments with the lines of FILE. Arguments that merely
/// start with `@`, such as external labels, are left alone.
pub fn expand_params<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::new();
    for arg in args {
        match arg.strip_prefix('@') {
            Some(path) if Path::new(path).is_file() => {
                let text = fs::read_to_string(path).with_context(|| format!("reading params file {}", path))?;
                out.extend(
                    text.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                );
            }
            _ => out.push(arg),
        }
    }
    Ok(out)
}

/// Run a parsed command.
pub fn run(command: &Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Indexer(args) => run_indexer(args),
        Commands::ArchiveIndexer(args) => run_archive_indexer(args),
        Commands::MergeIndex(args) => run_merge_index(args),
        Commands::FactExtract(args) => run_fact_extract(args),
        Commands::FactMerge(args) => run_fact_merge(args),
        Commands::RepairDriver(args) => run_repair_driver(args),
        Commands::WildcardFixer(args) => run_wildcard_fixer(args),
        Commands::Autokeep(args) => run_autokeep(args),
        Commands::Sweep(args) => run_sweep(args),
    }
}

fn absolutize(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Source files named by `paths`, walking directories.
fn collect_sources(root: &Path, paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let path = absolutize(root, path);
        if path.is_file() {
            files.push(path);
            continue;
        }
        for entry in WalkDir::new(&path).into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            // Hidden directories and bazel output symlinks
            !(e.file_type().is_dir() && e.depth() > 0 && (name.starts_with('.') || name.starts_with("bazel-")))
        }) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
            if SOURCE_EXTENSIONS.contains(&ext) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// One request per directory, labelled after the directory's package.
fn group_by_package(root: &Path, files: &[PathBuf], kind: &str) -> Vec<RuleRequest> {
    let mut by_pkg: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        let dir = file.parent().unwrap_or(root);
        let pkg = dir
            .strip_prefix(root)
            .unwrap_or(dir)
            .to_string_lossy()
            .trim_matches('/')
            .to_string();
        by_pkg.entry(pkg).or_default().push(file.clone());
    }
    by_pkg
        .into_iter()
        .map(|(pkg, srcs)| {
            let name = pkg.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or("root");
            RuleRequest {
                label: Label::new("", &pkg, name).to_string(),
                kind: kind.to_string(),
                srcs,
            }
        })
        .collect()
}

fn start_parser(args: &ParserArgs) -> anyhow::Result<ParserServer> {
    let mut options = ParserServerOptions::new(&args.parser_script);
    options.interpreter = args.parser_interpreter.clone();
    let mut server = ParserServer::new(options)?;
    server.start()?;
    Ok(server)
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

/// Run the indexer command.
pub fn run_indexer(args: &IndexerArgs) -> anyhow::Result<i32> {
    let root = workspace_dir();
    let files = collect_sources(&root, &args.paths)?;
    if files.is_empty() {
        tracing::warn!("no source files to index");
    }
    let requests = group_by_package(&root, &files, &args.rule_kind);

    let cache_path = args.cache_file.clone().or_else(|| DEFAULT_CACHE_FILE.clone());
    let cache = cache_path.as_deref().map(FactStore::load).unwrap_or_default();
    let mut memo = MemoParser::new(start_parser(&args.parser)?, cache, &root);

    let bar = progress_bar(requests.len());
    let mut output = FactStore::new();
    let mut failed = 0;
    for chunk in requests.chunks(INDEX_BATCH) {
        for (request, result) in chunk.iter().zip(memo.parse_rules(chunk)) {
            bar.set_message(request.label.clone());
            match result {
                Ok(rule) => {
                    for file in rule.errored_files() {
                        tracing::warn!("{}: parse error in {}", request.label, file);
                    }
                    output.store_rule(rule);
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!("{}: {}", request.label, e);
                }
            }
            bar.inc(1);
        }
    }
    bar.finish_and_clear();

    let (hits, misses) = memo.cache_stats();
    tracing::info!(
        "indexed {} files in {} rules ({} cached, {} parsed)",
        output.file_count(),
        output.rule_count(),
        hits,
        misses
    );
    if let Some(path) = &cache_path {
        if let Err(e) = memo.store().save(path) {
            tracing::warn!("failed to save fact cache: {}", e);
        }
    }
    output.save(&args.output_file)?;

    Ok(if failed == 0 { EXIT_SUCCESS } else { EXIT_FAILED })
}

/// Run the archive-indexer command.
pub fn run_archive_indexer(args: &ArchiveIndexerArgs) -> anyhow::Result<i32> {
    let record = index_archive(&args.input_file, &args.label)?;
    tracing::info!(
        "{}: {} classes in {} packages",
        args.input_file.display(),
        record.classes.len(),
        record.packages.len()
    );
    codec::write_file(&args.output_file, &record)?;
    Ok(EXIT_SUCCESS)
}

/// Run the merge-index command.
pub fn run_merge_index(args: &MergeIndexArgs) -> anyhow::Result<i32> {
    let mut records = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        records.push(codec::read_file::<ArchiveRecord>(input)?);
    }
    let mut preferred = BTreeMap::new();
    for pair in &args.preferred {
        let (name, label) = pair
            .split_once('=')
            .with_context(|| format!("--preferred wants NAME=LABEL, got {:?}", pair))?;
        preferred.insert(name.to_string(), label.to_string());
    }

    let (index, merge_report) = merge_archives(records, &args.predefined, preferred);
    report::log_merge_report(&merge_report);
    tracing::info!(
        "merged {} archives ({} warnings)",
        index.archives.len(),
        merge_report.warning_count()
    );
    codec::write_file(&args.output_file, &index)?;
    Ok(EXIT_SUCCESS)
}

/// Run the fact-extract command.
pub fn run_fact_extract(args: &FactExtractArgs) -> anyhow::Result<i32> {
    let root = workspace_dir();
    let cache = args.cache_file.as_deref().map(FactStore::load).unwrap_or_default();
    let mut memo = MemoParser::new(start_parser(&args.parser)?, cache, &root);

    let request = RuleRequest {
        label: args.rule_label.clone(),
        kind: args.rule_kind.clone(),
        srcs: args.files.iter().map(|f| absolutize(&root, f)).collect(),
    };
    let rule = memo.parse_rule(&request)?;
    codec::write_file(&args.output_file, &rule)?;

    let errored = rule.errored_files();
    for file in &errored {
        tracing::error!("{}: parse error in {}", rule.label, file);
    }
    if let Some(path) = &args.cache_file {
        if let Err(e) = memo.store().save(path) {
            tracing::warn!("failed to save fact cache: {}", e);
        }
    }
    Ok(if errored.is_empty() { EXIT_SUCCESS } else { EXIT_FAILED })
}

/// Run the fact-merge command.
pub fn run_fact_merge(args: &FactMergeArgs) -> anyhow::Result<i32> {
    let mut rules = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        rules.push(codec::read_file::<RuleFacts>(input)?);
    }
    let set = RuleSet::new(rules);
    tracing::info!("merged {} rules", set.rules.len());
    codec::write_file(&args.output_file, &set)?;
    Ok(EXIT_SUCCESS)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Option<Config>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let mut config = Config::new("");
    config.load(path)?;
    Ok(Some(config))
}

fn build_resolver(
    args: &RepairDriverArgs,
    store: Option<&FactStore>,
    config: Option<&Config>,
) -> anyhow::Result<CrossResolver> {
    let mut providers = ProviderRegistry::new();
    if let Some(store) = store {
        providers.register(Box::new(SourceProvider::new(store.rules().cloned().collect())));
    }
    for path in &args.index_files {
        let index: ArchiveIndex = codec::read_file(path)?;
        providers.register(Box::new(ArchiveProvider::new(index)));
    }
    if let Some(path) = &args.imports_file {
        providers.register(Box::new(ProtoProvider::load(path)?));
    }
    for path in &args.maven_install_files {
        providers.register(Box::new(MavenProvider::load(path)?));
    }
    let table = providers.build_table()?;

    let defaults = ResolverRegistry::with_defaults();
    let conflicts = match config {
        Some(config) => defaults.select(config.conflict_resolvers())?,
        None => defaults,
    };
    let mappings = match &args.symbol_mappings_file {
        Some(path) => parse_symbol_mappings(
            &fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        ),
        None => Vec::new(),
    };
    Ok(CrossResolver::new(table, conflicts).with_mappings(mappings))
}

/// Run the repair-driver command.
pub fn run_repair_driver(args: &RepairDriverArgs) -> anyhow::Result<i32> {
    let store = args.fact_store_file.as_deref().map(FactStore::load);
    let config = load_config(args.config_file.as_deref())?;
    let resolver = build_resolver(args, store.as_ref(), config.as_ref())?;
    let label_mappings = args.label_mappings_file.as_deref().map(load_label_mappings).transpose()?;
    let hints = args.hints_file.as_deref().map(load_hints).transpose()?;

    let mut planner = Planner::new(&resolver);
    if let Some(mappings) = &label_mappings {
        planner = planner.with_label_mappings(mappings);
    }
    if let Some(store) = &store {
        planner = planner.with_store(store);
    }
    if let Some(hints) = &hints {
        planner = planner.with_hints(hints);
    }
    if let Some(config) = &config {
        planner = planner.with_config(config);
    }
    if args.proto_only {
        planner = planner.proto_only(PROTO_DEP_SUFFIX);
    }

    let options = RepairOptions {
        shell: args.shell.clone(),
        script: args.script.clone(),
        script_args: args.script_args.clone(),
        build_events_file: args.build_events_file.clone(),
        buildozer_commands_file: args.buildozer_commands_file.clone(),
        iterations: args.iterations,
    };
    let mut driver = RepairDriver::new(options, planner);
    if let Some(mappings) = &label_mappings {
        driver = driver.with_label_mappings(mappings);
    }
    let summary = driver.run()?;
    report::write_repair_summary(&summary);
    Ok(EXIT_SUCCESS)
}

/// Run the wildcard-fixer command.
pub fn run_wildcard_fixer(args: &WildcardFixerArgs) -> anyhow::Result<i32> {
    let workspace = workspace_dir();
    let filename = absolutize(&workspace, &args.target_filename);
    let fixer = WildcardFixer::new(Bazel::new(&args.bazel_executable).with_workspace(&workspace));
    let symbols = fixer.fix(&args.rule_label, &filename, &args.import_prefix)?;
    let line = make_import_line(&args.import_prefix, &symbols)?;
    report::write_wildcard(&args.target_filename.to_string_lossy(), &line, &symbols);
    Ok(EXIT_SUCCESS)
}

fn load_deps_map(args: &DepsMapArgs) -> anyhow::Result<DepsMap> {
    let mut deps = DepsMap::new();
    if let Some(path) = &args.cache_file {
        merge_deps_from_store(&mut deps, &FactStore::load(path));
    }
    if let Some(path) = &args.imports_file {
        let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
        merge_deps_from_imports(&mut deps, BufReader::new(file))?;
    }
    tracing::debug!("deps map holds {} symbols", deps.len());
    Ok(deps)
}

/// Run the autokeep command.
pub fn run_autokeep(args: &AutokeepArgs) -> anyhow::Result<i32> {
    let workspace = workspace_dir();
    let bazel = Bazel::new(&args.bazel_executable)
        .with_workspace(&workspace)
        .with_flags(&["--keep_going"]);
    let output = bazel.build(&args.targets)?;
    if output.success() {
        tracing::info!("build is green, nothing to do");
        return Ok(EXIT_SUCCESS);
    }

    let deps = load_deps_map(&args.deps)?;
    let events = diagnostics::scan(&output.output);
    let delta = make_delta_deps(&events, &deps, None, None);
    report::write_delta(&delta);
    if delta.is_empty() {
        eprintln!("{}", output.text());
        return Ok(EXIT_FAILED);
    }
    for path in apply_delta_deps(&workspace, &delta, args.keep)? {
        tracing::info!("updated {}", path.display());
    }
    Ok(EXIT_SUCCESS)
}

/// Run the sweep command.
pub fn run_sweep(args: &SweepArgs) -> anyhow::Result<i32> {
    let workspace = workspace_dir();
    let target = Label::parse(&args.target)?;
    let build_file = match &args.build_file {
        Some(path) => absolutize(&workspace, path),
        None => find_build_file(&workspace, &target.pkg)
            .with_context(|| format!("no BUILD file for {}", target))?,
    };

    if args.fix {
        let deps = load_deps_map(&args.deps)?;
        let bazel = Bazel::new(&args.bazel_executable)
            .with_workspace(&workspace)
            .with_flags(&["--keep_going"]);
        let summary = Sweeper::new(&bazel, &workspace)
            .with_deps(&deps)
            .with_keep(args.keep)
            .fix_until_green(std::slice::from_ref(&target))?;
        report::write_fix(&summary);
    }

    let bazel = Bazel::new(&args.bazel_executable).with_workspace(&workspace);
    let removed = Sweeper::new(&bazel, &workspace).sweep_transitive(&target, &build_file)?;
    report::write_sweep(&target, &removed);
    Ok(EXIT_SUCCESS)
}
