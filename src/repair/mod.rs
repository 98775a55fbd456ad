//! The repair loop.
//!
//! Each iteration runs the build script. A clean exit ends the loop. On
//! failure the build event stream is read, stderr of failed actions and
//! progress messages are scanned for diagnostics, and the planned edits are
//! appended to the buildozer commands file for the script to apply on its
//! next run.

mod events;
mod plan;

pub use events::{read_events, read_events_file, uri_path, Action, BuildEvent, OutputFile, Progress};
pub use plan::{EditPlan, Hints, Planner, PROTO_DEP_SUFFIX};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::bazel::{self, ExecError};
use crate::codec;
use crate::diagnostics::{self, Event, ScanError, Scanner};
use crate::label::{Label, LabelError};
use crate::resolve::ResolveError;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: bad build event stream: {source}")]
    Events {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: bad hints file: {source}")]
    Hints {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("{label}: {source}")]
    InvalidLabel {
        label: String,
        #[source]
        source: LabelError,
    },
    #[error("no compilation unit for {0}")]
    NoUnit(String),
    #[error("{location}: incomplete match (no required-by symbol): {name}")]
    IncompleteMatch { location: String, name: String },
    #[error("{location}: {source}")]
    Resolve {
        location: String,
        #[source]
        source: ResolveError,
    },
    #[error("skipped missing dep (not a proto dep in proto-only mode): {name} {dep}|{target}")]
    Skipped { name: String, dep: String, target: String },
    #[error("{label}: {uri}: failed to discover any migration strategies")]
    NoMigrations { label: String, uri: String },
    #[error("iteration limit reached: {0}")]
    IterationLimit(usize),
    #[error("failed to make progress, aborting")]
    NoProgress,
}

/// Files and commands for one repair run.
#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub shell: PathBuf,
    pub script: PathBuf,
    pub script_args: Vec<String>,
    pub build_events_file: PathBuf,
    pub buildozer_commands_file: PathBuf,
    /// Zero means no limit.
    pub iterations: usize,
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// The build succeeded.
    Done,
    /// New commands were written.
    Progress { commands: usize, errors: usize },
}

/// Result of a completed repair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairSummary {
    /// Number of builds run, including the final clean one.
    pub builds: usize,
    pub commands_written: usize,
    pub errors: usize,
}

pub struct RepairDriver<'a> {
    options: RepairOptions,
    planner: Planner<'a>,
    label_mappings: Option<&'a HashMap<Label, Label>>,
}

impl<'a> RepairDriver<'a> {
    pub fn new(options: RepairOptions, planner: Planner<'a>) -> Self {
        Self {
            options,
            planner,
            label_mappings: None,
        }
    }

    /// Mappings applied to the labels of failed actions.
    pub fn with_label_mappings(mut self, mappings: &'a HashMap<Label, Label>) -> Self {
        self.label_mappings = Some(mappings);
        self
    }

    /// Run the build script until it succeeds.
    pub fn run(&self) -> Result<RepairSummary, RepairError> {
        let options = &self.options;
        self.run_with(|| {
            bazel::run_script(&options.shell, &options.script, &options.script_args).map_err(RepairError::from)
        })
    }

    /// Run the loop with a custom build step. `build` returns whether the
    /// build succeeded.
    pub fn run_with<F>(&self, mut build: F) -> Result<RepairSummary, RepairError>
    where
        F: FnMut() -> Result<bool, RepairError>,
    {
        let mut summary = RepairSummary::default();
        let mut n = 0;
        loop {
            if self.options.iterations != 0 && n == self.options.iterations {
                return Err(RepairError::IterationLimit(self.options.iterations));
            }
            summary.builds += 1;
            match self.iterate(n, &mut build)? {
                Iteration::Done => return Ok(summary),
                Iteration::Progress { commands, errors } => {
                    summary.commands_written += commands;
                    summary.errors += errors;
                }
            }
            n += 1;
        }
    }

    fn iterate<F>(&self, n: usize, build: &mut F) -> Result<Iteration, RepairError>
    where
        F: FnMut() -> Result<bool, RepairError>,
    {
        tracing::info!("--- ITERATION {} ---", n + 1);
        if build()? {
            return Ok(Iteration::Done);
        }

        let (events, mut errors) = self.collect_events();
        let mut plan = EditPlan::new();
        errors.extend(self.planner.plan(&events, &mut plan));
        log_error_group(n, &errors);

        let existing = read_commands(&self.options.buildozer_commands_file)?;
        let known: HashSet<&str> = existing.iter().map(String::as_str).collect();
        let fresh: Vec<String> = plan
            .commands()
            .into_iter()
            .filter(|c| !known.contains(c.as_str()))
            .collect();
        if fresh.is_empty() {
            return Err(RepairError::NoProgress);
        }

        for command in &fresh {
            tracing::info!("+ {}", command);
        }
        let mut all = existing.clone();
        all.extend(fresh.iter().cloned());
        write_commands(&self.options.buildozer_commands_file, &all)?;

        Ok(Iteration::Progress {
            commands: fresh.len(),
            errors: errors.len(),
        })
    }

    /// Scan every failed action and progress message of the last build.
    fn collect_events(&self) -> (Vec<Event>, Vec<RepairError>) {
        let mut errors = Vec::new();
        let build_events = match read_events_file(&self.options.build_events_file) {
            Ok(events) => events,
            Err(e) => return (Vec::new(), vec![e]),
        };

        let mut events = Vec::new();
        let mut seen = HashSet::new();
        let mut keep = |found: Vec<Event>, events: &mut Vec<Event>| {
            for event in found {
                if seen.insert(event.diagnostic.id()) {
                    events.push(event);
                }
            }
        };

        for build_event in &build_events {
            if let Some(action) = &build_event.action {
                if !action.failed() {
                    continue;
                }
                let path = match action.stderr_path() {
                    Some(path) => path,
                    None => continue,
                };
                match self.scan_action(action, &path) {
                    Ok(found) => keep(found, &mut events),
                    Err(e) => errors.push(e),
                }
            } else if let Some(progress) = &build_event.progress {
                if progress.stderr.is_empty() {
                    continue;
                }
                tracing::debug!("--- SCAN progress stderr ({}b)", progress.stderr.len());
                let mut scanner = Scanner::new();
                scanner.scan_text(&progress.stderr);
                keep(scanner.finish(), &mut events);
            }
        }
        (events, errors)
    }

    fn scan_action(&self, action: &Action, path: &Path) -> Result<Vec<Event>, RepairError> {
        let mut unit = Label::parse(&action.label).map_err(|source| RepairError::InvalidLabel {
            label: action.label.clone(),
            source,
        })?;
        if let Some(mapped) = self.label_mappings.and_then(|m| m.get(&unit)) {
            unit = mapped.clone();
        }
        let found = diagnostics::scan_file(path, Some(unit))?;
        if found.is_empty() {
            let uri = action.stderr.as_ref().map(|f| f.uri.clone()).unwrap_or_default();
            return Err(RepairError::NoMigrations {
                label: action.label.clone(),
                uri,
            });
        }
        Ok(found)
    }
}

fn log_error_group(n: usize, errors: &[RepairError]) {
    if errors.is_empty() {
        return;
    }
    tracing::warn!("got {} errors during iteration #{}", errors.len(), n + 1);
    for e in errors {
        tracing::warn!("  {}", e);
    }
}

/// Read the buildozer commands file; a missing file has no commands.
pub fn read_commands(path: &Path) -> Result<Vec<String>, RepairError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).map_err(|source| RepairError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn write_commands(path: &Path, commands: &[String]) -> Result<(), RepairError> {
    let mut text = commands.join("\n");
    text.push('\n');
    codec::write_with_mode(path, text.as_bytes()).map_err(|source| RepairError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Parse `FROM TO` label mapping lines. Blank lines and `#` comments are
/// skipped.
pub fn parse_label_mappings(text: &str) -> Result<HashMap<Label, Label>, RepairError> {
    let mut mappings = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 2 {
            tracing::warn!("bad label mapping line: {:?}", line);
            continue;
        }
        let parse = |s: &str| {
            Label::parse(s).map_err(|source| RepairError::InvalidLabel {
                label: s.to_string(),
                source,
            })
        };
        mappings.insert(parse(fields[0])?, parse(fields[1])?);
    }
    Ok(mappings)
}

pub fn load_label_mappings(path: &Path) -> Result<HashMap<Label, Label>, RepairError> {
    let text = fs::read_to_string(path).map_err(|source| RepairError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_label_mappings(&text)
}

/// Load a YAML hints file of the form `{file: {ShortName: full.Name}}`.
pub fn load_hints(path: &Path) -> Result<Hints, RepairError> {
    let text = fs::read_to_string(path).map_err(|source| RepairError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| RepairError::Hints {
        path: path.display().to_string(),
        source,
    })
}
