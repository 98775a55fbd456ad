//! Transitive-dep sweeping and the build-until-green loop.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::autokeep::{apply_delta_deps, make_delta_deps, DepsMap};
use crate::bazel::{BuildTool, ExecError};
use crate::buildfile::{BuildFile, EditError};
use crate::diagnostics::scan;
use crate::label::Label;
use crate::resolve::CrossResolver;
use crate::store::FactStore;

/// Trailing comment marking a dep added only to satisfy a transitive need.
pub const TRANSITIVE_COMMENT: &str = "# TRANSITIVE";

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error("target must build first: {target}\n{output}")]
    MustBuildFirst { target: Label, output: String },
    #[error(
        "build failed, but the corrective action(s) could not be determined.  Manual intervention is required:\n{output}"
    )]
    Undetermined { output: String },
}

/// Outcome of `fix_until_green`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixSummary {
    pub builds: usize,
    pub changed_files: Vec<PathBuf>,
}

pub struct Sweeper<'a, B: BuildTool> {
    build: &'a B,
    workspace: PathBuf,
    deps: Option<&'a DepsMap>,
    resolver: Option<&'a CrossResolver>,
    store: Option<&'a FactStore>,
    keep: bool,
}

impl<'a, B: BuildTool> Sweeper<'a, B> {
    pub fn new(build: &'a B, workspace: impl Into<PathBuf>) -> Self {
        Self {
            build,
            workspace: workspace.into(),
            deps: None,
            resolver: None,
            store: None,
            keep: false,
        }
    }

    pub fn with_deps(mut self, deps: &'a DepsMap) -> Self {
        self.deps = Some(deps);
        self
    }

    pub fn with_resolver(mut self, resolver: &'a CrossResolver, store: Option<&'a FactStore>) -> Self {
        self.resolver = Some(resolver);
        self.store = store;
        self
    }

    /// Mark added deps `# keep`.
    pub fn with_keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Remove `TRANSITIVE` deps of `target` one at a time, from the last
    /// one up, keeping each removal only if the target still builds.
    /// Returns the removed deps.
    pub fn sweep_transitive(&self, target: &Label, build_file: &Path) -> Result<Vec<Label>, SweepError> {
        let pattern = target.to_string();
        let initial = self.build.build(&[pattern.clone()])?;
        if !initial.success() {
            return Err(SweepError::MustBuildFirst {
                target: target.clone(),
                output: initial.text(),
            });
        }

        let mut file = BuildFile::load(build_file, &target.pkg)?;
        let candidates: Vec<Label> = file
            .deps(&target.name)?
            .iter()
            .filter(|entry| entry.has_comment(TRANSITIVE_COMMENT))
            .filter_map(|entry| entry.value().and_then(|v| Label::parse(v).ok()))
            .collect();
        tracing::info!("{}: {} transitive deps to sweep", target, candidates.len());

        let mut removed = Vec::new();
        for dep in candidates.iter().rev() {
            let snapshot = file.clone();
            if !file.remove_dep(&target.name, dep)? {
                continue;
            }
            file.save()?;
            if self.build.build(&[pattern.clone()])?.success() {
                tracing::info!("{}: removed transitive dep {}", target, dep);
                removed.push(dep.clone());
            } else {
                tracing::info!("{}: transitive dep {} is required", target, dep);
                file = snapshot;
                file.save()?;
            }
        }
        Ok(removed)
    }

    /// Build, scan the output for fixes, apply them, and build again until
    /// the targets are green.
    pub fn fix_until_green(&self, targets: &[Label]) -> Result<FixSummary, SweepError> {
        let empty = DepsMap::new();
        let deps = self.deps.unwrap_or(&empty);
        let mut targets: BTreeSet<Label> = targets.iter().cloned().collect();
        let mut summary = FixSummary::default();

        loop {
            let specs: Vec<String> = targets.iter().map(Label::to_string).collect();
            let output = self.build.build(&specs)?;
            summary.builds += 1;
            if output.success() {
                tracing::info!("build #{} is green", summary.builds);
                return Ok(summary);
            }

            let events = scan(&output.output);
            let delta = make_delta_deps(&events, deps, self.resolver, self.store);
            if delta.is_empty() {
                return Err(SweepError::Undetermined { output: output.text() });
            }
            let changed = apply_delta_deps(&self.workspace, &delta, self.keep)?;
            if changed.is_empty() {
                return Err(SweepError::Undetermined { output: output.text() });
            }
            for file in changed {
                if !summary.changed_files.contains(&file) {
                    summary.changed_files.push(file);
                }
            }
            targets.extend(delta.rules().into_iter().cloned());
        }
    }
}
