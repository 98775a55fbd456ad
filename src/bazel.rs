//! Invoking the build tool and buildozer as subprocesses.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;
use thiserror::Error;

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with code {code}: {output}")]
    Failed {
        command: String,
        code: i32,
        output: String,
    },
}

/// Captured result of one build invocation.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// stdout followed by stderr.
    pub output: Vec<u8>,
    /// Process exit code; -1 when killed by a signal.
    pub exit_code: i32,
}

impl BuildOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Something that can build targets.
pub trait BuildTool {
    fn build(&self, targets: &[String]) -> Result<BuildOutput, ExecError>;
}

/// The `bazel` executable.
#[derive(Debug, Clone)]
pub struct Bazel {
    executable: PathBuf,
    workspace: PathBuf,
    flags: Vec<String>,
}

impl Bazel {
    /// An empty executable name defaults to `bazel`.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        let mut executable = executable.into();
        if executable.as_os_str().is_empty() {
            executable = PathBuf::from("bazel");
        }
        Self {
            executable,
            workspace: workspace_dir(),
            flags: Vec::new(),
        }
    }

    /// Extra flags passed after `build`.
    pub fn with_flags(mut self, flags: &[&str]) -> Self {
        self.flags = flags.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }
}

impl BuildTool for Bazel {
    fn build(&self, targets: &[String]) -> Result<BuildOutput, ExecError> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("build")
            .args(&self.flags)
            .args(targets)
            .current_dir(&self.workspace);
        let command_text = format!("{:?}", cmd);
        tracing::info!("🧱 {}", command_text);

        let out = cmd.output().map_err(|source| ExecError::Spawn {
            command: command_text,
            source,
        })?;
        let mut output = out.stdout;
        output.extend_from_slice(&out.stderr);
        Ok(BuildOutput {
            output,
            exit_code: out.status.code().unwrap_or(-1),
        })
    }
}

/// Run `shell script args...` with inherited stdio. Returns whether the
/// script exited 0.
pub fn run_script(shell: &Path, script: &Path, args: &[String]) -> Result<bool, ExecError> {
    let mut cmd = Command::new(shell);
    cmd.arg(script)
        .args(args)
        .current_dir(workspace_dir())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let command_text = format!("{:?}", cmd);
    tracing::info!("> {}", command_text);
    let status = cmd.status().map_err(|source| ExecError::Spawn {
        command: command_text,
        source,
    })?;
    Ok(status.success())
}

/// Apply buildozer commands by piping them to `buildozer -f -`.
pub fn run_buildozer(executable: &Path, commands: &[String]) -> Result<(), ExecError> {
    if commands.is_empty() {
        return Ok(());
    }
    let mut cmd = Command::new(executable);
    cmd.args(["-f", "-"])
        .current_dir(workspace_dir())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let command_text = format!("{:?}", cmd);
    tracing::info!("{} ({} commands)", command_text, commands.len());

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        command: command_text.clone(),
        source,
    })?;
    if let Some(mut stdin) = child.stdin.take() {
        let input = commands.join("\n") + "\n";
        stdin
            .write_all(input.as_bytes())
            .map_err(|source| ExecError::Spawn {
                command: command_text.clone(),
                source,
            })?;
    }
    let out = child.wait_with_output().map_err(|source| ExecError::Spawn {
        command: command_text.clone(),
        source,
    })?;
    // buildozer exits 3 when a command made no change
    match out.status.code() {
        Some(0) | Some(3) => Ok(()),
        code => Err(ExecError::Failed {
            command: command_text,
            code: code.unwrap_or(-1),
            output: String::from_utf8_lossy(&out.stderr).into_owned(),
        }),
    }
}

/// Working directory for build tool invocations: `BUILD_WORKSPACE_DIRECTORY`
/// when set, else the current directory.
pub fn workspace_dir() -> PathBuf {
    std::env::var_os("BUILD_WORKSPACE_DIRECTORY")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Create a temp directory, under `TEST_TMPDIR` when set.
pub fn temp_dir(prefix: &str) -> std::io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    match std::env::var_os("TEST_TMPDIR") {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            builder.tempdir_in(dir)
        }
        None => builder.tempdir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_output_text_and_success() {
        let out = BuildOutput {
            output: b"INFO: Build completed successfully".to_vec(),
            exit_code: 0,
        };
        assert!(out.success());
        assert!(out.text().contains("completed"));
    }

    #[test]
    fn test_bazel_defaults_executable() {
        let bazel = Bazel::new("");
        assert_eq!(bazel.executable, PathBuf::from("bazel"));
    }

    #[test]
    fn test_missing_executable_is_spawn_error() {
        let bazel = Bazel::new("/nonexistent/bazel-binary").with_workspace(".");
        let err = bazel.build(&["//a".to_string()]).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn test_temp_dir_is_removed_on_drop() {
        let dir = temp_dir("depfix-test").unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.exists());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn test_run_buildozer_without_commands_is_noop() {
        run_buildozer(Path::new("/nonexistent/buildozer"), &[]).unwrap();
    }
}
