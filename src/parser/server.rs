//! Out-of-process parser worker.
//!
//! The worker is a script run by an interpreter (node by default). It
//! listens on the port given in its `PORT` environment variable and answers
//! `POST /` requests of the form `{"label": ..., "filenames": [...]}` with
//! `{"files": [...], "elapsedMillis": N}`.

use std::collections::BTreeMap;
use std::fs;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use super::{LanguageParser, ParseBatch, ParseError};
use crate::bazel;
use crate::facts::FileFacts;

const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Concurrent requests issued by [`LanguageParser::parse_many`].
const MAX_IN_FLIGHT: usize = 4;

/// Options for launching the worker.
#[derive(Debug, Clone)]
pub struct ParserServerOptions {
    /// Interpreter used to run the script.
    pub interpreter: PathBuf,
    /// Worker script; copied into the worker's private temp directory.
    pub script: PathBuf,
    /// How long to wait for the worker to accept connections.
    pub startup_timeout: Duration,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
}

impl ParserServerOptions {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: PathBuf::from("node"),
            script: script.into(),
            startup_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct ParseRequest<'a> {
    label: &'a str,
    filenames: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ParseResponse {
    files: Vec<WorkerFile>,
    elapsed_millis: u64,
    error: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WorkerFile {
    filename: String,
    packages: Vec<String>,
    imports: Vec<String>,
    classes: Vec<String>,
    objects: Vec<String>,
    traits: Vec<String>,
    types: Vec<String>,
    vals: Vec<String>,
    names: Vec<String>,
    extends: BTreeMap<String, WorkerSymbolList>,
    error: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WorkerSymbolList {
    classes: Vec<String>,
}

impl From<WorkerFile> for FileFacts {
    fn from(w: WorkerFile) -> Self {
        let mut facts = FileFacts {
            filename: w.filename,
            sha256: String::new(),
            packages: w.packages,
            classes: w.classes,
            objects: w.objects,
            traits: w.traits,
            types: w.types,
            vals: w.vals,
            imports: w.imports,
            names: w.names,
            extends: w
                .extends
                .into_iter()
                .map(|(k, v)| (k, v.classes))
                .collect(),
            error: w.error.filter(|e| !e.is_empty()),
        };
        facts.normalize();
        facts
    }
}

/// Handle to a running parser worker.
///
/// Dropping the handle stops the worker and removes its temp directory.
pub struct ParserServer {
    options: ParserServerOptions,
    runtime: tokio::runtime::Runtime,
    tmp_dir: Option<TempDir>,
    child: Option<Child>,
    client: Option<reqwest::Client>,
    port: u16,
}

impl ParserServer {
    pub fn new(options: ParserServerOptions) -> Result<Self, ParseError> {
        let runtime = tokio::runtime::Runtime::new().map_err(ParseError::Launch)?;
        Ok(Self {
            options,
            runtime,
            tmp_dir: None,
            child: None,
            client: None,
            port: 0,
        })
    }

    /// Port the worker listens on; 0 before `start`.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Launch the worker and wait until it accepts connections.
    pub fn start(&mut self) -> Result<(), ParseError> {
        if self.is_running() {
            return Ok(());
        }

        let tmp_dir = bazel::temp_dir("scala-parser").map_err(ParseError::Launch)?;
        let script = install_script(&self.options.script, tmp_dir.path())?;
        let port = free_port().map_err(ParseError::Launch)?;

        tracing::debug!(
            port,
            script = %script.display(),
            interpreter = %self.options.interpreter.display(),
            "starting parser worker"
        );

        let child = Command::new(&self.options.interpreter)
            .arg(&script)
            .env("PORT", port.to_string())
            .current_dir(tmp_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(ParseError::Launch)?;

        self.tmp_dir = Some(tmp_dir);
        self.child = Some(child);
        self.port = port;

        if let Err(e) = self.wait_until_ready() {
            self.stop();
            return Err(e);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("scala-depfix/", env!("CARGO_PKG_VERSION")))
            .timeout(self.options.request_timeout)
            .build();
        match client {
            Ok(client) => {
                self.client = Some(client);
                Ok(())
            }
            Err(e) => {
                self.stop();
                Err(ParseError::Network(e))
            }
        }
    }

    fn wait_until_ready(&mut self) -> Result<(), ParseError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let timeout = self.options.startup_timeout;
        let started = Instant::now();
        loop {
            if TcpStream::connect_timeout(&addr, PROBE_INTERVAL).is_ok() {
                tracing::debug!(port = self.port, elapsed = ?started.elapsed(), "parser worker ready");
                return Ok(());
            }
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(ParseError::Exited(status.to_string()));
                }
            }
            if started.elapsed() >= timeout {
                return Err(ParseError::Probe {
                    port: self.port,
                    timeout,
                });
            }
            std::thread::sleep(PROBE_INTERVAL);
        }
    }

    /// Stop the worker. Safe to call more than once.
    pub fn stop(&mut self) {
        // Dropping the client closes its idle connections.
        self.client = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!("killing parser worker: {}", e);
            }
            let _ = child.wait();
        }
        if let Some(dir) = self.tmp_dir.take() {
            if let Err(e) = dir.close() {
                tracing::warn!("removing parser temp dir: {}", e);
            }
        }
        self.port = 0;
    }

    fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }
}

impl Drop for ParserServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LanguageParser for ParserServer {
    fn parse(&self, label: &str, paths: &[PathBuf]) -> Result<Vec<FileFacts>, ParseError> {
        let client = self.client.as_ref().ok_or(ParseError::NotStarted)?;
        self.runtime
            .block_on(send_request(client, self.url(), label, paths))
    }

    fn parse_many(&self, batches: &[ParseBatch]) -> Vec<Result<Vec<FileFacts>, ParseError>> {
        use futures::stream::{self, StreamExt};

        let client = match self.client.as_ref() {
            Some(c) => c,
            None => return batches.iter().map(|_| Err(ParseError::NotStarted)).collect(),
        };
        let url = self.url();
        self.runtime.block_on(async {
            stream::iter(batches)
                .map(|batch| send_request(client, url.clone(), &batch.label, &batch.paths))
                .buffered(MAX_IN_FLIGHT)
                .collect::<Vec<_>>()
                .await
        })
    }
}

async fn send_request(
    client: &reqwest::Client,
    url: String,
    label: &str,
    paths: &[PathBuf],
) -> Result<Vec<FileFacts>, ParseError> {
    let request = ParseRequest {
        label,
        filenames: paths.iter().map(|p| p.display().to_string()).collect(),
    };

    let response = client.post(url).json(&request).send().await.map_err(|e| {
        if e.is_timeout() {
            ParseError::Timeout
        } else {
            ParseError::Network(e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ParseError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.starts_with("application/json") {
        return Err(ParseError::ContentType(content_type));
    }

    let bytes = response.bytes().await?;
    decode_response(label, &bytes)
}

fn decode_response(label: &str, bytes: &[u8]) -> Result<Vec<FileFacts>, ParseError> {
    let response: ParseResponse = serde_json::from_slice(bytes)?;
    if let Some(err) = response.error.filter(|e| !e.is_empty()) {
        return Err(ParseError::Worker(err));
    }
    tracing::debug!(
        label,
        files = response.files.len(),
        elapsed_ms = response.elapsed_millis,
        "parsed"
    );
    let files: Vec<FileFacts> = response.files.into_iter().map(FileFacts::from).collect();
    for f in files.iter().filter(|f| f.has_error()) {
        tracing::warn!("{}: parse error: {}", f.filename, f.error.as_deref().unwrap_or(""));
    }
    Ok(files)
}

fn install_script(script: &Path, dir: &Path) -> Result<PathBuf, ParseError> {
    let name = script
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "worker.js".into());
    let dest = dir.join(name);
    fs::copy(script, &dest).map_err(|source| ParseError::Io {
        path: script.display().to_string(),
        source,
    })?;
    Ok(dest)
}

/// Ask the OS for an unused local port.
fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
