//! Build event stream records.
//!
//! The stream is a sequence of JSON objects, normally one per line. Only the
//! fields used for repair are modelled; everything else is ignored.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::Deserialize;

use super::RepairError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BuildEvent {
    pub action: Option<Action>,
    pub progress: Option<Progress>,
}

/// A completed action, e.g. one scalac invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Action {
    pub label: String,
    pub exit_code: i32,
    pub stderr: Option<OutputFile>,
}

impl Action {
    pub fn failed(&self) -> bool {
        self.exit_code != 0
    }

    /// The local path of the captured stderr, when the action has one.
    pub fn stderr_path(&self) -> Option<PathBuf> {
        let file = self.stderr.as_ref()?;
        if file.name.is_empty() {
            return None;
        }
        Some(uri_path(&file.uri))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputFile {
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub stderr: String,
}

/// `file:///a/b` → `/a/b`. Anything that is not a file URI is taken as a
/// path.
pub fn uri_path(uri: &str) -> PathBuf {
    match Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(url.path())),
        _ => PathBuf::from(uri),
    }
}

pub fn read_events<R: Read>(reader: R) -> Result<Vec<BuildEvent>, serde_json::Error> {
    serde_json::Deserializer::from_reader(reader)
        .into_iter::<BuildEvent>()
        .collect()
}

pub fn read_events_file(path: &Path) -> Result<Vec<BuildEvent>, RepairError> {
    let file = File::open(path).map_err(|source| RepairError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_events(BufReader::new(file)).map_err(|source| RepairError::Events {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"{"id":{"started":{}},"started":{"uuid":"x"}}
{"id":{"actionCompleted":{}},"action":{"success":false,"label":"//src/main/scala/app:app","exitCode":1,"stderr":{"name":"stderr","uri":"file:///tmp/out/stderr-1"}}}
{"id":{"progress":{}},"progress":{"stderr":"ERROR: BUILD:3:10: no such target"}}
{"action":{"label":"//ok","exitCode":0}}
"#;

    #[test]
    fn test_read_events_ignores_unknown_fields() {
        let events = read_events(STREAM.as_bytes()).unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], BuildEvent::default());

        let action = events[1].action.as_ref().unwrap();
        assert_eq!(action.label, "//src/main/scala/app:app");
        assert!(action.failed());
        assert_eq!(action.stderr_path(), Some(PathBuf::from("/tmp/out/stderr-1")));

        assert!(events[2].progress.as_ref().unwrap().stderr.contains("no such target"));
        assert!(!events[3].action.as_ref().unwrap().failed());
        assert_eq!(events[3].action.as_ref().unwrap().stderr_path(), None);
    }

    #[test]
    fn test_read_events_rejects_garbage() {
        assert!(read_events("{\"action\": ".as_bytes()).is_err());
    }

    #[test]
    fn test_uri_path() {
        assert_eq!(uri_path("file:///a/b%20c"), PathBuf::from("/a/b c"));
        assert_eq!(uri_path("/plain/path"), PathBuf::from("/plain/path"));
    }
}
