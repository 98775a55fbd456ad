//! On-disk encoding of fact, rule and archive records.
//!
//! Files ending in `.json` hold compact JSON. Anything else holds the same
//! records bincode-encoded.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Mode for every file this crate writes.
pub const OUTPUT_FILE_MODE: u32 = 0o644;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}: json: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: binary: {source}")]
    Binary {
        path: String,
        #[source]
        source: bincode::Error,
    },
}

/// Encoding chosen from a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Binary,
}

impl Format {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Binary,
        }
    }
}

pub fn encode<T: Serialize>(value: &T, format: Format, path: &Path) -> Result<Vec<u8>, CodecError> {
    let display = path.display().to_string();
    match format {
        Format::Json => serde_json::to_vec(value).map_err(|source| CodecError::Json {
            path: display,
            source,
        }),
        Format::Binary => bincode::serialize(value).map_err(|source| CodecError::Binary {
            path: display,
            source,
        }),
    }
}

pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format, path: &Path) -> Result<T, CodecError> {
    let display = path.display().to_string();
    match format {
        Format::Json => serde_json::from_slice(data).map_err(|source| CodecError::Json {
            path: display,
            source,
        }),
        Format::Binary => bincode::deserialize(data).map_err(|source| CodecError::Binary {
            path: display,
            source,
        }),
    }
}

/// Read a record, choosing the format from the extension.
pub fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T, CodecError> {
    let data = fs::read(path).map_err(|source| CodecError::Io {
        path: path.display().to_string(),
        source,
    })?;
    decode(&data, Format::for_path(path), path)
}

/// Write a record, choosing the format from the extension.
pub fn write_file<T: Serialize>(path: &Path, value: &T) -> Result<(), CodecError> {
    let data = encode(value, Format::for_path(path), path)?;
    write_with_mode(path, &data).map_err(|source| CodecError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Write bytes with [`OUTPUT_FILE_MODE`], creating parent directories.
pub fn write_with_mode(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(OUTPUT_FILE_MODE);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.flush()?;
    // mode() only applies on create
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(OUTPUT_FILE_MODE))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{FileFacts, RuleFacts};
    use tempfile::TempDir;

    fn sample_rule() -> RuleFacts {
        let mut f = FileFacts::new("a/A.scala");
        f.sha256 = "abc".to_string();
        f.packages = vec!["a".to_string()];
        f.classes = vec!["a.A".to_string()];
        f.extends
            .insert("class a.A".to_string(), vec!["b.B".to_string()]);
        RuleFacts::new("//a:lib", "scala_library", vec![f])
    }

    #[test]
    fn test_format_for_path() {
        assert_eq!(Format::for_path(Path::new("x.json")), Format::Json);
        assert_eq!(Format::for_path(Path::new("x.pb")), Format::Binary);
        assert_eq!(Format::for_path(Path::new("x")), Format::Binary);
    }

    #[test]
    fn test_json_and_binary_roundtrip() {
        let dir = TempDir::new().unwrap();
        let rule = sample_rule();
        for name in ["rule.json", "rule.bin"] {
            let path = dir.path().join(name);
            write_file(&path, &rule).unwrap();
            let back: RuleFacts = read_file(&path).unwrap();
            assert_eq!(back, rule);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.json");
        write_file(&path, &sample_rule()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        // umask may clear bits but never add them
        assert_eq!(mode & !OUTPUT_FILE_MODE, 0);
    }

    #[test]
    fn test_read_garbage_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(read_file::<RuleFacts>(&path).is_err());
    }
}
