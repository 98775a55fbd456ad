//! Indexing compiled class archives (jars).
//!
//! An archive is walked entry by entry; every non-synthetic `.class` file
//! contributes its class name, superclass and interfaces. Records are
//! sorted so that re-indexing an unchanged archive gives identical output.

pub mod classfile;
mod merge;

pub use merge::{merge_archives, ArchiveIndex, MergeReport};

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zip::ZipArchive;

use classfile::ClassParseError;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Zip {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{path}!{entry}: {source}")]
    Class {
        path: String,
        entry: String,
        #[source]
        source: ClassParseError,
    },
}

/// One class found in an archive. Names are dotted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassRecord {
    pub name: String,
    /// Name exposed to Scala for members of a package object.
    pub alias: Option<String>,
    /// Immediate superclass; absent for `java.lang.Object`.
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
}

/// Index of one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveRecord {
    pub filename: String,
    /// Producing target; empty means the platform.
    pub label: String,
    pub packages: Vec<String>,
    pub classes: Vec<ClassRecord>,
}

impl ArchiveRecord {
    /// Class name → immediate supertype.
    pub fn supertypes(&self) -> BTreeMap<&str, &str> {
        self.classes
            .iter()
            .filter_map(|c| c.superclass.as_deref().map(|s| (c.name.as_str(), s)))
            .collect()
    }
}

/// Convert an internal class name (`a/b/C$D`) to its dotted form
/// (`a.b.C.D`). Only the first `$` is replaced.
pub fn convert_class_name(internal: &str) -> String {
    let dotted = internal.replace('/', ".").replacen('$', ".", 1);
    dotted.trim_end_matches('.').to_string()
}

/// Package of an internal class name: everything before the last `/`.
pub fn package_of(internal: &str) -> String {
    internal
        .rsplit_once('/')
        .map(|(pkg, _)| pkg.replace('/', "."))
        .unwrap_or_default()
}

/// `a.b.package$Foo` is visible in Scala as `a.b.Foo`.
pub fn package_object_alias(internal: &str) -> Option<String> {
    let dotted = internal.replace('/', ".");
    let idx = dotted.rfind(".package$")?;
    let member = &dotted[idx + ".package$".len()..];
    if member.is_empty() {
        return None;
    }
    Some(convert_class_name(&format!("{}.{}", &dotted[..idx], member)))
}

/// Index one archive.
pub fn index_archive(path: &Path, label: &str) -> Result<ArchiveRecord, ArchiveError> {
    let archive_name = path.display().to_string();
    let file = File::open(path).map_err(|source| ArchiveError::Io {
        path: archive_name.clone(),
        source,
    })?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|source| ArchiveError::Zip {
        path: archive_name.clone(),
        source,
    })?;

    let mut classes: BTreeMap<String, ClassRecord> = BTreeMap::new();
    let mut packages = BTreeSet::new();
    let mut buffer = Vec::new();
    let mut skipped = 0usize;

    for idx in 0..archive.len() {
        let mut entry = archive.by_index(idx).map_err(|source| ArchiveError::Zip {
            path: archive_name.clone(),
            source,
        })?;
        if !entry.is_file() {
            continue;
        }
        let name = entry.name().to_string();
        if !name.ends_with(".class") || name.ends_with("module-info.class") {
            continue;
        }

        buffer.clear();
        entry
            .read_to_end(&mut buffer)
            .map_err(|source| ArchiveError::Io {
                path: format!("{}!{}", archive_name, name),
                source,
            })?;

        let header =
            classfile::parse_class_header(&buffer).map_err(|source| ArchiveError::Class {
                path: archive_name.clone(),
                entry: name.clone(),
                source,
            })?;
        if header.is_synthetic() {
            skipped += 1;
            continue;
        }

        let class_name = convert_class_name(&header.this_class);
        let pkg = package_of(&header.this_class);
        if !pkg.is_empty() {
            packages.insert(pkg);
        }
        classes.entry(class_name.clone()).or_insert_with(|| ClassRecord {
            name: class_name,
            alias: package_object_alias(&header.this_class),
            superclass: header
                .super_class
                .as_deref()
                .map(convert_class_name)
                .filter(|s| s != "java.lang.Object"),
            interfaces: header.interfaces.iter().map(|i| convert_class_name(i)).collect(),
        });
    }

    tracing::debug!(
        archive = %archive_name,
        classes = classes.len(),
        skipped_synthetic = skipped,
        "indexed archive"
    );

    Ok(ArchiveRecord {
        filename: archive_name,
        label: label.to_string(),
        packages: packages.into_iter().collect(),
        classes: classes.into_values().collect(),
    })
}


#[cfg(test)]
mod tests {
    use super::testing::write_jar;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_convert_class_name() {
        assert_eq!(
            convert_class_name("javax/activation/CommandInfo$Beans"),
            "javax.activation.CommandInfo.Beans"
        );
        assert_eq!(package_of("javax/activation/CommandInfo$Beans"), "javax.activation");
        assert_eq!(convert_class_name("a/B$C$D"), "a.B.C$D");
        assert_eq!(package_of("Toplevel"), "");
    }

    #[test]
    fn test_package_object_alias() {
        assert_eq!(
            package_object_alias("org/json4s/package$MappingException").as_deref(),
            Some("org.json4s.MappingException")
        );
        assert_eq!(package_object_alias("org/json4s/package$"), None);
        assert_eq!(package_object_alias("org/json4s/Formats"), None);
    }

    #[test]
    fn test_index_archive_skips_synthetic() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("lib.jar");
        write_jar(
            &jar,
            &[
                ("b/Second", 0x0021, Some("a/First")),
                ("a/First", 0x0021, Some("java/lang/Object")),
                ("a/First$1", 0x1000, Some("java/lang/Object")),
            ],
        );

        let record = index_archive(&jar, "//lib").unwrap();
        let names: Vec<_> = record.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a.First", "b.Second"]);
        assert_eq!(record.packages, vec!["a", "b"]);
        assert_eq!(record.classes[0].superclass, None);
        assert_eq!(record.supertypes().get("b.Second"), Some(&"a.First"));
    }

    #[test]
    fn test_reindex_is_identical() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("lib.jar");
        write_jar(&jar, &[("a/First", 0x0021, None)]);
        let one = crate::codec::encode(
            &index_archive(&jar, "//lib").unwrap(),
            crate::codec::Format::Binary,
            &jar,
        )
        .unwrap();
        let two = crate::codec::encode(
            &index_archive(&jar, "//lib").unwrap(),
            crate::codec::Format::Binary,
            &jar,
        )
        .unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn test_not_a_zip() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("bad.jar");
        std::fs::write(&jar, b"not a zip").unwrap();
        assert!(matches!(index_archive(&jar, ""), Err(ArchiveError::Zip { .. })));
    }
}
