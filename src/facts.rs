//! Fact records extracted from Scala sources.
//!
//! A [`FileFacts`] describes what one source file declares and what it
//! refers to. A [`RuleFacts`] groups the files of one build rule under a
//! fingerprint derived from the files' content hashes.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of a declared symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationKind {
    Class,
    Object,
    Trait,
    Type,
    Val,
}

impl DeclarationKind {
    /// Convert to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclarationKind::Class => "class",
            DeclarationKind::Object => "object",
            DeclarationKind::Trait => "trait",
            DeclarationKind::Type => "type",
            DeclarationKind::Val => "val",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "class" => Some(DeclarationKind::Class),
            "object" => Some(DeclarationKind::Object),
            "trait" => Some(DeclarationKind::Trait),
            "type" => Some(DeclarationKind::Type),
            "val" => Some(DeclarationKind::Val),
            _ => None,
        }
    }
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Facts extracted from a single source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFacts {
    /// Path relative to the workspace root.
    pub filename: String,
    /// Hex sha256 of the file content.
    pub sha256: String,
    /// Declared packages, in declaration order.
    pub packages: Vec<String>,
    /// Fully-qualified names of declared classes.
    pub classes: Vec<String>,
    /// Fully-qualified names of declared objects.
    pub objects: Vec<String>,
    /// Fully-qualified names of declared traits.
    pub traits: Vec<String>,
    /// Fully-qualified names of declared type aliases.
    pub types: Vec<String>,
    /// Fully-qualified names of declared vals.
    pub vals: Vec<String>,
    /// Imported names, renames included. Wildcards keep their `._` suffix.
    pub imports: Vec<String>,
    /// Unresolved names referenced from the file body.
    pub names: Vec<String>,
    /// Map from `"kind qualifiedName"` to the declaration's parents.
    pub extends: BTreeMap<String, Vec<String>>,
    /// Parse error reported by the parser, if any.
    pub error: Option<String>,
}

impl FileFacts {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// Sort and dedup every name list. Packages keep declaration order but
    /// lose duplicates.
    pub fn normalize(&mut self) {
        for list in [
            &mut self.classes,
            &mut self.objects,
            &mut self.traits,
            &mut self.types,
            &mut self.vals,
            &mut self.imports,
            &mut self.names,
        ] {
            list.sort();
            list.dedup();
        }
        let mut seen = std::collections::HashSet::new();
        self.packages.retain(|p| seen.insert(p.clone()));
        for parents in self.extends.values_mut() {
            parents.sort();
            parents.dedup();
        }
    }

    /// Iterate over all declared symbols with their kind.
    pub fn declarations(&self) -> impl Iterator<Item = (DeclarationKind, &str)> {
        [
            (DeclarationKind::Class, &self.classes),
            (DeclarationKind::Object, &self.objects),
            (DeclarationKind::Trait, &self.traits),
            (DeclarationKind::Type, &self.types),
            (DeclarationKind::Val, &self.vals),
        ]
        .into_iter()
        .flat_map(|(kind, list)| list.iter().map(move |n| (kind, n.as_str())))
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Facts for one build rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleFacts {
    /// Canonical rule label (`@repo//pkg:name`).
    pub label: String,
    /// Rule kind, e.g. `scala_library` or `scala_test`.
    pub kind: String,
    /// Source file facts, sorted by filename.
    pub files: Vec<FileFacts>,
    /// Rule fingerprint; see [`fingerprint_rule`].
    pub sha256: String,
}

impl RuleFacts {
    /// Build a rule record, sorting its files and computing the fingerprint.
    pub fn new(label: impl Into<String>, kind: impl Into<String>, mut files: Vec<FileFacts>) -> Self {
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        let sha256 = fingerprint_rule(&files);
        Self {
            label: label.into(),
            kind: kind.into(),
            files,
            sha256,
        }
    }

    pub fn is_test(&self) -> bool {
        self.kind.contains("test")
    }

    /// Filenames of files whose parse failed.
    pub fn errored_files(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| f.has_error())
            .map(|f| f.filename.as_str())
            .collect()
    }
}

/// A collection of rules sorted by label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub rules: Vec<RuleFacts>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<RuleFacts>) -> Self {
        rules.sort_by(|a, b| a.label.cmp(&b.label));
        Self { rules }
    }
}

/// Hex sha256 of a byte slice.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hex sha256 of a file's content.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let data = fs::read(path)?;
    Ok(fingerprint_bytes(&data))
}

/// Rule fingerprint: sha256 over the concatenated file fingerprints, taken
/// in lexicographic filename order.
pub fn fingerprint_rule(files: &[FileFacts]) -> String {
    let mut sorted: Vec<&FileFacts> = files.iter().collect();
    sorted.sort_by(|a, b| a.filename.cmp(&b.filename));
    let mut hasher = Sha256::new();
    for file in sorted {
        hasher.update(file.sha256.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, sha: &str) -> FileFacts {
        FileFacts {
            filename: name.to_string(),
            sha256: sha.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_fingerprint_bytes_known_value() {
        assert_eq!(
            fingerprint_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_rule_fingerprint_ignores_input_order() {
        let a = vec![file("b.scala", "22"), file("a.scala", "11")];
        let b = vec![file("a.scala", "11"), file("b.scala", "22")];
        assert_eq!(fingerprint_rule(&a), fingerprint_rule(&b));
        assert_eq!(fingerprint_rule(&a), fingerprint_bytes(b"1122"));
    }

    #[test]
    fn test_rule_fingerprint_changes_with_content() {
        let a = vec![file("a.scala", "11")];
        let b = vec![file("a.scala", "12")];
        assert_ne!(fingerprint_rule(&a), fingerprint_rule(&b));
    }

    #[test]
    fn test_rule_new_sorts_files() {
        let rule = RuleFacts::new(
            "//a:lib",
            "scala_library",
            vec![file("z.scala", "1"), file("m.scala", "2")],
        );
        assert_eq!(rule.files[0].filename, "m.scala");
        assert_eq!(rule.sha256, fingerprint_rule(&rule.files));
        assert!(!rule.is_test());
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let mut f = FileFacts::new("a.scala");
        f.packages = vec!["b".into(), "a".into(), "b".into()];
        f.imports = vec!["z.Z".into(), "a.A".into(), "z.Z".into()];
        f.classes = vec!["b.C".into(), "b.A".into()];
        f.normalize();
        assert_eq!(f.packages, vec!["b", "a"]);
        assert_eq!(f.imports, vec!["a.A", "z.Z"]);
        assert_eq!(f.classes, vec!["b.A", "b.C"]);
    }

    #[test]
    fn test_declarations_tags_kinds() {
        let mut f = FileFacts::new("a.scala");
        f.classes = vec!["a.C".into()];
        f.objects = vec!["a.O".into()];
        let decls: Vec<_> = f.declarations().collect();
        assert_eq!(
            decls,
            vec![(DeclarationKind::Class, "a.C"), (DeclarationKind::Object, "a.O")]
        );
    }
}
