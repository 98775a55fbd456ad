//! Merging per-archive records into one index.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::ArchiveRecord;

/// Classes that are always provided by the platform.
const PREDEFINED_SYMBOLS: &[&str] = &["java.lang.Object"];

/// The merged archive index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveIndex {
    pub archives: Vec<ArchiveRecord>,
    /// Labels whose classes are provided by the platform.
    pub predefined: Vec<String>,
    /// Symbols provided by predefined labels; these never become deps.
    pub predefined_symbols: Vec<String>,
    /// Package (or class) → preferred label.
    pub preferred: BTreeMap<String, String>,
}

/// Diagnostics gathered while merging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub duplicate_labels: Vec<String>,
    /// Archives lacking a label or a filename.
    pub incomplete: Vec<String>,
    /// Classes provided by more than one label.
    pub multi_provider_classes: BTreeMap<String, Vec<String>>,
    /// Packages provided by more than one label.
    pub split_packages: BTreeMap<String, Vec<String>>,
}

impl MergeReport {
    pub fn warning_count(&self) -> usize {
        self.duplicate_labels.len()
            + self.incomplete.len()
            + self.multi_provider_classes.len()
            + self.split_packages.len()
    }
}

/// Merge archive records. The first record seen for a label wins.
pub fn merge_archives(
    records: Vec<ArchiveRecord>,
    predefined: &[String],
    preferred: BTreeMap<String, String>,
) -> (ArchiveIndex, MergeReport) {
    let mut report = MergeReport::default();
    let mut seen_labels = HashSet::new();
    let predefined_labels: HashSet<&str> = predefined.iter().map(String::as_str).collect();
    let mut predefined_symbols: BTreeSet<String> =
        PREDEFINED_SYMBOLS.iter().map(|s| s.to_string()).collect();
    let mut labels_by_package: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut labels_by_class: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut archives = Vec::new();

    for record in records {
        if !seen_labels.insert(record.label.clone()) {
            tracing::warn!("duplicate archive label: {}", record.label);
            report.duplicate_labels.push(record.label);
            continue;
        }

        if record.label.is_empty() {
            tracing::warn!("missing archive label: {}", record.filename);
            report.incomplete.push(record.filename.clone());
        } else if record.filename.is_empty() {
            tracing::warn!("missing archive filename: {}", record.label);
            report.incomplete.push(record.label.clone());
        } else {
            if predefined_labels.contains(record.label.as_str()) {
                predefined_symbols.extend(record.classes.iter().map(|c| c.name.clone()));
            }
            for pkg in &record.packages {
                labels_by_package
                    .entry(pkg.clone())
                    .or_default()
                    .push(record.label.clone());
            }
            for class in &record.classes {
                labels_by_class
                    .entry(class.name.clone())
                    .or_default()
                    .push(record.label.clone());
            }
        }
        archives.push(record);
    }

    for (class, labels) in labels_by_class {
        if labels.len() > 1 {
            tracing::debug!("class is provided by more than one label: {}: {:?}", class, labels);
            report.multi_provider_classes.insert(class, labels);
        }
    }
    for (pkg, labels) in labels_by_package {
        if labels.len() > 1 {
            tracing::warn!("split-package! {:?} is provided by more than one label: {:?}", pkg, labels);
            report.split_packages.insert(pkg, labels);
        }
    }

    archives.sort_by(|a, b| a.label.cmp(&b.label));
    let index = ArchiveIndex {
        archives,
        predefined: predefined.to_vec(),
        predefined_symbols: predefined_symbols.into_iter().collect(),
        preferred,
    };
    (index, report)
}

#[cfg(test)]
mod tests {
    use super::super::ClassRecord;
    use super::*;

    fn archive(label: &str, filename: &str, pkgs: &[&str], classes: &[&str]) -> ArchiveRecord {
        ArchiveRecord {
            filename: filename.to_string(),
            label: label.to_string(),
            packages: pkgs.iter().map(|s| s.to_string()).collect(),
            classes: classes
                .iter()
                .map(|c| ClassRecord {
                    name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_duplicate_labels_are_dropped() {
        let (index, report) = merge_archives(
            vec![
                archive("//a", "a.jar", &["a"], &["a.A"]),
                archive("//a", "a2.jar", &["a"], &["a.A"]),
            ],
            &[],
            BTreeMap::new(),
        );
        assert_eq!(index.archives.len(), 1);
        assert_eq!(index.archives[0].filename, "a.jar");
        assert_eq!(report.duplicate_labels, vec!["//a"]);
    }

    #[test]
    fn test_predefined_labels_contribute_symbols() {
        let (index, _) = merge_archives(
            vec![archive("@jdk//:rt", "rt.jar", &["java.util"], &["java.util.List"])],
            &["@jdk//:rt".to_string()],
            BTreeMap::new(),
        );
        assert_eq!(index.predefined_symbols, vec!["java.lang.Object", "java.util.List"]);
    }

    #[test]
    fn test_split_packages_and_multi_providers() {
        let (_, report) = merge_archives(
            vec![
                archive("//a", "a.jar", &["p"], &["p.X"]),
                archive("//b", "b.jar", &["p"], &["p.X", "p.Y"]),
            ],
            &[],
            BTreeMap::new(),
        );
        assert_eq!(report.split_packages["p"], vec!["//a", "//b"]);
        assert_eq!(report.multi_provider_classes["p.X"], vec!["//a", "//b"]);
        assert!(!report.multi_provider_classes.contains_key("p.Y"));
    }

    #[test]
    fn test_incomplete_archives_are_kept_but_reported() {
        let (index, report) = merge_archives(
            vec![archive("", "platform.jar", &["x"], &["x.X"])],
            &[],
            BTreeMap::new(),
        );
        assert_eq!(index.archives.len(), 1);
        assert_eq!(report.incomplete, vec!["platform.jar"]);
        assert_eq!(report.warning_count(), 1);
    }
}
