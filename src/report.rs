//! Terminal summaries for the repair tools.
//!
//! Each summary is built as a string (`format_*`) so it can be checked in
//! tests, and printed to stdout by the matching `write_*`.

use colored::*;

use crate::archive::MergeReport;
use crate::autokeep::DeltaDeps;
use crate::label::Label;
use crate::repair::RepairSummary;
use crate::sweep::FixSummary;

fn status(ok: bool) -> ColoredString {
    if ok {
        "✓ PASS".green()
    } else {
        "✗ FAIL".red()
    }
}

fn count(n: usize) -> ColoredString {
    match n {
        0 => n.to_string().green(),
        1..=9 => n.to_string().yellow(),
        _ => n.to_string().yellow().bold(),
    }
}

fn header(tool: &str) -> String {
    format!("  {} v{}\n\n", tool.cyan().bold(), env!("CARGO_PKG_VERSION"))
}

pub fn format_repair_summary(summary: &RepairSummary) -> String {
    let mut out = header("repair-driver");
    out.push_str(&format!(
        "  {}  Builds: {}  Commands: {}  Errors: {}\n",
        status(true),
        summary.builds,
        count(summary.commands_written),
        count(summary.errors),
    ));
    out
}

pub fn write_repair_summary(summary: &RepairSummary) {
    println!("{}", format_repair_summary(summary));
}

pub fn format_sweep(target: &Label, removed: &[Label]) -> String {
    let mut out = header("sweep");
    out.push_str(&format!("  {}{}\n", "Target: ".dimmed(), target));
    if removed.is_empty() {
        out.push_str(&format!("  {}\n", "no transitive deps removed".dimmed()));
    }
    for dep in removed {
        out.push_str(&format!("  {} {}\n", "-".red(), dep));
    }
    out
}

pub fn write_sweep(target: &Label, removed: &[Label]) {
    println!("{}", format_sweep(target, removed));
}

pub fn format_fix(summary: &FixSummary) -> String {
    let mut out = header("fix-until-green");
    out.push_str(&format!(
        "  {}  Builds: {}  Files changed: {}\n",
        status(true),
        summary.builds,
        count(summary.changed_files.len()),
    ));
    for file in &summary.changed_files {
        out.push_str(&format!("    {}\n", file.display()));
    }
    out
}

pub fn write_fix(summary: &FixSummary) {
    println!("{}", format_fix(summary));
}

pub fn format_delta(delta: &DeltaDeps) -> String {
    let mut out = header("autokeep");
    if delta.is_empty() {
        out.push_str(&format!("  {}\n", "nothing to change".dimmed()));
        return out;
    }
    for rule in delta.rules() {
        out.push_str(&format!("  {}\n", rule.to_string().bold()));
        for dep in delta.add.get(rule).into_iter().flatten() {
            out.push_str(&format!("    {} {}\n", "+".green(), dep));
        }
        for dep in delta.remove.get(rule).into_iter().flatten() {
            out.push_str(&format!("    {} {}\n", "-".red(), dep));
        }
    }
    out
}

pub fn write_delta(delta: &DeltaDeps) {
    println!("{}", format_delta(delta));
}

pub fn format_wildcard(filename: &str, import_line: &str, symbols: &[String]) -> String {
    let mut out = header("wildcard-fixer");
    out.push_str(&format!("  {}{}\n", "File: ".dimmed(), filename));
    out.push_str(&format!("  {}  {} ({} names)\n", status(true), import_line.green(), symbols.len()));
    out
}

pub fn write_wildcard(filename: &str, import_line: &str, symbols: &[String]) {
    println!("{}", format_wildcard(filename, import_line, symbols));
}

/// Merge warnings go to the log rather than stdout.
pub fn log_merge_report(report: &MergeReport) {
    for label in &report.duplicate_labels {
        tracing::warn!("duplicate archive label: {}", label);
    }
    for archive in &report.incomplete {
        tracing::warn!("archive record without label or filename: {}", archive);
    }
    for (class, labels) in &report.multi_provider_classes {
        tracing::warn!("class {} provided by multiple labels: {}", class, labels.join(", "));
    }
    for (pkg, labels) in &report.split_packages {
        tracing::warn!("split package {}: {}", pkg, labels.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_repair_summary() {
        plain();
        let text = format_repair_summary(&RepairSummary {
            builds: 3,
            commands_written: 2,
            errors: 1,
        });
        assert!(text.contains("repair-driver"));
        assert!(text.contains("✓ PASS  Builds: 3  Commands: 2  Errors: 1"));
    }

    #[test]
    fn test_sweep_lists_removed() {
        plain();
        let target = Label::parse("//app").unwrap();
        let text = format_sweep(&target, &[Label::parse("//a").unwrap()]);
        assert!(text.contains("Target: //app"));
        assert!(text.contains("- //a"));

        let none = format_sweep(&target, &[]);
        assert!(none.contains("no transitive deps removed"));
    }

    #[test]
    fn test_delta_groups_by_rule() {
        plain();
        let mut delta = DeltaDeps::default();
        let app = Label::parse("//app").unwrap();
        delta.add.insert(app.clone(), vec![Label::parse("//lib:foo").unwrap()]);
        delta.remove.insert(app, vec![Label::parse("//old").unwrap()]);
        let text = format_delta(&delta);
        assert!(text.contains("  //app\n    + //lib:foo\n    - //old\n"));
    }

    #[test]
    fn test_fix_lists_files() {
        plain();
        let text = format_fix(&FixSummary {
            builds: 2,
            changed_files: vec![PathBuf::from("app/BUILD")],
        });
        assert!(text.contains("Builds: 2  Files changed: 1"));
        assert!(text.contains("    app/BUILD\n"));
    }
}
