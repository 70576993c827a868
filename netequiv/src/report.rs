//! Comparison results and diagnostics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::netlist::{NetlistStats, ObjectKind};
use crate::partition::SplitCause;
use crate::processing::hierarchy::SubcircuitInfo;

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Suggestion,
}

/// One diagnostic produced while comparing a cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    /// Which check raised it (`export_name`, `imbalance`, `force_match`, ...)
    pub check: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(check: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            check: check.to_string(),
            severity,
            message: message.into(),
            object: None,
            suggestion: None,
        }
    }

    pub fn error(check: &str, message: impl Into<String>) -> Self {
        Self::new(check, Severity::Error, message)
    }

    pub fn warning(check: &str, message: impl Into<String>) -> Self {
        Self::new(check, Severity::Warning, message)
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Ordered issue list that numbers its entries
#[derive(Debug, Clone, Default)]
pub struct IssueLog {
    issues: Vec<Issue>,
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mut issue: Issue) {
        issue.id = format!("{}-{}", issue.check, self.issues.len() + 1);
        self.issues.push(issue);
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Match,
    Mismatch,
    Unresolved,
    Aborted,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Match => write!(f, "MATCH"),
            Outcome::Mismatch => write!(f, "MISMATCH"),
            Outcome::Unresolved => write!(f, "UNRESOLVED"),
            Outcome::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Final status of one leaf record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Matched,
    Forced,
    Guessed,
    Mismatched,
    Unresolved,
}

/// One leaf equivalence class as seen by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivClass {
    pub kind: ObjectKind,
    pub verdict: Verdict,
    pub cause: SplitCause,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Member descriptions, one list per design
    pub members: Vec<Vec<String>>,
}

impl EquivClass {
    pub fn counts(&self) -> Vec<usize> {
        self.members.iter().map(Vec::len).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonStats {
    pub netlists: Vec<NetlistStats>,
    pub parallel_merges: usize,
    pub series_merges: usize,
    pub records: usize,
    pub rehashes: usize,
    pub worklist_pops: usize,
    pub forced_matches: usize,
    pub random_matches: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub unresolved: usize,
}

/// A proposed correspondence for an export that could not be matched by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSuggestion {
    pub design: String,
    pub export: String,
    pub other_design: String,
    pub suggested: String,
}

/// Result of comparing one cell across N designs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellComparison {
    pub cell: String,
    pub designs: Vec<String>,
    pub outcome: Outcome,
    pub issues: Vec<Issue>,
    pub classes: Vec<EquivClass>,
    pub stats: ComparisonStats,
    pub export_suggestions: Vec<ExportSuggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcircuits: Option<Vec<SubcircuitInfo>>,
    pub finished_at: DateTime<Utc>,
}

impl CellComparison {
    pub fn is_match(&self) -> bool {
        self.outcome == Outcome::Match
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn classes_with(&self, verdict: Verdict) -> impl Iterator<Item = &EquivClass> {
        self.classes.iter().filter(move |c| c.verdict == verdict)
    }

    /// True when every match was proven by topology alone.
    pub fn fully_proven(&self) -> bool {
        self.is_match()
            && self
                .classes
                .iter()
                .all(|c| matches!(c.verdict, Verdict::Matched))
    }
}

fn push_bounded<T>(
    out: &mut String,
    items: &[T],
    max_items: usize,
    mut line: impl FnMut(&mut String, &T),
) {
    if items.len() > max_items {
        let _ = writeln!(
            out,
            "  too many to print, showing first {} of {}",
            max_items,
            items.len()
        );
    }
    for item in items.iter().take(max_items) {
        line(out, item);
    }
}

/// Text listing of a comparison, bounded by `max_items` per section.
pub fn render_human(cmp: &CellComparison, max_items: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nCell: {} ({})", cmp.cell, cmp.designs.join(" vs "));
    let _ = writeln!(out, "{}", "─".repeat(60));
    let _ = writeln!(out, "  Outcome: {}", cmp.outcome);

    let errors: Vec<&Issue> = cmp.errors().collect();
    if !errors.is_empty() {
        let _ = writeln!(out, "\n  ERRORS:");
        push_bounded(&mut out, &errors, max_items, |out, issue| {
            let _ = writeln!(out, "    - {}", issue.message);
            if let Some(ref s) = issue.suggestion {
                let _ = writeln!(out, "      Suggestion: {}", s);
            }
        });
    }

    let warnings: Vec<&Issue> = cmp
        .issues
        .iter()
        .filter(|i| i.severity == Severity::Warning)
        .collect();
    if !warnings.is_empty() {
        let _ = writeln!(out, "\n  WARNINGS:");
        push_bounded(&mut out, &warnings, max_items, |out, issue| {
            let _ = writeln!(out, "    - {}", issue.message);
        });
    }

    for (title, verdict) in [
        ("MISMATCHED", Verdict::Mismatched),
        ("UNRESOLVED", Verdict::Unresolved),
        ("GUESSED", Verdict::Guessed),
        ("FORCED", Verdict::Forced),
    ] {
        let classes: Vec<&EquivClass> = cmp.classes_with(verdict).collect();
        if classes.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n  {} CLASSES:", title);
        push_bounded(&mut out, &classes, max_items, |out, class| {
            let label = class.label.as_deref().unwrap_or("-");
            let _ = writeln!(
                out,
                "    - {} class [{}] counts {:?} (split by {})",
                class.kind,
                label,
                class.counts(),
                class.cause
            );
            for (design, members) in cmp.designs.iter().zip(&class.members) {
                let shown: Vec<&str> = members.iter().take(max_items).map(String::as_str).collect();
                let more = if members.len() > max_items {
                    format!(" ... {} more", members.len() - max_items)
                } else {
                    String::new()
                };
                let _ = writeln!(out, "        {}: {}{}", design, shown.join(", "), more);
            }
        });
    }

    if !cmp.export_suggestions.is_empty() {
        let _ = writeln!(out, "\n  EXPORT SUGGESTIONS:");
        push_bounded(&mut out, &cmp.export_suggestions, max_items, |out, s| {
            let _ = writeln!(
                out,
                "    - {}:{} may correspond to {}:{}",
                s.design, s.export, s.other_design, s.suggested
            );
        });
    }

    let _ = writeln!(out, "\n  Summary:");
    for (design, stats) in cmp.designs.iter().zip(&cmp.stats.netlists) {
        let _ = writeln!(
            out,
            "    {}: {} parts, {} wires, {} ports",
            design, stats.parts, stats.wires, stats.ports
        );
    }
    let _ = writeln!(
        out,
        "    Merged: {} parallel, {} series",
        cmp.stats.parallel_merges, cmp.stats.series_merges
    );
    let _ = writeln!(
        out,
        "    Classes: {} matched, {} mismatched, {} unresolved",
        cmp.stats.matched, cmp.stats.mismatched, cmp.stats.unresolved
    );
    out
}
