//! Structured results of the code-review pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stage::Reply;

// ── Severity ─────────────────────────────────────────────────────

/// Severity level for a code issue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational suggestion, not a blocker.
    #[default]
    Low,
    /// Should be addressed but not urgent.
    Medium,
    /// Important issue that should be fixed soon.
    High,
    /// Must-fix: correctness or security.
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Lenient parse of a model-supplied severity. Unknown values map to `Low`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown severity '{other}' (expected low, medium, high or critical)"
            )),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Code issue ───────────────────────────────────────────────────

/// A single finding reported by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeIssue {
    /// Issue category (e.g. "bug", "security", "style").
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl CodeIssue {
    /// Build an issue from one entry of a model's `issues` array.
    ///
    /// Non-object entries are dropped; missing fields become empty defaults.
    pub fn from_value(stage: &str, index: usize, value: Value) -> Option<Self> {
        let Value::Object(fields) = value else {
            tracing::warn!(stage, index, "Issue entry is not an object, skipping");
            return None;
        };
        let entry = Reply::from_object(&format!("{stage} issue {index}"), fields);

        Some(Self {
            kind: entry.string("type"),
            description: entry.string("description"),
            severity: Severity::parse_lenient(&entry.string("severity")),
            line: entry
                .get("line")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
        })
    }

    /// Read the `issues` array of a stage reply.
    pub fn list_from_reply(stage: &str, reply: &Reply) -> Vec<Self> {
        let raw = reply.array("issues");
        let total = raw.len();
        let issues: Vec<Self> = raw
            .into_iter()
            .enumerate()
            .filter_map(|(i, v)| Self::from_value(stage, i, v))
            .collect();
        tracing::info!(
            stage,
            issues = issues.len(),
            skipped = total - issues.len(),
            "Issues parsed"
        );
        issues
    }

    /// One-line rendering used in prompts: `[HIGH] bug: message`.
    pub fn summary_line(&self) -> String {
        format!("[{}] {}: {}", self.severity, self.kind, self.description)
    }
}

/// Merge issue lists by priority: highest severity first, and within one
/// severity the order of `groups` and then detection order.
pub fn prioritize_issues(groups: &[&[CodeIssue]]) -> Vec<CodeIssue> {
    let mut merged: Vec<CodeIssue> = groups.iter().flat_map(|g| g.iter().cloned()).collect();
    // Stable sort keeps insertion order for ties.
    merged.sort_by(|a, b| b.severity.cmp(&a.severity));
    merged
}

// ── Scan result ──────────────────────────────────────────────────

/// Top-level symbols found in the scanned source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeStructure {
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub imports: Vec<String>,
}

/// Output of the scanner stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub structure: CodeStructure,
    pub issues: Vec<CodeIssue>,
    /// Local pre-check warnings (long lines, flagged patterns).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// ── Refactor plan ────────────────────────────────────────────────

/// One ordered step of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactorStep {
    pub step: u32,
    pub action: String,
    pub rationale: String,
}

/// Terminal artifact of the code-review pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactorPlan {
    pub summary: String,
    pub steps: Vec<RefactorStep>,
    /// Every upstream issue, prioritized.
    pub issues: Vec<CodeIssue>,
    /// Stages whose output was replaced by an empty default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_stages: Vec<String>,
}

impl RefactorPlan {
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Issues at `min` or above.
    pub fn count_at_least(&self, min: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity >= min).count()
    }

    /// Drop issues below `min`. Order is kept.
    pub fn retain_min_severity(&mut self, min: Severity) {
        self.issues.retain(|i| i.severity >= min);
    }

    /// Format the plan as markdown for terminal output.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("## Refactor Plan\n\n");
        if self.summary.is_empty() {
            md.push_str("*No summary available.*\n\n");
        } else {
            md.push_str(&format!("{}\n\n", self.summary));
        }

        if self.steps.is_empty() {
            md.push_str("No steps proposed.\n");
        } else {
            for s in &self.steps {
                md.push_str(&format!("{}. **{}**\n", s.step, s.action));
                if !s.rationale.is_empty() {
                    md.push_str(&format!("   {}\n", s.rationale));
                }
            }
        }

        if !self.issues.is_empty() {
            md.push_str("\n### Issues\n\n");
            md.push_str("| Severity | Type | Description |\n");
            md.push_str("|----------|------|-------------|\n");
            for i in &self.issues {
                let location = i.line.map(|l| format!(" (line {l})")).unwrap_or_default();
                md.push_str(&format!(
                    "| {} | {} | {}{} |\n",
                    i.severity.label(),
                    i.kind,
                    i.description,
                    location,
                ));
            }
            md.push_str(&format!(
                "\nCritical: {} | High: {} | Medium: {} | Low: {}\n",
                self.count_by_severity(Severity::Critical),
                self.count_by_severity(Severity::High),
                self.count_by_severity(Severity::Medium),
                self.count_by_severity(Severity::Low),
            ));
        }

        if !self.degraded_stages.is_empty() {
            md.push_str(&format!(
                "\n*Degraded stages: {}*\n",
                self.degraded_stages.join(", ")
            ));
        }
        md
    }
}

// ── Tests ────────────────────────────────────────────────────────
