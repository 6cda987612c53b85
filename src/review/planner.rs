//! Final review stage: turn every upstream finding into an ordered refactor plan.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::types::{prioritize_issues, CodeIssue, RefactorPlan, RefactorStep, ScanResult};
use crate::error::StageResult;
use crate::provider::ChatProvider;
use super::preflight::truncate_at_line_boundary;
use crate::stage::{Reply, Stage, StageOptions};

const SYSTEM_PROMPT: &str = "You are an expert software architect creating refactoring plans.
Based on the identified issues, create a prioritized step-by-step refactoring plan.

Prioritize steps by:
1. Critical security and bug fixes first
2. High-severity issues next
3. Code quality and style improvements last

Return ONLY a JSON object with this structure:
{
  \"summary\": \"Brief 1-2 sentence summary of what the refactoring achieves\",
  \"steps\": [
    {
      \"step\": 1,
      \"action\": \"Clear, actionable description of what to do\",
      \"rationale\": \"Why this step is important\"
    }
  ]
}";

/// Outputs of the three earlier stages.
#[derive(Debug, Clone, Default)]
pub struct PlanInput {
    pub scan: ScanResult,
    pub analysis: Vec<CodeIssue>,
    pub style: Vec<CodeIssue>,
}

impl PlanInput {
    /// All findings, highest severity first; ties keep scan, analysis, style order.
    pub fn merged_issues(&self) -> Vec<CodeIssue> {
        prioritize_issues(&[&self.scan.issues[..], &self.analysis[..], &self.style[..]])
    }
}

fn issues_text(issues: &[CodeIssue]) -> String {
    if issues.is_empty() {
        return "No issues identified".into();
    }
    issues
        .iter()
        .map(CodeIssue::summary_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Steps in reply order, renumbered from 1. Non-object entries are skipped.
fn parse_steps(stage: &str, reply: &Reply) -> Vec<RefactorStep> {
    reply
        .array("steps")
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match value {
            Value::Object(fields) => Some(Reply::from_object(&format!("{stage} step {i}"), fields)),
            _ => {
                tracing::warn!(stage, index = i, "Plan step is not an object, skipping");
                None
            }
        })
        .zip(1u32..)
        .map(|(entry, n)| RefactorStep {
            step: n,
            action: entry.string("action"),
            rationale: entry.string("rationale"),
        })
        .collect()
}

pub struct PlannerAgent {
    provider: Arc<dyn ChatProvider>,
    options: StageOptions,
}

impl PlannerAgent {
    pub fn new(provider: Arc<dyn ChatProvider>, options: StageOptions) -> Self {
        Self { provider, options }
    }
}

#[async_trait]
impl Stage for PlannerAgent {
    type Input = PlanInput;
    type Output = RefactorPlan;

    fn name(&self) -> &'static str {
        "planner"
    }

    async fn run(&self, input: &PlanInput) -> StageResult<RefactorPlan> {
        let issues = input.merged_issues();
        let full = issues_text(&issues);
        // Model-derived text: truncate, never reject.
        let listing = truncate_at_line_boundary(&full, self.options.max_input_chars);
        if listing.len() < full.len() {
            tracing::info!(issues = issues.len(), "Issue listing truncated for planning");
        }

        let user = format!(
            "Create a refactoring plan for code with these issues:\n\n{listing}\n\n\
             Create a logical, prioritized plan that addresses all issues efficiently."
        );
        let raw = self
            .provider
            .complete(&self.options.request(SYSTEM_PROMPT, user, 0.4))
            .await?;

        let reply = Reply::parse(self.name(), &raw)?;
        let plan = RefactorPlan {
            summary: reply.string("summary"),
            steps: parse_steps(self.name(), &reply),
            issues,
            degraded_stages: Vec::new(),
        };
        tracing::info!(steps = plan.steps.len(), "Refactor plan created");
        Ok(plan)
    }
}
