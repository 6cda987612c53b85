//! Second review stage: a deeper look for bugs, logic errors and security problems.

use std::sync::Arc;

use async_trait::async_trait;

use super::preflight;
use super::scanner::SourceFile;
use super::types::{CodeIssue, ScanResult};
use crate::error::StageResult;
use crate::provider::ChatProvider;
use crate::stage::{validate_payload, Reply, Stage, StageOptions};

const SYSTEM_PROMPT: &str = "You are an expert code analyzer specializing in finding bugs, logic errors,
security vulnerabilities, and correctness issues. Focus on:
- Input validation problems
- Edge cases and boundary conditions
- Logic errors and incorrect implementations
- Security vulnerabilities
- Error handling issues
- Type safety problems

Return ONLY a JSON object with an \"issues\" array:
{
  \"issues\": [
    {
      \"type\": \"bug|security|logic\",
      \"description\": \"Clear description of the issue\",
      \"severity\": \"low|medium|high|critical\",
      \"line\": 1
    }
  ]
}";

/// Code plus the scanner's findings.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub source: SourceFile,
    pub scan: ScanResult,
}

/// Render the scan as prompt context.
pub(crate) fn scan_context(scan: &ScanResult, with_issues: bool) -> String {
    let s = &scan.structure;
    let mut ctx = format!(
        "Code Structure:\n- Functions: {}\n- Classes: {}\n- Imports: {}\n",
        s.functions.join(", "),
        s.classes.join(", "),
        s.imports.join(", "),
    );
    if with_issues && !scan.issues.is_empty() {
        ctx.push_str("\nPreviously identified issues:\n");
        for issue in &scan.issues {
            ctx.push_str(&format!("- {}\n", issue.summary_line()));
        }
    }
    ctx
}

pub struct AnalysisAgent {
    provider: Arc<dyn ChatProvider>,
    options: StageOptions,
}

impl AnalysisAgent {
    pub fn new(provider: Arc<dyn ChatProvider>, options: StageOptions) -> Self {
        Self { provider, options }
    }
}

#[async_trait]
impl Stage for AnalysisAgent {
    type Input = AnalysisInput;
    type Output = Vec<CodeIssue>;

    fn name(&self) -> &'static str {
        "analysis"
    }

    async fn run(&self, input: &AnalysisInput) -> StageResult<Vec<CodeIssue>> {
        validate_payload(&input.source.code, self.options.max_input_chars)?;

        let prefix = format!(
            "Analyze this code for bugs and logic issues:\n\n{}",
            scan_context(&input.scan, true)
        );
        let user = preflight::code_prompt(
            &prefix,
            &input.source.code,
            input.source.lang,
            self.options.max_analysis_chars,
        );
        let raw = self
            .provider
            .complete(&self.options.request(SYSTEM_PROMPT, user, 0.3))
            .await?;

        let reply = Reply::parse(self.name(), &raw)?;
        let issues = CodeIssue::list_from_reply(self.name(), &reply);
        tracing::info!(issues = issues.len(), "Analysis complete");
        Ok(issues)
    }
}
