//! Third review stage: style, readability and maintainability.

use std::sync::Arc;

use async_trait::async_trait;

use super::analysis::scan_context;
use super::preflight::{self, Lang};
use super::scanner::SourceFile;
use super::types::{CodeIssue, ScanResult};
use crate::error::StageResult;
use crate::provider::ChatProvider;
use crate::stage::{validate_payload, Reply, Stage, StageOptions};

const SYSTEM_PROMPT: &str = "You are a code style expert. Focus on:
- Idiomatic style for the language ({conventions})
- Naming conventions
- Code organization and structure
- Documentation and comments
- Readability and maintainability
- Function length and complexity
- DRY principle violations

Do not repeat issues that were already reported.

Return ONLY a JSON object with an \"issues\" array:
{
  \"issues\": [
    {
      \"type\": \"style\",
      \"description\": \"Clear description of the style issue\",
      \"severity\": \"low|medium|high\",
      \"line\": 1
    }
  ]
}";

fn conventions(lang: Lang) -> &'static str {
    match lang {
        Lang::Python => "PEP 8",
        Lang::Rust => "rustfmt and the Rust API guidelines",
    }
}

/// Code, scan and the analysis findings.
#[derive(Debug, Clone)]
pub struct StyleInput {
    pub source: SourceFile,
    pub scan: ScanResult,
    pub analysis: Vec<CodeIssue>,
}

pub struct StyleAgent {
    provider: Arc<dyn ChatProvider>,
    options: StageOptions,
}

impl StyleAgent {
    pub fn new(provider: Arc<dyn ChatProvider>, options: StageOptions) -> Self {
        Self { provider, options }
    }
}

#[async_trait]
impl Stage for StyleAgent {
    type Input = StyleInput;
    type Output = Vec<CodeIssue>;

    fn name(&self) -> &'static str {
        "style"
    }

    async fn run(&self, input: &StyleInput) -> StageResult<Vec<CodeIssue>> {
        validate_payload(&input.source.code, self.options.max_input_chars)?;

        let mut prefix = format!(
            "Review this code for style and quality issues:\n\n{}",
            scan_context(&input.scan, false)
        );
        if !input.analysis.is_empty() {
            prefix.push_str("\nAlready reported by analysis:\n");
            for issue in &input.analysis {
                prefix.push_str(&format!("- {}\n", issue.summary_line()));
            }
        }
        let user = preflight::code_prompt(
            &prefix,
            &input.source.code,
            input.source.lang,
            self.options.max_analysis_chars,
        );
        let system = SYSTEM_PROMPT.replace("{conventions}", conventions(input.source.lang));
        let raw = self
            .provider
            .complete(&self.options.request(&system, user, 0.3))
            .await?;

        let reply = Reply::parse(self.name(), &raw)?;
        let issues = CodeIssue::list_from_reply(self.name(), &reply);
        tracing::info!(issues = issues.len(), "Style review complete");
        Ok(issues)
    }
}
