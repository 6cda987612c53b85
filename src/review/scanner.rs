//! First review stage: local pre-checks, then one model call that extracts
//! the code structure and a first pass of issues.

use std::sync::Arc;

use async_trait::async_trait;

use super::preflight::{self, Lang};
use super::rules;
use super::types::{CodeIssue, CodeStructure, ScanResult};
use crate::error::StageResult;
use crate::provider::ChatProvider;
use crate::stage::{validate_payload, Reply, Stage, StageOptions};

const SYSTEM_PROMPT: &str = "You are a code analysis expert. Analyze the provided source code and extract:
1. All function names
2. All class, struct, enum and trait names
3. All imports
4. Potential issues (bugs, style, performance, security)

Return ONLY a JSON object with this exact structure:
{
  \"functions\": [\"list\", \"of\", \"function\", \"names\"],
  \"classes\": [\"list\", \"of\", \"type\", \"names\"],
  \"imports\": [\"list\", \"of\", \"imported\", \"modules\"],
  \"issues\": [
    {
      \"type\": \"bug|style|performance|security\",
      \"description\": \"description of the issue\",
      \"severity\": \"low|medium|high|critical\",
      \"line\": 1
    }
  ]
}";

/// A source file queued for review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub code: String,
    pub lang: Lang,
}

impl SourceFile {
    pub fn new(code: impl Into<String>, lang: Lang) -> Self {
        Self {
            code: code.into(),
            lang,
        }
    }
}

/// Extracts functions, types, imports and obvious issues.
pub struct ScannerAgent {
    provider: Arc<dyn ChatProvider>,
    options: StageOptions,
}

impl ScannerAgent {
    pub fn new(provider: Arc<dyn ChatProvider>, options: StageOptions) -> Self {
        Self { provider, options }
    }

    /// Every local check; returns non-fatal warnings.
    fn preflight(&self, source: &SourceFile) -> StageResult<Vec<String>> {
        validate_payload(&source.code, self.options.max_input_chars)?;

        let mut warnings = preflight::check_line_lengths(&source.code);
        warnings.extend(preflight::check_dangerous_patterns(
            &source.code,
            source.lang,
            self.options.block_dangerous_patterns,
        )?);
        preflight::check_syntax(&source.code, source.lang)?;

        tracing::debug!(
            chars = source.code.chars().count(),
            lines = source.code.lines().count(),
            warnings = warnings.len(),
            "Code validation passed"
        );
        Ok(warnings)
    }
}

/// Rule-based findings for `source`, as scan issues.
fn local_issues(source: &SourceFile) -> Vec<CodeIssue> {
    rules::security_findings(&source.code, source.lang)
        .into_iter()
        .map(rules::Finding::into_issue)
        .collect()
}

#[async_trait]
impl Stage for ScannerAgent {
    type Input = SourceFile;
    type Output = ScanResult;

    fn name(&self) -> &'static str {
        "scanner"
    }

    async fn run(&self, source: &SourceFile) -> StageResult<ScanResult> {
        let warnings = self.preflight(source)?;
        let mut issues = local_issues(source);
        if !issues.is_empty() {
            tracing::info!(findings = issues.len(), "Security rules flagged code");
        }

        let user = preflight::code_prompt(
            &format!("Analyze this {} code:", source.lang),
            &source.code,
            source.lang,
            self.options.max_analysis_chars,
        );
        let raw = self
            .provider
            .complete(&self.options.request(SYSTEM_PROMPT, user, 0.3))
            .await?;

        let reply = Reply::parse(self.name(), &raw)?;
        let structure = CodeStructure {
            functions: reply.string_list("functions"),
            classes: reply.string_list("classes"),
            imports: reply.string_list("imports"),
        };
        issues.extend(CodeIssue::list_from_reply(self.name(), &reply));

        tracing::info!(
            functions = structure.functions.len(),
            classes = structure.classes.len(),
            imports = structure.imports.len(),
            issues = issues.len(),
            "Scan complete"
        );
        Ok(ScanResult {
            structure,
            issues,
            warnings,
        })
    }

    /// Keeps the local checks when the model call fails.
    fn fallback(&self, source: &SourceFile) -> ScanResult {
        ScanResult {
            issues: local_issues(source),
            warnings: preflight::local_warnings(&source.code, source.lang),
            ..ScanResult::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StageError, ValidationError};
    use crate::provider::scripted::ScriptedProvider;
    use crate::review::types::Severity;

    const SAMPLE: &str = "import os\n\ndef main():\n    print(os.getcwd())\n";

    fn scanner(provider: &Arc<ScriptedProvider>, options: StageOptions) -> ScannerAgent {
        ScannerAgent::new(provider.clone(), options)
    }

    #[tokio::test]
    async fn empty_code_never_reaches_the_provider() {
        let provider = Arc::new(ScriptedProvider::new(["{}"]));
        let err = scanner(&provider, StageOptions::default())
            .run(&SourceFile::new("  \n", Lang::Python))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Validation(ValidationError::Empty)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_code_never_reaches_the_provider() {
        let provider = Arc::new(ScriptedProvider::new(["{}"]));
        let options = StageOptions {
            max_input_chars: 10,
            ..StageOptions::default()
        };
        let err = scanner(&provider, options)
            .run(&SourceFile::new("x = 1\ny = 2\nz = 3\n", Lang::Python))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Validation(ValidationError::TooLarge { max: 10, .. })
        ));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn syntax_error_never_reaches_the_provider() {
        let provider = Arc::new(ScriptedProvider::new(["{}"]));
        let err = scanner(&provider, StageOptions::default())
            .run(&SourceFile::new("def broken(:\n", Lang::Python))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Validation(ValidationError::Syntax { .. })
        ));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn blocked_pattern_is_fatal_in_production() {
        let provider = Arc::new(ScriptedProvider::new(["{}"]));
        let options = StageOptions {
            block_dangerous_patterns: true,
            ..StageOptions::default()
        };
        let err = scanner(&provider, options)
            .run(&SourceFile::new("eval(input())\n", Lang::Python))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Validation(ValidationError::DangerousPattern { .. })
        ));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn parses_structure_and_issues() {
        let reply = r#"{
            "functions": ["main"],
            "classes": [],
            "imports": ["os"],
            "issues": [{"type": "style", "description": "missing docstring", "severity": "low", "line": 3}]
        }"#;
        let provider = Arc::new(ScriptedProvider::new([reply]));
        let scan = scanner(&provider, StageOptions::default())
            .run(&SourceFile::new(SAMPLE, Lang::Python))
            .await
            .unwrap();

        assert_eq!(scan.structure.functions, vec!["main"]);
        assert_eq!(scan.structure.imports, vec!["os"]);
        assert_eq!(scan.issues.len(), 1);
        assert_eq!(scan.issues[0].severity, Severity::Low);
        assert_eq!(scan.issues[0].line, Some(3));
        assert!(scan.warnings.is_empty());

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].user.contains("```python\n"));
        assert_eq!(requests[0].temperature, 0.3);
    }

    #[tokio::test]
    async fn missing_fields_are_filled_with_defaults() {
        let provider = Arc::new(ScriptedProvider::new([r#"{"functions": ["main"]}"#]));
        let scan = scanner(&provider, StageOptions::default())
            .run(&SourceFile::new(SAMPLE, Lang::Python))
            .await
            .unwrap();
        assert_eq!(scan.structure.functions, vec!["main"]);
        assert!(scan.structure.classes.is_empty());
        assert!(scan.structure.imports.is_empty());
        assert!(scan.issues.is_empty());
    }

    #[tokio::test]
    async fn dangerous_pattern_becomes_a_warning() {
        let provider = Arc::new(ScriptedProvider::new(["{}"]));
        let scan = scanner(&provider, StageOptions::default())
            .run(&SourceFile::new("import os\nos.system('ls')\n", Lang::Python))
            .await
            .unwrap();
        assert_eq!(scan.warnings.len(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn rule_findings_come_before_model_issues() {
        let reply = r#"{"issues": [{"type": "bug", "description": "unchecked input", "severity": "high"}]}"#;
        let provider = Arc::new(ScriptedProvider::new([reply]));
        let scan = scanner(&provider, StageOptions::default())
            .run(&SourceFile::new("import yaml\ncfg = yaml.load(f)\n", Lang::Python))
            .await
            .unwrap();

        assert_eq!(scan.issues.len(), 2);
        assert_eq!(scan.issues[0].kind, "security");
        assert!(scan.issues[0].description.contains("SEC009"));
        assert_eq!(scan.issues[0].line, Some(2));
        assert_eq!(scan.issues[1].description, "unchecked input");
    }

    #[test]
    fn fallback_keeps_local_checks() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let code = format!("import os\nos.system('ls')\n# {}\n", "x".repeat(1200));
        let scan = scanner(&provider, StageOptions::default())
            .fallback(&SourceFile::new(code, Lang::Python));

        assert_eq!(scan.warnings.len(), 2);
        assert!(scan.warnings[0].starts_with("Line 3 exceeds"));
        assert!(scan.warnings[1].contains("os_system"));
        assert_eq!(scan.issues.len(), 1);
        assert!(scan.issues[0].description.contains("SEC005"));
        assert!(scan.structure.functions.is_empty());
    }

    #[tokio::test]
    async fn invalid_json_is_a_response_error() {
        let provider = Arc::new(ScriptedProvider::new(["definitely not json"]));
        let err = scanner(&provider, StageOptions::default())
            .run(&SourceFile::new(SAMPLE, Lang::Python))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Response(_)));
    }
}
