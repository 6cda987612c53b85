//! Sequences the four review stages and assembles the final [`RefactorPlan`].

use std::sync::Arc;

use super::analysis::{AnalysisAgent, AnalysisInput};
use super::planner::{PlanInput, PlannerAgent};
use super::scanner::{ScannerAgent, SourceFile};
use super::style::{StyleAgent, StyleInput};
use super::types::RefactorPlan;
use crate::error::PipelineError;
use crate::provider::ChatProvider;
use crate::stage::{run_stage, StageOptions};

/// Scanner → Analysis → Style → Planner.
///
/// Every stage shares one provider client. A stage that fails on the
/// provider or its reply is replaced by an empty result and named in
/// [`RefactorPlan::degraded_stages`]; an input validation failure stops
/// the run before any later stage is called.
pub struct Orchestrator {
    scanner: ScannerAgent,
    analysis: AnalysisAgent,
    style: StyleAgent,
    planner: PlannerAgent,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ChatProvider>, options: StageOptions) -> Self {
        Self {
            scanner: ScannerAgent::new(provider.clone(), options.clone()),
            analysis: AnalysisAgent::new(provider.clone(), options.clone()),
            style: StyleAgent::new(provider.clone(), options.clone()),
            planner: PlannerAgent::new(provider, options),
        }
    }

    pub async fn run(&self, source: SourceFile) -> Result<RefactorPlan, PipelineError> {
        tracing::info!(
            language = source.lang.name(),
            chars = source.code.chars().count(),
            "Starting code review"
        );
        let mut degraded = Vec::new();

        let scan = run_stage(&self.scanner, &source, &mut degraded).await?;

        let analysis_input = AnalysisInput { source, scan };
        let analysis = run_stage(&self.analysis, &analysis_input, &mut degraded).await?;

        let AnalysisInput { source, scan } = analysis_input;
        let style_input = StyleInput {
            source,
            scan,
            analysis,
        };
        let style = run_stage(&self.style, &style_input, &mut degraded).await?;

        let plan_input = PlanInput {
            scan: style_input.scan,
            analysis: style_input.analysis,
            style,
        };
        let mut plan = run_stage(&self.planner, &plan_input, &mut degraded).await?;

        // A degraded planner still reports every upstream issue.
        plan.issues = plan_input.merged_issues();
        plan.degraded_stages = degraded;

        tracing::info!(
            steps = plan.steps.len(),
            issues = plan.issues.len(),
            degraded = plan.degraded_stages.len(),
            "Code review complete"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::provider::scripted::ScriptedProvider;
    use crate::review::preflight::Lang;
    use crate::review::types::Severity;

    const CODE: &str = "def div(a, b):\n    return a / b\n";

    const SCAN: &str = r#"{"functions": ["div"], "classes": [], "imports": [],
        "issues": [{"type": "style", "description": "missing docstring", "severity": "low"}]}"#;
    const ANALYSIS: &str = r#"{"issues": [
        {"type": "bug", "description": "division by zero", "severity": "high"},
        {"type": "logic", "description": "no type checks", "severity": "low"}]}"#;
    const STYLE: &str = r#"{"issues": [{"type": "style", "description": "terse names", "severity": "high"}]}"#;
    const PLAN: &str = r#"{"summary": "Guard the division",
        "steps": [{"step": 1, "action": "Check b", "rationale": "Avoid crash"},
                  {"step": 2, "action": "Rename params", "rationale": "Clarity"}]}"#;

    fn orchestrator(provider: &Arc<ScriptedProvider>) -> Orchestrator {
        Orchestrator::new(provider.clone(), StageOptions::default())
    }

    #[tokio::test]
    async fn full_run_merges_issues_by_severity_then_stage() {
        let provider = Arc::new(ScriptedProvider::new([SCAN, ANALYSIS, STYLE, PLAN]));
        let plan = orchestrator(&provider)
            .run(SourceFile::new(CODE, Lang::Python))
            .await
            .unwrap();

        assert_eq!(provider.calls(), 4);
        assert_eq!(plan.summary, "Guard the division");
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.degraded_stages.is_empty());

        let order: Vec<&str> = plan.issues.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(
            order,
            vec!["division by zero", "terse names", "missing docstring", "no type checks"]
        );
        assert_eq!(plan.issues[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn repeated_runs_are_deterministic() {
        let first = Arc::new(ScriptedProvider::new([SCAN, ANALYSIS, STYLE, PLAN]));
        let second = Arc::new(ScriptedProvider::new([SCAN, ANALYSIS, STYLE, PLAN]));
        let a = orchestrator(&first)
            .run(SourceFile::new(CODE, Lang::Python))
            .await
            .unwrap();
        let b = orchestrator(&second)
            .run(SourceFile::new(CODE, Lang::Python))
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn invalid_json_degrades_exactly_one_stage() {
        let provider = Arc::new(ScriptedProvider::new([SCAN, "not json", STYLE, PLAN]));
        let plan = orchestrator(&provider)
            .run(SourceFile::new(CODE, Lang::Python))
            .await
            .unwrap();

        assert_eq!(plan.degraded_stages, vec!["analysis"]);
        assert_eq!(provider.calls(), 4);
        let order: Vec<&str> = plan.issues.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(order, vec!["terse names", "missing docstring"]);
    }

    #[tokio::test]
    async fn failed_planner_keeps_merged_issues() {
        let provider = Arc::new(ScriptedProvider::new([SCAN, ANALYSIS, STYLE]).then_status(500));
        let plan = orchestrator(&provider)
            .run(SourceFile::new(CODE, Lang::Python))
            .await
            .unwrap();

        assert_eq!(plan.degraded_stages, vec!["planner"]);
        assert!(plan.steps.is_empty());
        assert_eq!(plan.summary, "");
        assert_eq!(plan.issues.len(), 4);
    }

    #[tokio::test]
    async fn every_stage_failing_still_completes() {
        let provider = Arc::new(ScriptedProvider::new(["[]", "7", "null", "\"x\""]));
        let plan = orchestrator(&provider)
            .run(SourceFile::new(CODE, Lang::Python))
            .await
            .unwrap();

        assert_eq!(
            plan.degraded_stages,
            vec!["scanner", "analysis", "style", "planner"]
        );
        assert_eq!(plan, RefactorPlan {
            degraded_stages: plan.degraded_stages.clone(),
            ..RefactorPlan::default()
        });
    }

    #[tokio::test]
    async fn oversized_model_issues_still_produce_a_plan() {
        let analysis = format!(
            r#"{{"issues": [{{"type": "bug", "description": "{}", "severity": "high"}}]}}"#,
            "d".repeat(300)
        );
        let provider = Arc::new(ScriptedProvider::new([
            SCAN.to_string(),
            analysis,
            STYLE.to_string(),
            PLAN.to_string(),
        ]));
        let options = StageOptions {
            max_input_chars: 200,
            ..StageOptions::default()
        };
        let plan = Orchestrator::new(provider.clone(), options)
            .run(SourceFile::new(CODE, Lang::Python))
            .await
            .unwrap();

        assert_eq!(provider.calls(), 4);
        assert!(plan.degraded_stages.is_empty());
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.issues[0].description.len(), 300);
    }

    #[tokio::test]
    async fn empty_code_aborts_without_calls() {
        let provider = Arc::new(ScriptedProvider::new([SCAN, ANALYSIS, STYLE, PLAN]));
        let err = orchestrator(&provider)
            .run(SourceFile::new("", Lang::Python))
            .await
            .unwrap_err();
        assert_eq!(err.validation(), &ValidationError::Empty);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_code_aborts_without_calls() {
        let provider = Arc::new(ScriptedProvider::new([SCAN, ANALYSIS, STYLE, PLAN]));
        let options = StageOptions {
            max_input_chars: 8,
            ..StageOptions::default()
        };
        let err = Orchestrator::new(provider.clone(), options)
            .run(SourceFile::new(CODE, Lang::Python))
            .await
            .unwrap_err();
        assert!(matches!(err.validation(), ValidationError::TooLarge { .. }));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn syntax_error_aborts_without_calls() {
        let provider = Arc::new(ScriptedProvider::new([SCAN, ANALYSIS, STYLE, PLAN]));
        let err = orchestrator(&provider)
            .run(SourceFile::new("def broken(:\n    pass\n", Lang::Python))
            .await
            .unwrap_err();
        assert!(matches!(err.validation(), ValidationError::Syntax { .. }));
        assert_eq!(provider.calls(), 0);
    }
}
