//! Code-review pipeline.
//!
//! Four stages run in a fixed order, each one model call:
//!
//! - [`ScannerAgent`]: local pre-checks and security rules, then structure
//!   and first issues
//! - [`AnalysisAgent`]: bugs, logic errors, security problems
//! - [`StyleAgent`]: readability and conventions
//! - [`PlannerAgent`]: prioritized refactor steps over every finding
//!
//! [`Orchestrator`] threads each stage's result into the next and returns a
//! [`RefactorPlan`].

pub mod analysis;
pub mod orchestrator;
pub mod planner;
pub mod preflight;
pub mod rules;
pub mod scanner;
pub mod style;
pub mod types;

pub use analysis::{AnalysisAgent, AnalysisInput};
pub use orchestrator::Orchestrator;
pub use planner::{PlanInput, PlannerAgent};
pub use preflight::Lang;
pub use rules::{security_findings, Finding};
pub use scanner::{ScannerAgent, SourceFile};
pub use style::{StyleAgent, StyleInput};
pub use types::{CodeIssue, CodeStructure, RefactorPlan, RefactorStep, ScanResult, Severity};
