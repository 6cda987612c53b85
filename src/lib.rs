//! Sequential LLM agent pipelines.
//!
//! Two independent pipelines share one pattern: each stage validates its
//! payload, makes a single model call, and turns the JSON reply into a typed
//! result with missing fields filled in.
//!
//! - [`review`]: scanner, analysis, style and planner stages producing a
//!   [`review::RefactorPlan`]
//! - [`research`]: researcher, fact-checker and synthesizer stages producing
//!   a [`research::Answer`]
//!
//! A stage that fails on the provider or its reply is replaced by an empty
//! result so the run still completes; invalid input aborts the run.

pub mod config;
pub mod error;
pub mod provider;
pub mod research;
pub mod review;
pub mod stage;

pub use config::Config;
pub use error::{ConfigError, PipelineError, ProviderError, ResponseError, StageError, ValidationError};
pub use stage::{Stage, StageOptions};
