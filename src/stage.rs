//! The generic stage-agent pattern shared by both pipelines.
//!
//! A stage validates its payload, makes exactly one provider call, parses the
//! reply as a JSON object and reads its fields through [`Reply`], which fills
//! absent or mistyped fields with empty defaults. [`run_stage`] is the
//! orchestrator-side half: validation failures abort the run, anything else
//! is downgraded to the stage's fallback output.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::{PipelineError, ResponseError, StageError, StageResult, ValidationError};
use crate::provider::CompletionRequest;

// ── Stage trait ──────────────────────────────────────────────────

/// One pipeline step backed by a single model call.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Request envelope for this stage (payload plus upstream context).
    type Input: Sync;
    /// Structured result forwarded to the next stage.
    type Output: Default + Send;

    /// Stable stage name, used in logs and `degraded_stages`.
    fn name(&self) -> &'static str;

    /// Validate, call the model once, and parse the reply.
    async fn run(&self, input: &Self::Input) -> StageResult<Self::Output>;

    /// Output substituted when the stage fails recoverably.
    fn fallback(&self, _input: &Self::Input) -> Self::Output {
        Self::Output::default()
    }
}

/// Run a stage with graceful degradation.
///
/// Provider and response failures log one warning, record the stage name in
/// `degraded`, and yield [`Stage::fallback`]. Validation failures abort.
pub async fn run_stage<S: Stage>(
    stage: &S,
    input: &S::Input,
    degraded: &mut Vec<String>,
) -> Result<S::Output, PipelineError> {
    tracing::debug!(stage = stage.name(), "Running stage");
    match stage.run(input).await {
        Ok(output) => Ok(output),
        Err(StageError::Validation(source)) => {
            tracing::error!(stage = stage.name(), error = %source, "Stage rejected input");
            Err(PipelineError::Validation {
                stage: stage.name().to_string(),
                source,
            })
        }
        Err(e) => {
            tracing::warn!(
                stage = stage.name(),
                error = %e,
                "Stage failed, continuing with empty result"
            );
            degraded.push(stage.name().to_string());
            Ok(stage.fallback(input))
        }
    }
}

// ── Per-stage settings ───────────────────────────────────────────

/// The slice of [`Config`] every stage agent needs.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOptions {
    pub max_input_chars: usize,
    pub max_analysis_chars: usize,
    /// Overrides the stage's built-in temperature when set.
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    pub block_dangerous_patterns: bool,
    pub json_mode: bool,
}

impl From<&Config> for StageOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_input_chars: config.max_input_chars,
            max_analysis_chars: config.max_analysis_chars,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            block_dangerous_patterns: config.block_dangerous_patterns,
            json_mode: config.json_mode,
        }
    }
}

impl Default for StageOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl StageOptions {
    /// Build a stage request, using `temperature` unless overridden.
    pub fn request(&self, system: &str, user: String, temperature: f32) -> CompletionRequest {
        CompletionRequest::new(system, user)
            .temperature(self.temperature.unwrap_or(temperature))
            .max_tokens(self.max_tokens)
            .json_response(self.json_mode)
    }
}

// ── Input validation ─────────────────────────────────────────────

/// Reject empty (or whitespace-only) and oversized payloads.
pub fn validate_payload(text: &str, max_chars: usize) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = text.chars().count();
    if size > max_chars {
        return Err(ValidationError::TooLarge {
            size,
            max: max_chars,
        });
    }
    Ok(())
}

// ── Reply parsing ────────────────────────────────────────────────

/// Extract JSON content from a reply that may be wrapped in a ```json fence.
pub fn extract_json_block(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let json_start = start + "```json".len();
        if let Some(end) = text[json_start..].find("```") {
            return text[json_start..json_start + end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let block_start = start + 3;
        if let Some(end) = text[block_start..].find("```") {
            let candidate = text[block_start..block_start + end].trim();
            // Skip a language tag line such as "JSON".
            if let Some(nl) = candidate.find('\n') {
                if !candidate[..nl].trim_start().starts_with('{') {
                    return candidate[nl + 1..].trim();
                }
            }
            return candidate;
        }
    }
    text.trim()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A model reply that parsed as a JSON object.
#[derive(Debug, Clone)]
pub struct Reply {
    stage: String,
    fields: Map<String, Value>,
}

impl Reply {
    /// Parse raw reply text. Anything but a JSON object is a response error.
    pub fn parse(stage: &str, raw: &str) -> Result<Self, ResponseError> {
        let value: Value =
            serde_json::from_str(extract_json_block(raw)).map_err(|source| {
                ResponseError::InvalidJson {
                    stage: stage.to_string(),
                    source,
                }
            })?;
        match value {
            Value::Object(fields) => Ok(Self {
                stage: stage.to_string(),
                fields,
            }),
            other => Err(ResponseError::NotAnObject {
                stage: stage.to_string(),
                found: json_kind(&other),
            }),
        }
    }

    pub fn from_object(stage: &str, fields: Map<String, Value>) -> Self {
        Self {
            stage: stage.to_string(),
            fields,
        }
    }

    fn patched(&self, field: &str, problem: &str) {
        tracing::warn!(
            stage = %self.stage,
            field,
            "Reply field {problem}, using empty default"
        );
    }

    /// Required string field; `""` when absent or not a string.
    pub fn string(&self, field: &str) -> String {
        match self.fields.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                self.patched(field, &format!("is {}", json_kind(other)));
                String::new()
            }
            None => {
                self.patched(field, "missing");
                String::new()
            }
        }
    }

    /// Required array field; empty when absent or not an array.
    pub fn array(&self, field: &str) -> Vec<Value> {
        match self.fields.get(field) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                self.patched(field, &format!("is {}", json_kind(other)));
                Vec::new()
            }
            None => {
                self.patched(field, "missing");
                Vec::new()
            }
        }
    }

    /// Required list of strings. Non-string items are dropped.
    pub fn string_list(&self, field: &str) -> Vec<String> {
        self.array(field)
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Optional field access without default-filling.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}
