//! Error taxonomy shared by both pipelines.
//!
//! Only [`ValidationError`] and [`ConfigError`] are fatal. Provider and
//! response failures are caught at the stage boundary and downgraded to an
//! empty default result (see [`crate::stage::run_stage`]).

/// Input rejected before any outbound call is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("input is empty")]
    Empty,

    #[error("input too large ({size} characters). Maximum allowed: {max} characters")]
    TooLarge { size: usize, max: usize },

    #[error("invalid {language} syntax at line {line}, column {column}")]
    Syntax {
        language: &'static str,
        line: usize,
        column: usize,
    },

    #[error("dangerous code pattern detected: {pattern}")]
    DangerousPattern { pattern: String },

    #[error("failed to load {language} grammar: {reason}")]
    UnsupportedGrammar {
        language: &'static str,
        reason: String,
    },
}

/// Failure talking to the model provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} reply contained no text")]
    EmptyReply { provider: &'static str },
}

/// The model replied, but not with a usable JSON object.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("{stage}: invalid JSON response: {source}")]
    InvalidJson {
        stage: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{stage}: expected a JSON object, got {found}")]
    NotAnObject { stage: String, found: &'static str },
}

/// Anything a single stage can fail with.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Response(#[from] ResponseError),
}

/// Errors that abort a whole pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage} rejected input: {source}")]
    Validation {
        stage: String,
        #[source]
        source: ValidationError,
    },
}

impl PipelineError {
    /// The underlying validation failure.
    pub fn validation(&self) -> &ValidationError {
        match self {
            Self::Validation { source, .. } => source,
        }
    }
}

/// Startup configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "no API credentials found. Set one of:\n\
         - GITHUB_TOKEN (for GitHub Models)\n\
         - ANTHROPIC_API_KEY (for Anthropic)\n\
         - OPENAI_API_KEY (for OpenAI, optionally with OPENAI_API_BASE)"
    )]
    MissingCredentials,

    #[error("unknown provider '{0}' (expected anthropic, openai or github)")]
    UnknownProvider(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

pub type StageResult<T> = std::result::Result<T, StageError>;
