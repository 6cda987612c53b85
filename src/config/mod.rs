//! Process-wide configuration.
//!
//! Built once at startup from (in order) built-in defaults, an optional TOML
//! file, and environment variables, then handed to every stage explicitly.
//! Nothing here is reread after startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum characters accepted as a stage payload.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 500_000;

/// Maximum characters of source sent to the model in one prompt.
pub const DEFAULT_MAX_ANALYSIS_CHARS: usize = 10_000;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_TOKENS: u32 = 2000;

const GITHUB_MODELS_URL: &str = "https://models.inference.ai.azure.com";
const ANTHROPIC_URL: &str = "https://api.anthropic.com";
const OPENAI_URL: &str = "https://api.openai.com/v1";

// ── Provider kind ────────────────────────────────────────────────

/// Which model API family to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    /// GitHub Models, an OpenAI-compatible endpoint authenticated with a GitHub token.
    Github,
}

impl ProviderKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Github => "github",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Openai | Self::Github => "gpt-4o",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => ANTHROPIC_URL,
            Self::Openai => OPENAI_URL,
            Self::Github => GITHUB_MODELS_URL,
        }
    }

    /// Environment variable holding this provider's credential.
    pub fn key_env(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Openai => "OPENAI_API_KEY",
            Self::Github => "GITHUB_TOKEN",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "gpt" => Ok(Self::Openai),
            "github" | "github-models" => Ok(Self::Github),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Config ───────────────────────────────────────────────────────

/// Top-level configuration, deserializable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider family. Auto-selected from available credentials when unset.
    pub provider: Option<ProviderKind>,
    pub api_key: Option<String>,
    /// Overrides the provider's default endpoint (proxies, Azure, tests).
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Overrides every stage's built-in sampling temperature.
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub max_input_chars: usize,
    pub max_analysis_chars: usize,
    /// Treat dangerous code patterns as fatal instead of logging them.
    pub block_dangerous_patterns: bool,
    /// Request JSON-object replies from APIs that support it. Disable for
    /// OpenAI-compatible servers that reject `response_format`.
    pub json_mode: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: None,
            api_key: None,
            base_url: None,
            model: None,
            temperature: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            max_analysis_chars: DEFAULT_MAX_ANALYSIS_CHARS,
            block_dangerous_patterns: false,
            json_mode: true,
            log_level: "info".into(),
        }
    }
}

/// Fully resolved connection settings for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Config {
    /// Load configuration: defaults, then the TOML file, then the process environment.
    ///
    /// When `path` is `None` the per-user config file is used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.is_file() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Layer environment settings on top of the current values.
    ///
    /// `lookup` abstracts `std::env::var` so precedence can be tested without
    /// touching the real process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("STAGEHAND_PROVIDER") {
            self.provider = Some(raw.parse()?);
        }

        match self.provider {
            Some(kind) => {
                if let Some(key) = get(kind.key_env()) {
                    self.api_key = Some(key);
                }
            }
            None if self.api_key.is_none() => {
                // Priority: GitHub Models, then Anthropic, then OpenAI.
                for kind in [
                    ProviderKind::Github,
                    ProviderKind::Anthropic,
                    ProviderKind::Openai,
                ] {
                    if let Some(key) = get(kind.key_env()) {
                        self.provider = Some(kind);
                        self.api_key = Some(key);
                        break;
                    }
                }
            }
            None => {}
        }

        if self.provider == Some(ProviderKind::Openai) && self.base_url.is_none() {
            self.base_url = get("OPENAI_API_BASE");
        }
        if let Some(url) = get("STAGEHAND_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(model) = get("STAGEHAND_MODEL") {
            self.model = Some(model);
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level.to_ascii_lowercase();
        }
        if let Some(raw) = get("SCANNER_PRODUCTION") {
            self.block_dangerous_patterns = parse_flag("SCANNER_PRODUCTION", raw)?;
        }
        if let Some(raw) = get("STAGEHAND_JSON_MODE") {
            self.json_mode = parse_flag("STAGEHAND_JSON_MODE", raw)?;
        }
        Ok(())
    }

    /// Resolve the provider connection, failing if no credential is available.
    pub fn provider_settings(&self) -> Result<ProviderSettings, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredentials)?;
        let kind = self.provider.unwrap_or(ProviderKind::Anthropic);

        Ok(ProviderSettings {
            kind,
            api_key,
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| kind.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            model: self
                .model
                .clone()
                .unwrap_or_else(|| kind.default_model().to_string()),
        })
    }
}

fn parse_flag(key: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value: raw }),
    }
}

/// Per-user config file location (`<config dir>/stagehand/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "stagehand").map(|d| d.config_dir().join("config.toml"))
}
