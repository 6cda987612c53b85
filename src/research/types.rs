//! Questions, stage messages and the final answer of the research pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A URL cited in the reply.
    Web,
    /// An academic-style `(Author, Year)` citation.
    Research,
    Internal,
    /// A `[Source: ...]` tag without a URL.
    Derived,
}

impl SourceType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Research => "research",
            Self::Internal => "internal",
            Self::Derived => "derived",
        }
    }
}

/// A reference backing part of an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub source_type: SourceType,
    /// Always within `0.0..=1.0`.
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_snippet: Option<String>,
}

impl Source {
    pub fn new(title: impl Into<String>, url: Option<String>, source_type: SourceType) -> Self {
        Self {
            title: title.into(),
            url,
            source_type,
            confidence: 1.0,
            content_snippet: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.content_snippet = Some(snippet.into());
        self
    }
}

/// A question submitted to the research pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    /// Extra background supplied by the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Question {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Output of one research stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub agent_name: String,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(agent_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            content: content.into(),
            sources: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Empty message standing in for a degraded stage.
    pub fn empty(agent_name: &str) -> Self {
        Self::new(agent_name, "")
    }
}

impl Default for AgentMessage {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// Terminal artifact of the research pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: Question,
    pub answer: String,
    /// Sources from every stage, deduplicated by title.
    pub sources: Vec<Source>,
    pub reasoning: String,
    /// Derived from the fact-checker's verdict, within `0.0..=1.0`.
    pub confidence: f64,
    pub agent_contributions: Vec<AgentMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_stages: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Answer {
    /// Format the answer as markdown for terminal output.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!("## {}\n\n", self.question.question));
        if self.answer.trim().is_empty() {
            md.push_str("*No answer could be synthesized.*\n");
        } else {
            md.push_str(self.answer.trim_end());
            md.push('\n');
        }

        md.push_str(&format!("\n**Confidence:** {:.0}%\n", self.confidence * 100.0));

        if !self.sources.is_empty() {
            md.push_str("\n### Sources\n\n");
            for (i, s) in self.sources.iter().enumerate() {
                match &s.url {
                    Some(url) => md.push_str(&format!(
                        "{}. {} <{}> ({})\n",
                        i + 1,
                        s.title,
                        url,
                        s.source_type.label()
                    )),
                    None => md.push_str(&format!(
                        "{}. {} ({})\n",
                        i + 1,
                        s.title,
                        s.source_type.label()
                    )),
                }
            }
        }

        if !self.degraded_stages.is_empty() {
            md.push_str(&format!(
                "\n*Degraded stages: {}*\n",
                self.degraded_stages.join(", ")
            ));
        }
        md
    }
}
