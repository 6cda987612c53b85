//! The three research stages.
//!
//! Each one sends the question plus the earlier stages' messages to the model
//! and reads back `{"content": ..., "sources": [...]}`. Sources named in the
//! prose are extracted as well.

use std::sync::Arc;

use async_trait::async_trait;

use super::sources::{extract_sources, sources_from_reply};
use super::types::{AgentMessage, Question};
use crate::error::StageResult;
use crate::provider::ChatProvider;
use crate::stage::{validate_payload, Reply, Stage, StageOptions};

const TEMPERATURE: f32 = 0.7;

const RESPONSE_FORMAT: &str = "

Return ONLY a JSON object with this structure:
{
  \"content\": \"your full response as markdown text\",
  \"sources\": [{\"title\": \"source title\", \"url\": \"https://... or omit\"}]
}";

/// The question plus every earlier stage's message.
#[derive(Debug, Clone)]
pub struct ResearchInput {
    pub question: Question,
    pub context: Vec<AgentMessage>,
}

impl ResearchInput {
    pub fn new(question: Question, context: Vec<AgentMessage>) -> Self {
        Self { question, context }
    }

    /// Context messages that actually carry content.
    fn usable_context(&self) -> impl Iterator<Item = &AgentMessage> {
        self.context.iter().filter(|m| !m.content.trim().is_empty())
    }
}

fn source_list(msg: &AgentMessage) -> String {
    if msg.sources.is_empty() {
        return String::new();
    }
    let mut s = String::from("Sources:\n");
    for source in &msg.sources {
        s.push_str(&format!("- {}\n", source.title));
    }
    s
}

// ── Shared call ──────────────────────────────────────────────────

/// Validate the question, make the single model call, and parse the reply.
async fn consult(
    provider: &dyn ChatProvider,
    options: &StageOptions,
    stage: &'static str,
    system: &str,
    question: &Question,
    user: String,
) -> StageResult<AgentMessage> {
    validate_payload(&question.question, options.max_input_chars)?;

    let system = format!("{system}{RESPONSE_FORMAT}");
    let raw = provider
        .complete(&options.request(&system, user, TEMPERATURE))
        .await?;

    let reply = Reply::parse(stage, &raw)?;
    let mut message = AgentMessage::new(stage, reply.string("content"));
    message.sources = sources_from_reply(stage, &reply);
    message.sources.extend(extract_sources(&message.content));

    tracing::info!(
        stage,
        chars = message.content.chars().count(),
        sources = message.sources.len(),
        "Stage complete"
    );
    Ok(message)
}

// ── Researcher ───────────────────────────────────────────────────

/// Gathers information about the question from several angles.
pub struct ResearcherAgent {
    provider: Arc<dyn ChatProvider>,
    options: StageOptions,
}

impl ResearcherAgent {
    pub fn new(provider: Arc<dyn ChatProvider>, options: StageOptions) -> Self {
        Self { provider, options }
    }

    fn build_prompt(input: &ResearchInput) -> String {
        let mut prompt = format!("Question: {}\n", input.question.question);
        if let Some(ctx) = input.question.context.as_deref().filter(|c| !c.trim().is_empty()) {
            prompt.push_str(&format!("\nBackground from the user:\n{ctx}\n"));
        }
        let mut prior = input.usable_context().peekable();
        if prior.peek().is_some() {
            prompt.push_str("\nContext from other agents:\n");
            for msg in prior {
                prompt.push_str(&format!("\n{}: {}\n", msg.agent_name, msg.content));
            }
        }
        prompt
    }
}

#[async_trait]
impl Stage for ResearcherAgent {
    type Input = ResearchInput;
    type Output = AgentMessage;

    fn name(&self) -> &'static str {
        "researcher"
    }

    async fn run(&self, input: &ResearchInput) -> StageResult<AgentMessage> {
        const SYSTEM: &str = "You are a research agent. Your role is to gather comprehensive \
information about the given question. Focus on finding accurate, relevant information from \
multiple perspectives.

Instructions:
1. Identify key concepts and topics in the question
2. Consider multiple angles and perspectives
3. Gather relevant facts, data, and information
4. Cite sources where applicable (use [Source: description] format)
5. Note any assumptions or limitations

Provide a comprehensive research summary with sources.";

        consult(
            self.provider.as_ref(),
            &self.options,
            self.name(),
            SYSTEM,
            &input.question,
            Self::build_prompt(input),
        )
        .await
    }

    fn fallback(&self, _input: &ResearchInput) -> AgentMessage {
        AgentMessage::empty(self.name())
    }
}

// ── Fact checker ─────────────────────────────────────────────────

/// Verifies the research and flags doubtful claims.
pub struct FactCheckerAgent {
    provider: Arc<dyn ChatProvider>,
    options: StageOptions,
}

impl FactCheckerAgent {
    pub fn new(provider: Arc<dyn ChatProvider>, options: StageOptions) -> Self {
        Self { provider, options }
    }

    fn build_prompt(input: &ResearchInput) -> String {
        let mut prompt = format!("Question/Claim to verify: {}\n", input.question.question);
        let mut prior = input.usable_context().peekable();
        if prior.peek().is_some() {
            prompt.push_str("\nInformation to verify:\n");
            for msg in prior {
                prompt.push_str(&format!("\n{}:\n{}\n", msg.agent_name, msg.content));
                prompt.push_str(&source_list(msg));
            }
        }
        prompt
    }
}

#[async_trait]
impl Stage for FactCheckerAgent {
    type Input = ResearchInput;
    type Output = AgentMessage;

    fn name(&self) -> &'static str {
        "fact_checker"
    }

    async fn run(&self, input: &ResearchInput) -> StageResult<AgentMessage> {
        const SYSTEM: &str = "You are a fact-checker agent. Your role is to verify the accuracy \
of information and validate sources. Be critical and thorough in your assessment.

Instructions:
1. Identify key claims that need verification
2. Assess the credibility and reliability of sources
3. Look for contradictions or inconsistencies
4. Verify facts against known reliable sources
5. Rate confidence level for each claim (high/medium/low)
6. Flag any misinformation or unverified claims

Use plain verdict words (verified, accurate, confirmed, uncertain, disputed, false) \
so the assessment can be scored.

Provide a detailed fact-check analysis.";

        consult(
            self.provider.as_ref(),
            &self.options,
            self.name(),
            SYSTEM,
            &input.question,
            Self::build_prompt(input),
        )
        .await
    }

    fn fallback(&self, _input: &ResearchInput) -> AgentMessage {
        AgentMessage::empty(self.name())
    }
}

// ── Synthesizer ──────────────────────────────────────────────────

/// Combines research and fact-check into the final answer text.
pub struct SynthesizerAgent {
    provider: Arc<dyn ChatProvider>,
    options: StageOptions,
}

impl SynthesizerAgent {
    pub fn new(provider: Arc<dyn ChatProvider>, options: StageOptions) -> Self {
        Self { provider, options }
    }

    fn build_prompt(input: &ResearchInput) -> String {
        let mut prompt = format!("Question: {}\n", input.question.question);
        let mut prior = input.usable_context().peekable();
        if prior.peek().is_some() {
            prompt.push_str("\nInformation to synthesize:\n");
            for msg in prior {
                prompt.push_str(&format!(
                    "\n--- {} ---\n{}\n",
                    msg.agent_name.to_uppercase(),
                    msg.content
                ));
                let sources = source_list(msg);
                if !sources.is_empty() {
                    prompt.push('\n');
                    prompt.push_str(&sources);
                }
            }
        }
        prompt
    }
}

#[async_trait]
impl Stage for SynthesizerAgent {
    type Input = ResearchInput;
    type Output = AgentMessage;

    fn name(&self) -> &'static str {
        "synthesizer"
    }

    async fn run(&self, input: &ResearchInput) -> StageResult<AgentMessage> {
        const SYSTEM: &str = "You are a synthesizer agent. Your role is to combine information \
from multiple sources into a clear, coherent, and well-structured answer.

Instructions:
1. Integrate information from all available sources
2. Resolve any contradictions or inconsistencies
3. Structure the answer logically and clearly
4. Maintain accuracy while being comprehensive
5. Include proper attribution to sources
6. Highlight key points and insights
7. Note any caveats or limitations

Provide a well-reasoned, synthesized answer.";

        consult(
            self.provider.as_ref(),
            &self.options,
            self.name(),
            SYSTEM,
            &input.question,
            Self::build_prompt(input),
        )
        .await
    }

    fn fallback(&self, _input: &ResearchInput) -> AgentMessage {
        AgentMessage::empty(self.name())
    }
}
