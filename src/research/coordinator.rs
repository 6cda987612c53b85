//! Sequences the research stages and assembles the final [`Answer`].

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;

use super::agents::{FactCheckerAgent, ResearchInput, ResearcherAgent, SynthesizerAgent};
use super::types::{AgentMessage, Answer, Question, Source};
use crate::error::PipelineError;
use crate::provider::ChatProvider;
use crate::stage::{run_stage, StageOptions};

const VERIFYING_WORDS: &[&str] = &[
    "verified",
    "accurate",
    "confirmed",
    "reliable",
    "factual",
    "substantiated",
    "corroborated",
    "validated",
    "authentic",
];

const DOUBTING_WORDS: &[&str] = &[
    "uncertain",
    "unverified",
    "questionable",
    "contradicts",
    "false",
    "misleading",
    "disputed",
    "debunked",
    "inaccurate",
];

fn whole_word_pattern(words: &[&str]) -> Regex {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
}

static VERIFYING: LazyLock<Regex> = LazyLock::new(|| whole_word_pattern(VERIFYING_WORDS));
static DOUBTING: LazyLock<Regex> = LazyLock::new(|| whole_word_pattern(DOUBTING_WORDS));

/// Neutral score when the fact-check gives no verdict words.
const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Score the fact-checker's verdict.
///
/// Counts whole-word verifying and doubting terms and maps the verifying
/// share onto `0.1..=0.9`, rounded to two decimals. No terms at all (or
/// empty content) yields 0.5.
pub fn calculate_confidence(fact_check: &str) -> f64 {
    if fact_check.trim().is_empty() {
        tracing::debug!("Empty fact check content, using neutral confidence");
        return NEUTRAL_CONFIDENCE;
    }

    let high = VERIFYING.find_iter(fact_check).count();
    let low = DOUBTING.find_iter(fact_check).count();
    tracing::debug!(high, low, "Confidence indicators");

    let total = high + low;
    if total == 0 {
        return NEUTRAL_CONFIDENCE;
    }
    let ratio = high as f64 / total as f64;
    ((0.1 + 0.8 * ratio) * 100.0).round() / 100.0
}

/// Sources of all messages in order, first occurrence of each title wins.
pub fn collect_sources(messages: &[AgentMessage]) -> Vec<Source> {
    let mut seen = HashSet::new();
    messages
        .iter()
        .flat_map(|m| m.sources.iter())
        .filter(|s| seen.insert(s.title.clone()))
        .cloned()
        .collect()
}

/// `NAME: <first 200 chars>...` per message, separated by blank lines.
pub fn build_reasoning(messages: &[AgentMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let head: String = m.content.chars().take(200).collect();
            format!("{}: {head}...", m.agent_name.to_uppercase())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Researcher → FactChecker → Synthesizer.
pub struct Coordinator {
    researcher: ResearcherAgent,
    fact_checker: FactCheckerAgent,
    synthesizer: SynthesizerAgent,
}

impl Coordinator {
    pub fn new(provider: Arc<dyn ChatProvider>, options: StageOptions) -> Self {
        Self {
            researcher: ResearcherAgent::new(provider.clone(), options.clone()),
            fact_checker: FactCheckerAgent::new(provider.clone(), options.clone()),
            synthesizer: SynthesizerAgent::new(provider, options),
        }
    }

    pub async fn answer(&self, question: Question) -> Result<Answer, PipelineError> {
        tracing::info!(question = %question.question, "Processing question");
        let mut degraded = Vec::new();

        tracing::info!("Step 1: research");
        let input = ResearchInput::new(question, Vec::new());
        let research = run_stage(&self.researcher, &input, &mut degraded).await?;

        tracing::info!("Step 2: fact-checking");
        let input = ResearchInput::new(input.question, vec![research]);
        let fact_check = run_stage(&self.fact_checker, &input, &mut degraded).await?;

        tracing::info!("Step 3: synthesis");
        let confidence = calculate_confidence(&fact_check.content);
        let ResearchInput {
            question,
            mut context,
        } = input;
        context.push(fact_check);
        let input = ResearchInput::new(question, context);
        let synthesis = run_stage(&self.synthesizer, &input, &mut degraded).await?;

        let ResearchInput {
            question,
            context: mut contributions,
        } = input;
        let answer_text = synthesis.content.clone();
        contributions.push(synthesis);

        let answer = Answer {
            question,
            answer: answer_text,
            sources: collect_sources(&contributions),
            reasoning: build_reasoning(&contributions),
            confidence,
            agent_contributions: contributions,
            degraded_stages: degraded,
            timestamp: Utc::now(),
        };
        tracing::info!(
            confidence = answer.confidence,
            sources = answer.sources.len(),
            degraded = answer.degraded_stages.len(),
            "Question answered"
        );
        Ok(answer)
    }
}
