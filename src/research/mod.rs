//! Research question-answering pipeline.
//!
//! [`Coordinator`] runs [`ResearcherAgent`], [`FactCheckerAgent`] and
//! [`SynthesizerAgent`] in order, then scores the fact-check, merges the
//! cited sources and returns an [`Answer`].

pub mod agents;
pub mod coordinator;
pub mod sources;
pub mod types;

pub use agents::{FactCheckerAgent, ResearchInput, ResearcherAgent, SynthesizerAgent};
pub use coordinator::{calculate_confidence, Coordinator};
pub use types::{AgentMessage, Answer, Question, Source, SourceType};
