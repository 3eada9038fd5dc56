//! Working memory: the per-session state container.
//!
//! Everything the action-proposal step is allowed to see lives here, and
//! `render()` is the only way it sees it. Observations, actions, and
//! conversation turns are append-only; knowledge topics and variables are
//! deduplicated by embedding similarity so paraphrased repeats collapse into
//! one slot.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embed::{cosine_similarity, EmbeddingProvider};
use crate::error::MemoryError;
use crate::llm::LanguageModel;

use super::segment::parse_segments;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    /// The human user.
    User,
    /// The agent.
    Agent,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Agent => write!(f, "Agent"),
        }
    }
}

/// A single turn in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who spoke.
    pub speaker: Speaker,
    /// The raw text of this turn.
    pub text: String,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
}

/// A knowledge topic: a deduplicated title with its accumulated sentences.
#[derive(Debug, Clone)]
struct Topic {
    title: String,
    embedding: Vec<f32>,
    sentences: Vec<String>,
}

/// A user variable slot. The name is similarity-resolved so synonyms
/// ("email", "email_address") share one slot.
#[derive(Debug, Clone)]
struct Variable {
    name: String,
    embedding: Vec<f32>,
    value: String,
}

/// Per-session mutable state. Created at session start, replaced wholesale on
/// reset, garbage-collected with the session.
pub struct WorkingMemory {
    embedder: Arc<dyn EmbeddingProvider>,
    identity_threshold: f32,
    observations: Vec<String>,
    actions: Vec<String>,
    conversation: Vec<ConversationTurn>,
    knowledge: Vec<Topic>,
    variables: Vec<Variable>,
    basic_information: BTreeMap<String, String>,
}

impl WorkingMemory {
    /// Create an empty working memory for one session.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, identity_threshold: f32) -> Self {
        Self {
            embedder,
            identity_threshold,
            observations: Vec::new(),
            actions: Vec::new(),
            conversation: Vec::new(),
            knowledge: Vec::new(),
            variables: Vec::new(),
            basic_information: BTreeMap::new(),
        }
    }

    // -- append-only records ------------------------------------------------

    /// Record an observation. Ordering preserved, no dedup.
    pub fn store_observation(&mut self, text: impl Into<String>) {
        self.observations.push(text.into());
    }

    /// Record an executed action in the action log.
    pub fn store_action(&mut self, record: impl Into<String>) {
        self.actions.push(record.into());
    }

    /// Record a conversation turn.
    pub fn store_conversation(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.conversation.push(ConversationTurn {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    // -- topic-deduplicated knowledge --------------------------------------

    /// Store sentences under a topic, resolving the title against existing
    /// topics the same way the knowledge graph deduplicates nodes: exact
    /// match first, then embedding similarity at the identity threshold.
    pub fn store_knowledge(
        &mut self,
        topic: &str,
        sentences: Vec<String>,
    ) -> Result<(), MemoryError> {
        if let Some(existing) = self.knowledge.iter_mut().find(|t| t.title == topic) {
            existing.sentences.extend(sentences);
            return Ok(());
        }
        let embedding = self.embedder.embed(topic)?;
        let mut best: Option<(usize, f32)> = None;
        for (i, existing) in self.knowledge.iter().enumerate() {
            let sim = cosine_similarity(&embedding, &existing.embedding)?;
            if sim >= self.identity_threshold && best.map_or(true, |(_, b)| sim > b) {
                best = Some((i, sim));
            }
        }
        match best {
            Some((i, sim)) => {
                tracing::debug!(topic, merged_into = %self.knowledge[i].title, similarity = sim,
                    "knowledge topic deduplicated");
                self.knowledge[i].sentences.extend(sentences);
            }
            None => self.knowledge.push(Topic {
                title: topic.to_string(),
                embedding,
                sentences,
            }),
        }
        Ok(())
    }

    /// Segment raw text via the model and store each topic.
    ///
    /// Convenience wrapper around [`WorkingMemory::store_segmented`]. Callers
    /// sharing this memory behind a lock should run the model call outside
    /// the lock and hand the reply to `store_segmented` instead, so the lock
    /// is never held across a model round trip.
    pub fn ingest_text(
        &mut self,
        raw: &str,
        query: Option<&str>,
        llm: &dyn LanguageModel,
    ) -> Result<usize, MemoryError> {
        let reply = llm.segment(raw).map_err(|e| MemoryError::Segmentation {
            message: e.to_string(),
        })?;
        self.store_segmented(&reply, raw, query)
    }

    /// Store an already-produced segmentation reply.
    ///
    /// Tolerates malformed or truncated segmentation output: every topic
    /// parsed before the malformation is stored. When nothing is
    /// recoverable and a `query` is given, the raw text is stored under the
    /// query as a topic of last resort.
    pub fn store_segmented(
        &mut self,
        reply: &str,
        raw: &str,
        query: Option<&str>,
    ) -> Result<usize, MemoryError> {
        match parse_segments(reply) {
            Ok(topics) => {
                let stored = topics.len();
                for (title, sentences) in topics {
                    self.store_knowledge(&title, sentences)?;
                }
                Ok(stored)
            }
            Err(e) => match query {
                Some(query) => {
                    tracing::warn!(error = %e, "segmentation unusable — storing raw text under query topic");
                    self.store_knowledge(query, vec![raw.to_string()])?;
                    Ok(1)
                }
                None => Err(e),
            },
        }
    }

    // -- similarity-resolved variables --------------------------------------

    /// Look up a variable: exact name first, then the most similar existing
    /// name at or above the identity threshold.
    pub fn resolve_variable(&self, name: &str) -> Result<Option<String>, MemoryError> {
        Ok(self
            .resolve_variable_slot(name)?
            .map(|i| self.variables[i].value.clone()))
    }

    /// Set a variable, overwriting the best-matching existing slot so
    /// synonymous names never produce duplicates.
    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) -> Result<(), MemoryError> {
        match self.resolve_variable_slot(name)? {
            Some(i) => self.variables[i].value = value.into(),
            None => {
                let embedding = self.embedder.embed(name)?;
                self.variables.push(Variable {
                    name: name.to_string(),
                    embedding,
                    value: value.into(),
                });
            }
        }
        Ok(())
    }

    fn resolve_variable_slot(&self, name: &str) -> Result<Option<usize>, MemoryError> {
        if let Some(i) = self.variables.iter().position(|v| v.name == name) {
            return Ok(Some(i));
        }
        if self.variables.is_empty() {
            return Ok(None);
        }
        let embedding = self.embedder.embed(name)?;
        let mut best: Option<(usize, f32)> = None;
        for (i, variable) in self.variables.iter().enumerate() {
            let sim = cosine_similarity(&embedding, &variable.embedding)?;
            if sim >= self.identity_threshold && best.map_or(true, |(_, b)| sim > b) {
                best = Some((i, sim));
            }
        }
        Ok(best.map(|(i, _)| i))
    }

    // -- basic information --------------------------------------------------

    /// Set a basic-information entry (rendered in its own section).
    pub fn set_basic_information(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.basic_information.insert(key.into(), value.into());
    }

    // -- snapshot -----------------------------------------------------------

    /// Number of observations recorded so far.
    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    /// The action log.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// The conversation history.
    pub fn conversation(&self) -> &[ConversationTurn] {
        &self.conversation
    }

    /// Textual snapshot of all state — the only context the action-proposal
    /// step sees. Never mutates; the clock entry reflects the render time.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("## Basic Information\n");
        out.push_str(&format!("current time: {}\n", Utc::now().to_rfc3339()));
        for (key, value) in &self.basic_information {
            out.push_str(&format!("{key}: {value}\n"));
        }

        out.push_str("\n## Observations\n");
        if self.observations.is_empty() {
            out.push_str("No observations recorded yet.\n");
        }
        for observation in &self.observations {
            out.push_str(&format!("- {observation}\n"));
        }

        out.push_str("\n## Conversation\n");
        if self.conversation.is_empty() {
            out.push_str("No conversation yet.\n");
        }
        for turn in &self.conversation {
            out.push_str(&format!("{}: {}\n", turn.speaker, turn.text));
        }

        out.push_str("\n## Knowledge\n");
        if self.knowledge.is_empty() {
            out.push_str("No knowledge recorded or reasoned.\n");
        }
        for topic in &self.knowledge {
            out.push_str(&format!("### {}\n", topic.title));
            for sentence in &topic.sentences {
                out.push_str(&format!("- {sentence}\n"));
            }
        }

        out.push_str("\n## Variables\n");
        if self.variables.is_empty() {
            out.push_str("No variables set.\n");
        }
        for variable in &self.variables {
            out.push_str(&format!("{}: {}\n", variable.name, variable.value));
        }

        out.push_str("\n## Actions Taken\n");
        if self.actions.is_empty() {
            out.push_str("No actions taken yet.\n");
        }
        for action in &self.actions {
            out.push_str(&format!("- {action}\n"));
        }

        out
    }
}

impl std::fmt::Debug for WorkingMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingMemory")
            .field("observations", &self.observations.len())
            .field("actions", &self.actions.len())
            .field("conversation", &self.conversation.len())
            .field("knowledge_topics", &self.knowledge.len())
            .field("variables", &self.variables.len())
            .finish()
    }
}
