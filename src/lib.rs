//! # sekha
//!
//! An associative memory engine for conversational agents: a similarity-
//! deduplicated knowledge graph with spreading-activation retrieval, a
//! per-session working memory, and a single-flight decision loop.
//!
//! ## Architecture
//!
//! - **Knowledge graph** (`graph`): petgraph arena with content-similarity
//!   node identity, co-activation reinforcement, and budgeted retrieval
//! - **Working memory** (`memory`): append-only session state rendered as
//!   the decision context, with topic-deduplicated knowledge and variables
//! - **Agent** (`agent`): propose-execute loop over an injected language
//!   model, side-effect executors, and a reminder poller
//! - **Boundaries** (`embed`, `llm`): injected traits so the core never
//!   talks to a model backend itself
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sekha::agent::{Agent, AgentConfig};
//! # use sekha::embed::EmbeddingProvider;
//! # use sekha::llm::LanguageModel;
//! # fn providers() -> (Arc<dyn EmbeddingProvider>, Arc<dyn LanguageModel>) { unimplemented!() }
//!
//! let (embedder, llm) = providers();
//! let agent = Agent::new(AgentConfig::default(), embedder, llm).unwrap();
//! agent.set_on_reply(Arc::new(|message| println!("{message}")));
//! agent.receive_input("Remind me to water the plants at 2026-09-01 09:00");
//! ```

pub mod agent;
pub mod embed;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;

pub use agent::{Agent, AgentConfig};
pub use error::{SekhaError, SekhaResult};
pub use graph::{GraphConfig, KnowledgeGraph};
pub use memory::WorkingMemory;
