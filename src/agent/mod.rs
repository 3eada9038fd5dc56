//! Agent layer: the decision loop and its collaborators.
//!
//! The agent wraps the knowledge graph and working memory and adds:
//! - **Actions** (typed vocabulary parsed once at the LLM boundary)
//! - **Executors** (injected handlers for outward side effects)
//! - **Decision loop** (propose → execute with single-flight per session)
//! - **Reminders** (time-keyed queue + background poller)

pub mod action;
pub mod agent;
pub mod decision;
pub mod executor;
pub mod reminder;

pub use action::Action;
pub use agent::{Agent, AgentConfig};
pub use decision::{LoopPhase, LoopSignal, LoopState};
pub use executor::{ExecutorRegistry, SideEffectExecutor};
pub use reminder::{Reminder, ReminderStore};
