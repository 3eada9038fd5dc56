//! Per-session working memory.
//!
//! The mutable state container the action-proposal step reads and writes:
//! observations, the action log, conversation history, topic-deduplicated
//! knowledge, similarity-resolved variables, and basic session information.

pub mod segment;
pub mod working;

pub use segment::{parse_memories, parse_segments};
pub use working::{ConversationTurn, Speaker, WorkingMemory};
