//! Rich diagnostic error types for the sekha engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the sekha engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum SekhaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reminder(#[from] ReminderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] AgentError),
}

/// Convenience alias used across the crate.
pub type SekhaResult<T> = std::result::Result<T, SekhaError>;

// ---------------------------------------------------------------------------
// Embedding errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EmbedError {
    #[error("cannot embed empty text")]
    #[diagnostic(
        code(sekha::embed::empty_text),
        help(
            "The embedding provider was given empty or whitespace-only input. \
             Filter blank strings before inserting them into memory."
        )
    )]
    EmptyText,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(sekha::embed::dim_mismatch),
        help(
            "All embeddings compared by the graph must share one dimension. \
             Check that every text was embedded by the same provider."
        )
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider failed: {message}")]
    #[diagnostic(
        code(sekha::embed::provider),
        help(
            "The injected embedding backend returned an error. Check its \
             availability and the inner message for details."
        )
    )]
    Provider { message: String },
}

// ---------------------------------------------------------------------------
// LLM errors
// ---------------------------------------------------------------------------

/// Errors from the language-model boundary.
///
/// `NoAction` is special: the decision loop treats it as a retry signal,
/// not a crash (up to the configured attempt bound).
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("model output contained no parseable action")]
    #[diagnostic(
        code(sekha::llm::no_action),
        help(
            "The model's reply could not be parsed into a {{name, params}} \
             action. The loop retries a bounded number of times before \
             surfacing an abort."
        )
    )]
    NoAction,

    #[error("language model request failed: {message}")]
    #[diagnostic(
        code(sekha::llm::request_failed),
        help(
            "The injected language-model backend returned an error. \
             Check connectivity and the inner message."
        )
    )]
    RequestFailed { message: String },
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Embed(#[from] EmbedError),

    #[error("node not found: {id}")]
    #[diagnostic(
        code(sekha::graph::node_not_found),
        help(
            "The node id does not exist in this graph. Node ids are only \
             valid for the graph that issued them."
        )
    )]
    NodeNotFound { id: u32 },

    #[error("snapshot I/O failed for \"{path}\": {source}")]
    #[diagnostic(
        code(sekha::graph::snapshot_io),
        help(
            "Check that the data directory exists, has correct permissions, \
             and that the disk is not full."
        )
    )]
    SnapshotIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot is not valid: {message}")]
    #[diagnostic(
        code(sekha::graph::snapshot_corrupt),
        help(
            "The snapshot file could not be decoded, or its edge list \
             references nodes that are not present. Restore from a backup \
             or start with a fresh graph."
        )
    )]
    SnapshotCorrupt { message: String },
}

// ---------------------------------------------------------------------------
// Working memory errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Embed(#[from] EmbedError),

    #[error("segmentation output unusable: {message}")]
    #[diagnostic(
        code(sekha::memory::segmentation),
        help(
            "The model's segmentation reply contained no recoverable \
             {{topic: [sentences]}} object, even after repair. Topics parsed \
             before the malformation are kept; this error means none were."
        )
    )]
    Segmentation { message: String },
}

// ---------------------------------------------------------------------------
// Reminder errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ReminderError {
    #[error("unparseable reminder timestamp: \"{input}\"")]
    #[diagnostic(
        code(sekha::reminder::invalid_timestamp),
        help(
            "Timestamps are accepted as RFC 3339 (\"2026-08-27T14:30:00Z\") \
             or \"YYYY-MM-DD HH:MM\" (assumed UTC). The reminder was not \
             scheduled; the poller keeps running."
        )
    )]
    InvalidTimestamp { input: String },
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("unknown action: \"{name}\"")]
    #[diagnostic(
        code(sekha::agent::unknown_action),
        help(
            "The model proposed an action outside the vocabulary \
             (reply/search/browse/email/reason/remind/record/learn/finish/wait)."
        )
    )]
    UnknownAction { name: String },

    #[error("action \"{action}\" is missing parameter \"{param}\"")]
    #[diagnostic(
        code(sekha::agent::missing_param),
        help(
            "The proposed action omitted a required parameter or gave it \
             the wrong JSON type."
        )
    )]
    MissingParam { action: String, param: String },

    #[error("no executor registered for action \"{name}\"")]
    #[diagnostic(
        code(sekha::agent::executor_not_found),
        help(
            "Register a SideEffectExecutor for this action name with \
             `agent.register_executor(...)` before the loop can dispatch it."
        )
    )]
    ExecutorNotFound { name: String },

    #[error("executor \"{name}\" failed: {message}")]
    #[diagnostic(
        code(sekha::agent::executor_failed),
        help(
            "The external action handler returned an error. The loop records \
             this as an observation and continues; it does not abort."
        )
    )]
    ExecutorFailed { name: String, message: String },

    #[error("no action could be determined after {attempts} attempts")]
    #[diagnostic(
        code(sekha::agent::no_action_determined),
        help(
            "Every proposal in this iteration was unparseable. The loop \
             aborted and returned to idle after replying to the user."
        )
    )]
    NoActionDetermined { attempts: u32 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),
}
