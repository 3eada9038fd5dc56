//! Typed action vocabulary.
//!
//! The model proposes `{name, params}`; [`Action::parse`] is the single
//! validation step that turns a proposal into a typed variant. Everything
//! downstream matches on the enum; there is no string dispatch past this
//! boundary.

use serde_json::Value;

use crate::error::AgentError;
use crate::llm::ProposedAction;

/// One executable action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a message to the user. `wait: true` (the default) ends the
    /// current run; `wait: false` is a progress update mid-task.
    Reply { message: String, wait: bool },
    /// Web search, handled by a registered executor.
    Search { query: String },
    /// Browse toward a goal, handled by a registered executor.
    Browse { goal: String },
    /// Send an email, handled by a registered executor.
    Email { to: String, subject: String, body: String },
    /// Reason about a focus topic.
    Reason { focus: String },
    /// Schedule a reminder.
    Remind { at: String, message: String, recurring: bool },
    /// Persist one fact into the knowledge graph.
    Record { text: String },
    /// Recall from the knowledge graph into working memory.
    Learn { query: String },
    /// End the task, optionally with a closing message.
    Finish { message: Option<String> },
    /// Do nothing and wait for new input.
    Wait,
}

impl Action {
    /// Validate a model proposal into a typed action.
    ///
    /// Unknown names, missing parameters, and wrong JSON types each produce
    /// their own diagnostic; the decision loop treats any of them as an
    /// unparseable proposal.
    pub fn parse(proposal: &ProposedAction) -> Result<Self, AgentError> {
        let name = proposal.name.trim().to_lowercase();
        let params = &proposal.params;
        let action = match name.as_str() {
            "reply" => Self::Reply {
                message: required_str(params, &name, "message")?,
                wait: bool_param(params, "wait").unwrap_or(true),
            },
            "search" => Self::Search {
                query: required_str(params, &name, "query")?,
            },
            "browse" => Self::Browse {
                goal: required_str(params, &name, "goal")?,
            },
            "email" => Self::Email {
                to: required_str(params, &name, "to")?,
                subject: required_str(params, &name, "subject")?,
                body: required_str(params, &name, "body")?,
            },
            "reason" => Self::Reason {
                focus: required_str(params, &name, "focus")?,
            },
            "remind" => Self::Remind {
                at: required_str(params, &name, "at")?,
                message: required_str(params, &name, "message")?,
                recurring: bool_param(params, "recurring").unwrap_or(false),
            },
            "record" => Self::Record {
                text: required_str(params, &name, "text")?,
            },
            "learn" => Self::Learn {
                query: required_str(params, &name, "query")?,
            },
            "finish" => Self::Finish {
                message: optional_str(params, "message"),
            },
            "wait" => Self::Wait,
            _ => {
                return Err(AgentError::UnknownAction {
                    name: proposal.name.clone(),
                })
            }
        };
        Ok(action)
    }

    /// The registry name of this action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reply { .. } => "reply",
            Self::Search { .. } => "search",
            Self::Browse { .. } => "browse",
            Self::Email { .. } => "email",
            Self::Reason { .. } => "reason",
            Self::Remind { .. } => "remind",
            Self::Record { .. } => "record",
            Self::Learn { .. } => "learn",
            Self::Finish { .. } => "finish",
            Self::Wait => "wait",
        }
    }

    /// Whether executing this action ends the current decision-loop run.
    ///
    /// `reply` carries its wait marker, `finish` and `wait` always terminate;
    /// everything else loops straight into another proposal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Reply { wait: true, .. } | Self::Finish { .. } | Self::Wait
        )
    }

    /// One-line description for the action log.
    pub fn describe(&self) -> String {
        match self {
            Self::Reply { message, wait } => {
                if *wait {
                    format!("reply \"{message}\"")
                } else {
                    format!("reply (continuing) \"{message}\"")
                }
            }
            Self::Search { query } => format!("search \"{query}\""),
            Self::Browse { goal } => format!("browse \"{goal}\""),
            Self::Email { to, subject, .. } => format!("email {to} \"{subject}\""),
            Self::Reason { focus } => format!("reason \"{focus}\""),
            Self::Remind { at, message, recurring } => {
                if *recurring {
                    format!("remind (recurring) at {at}: \"{message}\"")
                } else {
                    format!("remind at {at}: \"{message}\"")
                }
            }
            Self::Record { text } => format!("record \"{text}\""),
            Self::Learn { query } => format!("learn \"{query}\""),
            Self::Finish { message: Some(m) } => format!("finish \"{m}\""),
            Self::Finish { message: None } => "finish".into(),
            Self::Wait => "wait".into(),
        }
    }
}

fn required_str(params: &Value, action: &str, key: &str) -> Result<String, AgentError> {
    optional_str(params, key).ok_or_else(|| AgentError::MissingParam {
        action: action.to_string(),
        param: key.to_string(),
    })
}

fn optional_str(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn bool_param(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proposal(name: &str, params: Value) -> ProposedAction {
        ProposedAction {
            name: name.into(),
            params,
        }
    }

    #[test]
    fn reply_defaults_to_waiting() {
        let action = Action::parse(&proposal("reply", json!({"message": "hi"}))).unwrap();
        assert_eq!(
            action,
            Action::Reply {
                message: "hi".into(),
                wait: true
            }
        );
        assert!(action.is_terminal());
    }

    #[test]
    fn non_waiting_reply_is_not_terminal() {
        let action =
            Action::parse(&proposal("reply", json!({"message": "working on it", "wait": false})))
                .unwrap();
        assert!(!action.is_terminal());
    }

    #[test]
    fn terminal_contract() {
        assert!(Action::Wait.is_terminal());
        assert!(Action::Finish { message: None }.is_terminal());
        for action in [
            Action::Search { query: "q".into() },
            Action::Browse { goal: "g".into() },
            Action::Reason { focus: "f".into() },
            Action::Record { text: "t".into() },
            Action::Learn { query: "q".into() },
            Action::Remind {
                at: "2026-09-01 09:00".into(),
                message: "m".into(),
                recurring: false,
            },
        ] {
            assert!(!action.is_terminal(), "{} should not terminate", action.name());
        }
    }

    #[test]
    fn unknown_action_rejected() {
        let err = Action::parse(&proposal("teleport", json!({}))).unwrap_err();
        assert!(matches!(err, AgentError::UnknownAction { .. }));
    }

    #[test]
    fn missing_param_rejected() {
        let err = Action::parse(&proposal("search", json!({}))).unwrap_err();
        assert!(matches!(
            err,
            AgentError::MissingParam { ref action, ref param } if action == "search" && param == "query"
        ));
    }

    #[test]
    fn wrong_param_type_rejected() {
        let err = Action::parse(&proposal("search", json!({"query": 42}))).unwrap_err();
        assert!(matches!(err, AgentError::MissingParam { .. }));
    }

    #[test]
    fn name_is_case_insensitive() {
        let action = Action::parse(&proposal("WAIT", json!(null))).unwrap();
        assert_eq!(action, Action::Wait);
    }

    #[test]
    fn email_requires_all_fields() {
        let err = Action::parse(&proposal(
            "email",
            json!({"to": "a@b.com", "subject": "hello"}),
        ))
        .unwrap_err();
        assert!(matches!(err, AgentError::MissingParam { ref param, .. } if param == "body"));
    }
}
