//! The agent: knowledge graph + working memory + decision loop + reminders.
//!
//! `Agent` owns everything for one session and exposes a small surface:
//! feed it input, register executors and callbacks, and it drives itself on
//! background threads. The loop body itself is synchronous; concurrency
//! lives entirely in the single-flight state machine and the poller.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::embed::EmbeddingProvider;
use crate::error::{AgentError, SekhaResult};
use crate::graph::{GraphConfig, KnowledgeGraph};
use crate::llm::LanguageModel;
use crate::memory::{parse_memories, Speaker, WorkingMemory};

use super::action::Action;
use super::decision::{propose_action, LoopPhase, LoopSignal, LoopState};
use super::executor::{ExecutorRegistry, SideEffectExecutor};
use super::reminder::{spawn_poller, ReminderStore};

/// Callback invoked with each outgoing message.
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Agent construction parameters.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Knowledge-graph thresholds, shared with working-memory dedup.
    pub graph: GraphConfig,
    /// Proposal attempts per iteration before the loop aborts.
    pub propose_retries: u32,
    /// Reminder poller wake interval.
    pub poll_interval: Duration,
    /// Where the graph snapshot lives; `None` disables persistence.
    pub data_dir: Option<PathBuf>,
    /// Session label, used for the snapshot filename and log context.
    pub session_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            graph: GraphConfig::default(),
            propose_retries: 3,
            poll_interval: Duration::from_secs(60),
            data_dir: None,
            session_id: "default".to_string(),
        }
    }
}

struct AgentInner {
    config: AgentConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    graph: Arc<KnowledgeGraph>,
    wm: Mutex<WorkingMemory>,
    executors: Mutex<ExecutorRegistry>,
    loop_state: LoopState,
    /// Bumped by `reset`; a worker whose generation is stale exits without
    /// touching anything.
    generation: AtomicU64,
    reminders: Arc<ReminderStore>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    on_reply: Mutex<Option<MessageCallback>>,
    on_final: Mutex<Option<MessageCallback>>,
}

/// One agent session.
pub struct Agent {
    inner: Arc<AgentInner>,
    poller: Option<JoinHandle<()>>,
}

impl Agent {
    /// Build an agent, restoring the graph snapshot when one exists under
    /// the configured data directory, and start the reminder poller.
    pub fn new(
        config: AgentConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> SekhaResult<Self> {
        let snapshot_path = config
            .data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.graph.json", config.session_id)));
        let graph = match &snapshot_path {
            Some(path) if path.exists() => Arc::new(KnowledgeGraph::load(
                config.graph.clone(),
                Arc::clone(&embedder),
                path,
            )?),
            _ => Arc::new(KnowledgeGraph::new(
                config.graph.clone(),
                Arc::clone(&embedder),
            )),
        };

        let wm = WorkingMemory::new(Arc::clone(&embedder), config.graph.identity_threshold);
        let inner = Arc::new(AgentInner {
            embedder,
            llm,
            graph,
            wm: Mutex::new(wm),
            executors: Mutex::new(ExecutorRegistry::new()),
            loop_state: LoopState::new(),
            generation: AtomicU64::new(0),
            reminders: Arc::new(ReminderStore::new()),
            shutdown: Arc::new((Mutex::new(false), Condvar::new())),
            on_reply: Mutex::new(None),
            on_final: Mutex::new(None),
            config,
        });

        let poller = {
            let fire_target = Arc::clone(&inner);
            spawn_poller(
                Arc::clone(&inner.reminders),
                inner.config.poll_interval,
                Arc::clone(&inner.shutdown),
                move |reminder| {
                    fire_target
                        .wm
                        .lock()
                        .expect("working memory lock poisoned")
                        .store_observation(format!("Reminder: {}", reminder.message));
                    AgentInner::trigger(&fire_target);
                },
            )
        };

        info!(session = %inner.config.session_id, "agent session started");
        Ok(Self {
            inner,
            poller: Some(poller),
        })
    }

    /// Feed one user utterance into the session.
    ///
    /// Records the turn and either starts a decision loop or folds the input
    /// into the one already running. Returns immediately; replies arrive via
    /// the `on_reply` callback.
    pub fn receive_input(&self, text: &str) {
        {
            let mut wm = self.inner.wm.lock().expect("working memory lock poisoned");
            wm.store_conversation(Speaker::User, text);
            wm.store_observation("Received new user input.");
        }
        AgentInner::trigger(&self.inner);
    }

    /// Register a side-effect handler for its action name.
    pub fn register_executor(&self, executor: Arc<dyn SideEffectExecutor>) {
        self.inner
            .executors
            .lock()
            .expect("executor registry lock poisoned")
            .register(executor);
    }

    /// Set the callback for outgoing replies.
    pub fn set_on_reply(&self, callback: MessageCallback) {
        *self.inner.on_reply.lock().expect("callback lock poisoned") = Some(callback);
    }

    /// Set the callback invoked when a task finishes.
    pub fn set_on_final(&self, callback: MessageCallback) {
        *self.inner.on_final.lock().expect("callback lock poisoned") = Some(callback);
    }

    /// Current decision-loop phase.
    pub fn loop_phase(&self) -> LoopPhase {
        self.inner.loop_state.phase()
    }

    /// The session's reminder store.
    pub fn reminders(&self) -> Arc<ReminderStore> {
        Arc::clone(&self.inner.reminders)
    }

    /// The session's long-term knowledge graph.
    pub fn knowledge_graph(&self) -> Arc<KnowledgeGraph> {
        Arc::clone(&self.inner.graph)
    }

    /// Run a closure against the session's working memory.
    pub fn with_working_memory<R>(&self, f: impl FnOnce(&mut WorkingMemory) -> R) -> R {
        let mut wm = self.inner.wm.lock().expect("working memory lock poisoned");
        f(&mut wm)
    }

    /// Discard the session's working memory and stop any in-flight loop.
    ///
    /// The generation bump makes running workers exit at their next
    /// iteration boundary without touching the fresh state. The knowledge
    /// graph and reminders survive a reset.
    pub fn reset(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        let fresh = WorkingMemory::new(
            Arc::clone(&self.inner.embedder),
            self.inner.config.graph.identity_threshold,
        );
        *self.inner.wm.lock().expect("working memory lock poisoned") = fresh;
        self.inner.loop_state.force_idle();
        info!(session = %self.inner.config.session_id, "session reset");
    }

    /// Write the graph snapshot under the data directory. No-op without one.
    pub fn persist(&self) -> SekhaResult<()> {
        let Some(dir) = &self.inner.config.data_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir).map_err(|source| crate::error::GraphError::SnapshotIo {
            path: dir.display().to_string(),
            source,
        })?;
        let path = dir.join(format!("{}.graph.json", self.inner.config.session_id));
        self.inner.graph.save(&path)?;
        Ok(())
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.inner.shutdown;
        *lock.lock().expect("shutdown lock poisoned") = true;
        cvar.notify_all();
        if let Some(handle) = self.poller.take() {
            let _ = handle.join();
        }
    }
}

impl AgentInner {
    /// Signal the loop and start a worker when the state machine says to.
    fn trigger(inner: &Arc<Self>) {
        match inner.loop_state.signal() {
            LoopSignal::StartWorker => {
                let worker = Arc::clone(inner);
                let generation = inner.generation.load(Ordering::Acquire);
                std::thread::spawn(move || worker.run_loop(generation));
            }
            LoopSignal::Coalesced => {
                debug!("input coalesced into running loop");
            }
        }
    }

    /// The decision loop: propose, execute, repeat until a terminal action.
    ///
    /// After a terminal action the loop consolidates the conversation into
    /// the graph, then either goes around again (input arrived mid-run) or
    /// returns the state to idle.
    fn run_loop(&self, generation: u64) {
        loop {
            if self.generation.load(Ordering::Acquire) != generation {
                debug!("stale worker exiting after reset");
                return;
            }
            self.loop_state.absorb_pending();

            let context = self
                .wm
                .lock()
                .expect("working memory lock poisoned")
                .render();

            let action = match propose_action(&*self.llm, &context, self.config.propose_retries) {
                Ok(action) => action,
                Err(err) => {
                    warn!(%err, "aborting loop iteration");
                    self.observe(format!("Failed to determine an action: {err}"));
                    self.reply("Sorry, I could not determine an action to take.");
                    // Input that arrived during the failed attempts still
                    // gets its own iteration instead of being stranded.
                    if self.loop_state.finish_iteration() {
                        debug!("retrying with input that arrived during the abort");
                        continue;
                    }
                    return;
                }
            };

            // A reset during the model call invalidated this iteration's
            // context; discard the proposal rather than act on stale state.
            if self.generation.load(Ordering::Acquire) != generation {
                debug!("stale worker discarding proposal after reset");
                return;
            }

            debug!(action = action.name(), "executing action");
            let terminal = action.is_terminal();
            self.execute(&action);
            self.wm
                .lock()
                .expect("working memory lock poisoned")
                .store_action(action.describe());

            if terminal {
                self.consolidate_conversation();
                if !self.loop_state.finish_iteration() {
                    return;
                }
            }
        }
    }

    fn execute(&self, action: &Action) {
        match action {
            Action::Reply { message, .. } => self.reply(message),
            Action::Search { query } => self.dispatch_into_memory("search", action, query),
            Action::Browse { goal } => self.dispatch_into_memory("browse", action, goal),
            Action::Email { to, .. } => match self.dispatch("email", action) {
                Ok(Some(output)) => self.observe(output),
                Ok(None) => self.observe(format!("Email sent to {to}.")),
                Err(err) => self.observe(format!("Email failed: {err}")),
            },
            Action::Reason { focus } => {
                if self.executor("reason").is_some() {
                    self.dispatch_into_memory("reason", action, focus);
                } else {
                    self.observe(format!("Reasoned about: {focus}"));
                }
            }
            Action::Remind {
                at,
                message,
                recurring,
            } => match self.reminders.schedule(at, message, *recurring) {
                Ok(_) => self.observe(format!("Reminder set for {at}: {message}")),
                Err(err) => self.observe(format!("Reminder not set: {err}")),
            },
            Action::Record { text } => match self.graph.insert(text) {
                Ok(id) => {
                    debug!(node = %id, "fact recorded");
                    self.observe(format!("Recorded to long-term memory: {text}"));
                }
                Err(err) => self.observe(format!("Could not record memory: {err}")),
            },
            Action::Learn { query } => match self.graph.retrieve(query) {
                Ok(activations) => {
                    let recall = self.graph.render_recall(&activations);
                    let mut wm = self.wm.lock().expect("working memory lock poisoned");
                    if let Err(err) = wm.store_knowledge(query, vec![recall]) {
                        drop(wm);
                        self.observe(format!("Could not store recalled memory: {err}"));
                    }
                }
                Err(err) => self.observe(format!("Recall failed: {err}")),
            },
            Action::Finish { message } => {
                if let Some(message) = message {
                    self.reply(message);
                }
                self.emit_final(message.as_deref().unwrap_or("Task finished."));
            }
            Action::Wait => {}
        }
    }

    /// Dispatch to an executor and fold any textual output into working
    /// memory under `query`. Segmentation runs before the memory lock is
    /// taken, so input and reminder delivery never wait on the model call.
    /// Failures become observations, never aborts.
    fn dispatch_into_memory(&self, name: &str, action: &Action, query: &str) {
        match self.dispatch(name, action) {
            Ok(Some(output)) => {
                let reply = match self.llm.segment(&output) {
                    Ok(reply) => reply,
                    Err(err) => {
                        self.observe(format!("Could not ingest {name} output: {err}"));
                        return;
                    }
                };
                let stored = self
                    .wm
                    .lock()
                    .expect("working memory lock poisoned")
                    .store_segmented(&reply, &output, Some(query));
                if let Err(err) = stored {
                    self.observe(format!("Could not ingest {name} output: {err}"));
                }
            }
            Ok(None) => {}
            Err(err) => self.observe(format!("Action {name} failed: {err}")),
        }
    }

    fn dispatch(&self, name: &str, action: &Action) -> Result<Option<String>, AgentError> {
        let handler = self
            .executor(name)
            .ok_or_else(|| AgentError::ExecutorNotFound {
                name: name.to_string(),
            })?;
        handler.execute(action)
    }

    fn executor(&self, name: &str) -> Option<Arc<dyn SideEffectExecutor>> {
        self.executors
            .lock()
            .expect("executor registry lock poisoned")
            .get(name)
    }

    /// Extract memorable facts from the rendered context and fold them into
    /// the knowledge graph. Best-effort: a model or graph failure here is
    /// logged and the reply already sent stands.
    fn consolidate_conversation(&self) {
        let context = self
            .wm
            .lock()
            .expect("working memory lock poisoned")
            .render();
        let raw = match self.llm.extract_memories(&context) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, "memory extraction failed");
                return;
            }
        };
        let memories = match parse_memories(&raw) {
            Ok(memories) => memories,
            Err(err) => {
                warn!(%err, "memory extraction output unusable");
                return;
            }
        };
        if memories.is_empty() {
            return;
        }
        match self.graph.consolidate(&memories) {
            Ok(ids) => debug!(consolidated = ids.len(), "conversation consolidated"),
            Err(err) => warn!(%err, "consolidation failed"),
        }
    }

    fn observe(&self, text: String) {
        self.wm
            .lock()
            .expect("working memory lock poisoned")
            .store_observation(text);
    }

    /// Record an agent turn and invoke the reply callback.
    fn reply(&self, message: &str) {
        self.wm
            .lock()
            .expect("working memory lock poisoned")
            .store_conversation(Speaker::Agent, message);
        let callback = self
            .on_reply
            .lock()
            .expect("callback lock poisoned")
            .clone();
        match callback {
            Some(callback) => callback(message),
            None => debug!(message, "reply with no callback registered"),
        }
    }

    fn emit_final(&self, message: &str) {
        let callback = self
            .on_final
            .lock()
            .expect("callback lock poisoned")
            .clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("session", &self.inner.config.session_id)
            .field("phase", &self.inner.loop_state.phase())
            .field("graph_nodes", &self.inner.graph.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbedError, LlmError};
    use crate::llm::ProposedAction;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Embeds every text to the same unit vector: all similarities are 1.0.
    struct ConstEmbedder;

    impl EmbeddingProvider for ConstEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.trim().is_empty() {
                return Err(EmbedError::EmptyText);
            }
            Ok(vec![1.0, 0.0])
        }
    }

    /// Plays back a fixed list of proposals, then waits forever.
    struct ScriptedModel {
        proposals: Mutex<VecDeque<ProposedAction>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<(&str, serde_json::Value)>) -> Self {
            Self {
                proposals: Mutex::new(
                    script
                        .into_iter()
                        .map(|(name, params)| ProposedAction {
                            name: name.into(),
                            params,
                        })
                        .collect(),
                ),
            }
        }
    }

    impl LanguageModel for ScriptedModel {
        fn propose(&self, _context: &str) -> Result<ProposedAction, LlmError> {
            Ok(self
                .proposals
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ProposedAction {
                    name: "wait".into(),
                    params: json!(null),
                }))
        }
        fn segment(&self, raw: &str) -> Result<String, LlmError> {
            Ok(format!(r#"{{"Output": ["{raw}"]}}"#))
        }
        fn extract_memories(&self, _context: &str) -> Result<String, LlmError> {
            Ok(r#"{"memories": []}"#.to_string())
        }
    }

    struct FailingModel;

    impl LanguageModel for FailingModel {
        fn propose(&self, _context: &str) -> Result<ProposedAction, LlmError> {
            Err(LlmError::RequestFailed {
                message: "down".into(),
            })
        }
        fn segment(&self, _raw: &str) -> Result<String, LlmError> {
            Err(LlmError::RequestFailed {
                message: "down".into(),
            })
        }
        fn extract_memories(&self, _context: &str) -> Result<String, LlmError> {
            Err(LlmError::RequestFailed {
                message: "down".into(),
            })
        }
    }

    fn agent_with(llm: Arc<dyn LanguageModel>) -> Agent {
        Agent::new(AgentConfig::default(), Arc::new(ConstEmbedder), llm).unwrap()
    }

    fn wait_until_idle(agent: &Agent) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while agent.loop_phase() != LoopPhase::Idle {
            assert!(Instant::now() < deadline, "loop never returned to idle");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn reply_reaches_callback_and_conversation() {
        let agent = agent_with(Arc::new(ScriptedModel::new(vec![(
            "reply",
            json!({"message": "hello there"}),
        )])));
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&replies);
        agent.set_on_reply(Arc::new(move |m| sink.lock().unwrap().push(m.to_string())));

        agent.receive_input("hi");
        wait_until_idle(&agent);

        assert_eq!(replies.lock().unwrap().as_slice(), ["hello there"]);
        agent.with_working_memory(|wm| {
            let agent_turns: Vec<_> = wm
                .conversation()
                .iter()
                .filter(|t| t.speaker == Speaker::Agent)
                .collect();
            assert_eq!(agent_turns.len(), 1);
            assert_eq!(agent_turns[0].text, "hello there");
            assert!(!wm.actions().is_empty());
        });
    }

    #[test]
    fn abort_after_retry_bound_apologizes() {
        let agent = agent_with(Arc::new(FailingModel));
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&replies);
        agent.set_on_reply(Arc::new(move |m| sink.lock().unwrap().push(m.to_string())));

        agent.receive_input("hi");
        wait_until_idle(&agent);

        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("could not determine an action"));
    }

    #[test]
    fn record_then_finish_inserts_into_graph() {
        let agent = agent_with(Arc::new(ScriptedModel::new(vec![
            ("record", json!({"text": "User likes tacos."})),
            ("finish", json!({})),
        ])));
        agent.receive_input("I like tacos");
        wait_until_idle(&agent);

        assert_eq!(agent.knowledge_graph().len(), 1);
        agent.with_working_memory(|wm| {
            assert!(wm.actions().iter().any(|a| a.starts_with("record")));
        });
    }

    #[test]
    fn bad_reminder_timestamp_becomes_observation() {
        let agent = agent_with(Arc::new(ScriptedModel::new(vec![(
            "remind",
            json!({"at": "soonish", "message": "do the thing"}),
        )])));
        agent.receive_input("remind me");
        wait_until_idle(&agent);

        assert!(agent.reminders().is_empty());
        let rendered = agent.with_working_memory(|wm| wm.render());
        assert!(rendered.contains("Reminder not set"));
    }

    #[test]
    fn unregistered_executor_becomes_observation() {
        let agent = agent_with(Arc::new(ScriptedModel::new(vec![(
            "email",
            json!({"to": "a@b.com", "subject": "hi", "body": "text"}),
        )])));
        agent.receive_input("email them");
        wait_until_idle(&agent);

        let rendered = agent.with_working_memory(|wm| wm.render());
        assert!(rendered.contains("Email failed"));
    }

    #[test]
    fn reset_clears_working_memory_but_not_graph() {
        let agent = agent_with(Arc::new(ScriptedModel::new(vec![
            ("record", json!({"text": "a fact"})),
            ("finish", json!({})),
        ])));
        agent.receive_input("note this");
        wait_until_idle(&agent);
        assert_eq!(agent.knowledge_graph().len(), 1);

        agent.reset();
        assert_eq!(agent.loop_phase(), LoopPhase::Idle);
        assert_eq!(agent.knowledge_graph().len(), 1);
        agent.with_working_memory(|wm| {
            assert_eq!(wm.observation_count(), 0);
            assert!(wm.conversation().is_empty());
        });
    }

    #[test]
    fn persist_without_data_dir_is_a_noop() {
        let agent = agent_with(Arc::new(ScriptedModel::new(vec![])));
        agent.persist().unwrap();
    }
}
