//! Single-flight decision loop state.
//!
//! Exactly one loop runs per session. Input that arrives while the loop is
//! running does not start a second one; it flips the state to "pending" and
//! the running loop picks the refreshed context up on its next iteration.
//! The three phases live in one atomic so signal and finish are race-free
//! without holding a lock across the loop body.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, warn};

use crate::error::AgentError;
use crate::llm::LanguageModel;

use super::action::Action;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const RUNNING_PENDING: u8 = 2;

/// Observable phase of the decision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// No loop running; the next input starts one.
    Idle,
    /// A loop is running with no unconsumed input behind it.
    Running,
    /// A loop is running and new input arrived since its iteration began.
    RunningWithPending,
}

/// What a caller should do after signalling new input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    /// The state moved to running; the caller owns starting a worker.
    StartWorker,
    /// A loop was already running; the input was folded into its next pass.
    Coalesced,
}

/// Atomic three-phase machine guarding the loop.
#[derive(Debug, Default)]
pub struct LoopState(AtomicU8);

impl LoopState {
    pub fn new() -> Self {
        Self(AtomicU8::new(IDLE))
    }

    /// Record that new input arrived.
    ///
    /// Idle becomes running and the caller must start the worker; any running
    /// phase becomes pending and the caller does nothing further.
    pub fn signal(&self) -> LoopSignal {
        loop {
            match self.0.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .0
                        .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return LoopSignal::StartWorker;
                    }
                }
                RUNNING => {
                    if self
                        .0
                        .compare_exchange(
                            RUNNING,
                            RUNNING_PENDING,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return LoopSignal::Coalesced;
                    }
                }
                RUNNING_PENDING => return LoopSignal::Coalesced,
                other => unreachable!("loop state {other}"),
            }
        }
    }

    /// Fold pending input into the iteration that is about to run.
    ///
    /// Called at the top of each iteration so input that arrived during the
    /// previous one is consumed by the context render that follows.
    pub fn absorb_pending(&self) {
        let _ = self.0.compare_exchange(
            RUNNING_PENDING,
            RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Finish one full run of the loop after a terminal action.
    ///
    /// Returns `true` when input arrived during the run and the loop must go
    /// around again instead of exiting.
    pub fn finish_iteration(&self) -> bool {
        if self
            .0
            .compare_exchange(
                RUNNING_PENDING,
                RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            debug!("pending input, continuing loop");
            return true;
        }
        let _ = self
            .0
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire);
        false
    }

    /// Drop straight to idle, discarding any pending marker. Used on abort
    /// and reset.
    pub fn force_idle(&self) {
        self.0.store(IDLE, Ordering::Release);
    }

    pub fn phase(&self) -> LoopPhase {
        match self.0.load(Ordering::Acquire) {
            IDLE => LoopPhase::Idle,
            RUNNING => LoopPhase::Running,
            _ => LoopPhase::RunningWithPending,
        }
    }
}

/// Ask the model for an action, retrying on failure.
///
/// A failed request, an empty proposal, and an unparseable proposal all
/// count as one attempt. After `retries` attempts the loop gives up with
/// [`AgentError::NoActionDetermined`] and the caller aborts the run.
pub fn propose_action(
    llm: &dyn LanguageModel,
    context: &str,
    retries: u32,
) -> Result<Action, AgentError> {
    let mut attempts = 0;
    while attempts < retries {
        attempts += 1;
        let proposal = match llm.propose(context) {
            Ok(p) => p,
            Err(err) => {
                warn!(attempt = attempts, %err, "proposal request failed");
                continue;
            }
        };
        match Action::parse(&proposal) {
            Ok(action) => return Ok(action),
            Err(err) => {
                warn!(attempt = attempts, name = %proposal.name, %err, "unusable proposal");
            }
        }
    }
    Err(AgentError::NoActionDetermined { attempts })
}
