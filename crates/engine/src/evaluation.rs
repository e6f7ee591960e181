//! Spawned evaluations and keyed supersession.
//!
//! [`Evaluation`] is the handle returned by
//! [`Engine::start`](crate::Engine::start): it owns the evaluation's
//! cancellation token and exposes its lifecycle through a `watch` channel.
//! [`Coordinator`] keeps at most one in-flight evaluation per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use moldeo_core::{Context, Error, Result};

use crate::engine::Engine;

/// Lifecycle of an asynchronous evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl EvaluationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EvaluationState::Completed | EvaluationState::Cancelled | EvaluationState::Failed
        )
    }

    /// Terminal state for an evaluation outcome.
    pub fn settled(result: &Result<Value>) -> Self {
        match result {
            Ok(_) => EvaluationState::Completed,
            Err(err) if err.is_cancelled() => EvaluationState::Cancelled,
            Err(_) => EvaluationState::Failed,
        }
    }
}

impl std::fmt::Display for EvaluationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvaluationState::Pending => "pending",
            EvaluationState::Running => "running",
            EvaluationState::Completed => "completed",
            EvaluationState::Cancelled => "cancelled",
            EvaluationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Handle to a spawned evaluation.
#[derive(Debug)]
pub struct Evaluation {
    id: Uuid,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    state: watch::Receiver<EvaluationState>,
    task: JoinHandle<Result<Value>>,
}

impl Evaluation {
    pub(crate) fn new(
        cancel: CancellationToken,
        state: watch::Receiver<EvaluationState>,
        task: JoinHandle<Result<Value>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            cancel,
            state,
            task,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> EvaluationState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch(&self) -> watch::Receiver<EvaluationState> {
        self.state.clone()
    }

    /// The evaluation's token; cancelling it is equivalent to [`cancel`](Self::cancel).
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        debug!(id = %self.id, "Cancelling evaluation");
        self.cancel.cancel();
    }

    /// Cancel once `after` elapses, unless the evaluation settles first.
    pub fn cancel_after(&self, after: Duration) {
        let token = self.cancel.clone();
        let mut state = self.state.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => token.cancel(),
                _ = state.wait_for(EvaluationState::is_terminal) => {}
            }
        });
    }

    /// Wait for the outcome.
    pub async fn result(self) -> Result<Value> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("evaluation task failed: {e}")))?
    }
}

// ── Coordinator ─────────────────────────────────────────────────────

/// Keyed dispatcher: starting an evaluation under a key cancels the one
/// already in flight under that key.
#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    in_flight: Arc<Mutex<HashMap<String, (Uuid, CancellationToken)>>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (Uuid, CancellationToken)>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel any stale evaluation for `key`, then start a new one.
    pub fn dispatch(
        &self,
        engine: &Engine,
        key: impl Into<String>,
        schema: Value,
        ctx: Context,
    ) -> Evaluation {
        let key = key.into();
        if let Some((stale, token)) = self.lock().remove(&key) {
            info!(key = %key, superseded = %stale, "Cancelling stale evaluation");
            token.cancel();
        }

        let evaluation = engine.start(schema, ctx);
        let id = evaluation.id();
        self.lock().insert(key.clone(), (id, evaluation.token()));

        let in_flight = self.in_flight.clone();
        let mut state = evaluation.watch();
        tokio::spawn(async move {
            let _ = state.wait_for(EvaluationState::is_terminal).await;
            let mut map = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if map.get(&key).is_some_and(|(current, _)| *current == id) {
                map.remove(&key);
            }
        });

        evaluation
    }

    /// Cancel the evaluation in flight under `key`, if any.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}
