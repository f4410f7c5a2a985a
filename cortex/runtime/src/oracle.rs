//! Language-model boundary.
//!
//! The kernel never talks to a model. The driver turns a running task into an
//! [`OracleRequest`], awaits an [`Oracle`], and maps the answer back into
//! syscalls.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use cortex_kernel::TaskType;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OracleError;

/// Question put to the oracle on behalf of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Task being executed.
    pub task_id: String,
    /// Type of that task.
    pub task_type: TaskType,
    /// Natural-language prompt.
    pub prompt: String,
    /// Structured context (persona, goals, recent memories).
    #[serde(default)]
    pub context: Value,
}

/// Opaque answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    /// Free text.
    pub text: String,
    /// Optional structured payload.
    #[serde(default)]
    pub data: Value,
}

impl OracleResponse {
    /// Text-only answer.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: Value::Null,
        }
    }

    /// Attaches structured data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Language-model collaborator.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Answers one request.
    async fn complete(&self, request: OracleRequest) -> Result<OracleResponse, OracleError>;
}

/// Deterministic oracle fed from per-type scripts.
///
/// Each task type pops its queued answers in order; once a script runs dry
/// the oracle echoes the prompt back.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    scripts: Mutex<HashMap<TaskType, VecDeque<Result<OracleResponse, OracleError>>>>,
    calls: Mutex<Vec<OracleRequest>>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    /// Oracle with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps this long before every answer.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues an answer for `task_type`.
    #[must_use]
    pub fn respond(self, task_type: TaskType, response: OracleResponse) -> Self {
        self.push(task_type, Ok(response));
        self
    }

    /// Queues a failure for `task_type`.
    #[must_use]
    pub fn fail(self, task_type: TaskType, error: OracleError) -> Self {
        self.push(task_type, Err(error));
        self
    }

    /// Queues an answer on a shared oracle.
    pub fn push(&self, task_type: TaskType, answer: Result<OracleResponse, OracleError>) {
        self.scripts
            .lock()
            .entry(task_type)
            .or_default()
            .push_back(answer);
    }

    /// Every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<OracleRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .scripts
            .lock()
            .get_mut(&request.task_type)
            .and_then(VecDeque::pop_front);
        let echo = OracleResponse::text(request.prompt.clone());
        self.calls.lock().push(request);
        scripted.unwrap_or(Ok(echo))
    }
}
