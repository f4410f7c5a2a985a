//! Asynchronous driver: observes the queue, runs tasks, reports back.

use std::{sync::Arc, time::Duration};

use cortex_kernel::{scheduler::TaskStatus, Action, KernelTask, Syscall, TaskType, WorldState};
use serde::Serialize;
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::DriverConfig,
    error::{OracleError, RuntimeError},
    executor::{TaskExecutor, TaskOutcome},
    store::StateStore,
    telemetry::RuntimeTelemetry,
};

/// What one finished task looked like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    /// Task id.
    pub task_id: String,
    /// Task type.
    pub task_type: TaskType,
    /// Outcome.
    pub status: TaskStatus,
    /// Summary on success, reason on failure.
    pub detail: String,
    /// Follow-up syscalls dispatched.
    pub follow_ups: usize,
}

/// Result of one [`Driver::step`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Nothing was runnable.
    Idle {
        /// Tick after the step.
        tick: u64,
    },
    /// A task ran to completion or failure.
    Ran(TaskReport),
}

/// Totals of one [`Driver::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverReport {
    /// Steps taken.
    pub steps: usize,
    /// Steps in which nothing ran.
    pub idle_steps: usize,
    /// Tasks completed.
    pub completed: usize,
    /// Tasks failed.
    pub failed: usize,
    /// Tick at the end of the run.
    pub final_tick: u64,
    /// Per-task reports in execution order.
    pub tasks: Vec<TaskReport>,
}

impl DriverReport {
    /// Counts one step; returns `true` if it was idle.
    fn record(&mut self, outcome: StepOutcome) -> bool {
        self.steps += 1;
        match outcome {
            StepOutcome::Idle { .. } => {
                self.idle_steps += 1;
                true
            }
            StepOutcome::Ran(task) => {
                match task.status {
                    TaskStatus::Completed => self.completed += 1,
                    TaskStatus::Failed => self.failed += 1,
                }
                self.tasks.push(task);
                false
            }
        }
    }
}

/// Drives kernel tasks through a [`TaskExecutor`].
pub struct Driver {
    store: Arc<StateStore>,
    executor: Arc<dyn TaskExecutor>,
    config: DriverConfig,
    telemetry: RuntimeTelemetry,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Creates a driver over `store`.
    #[must_use]
    pub fn new(
        store: Arc<StateStore>,
        executor: Arc<dyn TaskExecutor>,
        config: DriverConfig,
        telemetry: RuntimeTelemetry,
    ) -> Self {
        Self {
            store,
            executor,
            config,
            telemetry,
        }
    }

    /// The store being driven.
    #[must_use]
    pub const fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Optionally ticks, then runs the first eligible task, if any.
    ///
    /// Executor failures and timeouts are reported to the kernel as
    /// `FAIL_TASK` and are not errors of the step.
    ///
    /// # Errors
    ///
    /// A dispatch the store refuses for the driver's own bookkeeping commands.
    #[instrument(level = "debug", skip(self))]
    pub async fn step(&self) -> Result<StepOutcome, RuntimeError> {
        if self.config.tick_every_step {
            self.store.syscall(Syscall::Tick {})?;
        }
        let state = self.store.current();
        let Some(task) = state.kernel.next_runnable().cloned() else {
            debug!(tick = state.kernel.tick, "nothing runnable");
            return Ok(StepOutcome::Idle {
                tick: state.kernel.tick,
            });
        };
        let trace = task.trace_id.as_deref();

        self.store.submit(&traced(
            Syscall::SetRunning {
                task_id: task.id.clone(),
            },
            trace,
        ))?;
        self.event(
            "driver.task.started",
            trace,
            json!({ "task": task.id, "type": task.task_type() }),
        );

        let started = self.store.current();
        let report = match self.execute(&started, &task).await {
            Ok(outcome) => self.complete(&task, outcome)?,
            Err(err) => self.fail(&task, &err.to_string(), 0)?,
        };
        Ok(StepOutcome::Ran(report))
    }

    /// Steps until the queue drains or `max_steps` (the configured bound when
    /// `None`) is reached.
    ///
    /// # Errors
    ///
    /// The first failing [`Self::step`].
    pub async fn run(&self, max_steps: Option<usize>) -> Result<DriverReport, RuntimeError> {
        let limit = max_steps.unwrap_or(self.config.max_steps);
        let mut report = DriverReport::default();
        while report.steps < limit {
            let idle = report.record(self.step().await?);
            let state = self.store.current();
            if idle && state.kernel.queue.is_empty() && state.kernel.running.is_none() {
                break;
            }
        }
        report.final_tick = self.store.current().kernel.tick;
        info!(
            steps = report.steps,
            completed = report.completed,
            failed = report.failed,
            "driver run finished"
        );
        self.log(LogLevel::Info, "driver.run.finished", None, json!(report));
        Ok(report)
    }

    /// Steps every `period` until `shutdown` turns `true` or its sender is dropped.
    ///
    /// # Errors
    ///
    /// The first failing [`Self::step`].
    pub async fn serve(
        &self,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DriverReport, RuntimeError> {
        let mut interval = tokio::time::interval(period);
        let mut report = DriverReport::default();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    report.record(self.step().await?);
                }
            }
        }
        report.final_tick = self.store.current().kernel.tick;
        Ok(report)
    }

    async fn execute(
        &self,
        state: &WorldState,
        task: &KernelTask,
    ) -> Result<TaskOutcome, OracleError> {
        let work = self.executor.execute(state, task);
        match self.config.oracle_timeout() {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or(Err(OracleError::Timeout(limit))),
            None => work.await,
        }
    }

    fn complete(&self, task: &KernelTask, outcome: TaskOutcome) -> Result<TaskReport, RuntimeError> {
        let trace = task.trace_id.as_deref();
        let mut applied = 0;
        for follow_up in outcome.follow_ups {
            let call = follow_up.name().to_string();
            if let Err(err) = self.store.submit(&traced(follow_up, trace)) {
                warn!(task = %task.id, %call, error = %err, "follow-up refused");
                return self.fail(task, &format!("{call} refused: {err}"), applied);
            }
            applied += 1;
        }
        self.store.submit(&traced(
            Syscall::CompleteTask {
                task_id: task.id.clone(),
                summary: Some(outcome.summary.clone()),
            },
            trace,
        ))?;
        self.event(
            "driver.task.completed",
            trace,
            json!({ "task": task.id, "type": task.task_type(), "followUps": applied }),
        );
        Ok(TaskReport {
            task_id: task.id.clone(),
            task_type: task.task_type(),
            status: TaskStatus::Completed,
            detail: outcome.summary,
            follow_ups: applied,
        })
    }

    fn fail(
        &self,
        task: &KernelTask,
        reason: &str,
        follow_ups: usize,
    ) -> Result<TaskReport, RuntimeError> {
        let trace = task.trace_id.as_deref();
        warn!(task = %task.id, reason, "task failed");
        self.store.submit(&traced(
            Syscall::FailTask {
                task_id: task.id.clone(),
                reason: reason.to_string(),
            },
            trace,
        ))?;
        self.event(
            "driver.task.failed",
            trace,
            json!({ "task": task.id, "type": task.task_type(), "reason": reason }),
        );
        self.log(
            LogLevel::Warn,
            "driver.task.failed",
            trace,
            json!({ "task": task.id, "reason": reason }),
        );
        Ok(TaskReport {
            task_id: task.id.clone(),
            task_type: task.task_type(),
            status: TaskStatus::Failed,
            detail: reason.to_string(),
            follow_ups,
        })
    }

    fn event(&self, event_type: &str, trace_id: Option<&str>, payload: Value) {
        if let Err(err) = self.telemetry.event_traced(event_type, trace_id, payload) {
            warn!(event_type, error = %err, "telemetry event dropped");
        }
    }

    fn log(&self, level: LogLevel, message: &str, trace_id: Option<&str>, metadata: Value) {
        if let Err(err) = self.telemetry.log_traced(level, message, trace_id, metadata) {
            warn!(message, error = %err, "telemetry log dropped");
        }
    }
}

fn traced(syscall: Syscall, trace_id: Option<&str>) -> Action {
    match trace_id {
        Some(trace_id) => Action::traced(syscall, trace_id),
        None => Action::syscall(syscall),
    }
}
