//! Bounded activity log: operator input, log lines and task outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    bounded::BoundedLog,
    command::{Command, Syscall},
    error::ReducerError,
    patch::StatePatch,
    registry::{ReduceContext, Reducer},
    state::{StateKey, WorldState},
};

/// Severity or kind of an activity entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Something needs attention.
    Warn,
    /// Something failed.
    Error,
    /// External input received.
    Input,
}

/// One activity log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Entry id.
    pub id: String,
    /// When it was written.
    pub timestamp: DateTime<Utc>,
    /// Kernel tick at the time.
    pub tick: u64,
    /// Entry level.
    pub level: ActivityLevel,
    /// Producing component.
    pub source: String,
    /// Text.
    pub message: String,
    /// Correlation id of the command that produced it.
    pub trace_id: Option<String>,
}

/// Activity sub-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Bounded log, oldest first.
    pub entries: BoundedLog<LogEntry>,
}

impl ActivityRecord {
    /// Empty log holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BoundedLog::new(capacity),
        }
    }
}

/// Owns the `activity` sub-record.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActivityReducer;

impl Reducer for ActivityReducer {
    fn name(&self) -> &'static str {
        "activity"
    }

    fn domain(&self) -> &'static [StateKey] {
        &[StateKey::Activity]
    }

    fn reduce(
        &self,
        ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError> {
        let line = match &command.syscall {
            Syscall::AddLog {
                level,
                source,
                message,
            } if !message.trim().is_empty() => {
                let source = if source.trim().is_empty() { "kernel" } else { source.as_str() };
                (*level, source.to_string(), message.clone())
            }
            Syscall::ReceiveInput { text } if !text.trim().is_empty() => {
                (ActivityLevel::Input, "input".into(), text.clone())
            }
            Syscall::ClearLogs {} if !state.activity.entries.is_empty() => {
                let cleared = ActivityRecord {
                    entries: state.activity.entries.emptied(),
                };
                return Ok(StatePatch::default().activity(cleared));
            }
            Syscall::CompleteTask { task_id, summary } => match &state.kernel.running {
                Some(task) if &task.id == task_id => {
                    let outcome = summary.as_deref().unwrap_or("done");
                    (
                        ActivityLevel::Info,
                        "scheduler".into(),
                        format!("{} {task_id} completed: {outcome}", task.task_type()),
                    )
                }
                _ => return Ok(StatePatch::default()),
            },
            Syscall::FailTask { task_id, reason } => match &state.kernel.running {
                Some(task) if &task.id == task_id => (
                    ActivityLevel::Warn,
                    "scheduler".into(),
                    format!("{} {task_id} failed: {reason}", task.task_type()),
                ),
                _ => return Ok(StatePatch::default()),
            },
            _ => return Ok(StatePatch::default()),
        };
        let (level, source, message) = line;
        let entry = LogEntry {
            id: ctx.derive_id("log"),
            timestamp: ctx.now,
            tick: state.kernel.tick,
            level,
            source,
            message,
            trace_id: command.trace_id.clone(),
        };
        Ok(StatePatch::default().activity(ActivityRecord {
            entries: state.activity.entries.with(entry),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::KernelConfig, test_support::Harness};

    fn log(message: &str) -> Syscall {
        Syscall::AddLog {
            level: ActivityLevel::Info,
            source: String::new(),
            message: message.into(),
        }
    }

    #[test]
    fn appends_with_default_source() {
        let mut harness = Harness::new(ActivityReducer);
        harness.apply_command(Command::new(log("booted")).traced("t-1"));
        let entry = harness.state.activity.entries.latest().unwrap();
        assert_eq!(entry.source, "kernel");
        assert_eq!(entry.trace_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn log_is_bounded() {
        let config = KernelConfig {
            activity_log_capacity: 2,
            ..KernelConfig::default()
        };
        let mut harness = Harness::with_config(ActivityReducer, config);
        for message in ["a", "b", "c"] {
            harness.apply(log(message));
        }
        let messages: Vec<_> = harness
            .state
            .activity
            .entries
            .iter()
            .map(|entry| entry.message.as_str())
            .collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn blank_message_and_empty_clear_are_noops() {
        let mut harness = Harness::new(ActivityReducer);
        let before = harness.state.clone();
        harness.apply(log("   "));
        harness.apply(Syscall::ClearLogs {});
        assert!(std::sync::Arc::ptr_eq(&before.activity, &harness.state.activity));
    }

    #[test]
    fn input_is_logged_as_input() {
        let mut harness = Harness::new(ActivityReducer);
        harness.apply(Syscall::ReceiveInput {
            text: "hi there".into(),
        });
        let entry = harness.state.activity.entries.latest().unwrap();
        assert_eq!(entry.level, ActivityLevel::Input);
        harness.apply(Syscall::ClearLogs {});
        assert!(harness.state.activity.entries.is_empty());
    }
}
