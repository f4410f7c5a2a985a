//! Owner of the current [`WorldState`].
//!
//! Every replacement goes through [`StateStore::submit`], which serializes
//! submissions, runs the dispatcher, installs the result and announces it to
//! subscribers and telemetry.

use std::sync::Arc;

use cortex_kernel::{Action, Dispatcher, StateKey, Syscall, WorldState};
use parking_lot::Mutex;
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    blob::{BlobStore, DirBlobStore, MemoryBlobStore},
    config::RuntimeConfig,
    error::StoreError,
    telemetry::RuntimeTelemetry,
};

const DEFAULT_STATE_KEY: &str = "world_state.json";

/// Serialized access to the world state.
pub struct StateStore {
    dispatcher: Dispatcher,
    current: Mutex<Arc<WorldState>>,
    updates: watch::Sender<Arc<WorldState>>,
    blobs: Arc<dyn BlobStore>,
    state_key: String,
    telemetry: RuntimeTelemetry,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("state_key", &self.state_key)
            .field("tick", &self.current.lock().kernel.tick)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Store holding the dispatcher's initial state.
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        blobs: Arc<dyn BlobStore>,
        telemetry: RuntimeTelemetry,
    ) -> Self {
        let initial = dispatcher.initial_state();
        let (updates, _) = watch::channel(Arc::clone(&initial));
        Self {
            dispatcher,
            current: Mutex::new(initial),
            updates,
            blobs,
            state_key: DEFAULT_STATE_KEY.into(),
            telemetry,
        }
    }

    /// Store wired from configuration: a directory blob store when
    /// `store.blob_dir` is set, memory otherwise.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig, telemetry: RuntimeTelemetry) -> Self {
        let blobs: Arc<dyn BlobStore> = match &config.store.blob_dir {
            Some(dir) => Arc::new(DirBlobStore::new(dir)),
            None => Arc::new(MemoryBlobStore::new()),
        };
        Self::new(Dispatcher::new(config.kernel.clone()), blobs, telemetry)
            .with_state_key(config.store.state_key.clone())
    }

    /// Saves under `key` instead of the default.
    #[must_use]
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self
    }

    /// The dispatcher in use.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The current state.
    #[must_use]
    pub fn current(&self) -> Arc<WorldState> {
        Arc::clone(&self.current.lock())
    }

    /// Receiver notified with every installed state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<WorldState>> {
        self.updates.subscribe()
    }

    /// Dispatches `action` against the current state and installs the result.
    ///
    /// # Errors
    ///
    /// [`StoreError::Dispatch`] when the dispatcher refuses the action; the
    /// current state is left untouched.
    pub fn submit(&self, action: &Action) -> Result<Arc<WorldState>, StoreError> {
        let trace_id = match action {
            Action::Syscall(command) => command.trace_id.as_deref(),
            _ => None,
        };
        let mut current = self.current.lock();
        let previous = Arc::clone(&current);
        let next = match self.dispatcher.dispatch(&previous, action) {
            Ok(next) => next,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    "kernel.dispatch.rejected",
                    trace_id,
                    json!({ "action": action.label(), "error": err.to_string() }),
                );
                return Err(err.into());
            }
        };
        if Arc::ptr_eq(&previous, &next) {
            debug!(action = action.label(), "no-op action");
            return Ok(next);
        }
        *current = Arc::clone(&next);
        drop(current);
        self.updates.send_replace(Arc::clone(&next));
        self.announce(action, trace_id, &previous, &next);
        Ok(next)
    }

    /// Submits an untraced syscall.
    ///
    /// # Errors
    ///
    /// See [`Self::submit`].
    pub fn syscall(&self, syscall: Syscall) -> Result<Arc<WorldState>, StoreError> {
        self.submit(&Action::syscall(syscall))
    }

    /// Writes the current state to the blob store; returns the byte count.
    ///
    /// # Errors
    ///
    /// Serialization or blob-store failures.
    pub fn persist(&self) -> Result<usize, StoreError> {
        let state = self.current();
        let bytes = serde_json::to_vec_pretty(state.as_ref())?;
        self.blobs.put(&self.state_key, &bytes)?;
        self.log(
            LogLevel::Info,
            "store.persisted",
            None,
            json!({ "key": self.state_key, "bytes": bytes.len(), "tick": state.kernel.tick }),
        );
        Ok(bytes.len())
    }

    /// Loads the saved state, if any, and installs it as an `IMPORT_STATE`
    /// action. Returns whether a saved state was found.
    ///
    /// # Errors
    ///
    /// Blob-store failures or a blob that does not decode as a world state.
    pub fn restore_from_store(&self) -> Result<bool, StoreError> {
        let Some(bytes) = self.blobs.get(&self.state_key)? else {
            return Ok(false);
        };
        let state: WorldState = serde_json::from_slice(&bytes)?;
        self.submit(&Action::ImportState(Box::new(state)))?;
        Ok(true)
    }

    fn announce(
        &self,
        action: &Action,
        trace_id: Option<&str>,
        previous: &WorldState,
        next: &WorldState,
    ) {
        let keys = previous.changed_keys(next);
        let key_names: Vec<&str> = keys.iter().map(|key| key.as_str()).collect();
        self.event(
            "kernel.dispatch.applied",
            trace_id,
            json!({
                "action": action.label(),
                "keys": key_names,
                "tick": next.kernel.tick,
            }),
        );
        if !matches!(action, Action::Syscall(_)) {
            return;
        }
        if previous.tuning.version != next.tuning.version {
            self.event(
                "kernel.patch.applied",
                trace_id,
                json!({
                    "from": previous.tuning.version.to_string(),
                    "to": next.tuning.version.to_string(),
                }),
            );
        }
        if keys.contains(&StateKey::Snapshots) {
            let before = previous.snapshots.latest().map(|snapshot| snapshot.id.as_str());
            if let Some(taken) = next
                .snapshots
                .latest()
                .filter(|snapshot| Some(snapshot.id.as_str()) != before)
            {
                self.event(
                    "kernel.snapshot.taken",
                    trace_id,
                    json!({ "id": taken.id, "reason": taken.reason, "tick": taken.tick }),
                );
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_kernel::{FixedClock, KernelConfig, SequentialIds};
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder()
            .config(KernelConfig::default())
            .ids(Arc::new(SequentialIds::new()))
            .clock(Arc::new(FixedClock::default()))
            .build()
    }

    fn store_with(bus: Arc<MemoryEventBus>, blobs: Arc<dyn BlobStore>) -> StateStore {
        let telemetry = RuntimeTelemetry::builder("store")
            .event_publisher(bus)
            .build()
            .unwrap();
        StateStore::new(dispatcher(), blobs, telemetry)
    }

    #[test]
    fn no_op_keeps_the_same_state_and_stays_quiet() {
        let bus = Arc::new(MemoryEventBus::new(16));
        let store = store_with(bus.clone(), Arc::new(MemoryBlobStore::new()));
        let before = store.current();
        let after = store
            .syscall(Syscall::RemoveGoal {
                goal_id: "missing".into(),
            })
            .unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(bus.snapshot().is_empty());
    }

    #[test]
    fn applied_patch_and_snapshot_are_announced() {
        let bus = Arc::new(MemoryEventBus::new(64));
        let store = store_with(bus.clone(), Arc::new(MemoryBlobStore::new()));
        let mut updates = store.subscribe();
        for syscall in [
            Syscall::ProposePatch {
                id: Some("p1".into()),
                target: "reflection".into(),
                proposed_frequency: 8,
                justification: String::new(),
            },
            Syscall::BeginSandboxTest {
                patch_id: "p1".into(),
            },
            Syscall::ConcludeSandboxTest {
                passed: true,
                reason: "ok".into(),
            },
        ] {
            store.syscall(syscall).unwrap();
        }
        store
            .submit(&Action::traced(Syscall::ApplyPatch {}, "t-apply"))
            .unwrap();

        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().tuning.version.to_string(), "1.0.1");
        let patched = bus.of_type("kernel.patch.applied");
        assert_eq!(patched.len(), 1);
        assert_eq!(patched[0].trace_id.as_deref(), Some("t-apply"));
        assert_eq!(patched[0].payload["to"], "1.0.1");
        assert_eq!(bus.of_type("kernel.snapshot.taken").len(), 1);
        assert_eq!(bus.of_type("kernel.dispatch.applied").len(), 4);
    }

    #[test]
    fn persisted_state_restores_into_a_fresh_store() {
        let dir = tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(DirBlobStore::new(dir.path()));
        let first = StateStore::new(dispatcher(), Arc::clone(&blobs), RuntimeTelemetry::disabled("store"));
        first
            .syscall(Syscall::AddGoal {
                id: Some("g1".into()),
                parent_id: None,
                title: "remember me".into(),
            })
            .unwrap();
        assert!(first.persist().unwrap() > 0);

        let second = StateStore::new(dispatcher(), blobs, RuntimeTelemetry::disabled("store"));
        assert!(second.restore_from_store().unwrap());
        assert_eq!(*second.current(), *first.current());
    }

    #[test]
    fn restore_without_saved_state_reports_absence() {
        let store = StateStore::new(
            dispatcher(),
            Arc::new(MemoryBlobStore::new()),
            RuntimeTelemetry::disabled("store"),
        );
        assert!(!store.restore_from_store().unwrap());
    }

    #[test]
    fn strict_rejection_leaves_state_untouched() {
        let config = KernelConfig {
            strict_transitions: true,
            ..KernelConfig::default()
        };
        let store = StateStore::new(
            Dispatcher::new(config),
            Arc::new(MemoryBlobStore::new()),
            RuntimeTelemetry::disabled("store"),
        );
        let before = store.current();
        let err = store.syscall(Syscall::ApplyPatch {}).unwrap_err();
        assert!(matches!(err, StoreError::Dispatch(_)));
        assert!(Arc::ptr_eq(&before, &store.current()));
    }
}
