use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord, FileEventPublisher};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use tokio::{
    runtime::{Builder, Handle},
    task::JoinHandle,
};

use crate::config::TelemetryConfig;

/// Builder for runtime telemetry sinks.
pub struct RuntimeTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    log_sink: Option<Arc<dyn LogSink>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl RuntimeTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            log_sink: None,
            event_publisher: None,
        }
    }

    /// Writes JSON-lines logs to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sends logs to an existing sink instead of a file.
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<RuntimeTelemetry> {
        let logger: Option<Arc<dyn LogSink>> = match (self.log_sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?)),
            (None, None) => None,
        };
        Ok(RuntimeTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
                pending: Mutex::new(Vec::new()),
            }),
        })
    }
}

/// Telemetry handle shared by the store and the driver.
#[derive(Clone)]
pub struct RuntimeTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for RuntimeTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeTelemetry")
            .field("module", &self.inner.module)
            .field("logs", &self.inner.logger.is_some())
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<Arc<dyn LogSink>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl RuntimeTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> RuntimeTelemetryBuilder {
        RuntimeTelemetryBuilder::new(module)
    }

    /// Handle that discards everything.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
                publisher: None,
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Handle writing to the files named in `config`.
    pub fn from_config(module: impl Into<String>, config: &TelemetryConfig) -> Result<Self> {
        let mut builder = Self::builder(module);
        if let Some(path) = &config.log_path {
            builder = builder.log_path(path);
        }
        if let Some(path) = &config.event_log_path {
            builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
        }
        builder.build()
    }

    /// Waits for every event published from inside a runtime so far.
    pub async fn flush(&self) {
        let pending = std::mem::take(&mut *self.inner.pending.lock());
        for handle in pending {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "telemetry publish task aborted");
            }
        }
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        self.log_traced(level, message, None, metadata)
    }

    /// Logs structured metadata tagged with a correlation id.
    pub fn log_traced(
        &self,
        level: LogLevel,
        message: &str,
        trace_id: Option<&str>,
        metadata: Value,
    ) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message)
                .with_trace(trace_id)
                .with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event on the bus.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        self.event_traced(event_type, None, payload)
    }

    /// Emits an event tagged with a correlation id.
    ///
    /// Inside a tokio runtime the publish is spawned (see [`Self::flush`]);
    /// elsewhere it runs to completion on a throwaway current-thread runtime.
    pub fn event_traced(
        &self,
        event_type: &str,
        trace_id: Option<&str>,
        payload: Value,
    ) -> Result<()> {
        let Some(publisher) = &self.inner.publisher else {
            return Ok(());
        };
        let record = EventRecord::new(&self.inner.module, event_type, payload)
            .with_trace(trace_id.map(str::to_string));
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(publisher);
            let task = handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    tracing::warn!(error = %err, "telemetry event publish failed");
                }
            });
            let mut pending = self.inner.pending.lock();
            pending.retain(|task| !task.is_finished());
            pending.push(task);
            Ok(())
        } else {
            Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(publisher.publish(record))
        }
    }
}
