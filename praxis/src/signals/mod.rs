//! The signal bus: telemetry, incidents, and traces for the adaptation
//! observer.
//!
//! Pipeline components emit [`Signal`]s through a cloneable
//! [`SignalEmitter`]; a listener task drains the flume channel and fans
//! each signal out to the registered sinks. Two sinks ship with the
//! engine: a tracing sink (structured log lines) and a bounded
//! [`WindowBuffer`] the adaptation controller reads its observation
//! windows from.
//!
//! ```text
//! pipeline ──emit()──► SignalBus ──┬─► TracingSink
//!                                  └─► WindowBuffer ──► adaptation
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

// ============================================================================
// Signals
// ============================================================================

/// What a signal reports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalBody {
    /// A numeric metric sample.
    Telemetry {
        /// Metric name.
        metric: String,
        /// Sampled value.
        value: f64,
    },
    /// Something went wrong badly enough to note.
    Incident {
        /// What happened.
        description: String,
    },
    /// A trace breadcrumb from a component.
    Trace {
        /// Component name.
        component: String,
        /// Breadcrumb text.
        message: String,
    },
    /// LLM resource accounting for one call group.
    ResourceUsage {
        /// Prompt tokens.
        tokens_in: u64,
        /// Completion tokens.
        tokens_out: u64,
        /// Cost estimate in USD.
        cost_estimate_usd: f64,
    },
    /// The guardrail stack failed an action.
    GuardrailFailure {
        /// Failing check name.
        check: String,
        /// Failure reason.
        reason: String,
    },
    /// A decision was escalated to a Wise Authority.
    Deferral {
        /// Deferral reason.
        reason: String,
    },
}

/// One emitted signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// When the signal was emitted.
    pub when: DateTime<Utc>,
    /// Component that emitted it.
    pub source: String,
    /// The payload.
    pub body: SignalBody,
}

impl Signal {
    /// Build a signal stamped now.
    #[must_use]
    pub fn now(source: &str, body: SignalBody) -> Self {
        Self {
            when: Utc::now(),
            source: source.to_string(),
            body,
        }
    }
}

// ============================================================================
// Emitter
// ============================================================================

/// Errors from signal emission.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The bus listener is gone.
    #[error("signal bus closed")]
    Closed,
}

/// Cloneable handle pipeline components emit through.
#[derive(Clone, Debug)]
pub struct SignalEmitter {
    tx: flume::Sender<Signal>,
}

impl SignalEmitter {
    /// Emit one signal, non-blocking.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Closed`] when the bus has shut down.
    pub fn emit(&self, signal: Signal) -> Result<(), SignalError> {
        self.tx.send(signal).map_err(|_| SignalError::Closed)
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// An output target for signals.
pub trait SignalSink: Send + Sync {
    /// Consume one signal.
    fn accept(&self, signal: &Signal);
}

/// Sink that renders signals as structured tracing events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl SignalSink for TracingSink {
    fn accept(&self, signal: &Signal) {
        match &signal.body {
            SignalBody::Telemetry { metric, value } => {
                tracing::debug!(source = %signal.source, metric = %metric, value, "telemetry");
            }
            SignalBody::Incident { description } => {
                tracing::warn!(source = %signal.source, %description, "incident");
            }
            SignalBody::Trace { component, message } => {
                tracing::trace!(source = %signal.source, component = %component, %message, "trace");
            }
            SignalBody::ResourceUsage {
                tokens_in,
                tokens_out,
                cost_estimate_usd,
            } => {
                tracing::debug!(
                    source = %signal.source,
                    tokens_in,
                    tokens_out,
                    cost_estimate_usd,
                    "resource usage"
                );
            }
            SignalBody::GuardrailFailure { check, reason } => {
                tracing::warn!(source = %signal.source, check = %check, reason = %reason, "guardrail failure");
            }
            SignalBody::Deferral { reason } => {
                tracing::info!(source = %signal.source, reason = %reason, "deferral");
            }
        }
    }
}

/// Bounded in-memory buffer of recent signals; the adaptation observer
/// snapshots and drains it per cycle.
#[derive(Debug)]
pub struct WindowBuffer {
    capacity: usize,
    signals: Mutex<VecDeque<Signal>>,
}

impl WindowBuffer {
    /// Build a buffer retaining at most `capacity` signals.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            signals: Mutex::new(VecDeque::new()),
        })
    }

    /// Copy of the buffered signals, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Signal> {
        self.signals
            .lock()
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Take the buffered signals, leaving the buffer empty.
    #[must_use]
    pub fn drain(&self) -> Vec<Signal> {
        self.signals
            .lock()
            .map(|mut buffer| buffer.drain(..).collect())
            .unwrap_or_default()
    }

    fn push(&self, signal: Signal) {
        if let Ok(mut buffer) = self.signals.lock() {
            if buffer.len() == self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(signal);
        }
    }
}

impl SignalSink for Arc<WindowBuffer> {
    fn accept(&self, signal: &Signal) {
        self.push(signal.clone());
    }
}

// ============================================================================
// Bus
// ============================================================================

/// The flume-backed bus connecting emitters to sinks.
pub struct SignalBus {
    tx: flume::Sender<Signal>,
    rx: flume::Receiver<Signal>,
    sinks: Vec<Box<dyn SignalSink>>,
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl SignalBus {
    /// Bus with the given sinks.
    #[must_use]
    pub fn with_sinks(sinks: Vec<Box<dyn SignalSink>>) -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx, sinks }
    }

    /// A cloneable emitter handle.
    #[must_use]
    pub fn emitter(&self) -> SignalEmitter {
        SignalEmitter {
            tx: self.tx.clone(),
        }
    }

    /// Start the listener task. It exits when every emitter (including the
    /// bus's own handle) has been dropped.
    #[must_use]
    pub fn listen(self) -> JoinHandle<()> {
        let SignalBus { tx, rx, sinks } = self;
        drop(tx);
        tokio::spawn(async move {
            while let Ok(signal) = rx.recv_async().await {
                for sink in &sinks {
                    sink.accept(&signal);
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signals_reach_the_window_buffer() {
        let buffer = WindowBuffer::new(8);
        let bus = SignalBus::with_sinks(vec![Box::new(Arc::clone(&buffer))]);
        let emitter = bus.emitter();
        let listener = bus.listen();

        emitter
            .emit(Signal::now(
                "pipeline",
                SignalBody::Deferral {
                    reason: "ponder cap".into(),
                },
            ))
            .unwrap();
        drop(emitter);
        listener.await.unwrap();

        let seen = buffer.snapshot();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0].body, SignalBody::Deferral { .. }));
    }

    #[tokio::test]
    async fn window_buffer_is_bounded() {
        let buffer = WindowBuffer::new(2);
        let bus = SignalBus::with_sinks(vec![Box::new(Arc::clone(&buffer))]);
        let emitter = bus.emitter();
        let listener = bus.listen();

        for index in 0..5u64 {
            emitter
                .emit(Signal::now(
                    "test",
                    SignalBody::Telemetry {
                        metric: "round".into(),
                        value: index as f64,
                    },
                ))
                .unwrap();
        }
        drop(emitter);
        listener.await.unwrap();

        let seen = buffer.drain();
        assert_eq!(seen.len(), 2);
        // Oldest entries were evicted.
        assert!(matches!(
            &seen[0].body,
            SignalBody::Telemetry { value, .. } if (*value - 3.0).abs() < f64::EPSILON
        ));
        assert!(buffer.snapshot().is_empty());
    }
}
