//! Per-query execution context.
//!
//! One `Context` is created per query and shared by every operator of its
//! tree. It carries:
//! - the query-wide stop signal (and what raised it)
//! - the recovery boundary that turns operator panics into errors
//! - phase accounting (time, item counts, operator counts)
//! - scan consistency and the scan vector source
//! - the error sink

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::signal::Signal;
use crate::config::{ExecConfig, DEFAULT_PIPELINE_CAP};
use crate::datastore::{
    IndexerRegistry, NoScanVectors, ScanConsistency, ScanVector, ScanVectorSource,
};
use crate::error::ExecError;

/// Why a query stopped before its operators ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    Cancelled,
    DeadlineExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Completed,
    Errors,
    Cancelled,
    Timeout,
}

/// Accounting snapshot of one request, taken at query end.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub request_id: String,
    pub state: RequestState,
    pub started_at: DateTime<Utc>,
    pub elapsed_us: u64,
    pub scan_consistency: ScanConsistency,
    pub phase_times_us: BTreeMap<String, u64>,
    pub phase_counts: BTreeMap<String, u64>,
    pub phase_operators: BTreeMap<String, u64>,
    pub error_count: usize,
    pub errors: Vec<ExecError>,
}

pub struct Context {
    request_id: String,
    started_at: DateTime<Utc>,
    start: Instant,
    stop: Signal,
    stop_cause: OnceLock<StopCause>,
    consistency: ScanConsistency,
    vectors: Arc<dyn ScanVectorSource>,
    registry: Arc<IndexerRegistry>,
    pipeline_cap: usize,
    phase_times: DashMap<String, Duration>,
    phase_counts: DashMap<String, u64>,
    phase_operators: DashMap<String, u64>,
    errors: Mutex<Vec<ExecError>>,
    deadline: Mutex<Option<JoinHandle<()>>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            start: Instant::now(),
            stop: Signal::new(),
            stop_cause: OnceLock::new(),
            consistency: ScanConsistency::NotBounded,
            vectors: Arc::new(NoScanVectors),
            registry: Arc::new(IndexerRegistry::empty()),
            pipeline_cap: DEFAULT_PIPELINE_CAP,
            phase_times: DashMap::new(),
            phase_counts: DashMap::new(),
            phase_operators: DashMap::new(),
            errors: Mutex::new(Vec::new()),
            deadline: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ExecConfig, registry: Arc<IndexerRegistry>) -> Self {
        Self::new()
            .with_consistency(config.scan_consistency)
            .with_pipeline_cap(config.pipeline_cap)
            .with_registry(registry)
    }

    pub fn with_consistency(mut self, consistency: ScanConsistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_scan_vectors(mut self, vectors: Arc<dyn ScanVectorSource>) -> Self {
        self.vectors = vectors;
        self
    }

    pub fn with_registry(mut self, registry: Arc<IndexerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_pipeline_cap(mut self, cap: usize) -> Self {
        self.pipeline_cap = cap.max(1);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn consistency(&self) -> ScanConsistency {
        self.consistency
    }

    pub fn scan_vector(&self, namespace: &str, keyspace: &str) -> Option<Arc<ScanVector>> {
        self.vectors.scan_vector(namespace, keyspace)
    }

    pub fn registry(&self) -> &Arc<IndexerRegistry> {
        &self.registry
    }

    pub fn pipeline_cap(&self) -> usize {
        self.pipeline_cap
    }

    /// Stops the whole query. Idempotent.
    pub fn stop(&self) {
        self.stop_with(StopCause::Cancelled);
    }

    /// Stops the whole query, recording `cause` if nothing stopped it before.
    pub fn stop_with(&self, cause: StopCause) {
        let _ = self.stop_cause.set(cause);
        if self.stop.raise() {
            tracing::debug!("Request {}: stopped ({:?})", self.request_id, cause);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_raised()
    }

    pub async fn stopped(&self) {
        self.stop.raised().await
    }

    pub fn stop_cause(&self) -> Option<StopCause> {
        self.stop_cause.get().copied()
    }

    pub(crate) fn stop_signal(&self) -> Signal {
        self.stop.clone()
    }

    /// Raises the stop signal with `DeadlineExceeded` once `timeout` elapses.
    /// Must be called from within a tokio runtime.
    pub fn arm_deadline(self: &Arc<Self>, timeout: Duration) {
        let ctx: Weak<Context> = Arc::downgrade(self);
        let stop = self.stop.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if let Some(ctx) = ctx.upgrade() {
                        tracing::warn!(
                            "Request {}: deadline of {:?} exceeded",
                            ctx.request_id,
                            timeout
                        );
                        ctx.stop_with(StopCause::DeadlineExceeded);
                    }
                }
                _ = stop.raised() => {}
            }
        });
        if let Some(previous) = self.deadline.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn add_phase_time(&self, phase: &str, t: Duration) {
        let mut total = self.phase_times.entry(phase.to_string()).or_default();
        *total = total.saturating_add(t);
    }

    pub fn phase_time(&self, phase: &str) -> Duration {
        self.phase_times
            .get(phase)
            .map(|t| *t)
            .unwrap_or_default()
    }

    pub fn add_phase_count(&self, phase: &str, count: u64) {
        *self.phase_counts.entry(phase.to_string()).or_default() += count;
    }

    pub fn phase_count(&self, phase: &str) -> u64 {
        self.phase_counts.get(phase).map(|c| *c).unwrap_or(0)
    }

    pub fn add_phase_operator(&self, phase: &str) {
        *self.phase_operators.entry(phase.to_string()).or_default() += 1;
    }

    pub fn phase_operators(&self, phase: &str) -> u64 {
        self.phase_operators.get(phase).map(|c| *c).unwrap_or(0)
    }

    /// Records an error. Safe to call from any number of tasks at once.
    pub fn error(&self, err: ExecError) {
        tracing::debug!("Request {}: {}", self.request_id, err);
        self.errors.lock().push(err);
    }

    pub fn errors(&self) -> Vec<ExecError> {
        self.errors.lock().clone()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    /// Converts a panic caught at an operator boundary into a recorded error.
    pub fn recover(&self, operator: &str, payload: Box<dyn Any + Send>) {
        let msg = panic_message(payload.as_ref());
        tracing::error!(
            "Request {}: recovered from panic in {}: {}",
            self.request_id,
            operator,
            msg
        );
        self.error(ExecError::Internal(format!("panic in {}: {}", operator, msg)));
    }

    pub fn summary(&self) -> RequestSummary {
        let errors = self.errors();
        let state = match self.stop_cause() {
            Some(StopCause::DeadlineExceeded) => RequestState::Timeout,
            Some(StopCause::Cancelled) => RequestState::Cancelled,
            None if !errors.is_empty() => RequestState::Errors,
            None => RequestState::Completed,
        };
        RequestSummary {
            request_id: self.request_id.clone(),
            state,
            started_at: self.started_at,
            elapsed_us: micros(self.start.elapsed()),
            scan_consistency: self.consistency,
            phase_times_us: self
                .phase_times
                .iter()
                .map(|e| (e.key().clone(), micros(*e.value())))
                .collect(),
            phase_counts: self
                .phase_counts
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            phase_operators: self
                .phase_operators
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            error_count: errors.len(),
            errors,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some(handle) = self.deadline.get_mut().take() {
            handle.abort();
        }
    }
}

fn micros(t: Duration) -> u64 {
    u64::try_from(t.as_micros()).unwrap_or(u64::MAX)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
