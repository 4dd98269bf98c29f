//! Deterministic in-process backend.
//!
//! Produces stable synthetic identifiers per resource kind, so repeated
//! applies of the same graph converge. Failures and latency can be injected
//! per node for dry runs and tests.

use super::ProvisioningBackend;
use crate::core::types::{Attributes, ResolvedParams, ResourceKind};
use crate::resources;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct SimulatedBackend {
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    default_delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `node_id` fail with `cause`.
    pub fn with_failure(mut self, node_id: impl Into<String>, cause: impl Into<String>) -> Self {
        self.failures.insert(node_id.into(), cause.into());
        self
    }

    /// Latency applied to every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Latency for one node, overriding the default.
    pub fn with_delay_for(mut self, node_id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(node_id.into(), delay);
        self
    }

    /// Node IDs passed to `materialize`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Highest number of simultaneous `materialize` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulate"
    }

    async fn materialize(
        &self,
        node_id: &str,
        kind: ResourceKind,
        params: &ResolvedParams,
    ) -> Result<Attributes, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(node_id.to_string());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(node_id).copied().or(self.default_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.failures.get(node_id) {
            Some(cause) => Err(cause.clone()),
            None => resources::simulated_attributes(node_id, kind, params),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        tracing::debug!(node = node_id, %kind, ok = result.is_ok(), "simulated materialize");
        result
    }
}
