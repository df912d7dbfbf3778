//! Mock Tier Backend
//!
//! In-process planning tier for tests. Answers deterministically, records
//! every request it receives, and can be told to fail, stall, or hang so
//! fallback and deduplication paths can be exercised without a planning
//! server.
//!
//! # Usage
//!
//! ```ignore
//! use gateway_core::backend::mock::{MockBehavior, MockTierBackend};
//!
//! let tier_a = MockTierBackend::new("A");
//! tier_a.set_behavior(MockBehavior::Hang);
//!
//! // ... dispatch a request ...
//!
//! assert_eq!(tier_a.call_count(), 1);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use super::traits::{BackendError, PlanningBackend, TierHealth};
use crate::request::{Fingerprint, PlanningRequest, PlanningResult};

/// How the mock tier answers
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Answer with a result describing the request
    Succeed,
    /// Answer with a fixed payload
    Respond(serde_json::Value),
    /// Fail with the given error
    Fail(BackendError),
    /// Never answer
    Hang,
}

/// Captured request for test verification
#[derive(Clone, Debug)]
pub struct MockCall {
    /// Fingerprint of the request
    pub fingerprint: Fingerprint,
    /// Size metric of the request
    pub size: usize,
    /// Deadline the dispatcher passed in
    pub deadline: Duration,
}

/// Mock planning tier
///
/// Clones share call history and behavior.
#[derive(Clone)]
pub struct MockTierBackend {
    tier_id: String,
    behavior: Arc<Mutex<MockBehavior>>,
    /// Simulated processing time before answering
    latency: Arc<Mutex<Duration>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    call_count: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockTierBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTierBackend")
            .field("tier_id", &self.tier_id)
            .field("call_count", &self.call_count())
            .finish_non_exhaustive()
    }
}

impl MockTierBackend {
    /// Create a tier that succeeds immediately
    #[must_use]
    pub fn new(tier_id: impl Into<String>) -> Self {
        Self {
            tier_id: tier_id.into(),
            behavior: Arc::new(Mutex::new(MockBehavior::Succeed)),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
            calls: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set behavior (builder form)
    #[must_use]
    pub fn with_behavior(self, behavior: MockBehavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    /// Set latency (builder form)
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Change how the tier answers
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Change the simulated processing time
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of plan calls received
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every plan call received, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Largest size this tier was ever asked to plan
    #[must_use]
    pub fn max_size_seen(&self) -> Option<usize> {
        self.calls.lock().iter().map(|c| c.size).max()
    }

    /// Shared handle usable in a `BackendSet`
    #[must_use]
    pub fn shared(&self) -> Arc<dyn PlanningBackend> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl PlanningBackend for MockTierBackend {
    fn name(&self) -> &str {
        &self.tier_id
    }

    async fn health_check(&self) -> TierHealth {
        TierHealth {
            healthy: !matches!(*self.behavior.lock(), MockBehavior::Fail(_)),
            max_sites: None,
            timeout_seconds: None,
        }
    }

    async fn plan(
        &self,
        request: &PlanningRequest,
        deadline: Duration,
    ) -> Result<PlanningResult, BackendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(MockCall {
            fingerprint: request.fingerprint().clone(),
            size: request.size(),
            deadline,
        });

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        // Read after the delay so tests can flip behavior mid-call
        let behavior = self.behavior.lock().clone();
        match behavior {
            MockBehavior::Succeed => Ok(PlanningResult::new(json!({
                "tier": self.tier_id,
                "fingerprint": request.fingerprint().as_str(),
                "sites": request.size(),
            }))),
            MockBehavior::Respond(value) => Ok(PlanningResult::new(value)),
            MockBehavior::Fail(error) => Err(error),
            MockBehavior::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SiteCount;

    fn request() -> PlanningRequest {
        PlanningRequest::parse(br#"{"sites":[{"id":"a","lat":0.0,"lon":0.0}]}"#, &SiteCount)
            .unwrap()
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let backend = MockTierBackend::new("A");
        let result = backend.plan(&request(), Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.as_json()["tier"], "A");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.calls()[0].deadline, Duration::from_secs(5));
        assert_eq!(backend.max_size_seen(), Some(1));
    }

    #[tokio::test]
    async fn test_mock_failure_is_shared_across_clones() {
        let backend = MockTierBackend::new("A");
        let clone = backend.clone();
        clone.set_behavior(MockBehavior::Fail(BackendError::Connection("down".into())));

        let result = backend.plan(&request(), Duration::from_secs(1)).await;
        assert_eq!(result, Err(BackendError::Connection("down".into())));
        assert_eq!(clone.call_count(), 1);
        assert!(!backend.health_check().await.healthy);
    }
}
