//! Tier Dispatcher
//!
//! Sends one planning request through the fallback chain:
//!
//! 1. Pick the smallest enabled tier whose capacity covers the request size
//! 2. Call its backend under the tier's own deadline
//! 3. On timeout or error, move to the next strictly larger untried tier
//! 4. Stop at the first success, or report exhaustion with the last error
//!
//! A semaphore bounds how many dispatches run at once. Callers that cannot
//! get a permit within the queue timeout are rejected as overloaded rather
//! than queued indefinitely.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::config::{DispatchConfig, Tier};
use super::fallback::{AttemptOutcome, DispatchDecision};
use super::metrics::DispatchMetrics;
use super::registry::{RegistryError, TierRegistry};
use crate::backend::{BackendError, BackendSet};
use crate::request::{PlanningRequest, PlanningResult};

// ============================================================================
// Errors
// ============================================================================

/// Dispatch failures that reach the caller
#[derive(Clone, Debug, Error)]
pub enum DispatchError {
    /// No dispatch capacity became available within the queue timeout
    #[error("Gateway overloaded: no dispatch capacity after {}ms", .waited.as_millis())]
    Overloaded {
        /// How long the caller waited
        waited: Duration,
    },

    /// The only eligible tier exceeded its deadline
    #[error("Tier {tier} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// Tier that timed out
        tier: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// Every eligible tier failed, or none could take the request
    #[error("All tiers exhausted for network of size {size}{}", describe_last(.last_error))]
    AllTiersExhausted {
        /// Size metric of the request
        size: usize,
        /// Failure of the last tier attempted, if any tier was attempted
        last_error: Option<BackendError>,
    },
}

fn describe_last(last_error: &Option<BackendError>) -> String {
    match last_error {
        Some(e) => format!(": {e}"),
        None => " (no tier accepts this size)".to_string(),
    }
}

/// A successful dispatch
#[derive(Clone, Debug)]
pub struct Dispatched {
    /// Result returned by the serving tier
    pub result: PlanningResult,
    /// How the request was routed
    pub decision: DispatchDecision,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Decrements the in-flight gauge even if the dispatch future is dropped
struct InFlightGuard<'a>(&'a DispatchMetrics);

impl<'a> InFlightGuard<'a> {
    fn enter(metrics: &'a DispatchMetrics) -> Self {
        metrics.in_flight.inc();
        Self(metrics)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.dec();
    }
}

/// Capability-aware dispatcher with upward fallback
pub struct Dispatcher {
    registry: Arc<TierRegistry>,
    backends: ArcSwap<BackendSet>,
    limiter: Semaphore,
    queue_timeout: Duration,
    metrics: Arc<DispatchMetrics>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("backends", &self.backends.load())
            .field("available_permits", &self.limiter.available_permits())
            .field("queue_timeout", &self.queue_timeout)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher over a registry and its backends
    #[must_use]
    pub fn new(registry: Arc<TierRegistry>, backends: BackendSet, config: &DispatchConfig) -> Self {
        Self {
            registry,
            backends: ArcSwap::from_pointee(backends),
            limiter: Semaphore::new(config.max_concurrent.max(1)),
            queue_timeout: config.queue_timeout,
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Tier registry
    #[must_use]
    pub fn registry(&self) -> &Arc<TierRegistry> {
        &self.registry
    }

    /// Dispatch metrics
    #[must_use]
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Current backend set
    #[must_use]
    pub fn backends(&self) -> Arc<BackendSet> {
        self.backends.load_full()
    }

    /// Swap in a new tier table and its backends
    ///
    /// Dispatches already running keep the backends they started with.
    ///
    /// # Errors
    ///
    /// Returns the registry error if the tier set is invalid; nothing is
    /// swapped in that case.
    pub fn reload(&self, tiers: Vec<Tier>, backends: BackendSet) -> Result<u64, RegistryError> {
        let version = self.registry.replace(tiers)?;
        self.backends.store(Arc::new(backends));
        Ok(version)
    }

    /// Send a request through the fallback chain
    ///
    /// # Errors
    ///
    /// - `Overloaded` if no permit is available within the queue timeout
    /// - `Timeout` if the single eligible tier timed out
    /// - `AllTiersExhausted` if no tier fits or every eligible tier failed
    pub async fn dispatch(&self, request: &PlanningRequest) -> Result<Dispatched, DispatchError> {
        let size = request.size();
        let fingerprint = request.fingerprint();
        self.metrics.dispatches.inc();

        // Early check so oversize requests never queue for a permit
        if self.registry.tier_for(size).is_none() {
            self.metrics.rejected_oversize.inc();
            tracing::warn!(
                fingerprint = %fingerprint.short(),
                size,
                max_capacity = ?self.registry.snapshot().max_capacity(),
                "No tier accepts this network size"
            );
            return Err(DispatchError::AllTiersExhausted {
                size,
                last_error: None,
            });
        }

        let wait_start = Instant::now();
        let _permit = match tokio::time::timeout(self.queue_timeout, self.limiter.acquire()).await {
            Ok(Ok(permit)) => permit,
            // The limiter is never closed; treat closure like saturation
            Ok(Err(_)) | Err(_) => {
                self.metrics.overloaded.inc();
                tracing::warn!(
                    fingerprint = %fingerprint.short(),
                    waited_ms = wait_start.elapsed().as_millis() as u64,
                    "Dispatch rejected: no capacity"
                );
                return Err(DispatchError::Overloaded {
                    waited: wait_start.elapsed(),
                });
            }
        };
        let _in_flight = InFlightGuard::enter(&self.metrics);

        // The table may have changed while queued
        let Some(first) = self.registry.tier_for(size) else {
            self.metrics.rejected_oversize.inc();
            tracing::warn!(
                fingerprint = %fingerprint.short(),
                size,
                "No tier accepts this network size after queueing"
            );
            return Err(DispatchError::AllTiersExhausted {
                size,
                last_error: None,
            });
        };

        let backends = self.backends.load_full();
        let mut decision = DispatchDecision::new(&request.request_id, fingerprint.clone(), size);
        let mut current = first;
        let mut last_error: Option<BackendError> = None;

        loop {
            let started = Instant::now();
            let attempt = self.attempt(&backends, &current, request).await;
            let elapsed = started.elapsed();

            match attempt {
                Ok(result) => {
                    decision.record(&current.id, elapsed, AttemptOutcome::Success);
                    self.metrics
                        .record_attempt(&current.id, elapsed, &AttemptOutcome::Success);
                    self.metrics.completed.inc();
                    tracing::info!(
                        request_id = %request.request_id,
                        fingerprint = %fingerprint.short(),
                        tier = %current.id,
                        size,
                        elapsed_ms = elapsed.as_millis() as u64,
                        attempts = decision.attempts.len(),
                        "Planning request served"
                    );
                    return Ok(Dispatched { result, decision });
                }
                Err(error) => {
                    let outcome = AttemptOutcome::from(&error);
                    decision.record(&current.id, elapsed, outcome.clone());
                    self.metrics.record_attempt(&current.id, elapsed, &outcome);
                    tracing::warn!(
                        request_id = %request.request_id,
                        fingerprint = %fingerprint.short(),
                        tier = %current.id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %error,
                        "Tier attempt failed"
                    );
                    last_error = Some(error);
                }
            }

            // Fresh snapshot so a tier disabled mid-request is skipped
            let table = self.registry.snapshot();
            let next = table
                .next_above(current.max_sites, size, |id| decision.has_tried(id))
                .cloned();

            match next {
                Some(tier) => {
                    self.metrics.fallbacks.inc();
                    tracing::info!(
                        request_id = %request.request_id,
                        from = %current.id,
                        to = %tier.id,
                        "Falling back to larger tier"
                    );
                    current = tier;
                }
                None => break,
            }
        }

        self.metrics.exhausted.inc();
        tracing::warn!(
            request_id = %request.request_id,
            fingerprint = %fingerprint.short(),
            chain = ?decision.chain(),
            "All eligible tiers failed"
        );

        match last_error {
            Some(BackendError::Timeout { tier, timeout }) if decision.attempts.len() == 1 => {
                Err(DispatchError::Timeout { tier, timeout })
            }
            last_error => Err(DispatchError::AllTiersExhausted { size, last_error }),
        }
    }

    /// One attempt against one tier, bounded by the tier's deadline
    async fn attempt(
        &self,
        backends: &BackendSet,
        tier: &Tier,
        request: &PlanningRequest,
    ) -> Result<PlanningResult, BackendError> {
        let backend = backends
            .get(&tier.id)
            .ok_or_else(|| BackendError::Unavailable(tier.id.clone()))?;

        match tokio::time::timeout(tier.timeout, backend.plan(request, tier.timeout)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                tier: tier.id.clone(),
                timeout: tier.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBehavior, MockTierBackend};
    use crate::request::SiteCount;
    use pretty_assertions::assert_eq;

    fn request(sites: usize) -> PlanningRequest {
        let sites: Vec<_> = (0..sites)
            .map(|i| serde_json::json!({"id": format!("s{i}"), "lat": 0.0, "lon": 0.0}))
            .collect();
        let raw = serde_json::json!({ "sites": sites }).to_string();
        PlanningRequest::parse(raw.as_bytes(), &SiteCount).unwrap()
    }

    fn two_tiers() -> (Dispatcher, MockTierBackend, MockTierBackend) {
        let a = MockTierBackend::new("A");
        let b = MockTierBackend::new("B");
        let registry = Arc::new(
            TierRegistry::new(vec![
                Tier::default_fast("http://a"),
                Tier::default_high_capacity("http://b"),
            ])
            .unwrap(),
        );
        let backends = BackendSet::new().with("A", a.shared()).with("B", b.shared());
        let dispatcher = Dispatcher::new(registry, backends, &DispatchConfig::default());
        (dispatcher, a, b)
    }

    #[tokio::test]
    async fn test_small_request_goes_to_fast_tier() {
        let (dispatcher, a, b) = two_tiers();
        let dispatched = dispatcher.dispatch(&request(15)).await.unwrap();

        assert_eq!(dispatched.decision.served_by(), Some("A"));
        assert_eq!(dispatched.decision.fallback_count(), 0);
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 0);
        assert_eq!(a.calls()[0].deadline, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_large_request_skips_fast_tier() {
        let (dispatcher, a, b) = two_tiers();
        let dispatched = dispatcher.dispatch(&request(50)).await.unwrap();

        assert_eq!(dispatched.decision.served_by(), Some("B"));
        assert_eq!(a.call_count(), 0);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_larger_tier() {
        let (dispatcher, a, b) = two_tiers();
        a.set_behavior(MockBehavior::Hang);

        let dispatched = dispatcher.dispatch(&request(15)).await.unwrap();

        assert_eq!(dispatched.decision.chain(), vec!["A", "B"]);
        assert_eq!(dispatched.decision.attempts[0].outcome, AttemptOutcome::Timeout);
        assert!(dispatched.decision.attempts[0].elapsed >= Duration::from_secs(5));
        assert_eq!(b.call_count(), 1);
        assert_eq!(dispatcher.metrics().snapshot().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_oversize_request_contacts_no_tier() {
        let (dispatcher, a, b) = two_tiers();
        let err = dispatcher.dispatch(&request(1001)).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::AllTiersExhausted { size: 1001, last_error: None }
        ));
        assert_eq!(a.call_count() + b.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let (dispatcher, a, b) = two_tiers();
        a.set_behavior(MockBehavior::Fail(BackendError::Connection("refused".into())));
        b.set_behavior(MockBehavior::Fail(BackendError::Status {
            status: 500,
            body: "solver crashed".into(),
        }));

        let err = dispatcher.dispatch(&request(15)).await.unwrap_err();
        match err {
            DispatchError::AllTiersExhausted { size, last_error } => {
                assert_eq!(size, 15);
                assert_eq!(
                    last_error,
                    Some(BackendError::Status {
                        status: 500,
                        body: "solver crashed".into()
                    })
                );
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_tier_timeout_is_timeout() {
        let (dispatcher, _a, b) = two_tiers();
        b.set_behavior(MockBehavior::Hang);

        let err = dispatcher.dispatch(&request(500)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { ref tier, .. } if tier == "B"));
    }

    #[tokio::test]
    async fn test_missing_backend_counts_as_error() {
        let b = MockTierBackend::new("B");
        let registry = Arc::new(
            TierRegistry::new(vec![
                Tier::default_fast("http://a"),
                Tier::default_high_capacity("http://b"),
            ])
            .unwrap(),
        );
        let dispatcher = Dispatcher::new(
            registry,
            BackendSet::new().with("B", b.shared()),
            &DispatchConfig::default(),
        );

        let dispatched = dispatcher.dispatch(&request(3)).await.unwrap();
        assert_eq!(dispatched.decision.chain(), vec!["A", "B"]);
        assert!(matches!(
            dispatched.decision.attempts[0].outcome,
            AttemptOutcome::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_disabled_tier_is_skipped() {
        let (dispatcher, a, b) = two_tiers();
        dispatcher.registry().set_enabled("A", false).unwrap();

        let dispatched = dispatcher.dispatch(&request(5)).await.unwrap();
        assert_eq!(dispatched.decision.served_by(), Some("B"));
        assert_eq!(a.call_count(), 0);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_disabled_while_queued_is_not_contacted() {
        let a = MockTierBackend::new("A").with_latency(Duration::from_secs(1));
        let b = MockTierBackend::new("B");
        let registry = Arc::new(
            TierRegistry::new(vec![
                Tier::default_fast("http://a"),
                Tier::default_high_capacity("http://b"),
            ])
            .unwrap(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            BackendSet::new().with("A", a.shared()).with("B", b.shared()),
            &DispatchConfig {
                max_concurrent: 1,
                queue_timeout: Duration::from_secs(30),
            },
        ));

        let holder = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch(&request(1)).await })
        };
        while a.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        let queued = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch(&request(3)).await })
        };
        // Counted on entry; the task then parks on the permit
        while dispatcher.metrics().dispatches.get() < 2 {
            tokio::task::yield_now().await;
        }
        dispatcher.registry().set_enabled("A", false).unwrap();

        assert!(holder.await.unwrap().is_ok());
        let dispatched = queued.await.unwrap().unwrap();
        assert_eq!(dispatched.decision.chain(), vec!["B"]);
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_disabled_mid_fallback_is_skipped() {
        let a = MockTierBackend::new("A").with_behavior(MockBehavior::Hang);
        let b = MockTierBackend::new("B");
        let c = MockTierBackend::new("C");
        let registry = Arc::new(
            TierRegistry::new(vec![
                Tier::default_fast("http://a"),
                Tier::default_high_capacity("http://b"),
                Tier::new("C", "http://c", 5000, Duration::from_secs(900)),
            ])
            .unwrap(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            BackendSet::new()
                .with("A", a.shared())
                .with("B", b.shared())
                .with("C", c.shared()),
            &DispatchConfig::default(),
        ));

        let pending = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch(&request(5)).await })
        };
        while a.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        dispatcher.registry().set_enabled("B", false).unwrap();

        let dispatched = pending.await.unwrap().unwrap();
        assert_eq!(dispatched.decision.chain(), vec!["A", "C"]);
        assert_eq!(b.call_count(), 0);
        assert_eq!(c.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overloaded_when_no_permit() {
        let a = MockTierBackend::new("A").with_behavior(MockBehavior::Hang);
        let registry = Arc::new(TierRegistry::new(vec![Tier::default_fast("http://a")]).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            BackendSet::new().with("A", a.shared()),
            &DispatchConfig {
                max_concurrent: 1,
                queue_timeout: Duration::from_millis(100),
            },
        ));

        let holder = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch(&request(1)).await })
        };
        tokio::task::yield_now().await;
        while a.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        let err = dispatcher.dispatch(&request(2)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Overloaded { .. }));
        assert_eq!(dispatcher.metrics().snapshot().overloaded, 1);

        // The holder still finishes (as a timeout) once its deadline passes
        assert!(matches!(
            holder.await.unwrap(),
            Err(DispatchError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_reload_swaps_tiers_and_backends() {
        let (dispatcher, a, _b) = two_tiers();
        let c = MockTierBackend::new("C");

        let version = dispatcher
            .reload(
                vec![Tier::new("C", "http://c", 100, Duration::from_secs(30))],
                BackendSet::new().with("C", c.shared()),
            )
            .unwrap();
        assert_eq!(version, 1);

        let dispatched = dispatcher.dispatch(&request(15)).await.unwrap();
        assert_eq!(dispatched.decision.served_by(), Some("C"));
        assert_eq!(a.call_count(), 0);
    }
}
