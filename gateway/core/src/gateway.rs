//! Gateway Service
//!
//! Entry point for planning requests:
//!
//! ```text
//! raw bytes ──► parse + canonicalize ──► fingerprint
//!                                            │
//!                         cache hit ◄────────┤
//!                                            ▼
//!                                         reserve
//!                                   ┌────────┴────────┐
//!                              InFlight            Acquired
//!                                   │                 │
//!                            await winner     dispatch ──► store ──► publish
//! ```
//!
//! The computation for an acquired reservation runs on its own task, so a
//! caller that disconnects mid-request does not cancel work other callers
//! are waiting on.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::backend::{BackendSet, TierHealth};
use crate::cache::{FingerprintCache, Reservation, StoreOutcome, Ticket, DEFAULT_TTL};
use crate::config::{GatewayConfig, DEFAULT_MAX_REQUEST_BYTES};
use crate::error::GatewayError;
use crate::request::{Fingerprint, PlanningRequest, PlanningResult, SiteCount, SizeMetric};
use crate::routing::{
    DispatchDecision, Dispatched, Dispatcher, RegistryError, TierRegistry, TierSummary,
};

/// Where a result came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// Served from the cache without contacting a tier
    Cache,
    /// Computed by a tier for this caller
    Computed,
    /// Computed by a tier for a concurrent caller with the same fingerprint
    Joined,
}

impl ResultSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Computed => "computed",
            Self::Joined => "joined",
        }
    }
}

/// A successfully handled request
#[derive(Clone, Debug)]
pub struct PlanOutcome {
    pub result: PlanningResult,
    pub fingerprint: Fingerprint,
    pub source: ResultSource,
    /// Routing record, present only when this caller computed the result
    pub decision: Option<DispatchDecision>,
}

/// A tier together with its latest health probe
#[derive(Clone, Debug, Serialize)]
pub struct TierStatus {
    #[serde(flatten)]
    pub tier: TierSummary,
    pub health: TierHealth,
}

/// Planning gateway: cache, deduplication and dispatch
pub struct GatewayService {
    dispatcher: Arc<Dispatcher>,
    cache: Arc<FingerprintCache>,
    size_metric: Arc<dyn SizeMetric>,
    ttl: Duration,
    max_request_bytes: usize,
}

impl std::fmt::Debug for GatewayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayService")
            .field("dispatcher", &self.dispatcher)
            .field("cache", &self.cache)
            .field("ttl", &self.ttl)
            .field("max_request_bytes", &self.max_request_bytes)
            .finish_non_exhaustive()
    }
}

impl GatewayService {
    /// Create a service with default TTL, size limit and site-count metric
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, cache: Arc<FingerprintCache>) -> Self {
        Self {
            dispatcher,
            cache,
            size_metric: Arc::new(SiteCount),
            ttl: DEFAULT_TTL,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }

    /// Build the full stack from configuration
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the configured tiers are invalid.
    pub fn from_config(config: &GatewayConfig, backends: BackendSet) -> Result<Self, RegistryError> {
        let registry = Arc::new(TierRegistry::new(config.tiers.clone())?);
        let dispatcher = Arc::new(Dispatcher::new(registry, backends, &config.dispatch));
        let cache = Arc::new(FingerprintCache::new(config.cache.max_entries));

        Ok(Self::new(dispatcher, cache)
            .with_ttl(config.cache.ttl)
            .with_max_request_bytes(config.server.max_request_bytes))
    }

    /// Use a different size metric for tier selection
    #[must_use]
    pub fn with_size_metric(mut self, metric: Arc<dyn SizeMetric>) -> Self {
        self.size_metric = metric;
        self
    }

    /// Set the TTL for stored results
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the maximum accepted request size
    #[must_use]
    pub fn with_max_request_bytes(mut self, bytes: usize) -> Self {
        self.max_request_bytes = bytes;
        self
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    /// Every configured tier, in capacity order
    #[must_use]
    pub fn tier_summaries(&self) -> Vec<TierSummary> {
        self.dispatcher
            .registry()
            .snapshot()
            .all()
            .iter()
            .map(TierSummary::from)
            .collect()
    }

    /// Probe every configured tier concurrently
    ///
    /// A tier without a registered backend reports unhealthy.
    pub async fn probe_tiers(&self) -> Vec<TierStatus> {
        let backends = self.dispatcher.backends();
        let mut probes = JoinSet::new();
        for tier in self.tier_summaries() {
            let backend = backends.get(&tier.id);
            probes.spawn(async move {
                let health = match backend {
                    Some(backend) => backend.health_check().await,
                    None => TierHealth::default(),
                };
                TierStatus { tier, health }
            });
        }

        let mut statuses = Vec::with_capacity(probes.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(status) => statuses.push(status),
                Err(e) => tracing::warn!(error = %e, "Tier health probe failed"),
            }
        }
        statuses.sort_by(|a, b| {
            a.tier
                .max_sites
                .cmp(&b.tier.max_sites)
                .then_with(|| a.tier.id.cmp(&b.tier.id))
        });
        statuses
    }

    /// Parse raw bytes and handle the request
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the body is too large or malformed
    /// - the dispatch error if no tier produced a result
    pub async fn handle(&self, raw: &[u8]) -> Result<PlanOutcome, GatewayError> {
        if raw.len() > self.max_request_bytes {
            return Err(GatewayError::InvalidRequest(format!(
                "request of {} bytes exceeds the {} byte limit",
                raw.len(),
                self.max_request_bytes
            )));
        }
        let request = PlanningRequest::parse(raw, self.size_metric.as_ref())?;
        self.handle_request(request).await
    }

    /// Handle an already-parsed request
    ///
    /// # Errors
    ///
    /// Returns the dispatch error if no tier produced a result, or the error
    /// published by the concurrent caller this request joined.
    pub async fn handle_request(
        &self,
        request: PlanningRequest,
    ) -> Result<PlanOutcome, GatewayError> {
        let fingerprint = request.fingerprint().clone();

        if let Some(result) = self.cache.lookup(&fingerprint) {
            return Ok(PlanOutcome {
                result,
                fingerprint,
                source: ResultSource::Cache,
                decision: None,
            });
        }

        match self.cache.reserve(&fingerprint) {
            Reservation::InFlight(waiter) => {
                tracing::debug!(
                    request_id = %request.request_id,
                    fingerprint = %fingerprint.short(),
                    "Joining in-flight computation"
                );
                let result = waiter.wait().await?;
                Ok(PlanOutcome {
                    result,
                    fingerprint,
                    source: ResultSource::Joined,
                    decision: None,
                })
            }
            Reservation::Acquired(ticket) => {
                // A computation may have finished between lookup and reserve
                if let Some(result) = self.cache.lookup(&fingerprint) {
                    ticket.complete(Ok(result.clone()));
                    return Ok(PlanOutcome {
                        result,
                        fingerprint,
                        source: ResultSource::Cache,
                        decision: None,
                    });
                }

                let task = tokio::spawn(compute(
                    Arc::clone(&self.dispatcher),
                    Arc::clone(&self.cache),
                    self.ttl,
                    request,
                    ticket,
                ));
                let (result, decision) = task
                    .await
                    .map_err(|e| GatewayError::Internal(format!("dispatch task failed: {e}")))??;

                Ok(PlanOutcome {
                    result,
                    fingerprint,
                    source: ResultSource::Computed,
                    decision: Some(decision),
                })
            }
        }
    }
}

/// Dispatch, store and publish for one reservation
async fn compute(
    dispatcher: Arc<Dispatcher>,
    cache: Arc<FingerprintCache>,
    ttl: Duration,
    request: PlanningRequest,
    ticket: Ticket,
) -> Result<(PlanningResult, DispatchDecision), GatewayError> {
    match dispatcher.dispatch(&request).await {
        Ok(Dispatched { result, decision }) => {
            let fingerprint = request.fingerprint().clone();
            let result = match cache.store(fingerprint, result.clone(), ttl) {
                StoreOutcome::Conflict { existing } => existing,
                StoreOutcome::Inserted | StoreOutcome::Unchanged => result,
            };
            ticket.complete(Ok(result.clone()));
            Ok((result, decision))
        }
        Err(e) => {
            let error = GatewayError::from(e);
            ticket.complete(Err(error.clone()));
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBehavior, MockTierBackend};
    use crate::backend::BackendError;
    use crate::error::ErrorKind;
    use crate::request::NetworkDescription;
    use crate::routing::{DispatchConfig, Tier};
    use pretty_assertions::assert_eq;

    fn service(backend: &MockTierBackend) -> GatewayService {
        let registry = Arc::new(TierRegistry::new(vec![Tier::default_fast("http://a")]).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            BackendSet::new().with("A", backend.shared()),
            &DispatchConfig::default(),
        ));
        GatewayService::new(dispatcher, Arc::new(FingerprintCache::new(100)))
    }

    const BODY: &[u8] = br#"{"sites":[{"id":"co","lat":48.1,"lon":11.5}]}"#;

    #[tokio::test]
    async fn test_second_request_served_from_cache() {
        let backend = MockTierBackend::new("A");
        let gateway = service(&backend);

        let first = gateway.handle(BODY).await.unwrap();
        assert_eq!(first.source, ResultSource::Computed);
        assert_eq!(first.decision.as_ref().and_then(|d| d.served_by()), Some("A"));

        let second = gateway.handle(BODY).await.unwrap();
        assert_eq!(second.source, ResultSource::Cache);
        assert_eq!(second.result, first.result);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_oversize_body_rejected_before_parse() {
        let backend = MockTierBackend::new("A");
        let gateway = service(&backend).with_max_request_bytes(8);

        let err = gateway.handle(BODY).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_never_dispatched() {
        let backend = MockTierBackend::new("A");
        let gateway = service(&backend);

        let err = gateway.handle(b"{\"sites\": 3}").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(backend.call_count(), 0);
        assert_eq!(gateway.cache().stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let backend = MockTierBackend::new("A")
            .with_behavior(MockBehavior::Fail(BackendError::Connection("refused".into())));
        let gateway = service(&backend);

        let err = gateway.handle(BODY).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllTiersExhausted);
        assert!(gateway.cache().is_empty());
        assert_eq!(gateway.cache().stats().in_flight, 0);

        backend.set_behavior(MockBehavior::Succeed);
        let outcome = gateway.handle(BODY).await.unwrap();
        assert_eq!(outcome.source, ResultSource::Computed);
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_custom_size_metric_drives_routing() {
        let backend = MockTierBackend::new("A");
        // Every network counts as too large for tier A
        let gateway = service(&backend).with_size_metric(Arc::new(|_: &NetworkDescription| 21usize));

        let err = gateway.handle(BODY).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllTiersExhausted);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_probe_tiers() {
        let backend = MockTierBackend::new("A");
        let config = GatewayConfig::default();
        let gateway =
            GatewayService::from_config(&config, BackendSet::new().with("A", backend.shared()))
                .unwrap();

        let statuses = gateway.probe_tiers().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].tier.id, "A");
        assert!(statuses[0].health.healthy);
        // No backend registered for B
        assert!(!statuses[1].health.healthy);
    }

    #[test]
    fn test_from_config() {
        let config = GatewayConfig::default();
        let gateway = GatewayService::from_config(&config, BackendSet::new()).unwrap();

        assert_eq!(gateway.ttl(), config.cache.ttl);
        let tiers = gateway.tier_summaries();
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0].id, "A");
        assert_eq!(tiers[1].max_sites, 1000);
    }
}
