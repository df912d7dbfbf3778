//! HTTP Tier Backend
//!
//! Planning server reached over HTTP.
//!
//! # Planning Server API
//!
//! - `POST /v1/plan/sync` - plan a network, blocking until the result is ready
//! - `GET /health` - liveness plus advertised capabilities
//!
//! The request body is the canonical network description; a 2xx JSON body is
//! the planning result.

use std::time::Duration;

use async_trait::async_trait;

use super::traits::{BackendError, BackendSet, PlanningBackend, TierHealth};
use crate::request::{PlanningRequest, PlanningResult};
use crate::routing::Tier;

/// Connect timeout applied to every tier
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Health probe timeout
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Error bodies are truncated to this many bytes
const MAX_ERROR_BODY: usize = 512;

/// HTTP planning tier client
#[derive(Clone, Debug)]
pub struct HttpTierBackend {
    /// Tier identifier
    tier_id: String,
    /// Base URL (no trailing slash)
    base_url: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpTierBackend {
    /// Create a new HTTP backend for a tier
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Connection` if the HTTP client cannot be built.
    pub fn new(tier_id: impl Into<String>, base_url: impl Into<String>) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            tier_id: tier_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Create from a tier definition
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Connection` if the HTTP client cannot be built.
    pub fn from_tier(tier: &Tier) -> Result<Self, BackendError> {
        Self::new(tier.id.clone(), tier.endpoint.clone())
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get plan endpoint URL
    fn plan_url(&self) -> String {
        format!("{}/v1/plan/sync", self.base_url)
    }

    /// Get health endpoint URL
    fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    fn map_transport_error(&self, error: &reqwest::Error, deadline: Duration) -> BackendError {
        if error.is_timeout() {
            BackendError::Timeout {
                tier: self.tier_id.clone(),
                timeout: deadline,
            }
        } else {
            BackendError::Connection(error.to_string())
        }
    }
}

impl BackendSet {
    /// Build HTTP backends for every tier
    ///
    /// # Errors
    ///
    /// Returns the first client construction failure.
    pub fn http_for(tiers: &[Tier]) -> Result<Self, BackendError> {
        let mut set = Self::new();
        for tier in tiers {
            set.insert(tier.id.clone(), std::sync::Arc::new(HttpTierBackend::from_tier(tier)?));
        }
        Ok(set)
    }
}

#[async_trait]
impl PlanningBackend for HttpTierBackend {
    fn name(&self) -> &str {
        &self.tier_id
    }

    async fn health_check(&self) -> TierHealth {
        let response = match self
            .http_client
            .get(self.health_url())
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return TierHealth::default(),
        };

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let capabilities = body.get("capabilities");
        TierHealth {
            healthy: true,
            max_sites: capabilities
                .and_then(|c| c.get("max_sites"))
                .and_then(serde_json::Value::as_u64)
                .and_then(|v| usize::try_from(v).ok()),
            timeout_seconds: capabilities
                .and_then(|c| c.get("timeout_seconds"))
                .and_then(serde_json::Value::as_u64),
        }
    }

    async fn plan(
        &self,
        request: &PlanningRequest,
        deadline: Duration,
    ) -> Result<PlanningResult, BackendError> {
        let response = self
            .http_client
            .post(self.plan_url())
            .timeout(deadline)
            .header("x-request-id", &request.request_id)
            .header("x-plan-fingerprint", request.fingerprint().as_str())
            .json(request.network())
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e, deadline))?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(BackendError::Status { status, body });
        }

        let payload: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.map_transport_error(&e, deadline)
            } else {
                BackendError::InvalidResponse(e.to_string())
            }
        })?;

        Ok(PlanningResult::new(payload))
    }
}
