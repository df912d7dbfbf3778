//! Gateway Core - Capability-Aware Dispatch for Fiber Network Planning
//!
//! This crate routes fiber-network planning requests to backend planning
//! servers ("tiers") chosen by network size, falls back to larger tiers when
//! a tier times out or fails, and caches completed results by request
//! content so repeated or retried requests never recompute.
//!
//! It has no HTTP server of its own; the `gateway-daemon` crate exposes it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       GatewayService                          │
//! │                                                               │
//! │   parse ──► fingerprint ──► FingerprintCache ──► Reservation  │
//! │                                  ▲                   │        │
//! │                                  │ store             ▼        │
//! │                                  └──────────────  Dispatcher  │
//! └──────────────────────────────────────────────────────┼────────┘
//!                                                        │
//!                       TierRegistry (smallest tier that fits)
//!                                                        │
//!                        ┌───────────────┬───────────────┘
//!                        ▼               ▼
//!                   ┌─────────┐     ┌─────────┐
//!                   │ Tier A  │ ──► │ Tier B  │   fallback on timeout/error
//!                   │ 20 / 5s │     │1000/600s│
//!                   └─────────┘     └─────────┘
//! ```
//!
//! # Key Types
//!
//! - [`GatewayService`]: normalize, cache, deduplicate, dispatch, store
//! - [`Dispatcher`]: tier selection, per-tier deadlines, upward fallback
//! - [`TierRegistry`]: atomically swappable tier table
//! - [`FingerprintCache`]: TTL + LRU result store with in-flight reservations
//! - [`PlanningBackend`]: trait implemented by each tier transport
//!
//! # Quick Start
//!
//! ```ignore
//! use gateway_core::{config, BackendSet, GatewayService};
//!
//! let config = config::load_config()?;
//! let backends = BackendSet::http_for(&config.tiers)?;
//! let gateway = GatewayService::from_config(&config, backends)?;
//!
//! let outcome = gateway.handle(br#"{"sites":[{"id":"co","lat":48.1,"lon":11.5}]}"#).await?;
//! println!("{} via {}", outcome.fingerprint, outcome.source.as_str());
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod request;
pub mod routing;

pub use backend::{BackendError, BackendSet, HttpTierBackend, PlanningBackend, TierHealth};
pub use cache::{CacheStats, FingerprintCache, Reservation, StoreOutcome};
pub use config::{ConfigError, ConfigOverrides, ConfigSource, GatewayConfig};
pub use error::{ErrorKind, GatewayError};
pub use feedback::{FeedbackError, FeedbackRecord, FeedbackSink, FeedbackSubmission, FileFeedbackSink};
pub use gateway::{GatewayService, PlanOutcome, ResultSource, TierStatus};
pub use request::{Fingerprint, NetworkDescription, PlanningRequest, PlanningResult, SiteCount, SizeMetric};
pub use routing::{
    DispatchConfig, DispatchDecision, DispatchError, Dispatcher, Tier, TierRegistry, TierSummary,
};
