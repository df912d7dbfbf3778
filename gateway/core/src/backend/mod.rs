//! Planning Tier Backends
//!
//! This module provides abstracted access to planning servers through a
//! common trait interface. The dispatcher only sees [`PlanningBackend`];
//! concrete transports plug in behind it.
//!
//! # Available Backends
//!
//! - **HTTP**: a planning server exposing `POST /v1/plan/sync` (default)
//! - **Mock**: in-process tier with scripted behavior, for tests
//!
//! # Usage
//!
//! ```ignore
//! use gateway_core::backend::{HttpTierBackend, PlanningBackend};
//!
//! let backend = HttpTierBackend::new("A", "http://localhost:8000")?;
//! let result = backend.plan(&request, Duration::from_secs(5)).await?;
//! ```

mod http;
pub mod mock;
mod traits;

pub use http::HttpTierBackend;
pub use traits::{BackendError, BackendSet, PlanningBackend, TierHealth};
