//! Capability-Aware Tier Routing
//!
//! Routes planning requests to backend tiers by network size, enforces each
//! tier's deadline, and falls back to larger tiers on failure.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |    Dispatcher    |  <-- Entry point for all planning requests
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |   TierRegistry   |  <-- Smallest enabled tier that fits the size
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |    BackendSet    |  <-- Tier id -> PlanningBackend
//! +--------+---------+
//!          |
//!     +----+----+
//!     |         |
//!     v         v
//! +-------+ +-------+
//! |Tier A | |Tier B |  <-- Fallback chain runs strictly upward
//! +-------+ +-------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Capacity Safety**: a tier never sees a network larger than its maximum
//! 2. **Deadline Isolation**: a timeout cancels one attempt, nothing else
//! 3. **Upward Fallback**: each tier is tried at most once, in capacity order
//! 4. **Diagnostic Decisions**: attempt records never steer later routing

pub mod config;
pub mod dispatcher;
pub mod fallback;
pub mod metrics;
pub mod registry;

pub use config::{DispatchConfig, Tier, TierSummary};
pub use dispatcher::{DispatchError, Dispatched, Dispatcher};
pub use fallback::{AttemptOutcome, DispatchAttempt, DispatchDecision};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use registry::{RegistryError, TierRegistry, TierTable};
