//! nodescale-metrics: what the control loop has been doing.
//!
//! ```text
//! FleetMetrics
//!   ├── record_*()        ← monitor, once per tick / applied decision
//!   ├── observe_snapshot() ← monitor, after each probe round
//!   └── report()          → MetricsReport
//!
//! render_prometheus(report) → text/plain for /metrics
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{FleetMetrics, MetricsReport};
pub use prometheus::render_prometheus;
