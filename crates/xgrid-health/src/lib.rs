//! xgrid-health: node liveness reconciliation for the controller.
//!
//! Every tick the monitor lists all nodes and checks each one independently:
//!
//! ```text
//! HealthMonitor::check_all
//!   └── per node (spawned)
//!       ├── signed GET /api/health on the agent ── fail / non-200 → offline
//!       └── GET /stats on the proxy engine ─────── fail → degraded, else online
//!           └── update_node_status (also refreshes last_seen)
//! ```
//!
//! A slow or failing node never delays the others; each probe is bounded by
//! the monitor's timeout.

pub mod checker;
pub mod monitor;

pub use checker::{ProbeResult, classify, http_probe, signed_probe};
pub use monitor::{CheckReport, HealthMonitor};
