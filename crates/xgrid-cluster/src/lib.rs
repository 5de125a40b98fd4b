//! xgrid-cluster: the controller/agent control plane.
//!
//! # Architecture
//!
//! ```text
//! Controller
//!   ├── Registry (transport-free)
//!   │   ├── register_node()   → verifies registration secret, issues/reuses node secret
//!   │   ├── node_config()     → verifies node secret, returns computed NodeConfig
//!   │   └── receive_stats()   → verifies node secret, writes status + client counters
//!   └── AgentClient (HTTP)
//!       └── push_config() / restart() / update() → signed with X-Master-Signature
//!
//! Agent
//!   └── MasterClient (HTTP)
//!       └── register() / post_stats() → signed with X-Node-Signature
//! ```
//!
//! Signature failures are terminal for the request. Nothing here retries.

pub mod agent_client;
pub mod error;
pub mod master_client;
pub mod registry;

pub use agent_client::{AgentClient, SyncReport};
pub use error::{ClientError, ClientResult, ErrorKind, RegistryError, RegistryResult};
pub use master_client::MasterClient;
pub use registry::{Dashboard, GroupRef, NodeSummary, Registry};
