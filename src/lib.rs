//! # phdeem - node-local energy measurement for distributed jobs
//!
//! Many processes of a distributed job can share one physical node, but the
//! node's energy sensor (reached through its management controller) must be
//! driven by exactly one of them. This crate groups the processes of a job
//! by node, elects one leader per node, and forwards sensor calls for that
//! leader only.
//!
//! ## Key Features
//!
//! - **Node grouping**: split any process group by a hash of the node name
//! - **Deterministic election**: rank 0 of each node group is the leader
//! - **Gated forwarding**: non-leaders get `NotLeader` without touching the sensor
//! - **Unified status**: one result type for both sensor and group failures
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use phdeem::{MeasurementCoordinator, Outcome};
//!
//! let coordinator = MeasurementCoordinator::new(substrate, driver);
//! let (mut caller, status) = coordinator.init(&world, &mut bmc);
//!
//! if status.outcome() == Outcome::Success {
//!     coordinator.start(&caller, &mut bmc)?;
//!     // ... run the measured workload ...
//!     coordinator.stop(&caller, &mut bmc)?;
//! }
//!
//! // Every process closes, leader or not
//! coordinator.close(&mut caller, &mut bmc)?;
//! ```
//!
//! ## Modules
//!
//! - [`group`]: Node keys, the group substrate trait, and leader election
//! - [`sensor`]: The sensor driver trait
//! - [`coordinator`]: Leader-gated forwarding and lifecycle
//! - [`connection`]: Stateful wrapper owning handle and buffers
//! - [`status`]: Unified call status
//! - [`config`]: Coordinator configuration

// Modules
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod group;
pub mod sensor;
pub mod status;

#[cfg(test)]
mod testutil;

// Re-exports for convenient access
pub use config::CoordinatorConfig;
pub use connection::Connection;
pub use coordinator::{CallerInfo, CallerState, MeasurementCoordinator, CLOSED_RANK};
pub use error::{BufferKind, PhdeemError, Result};
pub use group::{
    GroupSubstrate, NodeGroupResolver, NodeKey, NodePlacement, PlacementError, ResolveStage,
    GROUP_OK, LEADER_RANK,
};
pub use sensor::{SensorDriver, SensorOp, SENSOR_OK};
pub use status::{Outcome, UnifiedStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
