// phdeem-sim - In-process multi-node job simulation
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # phdeem-sim
//!
//! Runs a whole multi-node job inside one test process so phdeem code can
//! be exercised without MPI or sensor hardware.
//!
//! - **Processes** are threads, one per world rank
//! - **Group substrate**: a collective `split` that blocks until every
//!   process has called it, like the real thing
//! - **Sensors**: one shared sensor per node that refuses a second opener
//!   and records every call per rank
//! - **Faults**: failing splits, frees and driver calls on demand
//!
//! ## Quick Start
//!
//! ```rust
//! use phdeem::MeasurementCoordinator;
//! use phdeem_sim::{SimConfig, SimWorld};
//!
//! let world = SimWorld::new(SimConfig::placement(&["h1", "h1", "h2", "h2"])).unwrap();
//!
//! let leaders = world
//!     .run(|process| {
//!         let coordinator = MeasurementCoordinator::new(process.substrate(), process.driver());
//!         let mut bmc = process.bmc();
//!         let (mut caller, _status) = coordinator.init(&process.world_group(), &mut bmc);
//!         let leader = caller.is_leader();
//!         coordinator.close(&mut caller, &mut bmc).unwrap();
//!         leader
//!     })
//!     .unwrap();
//!
//! assert_eq!(leaders, vec![true, false, true, false]);
//! ```

mod config;
mod error;
mod sensor;
mod world;

// Public API
pub use config::{SimConfig, SimFaults};
pub use error::{Result, SimError};
pub use sensor::{
    NodeSensor, SimBmc, SimGlobalReading, SimSensor, SimStatsReading, SimStatus, ERR_BUSY,
    ERR_INTERNAL, ERR_NOT_OPEN,
};
pub use world::{GroupId, SimGroup, SimProcess, SimSubstrate, SimWorld, ERR_COMM, ERR_INTERN};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
