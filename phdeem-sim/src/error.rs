// phdeem-sim - In-process multi-node job simulation
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for phdeem-sim

use thiserror::Error;

/// Misuse of the simulation itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// A world needs at least one process
    #[error("Placement is empty: a world needs at least one process")]
    EmptyPlacement,

    /// A node name was empty
    #[error("Process {rank} has an empty node name")]
    EmptyNodeName { rank: usize },

    /// Rank outside the world
    #[error("Rank {rank} out of range for world of size {size}")]
    RankOutOfRange { rank: usize, size: usize },

    /// A simulated process panicked
    #[error("Simulated process {0} panicked")]
    ProcessPanicked(usize),
}

/// Result type alias for simulation operations
pub type Result<T> = std::result::Result<T, SimError>;
