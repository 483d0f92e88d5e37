// phdeem-sim - In-process multi-node job simulation
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for phdeem-sim

use std::collections::BTreeMap;

use phdeem::SensorOp;

use crate::error::{Result, SimError};

/// Faults injected into the simulated substrate and driver
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// Code returned by every process's `split`
    pub split: Option<i32>,
    /// Code returned by `free` on specific ranks
    pub free: BTreeMap<usize, i32>,
    /// Code returned by every driver call of the given kind
    pub sensor: BTreeMap<SensorOp, i32>,
}

/// Simulated world configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Node name of each process, indexed by world rank
    pub placement: Vec<String>,
    /// Injected faults
    pub faults: SimFaults,
    /// Samples produced per global reading
    pub samples_per_reading: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            placement: vec!["localhost".to_string()],
            faults: SimFaults::default(),
            samples_per_reading: 4,
        }
    }
}

impl SimConfig {
    /// Processes placed on the given node names, one entry per rank
    pub fn placement(nodes: &[&str]) -> Self {
        Self {
            placement: nodes.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    /// `nodes` nodes named `node0000`, `node0001`, ... with
    /// `per_node` consecutive ranks each
    pub fn uniform(nodes: usize, per_node: usize) -> Self {
        let placement = (0..nodes)
            .flat_map(|n| std::iter::repeat(format!("node{:04}", n)).take(per_node))
            .collect();
        Self {
            placement,
            ..Default::default()
        }
    }

    /// Make every `split` fail with `code`
    pub fn with_split_failure(mut self, code: i32) -> Self {
        self.faults.split = Some(code);
        self
    }

    /// Make `free` fail with `code` on `rank`
    pub fn with_free_failure(mut self, rank: usize, code: i32) -> Self {
        self.faults.free.insert(rank, code);
        self
    }

    /// Make every driver call of kind `op` return `code`
    pub fn with_sensor_failure(mut self, op: SensorOp, code: i32) -> Self {
        self.faults.sensor.insert(op, code);
        self
    }

    /// Number of processes
    pub fn size(&self) -> usize {
        self.placement.len()
    }

    /// Distinct node names, sorted
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self.placement.iter().map(String::as_str).collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.placement.is_empty() {
            return Err(SimError::EmptyPlacement);
        }
        if let Some(rank) = self.placement.iter().position(|n| n.is_empty()) {
            return Err(SimError::EmptyNodeName { rank });
        }
        Ok(())
    }
}
