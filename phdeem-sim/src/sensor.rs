// phdeem-sim - In-process multi-node job simulation
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Simulated per-node energy sensor
//!
//! All processes on a node share one [`NodeSensor`]. Like the real device,
//! it can be opened by only one process at a time: a second `init` from
//! another process gets [`ERR_BUSY`]. Every driver call is recorded per
//! rank, so tests can check who touched which node's sensor.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use phdeem::{NodeKey, SensorDriver, SensorOp, SENSOR_OK};

/// The sensor is not open for the calling process
pub const ERR_NOT_OPEN: i32 = 1;

/// The sensor is already open for another process
pub const ERR_BUSY: i32 = 2;

/// The simulation's own state is unusable
pub const ERR_INTERNAL: i32 = 99;

/// Connection data for one node's sensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimBmc {
    /// Node the controller belongs to
    pub host: String,
    /// Set by a successful `init`
    pub open: bool,
    /// Names of the blade sensors, filled in by `init`
    pub blade_sensors: Vec<String>,
}

impl SimBmc {
    /// Connection data for `host`
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Default::default()
        }
    }
}

/// Sensor state reported by `check_status`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStatus {
    /// Recording is running
    pub recording: bool,
    /// Readings handed out and not freed yet
    pub outstanding_readings: usize,
}

/// Power samples of one global reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimGlobalReading {
    /// Blade power samples in watts
    pub blade_values: Vec<f64>,
    /// Storage is held by the driver
    pub allocated: bool,
}

/// Summary statistics of one stats reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimStatsReading {
    /// Minimum blade power
    pub min: f64,
    /// Maximum blade power
    pub max: f64,
    /// Average blade power
    pub average: f64,
    /// Storage is held by the driver
    pub allocated: bool,
}

#[derive(Debug, Default)]
struct SensorState {
    open_by: Option<usize>,
    recording: bool,
    outstanding: usize,
    users: BTreeSet<usize>,
    calls: BTreeMap<(usize, SensorOp), usize>,
}

/// Energy sensor of one simulated node
#[derive(Debug)]
pub struct NodeSensor {
    node: String,
    base_power: f64,
    state: Mutex<SensorState>,
}

impl NodeSensor {
    pub(crate) fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            base_power: 80.0 + f64::from(NodeKey::from_identity(node).value() % 40),
            state: Mutex::new(SensorState::default()),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, SensorState>> {
        self.state.lock().ok()
    }

    /// Node name
    pub fn node(&self) -> &str {
        &self.node
    }

    /// World ranks that made any driver call on this node
    pub fn users(&self) -> Vec<usize> {
        self.lock()
            .map(|s| s.users.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Calls of kind `op` made by `rank`
    pub fn calls(&self, rank: usize, op: SensorOp) -> usize {
        self.lock()
            .and_then(|s| s.calls.get(&(rank, op)).copied())
            .unwrap_or(0)
    }

    /// All driver calls made on this node
    pub fn total_calls(&self) -> usize {
        self.lock().map(|s| s.calls.values().sum()).unwrap_or(0)
    }

    /// Whether some process holds the sensor open
    pub fn is_open(&self) -> bool {
        self.lock().is_some_and(|s| s.open_by.is_some())
    }

    /// Whether recording is running
    pub fn is_recording(&self) -> bool {
        self.lock().is_some_and(|s| s.recording)
    }

    /// Readings handed out and not freed yet
    pub fn outstanding_readings(&self) -> usize {
        self.lock().map_or(0, |s| s.outstanding)
    }
}

/// [`SensorDriver`] for one simulated process
#[derive(Debug, Clone)]
pub struct SimSensor {
    rank: usize,
    sensor: std::sync::Arc<NodeSensor>,
    faults: BTreeMap<SensorOp, i32>,
    samples_per_reading: usize,
}

impl SimSensor {
    pub(crate) fn new(
        rank: usize,
        sensor: std::sync::Arc<NodeSensor>,
        faults: BTreeMap<SensorOp, i32>,
        samples_per_reading: usize,
    ) -> Self {
        Self {
            rank,
            sensor,
            faults,
            samples_per_reading,
        }
    }

    /// The node sensor this driver talks to
    pub fn node_sensor(&self) -> &NodeSensor {
        &self.sensor
    }

    /// Record the call, apply faults, and run `body` on the locked state
    fn call(&self, op: SensorOp, body: impl FnOnce(&mut SensorState) -> i32) -> i32 {
        let Some(mut state) = self.sensor.lock() else {
            return ERR_INTERNAL;
        };
        state.users.insert(self.rank);
        *state.calls.entry((self.rank, op)).or_insert(0) += 1;

        if let Some(&code) = self.faults.get(&op) {
            return code;
        }
        body(&mut state)
    }

    /// Like [`call`](Self::call), but only for the process holding the sensor
    fn call_open(&self, op: SensorOp, body: impl FnOnce(&mut SensorState) -> i32) -> i32 {
        let rank = self.rank;
        self.call(op, |state| {
            if state.open_by != Some(rank) {
                return ERR_NOT_OPEN;
            }
            body(state)
        })
    }

    fn samples(&self) -> Vec<f64> {
        (0..self.samples_per_reading)
            .map(|i| self.sensor.base_power + i as f64 * 0.5)
            .collect()
    }
}

impl SensorDriver for SimSensor {
    type Handle = SimBmc;
    type Status = SimStatus;
    type GlobalReading = SimGlobalReading;
    type StatsReading = SimStatsReading;

    fn init(&self, handle: &mut SimBmc) -> i32 {
        let rank = self.rank;
        let node = self.sensor.node.clone();
        self.call(SensorOp::Init, |state| {
            match state.open_by {
                Some(owner) if owner != rank => return ERR_BUSY,
                _ => state.open_by = Some(rank),
            }
            handle.open = true;
            handle.blade_sensors = vec![format!("{}/BLADE", node)];
            SENSOR_OK
        })
    }

    fn close(&self, handle: &mut SimBmc) -> i32 {
        self.call_open(SensorOp::Close, |state| {
            state.open_by = None;
            state.recording = false;
            handle.open = false;
            SENSOR_OK
        })
    }

    fn start(&self, _handle: &mut SimBmc) -> i32 {
        self.call_open(SensorOp::Start, |state| {
            state.recording = true;
            SENSOR_OK
        })
    }

    fn stop(&self, _handle: &mut SimBmc) -> i32 {
        self.call_open(SensorOp::Stop, |state| {
            state.recording = false;
            SENSOR_OK
        })
    }

    fn check_status(&self, _handle: &mut SimBmc, status: &mut SimStatus) -> i32 {
        self.call_open(SensorOp::CheckStatus, |state| {
            *status = SimStatus {
                recording: state.recording,
                outstanding_readings: state.outstanding,
            };
            SENSOR_OK
        })
    }

    fn read_global(&self, _handle: &mut SimBmc, reading: &mut SimGlobalReading) -> i32 {
        let samples = self.samples();
        self.call_open(SensorOp::ReadGlobal, |state| {
            state.outstanding += 1;
            *reading = SimGlobalReading {
                blade_values: samples,
                allocated: true,
            };
            SENSOR_OK
        })
    }

    fn read_stats(&self, _handle: &mut SimBmc, reading: &mut SimStatsReading) -> i32 {
        let samples = self.samples();
        self.call_open(SensorOp::ReadStats, |state| {
            state.outstanding += 1;
            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let average = if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            };
            *reading = SimStatsReading {
                min,
                max,
                average,
                allocated: true,
            };
            SENSOR_OK
        })
    }

    fn free_global(&self, reading: &mut SimGlobalReading) -> i32 {
        self.call(SensorOp::FreeGlobal, |state| {
            if reading.allocated {
                state.outstanding = state.outstanding.saturating_sub(1);
            }
            *reading = SimGlobalReading::default();
            SENSOR_OK
        })
    }

    fn free_stats(&self, reading: &mut SimStatsReading) -> i32 {
        self.call(SensorOp::FreeStats, |state| {
            if reading.allocated {
                state.outstanding = state.outstanding.saturating_sub(1);
            }
            *reading = SimStatsReading::default();
            SENSOR_OK
        })
    }

    fn clear(&self, _handle: &mut SimBmc) -> i32 {
        self.call_open(SensorOp::Clear, |_| SENSOR_OK)
    }
}
