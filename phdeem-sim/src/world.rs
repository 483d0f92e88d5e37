// phdeem-sim - In-process multi-node job simulation
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Simulated job: processes, groups and the collective split
//!
//! Each simulated process runs on its own thread. [`SimSubstrate::split`]
//! is a true collective: it blocks until every process of the world has
//! called it, then hands each caller its node subgroup. As with a real
//! substrate, a process that skips a collective call leaves the others
//! waiting forever.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use phdeem::{GroupSubstrate, NodeKey};

use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::sensor::{NodeSensor, SimBmc, SimSensor};

/// Invalid group argument (same value as `MPI_ERR_COMM`)
pub const ERR_COMM: i32 = 5;

/// Internal failure of the simulation (same value as `MPI_ERR_INTERN`)
pub const ERR_INTERN: i32 = 16;

/// Identity of a simulated group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupId {
    /// All processes
    World,
    /// Result of the `round`-th split, for processes that passed `key`
    Split { round: usize, key: NodeKey },
}

/// A process's handle to a simulated group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimGroup {
    id: GroupId,
    members: Vec<usize>,
    rank: i32,
}

impl SimGroup {
    /// Group identity, equal across all members
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// World ranks of the members, in group rank order
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// The holder's rank in this group
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Number of members
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitEntry {
    key: NodeKey,
    preferred_rank: i32,
}

struct WorldInner {
    config: SimConfig,
    barrier: Barrier,
    slots: Mutex<Vec<Option<SplitEntry>>>,
    split_rounds: Vec<AtomicUsize>,
    frees: Vec<AtomicUsize>,
    live_groups: AtomicUsize,
    sensors: BTreeMap<String, Arc<NodeSensor>>,
}

/// A simulated job
///
/// Cheap to clone; clones share the same processes and nodes.
#[derive(Clone)]
pub struct SimWorld {
    inner: Arc<WorldInner>,
}

impl SimWorld {
    /// Build a world from `config`
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let size = config.size();
        let sensors = config
            .nodes()
            .into_iter()
            .map(|node| (node.to_string(), Arc::new(NodeSensor::new(node))))
            .collect();

        Ok(Self {
            inner: Arc::new(WorldInner {
                barrier: Barrier::new(size),
                slots: Mutex::new(vec![None; size]),
                split_rounds: (0..size).map(|_| AtomicUsize::new(0)).collect(),
                frees: (0..size).map(|_| AtomicUsize::new(0)).collect(),
                live_groups: AtomicUsize::new(0),
                sensors,
                config,
            }),
        })
    }

    /// Number of processes
    pub fn size(&self) -> usize {
        self.inner.config.size()
    }

    /// World configuration
    pub fn config(&self) -> &SimConfig {
        &self.inner.config
    }

    /// Node name of `rank`
    pub fn node_of(&self, rank: usize) -> Result<&str> {
        self.inner
            .config
            .placement
            .get(rank)
            .map(String::as_str)
            .ok_or(SimError::RankOutOfRange {
                rank,
                size: self.size(),
            })
    }

    /// The process at `rank`
    pub fn process(&self, rank: usize) -> Result<SimProcess> {
        let node = self.node_of(rank)?.to_string();
        let sensor = self
            .inner
            .sensors
            .get(&node)
            .cloned()
            .ok_or(SimError::RankOutOfRange {
                rank,
                size: self.size(),
            })?;
        Ok(SimProcess {
            rank,
            node,
            world: self.clone(),
            sensor,
        })
    }

    /// Run `f` once per process, each on its own thread
    ///
    /// Results are returned in rank order.
    pub fn run<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        F: Fn(SimProcess) -> T + Sync,
        T: Send,
    {
        let processes = (0..self.size())
            .map(|rank| self.process(rank))
            .collect::<Result<Vec<_>>>()?;

        std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = processes
                .into_iter()
                .map(|process| scope.spawn(move || f(process)))
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| handle.join().map_err(|_| SimError::ProcessPanicked(rank)))
                .collect()
        })
    }

    /// Sensor state of `node`
    pub fn sensor(&self, node: &str) -> Option<&NodeSensor> {
        self.inner.sensors.get(node).map(Arc::as_ref)
    }

    /// Number of `free` calls made by `rank`
    pub fn frees(&self, rank: usize) -> usize {
        self.inner
            .frees
            .get(rank)
            .map_or(0, |count| count.load(Ordering::SeqCst))
    }

    /// Subgroups created by `split` and not freed yet, summed over processes
    pub fn live_groups(&self) -> usize {
        self.inner.live_groups.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWorld")
            .field("size", &self.size())
            .field("nodes", &self.inner.config.nodes())
            .field("live_groups", &self.live_groups())
            .finish()
    }
}

/// One simulated process
#[derive(Clone)]
pub struct SimProcess {
    rank: usize,
    node: String,
    world: SimWorld,
    sensor: Arc<NodeSensor>,
}

impl SimProcess {
    /// World rank
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Node this process runs on
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The world this process belongs to
    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    /// Handle to the world group
    pub fn world_group(&self) -> SimGroup {
        SimGroup {
            id: GroupId::World,
            members: (0..self.world.size()).collect(),
            rank: self.rank as i32,
        }
    }

    /// Group substrate as seen by this process
    pub fn substrate(&self) -> SimSubstrate {
        SimSubstrate {
            rank: self.rank,
            node: self.node.clone(),
            world: self.world.clone(),
        }
    }

    /// Sensor driver as seen by this process
    pub fn driver(&self) -> SimSensor {
        SimSensor::new(
            self.rank,
            Arc::clone(&self.sensor),
            self.world.inner.config.faults.sensor.clone(),
            self.world.inner.config.samples_per_reading,
        )
    }

    /// Fresh sensor connection data for this process's node
    pub fn bmc(&self) -> SimBmc {
        SimBmc::new(&self.node)
    }
}

impl std::fmt::Debug for SimProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimProcess")
            .field("rank", &self.rank)
            .field("node", &self.node)
            .finish()
    }
}

/// [`GroupSubstrate`] for one simulated process
#[derive(Clone)]
pub struct SimSubstrate {
    rank: usize,
    node: String,
    world: SimWorld,
}

impl SimSubstrate {
    fn publish(&self, entry: SplitEntry) -> std::result::Result<(), i32> {
        let mut slots = self.world.inner.slots.lock().map_err(|_| ERR_INTERN)?;
        slots[self.rank] = Some(entry);
        Ok(())
    }

    fn snapshot(&self) -> std::result::Result<Vec<Option<SplitEntry>>, i32> {
        let slots = self.world.inner.slots.lock().map_err(|_| ERR_INTERN)?;
        Ok(slots.clone())
    }
}

impl GroupSubstrate for SimSubstrate {
    type Group = SimGroup;

    fn processor_identity(&self) -> std::result::Result<String, i32> {
        Ok(self.node.clone())
    }

    fn rank_in(&self, group: &SimGroup) -> std::result::Result<i32, i32> {
        if !group.members.contains(&self.rank) {
            return Err(ERR_COMM);
        }
        Ok(group.rank)
    }

    fn split(
        &self,
        group: &SimGroup,
        key: NodeKey,
        preferred_rank: i32,
    ) -> std::result::Result<SimGroup, i32> {
        let inner = &self.world.inner;
        // Only the world group spans the barrier
        if group.id != GroupId::World {
            return Err(ERR_COMM);
        }
        if let Some(code) = inner.config.faults.split {
            return Err(code);
        }

        self.publish(SplitEntry {
            key,
            preferred_rank,
        })?;
        inner.barrier.wait();
        let entries = self.snapshot();
        // Nobody republishes before everyone has read this round
        inner.barrier.wait();
        let entries = entries?;

        let mut members: Vec<(i32, usize)> = entries
            .iter()
            .enumerate()
            .filter_map(|(rank, entry)| {
                entry
                    .filter(|e| e.key == key)
                    .map(|e| (e.preferred_rank, rank))
            })
            .collect();
        members.sort_unstable();

        let rank = members
            .iter()
            .position(|&(_, member)| member == self.rank)
            .ok_or(ERR_INTERN)?;
        let round = inner.split_rounds[self.rank].fetch_add(1, Ordering::SeqCst);
        inner.live_groups.fetch_add(1, Ordering::SeqCst);

        log::debug!(
            "rank {} on {}: split round {} key {} -> rank {} of {}",
            self.rank,
            self.node,
            round,
            key,
            rank,
            members.len()
        );

        Ok(SimGroup {
            id: GroupId::Split { round, key },
            members: members.into_iter().map(|(_, member)| member).collect(),
            rank: rank as i32,
        })
    }

    fn free(&self, group: SimGroup) -> std::result::Result<(), i32> {
        let inner = &self.world.inner;
        if group.id == GroupId::World {
            return Err(ERR_COMM);
        }
        inner.frees[self.rank].fetch_add(1, Ordering::SeqCst);
        inner.live_groups.fetch_sub(1, Ordering::SeqCst);
        match inner.config.faults.free.get(&self.rank) {
            Some(&code) => Err(code),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SimSubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimSubstrate")
            .field("rank", &self.rank)
            .field("node", &self.node)
            .finish()
    }
}
