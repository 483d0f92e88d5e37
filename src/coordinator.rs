//! Leader-gated forwarding to the sensor driver
//!
//! [`MeasurementCoordinator`] elects one leader per node at `init` and from
//! then on forwards sensor calls only for that leader. Per process, the
//! state lives in a [`CallerInfo`]:
//!
//! ```text
//! Uninitialized --init (leader, driver ok)--> Active --close--> Closed
//!       |
//!       +--init (not leader)--> NonLeader --close--> Closed
//!       |
//!       +--init (group or driver failure)--> Failed --close--> Closed
//! ```
//!
//! Gated calls on a `NonLeader` return [`Outcome::NotLeader`](crate::Outcome)
//! without touching anything. On `Failed` they return
//! [`PhdeemError::Uninitialized`], on `Closed` [`PhdeemError::Closed`].
//! Calls are single-shot; nothing is retried.

use crate::config::CoordinatorConfig;
use crate::error::{PhdeemError, Result};
use crate::group::{GroupSubstrate, NodeGroupResolver, NodeKey, LEADER_RANK};
use crate::sensor::{SensorDriver, SensorOp};
use crate::status::UnifiedStatus;

/// Local rank stored in a closed [`CallerInfo`]
pub const CLOSED_RANK: i32 = -1;

/// Lifecycle state of a [`CallerInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerState {
    /// Init failed; the subgroup, if any, still has to be released
    Failed,
    /// Elected leader with an open sensor
    Active,
    /// Member of a node group led by another process
    NonLeader,
    /// Released; terminal
    Closed,
}

/// One process's position after node grouping
///
/// Created by [`MeasurementCoordinator::init`]. Owns the node-local
/// subgroup handle and must be passed to [`MeasurementCoordinator::close`]
/// exactly once, on every process, leader or not.
#[derive(Debug)]
pub struct CallerInfo<G> {
    node_key: Option<NodeKey>,
    local_rank: Option<i32>,
    subgroup: Option<G>,
    state: CallerState,
}

impl<G> CallerInfo<G> {
    fn failed(node_key: Option<NodeKey>, local_rank: Option<i32>, subgroup: Option<G>) -> Self {
        Self {
            node_key,
            local_rank,
            subgroup,
            state: CallerState::Failed,
        }
    }

    /// Key of this process's node, if resolution got that far
    pub fn node_key(&self) -> Option<NodeKey> {
        self.node_key
    }

    /// Rank within the node group
    ///
    /// `None` if init failed before the rank was known, [`CLOSED_RANK`]
    /// once closed.
    pub fn local_rank(&self) -> Option<i32> {
        self.local_rank
    }

    /// Current lifecycle state
    pub fn state(&self) -> CallerState {
        self.state
    }

    /// Whether this process drives the node's sensor
    pub fn is_leader(&self) -> bool {
        self.state == CallerState::Active && self.local_rank == Some(LEADER_RANK)
    }

    /// Whether `close` already ran
    pub fn is_closed(&self) -> bool {
        self.state == CallerState::Closed
    }

    /// The node-local subgroup, while it is held
    pub fn subgroup(&self) -> Option<&G> {
        self.subgroup.as_ref()
    }
}

/// Forwards sensor calls for the elected node leader
///
/// Holds the substrate and the driver; per-process state lives in
/// [`CallerInfo`], so one coordinator can serve several callers.
pub struct MeasurementCoordinator<S, D> {
    substrate: S,
    driver: D,
    config: CoordinatorConfig,
}

impl<S, D> MeasurementCoordinator<S, D>
where
    S: GroupSubstrate,
    D: SensorDriver,
{
    /// Create a coordinator with default configuration
    pub fn new(substrate: S, driver: D) -> Self {
        Self::with_config(substrate, driver, CoordinatorConfig::default())
    }

    /// Create a coordinator with custom configuration
    pub fn with_config(substrate: S, driver: D, config: CoordinatorConfig) -> Self {
        Self {
            substrate,
            driver,
            config,
        }
    }

    /// The group substrate
    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    /// The sensor driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Current configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Group processes by node, elect leaders, and open the leader's sensor
    ///
    /// Collective over `parent`: every member must call it. Returns the
    /// caller info together with the status:
    /// - `GroupError` if resolution failed; the driver is not called
    /// - `NotLeader` on every process but the node leader
    /// - the mapped driver `init` code on the leader
    ///
    /// Whatever the status, the returned caller info must still be closed.
    pub fn init(
        &self,
        parent: &S::Group,
        handle: &mut D::Handle,
    ) -> (CallerInfo<S::Group>, UnifiedStatus) {
        let resolver =
            NodeGroupResolver::new(&self.substrate).with_identity(self.config.node_name.as_deref());

        let placement = match resolver.resolve(parent) {
            Ok(placement) => placement,
            Err(err) => {
                log::debug!(
                    "node grouping failed at {:?} with group code {}",
                    err.stage,
                    err.code
                );
                return (
                    CallerInfo::failed(err.node_key, None, err.subgroup),
                    UnifiedStatus::group_error(err.code),
                );
            }
        };

        if !placement.is_leader() {
            log::trace!(
                "node {}: local rank {}, not leader",
                placement.node_key,
                placement.local_rank
            );
            let info = CallerInfo {
                node_key: Some(placement.node_key),
                local_rank: Some(placement.local_rank),
                subgroup: Some(placement.subgroup),
                state: CallerState::NonLeader,
            };
            return (info, UnifiedStatus::not_leader());
        }

        let status = UnifiedStatus::from_sensor(SensorOp::Init, self.driver.init(handle));
        if !status.is_success() {
            log::debug!("node {}: sensor init failed: {}", placement.node_key, status);
            let info = CallerInfo::failed(
                Some(placement.node_key),
                Some(placement.local_rank),
                Some(placement.subgroup),
            );
            return (info, status);
        }

        log::debug!("node {}: elected leader, sensor open", placement.node_key);
        let info = CallerInfo {
            node_key: Some(placement.node_key),
            local_rank: Some(placement.local_rank),
            subgroup: Some(placement.subgroup),
            state: CallerState::Active,
        };
        (info, status)
    }

    /// Close the sensor and release the node group
    ///
    /// On the leader the driver is closed first, then the subgroup is freed,
    /// and both are attempted even if the first fails; the first failure is
    /// reported. Non-leaders and failed inits only free their subgroup.
    /// Afterwards the caller info is closed for good; closing it again
    /// returns [`PhdeemError::Closed`] without any call.
    pub fn close(
        &self,
        info: &mut CallerInfo<S::Group>,
        handle: &mut D::Handle,
    ) -> Result<UnifiedStatus> {
        let previous = info.state;
        let base = match previous {
            CallerState::Closed => return Err(PhdeemError::Closed),
            CallerState::Active => {
                UnifiedStatus::from_sensor(SensorOp::Close, self.driver.close(handle))
            }
            CallerState::NonLeader => UnifiedStatus::not_leader(),
            CallerState::Failed => UnifiedStatus::success(),
        };

        let released = match info.subgroup.take() {
            Some(subgroup) => match self.substrate.free(subgroup) {
                Ok(()) => base,
                Err(code) => base.or_first_failure(UnifiedStatus::group_error(code)),
            },
            None => base,
        };

        info.local_rank = Some(CLOSED_RANK);
        info.state = CallerState::Closed;
        log::debug!("caller closed from {:?}: {}", previous, released);
        Ok(released)
    }

    /// Start recording on the node sensor
    pub fn start(
        &self,
        info: &CallerInfo<S::Group>,
        handle: &mut D::Handle,
    ) -> Result<UnifiedStatus> {
        self.forward(info, SensorOp::Start, || self.driver.start(handle))
    }

    /// Stop recording on the node sensor
    pub fn stop(
        &self,
        info: &CallerInfo<S::Group>,
        handle: &mut D::Handle,
    ) -> Result<UnifiedStatus> {
        self.forward(info, SensorOp::Stop, || self.driver.stop(handle))
    }

    /// Query the sensor state into `status`
    pub fn check_status(
        &self,
        info: &CallerInfo<S::Group>,
        handle: &mut D::Handle,
        status: &mut D::Status,
    ) -> Result<UnifiedStatus> {
        self.forward(info, SensorOp::CheckStatus, || {
            self.driver.check_status(handle, status)
        })
    }

    /// Fetch the global reading
    ///
    /// On success `reading` holds driver-allocated storage that must be
    /// released with [`free_global_buffer`](Self::free_global_buffer) before
    /// it is read into again and before `close`.
    pub fn read_global(
        &self,
        info: &CallerInfo<S::Group>,
        handle: &mut D::Handle,
        reading: &mut D::GlobalReading,
    ) -> Result<UnifiedStatus> {
        self.forward(info, SensorOp::ReadGlobal, || {
            self.driver.read_global(handle, reading)
        })
    }

    /// Fetch sensor statistics
    ///
    /// Same ownership rule as [`read_global`](Self::read_global); release
    /// with [`free_stats_buffer`](Self::free_stats_buffer).
    pub fn read_stats(
        &self,
        info: &CallerInfo<S::Group>,
        handle: &mut D::Handle,
        reading: &mut D::StatsReading,
    ) -> Result<UnifiedStatus> {
        self.forward(info, SensorOp::ReadStats, || {
            self.driver.read_stats(handle, reading)
        })
    }

    /// Release a global reading
    pub fn free_global_buffer(
        &self,
        info: &CallerInfo<S::Group>,
        reading: &mut D::GlobalReading,
    ) -> Result<UnifiedStatus> {
        self.forward(info, SensorOp::FreeGlobal, || self.driver.free_global(reading))
    }

    /// Release a stats reading
    pub fn free_stats_buffer(
        &self,
        info: &CallerInfo<S::Group>,
        reading: &mut D::StatsReading,
    ) -> Result<UnifiedStatus> {
        self.forward(info, SensorOp::FreeStats, || self.driver.free_stats(reading))
    }

    /// Drop all data recorded on the node sensor
    pub fn clear(
        &self,
        info: &CallerInfo<S::Group>,
        handle: &mut D::Handle,
    ) -> Result<UnifiedStatus> {
        self.forward(info, SensorOp::Clear, || self.driver.clear(handle))
    }

    fn forward(
        &self,
        info: &CallerInfo<S::Group>,
        op: SensorOp,
        call: impl FnOnce() -> i32,
    ) -> Result<UnifiedStatus> {
        match info.state {
            CallerState::Active => {}
            CallerState::NonLeader => return Ok(UnifiedStatus::not_leader()),
            CallerState::Failed => return Err(PhdeemError::Uninitialized),
            CallerState::Closed => return Err(PhdeemError::Closed),
        }

        let status = UnifiedStatus::from_sensor(op, call());
        log::trace!("{} -> {}", op, status);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Outcome;
    use crate::testutil::{FakeBmc, FakeDriver, FakeGroup, FakeSubstrate};

    fn coordinator(
        substrate: FakeSubstrate,
        driver: FakeDriver,
    ) -> MeasurementCoordinator<FakeSubstrate, FakeDriver> {
        MeasurementCoordinator::new(substrate, driver)
    }

    fn leader() -> MeasurementCoordinator<FakeSubstrate, FakeDriver> {
        coordinator(FakeSubstrate::new("h1").with_local_rank(0), FakeDriver::new())
    }

    /// Every leader-gated call, in order, against `info`
    fn all_gated(
        coord: &MeasurementCoordinator<FakeSubstrate, FakeDriver>,
        info: &CallerInfo<FakeGroup>,
        bmc: &mut FakeBmc,
    ) -> Vec<Result<UnifiedStatus>> {
        let mut status = Default::default();
        let mut global = Default::default();
        let mut stats = Default::default();
        vec![
            coord.start(info, bmc),
            coord.stop(info, bmc),
            coord.check_status(info, bmc, &mut status),
            coord.read_global(info, bmc, &mut global),
            coord.read_stats(info, bmc, &mut stats),
            coord.free_global_buffer(info, &mut global),
            coord.free_stats_buffer(info, &mut stats),
            coord.clear(info, bmc),
        ]
    }

    #[test]
    fn test_init_leader_becomes_active() {
        let coord = leader();
        let mut bmc = FakeBmc::default();
        let (info, status) = coord.init(&FakeGroup::world(), &mut bmc);

        assert!(status.is_success());
        assert_eq!(info.state(), CallerState::Active);
        assert!(info.is_leader());
        assert_eq!(info.node_key(), Some(NodeKey::from_identity("h1")));
        assert_eq!(coord.driver().calls(SensorOp::Init), 1);
        assert!(bmc.open);
    }

    #[test]
    fn test_init_non_leader_skips_driver() {
        let coord = coordinator(FakeSubstrate::new("h1").with_local_rank(1), FakeDriver::new());
        let mut bmc = FakeBmc::default();
        let (info, status) = coord.init(&FakeGroup::world(), &mut bmc);

        assert_eq!(status.outcome(), Outcome::NotLeader);
        assert_eq!(info.state(), CallerState::NonLeader);
        assert!(!info.is_leader());
        assert_eq!(coord.driver().total_calls(), 0);
    }

    #[test]
    fn test_init_uses_configured_node_name() {
        let substrate = FakeSubstrate::new("container-1").with_local_rank(0);
        let coord = MeasurementCoordinator::with_config(
            substrate,
            FakeDriver::new(),
            CoordinatorConfig::with_node_name("h9"),
        );
        let (info, _) = coord.init(&FakeGroup::world(), &mut FakeBmc::default());
        assert_eq!(info.node_key(), Some(NodeKey::from_identity("h9")));
    }

    #[test]
    fn test_gated_ops_on_non_leader_never_reach_driver() {
        let coord = coordinator(FakeSubstrate::new("h1").with_local_rank(2), FakeDriver::new());
        let mut bmc = FakeBmc::default();
        let (info, _) = coord.init(&FakeGroup::world(), &mut bmc);

        for result in all_gated(&coord, &info, &mut bmc) {
            assert!(result.unwrap().is_not_leader());
        }
        assert_eq!(coord.driver().total_calls(), 0);
    }

    #[test]
    fn test_split_failure_reports_group_error() {
        let coord = coordinator(FakeSubstrate::new("h1").failing_split(42), FakeDriver::new());
        let mut bmc = FakeBmc::default();
        let (info, status) = coord.init(&FakeGroup::world(), &mut bmc);

        assert_eq!(status.outcome(), Outcome::GroupError);
        assert_eq!(status.group_code(), 42);
        assert_eq!(status.sensor_code(), 0);
        assert_eq!(info.state(), CallerState::Failed);
        assert_eq!(info.local_rank(), None);
        assert_eq!(coord.driver().total_calls(), 0);
    }

    #[test]
    fn test_gated_ops_on_failed_init_rejected() {
        let driver = FakeDriver::new().with_code(SensorOp::Init, -3);
        let coord = coordinator(FakeSubstrate::new("h1").with_local_rank(0), driver);
        let mut bmc = FakeBmc::default();
        let (info, _) = coord.init(&FakeGroup::world(), &mut bmc);
        assert_eq!(info.state(), CallerState::Failed);

        let results = all_gated(&coord, &info, &mut bmc);
        assert_eq!(results.len(), 8);
        for result in results {
            assert_eq!(result, Err(PhdeemError::Uninitialized));
        }
        assert_eq!(coord.driver().total_calls(), 1);
        assert_eq!(coord.substrate().frees(), 0);
    }

    #[test]
    fn test_failed_driver_init_still_releases_subgroup() {
        let driver = FakeDriver::new().with_code(SensorOp::Init, -3);
        let coord = coordinator(FakeSubstrate::new("h1").with_local_rank(0), driver);
        let mut bmc = FakeBmc::default();
        let (mut info, status) = coord.init(&FakeGroup::world(), &mut bmc);

        assert_eq!(status.outcome(), Outcome::SensorError);
        assert_eq!(status.sensor_code(), -3);
        assert_eq!(info.state(), CallerState::Failed);
        assert_eq!(info.local_rank(), Some(0));
        assert!(!info.is_leader());
        assert!(info.subgroup().is_some());

        let closed = coord.close(&mut info, &mut bmc).unwrap();
        assert!(closed.is_success());
        assert_eq!(coord.substrate().frees(), 1);
        assert_eq!(coord.driver().calls(SensorOp::Close), 0);
        assert!(info.is_closed());
    }

    #[test]
    fn test_local_rank_failure_releases_subgroup_on_close() {
        let coord = coordinator(FakeSubstrate::new("h1").failing_local_rank(5), FakeDriver::new());
        let mut bmc = FakeBmc::default();
        let (mut info, status) = coord.init(&FakeGroup::world(), &mut bmc);
        assert_eq!(status.group_code(), 5);

        coord.close(&mut info, &mut bmc).unwrap();
        assert_eq!(coord.substrate().frees(), 1);
    }

    #[test]
    fn test_start_failure_keeps_active() {
        let driver = FakeDriver::new().with_code(SensorOp::Start, 11);
        let coord = coordinator(FakeSubstrate::new("h1").with_local_rank(0), driver);
        let mut bmc = FakeBmc::default();
        let (info, _) = coord.init(&FakeGroup::world(), &mut bmc);

        let status = coord.start(&info, &mut bmc).unwrap();
        assert_eq!(status.outcome(), Outcome::SensorError);
        assert_eq!(status.sensor_code(), 11);
        assert_eq!(status.op(), Some(SensorOp::Start));
        assert_eq!(info.state(), CallerState::Active);

        // Not retried
        assert_eq!(coord.driver().calls(SensorOp::Start), 1);
    }

    #[test]
    fn test_leader_sequence() {
        let coord = leader();
        let mut bmc = FakeBmc::default();
        let (mut info, _) = coord.init(&FakeGroup::world(), &mut bmc);

        let mut global = Default::default();
        let mut stats = Default::default();
        let mut sensor_status = Default::default();

        assert!(coord.start(&info, &mut bmc).unwrap().is_success());
        assert!(coord.read_global(&info, &mut bmc, &mut global).unwrap().is_success());
        assert!(coord.free_global_buffer(&info, &mut global).unwrap().is_success());
        assert!(coord.read_stats(&info, &mut bmc, &mut stats).unwrap().is_success());
        assert!(coord.free_stats_buffer(&info, &mut stats).unwrap().is_success());
        assert!(coord.stop(&info, &mut bmc).unwrap().is_success());
        assert!(coord
            .check_status(&info, &mut bmc, &mut sensor_status)
            .unwrap()
            .is_success());
        assert!(coord.clear(&info, &mut bmc).unwrap().is_success());
        assert!(coord.close(&mut info, &mut bmc).unwrap().is_success());

        assert_eq!(info.local_rank(), Some(CLOSED_RANK));
        assert!(!bmc.open);
        assert_eq!(coord.substrate().frees(), 1);
    }

    #[test]
    fn test_close_twice() {
        let coord = leader();
        let mut bmc = FakeBmc::default();
        let (mut info, _) = coord.init(&FakeGroup::world(), &mut bmc);

        coord.close(&mut info, &mut bmc).unwrap();
        let calls = coord.driver().total_calls();
        let frees = coord.substrate().frees();

        assert_eq!(coord.close(&mut info, &mut bmc), Err(PhdeemError::Closed));
        assert_eq!(coord.driver().total_calls(), calls);
        assert_eq!(coord.substrate().frees(), frees);
    }

    #[test]
    fn test_ops_after_close_rejected() {
        let coord = leader();
        let mut bmc = FakeBmc::default();
        let (mut info, _) = coord.init(&FakeGroup::world(), &mut bmc);
        coord.close(&mut info, &mut bmc).unwrap();
        let calls = coord.driver().total_calls();
        let frees = coord.substrate().frees();

        let results = all_gated(&coord, &info, &mut bmc);
        assert_eq!(results.len(), 8);
        for result in results {
            assert_eq!(result, Err(PhdeemError::Closed));
        }
        assert_eq!(coord.close(&mut info, &mut bmc), Err(PhdeemError::Closed));
        assert_eq!(coord.driver().total_calls(), calls);
        assert_eq!(coord.substrate().frees(), frees);
    }

    #[test]
    fn test_close_attempts_both_releases() {
        let driver = FakeDriver::new().with_code(SensorOp::Close, 7);
        let substrate = FakeSubstrate::new("h1").with_local_rank(0).failing_free(99);
        let coord = coordinator(substrate, driver);
        let mut bmc = FakeBmc::default();
        let (mut info, _) = coord.init(&FakeGroup::world(), &mut bmc);

        let status = coord.close(&mut info, &mut bmc).unwrap();
        assert_eq!(status.outcome(), Outcome::SensorError);
        assert_eq!(status.sensor_code(), 7);
        assert_eq!(status.group_code(), 0);
        assert_eq!(coord.substrate().frees(), 1);
        assert!(info.is_closed());
    }

    #[test]
    fn test_close_reports_free_failure() {
        let substrate = FakeSubstrate::new("h1").with_local_rank(0).failing_free(99);
        let coord = coordinator(substrate, FakeDriver::new());
        let mut bmc = FakeBmc::default();
        let (mut info, _) = coord.init(&FakeGroup::world(), &mut bmc);

        let status = coord.close(&mut info, &mut bmc).unwrap();
        assert_eq!(status.outcome(), Outcome::GroupError);
        assert_eq!(status.group_code(), 99);
        assert_eq!(coord.driver().calls(SensorOp::Close), 1);
    }

    #[test]
    fn test_close_non_leader_frees_only_subgroup() {
        let coord = coordinator(FakeSubstrate::new("h1").with_local_rank(1), FakeDriver::new());
        let mut bmc = FakeBmc::default();
        let (mut info, _) = coord.init(&FakeGroup::world(), &mut bmc);

        let status = coord.close(&mut info, &mut bmc).unwrap();
        assert!(status.is_not_leader());
        assert_eq!(coord.substrate().frees(), 1);
        assert_eq!(coord.driver().total_calls(), 0);
        assert!(info.is_closed());
    }
}
