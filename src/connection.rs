//! Stateful convenience wrapper
//!
//! [`Connection`] bundles a [`MeasurementCoordinator`] with the sensor
//! handle, the caller info and one buffer of each reading kind, so callers
//! don't have to thread them through every call.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut conn = Connection::new(MeasurementCoordinator::new(mpi, hdeem), bmc);
//! conn.init(&world)?;
//! conn.start()?;
//! if conn.read_global()?.is_success() {
//!     let reading = conn.global_reading();
//!     // ...
//!     conn.free_global()?;
//! }
//! conn.stop()?;
//! conn.close()?;
//! ```

use crate::coordinator::{CallerInfo, MeasurementCoordinator};
use crate::error::{BufferKind, PhdeemError, Result};
use crate::group::GroupSubstrate;
use crate::sensor::SensorDriver;
use crate::status::UnifiedStatus;

/// Coordinator plus the state it needs, owned in one place
pub struct Connection<S: GroupSubstrate, D: SensorDriver> {
    coordinator: MeasurementCoordinator<S, D>,
    handle: D::Handle,
    caller: Option<CallerInfo<S::Group>>,
    sensor_status: D::Status,
    global: D::GlobalReading,
    stats: D::StatsReading,
    global_held: bool,
    stats_held: bool,
    last_status: Option<UnifiedStatus>,
}

fn live<G>(caller: &Option<CallerInfo<G>>) -> Result<&CallerInfo<G>> {
    caller.as_ref().ok_or(PhdeemError::Uninitialized)
}

impl<S, D> Connection<S, D>
where
    S: GroupSubstrate,
    D: SensorDriver,
{
    /// Create an uninitialized connection
    pub fn new(coordinator: MeasurementCoordinator<S, D>, handle: D::Handle) -> Self {
        Self {
            coordinator,
            handle,
            caller: None,
            sensor_status: D::Status::default(),
            global: D::GlobalReading::default(),
            stats: D::StatsReading::default(),
            global_held: false,
            stats_held: false,
            last_status: None,
        }
    }

    /// Elect node leaders over `parent` and open the sensor on the leader
    ///
    /// Collective over `parent`. A connection can be initialized again
    /// once it has been closed.
    pub fn init(&mut self, parent: &S::Group) -> Result<UnifiedStatus> {
        if self.caller.as_ref().is_some_and(|c| !c.is_closed()) {
            return Err(PhdeemError::AlreadyInitialized);
        }
        let (caller, status) = self.coordinator.init(parent, &mut self.handle);
        self.caller = Some(caller);
        self.last_status = Some(status);
        Ok(status)
    }

    /// Close the sensor and release the node group
    ///
    /// Readings still held are freed first. Every release is attempted and
    /// the first failure is reported.
    pub fn close(&mut self) -> Result<UnifiedStatus> {
        let mut released = UnifiedStatus::success();
        if self.global_held {
            released = self.free_global()?;
        }
        if self.stats_held {
            released = released.or_first_failure(self.free_stats()?);
        }

        let caller = self.caller.as_mut().ok_or(PhdeemError::Uninitialized)?;
        let result = self
            .coordinator
            .close(caller, &mut self.handle)
            .map(|status| released.or_first_failure(status));
        self.record(result)
    }

    /// Start recording
    pub fn start(&mut self) -> Result<UnifiedStatus> {
        let result = self.coordinator.start(live(&self.caller)?, &mut self.handle);
        self.record(result)
    }

    /// Stop recording
    pub fn stop(&mut self) -> Result<UnifiedStatus> {
        let result = self.coordinator.stop(live(&self.caller)?, &mut self.handle);
        self.record(result)
    }

    /// Refresh [`sensor_status`](Self::sensor_status)
    pub fn check_status(&mut self) -> Result<UnifiedStatus> {
        let result = self.coordinator.check_status(
            live(&self.caller)?,
            &mut self.handle,
            &mut self.sensor_status,
        );
        self.record(result)
    }

    /// Drop all data recorded on the sensor
    pub fn clear(&mut self) -> Result<UnifiedStatus> {
        let result = self.coordinator.clear(live(&self.caller)?, &mut self.handle);
        self.record(result)
    }

    /// Fetch the global reading into the connection's buffer
    ///
    /// Fails with [`PhdeemError::BufferInUse`] if the previous reading was
    /// not freed; the held reading is left untouched.
    pub fn read_global(&mut self) -> Result<UnifiedStatus> {
        if self.global_held {
            return Err(PhdeemError::BufferInUse(BufferKind::Global));
        }
        let result =
            self.coordinator
                .read_global(live(&self.caller)?, &mut self.handle, &mut self.global);
        if matches!(result, Ok(status) if status.is_success()) {
            self.global_held = true;
        }
        self.record(result)
    }

    /// Fetch statistics into the connection's buffer
    pub fn read_stats(&mut self) -> Result<UnifiedStatus> {
        if self.stats_held {
            return Err(PhdeemError::BufferInUse(BufferKind::Stats));
        }
        let result =
            self.coordinator
                .read_stats(live(&self.caller)?, &mut self.handle, &mut self.stats);
        if matches!(result, Ok(status) if status.is_success()) {
            self.stats_held = true;
        }
        self.record(result)
    }

    /// Release the held global reading
    ///
    /// The reading counts as released once the driver was asked, whatever
    /// code it returned. With nothing held the driver is not called.
    pub fn free_global(&mut self) -> Result<UnifiedStatus> {
        let caller = live(&self.caller)?;
        if !self.global_held && caller.is_leader() {
            return Ok(UnifiedStatus::success());
        }
        let result = self.coordinator.free_global_buffer(caller, &mut self.global);
        if result.is_ok() {
            self.global_held = false;
        }
        self.record(result)
    }

    /// Release the held stats reading
    pub fn free_stats(&mut self) -> Result<UnifiedStatus> {
        let caller = live(&self.caller)?;
        if !self.stats_held && caller.is_leader() {
            return Ok(UnifiedStatus::success());
        }
        let result = self.coordinator.free_stats_buffer(caller, &mut self.stats);
        if result.is_ok() {
            self.stats_held = false;
        }
        self.record(result)
    }

    /// Whether this process drives the node's sensor
    pub fn is_leader(&self) -> bool {
        self.caller.as_ref().is_some_and(|c| c.is_leader())
    }

    /// The caller info, once `init` ran
    pub fn caller(&self) -> Option<&CallerInfo<S::Group>> {
        self.caller.as_ref()
    }

    /// The wrapped coordinator
    pub fn coordinator(&self) -> &MeasurementCoordinator<S, D> {
        &self.coordinator
    }

    /// The sensor handle
    pub fn handle(&self) -> &D::Handle {
        &self.handle
    }

    /// Mutable sensor handle, for setting connection data before `init`
    pub fn handle_mut(&mut self) -> &mut D::Handle {
        &mut self.handle
    }

    /// Sensor state from the last `check_status`
    pub fn sensor_status(&self) -> &D::Status {
        &self.sensor_status
    }

    /// The held global reading, between `read_global` and `free_global`
    pub fn global_reading(&self) -> Option<&D::GlobalReading> {
        self.global_held.then_some(&self.global)
    }

    /// The held stats reading, between `read_stats` and `free_stats`
    pub fn stats_reading(&self) -> Option<&D::StatsReading> {
        self.stats_held.then_some(&self.stats)
    }

    /// Status of the last call that reached the coordinator
    pub fn last_status(&self) -> Option<UnifiedStatus> {
        self.last_status
    }

    fn record(&mut self, result: Result<UnifiedStatus>) -> Result<UnifiedStatus> {
        if let Ok(status) = result {
            self.last_status = Some(status);
        }
        result
    }
}
