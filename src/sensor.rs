//! Sensor driver boundary
//!
//! The node-level energy sensor is reached through a vendor driver that
//! speaks to the board management controller. This module only describes
//! the calls the coordinator forwards; sampling cadence, buffer layout and
//! transport are the driver's business.
//!
//! # Buffer ownership
//!
//! [`SensorDriver::read_global`] and [`SensorDriver::read_stats`] fill
//! caller-supplied readings whose storage is allocated by the driver. Each
//! successful read must be matched by [`SensorDriver::free_global`] or
//! [`SensorDriver::free_stats`] before the reading is reused and before the
//! sensor is closed. Nothing in this crate frees them implicitly; skipping
//! the free leaks driver memory.

use std::fmt;

/// Driver status code meaning success
pub const SENSOR_OK: i32 = 0;

/// Driver operations forwarded by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorOp {
    /// Open the connection to the management controller
    Init,
    /// Close the connection
    Close,
    /// Start recording
    Start,
    /// Stop recording
    Stop,
    /// Query the sensor state
    CheckStatus,
    /// Fetch the recorded global reading
    ReadGlobal,
    /// Fetch the recorded statistics
    ReadStats,
    /// Release a global reading
    FreeGlobal,
    /// Release a stats reading
    FreeStats,
    /// Drop all data recorded on the sensor
    Clear,
}

impl SensorOp {
    /// All operations, in lifecycle order
    pub const ALL: [SensorOp; 10] = [
        SensorOp::Init,
        SensorOp::Close,
        SensorOp::Start,
        SensorOp::Stop,
        SensorOp::CheckStatus,
        SensorOp::ReadGlobal,
        SensorOp::ReadStats,
        SensorOp::FreeGlobal,
        SensorOp::FreeStats,
        SensorOp::Clear,
    ];

    /// Short lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            SensorOp::Init => "init",
            SensorOp::Close => "close",
            SensorOp::Start => "start",
            SensorOp::Stop => "stop",
            SensorOp::CheckStatus => "check_status",
            SensorOp::ReadGlobal => "read_global",
            SensorOp::ReadStats => "read_stats",
            SensorOp::FreeGlobal => "free_global",
            SensorOp::FreeStats => "free_stats",
            SensorOp::Clear => "clear",
        }
    }
}

impl fmt::Display for SensorOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The per-node energy sensor driver
///
/// Every method returns the driver's raw status code, [`SENSOR_OK`] on
/// success. Implementations wrap the vendor library; only the elected node
/// leader ever calls into it.
pub trait SensorDriver {
    /// Connection data for one sensor (controller address, credentials,
    /// sensor names filled in by `init`)
    type Handle;
    /// Sensor state filled by `check_status`
    type Status: Default;
    /// Global reading filled by `read_global`
    type GlobalReading: Default;
    /// Statistics filled by `read_stats`
    type StatsReading: Default;

    /// Open the sensor
    fn init(&self, handle: &mut Self::Handle) -> i32;

    /// Close the sensor
    fn close(&self, handle: &mut Self::Handle) -> i32;

    /// Start recording
    fn start(&self, handle: &mut Self::Handle) -> i32;

    /// Stop recording
    fn stop(&self, handle: &mut Self::Handle) -> i32;

    /// Query the sensor state into `status`
    fn check_status(&self, handle: &mut Self::Handle, status: &mut Self::Status) -> i32;

    /// Fetch the global reading into driver-allocated storage
    fn read_global(&self, handle: &mut Self::Handle, reading: &mut Self::GlobalReading) -> i32;

    /// Fetch statistics into driver-allocated storage
    fn read_stats(&self, handle: &mut Self::Handle, reading: &mut Self::StatsReading) -> i32;

    /// Release storage allocated by `read_global`
    fn free_global(&self, reading: &mut Self::GlobalReading) -> i32;

    /// Release storage allocated by `read_stats`
    fn free_stats(&self, reading: &mut Self::StatsReading) -> i32;

    /// Drop everything recorded on the sensor so far
    fn clear(&self, handle: &mut Self::Handle) -> i32;
}
