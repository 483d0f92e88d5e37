//! Single-process fakes for unit tests

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::group::{GroupSubstrate, NodeKey};
use crate::sensor::{SensorDriver, SensorOp, SENSOR_OK};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeGroup {
    key: Option<NodeKey>,
}

impl FakeGroup {
    pub fn world() -> Self {
        Self { key: None }
    }
}

/// Substrate for a single process with a scripted local rank
#[derive(Debug)]
pub struct FakeSubstrate {
    identity: String,
    local_rank: i32,
    identity_error: Option<i32>,
    split_error: Option<i32>,
    local_rank_error: Option<i32>,
    free_error: Option<i32>,
    split_keys: RefCell<Vec<NodeKey>>,
    frees: Cell<usize>,
}

impl FakeSubstrate {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            local_rank: 0,
            identity_error: None,
            split_error: None,
            local_rank_error: None,
            free_error: None,
            split_keys: RefCell::new(Vec::new()),
            frees: Cell::new(0),
        }
    }

    pub fn with_local_rank(mut self, rank: i32) -> Self {
        self.local_rank = rank;
        self
    }

    pub fn failing_identity(mut self, code: i32) -> Self {
        self.identity_error = Some(code);
        self
    }

    pub fn failing_split(mut self, code: i32) -> Self {
        self.split_error = Some(code);
        self
    }

    pub fn failing_local_rank(mut self, code: i32) -> Self {
        self.local_rank_error = Some(code);
        self
    }

    pub fn failing_free(mut self, code: i32) -> Self {
        self.free_error = Some(code);
        self
    }

    pub fn splits(&self) -> usize {
        self.split_keys.borrow().len()
    }

    pub fn split_keys(&self) -> Vec<NodeKey> {
        self.split_keys.borrow().clone()
    }

    pub fn frees(&self) -> usize {
        self.frees.get()
    }
}

impl GroupSubstrate for FakeSubstrate {
    type Group = FakeGroup;

    fn processor_identity(&self) -> Result<String, i32> {
        match self.identity_error {
            Some(code) => Err(code),
            None => Ok(self.identity.clone()),
        }
    }

    fn rank_in(&self, group: &FakeGroup) -> Result<i32, i32> {
        match (group.key, self.local_rank_error) {
            (None, _) => Ok(0),
            (Some(_), Some(code)) => Err(code),
            (Some(_), None) => Ok(self.local_rank),
        }
    }

    fn split(
        &self,
        _group: &FakeGroup,
        key: NodeKey,
        _preferred_rank: i32,
    ) -> Result<FakeGroup, i32> {
        if let Some(code) = self.split_error {
            return Err(code);
        }
        self.split_keys.borrow_mut().push(key);
        Ok(FakeGroup { key: Some(key) })
    }

    fn free(&self, _group: FakeGroup) -> Result<(), i32> {
        self.frees.set(self.frees.get() + 1);
        match self.free_error {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeBmc {
    pub open: bool,
    pub recording: bool,
}

#[derive(Debug, Default)]
pub struct FakeReading {
    pub allocated: bool,
}

/// Driver returning scripted codes and counting calls
#[derive(Debug, Default)]
pub struct FakeDriver {
    codes: HashMap<SensorOp, i32>,
    calls: RefCell<HashMap<SensorOp, usize>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, op: SensorOp, code: i32) -> Self {
        self.codes.insert(op, code);
        self
    }

    pub fn calls(&self, op: SensorOp) -> usize {
        self.calls.borrow().get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.borrow().values().sum()
    }

    fn record(&self, op: SensorOp) -> i32 {
        *self.calls.borrow_mut().entry(op).or_insert(0) += 1;
        self.codes.get(&op).copied().unwrap_or(SENSOR_OK)
    }
}

impl SensorDriver for FakeDriver {
    type Handle = FakeBmc;
    type Status = bool;
    type GlobalReading = FakeReading;
    type StatsReading = FakeReading;

    fn init(&self, handle: &mut FakeBmc) -> i32 {
        let code = self.record(SensorOp::Init);
        handle.open = code == SENSOR_OK;
        code
    }

    fn close(&self, handle: &mut FakeBmc) -> i32 {
        handle.open = false;
        self.record(SensorOp::Close)
    }

    fn start(&self, handle: &mut FakeBmc) -> i32 {
        handle.recording = true;
        self.record(SensorOp::Start)
    }

    fn stop(&self, handle: &mut FakeBmc) -> i32 {
        handle.recording = false;
        self.record(SensorOp::Stop)
    }

    fn check_status(&self, handle: &mut FakeBmc, status: &mut bool) -> i32 {
        *status = handle.recording;
        self.record(SensorOp::CheckStatus)
    }

    fn read_global(&self, _handle: &mut FakeBmc, reading: &mut FakeReading) -> i32 {
        reading.allocated = true;
        self.record(SensorOp::ReadGlobal)
    }

    fn read_stats(&self, _handle: &mut FakeBmc, reading: &mut FakeReading) -> i32 {
        reading.allocated = true;
        self.record(SensorOp::ReadStats)
    }

    fn free_global(&self, reading: &mut FakeReading) -> i32 {
        reading.allocated = false;
        self.record(SensorOp::FreeGlobal)
    }

    fn free_stats(&self, reading: &mut FakeReading) -> i32 {
        reading.allocated = false;
        self.record(SensorOp::FreeStats)
    }

    fn clear(&self, _handle: &mut FakeBmc) -> i32 {
        self.record(SensorOp::Clear)
    }
}
