//! Unified result of coordinator calls
//!
//! Every coordinator call reports one [`Outcome`] plus the raw code from
//! whichever failure domain produced it. The status is a plain value handed
//! back per call; there is no process-wide "last error".

use std::fmt;

use crate::error::{PhdeemError, Result};
use crate::group::GROUP_OK;
use crate::sensor::{SensorOp, SENSOR_OK};

/// Outcome of a coordinator call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The call completed; output buffers are valid
    Success,
    /// This process is not the node leader; nothing was forwarded
    NotLeader,
    /// The sensor driver reported a nonzero status
    SensorError,
    /// The group substrate reported a failure
    GroupError,
}

impl Outcome {
    /// Stable integer code (0 success, 1 not leader, 2 sensor, 3 group)
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::NotLeader => 1,
            Outcome::SensorError => 2,
            Outcome::GroupError => 3,
        }
    }

    /// Map an integer code, panicking on anything unknown
    ///
    /// An unknown code means the two sides disagree on the code table, which
    /// no caller can recover from.
    pub fn from_code_strict(code: i32) -> Self {
        match Self::try_from(code) {
            Ok(outcome) => outcome,
            Err(_) => panic!("phdeem: unrecognized outcome code {}", code),
        }
    }
}

impl TryFrom<i32> for Outcome {
    type Error = PhdeemError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Outcome::Success),
            1 => Ok(Outcome::NotLeader),
            2 => Ok(Outcome::SensorError),
            3 => Ok(Outcome::GroupError),
            other => Err(PhdeemError::UnknownOutcome(other)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "SUCCESS",
            Outcome::NotLeader => "NOT_LEADER",
            Outcome::SensorError => "SENSOR_ERROR",
            Outcome::GroupError => "GROUP_ERROR",
        };
        f.write_str(s)
    }
}

/// Result of one coordinator call
///
/// At most one of the two codes differs from its success value, and only
/// the domain that failed sets it. The other code is always neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnifiedStatus {
    outcome: Outcome,
    op: Option<SensorOp>,
    sensor_code: i32,
    group_code: i32,
}

impl UnifiedStatus {
    /// Successful call
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            op: None,
            sensor_code: SENSOR_OK,
            group_code: GROUP_OK,
        }
    }

    /// Caller is not the node leader
    pub fn not_leader() -> Self {
        Self {
            outcome: Outcome::NotLeader,
            ..Self::success()
        }
    }

    /// Map a raw driver code returned by `op`
    pub fn from_sensor(op: SensorOp, code: i32) -> Self {
        if code == SENSOR_OK {
            return Self {
                op: Some(op),
                ..Self::success()
            };
        }
        Self {
            outcome: Outcome::SensorError,
            op: Some(op),
            sensor_code: code,
            group_code: GROUP_OK,
        }
    }

    /// Substrate failure with its raw code
    pub fn group_error(code: i32) -> Self {
        Self {
            outcome: Outcome::GroupError,
            op: None,
            sensor_code: SENSOR_OK,
            group_code: code,
        }
    }

    /// Outcome of the call
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Driver operation that produced this status, if one was called
    pub fn op(&self) -> Option<SensorOp> {
        self.op
    }

    /// Raw driver code (`0` unless the outcome is `SensorError`)
    pub fn sensor_code(&self) -> i32 {
        self.sensor_code
    }

    /// Raw substrate code (`0` unless the outcome is `GroupError`)
    pub fn group_code(&self) -> i32 {
        self.group_code
    }

    /// The call completed
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// The caller is not the node leader
    pub fn is_not_leader(&self) -> bool {
        self.outcome == Outcome::NotLeader
    }

    /// Either collaborator reported a failure
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::SensorError | Outcome::GroupError)
    }

    /// Convert to a `Result`, treating `NotLeader` as success
    pub fn into_result(self) -> Result<()> {
        match self.outcome {
            Outcome::Success | Outcome::NotLeader => Ok(()),
            Outcome::SensorError => Err(PhdeemError::Sensor {
                op: self.op.unwrap_or(SensorOp::Init),
                code: self.sensor_code,
            }),
            Outcome::GroupError => Err(PhdeemError::Group {
                code: self.group_code,
            }),
        }
    }

    /// Keep `self` if it already failed, else take `next`
    pub(crate) fn or_first_failure(self, next: UnifiedStatus) -> Self {
        if self.is_failure() {
            self
        } else {
            next
        }
    }
}

impl fmt::Display for UnifiedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            Outcome::SensorError => {
                write!(f, "{} (sensor code {})", self.outcome, self.sensor_code)
            }
            Outcome::GroupError => write!(f, "{} (group code {})", self.outcome, self.group_code),
            _ => write!(f, "{}", self.outcome),
        }
    }
}
