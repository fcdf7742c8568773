use crate::device::DeviceStatus;
use thiserror::Error;

/// Result of a public device operation.
///
/// `Ok(message)` corresponds to a `(true, message)` reply for the command layer and
/// `Err(error)` to `(false, error.to_string())`.
pub type OpResult = Result<String, SimError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("unknown path point {0}")]
    UnknownPoint(String),

    #[error("device {device} has no {slot} buffer")]
    UnknownSlot { device: String, slot: String },

    #[error("item {item} not found in {device}")]
    ItemNotFound { device: String, item: String },

    #[error("item {item} is currently being processed by {device}")]
    ItemInProcess { device: String, item: String },

    #[error("{0} buffer is empty")]
    BufferEmpty(String),

    #[error("{0} payload is full")]
    PayloadFull(String),

    #[error("{0} has no free capacity")]
    TargetFull(String),

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("device {device} unavailable ({status})")]
    DeviceUnavailable { device: String, status: DeviceStatus },

    #[error("{device} battery {battery:.1}% insufficient (needs {required:.1}%), emergency charging started")]
    InsufficientBattery { device: String, battery: f64, required: f64 },

    #[error("{device} interrupted during {operation}")]
    Interrupted { device: String, operation: &'static str },

    #[error("{0} is locked under repair")]
    UnderRepair(String),

    #[error("{0} has no active fault")]
    NoActiveFault(String),

    #[error("fault on {0} has not taken effect yet")]
    FaultPending(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// The literal `(success, message)` pair handed to the command layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl From<OpResult> for OperationOutcome {
    fn from(result: OpResult) -> Self {
        match result {
            Ok(message) => Self { success: true, message },
            Err(error) => Self { success: false, message: error.to_string() },
        }
    }
}
