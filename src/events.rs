use crate::device::{Coordinate, DeviceStatus};
use crate::fault_system::FaultType;
use serde::{Deserialize, Serialize};

/// Observable conditions that are not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Alert {
    /// `device` could not hand an item to `target` because `target` is full.
    BufferFull { device: String, target: String },
    /// Battery fell below the low-battery threshold.
    LowBattery { device: String, level: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    StatusChanged { device: String, from: DeviceStatus, to: DeviceStatus },
    PositionChanged { device: String, point: String, position: Coordinate },
    Alert(Alert),
    FaultInjected { device: String, fault_type: FaultType, symptom: String },
    FaultCleared { device: String, fault_type: FaultType, auto_recovered: bool },
    DiagnosisReceived { device: String, command: String, correct: bool },
    ItemCompleted { device: String, item: String },
}

/// Event published on the environment bus, stamped with simulation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub time_s: f64,
    pub kind: EventKind,
}

impl SimEvent {
    pub fn device(&self) -> &str {
        match &self.kind {
            EventKind::StatusChanged { device, .. }
            | EventKind::PositionChanged { device, .. }
            | EventKind::FaultInjected { device, .. }
            | EventKind::FaultCleared { device, .. }
            | EventKind::DiagnosisReceived { device, .. }
            | EventKind::ItemCompleted { device, .. } => device,
            EventKind::Alert(Alert::BufferFull { device, .. } | Alert::LowBattery { device, .. }) => device,
        }
    }
}
