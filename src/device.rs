//! Common device state machine shared by stations, conveyors, AGVs and storage.

use crate::environment::Environment;
use crate::events::EventKind;
use crate::fault_system::FaultType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

const NOMINAL_TEMPERATURE_C: f64 = 25.0;
const NOMINAL_VIBRATION_MM_S: f64 = 0.5;
const NOMINAL_POWER_KW: f64 = 1.5;
const MIN_EFFICIENCY_RATE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Station,
    Agv,
    Conveyor,
    RawMaterial,
    Warehouse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Idle,
    Processing,
    Moving,
    Interacting,
    Charging,
    Maintenance,
    Blocked,
    Fault,
    Frozen,
}

impl DeviceStatus {
    pub fn can_operate(self) -> bool {
        !matches!(
            self,
            DeviceStatus::Fault | DeviceStatus::Maintenance | DeviceStatus::Blocked | DeviceStatus::Frozen
        )
    }

    /// Halted by the fault subsystem. Unlike `can_operate`, a blocked device is not halted.
    pub fn is_halted(self) -> bool {
        matches!(self, DeviceStatus::Fault | DeviceStatus::Maintenance | DeviceStatus::Frozen)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceStatus::Idle => "idle",
            DeviceStatus::Processing => "processing",
            DeviceStatus::Moving => "moving",
            DeviceStatus::Interacting => "interacting",
            DeviceStatus::Charging => "charging",
            DeviceStatus::Maintenance => "maintenance",
            DeviceStatus::Blocked => "blocked",
            DeviceStatus::Fault => "fault",
            DeviceStatus::Frozen => "frozen",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub temperature_c: f64,
    pub vibration_mm_s: f64,
    pub efficiency_rate: f64,
    pub power_kw: f64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            temperature_c: NOMINAL_TEMPERATURE_C,
            vibration_mm_s: NOMINAL_VIBRATION_MM_S,
            efficiency_rate: 1.0,
            power_kw: NOMINAL_POWER_KW,
        }
    }
}

/// A fault signalled while the device could not take it yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFault {
    pub fault_type: FaultType,
    pub symptom: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultApplication {
    Applied,
    Deferred,
}

#[derive(Debug, Default)]
struct CoreState {
    symptom: Option<String>,
    telemetry: Telemetry,
    pending_fault: Option<PendingFault>,
}

/// Identity, status channel and fault-facing state of one device.
///
/// Status only changes through [`DeviceCore::set_status`], which publishes the transition.
#[derive(Debug)]
pub struct DeviceCore {
    id: String,
    kind: DeviceKind,
    env: Environment,
    status: watch::Sender<DeviceStatus>,
    state: Mutex<CoreState>,
}

impl DeviceCore {
    pub fn new(env: &Environment, id: impl Into<String>, kind: DeviceKind) -> Self {
        let (status, _) = watch::channel(DeviceStatus::Idle);
        Self {
            id: id.into(),
            kind,
            env: env.clone(),
            status,
            state: Mutex::new(CoreState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn status(&self) -> DeviceStatus {
        *self.status.borrow()
    }

    pub fn can_operate(&self) -> bool {
        self.status().can_operate()
    }

    /// Returns `false` when the status was already `new`.
    pub fn set_status(&self, new: DeviceStatus) -> bool {
        let mut previous = new;
        let changed = self.status.send_if_modified(|current| {
            if *current == new {
                return false;
            }
            previous = *current;
            *current = new;
            true
        });
        if changed {
            debug!(device = %self.id, from = %previous, to = %new, "status change");
            self.env.publish(EventKind::StatusChanged { device: self.id.clone(), from: previous, to: new });
        }
        changed
    }

    /// Sets `to` only while the device is still in `from`.
    pub fn transition(&self, from: DeviceStatus, to: DeviceStatus) -> bool {
        if self.status() != from {
            return false;
        }
        self.set_status(to)
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceStatus> {
        self.status.subscribe()
    }

    /// Suspends until `predicate` holds for the current status.
    pub async fn wait_for_status(&self, predicate: impl FnMut(&DeviceStatus) -> bool) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail while we borrow it.
        let _ = rx.wait_for(predicate).await;
    }

    pub async fn wait_operable(&self) {
        self.wait_for_status(|s| s.can_operate()).await;
    }

    pub async fn wait_not_halted(&self) {
        self.wait_for_status(|s| !s.is_halted()).await;
    }

    /// Resolves when an interruption lands: the status leaves the operable set.
    pub async fn interrupted(&self) {
        self.wait_for_status(|s| !s.can_operate()).await;
    }

    pub fn symptom(&self) -> Option<String> {
        self.state().symptom.clone()
    }

    pub fn telemetry(&self) -> Telemetry {
        self.state().telemetry
    }

    pub fn efficiency_rate(&self) -> f64 {
        self.state().telemetry.efficiency_rate.max(MIN_EFFICIENCY_RATE)
    }

    pub fn degrade_efficiency(&self, factor: f64) -> f64 {
        let mut state = self.state();
        let rate = (state.telemetry.efficiency_rate * factor).clamp(MIN_EFFICIENCY_RATE, 1.0);
        state.telemetry.efficiency_rate = rate;
        rate
    }

    /// Marks the device faulted: symptom visible, telemetry anomalous, status FAULT.
    pub fn enter_fault(&self, fault_type: FaultType, symptom: &str) {
        {
            let mut state = self.state();
            state.symptom = Some(symptom.to_string());
            fault_type.apply_anomaly(&mut state.telemetry);
        }
        self.set_status(DeviceStatus::Fault);
    }

    /// Queues a fault for later. Only the first pending fault is kept.
    pub fn queue_pending_fault(&self, pending: PendingFault) -> bool {
        let mut state = self.state();
        if state.pending_fault.is_some() {
            debug!(device = %self.id, "pending fault already queued, discarding");
            return false;
        }
        state.pending_fault = Some(pending);
        true
    }

    pub fn take_pending_fault(&self) -> Option<PendingFault> {
        self.state().pending_fault.take()
    }

    pub fn has_pending_fault(&self) -> bool {
        self.state().pending_fault.is_some()
    }

    /// Clears symptom, pending fault and telemetry anomalies without touching the status.
    pub fn clear_fault_state(&self) {
        let mut state = self.state();
        state.symptom = None;
        state.pending_fault = None;
        state.telemetry = Telemetry::default();
    }

    pub fn recover(&self) {
        self.clear_fault_state();
        self.set_status(DeviceStatus::Idle);
    }
}

/// Seam between the fault subsystem and concrete devices.
pub trait Device: Send + Sync {
    fn core(&self) -> &DeviceCore;

    fn id(&self) -> &str {
        self.core().id()
    }

    fn kind(&self) -> DeviceKind {
        self.core().kind()
    }

    fn status(&self) -> DeviceStatus {
        self.core().status()
    }

    fn can_operate(&self) -> bool {
        self.core().can_operate()
    }

    fn buffer_level(&self) -> Option<usize> {
        None
    }

    fn apply_fault(&self, fault_type: FaultType, symptom: &str) -> FaultApplication {
        self.core().enter_fault(fault_type, symptom);
        FaultApplication::Applied
    }

    fn enter_lock(&self, status: DeviceStatus) {
        self.core().take_pending_fault();
        self.core().set_status(status);
    }

    /// Lock expired without resolving the fault.
    fn release_lock(&self) {
        self.core().set_status(DeviceStatus::Fault);
    }

    fn recover(&self) {
        self.core().recover();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn test_can_operate_table() {
        let operable = [
            DeviceStatus::Idle,
            DeviceStatus::Processing,
            DeviceStatus::Moving,
            DeviceStatus::Interacting,
            DeviceStatus::Charging,
        ];
        let inoperable = [
            DeviceStatus::Fault,
            DeviceStatus::Maintenance,
            DeviceStatus::Blocked,
            DeviceStatus::Frozen,
        ];
        assert!(operable.iter().all(|s| s.can_operate()));
        assert!(inoperable.iter().all(|s| !s.can_operate()));
        assert!(!DeviceStatus::Blocked.is_halted());
    }

    #[tokio::test]
    async fn test_set_status_is_noop_when_unchanged() {
        let env = Environment::new();
        let mut events = env.subscribe();
        let core = DeviceCore::new(&env, "StationA", DeviceKind::Station);

        assert!(!core.set_status(DeviceStatus::Idle));
        assert!(core.set_status(DeviceStatus::Processing));
        assert!(!core.set_status(DeviceStatus::Processing));

        let event = events.try_recv().unwrap();
        assert_eq!(
            event.kind,
            EventKind::StatusChanged {
                device: "StationA".to_string(),
                from: DeviceStatus::Idle,
                to: DeviceStatus::Processing,
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_only_first_pending_fault_is_kept() {
        let env = Environment::new();
        let core = DeviceCore::new(&env, "AGV_1", DeviceKind::Agv);
        let first = PendingFault { fault_type: FaultType::AgvPathBlocked, symptom: "first".into() };
        let second = PendingFault { fault_type: FaultType::AgvBatteryDrain, symptom: "second".into() };
        assert!(core.queue_pending_fault(first.clone()));
        assert!(!core.queue_pending_fault(second));
        assert_eq!(core.take_pending_fault(), Some(first));
        assert!(!core.has_pending_fault());
    }

    #[tokio::test]
    async fn test_fault_and_recover_restore_telemetry() {
        let env = Environment::new();
        let core = DeviceCore::new(&env, "StationA", DeviceKind::Station);
        core.enter_fault(FaultType::StationVibration, "spindle vibration");
        assert_eq!(core.status(), DeviceStatus::Fault);
        assert_eq!(core.symptom().as_deref(), Some("spindle vibration"));
        assert!(core.telemetry().vibration_mm_s > NOMINAL_VIBRATION_MM_S);

        core.recover();
        assert_eq!(core.status(), DeviceStatus::Idle);
        assert!(core.symptom().is_none());
        assert_eq!(core.telemetry(), Telemetry::default());
    }

    #[test]
    fn test_coordinate_distance() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(3.0, 4.0);
        assert_eq!(a.distance_to(&b), 5.0);
    }
}
