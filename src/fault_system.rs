//! Fault injection and diagnosis.
//!
//! Per device: `no fault -> FAULT -> (locked) -> no fault`. A fault is cleared by whichever
//! of its repair-completion timer or its auto-recovery timer fires first; the later one finds
//! nothing to clear and does nothing.

use crate::config::FaultSystemConfig;
use crate::device::{Device, DeviceKind, DeviceStatus, FaultApplication, Telemetry};
use crate::environment::{secs, Environment};
use crate::error::SimError;
use crate::events::EventKind;
use heapless::Vec as BoundedVec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MAX_FAULT_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    StationVibration,
    PrecisionDegradation,
    EfficiencyAnomaly,
    ConveyorJam,
    AgvPathBlocked,
    AgvBatteryDrain,
}

impl FaultType {
    /// Device kind this fault can strike.
    pub fn target_kind(self) -> DeviceKind {
        match self {
            FaultType::StationVibration | FaultType::PrecisionDegradation | FaultType::EfficiencyAnomaly => {
                DeviceKind::Station
            }
            FaultType::ConveyorJam => DeviceKind::Conveyor,
            FaultType::AgvPathBlocked | FaultType::AgvBatteryDrain => DeviceKind::Agv,
        }
    }

    /// Writes the observable telemetry signature of this fault.
    pub fn apply_anomaly(self, telemetry: &mut Telemetry) {
        match self {
            FaultType::StationVibration => telemetry.vibration_mm_s = 8.5,
            FaultType::PrecisionDegradation => telemetry.temperature_c += 18.0,
            FaultType::EfficiencyAnomaly => telemetry.efficiency_rate = (telemetry.efficiency_rate * 0.6).max(0.1),
            FaultType::ConveyorJam | FaultType::AgvPathBlocked => telemetry.power_kw = 0.0,
            FaultType::AgvBatteryDrain => telemetry.power_kw *= 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultDefinition {
    pub symptom: String,
    pub root_causes: Vec<String>,
    /// Correct command per root cause, index-aligned with `root_causes`.
    pub repair_commands: Vec<String>,
    pub repair_times: Vec<f64>,
    pub penalty_multiplier: f64,
    /// Kinds of related devices affected by a wrong diagnosis.
    pub related_devices: Vec<DeviceKind>,
    pub secondary_faults: Vec<FaultType>,
}

impl FaultDefinition {
    pub fn validate(&self, fault_type: FaultType) -> Result<(), SimError> {
        let n = self.root_causes.len();
        if n == 0 || self.repair_commands.len() != n || self.repair_times.len() != n {
            return Err(SimError::Config(format!(
                "{fault_type:?}: root causes, repair commands and repair times must be non-empty and aligned"
            )));
        }
        Ok(())
    }
}

fn definition(
    symptom: &str,
    causes: [(&str, &str, f64); 2],
    penalty_multiplier: f64,
    related_devices: &[DeviceKind],
    secondary_faults: &[FaultType],
) -> FaultDefinition {
    FaultDefinition {
        symptom: symptom.to_string(),
        root_causes: causes.iter().map(|c| c.0.to_string()).collect(),
        repair_commands: causes.iter().map(|c| c.1.to_string()).collect(),
        repair_times: causes.iter().map(|c| c.2).collect(),
        penalty_multiplier,
        related_devices: related_devices.to_vec(),
        secondary_faults: secondary_faults.to_vec(),
    }
}

pub fn default_fault_definitions() -> HashMap<FaultType, FaultDefinition> {
    use DeviceKind::{Agv, Conveyor, Station};
    HashMap::from([
        (
            FaultType::StationVibration,
            definition(
                "abnormal spindle vibration",
                [("bearing_wear", "replace_bearing", 60.0), ("loose_bolts", "tighten_bolts", 30.0)],
                2.0,
                &[Station, Conveyor],
                &[FaultType::PrecisionDegradation],
            ),
        ),
        (
            FaultType::PrecisionDegradation,
            definition(
                "machining precision out of tolerance",
                [("tool_wear", "replace_tool", 45.0), ("calibration_drift", "recalibrate", 40.0)],
                1.5,
                &[Station],
                &[FaultType::EfficiencyAnomaly],
            ),
        ),
        (
            FaultType::EfficiencyAnomaly,
            definition(
                "processing slower than nominal",
                [("software_overheat", "reboot_device", 20.0), ("lubricant_shortage", "add_lubricant", 35.0)],
                1.5,
                &[Station, Conveyor],
                &[FaultType::StationVibration],
            ),
        ),
        (
            FaultType::ConveyorJam,
            definition(
                "conveyor belt stalled",
                [("belt_misalignment", "align_belt", 30.0), ("motor_overload", "reset_motor", 50.0)],
                2.0,
                &[Station],
                &[FaultType::EfficiencyAnomaly],
            ),
        ),
        (
            FaultType::AgvPathBlocked,
            definition(
                "AGV halted with obstacle warning",
                [("obstacle_on_path", "clear_path", 15.0), ("lidar_malfunction", "reboot_lidar", 40.0)],
                1.5,
                &[Agv],
                &[FaultType::AgvBatteryDrain],
            ),
        ),
        (
            FaultType::AgvBatteryDrain,
            definition(
                "battery draining abnormally fast",
                [("battery_aging", "replace_battery", 60.0), ("charger_fault", "repair_charger", 45.0)],
                2.0,
                &[Agv],
                &[FaultType::AgvPathBlocked],
            ),
        ),
    ])
}

/// Devices the fault system may act on, plus their physical coupling.
///
/// Holds shared handles; the production line owns the devices as well.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Arc<dyn Device>>,
    relationships: HashMap<String, Vec<String>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, device: Arc<dyn Device>) {
        self.devices.insert(device.id().to_string(), device);
    }

    pub fn relate(&mut self, device: &str, related: Vec<String>) {
        self.relationships.insert(device.to_string(), related);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Device>> {
        self.devices.get(id)
    }

    /// Sorted ids, so random picks are reproducible for a given seed.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn ids_of_kind(&self, kind: DeviceKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, d)| d.kind() == kind)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn related(&self, id: &str) -> Vec<String> {
        self.relationships
            .get(id)
            .map(|related| related.iter().filter(|r| self.devices.contains_key(*r)).cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.ids())
            .field("relationships", &self.relationships)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ActiveFault {
    id: u32,
    device_id: String,
    fault_type: FaultType,
    symptom: String,
    actual_root_cause: String,
    correct_repair_command: String,
    correct_repair_time: f64,
    start_time: f64,
}

/// What callers may see of an active fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveFaultView {
    pub fault_id: u32,
    pub device_id: String,
    pub fault_type: FaultType,
    pub symptom: String,
    pub start_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Repair,
    Penalty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RepairLock {
    id: u64,
    fault_id: u32,
    kind: LockKind,
    ends_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Repaired,
    AutoRecovered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub fault_id: u32,
    pub device_id: String,
    pub fault_type: FaultType,
    pub injected_at: f64,
    pub resolved_at: Option<f64>,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultStats {
    pub total_injected: u32,
    pub secondary_injected: u32,
    pub skipped_injections: u32,
    pub correct_diagnoses: u32,
    pub incorrect_diagnoses: u32,
    pub repaired: u32,
    pub auto_recovered: u32,
    pub skipped_repairs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectedFault {
    pub fault_id: u32,
    pub device_id: String,
    pub fault_type: FaultType,
    pub symptom: String,
    pub auto_recovery_s: f64,
    /// The device was moving; the fault lands on arrival.
    pub deferred: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub is_correct: bool,
    pub repair_time: f64,
    pub penalty_applied: f64,
    pub affected_devices: Vec<String>,
    pub can_skip: bool,
}

/// Read-only snapshot for the inspection command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedStatus {
    pub device_id: String,
    pub kind: DeviceKind,
    pub status: DeviceStatus,
    pub symptom: Option<String>,
    pub telemetry: Telemetry,
    pub buffer_level: Option<usize>,
    pub has_active_fault: bool,
    pub remaining_lock_s: f64,
}

#[derive(Debug, Default)]
struct FaultState {
    active_faults: HashMap<String, ActiveFault>,
    devices_under_repair: HashMap<String, RepairLock>,
    history: BoundedVec<FaultRecord, MAX_FAULT_HISTORY>,
    stats: FaultStats,
    next_fault_id: u32,
    next_lock_id: u64,
}

impl FaultState {
    fn record(&mut self, record: FaultRecord) {
        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(record);
    }

    fn mark_resolved(&mut self, fault_id: u32, at: f64, resolution: Resolution) {
        if let Some(record) = self.history.iter_mut().find(|r| r.fault_id == fault_id) {
            record.resolved_at = Some(at);
            record.resolution = Some(resolution);
        }
    }
}

#[derive(Debug)]
pub struct FaultSystem {
    env: Environment,
    config: FaultSystemConfig,
    registry: DeviceRegistry,
    state: Mutex<FaultState>,
}

impl FaultSystem {
    pub fn new(env: &Environment, config: FaultSystemConfig, registry: DeviceRegistry) -> Result<Arc<Self>, SimError> {
        for (fault_type, definition) in &config.definitions {
            definition.validate(*fault_type)?;
        }
        Ok(Arc::new(Self {
            env: env.clone(),
            config,
            registry,
            state: Mutex::new(FaultState { next_fault_id: 1, next_lock_id: 1, ..FaultState::default() }),
        }))
    }

    fn state(&self) -> MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Starts periodic injection at randomized intervals.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        self.env.spawn(async move {
            if !this.config.enabled {
                info!("fault injection disabled");
                return;
            }
            info!("fault injection started");
            loop {
                let wait = this
                    .env
                    .uniform(this.config.min_injection_interval_s, this.config.max_injection_interval_s);
                tokio::time::sleep(secs(wait)).await;
                this.inject_random_fault(None, None);
            }
        })
    }

    fn sorted_fault_types(&self) -> Vec<FaultType> {
        let mut types: Vec<FaultType> = self.config.definitions.keys().copied().collect();
        types.sort();
        types
    }

    fn pick<T: Clone>(&self, items: &[T]) -> Option<T> {
        self.env.pick_index(items.len()).map(|i| items[i].clone())
    }

    /// Injects one fault. Either argument may be fixed; the rest is drawn at random.
    ///
    /// Returns `None` when nothing was injected, including when the target already has an
    /// active fault or is under repair.
    pub fn inject_random_fault(
        self: &Arc<Self>,
        device: Option<&str>,
        fault_type: Option<FaultType>,
    ) -> Option<InjectedFault> {
        let (device_id, fault_type) = self.choose_target(device, fault_type)?;
        let definition = self.config.definitions.get(&fault_type)?;
        let target = Arc::clone(self.registry.get(&device_id)?);

        let cause = self.env.pick_index(definition.root_causes.len())?;
        let now = self.env.now();
        let fault_id = {
            let mut state = self.state();
            if state.active_faults.contains_key(&device_id) || state.devices_under_repair.contains_key(&device_id) {
                state.stats.skipped_injections += 1;
                debug!(device = %device_id, "already faulted or under repair, injection skipped");
                return None;
            }
            let fault_id = state.next_fault_id;
            state.next_fault_id = state.next_fault_id.wrapping_add(1);
            state.active_faults.insert(
                device_id.clone(),
                ActiveFault {
                    id: fault_id,
                    device_id: device_id.clone(),
                    fault_type,
                    symptom: definition.symptom.clone(),
                    actual_root_cause: definition.root_causes[cause].clone(),
                    correct_repair_command: definition.repair_commands[cause].clone(),
                    correct_repair_time: definition.repair_times[cause],
                    start_time: now,
                },
            );
            state.stats.total_injected += 1;
            state.record(FaultRecord {
                fault_id,
                device_id: device_id.clone(),
                fault_type,
                injected_at: now,
                resolved_at: None,
                resolution: None,
            });
            fault_id
        };

        let deferred = target.apply_fault(fault_type, &definition.symptom) == FaultApplication::Deferred;
        info!(device = %device_id, ?fault_type, symptom = %definition.symptom, deferred, "fault injected");
        self.env.publish(EventKind::FaultInjected {
            device: device_id.clone(),
            fault_type,
            symptom: definition.symptom.clone(),
        });

        let auto_recovery_s = self.env.uniform(self.config.min_auto_recovery_s, self.config.max_auto_recovery_s);
        let this = Arc::clone(self);
        let timer_device = device_id.clone();
        self.env.spawn(async move {
            tokio::time::sleep(secs(auto_recovery_s)).await;
            this.resolve_fault(&timer_device, fault_id, Resolution::AutoRecovered);
        });

        Some(InjectedFault {
            fault_id,
            device_id,
            fault_type,
            symptom: definition.symptom.clone(),
            auto_recovery_s,
            deferred,
        })
    }

    fn choose_target(&self, device: Option<&str>, fault_type: Option<FaultType>) -> Option<(String, FaultType)> {
        match (device, fault_type) {
            (Some(id), Some(fault_type)) => {
                let target = self.registry.get(id)?;
                if target.kind() != fault_type.target_kind() {
                    warn!(device = id, ?fault_type, "fault type does not apply to this device");
                    return None;
                }
                Some((id.to_string(), fault_type))
            }
            (Some(id), None) => {
                let kind = self.registry.get(id)?.kind();
                let candidates: Vec<FaultType> =
                    self.sorted_fault_types().into_iter().filter(|t| t.target_kind() == kind).collect();
                Some((id.to_string(), self.pick(&candidates)?))
            }
            (None, fault_type) => {
                let fault_type = match fault_type {
                    Some(t) => t,
                    None => self.pick(&self.sorted_fault_types())?,
                };
                let pool = self.registry.ids_of_kind(fault_type.target_kind());
                Some((self.pick(&pool)?, fault_type))
            }
        }
    }

    /// Compares `command` with the hidden correct repair for the device's active fault.
    pub fn handle_maintenance_request(self: &Arc<Self>, device: &str, command: &str) -> Result<DiagnosisResult, SimError> {
        let target = Arc::clone(self.registry.get(device).ok_or_else(|| SimError::DeviceNotFound(device.to_string()))?);
        let now = self.env.now();

        let (fault, lock, duration) = {
            let mut state = self.state();
            if state.devices_under_repair.contains_key(device) {
                return Err(SimError::UnderRepair(device.to_string()));
            }
            let fault = state
                .active_faults
                .get(device)
                .cloned()
                .ok_or_else(|| SimError::NoActiveFault(device.to_string()))?;
            // A fault deferred until arrival has not halted the vehicle yet.
            if target.core().has_pending_fault() {
                return Err(SimError::FaultPending(device.to_string()));
            }
            let correct = fault.correct_repair_command == command;
            let duration = if correct {
                fault.correct_repair_time
            } else {
                fault.correct_repair_time * self.penalty_multiplier(fault.fault_type)
            };
            let lock = RepairLock {
                id: state.next_lock_id,
                fault_id: fault.id,
                kind: if correct { LockKind::Repair } else { LockKind::Penalty },
                ends_at: now + duration,
            };
            state.next_lock_id += 1;
            state.devices_under_repair.insert(device.to_string(), lock);
            if correct {
                state.stats.correct_diagnoses += 1;
            } else {
                state.stats.incorrect_diagnoses += 1;
            }
            (fault, lock, duration)
        };

        let correct = lock.kind == LockKind::Repair;
        target.enter_lock(if correct { DeviceStatus::Maintenance } else { DeviceStatus::Frozen });
        self.env.kpi().record_diagnosis(device, correct, if correct { 0.0 } else { duration });
        self.env.publish(EventKind::DiagnosisReceived {
            device: device.to_string(),
            command: command.to_string(),
            correct,
        });

        let this = Arc::clone(self);
        let timer_device = device.to_string();
        self.env.spawn(async move {
            tokio::time::sleep(secs(duration)).await;
            this.finish_lock(&timer_device, lock.id);
        });

        if correct {
            info!(device, command, repair_time = duration, "correct diagnosis, repair started");
            return Ok(DiagnosisResult {
                is_correct: true,
                repair_time: duration,
                penalty_applied: 0.0,
                affected_devices: Vec::new(),
                can_skip: true,
            });
        }

        warn!(
            device,
            command,
            root_cause = %fault.actual_root_cause,
            penalty = duration,
            "incorrect diagnosis, penalty applied"
        );
        let affected_devices = self.apply_penalty_effects(&fault);
        Ok(DiagnosisResult {
            is_correct: false,
            repair_time: duration,
            penalty_applied: duration,
            affected_devices,
            can_skip: true,
        })
    }

    fn penalty_multiplier(&self, fault_type: FaultType) -> f64 {
        self.config.definitions.get(&fault_type).map_or(1.0, |d| d.penalty_multiplier)
    }

    /// Cascading effects of a wrong diagnosis: efficiency loss and a delayed secondary fault.
    fn apply_penalty_effects(self: &Arc<Self>, fault: &ActiveFault) -> Vec<String> {
        let Some(definition) = self.config.definitions.get(&fault.fault_type) else {
            return Vec::new();
        };
        let related: Vec<Arc<dyn Device>> = self
            .registry
            .related(&fault.device_id)
            .iter()
            .filter_map(|id| self.registry.get(id).cloned())
            .filter(|d| definition.related_devices.contains(&d.kind()))
            .collect();
        let mut affected = Vec::new();

        if !related.is_empty() && self.env.chance(self.config.efficiency_degradation_probability) {
            for device in &related {
                let rate = device.core().degrade_efficiency(self.config.efficiency_degradation_factor);
                info!(device = %device.id(), efficiency = rate, "efficiency degraded");
                affected.push(device.id().to_string());
            }
        }

        if self.env.chance(self.config.secondary_fault_probability) {
            let candidates: Vec<(String, FaultType)> = {
                let state = self.state();
                related
                    .iter()
                    .filter(|d| {
                        !state.active_faults.contains_key(d.id()) && !state.devices_under_repair.contains_key(d.id())
                    })
                    .filter_map(|d| {
                        definition
                            .secondary_faults
                            .iter()
                            .find(|t| t.target_kind() == d.kind())
                            .map(|t| (d.id().to_string(), *t))
                    })
                    .collect()
            };
            if let Some((device_id, secondary)) = self.pick(&candidates) {
                info!(device = %device_id, ?secondary, delay = self.config.secondary_fault_delay_s, "secondary fault scheduled");
                if !affected.contains(&device_id) {
                    affected.push(device_id.clone());
                }
                let this = Arc::clone(self);
                let delay = self.config.secondary_fault_delay_s;
                self.env.spawn(async move {
                    tokio::time::sleep(secs(delay)).await;
                    if this.inject_random_fault(Some(&device_id), Some(secondary)).is_some() {
                        this.state().stats.secondary_injected += 1;
                    }
                });
            }
        }
        affected
    }

    /// Repair-lock timer expiry. Stale timers (lock skipped or replaced) do nothing.
    fn finish_lock(&self, device: &str, lock_id: u64) {
        let lock = {
            let mut state = self.state();
            match state.devices_under_repair.get(device) {
                Some(lock) if lock.id == lock_id => state.devices_under_repair.remove(device),
                _ => None,
            }
        };
        if let Some(lock) = lock {
            self.end_lock(device, lock);
        }
    }

    fn end_lock(&self, device: &str, lock: RepairLock) {
        match lock.kind {
            LockKind::Repair => {
                self.resolve_fault(device, lock.fault_id, Resolution::Repaired);
            }
            LockKind::Penalty => {
                let still_faulted = self.state().active_faults.get(device).is_some_and(|f| f.id == lock.fault_id);
                if let (true, Some(target)) = (still_faulted, self.registry.get(device)) {
                    debug!(device, "penalty over, fault still awaiting a correct diagnosis");
                    target.release_lock();
                }
            }
        }
    }

    /// Clears fault `fault_id` if it is still active. Returns `false` when it was already gone.
    pub fn resolve_fault(&self, device: &str, fault_id: u32, resolution: Resolution) -> bool {
        let now = self.env.now();
        let fault = {
            let mut state = self.state();
            match state.active_faults.get(device) {
                Some(fault) if fault.id == fault_id => {}
                _ => return false,
            }
            let fault = state.active_faults.remove(device);
            state.devices_under_repair.remove(device);
            state.mark_resolved(fault_id, now, resolution);
            match resolution {
                Resolution::Repaired => state.stats.repaired += 1,
                Resolution::AutoRecovered => state.stats.auto_recovered += 1,
            }
            fault
        };
        let Some(fault) = fault else {
            return false;
        };

        if let Some(target) = self.registry.get(device) {
            target.recover();
        }
        let auto_recovered = resolution == Resolution::AutoRecovered;
        info!(device, fault_type = ?fault.fault_type, ?resolution, duration = now - fault.start_time, "fault cleared");
        self.env.kpi().record_fault_resolved(device, auto_recovered);
        self.env.publish(EventKind::FaultCleared {
            device: device.to_string(),
            fault_type: fault.fault_type,
            auto_recovered,
        });
        true
    }

    /// Drops the remaining repair wait. A penalty lock leaves the fault in place.
    pub fn skip_repair_time(&self, device: &str) -> bool {
        let lock = self.state().devices_under_repair.remove(device);
        let Some(lock) = lock else {
            return false;
        };
        self.state().stats.skipped_repairs += 1;
        info!(device, kind = ?lock.kind, "repair wait skipped");
        self.end_lock(device, lock);
        true
    }

    pub fn inspect_device(&self, device: &str) -> Result<DetailedStatus, SimError> {
        let target = self.registry.get(device).ok_or_else(|| SimError::DeviceNotFound(device.to_string()))?;
        let (has_active_fault, remaining_lock_s) = {
            let state = self.state();
            let remaining = state
                .devices_under_repair
                .get(device)
                .map_or(0.0, |lock| (lock.ends_at - self.env.now()).max(0.0));
            (state.active_faults.contains_key(device), remaining)
        };
        let core = target.core();
        Ok(DetailedStatus {
            device_id: device.to_string(),
            kind: target.kind(),
            status: target.status(),
            symptom: core.symptom(),
            telemetry: core.telemetry(),
            buffer_level: target.buffer_level(),
            has_active_fault,
            remaining_lock_s,
        })
    }

    pub fn get_available_devices(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub fn active_fault(&self, device: &str) -> Option<ActiveFaultView> {
        self.state().active_faults.get(device).map(|f| ActiveFaultView {
            fault_id: f.id,
            device_id: f.device_id.clone(),
            fault_type: f.fault_type,
            symptom: f.symptom.clone(),
            start_time: f.start_time,
        })
    }

    pub fn active_fault_count(&self) -> usize {
        self.state().active_faults.len()
    }

    pub fn is_under_repair(&self, device: &str) -> bool {
        self.state().devices_under_repair.contains_key(device)
    }

    pub fn stats(&self) -> FaultStats {
        self.state().stats.clone()
    }

    pub fn history(&self) -> Vec<FaultRecord> {
        self.state().history.iter().cloned().collect()
    }
}
