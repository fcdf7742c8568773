//! Automated guided vehicle: movement, battery, payload and charging.

use crate::buffer::BoundedBuffer;
use crate::config::AgvConfig;
use crate::device::{Coordinate, Device, DeviceCore, DeviceKind, DeviceStatus, FaultApplication, PendingFault};
use crate::endpoint::{BufferSlot, Endpoint};
use crate::environment::{secs, Environment};
use crate::error::{OpResult, SimError};
use crate::events::{Alert, EventKind};
use crate::fault_system::FaultType;
use crate::kpi::ChargeKind;
use crate::product::Product;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MAX_BATTERY: f64 = 100.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgvStats {
    pub distance_m: f64,
    pub moves: u32,
    pub items_loaded: u32,
    pub items_unloaded: u32,
    pub voluntary_charges: u32,
    pub emergency_charges: u32,
    pub low_battery_alerts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgvStatus {
    pub id: String,
    pub status: DeviceStatus,
    pub point: String,
    pub position: Coordinate,
    pub battery_level: f64,
    pub payload: Vec<String>,
    pub payload_capacity: usize,
    pub symptom: Option<String>,
    pub stats: AgvStats,
}

#[derive(Debug)]
struct Motion {
    point: String,
    position: Coordinate,
    battery: f64,
}

#[derive(Debug)]
pub struct Agv {
    core: DeviceCore,
    config: AgvConfig,
    payload: BoundedBuffer,
    motion: Mutex<Motion>,
    stats: Mutex<AgvStats>,
    // Serializes operations on this vehicle.
    op_lock: tokio::sync::Mutex<()>,
}

impl Agv {
    pub fn new(env: &Environment, config: AgvConfig) -> Result<Arc<Self>, SimError> {
        config.validate()?;
        let position = config.path_points[&config.initial_point];
        Ok(Arc::new(Self {
            core: DeviceCore::new(env, config.id.clone(), DeviceKind::Agv),
            payload: BoundedBuffer::new(format!("{}.payload", config.id), config.payload_capacity),
            motion: Mutex::new(Motion {
                point: config.initial_point.clone(),
                position,
                battery: config.initial_battery.clamp(0.0, MAX_BATTERY),
            }),
            stats: Mutex::new(AgvStats::default()),
            op_lock: tokio::sync::Mutex::new(()),
            config,
        }))
    }

    fn motion(&self) -> MutexGuard<'_, Motion> {
        self.motion.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, AgvStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn position(&self) -> Coordinate {
        self.motion().position
    }

    pub fn current_point(&self) -> String {
        self.motion().point.clone()
    }

    pub fn battery_level(&self) -> f64 {
        self.motion().battery
    }

    pub fn payload(&self) -> &BoundedBuffer {
        &self.payload
    }

    pub fn stats_snapshot(&self) -> AgvStats {
        self.stats().clone()
    }

    pub fn config(&self) -> &AgvConfig {
        &self.config
    }

    pub fn get_detailed_status(&self) -> AgvStatus {
        let motion = self.motion();
        AgvStatus {
            id: self.core.id().to_string(),
            status: self.core.status(),
            point: motion.point.clone(),
            position: motion.position,
            battery_level: motion.battery,
            payload: self.payload.item_ids(),
            payload_capacity: self.payload.capacity(),
            symptom: self.core.symptom(),
            stats: self.stats().clone(),
        }
    }

    fn point(&self, name: &str) -> Result<Coordinate, SimError> {
        self.config
            .path_points
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownPoint(name.to_string()))
    }

    fn charging_position(&self) -> Coordinate {
        self.config.path_points[&self.config.charging_point]
    }

    /// Battery needed for an action ending at `end`: the action itself, the trip back to the
    /// charger and the safety margin.
    pub fn required_battery(&self, travel_m: f64, end: &Coordinate) -> f64 {
        let return_trip = end.distance_to(&self.charging_position());
        travel_m * self.config.battery_per_meter
            + self.config.battery_per_action
            + return_trip * self.config.battery_per_meter
            + self.config.safety_margin
    }

    pub fn can_complete_task(&self, travel_m: f64, end: &Coordinate) -> bool {
        self.required_battery(travel_m, end) <= self.battery_level()
    }

    fn ensure_operable(&self) -> Result<(), SimError> {
        if self.core.can_operate() {
            Ok(())
        } else {
            Err(SimError::DeviceUnavailable { device: self.core.id().to_string(), status: self.core.status() })
        }
    }

    /// Falls back to emergency charging when the task cannot be finished safely.
    async fn ensure_battery(&self, travel_m: f64, end: &Coordinate) -> Result<(), SimError> {
        let required = self.required_battery(travel_m, end);
        let battery = self.battery_level();
        if required <= battery {
            return Ok(());
        }
        warn!(agv = %self.core.id(), battery, required, "battery insufficient, emergency charging");
        if let Err(e) = self.charge(self.config.emergency_charge_target, ChargeKind::Emergency).await {
            warn!(agv = %self.core.id(), error = %e, "emergency charge did not complete");
        }
        Err(SimError::InsufficientBattery { device: self.core.id().to_string(), battery, required })
    }

    fn deduct_battery(&self, amount: f64) {
        let (before, after) = {
            let mut motion = self.motion();
            let before = motion.battery;
            motion.battery = (before - amount).max(0.0);
            (before, motion.battery)
        };
        let env = self.core.env();
        env.kpi().add_energy_cost(self.core.id(), before - after);
        let threshold = self.config.low_battery_threshold;
        if before >= threshold && after < threshold {
            self.stats().low_battery_alerts += 1;
            env.alert(Alert::LowBattery { device: self.core.id().to_string(), level: after });
        }
    }

    fn add_battery(&self, amount: f64) -> f64 {
        let mut motion = self.motion();
        motion.battery = (motion.battery + amount).min(MAX_BATTERY);
        motion.battery
    }

    pub async fn move_to(&self, point: &str) -> OpResult {
        let _op = self.op_lock.lock().await;
        self.ensure_operable()?;
        let target = self.point(point)?;
        let distance = self.position().distance_to(&target);
        self.ensure_battery(distance, &target).await?;
        self.travel(point, target).await
    }

    /// Drives to `point`. Faults signalled in transit are applied on arrival.
    async fn travel(&self, point: &str, target: Coordinate) -> OpResult {
        let distance = self.position().distance_to(&target);
        let duration = distance / self.config.speed_mps;
        self.core.set_status(DeviceStatus::Moving);
        debug!(agv = %self.core.id(), point, distance, duration, "moving");
        tokio::time::sleep(secs(duration)).await;

        {
            let mut motion = self.motion();
            motion.position = target;
            motion.point = point.to_string();
        }
        self.deduct_battery(distance * self.config.battery_per_meter + self.config.battery_per_action);
        {
            let mut stats = self.stats();
            stats.distance_m += distance;
            stats.moves += 1;
        }
        let env = self.core.env();
        env.kpi().update_device_utilization(self.core.id(), duration);
        env.publish(EventKind::PositionChanged {
            device: self.core.id().to_string(),
            point: point.to_string(),
            position: target,
        });

        if let Some(pending) = self.core.take_pending_fault() {
            info!(agv = %self.core.id(), point, fault = ?pending.fault_type, "applying fault deferred during move");
            self.core.enter_fault(pending.fault_type, &pending.symptom);
            return Ok(format!("arrived at {point}, fault applied on arrival"));
        }
        self.core.transition(DeviceStatus::Moving, DeviceStatus::Idle);
        Ok(format!("arrived at {point} ({distance:.1} m)"))
    }

    /// Suspends for the handling delay unless a fault interrupts it.
    async fn interact(&self, handling_s: f64, operation: &'static str) -> Result<(), SimError> {
        self.core.set_status(DeviceStatus::Interacting);
        tokio::select! {
            biased;
            () = self.core.interrupted() => {
                warn!(agv = %self.core.id(), operation, "interrupted");
                Err(SimError::Interrupted { device: self.core.id().to_string(), operation })
            }
            () = tokio::time::sleep(secs(handling_s)) => {
                self.core.env().kpi().update_device_utilization(self.core.id(), handling_s);
                Ok(())
            }
        }
    }

    fn ensure_target_available(&self, target: &Endpoint) -> Result<(), SimError> {
        let status = target.device().status();
        if status.is_halted() {
            return Err(SimError::DeviceUnavailable { device: target.id().to_string(), status });
        }
        Ok(())
    }

    pub async fn load_from(&self, source: &Endpoint, slot: Option<BufferSlot>, item_id: Option<&str>) -> OpResult {
        let _op = self.op_lock.lock().await;
        self.ensure_operable()?;
        if self.payload.is_full() {
            return Err(SimError::PayloadFull(self.core.id().to_string()));
        }
        self.ensure_target_available(source)?;
        if source.is_empty(slot)? {
            return Err(SimError::BufferEmpty(source.id().to_string()));
        }
        let here = self.position();
        self.ensure_battery(0.0, &here).await?;

        self.interact(source.handling_time_s(), "load").await?;
        let item = match source.pop(slot, item_id) {
            Ok(item) => item,
            Err(e) => {
                self.core.transition(DeviceStatus::Interacting, DeviceStatus::Idle);
                return Err(e);
            }
        };
        let item_id = item.id.clone();
        if let Err(back) = self.payload.try_push(item) {
            self.return_to_source(source, slot, back);
            self.core.transition(DeviceStatus::Interacting, DeviceStatus::Idle);
            return Err(SimError::PayloadFull(self.core.id().to_string()));
        }

        self.deduct_battery(self.config.battery_per_action);
        self.stats().items_loaded += 1;
        self.core.transition(DeviceStatus::Interacting, DeviceStatus::Idle);
        info!(agv = %self.core.id(), source = %source.id(), item = %item_id, "loaded");
        Ok(format!("loaded {item_id} from {}", source.id()))
    }

    fn return_to_source(&self, source: &Endpoint, slot: Option<BufferSlot>, item: Product) {
        if let Err((back, e)) = source.push(slot, item) {
            // The slot was freed a moment ago; keep the item on board rather than lose it.
            warn!(agv = %self.core.id(), error = %e, "could not return item to source");
            self.payload.restore_front(back);
        }
    }

    pub async fn unload_to(&self, target: &Endpoint, slot: Option<BufferSlot>) -> OpResult {
        let _op = self.op_lock.lock().await;
        self.ensure_operable()?;
        if self.payload.is_empty() {
            return Err(SimError::BufferEmpty(self.payload.name().to_string()));
        }
        self.ensure_target_available(target)?;
        let here = self.position();
        self.ensure_battery(0.0, &here).await?;

        self.interact(target.handling_time_s(), "unload").await?;
        let Some(item) = self.payload.try_pop() else {
            self.core.transition(DeviceStatus::Interacting, DeviceStatus::Idle);
            return Err(SimError::BufferEmpty(self.payload.name().to_string()));
        };
        let item_id = item.id.clone();
        if let Err((back, e)) = target.push(slot, item) {
            self.payload.restore_front(back);
            self.core.transition(DeviceStatus::Interacting, DeviceStatus::Idle);
            return Err(e);
        }

        self.deduct_battery(self.config.battery_per_action);
        self.stats().items_unloaded += 1;
        self.core.transition(DeviceStatus::Interacting, DeviceStatus::Idle);
        info!(agv = %self.core.id(), target = %target.id(), item = %item_id, "unloaded");
        Ok(format!("unloaded {item_id} to {}", target.id()))
    }

    /// Caller-initiated charge up to `target` percent.
    pub async fn voluntary_charge(&self, target: f64) -> OpResult {
        self.charge_battery(target, ChargeKind::Voluntary).await
    }

    pub async fn emergency_charge(&self) -> OpResult {
        self.charge_battery(self.config.emergency_charge_target, ChargeKind::Emergency).await
    }

    pub async fn charge_battery(&self, target: f64, kind: ChargeKind) -> OpResult {
        let _op = self.op_lock.lock().await;
        self.ensure_operable()?;
        self.charge(target, kind).await
    }

    async fn charge(&self, target: f64, kind: ChargeKind) -> OpResult {
        let target = target.clamp(0.0, MAX_BATTERY);
        if self.battery_level() >= target {
            return Ok(format!("battery already at {:.1}%", self.battery_level()));
        }

        if self.current_point() != self.config.charging_point {
            let charger = self.charging_position();
            self.travel(&self.config.charging_point, charger).await?;
            if !self.core.can_operate() {
                return Err(SimError::Interrupted { device: self.core.id().to_string(), operation: "charge" });
            }
        }

        let start_level = self.battery_level();
        let needed_s = (target - start_level) / self.config.charging_rate;
        self.core.set_status(DeviceStatus::Charging);
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            () = self.core.interrupted() => {
                let partial = started.elapsed().as_secs_f64() * self.config.charging_rate;
                self.add_battery(partial);
                Err(SimError::Interrupted { device: self.core.id().to_string(), operation: "charge" })
            }
            () = tokio::time::sleep(secs(needed_s)) => {
                self.add_battery(target - start_level);
                Ok(())
            }
        };

        let gained = self.battery_level() - start_level;
        {
            let mut stats = self.stats();
            match kind {
                ChargeKind::Voluntary => stats.voluntary_charges += 1,
                ChargeKind::Emergency => stats.emergency_charges += 1,
            }
        }
        let env = self.core.env();
        env.kpi().register_agv_charge(self.core.id(), kind, gained);
        env.kpi().update_device_utilization(self.core.id(), started.elapsed().as_secs_f64());
        outcome?;

        self.core.transition(DeviceStatus::Charging, DeviceStatus::Idle);
        info!(agv = %self.core.id(), ?kind, level = self.battery_level(), "charged");
        Ok(format!("charged to {:.1}%", self.battery_level()))
    }
}

impl Device for Agv {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn buffer_level(&self) -> Option<usize> {
        Some(self.payload.len())
    }

    fn apply_fault(&self, fault_type: FaultType, symptom: &str) -> FaultApplication {
        if self.core.status() == DeviceStatus::Moving {
            self.core.queue_pending_fault(PendingFault { fault_type, symptom: symptom.to_string() });
            debug!(agv = %self.core.id(), ?fault_type, "fault deferred until arrival");
            return FaultApplication::Deferred;
        }
        self.core.enter_fault(fault_type, symptom);
        FaultApplication::Applied
    }

    fn recover(&self) {
        // A vehicle in transit keeps moving; it only sheds the fault it would have applied.
        if self.core.status() == DeviceStatus::Moving {
            self.core.clear_fault_state();
        } else {
            self.core.recover();
        }
    }
}
