//! Hooks into the KPI collaborator.
//!
//! Scoring formulas live outside this crate; devices only report what happened.

use crate::product::Product;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeKind {
    Voluntary,
    Emergency,
}

pub trait KpiSink: Send + Sync {
    fn add_energy_cost(&self, _device: &str, _amount: f64) {}
    fn update_device_utilization(&self, _device: &str, _busy_time_s: f64) {}
    fn register_agv_charge(&self, _agv: &str, _kind: ChargeKind, _amount: f64) {}
    fn complete_order_item(&self, _product: &Product) {}
    fn record_scrap(&self, _product: &Product) {}
    fn record_diagnosis(&self, _device: &str, _correct: bool, _penalty_s: f64) {}
    fn record_fault_resolved(&self, _device: &str, _auto_recovered: bool) {}
}

/// Discards every report.
#[derive(Debug, Default)]
pub struct NoopKpi;

impl KpiSink for NoopKpi {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub energy_cost: f64,
    pub busy_time_s: HashMap<String, f64>,
    pub voluntary_charges: u32,
    pub emergency_charges: u32,
    pub completed_items: u32,
    pub scrapped_items: u32,
    pub correct_diagnoses: u32,
    pub incorrect_diagnoses: u32,
    pub total_penalty_s: f64,
    pub faults_repaired: u32,
    pub faults_auto_recovered: u32,
}

/// In-memory KPI counters.
#[derive(Debug, Default)]
pub struct KpiRecorder {
    inner: Mutex<KpiSnapshot>,
}

impl KpiRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> KpiSnapshot {
        self.with(|s| s.clone())
    }

    fn with<R>(&self, f: impl FnOnce(&mut KpiSnapshot) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

impl KpiSink for KpiRecorder {
    fn add_energy_cost(&self, _device: &str, amount: f64) {
        self.with(|s| s.energy_cost += amount);
    }

    fn update_device_utilization(&self, device: &str, busy_time_s: f64) {
        self.with(|s| *s.busy_time_s.entry(device.to_string()).or_default() += busy_time_s);
    }

    fn register_agv_charge(&self, _agv: &str, kind: ChargeKind, _amount: f64) {
        self.with(|s| match kind {
            ChargeKind::Voluntary => s.voluntary_charges += 1,
            ChargeKind::Emergency => s.emergency_charges += 1,
        });
    }

    fn complete_order_item(&self, _product: &Product) {
        self.with(|s| s.completed_items += 1);
    }

    fn record_scrap(&self, _product: &Product) {
        self.with(|s| s.scrapped_items += 1);
    }

    fn record_diagnosis(&self, _device: &str, correct: bool, penalty_s: f64) {
        self.with(|s| {
            if correct {
                s.correct_diagnoses += 1;
            } else {
                s.incorrect_diagnoses += 1;
                s.total_penalty_s += penalty_s;
            }
        });
    }

    fn record_fault_resolved(&self, _device: &str, auto_recovered: bool) {
        self.with(|s| {
            if auto_recovered {
                s.faults_auto_recovered += 1;
            } else {
                s.faults_repaired += 1;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::ProductType;

    #[test]
    fn test_recorder_counts_charges_separately() {
        let kpi = KpiRecorder::new();
        kpi.register_agv_charge("AGV_1", ChargeKind::Voluntary, 20.0);
        kpi.register_agv_charge("AGV_1", ChargeKind::Emergency, 60.0);
        kpi.register_agv_charge("AGV_2", ChargeKind::Emergency, 10.0);

        let snapshot = kpi.snapshot();
        assert_eq!(snapshot.voluntary_charges, 1);
        assert_eq!(snapshot.emergency_charges, 2);
    }

    #[test]
    fn test_recorder_accumulates_penalties_only_for_misses() {
        let kpi = KpiRecorder::new();
        kpi.record_diagnosis("StationA", true, 0.0);
        kpi.record_diagnosis("StationA", false, 90.0);
        kpi.complete_order_item(&Product::new("p-1", ProductType::P1));

        let snapshot = kpi.snapshot();
        assert_eq!(snapshot.correct_diagnoses, 1);
        assert_eq!(snapshot.incorrect_diagnoses, 1);
        assert_eq!(snapshot.total_penalty_s, 90.0);
        assert_eq!(snapshot.completed_items, 1);
    }
}
