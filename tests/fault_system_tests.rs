use cellsim::config::{ConveyorConfig, FaultSystemConfig, StationConfig};
use cellsim::device::DeviceKind;
use cellsim::events::EventKind;
use cellsim::fault_system::{DeviceRegistry, FaultDefinition, Resolution};
use cellsim::kpi::KpiRecorder;
use cellsim::{Conveyor, Device, DeviceStatus, Environment, FaultSystem, FaultType, SimError, Station};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const REPAIR_S: f64 = 60.0;

fn single_cause(symptom: &str, command: &str, secondary: FaultType) -> FaultDefinition {
    FaultDefinition {
        symptom: symptom.to_string(),
        root_causes: vec![format!("{command}_needed")],
        repair_commands: vec![command.to_string()],
        repair_times: vec![REPAIR_S],
        penalty_multiplier: 2.0,
        related_devices: vec![DeviceKind::Station],
        secondary_faults: vec![secondary],
    }
}

fn quiet_config() -> FaultSystemConfig {
    FaultSystemConfig {
        enabled: false,
        min_auto_recovery_s: 10_000.0,
        max_auto_recovery_s: 10_000.0,
        efficiency_degradation_probability: 0.0,
        secondary_fault_probability: 0.0,
        definitions: HashMap::from([
            (
                FaultType::StationVibration,
                single_cause("abnormal vibration", "replace_bearing", FaultType::PrecisionDegradation),
            ),
            (
                FaultType::PrecisionDegradation,
                single_cause("out of tolerance", "recalibrate", FaultType::StationVibration),
            ),
        ]),
        ..FaultSystemConfig::default()
    }
}

struct Cell {
    env: Environment,
    kpi: Arc<KpiRecorder>,
    station_a: Arc<Station>,
    station_b: Arc<Station>,
    faults: Arc<FaultSystem>,
}

fn cell(config: FaultSystemConfig) -> Cell {
    let kpi = Arc::new(KpiRecorder::new());
    let env = Environment::with_seed(11, kpi.clone());
    let station_a = Station::new(&env, StationConfig::new("StationA"));
    let station_b = Station::new(&env, StationConfig::new("StationB"));
    let conveyor = Conveyor::new(&env, &ConveyorConfig::new("Conveyor_AB"));

    let mut registry = DeviceRegistry::new();
    registry.register(station_a.clone());
    registry.register(station_b.clone());
    registry.register(conveyor);
    registry.relate("StationA", vec!["Conveyor_AB".to_string(), "StationB".to_string()]);

    let faults = FaultSystem::new(&env, config, registry).unwrap();
    Cell { env, kpi, station_a, station_b, faults }
}

async fn wait(seconds: f64) {
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
}

#[cfg(test)]
mod injection_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_fault_per_device() {
        let cell = cell(quiet_config());
        let first = cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::StationVibration));
        assert!(first.is_some());
        assert_eq!(cell.station_a.status(), DeviceStatus::Fault);
        assert_eq!(cell.station_a.core().symptom().as_deref(), Some("abnormal vibration"));

        let second = cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::PrecisionDegradation));
        assert!(second.is_none());
        assert_eq!(cell.faults.active_fault("StationA").unwrap().fault_type, FaultType::StationVibration);
        assert_eq!(cell.faults.stats().skipped_injections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_injection_targets_matching_kind() {
        let cell = cell(quiet_config());
        let injected = cell.faults.inject_random_fault(None, None).unwrap();
        assert!(injected.device_id.starts_with("Station"));
        assert_eq!(cell.faults.active_fault_count(), 1);
        assert!(cell.faults.inject_random_fault(Some("Conveyor_AB"), None).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_recovery_clears_fault() {
        let mut config = quiet_config();
        config.min_auto_recovery_s = 100.0;
        config.max_auto_recovery_s = 100.0;
        let cell = cell(config);
        cell.faults.inject_random_fault(Some("StationB"), None).unwrap();

        wait(99.0).await;
        assert_eq!(cell.station_b.status(), DeviceStatus::Fault);
        wait(2.0).await;
        assert_eq!(cell.station_b.status(), DeviceStatus::Idle);
        assert_eq!(cell.station_b.core().telemetry(), Default::default());
        assert_eq!(cell.kpi.snapshot().faults_auto_recovered, 1);
        assert_eq!(cell.faults.history()[0].resolution, Some(Resolution::AutoRecovered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_available_devices_are_sorted() {
        let cell = cell(quiet_config());
        assert_eq!(cell.faults.get_available_devices(), vec!["Conveyor_AB", "StationA", "StationB"]);
    }
}

#[cfg(test)]
mod diagnosis_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_correct_diagnosis_repairs_after_repair_time() {
        let cell = cell(quiet_config());
        cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::StationVibration)).unwrap();

        let result = cell.faults.handle_maintenance_request("StationA", "replace_bearing").unwrap();
        assert!(result.is_correct);
        assert_eq!(result.repair_time, REPAIR_S);
        assert_eq!(result.penalty_applied, 0.0);
        assert!(result.can_skip);
        assert_eq!(cell.station_a.status(), DeviceStatus::Maintenance);

        let again = cell.faults.handle_maintenance_request("StationA", "replace_bearing");
        assert_eq!(again, Err(SimError::UnderRepair("StationA".to_string())));

        wait(REPAIR_S + 1.0).await;
        assert_eq!(cell.station_a.status(), DeviceStatus::Idle);
        assert!(cell.faults.active_fault("StationA").is_none());
        assert!(!cell.faults.is_under_repair("StationA"));
        let kpi = cell.kpi.snapshot();
        assert_eq!(kpi.correct_diagnoses, 1);
        assert_eq!(kpi.faults_repaired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incorrect_diagnosis_costs_multiplied_time_and_keeps_fault() {
        let cell = cell(quiet_config());
        cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::StationVibration)).unwrap();

        let result = cell.faults.handle_maintenance_request("StationA", "tighten_bolts").unwrap();
        assert!(!result.is_correct);
        assert_eq!(result.penalty_applied, REPAIR_S * 2.0);
        assert!(result.affected_devices.is_empty());
        assert_eq!(cell.station_a.status(), DeviceStatus::Frozen);

        wait(REPAIR_S * 2.0 - 1.0).await;
        assert!(cell.faults.is_under_repair("StationA"));
        wait(2.0).await;
        assert!(!cell.faults.is_under_repair("StationA"));
        assert_eq!(cell.station_a.status(), DeviceStatus::Fault);
        assert!(cell.faults.active_fault("StationA").is_some());

        let retry = cell.faults.handle_maintenance_request("StationA", "replace_bearing").unwrap();
        assert!(retry.is_correct);
        let kpi = cell.kpi.snapshot();
        assert_eq!(kpi.incorrect_diagnoses, 1);
        assert_eq!(kpi.total_penalty_s, REPAIR_S * 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_for_unknown_or_healthy_devices_are_rejected() {
        let cell = cell(quiet_config());
        assert_eq!(
            cell.faults.handle_maintenance_request("Nowhere", "replace_bearing"),
            Err(SimError::DeviceNotFound("Nowhere".to_string()))
        );
        assert_eq!(
            cell.faults.handle_maintenance_request("StationB", "replace_bearing"),
            Err(SimError::NoActiveFault("StationB".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_recovery_during_repair_clears_once() {
        let mut config = quiet_config();
        config.min_auto_recovery_s = 30.0;
        config.max_auto_recovery_s = 30.0;
        let cell = cell(config);
        let mut events = cell.env.subscribe();
        cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::StationVibration)).unwrap();
        cell.faults.handle_maintenance_request("StationA", "replace_bearing").unwrap();

        wait(REPAIR_S + 10.0).await;
        assert_eq!(cell.station_a.status(), DeviceStatus::Idle);
        assert!(!cell.faults.is_under_repair("StationA"));

        let stats = cell.faults.stats();
        assert_eq!(stats.auto_recovered, 1);
        assert_eq!(stats.repaired, 0);
        let mut cleared = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.kind, EventKind::FaultCleared { .. }) {
                cleared += 1;
            }
        }
        assert_eq!(cleared, 1);
    }
}

#[cfg(test)]
mod skip_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_skip_completes_correct_repair_immediately() {
        let cell = cell(quiet_config());
        cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::StationVibration)).unwrap();
        cell.faults.handle_maintenance_request("StationA", "replace_bearing").unwrap();

        assert!(cell.faults.skip_repair_time("StationA"));
        assert_eq!(cell.station_a.status(), DeviceStatus::Idle);
        assert!(cell.faults.active_fault("StationA").is_none());
        assert!(!cell.faults.skip_repair_time("StationA"));

        // The original repair timer must not touch a later fault.
        cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::StationVibration)).unwrap();
        wait(REPAIR_S + 1.0).await;
        assert_eq!(cell.station_a.status(), DeviceStatus::Fault);
        assert_eq!(cell.faults.stats().repaired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_penalty_returns_device_to_fault() {
        let cell = cell(quiet_config());
        cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::StationVibration)).unwrap();
        cell.faults.handle_maintenance_request("StationA", "wrong_command").unwrap();

        assert!(cell.faults.skip_repair_time("StationA"));
        assert_eq!(cell.station_a.status(), DeviceStatus::Fault);
        assert!(cell.faults.active_fault("StationA").is_some());
        assert!(cell.faults.handle_maintenance_request("StationA", "replace_bearing").unwrap().is_correct);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_without_lock_is_false() {
        let cell = cell(quiet_config());
        assert!(!cell.faults.skip_repair_time("StationA"));
        assert!(!cell.faults.skip_repair_time("Nowhere"));
    }
}

#[cfg(test)]
mod inspection_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_inspect_reports_without_mutating() {
        let cell = cell(quiet_config());
        cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::StationVibration)).unwrap();
        cell.faults.handle_maintenance_request("StationA", "replace_bearing").unwrap();
        wait(10.0).await;

        let first = cell.faults.inspect_device("StationA").unwrap();
        let second = cell.faults.inspect_device("StationA").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status, DeviceStatus::Maintenance);
        assert_eq!(first.symptom.as_deref(), Some("abnormal vibration"));
        assert!(first.telemetry.vibration_mm_s > 5.0);
        assert!(first.has_active_fault);
        assert!((first.remaining_lock_s - (REPAIR_S - 10.0)).abs() < 1e-6);
        assert_eq!(first.buffer_level, Some(0));
        assert_eq!(cell.faults.stats().correct_diagnoses, 1);

        assert!(matches!(cell.faults.inspect_device("Nowhere"), Err(SimError::DeviceNotFound(_))));
    }
}

#[cfg(test)]
mod cascade_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wrong_diagnosis_degrades_and_schedules_secondary_fault() {
        let mut config = quiet_config();
        config.efficiency_degradation_probability = 1.0;
        config.secondary_fault_probability = 1.0;
        config.secondary_fault_delay_s = 30.0;
        let delay = config.secondary_fault_delay_s;
        let cell = cell(config);
        cell.faults.inject_random_fault(Some("StationA"), Some(FaultType::StationVibration)).unwrap();

        let result = cell.faults.handle_maintenance_request("StationA", "wrong_command").unwrap();
        assert_eq!(result.affected_devices, vec!["StationB"]);
        assert!((cell.station_b.core().efficiency_rate() - 0.8).abs() < 1e-9);
        assert!(cell.faults.active_fault("StationB").is_none());

        wait(delay + 1.0).await;
        let secondary = cell.faults.active_fault("StationB").unwrap();
        assert_eq!(secondary.fault_type, FaultType::PrecisionDegradation);
        assert_eq!(cell.station_b.status(), DeviceStatus::Fault);
        assert_eq!(cell.faults.stats().secondary_injected, 1);
    }
}
