use cellsim::config::{ConveyorConfig, StationConfig};
use cellsim::conveyor::{Conveyor, Transport};
use cellsim::events::{Alert, EventKind};
use cellsim::{Device, DeviceStatus, Environment, FaultType, Product, ProductType, Station};
use std::sync::Arc;
use std::time::Duration;

fn fixed_station(env: &Environment, id: &str, seconds: f64, buffer_size: usize) -> Arc<Station> {
    let mut config = StationConfig::new(id);
    config.buffer_size = buffer_size;
    config.processing_times.insert(ProductType::P1, (seconds, seconds));
    Station::new(env, config)
}

async fn advance_to(env: &Environment, t: f64) {
    let wait = t - env.now();
    if wait > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(wait)).await;
    }
}

#[cfg(test)]
mod interruption_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fault_mid_processing_resumes_with_remaining_time() {
        let env = Environment::new();
        let station = fixed_station(&env, "StationA", 10.0, 1);
        let conveyor = Conveyor::new(&env, &ConveyorConfig::new("Conveyor_AB"));
        station.bind_downstream(Transport::Conveyor(conveyor.clone()));
        station.start();
        station.add_item(Product::new("p-1", ProductType::P1)).unwrap();

        advance_to(&env, 4.0).await;
        assert_eq!(station.status(), DeviceStatus::Processing);
        station.apply_fault(FaultType::StationVibration, "abnormal vibration");

        advance_to(&env, 9.0).await;
        assert_eq!(station.status(), DeviceStatus::Fault);
        let timing = station.timing_state();
        assert_eq!(timing.current_item_id.as_deref(), Some("p-1"));
        assert!((timing.elapsed_time - 4.0).abs() < 1e-6);
        assert_eq!(station.get_buffer_level(), 1, "interrupted item stays in the buffer");

        station.recover();
        advance_to(&env, 14.5).await;
        assert!(conveyor.buffer().is_empty(), "only 5.5 of the remaining 6 seconds have passed");

        advance_to(&env, 15.5).await;
        assert_eq!(conveyor.buffer().item_ids(), vec!["p-1"]);
        let stats = station.stats_snapshot();
        assert_eq!(stats.processed_count, 1);
        assert_eq!(stats.interruptions, 1);
        assert_eq!(station.status(), DeviceStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faulted_station_does_not_start_new_items() {
        let env = Environment::new();
        let station = fixed_station(&env, "StationA", 10.0, 1);
        station.start();
        station.apply_fault(FaultType::EfficiencyAnomaly, "slow");
        station.add_item(Product::new("p-1", ProductType::P1)).unwrap();

        advance_to(&env, 30.0).await;
        assert_eq!(station.status(), DeviceStatus::Fault);
        assert_eq!(station.timing_state().current_item_id, None);
        assert_eq!(station.stats_snapshot().processed_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processed_item_records_station_in_history() {
        let env = Environment::new();
        let station = fixed_station(&env, "StationB", 5.0, 1);
        let conveyor = Conveyor::new(&env, &ConveyorConfig::new("Conveyor_BC"));
        station.bind_downstream(Transport::Conveyor(conveyor.clone()));
        station.start();
        station.add_item(Product::new("p-1", ProductType::P1)).unwrap();

        advance_to(&env, 6.0).await;
        let item = conveyor.try_pop().unwrap();
        assert_eq!(item.history, vec!["StationB"]);
        assert_eq!(item.last_station(), Some("StationB"));
    }
}

#[cfg(test)]
mod backpressure_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_full_downstream_blocks_without_losing_item() {
        let env = Environment::new();
        let mut events = env.subscribe();
        let station = fixed_station(&env, "StationA", 10.0, 2);
        let conveyor = Conveyor::new(&env, &ConveyorConfig { capacity: 1, ..ConveyorConfig::new("Conveyor_AB") });
        station.bind_downstream(Transport::Conveyor(conveyor.clone()));
        station.start();
        station.add_item(Product::new("p-1", ProductType::P1)).unwrap();
        station.add_item(Product::new("p-2", ProductType::P1)).unwrap();

        advance_to(&env, 25.0).await;
        assert_eq!(station.status(), DeviceStatus::Blocked);
        assert_eq!(conveyor.buffer().item_ids(), vec!["p-1"]);
        assert!(station.buffer().is_empty());
        assert_eq!(station.timing_state().current_item_id.as_deref(), Some("p-2"));

        let mut alerts = 0;
        while let Ok(event) = events.try_recv() {
            if let EventKind::Alert(Alert::BufferFull { device, target }) = event.kind {
                assert_eq!(device, "StationA");
                assert_eq!(target, "Conveyor_AB");
                alerts += 1;
            }
        }
        assert_eq!(alerts, 1);

        assert_eq!(conveyor.try_pop().unwrap().id, "p-1");
        advance_to(&env, 26.0).await;
        assert_eq!(conveyor.buffer().item_ids(), vec!["p-2"]);
        assert_eq!(station.status(), DeviceStatus::Idle);
        assert_eq!(station.stats_snapshot().processed_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_while_blocked_holds_item_until_recovery() {
        let env = Environment::new();
        let station = fixed_station(&env, "StationA", 10.0, 1);
        let conveyor = Conveyor::new(&env, &ConveyorConfig { capacity: 1, ..ConveyorConfig::new("Conveyor_AB") });
        conveyor.try_push(Product::new("blocker", ProductType::P2)).unwrap();
        station.bind_downstream(Transport::Conveyor(conveyor.clone()));
        station.start();
        station.add_item(Product::new("p-1", ProductType::P1)).unwrap();

        advance_to(&env, 12.0).await;
        assert_eq!(station.status(), DeviceStatus::Blocked);
        assert!(station.buffer().is_empty(), "finished item has left the input buffer");
        station.apply_fault(FaultType::StationVibration, "abnormal vibration");

        assert_eq!(conveyor.try_pop().unwrap().id, "blocker");
        advance_to(&env, 30.0).await;
        assert_eq!(station.status(), DeviceStatus::Fault);
        assert!(conveyor.buffer().is_empty(), "a faulted station does not hand off");
        assert_eq!(station.stats_snapshot().processed_count, 0);

        station.recover();
        advance_to(&env, 31.0).await;
        assert_eq!(conveyor.buffer().item_ids(), vec!["p-1"]);
        assert_eq!(station.status(), DeviceStatus::Idle);
        assert_eq!(station.stats_snapshot().processed_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_piece_flow_refuses_second_item() {
        let env = Environment::new();
        let station = fixed_station(&env, "StationA", 10.0, 1);
        station.add_item(Product::new("p-1", ProductType::P1)).unwrap();
        let back = station.accept(Product::new("p-2", ProductType::P1)).unwrap_err();
        assert_eq!(back.id, "p-2");
        assert_eq!(station.get_buffer_level(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detailed_status_reports_progress() {
        let env = Environment::new();
        let station = fixed_station(&env, "StationA", 10.0, 1);
        station.start();
        station.add_item(Product::new("p-1", ProductType::P1)).unwrap();

        advance_to(&env, 3.0).await;
        let status = station.get_detailed_status();
        assert_eq!(status.status, DeviceStatus::Processing);
        assert_eq!(status.buffer_items, vec!["p-1"]);
        assert_eq!(status.timing.total_time_for_current_item, 10.0);
        assert_eq!(status.downstream, None);
    }
}
