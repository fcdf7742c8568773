use cellsim::agv::Agv;
use cellsim::endpoint::{BufferSlot, Endpoint};
use cellsim::events::EventKind;
use cellsim::fault_system::FaultDefinition;
use cellsim::kpi::KpiRecorder;
use cellsim::{Device, Environment, FactoryConfig, FaultType, ProductType, ProductionLine};
use clap::{App, Arg, ArgMatches};
use colored::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_DURATION_S: &str = "3600";
const DEFAULT_ORDERS: &str = "12";
const DEFAULT_LOG_LEVEL: &str = "info";
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const DIAGNOSIS_DELAY: Duration = Duration::from_secs(10);

// Docking points on the default path network
const RAW_MATERIAL_POINT: &str = "P0";
const WAREHOUSE_POINT: &str = "P8";
const QUALITY_CHECK_POINT: &str = "P6";

fn dock_point(device: &str) -> Option<&'static str> {
    match device {
        "RawMaterial" => Some(RAW_MATERIAL_POINT),
        "StationA" => Some("P1"),
        "StationB" => Some("P3"),
        "StationC" => Some("P4"),
        "QualityCheck" => Some(QUALITY_CHECK_POINT),
        "Warehouse" => Some(WAREHOUSE_POINT),
        _ => None,
    }
}

#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("cellsim-simulator")
        .version("0.1.0")
        .author("Factory Systems Engineering Team")
        .about("🏭  Production cell simulator - stations, conveyors, AGVs and fault diagnosis")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON line layout (defaults to the built-in three-station line)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("duration")
                .short("d")
                .long("duration")
                .value_name("SECONDS")
                .help("Simulated run time")
                .takes_value(true)
                .default_value(DEFAULT_DURATION_S),
        )
        .arg(
            Arg::with_name("orders")
                .short("o")
                .long("orders")
                .value_name("COUNT")
                .help("Number of raw products to supply")
                .takes_value(true)
                .default_value(DEFAULT_ORDERS),
        )
        .arg(
            Arg::with_name("seed")
                .short("s")
                .long("seed")
                .value_name("SEED")
                .help("RNG seed (overrides the layout's seed)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no-faults")
                .long("no-faults")
                .help("Disable periodic fault injection"),
        )
        .arg(
            Arg::with_name("log-level")
                .short("l")
                .long("log-level")
                .value_name("LEVEL")
                .help("Tracing filter, e.g. info or cellsim=debug")
                .takes_value(true)
                .default_value(DEFAULT_LOG_LEVEL),
        )
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(matches.value_of("log-level").unwrap_or(DEFAULT_LOG_LEVEL)))
        .init();

    let config = load_config(&matches)?;
    let duration: u64 = matches.value_of("duration").unwrap_or(DEFAULT_DURATION_S).parse()?;
    let orders: usize = matches.value_of("orders").unwrap_or(DEFAULT_ORDERS).parse()?;

    println!("{}", "🏭  Production Cell Simulator".bold());
    println!("================================");
    println!("seed {}  duration {}s  orders {}", config.seed, duration, orders);

    let kpi = Arc::new(KpiRecorder::new());
    let env = Environment::with_seed(config.seed, kpi.clone());
    let line = Arc::new(ProductionLine::build(&env, &config)?);
    let mut handles = line.start();

    for (i, product_type) in ProductType::ALL.iter().cycle().take(orders).enumerate() {
        if line.raw_material().supply(*product_type, 1).is_empty() {
            warn!(supplied = i, "raw material storage full");
            break;
        }
    }

    let agvs = line.agvs().to_vec();
    if let Some(feeder) = agvs.first() {
        handles.push(env.spawn(feed_first_station(Arc::clone(&line), Arc::clone(feeder))));
    }
    if let Some(collector) = agvs.get(1).or_else(|| agvs.first()) {
        handles.push(env.spawn(collect_inspected(Arc::clone(&line), Arc::clone(collector))));
    }
    handles.push(env.spawn(maintenance_crew(
        Arc::clone(&line),
        config.fault_system.definitions.clone(),
    )));

    tokio::time::sleep(Duration::from_secs(duration)).await;
    for handle in &handles {
        handle.abort();
    }

    print_summary(&line, &kpi);
    println!("🏁 Simulation finished at t={:.0}s", env.now());
    Ok(())
}

fn load_config(matches: &ArgMatches) -> Result<FactoryConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => FactoryConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => FactoryConfig::default(),
    };
    if let Some(seed) = matches.value_of("seed") {
        config.seed = seed.parse()?;
    }
    if matches.is_present("no-faults") {
        config.fault_system.enabled = false;
    }
    Ok(config)
}

/// Keeps the battery above the low threshold between trips.
async fn top_up(agv: &Agv) {
    if agv.battery_level() < agv.config().low_battery_threshold {
        if let Err(e) = agv.voluntary_charge(100.0).await {
            warn!(agv = %agv.id(), error = %e, "charge failed");
        }
    }
}

/// Moves to `device`'s dock and unloads there, retrying until it succeeds.
async fn deliver(line: &ProductionLine, agv: &Agv, device: &str) {
    let (Some(point), Some(endpoint)) = (dock_point(device), line.endpoint(device)) else {
        warn!(agv = %agv.id(), device, "no dock for delivery target");
        return;
    };
    loop {
        match agv.move_to(point).await {
            Ok(_) => match agv.unload_to(&endpoint, None).await {
                Ok(_) => return,
                Err(e) => info!(agv = %agv.id(), target = device, error = %e, "unload deferred"),
            },
            Err(e) => info!(agv = %agv.id(), error = %e, "move deferred"),
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
        top_up(agv).await;
    }
}

async fn feed_first_station(line: Arc<ProductionLine>, agv: Arc<Agv>) {
    let Some(first) = line.stations().first().map(|s| s.id().to_string()) else {
        return;
    };
    let source = Endpoint::RawMaterial(Arc::clone(line.raw_material()));
    loop {
        top_up(&agv).await;
        if line.raw_material().buffer().is_empty() {
            tokio::time::sleep(RETRY_INTERVAL).await;
            continue;
        }
        let loaded = match agv.move_to(RAW_MATERIAL_POINT).await {
            Ok(_) => agv.load_from(&source, None, None).await,
            Err(e) => Err(e),
        };
        if let Err(e) = loaded {
            info!(agv = %agv.id(), error = %e, "load deferred");
            tokio::time::sleep(RETRY_INTERVAL).await;
            continue;
        }
        deliver(&line, &agv, &first).await;
    }
}

async fn collect_inspected(line: Arc<ProductionLine>, agv: Arc<Agv>) {
    let source = Endpoint::QualityChecker(Arc::clone(line.quality_checker()));
    loop {
        top_up(&agv).await;
        if line.quality_checker().output_buffer().is_empty() {
            tokio::time::sleep(RETRY_INTERVAL).await;
            continue;
        }
        let loaded = match agv.move_to(QUALITY_CHECK_POINT).await {
            Ok(_) => agv.load_from(&source, Some(BufferSlot::Output), None).await,
            Err(e) => Err(e),
        };
        if let Err(e) = loaded {
            info!(agv = %agv.id(), error = %e, "load deferred");
            tokio::time::sleep(RETRY_INTERVAL).await;
            continue;
        }
        let destination = agv
            .payload()
            .snapshot()
            .first()
            .and_then(|p| p.rework_target.clone())
            .unwrap_or_else(|| line.warehouse().id().to_string());
        deliver(&line, &agv, &destination).await;
    }
}

/// Answers every injected fault with a guess from the fault's repair catalogue.
async fn maintenance_crew(line: Arc<ProductionLine>, definitions: HashMap<FaultType, FaultDefinition>) {
    let env = line.env().clone();
    let mut events = env.subscribe();
    loop {
        let (device, fault_type) = match events.recv().await {
            Ok(event) => match event.kind {
                EventKind::FaultInjected { device, fault_type, .. } => (device, fault_type),
                _ => continue,
            },
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "maintenance crew lagged behind events");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        let Some(commands) = definitions.get(&fault_type).map(|d| &d.repair_commands) else {
            continue;
        };
        let Some(command) = env.pick_index(commands.len()).map(|i| commands[i].clone()) else {
            continue;
        };
        let faults = Arc::clone(line.fault_system());
        env.spawn(async move {
            tokio::time::sleep(DIAGNOSIS_DELAY).await;
            match faults.handle_maintenance_request(&device, &command) {
                Ok(result) if result.is_correct => {
                    info!(device = %device, command = %command, repair_time = result.repair_time, "repair under way");
                }
                Ok(result) => {
                    warn!(device = %device, command = %command, penalty = result.penalty_applied, "wrong diagnosis");
                }
                Err(e) => info!(device = %device, error = %e, "diagnosis not accepted"),
            }
        });
    }
}

fn print_summary(line: &ProductionLine, kpi: &KpiRecorder) {
    let snapshot = kpi.snapshot();
    println!();
    println!("{}", "📊 Stations".bold());
    for station in line.stations() {
        let status = station.get_detailed_status();
        println!(
            "  {:<14} {:<12} processed {:>3}  avg {:>6.1}s",
            status.id.cyan(),
            status.status.to_string(),
            status.processed_count,
            status.average_processing_time
        );
    }
    let quality = line.quality_checker().stats_snapshot();
    println!(
        "  {:<14} inspected {:>3}  {} {}  {} {}  {} {}",
        line.quality_checker().id().cyan(),
        quality.inspected,
        "pass".green(),
        quality.passed,
        "rework".yellow(),
        quality.reworked,
        "scrap".red(),
        quality.scrapped
    );

    println!("{}", "🚚 AGVs".bold());
    for agv in line.agvs() {
        let status = agv.get_detailed_status();
        println!(
            "  {:<14} {:<12} battery {:>5.1}%  distance {:>7.1}m  charges {}/{}",
            status.id.cyan(),
            status.status.to_string(),
            status.battery_level,
            status.stats.distance_m,
            status.stats.voluntary_charges,
            status.stats.emergency_charges
        );
    }

    let faults = line.fault_system().stats();
    println!("{}", "🔧 Faults".bold());
    println!(
        "  injected {}  secondary {}  repaired {}  auto-recovered {}",
        faults.total_injected, faults.secondary_injected, faults.repaired, faults.auto_recovered
    );
    println!(
        "  diagnoses {} {}  {} {}  penalty {:.0}s",
        "correct".green(),
        snapshot.correct_diagnoses,
        "incorrect".red(),
        snapshot.incorrect_diagnoses,
        snapshot.total_penalty_s
    );

    println!("{}", "📦 Output".bold());
    println!(
        "  completed {}  scrapped {}  energy {:.1}",
        snapshot.completed_items.to_string().green(),
        snapshot.scrapped_items.to_string().red(),
        snapshot.energy_cost
    );
}
