//! Device and line configuration.
//!
//! Every struct deserializes from JSON and falls back to the defaults below for missing fields.

use crate::device::Coordinate;
use crate::error::SimError;
use crate::fault_system::{default_fault_definitions, FaultDefinition, FaultType};
use crate::product::ProductType;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::collections::HashMap;

// Single-piece flow unless configured otherwise
const DEFAULT_STATION_BUFFER_SIZE: usize = 1;
const DEFAULT_PROCESSING_TIME_S: (f64, f64) = (30.0, 45.0);
const DEFAULT_HANDLING_TIME_S: f64 = 5.0;

const DEFAULT_CONVEYOR_CAPACITY: usize = 3;
const DEFAULT_SIDE_BUFFER_CAPACITY: usize = 2;
const DEFAULT_CONVEYOR_RETRY_S: f64 = 1.0;

const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 4;
const DEFAULT_PASS_THRESHOLD: f64 = 0.8;
const DEFAULT_SCRAP_THRESHOLD: f64 = 0.4;

const DEFAULT_AGV_SPEED_MPS: f64 = 2.0;
const DEFAULT_AGV_PAYLOAD: usize = 2;
const DEFAULT_BATTERY_PER_METER: f64 = 0.1;
const DEFAULT_BATTERY_PER_ACTION: f64 = 0.5;
const DEFAULT_CHARGING_RATE: f64 = 3.33; // percent per second
const DEFAULT_LOW_BATTERY_THRESHOLD: f64 = 20.0;
const DEFAULT_SAFETY_MARGIN: f64 = 5.0;
const DEFAULT_EMERGENCY_CHARGE_TARGET: f64 = 80.0;

const MIN_INJECTION_INTERVAL_S: u64 = 30;
const MAX_INJECTION_INTERVAL_S: u64 = 120;
const MIN_AUTO_RECOVERY_S: u64 = 60;
const MAX_AUTO_RECOVERY_S: u64 = 300;
const SECONDARY_FAULT_DELAY_S: u64 = 30;

const_assert!(DEFAULT_STATION_BUFFER_SIZE >= 1);
const_assert!(MIN_INJECTION_INTERVAL_S <= MAX_INJECTION_INTERVAL_S);
const_assert!(MIN_AUTO_RECOVERY_S <= MAX_AUTO_RECOVERY_S);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub id: String,
    pub buffer_size: usize,
    /// `(min, max)` seconds per product type.
    pub processing_times: HashMap<ProductType, (f64, f64)>,
    pub default_processing_time: (f64, f64),
    /// Delay an AGV spends loading from or unloading to this station.
    pub handling_time_s: f64,
    /// Id of the transport the station hands finished items to.
    pub downstream: Option<String>,
}

impl StationConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    pub fn processing_range(&self, product_type: ProductType) -> (f64, f64) {
        self.processing_times
            .get(&product_type)
            .copied()
            .unwrap_or(self.default_processing_time)
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            id: "Station".to_string(),
            buffer_size: DEFAULT_STATION_BUFFER_SIZE,
            processing_times: HashMap::new(),
            default_processing_time: DEFAULT_PROCESSING_TIME_S,
            handling_time_s: DEFAULT_HANDLING_TIME_S,
            downstream: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConveyorConfig {
    pub id: String,
    pub capacity: usize,
    pub retry_interval_s: f64,
    pub handling_time_s: f64,
    /// Id of the station the conveyor drains into.
    pub downstream: Option<String>,
}

impl ConveyorConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        Self {
            id: "Conveyor".to_string(),
            capacity: DEFAULT_CONVEYOR_CAPACITY,
            retry_interval_s: DEFAULT_CONVEYOR_RETRY_S,
            handling_time_s: DEFAULT_HANDLING_TIME_S,
            downstream: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TripleBufferConfig {
    pub id: String,
    pub main_capacity: usize,
    pub upper_capacity: usize,
    pub lower_capacity: usize,
    pub retry_interval_s: f64,
    pub handling_time_s: f64,
    pub downstream: Option<String>,
}

impl TripleBufferConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }
}

impl Default for TripleBufferConfig {
    fn default() -> Self {
        Self {
            id: "TripleConveyor".to_string(),
            main_capacity: DEFAULT_CONVEYOR_CAPACITY,
            upper_capacity: DEFAULT_SIDE_BUFFER_CAPACITY,
            lower_capacity: DEFAULT_SIDE_BUFFER_CAPACITY,
            retry_interval_s: DEFAULT_CONVEYOR_RETRY_S,
            handling_time_s: DEFAULT_HANDLING_TIME_S,
            downstream: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityCheckerConfig {
    pub station: StationConfig,
    pub output_buffer_size: usize,
    pub pass_threshold: f64,
    pub scrap_threshold: f64,
}

impl Default for QualityCheckerConfig {
    fn default() -> Self {
        Self {
            station: StationConfig::new("QualityCheck"),
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            scrap_threshold: DEFAULT_SCRAP_THRESHOLD,
        }
    }
}

impl QualityCheckerConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.scrap_threshold >= self.pass_threshold {
            return Err(SimError::Config(format!(
                "scrap threshold {} must be below pass threshold {}",
                self.scrap_threshold, self.pass_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgvConfig {
    pub id: String,
    pub speed_mps: f64,
    pub payload_capacity: usize,
    pub initial_battery: f64,
    pub initial_point: String,
    pub charging_point: String,
    pub path_points: HashMap<String, Coordinate>,
    pub battery_per_meter: f64,
    pub battery_per_action: f64,
    pub charging_rate: f64,
    pub low_battery_threshold: f64,
    pub safety_margin: f64,
    pub emergency_charge_target: f64,
}

impl AgvConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        for point in [&self.initial_point, &self.charging_point] {
            if !self.path_points.contains_key(point) {
                return Err(SimError::Config(format!("{}: unknown path point {point}", self.id)));
            }
        }
        if self.speed_mps <= 0.0 || self.charging_rate <= 0.0 {
            return Err(SimError::Config(format!("{}: speed and charging rate must be positive", self.id)));
        }
        Ok(())
    }
}

impl Default for AgvConfig {
    fn default() -> Self {
        let path_points = HashMap::from([
            ("P0".to_string(), Coordinate::new(0.0, 0.0)),
            ("P1".to_string(), Coordinate::new(10.0, 0.0)),
            ("P2".to_string(), Coordinate::new(20.0, 0.0)),
            ("P3".to_string(), Coordinate::new(30.0, 0.0)),
            ("P4".to_string(), Coordinate::new(40.0, 0.0)),
            ("P5".to_string(), Coordinate::new(50.0, 0.0)),
            ("P6".to_string(), Coordinate::new(50.0, 10.0)),
            ("P7".to_string(), Coordinate::new(40.0, 10.0)),
            ("P8".to_string(), Coordinate::new(60.0, 10.0)),
            ("P9".to_string(), Coordinate::new(0.0, 10.0)),
        ]);
        Self {
            id: "AGV".to_string(),
            speed_mps: DEFAULT_AGV_SPEED_MPS,
            payload_capacity: DEFAULT_AGV_PAYLOAD,
            initial_battery: 100.0,
            initial_point: "P0".to_string(),
            charging_point: "P9".to_string(),
            path_points,
            battery_per_meter: DEFAULT_BATTERY_PER_METER,
            battery_per_action: DEFAULT_BATTERY_PER_ACTION,
            charging_rate: DEFAULT_CHARGING_RATE,
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            emergency_charge_target: DEFAULT_EMERGENCY_CHARGE_TARGET,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub id: String,
    pub capacity: usize,
    pub handling_time_s: f64,
}

impl StorageConfig {
    pub fn new(id: impl Into<String>, capacity: usize) -> Self {
        Self { id: id.into(), capacity, handling_time_s: DEFAULT_HANDLING_TIME_S }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new("Storage", 1000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultSystemConfig {
    pub enabled: bool,
    pub min_injection_interval_s: f64,
    pub max_injection_interval_s: f64,
    pub min_auto_recovery_s: f64,
    pub max_auto_recovery_s: f64,
    pub efficiency_degradation_probability: f64,
    pub efficiency_degradation_factor: f64,
    pub secondary_fault_probability: f64,
    pub secondary_fault_delay_s: f64,
    pub definitions: HashMap<FaultType, FaultDefinition>,
}

impl Default for FaultSystemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_injection_interval_s: MIN_INJECTION_INTERVAL_S as f64,
            max_injection_interval_s: MAX_INJECTION_INTERVAL_S as f64,
            min_auto_recovery_s: MIN_AUTO_RECOVERY_S as f64,
            max_auto_recovery_s: MAX_AUTO_RECOVERY_S as f64,
            efficiency_degradation_probability: 0.5,
            efficiency_degradation_factor: 0.8,
            secondary_fault_probability: 0.3,
            secondary_fault_delay_s: SECONDARY_FAULT_DELAY_S as f64,
            definitions: default_fault_definitions(),
        }
    }
}

/// Layout of a whole production line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    pub seed: u64,
    pub raw_material: StorageConfig,
    pub warehouse: StorageConfig,
    pub stations: Vec<StationConfig>,
    pub conveyors: Vec<ConveyorConfig>,
    pub triple_conveyors: Vec<TripleBufferConfig>,
    pub quality_checker: QualityCheckerConfig,
    pub agvs: Vec<AgvConfig>,
    pub fault_system: FaultSystemConfig,
    /// Devices physically coupled to each device, for cascading fault effects.
    pub relationships: HashMap<String, Vec<String>>,
}

impl FactoryConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SimError> {
        serde_json::from_str(json).map_err(|e| SimError::Config(e.to_string()))
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        let station = |id: &str, downstream: &str, times: [(f64, f64); 3]| StationConfig {
            processing_times: ProductType::ALL.into_iter().zip(times).collect(),
            downstream: Some(downstream.to_string()),
            ..StationConfig::new(id)
        };
        let conveyor = |id: &str, downstream: &str| ConveyorConfig {
            downstream: Some(downstream.to_string()),
            ..ConveyorConfig::new(id)
        };

        let mut quality_checker = QualityCheckerConfig::default();
        quality_checker.station.processing_times =
            ProductType::ALL.into_iter().map(|t| (t, (10.0, 15.0))).collect();

        let agv = |id: &str, start: &str| AgvConfig { initial_point: start.to_string(), ..AgvConfig::new(id) };

        let relationships = HashMap::from([
            ("StationA".to_string(), vec!["Conveyor_AB".to_string(), "StationB".to_string()]),
            ("StationB".to_string(), vec!["Conveyor_AB".to_string(), "Conveyor_BC".to_string(), "StationA".to_string(), "StationC".to_string()]),
            ("StationC".to_string(), vec!["Conveyor_BC".to_string(), "Conveyor_CQ".to_string(), "StationB".to_string()]),
            ("QualityCheck".to_string(), vec!["Conveyor_CQ".to_string(), "StationC".to_string()]),
            ("Conveyor_AB".to_string(), vec!["StationA".to_string(), "StationB".to_string()]),
            ("Conveyor_BC".to_string(), vec!["StationB".to_string(), "StationC".to_string()]),
            ("Conveyor_CQ".to_string(), vec!["StationC".to_string(), "QualityCheck".to_string()]),
            ("AGV_1".to_string(), vec!["AGV_2".to_string()]),
            ("AGV_2".to_string(), vec!["AGV_1".to_string()]),
        ]);

        Self {
            seed: 42,
            raw_material: StorageConfig::new("RawMaterial", 1000),
            warehouse: StorageConfig::new("Warehouse", 1000),
            stations: vec![
                station("StationA", "Conveyor_AB", [(30.0, 45.0), (40.0, 60.0), (35.0, 50.0)]),
                station("StationB", "Conveyor_BC", [(45.0, 60.0), (50.0, 70.0), (40.0, 55.0)]),
                station("StationC", "Conveyor_CQ", [(20.0, 30.0), (30.0, 40.0), (25.0, 35.0)]),
            ],
            conveyors: vec![conveyor("Conveyor_AB", "StationB"), conveyor("Conveyor_BC", "StationC")],
            triple_conveyors: vec![TripleBufferConfig {
                downstream: Some("QualityCheck".to_string()),
                ..TripleBufferConfig::new("Conveyor_CQ")
            }],
            quality_checker,
            agvs: vec![agv("AGV_1", "P0"), agv("AGV_2", "P9")],
            fault_system: FaultSystemConfig::default(),
            relationships,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_falls_back_to_default_range() {
        let mut config = StationConfig::new("StationA");
        config.processing_times.insert(ProductType::P1, (10.0, 10.0));
        assert_eq!(config.processing_range(ProductType::P1), (10.0, 10.0));
        assert_eq!(config.processing_range(ProductType::P2), DEFAULT_PROCESSING_TIME_S);
    }

    #[test]
    fn test_quality_thresholds_must_be_ordered() {
        let mut config = QualityCheckerConfig::default();
        assert!(config.validate().is_ok());
        config.scrap_threshold = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agv_validation_checks_points() {
        let mut config = AgvConfig::new("AGV_1");
        assert!(config.validate().is_ok());
        config.charging_point = "nowhere".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "seed": 7,
            "stations": [
                { "id": "StationA", "buffer_size": 2, "processing_times": { "P1": [10.0, 12.0] } }
            ]
        }"#;
        let config = FactoryConfig::from_json_str(json).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.stations.len(), 1);
        assert_eq!(config.stations[0].buffer_size, 2);
        assert_eq!(config.stations[0].processing_range(ProductType::P1), (10.0, 12.0));
        assert_eq!(config.stations[0].handling_time_s, DEFAULT_HANDLING_TIME_S);
        assert_eq!(config.agvs.len(), 2);
        assert!(config.fault_system.enabled);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let result = FactoryConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(SimError::Config(_))));
    }
}
