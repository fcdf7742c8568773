//! Production line assembly from a [`FactoryConfig`].

use crate::agv::Agv;
use crate::config::FactoryConfig;
use crate::conveyor::{Conveyor, Transport, TripleBufferConveyor};
use crate::device::Device;
use crate::endpoint::Endpoint;
use crate::environment::Environment;
use crate::error::SimError;
use crate::fault_system::{DeviceRegistry, FaultSystem};
use crate::quality::QualityChecker;
use crate::station::Station;
use crate::storage::{RawMaterial, Warehouse};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Every device of one line, wired together.
#[derive(Debug)]
pub struct ProductionLine {
    env: Environment,
    raw_material: Arc<RawMaterial>,
    warehouse: Arc<Warehouse>,
    stations: Vec<Arc<Station>>,
    conveyors: Vec<Arc<Conveyor>>,
    triple_conveyors: Vec<Arc<TripleBufferConveyor>>,
    quality_checker: Arc<QualityChecker>,
    agvs: Vec<Arc<Agv>>,
    fault_system: Arc<FaultSystem>,
}

impl ProductionLine {
    /// Builds and wires the line. Nothing runs until [`ProductionLine::start`].
    pub fn build(env: &Environment, config: &FactoryConfig) -> Result<Self, SimError> {
        let raw_material = RawMaterial::new(env, &config.raw_material);
        let warehouse = Warehouse::new(env, &config.warehouse);
        let stations: Vec<Arc<Station>> = config.stations.iter().map(|c| Station::new(env, c.clone())).collect();
        let conveyors: Vec<Arc<Conveyor>> = config.conveyors.iter().map(|c| Conveyor::new(env, c)).collect();
        let triple_conveyors: Vec<Arc<TripleBufferConveyor>> =
            config.triple_conveyors.iter().map(|c| TripleBufferConveyor::new(env, c)).collect();
        let quality_checker = QualityChecker::new(env, config.quality_checker.clone())?;
        let agvs = config
            .agvs
            .iter()
            .map(|c| Agv::new(env, c.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut registry = DeviceRegistry::new();
        for device in all_devices(
            &raw_material,
            &warehouse,
            &stations,
            &conveyors,
            &triple_conveyors,
            &quality_checker,
            &agvs,
        ) {
            registry.register(device);
        }
        for (device, related) in &config.relationships {
            registry.relate(device, related.clone());
        }
        let fault_system = FaultSystem::new(env, config.fault_system.clone(), registry)?;

        let line = Self {
            env: env.clone(),
            raw_material,
            warehouse,
            stations,
            conveyors,
            triple_conveyors,
            quality_checker,
            agvs,
            fault_system,
        };
        line.wire(config)?;
        info!(devices = line.fault_system.get_available_devices().len(), "production line built");
        Ok(line)
    }

    fn wire(&self, config: &FactoryConfig) -> Result<(), SimError> {
        for station_config in &config.stations {
            let Some(downstream) = &station_config.downstream else {
                continue;
            };
            let station = self.station(&station_config.id).ok_or_else(|| missing(&station_config.id))?;
            let transport = if let Some(conveyor) = self.conveyor(downstream) {
                Transport::Conveyor(conveyor)
            } else if let Some(triple) = self.triple_conveyor(downstream) {
                Transport::TripleBuffer(triple)
            } else {
                return Err(missing(downstream));
            };
            station.bind_downstream(transport);
        }
        for conveyor_config in &config.conveyors {
            if let Some(downstream) = &conveyor_config.downstream {
                let target = self.any_station(downstream).ok_or_else(|| missing(downstream))?;
                if let Some(conveyor) = self.conveyor(&conveyor_config.id) {
                    conveyor.bind_downstream(target);
                }
            }
        }
        for triple_config in &config.triple_conveyors {
            if let Some(downstream) = &triple_config.downstream {
                let target = self.any_station(downstream).ok_or_else(|| missing(downstream))?;
                if let Some(triple) = self.triple_conveyor(&triple_config.id) {
                    triple.bind_downstream(target);
                }
            }
        }
        Ok(())
    }

    /// Starts every device loop and the fault injector.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self.stations.iter().map(Station::start).collect();
        handles.extend(self.conveyors.iter().map(Conveyor::start));
        handles.extend(self.triple_conveyors.iter().map(TripleBufferConveyor::start));
        handles.push(self.quality_checker.start());
        handles.push(self.fault_system.start());
        info!(tasks = handles.len(), "production line started");
        handles
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn raw_material(&self) -> &Arc<RawMaterial> {
        &self.raw_material
    }

    pub fn warehouse(&self) -> &Arc<Warehouse> {
        &self.warehouse
    }

    pub fn stations(&self) -> &[Arc<Station>] {
        &self.stations
    }

    pub fn quality_checker(&self) -> &Arc<QualityChecker> {
        &self.quality_checker
    }

    pub fn agvs(&self) -> &[Arc<Agv>] {
        &self.agvs
    }

    pub fn fault_system(&self) -> &Arc<FaultSystem> {
        &self.fault_system
    }

    pub fn station(&self, id: &str) -> Option<Arc<Station>> {
        self.stations.iter().find(|s| s.core().id() == id).cloned()
    }

    /// A processing station or the quality checker's inspection station.
    fn any_station(&self, id: &str) -> Option<Arc<Station>> {
        self.station(id).or_else(|| {
            let inspection = self.quality_checker.station();
            (inspection.core().id() == id).then(|| Arc::clone(inspection))
        })
    }

    pub fn conveyor(&self, id: &str) -> Option<Arc<Conveyor>> {
        self.conveyors.iter().find(|c| c.id() == id).cloned()
    }

    pub fn triple_conveyor(&self, id: &str) -> Option<Arc<TripleBufferConveyor>> {
        self.triple_conveyors.iter().find(|c| c.id() == id).cloned()
    }

    pub fn agv(&self, id: &str) -> Option<Arc<Agv>> {
        self.agvs.iter().find(|a| a.id() == id).cloned()
    }

    /// Resolves a device id to something an AGV can load from or unload to.
    pub fn endpoint(&self, id: &str) -> Option<Endpoint> {
        if self.raw_material.id() == id {
            return Some(Endpoint::RawMaterial(Arc::clone(&self.raw_material)));
        }
        if self.warehouse.id() == id {
            return Some(Endpoint::Warehouse(Arc::clone(&self.warehouse)));
        }
        if self.quality_checker.id() == id {
            return Some(Endpoint::QualityChecker(Arc::clone(&self.quality_checker)));
        }
        self.station(id)
            .map(Endpoint::Station)
            .or_else(|| self.conveyor(id).map(Endpoint::Conveyor))
            .or_else(|| self.triple_conveyor(id).map(Endpoint::TripleBuffer))
    }

    /// Every device as a trait object, in a stable order.
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        all_devices(
            &self.raw_material,
            &self.warehouse,
            &self.stations,
            &self.conveyors,
            &self.triple_conveyors,
            &self.quality_checker,
            &self.agvs,
        )
    }
}

fn all_devices(
    raw_material: &Arc<RawMaterial>,
    warehouse: &Arc<Warehouse>,
    stations: &[Arc<Station>],
    conveyors: &[Arc<Conveyor>],
    triple_conveyors: &[Arc<TripleBufferConveyor>],
    quality_checker: &Arc<QualityChecker>,
    agvs: &[Arc<Agv>],
) -> Vec<Arc<dyn Device>> {
    let mut devices: Vec<Arc<dyn Device>> = vec![
        Arc::clone(raw_material) as Arc<dyn Device>,
        Arc::clone(warehouse) as Arc<dyn Device>,
    ];
    devices.extend(stations.iter().map(|s| Arc::clone(s) as Arc<dyn Device>));
    devices.extend(conveyors.iter().map(|c| Arc::clone(c) as Arc<dyn Device>));
    devices.extend(triple_conveyors.iter().map(|c| Arc::clone(c) as Arc<dyn Device>));
    devices.push(Arc::clone(quality_checker) as Arc<dyn Device>);
    devices.extend(agvs.iter().map(|a| Arc::clone(a) as Arc<dyn Device>));
    devices
}

fn missing(id: &str) -> SimError {
    SimError::Config(format!("unknown device {id} in line layout"))
}
