//! # Production Cell Simulator
//!
//! A discrete-event simulation of a small manufacturing line: processing stations, conveyors,
//! a quality checker, autonomous guided vehicles (AGVs) and a fault system that injects hidden
//! faults and scores maintenance diagnoses.
//!
//! ## Features
//!
//! - **Interruptible processing**: stations resume a faulted item with only its remaining time
//! - **Backpressure**: bounded buffers block producers, and a full downstream raises an alert
//! - **AGV logistics**: movement, battery model, emergency charging, load and unload
//! - **Fault diagnosis**: hidden root causes, repair locks, penalties and cascading effects
//! - **Deterministic runs**: seeded randomness on a virtual tokio clock
//!
//! ## Quick Start
//!
//! ```no_run
//! use cellsim::{Environment, FactoryConfig, ProductionLine, ProductType};
//!
//! # async fn run() -> Result<(), cellsim::SimError> {
//! let env = Environment::new();
//! let line = ProductionLine::build(&env, &FactoryConfig::default())?;
//! line.start();
//! line.raw_material().supply(ProductType::P1, 5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`environment`] - Clock, seeded RNG, event bus and KPI sink shared by all devices
//! - [`device`] - Status model, telemetry and the [`Device`] trait
//! - [`station`], [`conveyor`], [`quality`], [`storage`] - Product flow
//! - [`agv`], [`endpoint`] - Transport between devices
//! - [`fault_system`] - Fault injection, diagnosis and repair
//! - [`line`] - Assembly of a whole line from a [`FactoryConfig`]

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod agv;
pub mod buffer;
pub mod config;
pub mod conveyor;
pub mod device;
pub mod endpoint;
pub mod environment;
pub mod error;
pub mod events;
pub mod fault_system;
pub mod kpi;
pub mod line;
pub mod product;
pub mod quality;
pub mod station;
pub mod storage;

// Re-export main public types for convenience
pub use agv::Agv;
pub use config::FactoryConfig;
pub use conveyor::{Conveyor, TripleBufferConveyor};
pub use device::{Device, DeviceKind, DeviceStatus};
pub use endpoint::{BufferSlot, Endpoint};
pub use environment::Environment;
pub use error::{OpResult, OperationOutcome, SimError};
pub use fault_system::{DiagnosisResult, FaultSystem, FaultType};
pub use line::ProductionLine;
pub use product::{Product, ProductType};
pub use quality::QualityChecker;
pub use station::Station;
