//! Quality inspection station.

use crate::buffer::BoundedBuffer;
use crate::config::QualityCheckerConfig;
use crate::device::{Device, DeviceCore, DeviceStatus};
use crate::environment::Environment;
use crate::error::SimError;
use crate::events::Alert;
use crate::product::Product;
use crate::station::Station;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inspection {
    Pass,
    Scrap,
    Rework,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub inspected: u32,
    pub passed: u32,
    pub scrapped: u32,
    pub reworked: u32,
}

/// A station whose completed items are inspected and routed to its output buffer.
#[derive(Debug)]
pub struct QualityChecker {
    station: Arc<Station>,
    output_buffer: BoundedBuffer,
    pass_threshold: f64,
    scrap_threshold: f64,
    stats: Mutex<QualityStats>,
}

impl QualityChecker {
    pub fn new(env: &Environment, config: QualityCheckerConfig) -> Result<Arc<Self>, SimError> {
        config.validate()?;
        let output_name = format!("{}.output", config.station.id);
        Ok(Arc::new(Self {
            station: Station::new(env, config.station),
            output_buffer: BoundedBuffer::new(output_name, config.output_buffer_size),
            pass_threshold: config.pass_threshold,
            scrap_threshold: config.scrap_threshold,
            stats: Mutex::new(QualityStats::default()),
        }))
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        self.station.core().env().spawn(async move { this.process().await })
    }

    fn stats(&self) -> MutexGuard<'_, QualityStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The inspection station; conveyors bind to it like to any station.
    pub fn station(&self) -> &Arc<Station> {
        &self.station
    }

    pub fn input_buffer(&self) -> &BoundedBuffer {
        self.station.buffer()
    }

    pub fn output_buffer(&self) -> &BoundedBuffer {
        &self.output_buffer
    }

    pub fn stats_snapshot(&self) -> QualityStats {
        self.stats().clone()
    }

    pub fn take_output(&self, item_id: Option<&str>) -> Result<Product, SimError> {
        let taken = match item_id {
            Some(id) => self.output_buffer.remove(id),
            None => self.output_buffer.try_pop(),
        };
        taken.ok_or_else(|| match item_id {
            Some(id) => SimError::ItemNotFound { device: self.id().to_string(), item: id.to_string() },
            None => SimError::BufferEmpty(self.output_buffer.name().to_string()),
        })
    }

    /// Three-way decision. Rework is allowed once; a reworked item either passes or is scrapped.
    pub fn decide(&self, product: &Product) -> Inspection {
        let score = product.quality_score;
        if score >= self.pass_threshold {
            Inspection::Pass
        } else if product.rework_count >= 1 || score <= self.scrap_threshold {
            Inspection::Scrap
        } else {
            Inspection::Rework
        }
    }

    pub async fn process(&self) {
        info!(checker = %self.id(), "inspection loop started");
        loop {
            let item = self.station.run_timed().await;
            let item_id = item.id.clone();
            self.inspect(item).await;
            self.station.complete(&item_id);
        }
    }

    async fn inspect(&self, mut item: Product) -> Inspection {
        let decision = self.decide(&item);
        self.stats().inspected += 1;
        info!(checker = %self.id(), item = %item.id, score = item.quality_score, ?decision, "inspected");

        match decision {
            Inspection::Pass => {
                self.stats().passed += 1;
                self.push_output(item).await;
            }
            Inspection::Scrap => {
                self.stats().scrapped += 1;
                self.station.core().env().kpi().record_scrap(&item);
            }
            Inspection::Rework => {
                self.stats().reworked += 1;
                item.rework_count += 1;
                item.rework_target = item
                    .history
                    .iter()
                    .rev()
                    .find(|step| step.as_str() != self.id())
                    .cloned();
                self.push_output(item).await;
            }
        }
        self.station.core().set_status(DeviceStatus::Idle);
        decision
    }

    /// Suspends while the output buffer is full; the item is never dropped.
    async fn push_output(&self, mut item: Product) {
        let core = self.station.core();
        loop {
            core.wait_not_halted().await;
            match self.output_buffer.try_push(item) {
                Ok(()) => return,
                Err(back) => {
                    item = back;
                    if core.set_status(DeviceStatus::Blocked) {
                        core.env().alert(Alert::BufferFull {
                            device: self.id().to_string(),
                            target: self.output_buffer.name().to_string(),
                        });
                    }
                    tokio::select! {
                        () = self.output_buffer.space_available() => {}
                        () = core.wait_for_status(|s| s.is_halted()) => {}
                    }
                }
            }
        }
    }
}

impl Device for QualityChecker {
    fn core(&self) -> &DeviceCore {
        self.station.core()
    }

    fn buffer_level(&self) -> Option<usize> {
        Some(self.station.buffer().len() + self.output_buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::ProductType;

    fn checker(env: &Environment) -> Arc<QualityChecker> {
        QualityChecker::new(env, QualityCheckerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_first_inspection_has_three_outcomes() {
        let env = Environment::new();
        let qc = checker(&env);
        let item = |score| Product::new("p", ProductType::P1).with_quality(score);
        assert_eq!(qc.decide(&item(0.95)), Inspection::Pass);
        assert_eq!(qc.decide(&item(0.8)), Inspection::Pass);
        assert_eq!(qc.decide(&item(0.6)), Inspection::Rework);
        assert_eq!(qc.decide(&item(0.4)), Inspection::Scrap);
        assert_eq!(qc.decide(&item(0.1)), Inspection::Scrap);
    }

    #[tokio::test]
    async fn test_reworked_item_passes_or_scraps() {
        let env = Environment::new();
        let qc = checker(&env);
        let mut item = Product::new("p", ProductType::P2).with_quality(0.6);
        item.rework_count = 1;
        assert_eq!(qc.decide(&item), Inspection::Scrap);
        item.quality_score = 0.85;
        assert_eq!(qc.decide(&item), Inspection::Pass);
    }

    #[tokio::test]
    async fn test_rework_tags_item_with_last_station() {
        let env = Environment::new();
        let qc = checker(&env);
        let mut item = Product::new("p-1", ProductType::P1).with_quality(0.6);
        item.record_step("StationC");
        item.record_step("QualityCheck");

        assert_eq!(qc.inspect(item).await, Inspection::Rework);
        let routed = qc.take_output(None).unwrap();
        assert_eq!(routed.rework_count, 1);
        assert_eq!(routed.rework_target.as_deref(), Some("StationC"));
        assert_eq!(qc.status(), DeviceStatus::Idle);
    }

    #[tokio::test]
    async fn test_invalid_thresholds_rejected() {
        let env = Environment::new();
        let config = QualityCheckerConfig { pass_threshold: 0.3, ..QualityCheckerConfig::default() };
        assert!(QualityChecker::new(&env, config).is_err());
    }
}
