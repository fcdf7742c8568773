//! Raw-material source and finished-goods warehouse.

use crate::buffer::BoundedBuffer;
use crate::config::StorageConfig;
use crate::device::{Device, DeviceCore, DeviceKind};
use crate::environment::Environment;
use crate::events::EventKind;
use crate::product::{Product, ProductType};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

const MIN_RAW_QUALITY: f64 = 0.3;

#[derive(Debug)]
pub struct RawMaterial {
    core: DeviceCore,
    buffer: BoundedBuffer,
    handling_time_s: f64,
    next_serial: AtomicU32,
}

impl RawMaterial {
    pub fn new(env: &Environment, config: &StorageConfig) -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(env, config.id.clone(), DeviceKind::RawMaterial),
            buffer: BoundedBuffer::new(format!("{}.buffer", config.id), config.capacity),
            handling_time_s: config.handling_time_s,
            next_serial: AtomicU32::new(1),
        })
    }

    pub fn buffer(&self) -> &BoundedBuffer {
        &self.buffer
    }

    pub fn handling_time_s(&self) -> f64 {
        self.handling_time_s
    }

    /// Adds up to `count` fresh products with random quality; returns the ids created.
    pub fn supply(&self, product_type: ProductType, count: usize) -> Vec<String> {
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
            let quality = self.core.env().uniform(MIN_RAW_QUALITY, 1.0);
            let product = Product::new(format!("{product_type}-{serial:04}"), product_type).with_quality(quality);
            let id = product.id.clone();
            if self.buffer.try_push(product).is_err() {
                break;
            }
            created.push(id);
        }
        info!(source = %self.core.id(), %product_type, supplied = created.len(), "raw material supplied");
        created
    }
}

impl Device for RawMaterial {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn buffer_level(&self) -> Option<usize> {
        Some(self.buffer.len())
    }
}

#[derive(Debug)]
pub struct Warehouse {
    core: DeviceCore,
    buffer: BoundedBuffer,
    handling_time_s: f64,
}

impl Warehouse {
    pub fn new(env: &Environment, config: &StorageConfig) -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(env, config.id.clone(), DeviceKind::Warehouse),
            buffer: BoundedBuffer::new(format!("{}.buffer", config.id), config.capacity),
            handling_time_s: config.handling_time_s,
        })
    }

    pub fn buffer(&self) -> &BoundedBuffer {
        &self.buffer
    }

    pub fn handling_time_s(&self) -> f64 {
        self.handling_time_s
    }

    /// Stores a finished product and reports it as a completed order item.
    pub fn store(&self, item: Product) -> Result<(), Product> {
        let report = item.clone();
        self.buffer.try_push(item)?;
        let env = self.core.env();
        env.kpi().complete_order_item(&report);
        env.publish(EventKind::ItemCompleted { device: self.core.id().to_string(), item: report.id });
        Ok(())
    }
}

impl Device for Warehouse {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn buffer_level(&self) -> Option<usize> {
        Some(self.buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::KpiRecorder;

    #[tokio::test]
    async fn test_supply_stops_at_capacity() {
        let env = Environment::new();
        let raw = RawMaterial::new(&env, &StorageConfig::new("RawMaterial", 3));
        let ids = raw.supply(ProductType::P2, 5);
        assert_eq!(ids, vec!["P2-0001", "P2-0002", "P2-0003"]);
        assert!(raw.buffer().is_full());
        assert!(raw
            .buffer()
            .snapshot()
            .iter()
            .all(|p| (MIN_RAW_QUALITY..=1.0).contains(&p.quality_score)));
    }

    #[tokio::test]
    async fn test_store_reports_completion() {
        let kpi = Arc::new(KpiRecorder::new());
        let env = Environment::with_seed(1, kpi.clone());
        let warehouse = Warehouse::new(&env, &StorageConfig::new("Warehouse", 10));
        warehouse.store(Product::new("p-1", ProductType::P1)).unwrap();
        assert_eq!(kpi.snapshot().completed_items, 1);
        assert_eq!(warehouse.buffer_level(), Some(1));
    }
}
