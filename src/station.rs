//! Processing station with interruption-safe timing and downstream hand-off.

use crate::buffer::BoundedBuffer;
use crate::config::StationConfig;
use crate::conveyor::Transport;
use crate::device::{Device, DeviceCore, DeviceKind, DeviceStatus};
use crate::environment::{secs, Environment};
use crate::error::{OpResult, SimError};
use crate::events::{Alert, EventKind};
use crate::product::{Product, ProductType};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DOWNSTREAM_RETRY_S: f64 = 1.0;

/// Progress on the item at the head of the buffer. Lives on the station so an
/// interruption cannot lose it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingState {
    pub current_item_id: Option<String>,
    pub elapsed_time: f64,
    pub total_time_for_current_item: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationStats {
    pub processed_count: u32,
    pub total_processing_time: f64,
    pub interruptions: u32,
}

impl StationStats {
    pub fn average_processing_time(&self) -> f64 {
        if self.processed_count == 0 {
            0.0
        } else {
            self.total_processing_time / f64::from(self.processed_count)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationStatus {
    pub id: String,
    pub status: DeviceStatus,
    pub buffer_level: usize,
    pub buffer_capacity: usize,
    pub buffer_items: Vec<String>,
    pub timing: TimingState,
    pub processed_count: u32,
    pub average_processing_time: f64,
    pub interruptions: u32,
    pub downstream: Option<String>,
    pub symptom: Option<String>,
}

#[derive(Debug)]
pub struct Station {
    core: DeviceCore,
    config: StationConfig,
    buffer: BoundedBuffer,
    downstream: Mutex<Option<Transport>>,
    timing: Mutex<TimingState>,
    stats: Mutex<StationStats>,
}

impl Station {
    pub fn new(env: &Environment, config: StationConfig) -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(env, config.id.clone(), DeviceKind::Station),
            buffer: BoundedBuffer::new(format!("{}.buffer", config.id), config.buffer_size),
            config,
            downstream: Mutex::new(None),
            timing: Mutex::new(TimingState::default()),
            stats: Mutex::new(StationStats::default()),
        })
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        self.core.env().spawn(async move { this.process().await })
    }

    fn timing(&self) -> MutexGuard<'_, TimingState> {
        self.timing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, StationStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bind_downstream(&self, transport: Transport) {
        *self.downstream.lock().unwrap_or_else(PoisonError::into_inner) = Some(transport);
    }

    fn downstream(&self) -> Option<Transport> {
        self.downstream.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn buffer(&self) -> &BoundedBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn handling_time_s(&self) -> f64 {
        self.config.handling_time_s
    }

    pub fn get_buffer_level(&self) -> usize {
        self.buffer.len()
    }

    pub fn timing_state(&self) -> TimingState {
        self.timing().clone()
    }

    pub fn stats_snapshot(&self) -> StationStats {
        self.stats().clone()
    }

    /// Puts an item into the input buffer without waiting.
    pub fn accept(&self, item: Product) -> Result<(), Product> {
        self.buffer.try_push(item)
    }

    pub fn add_item(&self, item: Product) -> OpResult {
        let item_id = item.id.clone();
        self.accept(item)
            .map_err(|_| SimError::TargetFull(self.core.id().to_string()))?;
        Ok(format!("{item_id} added to {}", self.core.id()))
    }

    /// Removes an item from the input buffer (the head when `item_id` is `None`).
    ///
    /// The item currently being timed cannot be taken.
    pub fn take(&self, item_id: Option<&str>) -> Result<Product, SimError> {
        let target = match item_id {
            Some(id) => id.to_string(),
            None => self
                .buffer
                .front()
                .map(|(id, _)| id)
                .ok_or_else(|| SimError::BufferEmpty(self.core.id().to_string()))?,
        };
        if self.timing().current_item_id.as_deref() == Some(target.as_str()) {
            return Err(SimError::ItemInProcess { device: self.core.id().to_string(), item: target });
        }
        self.buffer
            .remove(&target)
            .ok_or_else(|| SimError::ItemNotFound { device: self.core.id().to_string(), item: target })
    }

    pub fn get_detailed_status(&self) -> StationStatus {
        let stats = self.stats_snapshot();
        StationStatus {
            id: self.core.id().to_string(),
            status: self.core.status(),
            buffer_level: self.buffer.len(),
            buffer_capacity: self.buffer.capacity(),
            buffer_items: self.buffer.item_ids(),
            timing: self.timing_state(),
            processed_count: stats.processed_count,
            average_processing_time: stats.average_processing_time(),
            interruptions: stats.interruptions,
            downstream: self.downstream().map(|t| t.id().to_string()),
            symptom: self.core.symptom(),
        }
    }

    /// Processing loop: time the head item, then hand it downstream. Never returns.
    pub async fn process(&self) {
        info!(station = %self.core.id(), "processing loop started");
        loop {
            let item = self.run_timed().await;
            let item_id = item.id.clone();
            self.transfer(item).await;
            self.complete(&item_id);
        }
    }

    /// Waits for an operable state and an item, then times it.
    ///
    /// An interruption during the timed wait records partial progress and leaves the item in
    /// the buffer. The returned item has already left the buffer.
    pub(crate) async fn run_timed(&self) -> Product {
        loop {
            self.core.wait_operable().await;
            self.buffer.item_available().await;
            if !self.core.can_operate() {
                continue;
            }
            let Some((item_id, product_type)) = self.buffer.front() else {
                continue;
            };

            let remaining = self.begin_timing(&item_id, product_type);
            self.core.set_status(DeviceStatus::Processing);
            let started = Instant::now();

            tokio::select! {
                biased;
                () = self.core.interrupted() => {
                    let done = started.elapsed().as_secs_f64();
                    let elapsed = self.record_interruption(done);
                    info!(
                        station = %self.core.id(),
                        item = %item_id,
                        elapsed,
                        status = %self.core.status(),
                        "processing interrupted"
                    );
                    continue;
                }
                () = tokio::time::sleep(secs(remaining)) => {}
            }

            let Some(mut item) = self.buffer.remove(&item_id) else {
                warn!(station = %self.core.id(), item = %item_id, "timed item left the buffer");
                *self.timing() = TimingState::default();
                continue;
            };
            {
                let mut timing = self.timing();
                timing.elapsed_time = timing.total_time_for_current_item;
            }
            item.record_step(self.core.id());
            debug!(station = %self.core.id(), item = %item.id, "processing finished");
            return item;
        }
    }

    /// Returns the time still to spend on `item_id`, drawing a fresh duration for a new item.
    fn begin_timing(&self, item_id: &str, product_type: ProductType) -> f64 {
        let mut timing = self.timing();
        if timing.current_item_id.as_deref() == Some(item_id) {
            let remaining = (timing.total_time_for_current_item - timing.elapsed_time).max(0.0);
            debug!(station = %self.core.id(), item = %item_id, remaining, "resuming");
            return remaining;
        }
        let (min, max) = self.config.processing_range(product_type);
        let total = self.core.env().uniform(min, max) / self.core.efficiency_rate();
        *timing = TimingState {
            current_item_id: Some(item_id.to_string()),
            elapsed_time: 0.0,
            total_time_for_current_item: total,
        };
        total
    }

    fn record_interruption(&self, done: f64) -> f64 {
        self.stats().interruptions += 1;
        let mut timing = self.timing();
        timing.elapsed_time = (timing.elapsed_time + done).min(timing.total_time_for_current_item);
        timing.elapsed_time
    }

    /// Hands `item` downstream, retrying until it succeeds. The item is never dropped.
    pub(crate) async fn transfer(&self, mut item: Product) {
        loop {
            self.core.wait_not_halted().await;
            let Some(transport) = self.downstream() else {
                if self.core.set_status(DeviceStatus::Blocked) {
                    warn!(station = %self.core.id(), "no downstream bound, holding item");
                }
                tokio::select! {
                    () = tokio::time::sleep(secs(DOWNSTREAM_RETRY_S)) => {}
                    () = self.core.wait_for_status(|s| s.is_halted()) => {}
                }
                continue;
            };

            match transport.try_push(item) {
                Ok(()) => {
                    self.core.set_status(DeviceStatus::Idle);
                    return;
                }
                Err(back) => {
                    item = back;
                    if self.core.set_status(DeviceStatus::Blocked) {
                        self.core.env().alert(Alert::BufferFull {
                            device: self.core.id().to_string(),
                            target: transport.id().to_string(),
                        });
                    }
                    tokio::select! {
                        () = transport.wait_accepting() => {}
                        () = self.core.wait_for_status(|s| s.is_halted()) => {}
                    }
                }
            }
        }
    }

    /// Bookkeeping once the item has left the station for good.
    pub(crate) fn complete(&self, item_id: &str) {
        let duration = {
            let mut timing = self.timing();
            let duration = timing.total_time_for_current_item;
            *timing = TimingState::default();
            duration
        };
        {
            let mut stats = self.stats();
            stats.processed_count += 1;
            stats.total_processing_time += duration;
        }
        let env = self.core.env();
        env.kpi().update_device_utilization(self.core.id(), duration);
        env.kpi().add_energy_cost(self.core.id(), self.core.telemetry().power_kw * duration / 3600.0);
        env.publish(EventKind::ItemCompleted {
            device: self.core.id().to_string(),
            item: item_id.to_string(),
        });
    }
}

impl Device for Station {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn buffer_level(&self) -> Option<usize> {
        Some(self.buffer.len())
    }
}
