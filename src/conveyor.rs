//! Conveyors: bounded transports that drain autonomously into a bound station.

use crate::buffer::BoundedBuffer;
use crate::config::{ConveyorConfig, TripleBufferConfig};
use crate::device::{Device, DeviceCore, DeviceKind, DeviceStatus};
use crate::environment::{secs, Environment};
use crate::events::Alert;
use crate::product::Product;
use crate::station::Station;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripleSlot {
    Main,
    Upper,
    Lower,
}

impl TripleSlot {
    pub const ALL: [TripleSlot; 3] = [TripleSlot::Main, TripleSlot::Upper, TripleSlot::Lower];
}

/// Single-lane conveyor.
#[derive(Debug)]
pub struct Conveyor {
    core: DeviceCore,
    buffer: BoundedBuffer,
    downstream: Mutex<Option<Arc<Station>>>,
    retry_interval_s: f64,
    handling_time_s: f64,
}

impl Conveyor {
    pub fn new(env: &Environment, config: &ConveyorConfig) -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(env, config.id.clone(), DeviceKind::Conveyor),
            buffer: BoundedBuffer::new(format!("{}.buffer", config.id), config.capacity),
            downstream: Mutex::new(None),
            retry_interval_s: config.retry_interval_s,
            handling_time_s: config.handling_time_s,
        })
    }

    /// Creates the conveyor and starts its drain task.
    pub fn spawn(env: &Environment, config: &ConveyorConfig) -> Arc<Self> {
        let conveyor = Self::new(env, config);
        conveyor.start();
        conveyor
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        self.core.env().spawn(async move { this.run().await })
    }

    pub fn bind_downstream(&self, station: Arc<Station>) {
        *self.downstream.lock().unwrap_or_else(PoisonError::into_inner) = Some(station);
    }

    pub fn downstream(&self) -> Option<Arc<Station>> {
        self.downstream.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn buffer(&self) -> &BoundedBuffer {
        &self.buffer
    }

    pub fn handling_time_s(&self) -> f64 {
        self.handling_time_s
    }

    pub fn can_accept(&self) -> bool {
        !self.core.status().is_halted() && !self.buffer.is_full()
    }

    /// Non-suspending push; refuses when halted or full.
    pub fn try_push(&self, item: Product) -> Result<(), Product> {
        if self.core.status().is_halted() {
            return Err(item);
        }
        self.buffer.try_push(item)
    }

    /// Suspends while the conveyor is full, raising a capacity alert first.
    pub async fn push(&self, item: Product) {
        if self.buffer.is_full() {
            self.core.env().alert(Alert::BufferFull {
                device: self.core.id().to_string(),
                target: self.core.id().to_string(),
            });
        }
        self.buffer.push(item).await;
    }

    pub async fn pop(&self) -> Product {
        self.buffer.pop().await
    }

    pub fn try_pop(&self) -> Option<Product> {
        self.buffer.try_pop()
    }

    pub async fn wait_accepting(&self) {
        loop {
            if self.can_accept() {
                return;
            }
            if self.core.status().is_halted() {
                self.core.wait_not_halted().await;
            } else {
                self.buffer.space_available().await;
            }
        }
    }

    async fn run(&self) {
        info!(conveyor = %self.core.id(), "drain task started");
        loop {
            let downstream = self.downstream();
            if drain_once(&self.core, &self.buffer, downstream.as_deref()) {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(secs(self.retry_interval_s)).await;
            }
        }
    }
}

impl Device for Conveyor {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn buffer_level(&self) -> Option<usize> {
        Some(self.buffer.len())
    }
}

/// Conveyor with an auto-drained main lane and two manual side lanes.
#[derive(Debug)]
pub struct TripleBufferConveyor {
    core: DeviceCore,
    main: BoundedBuffer,
    upper: BoundedBuffer,
    lower: BoundedBuffer,
    downstream: Mutex<Option<Arc<Station>>>,
    retry_interval_s: f64,
    handling_time_s: f64,
}

impl TripleBufferConveyor {
    pub fn new(env: &Environment, config: &TripleBufferConfig) -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(env, config.id.clone(), DeviceKind::Conveyor),
            main: BoundedBuffer::new(format!("{}.main", config.id), config.main_capacity),
            upper: BoundedBuffer::new(format!("{}.upper", config.id), config.upper_capacity),
            lower: BoundedBuffer::new(format!("{}.lower", config.id), config.lower_capacity),
            downstream: Mutex::new(None),
            retry_interval_s: config.retry_interval_s,
            handling_time_s: config.handling_time_s,
        })
    }

    pub fn spawn(env: &Environment, config: &TripleBufferConfig) -> Arc<Self> {
        let conveyor = Self::new(env, config);
        conveyor.start();
        conveyor
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        self.core.env().spawn(async move { this.run().await })
    }

    pub fn bind_downstream(&self, station: Arc<Station>) {
        *self.downstream.lock().unwrap_or_else(PoisonError::into_inner) = Some(station);
    }

    pub fn downstream(&self) -> Option<Arc<Station>> {
        self.downstream.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn lane(&self, slot: TripleSlot) -> &BoundedBuffer {
        match slot {
            TripleSlot::Main => &self.main,
            TripleSlot::Upper => &self.upper,
            TripleSlot::Lower => &self.lower,
        }
    }

    pub fn handling_time_s(&self) -> f64 {
        self.handling_time_s
    }

    pub fn can_accept(&self) -> bool {
        !self.core.status().is_halted() && TripleSlot::ALL.iter().any(|&s| !self.lane(s).is_full())
    }

    /// Station hand-off: main lane first, then overflow into upper and lower.
    pub fn try_push(&self, mut item: Product) -> Result<TripleSlot, Product> {
        if self.core.status().is_halted() {
            return Err(item);
        }
        for slot in TripleSlot::ALL {
            match self.lane(slot).try_push(item) {
                Ok(()) => {
                    if slot != TripleSlot::Main {
                        debug!(conveyor = %self.core.id(), ?slot, "main lane full, item overflowed");
                    }
                    return Ok(slot);
                }
                Err(back) => item = back,
            }
        }
        Err(item)
    }

    /// Suspending push into one lane, raising a capacity alert when it is full.
    pub async fn push_to(&self, slot: TripleSlot, item: Product) {
        let lane = self.lane(slot);
        if lane.is_full() {
            self.core.env().alert(Alert::BufferFull {
                device: self.core.id().to_string(),
                target: lane.name().to_string(),
            });
        }
        lane.push(item).await;
    }

    pub async fn push(&self, item: Product) {
        self.push_to(TripleSlot::Main, item).await;
    }

    pub fn try_pop_from(&self, slot: TripleSlot) -> Option<Product> {
        self.lane(slot).try_pop()
    }

    pub async fn wait_accepting(&self) {
        loop {
            if self.can_accept() {
                return;
            }
            if self.core.status().is_halted() {
                self.core.wait_not_halted().await;
            } else {
                tokio::select! {
                    () = self.main.space_available() => {}
                    () = self.upper.space_available() => {}
                    () = self.lower.space_available() => {}
                }
            }
        }
    }

    async fn run(&self) {
        info!(conveyor = %self.core.id(), "drain task started (main lane only)");
        loop {
            let downstream = self.downstream();
            if drain_once(&self.core, &self.main, downstream.as_deref()) {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(secs(self.retry_interval_s)).await;
            }
        }
    }
}

impl Device for TripleBufferConveyor {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn buffer_level(&self) -> Option<usize> {
        Some(self.main.len() + self.upper.len() + self.lower.len())
    }
}

/// Moves the head of `lane` into `downstream` when both sides allow it.
fn drain_once(core: &DeviceCore, lane: &BoundedBuffer, downstream: Option<&Station>) -> bool {
    let Some(station) = downstream else {
        return false;
    };
    if !core.can_operate() || station.status() == DeviceStatus::Blocked || station.buffer().is_full() {
        return false;
    }
    let Some(item) = lane.try_pop() else {
        return false;
    };
    let item_id = item.id.clone();
    match station.accept(item) {
        Ok(()) => {
            debug!(conveyor = %core.id(), station = %station.id(), item = %item_id, "item transferred");
            true
        }
        Err(back) => {
            lane.restore_front(back);
            false
        }
    }
}

/// Where a station hands finished items.
#[derive(Debug, Clone)]
pub enum Transport {
    Conveyor(Arc<Conveyor>),
    TripleBuffer(Arc<TripleBufferConveyor>),
}

impl Transport {
    pub fn id(&self) -> &str {
        match self {
            Transport::Conveyor(c) => c.core.id(),
            Transport::TripleBuffer(c) => c.core.id(),
        }
    }

    pub fn try_push(&self, item: Product) -> Result<(), Product> {
        match self {
            Transport::Conveyor(c) => c.try_push(item),
            Transport::TripleBuffer(c) => c.try_push(item).map(|_| ()),
        }
    }

    pub async fn wait_accepting(&self) {
        match self {
            Transport::Conveyor(c) => c.wait_accepting().await,
            Transport::TripleBuffer(c) => c.wait_accepting().await,
        }
    }
}
