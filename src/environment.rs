//! Scheduling environment shared by every device.

use crate::events::{Alert, EventKind, SimEvent};
use crate::kpi::{KpiSink, NoopKpi};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

const EVENT_BUS_CAPACITY: usize = 1024;
const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

struct EnvInner {
    handle: Handle,
    origin: Instant,
    rng: Mutex<StdRng>,
    events: broadcast::Sender<SimEvent>,
    kpi: Arc<dyn KpiSink>,
}

/// Cloneable handle to the simulation clock, RNG, event bus and KPI sink.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    /// Creates an environment bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime: devices cannot be scheduled without one.
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED, Arc::new(NoopKpi))
    }

    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_seed(seed: u64, kpi: Arc<dyn KpiSink>) -> Self {
        let handle = Handle::try_current()
            .unwrap_or_else(|e| panic!("cellsim environment requires a tokio runtime: {e}"));
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            inner: Arc::new(EnvInner {
                handle,
                origin: Instant::now(),
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
                events,
                kpi,
            }),
        }
    }

    /// Simulation time in seconds since the environment was created.
    pub fn now(&self) -> f64 {
        self.inner.origin.elapsed().as_secs_f64()
    }

    pub fn kpi(&self) -> &dyn KpiSink {
        self.inner.kpi.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimEvent> {
        self.inner.events.subscribe()
    }

    pub fn publish(&self, kind: EventKind) {
        // No subscribers is fine.
        let _ = self.inner.events.send(SimEvent { time_s: self.now(), kind });
    }

    pub fn alert(&self, alert: Alert) {
        warn!(?alert, "alert raised");
        self.publish(EventKind::Alert(alert));
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    /// Uniform draw from `[min, max]`; returns `min` for an empty range.
    pub fn uniform(&self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        self.with_rng(|rng| rng.gen_range(min..=max))
    }

    pub fn chance(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        self.with_rng(|rng| rng.gen_bool(probability.min(1.0)))
    }

    pub fn pick_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.with_rng(|rng| rng.gen_range(0..len)))
    }

    pub fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = self.inner.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment").field("now", &self.now()).finish_non_exhaustive()
    }
}

/// Converts simulated seconds into a sleep duration, treating negatives and NaN as zero.
/// Values too large for a `Duration` saturate to `Duration::MAX`.
pub fn secs(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}
