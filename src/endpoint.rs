//! Uniform buffer access for AGV load and unload across device shapes.

use crate::buffer::BoundedBuffer;
use crate::conveyor::{Conveyor, TripleBufferConveyor, TripleSlot};
use crate::device::Device;
use crate::error::SimError;
use crate::product::Product;
use crate::quality::QualityChecker;
use crate::station::Station;
use crate::storage::{RawMaterial, Warehouse};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferSlot {
    Buffer,
    Output,
    Main,
    Upper,
    Lower,
}

impl fmt::Display for BufferSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BufferSlot::Buffer => "buffer",
            BufferSlot::Output => "output",
            BufferSlot::Main => "main",
            BufferSlot::Upper => "upper",
            BufferSlot::Lower => "lower",
        };
        f.write_str(name)
    }
}

impl FromStr for BufferSlot {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buffer" | "input" | "input_buffer" => Ok(BufferSlot::Buffer),
            "output" | "output_buffer" => Ok(BufferSlot::Output),
            "main" => Ok(BufferSlot::Main),
            "upper" => Ok(BufferSlot::Upper),
            "lower" => Ok(BufferSlot::Lower),
            other => Err(SimError::UnknownSlot { device: "-".to_string(), slot: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Load,
    Unload,
}

/// A device an AGV can load from or unload to.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Station(Arc<Station>),
    QualityChecker(Arc<QualityChecker>),
    Conveyor(Arc<Conveyor>),
    TripleBuffer(Arc<TripleBufferConveyor>),
    RawMaterial(Arc<RawMaterial>),
    Warehouse(Arc<Warehouse>),
}

impl Endpoint {
    pub fn device(&self) -> &dyn Device {
        match self {
            Endpoint::Station(d) => d.as_ref(),
            Endpoint::QualityChecker(d) => d.as_ref(),
            Endpoint::Conveyor(d) => d.as_ref(),
            Endpoint::TripleBuffer(d) => d.as_ref(),
            Endpoint::RawMaterial(d) => d.as_ref(),
            Endpoint::Warehouse(d) => d.as_ref(),
        }
    }

    pub fn id(&self) -> &str {
        self.device().id()
    }

    /// Seconds an AGV spends handling one item at this device.
    pub fn handling_time_s(&self) -> f64 {
        match self {
            Endpoint::Station(d) => d.handling_time_s(),
            Endpoint::QualityChecker(d) => d.station().handling_time_s(),
            Endpoint::Conveyor(d) => d.handling_time_s(),
            Endpoint::TripleBuffer(d) => d.handling_time_s(),
            Endpoint::RawMaterial(d) => d.handling_time_s(),
            Endpoint::Warehouse(d) => d.handling_time_s(),
        }
    }

    fn unknown_slot(&self, slot: Option<BufferSlot>) -> SimError {
        SimError::UnknownSlot {
            device: self.id().to_string(),
            slot: slot.map_or_else(|| "default".to_string(), |s| s.to_string()),
        }
    }

    fn resolve(&self, slot: Option<BufferSlot>, direction: Direction) -> Result<&BoundedBuffer, SimError> {
        use BufferSlot::{Buffer, Lower, Main, Output, Upper};
        use Direction::{Load, Unload};

        match (self, slot, direction) {
            (Endpoint::Station(s), None | Some(Buffer), _) => Ok(s.buffer()),
            (Endpoint::QualityChecker(q), Some(Buffer), _) | (Endpoint::QualityChecker(q), None, Unload) => {
                Ok(q.input_buffer())
            }
            (Endpoint::QualityChecker(q), Some(Output), Load) | (Endpoint::QualityChecker(q), None, Load) => {
                Ok(q.output_buffer())
            }
            (Endpoint::Conveyor(c), None | Some(Buffer | Main), _) => Ok(c.buffer()),
            (Endpoint::TripleBuffer(_), None, _) => Err(SimError::MissingParameter("slot")),
            (Endpoint::TripleBuffer(t), Some(Main), _) => Ok(t.lane(TripleSlot::Main)),
            (Endpoint::TripleBuffer(t), Some(Upper), _) => Ok(t.lane(TripleSlot::Upper)),
            (Endpoint::TripleBuffer(t), Some(Lower), _) => Ok(t.lane(TripleSlot::Lower)),
            (Endpoint::RawMaterial(r), None | Some(Buffer), Load) => Ok(r.buffer()),
            (Endpoint::Warehouse(w), None | Some(Buffer), Unload) => Ok(w.buffer()),
            _ => Err(self.unknown_slot(slot)),
        }
    }

    pub fn is_full(&self, slot: Option<BufferSlot>) -> Result<bool, SimError> {
        Ok(self.resolve(slot, Direction::Unload)?.is_full())
    }

    pub fn is_empty(&self, slot: Option<BufferSlot>) -> Result<bool, SimError> {
        Ok(self.resolve(slot, Direction::Load)?.is_empty())
    }

    /// Removes an item (the head when `item_id` is `None`).
    pub fn pop(&self, slot: Option<BufferSlot>, item_id: Option<&str>) -> Result<Product, SimError> {
        let buffer = self.resolve(slot, Direction::Load)?;
        if let Endpoint::Station(station) = self {
            return station.take(item_id);
        }
        if let Endpoint::QualityChecker(checker) = self {
            if std::ptr::eq(buffer, checker.input_buffer()) {
                return checker.station().take(item_id);
            }
        }
        let taken = match item_id {
            Some(id) => buffer.remove(id),
            None => buffer.try_pop(),
        };
        taken.ok_or_else(|| match item_id {
            Some(id) => SimError::ItemNotFound { device: self.id().to_string(), item: id.to_string() },
            None => SimError::BufferEmpty(buffer.name().to_string()),
        })
    }

    /// Inserts an item without waiting. On refusal the item is handed back with the reason.
    pub fn push(&self, slot: Option<BufferSlot>, item: Product) -> Result<(), (Product, SimError)> {
        let buffer = match self.resolve(slot, Direction::Unload) {
            Ok(buffer) => buffer,
            Err(e) => return Err((item, e)),
        };
        let full = || SimError::TargetFull(buffer.name().to_string());
        match self {
            Endpoint::Warehouse(w) => w.store(item).map_err(|back| (back, full())),
            _ => buffer.try_push(item).map_err(|back| (back, full())),
        }
    }
}
