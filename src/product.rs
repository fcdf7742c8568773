use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    P1,
    P2,
    P3,
}

impl ProductType {
    pub const ALL: [ProductType; 3] = [ProductType::P1, ProductType::P2, ProductType::P3];
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProductType::P1 => "P1",
            ProductType::P2 => "P2",
            ProductType::P3 => "P3",
        };
        f.write_str(name)
    }
}

/// A physical unit moving through the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub product_type: ProductType,
    /// Inspection score in `[0, 1]`, read by the quality checker.
    pub quality_score: f64,
    pub rework_count: u8,
    /// Ids of the processing stations that handled this unit, oldest first.
    pub history: Vec<String>,
    /// Station a reworked unit must return to.
    pub rework_target: Option<String>,
}

impl Product {
    pub fn new(id: impl Into<String>, product_type: ProductType) -> Self {
        Self {
            id: id.into(),
            product_type,
            quality_score: 1.0,
            rework_count: 0,
            history: Vec::new(),
            rework_target: None,
        }
    }

    pub fn with_quality(mut self, quality_score: f64) -> Self {
        self.quality_score = quality_score.clamp(0.0, 1.0);
        self
    }

    pub fn record_step(&mut self, station_id: &str) {
        self.history.push(station_id.to_string());
    }

    pub fn last_station(&self) -> Option<&str> {
        self.history.last().map(String::as_str)
    }
}
