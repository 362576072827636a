//! Feature derivation from raw per-spot readings.
//!
//! A `ParkingReading` is turned into a `FeatureVector` by a pure function. Categorical
//! labels are resolved through fixed lookup tables and a full lot never divides by zero:
//! the queue pressure falls back to the configured `FullLotPolicy` sentinel.

use crate::error::{PricingError, ensure_finite};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

pub type SpotId = u32;

/// One observation for one spot at one timestamp, as delivered by the stream producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingReading {
    pub spot_id: SpotId,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub occupancy: u32,
    pub capacity: u32,
    pub queue_length: u32,
    pub vehicle_type: String,
    pub traffic: String,
    #[serde(default)]
    pub is_special_day: bool,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleType {
    Cycle,
    Bike,
    Car,
    Truck,
}

impl VehicleType {
    pub fn weight(self) -> f64 {
        match self {
            Self::Cycle => 0.25,
            Self::Bike => 0.5,
            Self::Car => 1.0,
            Self::Truck => 1.5,
        }
    }
}

impl FromStr for VehicleType {
    type Err = PricingError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.trim().to_ascii_lowercase().as_str() {
            "cycle" => Ok(Self::Cycle),
            "bike" => Ok(Self::Bike),
            "car" => Ok(Self::Car),
            "truck" => Ok(Self::Truck),
            _ => Err(PricingError::UnknownCategory {
                kind: "vehicle type",
                value: label.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficLevel {
    Low,
    Medium,
    High,
}

impl TrafficLevel {
    pub fn level(self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 1.0,
            Self::High => 2.0,
        }
    }

    /// Human-facing label used in prediction responses.
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Moderate",
            Self::High => "High",
        }
    }
}

impl FromStr for TrafficLevel {
    type Err = PricingError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "moderate" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(PricingError::UnknownCategory {
                kind: "traffic level",
                value: label.to_string(),
            }),
        }
    }
}

impl fmt::Display for TrafficLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Queue pressure reported when `occupancy == capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FullLotPolicy {
    /// Use the queue length itself, as if one space were left.
    #[default]
    QueueLength,
    /// Use a fixed value regardless of the queue.
    Fixed { value: f64 },
}

impl FullLotPolicy {
    pub fn sentinel(self, queue_length: u32) -> f64 {
        match self {
            Self::QueueLength => f64::from(queue_length),
            Self::Fixed { value } => value,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureConfig {
    #[serde(default)]
    pub full_lot: FullLotPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub utilization: f64,
    pub queue_pressure: f64,
    pub queue_length: f64,
    pub vehicle_weight: f64,
    pub traffic: TrafficLevel,
    pub special_day: f64,
}

impl FeatureVector {
    pub fn traffic_level(&self) -> f64 {
        self.traffic.level()
    }
}

pub fn derive(reading: &ParkingReading, config: &FeatureConfig) -> Result<FeatureVector, PricingError> {
    if reading.capacity == 0 {
        return Err(PricingError::InvalidInput(format!(
            "spot {} has non-positive capacity",
            reading.spot_id
        )));
    }
    if reading.occupancy > reading.capacity {
        return Err(PricingError::InvalidInput(format!(
            "spot {} occupancy {} exceeds capacity {}",
            reading.spot_id, reading.occupancy, reading.capacity
        )));
    }

    let vehicle: VehicleType = reading.vehicle_type.parse()?;
    let traffic: TrafficLevel = reading.traffic.parse()?;

    let utilization = f64::from(reading.occupancy) / f64::from(reading.capacity);
    let free = reading.capacity - reading.occupancy;
    let queue_pressure = if free == 0 {
        config.full_lot.sentinel(reading.queue_length)
    } else {
        f64::from(reading.queue_length) / f64::from(free)
    };

    Ok(FeatureVector {
        utilization: ensure_finite(utilization, "utilization")?,
        queue_pressure: ensure_finite(queue_pressure, "queue pressure")?,
        queue_length: f64::from(reading.queue_length),
        vehicle_weight: vehicle.weight(),
        traffic,
        special_day: if reading.is_special_day { 1.0 } else { 0.0 },
    })
}
