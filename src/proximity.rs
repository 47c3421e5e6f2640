//! Geofence classification of the vehicle relative to the rider's stop.

use serde::Serialize;

use crate::geo::{Coordinate, haversine_distance};

/// Distance at or under which the vehicle counts as arrived.
pub const ARRIVED_RADIUS_M: f64 = 30.0;
/// Distance at or under which the vehicle is inside the geofence.
pub const NEAR_RADIUS_M: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    Far,
    Near,
    Arrived,
}

impl Tier {
    /// Maps a distance in meters onto a tier.
    ///
    /// | Range            | Tier    |
    /// |------------------|---------|
    /// | <= 30 m          | Arrived |
    /// | <= 500 m         | Near    |
    /// | > 500 m          | Far     |
    pub fn for_distance(meters: f64) -> Self {
        match meters {
            d if d <= ARRIVED_RADIUS_M => Tier::Arrived,
            d if d <= NEAR_RADIUS_M => Tier::Near,
            _ => Tier::Far,
        }
    }

    /// Alert shown next to the distance; nothing while the bus is far.
    pub fn alert(self) -> Option<&'static str> {
        match self {
            Tier::Arrived => Some("BUS IS HERE!"),
            Tier::Near => Some("Within geofence!"),
            Tier::Far => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProximityReading {
    pub distance_meters: f64,
    pub tier: Tier,
}

/// Computes the distance from the vehicle to the stop and its tier.
pub fn classify(vehicle: Coordinate, stop: Coordinate) -> ProximityReading {
    let distance_meters = haversine_distance(vehicle, stop);
    ProximityReading {
        distance_meters,
        tier: Tier::for_distance(distance_meters),
    }
}
