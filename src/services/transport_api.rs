//! Trait and wire types for the transport backend.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

pub type StopId = i64;

/// One stop on a route. On this backend a stop is a rider's pickup point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub id: StopId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub pickup_order: Option<i64>,
    #[serde(default)]
    pub driving_time_seconds: Option<f64>,
    #[serde(default)]
    pub is_boarding_today: bool,
}

impl RouteStop {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Response of `GET /transport/my-route/`.
#[derive(Debug, Clone, Deserialize)]
pub struct RiderRoute {
    pub route_name: String,
    #[serde(default)]
    pub your_pickup_order: Option<i64>,
    #[serde(default)]
    pub all_stops_on_route: Vec<RouteStop>,
}

/// Response of `GET /transport/driver/my-route/`, already sorted by pickup order.
#[derive(Debug, Clone, Deserialize)]
pub struct DriverRoute {
    pub route_name: String,
    #[serde(default)]
    pub all_stops_on_route: Vec<RouteStop>,
}

/// Road-snapped path from the vehicle to the stop.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteGeometry {
    #[serde(default)]
    pub polyline: Vec<[f64; 2]>,
    #[serde(default)]
    pub snapped_start_point: Option<[f64; 2]>,
    #[serde(default)]
    pub bus_address: String,
}

impl RouteGeometry {
    pub fn path(&self) -> Vec<Coordinate> {
        self.polyline.iter().copied().map(Coordinate::from_pair).collect()
    }

    pub fn snapped_start(&self) -> Option<Coordinate> {
        self.snapped_start_point.map(Coordinate::from_pair)
    }
}

/// Abstraction over the transport backend's REST surface.
#[async_trait::async_trait]
pub trait TransportApi: Send + Sync {
    /// The signed-in rider's route and pickup order.
    async fn my_route(&self) -> Result<RiderRoute>;

    /// The signed-in driver's route.
    async fn driver_route(&self) -> Result<DriverRoute>;

    async fn route_geometry(&self, start: Coordinate, end: Coordinate) -> Result<RouteGeometry>;

    /// Publishes the driver's current position.
    async fn update_location(&self, position: Coordinate) -> Result<()>;

    async fn reverse_geocode(&self, position: Coordinate) -> Result<String>;

    async fn forward_geocode(&self, query: &str) -> Result<Coordinate>;

    /// Submits the full stop ordering for the driver's route.
    async fn reorder_stops(&self, stop_ids: &[StopId]) -> Result<()>;

    /// Sets whether the rider is boarding today.
    async fn check_in(&self, is_boarding: bool) -> Result<()>;
}
