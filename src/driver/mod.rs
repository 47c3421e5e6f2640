//! Driver-side components: location broadcasting and the route's stop list.

mod broadcast;
mod dashboard;
mod sensor;
mod stops;

pub use broadcast::{BroadcastScheduler, BroadcastState, BroadcastStatus, PUBLISH_WARNING};
pub use dashboard::{DriverDashboard, DriverView};
pub use sensor::{Fix, PositionSensor};
pub use stops::{BoardingStatus, ListedStop, ReorderTicket, StopListing};
