pub mod app;
pub mod checkin;
pub mod config;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod infra;
pub mod notifications;
pub mod proximity;
pub mod services;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod tracker;

pub use app::TransitClient;
pub use config::Config;
pub use error::{SensorError, TrackerError};
