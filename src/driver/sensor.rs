use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SensorError;
use crate::geo::Coordinate;

pub type Fix = Result<Coordinate, SensorError>;

/// A device positioning source.
#[async_trait]
pub trait PositionSensor: Send + Sync {
    /// One high-accuracy fix.
    async fn current_position(&self) -> Fix;

    /// Starts a continuous watch. The watch stops when the receiver is dropped.
    fn watch_position(&self) -> mpsc::Receiver<Fix>;
}
