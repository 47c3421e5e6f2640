use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;

/// Opens live connections. One call per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>>;
}

/// One established bidirectional channel.
#[async_trait]
pub trait Connection: Send {
    /// Next text frame, or `None` once the peer has closed the channel.
    ///
    /// Must be cancel-safe: the session drops this future when it is asked
    /// to shut down.
    async fn next_frame(&mut self) -> Option<Result<String>>;

    /// Closes the channel. Errors are swallowed; the connection is unusable
    /// afterwards either way.
    async fn close(&mut self);
}
