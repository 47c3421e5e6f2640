//! HTTP implementation of [`TransportApi`](crate::services::transport_api::TransportApi).

mod client;

pub use client::BackendClient;
