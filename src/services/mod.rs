pub mod transport_api;
