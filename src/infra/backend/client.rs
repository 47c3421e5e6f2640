use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fetch::{self, HttpClient};
use crate::geo::Coordinate;
use crate::services::transport_api::{
    DriverRoute, RiderRoute, RouteGeometry, StopId, TransportApi,
};

#[derive(Serialize)]
struct LocationUpdate {
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize)]
struct ReorderRequest<'a> {
    stop_ids: &'a [StopId],
}

#[derive(Serialize)]
struct CheckInRequest {
    is_boarding: bool,
}

#[derive(Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Deserialize)]
struct GeocodeResponse {
    latitude: f64,
    longitude: f64,
}

/// REST client for the transport backend.
///
/// `http` is expected to already carry credentials, typically a
/// [`Bearer`](crate::fetch::auth::Bearer) around a
/// [`BasicClient`](crate::fetch::BasicClient).
pub struct BackendClient<C> {
    base_url: String,
    http: C,
}

impl<C: HttpClient> BackendClient<C> {
    pub fn new(base_url: &str, http: C) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let url = format!("{}{}", self.base_url, path);
        url.parse()
            .map_err(|e| anyhow::anyhow!("invalid endpoint '{url}': {e}"))
    }

    fn endpoint_with_query(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.endpoint(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl<C: HttpClient> TransportApi for BackendClient<C> {
    #[tracing::instrument(skip(self))]
    async fn my_route(&self) -> Result<RiderRoute> {
        fetch::get_json(&self.http, self.endpoint("/transport/my-route/")?).await
    }

    #[tracing::instrument(skip(self))]
    async fn driver_route(&self) -> Result<DriverRoute> {
        fetch::get_json(&self.http, self.endpoint("/transport/driver/my-route/")?).await
    }

    #[tracing::instrument(skip(self), fields(start_lat = start.latitude, start_lon = start.longitude))]
    async fn route_geometry(&self, start: Coordinate, end: Coordinate) -> Result<RouteGeometry> {
        let url = self.endpoint_with_query(
            "/transport/route-geometry/",
            &[
                ("start_lat", start.latitude.to_string()),
                ("start_lon", start.longitude.to_string()),
                ("end_lat", end.latitude.to_string()),
                ("end_lon", end.longitude.to_string()),
            ],
        )?;
        let geometry: RouteGeometry = fetch::get_json(&self.http, url).await?;
        debug!(points = geometry.polyline.len(), "Route geometry received");
        Ok(geometry)
    }

    #[tracing::instrument(skip(self), fields(lat = position.latitude, lon = position.longitude))]
    async fn update_location(&self, position: Coordinate) -> Result<()> {
        let body = LocationUpdate {
            latitude: position.latitude,
            longitude: position.longitude,
        };
        fetch::send_json(
            &self.http,
            Method::POST,
            self.endpoint("/transport/update-location/")?,
            &body,
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(lat = position.latitude, lon = position.longitude))]
    async fn reverse_geocode(&self, position: Coordinate) -> Result<String> {
        let url = self.endpoint_with_query(
            "/students/reverse-geocode/",
            &[
                ("lat", position.latitude.to_string()),
                ("lon", position.longitude.to_string()),
            ],
        )?;
        let resp: AddressResponse = fetch::get_json(&self.http, url).await?;
        Ok(resp.address)
    }

    #[tracing::instrument(skip(self))]
    async fn forward_geocode(&self, query: &str) -> Result<Coordinate> {
        let url =
            self.endpoint_with_query("/students/forward-geocode/", &[("q", query.to_string())])?;
        let resp: GeocodeResponse = fetch::get_json(&self.http, url).await?;
        Ok(Coordinate::new(resp.latitude, resp.longitude))
    }

    #[tracing::instrument(skip(self), fields(stops = stop_ids.len()))]
    async fn reorder_stops(&self, stop_ids: &[StopId]) -> Result<()> {
        fetch::send_json(
            &self.http,
            Method::PUT,
            self.endpoint("/transport/driver/reorder-stops/")?,
            &ReorderRequest { stop_ids },
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn check_in(&self, is_boarding: bool) -> Result<()> {
        fetch::send_json(
            &self.http,
            Method::POST,
            self.endpoint("/students/check-in/")?,
            &CheckInRequest { is_boarding },
        )
        .await
    }
}
