mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::Result;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Executes `req` and turns any non-2xx status into an error carrying the body.
pub async fn send<C: HttpClient + ?Sized>(client: &C, req: Request) -> Result<Response> {
    let method = req.method().clone();
    let url = req.url().clone();

    let resp = client
        .execute(req)
        .await
        .map_err(|e| anyhow::anyhow!("{method} {url} failed: {e}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!("{method} {url} returned status {status}: {body}"));
    }

    Ok(resp)
}

/// GETs `url` and decodes the JSON body.
pub async fn get_json<C, T>(client: &C, url: Url) -> Result<T>
where
    C: HttpClient + ?Sized,
    T: DeserializeOwned,
{
    let resp = send(client, Request::new(Method::GET, url)).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Sends `body` as JSON with the given method; the response body is dropped.
pub async fn send_json<C, B>(client: &C, method: Method, url: Url, body: &B) -> Result<()>
where
    C: HttpClient + ?Sized,
    B: Serialize + ?Sized,
{
    let mut req = Request::new(method, url);
    req.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    *req.body_mut() = Some(serde_json::to_vec(body)?.into());

    send(client, req).await?;
    Ok(())
}
