//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result, bail};
use reqwest::{Client, Method, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// `base` with each of `segments` appended as one percent-encoded path segment.
pub fn url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid URL {base:?}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("{base:?} cannot be used as a base URL"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub async fn get_json<R: DeserializeOwned>(client: &Client, url: Url) -> Result<R> {
    let resp = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("failed to connect to {url}, is emunetd running?"))?;
    read_json(resp).await
}

pub async fn send_json<T, R>(client: &Client, method: Method, url: Url, body: &T) -> Result<R>
where
    T: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let resp = client
        .request(method, url.clone())
        .json(body)
        .send()
        .await
        .with_context(|| format!("failed to connect to {url}, is emunetd running?"))?;
    read_json(resp).await
}

/// Error responses carry a plain-text reason; surface it.
async fn read_json<R: DeserializeOwned>(resp: Response) -> Result<R> {
    let status = resp.status();
    if !status.is_success() {
        let reason = resp.text().await.unwrap_or_default();
        bail!("request failed ({status}): {reason}");
    }
    resp.json::<R>().await.context("failed to parse response")
}
