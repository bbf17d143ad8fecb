//! WiiM / LinkPlay HTTP API client
//!
//! The device answers `GET /httpapi.asp?command=<cmd>` with JSON. Only two
//! status commands are needed for now-playing:
//!
//! - `getMetaInfo`     → `{"metaData": {"artist", "title", "album", "albumArtURI"}}`
//! - `getPlayerStatus` → `{"status": "play" | "pause" | "stop" | "load", ...}`
//!
//! Every status call is best effort: network errors, non-200 responses and
//! unparsable bodies are logged at debug and come back as "unknown".

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::{Endpoint, PlaybackRecord};
use crate::config::DeviceConfig;

const META_INFO: &str = "getMetaInfo";
const PLAYER_STATUS: &str = "getPlayerStatus";
const NEXT_TRACK: &str = "setPlayerCmd:next";

/// Operations the core needs from a device. `WiimClient` talks HTTP; tests
/// substitute scripted fakes.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Does `endpoint` answer the status query with HTTP 200 and a JSON body?
    async fn probe(&self, endpoint: &Endpoint) -> bool;

    /// Query both status commands and merge them. Never fails.
    async fn now_playing(&self, endpoint: &Endpoint) -> PlaybackRecord;

    async fn next_track(&self, endpoint: &Endpoint) -> Result<()>;

    /// Fetch `url` and return the body only for a 200 `image/*` response
    async fn fetch_image(&self, url: &str) -> Option<Vec<u8>>;

    /// Fetch `url` as text (SSDP description documents)
    async fn fetch_text(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Default, Deserialize)]
struct MetaInfoResponse {
    #[serde(rename = "metaData", alias = "meta_data", default)]
    meta_data: Option<MetaData>,
}

#[derive(Debug, Default, Deserialize)]
struct MetaData {
    artist: Option<String>,
    title: Option<String>,
    album: Option<String>,
    #[serde(rename = "albumArtURI", alias = "album_art_uri")]
    album_art_uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayerStatusResponse {
    #[serde(alias = "playbackState")]
    status: Option<String>,
}

/// reqwest-backed client for the device HTTP API
#[derive(Clone)]
pub struct WiimClient {
    http: Client,
    control_path: String,
    probe_timeout: Duration,
}

impl WiimClient {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            http,
            control_path: config.control_path.clone(),
            probe_timeout: config.probe_timeout(),
        })
    }

    fn command_url(&self, endpoint: &Endpoint, command: &str) -> String {
        endpoint.url(&format!("{}?command={}", self.control_path, command))
    }

    /// GET a command and return the body of a 200 response
    async fn command_text(
        &self,
        endpoint: &Endpoint,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let url = self.command_url(endpoint, command);
        let mut request = self.http.get(&url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(anyhow!("{} returned {}", url, status));
        }
        Ok(response.text().await?)
    }

    async fn command_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> Result<T> {
        let body = self.command_text(endpoint, command, None).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl DeviceApi for WiimClient {
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        match self
            .command_text(endpoint, META_INFO, Some(self.probe_timeout))
            .await
        {
            Ok(body) => match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(_) => {
                    tracing::debug!("HTTP API probe succeeded at {}", endpoint);
                    true
                }
                Err(e) => {
                    tracing::debug!(
                        "HTTP API probe at {}: body is not JSON (len={}): {}",
                        endpoint,
                        body.len(),
                        e
                    );
                    false
                }
            },
            Err(e) => {
                tracing::debug!("HTTP API probe at {} failed: {}", endpoint, e);
                false
            }
        }
    }

    async fn now_playing(&self, endpoint: &Endpoint) -> PlaybackRecord {
        let (meta, status) = tokio::join!(
            self.command_json::<MetaInfoResponse>(endpoint, META_INFO),
            self.command_json::<PlayerStatusResponse>(endpoint, PLAYER_STATUS),
        );

        let meta = meta
            .map_err(|e| tracing::debug!("getMetaInfo from {} failed: {}", endpoint, e))
            .ok()
            .and_then(|m| m.meta_data)
            .unwrap_or_default();
        let status = status
            .map_err(|e| tracing::debug!("getPlayerStatus from {} failed: {}", endpoint, e))
            .ok()
            .unwrap_or_default();

        PlaybackRecord::from_fields(
            meta.artist,
            meta.title,
            meta.album,
            meta.album_art_uri,
            status.status,
        )
    }

    async fn next_track(&self, endpoint: &Endpoint) -> Result<()> {
        self.command_text(endpoint, NEXT_TRACK, None).await?;
        tracing::debug!("setPlayerCmd:next accepted by {}", endpoint);
        Ok(())
    }

    async fn fetch_image(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Artwork candidate {} failed: {}", url, e);
                return None;
            }
        };

        let is_image = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("image/"));

        if response.status() != StatusCode::OK || !is_image {
            tracing::debug!(
                "Artwork candidate {} rejected (status {}, image: {})",
                url,
                response.status(),
                is_image
            );
            return None;
        }

        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                tracing::debug!("Artwork body from {} failed: {}", url, e);
                None
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> Option<String> {
        let response = self
            .http
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| tracing::debug!("Fetching {} failed: {}", url, e))
            .ok()?;
        response.text().await.ok()
    }
}
