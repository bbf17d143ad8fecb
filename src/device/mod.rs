//! WiiM / LinkPlay device model, HTTP API client and endpoint discovery

pub mod client;
pub mod endpoints;
pub mod probe;
pub mod ssdp;

pub use client::{DeviceApi, WiimClient};
pub use endpoints::{Discovery, EndpointCache};
pub use probe::CandidateProber;
pub use ssdp::{LocationSource, SsdpDiscoverer};

use serde::Serialize;
use std::fmt;

/// URL scheme of a device endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Scheme::Http => Scheme::Https,
            Scheme::Https => Scheme::Http,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// A base address (scheme, host, port) believed to serve the control API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    /// Parse a base guess or an SSDP LOCATION into its base endpoint.
    ///
    /// Bare hosts (`192.168.1.20`, `wiim.local:8443`) default to https, which
    /// is what the devices serve their API on. Paths and queries are dropped.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };

        let url = url::Url::parse(&with_scheme).ok()?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return None,
        };
        let host = url.host_str()?.to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        Some(Self { scheme, host, port })
    }

    pub fn with_scheme(&self, scheme: Scheme) -> Self {
        Self::new(scheme, self.host.clone(), self.port)
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.scheme, self.host.clone(), port)
    }

    /// Join an absolute path (with optional query) onto this base
    pub fn url(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self, path_and_query)
        } else {
            format!("{}/{}", self, path_and_query)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// Transport state as reported by `getPlayerStatus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    Loading,
    Other(String),
}

impl PlaybackState {
    pub fn from_device(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "play" | "playing" => PlaybackState::Playing,
            "pause" | "paused" => PlaybackState::Paused,
            "stop" | "stopped" | "none" | "idle" => PlaybackState::Stopped,
            "load" | "loading" | "buffering" | "transitioning" => PlaybackState::Loading,
            other => PlaybackState::Other(other.to_string()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PlaybackState::Stopped)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Change-detection key derived from artist and title
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackIdentity(String);

impl TrackIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One poll tick's view of the device. `None` means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackRecord {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    /// Always an absolute http(s) URL when present
    pub album_art_uri: Option<String>,
    pub state: Option<PlaybackState>,
}

impl PlaybackRecord {
    /// Build a record from raw device fields. Blank strings become `None`
    /// and a non-absolute art URI is dropped.
    pub fn from_fields(
        artist: Option<String>,
        title: Option<String>,
        album: Option<String>,
        album_art_uri: Option<String>,
        state: Option<String>,
    ) -> Self {
        Self {
            artist: non_blank(artist),
            title: non_blank(title),
            album: non_blank(album),
            album_art_uri: non_blank(album_art_uri).filter(|uri| is_absolute_http_url(uri)),
            state: non_blank(state).map(|s| PlaybackState::from_device(&s)),
        }
    }

    /// True when the device told us nothing at all
    pub fn is_empty(&self) -> bool {
        self.artist.is_none()
            && self.title.is_none()
            && self.album.is_none()
            && self.album_art_uri.is_none()
            && self.state.is_none()
    }

    /// Drop an album art URI that is not an absolute http(s) URL
    pub fn normalize(&mut self) {
        if let Some(uri) = &self.album_art_uri {
            if !is_absolute_http_url(uri) {
                tracing::debug!("Ignoring non-absolute albumArtURI {:?}", uri);
                self.album_art_uri = None;
            }
        }
    }

    pub fn identity(&self) -> TrackIdentity {
        TrackIdentity(format!(
            "{} - {}",
            self.artist.as_deref().unwrap_or(""),
            self.title.as_deref().unwrap_or("")
        ))
    }

    pub fn is_stopped(&self) -> bool {
        self.state.as_ref().is_some_and(PlaybackState::is_stopped)
    }

    pub fn is_playing(&self) -> bool {
        self.state.as_ref().is_some_and(PlaybackState::is_playing)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `http://` or `https://` URL with a host
pub fn is_absolute_http_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
