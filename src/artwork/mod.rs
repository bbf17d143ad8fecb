//! Album art resolution
//!
//! Strategies, first hit wins:
//! 1. the record's absolute `albumArtURI`
//! 2. the configured `{artist}`/`{track}` template
//! 3. (guard) skip probing for unknown tracks or tracks in cooldown
//! 4. common image paths on the current endpoint, every cached endpoint,
//!    then freshly discovered devices
//!
//! A miss at step 4 puts the track into a cooldown so the next ticks do not
//! hammer the network again for the same track.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ArtworkConfig;
use crate::device::{
    is_absolute_http_url, DeviceApi, Discovery, Endpoint, EndpointCache, PlaybackRecord,
    TrackIdentity,
};

/// Image paths LinkPlay-style devices and bridges commonly serve
pub const COMMON_PATHS: &[&str] = &[
    "/albumart?artist={artist}&track={track}",
    "/albumart.jpg?artist={artist}&track={track}",
    "/nowplaying/albumart?artist={artist}&track={track}",
    "/nowplaying.jpg",
    "/now_playing.jpg",
    "/image.jpg",
    "/AlbumArt?artist={artist}&track={track}",
    "/photo.jpg",
];

/// Substrings (lowercase) that mark a field as not a real artist/title
const UNKNOWN_MARKERS: &[&str] = &["unknow", "n/a"];

/// Tracks whose lookup recently failed
#[derive(Debug)]
pub struct NegativeArtCache {
    entries: HashMap<TrackIdentity, Instant>,
    cooldown: Duration,
}

impl NegativeArtCache {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            cooldown,
        }
    }

    pub fn record(&mut self, identity: TrackIdentity, at: Instant) {
        let cooldown = self.cooldown;
        self.entries
            .retain(|_, failed_at| at.saturating_duration_since(*failed_at) < cooldown);
        self.entries.insert(identity, at);
    }

    /// Suppressed for exactly `cooldown` after the failure
    pub fn is_suppressed(&self, identity: &TrackIdentity, now: Instant) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|failed_at| now.saturating_duration_since(*failed_at) < self.cooldown)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where probing may look, borrowed from the poll loop's state
pub struct ResolveTargets<'a> {
    pub current: Option<&'a Endpoint>,
    pub endpoints: &'a mut EndpointCache,
    pub discovery: &'a Discovery,
}

pub struct AlbumArtResolver {
    api: Arc<dyn DeviceApi>,
    template: Option<String>,
    probe_common_paths: bool,
    negative: NegativeArtCache,
}

impl AlbumArtResolver {
    pub fn new(api: Arc<dyn DeviceApi>, config: &ArtworkConfig) -> Self {
        Self {
            api,
            template: config
                .template
                .clone()
                .filter(|t| !t.trim().is_empty()),
            probe_common_paths: config.probe_common_paths,
            negative: NegativeArtCache::new(config.negative_cooldown()),
        }
    }

    pub fn negative_cache(&self) -> &NegativeArtCache {
        &self.negative
    }

    pub async fn resolve(
        &mut self,
        record: &PlaybackRecord,
        targets: ResolveTargets<'_>,
    ) -> Option<Vec<u8>> {
        if let Some(uri) = record
            .album_art_uri
            .as_deref()
            .filter(|uri| is_absolute_http_url(uri))
        {
            if let Some(image) = self.api.fetch_image(uri).await {
                tracing::debug!("Artwork from albumArtURI {}", uri);
                return Some(image);
            }
        }

        let artist = record.artist.as_deref().unwrap_or("");
        let title = record.title.as_deref().unwrap_or("");

        if let Some(template) = &self.template {
            if let Some(image) = self.fetch_template(template, artist, title, targets.current).await
            {
                return Some(image);
            }
        }

        if !self.probe_common_paths {
            return None;
        }

        if !is_known(artist) || !is_known(title) {
            tracing::debug!("Skipping artwork probing for unknown track {:?}", record.identity());
            return None;
        }

        let identity = record.identity();
        if self.negative.is_suppressed(&identity, Instant::now()) {
            tracing::debug!("Artwork lookup for {} is cooling down", identity);
            return None;
        }

        match probe_targets(self.api.as_ref(), artist, title, targets).await {
            Some(image) => Some(image),
            None => {
                tracing::info!("No artwork found for {}", identity);
                self.negative.record(identity, Instant::now());
                None
            }
        }
    }

    async fn fetch_template(
        &self,
        template: &str,
        artist: &str,
        title: &str,
        current: Option<&Endpoint>,
    ) -> Option<Vec<u8>> {
        let filled = fill_template(template, artist, title);
        let url = if is_absolute_http_url(&filled) {
            filled
        } else if let Some(base) = current {
            base.url(&filled)
        } else {
            tracing::debug!("No endpoint to resolve relative artwork template {}", filled);
            return None;
        };

        let image = self.api.fetch_image(&url).await;
        if image.is_none() {
            tracing::debug!("Artwork template URL failed: {}", url);
        }
        image
    }
}

/// Current endpoint, then cached ones, then a fresh discovery pass
async fn probe_targets(
    api: &dyn DeviceApi,
    artist: &str,
    title: &str,
    targets: ResolveTargets<'_>,
) -> Option<Vec<u8>> {
    let ResolveTargets {
        current,
        endpoints,
        discovery,
    } = targets;

    let mut tried: Vec<Endpoint> = Vec::new();
    let mut bases: Vec<Endpoint> = current.into_iter().cloned().collect();
    bases.extend(endpoints.all().iter().cloned());

    for base in bases {
        if tried.contains(&base) {
            continue;
        }
        if let Some(image) = try_common_paths(api, &base, artist, title).await {
            endpoints.add(base);
            return Some(image);
        }
        tried.push(base);
    }

    for base in discovery.discover(endpoints).await {
        if tried.contains(&base) {
            continue;
        }
        if let Some(image) = try_common_paths(api, &base, artist, title).await {
            if endpoints.add(base.clone()) {
                tracing::info!("Cached artwork endpoint {}", base);
            }
            return Some(image);
        }
        tried.push(base);
    }

    None
}

async fn try_common_paths(
    api: &dyn DeviceApi,
    base: &Endpoint,
    artist: &str,
    title: &str,
) -> Option<Vec<u8>> {
    for template in COMMON_PATHS {
        let url = base.url(&fill_template(template, artist, title));
        if let Some(image) = api.fetch_image(&url).await {
            tracing::debug!("Artwork from {}", url);
            return Some(image);
        }
    }
    None
}

/// Substitute `{artist}` and `{track}` (or `{title}`), form-encoded
pub fn fill_template(template: &str, artist: &str, title: &str) -> String {
    let artist_q = encode(artist.trim());
    let title_q = encode(title.trim());
    template
        .replace("{artist}", &artist_q)
        .replace("{track}", &title_q)
        .replace("{title}", &title_q)
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn is_known(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    !lowered.is_empty() && !UNKNOWN_MARKERS.iter().any(|m| lowered.contains(m))
}
