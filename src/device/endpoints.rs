//! Endpoint cache and discovery
//!
//! The cache is populated once (configured base, then SSDP + probing) and then
//! only grows when later lookups find a new working base. It is owned by the
//! poll loop; nothing else mutates it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::{CandidateProber, DeviceApi, Endpoint, LocationSource};

/// Markers in a description document that suggest a LinkPlay/WiiM device
const DEVICE_HINTS: &[&str] = &[
    "linkplay",
    "wiim",
    "httpapi.asp",
    "getmetainfo",
    "getplayerstatus",
];

/// Ordered set of validated base endpoints
#[derive(Debug, Default, Clone)]
pub struct EndpointCache {
    endpoints: Vec<Endpoint>,
    warmed: bool,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint; returns false if it was already cached
    pub fn add(&mut self, endpoint: Endpoint) -> bool {
        if self.endpoints.contains(&endpoint) {
            return false;
        }
        self.endpoints.push(endpoint);
        true
    }

    pub fn all(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.contains(endpoint)
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed
    }

    /// Populate on first call (configured base, then discovery); afterwards
    /// return the cached set without probing again.
    pub async fn warmup(&mut self, discovery: &Discovery) -> Vec<Endpoint> {
        if self.warmed {
            return self.endpoints.clone();
        }

        if let Some(seed) = discovery.seed() {
            if discovery.prober().validate(seed, self).await.is_none() {
                tracing::warn!("Configured device {} did not answer the control API", seed);
            }
        }

        discovery.discover(self).await;
        self.warmed = true;

        tracing::info!(
            "Endpoint warmup cached {} endpoint(s): {:?}",
            self.endpoints.len(),
            self.endpoints
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        );
        self.endpoints.clone()
    }
}

/// SSDP discovery plus probing of the discovered locations
pub struct Discovery {
    api: Arc<dyn DeviceApi>,
    prober: CandidateProber,
    locations: Option<Arc<dyn LocationSource>>,
    timeout: Duration,
    seed: Option<Endpoint>,
}

impl Discovery {
    /// `locations` is `None` when network discovery is disabled
    pub fn new(
        api: Arc<dyn DeviceApi>,
        locations: Option<Arc<dyn LocationSource>>,
        timeout: Duration,
        seed: Option<Endpoint>,
    ) -> Self {
        Self {
            prober: CandidateProber::new(api.clone()),
            api,
            locations,
            timeout,
            seed,
        }
    }

    pub fn prober(&self) -> &CandidateProber {
        &self.prober
    }

    pub fn seed(&self) -> Option<&Endpoint> {
        self.seed.as_ref()
    }

    /// Run a fresh SSDP search and return every location that validates,
    /// in discovery order. Validated endpoints are added to `cache`.
    pub async fn discover(&self, cache: &mut EndpointCache) -> Vec<Endpoint> {
        let Some(source) = &self.locations else {
            return Vec::new();
        };

        let mut found = Vec::new();
        // Bases already validated this round, whatever the outcome
        let mut tried = HashSet::new();
        for location in source.discover_locations(self.timeout).await {
            let Some(base) = Endpoint::parse(&location) else {
                tracing::debug!("Ignoring unparsable SSDP location {:?}", location);
                continue;
            };
            if tried.contains(&base) {
                continue;
            }

            if !self.looks_like_device(&location).await {
                tracing::debug!("SSDP location {} has no device hints, skipping", location);
                continue;
            }

            tried.insert(base.clone());
            if let Some(endpoint) = self.prober.validate(&base, cache).await {
                if !found.contains(&endpoint) {
                    found.push(endpoint);
                }
            }
        }
        found
    }

    /// An unreadable description is not evidence against the device
    async fn looks_like_device(&self, location: &str) -> bool {
        match self.api.fetch_text(location).await {
            Some(text) => has_device_hint(&text),
            None => true,
        }
    }
}

pub fn has_device_hint(description: &str) -> bool {
    let lowered = description.to_lowercase();
    DEVICE_HINTS.iter().any(|hint| lowered.contains(hint))
}
