//! SSDP discovery of candidate device locations
//!
//! One `M-SEARCH` for `ssdp:all` is sent to 239.255.255.250:1900 and the
//! `LOCATION` headers of every reply are collected until the timeout. The
//! search runs on its own spawned task so a slow network never stalls the
//! poll loop, and any failure simply yields no locations.

use async_trait::async_trait;
use futures::StreamExt;
use ssdp_client::SearchTarget;
use std::time::Duration;

/// Source of raw discovery locations (SSDP in production, canned lists in tests)
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn discover_locations(&self, timeout: Duration) -> Vec<String>;
}

/// Multicast SSDP discoverer
#[derive(Debug, Clone)]
pub struct SsdpDiscoverer {
    mx: usize,
}

impl SsdpDiscoverer {
    pub fn new(mx: usize) -> Self {
        Self { mx: mx.max(1) }
    }

    async fn search(mx: usize, timeout: Duration) -> Vec<String> {
        let responses = match ssdp_client::search(&SearchTarget::All, timeout, mx, None).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("SSDP search failed: {}", e);
                return Vec::new();
            }
        };
        futures::pin_mut!(responses);

        let mut locations = Vec::new();
        while let Some(response) = responses.next().await {
            match response {
                Ok(r) => locations.push(r.location().to_string()),
                Err(e) => tracing::debug!("SSDP response error: {}", e),
            }
        }
        dedup_locations(locations)
    }
}

impl Default for SsdpDiscoverer {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl LocationSource for SsdpDiscoverer {
    async fn discover_locations(&self, timeout: Duration) -> Vec<String> {
        let mx = self.mx;
        let worker = tokio::spawn(Self::search(mx, timeout));

        // The stream ends on its own at `timeout`; the extra second only
        // guards against a wedged socket.
        match tokio::time::timeout(timeout + Duration::from_secs(1), worker).await {
            Ok(Ok(locations)) => {
                tracing::debug!("SSDP discovered {} location(s)", locations.len());
                locations
            }
            Ok(Err(e)) => {
                tracing::debug!("SSDP worker failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::debug!("SSDP worker timed out");
                Vec::new()
            }
        }
    }
}

/// Keep the first occurrence of each location, preserving reply order
pub fn dedup_locations<I>(locations: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unique: Vec<String> = Vec::new();
    for location in locations {
        let location = location.trim().to_string();
        if !location.is_empty() && !unique.contains(&location) {
            unique.push(location);
        }
    }
    unique
}
