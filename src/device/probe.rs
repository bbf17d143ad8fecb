//! Candidate prober: find the scheme/port a device really answers on
//!
//! Devices are inconsistently reachable (https on 443, http on a custom port,
//! ...), so a guess is expanded into variants and each one is probed in order
//! until one answers the status query with JSON.

use std::sync::Arc;

use super::{DeviceApi, Endpoint, EndpointCache};

pub struct CandidateProber {
    api: Arc<dyn DeviceApi>,
}

impl CandidateProber {
    pub fn new(api: Arc<dyn DeviceApi>) -> Self {
        Self { api }
    }

    /// Ordered, duplicate-free probe variants for a guess:
    /// as given, default port for its scheme, opposite scheme on the same
    /// port, opposite scheme on its default port.
    pub fn variants(guess: &Endpoint) -> Vec<Endpoint> {
        let opposite = guess.scheme.opposite();
        let candidates = [
            guess.clone(),
            guess.with_port(guess.scheme.default_port()),
            guess.with_scheme(opposite),
            guess
                .with_scheme(opposite)
                .with_port(opposite.default_port()),
        ];

        let mut unique: Vec<Endpoint> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !unique.contains(&candidate) {
                unique.push(candidate);
            }
        }
        unique
    }

    /// Return the first variant that speaks the control API, caching it
    pub async fn validate(&self, guess: &Endpoint, cache: &mut EndpointCache) -> Option<Endpoint> {
        for candidate in Self::variants(guess) {
            if self.api.probe(&candidate).await {
                if cache.add(candidate.clone()) {
                    tracing::info!("Validated device endpoint {}", candidate);
                }
                return Some(candidate);
            }
        }

        tracing::debug!("No variant of {} answered the control API", guess);
        None
    }
}
