//! Poll loop / track-change state machine
//!
//! One tick per interval: fetch the record from the current endpoint, rotate
//! away from an endpoint that keeps answering with nothing, hide on stop, and
//! re-resolve artwork only when the track identity changes. A tick never
//! fails; network trouble shows up as an empty or partial record.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::artwork::{AlbumArtResolver, ResolveTargets};
use crate::bus::{BusEvent, SharedBus};
use crate::config::Config;
use crate::device::{DeviceApi, Discovery, Endpoint, EndpointCache, PlaybackRecord, TrackIdentity};
use crate::display::{Artwork, Presentation, TrackText};

/// Latest record and the endpoint it came from, shared with gesture handling
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub record: PlaybackRecord,
    pub endpoint: Endpoint,
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// All-empty record, below the rotation threshold
    Empty { consecutive: u32 },
    /// Threshold reached; `endpoint` is the replacement, if one was found
    Rotated { endpoint: Option<Endpoint> },
    /// Playback stopped and the album was hidden
    Hidden,
    /// Still stopped, already hidden
    Stopped,
    Unchanged,
    Updated { placeholder: bool },
}

pub struct Poller {
    api: Arc<dyn DeviceApi>,
    discovery: Discovery,
    endpoints: EndpointCache,
    resolver: AlbumArtResolver,
    presentation: Arc<dyn Presentation>,
    bus: SharedBus,
    current: Endpoint,
    empty_count: u32,
    empty_threshold: u32,
    last_identity: Option<TrackIdentity>,
    stop_hidden: bool,
    interval: Duration,
    latest: watch::Sender<NowPlaying>,
}

impl Poller {
    pub fn new(
        api: Arc<dyn DeviceApi>,
        discovery: Discovery,
        endpoints: EndpointCache,
        initial: Endpoint,
        presentation: Arc<dyn Presentation>,
        bus: SharedBus,
        config: &Config,
    ) -> Self {
        let (latest, _) = watch::channel(NowPlaying {
            record: PlaybackRecord::default(),
            endpoint: initial.clone(),
        });

        Self {
            resolver: AlbumArtResolver::new(api.clone(), &config.artwork),
            api,
            discovery,
            endpoints,
            presentation,
            bus,
            current: initial,
            empty_count: 0,
            empty_threshold: config.poll.empty_threshold.max(1),
            last_identity: None,
            stop_hidden: false,
            interval: config.poll.interval(),
            latest,
        }
    }

    /// Follow the latest record (gesture handling reads artist/title/endpoint)
    pub fn subscribe(&self) -> watch::Receiver<NowPlaying> {
        self.latest.subscribe()
    }

    pub fn current_endpoint(&self) -> &Endpoint {
        &self.current
    }

    pub fn empty_count(&self) -> u32 {
        self.empty_count
    }

    pub async fn tick(&mut self) -> TickOutcome {
        let mut record = self.api.now_playing(&self.current).await;

        if record.is_empty() {
            self.empty_count += 1;
            if self.empty_count < self.empty_threshold {
                tracing::debug!(
                    "Empty record from {} ({}/{})",
                    self.current,
                    self.empty_count,
                    self.empty_threshold
                );
                return TickOutcome::Empty {
                    consecutive: self.empty_count,
                };
            }

            // Rotation runs inside the tick, so the hidden/playing check
            // below never sees a half-swapped endpoint
            let endpoint = self.rotate().await;
            self.empty_count = 0;
            return TickOutcome::Rotated { endpoint };
        }
        self.empty_count = 0;

        record.normalize();
        self.latest.send_replace(NowPlaying {
            record: record.clone(),
            endpoint: self.current.clone(),
        });

        if record.is_stopped() {
            if self.stop_hidden {
                return TickOutcome::Stopped;
            }
            tracing::info!("Playback stopped, hiding album");
            self.presentation.hide_album().await;
            self.bus.publish(BusEvent::PlaybackStopped);
            self.stop_hidden = true;
            return TickOutcome::Hidden;
        }
        self.stop_hidden = false;

        if record.is_playing() && !self.presentation.is_showing().await {
            self.last_identity = None;
        }

        let identity = record.identity();
        if self.last_identity.as_ref() == Some(&identity) {
            return TickOutcome::Unchanged;
        }

        tracing::info!("Track changed: {}", identity);
        let image = self
            .resolver
            .resolve(
                &record,
                ResolveTargets {
                    current: Some(&self.current),
                    endpoints: &mut self.endpoints,
                    discovery: &self.discovery,
                },
            )
            .await;

        let artwork = Artwork::from_lookup(image);
        let placeholder = artwork.is_placeholder();
        self.presentation
            .update(artwork, TrackText::from_record(&record))
            .await;
        self.last_identity = Some(identity);

        self.bus.publish(BusEvent::TrackChanged {
            artist: record.artist,
            title: record.title,
            album: record.album,
        });

        TickOutcome::Updated { placeholder }
    }

    /// Move to the next cached endpoint, or discover a new one when the
    /// cache has no alternative
    async fn rotate(&mut self) -> Option<Endpoint> {
        tracing::warn!(
            "{} returned {} empty records in a row, looking for another endpoint",
            self.current,
            self.empty_count
        );

        self.endpoints.warmup(&self.discovery).await;
        let mut next = next_after(self.endpoints.all(), &self.current);

        if next.is_none() {
            next = self
                .discovery
                .discover(&mut self.endpoints)
                .await
                .into_iter()
                .find(|e| *e != self.current);
        }

        match next {
            Some(endpoint) => {
                tracing::info!("Switching endpoint {} -> {}", self.current, endpoint);
                self.current = endpoint.clone();
                self.bus.publish(BusEvent::EndpointChanged {
                    endpoint: endpoint.clone(),
                });
                Some(endpoint)
            }
            None => {
                tracing::info!("No alternative endpoint, staying on {}", self.current);
                None
            }
        }
    }

    /// Tick until shutdown; ticks are skipped while `paused` is true
    pub async fn run(mut self, paused: watch::Receiver<bool>, shutdown: CancellationToken) {
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Polling {} every {:?}",
            self.current,
            self.interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    if *paused.borrow() {
                        continue;
                    }
                    // A tick can spend a long time probing artwork paths
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::debug!("Abandoning tick in progress");
                            break;
                        }
                        outcome = self.tick() => tracing::trace!("Tick: {:?}", outcome),
                    }
                }
            }
        }
        tracing::info!("Poll loop shutting down");
    }
}

/// Endpoint after `current` in cache order, wrapping around
fn next_after(all: &[Endpoint], current: &Endpoint) -> Option<Endpoint> {
    let start = all.iter().position(|e| e == current).map_or(0, |i| i + 1);
    all.iter()
        .cycle()
        .skip(start)
        .take(all.len())
        .find(|e| *e != current)
        .cloned()
}
