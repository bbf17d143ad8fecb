//! Touch gesture multiplexer
//!
//! Taps are counted in a sliding window: one tap shows the detail view, two
//! skip to the next track, three or more run the favorite script. Single and
//! double taps are dispatched after the window closes so a double tap does not
//! also show details; a third tap fires immediately and drops the pending one.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, Gesture, SharedBus};
use crate::config::Config;
use crate::device::DeviceApi;
use crate::display::Presentation;
use crate::poller::NowPlaying;
use crate::timer::CancellableTimer;

/// Sender half used by input sources (remote `tap` command) to inject taps
pub type TapSender = mpsc::Sender<()>;

const SKIP_ATTEMPTS: u32 = 2;

/// Recent tap timestamps inside the window
#[derive(Debug)]
pub struct TapWindow {
    taps: VecDeque<Instant>,
    window: Duration,
}

impl TapWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            taps: VecDeque::new(),
            window,
        }
    }

    /// Record a tap and return how many taps are now in the window.
    /// A count of three or more empties the window.
    pub fn register(&mut self, at: Instant) -> usize {
        while let Some(&oldest) = self.taps.front() {
            if at.saturating_duration_since(oldest) > self.window {
                self.taps.pop_front();
            } else {
                break;
            }
        }

        self.taps.push_back(at);
        let count = self.taps.len();
        if count >= 3 {
            self.taps.clear();
        }
        count
    }
}

pub fn classify(count: usize) -> Gesture {
    match count {
        0 | 1 => Gesture::ShowDetails,
        2 => Gesture::SkipNext,
        _ => Gesture::Favorite,
    }
}

/// Side effects of a recognised gesture
pub struct GestureActions {
    api: Arc<dyn DeviceApi>,
    presentation: Arc<dyn Presentation>,
    bus: SharedBus,
    now_playing: watch::Receiver<NowPlaying>,
    favorite_script: Option<PathBuf>,
    details_timeout: Duration,
}

impl GestureActions {
    pub fn new(
        api: Arc<dyn DeviceApi>,
        presentation: Arc<dyn Presentation>,
        bus: SharedBus,
        now_playing: watch::Receiver<NowPlaying>,
        config: &Config,
    ) -> Self {
        Self {
            api,
            presentation,
            bus,
            now_playing,
            favorite_script: config.gesture.favorite_script.clone(),
            details_timeout: config.display.touch_details_timeout(),
        }
    }

    pub async fn perform(&self, gesture: Gesture) {
        tracing::debug!("Gesture: {:?}", gesture);
        self.bus.publish(BusEvent::GestureTriggered { gesture });

        match gesture {
            Gesture::ShowDetails => {
                self.presentation
                    .show_details(Some(self.details_timeout))
                    .await
            }
            Gesture::SkipNext => self.skip_next().await,
            Gesture::Favorite => self.favorite().await,
        }
    }

    async fn skip_next(&self) {
        let endpoint = self.now_playing.borrow().endpoint.clone();

        for attempt in 1..=SKIP_ATTEMPTS {
            match self.api.next_track(&endpoint).await {
                Ok(()) => {
                    tracing::info!("Skipped to next track on {}", endpoint);
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "Next track failed ({}/{}): {}",
                        attempt,
                        SKIP_ATTEMPTS,
                        e
                    );
                }
            }
        }
    }

    async fn favorite(&self) {
        let Some(script) = &self.favorite_script else {
            tracing::info!("Triple tap, but no favorite script is configured");
            return;
        };

        let record = self.now_playing.borrow().record.clone();
        let status = Command::new(script)
            .arg(record.artist.unwrap_or_default())
            .arg(record.title.unwrap_or_default())
            .arg(record.album.unwrap_or_default())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                tracing::info!("Favorite script {} finished", script.display())
            }
            Ok(status) => tracing::warn!(
                "Favorite script {} exited with {}",
                script.display(),
                status
            ),
            Err(e) => tracing::error!("Failed to run favorite script {}: {}", script.display(), e),
        }
    }
}

pub struct GestureMultiplexer {
    window: Mutex<TapWindow>,
    pending: CancellableTimer,
    delay: Duration,
    actions: Arc<GestureActions>,
}

impl GestureMultiplexer {
    pub fn new(actions: GestureActions, tap_window: Duration) -> Self {
        Self {
            window: Mutex::new(TapWindow::new(tap_window)),
            pending: CancellableTimer::new(),
            delay: tap_window,
            actions: Arc::new(actions),
        }
    }

    pub fn tap(&self) -> Gesture {
        self.tap_at(Instant::now())
    }

    pub fn tap_at(&self, at: Instant) -> Gesture {
        let count = self
            .window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .register(at);
        let gesture = classify(count);

        let actions = self.actions.clone();
        match gesture {
            Gesture::Favorite => {
                self.pending.cancel();
                tokio::spawn(async move { actions.perform(gesture).await });
            }
            _ => {
                // The timer only hands off; a later tap must not abort a
                // skip that is already in flight
                self.pending.arm(self.delay, async move {
                    tokio::spawn(async move { actions.perform(gesture).await });
                });
            }
        }
        gesture
    }

    /// Consume taps until shutdown or until every sender is gone
    pub async fn run(self, mut taps: mpsc::Receiver<()>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Gesture handling shutting down");
                    break;
                }
                tap = taps.recv() => match tap {
                    Some(()) => {
                        self.tap();
                    }
                    None => break,
                },
            }
        }
        self.pending.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;
    use crate::device::{Endpoint, PlaybackRecord, Scheme};
    use crate::display::{Artwork, TrackText};
    use anyhow::anyhow;
    use async_trait::async_trait;

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn test_three_taps_inside_window_is_favorite() {
        let mut window = TapWindow::new(Duration::from_millis(600));
        let t0 = Instant::now();

        assert_eq!(window.register(at(t0, 0)), 1);
        assert_eq!(window.register(at(t0, 200)), 2);
        let count = window.register(at(t0, 500));
        assert_eq!(count, 3);
        assert_eq!(classify(count), Gesture::Favorite);

        // Window was cleared
        assert_eq!(window.register(at(t0, 550)), 1);
    }

    #[test]
    fn test_taps_across_eviction_do_not_accumulate() {
        let mut window = TapWindow::new(Duration::from_millis(600));
        let t0 = Instant::now();

        assert_eq!(window.register(at(t0, 0)), 1);
        assert_eq!(window.register(at(t0, 900)), 1);
        assert_eq!(classify(1), Gesture::ShowDetails);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(1), Gesture::ShowDetails);
        assert_eq!(classify(2), Gesture::SkipNext);
        assert_eq!(classify(3), Gesture::Favorite);
        assert_eq!(classify(7), Gesture::Favorite);
    }

    /// Fails `next_track` a fixed number of times, then succeeds
    #[derive(Default)]
    struct FlakyDevice {
        failures: Mutex<u32>,
        next_calls: Mutex<u32>,
    }

    #[async_trait]
    impl DeviceApi for FlakyDevice {
        async fn probe(&self, _endpoint: &Endpoint) -> bool {
            true
        }

        async fn now_playing(&self, _endpoint: &Endpoint) -> PlaybackRecord {
            PlaybackRecord::default()
        }

        async fn next_track(&self, _endpoint: &Endpoint) -> anyhow::Result<()> {
            *self.next_calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(anyhow!("connection reset"));
            }
            Ok(())
        }

        async fn fetch_image(&self, _url: &str) -> Option<Vec<u8>> {
            None
        }

        async fn fetch_text(&self, _url: &str) -> Option<String> {
            None
        }
    }

    #[derive(Default)]
    struct DetailCounter {
        shown: Mutex<Vec<Option<Duration>>>,
    }

    #[async_trait]
    impl Presentation for DetailCounter {
        async fn update(&self, _artwork: Artwork, _text: TrackText) {}

        async fn show_details(&self, timeout: Option<Duration>) {
            self.shown.lock().unwrap().push(timeout);
        }

        async fn hide_album(&self) {}

        async fn is_showing(&self) -> bool {
            true
        }
    }

    struct Harness {
        device: Arc<FlakyDevice>,
        presentation: Arc<DetailCounter>,
        bus: SharedBus,
        mux: GestureMultiplexer,
        _latest: watch::Sender<NowPlaying>,
    }

    fn harness(failures: u32) -> Harness {
        let device = Arc::new(FlakyDevice {
            failures: Mutex::new(failures),
            ..Default::default()
        });
        let presentation = Arc::new(DetailCounter::default());
        let bus = create_bus();
        let (latest, rx) = watch::channel(NowPlaying {
            record: PlaybackRecord::default(),
            endpoint: Endpoint::new(Scheme::Https, "10.0.0.5", 443),
        });
        let actions = GestureActions::new(
            device.clone(),
            presentation.clone(),
            bus.clone(),
            rx,
            &Config::default(),
        );

        Harness {
            device,
            presentation,
            bus,
            mux: GestureMultiplexer::new(actions, Duration::from_millis(600)),
            _latest: latest,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_tap_shows_details_after_window() {
        let h = harness(0);

        assert_eq!(h.mux.tap(), Gesture::ShowDetails);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(h.presentation.shown.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(
            *h.presentation.shown.lock().unwrap(),
            vec![Some(Duration::from_secs(8))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_tap_skips_without_showing_details() {
        let h = harness(0);

        h.mux.tap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.mux.tap(), Gesture::SkipNext);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*h.device.next_calls.lock().unwrap(), 1);
        assert!(h.presentation.shown.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_retries_exactly_once() {
        let h = harness(5);

        h.mux.tap();
        h.mux.tap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*h.device.next_calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_triple_tap_fires_favorite_and_drops_pending_skip() {
        let h = harness(0);
        let mut rx = h.bus.subscribe();

        h.mux.tap();
        h.mux.tap();
        assert_eq!(h.mux.tap(), Gesture::Favorite);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*h.device.next_calls.lock().unwrap(), 0);
        assert!(h.presentation.shown.lock().unwrap().is_empty());
        match rx.try_recv().unwrap() {
            BusEvent::GestureTriggered { gesture } => assert_eq!(gesture, Gesture::Favorite),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
