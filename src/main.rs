//! Now Playing Screen
//!
//! Polls a WiiM / LinkPlay streamer and shows the current album art.

use now_playing_screen::{
    adapters::{CommandTargets, MqttBridge},
    bus::{self, BusEvent},
    config,
    device::{Discovery, Endpoint, EndpointCache, LocationSource, SsdpDiscoverer, WiimClient},
    display::{Backlight, HeadlessDisplay, NullBacklight, Presentation, SysfsBacklight},
    gesture::{GestureActions, GestureMultiplexer},
    poller::Poller,
    StartupError,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long background tasks get to finish after shutdown is requested
const TASK_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "now_playing_screen=debug,rumqttc=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Now Playing Screen v{} ({})",
        env!("NPS_VERSION"),
        env!("NPS_GIT_SHA")
    );

    if let Err(e) = run().await {
        tracing::error!("Startup failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded from {}",
        config::get_config_dir().display()
    );

    let api = Arc::new(
        WiimClient::new(&config.device).map_err(|e| StartupError::HttpClient(e.to_string()))?,
    );

    let seed = match config.device.base_url.as_deref() {
        Some(base) => {
            let parsed = Endpoint::parse(base);
            if parsed.is_none() {
                tracing::warn!("Ignoring unusable device base URL {:?}", base);
            }
            parsed
        }
        None => None,
    };

    let locations: Option<Arc<dyn LocationSource>> = if config.discovery.enabled {
        Some(Arc::new(SsdpDiscoverer::new(config.discovery.ssdp_mx)))
    } else {
        None
    };
    let discovery = Discovery::new(
        api.clone(),
        locations,
        config.discovery.ssdp_timeout(),
        seed.clone(),
    );

    let mut endpoints = EndpointCache::new();
    let found = endpoints.warmup(&discovery).await;

    // A configured device that is off right now is still the right one to poll
    let Some(initial) = found.first().cloned().or(seed) else {
        return Err(StartupError::ConfigurationMissing);
    };
    tracing::info!("Using device endpoint {}", initial);

    let backlight: Arc<dyn Backlight> = match &config.backlight.device {
        Some(device) => Arc::new(SysfsBacklight::new(&config.backlight.sysfs_root, device)),
        None => Arc::new(NullBacklight),
    };

    let display = Arc::new(HeadlessDisplay::new(&config.display, backlight.clone())?);
    let presentation: Arc<dyn Presentation> = display.clone();

    let bus = bus::create_bus();
    tracing::info!("Event bus initialized");

    let shutdown = CancellationToken::new();
    let (paused_tx, paused_rx) = watch::channel(false);
    let (tap_tx, tap_rx) = mpsc::channel(16);

    let poller = Poller::new(
        api.clone(),
        discovery,
        endpoints,
        initial,
        presentation.clone(),
        bus.clone(),
        &config,
    );
    let gestures = GestureMultiplexer::new(
        GestureActions::new(
            api.clone(),
            presentation.clone(),
            bus.clone(),
            poller.subscribe(),
            &config,
        ),
        config.gesture.tap_window(),
    );

    let mqtt = match config.mqtt.clone() {
        Some(mqtt_config) => {
            let host = mqtt_config.host.clone();
            let bridge = MqttBridge::new(
                mqtt_config,
                bus.clone(),
                CommandTargets {
                    presentation: presentation.clone(),
                    backlight: backlight.clone(),
                    paused: paused_tx,
                    taps: tap_tx.clone(),
                    shutdown: shutdown.clone(),
                    details_timeout: config.display.touch_details_timeout(),
                },
            );
            match bridge.start().await {
                Ok(()) => {
                    tracing::info!("MQTT bridge started for {}", host);
                    Some(bridge)
                }
                Err(e) => {
                    tracing::warn!("Failed to start MQTT bridge: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    let poll_task = tokio::spawn(poller.run(paused_rx, shutdown.clone()));
    let gesture_task = tokio::spawn(gestures.run(tap_rx, shutdown.clone()));

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = shutdown.cancelled() => tracing::info!("Remote stop requested, shutting down..."),
    }
    shutdown.cancel();

    for (name, task) in [("poll loop", poll_task), ("gesture handling", gesture_task)] {
        match tokio::time::timeout(TASK_GRACE, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("{} task failed: {}", name, e),
            Err(_) => tracing::warn!("{} did not stop within {:?}", name, TASK_GRACE),
        }
    }
    drop(tap_tx);

    // Cleanup: blank the screen, hand back the backlight, close connections
    tracing::info!("Cleaning up...");
    presentation.hide_album().await;
    backlight.release();
    bus.publish(BusEvent::ShuttingDown);
    if let Some(mqtt) = mqtt {
        tracing::debug!("MQTT connected at shutdown: {}", mqtt.is_connected().await);
        mqtt.stop().await;
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
