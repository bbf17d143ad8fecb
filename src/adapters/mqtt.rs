//! MQTT remote control bridge
//!
//! Subscribes to `<prefix>/command` for plain-text commands (`pause`,
//! `screen:off`, `brightness:40`, ...) and mirrors bus events to
//! `<prefix>/state/...` as JSON.

use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Outgoing, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, SharedBus};
use crate::config::MqttConfig;
use crate::display::{Backlight, Presentation};
use crate::gesture::TapSender;

const DEFAULT_TOPIC_PREFIX: &str = "home/music-screen";

/// Command accepted on the command topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    /// `start` / `resume`
    Resume,
    /// `stop` / `quit`
    Shutdown,
    /// Hide the album and stop polling until resumed
    Pause,
    Screen(bool),
    Brightness(u8),
    Tap,
    Details,
}

impl RemoteCommand {
    pub fn parse(payload: &str) -> Option<Self> {
        let payload = payload.trim().to_ascii_lowercase();

        if let Some(value) = payload.strip_prefix("screen:") {
            return Some(RemoteCommand::Screen(matches!(
                value.trim(),
                "on" | "true" | "1"
            )));
        }
        if let Some(value) = payload.strip_prefix("brightness:") {
            let level = value.trim().parse::<i64>().ok()?;
            return Some(RemoteCommand::Brightness(level.clamp(0, 100) as u8));
        }

        match payload.as_str() {
            "start" | "resume" => Some(RemoteCommand::Resume),
            "stop" | "quit" => Some(RemoteCommand::Shutdown),
            "pause" => Some(RemoteCommand::Pause),
            "tap" => Some(RemoteCommand::Tap),
            "details" => Some(RemoteCommand::Details),
            _ => None,
        }
    }
}

/// What remote commands act on
pub struct CommandTargets {
    pub presentation: Arc<dyn Presentation>,
    pub backlight: Arc<dyn Backlight>,
    pub paused: watch::Sender<bool>,
    pub taps: TapSender,
    pub shutdown: CancellationToken,
    pub details_timeout: Duration,
}

impl CommandTargets {
    pub async fn apply(&self, command: RemoteCommand) {
        tracing::info!("Remote command: {:?}", command);

        match command {
            RemoteCommand::Resume => {
                self.paused.send_replace(false);
            }
            RemoteCommand::Shutdown => self.shutdown.cancel(),
            RemoteCommand::Pause => {
                self.paused.send_replace(true);
                self.presentation.hide_album().await;
            }
            RemoteCommand::Screen(on) => self.backlight.set_power(on),
            RemoteCommand::Brightness(level) => self.backlight.set_brightness(level),
            RemoteCommand::Tap => {
                if let Err(e) = self.taps.try_send(()) {
                    tracing::debug!("Dropping remote tap: {}", e);
                }
            }
            RemoteCommand::Details => {
                self.presentation
                    .show_details(Some(self.details_timeout))
                    .await
            }
        }
    }
}

pub struct MqttBridge {
    config: MqttConfig,
    topic_prefix: String,
    connected: Arc<RwLock<bool>>,
    client: Arc<RwLock<Option<AsyncClient>>>,
    bus: SharedBus,
    targets: Arc<CommandTargets>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl MqttBridge {
    /// The bridge runs until [`MqttBridge::stop`], so it can still report
    /// shutdown after `targets.shutdown` has been cancelled
    pub fn new(config: MqttConfig, bus: SharedBus, targets: CommandTargets) -> Self {
        let topic_prefix = config
            .topic_prefix
            .clone()
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string());
        Self {
            config,
            topic_prefix,
            connected: Arc::new(RwLock::new(false)),
            client: Arc::new(RwLock::new(None)),
            bus,
            targets: Arc::new(targets),
            event_loop: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn command_topic(&self) -> String {
        format!("{}/command", self.topic_prefix)
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Connect and spawn the event loop and the bus forwarder
    pub async fn start(&self) -> Result<()> {
        let client_id = format!(
            "now-playing-screen-{}",
            gethostname::gethostname().to_string_lossy()
        );
        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        *self.client.write().await = Some(client.clone());

        tracing::info!(
            "MQTT connecting to {}:{}...",
            self.config.host,
            self.config.port
        );

        let command_topic = self.command_topic();
        let connected = self.connected.clone();
        let bus = self.bus.clone();
        let targets = self.targets.clone();
        let shutdown = self.shutdown.clone();

        let event_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("MQTT event loop shutting down");
                        break;
                    }
                    result = eventloop.poll() => {
                        match result {
                            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                if publish.topic != command_topic {
                                    continue;
                                }
                                let payload = String::from_utf8_lossy(&publish.payload).to_string();
                                match RemoteCommand::parse(&payload) {
                                    Some(command) => {
                                        bus.publish(BusEvent::RemoteCommand {
                                            command: payload.trim().to_string(),
                                        });
                                        targets.apply(command).await;
                                    }
                                    None => tracing::debug!("Ignoring MQTT command {:?}", payload),
                                }
                            }
                            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                                tracing::info!("MQTT connected (code: {:?})", ack.code);
                                *connected.write().await = true;
                                // Subscribe on every (re)connect; the session is clean
                                if let Err(e) = client.try_subscribe(&command_topic, QoS::AtLeastOnce) {
                                    tracing::error!("MQTT subscribe to {} failed: {}", command_topic, e);
                                }
                            }
                            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                                tracing::debug!("MQTT disconnect sent");
                                break;
                            }
                            Ok(Event::Incoming(Incoming::Disconnect)) => {
                                tracing::warn!("MQTT disconnected");
                                *connected.write().await = false;
                            }
                            Err(e) => {
                                tracing::error!("MQTT error: {}", e);
                                *connected.write().await = false;
                                tokio::select! {
                                    _ = shutdown.cancelled() => break,
                                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        *self.event_loop.lock().await = Some(event_loop);

        let client = self.client.clone();
        let mut rx = self.bus.subscribe();
        let prefix = self.topic_prefix.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("MQTT bus forwarder shutting down");
                        break;
                    }
                    result = rx.recv() => {
                        match result {
                            // Sent by stop() before disconnecting
                            Ok(BusEvent::ShuttingDown) => {}
                            Ok(event) => {
                                let current = client.read().await.clone();
                                if let Some(client) = current {
                                    if let Err(e) = Self::publish_event(&client, &prefix, &event).await {
                                        tracing::debug!("MQTT publish failed: {}", e);
                                    }
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                tracing::debug!("MQTT forwarder lagged by {} events", n);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn publish_event(client: &AsyncClient, prefix: &str, event: &BusEvent) -> Result<()> {
        let Some((suffix, payload)) = state_message(event) else {
            return Ok(());
        };

        let topic = format!("{}/{}", prefix, suffix);
        let payload = serde_json::to_string(&payload)?;
        client
            .publish(&topic, QoS::AtMostOnce, false, payload.as_bytes())
            .await?;
        Ok(())
    }

    /// Publish the final state, disconnect, and wait briefly for the event
    /// loop to flush both
    pub async fn stop(&self) {
        let client = self.client.write().await.take();
        if let Some(client) = client {
            let _ = Self::publish_event(&client, &self.topic_prefix, &BusEvent::ShuttingDown).await;
            let _ = client.disconnect().await;
        }

        let event_loop = self.event_loop.lock().await.take();
        if let Some(event_loop) = event_loop {
            if tokio::time::timeout(Duration::from_secs(2), event_loop)
                .await
                .is_err()
            {
                tracing::debug!("MQTT event loop did not finish in time");
            }
        }
        self.shutdown.cancel();
        *self.connected.write().await = false;

        tracing::info!("MQTT bridge stopped");
    }
}

/// Topic suffix and JSON body for bus events worth mirroring
pub fn state_message(event: &BusEvent) -> Option<(&'static str, Value)> {
    let message = match event {
        BusEvent::TrackChanged {
            artist,
            title,
            album,
        } => (
            "state/track",
            serde_json::json!({
                "artist": artist,
                "title": title,
                "album": album
            }),
        ),
        BusEvent::PlaybackStopped => (
            "state/playback",
            serde_json::json!({ "state": "stopped" }),
        ),
        BusEvent::EndpointChanged { endpoint } => (
            "state/endpoint",
            serde_json::json!({ "endpoint": endpoint.to_string() }),
        ),
        BusEvent::GestureTriggered { gesture } => (
            "state/gesture",
            serde_json::json!({ "gesture": gesture }),
        ),
        BusEvent::ShuttingDown => (
            "state/status",
            serde_json::json!({ "running": false }),
        ),
        // Don't echo commands back
        BusEvent::RemoteCommand { .. } => return None,
    };
    Some(message)
}
