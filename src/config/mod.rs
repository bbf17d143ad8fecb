//! Configuration management
//!
//! Settings are read once at startup: built-in defaults, then an optional
//! `config.{toml,json,yaml}` in the config directory, then `NPS_*` environment
//! variables (`NPS_POLL__INTERVAL_MS=500`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub artwork: ArtworkConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub gesture: GestureConfig,

    #[serde(default)]
    pub backlight: BacklightConfig,

    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Base endpoint override (`https://192.168.1.20` or a bare host)
    pub base_url: Option<String>,
    #[serde(default = "default_control_path")]
    pub control_path: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            control_path: default_control_path(),
            probe_timeout_secs: default_probe_timeout(),
            request_timeout_secs: default_request_timeout(),
            accept_invalid_certs: true,
        }
    }
}

impl DeviceConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_control_path() -> String {
    "/httpapi.asp".to_string()
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_request_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ssdp_timeout")]
    pub ssdp_timeout_secs: u64,
    #[serde(default = "default_ssdp_mx")]
    pub ssdp_mx: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ssdp_timeout_secs: default_ssdp_timeout(),
            ssdp_mx: default_ssdp_mx(),
        }
    }
}

impl DiscoveryConfig {
    pub fn ssdp_timeout(&self) -> Duration {
        Duration::from_secs(self.ssdp_timeout_secs)
    }
}

fn default_ssdp_timeout() -> u64 {
    2
}

fn default_ssdp_mx() -> usize {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtworkConfig {
    /// Explicit art URL with `{artist}` and `{track}` placeholders,
    /// absolute or relative to the selected endpoint
    pub template: Option<String>,
    #[serde(default = "default_true")]
    pub probe_common_paths: bool,
    #[serde(default = "default_negative_cooldown")]
    pub negative_cooldown_secs: u64,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            template: None,
            probe_common_paths: true,
            negative_cooldown_secs: default_negative_cooldown(),
        }
    }
}

impl ArtworkConfig {
    pub fn negative_cooldown(&self) -> Duration {
        Duration::from_secs(self.negative_cooldown_secs)
    }
}

fn default_negative_cooldown() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    /// Consecutive all-empty records before rotating to another endpoint
    #[serde(default = "default_empty_threshold")]
    pub empty_threshold: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            empty_threshold: default_empty_threshold(),
        }
    }
}

/// Floor for the poll interval; tokio intervals cannot be zero
const MIN_POLL_INTERVAL_MS: u64 = 100;

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_empty_threshold() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub show_details: bool,
    pub details_timeout_secs: Option<u64>,
    #[serde(default = "default_touch_details_timeout")]
    pub touch_details_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub show_artist_and_album: bool,
    /// Where the rendered artwork PNG is written for the screen process
    pub output_path: Option<PathBuf>,
    #[serde(default = "default_display_size")]
    pub size: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_details: false,
            details_timeout_secs: None,
            touch_details_timeout_secs: default_touch_details_timeout(),
            show_artist_and_album: true,
            output_path: None,
            size: default_display_size(),
        }
    }
}

impl DisplayConfig {
    pub fn details_timeout(&self) -> Option<Duration> {
        self.details_timeout_secs.map(Duration::from_secs)
    }

    pub fn touch_details_timeout(&self) -> Duration {
        Duration::from_secs(self.touch_details_timeout_secs)
    }
}

fn default_touch_details_timeout() -> u64 {
    8
}

fn default_display_size() -> u32 {
    720
}

#[derive(Debug, Clone, Deserialize)]
pub struct GestureConfig {
    #[serde(default = "default_tap_window")]
    pub tap_window_ms: u64,
    /// Invoked as `<script> <artist> <title> <album>` on a triple tap
    pub favorite_script: Option<PathBuf>,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            tap_window_ms: default_tap_window(),
            favorite_script: None,
        }
    }
}

impl GestureConfig {
    pub fn tap_window(&self) -> Duration {
        Duration::from_millis(self.tap_window_ms)
    }
}

fn default_tap_window() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacklightConfig {
    /// Device name under the sysfs backlight class (e.g. `rpi_backlight`)
    pub device: Option<String>,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
}

impl Default for BacklightConfig {
    fn default() -> Self {
        Self {
            device: None,
            sysfs_root: default_sysfs_root(),
        }
    }
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class/backlight")
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

/// Get config directory (NPS_CONFIG_DIR, XDG_CONFIG_HOME or ~/.config)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NPS_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("now-playing-screen");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config/now-playing-screen");
    }

    PathBuf::from(".")
}

pub fn load_config() -> Result<Config, ::config::ConfigError> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // NPS_DEVICE__BASE_URL, NPS_POLL__EMPTY_THRESHOLD, ...
        .add_source(
            ::config::Environment::with_prefix("NPS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // Legacy WIIM_BASE_URL wins over file and NPS_ values
    if let Ok(base) = std::env::var("WIIM_BASE_URL") {
        if !base.trim().is_empty() {
            builder = builder.set_override("device.base_url", base.trim().to_string())?;
        }
    }

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env() {
        for key in [
            "WIIM_BASE_URL",
            "NPS_DEVICE__BASE_URL",
            "NPS_POLL__EMPTY_THRESHOLD",
            "NPS_GESTURE__TAP_WINDOW_MS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        clear_env();
        env::set_var("NPS_CONFIG_DIR", "/tmp/nps-test-nonexistent");

        let config = load_config().expect("config should load");

        env::remove_var("NPS_CONFIG_DIR");

        assert!(config.device.base_url.is_none());
        assert_eq!(config.device.control_path, "/httpapi.asp");
        assert_eq!(config.device.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.artwork.negative_cooldown(), Duration::from_secs(30));
        assert_eq!(config.poll.interval(), Duration::from_secs(1));
        assert_eq!(config.poll.empty_threshold, 5);
        assert_eq!(config.gesture.tap_window(), Duration::from_millis(600));
        assert_eq!(config.display.touch_details_timeout(), Duration::from_secs(8));
        assert!(config.mqtt.is_none());
    }

    #[test]
    #[serial]
    fn test_file_values_and_env_override() {
        clear_env();
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(
            temp_dir.path().join("config.toml"),
            r#"
[device]
base_url = "https://192.168.1.20"

[poll]
empty_threshold = 8

[mqtt]
host = "broker.local"
"#,
        )
        .expect("write config");

        env::set_var("NPS_CONFIG_DIR", temp_dir.path());
        env::set_var("NPS_POLL__EMPTY_THRESHOLD", "3");

        let config = load_config().expect("config should load");

        env::remove_var("NPS_CONFIG_DIR");
        env::remove_var("NPS_POLL__EMPTY_THRESHOLD");

        assert_eq!(
            config.device.base_url.as_deref(),
            Some("https://192.168.1.20")
        );
        assert_eq!(config.poll.empty_threshold, 3, "env should beat file");
        let mqtt = config.mqtt.expect("mqtt section present");
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 1883);
    }

    #[test]
    #[serial]
    fn test_legacy_base_url_env_takes_precedence() {
        clear_env();
        env::set_var("NPS_CONFIG_DIR", "/tmp/nps-test-nonexistent");
        env::set_var("NPS_DEVICE__BASE_URL", "http://10.0.0.2");
        env::set_var("WIIM_BASE_URL", "10.0.0.5");

        let config = load_config().expect("config should load");

        clear_env();
        env::remove_var("NPS_CONFIG_DIR");

        assert_eq!(config.device.base_url.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    #[serial]
    fn test_config_dir_prefers_explicit_env() {
        env::set_var("NPS_CONFIG_DIR", "/tmp/nps-explicit");
        assert_eq!(get_config_dir(), PathBuf::from("/tmp/nps-explicit"));
        env::remove_var("NPS_CONFIG_DIR");
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let poll = PollConfig {
            interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(poll.interval(), Duration::from_millis(100));

        let poll = PollConfig {
            interval_ms: 2500,
            ..Default::default()
        };
        assert_eq!(poll.interval(), Duration::from_millis(2500));
    }
}
