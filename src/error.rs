use thiserror::Error;

/// Conditions that stop the process before the poll loop starts.
/// Everything after startup is absorbed and logged instead.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no device endpoint configured and none discovered; set device.base_url (or WIIM_BASE_URL) or enable discovery")]
    ConfigurationMissing,

    #[error("display setup failed: {0}")]
    DisplaySetup(String),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),
}
