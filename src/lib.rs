//! Now Playing Screen
//!
//! Shows the album art of whatever a WiiM / LinkPlay streamer is playing on a
//! dedicated screen.
//!
//! This library provides:
//! - SSDP discovery and scheme/port probing of the device's HTTP API
//! - Album art resolution with a negative-result cooldown
//! - The poll loop that turns noisy device status into track changes
//! - Touch gesture handling (details / skip / favorite)
//! - MQTT remote control

pub mod adapters;
pub mod artwork;
pub mod bus;
pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod gesture;
pub mod poller;
pub mod timer;

pub use error::StartupError;
