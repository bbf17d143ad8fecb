//! Integrations with outside systems (MQTT remote control)

pub mod mqtt;

pub use mqtt::{CommandTargets, MqttBridge, RemoteCommand};
