//! Mock servers for integration testing
//!
//! Simulates a WiiM / LinkPlay streamer's HTTP API so the client, discovery
//! and poll loop can be exercised without real hardware.

pub mod wiim;

pub use wiim::MockWiimDevice;
