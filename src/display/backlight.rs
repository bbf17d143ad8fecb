//! Backlight control via the Linux sysfs backlight class
//!
//! `<root>/<device>/bl_power` takes 0 (on) or 4 (powerdown); `brightness`
//! takes 0..=`max_brightness`. Permission problems disable the backlight
//! after the first failure instead of logging on every call.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

const BL_POWER_ON: &str = "0";
const BL_POWER_OFF: &str = "4";

pub trait Backlight: Send + Sync {
    fn set_power(&self, on: bool);

    /// Percent, clamped to 0..=100
    fn set_brightness(&self, level: u8);

    /// Hand the panel back in a usable state at shutdown
    fn release(&self) {}
}

/// Used when no backlight device is configured
#[derive(Debug, Default)]
pub struct NullBacklight;

impl Backlight for NullBacklight {
    fn set_power(&self, on: bool) {
        tracing::debug!("Backlight power {} (no device)", if on { "on" } else { "off" });
    }

    fn set_brightness(&self, level: u8) {
        tracing::debug!("Backlight brightness {} (no device)", level.min(100));
    }
}

#[derive(Debug)]
struct SysfsState {
    active: bool,
    power: Option<bool>,
    brightness: u8,
}

#[derive(Debug)]
pub struct SysfsBacklight {
    dir: PathBuf,
    max_brightness: u32,
    state: Mutex<SysfsState>,
}

impl SysfsBacklight {
    pub fn new(root: &Path, device: &str) -> Self {
        let dir = root.join(device);
        let max_brightness = std::fs::read_to_string(dir.join("max_brightness"))
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok());

        let active = max_brightness.is_some();
        if !active {
            tracing::error!(
                "Backlight control not available at {}; check the device name and that this user may write to it",
                dir.display()
            );
        }

        Self {
            dir,
            max_brightness: max_brightness.unwrap_or(1).max(1),
            state: Mutex::new(SysfsState {
                active,
                power: None,
                brightness: 100,
            }),
        }
    }

    fn write(&self, state: &mut SysfsState, file: &str, value: &str) {
        if let Err(e) = std::fs::write(self.dir.join(file), value) {
            tracing::error!("Backlight write to {} failed: {}", file, e);
            state.active = false;
        }
    }

    fn scaled(&self, level: u8) -> u32 {
        u32::from(level.min(100)) * self.max_brightness / 100
    }
}

impl Backlight for SysfsBacklight {
    fn set_power(&self, on: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.active {
            return;
        }

        if !on && state.power == Some(true) {
            tracing::debug!("Going idle, turning backlight off");
        }
        state.power = Some(on);

        if on {
            self.write(&mut state, "bl_power", BL_POWER_ON);
            let value = self.scaled(state.brightness).to_string();
            self.write(&mut state, "brightness", &value);
        } else {
            self.write(&mut state, "bl_power", BL_POWER_OFF);
        }
    }

    fn set_brightness(&self, level: u8) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.active {
            return;
        }

        state.brightness = level.min(100);
        if state.power != Some(false) {
            let value = self.scaled(state.brightness).to_string();
            self.write(&mut state, "brightness", &value);
        }
    }

    fn release(&self) {
        // Leave the panel lit, as the console expects
        self.set_power(true);
    }
}
