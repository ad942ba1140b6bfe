use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::camera::remote::device::DEFAULT_TARGET_FPS;
use crate::camera::types::WhiteBalanceMode;

fn default_target_fps() -> u32 {
    DEFAULT_TARGET_FPS
}

/// Settings for a single emulated camera.
///
/// Only `port` is required; every other field falls back to the device
/// defaults when missing from the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    pub port: u16,
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    #[serde(default)]
    pub white_balance: WhiteBalanceMode,
    /// Exposure compensation in EV steps.
    #[serde(default)]
    pub exposure_compensation: f32,
}

impl DeviceSettings {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            target_fps: DEFAULT_TARGET_FPS,
            white_balance: WhiteBalanceMode::default(),
            exposure_compensation: 0.0,
        }
    }
}

/// Top-level settings file structure: maps device names to their settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SettingsFile {
    #[serde(default)]
    pub devices: HashMap<String, DeviceSettings>,
}
