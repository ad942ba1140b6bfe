use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::camera::error::{CameraError, Result};
use crate::settings::types::{DeviceSettings, SettingsFile};

/// Persistent per-device settings, saved as JSON.
pub struct SettingsStore {
    path: PathBuf,
    data: Mutex<SettingsFile>,
}

impl SettingsStore {
    /// Create a store backed by `path`, loading it if the file exists.
    ///
    /// A malformed file is an error rather than being silently replaced.
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = Self::load(&path)?;
        debug!(
            "loaded {} device setting(s) from {}",
            data.devices.len(),
            path.display()
        );
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Load settings from a JSON file, returning default on missing file.
    pub fn load(path: &Path) -> Result<SettingsFile> {
        if !path.exists() {
            return Ok(SettingsFile::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CameraError::Settings(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| CameraError::Settings(format!("{}: {e}", path.display())))
    }

    /// Save current settings to disk atomically (write .tmp then rename).
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().clone();
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| CameraError::Settings(e.to_string()))?;

        let io_err = |e: std::io::Error| CameraError::Settings(e.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json).map_err(io_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get saved settings for a device by name.
    pub fn get_device(&self, name: &str) -> Option<DeviceSettings> {
        self.data.lock().devices.get(name).cloned()
    }

    /// Insert or replace the settings for a device.
    pub fn set_device(&self, name: &str, settings: DeviceSettings) {
        self.data.lock().devices.insert(name.to_string(), settings);
    }

    /// Remove all saved settings for a device.
    pub fn remove_device(&self, name: &str) -> Option<DeviceSettings> {
        self.data.lock().devices.remove(name)
    }

    /// Names of every configured device, sorted.
    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.data.lock().devices.keys().cloned().collect();
        names.sort();
        names
    }
}
