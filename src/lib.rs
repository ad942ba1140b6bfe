pub mod camera;
pub mod diagnostics;
pub mod settings;

use std::sync::Arc;

use tracing::info;

pub use camera::backend::{EmulatedCameraDevice, FrameConsumer};
pub use camera::dummy::DummyService;
pub use camera::error::{CameraError, Result};
pub use camera::remote::api::RemoteServiceClient;
pub use camera::remote::device::RemoteCameraDevice;
pub use camera::types::{DeviceError, DeviceId, DeviceState, PixelFormat, WhiteBalanceMode};
pub use settings::store::SettingsStore;
pub use settings::types::DeviceSettings;

/// Create and initialize the device `name` from its saved settings.
///
/// Returns `None` when the store has no entry for `name`.
pub fn open_configured_device<C: RemoteServiceClient + 'static>(
    store: &SettingsStore,
    name: &str,
    client: Arc<C>,
    consumer: Arc<dyn FrameConsumer>,
) -> Result<Option<RemoteCameraDevice<C>>> {
    let Some(settings) = store.get_device(name) else {
        return Ok(None);
    };
    let device = RemoteCameraDevice::with_settings(client, consumer, &settings);
    device.initialize(name, settings.port)?;
    info!("opened emulated camera '{name}' on port {}", settings.port);
    Ok(Some(device))
}
