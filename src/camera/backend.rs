use crate::camera::error::Result;
use crate::camera::types::{DeviceError, DeviceId, DeviceState, PixelFormat};

/// Capabilities shared by every emulated camera device backend.
///
/// Methods take `&self`: devices serialise their own state behind an
/// internal lock so one instance can be driven from several threads.
pub trait EmulatedCameraDevice: Send + Sync {
    /// Logically connect the device. No-op when already connected.
    fn connect_device(&self) -> Result<()>;

    /// Logically disconnect the device. Fails while the device is started.
    fn disconnect_device(&self) -> Result<()>;

    /// Start producing `width`x`height` frames in `format`.
    fn start_device(&self, width: u32, height: u32, format: PixelFormat) -> Result<()>;

    /// Stop producing frames. No-op when not started.
    fn stop_device(&self) -> Result<()>;

    /// Copy the current RGB32 preview frame into `buffer`, returning the
    /// number of bytes written.
    fn current_preview_frame(&self, buffer: &mut [u8]) -> Result<usize>;

    /// Current lifecycle state.
    fn state(&self) -> DeviceState;
}

/// Upstream consumer of frames and device errors (the camera HAL side).
///
/// Both callbacks fire on the device's frame worker thread, in order. They
/// may read the preview frame, state and configuration back from the device,
/// including while another thread is stopping it. Lifecycle operations
/// (connect, disconnect, start, stop) from inside a callback fail with
/// `InvalidState`.
pub trait FrameConsumer: Send + Sync {
    /// A new frame is ready. `frame` is only valid for the duration of the
    /// call; `timestamp_ns` is on the monotonic clock.
    fn on_next_frame_available(&self, frame: &[u8], timestamp_ns: u64, device: &DeviceId);

    /// The device hit an unrecoverable error and stopped delivering frames.
    fn on_camera_device_error(&self, error: DeviceError);
}
