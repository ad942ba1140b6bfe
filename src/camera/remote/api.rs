//! `RemoteServiceClient` trait: abstracts the emulation daemon connection.
//!
//! The transport and its wire protocol live outside this crate. Devices are
//! generic over the client so tests use `MockRemoteService` and the
//! loopback `DummyService` stands in when no daemon is reachable.

use crate::camera::error::Result;
use crate::camera::types::{ColorAdjustments, PixelFormat};

/// Operations the device issues against the remote emulated-camera service.
///
/// All methods take `&self`; implementations manage their own interior
/// mutability. `query_frame` is called from the frame worker thread while
/// the other queries may run on caller threads, hence `Send + Sync`.
pub trait RemoteServiceClient: Send + Sync {
    /// Open the transport to the daemon listening on `port`.
    fn connect(&self, port: u16) -> Result<()>;

    /// Close the transport.
    fn disconnect(&self) -> Result<()>;

    /// Ask the daemon to describe the emulated camera.
    fn query_info(&self) -> Result<String>;

    /// Logically connect the emulated camera hardware.
    fn query_connect(&self) -> Result<()>;

    /// Logically disconnect the emulated camera hardware.
    fn query_disconnect(&self) -> Result<()>;

    /// Start frame production with the given format and dimensions.
    fn query_start(&self, format: PixelFormat, width: u32, height: u32) -> Result<()>;

    /// Stop frame production.
    fn query_stop(&self) -> Result<()>;

    /// Fill `frame` (device pixel format) and `preview` (RGB32) with the next
    /// frame, applying the colour adjustments. Buffer sizes are the slice
    /// lengths.
    fn query_frame(
        &self,
        frame: &mut [u8],
        preview: &mut [u8],
        adjustments: ColorAdjustments,
    ) -> Result<()>;
}
