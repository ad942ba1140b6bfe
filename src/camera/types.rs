use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

use crate::camera::error::{CameraError, Result};

/// Stable identifier of an emulated camera device (the name it was
/// initialized with).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new `DeviceId` from a raw string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an emulated camera device.
///
/// Variants are ordered: a device in a later state also satisfies every
/// earlier one (a started device is connected, a connected device is
/// initialized).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceState {
    #[default]
    Uninitialized,
    Initialized,
    Connected,
    Started,
}

impl DeviceState {
    pub fn is_initialized(self) -> bool {
        self >= Self::Initialized
    }

    pub fn is_connected(self) -> bool {
        self >= Self::Connected
    }

    pub fn is_started(self) -> bool {
        self == Self::Started
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Connected => "connected",
            Self::Started => "started",
        };
        f.write_str(name)
    }
}

/// Build a little-endian FourCC code, matching V4L2's `v4l2_fourcc`.
const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

/// Frame pixel formats the emulated device can produce.
///
/// All of them are 12-bit-per-pixel YUV 4:2:0 layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar Y, U, V (`YU12`).
    Yuv420,
    /// Planar Y, V, U (`YV12`).
    Yvu420,
    /// Y plane followed by interleaved UV (`NV12`).
    Nv12,
    /// Y plane followed by interleaved VU (`NV21`).
    Nv21,
}

impl PixelFormat {
    pub const ALL: [Self; 4] = [Self::Yuv420, Self::Yvu420, Self::Nv12, Self::Nv21];

    /// The V4L2 FourCC for this format.
    pub const fn fourcc(self) -> u32 {
        match self {
            Self::Yuv420 => fourcc(b"YU12"),
            Self::Yvu420 => fourcc(b"YV12"),
            Self::Nv12 => fourcc(b"NV12"),
            Self::Nv21 => fourcc(b"NV21"),
        }
    }

    /// Resolve a V4L2 FourCC code.
    pub fn from_fourcc(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.fourcc() == code)
            .ok_or_else(|| CameraError::UnsupportedFormat(fourcc_to_string(code)))
    }

    /// Bytes needed for one frame of `total_pixels` pixels.
    pub const fn frame_size(self, total_pixels: usize) -> usize {
        (total_pixels * 12) / 8
    }

    /// `frame_size`, or `None` if it does not fit in `usize`.
    pub fn checked_frame_size(self, total_pixels: usize) -> Option<usize> {
        total_pixels.checked_mul(12).map(|n| n / 8)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fourcc_to_string(self.fourcc()))
    }
}

fn fourcc_to_string(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

/// Geometry of the frames produced by a started device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub total_pixels: usize,
    pub frame_buffer_size: usize,
}

/// Bytes per pixel of the RGB32 preview frame.
pub const PREVIEW_BYTES_PER_PIXEL: usize = 4;

impl FrameGeometry {
    /// Validate dimensions and derive buffer sizes.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CameraError::InvalidGeometry { width, height });
        }
        let total_pixels = (width as usize)
            .checked_mul(height as usize)
            .filter(|n| n.checked_mul(PREVIEW_BYTES_PER_PIXEL).is_some())
            .ok_or(CameraError::InvalidGeometry { width, height })?;
        let frame_buffer_size = format
            .checked_frame_size(total_pixels)
            .ok_or(CameraError::InvalidGeometry { width, height })?;
        Ok(Self {
            width,
            height,
            format,
            total_pixels,
            frame_buffer_size,
        })
    }

    /// Size in bytes of the RGB32 preview frame.
    pub fn preview_buffer_size(&self) -> usize {
        self.total_pixels * PREVIEW_BYTES_PER_PIXEL
    }
}

/// White balance presets exposed by the emulated camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhiteBalanceMode {
    #[default]
    Auto,
    Incandescent,
    Daylight,
    Twilight,
}

impl WhiteBalanceMode {
    /// Red, green and blue channel scale factors.
    pub fn scales(self) -> [f32; 3] {
        let (red, blue) = match self {
            Self::Auto => (1.0, 1.0),
            Self::Incandescent => (1.38, 0.60),
            Self::Daylight => (1.09, 0.92),
            Self::Twilight => (0.92, 1.22),
        };
        [red, 1.0, blue]
    }
}

/// Gamma used to turn an EV offset into a linear exposure multiplier.
const GAMMA_CORRECTION: f32 = 2.2;

/// Per-frame colour adjustments forwarded to the emulation service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAdjustments {
    pub white_balance: [f32; 3],
    pub exposure_compensation: f32,
}

impl Default for ColorAdjustments {
    fn default() -> Self {
        Self {
            white_balance: WhiteBalanceMode::Auto.scales(),
            exposure_compensation: 1.0,
        }
    }
}

impl ColorAdjustments {
    pub fn set_white_balance(&mut self, mode: WhiteBalanceMode) {
        self.white_balance = mode.scales();
    }

    /// Set exposure from an EV offset (0.0 leaves exposure unchanged).
    pub fn set_exposure_ev(&mut self, ev: f32) {
        self.exposure_compensation = 2.0f32.powf(ev / GAMMA_CORRECTION);
    }
}

/// Error classification delivered to the upstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceError {
    Unknown,
    /// The emulation service stopped answering frame queries.
    ServerDied,
}

impl DeviceError {
    /// Numeric code understood by camera framework consumers.
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => 1,
            Self::ServerDied => 100,
        }
    }
}

/// Nanoseconds on a process-wide monotonic clock.
pub fn monotonic_nanos() -> u64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = ORIGIN.get_or_init(Instant::now);
    u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
