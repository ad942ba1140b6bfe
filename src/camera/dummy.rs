use parking_lot::Mutex;

use crate::camera::error::{CameraError, Result};
use crate::camera::remote::api::RemoteServiceClient;
use crate::camera::types::{ColorAdjustments, PixelFormat};

const DUMMY_DEVICE_INFO: &str =
    "name=dummy channel=0 dir=back framedims=640x480,352x288,320x240,176x144";

/// Colour bars, left to right: white, yellow, cyan, green, magenta, red,
/// blue, black.
const COLOR_BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

#[derive(Debug, Default)]
struct DummyState {
    port: Option<u16>,
    hardware_connected: bool,
    started: Option<(PixelFormat, u32, u32)>,
    frames_served: u64,
}

/// A loopback emulation service for running without the real daemon.
///
/// Follows the daemon's sequencing rules (transport before connect, connect
/// before start, start before frames) and renders scrolling colour bars.
/// The preview frame is RGBA, one byte per channel.
///
/// Enable via `DUMMY_CAMERA=1` environment variable.
#[derive(Debug, Default)]
pub struct DummyService {
    state: Mutex<DummyState>,
}

impl DummyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the dummy camera is enabled via environment variable.
    pub fn is_enabled() -> bool {
        flag_enabled(std::env::var("DUMMY_CAMERA").ok().as_deref())
    }

    pub fn frames_served(&self) -> u64 {
        self.state.lock().frames_served
    }
}

fn flag_enabled(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v == "true")
}

/// BT.601 studio-range RGB to YUV.
fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let y = 16 + ((66 * r + 129 * g + 25 * b + 128) >> 8);
    let u = 128 + ((-38 * r - 74 * g + 112 * b + 128) >> 8);
    let v = 128 + ((112 * r - 94 * g - 18 * b + 128) >> 8);
    let clamp = |c: i32| c.clamp(0, 255) as u8;
    (clamp(y), clamp(u), clamp(v))
}

/// Apply white balance and exposure to one RGB pixel.
fn adjust([r, g, b]: [u8; 3], adjustments: &ColorAdjustments) -> [u8; 3] {
    let scale = |c: u8, wb: f32| {
        (f32::from(c) * wb * adjustments.exposure_compensation).clamp(0.0, 255.0) as u8
    };
    let [wr, wg, wb] = adjustments.white_balance;
    [scale(r, wr), scale(g, wg), scale(b, wb)]
}

fn bar_color(x: u32, width: u32, offset: u64) -> [u8; 3] {
    let bar_width = u64::from((width / COLOR_BARS.len() as u32).max(1));
    let index = ((u64::from(x) + offset) / bar_width) as usize % COLOR_BARS.len();
    COLOR_BARS[index]
}

/// Render one frame of colour bars into both buffers.
fn render_bars(
    frame: &mut [u8],
    preview: &mut [u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    offset: u64,
    adjustments: &ColorAdjustments,
) {
    let (w, h) = (width as usize, height as usize);
    let total = w * h;
    let (cw, ch) = (w / 2, h / 2);
    let quarter = cw * ch;

    for y in 0..h {
        for x in 0..w {
            let rgb = adjust(bar_color(x as u32, width, offset), adjustments);
            let i = y * w + x;
            preview[i * 4..i * 4 + 4].copy_from_slice(&[rgb[0], rgb[1], rgb[2], 0xFF]);

            let (luma, u, v) = rgb_to_yuv(rgb);
            frame[i] = luma;

            if x % 2 != 0 || y % 2 != 0 || x / 2 >= cw || y / 2 >= ch {
                continue;
            }
            let ci = (y / 2) * cw + x / 2;
            match format {
                PixelFormat::Yuv420 => {
                    frame[total + ci] = u;
                    frame[total + quarter + ci] = v;
                }
                PixelFormat::Yvu420 => {
                    frame[total + ci] = v;
                    frame[total + quarter + ci] = u;
                }
                PixelFormat::Nv12 => {
                    frame[total + 2 * ci] = u;
                    frame[total + 2 * ci + 1] = v;
                }
                PixelFormat::Nv21 => {
                    frame[total + 2 * ci] = v;
                    frame[total + 2 * ci + 1] = u;
                }
            }
        }
    }
}

impl RemoteServiceClient for DummyService {
    fn connect(&self, port: u16) -> Result<()> {
        self.state.lock().port = Some(port);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        *self.state.lock() = DummyState::default();
        Ok(())
    }

    fn query_info(&self) -> Result<String> {
        if self.state.lock().port.is_none() {
            return Err(CameraError::Transport("not connected".to_string()));
        }
        Ok(DUMMY_DEVICE_INFO.to_string())
    }

    fn query_connect(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.port.is_none() {
            return Err(CameraError::Transport("not connected".to_string()));
        }
        state.hardware_connected = true;
        Ok(())
    }

    fn query_disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.started.is_some() {
            return Err(CameraError::query("disconnect", "camera is started"));
        }
        state.hardware_connected = false;
        Ok(())
    }

    fn query_start(&self, format: PixelFormat, width: u32, height: u32) -> Result<()> {
        let mut state = self.state.lock();
        if !state.hardware_connected {
            return Err(CameraError::query("start", "camera is not connected"));
        }
        state.started = Some((format, width, height));
        state.frames_served = 0;
        Ok(())
    }

    fn query_stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.started.take().is_none() {
            return Err(CameraError::query("stop", "camera is not started"));
        }
        Ok(())
    }

    fn query_frame(
        &self,
        frame: &mut [u8],
        preview: &mut [u8],
        adjustments: ColorAdjustments,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let Some((format, width, height)) = state.started else {
            return Err(CameraError::query("frame", "camera is not started"));
        };

        let total = width as usize * height as usize;
        let frame_needed = format.frame_size(total);
        if frame.len() < frame_needed {
            return Err(CameraError::BufferTooSmall {
                needed: frame_needed,
                actual: frame.len(),
            });
        }
        if preview.len() < total * 4 {
            return Err(CameraError::BufferTooSmall {
                needed: total * 4,
                actual: preview.len(),
            });
        }

        render_bars(
            frame,
            preview,
            format,
            width,
            height,
            state.frames_served,
            &adjustments,
        );
        state.frames_served += 1;
        Ok(())
    }
}
