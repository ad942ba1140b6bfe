//! Frame and preview buffer ownership.
//!
//! A started device owns two buffers: the current frame in the device's
//! YUV pixel format, and an RGB32 preview frame. Both are written by the
//! emulation service on every frame query and released when the device
//! stops.

use tracing::warn;

use crate::camera::error::{CameraError, Result};
use crate::camera::types::{FrameGeometry, PREVIEW_BYTES_PER_PIXEL};

/// Allocate a zeroed byte buffer, reporting allocation failure instead of
/// aborting.
fn try_alloc(bytes: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| CameraError::OutOfMemory { bytes })?;
    data.resize(bytes, 0);
    Ok(data)
}

/// RGB32 preview frame, `total_pixels * 4` bytes.
#[derive(Debug)]
pub struct PreviewBuffer {
    data: Vec<u8>,
}

impl PreviewBuffer {
    /// Allocate a preview buffer for `total_pixels` 32-bit pixels.
    pub fn allocate(total_pixels: usize) -> Result<Self> {
        let bytes = total_pixels
            .checked_mul(PREVIEW_BYTES_PER_PIXEL)
            .ok_or(CameraError::OutOfMemory { bytes: usize::MAX })?;
        Ok(Self {
            data: try_alloc(bytes)?,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Buffers shared between a device and its frame worker.
#[derive(Debug, Default)]
pub struct FrameBuffers {
    current: Vec<u8>,
    preview: Option<PreviewBuffer>,
}

impl FrameBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate both buffers for `geometry`, replacing anything held.
    ///
    /// On failure nothing is held afterwards.
    pub fn allocate(&mut self, geometry: &FrameGeometry) -> Result<()> {
        self.release();
        let current = try_alloc(geometry.frame_buffer_size)?;
        let preview = PreviewBuffer::allocate(geometry.total_pixels)?;
        self.current = current;
        self.preview = Some(preview);
        Ok(())
    }

    /// Drop the preview frame. No-op when nothing is held.
    pub fn release_preview(&mut self) {
        self.preview = None;
    }

    /// Drop the preview frame and the current frame.
    pub fn release(&mut self) {
        self.release_preview();
        self.current = Vec::new();
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }

    pub fn preview_len(&self) -> Option<usize> {
        self.preview.as_ref().map(PreviewBuffer::len)
    }

    pub fn current(&self) -> &[u8] {
        &self.current
    }

    /// Split borrow of the current frame and the preview frame, as handed
    /// to a frame query. The preview slice is empty when none is held.
    pub fn split_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let preview = match self.preview.as_mut() {
            Some(preview) => preview.as_mut_bytes(),
            None => &mut [],
        };
        (self.current.as_mut_slice(), preview)
    }

    /// Copy the preview frame into `dst`, returning the number of bytes
    /// copied.
    pub fn read_preview(&self, dst: &mut [u8]) -> Result<usize> {
        let Some(preview) = self.preview.as_ref() else {
            warn!("no preview frame held");
            return Err(CameraError::FrameUnavailable);
        };
        let needed = preview.len();
        let actual = dst.len();
        let target = dst
            .get_mut(..needed)
            .ok_or(CameraError::BufferTooSmall { needed, actual })?;
        target.copy_from_slice(preview.as_bytes());
        Ok(needed)
    }
}
