use thiserror::Error;

use crate::camera::types::DeviceState;

/// Camera subsystem errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CameraError {
    #[error("camera device is not initialized")]
    NotInitialized,

    #[error("cannot {operation} while device is {state}")]
    InvalidState {
        operation: &'static str,
        state: DeviceState,
    },

    #[error("transport to emulation service failed: {0}")]
    Transport(String),

    #[error("remote query '{query}' failed: {reason}")]
    Query { query: &'static str, reason: String },

    #[error("unable to allocate {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid frame geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },

    #[error("destination buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("no preview frame available")]
    FrameUnavailable,

    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn frame worker: {0}")]
    WorkerSpawn(String),

    #[error("settings error: {0}")]
    Settings(String),
}

impl CameraError {
    /// Shorthand for a failed remote query.
    pub fn query(query: &'static str, reason: impl Into<String>) -> Self {
        Self::Query {
            query,
            reason: reason.into(),
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CameraError>;
