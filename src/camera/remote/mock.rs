//! Mock emulation service and recording consumer for tests.
//!
//! Uses a builder pattern to configure the device description, frame
//! content and error injection. Every call is counted so tests can assert
//! exactly which queries reached the service.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::camera::backend::FrameConsumer;
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{ColorAdjustments, DeviceError, DeviceId, PixelFormat};

use super::api::RemoteServiceClient;

/// Configurable error injection for a specific operation.
#[derive(Debug, Clone)]
struct ErrorInjection {
    operation: &'static str,
    error: CameraError,
}

/// Arguments seen by the most recent `query_frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameQuery {
    pub frame_len: usize,
    pub preview_len: usize,
    pub adjustments: ColorAdjustments,
}

/// Mock emulation service.
///
/// All state is behind a `Mutex` so the mock satisfies `Send + Sync`.
pub struct MockRemoteService {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    info: String,
    frame_fill: u8,
    frame_failure_after: Option<u64>,
    frames_require_start: bool,
    frames_served: u64,
    transport_port: Option<u16>,
    started_with: Option<(PixelFormat, u32, u32)>,
    last_frame_query: Option<FrameQuery>,
    calls: HashMap<&'static str, u32>,
    error_injections: Vec<ErrorInjection>,
}

impl Default for MockRemoteService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteService {
    /// Create a mock that accepts every query.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                info: "name=mock-camera channel=0 pix=17 dir=back framedims=640x480".to_string(),
                ..MockState::default()
            }),
        }
    }

    /// Set the description returned by `query_info`.
    pub fn with_info(self, info: &str) -> Self {
        self.state.lock().info = info.to_string();
        self
    }

    /// Byte value written into every frame and preview buffer.
    pub fn with_frame_fill(self, value: u8) -> Self {
        self.state.lock().frame_fill = value;
        self
    }

    /// Serve `frames` frames successfully, then fail every frame query.
    pub fn with_frame_failure_after(self, frames: u64) -> Self {
        self.state.lock().frame_failure_after = Some(frames);
        self
    }

    /// Fail frame queries unless the service has been started, the way the
    /// daemon rejects frames after `query_stop`.
    pub fn with_frames_only_while_started(self) -> Self {
        self.state.lock().frames_require_start = true;
        self
    }

    /// Inject an error for the next call of an operation.
    ///
    /// Operation names match the trait methods: `"connect"`, `"disconnect"`,
    /// `"query_info"`, `"query_connect"`, `"query_disconnect"`,
    /// `"query_start"`, `"query_stop"`, `"query_frame"`.
    pub fn with_error(self, operation: &'static str, error: CameraError) -> Self {
        self.inject_error(operation, error);
        self
    }

    /// Inject an error after construction (e.g. mid-session).
    pub fn inject_error(&self, operation: &'static str, error: CameraError) {
        self.state
            .lock()
            .error_injections
            .push(ErrorInjection { operation, error });
    }

    /// Number of times `operation` was called, including failed calls.
    pub fn calls(&self, operation: &str) -> u32 {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Total number of calls across all operations.
    pub fn total_calls(&self) -> u32 {
        self.state.lock().calls.values().sum()
    }

    /// Port of the open transport, if any.
    pub fn transport_port(&self) -> Option<u16> {
        self.state.lock().transport_port
    }

    /// Format and dimensions of the last successful `query_start`, cleared
    /// by `query_stop`.
    pub fn started_with(&self) -> Option<(PixelFormat, u32, u32)> {
        self.state.lock().started_with
    }

    pub fn last_frame_query(&self) -> Option<FrameQuery> {
        self.state.lock().last_frame_query.clone()
    }
}

impl MockState {
    /// Count the call and fire any injected error for it.
    fn enter(&mut self, operation: &'static str) -> Result<()> {
        *self.calls.entry(operation).or_insert(0) += 1;
        if let Some(pos) = self
            .error_injections
            .iter()
            .position(|e| e.operation == operation)
        {
            let injection = self.error_injections.remove(pos);
            return Err(injection.error);
        }
        Ok(())
    }
}

impl RemoteServiceClient for MockRemoteService {
    fn connect(&self, port: u16) -> Result<()> {
        let mut state = self.state.lock();
        state.enter("connect")?;
        state.transport_port = Some(port);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.enter("disconnect")?;
        state.transport_port = None;
        Ok(())
    }

    fn query_info(&self) -> Result<String> {
        let mut state = self.state.lock();
        state.enter("query_info")?;
        Ok(state.info.clone())
    }

    fn query_connect(&self) -> Result<()> {
        self.state.lock().enter("query_connect")
    }

    fn query_disconnect(&self) -> Result<()> {
        self.state.lock().enter("query_disconnect")
    }

    fn query_start(&self, format: PixelFormat, width: u32, height: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.enter("query_start")?;
        state.started_with = Some((format, width, height));
        Ok(())
    }

    fn query_stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.enter("query_stop")?;
        state.started_with = None;
        Ok(())
    }

    fn query_frame(
        &self,
        frame: &mut [u8],
        preview: &mut [u8],
        adjustments: ColorAdjustments,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.enter("query_frame")?;
        state.last_frame_query = Some(FrameQuery {
            frame_len: frame.len(),
            preview_len: preview.len(),
            adjustments,
        });
        if state.frames_require_start && state.started_with.is_none() {
            return Err(CameraError::query("frame", "camera is not started"));
        }
        if state
            .frame_failure_after
            .is_some_and(|limit| state.frames_served >= limit)
        {
            return Err(CameraError::query("frame", "emulation service stopped"));
        }
        state.frames_served += 1;
        frame.fill(state.frame_fill);
        preview.fill(state.frame_fill);
        Ok(())
    }
}

/// A frame captured by `RecordingConsumer`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub data: Vec<u8>,
    pub timestamp_ns: u64,
    pub device: DeviceId,
}

/// Consumer callbacks in the order they arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerEvent {
    Frame(RecordedFrame),
    Error(DeviceError),
}

/// `FrameConsumer` that records every callback.
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    events: Mutex<Vec<ConsumerEvent>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().clone()
    }

    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ConsumerEvent::Frame(frame) => Some(frame.clone()),
                ConsumerEvent::Error(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<DeviceError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ConsumerEvent::Error(error) => Some(*error),
                ConsumerEvent::Frame(_) => None,
            })
            .collect()
    }
}

impl FrameConsumer for RecordingConsumer {
    fn on_next_frame_available(&self, frame: &[u8], timestamp_ns: u64, device: &DeviceId) {
        self.events.lock().push(ConsumerEvent::Frame(RecordedFrame {
            data: frame.to_vec(),
            timestamp_ns,
            device: device.clone(),
        }));
    }

    fn on_camera_device_error(&self, error: DeviceError) {
        self.events.lock().push(ConsumerEvent::Error(error));
    }
}
