//! `RemoteCameraDevice<C>`: emulated camera backed by a remote service.
//!
//! Generic over `C: RemoteServiceClient` so tests use `MockRemoteService`
//! while production plugs in the daemon transport.
//!
//! Lifecycle: `Uninitialized -> Initialized -> Connected -> Started`, and
//! back down through `stop_device` / `disconnect_device`. Lifecycle
//! operations are serialised by a separate lock, so the state lock is never
//! held while the frame worker is joined. The frame worker never takes the
//! state lock itself; it shares only `SharedFrameState` with the device.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::camera::backend::{EmulatedCameraDevice, FrameConsumer};
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{DeviceId, DeviceState, FrameGeometry, PixelFormat, WhiteBalanceMode};
use crate::diagnostics::stats::DiagnosticSnapshot;
use crate::settings::types::DeviceSettings;

use super::api::RemoteServiceClient;
use super::worker::{frame_period, FrameWorker, SharedFrameState};

/// Frame rate used when none is configured.
pub const DEFAULT_TARGET_FPS: u32 = 50;

/// State guarded by the device lock.
struct DeviceInner {
    id: DeviceId,
    state: DeviceState,
    target_fps: u32,
    geometry: Option<FrameGeometry>,
    worker: Option<FrameWorker>,
    /// Set while a worker thread exists, including while it is being joined.
    worker_thread: Option<ThreadId>,
}

impl DeviceInner {
    /// Device-independent initialization checks.
    fn initialize_common(&self) -> Result<()> {
        if self.target_fps == 0 {
            return Err(CameraError::InvalidConfig(
                "target frame rate must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> CameraError {
        CameraError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

/// Emulated camera device whose frames come from a remote emulation service.
pub struct RemoteCameraDevice<C: RemoteServiceClient + 'static> {
    client: Arc<C>,
    consumer: Arc<dyn FrameConsumer>,
    lifecycle: Mutex<()>,
    inner: Mutex<DeviceInner>,
    shared: Arc<SharedFrameState>,
}

impl<C: RemoteServiceClient + 'static> RemoteCameraDevice<C> {
    /// Create an uninitialized device.
    pub fn new(client: Arc<C>, consumer: Arc<dyn FrameConsumer>) -> Self {
        Self {
            client,
            consumer,
            lifecycle: Mutex::new(()),
            inner: Mutex::new(DeviceInner {
                id: DeviceId::default(),
                state: DeviceState::Uninitialized,
                target_fps: DEFAULT_TARGET_FPS,
                geometry: None,
                worker: None,
                worker_thread: None,
            }),
            shared: Arc::new(SharedFrameState::default()),
        }
    }

    /// Create an uninitialized device configured from saved settings.
    pub fn with_settings(
        client: Arc<C>,
        consumer: Arc<dyn FrameConsumer>,
        settings: &DeviceSettings,
    ) -> Self {
        let device = Self::new(client, consumer);
        device.set_target_fps(settings.target_fps);
        device.set_white_balance(settings.white_balance);
        device.set_exposure_compensation(settings.exposure_compensation);
        device
    }

    /// Bind the device to the emulation service listening on `port`.
    ///
    /// If the transport connects but device initialization then fails, the
    /// transport is closed again before the error is returned.
    pub fn initialize(&self, name: &str, port: u16) -> Result<()> {
        let _lifecycle = self.begin("initialize")?;
        let mut inner = self.inner.lock();
        if inner.state != DeviceState::Uninitialized {
            warn!("emulated camera device '{}' is already initialized", inner.id);
            return Err(inner.invalid("initialize"));
        }

        self.client.connect(port).map_err(|e| {
            error!("unable to reach the emulated camera service on port {port}: {e}");
            e
        })?;

        if let Err(e) = inner.initialize_common() {
            error!("initialization of '{name}' failed: {e}");
            if let Err(disconnect_err) = self.client.disconnect() {
                warn!("closing transport after failed initialization: {disconnect_err}");
            }
            return Err(e);
        }

        inner.id = DeviceId::new(name);
        inner.state = DeviceState::Initialized;
        debug!("connected to the emulated camera service '{name}' on port {port}");
        Ok(())
    }

    /// Ask the service to describe the emulated camera.
    pub fn device_info(&self) -> Result<String> {
        let _lifecycle = self.begin("query device info")?;
        let inner = self.inner.lock();
        if !inner.state.is_initialized() {
            error!("emulated camera device is not initialized");
            return Err(CameraError::NotInitialized);
        }
        match self.client.query_info() {
            Ok(info) => {
                debug!("emulated camera device info: '{info}'");
                Ok(info)
            }
            Err(e) => {
                error!("unable to get device info for '{}': {e}", inner.id);
                Err(e)
            }
        }
    }

    /// Frame rate for the next start. Takes effect on the next `start_device`.
    pub fn set_target_fps(&self, fps: u32) {
        self.inner.lock().target_fps = fps;
    }

    pub fn target_fps(&self) -> u32 {
        self.inner.lock().target_fps
    }

    /// Select a white balance preset. Applies from the next frame.
    pub fn set_white_balance(&self, mode: WhiteBalanceMode) {
        self.shared.adjustments.lock().set_white_balance(mode);
    }

    /// Set exposure compensation in EV. Applies from the next frame.
    pub fn set_exposure_compensation(&self, ev: f32) {
        self.shared.adjustments.lock().set_exposure_ev(ev);
    }

    pub fn device_id(&self) -> DeviceId {
        self.inner.lock().id.clone()
    }

    /// Geometry of the running session, if started.
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.inner.lock().geometry
    }

    /// Size of the held preview buffer in bytes.
    pub fn preview_buffer_len(&self) -> Option<usize> {
        self.shared.buffers.read_recursive().preview_len()
    }

    /// Monotonic timestamp of the last delivered frame, 0 before the first.
    pub fn last_frame_timestamp(&self) -> u64 {
        self.shared.last_timestamp_ns.load(Ordering::Acquire)
    }

    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.shared.stats.lock().snapshot()
    }

    /// Enter a lifecycle operation.
    ///
    /// Fails on the frame worker thread: a stop in progress may be joining
    /// that thread while holding the lifecycle lock.
    fn begin(&self, operation: &'static str) -> Result<MutexGuard<'_, ()>> {
        {
            let inner = self.inner.lock();
            if inner.worker_thread == Some(thread::current().id()) {
                error!("cannot {operation} device '{}' from its frame worker", inner.id);
                return Err(inner.invalid(operation));
            }
        }
        Ok(self.lifecycle.lock())
    }

    fn spawn_worker(&self, inner: &DeviceInner) -> Result<FrameWorker> {
        FrameWorker::spawn(
            Arc::clone(&self.client),
            Arc::clone(&self.consumer),
            inner.id.clone(),
            Arc::clone(&self.shared),
            frame_period(inner.target_fps),
        )
    }
}

impl<C: RemoteServiceClient + 'static> EmulatedCameraDevice for RemoteCameraDevice<C> {
    fn connect_device(&self) -> Result<()> {
        let _lifecycle = self.begin("connect")?;
        let mut inner = self.inner.lock();
        if !inner.state.is_initialized() {
            error!("emulated camera device is not initialized");
            return Err(CameraError::NotInitialized);
        }
        if inner.state.is_connected() {
            warn!("emulated camera device '{}' is already connected", inner.id);
            return Ok(());
        }

        match self.client.query_connect() {
            Ok(()) => {
                debug!("connected to device '{}'", inner.id);
                inner.state = DeviceState::Connected;
                Ok(())
            }
            Err(e) => {
                error!("connection to device '{}' failed: {e}", inner.id);
                Err(e)
            }
        }
    }

    fn disconnect_device(&self) -> Result<()> {
        let _lifecycle = self.begin("disconnect")?;
        let mut inner = self.inner.lock();
        if !inner.state.is_connected() {
            warn!("emulated camera device '{}' is already disconnected", inner.id);
            return Ok(());
        }
        if inner.state.is_started() {
            error!("cannot disconnect from the started device '{}'", inner.id);
            return Err(inner.invalid("disconnect"));
        }

        match self.client.query_disconnect() {
            Ok(()) => {
                debug!("disconnected from device '{}'", inner.id);
                inner.state = DeviceState::Initialized;
                Ok(())
            }
            Err(e) => {
                error!("disconnection from device '{}' failed: {e}", inner.id);
                Err(e)
            }
        }
    }

    fn start_device(&self, width: u32, height: u32, format: PixelFormat) -> Result<()> {
        let _lifecycle = self.begin("start")?;
        let mut inner = self.inner.lock();
        if !inner.state.is_connected() {
            error!("emulated camera device '{}' is not connected", inner.id);
            return Err(inner.invalid("start"));
        }
        if inner.state.is_started() {
            warn!("emulated camera device '{}' is already started", inner.id);
            return Ok(());
        }

        let geometry = FrameGeometry::new(width, height, format).map_err(|e| {
            error!("common start of '{}' failed: {e}", inner.id);
            e
        })?;

        self.shared.buffers.write().allocate(&geometry).map_err(|e| {
            error!(
                "unable to allocate {} bytes for preview frame: {e}",
                geometry.preview_buffer_size()
            );
            e
        })?;

        if let Err(e) = self.client.query_start(format, width, height) {
            error!(
                "unable to start device '{}' for {format}[{width}x{height}] frames: {e}",
                inner.id
            );
            self.shared.buffers.write().release();
            return Err(e);
        }

        self.shared.stats.lock().reset();
        self.shared.last_timestamp_ns.store(0, Ordering::Release);

        let worker = match self.spawn_worker(&inner) {
            Ok(worker) => worker,
            Err(e) => {
                error!("unable to start frame delivery for '{}': {e}", inner.id);
                if let Err(stop_err) = self.client.query_stop() {
                    warn!("stopping device after failed worker spawn: {stop_err}");
                }
                self.shared.buffers.write().release();
                return Err(e);
            }
        };

        inner.geometry = Some(geometry);
        inner.worker_thread = worker.thread_id();
        inner.worker = Some(worker);
        inner.state = DeviceState::Started;
        info!(
            "emulated camera device '{}' is started for {format}[{width}x{height}] frames",
            inner.id
        );
        Ok(())
    }

    fn stop_device(&self) -> Result<()> {
        let _lifecycle = self.begin("stop")?;
        let worker = {
            let mut inner = self.inner.lock();
            if !inner.state.is_started() {
                warn!("emulated camera device '{}' is not started", inner.id);
                return Ok(());
            }
            inner.worker.take()
        };

        // Frames must stop before the service does, and the state lock stays
        // free so consumer callbacks can still read the device while joining.
        let was_running = worker.as_ref().is_some_and(|w| !w.is_finished());
        if let Some(mut worker) = worker {
            worker.stop();
        }

        let mut inner = self.inner.lock();
        inner.worker_thread = None;

        if let Err(e) = self.client.query_stop() {
            error!("unable to stop device '{}': {e}", inner.id);
            if was_running {
                match self.spawn_worker(&inner) {
                    Ok(worker) => {
                        inner.worker_thread = worker.thread_id();
                        inner.worker = Some(worker);
                    }
                    Err(spawn_err) => {
                        error!("unable to resume frame delivery for '{}': {spawn_err}", inner.id);
                    }
                }
            }
            return Err(e);
        }

        self.shared.buffers.write().release();

        inner.geometry = None;
        inner.state = DeviceState::Connected;
        info!("emulated camera device '{}' is stopped", inner.id);
        Ok(())
    }

    fn current_preview_frame(&self, buffer: &mut [u8]) -> Result<usize> {
        self.shared.buffers.read_recursive().read_preview(buffer)
    }

    fn state(&self) -> DeviceState {
        self.inner.lock().state
    }
}

impl<C: RemoteServiceClient + 'static> Drop for RemoteCameraDevice<C> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let on_worker = inner
            .worker
            .as_ref()
            .is_some_and(FrameWorker::is_current_thread);
        drop(inner.worker.take());
        // On the worker thread the buffers are freed with the last
        // `SharedFrameState` reference once the loop returns.
        if !on_worker {
            self.shared.buffers.write().release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::remote::mock::{MockRemoteService, RecordingConsumer};
    use crate::camera::types::DeviceError;
    use std::sync::atomic::AtomicBool;
    use std::sync::{mpsc, Weak};
    use std::time::Duration;

    const PORT: u16 = 24_800;

    struct Harness {
        mock: Arc<MockRemoteService>,
        consumer: Arc<RecordingConsumer>,
        device: RemoteCameraDevice<MockRemoteService>,
    }

    fn harness_with(mock: MockRemoteService) -> Harness {
        let mock = Arc::new(mock);
        let consumer = Arc::new(RecordingConsumer::new());
        let device = RemoteCameraDevice::new(
            Arc::clone(&mock),
            Arc::clone(&consumer) as Arc<dyn FrameConsumer>,
        );
        device.set_target_fps(500);
        Harness {
            mock,
            consumer,
            device,
        }
    }

    fn initialized(mock: MockRemoteService) -> Harness {
        let h = harness_with(mock);
        h.device.initialize("back", PORT).unwrap();
        h
    }

    fn connected(mock: MockRemoteService) -> Harness {
        let h = initialized(mock);
        h.device.connect_device().unwrap();
        h
    }

    // --- Initialize ---

    #[test]
    fn initialize_connects_transport_and_records_name() {
        let h = harness_with(MockRemoteService::new());
        h.device.initialize("back", PORT).unwrap();
        assert_eq!(h.device.state(), DeviceState::Initialized);
        assert_eq!(h.device.device_id(), DeviceId::new("back"));
        assert_eq!(h.mock.transport_port(), Some(PORT));
    }

    #[test]
    fn initialize_transport_failure_leaves_state_unchanged() {
        let h = harness_with(
            MockRemoteService::new()
                .with_error("connect", CameraError::Transport("refused".to_string())),
        );
        let err = h.device.initialize("back", PORT).unwrap_err();
        assert_eq!(err, CameraError::Transport("refused".to_string()));
        assert_eq!(h.device.state(), DeviceState::Uninitialized);
    }

    #[test]
    fn initialize_rolls_back_transport_when_common_init_fails() {
        let h = harness_with(MockRemoteService::new());
        h.device.set_target_fps(0);
        let err = h.device.initialize("back", PORT).unwrap_err();
        assert!(matches!(err, CameraError::InvalidConfig(_)));
        assert_eq!(h.device.state(), DeviceState::Uninitialized);
        assert_eq!(h.mock.calls("disconnect"), 1);
        assert_eq!(h.mock.transport_port(), None);
    }

    #[test]
    fn initialize_twice_is_rejected_without_reconnecting() {
        let h = initialized(MockRemoteService::new());
        let err = h.device.initialize("front", PORT + 1).unwrap_err();
        assert!(matches!(err, CameraError::InvalidState { .. }));
        assert_eq!(h.mock.calls("connect"), 1);
        assert_eq!(h.device.device_id(), DeviceId::new("back"));
    }

    // --- Device info ---

    #[test]
    fn device_info_requires_initialization() {
        let h = harness_with(MockRemoteService::new());
        assert_eq!(h.device.device_info().unwrap_err(), CameraError::NotInitialized);
        assert_eq!(h.mock.calls("query_info"), 0);
    }

    #[test]
    fn device_info_returns_service_description() {
        let h = initialized(MockRemoteService::new().with_info("name=back dir=back"));
        assert_eq!(h.device.device_info().unwrap(), "name=back dir=back");
    }

    // --- Connect / disconnect ---

    #[test]
    fn connect_before_initialize_fails() {
        let h = harness_with(MockRemoteService::new());
        assert_eq!(h.device.connect_device().unwrap_err(), CameraError::NotInitialized);
        assert_eq!(h.mock.total_calls(), 0);
    }

    #[test]
    fn connect_twice_queries_service_once() {
        let h = initialized(MockRemoteService::new());
        h.device.connect_device().unwrap();
        h.device.connect_device().unwrap();
        assert_eq!(h.mock.calls("query_connect"), 1);
        assert_eq!(h.device.state(), DeviceState::Connected);
    }

    #[test]
    fn connect_failure_is_surfaced_and_state_kept() {
        let h = initialized(
            MockRemoteService::new().with_error("query_connect", CameraError::query("connect", "busy")),
        );
        assert!(h.device.connect_device().is_err());
        assert_eq!(h.device.state(), DeviceState::Initialized);
        h.device.connect_device().unwrap();
        assert_eq!(h.device.state(), DeviceState::Connected);
    }

    #[test]
    fn disconnect_when_not_connected_is_noop() {
        let h = initialized(MockRemoteService::new());
        h.device.disconnect_device().unwrap();
        assert_eq!(h.mock.calls("query_disconnect"), 0);
        assert_eq!(h.device.state(), DeviceState::Initialized);
    }

    #[test]
    fn disconnect_returns_to_initialized() {
        let h = connected(MockRemoteService::new());
        h.device.disconnect_device().unwrap();
        assert_eq!(h.device.state(), DeviceState::Initialized);
        assert_eq!(h.mock.calls("query_disconnect"), 1);
    }

    #[test]
    fn disconnect_failure_keeps_connected() {
        let h = connected(
            MockRemoteService::new()
                .with_error("query_disconnect", CameraError::query("disconnect", "busy")),
        );
        assert!(h.device.disconnect_device().is_err());
        assert_eq!(h.device.state(), DeviceState::Connected);
    }

    #[test]
    fn disconnect_while_started_is_forbidden() {
        let h = connected(MockRemoteService::new());
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        let err = h.device.disconnect_device().unwrap_err();
        assert_eq!(
            err,
            CameraError::InvalidState {
                operation: "disconnect",
                state: DeviceState::Started
            }
        );
        assert_eq!(h.mock.calls("query_disconnect"), 0);
        h.device.stop_device().unwrap();
    }

    // --- Start / stop ---

    #[test]
    fn start_requires_connection() {
        let h = initialized(MockRemoteService::new());
        let err = h.device.start_device(8, 4, PixelFormat::Nv21).unwrap_err();
        assert!(matches!(err, CameraError::InvalidState { .. }));
        assert_eq!(h.mock.calls("query_start"), 0);
        assert_eq!(h.device.preview_buffer_len(), None);
    }

    #[test]
    fn start_allocates_preview_and_starts_service() {
        let h = connected(MockRemoteService::new());
        h.device.start_device(64, 48, PixelFormat::Yvu420).unwrap();

        assert_eq!(h.device.state(), DeviceState::Started);
        assert_eq!(h.device.preview_buffer_len(), Some(64 * 48 * 4));
        assert_eq!(h.mock.started_with(), Some((PixelFormat::Yvu420, 64, 48)));
        let geometry = h.device.geometry().unwrap();
        assert_eq!(geometry.frame_buffer_size, 64 * 48 * 3 / 2);
        h.device.stop_device().unwrap();
    }

    #[test]
    fn start_twice_is_noop() {
        let h = connected(MockRemoteService::new());
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        h.device.start_device(16, 16, PixelFormat::Nv12).unwrap();
        assert_eq!(h.mock.calls("query_start"), 1);
        assert_eq!(h.device.preview_buffer_len(), Some(8 * 4 * 4));
        h.device.stop_device().unwrap();
    }

    #[test]
    fn start_with_bad_geometry_fails_before_service() {
        let h = connected(MockRemoteService::new());
        let err = h.device.start_device(0, 4, PixelFormat::Nv21).unwrap_err();
        assert!(matches!(err, CameraError::InvalidGeometry { .. }));
        assert_eq!(h.mock.calls("query_start"), 0);
        assert_eq!(h.device.state(), DeviceState::Connected);
    }

    #[test]
    fn failed_start_query_leaves_device_connected() {
        let h = connected(
            MockRemoteService::new().with_error("query_start", CameraError::query("start", "no camera")),
        );
        assert!(h.device.start_device(8, 4, PixelFormat::Nv21).is_err());
        assert_eq!(h.device.state(), DeviceState::Connected);
        assert_eq!(h.device.preview_buffer_len(), None);

        h.device.stop_device().unwrap();
        assert_eq!(h.mock.calls("query_stop"), 0);
    }

    #[test]
    fn stop_when_not_started_issues_no_queries() {
        let h = connected(MockRemoteService::new());
        let before = h.mock.total_calls();
        h.device.stop_device().unwrap();
        assert_eq!(h.mock.total_calls(), before);
        assert_eq!(h.device.state(), DeviceState::Connected);
    }

    #[test]
    fn stop_releases_preview_and_returns_to_connected() {
        let h = connected(MockRemoteService::new());
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        h.device.stop_device().unwrap();

        assert_eq!(h.device.state(), DeviceState::Connected);
        assert_eq!(h.device.preview_buffer_len(), None);
        assert_eq!(h.device.geometry(), None);
        let mut dst = vec![0u8; 128];
        assert_eq!(
            h.device.current_preview_frame(&mut dst).unwrap_err(),
            CameraError::FrameUnavailable
        );
    }

    #[test]
    fn failed_stop_query_keeps_session_running() {
        let h = connected(MockRemoteService::new());
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        h.mock
            .inject_error("query_stop", CameraError::query("stop", "busy"));

        assert!(h.device.stop_device().is_err());
        assert_eq!(h.device.state(), DeviceState::Started);
        assert_eq!(h.device.preview_buffer_len(), Some(128));

        // Frame delivery resumes after the rejected stop.
        let queries = h.mock.calls("query_frame");
        std::thread::sleep(Duration::from_millis(30));
        assert!(h.mock.calls("query_frame") > queries);

        h.device.stop_device().unwrap();
        assert_eq!(h.device.state(), DeviceState::Connected);
        assert!(h.consumer.errors().is_empty());
    }

    #[test]
    fn orderly_stop_never_reports_server_died() {
        let h = connected(MockRemoteService::new().with_frames_only_while_started());
        h.device.set_target_fps(1000);
        for _ in 0..25 {
            h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
            std::thread::sleep(Duration::from_millis(3));
            h.device.stop_device().unwrap();
        }

        assert!(h.consumer.errors().is_empty());
        assert!(!h.consumer.frames().is_empty());
        assert_eq!(h.device.diagnostics().error_count, 0);
    }

    #[test]
    fn stop_start_cycles_reallocate_preview() {
        let h = connected(MockRemoteService::new());
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        h.device.stop_device().unwrap();
        h.device.start_device(16, 8, PixelFormat::Nv12).unwrap();
        assert_eq!(h.device.preview_buffer_len(), Some(16 * 8 * 4));
        h.device.stop_device().unwrap();
        h.device.disconnect_device().unwrap();
        assert_eq!(h.device.state(), DeviceState::Initialized);
    }

    // --- Frame delivery ---

    #[test]
    fn started_device_delivers_frames_and_preview() {
        let h = connected(MockRemoteService::new().with_frame_fill(0x42));
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        let mut dst = vec![0u8; 8 * 4 * 4 + 10];
        let copied = h.device.current_preview_frame(&mut dst).unwrap();
        assert_eq!(copied, 8 * 4 * 4);
        assert!(dst[..copied].iter().all(|&b| b == 0x42));
        assert!(dst[copied..].iter().all(|&b| b == 0));

        h.device.stop_device().unwrap();

        let frames = h.consumer.frames();
        assert!(!frames.is_empty());
        assert_eq!(frames[0].data.len(), 48);
        assert_eq!(frames[0].device, DeviceId::new("back"));
        assert_eq!(
            h.device.last_frame_timestamp(),
            frames.last().unwrap().timestamp_ns
        );
        assert_eq!(h.device.diagnostics().frame_count, frames.len() as u64);
    }

    #[test]
    fn no_frame_queries_after_stop() {
        let h = connected(MockRemoteService::new());
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        h.device.stop_device().unwrap();

        let queries = h.mock.calls("query_frame");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(h.mock.calls("query_frame"), queries);
    }

    #[test]
    fn frame_failure_reports_server_died_and_device_can_still_stop() {
        let h = connected(MockRemoteService::new().with_frame_failure_after(2));
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(h.consumer.errors(), vec![DeviceError::ServerDied]);
        assert_eq!(h.consumer.frames().len(), 2);
        assert_eq!(h.mock.calls("query_frame"), 3);
        assert_eq!(h.device.diagnostics().error_count, 1);

        assert_eq!(h.device.state(), DeviceState::Started);
        h.device.stop_device().unwrap();
        assert_eq!(h.device.state(), DeviceState::Connected);
    }

    #[test]
    fn colour_settings_reach_frame_queries() {
        let h = connected(MockRemoteService::new());
        h.device.set_white_balance(WhiteBalanceMode::Daylight);
        h.device.set_exposure_compensation(2.2);
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        h.device.stop_device().unwrap();

        let query = h.mock.last_frame_query().unwrap();
        assert_eq!(query.adjustments.white_balance, [1.09, 1.0, 0.92]);
        assert!((query.adjustments.exposure_compensation - 2.0).abs() < 1e-5);
        assert_eq!(query.preview_len, 128);
    }

    #[test]
    fn with_settings_applies_configuration() {
        let settings = DeviceSettings {
            port: PORT,
            target_fps: 25,
            white_balance: WhiteBalanceMode::Twilight,
            exposure_compensation: 0.0,
        };
        let device = RemoteCameraDevice::with_settings(
            Arc::new(MockRemoteService::new()),
            Arc::new(RecordingConsumer::new()),
            &settings,
        );
        assert_eq!(device.target_fps(), 25);
        assert_eq!(
            device.shared.adjustments.lock().white_balance,
            WhiteBalanceMode::Twilight.scales()
        );
    }

    /// Consumer that reads the preview back from inside the frame callback,
    /// the way a preview window does.
    #[derive(Default)]
    struct PreviewReader {
        device: Mutex<Weak<RemoteCameraDevice<MockRemoteService>>>,
        copied: Mutex<Vec<usize>>,
        stop_results: Mutex<Vec<bool>>,
    }

    impl FrameConsumer for PreviewReader {
        fn on_next_frame_available(&self, _frame: &[u8], _timestamp_ns: u64, _device: &DeviceId) {
            let Some(device) = self.device.lock().upgrade() else {
                return;
            };
            let mut dst = vec![0u8; 1024];
            if let Ok(n) = device.current_preview_frame(&mut dst) {
                self.copied.lock().push(n);
            }
            let mut stop_results = self.stop_results.lock();
            if stop_results.is_empty() {
                stop_results.push(device.stop_device().is_ok());
            }
        }

        fn on_camera_device_error(&self, _error: DeviceError) {}
    }

    #[test]
    fn consumer_can_read_preview_but_not_stop_from_callback() {
        let reader = Arc::new(PreviewReader::default());
        let device = Arc::new(RemoteCameraDevice::new(
            Arc::new(MockRemoteService::new()),
            Arc::clone(&reader) as Arc<dyn FrameConsumer>,
        ));
        device.set_target_fps(500);
        *reader.device.lock() = Arc::downgrade(&device);

        device.initialize("back", PORT).unwrap();
        device.connect_device().unwrap();
        device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        device.stop_device().unwrap();

        let copied = reader.copied.lock().clone();
        assert!(!copied.is_empty());
        assert!(copied.iter().all(|&n| n == 128));
        assert_eq!(*reader.stop_results.lock(), vec![false]);
    }

    /// Consumer that stalls in its first callback and then reads the device
    /// state, so the read lands while another thread is stopping the device.
    #[derive(Default)]
    struct SlowStateReader {
        device: Mutex<Weak<RemoteCameraDevice<MockRemoteService>>>,
        entered: AtomicBool,
        seen: Mutex<Vec<(DeviceState, DeviceId)>>,
    }

    impl FrameConsumer for SlowStateReader {
        fn on_next_frame_available(&self, _frame: &[u8], _timestamp_ns: u64, _device: &DeviceId) {
            if self.entered.swap(true, Ordering::AcqRel) {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
            if let Some(device) = self.device.lock().upgrade() {
                let seen = (device.state(), device.device_id());
                self.seen.lock().push(seen);
            }
        }

        fn on_camera_device_error(&self, _error: DeviceError) {}
    }

    #[test]
    fn callback_can_read_state_while_device_is_stopping() {
        let reader = Arc::new(SlowStateReader::default());
        let device = Arc::new(RemoteCameraDevice::new(
            Arc::new(MockRemoteService::new()),
            Arc::clone(&reader) as Arc<dyn FrameConsumer>,
        ));
        device.set_target_fps(500);
        *reader.device.lock() = Arc::downgrade(&device);

        device.initialize("back", PORT).unwrap();
        device.connect_device().unwrap();
        device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        for _ in 0..200 {
            if reader.entered.load(Ordering::Acquire) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(reader.entered.load(Ordering::Acquire));

        let (tx, rx) = mpsc::channel();
        let stopper = Arc::clone(&device);
        std::thread::spawn(move || {
            let _ = tx.send(stopper.stop_device());
        });

        let outcome = rx.recv_timeout(Duration::from_secs(3));
        assert_eq!(outcome, Ok(Ok(())));
        assert_eq!(device.state(), DeviceState::Connected);
        assert_eq!(
            *reader.seen.lock(),
            vec![(DeviceState::Started, DeviceId::new("back"))]
        );
    }

    // --- Destruction ---

    #[test]
    fn dropping_started_device_stops_worker() {
        let h = connected(MockRemoteService::new());
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let Harness { mock, device, .. } = h;
        drop(device);

        let queries = mock.calls("query_frame");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(mock.calls("query_frame"), queries);
    }

    #[test]
    fn dropping_after_stop_is_clean() {
        let h = connected(MockRemoteService::new());
        h.device.start_device(8, 4, PixelFormat::Nv21).unwrap();
        h.device.stop_device().unwrap();
        drop(h);
    }

    // --- Sequencing ---

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Connect,
        Disconnect,
        Start,
        Stop,
    }

    const OPS: [Op; 4] = [Op::Connect, Op::Disconnect, Op::Start, Op::Stop];

    fn apply(device: &RemoteCameraDevice<MockRemoteService>, op: Op) -> Result<()> {
        match op {
            Op::Connect => device.connect_device(),
            Op::Disconnect => device.disconnect_device(),
            Op::Start => device.start_device(4, 2, PixelFormat::Nv21),
            Op::Stop => device.stop_device(),
        }
    }

    #[test]
    fn every_short_sequence_respects_lifecycle() {
        let total = OPS.len().pow(3);
        for n in 0..total {
            let h = initialized(MockRemoteService::new());
            h.device.set_target_fps(1000);
            let mut code = n;
            for _ in 0..3 {
                let op = OPS[code % OPS.len()];
                code /= OPS.len();

                let before = h.device.state();
                let result = apply(&h.device, op);
                let after = h.device.state();

                if after == DeviceState::Started {
                    assert!(before.is_connected(), "{op:?} reached started from {before}");
                }
                if matches!(op, Op::Disconnect) && before == DeviceState::Started {
                    assert!(result.is_err());
                    assert_eq!(after, DeviceState::Started);
                }
                assert_eq!(h.device.preview_buffer_len().is_some(), after.is_started());
            }
        }
    }
}
