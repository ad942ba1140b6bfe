//! Frame acquisition worker.
//!
//! Spawns a thread that, once per frame period, pulls the next frame from
//! the emulation service into the device's buffers and hands it to the
//! upstream `FrameConsumer`. The worker never takes the device's state lock;
//! it only touches the shared buffers, colour adjustments and statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, error};

use crate::camera::backend::FrameConsumer;
use crate::camera::buffers::FrameBuffers;
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{monotonic_nanos, ColorAdjustments, DeviceError, DeviceId};
use crate::diagnostics::stats::DiagnosticStats;

use super::api::RemoteServiceClient;

/// State shared between a device and its frame worker.
#[derive(Debug, Default)]
pub struct SharedFrameState {
    pub buffers: RwLock<FrameBuffers>,
    pub adjustments: Mutex<ColorAdjustments>,
    pub stats: Mutex<DiagnosticStats>,
    pub last_timestamp_ns: AtomicU64,
}

/// One frame period for `fps` frames per second.
pub fn frame_period(fps: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(fps.max(1)))
}

/// Handle to a running frame acquisition thread.
pub struct FrameWorker {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl FrameWorker {
    /// Spawn the acquisition loop for `device`.
    pub fn spawn<C: RemoteServiceClient + ?Sized + 'static>(
        client: Arc<C>,
        consumer: Arc<dyn FrameConsumer>,
        device: DeviceId,
        shared: Arc<SharedFrameState>,
        period: Duration,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name(format!("emucam-frames-{device}"))
            .spawn(move || {
                run_frame_loop(&*client, &*consumer, &device, &shared, &stop_rx, period);
            })
            .map_err(|e| CameraError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    /// Id of the worker thread, until it has been joined.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread.as_ref().map(|t| t.thread().id())
    }

    /// Whether the calling thread is this worker's thread.
    pub fn is_current_thread(&self) -> bool {
        self.thread_id() == Some(thread::current().id())
    }

    /// Whether the loop has exited (cancelled or failed).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the loop to exit and wait until it has.
    ///
    /// The signal is picked up at the next frame-period wait, so this blocks
    /// for at most one period plus any frame query in flight.
    pub fn stop(&mut self) {
        // The loop may already have exited and dropped the receiver.
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("frame worker panicked");
            }
        }
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        if self.is_current_thread() {
            let _ = self.stop_tx.send(());
            return;
        }
        self.stop();
    }
}

/// Acquisition loop body, run on the worker thread.
fn run_frame_loop<C: RemoteServiceClient + ?Sized>(
    client: &C,
    consumer: &dyn FrameConsumer,
    device: &DeviceId,
    shared: &SharedFrameState,
    stop_rx: &Receiver<()>,
    period: Duration,
) {
    debug!("frame worker for '{device}' running every {period:?}");
    loop {
        match stop_rx.recv_timeout(period) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("frame worker for '{device}' has been terminated");
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let adjustments = *shared.adjustments.lock();
        let mut buffers = shared.buffers.write();
        let (frame, preview) = buffers.split_mut();
        if let Err(e) = client.query_frame(frame, preview, adjustments) {
            drop(buffers);
            error!("unable to get current video frame for '{device}': {e}");
            shared.stats.lock().record_error();
            consumer.on_camera_device_error(DeviceError::ServerDied);
            return;
        }

        let timestamp_ns = monotonic_nanos();
        shared
            .last_timestamp_ns
            .store(timestamp_ns, Ordering::Release);

        // Readers (including the consumer) may look at the preview while the
        // frame is being delivered.
        let buffers = RwLockWriteGuard::downgrade(buffers);
        shared
            .stats
            .lock()
            .record_frame(buffers.current().len(), timestamp_ns);
        consumer.on_next_frame_available(buffers.current(), timestamp_ns, device);
    }
}
