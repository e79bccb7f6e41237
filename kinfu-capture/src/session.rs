//! Capture on a dedicated polling thread.
//!
//! The worker thread owns nothing: the native source and its buffers live
//! behind one mutex shared with the application thread. Each iteration the
//! worker takes the lock, makes one capture call, records what arrived and
//! releases the lock before sleeping. The application thread calls
//! [`CaptureSession::poll`] once per frame to copy out new data under the same
//! lock, then converts and packs it with the lock released.

use crate::buffers::FrameBuffers;
use crate::config::CaptureConfig;
use crate::convert::{CaptureUpdate, FrameConverter};
use crate::error::CaptureError;
use crate::log::LogSink;
use crate::source::{CaptureStatus, NativeCapture, start_device};
use kinfu_data::POSE_LEN;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    /// Stop requested, device being released.
    Closing,
    /// Fatal status received and the device released. Cleared once
    /// [`CaptureSession::poll`] has reported the fault.
    Faulted,
}

struct Exchange<S> {
    source: S,
    buffers: FrameBuffers,
    state: SessionState,
    update_image: bool,
    num_points: usize,
    fault: Option<i32>,
}

struct Shared<S> {
    exchange: Mutex<Exchange<S>>,
    running: AtomicBool,
}

impl<S> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Exchange<S>> {
        self.exchange.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct CaptureSession<S: NativeCapture + 'static> {
    shared: Arc<Shared<S>>,
    worker: Option<JoinHandle<()>>,
    converter: FrameConverter,
    config: CaptureConfig,
}

impl<S: NativeCapture + 'static> CaptureSession<S> {
    pub fn new(source: S, config: CaptureConfig) -> Self {
        let buffers = FrameBuffers::from_config(&config);
        Self {
            shared: Arc::new(Shared {
                exchange: Mutex::new(Exchange {
                    source,
                    buffers,
                    state: SessionState::Idle,
                    update_image: false,
                    num_points: 0,
                    fault: None,
                }),
                running: AtomicBool::new(false),
            }),
            worker: None,
            converter: FrameConverter::from_config(&config),
            config,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn register_log_sink(&self, sink: LogSink) {
        self.shared
            .lock()
            .source
            .register_log_sink(sink, self.config.log_level);
    }

    /// Number of sensors the library can see. Useful while idle to show
    /// whether a device is plugged in.
    pub fn connected_sensor_count(&self) -> i32 {
        self.shared.lock().source.connected_sensor_count()
    }

    pub fn reset_device(&self) {
        self.shared.lock().source.reset_device();
        info!("Device reset");
    }

    /// Bring the device up and start the polling thread.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        self.reap_worker();
        {
            let mut exchange = self.shared.lock();
            if !matches!(exchange.state, SessionState::Idle | SessionState::Faulted) {
                return Err(CaptureError::AlreadyRunning);
            }
            exchange.state = SessionState::Idle;
            exchange.fault = None;
            start_device(&mut exchange.source, self.config.device_index)?;
            exchange.state = SessionState::Capturing;
            exchange.update_image = false;
            exchange.num_points = 0;
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let interval = self.config.sleep_interval();
        info!(interval_ms = interval.as_millis() as u64, "Starting capture thread");
        self.worker = Some(thread::spawn(move || poll_device(shared, interval)));
        Ok(())
    }

    /// Stop the polling thread and close the device.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        {
            let mut exchange = self.shared.lock();
            if exchange.state != SessionState::Capturing {
                drop(exchange);
                let had_worker = self.reap_worker();
                return if had_worker {
                    Ok(())
                } else {
                    Err(CaptureError::NotRunning)
                };
            }
            exchange.state = SessionState::Closing;
        }

        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(worker) = &self.worker {
            worker.thread().unpark();
        }
        self.reap_worker();

        let mut exchange = self.shared.lock();
        // A fatal status during shutdown has already released the device.
        if exchange.state == SessionState::Closing {
            exchange.source.close_device();
            exchange.update_image = false;
            exchange.num_points = 0;
            exchange.state = SessionState::Idle;
            info!("Device closed");
        }
        Ok(())
    }

    /// Collect whatever the polling thread captured since the last call.
    ///
    /// Returns [`CaptureError::DeviceFault`] once after the device failed,
    /// which moves the session from `Faulted` to `Idle`.
    pub fn poll(&mut self) -> Result<Option<CaptureUpdate>, CaptureError> {
        let mut update = CaptureUpdate::default();
        let raw_points;
        let mut pose = None;
        {
            let mut exchange = self.shared.lock();
            if let Some(status) = exchange.fault.take() {
                exchange.state = SessionState::Idle;
                drop(exchange);
                self.reap_worker();
                return Err(CaptureError::DeviceFault(status));
            }

            if exchange.update_image {
                update.color = Some(exchange.buffers.copy_color());
                pose = Some(*exchange.buffers.pose());
                exchange.update_image = false;
            }

            raw_points = if exchange.num_points > 0 {
                let count = exchange.num_points;
                exchange.num_points = 0;
                Some(exchange.buffers.copy_points(count))
            } else {
                None
            };
        }

        if let Some(flat) = pose {
            self.converter.add_pose(&mut update, &flat);
        }
        if let Some(raw) = raw_points {
            self.converter.add_points(&mut update, &raw);
        }

        Ok((!update.is_empty()).then_some(update))
    }

    /// Ask the library for the current pose outside the capture cycle.
    pub fn request_pose(&self) -> [f32; POSE_LEN] {
        let mut exchange = self.shared.lock();
        let exchange = &mut *exchange;
        exchange.source.request_pose(exchange.buffers.pose_mut());
        *exchange.buffers.pose()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Join a finished or stopping worker. Returns whether there was one.
    fn reap_worker(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };
        if worker.join().is_err() {
            warn!("Capture thread panicked");
        }
        true
    }
}

impl<S: NativeCapture + 'static> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        if self.state() == SessionState::Capturing {
            debug!("Capture session dropped while running, stopping");
            let _ = self.stop();
        } else {
            self.reap_worker();
        }
    }
}

fn poll_device<S: NativeCapture>(shared: Arc<Shared<S>>, interval: Duration) {
    debug!("Capture thread started");
    while shared.running.load(Ordering::SeqCst) {
        {
            let mut guard = shared.lock();
            let exchange = &mut *guard;
            let raw = exchange.source.capture_frame(&mut exchange.buffers);

            match CaptureStatus::from_raw(raw) {
                CaptureStatus::Fatal => {
                    error!(status = raw, "Capture device failed, closing");
                    exchange.state = SessionState::Faulted;
                    exchange.source.close_device();
                    exchange.update_image = false;
                    exchange.num_points = 0;
                    exchange.fault = Some(raw);
                    shared.running.store(false, Ordering::SeqCst);
                    break;
                }
                CaptureStatus::Data(count) => {
                    exchange.update_image = true;
                    exchange.num_points = count;
                }
                CaptureStatus::NoData => {}
                CaptureStatus::Ignored(status) => {
                    debug!(status, "Ignoring capture status");
                }
            }
        }

        thread::park_timeout(interval);
    }
    debug!("Capture thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::NativeLogLevel;
    use crate::source::FATAL_SENTINEL;
    use std::collections::VecDeque;
    use std::time::Instant;

    #[derive(Debug, Default)]
    struct Calls {
        captures: usize,
        closes: usize,
        resets: usize,
        opened: Option<i32>,
    }

    /// Returns scripted statuses, then `0` forever.
    struct ScriptedSource {
        script: VecDeque<i32>,
        calls: Arc<Mutex<Calls>>,
        sensors: i32,
    }

    impl ScriptedSource {
        fn new(script: &[i32]) -> (Self, Arc<Mutex<Calls>>) {
            let calls = Arc::new(Mutex::new(Calls::default()));
            (
                Self {
                    script: script.iter().copied().collect(),
                    calls: Arc::clone(&calls),
                    sensors: 1,
                },
                calls,
            )
        }
    }

    impl NativeCapture for ScriptedSource {
        fn connected_sensor_count(&mut self) -> i32 {
            self.sensors
        }

        fn connect_to_device(&mut self, index: i32) -> bool {
            self.calls.lock().unwrap().opened = Some(index);
            index < self.sensors
        }

        fn connect_to_default_device(&mut self) -> bool {
            true
        }

        fn setup_config_and_calibrate(&mut self) -> bool {
            true
        }

        fn start_cameras(&mut self) -> bool {
            true
        }

        fn connect_and_start_cameras(&mut self) -> i32 {
            0
        }

        fn capture_point_cloud(&mut self, points: &mut [f32]) -> i32 {
            points[..3].copy_from_slice(&[1.0, 1.0, 1.0]);
            1
        }

        fn capture_frame(&mut self, buffers: &mut FrameBuffers) -> i32 {
            self.calls.lock().unwrap().captures += 1;
            let status = self.script.pop_front().unwrap_or(0);
            if status > 0 {
                for (i, value) in buffers.points_mut()[..status as usize * 3].iter_mut().enumerate() {
                    *value = i as f32;
                }
                buffers.pose_mut()[13] = 2.0;
            }
            status
        }

        fn close_device(&mut self) {
            self.calls.lock().unwrap().closes += 1;
        }

        fn reset_device(&mut self) {
            self.calls.lock().unwrap().resets += 1;
        }

        fn request_pose(&mut self, pose: &mut [f32; POSE_LEN]) {
            pose[12] = 1.0;
        }

        fn register_log_sink(&mut self, sink: LogSink, level: NativeLogLevel) {
            sink.send(level, "registered");
        }
    }

    fn test_config() -> CaptureConfig {
        CaptureConfig {
            sleep_ms: 50,
            color_width: 4,
            color_height: 4,
            max_points: 16,
            flip_y: false,
            ..CaptureConfig::default()
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_fatal_status_closes_once() {
        let (source, calls) = ScriptedSource::new(&[3, 0, FATAL_SENTINEL]);
        let mut session = CaptureSession::new(source, test_config());
        session.start().unwrap();

        wait_for(|| session.state() == SessionState::Faulted);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(session.state(), SessionState::Faulted);

        {
            let calls = calls.lock().unwrap();
            assert_eq!(calls.closes, 1);
            assert_eq!(calls.captures, 3);
        }

        assert!(matches!(
            session.poll(),
            Err(CaptureError::DeviceFault(FATAL_SENTINEL))
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.poll().unwrap().is_none());
        assert!(matches!(session.stop(), Err(CaptureError::NotRunning)));
        assert_eq!(calls.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_restart_after_fault() {
        let (source, calls) = ScriptedSource::new(&[FATAL_SENTINEL]);
        let mut session = CaptureSession::new(source, test_config());
        session.start().unwrap();
        wait_for(|| session.state() == SessionState::Faulted);

        // Restarting discards the unreported fault.
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Capturing);
        wait_for(|| calls.lock().unwrap().captures >= 2);
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(calls.lock().unwrap().closes, 2);
    }

    #[test]
    fn test_poll_converts_points_and_pose() {
        let (source, _calls) = ScriptedSource::new(&[2]);
        let mut session = CaptureSession::new(source, test_config());
        session.start().unwrap();

        let mut update = None;
        wait_for(|| {
            update = session.poll().unwrap();
            update.is_some()
        });
        let update = update.unwrap();

        let cloud = update.cloud.unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points()[1], glam::Vec3::new(3.0, 4.0, 5.0));
        assert_eq!(update.grid.unwrap().width, 2);
        assert_eq!(update.color.unwrap().dimensions(), (4, 4));
        assert_eq!(update.pose.unwrap().get(3, 1), 2.0);

        // Flags were consumed.
        assert!(session.poll().unwrap().is_none());
        session.stop().unwrap();
    }

    #[test]
    fn test_start_twice_rejected() {
        let (source, _calls) = ScriptedSource::new(&[]);
        let mut session = CaptureSession::new(source, test_config());
        session.start().unwrap();
        assert!(matches!(session.start(), Err(CaptureError::AlreadyRunning)));
        session.stop().unwrap();
    }

    #[test]
    fn test_no_sensor_stays_idle() {
        let (mut source, calls) = ScriptedSource::new(&[1]);
        source.sensors = 0;
        let mut session = CaptureSession::new(source, test_config());
        assert!(matches!(
            session.start(),
            Err(CaptureError::DeviceUnavailable(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_running());
        assert_eq!(calls.lock().unwrap().captures, 0);
    }

    #[test]
    fn test_stop_closes_device() {
        let (source, calls) = ScriptedSource::new(&[]);
        let mut session = CaptureSession::new(source, test_config());
        session.start().unwrap();
        wait_for(|| calls.lock().unwrap().captures >= 1);
        session.stop().unwrap();
        let captures = calls.lock().unwrap().captures;
        thread::sleep(Duration::from_millis(120));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.captures, captures);
        assert_eq!(calls.closes, 1);
    }

    #[test]
    fn test_drop_stops_session() {
        let (source, calls) = ScriptedSource::new(&[]);
        {
            let mut session = CaptureSession::new(source, test_config());
            session.start().unwrap();
        }
        assert_eq!(calls.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_device_helpers_take_lock() {
        let (source, calls) = ScriptedSource::new(&[]);
        let session = CaptureSession::new(source, test_config());
        assert_eq!(session.connected_sensor_count(), 1);
        session.reset_device();
        assert_eq!(calls.lock().unwrap().resets, 1);
        assert_eq!(session.request_pose()[12], 1.0);

        let (sink, receiver) = crate::log::log_channel();
        session.register_log_sink(sink);
        let message = receiver.try_iter().next().unwrap();
        assert_eq!(message.level, NativeLogLevel::Warning);
    }

    #[test]
    fn test_start_opens_configured_device() {
        let (mut source, calls) = ScriptedSource::new(&[]);
        source.sensors = 2;
        let config = CaptureConfig {
            device_index: Some(1),
            ..test_config()
        };
        let mut session = CaptureSession::new(source, config);
        session.start().unwrap();
        assert_eq!(calls.lock().unwrap().opened, Some(1));
        session.stop().unwrap();
    }
}
