//! Capture driven from the caller's own loop.
//!
//! Single-threaded alternative to [`CaptureSession`](crate::CaptureSession):
//! capture, pose request and packing all happen inside [`TickCapture::tick`],
//! so no lock is involved. [`TickCapture::run`] yields to the tokio scheduler
//! between ticks.

use crate::buffers::FrameBuffers;
use crate::config::CaptureConfig;
use crate::convert::{CaptureUpdate, FrameConverter};
use crate::error::CaptureError;
use crate::session::SessionState;
use crate::source::{CaptureStatus, NativeCapture, start_device};
use std::time::Duration;
use tracing::{debug, error, info};

/// Returned by the update callback of [`TickCapture::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

pub struct TickCapture<S: NativeCapture> {
    source: S,
    buffers: FrameBuffers,
    converter: FrameConverter,
    state: SessionState,
    interval: Duration,
    device_index: Option<i32>,
}

impl<S: NativeCapture> TickCapture<S> {
    pub fn new(source: S, config: &CaptureConfig) -> Self {
        Self {
            source,
            buffers: FrameBuffers::from_config(config),
            converter: FrameConverter::from_config(config),
            state: SessionState::Idle,
            interval: config.sleep_interval(),
            device_index: config.device_index,
        }
    }

    /// Delay between ticks in [`TickCapture::run`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state != SessionState::Idle {
            return Err(CaptureError::AlreadyRunning);
        }
        start_device(&mut self.source, self.device_index)?;
        self.state = SessionState::Capturing;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if self.state != SessionState::Capturing {
            return Err(CaptureError::NotRunning);
        }
        self.state = SessionState::Closing;
        self.source.close_device();
        self.state = SessionState::Idle;
        info!("Device closed");
        Ok(())
    }

    /// Capture one frame and convert it.
    ///
    /// `Ok(None)` when the device had nothing new. A fatal status closes the
    /// device, leaves the capture idle and returns [`CaptureError::DeviceFault`].
    pub fn tick(&mut self) -> Result<Option<CaptureUpdate>, CaptureError> {
        if self.state != SessionState::Capturing {
            return Err(CaptureError::NotRunning);
        }

        let raw = self.source.capture_frame(&mut self.buffers);
        let Some(count) = self.check_status(raw)? else {
            return Ok(None);
        };

        self.source.request_pose(self.buffers.pose_mut());

        let mut update = CaptureUpdate {
            color: Some(self.buffers.copy_color()),
            ..CaptureUpdate::default()
        };
        self.converter.add_pose(&mut update, self.buffers.pose());
        let available = count.min(self.buffers.max_points());
        self.converter
            .add_points(&mut update, &self.buffers.points()[..available * 3]);
        Ok(Some(update))
    }

    /// Capture points only, without color or pose.
    ///
    /// Same status handling as [`TickCapture::tick`]; the update carries just
    /// the cloud and its packed grid.
    pub fn tick_points(&mut self) -> Result<Option<CaptureUpdate>, CaptureError> {
        if self.state != SessionState::Capturing {
            return Err(CaptureError::NotRunning);
        }

        let raw = self.source.capture_point_cloud(self.buffers.points_mut());
        let Some(count) = self.check_status(raw)? else {
            return Ok(None);
        };

        let mut update = CaptureUpdate::default();
        let available = count.min(self.buffers.max_points());
        self.converter
            .add_points(&mut update, &self.buffers.points()[..available * 3]);
        Ok(Some(update))
    }

    /// Point count for a data status, `None` to skip the tick. A fatal
    /// status closes the device and leaves the capture idle.
    fn check_status(&mut self, raw: i32) -> Result<Option<usize>, CaptureError> {
        match CaptureStatus::from_raw(raw) {
            CaptureStatus::Fatal => {
                error!(status = raw, "Capture device failed, closing");
                self.source.close_device();
                self.state = SessionState::Idle;
                Err(CaptureError::DeviceFault(raw))
            }
            CaptureStatus::NoData => Ok(None),
            CaptureStatus::Ignored(status) => {
                debug!(status, "Ignoring capture status");
                Ok(None)
            }
            CaptureStatus::Data(count) => Ok(Some(count)),
        }
    }

    /// Tick until the callback says stop, sleeping between ticks.
    ///
    /// Stopping through the callback closes the device. A device fault ends
    /// the loop with the error; the device is already closed by then.
    pub async fn run<F>(&mut self, mut on_update: F) -> Result<(), CaptureError>
    where
        F: FnMut(CaptureUpdate) -> LoopAction,
    {
        loop {
            if let Some(update) = self.tick()? {
                if on_update(update) == LoopAction::Stop {
                    return self.stop();
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogSink, NativeLogLevel};
    use crate::source::FATAL_SENTINEL;
    use kinfu_data::POSE_LEN;

    #[derive(Default)]
    struct CountingSource {
        statuses: Vec<i32>,
        captures: usize,
        closes: usize,
        pose_requests: usize,
    }

    impl NativeCapture for CountingSource {
        fn connected_sensor_count(&mut self) -> i32 {
            1
        }

        fn connect_to_device(&mut self, _index: i32) -> bool {
            true
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
            let status = self.statuses.get(self.captures).copied().unwrap_or(2);
            self.captures += 1;
            if status > 0 {
                points[..6].copy_from_slice(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
            }
            status
        }

        fn capture_frame(&mut self, buffers: &mut FrameBuffers) -> i32 {
            let status = self.statuses.get(self.captures).copied().unwrap_or(1);
            self.captures += 1;
            if status > 0 {
                buffers.points_mut()[..3].copy_from_slice(&[1.0, 2.0, self.captures as f32]);
            }
            status
        }

        fn close_device(&mut self) {
            self.closes += 1;
        }

        fn reset_device(&mut self) {}

        fn request_pose(&mut self, pose: &mut [f32; POSE_LEN]) {
            self.pose_requests += 1;
            pose[14] = 3.0;
        }

        fn register_log_sink(&mut self, _sink: LogSink, _level: NativeLogLevel) {}
    }

    fn config() -> CaptureConfig {
        CaptureConfig {
            color_width: 2,
            color_height: 2,
            max_points: 4,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn test_tick_requires_start() {
        let mut capture = TickCapture::new(CountingSource::default(), &config());
        assert!(matches!(capture.tick(), Err(CaptureError::NotRunning)));
    }

    #[test]
    fn test_tick_converts() {
        let mut capture = TickCapture::new(CountingSource::default(), &config());
        capture.start().unwrap();
        let update = capture.tick().unwrap().unwrap();
        let cloud = update.cloud.unwrap();
        assert_eq!(cloud.points(), &[glam::Vec3::new(1.0, -2.0, 1.0)]);
        assert_eq!(update.pose.unwrap().translation().z, 3.0);
        assert_eq!(capture.source().pose_requests, 1);
    }

    #[test]
    fn test_no_data_and_ignored_are_skipped() {
        let source = CountingSource {
            statuses: vec![0, -7, 1],
            ..CountingSource::default()
        };
        let mut capture = TickCapture::new(source, &config());
        capture.start().unwrap();
        assert!(capture.tick().unwrap().is_none());
        assert!(capture.tick().unwrap().is_none());
        assert!(capture.tick().unwrap().is_some());
        assert_eq!(capture.source().pose_requests, 1);
    }

    #[test]
    fn test_count_clamped_to_buffer() {
        let source = CountingSource {
            statuses: vec![100],
            ..CountingSource::default()
        };
        let mut capture = TickCapture::new(source, &config());
        capture.start().unwrap();
        let update = capture.tick().unwrap().unwrap();
        assert_eq!(update.cloud.unwrap().len(), 4);
    }

    #[test]
    fn test_fatal_closes_once() {
        let source = CountingSource {
            statuses: vec![1, FATAL_SENTINEL],
            ..CountingSource::default()
        };
        let mut capture = TickCapture::new(source, &config());
        capture.start().unwrap();
        assert!(capture.tick().unwrap().is_some());
        assert!(matches!(
            capture.tick(),
            Err(CaptureError::DeviceFault(FATAL_SENTINEL))
        ));
        assert_eq!(capture.state(), SessionState::Idle);
        assert!(matches!(capture.tick(), Err(CaptureError::NotRunning)));
        assert!(matches!(capture.stop(), Err(CaptureError::NotRunning)));
        assert_eq!(capture.source().closes, 1);
        assert_eq!(capture.source().captures, 2);
    }

    #[test]
    fn test_tick_points_only() {
        let mut capture = TickCapture::new(CountingSource::default(), &config());
        capture.start().unwrap();
        let update = capture.tick_points().unwrap().unwrap();
        assert_eq!(
            update.cloud.unwrap().points(),
            &[glam::Vec3::new(0.0, -1.0, 2.0), glam::Vec3::new(3.0, -4.0, 5.0)]
        );
        assert!(update.grid.is_some());
        assert!(update.color.is_none());
        assert!(update.pose.is_none());
        assert_eq!(capture.source().pose_requests, 0);
    }

    #[test]
    fn test_tick_points_fatal() {
        let source = CountingSource {
            statuses: vec![FATAL_SENTINEL],
            ..CountingSource::default()
        };
        let mut capture = TickCapture::new(source, &config());
        capture.start().unwrap();
        assert!(matches!(
            capture.tick_points(),
            Err(CaptureError::DeviceFault(FATAL_SENTINEL))
        ));
        assert_eq!(capture.state(), SessionState::Idle);
        assert_eq!(capture.source().closes, 1);
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let mut capture =
            TickCapture::new(CountingSource::default(), &config()).with_interval(Duration::from_millis(1));
        capture.start().unwrap();

        let mut seen = 0;
        capture
            .run(|update| {
                assert!(update.grid.is_some());
                seen += 1;
                if seen == 3 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            })
            .await
            .unwrap();

        assert_eq!(seen, 3);
        assert_eq!(capture.state(), SessionState::Idle);
        assert_eq!(capture.source().closes, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_fault() {
        let source = CountingSource {
            statuses: vec![1, 0, FATAL_SENTINEL, 1],
            ..CountingSource::default()
        };
        let mut capture = TickCapture::new(source, &config()).with_interval(Duration::from_millis(1));
        capture.start().unwrap();

        let result = capture.run(|_| LoopAction::Continue).await;
        assert!(matches!(result, Err(CaptureError::DeviceFault(FATAL_SENTINEL))));
        assert_eq!(capture.source().captures, 3);
        assert_eq!(capture.source().closes, 1);
    }
}
