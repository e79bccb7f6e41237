//! A capture source that plays back a recorded point cloud.
//!
//! Stands in for the device when running the pipeline without hardware. Each
//! captured frame carries the whole cloud, a grey color image whose level
//! cycles with the frame number, and a pose translated along `step` per frame.
//! Points are written in device convention, with Y pointing down.

use crate::buffers::FrameBuffers;
use crate::log::{LogSink, NativeLogLevel};
use crate::source::{FATAL_SENTINEL, NativeCapture};
use glam::Vec3;
use image::Rgba;
use kinfu_data::{POSE_LEN, PointCloud, PoseMatrix};

pub struct ReplaySource {
    cloud: PointCloud,
    step: Vec3,
    frame: u64,
    connected: bool,
    fail_at: Option<u64>,
    log: Option<(LogSink, NativeLogLevel)>,
}

impl ReplaySource {
    pub fn new(cloud: PointCloud) -> Self {
        Self {
            cloud,
            step: Vec3::new(0.0, 0.0, 0.01),
            frame: 0,
            connected: false,
            fail_at: None,
            log: None,
        }
    }

    /// Camera movement per frame.
    pub fn with_step(mut self, step: Vec3) -> Self {
        self.step = step;
        self
    }

    /// Report a device failure on capture number `frame` (1-based).
    pub fn with_fault_at(mut self, frame: u64) -> Self {
        self.fail_at = Some(frame);
        self
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn log(&self, level: NativeLogLevel, message: impl Into<String>) {
        if let Some((sink, threshold)) = &self.log {
            if level.passes(*threshold) {
                sink.send(level, message);
            }
        }
    }

    /// Advance to the next frame. Returns a status to report instead of data
    /// when the device is down or the scripted fault is due.
    fn advance(&mut self) -> Option<i32> {
        if !self.connected {
            return Some(FATAL_SENTINEL);
        }
        self.frame += 1;
        if self.fail_at == Some(self.frame) {
            self.log(NativeLogLevel::Critical, "Failed to read a capture");
            return Some(FATAL_SENTINEL);
        }
        None
    }

    /// Write the cloud in device convention. Returns the number of points.
    fn write_points(&self, points: &mut [f32]) -> usize {
        let count = self.cloud.len().min(points.len() / 3);
        for (dst, point) in points
            .chunks_exact_mut(3)
            .zip(&self.cloud.points()[..count])
        {
            dst.copy_from_slice(&[point.x, -point.y, point.z]);
        }
        count
    }

    fn pose(&self) -> PoseMatrix {
        let mut flat = PoseMatrix::IDENTITY.encode();
        let offset = self.step * self.frame as f32;
        flat[12..15].copy_from_slice(&offset.to_array());
        PoseMatrix::from_array(&flat)
    }
}

impl NativeCapture for ReplaySource {
    fn connected_sensor_count(&mut self) -> i32 {
        1
    }

    fn connect_to_device(&mut self, index: i32) -> bool {
        if index != 0 {
            self.log(NativeLogLevel::Critical, "Failed to open device");
            return false;
        }
        self.connected = true;
        true
    }

    fn connect_to_default_device(&mut self) -> bool {
        self.connect_to_device(0)
    }

    fn setup_config_and_calibrate(&mut self) -> bool {
        self.connected
    }

    fn start_cameras(&mut self) -> bool {
        self.connected
    }

    fn connect_and_start_cameras(&mut self) -> i32 {
        self.connect_to_default_device();
        self.log(NativeLogLevel::Information, "Replay device started");
        0
    }

    fn capture_frame(&mut self, buffers: &mut FrameBuffers) -> i32 {
        if let Some(status) = self.advance() {
            return status;
        }
        let count = self.write_points(buffers.points_mut());
        if count == 0 {
            return 0;
        }

        let level = (self.frame % 256) as u8;
        for pixel in buffers.color_mut().pixels_mut() {
            *pixel = Rgba([level, level, level, 255]);
        }

        self.pose().encode_into(buffers.pose_mut());
        self.log(
            NativeLogLevel::Trace,
            format!("Replayed frame {} ({count} points)", self.frame),
        );
        count as i32
    }

    fn capture_point_cloud(&mut self, points: &mut [f32]) -> i32 {
        if let Some(status) = self.advance() {
            return status;
        }
        self.write_points(points) as i32
    }

    fn close_device(&mut self) {
        self.connected = false;
        self.log(NativeLogLevel::Information, "Replay device closed");
    }

    fn reset_device(&mut self) {
        self.frame = 0;
    }

    fn request_pose(&mut self, pose: &mut [f32; POSE_LEN]) {
        self.pose().encode_into(pose);
    }

    fn register_log_sink(&mut self, sink: LogSink, level: NativeLogLevel) {
        self.log = Some((sink, level));
    }
}
