//! The native capture library as seen from Rust.

use crate::buffers::FrameBuffers;
use crate::error::CaptureError;
use crate::log::{LogSink, NativeLogLevel};
use kinfu_data::POSE_LEN;
use tracing::{debug, info};

/// Status the library returns when the device can no longer deliver captures.
pub const FATAL_SENTINEL: i32 = -2;

/// Decoded result of one `capture_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// The device failed; the session must be torn down.
    Fatal,
    /// Nothing new this tick.
    NoData,
    /// Buffers were filled with this many points.
    Data(usize),
    /// Any other negative status. Logged and skipped.
    Ignored(i32),
}

impl CaptureStatus {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            FATAL_SENTINEL => Self::Fatal,
            0 => Self::NoData,
            n if n > 0 => Self::Data(n as usize),
            n => Self::Ignored(n),
        }
    }
}

/// Step of `connect_and_start_cameras` that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Connect,
    Calibrate,
    StartCameras,
    Unknown(i32),
}

impl ConnectStage {
    /// `None` means the device started.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => None,
            -1 => Some(Self::Connect),
            -2 => Some(Self::Calibrate),
            -3 => Some(Self::StartCameras),
            other => Some(Self::Unknown(other)),
        }
    }
}

/// Operations exported by the depth camera fusion library.
///
/// Implementations only borrow the buffers passed to them for the duration
/// of a call.
pub trait NativeCapture: Send {
    fn connected_sensor_count(&mut self) -> i32;

    /// Open the sensor at `index`.
    fn connect_to_device(&mut self, index: i32) -> bool;

    fn connect_to_default_device(&mut self) -> bool;

    /// Configure depth mode and read the calibration of the open device.
    fn setup_config_and_calibrate(&mut self) -> bool;

    fn start_cameras(&mut self) -> bool;

    /// Connect, calibrate and start streaming. Returns 0 on success or a
    /// negative stage code.
    fn connect_and_start_cameras(&mut self) -> i32;

    /// Fill the buffers with the latest frame. See [`CaptureStatus`].
    fn capture_frame(&mut self, buffers: &mut FrameBuffers) -> i32;

    /// Fill only the interleaved point buffer. Same status codes as
    /// [`NativeCapture::capture_frame`].
    fn capture_point_cloud(&mut self, points: &mut [f32]) -> i32;

    fn close_device(&mut self);

    fn reset_device(&mut self);

    fn request_pose(&mut self, pose: &mut [f32; POSE_LEN]);

    /// Route library log messages at or above `level` into `sink`.
    fn register_log_sink(&mut self, sink: LogSink, level: NativeLogLevel);
}

/// Check for a sensor and bring one up.
///
/// `None` starts the default device in one call. `Some(index)` opens that
/// sensor and runs the calibrate and start stages one by one.
pub fn start_device<S: NativeCapture + ?Sized>(
    source: &mut S,
    device_index: Option<i32>,
) -> Result<(), CaptureError> {
    let sensors = source.connected_sensor_count();
    debug!(sensors, "Probed connected sensors");
    if sensors <= 0 {
        return Err(CaptureError::DeviceUnavailable(
            "no depth sensors connected".to_string(),
        ));
    }

    let failed = match device_index {
        None => ConnectStage::from_raw(source.connect_and_start_cameras()),
        Some(index) if !(0..sensors).contains(&index) => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "device index {index} out of range for {sensors} sensors"
            )));
        }
        Some(index) => start_stages(source, index),
    };
    if let Some(stage) = failed {
        return Err(CaptureError::DeviceUnavailable(format!(
            "device start failed at {stage:?}"
        )));
    }

    info!(sensors, device = ?device_index, "Depth camera started");
    Ok(())
}

fn start_stages<S: NativeCapture + ?Sized>(source: &mut S, index: i32) -> Option<ConnectStage> {
    if !source.connect_to_device(index) {
        return Some(ConnectStage::Connect);
    }
    if !source.setup_config_and_calibrate() {
        return Some(ConnectStage::Calibrate);
    }
    if !source.start_cameras() {
        return Some(ConnectStage::StartCameras);
    }
    None
}
