//! Bindings to the `kinfuunity` native plugin.
//!
//! Symbols are listed by hand in [`SYMBOL_NAMES`] and resolved once, through
//! whatever loader the host uses, into the typed table [`KinfuApi`].
//! [`NativePlugin`] wraps that table behind [`NativeCapture`].
//!
//! The log callback receives an opaque context pointer chosen at registration
//! time. [`NativePlugin`] passes a boxed [`LogSink`] it owns, so messages
//! reach the right channel without any global state.

use crate::buffers::FrameBuffers;
use crate::error::CaptureError;
use crate::log::{LogSink, NativeLogLevel};
use crate::source::NativeCapture;
use kinfu_data::POSE_LEN;
use std::ffi::{CStr, c_char, c_int, c_void};
use tracing::debug;

pub type PrintMessageCallback =
    unsafe extern "C" fn(context: *mut c_void, level: c_int, message: *const c_char);

pub type GetConnectedSensorCountFn = unsafe extern "C" fn() -> c_int;
pub type ConnectToDeviceFn = unsafe extern "C" fn(index: c_int) -> bool;
pub type ConnectToDefaultDeviceFn = unsafe extern "C" fn() -> bool;
pub type SetupConfigAndCalibrateFn = unsafe extern "C" fn() -> bool;
pub type StartCamerasFn = unsafe extern "C" fn() -> bool;
pub type ConnectAndStartCamerasFn = unsafe extern "C" fn() -> c_int;
pub type CaptureFrameFn =
    unsafe extern "C" fn(color: *mut u8, points: *mut f32, pose: *mut f32) -> c_int;
pub type CapturePointCloudFn = unsafe extern "C" fn(points: *mut f32) -> c_int;
pub type CloseDeviceFn = unsafe extern "C" fn();
pub type ResetFn = unsafe extern "C" fn();
pub type RequestPoseFn = unsafe extern "C" fn(pose: *mut f32);
pub type RegisterPrintMessageCallbackFn =
    unsafe extern "C" fn(callback: Option<PrintMessageCallback>, context: *mut c_void, level: c_int);

/// Every symbol [`KinfuApi::bind`] looks up.
pub const SYMBOL_NAMES: [&str; 12] = [
    "getConnectedSensorCount",
    "connectToDevice",
    "connectToDefaultDevice",
    "setupConfigAndCalibrate",
    "startCameras",
    "connectAndStartCameras",
    "captureFrame",
    "capturePointCloud",
    "closeDevice",
    "reset",
    "requestPose",
    "registerPrintMessageCallback",
];

/// Looks up exported symbols by name.
pub trait SymbolResolver {
    fn resolve(&self, name: &str) -> Option<*const c_void>;
}

impl<F> SymbolResolver for F
where
    F: Fn(&str) -> Option<*const c_void>,
{
    fn resolve(&self, name: &str) -> Option<*const c_void> {
        self(name)
    }
}

/// Typed function table for the plugin.
#[derive(Debug, Clone, Copy)]
pub struct KinfuApi {
    pub get_connected_sensor_count: GetConnectedSensorCountFn,
    pub connect_to_device: ConnectToDeviceFn,
    pub connect_to_default_device: ConnectToDefaultDeviceFn,
    pub setup_config_and_calibrate: SetupConfigAndCalibrateFn,
    pub start_cameras: StartCamerasFn,
    pub connect_and_start_cameras: ConnectAndStartCamerasFn,
    pub capture_frame: CaptureFrameFn,
    pub capture_point_cloud: CapturePointCloudFn,
    pub close_device: CloseDeviceFn,
    pub reset: ResetFn,
    pub request_pose: RequestPoseFn,
    pub register_print_message_callback: RegisterPrintMessageCallbackFn,
}

macro_rules! bind_symbol {
    ($resolver:expr, $index:expr, $ty:ty) => {{
        let name = SYMBOL_NAMES[$index];
        let address = $resolver
            .resolve(name)
            .filter(|address| !address.is_null())
            .ok_or(CaptureError::MissingSymbol(name))?;
        // SAFETY: `KinfuApi::bind` callers guarantee the signature matches.
        unsafe { std::mem::transmute::<*const c_void, $ty>(address) }
    }};
}

impl KinfuApi {
    /// Resolve every entry of [`SYMBOL_NAMES`].
    ///
    /// # Safety
    ///
    /// Each resolved address must be a function with the signature of the
    /// matching field, and must stay valid for as long as the table is used.
    pub unsafe fn bind<R: SymbolResolver + ?Sized>(resolver: &R) -> Result<Self, CaptureError> {
        let api = Self {
            get_connected_sensor_count: bind_symbol!(resolver, 0, GetConnectedSensorCountFn),
            connect_to_device: bind_symbol!(resolver, 1, ConnectToDeviceFn),
            connect_to_default_device: bind_symbol!(resolver, 2, ConnectToDefaultDeviceFn),
            setup_config_and_calibrate: bind_symbol!(resolver, 3, SetupConfigAndCalibrateFn),
            start_cameras: bind_symbol!(resolver, 4, StartCamerasFn),
            connect_and_start_cameras: bind_symbol!(resolver, 5, ConnectAndStartCamerasFn),
            capture_frame: bind_symbol!(resolver, 6, CaptureFrameFn),
            capture_point_cloud: bind_symbol!(resolver, 7, CapturePointCloudFn),
            close_device: bind_symbol!(resolver, 8, CloseDeviceFn),
            reset: bind_symbol!(resolver, 9, ResetFn),
            request_pose: bind_symbol!(resolver, 10, RequestPoseFn),
            register_print_message_callback: bind_symbol!(
                resolver,
                11,
                RegisterPrintMessageCallbackFn
            ),
        };
        debug!(symbols = SYMBOL_NAMES.len(), "Bound native plugin symbols");
        Ok(api)
    }
}

/// The native plugin behind [`NativeCapture`].
pub struct NativePlugin {
    api: KinfuApi,
    log_sink: Option<Box<LogSink>>,
}

impl NativePlugin {
    /// # Safety
    ///
    /// The plugin writes frames straight into [`FrameBuffers`]; the buffers
    /// handed to [`NativeCapture::capture_frame`] must be at least as large as
    /// the color image and point cloud the library produces.
    pub unsafe fn new(api: KinfuApi) -> Self {
        Self {
            api,
            log_sink: None,
        }
    }

    pub fn api(&self) -> &KinfuApi {
        &self.api
    }
}

impl NativeCapture for NativePlugin {
    fn connected_sensor_count(&mut self) -> i32 {
        unsafe { (self.api.get_connected_sensor_count)() }
    }

    fn connect_to_device(&mut self, index: i32) -> bool {
        unsafe { (self.api.connect_to_device)(index) }
    }

    fn connect_to_default_device(&mut self) -> bool {
        unsafe { (self.api.connect_to_default_device)() }
    }

    fn setup_config_and_calibrate(&mut self) -> bool {
        unsafe { (self.api.setup_config_and_calibrate)() }
    }

    fn start_cameras(&mut self) -> bool {
        unsafe { (self.api.start_cameras)() }
    }

    fn connect_and_start_cameras(&mut self) -> i32 {
        unsafe { (self.api.connect_and_start_cameras)() }
    }

    fn capture_frame(&mut self, buffers: &mut FrameBuffers) -> i32 {
        let color = buffers.color_mut().as_mut_ptr();
        let points = buffers.points_mut().as_mut_ptr();
        let pose = buffers.pose_mut().as_mut_ptr();
        // SAFETY: buffer sizes are the caller's contract from `NativePlugin::new`.
        unsafe { (self.api.capture_frame)(color, points, pose) }
    }

    fn capture_point_cloud(&mut self, points: &mut [f32]) -> i32 {
        // SAFETY: as for `capture_frame`.
        unsafe { (self.api.capture_point_cloud)(points.as_mut_ptr()) }
    }

    fn close_device(&mut self) {
        unsafe { (self.api.close_device)() }
    }

    fn reset_device(&mut self) {
        unsafe { (self.api.reset)() }
    }

    fn request_pose(&mut self, pose: &mut [f32; POSE_LEN]) {
        unsafe { (self.api.request_pose)(pose.as_mut_ptr()) }
    }

    fn register_log_sink(&mut self, sink: LogSink, level: NativeLogLevel) {
        let sink = Box::new(sink);
        let context = &*sink as *const LogSink as *mut c_void;
        // SAFETY: the box is kept in `self` until replaced or unregistered on drop.
        unsafe {
            (self.api.register_print_message_callback)(
                Some(forward_native_message),
                context,
                level.as_raw(),
            )
        };
        self.log_sink = Some(sink);
    }
}

impl Drop for NativePlugin {
    fn drop(&mut self) {
        if self.log_sink.take().is_some() {
            unsafe {
                (self.api.register_print_message_callback)(
                    None,
                    std::ptr::null_mut(),
                    NativeLogLevel::Off.as_raw(),
                )
            };
        }
    }
}

unsafe extern "C" fn forward_native_message(
    context: *mut c_void,
    level: c_int,
    message: *const c_char,
) {
    if context.is_null() || message.is_null() {
        return;
    }
    // SAFETY: `context` is the `LogSink` registered by `NativePlugin`.
    let sink = unsafe { &*(context as *const LogSink) };
    let text = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    sink.send(NativeLogLevel::from_raw(level), text.trim_end());
}
