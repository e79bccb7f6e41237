//! KinFu Capture - depth camera capture loops
//!
//! This crate drives a KinectFusion capture library and turns what it writes
//! into point clouds, packed particle grids and corrected camera poses:
//!
//! - [`CaptureSession`] polls the device on a background thread
//! - [`TickCapture`] polls it from the caller's loop, optionally under tokio
//! - [`NativePlugin`] binds the library's C entry points
//! - [`ReplaySource`] plays a recorded point cloud back as frames
//!
//! ## Example
//!
//! ```ignore
//! use kinfu_capture::{CaptureConfig, CaptureSession, ReplaySource};
//!
//! let mut session = CaptureSession::new(ReplaySource::new(cloud), CaptureConfig::default());
//! session.start()?;
//! while let Some(update) = session.poll()? {
//!     // Upload update.grid to the particle system...
//! }
//! ```

mod buffers;
mod config;
mod convert;
mod error;
mod ffi;
mod log;
mod replay;
mod session;
mod source;
mod tick;

pub use buffers::FrameBuffers;
pub use config::{CaptureConfig, SLEEP_RANGE_MS};
pub use convert::{CaptureUpdate, FrameConverter};
pub use error::CaptureError;
pub use ffi::{
    KinfuApi, NativePlugin, PrintMessageCallback, SYMBOL_NAMES, SymbolResolver,
};
pub use log::{LogReceiver, LogSink, NativeLogLevel, NativeLogMessage, log_channel};
pub use replay::ReplaySource;
pub use session::{CaptureSession, SessionState};
pub use source::{CaptureStatus, ConnectStage, FATAL_SENTINEL, NativeCapture, start_device};
pub use tick::{LoopAction, TickCapture};
