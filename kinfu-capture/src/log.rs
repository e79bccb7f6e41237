//! Native library log messages.
//!
//! The library reports messages through a callback that may fire on any
//! thread. Messages are pushed through a channel and emitted as `tracing`
//! events by whoever owns the receiving end.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{error, info, trace, warn};

/// Severity levels understood by the library, most severe first.
#[repr(i32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeLogLevel {
    Critical = 0,
    Error = 1,
    #[default]
    Warning = 2,
    Information = 3,
    Trace = 4,
    Off = 5,
}

impl NativeLogLevel {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            i32::MIN..=0 => Self::Critical,
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Information,
            4 => Self::Trace,
            _ => Self::Off,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Whether a message at `self` passes a `threshold`.
    pub fn passes(self, threshold: NativeLogLevel) -> bool {
        self != Self::Off && threshold != Self::Off && self <= threshold
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLogMessage {
    pub level: NativeLogLevel,
    pub message: String,
}

impl NativeLogMessage {
    /// Emit as a tracing event.
    pub fn emit(&self) {
        match self.level {
            NativeLogLevel::Critical | NativeLogLevel::Error => {
                error!(target: "kinfu_native", "{}", self.message)
            }
            NativeLogLevel::Warning => warn!(target: "kinfu_native", "{}", self.message),
            NativeLogLevel::Information => info!(target: "kinfu_native", "{}", self.message),
            NativeLogLevel::Trace => trace!(target: "kinfu_native", "{}", self.message),
            NativeLogLevel::Off => {}
        }
    }
}

/// Sending half handed to the native side.
#[derive(Debug, Clone)]
pub struct LogSink {
    sender: Sender<NativeLogMessage>,
}

impl LogSink {
    pub fn send(&self, level: NativeLogLevel, message: impl Into<String>) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(NativeLogMessage {
            level,
            message: message.into(),
        });
    }
}

/// Receiving half, drained from the application thread.
#[derive(Debug)]
pub struct LogReceiver {
    receiver: Receiver<NativeLogMessage>,
}

impl LogReceiver {
    pub fn try_iter(&self) -> impl Iterator<Item = NativeLogMessage> + '_ {
        self.receiver.try_iter()
    }

    /// Emit every pending message. Returns how many were emitted.
    pub fn drain(&self) -> usize {
        self.try_iter().map(|message| message.emit()).count()
    }
}

pub fn log_channel() -> (LogSink, LogReceiver) {
    let (sender, receiver) = mpsc::channel();
    (LogSink { sender }, LogReceiver { receiver })
}
