//! Capture configuration.

use crate::error::CaptureError;
use crate::log::NativeLogLevel;
use kinfu_data::{PackedGrid, PackingConfig, PoseCorrector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Allowed range for the pause between capture calls, in milliseconds.
pub const SLEEP_RANGE_MS: (u64, u64) = (50, 500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Pause between capture calls on the polling thread.
    pub sleep_ms: u64,
    /// Sensor to open. `None` uses the default device.
    pub device_index: Option<i32>,
    /// Minimum severity forwarded from the native library.
    pub log_level: NativeLogLevel,
    /// Color image size the native library writes.
    pub color_width: u32,
    pub color_height: u32,
    /// Capacity of the point buffer, in points.
    pub max_points: usize,
    /// Negate Y on captured points (OpenCV has +Y down).
    pub flip_y: bool,
    pub packing: PackingConfig,
    pub pose: PoseCorrector,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sleep_ms: 100,
            device_index: None,
            log_level: NativeLogLevel::Warning,
            color_width: 1920,
            color_height: 1080,
            max_points: 1_000_000,
            flip_y: true,
            packing: PackingConfig::default(),
            pose: PoseCorrector::default(),
        }
    }
}

impl CaptureConfig {
    pub fn from_json_str(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.color_width == 0 || self.color_height == 0 {
            return Err(CaptureError::Config(format!(
                "color image must not be empty ({}x{})",
                self.color_width, self.color_height
            )));
        }
        let color_bytes = (self.color_width as usize)
            .checked_mul(self.color_height as usize)
            .and_then(|texels| texels.checked_mul(4));
        if color_bytes.is_none() {
            return Err(CaptureError::Config(format!(
                "color image {}x{} is too large",
                self.color_width, self.color_height
            )));
        }
        if self.max_points == 0 {
            return Err(CaptureError::Config("max_points must be positive".into()));
        }
        if self.max_points > PackedGrid::capacity() || self.max_points.checked_mul(3).is_none() {
            return Err(CaptureError::Config(format!(
                "max_points must be at most {}, got {}",
                PackedGrid::capacity(),
                self.max_points
            )));
        }
        if self.device_index.is_some_and(|index| index < 0) {
            return Err(CaptureError::Config("device_index must not be negative".into()));
        }
        if !(self.packing.particle_size.is_finite() && self.packing.particle_size > 0.0) {
            return Err(CaptureError::Config(format!(
                "particle_size must be positive, got {}",
                self.packing.particle_size
            )));
        }
        Ok(())
    }

    /// Sleep interval clamped to [`SLEEP_RANGE_MS`].
    pub fn sleep_interval(&self) -> Duration {
        let (min, max) = SLEEP_RANGE_MS;
        let clamped = self.sleep_ms.clamp(min, max);
        if clamped != self.sleep_ms {
            warn!(
                requested = self.sleep_ms,
                used = clamped,
                "Capture sleep interval out of range"
            );
        }
        Duration::from_millis(clamped)
    }
}
