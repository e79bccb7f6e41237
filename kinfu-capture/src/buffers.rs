//! Fixed-size buffers shared with the native library.
//!
//! Allocated once and reused for every capture call. Only the capture step
//! writes them; everything downstream copies out what it needs before the
//! next call overwrites the contents.

use crate::config::CaptureConfig;
use image::RgbaImage;
use kinfu_data::{POSE_LEN, PoseMatrix};

#[derive(Debug, Clone)]
pub struct FrameBuffers {
    color: RgbaImage,
    points: Vec<f32>,
    pose: [f32; POSE_LEN],
}

impl FrameBuffers {
    pub fn new(color_width: u32, color_height: u32, max_points: usize) -> Self {
        Self {
            color: RgbaImage::new(color_width, color_height),
            points: vec![0.0; max_points * 3],
            pose: PoseMatrix::IDENTITY.encode(),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.color_width, config.color_height, config.max_points)
    }

    pub fn max_points(&self) -> usize {
        self.points.len() / 3
    }

    pub fn color(&self) -> &RgbaImage {
        &self.color
    }

    pub fn color_mut(&mut self) -> &mut RgbaImage {
        &mut self.color
    }

    /// Interleaved `x, y, z` floats.
    pub fn points(&self) -> &[f32] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [f32] {
        &mut self.points
    }

    pub fn pose(&self) -> &[f32; POSE_LEN] {
        &self.pose
    }

    pub fn pose_mut(&mut self) -> &mut [f32; POSE_LEN] {
        &mut self.pose
    }

    /// Copy of the first `count` points' floats, clamped to capacity.
    pub fn copy_points(&self, count: usize) -> Vec<f32> {
        let count = count.min(self.max_points());
        self.points[..count * 3].to_vec()
    }

    pub fn copy_color(&self) -> RgbaImage {
        self.color.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let buffers = FrameBuffers::new(4, 2, 10);
        assert_eq!(buffers.color().dimensions(), (4, 2));
        assert_eq!(buffers.points().len(), 30);
        assert_eq!(buffers.max_points(), 10);
        assert_eq!(buffers.pose(), &PoseMatrix::IDENTITY.encode());
    }

    #[test]
    fn test_copy_points_clamped() {
        let mut buffers = FrameBuffers::new(1, 1, 2);
        buffers
            .points_mut()
            .copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(buffers.copy_points(1), vec![1.0, 2.0, 3.0]);
        assert_eq!(buffers.copy_points(99).len(), 6);
    }
}
