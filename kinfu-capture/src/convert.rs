//! Turning raw capture buffers into point clouds, packed grids and poses.

use crate::config::CaptureConfig;
use glam::Vec3;
use image::RgbaImage;
use kinfu_data::{
    CorrectedPose, POSE_LEN, PackedGrid, PointCloud, PointCloudPacker, PoseCorrector, PoseMatrix,
};

/// Everything produced by one capture tick.
#[derive(Debug, Clone, Default)]
pub struct CaptureUpdate {
    pub color: Option<RgbaImage>,
    pub pose: Option<PoseMatrix>,
    pub corrected_pose: Option<CorrectedPose>,
    pub cloud: Option<PointCloud>,
    pub grid: Option<PackedGrid>,
}

impl CaptureUpdate {
    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.pose.is_none() && self.cloud.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameConverter {
    packer: PointCloudPacker,
    corrector: PoseCorrector,
    flip_y: bool,
}

impl FrameConverter {
    pub fn new(packer: PointCloudPacker, corrector: PoseCorrector, flip_y: bool) -> Self {
        Self {
            packer,
            corrector,
            flip_y,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(
            PointCloudPacker::new(config.packing),
            config.pose,
            config.flip_y,
        )
    }

    /// Interleaved floats to points. A trailing partial triple is ignored.
    pub fn points_from_raw(&self, raw: &[f32]) -> Vec<Vec3> {
        raw.chunks_exact(3)
            .map(|xyz| {
                let y = if self.flip_y { -xyz[1] } else { xyz[1] };
                Vec3::new(xyz[0], y, xyz[2])
            })
            .collect()
    }

    pub fn add_points(&self, update: &mut CaptureUpdate, raw: &[f32]) {
        let cloud = PointCloud::new(self.points_from_raw(raw));
        update.grid = Some(self.packer.pack_cloud(&cloud));
        update.cloud = Some(cloud);
    }

    pub fn add_pose(&self, update: &mut CaptureUpdate, flat: &[f32; POSE_LEN]) {
        let pose = PoseMatrix::from_array(flat);
        update.corrected_pose = Some(self.corrector.correct(&pose));
        update.pose = Some(pose);
    }
}
