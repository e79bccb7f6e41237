//! Camera pose matrices.
//!
//! The capture library hands out a pose as 16 floats in row-major order,
//! `buffer[row * 4 + col]`, with the translation in the bottom row
//! (row-vector convention). [`PoseMatrix`] keeps that layout untouched;
//! [`PoseMatrix::to_mat4`] converts to glam's column-vector transform.
//!
//! The data comes from OpenCV, where +Y points down. Fixing that up is a
//! consumer decision, expressed as a [`PoseCorrection`] applied after decoding.

use crate::error::ParseError;
use glam::{EulerRot, Mat3, Mat4, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Number of floats in a flat pose buffer.
pub const POSE_LEN: usize = 16;

/// A 4x4 pose stored row by row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseMatrix {
    rows: [[f32; 4]; 4],
}

impl PoseMatrix {
    pub const IDENTITY: Self = Self {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Decode a flat row-major buffer. Fails unless it holds exactly 16 floats.
    pub fn decode(buffer: &[f32]) -> Result<Self, ParseError> {
        let flat: &[f32; POSE_LEN] =
            buffer
                .try_into()
                .map_err(|_| ParseError::BufferSizeMismatch {
                    expected: POSE_LEN,
                    actual: buffer.len(),
                })?;
        Ok(Self::from_array(flat))
    }

    pub fn from_array(flat: &[f32; POSE_LEN]) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (row, values) in rows.iter_mut().enumerate() {
            values.copy_from_slice(&flat[row * 4..row * 4 + 4]);
        }
        Self { rows }
    }

    pub fn from_rows(rows: [[f32; 4]; 4]) -> Self {
        Self { rows }
    }

    /// Inverse of [`PoseMatrix::to_mat4`].
    pub fn from_mat4(transform: Mat4) -> Self {
        Self::from_array(&transform.to_cols_array())
    }

    /// Flatten back to row-major order.
    pub fn encode(&self) -> [f32; POSE_LEN] {
        let mut flat = [0.0; POSE_LEN];
        self.encode_into(&mut flat);
        flat
    }

    pub fn encode_into(&self, out: &mut [f32; POSE_LEN]) {
        for (row, values) in self.rows.iter().enumerate() {
            out[row * 4..row * 4 + 4].copy_from_slice(values);
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.rows[row][col]
    }

    pub fn row(&self, row: usize) -> Vec4 {
        Vec4::from_array(self.rows[row])
    }

    pub fn rows(&self) -> &[[f32; 4]; 4] {
        &self.rows
    }

    /// Column-vector transform: each stored row becomes a glam column.
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols_array(&self.encode())
    }

    pub fn translation(&self) -> Vec3 {
        self.row(3).truncate()
    }

    pub fn rotation(&self) -> Quat {
        let (_, rotation, _) = self.to_mat4().to_scale_rotation_translation();
        rotation
    }
}

impl Default for PoseMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Rotation fix-up applied to a decoded pose before it drives a scene node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseCorrection {
    /// Use the matrix rotation as is.
    #[default]
    Raw,
    /// Rebuild the rotation from the forward and up basis vectors with Y negated.
    LookRotation,
    /// Negate the yaw angle.
    FlipYEuler,
    /// Negate the pitch angle.
    FlipXEuler,
}

/// Pose after correction, ready to assign to a transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectedPose {
    pub rotation: Quat,
    /// Present only when translation is applied.
    pub translation: Option<Vec3>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseCorrector {
    #[serde(default)]
    pub correction: PoseCorrection,
    /// Also output the translation, with Y flipped.
    #[serde(default)]
    pub apply_translation: bool,
}

impl PoseCorrector {
    pub fn new(correction: PoseCorrection, apply_translation: bool) -> Self {
        Self {
            correction,
            apply_translation,
        }
    }

    pub fn correct(&self, pose: &PoseMatrix) -> CorrectedPose {
        let rotation = match self.correction {
            PoseCorrection::Raw => pose.rotation(),
            PoseCorrection::LookRotation => {
                let forward = flip_y(pose.row(2).truncate());
                let up = flip_y(pose.row(1).truncate());
                look_rotation(forward, up)
            }
            PoseCorrection::FlipYEuler => {
                let (yaw, pitch, roll) = pose.rotation().to_euler(EulerRot::YXZ);
                Quat::from_euler(EulerRot::YXZ, -yaw, pitch, roll)
            }
            PoseCorrection::FlipXEuler => {
                let (yaw, pitch, roll) = pose.rotation().to_euler(EulerRot::YXZ);
                Quat::from_euler(EulerRot::YXZ, yaw, -pitch, roll)
            }
        };

        CorrectedPose {
            rotation,
            translation: self
                .apply_translation
                .then(|| flip_y(pose.translation())),
        }
    }
}

fn flip_y(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.y, v.z)
}

/// Rotation whose +Z axis is `forward` and whose +Y axis is as close to `up`
/// as possible.
fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let Some(z) = forward.try_normalize() else {
        return Quat::IDENTITY;
    };
    match up.cross(z).try_normalize() {
        Some(x) => {
            let y = z.cross(x);
            Quat::from_mat3(&Mat3::from_cols(x, y, z)).normalize()
        }
        None => Quat::from_rotation_arc(Vec3::Z, z),
    }
}
