//! Packing point clouds into particle textures.
//!
//! A GPU particle renderer reads one particle per texel from two RGBA float
//! images of identical size: an intensity image (grey level derived from
//! depth) and a position image (`x, y, z, particle size`). Points are laid out
//! in row-major order by their index in the cloud; there is no spatial binning.

use crate::types::{Bounds, PointCloud};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use image::Rgba32FImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum texture edge length.
pub const RESOLUTION: usize = 4096;

/// One RGBA texel with 32-bit float channels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Texel {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Texel {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque grey texel.
    pub const fn grey(value: f32) -> Self {
        Self::new(value, value, value, 1.0)
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Far plane used to turn depth into intensity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DepthNormalization {
    /// Furthest positive `z` in the cloud.
    #[default]
    MaxObserved,
    /// A fixed far distance.
    Fixed { far: f32 },
}

/// How to fill texels past the last point when `width * height > count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// All channels zero, including alpha and particle size.
    #[default]
    ZeroFill,
    /// Repeat the last point.
    ClampToLast,
}

fn default_particle_size() -> f32 {
    0.01
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackingConfig {
    #[serde(default = "default_particle_size")]
    pub particle_size: f32,
    #[serde(default)]
    pub depth_normalization: DepthNormalization,
    #[serde(default)]
    pub fill: FillPolicy,
    /// Clamp intensity to `[0, 1]`. Off by default since HDR pipelines treat
    /// values above one as extra brightness.
    #[serde(default)]
    pub clamp_intensity: bool,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            particle_size: default_particle_size(),
            depth_normalization: DepthNormalization::default(),
            fill: FillPolicy::default(),
            clamp_intensity: false,
        }
    }
}

/// Two parallel particle images plus the cloud bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedGrid {
    pub width: usize,
    pub height: usize,
    /// Number of texels holding a real point.
    pub particle_count: usize,
    pub color: Vec<Texel>,
    pub position_scale: Vec<Texel>,
    pub bounds: Bounds,
    /// Far plane the intensities were computed against.
    pub far: f32,
}

impl PackedGrid {
    /// Grid dimensions for `count` points.
    ///
    /// The height rounds up so that every point gets a texel, up to the
    /// `RESOLUTION x RESOLUTION` capacity.
    pub fn dimensions_for(count: usize) -> (usize, usize) {
        let width = count.min(RESOLUTION);
        let height = count.div_ceil(RESOLUTION).clamp(1, RESOLUTION);
        (width, height)
    }

    pub fn capacity() -> usize {
        RESOLUTION * RESOLUTION
    }

    pub fn texel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn bounds_center(&self) -> Vec3 {
        self.bounds.center()
    }

    pub fn bounds_size(&self) -> Vec3 {
        self.bounds.size()
    }

    pub fn color_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.color)
    }

    pub fn position_scale_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.position_scale)
    }

    /// Copy both images into `image` buffers, intensity first.
    ///
    /// Returns `None` for an empty grid.
    pub fn to_images(&self) -> Option<(Rgba32FImage, Rgba32FImage)> {
        let width = u32::try_from(self.width).ok()?;
        let height = u32::try_from(self.height).ok()?;
        if width == 0 {
            return None;
        }
        let to_image = |texels: &[Texel]| {
            Rgba32FImage::from_raw(width, height, bytemuck::cast_slice(texels).to_vec())
        };
        Some((to_image(&self.color)?, to_image(&self.position_scale)?))
    }
}

/// Packs point positions into a [`PackedGrid`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PointCloudPacker {
    config: PackingConfig,
}

impl PointCloudPacker {
    pub fn new(config: PackingConfig) -> Self {
        Self { config }
    }

    pub fn with_particle_size(particle_size: f32) -> Self {
        Self::new(PackingConfig {
            particle_size,
            ..PackingConfig::default()
        })
    }

    pub fn config(&self) -> &PackingConfig {
        &self.config
    }

    pub fn pack_cloud(&self, cloud: &PointCloud) -> PackedGrid {
        self.pack(cloud.points())
    }

    pub fn pack(&self, points: &[Vec3]) -> PackedGrid {
        let (width, height) = PackedGrid::dimensions_for(points.len());
        let texel_count = width * height;
        if points.len() > texel_count {
            warn!(
                points = points.len(),
                capacity = texel_count,
                "Point cloud exceeds texture capacity, truncating"
            );
        }
        let particle_count = points.len().min(texel_count);
        let far = self.far_plane(points);
        let bounds = Bounds::from_points(points).unwrap_or_default();

        let mut color = Vec::with_capacity(texel_count);
        let mut position_scale = Vec::with_capacity(texel_count);

        for index in 0..texel_count {
            let point = match points.get(index) {
                Some(point) => *point,
                None => match (self.config.fill, points.last()) {
                    (FillPolicy::ClampToLast, Some(last)) => *last,
                    _ => {
                        color.push(Texel::ZERO);
                        position_scale.push(Texel::ZERO);
                        continue;
                    }
                },
            };

            color.push(Texel::grey(self.intensity(point.z, far)));
            position_scale.push(Texel::new(
                point.x,
                point.y,
                point.z,
                self.config.particle_size,
            ));
        }

        debug!(
            width,
            height,
            particle_count,
            far,
            "Packed point cloud"
        );

        PackedGrid {
            width,
            height,
            particle_count,
            color,
            position_scale,
            bounds,
            far,
        }
    }

    fn far_plane(&self, points: &[Vec3]) -> f32 {
        match self.config.depth_normalization {
            DepthNormalization::MaxObserved => points
                .iter()
                .map(|p| p.z)
                .filter(|z| *z > 0.0)
                .fold(0.0, f32::max),
            DepthNormalization::Fixed { far } => far,
        }
    }

    fn intensity(&self, z: f32, far: f32) -> f32 {
        let ratio = if far == 0.0 { 0.0 } else { z / far };
        let intensity = 1.0 - ratio;
        if self.config.clamp_intensity {
            intensity.clamp(0.0, 1.0)
        } else {
            intensity
        }
    }
}
