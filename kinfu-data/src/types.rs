//! Core point cloud types.
//!
//! A [`PointCloud`] is a plain ordered list of positions with an optional
//! parallel list of normals. Order matters: it is the order in which points
//! are laid out when packed into textures.

use glam::Vec3;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    /// A degenerate box containing only `point`.
    pub fn from_point(point: Vec3) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Union of all positions, or `None` for an empty slice.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bounds = Self::from_point(*first);
        for point in rest {
            bounds.encapsulate(*point);
        }
        Some(bounds)
    }

    /// Grow the box so it contains `point`.
    pub fn encapsulate(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::from_point(Vec3::ZERO)
    }
}

/// Ordered point positions with optional per-point normals.
///
/// `normals` is either empty or exactly as long as `points`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<Vec3>,
    normals: Vec<Vec3>,
}

impl PointCloud {
    /// Create a cloud without normals.
    pub fn new(points: Vec<Vec3>) -> Self {
        Self {
            points,
            normals: Vec::new(),
        }
    }

    /// Create a cloud with normals. Normals that do not line up one-to-one
    /// with the points are dropped entirely.
    pub fn with_normals(points: Vec<Vec3>, normals: Vec<Vec3>) -> Self {
        if normals.len() != points.len() {
            if !normals.is_empty() {
                tracing::debug!(
                    points = points.len(),
                    normals = normals.len(),
                    "Normal count differs from point count, discarding normals"
                );
            }
            return Self::new(points);
        }
        Self { points, normals }
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.points)
    }

    /// Positions as interleaved `x, y, z` floats.
    pub fn positions_flat(&self) -> &[f32] {
        bytemuck::cast_slice(&self.points)
    }

    /// Normals as interleaved `x, y, z` floats (empty when absent).
    pub fn normals_flat(&self) -> &[f32] {
        bytemuck::cast_slice(&self.normals)
    }

    pub fn into_parts(self) -> (Vec<Vec3>, Vec<Vec3>) {
        (self.points, self.normals)
    }
}
