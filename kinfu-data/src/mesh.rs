//! Meshes returned by the native surface reconstruction library.
//!
//! The library writes three flat buffers: `3 * V` vertex floats, `3 * T`
//! triangle indices and `3 * V` normal floats.

use crate::error::ParseError;
use glam::Vec3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructedMesh {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl ReconstructedMesh {
    pub fn from_buffers(
        vertices: &[f32],
        triangles: &[i32],
        normals: &[f32],
    ) -> Result<Self, ParseError> {
        check_multiple_of_three(vertices.len())?;
        check_multiple_of_three(triangles.len())?;
        if normals.len() != vertices.len() {
            return Err(ParseError::BufferSizeMismatch {
                expected: vertices.len(),
                actual: normals.len(),
            });
        }

        let vertex_count = vertices.len() / 3;
        let to_index = |index: i32| {
            u32::try_from(index)
                .ok()
                .filter(|i| (*i as usize) < vertex_count)
                .ok_or(ParseError::IndexOutOfRange {
                    index: index.into(),
                    vertex_count,
                })
        };

        let triangles = triangles
            .chunks_exact(3)
            .map(|tri| Ok([to_index(tri[0])?, to_index(tri[1])?, to_index(tri[2])?]))
            .collect::<Result<Vec<_>, ParseError>>()?;

        Ok(Self {
            vertices: vertices.chunks_exact(3).map(Vec3::from_slice).collect(),
            normals: normals.chunks_exact(3).map(Vec3::from_slice).collect(),
            triangles,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Index list that renders both faces: the triangle indices followed by
    /// the same indices in reverse order.
    pub fn double_sided_indices(&self) -> Vec<u32> {
        let front: &[u32] = bytemuck::cast_slice(&self.triangles);
        front.iter().chain(front.iter().rev()).copied().collect()
    }
}

fn check_multiple_of_three(len: usize) -> Result<(), ParseError> {
    if len % 3 != 0 {
        return Err(ParseError::BufferSizeMismatch {
            expected: len - len % 3,
            actual: len,
        });
    }
    Ok(())
}
