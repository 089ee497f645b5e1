//! Mesh assets
//!
//! Vertex and index buffers plus the bounding volume computed once at load.
//! Immutable after construction; `MeshAsset::new` is the only way in and it
//! validates the geometry.

use super::AssetError;
use crate::foundation::bounds::AABB;
use crate::foundation::math::Vec3;
use serde::Deserialize;

/// Vertex data structure for 3D rendering with position, normal, and texture coordinates
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Position in model space
    pub position: [f32; 3],

    /// Normal vector
    pub normal: [f32; 3],

    /// Texture coordinates
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Floats per vertex in the packed GPU layout
    pub const FLOATS: usize = 8;

    /// Create a vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { position, normal, tex_coord }
    }
}

/// Immutable geometry
#[derive(Debug, Clone, PartialEq)]
pub struct MeshAsset {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    bounds: AABB,
}

impl MeshAsset {
    /// Validate geometry and compute its bounds
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<Self, AssetError> {
        if vertices.is_empty() {
            return Err(AssetError::MalformedGeometry("mesh has no vertices".to_string()));
        }
        if indices.is_empty() || indices.len() % 3 != 0 {
            return Err(AssetError::MalformedGeometry(format!(
                "index count {} is not a non-empty multiple of 3",
                indices.len()
            )));
        }
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(AssetError::MalformedGeometry(format!(
                "index {} out of range for {} vertices",
                bad,
                vertices.len()
            )));
        }
        if vertices.iter().any(|v| v.position.iter().any(|c| !c.is_finite())) {
            return Err(AssetError::MalformedGeometry("non-finite vertex position".to_string()));
        }

        let bounds = AABB::from_points(vertices.iter().map(|v| Vec3::from(v.position)))
            .ok_or_else(|| AssetError::MalformedGeometry("mesh has no vertices".to_string()))?;

        Ok(Self { vertices, indices, bounds })
    }

    /// Vertex buffer
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Index buffer (triangle list)
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Model-space bounding box
    pub fn bounds(&self) -> &AABB {
        &self.bounds
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex buffer packed as bytes for upload
    pub fn vertex_bytes(&self) -> Vec<u8> {
        let mut floats = Vec::with_capacity(self.vertices.len() * Vertex::FLOATS);
        for v in &self.vertices {
            floats.extend_from_slice(&v.position);
            floats.extend_from_slice(&v.normal);
            floats.extend_from_slice(&v.tex_coord);
        }
        bytemuck::cast_slice(&floats).to_vec()
    }

    /// Index buffer as bytes for upload
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// RON mesh description
#[derive(Debug, Deserialize)]
pub(crate) struct MeshDescription {
    positions: Vec<[f32; 3]>,
    #[serde(default)]
    normals: Vec<[f32; 3]>,
    #[serde(default)]
    tex_coords: Vec<[f32; 2]>,
    indices: Vec<u32>,
}

impl MeshDescription {
    pub(crate) fn parse(text: &str) -> Result<Self, String> {
        ron::from_str(text).map_err(|e| e.to_string())
    }

    pub(crate) fn into_mesh(self) -> Result<MeshAsset, AssetError> {
        let count = self.positions.len();
        // Omitted attributes get defaults.
        let normals = if self.normals.is_empty() { vec![[0.0, 1.0, 0.0]; count] } else { self.normals };
        let tex_coords = if self.tex_coords.is_empty() { vec![[0.0, 0.0]; count] } else { self.tex_coords };
        if normals.len() != count || tex_coords.len() != count {
            return Err(AssetError::MalformedGeometry(format!(
                "{} positions but {} normals and {} texture coordinates",
                count,
                normals.len(),
                tex_coords.len()
            )));
        }

        let vertices = self
            .positions
            .into_iter()
            .zip(normals)
            .zip(tex_coords)
            .map(|((p, n), t)| Vertex::new(p, n, t))
            .collect();
        MeshAsset::new(vertices, self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<Vertex> {
        vec![
            Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            Vertex::new([2.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            Vertex::new([0.0, 3.0, -1.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ]
    }

    #[test]
    fn test_bounds_computed_at_construction() {
        let mesh = MeshAsset::new(triangle(), vec![0, 1, 2]).unwrap();
        assert_eq!(mesh.bounds().min, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(mesh.bounds().max, Vec3::new(2.0, 3.0, 0.0));
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertex_bytes().len(), 3 * Vertex::FLOATS * 4);
        assert_eq!(mesh.index_bytes().len(), 12);
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let err = MeshAsset::new(triangle(), vec![0, 1, 3]).unwrap_err();
        assert!(matches!(err, AssetError::MalformedGeometry(_)));
    }

    #[test]
    fn test_partial_triangle_rejected() {
        assert!(MeshAsset::new(triangle(), vec![0, 1]).is_err());
        assert!(MeshAsset::new(Vec::new(), vec![0, 1, 2]).is_err());
    }

    #[test]
    fn test_ron_description() {
        let text = "(positions: [(0.0, 0.0, 0.0), (1.0, 0.0, 0.0), (0.0, 1.0, 0.0)], indices: [0, 1, 2])";
        let mesh = MeshDescription::parse(text).unwrap().into_mesh().unwrap();
        assert_eq!(mesh.vertices().len(), 3);
        assert_eq!(mesh.vertices()[0].normal, [0.0, 1.0, 0.0]);

        let mismatched = "(positions: [(0.0, 0.0, 0.0)], normals: [(0.0, 0.0, 1.0), (0.0, 0.0, 1.0)], indices: [0, 0, 0])";
        let err = MeshDescription::parse(mismatched).unwrap().into_mesh().unwrap_err();
        assert!(matches!(err, AssetError::MalformedGeometry(_)));
    }
}
