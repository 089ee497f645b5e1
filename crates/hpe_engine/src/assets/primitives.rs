//! Procedural primitive meshes
//!
//! Unit-sized shapes centred on the origin, matching the editor's
//! "GameObject" menu. The capsule is the one shape taller than a unit.

use super::mesh::{MeshAsset, Vertex};
use super::AssetError;
use crate::foundation::math::constants::PI;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SEGMENTS: u32 = 24;
const RINGS: u32 = 12;

/// Built-in primitive shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    /// 1x1x1 cube
    Cube,
    /// 1x1 plane in XZ facing +Y
    Plane,
    /// Sphere of radius 0.5
    Sphere,
    /// Cylinder of radius 0.5 and height 1
    Cylinder,
    /// Cone of radius 0.5 and height 1, apex up
    Cone,
    /// Capsule of radius 0.5 and total height 2, standing on Y
    Capsule,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cube => "cube",
            Self::Plane => "plane",
            Self::Sphere => "sphere",
            Self::Cylinder => "cylinder",
            Self::Cone => "cone",
            Self::Capsule => "capsule",
        };
        f.write_str(name)
    }
}

impl FromStr for Primitive {
    type Err = AssetError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cube" => Ok(Self::Cube),
            "plane" => Ok(Self::Plane),
            "sphere" => Ok(Self::Sphere),
            "cylinder" => Ok(Self::Cylinder),
            "cone" => Ok(Self::Cone),
            "capsule" => Ok(Self::Capsule),
            _ => Err(AssetError::UnsupportedFormat(format!("primitive '{}'", name))),
        }
    }
}

impl Primitive {
    /// Generate the mesh
    pub fn build(self) -> Result<MeshAsset, AssetError> {
        let (vertices, indices) = match self {
            Self::Cube => cube(),
            Self::Plane => plane(),
            Self::Sphere => sphere(SEGMENTS, RINGS),
            Self::Cylinder => lathe(SEGMENTS, 0.5, 0.5),
            Self::Cone => lathe(SEGMENTS, 0.5, 0.0),
            Self::Capsule => capsule(SEGMENTS, RINGS),
        };
        MeshAsset::new(vertices, indices)
    }
}

fn cube() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, tangent u, tangent v) per face
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let position = [
                n[0] * 0.5 + u[0] * su + v[0] * sv,
                n[1] * 0.5 + u[1] * su + v[1] * sv,
                n[2] * 0.5 + u[2] * su + v[2] * sv,
            ];
            vertices.push(Vertex::new(position, n, [su + 0.5, sv + 0.5]));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

fn plane() -> (Vec<Vertex>, Vec<u32>) {
    let up = [0.0, 1.0, 0.0];
    let vertices = vec![
        Vertex::new([-0.5, 0.0, 0.5], up, [0.0, 0.0]),
        Vertex::new([0.5, 0.0, 0.5], up, [1.0, 0.0]),
        Vertex::new([0.5, 0.0, -0.5], up, [1.0, 1.0]),
        Vertex::new([-0.5, 0.0, -0.5], up, [0.0, 1.0]),
    ];
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

fn sphere(segments: u32, rings: u32) -> (Vec<Vertex>, Vec<u32>) {
    let mut vertices = Vec::new();
    for ring in 0..=rings {
        let v = ring as f32 / rings as f32;
        let theta = v * PI;
        for segment in 0..=segments {
            let u = segment as f32 / segments as f32;
            let phi = u * 2.0 * PI;
            let normal = [theta.sin() * phi.cos(), theta.cos(), -theta.sin() * phi.sin()];
            let position = [normal[0] * 0.5, normal[1] * 0.5, normal[2] * 0.5];
            vertices.push(Vertex::new(position, normal, [u, v]));
        }
    }

    let stride = segments + 1;
    let mut indices = Vec::new();
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    (vertices, indices)
}

/// Sphere split at the equator, hemispheres pushed apart by one unit
fn capsule(segments: u32, rings: u32) -> (Vec<Vertex>, Vec<u32>) {
    let half = rings / 2;
    let rows = rings + 2;
    let mut vertices = Vec::new();
    for row in 0..rows {
        // The equator appears twice, once per hemisphere
        let (ring, offset) = if row <= half { (row, 0.5) } else { (row - 1, -0.5) };
        let theta = ring as f32 / rings as f32 * PI;
        let v = row as f32 / (rows - 1) as f32;
        for segment in 0..=segments {
            let u = segment as f32 / segments as f32;
            let phi = u * 2.0 * PI;
            let normal = [theta.sin() * phi.cos(), theta.cos(), -theta.sin() * phi.sin()];
            let position = [normal[0] * 0.5, normal[1] * 0.5 + offset, normal[2] * 0.5];
            vertices.push(Vertex::new(position, normal, [u, v]));
        }
    }

    let stride = segments + 1;
    let mut indices = Vec::new();
    for row in 0..rows - 1 {
        for segment in 0..segments {
            let a = row * stride + segment;
            let b = a + stride;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    (vertices, indices)
}

/// Side wall plus caps between radius `bottom` at y=-0.5 and `top` at y=0.5
fn lathe(segments: u32, bottom: f32, top: f32) -> (Vec<Vertex>, Vec<u32>) {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    let slope = bottom - top;
    for segment in 0..=segments {
        let u = segment as f32 / segments as f32;
        let angle = u * 2.0 * PI;
        let (s, c) = angle.sin_cos();
        let normal = nalgebra::Vector3::new(c, slope, -s).normalize();
        let n = [normal.x, normal.y, normal.z];
        vertices.push(Vertex::new([c * bottom, -0.5, -s * bottom], n, [u, 0.0]));
        vertices.push(Vertex::new([c * top, 0.5, -s * top], n, [u, 1.0]));
    }
    for segment in 0..segments {
        let a = segment * 2;
        indices.extend_from_slice(&[a, a + 2, a + 1, a + 1, a + 2, a + 3]);
    }

    let mut cap = |y: f32, radius: f32, normal_y: f32| {
        if radius <= 0.0 {
            return;
        }
        let center = vertices.len() as u32;
        vertices.push(Vertex::new([0.0, y, 0.0], [0.0, normal_y, 0.0], [0.5, 0.5]));
        for segment in 0..=segments {
            let angle = segment as f32 / segments as f32 * 2.0 * PI;
            let (s, c) = angle.sin_cos();
            vertices.push(Vertex::new(
                [c * radius, y, -s * radius],
                [0.0, normal_y, 0.0],
                [0.5 + c * 0.5, 0.5 + s * 0.5],
            ));
        }
        for segment in 0..segments {
            let a = center + 1 + segment;
            if normal_y > 0.0 {
                indices.extend_from_slice(&[center, a, a + 1]);
            } else {
                indices.extend_from_slice(&[center, a + 1, a]);
            }
        }
    };
    cap(-0.5, bottom, -1.0);
    cap(0.5, top, 1.0);

    (vertices, indices)
}
