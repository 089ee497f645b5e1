//! Wavefront OBJ loader
//!
//! Reads positions, normals and texture coordinates, fan-triangulates
//! polygons, and resolves both 1-based and negative (relative) indices.
//! Material libraries are ignored; materials are separate assets.

use super::mesh::{MeshAsset, Vertex};
use super::AssetError;
use std::io::BufRead;

/// OBJ parser
pub struct ObjLoader;

impl ObjLoader {
    /// Parse OBJ text into a mesh
    pub fn parse<R: BufRead>(reader: R) -> Result<MeshAsset, AssetError> {
        let mut positions: Vec<[f32; 3]> = Vec::new();
        let mut normals: Vec<[f32; 3]> = Vec::new();
        let mut tex_coords: Vec<[f32; 2]> = Vec::new();
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for (line_number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            let at = line_number + 1;

            match parts[0] {
                "v" => positions.push(parse_floats::<3>(&parts[1..], at, "vertex")?),
                "vn" => normals.push(parse_floats::<3>(&parts[1..], at, "normal")?),
                "vt" => tex_coords.push(parse_floats::<2>(&parts[1..], at, "texture coordinate")?),
                "f" => {
                    if parts.len() < 4 {
                        return Err(AssetError::MalformedGeometry(format!(
                            "line {}: face needs at least 3 vertices",
                            at
                        )));
                    }

                    let mut face = Vec::with_capacity(parts.len() - 1);
                    for vertex_data in &parts[1..] {
                        let mut fields = vertex_data.split('/');
                        let pos_idx = fields
                            .next()
                            .ok_or_else(|| malformed(at, "empty face vertex"))
                            .and_then(|f| resolve_index(f, positions.len(), at))?;
                        let tex_idx = match fields.next() {
                            Some(f) if !f.is_empty() => Some(resolve_index(f, tex_coords.len(), at)?),
                            _ => None,
                        };
                        let normal_idx = match fields.next() {
                            Some(f) if !f.is_empty() => Some(resolve_index(f, normals.len(), at)?),
                            _ => None,
                        };

                        vertices.push(Vertex {
                            position: positions[pos_idx],
                            normal: normal_idx.map_or([0.0, 1.0, 0.0], |i| normals[i]),
                            tex_coord: tex_idx.map_or([0.0, 0.0], |i| tex_coords[i]),
                        });
                        face.push((vertices.len() - 1) as u32);
                    }

                    // Fan triangulation
                    for i in 1..(face.len() - 1) {
                        indices.extend_from_slice(&[face[0], face[i], face[i + 1]]);
                    }
                }
                _ => {
                    // o, g, s, mtllib, usemtl and friends carry nothing we need
                }
            }
        }

        if vertices.is_empty() {
            return Err(AssetError::MalformedGeometry("no faces found in OBJ data".to_string()));
        }

        MeshAsset::new(vertices, indices)
    }
}

fn malformed(line: usize, what: &str) -> AssetError {
    AssetError::MalformedGeometry(format!("line {}: {}", line, what))
}

fn parse_floats<const N: usize>(fields: &[&str], line: usize, what: &str) -> Result<[f32; N], AssetError> {
    if fields.len() < N {
        return Err(malformed(line, &format!("{} needs {} components", what, N)));
    }
    let mut out = [0.0; N];
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = field
            .parse()
            .map_err(|_| malformed(line, &format!("invalid {} component '{}'", what, field)))?;
    }
    Ok(out)
}

/// OBJ indices are 1-based; negative values count back from the latest element
fn resolve_index(field: &str, len: usize, line: usize) -> Result<usize, AssetError> {
    let raw: i64 = field
        .parse()
        .map_err(|_| malformed(line, &format!("invalid index '{}'", field)))?;
    let resolved = match raw {
        r if r > 0 => r - 1,
        r if r < 0 => len as i64 + r,
        _ => -1,
    };
    if resolved < 0 || resolved as usize >= len {
        return Err(malformed(line, &format!("index {} out of range ({} elements)", raw, len)));
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_quad_is_fan_triangulated() {
        let obj = "\
# unit quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vn 0 0 1
vt 0 0
f 1/1/1 2/1/1 3/1/1 4/1/1
";
        let mesh = ObjLoader::parse(Cursor::new(obj)).unwrap();
        assert_eq!(mesh.vertices().len(), 4);
        assert_eq!(mesh.indices(), &[0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.vertices()[0].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_negative_indices() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let mesh = ObjLoader::parse(Cursor::new(obj)).unwrap();
        assert_eq!(mesh.vertices()[2].position, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_out_of_range_face_is_malformed() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 7\n";
        let err = ObjLoader::parse(Cursor::new(obj)).unwrap_err();
        assert!(matches!(err, AssetError::MalformedGeometry(_)));
    }

    #[test]
    fn test_garbage_and_empty_input() {
        assert!(ObjLoader::parse(Cursor::new("v 0 zero 0\n")).is_err());
        assert!(ObjLoader::parse(Cursor::new("# nothing here\n")).is_err());
    }
}
