//! Mesh loading from Wavefront OBJ files.

use std::collections::HashMap;
use std::path::Path;

use glam::{Vec2, Vec3};
use tracing::{info, warn};
use vkr_rhi::vertex::Vertex;

use crate::error::{ResourceError, ResourceResult};

/// Deduplicated vertex and index data ready for upload.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Accumulates vertices across shapes, merging bit-identical ones.
#[derive(Default)]
pub struct MeshBuilder {
    mesh: Mesh,
    unique: HashMap<[u32; 8], u32>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, vertex: Vertex) {
        let next = self.mesh.vertices.len() as u32;
        let index = *self.unique.entry(vertex.bit_key()).or_insert_with(|| {
            self.mesh.vertices.push(vertex);
            next
        });
        self.mesh.indices.push(index);
    }

    /// Append one single-indexed shape. Texture V is flipped to match
    /// top-left image origin. Vertex color is white.
    pub fn push_shape(
        &mut self,
        positions: &[f32],
        texcoords: &[f32],
        indices: &[u32],
    ) -> ResourceResult<()> {
        for &index in indices {
            let i = index as usize;
            let pos = positions
                .get(3 * i..3 * i + 3)
                .ok_or_else(|| {
                    ResourceError::InvalidData(format!(
                        "position index {index} out of range ({} floats)",
                        positions.len()
                    ))
                })
                .map(Vec3::from_slice)?;

            let tex_coord = if texcoords.is_empty() {
                Vec2::ZERO
            } else {
                let uv = texcoords.get(2 * i..2 * i + 2).ok_or_else(|| {
                    ResourceError::InvalidData(format!(
                        "texcoord index {index} out of range ({} floats)",
                        texcoords.len()
                    ))
                })?;
                Vec2::new(uv[0], 1.0 - uv[1])
            };

            self.push(Vertex::new(pos, Vec3::ONE, tex_coord));
        }
        Ok(())
    }

    pub fn finish(self) -> Mesh {
        self.mesh
    }
}

pub fn load_mesh(path: &Path) -> ResourceResult<Mesh> {
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, _materials) =
        tobj::load_obj(path, &options).map_err(|source| ResourceError::Obj {
            path: path.to_path_buf(),
            source,
        })?;

    let mut builder = MeshBuilder::new();
    for model in &models {
        if model.mesh.texcoords.is_empty() {
            warn!("Shape '{}' has no texture coordinates", model.name);
        }
        builder.push_shape(
            &model.mesh.positions,
            &model.mesh.texcoords,
            &model.mesh.indices,
        )?;
    }
    let mesh = builder.finish();

    if mesh.indices.is_empty() {
        return Err(ResourceError::InvalidData(format!(
            "'{}' contains no triangles",
            path.display()
        )));
    }

    info!(
        "Loaded mesh '{}': {} shapes, {} unique vertices, {} indices",
        path.display(),
        models.len(),
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Unit quad as two triangles sharing an edge.
    const QUAD_POSITIONS: [f32; 12] = [
        0.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        1.0, 1.0, 0.0, //
        0.0, 1.0, 0.0,
    ];
    const QUAD_TEXCOORDS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
    const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

    #[test]
    fn test_quad_shares_vertices() {
        let mut builder = MeshBuilder::new();
        builder
            .push_shape(&QUAD_POSITIONS, &QUAD_TEXCOORDS, &QUAD_INDICES)
            .unwrap();
        let mesh = builder.finish();

        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 3, 0]);
        assert_eq!(mesh.index_count(), 6);
    }

    #[test]
    fn test_texcoord_v_is_flipped() {
        let mut builder = MeshBuilder::new();
        builder
            .push_shape(&QUAD_POSITIONS, &QUAD_TEXCOORDS, &QUAD_INDICES)
            .unwrap();
        let mesh = builder.finish();

        assert_eq!(mesh.vertices[0].tex_coord, Vec2::new(0.0, 1.0));
        assert_eq!(mesh.vertices[2].tex_coord, Vec2::new(1.0, 0.0));
        assert!(mesh.vertices.iter().all(|v| v.color == Vec3::ONE));
    }

    #[test]
    fn test_duplicates_merge_across_shapes() {
        let mut builder = MeshBuilder::new();
        builder
            .push_shape(&QUAD_POSITIONS, &QUAD_TEXCOORDS, &QUAD_INDICES)
            .unwrap();
        builder
            .push_shape(&QUAD_POSITIONS, &QUAD_TEXCOORDS, &[0, 1, 2])
            .unwrap();
        let mesh = builder.finish();

        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(&mesh.indices[6..], &[0, 1, 2]);
    }

    #[test]
    fn test_same_position_different_uv_stays_distinct() {
        let positions = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let texcoords = [0.0, 0.0, 0.5, 0.5];
        let mut builder = MeshBuilder::new();
        builder.push_shape(&positions, &texcoords, &[0, 1, 0]).unwrap();
        let mesh = builder.finish();

        assert_eq!(mesh.vertices.len(), 2);
        assert_eq!(mesh.indices, vec![0, 1, 0]);
    }

    #[test]
    fn test_missing_texcoords_default_to_zero() {
        let mut builder = MeshBuilder::new();
        builder.push_shape(&QUAD_POSITIONS, &[], &[0, 1, 2]).unwrap();
        let mesh = builder.finish();
        assert!(mesh.vertices.iter().all(|v| v.tex_coord == Vec2::ZERO));
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mut builder = MeshBuilder::new();
        let err = builder
            .push_shape(&QUAD_POSITIONS, &QUAD_TEXCOORDS, &[0, 1, 4])
            .unwrap_err();
        assert!(matches!(err, ResourceError::InvalidData(_)));
    }
}
