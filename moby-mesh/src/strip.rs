//! Index streams
//!
//! The VU1 microprogram consumes one index byte per step and keeps the last
//! three vertices in a rolling queue:
//!
//! ```text
//! 0x01..0x7F   push vertex (index - 1) and draw a triangle with the queue
//! 0x80         invalid
//! 0x81..0xFF   push vertex (index - 0x81) without drawing (strip restart)
//! 0x00         consume the next secret index s:
//!                s == 0       end of submesh
//!                0x01..0x7F   push vertex (s - 1) without drawing, bind the
//!                             next texture primitive
//!                0x80..0xFF   invalid
//! ```
//!
//! The winding order flips on every step, as in a GS triangle strip. The
//! microprogram has three vertices in flight when it stops, so the last
//! three triangles before the terminator are never drawn.

use hashbrown::HashMap;

use crate::error::SubmeshError;
use crate::model::{
    Face, IndexStream, SkinnedMesh, SubMesh, TexturePrimitive, TextureRef, Vertex,
};
use crate::packing::pack_tex_coord;
use crate::{MAX_SUBMESH_INDEX_COUNT, MAX_SUBMESH_STORED_VERTEX_COUNT, MAX_SUBMESH_TEXTURE_COUNT};

/// Index bytes the builder appends to make the microprogram stop
const TERMINATOR: [u8; 4] = [1, 1, 1, 0];

/// Index bit that marks a push without a draw
const RESTART_BIT: u8 = 0x80;

// ============================================================================
// Remapping
// ============================================================================

/// Renumber the vertices an index stream refers to
///
/// `mapping[i]` is the new position of vertex `i`. Only indices before the
/// terminator are touched; values that don't name a vertex in
/// `1..=mapping.len()` are left alone, as are duplicate vertices.
pub fn map_indices(stream: &mut IndexStream, mapping: &[usize]) {
    let vertex_count = mapping.len();
    let remap = |one_based: u8| -> u8 {
        let index = one_based as usize;
        if (1..=vertex_count).contains(&index) {
            (mapping[index - 1] + 1) as u8
        } else {
            one_based
        }
    };

    let buffer_end = terminator_position(stream).map_or(0, |pos| pos.saturating_sub(3));

    let mut next_secret = 0;
    for index in &mut stream.indices[..buffer_end] {
        if *index == 0 {
            if let Some(secret) = stream.secret_indices.get_mut(next_secret) {
                *secret = remap(*secret);
            }
            next_secret += 1;
        } else {
            let restart = *index & RESTART_BIT;
            *index = remap(*index & !RESTART_BIT) | restart;
        }
    }
}

/// Position of the zero index that ends the stream
fn terminator_position(stream: &IndexStream) -> Option<usize> {
    let mut next_secret = 0;
    for (i, &index) in stream.indices.iter().enumerate() {
        if index == 0 {
            match stream.secret_indices.get(next_secret) {
                None | Some(0) => return Some(i),
                Some(_) => next_secret += 1,
            }
        }
    }
    None
}

// ============================================================================
// Face Recovery
// ============================================================================

/// Walk an index stream and rebuild the triangles it draws
///
/// `vertex_count` counts stored and duplicate vertices. `texture` is the
/// texture bound when the submesh starts; it is updated so the caller can
/// carry it into the next submesh.
pub fn recover_faces(
    stream: &IndexStream,
    vertex_count: usize,
    texture: &mut TextureRef,
) -> Result<Vec<Face>, SubmeshError> {
    let mut faces = Vec::new();
    let mut queue = [0u16; 3];
    let mut pos = 0;
    let mut pushed = 0;
    let mut reverse_winding = true;
    let mut next_secret = 0;

    for (position, &raw) in stream.indices.iter().enumerate() {
        let index = match raw {
            RESTART_BIT => return Err(SubmeshError::ReservedIndex { position }),
            0 => {
                let secret = *stream
                    .secret_indices
                    .get(next_secret)
                    .ok_or(SubmeshError::MissingSecretIndex { position })?;
                if secret == 0 {
                    let undrawn = faces.len().min(3);
                    faces.truncate(faces.len() - undrawn);
                    return Ok(faces);
                }
                let primitive = stream
                    .textures
                    .get(next_secret)
                    .ok_or(SubmeshError::MissingTexture { position })?;
                if secret & RESTART_BIT != 0 {
                    return Err(SubmeshError::ReservedIndex { position });
                }
                *texture = primitive.texture().unwrap_or_default();
                next_secret += 1;
                secret | RESTART_BIT
            }
            index => index,
        };

        let vertex = (index & !RESTART_BIT) as usize;
        let Some(vertex) = vertex.checked_sub(1).filter(|&v| v < vertex_count) else {
            return Err(SubmeshError::IndexOutOfRange {
                index: raw,
                position,
                vertex_count,
            });
        };

        queue[pos] = vertex as u16;
        pushed += 1;
        if index < RESTART_BIT && pushed >= 3 {
            let vertices = if reverse_winding {
                [queue[pos], queue[(pos + 2) % 3], queue[(pos + 1) % 3]]
            } else {
                [queue[(pos + 1) % 3], queue[(pos + 2) % 3], queue[pos]]
            };
            faces.push(Face {
                vertices,
                texture: *texture,
            });
        }
        pos = (pos + 1) % 3;
        reverse_winding = !reverse_winding;
    }

    Ok(faces)
}

// ============================================================================
// Submesh Builder
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct StripIndex {
    vertex: u32,
    restart: bool,
}

#[derive(Debug, Default)]
struct PendingSubmesh {
    /// Mesh vertex of each stored vertex
    vertices: Vec<u32>,
    local: HashMap<u32, usize>,
    indices: Vec<StripIndex>,
    /// Texture and the index position its run starts at
    textures: Vec<(TextureRef, usize)>,
}

impl PendingSubmesh {
    /// Drop the restarts of a triangle cut off by a split
    ///
    /// Returns a texture whose run hadn't started yet.
    fn rewind(&mut self, count: usize) -> Option<TextureRef> {
        self.indices.truncate(self.indices.len() - count.min(self.indices.len()));
        match self.textures.last() {
            Some(&(texture, start)) if start >= self.indices.len() => {
                self.textures.pop();
                Some(texture)
            }
            _ => None,
        }
    }
}

/// Each face as restart, restart, draw
fn fake_strip(faces: &[[u32; 3]]) -> Vec<StripIndex> {
    faces
        .iter()
        .flat_map(|face| {
            [
                StripIndex {
                    vertex: face[0],
                    restart: true,
                },
                StripIndex {
                    vertex: face[1],
                    restart: true,
                },
                StripIndex {
                    vertex: face[2],
                    restart: false,
                },
            ]
        })
        .collect()
}

/// Split a skinned mesh into submeshes that fit the VU1 buffers
///
/// Every submesh holds at most four texture runs, 97 stored vertices and 196
/// index bytes. A vertex used by several submeshes is stored in each of
/// them. A submesh split off in the middle of a face group has no texture
/// primitive of its own and draws with the texture still bound.
pub fn build_submeshes(mesh: &SkinnedMesh) -> Vec<SubMesh> {
    let mut done: Vec<PendingSubmesh> = Vec::new();
    let mut pending = PendingSubmesh::default();

    for group in &mesh.groups {
        let faces: Vec<[u32; 3]> = group
            .faces
            .iter()
            .copied()
            .filter(|face| {
                let valid = face.iter().all(|&v| (v as usize) < mesh.vertices.len());
                if !valid {
                    tracing::warn!("Skipping face {:?} with out of range vertices", face);
                }
                valid
            })
            .collect();
        let strip = fake_strip(&faces);
        if strip.is_empty() {
            continue;
        }

        if pending.textures.len() >= MAX_SUBMESH_TEXTURE_COUNT
            || pending.indices.len() >= MAX_SUBMESH_INDEX_COUNT
        {
            done.push(std::mem::take(&mut pending));
        }
        pending.textures.push((group.texture, pending.indices.len()));

        let mut j = 0;
        while j < strip.len() {
            let r = strip[j];
            let needs_slot = !pending.local.contains_key(&r.vertex);
            if (needs_slot && pending.vertices.len() >= MAX_SUBMESH_STORED_VERTEX_COUNT)
                || pending.indices.len() >= MAX_SUBMESH_INDEX_COUNT - TERMINATOR.len()
            {
                // Restart the cut triangle in a fresh submesh.
                let cut = j % 3;
                let moved = pending.rewind(cut);
                done.push(std::mem::take(&mut pending));
                if let Some(texture) = moved {
                    pending.textures.push((texture, 0));
                }
                j -= cut;
                continue;
            }

            let local = match pending.local.get(&r.vertex) {
                Some(&local) => local,
                None => {
                    let local = pending.vertices.len();
                    pending.vertices.push(r.vertex);
                    pending.local.insert(r.vertex, local);
                    local
                }
            };
            pending.indices.push(StripIndex {
                vertex: local as u32,
                restart: r.restart,
            });
            j += 1;
        }
    }
    if !pending.indices.is_empty() {
        done.push(pending);
    }

    let submeshes: Vec<SubMesh> = done
        .into_iter()
        .filter(|pending| !pending.indices.is_empty())
        .map(|pending| lower_submesh(mesh, pending))
        .collect();
    tracing::debug!(
        "Built {} submeshes from {} face groups",
        submeshes.len(),
        mesh.groups.len()
    );
    submeshes
}

fn lower_submesh(mesh: &SkinnedMesh, pending: PendingSubmesh) -> SubMesh {
    // Stored vertices fill the intermediate buffer from slot 0.
    let vertices: Vec<_> = pending
        .vertices
        .iter()
        .enumerate()
        .map(|(slot, &v)| Vertex {
            vertex_index: slot as u16,
            ..mesh.vertices[v as usize]
        })
        .collect();
    let tex_coords = vertices
        .iter()
        .map(|vertex| pack_tex_coord(vertex.tex_coord))
        .collect();

    let mut stream = IndexStream::default();
    let mut next_texture = 0;
    for (i, index) in pending.indices.iter().enumerate() {
        let out = index.vertex as u8;
        let starts_run = pending
            .textures
            .get(next_texture)
            .is_some_and(|&(_, start)| start == i);
        if starts_run {
            stream.indices.push(0);
            stream.secret_indices.push(out + 1);
            next_texture += 1;
        } else if index.restart {
            stream.indices.push(out + 0x81);
        } else {
            stream.indices.push(out + 1);
        }
    }
    stream.indices.extend_from_slice(&TERMINATOR);
    stream.secret_indices.push(0);
    stream.textures = pending
        .textures
        .iter()
        .map(|&(texture, _)| TexturePrimitive::new(texture))
        .collect();

    SubMesh {
        vertices,
        tex_coords,
        stream,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::model::{FaceGroup, SkinAttributes};

    fn stream(indices: &[u8], secret_indices: &[u8], textures: &[TextureRef]) -> IndexStream {
        IndexStream {
            indices: indices.to_vec(),
            secret_indices: secret_indices.to_vec(),
            textures: textures.iter().map(|&t| TexturePrimitive::new(t)).collect(),
            ..Default::default()
        }
    }

    fn sorted(face: &Face) -> [u16; 3] {
        let mut v = face.vertices;
        v.sort_unstable();
        v
    }

    fn grid_mesh(quads: u32, groups: &[TextureRef]) -> SkinnedMesh {
        let mut vertices = Vec::new();
        for i in 0..=quads {
            for y in 0..2 {
                vertices.push(Vertex::new(
                    Vec3::new(i as f32, y as f32, 0.0),
                    Vec3::Z,
                    SkinAttributes::single(0),
                ));
            }
        }
        let mut faces = Vec::new();
        for i in 0..quads {
            let a = i * 2;
            faces.push([a, a + 2, a + 1]);
            faces.push([a + 1, a + 2, a + 3]);
        }
        let per_group = faces.len().div_ceil(groups.len());
        SkinnedMesh {
            vertices,
            groups: groups
                .iter()
                .zip(faces.chunks(per_group))
                .map(|(&texture, chunk)| FaceGroup {
                    texture,
                    faces: chunk.to_vec(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_terminal_secret_drops_nothing_when_no_faces() {
        let mut texture = TextureRef::None;
        let faces = recover_faces(&stream(&[2, 3, 0], &[0], &[]), 3, &mut texture).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_single_triangle_with_terminator() {
        let mut texture = TextureRef::None;
        let s = stream(&[0, 0x82, 3, 1, 1, 1, 0], &[1, 0], &[TextureRef::Index(4)]);
        let faces = recover_faces(&s, 3, &mut texture).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(sorted(&faces[0]), [0, 1, 2]);
        assert_eq!(faces[0].texture, TextureRef::Index(4));
        assert_eq!(texture, TextureRef::Index(4));
    }

    #[test]
    fn test_winding_alternates() {
        let mut texture = TextureRef::None;
        let s = stream(&[0x81, 0x82, 3, 4, 1, 1, 1, 0], &[0], &[]);
        let faces = recover_faces(&s, 4, &mut texture).unwrap();
        assert_eq!(faces[0].vertices, [2, 1, 0]);
        assert_eq!(faces[1].vertices, [1, 2, 3]);
    }

    #[test]
    fn test_texture_carries_over() {
        let mut texture = TextureRef::Glass;
        let s = stream(&[0x81, 0x82, 3, 1, 1, 1, 0], &[0], &[]);
        let faces = recover_faces(&s, 3, &mut texture).unwrap();
        assert_eq!(faces[0].texture, TextureRef::Glass);
    }

    #[test]
    fn test_stream_errors() {
        let mut texture = TextureRef::None;
        assert_eq!(
            recover_faces(&stream(&[0x81, 0x80], &[0], &[]), 3, &mut texture),
            Err(SubmeshError::ReservedIndex { position: 1 })
        );
        assert_eq!(
            recover_faces(&stream(&[0x81, 0x85], &[0], &[]), 3, &mut texture),
            Err(SubmeshError::IndexOutOfRange {
                index: 0x85,
                position: 1,
                vertex_count: 3
            })
        );
        assert_eq!(
            recover_faces(&stream(&[0], &[], &[]), 3, &mut texture),
            Err(SubmeshError::MissingSecretIndex { position: 0 })
        );
        assert_eq!(
            recover_faces(&stream(&[0], &[2], &[]), 3, &mut texture),
            Err(SubmeshError::MissingTexture { position: 0 })
        );
    }

    #[test]
    fn test_secret_index_with_restart_bit_is_reserved() {
        let mut texture = TextureRef::None;
        let textures = [TextureRef::Index(1), TextureRef::Index(2)];
        for secret in [0x80, 0x82] {
            let s = stream(&[0x81, 0, 2, 1, 1, 1, 0], &[secret, 0], &textures);
            assert_eq!(
                recover_faces(&s, 3, &mut texture),
                Err(SubmeshError::ReservedIndex { position: 1 })
            );
        }
        assert_eq!(texture, TextureRef::None);
    }

    #[test]
    fn test_map_indices() {
        let mut s = stream(&[0, 0x82, 3, 1, 1, 1, 0, 0], &[1, 0], &[TextureRef::None]);
        map_indices(&mut s, &[2, 0, 1]);
        assert_eq!(s.indices, vec![0, 0x81, 2, 1, 1, 1, 0, 0]);
        assert_eq!(s.secret_indices, vec![3, 0]);
    }

    #[test]
    fn test_map_indices_leaves_duplicates() {
        let mut s = stream(&[0x81, 0x84, 2, 1, 1, 1, 0], &[0], &[]);
        map_indices(&mut s, &[1, 0]);
        assert_eq!(&s.indices[..3], &[0x82, 0x84, 1]);
    }

    #[test]
    fn test_build_single_group() {
        let mesh = grid_mesh(2, &[TextureRef::Index(1)]);
        let submeshes = build_submeshes(&mesh);
        assert_eq!(submeshes.len(), 1);
        let submesh = &submeshes[0];
        assert_eq!(submesh.vertices.len(), 6);
        assert_eq!(submesh.tex_coords.len(), 6);
        assert_eq!(submesh.stream.indices[0], 0);
        assert_eq!(submesh.stream.secret_indices, vec![1, 0]);
        assert_eq!(&submesh.stream.indices[submesh.stream.indices.len() - 4..], &TERMINATOR);

        let mut texture = TextureRef::None;
        let faces = recover_faces(&submesh.stream, 6, &mut texture).unwrap();
        assert_eq!(faces.len(), 4);
        assert!(faces.iter().all(|f| f.texture == TextureRef::Index(1)));
    }

    #[test]
    fn test_build_material_runs() {
        let mesh = grid_mesh(4, &[TextureRef::Index(0), TextureRef::Chrome]);
        let submeshes = build_submeshes(&mesh);
        assert_eq!(submeshes.len(), 1);
        let stream = &submeshes[0].stream;
        assert_eq!(stream.textures.len(), 2);
        assert_eq!(stream.secret_indices.len(), 3);
        assert_eq!(stream.indices.iter().filter(|&&i| i == 0).count(), 3);

        let mut texture = TextureRef::None;
        let faces = recover_faces(stream, submeshes[0].vertices.len(), &mut texture).unwrap();
        assert_eq!(faces.len(), 8);
        assert_eq!(faces[..4].iter().filter(|f| f.texture == TextureRef::Index(0)).count(), 4);
        assert_eq!(faces[4..].iter().filter(|f| f.texture == TextureRef::Chrome).count(), 4);
    }

    #[test]
    fn test_build_respects_limits() {
        let mesh = grid_mesh(120, &[TextureRef::Index(0)]);
        let submeshes = build_submeshes(&mesh);
        assert!(submeshes.len() > 1);

        let mut texture = TextureRef::None;
        let mut total_faces = 0;
        for submesh in &submeshes {
            assert!(submesh.vertices.len() <= MAX_SUBMESH_STORED_VERTEX_COUNT);
            assert!(submesh.stream.indices.len() <= MAX_SUBMESH_INDEX_COUNT);
            assert!(submesh.stream.textures.len() <= MAX_SUBMESH_TEXTURE_COUNT);
            let faces = recover_faces(&submesh.stream, submesh.vertices.len(), &mut texture).unwrap();
            assert!(faces.iter().all(|f| f.texture == TextureRef::Index(0)));
            total_faces += faces.len();
        }
        assert_eq!(total_faces, 240);
        // Only the first submesh binds the texture.
        assert_eq!(submeshes[0].stream.textures.len(), 1);
        assert!(submeshes[1].stream.textures.is_empty());
    }

    #[test]
    fn test_build_skips_bad_faces() {
        let mut mesh = grid_mesh(1, &[TextureRef::None]);
        mesh.groups[0].faces.push([0, 1, 99]);
        let submeshes = build_submeshes(&mesh);
        let mut texture = TextureRef::Index(3);
        let faces = recover_faces(&submeshes[0].stream, 4, &mut texture).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(texture, TextureRef::None);
    }

    #[test]
    fn test_build_empty_mesh() {
        assert!(build_submeshes(&SkinnedMesh::default()).is_empty());
    }
}
