//! Class encoder
//!
//! Submeshes are encoded in two passes. The first walks them in order,
//! allocating VU0 slots and building each vertex table. A submesh's
//! transfers may be attached to the previous submesh's vertices, so that
//! table isn't final until the next submesh has been scheduled. The second
//! pass lays out the class data:
//!
//! ```text
//! submesh table        16 bytes per submesh
//! for each submesh:
//!     VIF list         st unpack, index unpack, texture unpack (padded to 16)
//!     vertex table     (padded to 16)
//! ```
//!
//! The GIF usage table isn't part of the submesh data; the caller places it
//! wherever the class header wants it.

use crate::config::MobyFormat;
use crate::error::ClassError;
use crate::formats::{
    GifUsageEntry, MatrixTransfer, SubmeshEntry, VertexTable, pad, write_gif_usage_table, write_shared_unpacks,
    write_st_unpack,
};
use crate::model::{IndexStream, SubMesh, TexCoord, Vertex};
use crate::skinning::{
    MatrixLiveness, MatrixSlotAllocator, compute_matrix_liveness, max_joints_per_submesh,
    pack_vertices, schedule_matrix_transfers,
};
use crate::strip::map_indices;
use crate::MAX_SUBMESH_TOTAL_VERTEX_COUNT;

/// Encoded submesh table and the data it points into
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedClass {
    pub entries: Vec<SubmeshEntry>,
    /// VIF lists and vertex tables
    pub data: Vec<u8>,
    /// Class-relative offset `data` has to be placed at
    pub data_offset: usize,
    /// One entry per textured submesh
    pub gif_usage: Vec<GifUsageEntry>,
}

impl EncodedClass {
    pub fn table_bytes(&self) -> Vec<u8> {
        self.entries.iter().flat_map(|entry| entry.to_bytes()).collect()
    }

    pub fn gif_usage_table(&self) -> Vec<u8> {
        write_gif_usage_table(&self.gif_usage)
    }

    /// Submesh table followed by the data at its offset
    pub fn to_class_buffer(&self) -> Vec<u8> {
        let mut buffer = self.table_bytes();
        buffer.resize(self.data_offset.max(buffer.len()), 0);
        buffer.extend_from_slice(&self.data);
        buffer
    }
}

/// Encoder state shared by all submeshes of a class
#[derive(Debug, Clone)]
pub struct EncodeContext {
    pub format: MobyFormat,
    pub scale: f32,
    /// Class-relative offset of the first byte of submesh data
    pub base_offset: usize,
    allocator: MatrixSlotAllocator,
    liveness: Vec<Vec<MatrixLiveness>>,
}

impl EncodeContext {
    /// Set up the allocator for a class whose canonical vertices are given
    pub fn new(
        vertices: &[Vec<Vertex>],
        scale: f32,
        format: MobyFormat,
        base_offset: usize,
    ) -> Result<Self, ClassError> {
        let max_joints = max_joints_per_submesh(vertices);
        tracing::debug!(
            "Encoding {} submeshes, at most {} joints per submesh",
            vertices.len(),
            max_joints
        );
        Ok(Self {
            format,
            scale,
            base_offset,
            allocator: MatrixSlotAllocator::new(max_joints)?,
            liveness: compute_matrix_liveness(vertices),
        })
    }

    /// Fixed-point factor applied to positions
    #[inline]
    pub fn inverse_scale(&self) -> f32 {
        1024.0 / self.scale
    }

    pub fn allocator(&self) -> &MatrixSlotAllocator {
        &self.allocator
    }

    /// Build the vertex tables of every submesh, in order
    ///
    /// Also returns, per submesh, the record position of each vertex.
    pub fn build_vertex_tables(
        &mut self,
        submeshes: &[SubMesh],
        vertices: &[Vec<Vertex>],
    ) -> Result<(Vec<VertexTable>, Vec<Vec<usize>>), ClassError> {
        let inverse_scale = self.inverse_scale();
        let mut tables: Vec<VertexTable> = Vec::with_capacity(submeshes.len());
        let mut mappings = Vec::with_capacity(submeshes.len());

        for (smi, (submesh, vertices)) in submeshes.iter().zip(vertices).enumerate() {
            self.allocator.new_submesh();
            let schedule = schedule_matrix_transfers(
                smi,
                vertices,
                tables.last(),
                &mut self.allocator,
                &self.liveness[smi],
            );

            if let Some(last) = tables.last_mut() {
                for (i, transfer) in schedule.last_submesh_transfers.iter().enumerate() {
                    let carrier = last
                        .vertices
                        .len()
                        .checked_sub(i + 1)
                        .and_then(|index| last.vertices.get_mut(index));
                    if !carrier.is_some_and(|vertex| {
                        vertex.set_transfer(transfer.spr_joint_index, transfer.vu0_dest_addr)
                    }) {
                        return Err(ClassError::BadSubmesh {
                            submesh: smi - 1,
                            reason: "matrix transfer scheduled on a vertex that cannot carry one",
                        });
                    }
                }
            }

            let packed = pack_vertices(
                smi,
                vertices,
                &mut self.allocator,
                &self.liveness[smi],
                inverse_scale,
            )?;
            let mut table = packed.table;
            table.preloop_matrix_transfers = schedule.preloop_transfers;
            attach_two_way_transfers(&mut table, &schedule.two_way_transfers, smi)?;
            table.duplicate_vertices = submesh.duplicate_vertices.clone();
            table.unknown_e = submesh.unknown_e;
            table.unknown_e_data = submesh.unknown_e_data.clone();

            tracing::trace!(
                "submesh {}: {} two-way, {} three-way, {} regular, {} pre-loop transfers",
                smi,
                table.two_way_blend_vertex_count,
                table.three_way_blend_vertex_count,
                table.main_vertex_count,
                table.preloop_matrix_transfers.len()
            );
            tables.push(table);
            mappings.push(packed.index_mapping);
        }

        Ok((tables, mappings))
    }
}

/// Put the transfers scheduled for a submesh's own loop on its two-way
/// blend vertices, one each from the first
fn attach_two_way_transfers(
    table: &mut VertexTable,
    transfers: &[MatrixTransfer],
    smi: usize,
) -> Result<(), ClassError> {
    if transfers.len() > table.two_way_blend_vertex_count {
        return Err(ClassError::BadSubmesh {
            submesh: smi,
            reason: "more two-way transfers than two-way blend vertices",
        });
    }
    for (vertex, transfer) in table.vertices.iter_mut().zip(transfers) {
        if !vertex.set_transfer(transfer.spr_joint_index, transfer.vu0_dest_addr) {
            return Err(ClassError::BadSubmesh {
                submesh: smi,
                reason: "matrix transfer scheduled on a vertex that cannot carry one",
            });
        }
    }
    Ok(())
}

/// Check a submesh can be encoded and return its vertices with canonical
/// skins
fn canonical_vertices(smi: usize, submesh: &SubMesh) -> Result<Vec<Vertex>, ClassError> {
    if submesh.stored_vertices().is_empty() {
        return Err(ClassError::BadSubmesh {
            submesh: smi,
            reason: "no vertices",
        });
    }
    let total = submesh.total_vertex_count();
    if total > MAX_SUBMESH_TOTAL_VERTEX_COUNT {
        return Err(ClassError::Overflow {
            submesh: smi,
            field: "transfer vertex count",
            value: total,
        });
    }
    if submesh.tex_coords.len() != total {
        return Err(ClassError::BadSubmesh {
            submesh: smi,
            reason: "texture coordinate count doesn't match the vertex count",
        });
    }

    submesh
        .stored_vertices()
        .iter()
        .enumerate()
        .map(|(i, vertex)| {
            let skin = vertex.skin.canonical();
            if !(1..=3).contains(&skin.count) || skin.active_joints().iter().any(|&j| j < 0) {
                return Err(ClassError::InvalidSkin {
                    submesh: smi,
                    vertex: i,
                    skin: vertex.skin,
                });
            }
            Ok(Vertex { skin, ..*vertex })
        })
        .collect()
}

/// Texture coordinates in record order, duplicates last
fn reorder_tex_coords(tex_coords: &[TexCoord], mapping: &[usize]) -> Vec<TexCoord> {
    let mut sorted = tex_coords.to_vec();
    for (old, &new) in mapping.iter().enumerate() {
        sorted[new] = tex_coords[old];
    }
    sorted
}

fn fit_field<T: TryFrom<usize>>(
    value: usize,
    smi: usize,
    field: &'static str,
) -> Result<T, ClassError> {
    T::try_from(value).map_err(|_| ClassError::Overflow {
        submesh: smi,
        field,
        value,
    })
}

/// Encode a class with its data right after the submesh table
pub fn encode(
    submeshes: &[SubMesh],
    scale: f32,
    format: MobyFormat,
) -> Result<EncodedClass, ClassError> {
    encode_with_base(submeshes, scale, format, submeshes.len() * SubmeshEntry::SIZE)
}

/// Encode a class whose data will be placed at class offset `base_offset`
pub fn encode_with_base(
    submeshes: &[SubMesh],
    scale: f32,
    format: MobyFormat,
    base_offset: usize,
) -> Result<EncodedClass, ClassError> {
    let vertices = submeshes
        .iter()
        .enumerate()
        .map(|(smi, submesh)| canonical_vertices(smi, submesh))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ctx = EncodeContext::new(&vertices, scale, format, base_offset)?;
    let (tables, mappings) = ctx.build_vertex_tables(submeshes, &vertices)?;

    let mut class = EncodedClass {
        data_offset: base_offset,
        ..Default::default()
    };
    let data = &mut class.data;
    for (smi, ((submesh, table), mapping)) in submeshes.iter().zip(&tables).zip(&mappings).enumerate() {
        let mut entry = SubmeshEntry::default();

        pad(data, 0x10);
        let list_start = data.len();
        entry.vif_list_offset = fit_field(base_offset + list_start, smi, "VIF list offset")?;

        let sts = reorder_tex_coords(&submesh.tex_coords, mapping);
        write_st_unpack(data, &sts, smi)?;
        let mut stream: IndexStream = submesh.stream.clone();
        map_indices(&mut stream, mapping);
        let shared = write_shared_unpacks(data, &stream, base_offset, smi)?;
        pad(data, 0x10);
        entry.vif_list_size = fit_field((data.len() - list_start) / 0x10, smi, "VIF list size")?;
        entry.vif_list_texture_unpack_offset = shared.texture_unpack_offset;
        if let Some(gif_usage) = shared.gif_usage {
            class.gif_usage.push(gif_usage);
        }

        let vertex_start = data.len();
        entry.vertex_offset = fit_field(base_offset + vertex_start, smi, "vertex table offset")?;
        let transfer_vertex_count = table.write(data, format) as usize;
        pad(data, 0x10);
        entry.vertex_data_size =
            fit_field((data.len() - vertex_start) / 0x10, smi, "vertex data size")?;
        entry.set_transfer_vertex_count(fit_field(
            transfer_vertex_count,
            smi,
            "transfer vertex count",
        )?);

        class.entries.push(entry);
    }

    tracing::debug!(
        "Encoded {} submeshes into {} bytes ({} textured)",
        class.entries.len(),
        class.data.len(),
        class.gif_usage.len()
    );
    Ok(class)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::decode::decode;
    use crate::formats::MobyVertex;
    use crate::model::{SkinAttributes, TextureRef};

    fn submesh(skins: &[SkinAttributes], indices: &[u8]) -> SubMesh {
        SubMesh {
            vertices: skins
                .iter()
                .enumerate()
                .map(|(i, &skin)| Vertex {
                    pos: Vec3::new(i as f32, 0.0, 0.0),
                    skin,
                    vertex_index: i as u16,
                    ..Default::default()
                })
                .collect(),
            tex_coords: (0..skins.len() as i16).map(|i| TexCoord::new(i, -i)).collect(),
            stream: IndexStream {
                indices: indices.to_vec(),
                secret_indices: vec![0],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_entry_fields() {
        let skin = SkinAttributes::single(0);
        let submeshes = vec![submesh(&[skin; 3], &[1, 2, 3, 1, 1, 1, 0])];
        let class = encode(&submeshes, 1.0, MobyFormat::Rac2).unwrap();
        assert_eq!(class.entries.len(), 1);
        let entry = class.entries[0];
        assert_eq!(entry.vif_list_offset, 0x10);
        assert_eq!(entry.transfer_vertex_count, 3);
        assert_eq!(entry.vif_list_texture_unpack_offset, 0);
        assert!(entry.check_derived_fields().is_ok());
        assert_eq!(entry.vertex_offset % 0x10, 0);
        assert!(class.gif_usage.is_empty());
        assert_eq!(class.to_class_buffer().len(), 0x10 + class.data.len());
    }

    #[test]
    fn test_textured_submesh_gets_gif_usage() {
        let skin = SkinAttributes::single(0);
        let mut textured = submesh(&[skin; 3], &[0, 2, 3, 1, 1, 1, 0]);
        textured.stream.secret_indices = vec![0x81, 0];
        textured.stream.textures = vec![crate::model::TexturePrimitive::new(TextureRef::Index(5))];
        let class = encode(&[textured], 1.0, MobyFormat::Rac2).unwrap();
        assert_eq!(class.gif_usage.len(), 1);
        assert_eq!(class.gif_usage[0].texture_indices[0], 5);
        assert_ne!(class.entries[0].vif_list_texture_unpack_offset, 0);
        assert!(class.gif_usage_table()[12..16].ends_with(&[0x80]));
    }

    #[test]
    fn test_rejects_bad_submeshes() {
        assert_eq!(
            encode(&[SubMesh::default()], 1.0, MobyFormat::Rac2),
            Err(ClassError::BadSubmesh {
                submesh: 0,
                reason: "no vertices"
            })
        );

        let mut bad = submesh(&[SkinAttributes::single(0)], &[0]);
        bad.tex_coords.clear();
        assert!(matches!(
            encode(&[bad], 1.0, MobyFormat::Rac2),
            Err(ClassError::BadSubmesh { submesh: 0, .. })
        ));

        let skin = SkinAttributes {
            count: 4,
            ..SkinAttributes::single(0)
        };
        assert!(matches!(
            encode(&[submesh(&[skin], &[0])], 1.0, MobyFormat::Rac2),
            Err(ClassError::InvalidSkin { vertex: 0, .. })
        ));

        let skin = SkinAttributes::single(0);
        assert!(matches!(
            encode(&[submesh(&[skin; 0x80], &[0])], 1.0, MobyFormat::Rac2),
            Err(ClassError::Overflow { .. })
        ));
    }

    #[test]
    fn test_transfers_attached_to_previous_submesh() {
        let first = submesh(&[SkinAttributes::single(0); 4], &[1, 2, 3, 1, 1, 1, 0]);
        let blend = SkinAttributes::two_way([1, 2], [128, 127]);
        let second = submesh(&[blend; 3], &[1, 2, 3, 1, 1, 1, 0]);
        let submeshes = vec![first, second];
        let vertices: Vec<_> = submeshes
            .iter()
            .enumerate()
            .map(|(smi, s)| canonical_vertices(smi, s).unwrap())
            .collect();
        let mut ctx = EncodeContext::new(&vertices, 1.0, MobyFormat::Rac2, 0x20).unwrap();
        let (tables, _) = ctx.build_vertex_tables(&submeshes, &vertices).unwrap();

        let carried: Vec<_> = tables[0]
            .vertices
            .iter()
            .filter_map(|vertex| match *vertex {
                MobyVertex::Regular {
                    transfer_joint,
                    transfer_store_addr,
                    ..
                } if transfer_store_addr != crate::DONT_CARE_ADDR => {
                    Some((transfer_joint, transfer_store_addr))
                }
                _ => None,
            })
            .collect();
        assert_eq!(carried.len() + tables[1].preloop_matrix_transfers.len(), 2);
    }

    #[test]
    fn test_rejects_two_way_transfers_without_carriers() {
        let mut table = VertexTable {
            two_way_blend_vertex_count: 1,
            ..Default::default()
        };
        let transfers = [MatrixTransfer::new(1, 0), MatrixTransfer::new(2, 4)];
        assert_eq!(
            attach_two_way_transfers(&mut table, &transfers, 3),
            Err(ClassError::BadSubmesh {
                submesh: 3,
                reason: "more two-way transfers than two-way blend vertices",
            })
        );
        assert!(attach_two_way_transfers(&mut table, &[], 3).is_ok());
    }

    #[test]
    fn test_decode_matches_input() {
        let blend = SkinAttributes::two_way([0, 1], [200, 55]);
        let skins = [SkinAttributes::single(1), blend, SkinAttributes::single(0), blend];
        let input = submesh(&skins, &[1, 2, 3, 4, 1, 1, 1, 0]);
        let class = encode(std::slice::from_ref(&input), 1.0, MobyFormat::Rac3Dl).unwrap();
        let bytes = class.to_class_buffer();
        let decoded = decode(&bytes, 0, 1, 1.0, 2, MobyFormat::Rac3Dl).unwrap();
        assert!(decoded.diagnostics.is_empty());

        let output = &decoded.submeshes[0];
        assert_eq!(output.vertices.len(), input.vertices.len());
        for vertex in &input.vertices {
            let found = output
                .vertices
                .iter()
                .find(|v| v.vertex_index == vertex.vertex_index)
                .unwrap();
            assert_eq!(found.skin, vertex.skin);
            assert_eq!(found.pos, vertex.pos);
        }
        // Each vertex keeps its own texture coordinate through the reordering.
        for (vertex, st) in output.vertices.iter().zip(&output.tex_coords) {
            assert_eq!(*st, input.tex_coords[vertex.vertex_index as usize]);
        }
    }
}
