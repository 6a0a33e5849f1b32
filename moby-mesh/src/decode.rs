//! Class decoder
//!
//! Reads the submesh table and rebuilds each submesh in order. Skins are
//! recovered by replaying every matrix store and load the vertex records
//! describe against a simulated VU0 store, which persists from one submesh
//! to the next just like the real one. Duplicate vertices are resolved
//! through a simulated VU1 intermediate buffer that persists the same way.
//!
//! A submesh with malformed packets is replaced by an empty one and reported
//! as a [`Diagnostic`]; an impossible sequence of matrix loads and stores
//! fails the whole class.

use ps2_vif::{filter_unpacks, read_command_list};

use crate::config::MobyFormat;
use crate::error::{ClassError, DecodeError, Diagnostic, SkinError, SubmeshError};
use crate::formats::{
    MobyVertex, SubmeshEntry, VERTEX_INDEX_MASK, VertexTable, read_shared_unpacks,
    read_st_unpack, slice_at,
};
use crate::model::{SkinAttributes, SubMesh, TextureRef, Vertex};
use crate::packing::{unpack_normal, unpack_position, unpack_tex_coord};
use crate::strip::{map_indices, recover_faces};
use crate::{BLEND_BUFFER_SLOTS, DONT_CARE_ADDR, INTERMEDIATE_BUFFER_SIZE};

/// Submeshes of a class plus whatever went wrong along the way
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedClass {
    /// One per table entry, empty where a diagnostic was raised
    pub submeshes: Vec<SubMesh>,
    pub diagnostics: Vec<Diagnostic>,
}

/// State carried from one submesh to the next while decoding a class
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub scale: f32,
    pub joint_count: u32,
    pub format: MobyFormat,
    blend_buffer: [Option<SkinAttributes>; BLEND_BUFFER_SLOTS],
    intermediate_buffer: Vec<Option<Vertex>>,
    texture: TextureRef,
}

impl DecodeContext {
    pub fn new(scale: f32, joint_count: u32, format: MobyFormat) -> Self {
        Self {
            scale,
            joint_count,
            format,
            blend_buffer: [None; BLEND_BUFFER_SLOTS],
            intermediate_buffer: vec![None; INTERMEDIATE_BUFFER_SIZE],
            texture: TextureRef::None,
        }
    }

    /// Skin whose matrix the simulated VU0 store holds at `addr`
    pub fn matrix_at(&self, addr: u8) -> Option<SkinAttributes> {
        self.blend_buffer[addr as usize / 4]
    }

    /// Decode the submesh an entry describes
    ///
    /// `smi` is only used to label errors.
    pub fn decode_submesh(
        &mut self,
        bytes: &[u8],
        entry: &SubmeshEntry,
        smi: usize,
    ) -> Result<SubMesh, DecodeError> {
        let list = slice_at(
            bytes,
            entry.vif_list_offset as usize,
            entry.vif_list_size as usize * 0x10,
            "vif command list",
        )?;
        let unpacks = filter_unpacks(read_command_list(list).map_err(SubmeshError::from)?);
        let mut tex_coords = read_st_unpack(unpacks.first())?;
        let mut stream = read_shared_unpacks(unpacks.get(1..).unwrap_or_default(), |id| id >= -1)?;
        let table = VertexTable::read(bytes, entry, self.format)?;

        let total = table.transfer_vertex_count();
        if tex_coords.len() < total {
            return Err(SubmeshError::TexCoordCount {
                found: tex_coords.len(),
                expected: total,
            }
            .into());
        }

        let skins = self.replay_skins(&table).map_err(|source| ClassError::Skin {
            submesh: smi,
            source,
        })?;

        let mut vertices = Vec::with_capacity(table.vertices.len());
        for ((record, skin), st) in table.vertices.iter().zip(skins).zip(&tex_coords) {
            let Some(attributes) = record.attributes() else {
                continue;
            };
            let vertex = Vertex {
                pos: unpack_position(attributes.position, self.scale),
                normal: unpack_normal(attributes.normal_azimuth, attributes.normal_elevation),
                skin,
                tex_coord: unpack_tex_coord(*st),
                vertex_index: record.vertex_index() & VERTEX_INDEX_MASK,
            };
            self.intermediate_buffer[vertex.vertex_index as usize] = Some(vertex);
            vertices.push(vertex);
        }

        // Duplicates come after the stored vertices in the ST list and the
        // index numbering, and reuse whatever geometry their slot holds.
        let stored = vertices.len();
        let mut duplicates = Vec::with_capacity(table.duplicate_vertices.len());
        for (&dupe, st) in table.duplicate_vertices.iter().zip(&tex_coords[stored..]) {
            let slot = (dupe & VERTEX_INDEX_MASK) as usize;
            let source = self.intermediate_buffer[slot]
                .ok_or(SubmeshError::DuplicateVertex(dupe))?;
            duplicates.push(Vertex {
                tex_coord: unpack_tex_coord(*st),
                ..source
            });
        }

        let mapping = blend_first_order(&table);
        let mut sorted = vertices.clone();
        let mut sorted_sts = tex_coords.clone();
        for (old, &new) in mapping.iter().enumerate() {
            sorted[new] = vertices[old];
            sorted_sts[new] = tex_coords[old];
        }
        sorted.extend(duplicates);
        tex_coords = sorted_sts;
        map_indices(&mut stream, &mapping);

        let faces = recover_faces(&stream, total, &mut self.texture)?;

        Ok(SubMesh {
            vertices: sorted,
            tex_coords,
            stream,
            duplicate_vertices: table.duplicate_vertices,
            unknown_e: table.unknown_e,
            unknown_e_data: table.unknown_e_data,
            faces,
        })
    }

    fn store(&mut self, addr: u8, skin: SkinAttributes, op: &'static str) -> Result<(), SkinError> {
        if addr % 4 != 0 {
            return Err(SkinError::Unaligned { op, addr });
        }
        self.blend_buffer[addr as usize / 4] = Some(skin);
        Ok(())
    }

    fn load(&self, addr: u8) -> Result<SkinAttributes, SkinError> {
        if addr % 4 != 0 {
            return Err(SkinError::Unaligned { op: "load", addr });
        }
        self.blend_buffer[addr as usize / 4].ok_or(SkinError::Uninitialised(addr))
    }

    /// Blend input: a single joint matrix
    fn load_unblended(&self, addr: u8, ways: u8) -> Result<i8, SkinError> {
        let skin = self.load(addr)?;
        if skin.count >= 2 {
            return Err(SkinError::AlreadyBlended(ways));
        }
        Ok(skin.joints[0])
    }

    /// Run the submesh's matrix transfers, blends and loads, returning the
    /// skin each vertex record ends up with
    fn replay_skins(&mut self, table: &VertexTable) -> Result<Vec<SkinAttributes>, SkinError> {
        for transfer in &table.preloop_matrix_transfers {
            let skin = if self.joint_count == 0 && transfer.spr_joint_index == 0 {
                // Unanimated classes bind the identity matrix.
                SkinAttributes::default()
            } else {
                SkinAttributes::single(transfer.spr_joint_index as i8)
            };
            self.store(transfer.vu0_dest_addr, skin, "pre-loop transfer")?;
        }

        let mut skins = Vec::with_capacity(table.vertices.len());
        for record in &table.vertices {
            let skin = match *record {
                MobyVertex::TwoWay {
                    transfer_joint,
                    load_addrs,
                    weights,
                    transfer_store_addr,
                    blend_store_addr,
                    ..
                } => {
                    self.store(
                        transfer_store_addr,
                        SkinAttributes::single(transfer_joint as i8),
                        "transfer",
                    )?;
                    if load_addrs.contains(&transfer_store_addr) {
                        return Err(SkinError::LoadStoreConflict(transfer_store_addr));
                    }
                    let joints = [
                        self.load_unblended(load_addrs[0], 2)?,
                        self.load_unblended(load_addrs[1], 2)?,
                    ];
                    let skin = SkinAttributes::two_way(joints, weights);
                    self.store(blend_store_addr, skin, "blend")?;
                    skin
                }
                MobyVertex::ThreeWay {
                    load_addrs,
                    weights,
                    blend_store_addr,
                    ..
                } => {
                    let joints = [
                        self.load_unblended(load_addrs[0], 3)?,
                        self.load_unblended(load_addrs[1], 3)?,
                        self.load_unblended(load_addrs[2], 3)?,
                    ];
                    let skin = SkinAttributes::three_way(joints, weights);
                    self.store(blend_store_addr, skin, "blend")?;
                    skin
                }
                MobyVertex::Regular {
                    transfer_joint,
                    load_addr,
                    transfer_store_addr,
                    ..
                } => {
                    self.store(
                        transfer_store_addr,
                        SkinAttributes::single(transfer_joint as i8),
                        "transfer",
                    )?;
                    if load_addr == transfer_store_addr {
                        return Err(SkinError::LoadStoreConflict(transfer_store_addr));
                    }
                    self.load(load_addr)?
                }
                MobyVertex::Trailing { .. } => continue,
            };
            skins.push(skin);
        }
        Ok(skins)
    }
}

/// New position of each vertex record once the first-use blends are merged
/// in the order their blend slots were handed out
fn blend_first_order(table: &VertexTable) -> Vec<usize> {
    let two_way_end = table.two_way_blend_vertex_count.min(table.vertices.len());
    let three_way_end = (two_way_end + table.three_way_blend_vertex_count).min(table.vertices.len());
    let blend_addr = |record: &MobyVertex| match *record {
        MobyVertex::TwoWay {
            blend_store_addr, ..
        }
        | MobyVertex::ThreeWay {
            blend_store_addr, ..
        } => blend_store_addr,
        _ => DONT_CARE_ADDR,
    };

    let mut mapping: Vec<usize> = (0..table.vertices.len()).collect();
    let mut two = 0;
    let mut three = two_way_end;
    let mut next = 0;
    while two < two_way_end && three < three_way_end {
        let two_addr = blend_addr(&table.vertices[two]);
        let three_addr = blend_addr(&table.vertices[three]);
        if (two_addr <= three_addr && three_addr != DONT_CARE_ADDR) || two_addr == DONT_CARE_ADDR {
            mapping[two] = next;
            two += 1;
        } else {
            mapping[three] = next;
            three += 1;
        }
        next += 1;
    }
    for slot in &mut mapping[two..two_way_end] {
        *slot = next;
        next += 1;
    }
    for slot in &mut mapping[three..three_way_end] {
        *slot = next;
        next += 1;
    }
    mapping
}

/// Decode `count` submeshes whose table sits at `table_offset` in the class
///
/// Offsets in the table are relative to the start of `bytes`. `joint_count`
/// of zero marks an unanimated class.
pub fn decode(
    bytes: &[u8],
    table_offset: usize,
    count: usize,
    scale: f32,
    joint_count: u32,
    format: MobyFormat,
) -> Result<DecodedClass, ClassError> {
    let table_bytes = count
        .checked_mul(SubmeshEntry::SIZE)
        .and_then(|size| slice_at(bytes, table_offset, size, "submesh table").ok())
        .ok_or(ClassError::TableOutOfBounds {
            offset: table_offset,
            count,
        })?;

    let mut ctx = DecodeContext::new(scale, joint_count, format);
    let mut class = DecodedClass::default();
    for (smi, chunk) in table_bytes.chunks_exact(SubmeshEntry::SIZE).enumerate() {
        let entry = SubmeshEntry::from_bytes(chunk).ok_or(ClassError::TableOutOfBounds {
            offset: table_offset,
            count,
        })?;
        match ctx.decode_submesh(bytes, &entry, smi) {
            Ok(submesh) => class.submeshes.push(submesh),
            Err(DecodeError::Submesh(error)) => {
                let diagnostic = Diagnostic {
                    submesh: smi,
                    error,
                };
                tracing::warn!("{}", diagnostic);
                class.diagnostics.push(diagnostic);
                class.submeshes.push(SubMesh::default());
            }
            Err(DecodeError::Class(error)) => return Err(error),
        }
    }

    tracing::debug!(
        "Decoded {} submeshes ({} with errors)",
        class.submeshes.len(),
        class.diagnostics.len()
    );
    Ok(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{CommonAttributes, MatrixTransfer};

    fn two_way(blend_store_addr: u8) -> MobyVertex {
        MobyVertex::TwoWay {
            vertex_index: 0,
            transfer_joint: 0,
            load_addrs: [0, 4],
            weights: [128, 127],
            transfer_store_addr: DONT_CARE_ADDR,
            blend_store_addr,
            attributes: CommonAttributes::default(),
        }
    }

    fn three_way(blend_store_addr: u8) -> MobyVertex {
        MobyVertex::ThreeWay {
            vertex_index: 0,
            load_addrs: [0, 4, 8],
            weights: [85, 85, 85],
            blend_store_addr,
            attributes: CommonAttributes::default(),
        }
    }

    fn regular(load_addr: u8, transfer_joint: u8, transfer_store_addr: u8) -> MobyVertex {
        MobyVertex::Regular {
            vertex_index: 0,
            transfer_joint,
            load_addr,
            transfer_store_addr,
            attributes: CommonAttributes::default(),
        }
    }

    fn table(
        preloop: &[MatrixTransfer],
        two: usize,
        three: usize,
        vertices: Vec<MobyVertex>,
    ) -> VertexTable {
        VertexTable {
            preloop_matrix_transfers: preloop.to_vec(),
            two_way_blend_vertex_count: two,
            three_way_blend_vertex_count: three,
            main_vertex_count: vertices.len() - two - three,
            vertices,
            ..Default::default()
        }
    }

    const JOINTS: [MatrixTransfer; 3] = [
        MatrixTransfer::new(7, 0),
        MatrixTransfer::new(8, 4),
        MatrixTransfer::new(9, 8),
    ];

    #[test]
    fn test_replay_blends_and_reuse() {
        let mut ctx = DecodeContext::new(1.0, 10, MobyFormat::Rac2);
        let t = table(&JOINTS, 1, 0, vec![two_way(0x20), regular(0x20, 0, DONT_CARE_ADDR)]);
        let skins = ctx.replay_skins(&t).unwrap();
        let blended = SkinAttributes::two_way([7, 8], [128, 127]);
        assert_eq!(skins, vec![blended, blended]);
        assert_eq!(ctx.matrix_at(0x20), Some(blended));

        // The blended matrix is still there in the next submesh.
        let t = table(&[], 0, 0, vec![regular(0x20, 0, DONT_CARE_ADDR)]);
        assert_eq!(ctx.replay_skins(&t).unwrap(), vec![blended]);
    }

    #[test]
    fn test_unanimated_identity_transfer() {
        let mut ctx = DecodeContext::new(1.0, 0, MobyFormat::Rac2);
        let t = table(&[MatrixTransfer::new(0, 0)], 0, 0, vec![regular(0, 0, DONT_CARE_ADDR)]);
        assert_eq!(ctx.replay_skins(&t).unwrap(), vec![SkinAttributes::default()]);
    }

    #[test]
    fn test_embedded_transfer_feeds_later_vertex() {
        let mut ctx = DecodeContext::new(1.0, 10, MobyFormat::Rac2);
        let t = table(&JOINTS[..1], 0, 0, vec![regular(0, 5, 0x10), regular(0x10, 0, DONT_CARE_ADDR)]);
        let skins = ctx.replay_skins(&t).unwrap();
        assert_eq!(skins[1], SkinAttributes::single(5));
    }

    #[test]
    fn test_replay_errors() {
        let mut ctx = DecodeContext::new(1.0, 10, MobyFormat::Rac2);
        let t = table(&[], 0, 0, vec![regular(0x10, 0, DONT_CARE_ADDR)]);
        assert_eq!(ctx.replay_skins(&t), Err(SkinError::Uninitialised(0x10)));

        let t = table(&[MatrixTransfer::new(1, 2)], 0, 0, vec![]);
        assert_eq!(
            ctx.replay_skins(&t),
            Err(SkinError::Unaligned {
                op: "pre-loop transfer",
                addr: 2
            })
        );

        let t = table(&JOINTS, 0, 0, vec![regular(4, 1, 4)]);
        assert_eq!(ctx.replay_skins(&t), Err(SkinError::LoadStoreConflict(4)));

        let mut ctx = DecodeContext::new(1.0, 10, MobyFormat::Rac2);
        let t = table(&JOINTS[..2], 1, 1, vec![two_way(0x8), three_way(DONT_CARE_ADDR)]);
        assert_eq!(ctx.replay_skins(&t), Err(SkinError::AlreadyBlended(3)));
    }

    #[test]
    fn test_blend_first_order() {
        let t = table(
            &[],
            2,
            2,
            vec![
                two_way(0x10),
                two_way(DONT_CARE_ADDR),
                three_way(0x0c),
                three_way(0x14),
                regular(0, 0, DONT_CARE_ADDR),
            ],
        );
        // 0x0c (three) < 0x10 (two), then 0x10, then the don't-care two-way
        // goes before 0x14.
        assert_eq!(blend_first_order(&t), vec![1, 2, 0, 3, 4]);
    }

    #[test]
    fn test_table_out_of_bounds() {
        assert_eq!(
            decode(&[0; 0x20], 0x10, 2, 1.0, 1, MobyFormat::Rac2),
            Err(ClassError::TableOutOfBounds {
                offset: 0x10,
                count: 2
            })
        );
        assert_eq!(
            decode(&[], 0, 0, 1.0, 1, MobyFormat::Rac2),
            Ok(DecodedClass::default())
        );
    }

    #[test]
    fn test_bad_submesh_becomes_diagnostic() {
        // An entry pointing at an empty VIF list.
        let entry = SubmeshEntry {
            vif_list_offset: 0x10,
            vif_list_size: 1,
            ..Default::default()
        };
        let mut bytes = entry.to_bytes().to_vec();
        bytes.resize(0x20, 0);
        let class = decode(&bytes, 0, 1, 1.0, 1, MobyFormat::Rac2).unwrap();
        assert_eq!(class.submeshes, vec![SubMesh::default()]);
        assert_eq!(class.diagnostics.len(), 1);
        assert_eq!(
            class.diagnostics[0].error,
            SubmeshError::UnexpectedUnpack {
                expected: "V2_16",
                found: "nothing"
            }
        );
    }
}
