//! Vertex table: header, matrix transfers, duplicates and packed vertices
//!
//! # Layout
//! ```text
//! header                   (32 bytes RAC1, 16 bytes otherwise)
//! preloop matrix transfers (2 bytes each)
//! padding to 8
//! duplicate vertices       (u16 each, intermediate slot << 7)
//! padding to 16            <- vertex_table_offset points past this
//! two-way vertices
//! three-way vertices
//! regular vertices
//! trailing vertices        (1 to 4 records, see below)
//! unknown_e data           (RAC1 only, header.unknown_e points here)
//! ```
//!
//! The vertex index stored in each record belongs to the vertex seven
//! records earlier, a side effect of the microprogram's pipelining. The
//! first seven records carry zero; the last seven indices go into the
//! trailing records, first into padding records until the record count is
//! `2 mod 4`, then into one final record which holds the remainder in its
//! `vertex_indices` array.

mod metal;


pub use metal::{MetalVertex, MetalVertexTable, MetalVertexTableHeader};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytemuck::{Pod, Zeroable};
use std::io::Cursor;

use super::entry::SubmeshEntry;
use super::vertex::{MOBY_VERTEX_SIZE, MobyVertex, VERTEX_INDEX_MASK, VertexKind};
use super::{pad, read_u16_array, slice_at};
use crate::config::MobyFormat;
use crate::error::SubmeshError;

/// Records affected by the index delay
pub const VERTEX_INDEX_DELAY: usize = 7;

/// Duplicate vertex slots are stored shifted left by this much
pub const DUPLICATE_VERTEX_SHIFT: u32 = 7;

// ============================================================================
// Header
// ============================================================================

/// Vertex table header
///
/// Held in its widest form. RAC1 stores every field as u32; later games use
/// the compact form with u16 fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VertexTableHeader {
    pub matrix_transfer_count: u32,
    pub two_way_blend_vertex_count: u32,
    pub three_way_blend_vertex_count: u32,
    pub main_vertex_count: u32,
    pub duplicate_vertex_count: u32,
    /// Sum of the four vertex counts above
    pub transfer_vertex_count: u32,
    /// Offset of the first vertex from the start of the header
    pub vertex_table_offset: u32,
    /// RAC1: offset of the trailing opaque data. Otherwise opaque.
    pub unknown_e: u32,
}

impl VertexTableHeader {
    pub const SIZE: usize = 32;
    pub const COMPACT_SIZE: usize = 16;

    pub fn size_for(format: MobyFormat) -> usize {
        if format.has_compact_header() {
            Self::COMPACT_SIZE
        } else {
            Self::SIZE
        }
    }

    fn fields(&self) -> [u32; 8] {
        [
            self.matrix_transfer_count,
            self.two_way_blend_vertex_count,
            self.three_way_blend_vertex_count,
            self.main_vertex_count,
            self.duplicate_vertex_count,
            self.transfer_vertex_count,
            self.vertex_table_offset,
            self.unknown_e,
        ]
    }

    fn from_fields(f: [u32; 8]) -> Self {
        Self {
            matrix_transfer_count: f[0],
            two_way_blend_vertex_count: f[1],
            three_way_blend_vertex_count: f[2],
            main_vertex_count: f[3],
            duplicate_vertex_count: f[4],
            transfer_vertex_count: f[5],
            vertex_table_offset: f[6],
            unknown_e: f[7],
        }
    }

    /// Write the RAC1 form
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        for (chunk, value) in bytes.chunks_exact_mut(4).zip(self.fields()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Read the RAC1 form
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut fields = [0u32; 8];
        Cursor::new(bytes.get(..Self::SIZE)?)
            .read_u32_into::<LittleEndian>(&mut fields)
            .ok()?;
        Some(Self::from_fields(fields))
    }

    /// Write the compact form. Fields are truncated to 16 bits.
    pub fn to_compact_bytes(&self) -> [u8; Self::COMPACT_SIZE] {
        let mut bytes = [0u8; Self::COMPACT_SIZE];
        for (chunk, value) in bytes.chunks_exact_mut(2).zip(self.fields()) {
            chunk.copy_from_slice(&(value as u16).to_le_bytes());
        }
        bytes
    }

    pub fn from_compact_bytes(bytes: &[u8]) -> Option<Self> {
        let mut fields = [0u16; 8];
        Cursor::new(bytes.get(..Self::COMPACT_SIZE)?)
            .read_u16_into::<LittleEndian>(&mut fields)
            .ok()?;
        Some(Self::from_fields(fields.map(u32::from)))
    }

    pub fn read(bytes: &[u8], format: MobyFormat) -> Option<Self> {
        if format.has_compact_header() {
            Self::from_compact_bytes(bytes)
        } else {
            Self::from_bytes(bytes)
        }
    }

    /// Vertices stored before the trailing records
    pub fn in_file_vertex_count(&self) -> usize {
        self.two_way_blend_vertex_count as usize
            + self.three_way_blend_vertex_count as usize
            + self.main_vertex_count as usize
    }
}

// ============================================================================
// Matrix Transfers
// ============================================================================

/// Copy of one joint matrix from the scratchpad into VU0 memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct MatrixTransfer {
    pub spr_joint_index: u8,
    pub vu0_dest_addr: u8,
}

impl MatrixTransfer {
    pub const fn new(spr_joint_index: u8, vu0_dest_addr: u8) -> Self {
        Self {
            spr_joint_index,
            vu0_dest_addr,
        }
    }
}

// ============================================================================
// Vertex Table
// ============================================================================

/// Low-level contents of a submesh's vertex table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexTable {
    /// Transfers run before the vertex loop starts
    pub preloop_matrix_transfers: Vec<MatrixTransfer>,
    /// Intermediate buffer slots of vertices reused from earlier submeshes
    pub duplicate_vertices: Vec<u16>,
    pub two_way_blend_vertex_count: usize,
    pub three_way_blend_vertex_count: usize,
    pub main_vertex_count: usize,
    /// Real vertices with their own indices (the delay is applied on write
    /// and undone on read)
    pub vertices: Vec<MobyVertex>,
    pub unknown_e: u16,
    pub unknown_e_data: Vec<u8>,
}

impl VertexTable {
    /// Variant of the vertex at `index`, from the header counts
    pub fn kind_of(&self, index: usize) -> VertexKind {
        vertex_kind(
            index,
            self.two_way_blend_vertex_count,
            self.three_way_blend_vertex_count,
        )
    }

    /// Vertices whose matrix is loaded as is
    pub fn regular_vertices(&self) -> &[MobyVertex] {
        let begin = (self.two_way_blend_vertex_count + self.three_way_blend_vertex_count)
            .min(self.vertices.len());
        &self.vertices[begin..]
    }

    /// Transfer vertex count: stored plus duplicate vertices
    pub fn transfer_vertex_count(&self) -> usize {
        self.vertices.len() + self.duplicate_vertices.len()
    }

    /// Append the table to `dest`. Returns the transfer vertex count.
    pub fn write(&self, dest: &mut Vec<u8>, format: MobyFormat) -> u32 {
        let header_ofs = dest.len();
        dest.resize(header_ofs + VertexTableHeader::size_for(format), 0);

        let mut header = VertexTableHeader {
            matrix_transfer_count: self.preloop_matrix_transfers.len() as u32,
            two_way_blend_vertex_count: self.two_way_blend_vertex_count as u32,
            three_way_blend_vertex_count: self.three_way_blend_vertex_count as u32,
            main_vertex_count: self.main_vertex_count as u32,
            duplicate_vertex_count: self.duplicate_vertices.len() as u32,
            ..Default::default()
        };

        dest.extend_from_slice(bytemuck::cast_slice(&self.preloop_matrix_transfers));
        pad(dest, 0x8);
        for &dupe in &self.duplicate_vertices {
            // Writes into a Vec cannot fail.
            let _ = dest.write_u16::<LittleEndian>(dupe << DUPLICATE_VERTEX_SHIFT);
        }
        pad(dest, 0x10);
        header.vertex_table_offset = (dest.len() - header_ofs) as u32;

        for record in delay_vertex_indices(&self.vertices) {
            dest.extend_from_slice(&record.pack());
        }

        header.transfer_vertex_count = self.transfer_vertex_count() as u32;
        header.unknown_e = self.unknown_e as u32;

        let header_bytes = if format.has_compact_header() {
            header.to_compact_bytes().to_vec()
        } else {
            header.unknown_e = (dest.len() - header_ofs) as u32;
            dest.extend_from_slice(&self.unknown_e_data);
            header.to_bytes().to_vec()
        };
        dest[header_ofs..header_ofs + header_bytes.len()].copy_from_slice(&header_bytes);

        header.transfer_vertex_count
    }

    /// Read the vertex table an entry points at
    pub fn read(src: &[u8], entry: &SubmeshEntry, format: MobyFormat) -> Result<Self, SubmeshError> {
        let header_ofs = entry.vertex_offset as usize;
        let header_bytes = slice_at(
            src,
            header_ofs,
            VertexTableHeader::size_for(format),
            "vertex table header",
        )?;
        let header = VertexTableHeader::read(header_bytes, format).ok_or(SubmeshError::Truncated {
            what: "vertex table header",
            offset: header_ofs,
        })?;

        let data_size = entry.vertex_data_size as usize;
        let table_ofs = header.vertex_table_offset as usize;
        if table_ofs / 0x10 > data_size {
            return Err(SubmeshError::VertexTableOffset {
                offset: table_ofs,
                size: data_size * 0x10,
            });
        }
        if entry.transfer_vertex_count as u32 != header.transfer_vertex_count {
            tracing::warn!(
                "Conflicting vertex counts: submesh entry says {}, vertex table says {}",
                entry.transfer_vertex_count,
                header.transfer_vertex_count
            );
        }
        entry.check_derived_fields()?;

        let mut array_ofs = header_ofs + VertexTableHeader::size_for(format);
        let transfer_bytes = slice_at(
            src,
            array_ofs,
            header.matrix_transfer_count as usize * 2,
            "matrix transfers",
        )?;
        let preloop_matrix_transfers: Vec<MatrixTransfer> =
            bytemuck::cast_slice(transfer_bytes).to_vec();
        array_ofs = (array_ofs + transfer_bytes.len()).next_multiple_of(8);

        let duplicate_vertices = read_u16_array(
            src,
            array_ofs,
            header.duplicate_vertex_count as usize,
            "duplicate vertices",
        )?
        .into_iter()
        .map(|dupe| dupe >> DUPLICATE_VERTEX_SHIFT)
        .collect();

        let two_way = header.two_way_blend_vertex_count as usize;
        let three_way = header.three_way_blend_vertex_count as usize;
        let vertex_count = header.in_file_vertex_count();
        let vertex_ofs = header_ofs + table_ofs;

        let trailing_end = if format.has_compact_header() {
            data_size as i64 * 0x10
        } else {
            header.unknown_e as i64
        };
        let trailing_count = (trailing_end - table_ofs as i64) / 0x10 - vertex_count as i64;
        if !(1..VERTEX_INDEX_DELAY as i64).contains(&trailing_count) {
            return Err(SubmeshError::TrailingVertices(trailing_count));
        }

        let records = slice_at(
            src,
            vertex_ofs,
            (vertex_count + trailing_count as usize) * MOBY_VERTEX_SIZE,
            "vertices",
        )?;
        let mut records = records
            .chunks_exact(MOBY_VERTEX_SIZE)
            .enumerate()
            .map(|(i, chunk)| {
                let mut raw = [0u8; MOBY_VERTEX_SIZE];
                raw.copy_from_slice(chunk);
                let kind = if i < vertex_count {
                    vertex_kind(i, two_way, three_way)
                } else {
                    VertexKind::Trailing
                };
                MobyVertex::unpack(&raw, kind)
            })
            .collect::<Vec<_>>();
        let trailing = records.split_off(vertex_count);
        let mut vertices = records;
        restore_vertex_indices(&mut vertices, &trailing);

        let mut unknown_e = header.unknown_e as u16;
        let mut unknown_e_data = Vec::new();
        if !format.has_compact_header() {
            let data_ofs = header.unknown_e as usize;
            let size = (data_size * 0x10).checked_sub(data_ofs).ok_or(
                SubmeshError::VertexTableOffset {
                    offset: data_ofs,
                    size: data_size * 0x10,
                },
            )?;
            unknown_e_data = slice_at(src, header_ofs + data_ofs, size, "unknown_e data")?.to_vec();
            unknown_e = 0;
        }

        Ok(Self {
            preloop_matrix_transfers,
            duplicate_vertices,
            two_way_blend_vertex_count: two_way,
            three_way_blend_vertex_count: three_way,
            main_vertex_count: header.main_vertex_count as usize,
            vertices,
            unknown_e,
            unknown_e_data,
        })
    }
}

#[inline]
fn vertex_kind(index: usize, two_way: usize, three_way: usize) -> VertexKind {
    if index < two_way {
        VertexKind::TwoWay
    } else if index < two_way + three_way {
        VertexKind::ThreeWay
    } else {
        VertexKind::Regular
    }
}

// ============================================================================
// Index Delay
// ============================================================================

/// Shift every vertex index seven records later and build the trailing
/// records holding the last seven
fn delay_vertex_indices(vertices: &[MobyVertex]) -> Vec<MobyVertex> {
    let n = vertices.len();

    let mut trailing_indices = vec![0u16; VERTEX_INDEX_DELAY.saturating_sub(n)];
    trailing_indices.extend(
        vertices[n.saturating_sub(VERTEX_INDEX_DELAY)..]
            .iter()
            .map(|vertex| vertex.vertex_index() & VERTEX_INDEX_MASK),
    );

    let mut records = vertices.to_vec();
    for i in (VERTEX_INDEX_DELAY..n).rev() {
        let index = records[i - VERTEX_INDEX_DELAY].vertex_index();
        records[i].set_vertex_index(index);
    }
    for record in records.iter_mut().take(VERTEX_INDEX_DELAY) {
        record.set_vertex_index(0);
    }

    let mut padding = 0;
    while (n + padding) % 4 != 2 {
        records.push(MobyVertex::Trailing {
            vertex_index: trailing_indices[padding],
            vertex_indices: [0; 6],
        });
        padding += 1;
    }
    let mut vertex_indices = [0u16; 6];
    for (slot, &index) in vertex_indices
        .iter_mut()
        .zip(&trailing_indices[padding + 1..])
    {
        *slot = index;
    }
    records.push(MobyVertex::Trailing {
        vertex_index: trailing_indices[padding],
        vertex_indices,
    });
    records
}

/// Undo [`delay_vertex_indices`]
fn restore_vertex_indices(vertices: &mut [MobyVertex], trailing: &[MobyVertex]) {
    let n = vertices.len();
    for i in VERTEX_INDEX_DELAY..n {
        let index = vertices[i].vertex_index();
        vertices[i - VERTEX_INDEX_DELAY].set_vertex_index(index);
    }

    let Some((last, padding)) = trailing.split_last() else {
        return;
    };
    let last_indices = match last {
        MobyVertex::Trailing { vertex_indices, .. } => *vertex_indices,
        _ => [0; 6],
    };
    for k in 0..VERTEX_INDEX_DELAY {
        let Some(dest) = (n + k).checked_sub(VERTEX_INDEX_DELAY) else {
            continue;
        };
        let index = match k.cmp(&padding.len()) {
            std::cmp::Ordering::Less => padding[k].vertex_index(),
            std::cmp::Ordering::Equal => last.vertex_index(),
            std::cmp::Ordering::Greater => last_indices[k - padding.len() - 1],
        };
        vertices[dest].set_vertex_index(index & VERTEX_INDEX_MASK);
    }
}
