//! Packed on-disk layout of skinned moby submeshes
//!
//! A class stores its submeshes as a table of [`SubmeshEntry`] records, each
//! pointing at a VIF command list (texture coordinates, indices, texture
//! primitives) and a vertex table (matrix transfers, duplicates, packed
//! vertices). Offsets in the table are relative to the class header.
//!
//! Everything here is plain layout: which matrix a vertex loads, and where
//! the vertex lands in the intermediate buffer, is decided in
//! [`crate::skinning`].

mod entry;
mod packet;
mod serialization;
mod vertex;
mod vertex_table;

pub use entry::{
    GIF_USAGE_TERMINATOR, GIF_USAGE_TEXTURE_SLOTS, GifUsageEntry, SubmeshEntry,
    read_gif_usage_table, write_gif_usage_table,
};
pub use packet::{
    INDEX_UNPACK_ADDR, IndexHeader, ST_UNPACK_ADDR, SharedUnpacks, TEXTURE_PRIMITIVE_SIZE,
    read_shared_unpacks, read_st_unpack, write_shared_unpacks, write_st_unpack,
};
pub use serialization::{BinarySerializable, read_records};
pub use vertex::{
    CommonAttributes, LOW_HALFWORD_HIGH_SHIFT, MOBY_VERTEX_SIZE, MobyVertex, VERTEX_INDEX_MASK,
    VertexKind,
};
pub use vertex_table::{
    DUPLICATE_VERTEX_SHIFT, MatrixTransfer, MetalVertex, MetalVertexTable, MetalVertexTableHeader,
    VERTEX_INDEX_DELAY, VertexTable, VertexTableHeader,
};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::SubmeshError;

/// Zero-fill `dest` up to a multiple of `align`
#[inline]
pub fn pad(dest: &mut Vec<u8>, align: usize) {
    let len = dest.len().next_multiple_of(align);
    dest.resize(len, 0);
}

/// Borrow `len` bytes at `offset`, or report what was being read
pub(crate) fn slice_at<'a>(
    src: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], SubmeshError> {
    offset
        .checked_add(len)
        .and_then(|end| src.get(offset..end))
        .ok_or(SubmeshError::Truncated { what, offset })
}

pub(crate) fn read_u16_array(
    src: &[u8],
    offset: usize,
    count: usize,
    what: &'static str,
) -> Result<Vec<u16>, SubmeshError> {
    let bytes = slice_at(src, offset, count * 2, what)?;
    let mut out = vec![0u16; count];
    LittleEndian::read_u16_into(bytes, &mut out);
    Ok(out)
}
