//! VIF command lists of a submesh
//!
//! A regular submesh uploads three arrays to VU1 memory:
//!
//! ```text
//! UNPACK V2_16 (masked) -> 0x0C2   texture coordinates, 4 bytes per vertex
//! UNPACK V4_8           -> 0x12D   index header + index bytes
//! UNPACK V4_32          -> 0x12D + index quadwords (only if textured)
//!                                  64-byte texture primitives
//! ```
//!
//! Metal submeshes skip the texture coordinate unpack. The index and
//! texture unpacks are shared by both kinds.
//!
//! # Index header (4 bytes)
//! ```text
//! 0x0: unknown_0 u8
//! 0x1: texture_unpack_offset_quadwords u8 (index buffer size / 4, if textured)
//! 0x2: secret_index u8                    (first secret index)
//! 0x3: pad u8                             (always zero)
//! ```
//!
//! The remaining secret indices live in the last word of the first few
//! quadwords of the texture unpack: secret index `k` (from 1) sits at
//! `(k - 1) * 0x10 + 0xC`.

use byteorder::{ByteOrder, LittleEndian};
use ps2_vif::{VifCode, VifFlg, VifPacket, VifUnpack, VifUsn, VifVnVl, write_unpack_packet};

use super::entry::{GIF_USAGE_TEXTURE_SLOTS, GifUsageEntry};
use super::pad;
use crate::error::{ClassError, SubmeshError};
use crate::model::{GsAdData, IndexStream, TexCoord, TexturePrimitive};

/// VU1 quadword address of the texture coordinate unpack
pub const ST_UNPACK_ADDR: u16 = 0xc2;

/// VU1 quadword address of the index unpack
pub const INDEX_UNPACK_ADDR: u16 = 0x12d;

/// Size of a packed texture primitive
pub const TEXTURE_PRIMITIVE_SIZE: usize = 0x40;

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexHeader {
    pub unknown_0: u8,
    pub texture_unpack_offset_quadwords: u8,
    pub secret_index: u8,
    pub pad: u8,
}

impl IndexHeader {
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [
            self.unknown_0,
            self.texture_unpack_offset_quadwords,
            self.secret_index,
            self.pad,
        ]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match *bytes {
            [unknown_0, texture_unpack_offset_quadwords, secret_index, pad, ..] => Some(Self {
                unknown_0,
                texture_unpack_offset_quadwords,
                secret_index,
                pad,
            }),
            _ => None,
        }
    }
}

impl GsAdData {
    pub const SIZE: usize = 0x10;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        LittleEndian::write_i32(&mut bytes[0..4], self.data_lo);
        LittleEndian::write_i32(&mut bytes[4..8], self.data_hi);
        bytes[8] = self.address;
        bytes[9] = self.pad_9;
        LittleEndian::write_u16(&mut bytes[10..12], self.pad_a);
        LittleEndian::write_u32(&mut bytes[12..16], self.super_secret_index);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        Some(Self {
            data_lo: LittleEndian::read_i32(&bytes[0..4]),
            data_hi: LittleEndian::read_i32(&bytes[4..8]),
            address: bytes[8],
            pad_9: bytes[9],
            pad_a: LittleEndian::read_u16(&bytes[10..12]),
            super_secret_index: LittleEndian::read_u32(&bytes[12..16]),
        })
    }
}

impl TexturePrimitive {
    pub const SIZE: usize = TEXTURE_PRIMITIVE_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let records = [self.d1_xyzf2, self.d2_clamp, self.d3_tex0, self.d4_xyzf2];
        for (chunk, record) in bytes.chunks_exact_mut(GsAdData::SIZE).zip(records) {
            chunk.copy_from_slice(&record.to_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            d1_xyzf2: GsAdData::from_bytes(bytes.get(0x00..)?)?,
            d2_clamp: GsAdData::from_bytes(bytes.get(0x10..)?)?,
            d3_tex0: GsAdData::from_bytes(bytes.get(0x20..)?)?,
            d4_xyzf2: GsAdData::from_bytes(bytes.get(0x30..)?)?,
        })
    }
}

// ============================================================================
// Writing
// ============================================================================

fn unpack_code(vnvl: VifVnVl, addr: u16, mask: bool, num: u16) -> VifCode {
    VifCode::unpack(
        VifUnpack {
            vnvl,
            flg: VifFlg::UseTops,
            usn: VifUsn::Signed,
            addr,
            mask,
        },
        num,
    )
}

/// Append the texture coordinate unpack
pub fn write_st_unpack(dest: &mut Vec<u8>, sts: &[TexCoord], submesh: usize) -> Result<(), ClassError> {
    if sts.is_empty() || sts.len() > 256 {
        return Err(ClassError::Overflow {
            submesh,
            field: "texture coordinate count",
            value: sts.len(),
        });
    }
    let mut data = Vec::with_capacity(sts.len() * 4);
    for st in sts {
        data.extend_from_slice(&st.s.to_le_bytes());
        data.extend_from_slice(&st.t.to_le_bytes());
    }
    let code = unpack_code(VifVnVl::V2_16, ST_UNPACK_ADDR, true, sts.len() as u16);
    write_unpack_packet(dest, &code, &data);
    Ok(())
}

/// What [`write_shared_unpacks`] reports back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SharedUnpacks {
    /// Distance from the texture unpack's code word to the end of the list,
    /// in quadwords. Zero when untextured.
    pub texture_unpack_offset: u16,
    /// GIF usage record for textured submeshes
    pub gif_usage: Option<GifUsageEntry>,
}

/// Append the index unpack and, if textured, the texture unpack
///
/// `base_offset` is the class-relative offset of `dest[0]`; it only feeds
/// the GIF usage record.
pub fn write_shared_unpacks(
    dest: &mut Vec<u8>,
    stream: &IndexStream,
    base_offset: usize,
    submesh: usize,
) -> Result<SharedUnpacks, ClassError> {
    let textured = !stream.textures.is_empty();
    if textured && stream.secret_indices.len() < stream.textures.len() {
        return Err(ClassError::BadSubmesh {
            submesh,
            reason: "fewer secret indices than texture primitives",
        });
    }
    if stream.textures.len() > GIF_USAGE_TEXTURE_SLOTS {
        return Err(ClassError::Overflow {
            submesh,
            field: "texture count",
            value: stream.textures.len(),
        });
    }

    let mut index_data = vec![0u8; IndexHeader::SIZE];
    index_data.extend_from_slice(&stream.indices);
    pad(&mut index_data, 4);
    let index_quadwords = index_data.len() / 4;
    if index_quadwords > 256 {
        return Err(ClassError::Overflow {
            submesh,
            field: "index buffer size",
            value: stream.indices.len(),
        });
    }
    let header = IndexHeader {
        unknown_0: stream.header_first_byte,
        texture_unpack_offset_quadwords: if textured { index_quadwords as u8 } else { 0 },
        secret_index: stream.secret_indices.first().copied().unwrap_or(0),
        pad: 0,
    };
    index_data[..IndexHeader::SIZE].copy_from_slice(&header.to_bytes());
    let index_code = unpack_code(VifVnVl::V4_8, INDEX_UNPACK_ADDR, false, index_quadwords as u16);
    write_unpack_packet(dest, &index_code, &index_data);

    if !textured {
        return Ok(SharedUnpacks::default());
    }

    while dest.len() % 0x10 != 0xc {
        dest.push(0);
    }

    let mut texture_data = Vec::with_capacity(stream.textures.len() * TEXTURE_PRIMITIVE_SIZE);
    for primitive in &stream.textures {
        texture_data.extend_from_slice(&primitive.to_bytes());
    }
    for (k, &secret) in stream.secret_indices.iter().enumerate().skip(1) {
        let ofs = (k - 1) * 0x10 + 0xc;
        if let Some(word) = texture_data.get_mut(ofs..ofs + 4) {
            LittleEndian::write_u32(word, secret as u32);
        }
    }

    let texture_code = unpack_code(
        VifVnVl::V4_32,
        INDEX_UNPACK_ADDR + index_quadwords as u16,
        false,
        (stream.textures.len() * 4) as u16,
    );
    let abs_texture_unpack_ofs = dest.len();
    write_unpack_packet(dest, &texture_code, &texture_data);

    let mut gif_usage = GifUsageEntry {
        offset_and_terminator: (base_offset + abs_texture_unpack_ofs - 0xc) as u32,
        ..Default::default()
    };
    for (slot, primitive) in gif_usage.texture_indices.iter_mut().zip(&stream.textures) {
        *slot = primitive.texture_id() as u8;
    }

    pad(dest, 0x10);
    Ok(SharedUnpacks {
        texture_unpack_offset: ((dest.len() - abs_texture_unpack_ofs + 4) / 0x10) as u16,
        gif_usage: Some(gif_usage),
    })
}

// ============================================================================
// Reading
// ============================================================================

fn expect_unpack<'a>(
    packet: Option<&VifPacket<'a>>,
    vnvl: VifVnVl,
) -> Result<&'a [u8], SubmeshError> {
    let expected = vnvl.name();
    let packet = packet.ok_or(SubmeshError::UnexpectedUnpack {
        expected,
        found: "nothing",
    })?;
    match packet.code.as_unpack() {
        Some(unpack) if unpack.vnvl == vnvl => Ok(packet.data),
        Some(unpack) => Err(SubmeshError::UnexpectedUnpack {
            expected,
            found: unpack.vnvl.name(),
        }),
        None => Err(SubmeshError::UnexpectedUnpack {
            expected,
            found: "non-unpack command",
        }),
    }
}

/// Parse the texture coordinate unpack
pub fn read_st_unpack(packet: Option<&VifPacket<'_>>) -> Result<Vec<TexCoord>, SubmeshError> {
    let data = expect_unpack(packet, VifVnVl::V2_16)?;
    Ok(data
        .chunks_exact(4)
        .map(|chunk| {
            TexCoord::new(
                LittleEndian::read_i16(&chunk[0..2]),
                LittleEndian::read_i16(&chunk[2..4]),
            )
        })
        .collect())
}

/// Parse the index unpack and the optional texture unpack after it
///
/// `valid_texture` decides which raw texture ids this kind of submesh may
/// bind.
pub fn read_shared_unpacks(
    unpacks: &[VifPacket<'_>],
    valid_texture: impl Fn(i32) -> bool,
) -> Result<IndexStream, SubmeshError> {
    let index_data = expect_unpack(unpacks.first(), VifVnVl::V4_8)?;
    let header = IndexHeader::from_bytes(index_data).ok_or(SubmeshError::Truncated {
        what: "index unpack header",
        offset: 0,
    })?;
    if header.pad != 0 {
        return Err(SubmeshError::IndexHeaderPadding);
    }

    let mut stream = IndexStream {
        indices: index_data[IndexHeader::SIZE..].to_vec(),
        secret_indices: vec![header.secret_index],
        textures: Vec::new(),
        header_first_byte: header.unknown_0,
    };

    if let Some(packet) = unpacks.get(1) {
        let texture_data = expect_unpack(Some(packet), VifVnVl::V4_32)?;
        if texture_data.len() % TEXTURE_PRIMITIVE_SIZE != 0 {
            return Err(SubmeshError::TextureUnpackSize(texture_data.len()));
        }
        let primitive_count = texture_data.len() / TEXTURE_PRIMITIVE_SIZE;
        // Secret indices overlay the primitive records.
        let mut texture_data = texture_data.to_vec();
        for i in 0..primitive_count {
            let word = &mut texture_data[i * 0x10 + 0xc..i * 0x10 + 0x10];
            stream.secret_indices.push(word[0]);
            word.fill(0);
        }
        for (i, chunk) in texture_data.chunks_exact(TEXTURE_PRIMITIVE_SIZE).enumerate() {
            let primitive = TexturePrimitive::from_bytes(chunk).ok_or(SubmeshError::Truncated {
                what: "texture primitive",
                offset: i * TEXTURE_PRIMITIVE_SIZE,
            })?;
            if !valid_texture(primitive.texture_id()) {
                return Err(SubmeshError::TextureId(primitive.texture_id()));
            }
            stream.textures.push(primitive);
        }
    }

    Ok(stream)
}
