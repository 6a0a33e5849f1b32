//! Submesh table entries and the GIF usage table
//!
//! # Submesh entry layout (16 bytes)
//! ```text
//! 0x00: vif_list_offset u32           (relative to the class header)
//! 0x04: vif_list_size u16             (16-byte units)
//! 0x06: vif_list_texture_unpack_offset u16 (no texture unpack if zero)
//! 0x08: vertex_offset u32             (relative to the class header)
//! 0x0C: vertex_data_size u8           (header included, 16-byte units)
//! 0x0D: unknown_d u8                  ((0xF + transfer_vertex_count * 6) / 0x10)
//! 0x0E: unknown_e u8                  ((3 + transfer_vertex_count) / 4)
//! 0x0F: transfer_vertex_count u8      (vertices sent to VU1)
//! ```
//!
//! # GIF usage entry layout (16 bytes)
//! ```text
//! 0x00: texture_indices [u8; 12]      (unused entries are 0xFF)
//! 0x0C: offset_and_terminator u32     (high byte 0x80 on the last entry)
//! ```

use crate::error::SubmeshError;

/// One row of the submesh table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SubmeshEntry {
    pub vif_list_offset: u32,
    pub vif_list_size: u16,
    pub vif_list_texture_unpack_offset: u16,
    pub vertex_offset: u32,
    pub vertex_data_size: u8,
    pub unknown_d: u8,
    pub unknown_e: u8,
    pub transfer_vertex_count: u8,
}

impl SubmeshEntry {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.vif_list_offset.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.vif_list_size.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.vif_list_texture_unpack_offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.vertex_offset.to_le_bytes());
        bytes[12] = self.vertex_data_size;
        bytes[13] = self.unknown_d;
        bytes[14] = self.unknown_e;
        bytes[15] = self.transfer_vertex_count;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            vif_list_offset: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            vif_list_size: u16::from_le_bytes([bytes[4], bytes[5]]),
            vif_list_texture_unpack_offset: u16::from_le_bytes([bytes[6], bytes[7]]),
            vertex_offset: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            vertex_data_size: bytes[12],
            unknown_d: bytes[13],
            unknown_e: bytes[14],
            transfer_vertex_count: bytes[15],
        })
    }

    /// Value field 0xD must hold for a given transfer vertex count
    #[inline]
    pub fn expected_unknown_d(transfer_vertex_count: u32) -> u32 {
        (0xf + transfer_vertex_count * 6) / 0x10
    }

    /// Value field 0xE must hold for a given transfer vertex count
    #[inline]
    pub fn expected_unknown_e(transfer_vertex_count: u32) -> u32 {
        (3 + transfer_vertex_count) / 4
    }

    /// Fill in the transfer vertex count and the two fields derived from it
    pub fn set_transfer_vertex_count(&mut self, transfer_vertex_count: u8) {
        let count = transfer_vertex_count as u32;
        self.transfer_vertex_count = transfer_vertex_count;
        self.unknown_d = Self::expected_unknown_d(count) as u8;
        self.unknown_e = Self::expected_unknown_e(count) as u8;
    }

    /// Recompute the redundant fields and compare
    pub fn check_derived_fields(&self) -> Result<(), SubmeshError> {
        let count = self.transfer_vertex_count as u32;
        let expected_d = Self::expected_unknown_d(count);
        if self.unknown_d as u32 != expected_d {
            return Err(SubmeshError::EntryField {
                field: "unknown_d",
                found: self.unknown_d as u32,
                expected: expected_d,
            });
        }
        let expected_e = Self::expected_unknown_e(count);
        if self.unknown_e as u32 != expected_e {
            return Err(SubmeshError::EntryField {
                field: "unknown_e",
                found: self.unknown_e as u32,
                expected: expected_e,
            });
        }
        Ok(())
    }
}

// ============================================================================
// GIF Usage Table
// ============================================================================

/// High byte value marking the last entry of a GIF usage table
pub const GIF_USAGE_TERMINATOR: u32 = 0x8000_0000;

/// Number of texture slots in a GIF usage entry
pub const GIF_USAGE_TEXTURE_SLOTS: usize = 12;

/// Records which textures a textured submesh's texture unpack binds, so the
/// game can patch GS addresses at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GifUsageEntry {
    pub texture_indices: [u8; GIF_USAGE_TEXTURE_SLOTS],
    pub offset_and_terminator: u32,
}

impl Default for GifUsageEntry {
    fn default() -> Self {
        Self {
            texture_indices: [0xff; GIF_USAGE_TEXTURE_SLOTS],
            offset_and_terminator: 0,
        }
    }
}

impl GifUsageEntry {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..12].copy_from_slice(&self.texture_indices);
        bytes[12..16].copy_from_slice(&self.offset_and_terminator.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let mut texture_indices = [0u8; GIF_USAGE_TEXTURE_SLOTS];
        texture_indices.copy_from_slice(&bytes[0..12]);
        Some(Self {
            texture_indices,
            offset_and_terminator: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        })
    }

    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset_and_terminator & !GIF_USAGE_TERMINATOR
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.offset_and_terminator & GIF_USAGE_TERMINATOR != 0
    }
}

/// Serialize a GIF usage table, marking the last entry
pub fn write_gif_usage_table(entries: &[GifUsageEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * GifUsageEntry::SIZE);
    for (i, entry) in entries.iter().enumerate() {
        let mut entry = *entry;
        if i + 1 == entries.len() {
            entry.offset_and_terminator |= GIF_USAGE_TERMINATOR;
        }
        out.extend_from_slice(&entry.to_bytes());
    }
    out
}

/// Parse a GIF usage table up to and including its terminated entry
pub fn read_gif_usage_table(bytes: &[u8]) -> Vec<GifUsageEntry> {
    let mut entries = Vec::new();
    for chunk in bytes.chunks_exact(GifUsageEntry::SIZE) {
        let Some(entry) = GifUsageEntry::from_bytes(chunk) else {
            break;
        };
        entries.push(entry);
        if entry.is_last() {
            break;
        }
    }
    entries
}
