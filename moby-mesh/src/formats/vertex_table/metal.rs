//! Vertex table of the chrome/glass pass
//!
//! ```text
//! 0x00: vertex_count i32
//! 0x04: unknown_4 i32
//! 0x08: unknown_8 i32
//! 0x0C: unknown_c i32
//! 0x10: vertices (16 bytes each: x, y, z i16 then 10 opaque bytes)
//! ```

use crate::error::SubmeshError;
use crate::formats::serialization::read_records;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetalVertexTableHeader {
    pub vertex_count: i32,
    pub unknown_4: i32,
    pub unknown_8: i32,
    pub unknown_c: i32,
}

impl MetalVertexTableHeader {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.vertex_count.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.unknown_4.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.unknown_8.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.unknown_c.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let word = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            vertex_count: word(0),
            unknown_4: word(4),
            unknown_8: word(8),
            unknown_c: word(12),
        })
    }
}

/// A metal pass vertex: position plus data the codec passes through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MetalVertex {
    pub position: [i16; 3],
    pub unknown: [u8; 10],
}

impl MetalVertex {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        for (chunk, value) in bytes[0..6].chunks_exact_mut(2).zip(self.position) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes[6..16].copy_from_slice(&self.unknown);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let mut unknown = [0u8; 10];
        unknown.copy_from_slice(&bytes[6..16]);
        Some(Self {
            position: [
                i16::from_le_bytes([bytes[0], bytes[1]]),
                i16::from_le_bytes([bytes[2], bytes[3]]),
                i16::from_le_bytes([bytes[4], bytes[5]]),
            ],
            unknown,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetalVertexTable {
    pub vertices: Vec<MetalVertex>,
    pub unknown_4: i32,
    pub unknown_8: i32,
    pub unknown_c: i32,
}

impl MetalVertexTable {
    /// Append the table to `dest`. Returns the vertex count.
    pub fn write(&self, dest: &mut Vec<u8>) -> usize {
        let header = MetalVertexTableHeader {
            vertex_count: self.vertices.len() as i32,
            unknown_4: self.unknown_4,
            unknown_8: self.unknown_8,
            unknown_c: self.unknown_c,
        };
        dest.extend_from_slice(&header.to_bytes());
        for vertex in &self.vertices {
            dest.extend_from_slice(&vertex.to_bytes());
        }
        self.vertices.len()
    }

    pub fn read(src: &[u8], header_offset: usize) -> Result<Self, SubmeshError> {
        let truncated = SubmeshError::Truncated {
            what: "metal vertex table",
            offset: header_offset,
        };
        let header = src
            .get(header_offset..)
            .and_then(MetalVertexTableHeader::from_bytes)
            .ok_or(truncated.clone())?;
        let count = usize::try_from(header.vertex_count).map_err(|_| truncated.clone())?;
        let vertices = read_records(src, header_offset + MetalVertexTableHeader::SIZE, count)
            .ok_or(truncated)?;
        Ok(Self {
            vertices,
            unknown_4: header.unknown_4,
            unknown_8: header.unknown_8,
            unknown_c: header.unknown_c,
        })
    }
}
