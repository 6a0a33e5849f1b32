//! Packed 16-byte vertex records
//!
//! What the first eight bytes mean depends on where the record sits in the
//! vertex table, so the record is modelled as a tagged variant and the caller
//! says which variant to decode.
//!
//! # Layout
//! ```text
//!            two-way           three-way          regular          trailing
//! 0x00 u16   index | joint<<9  index | (a3/2)<<9  index | joint<<9  index
//! 0x02 u8    load_addr_1       load_addr_1        load_addr        (unused)
//! 0x03 u8    load_addr_2       load_addr_2        transfer_store   (unused)
//! 0x04 u8    weight_1          weight_1           (unused)         vertex_indices[6]
//! 0x05 u8    weight_2          weight_2           (unused)           (u16 each,
//! 0x06 u8    transfer_store    weight_3           (unused)            through 0x0F)
//! 0x07 u8    blend_store       blend_store        (unused)
//! 0x08 i8    normal azimuth                                     |
//! 0x09 i8    normal elevation                                   |
//! 0x0A i16   x                                                  |
//! 0x0C i16   y                                                  |
//! 0x0E i16   z                                                  |
//! ```
//!
//! `index` is the 9-bit intermediate buffer slot. `joint` is the 7-bit
//! scratchpad joint index of a matrix transfer riding on the vertex.

use byteorder::{ByteOrder, LittleEndian};

/// Size of a packed vertex record
pub const MOBY_VERTEX_SIZE: usize = 16;

/// Mask of the vertex index inside the low halfword
pub const VERTEX_INDEX_MASK: u16 = 0x1ff;

/// Shift of the 7-bit field above the vertex index
pub const LOW_HALFWORD_HIGH_SHIFT: u32 = 9;

/// Normal and position, shared by every variant except the trailer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CommonAttributes {
    pub normal_azimuth: i8,
    pub normal_elevation: i8,
    pub position: [i16; 3],
}

impl CommonAttributes {
    fn write(&self, dest: &mut [u8; MOBY_VERTEX_SIZE]) {
        dest[8] = self.normal_azimuth as u8;
        dest[9] = self.normal_elevation as u8;
        LittleEndian::write_i16(&mut dest[10..12], self.position[0]);
        LittleEndian::write_i16(&mut dest[12..14], self.position[1]);
        LittleEndian::write_i16(&mut dest[14..16], self.position[2]);
    }

    fn read(src: &[u8; MOBY_VERTEX_SIZE]) -> Self {
        Self {
            normal_azimuth: src[8] as i8,
            normal_elevation: src[9] as i8,
            position: [
                LittleEndian::read_i16(&src[10..12]),
                LittleEndian::read_i16(&src[12..14]),
                LittleEndian::read_i16(&src[14..16]),
            ],
        }
    }
}

/// Which interpretation to apply to a raw record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexKind {
    TwoWay,
    ThreeWay,
    Regular,
    Trailing,
}

/// A packed vertex record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MobyVertex {
    /// Blends two transferred matrices; may also transfer one matrix
    TwoWay {
        vertex_index: u16,
        transfer_joint: u8,
        load_addrs: [u8; 2],
        weights: [u8; 2],
        transfer_store_addr: u8,
        blend_store_addr: u8,
        attributes: CommonAttributes,
    },
    /// Blends three transferred matrices. The third load address is stored
    /// halved in seven bits, so it must be even.
    ThreeWay {
        vertex_index: u16,
        load_addrs: [u8; 3],
        weights: [u8; 3],
        blend_store_addr: u8,
        attributes: CommonAttributes,
    },
    /// Uses one matrix as is; may also transfer one matrix. The load
    /// happens after the store.
    Regular {
        vertex_index: u16,
        transfer_joint: u8,
        load_addr: u8,
        transfer_store_addr: u8,
        attributes: CommonAttributes,
    },
    /// Padding after the real vertices that carries leftover vertex indices
    Trailing {
        vertex_index: u16,
        vertex_indices: [u16; 6],
    },
}

impl MobyVertex {
    /// Decode a record as the given variant
    pub fn unpack(src: &[u8; MOBY_VERTEX_SIZE], kind: VertexKind) -> Self {
        let low = LittleEndian::read_u16(&src[0..2]);
        let vertex_index = low & VERTEX_INDEX_MASK;
        let high = (low >> LOW_HALFWORD_HIGH_SHIFT) as u8;
        match kind {
            VertexKind::TwoWay => Self::TwoWay {
                vertex_index,
                transfer_joint: high,
                load_addrs: [src[2], src[3]],
                weights: [src[4], src[5]],
                transfer_store_addr: src[6],
                blend_store_addr: src[7],
                attributes: CommonAttributes::read(src),
            },
            VertexKind::ThreeWay => Self::ThreeWay {
                vertex_index,
                load_addrs: [src[2], src[3], high.wrapping_mul(2)],
                weights: [src[4], src[5], src[6]],
                blend_store_addr: src[7],
                attributes: CommonAttributes::read(src),
            },
            VertexKind::Regular => Self::Regular {
                vertex_index,
                transfer_joint: high,
                load_addr: src[2],
                transfer_store_addr: src[3],
                attributes: CommonAttributes::read(src),
            },
            VertexKind::Trailing => {
                let mut vertex_indices = [0u16; 6];
                LittleEndian::read_u16_into(&src[4..16], &mut vertex_indices);
                Self::Trailing {
                    vertex_index: low,
                    vertex_indices,
                }
            }
        }
    }

    /// Encode to a record. Fields wider than their bit range are truncated.
    pub fn pack(&self) -> [u8; MOBY_VERTEX_SIZE] {
        let mut dest = [0u8; MOBY_VERTEX_SIZE];
        match *self {
            Self::TwoWay {
                vertex_index,
                transfer_joint,
                load_addrs,
                weights,
                transfer_store_addr,
                blend_store_addr,
                attributes,
            } => {
                write_low_halfword(&mut dest, vertex_index, transfer_joint);
                dest[2..4].copy_from_slice(&load_addrs);
                dest[4..6].copy_from_slice(&weights);
                dest[6] = transfer_store_addr;
                dest[7] = blend_store_addr;
                attributes.write(&mut dest);
            }
            Self::ThreeWay {
                vertex_index,
                load_addrs,
                weights,
                blend_store_addr,
                attributes,
            } => {
                write_low_halfword(&mut dest, vertex_index, load_addrs[2] / 2);
                dest[2..4].copy_from_slice(&load_addrs[..2]);
                dest[4..7].copy_from_slice(&weights);
                dest[7] = blend_store_addr;
                attributes.write(&mut dest);
            }
            Self::Regular {
                vertex_index,
                transfer_joint,
                load_addr,
                transfer_store_addr,
                attributes,
            } => {
                write_low_halfword(&mut dest, vertex_index, transfer_joint);
                dest[2] = load_addr;
                dest[3] = transfer_store_addr;
                attributes.write(&mut dest);
            }
            Self::Trailing {
                vertex_index,
                vertex_indices,
            } => {
                LittleEndian::write_u16(&mut dest[0..2], vertex_index);
                LittleEndian::write_u16_into(&vertex_indices, &mut dest[4..16]);
            }
        }
        dest
    }

    pub fn kind(&self) -> VertexKind {
        match self {
            Self::TwoWay { .. } => VertexKind::TwoWay,
            Self::ThreeWay { .. } => VertexKind::ThreeWay,
            Self::Regular { .. } => VertexKind::Regular,
            Self::Trailing { .. } => VertexKind::Trailing,
        }
    }

    /// Intermediate buffer slot named by the low halfword
    pub fn vertex_index(&self) -> u16 {
        match *self {
            Self::TwoWay { vertex_index, .. }
            | Self::ThreeWay { vertex_index, .. }
            | Self::Regular { vertex_index, .. }
            | Self::Trailing { vertex_index, .. } => vertex_index,
        }
    }

    pub fn set_vertex_index(&mut self, index: u16) {
        match self {
            Self::TwoWay { vertex_index, .. }
            | Self::ThreeWay { vertex_index, .. }
            | Self::Regular { vertex_index, .. }
            | Self::Trailing { vertex_index, .. } => *vertex_index = index,
        }
    }

    /// Normal and position, if the variant has them
    pub fn attributes(&self) -> Option<&CommonAttributes> {
        match self {
            Self::TwoWay { attributes, .. }
            | Self::ThreeWay { attributes, .. }
            | Self::Regular { attributes, .. } => Some(attributes),
            Self::Trailing { .. } => None,
        }
    }

    /// Address the vertex's matrix is loaded from, for regular vertices
    pub fn regular_load_addr(&self) -> Option<u8> {
        match *self {
            Self::Regular { load_addr, .. } => Some(load_addr),
            _ => None,
        }
    }

    /// Attach a matrix transfer to a vertex that can carry one
    ///
    /// Returns false for three-way and trailing vertices.
    pub fn set_transfer(&mut self, joint: u8, dest_addr: u8) -> bool {
        match self {
            Self::TwoWay {
                transfer_joint,
                transfer_store_addr,
                ..
            }
            | Self::Regular {
                transfer_joint,
                transfer_store_addr,
                ..
            } => {
                *transfer_joint = joint;
                *transfer_store_addr = dest_addr;
                true
            }
            _ => false,
        }
    }
}

#[inline]
fn write_low_halfword(dest: &mut [u8; MOBY_VERTEX_SIZE], vertex_index: u16, high: u8) {
    let low = (vertex_index & VERTEX_INDEX_MASK) | ((high as u16) << LOW_HALFWORD_HIGH_SHIFT);
    LittleEndian::write_u16(&mut dest[0..2], low);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn attributes() -> impl Strategy<Value = CommonAttributes> {
        (any::<i8>(), any::<i8>(), any::<[i16; 3]>()).prop_map(
            |(normal_azimuth, normal_elevation, position)| CommonAttributes {
                normal_azimuth,
                normal_elevation,
                position,
            },
        )
    }

    fn low_halfword(bytes: &[u8; MOBY_VERTEX_SIZE]) -> u16 {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    #[test]
    fn test_regular_layout() {
        let vertex = MobyVertex::Regular {
            vertex_index: 0x1ab,
            transfer_joint: 0x55,
            load_addr: 0x10,
            transfer_store_addr: 0xf4,
            attributes: CommonAttributes {
                normal_azimuth: -1,
                normal_elevation: 2,
                position: [1, -2, 0x0304],
            },
        };
        let bytes = vertex.pack();
        assert_eq!(
            bytes,
            [
                0xab, 0xab, 0x10, 0xf4, 0, 0, 0, 0, 0xff, 0x02, 0x01, 0x00, 0xfe, 0xff, 0x04, 0x03
            ]
        );
        assert_eq!(MobyVertex::unpack(&bytes, VertexKind::Regular), vertex);
    }

    #[test]
    fn test_three_way_third_address() {
        let vertex = MobyVertex::ThreeWay {
            vertex_index: 3,
            load_addrs: [0x04, 0x08, 0xf0],
            weights: [85, 85, 85],
            blend_store_addr: 0x40,
            attributes: CommonAttributes::default(),
        };
        let bytes = vertex.pack();
        assert_eq!(low_halfword(&bytes), 3 | (0x78 << 9));
        assert_eq!(MobyVertex::unpack(&bytes, VertexKind::ThreeWay), vertex);
    }

    #[test]
    fn test_trailing_indices() {
        let vertex = MobyVertex::Trailing {
            vertex_index: 0x1ff,
            vertex_indices: [1, 2, 3, 4, 5, 0x100],
        };
        let bytes = vertex.pack();
        assert_eq!(&bytes[2..4], &[0, 0]);
        assert_eq!(&bytes[14..16], &[0x00, 0x01]);
        assert_eq!(MobyVertex::unpack(&bytes, VertexKind::Trailing), vertex);
    }

    #[test]
    fn test_set_transfer() {
        let mut regular = MobyVertex::unpack(&[0; 16], VertexKind::Regular);
        assert!(regular.set_transfer(9, 0x0c));
        let bytes = regular.pack();
        assert_eq!(low_halfword(&bytes) >> 9, 9);
        assert_eq!(bytes[3], 0x0c);

        let mut three_way = MobyVertex::unpack(&[0; 16], VertexKind::ThreeWay);
        assert!(!three_way.set_transfer(9, 0x0c));
    }

    proptest! {
        #[test]
        fn prop_two_way_fields_keep_their_bits(
            vertex_index in 0u16..0x200,
            transfer_joint in 0u8..0x80,
            load_addrs in any::<[u8; 2]>(),
            weights in any::<[u8; 2]>(),
            transfer_store_addr in any::<u8>(),
            blend_store_addr in any::<u8>(),
            attributes in attributes(),
        ) {
            let vertex = MobyVertex::TwoWay {
                vertex_index,
                transfer_joint,
                load_addrs,
                weights,
                transfer_store_addr,
                blend_store_addr,
                attributes,
            };
            let bytes = vertex.pack();
            prop_assert_eq!(low_halfword(&bytes) & 0x1ff, vertex_index);
            prop_assert_eq!((low_halfword(&bytes) >> 9) as u8, transfer_joint);
            prop_assert_eq!(bytes[6], transfer_store_addr);
            prop_assert_eq!(bytes[7], blend_store_addr);
            prop_assert_eq!(MobyVertex::unpack(&bytes, VertexKind::TwoWay), vertex);
        }

        #[test]
        fn prop_three_way_fields_keep_their_bits(
            vertex_index in 0u16..0x200,
            load_addrs in any::<[u8; 2]>(),
            third in 0u8..0x80,
            weights in any::<[u8; 3]>(),
            blend_store_addr in any::<u8>(),
            attributes in attributes(),
        ) {
            let vertex = MobyVertex::ThreeWay {
                vertex_index,
                load_addrs: [load_addrs[0], load_addrs[1], third * 2],
                weights,
                blend_store_addr,
                attributes,
            };
            let bytes = vertex.pack();
            prop_assert_eq!((low_halfword(&bytes) >> 9) as u8, third);
            prop_assert_eq!(&bytes[4..7], &weights[..]);
            prop_assert_eq!(MobyVertex::unpack(&bytes, VertexKind::ThreeWay), vertex);
        }

        #[test]
        fn prop_vertex_index_is_nine_bits(vertex_index in any::<u16>(), joint in 0u8..0x80) {
            let vertex = MobyVertex::Regular {
                vertex_index,
                transfer_joint: joint,
                load_addr: 0,
                transfer_store_addr: 0,
                attributes: CommonAttributes::default(),
            };
            let decoded = MobyVertex::unpack(&vertex.pack(), VertexKind::Regular);
            prop_assert_eq!(decoded.vertex_index(), vertex_index & VERTEX_INDEX_MASK);
            prop_assert!(matches!(decoded, MobyVertex::Regular { transfer_joint, .. } if transfer_joint == joint), "decoded vertex transfer_joint mismatch");
        }
    }
}
