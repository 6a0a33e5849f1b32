//! PS2-VIF: command codec for the PS2 VIF (VPU interface)
//!
//! The VIF sits in front of each vector unit and consumes a stream of 32-bit
//! command words, some of which carry a payload. Asset formats use it as the
//! transport for data uploaded into VU memory, almost exclusively through the
//! `UNPACK` command which expands a packed array of scalars/vectors into
//! quadwords.
//!
//! **This is a pure codec** - it splits a command list into packets and
//! writes unpack packets back out. What the payloads mean is up to the caller.
//!
//! # Code Word Layout
//!
//! ```text
//! bit  31     : interrupt
//! bits 24..30 : cmd (for UNPACK: 0b11m_vnvl, m = mask flag)
//! bits 16..23 : num (element count, 0 means 256)
//! bits  0..15 : immediate (for UNPACK: bit 15 flg, bit 14 usn, bits 0..9 addr)
//! ```
//!
//! # Usage
//!
//! ```
//! use ps2_vif::{VifCode, VifFlg, VifUnpack, VifUsn, VifVnVl, filter_unpacks, read_command_list, write_unpack_packet};
//!
//! let code = VifCode::unpack(VifUnpack {
//!     vnvl: VifVnVl::V4_8,
//!     flg: VifFlg::UseTops,
//!     usn: VifUsn::Signed,
//!     addr: 0x12d,
//!     mask: false,
//! }, 1);
//!
//! let mut list = Vec::new();
//! write_unpack_packet(&mut list, &code, &[1, 2, 3, 4]);
//!
//! let packets = read_command_list(&list).unwrap();
//! let unpacks = filter_unpacks(packets);
//! assert_eq!(unpacks[0].data, &[1, 2, 3, 4]);
//! ```

mod decode;
mod encode;

pub use decode::{filter_unpacks, read_command_list};
pub use encode::{write_nop, write_unpack_packet};

use std::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Size of a VIF code word in bytes
pub const VIF_CODE_SIZE: usize = 4;

/// Largest packet the reader accepts (code word included)
pub const VIF_MAX_PACKET_SIZE: usize = 0x10000;

/// Base command value for UNPACK (bits 5 and 6 set)
pub const VIF_CMD_UNPACK: u8 = 0b110_0000;

/// Mask flag inside an UNPACK command value
pub const VIF_CMD_UNPACK_MASK: u8 = 0b001_0000;

// =============================================================================
// Field Types
// =============================================================================

/// Element format of an UNPACK: vector length (vn) and element width (vl)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum VifVnVl {
    S_32 = 0b0000,
    S_16 = 0b0001,
    Err0010 = 0b0010,
    Err0011 = 0b0011,
    V2_32 = 0b0100,
    V2_16 = 0b0101,
    V2_8 = 0b0110,
    Err0111 = 0b0111,
    V3_32 = 0b1000,
    V3_16 = 0b1001,
    V3_8 = 0b1010,
    Err1011 = 0b1011,
    V4_32 = 0b1100,
    V4_16 = 0b1101,
    V4_8 = 0b1110,
    V4_5 = 0b1111,
}

impl VifVnVl {
    /// Decode from the low four bits of a command value
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b1111 {
            0b0000 => Self::S_32,
            0b0001 => Self::S_16,
            0b0010 => Self::Err0010,
            0b0011 => Self::Err0011,
            0b0100 => Self::V2_32,
            0b0101 => Self::V2_16,
            0b0110 => Self::V2_8,
            0b0111 => Self::Err0111,
            0b1000 => Self::V3_32,
            0b1001 => Self::V3_16,
            0b1010 => Self::V3_8,
            0b1011 => Self::Err1011,
            0b1100 => Self::V4_32,
            0b1101 => Self::V4_16,
            0b1110 => Self::V4_8,
            _ => Self::V4_5,
        }
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Number of components minus one
    #[inline]
    pub fn vn(self) -> u32 {
        ((self as u32) & 0b1100) >> 2
    }

    /// Element width selector (0 = 32 bit, 1 = 16 bit, 2 = 8 bit, 3 = 5 bit)
    #[inline]
    pub fn vl(self) -> u32 {
        (self as u32) & 0b11
    }

    /// Size of one unpacked element in the packed payload, in bytes
    ///
    /// Matches PCSX2's behaviour for `wl <= cl`.
    #[inline]
    pub fn element_size(self) -> usize {
        (((32 >> self.vl()) * (self.vn() + 1)) / 8) as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::S_32 => "S_32",
            Self::S_16 => "S_16",
            Self::Err0010 => "ERR_0010",
            Self::Err0011 => "ERR_0011",
            Self::V2_32 => "V2_32",
            Self::V2_16 => "V2_16",
            Self::V2_8 => "V2_8",
            Self::Err0111 => "ERR_0111",
            Self::V3_32 => "V3_32",
            Self::V3_16 => "V3_16",
            Self::V3_8 => "V3_8",
            Self::Err1011 => "ERR_1011",
            Self::V4_32 => "V4_32",
            Self::V4_16 => "V4_16",
            Self::V4_8 => "V4_8",
            Self::V4_5 => "V4_5",
        }
    }
}

/// Whether an UNPACK address is relative to the VIF1 TOPS register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VifFlg {
    #[default]
    DoNotUseTops,
    UseTops,
}

/// Sign extension mode of an UNPACK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VifUsn {
    #[default]
    Signed,
    Unsigned,
}

/// Parameters of an UNPACK command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VifUnpack {
    pub vnvl: VifVnVl,
    pub flg: VifFlg,
    pub usn: VifUsn,
    /// Destination address in quadwords (10 bits)
    pub addr: u16,
    /// Write mask flag (the `m` bit of the command value)
    pub mask: bool,
}

/// A decoded VIF command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VifCommand {
    Nop,
    Stcycl { wl: u8, cl: u8 },
    Offset(u16),
    Base(u16),
    Itop(u16),
    Stmod(u8),
    Mskpath3(bool),
    Mark(u16),
    Flushe,
    Flush,
    Flusha,
    Mscal(u16),
    Mscnt,
    Mscalf(u16),
    Stmask,
    Strow,
    Stcol,
    Mpg { loadaddr: u16 },
    Direct { size: u32 },
    DirectHl { size: u32 },
    Unpack(VifUnpack),
}

/// A 32-bit VIF code word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VifCode {
    pub interrupt: bool,
    /// Element/quadword count. Stored as 1..=256; 256 is written as 0.
    pub num: u16,
    pub command: VifCommand,
}

impl VifCode {
    /// Build an UNPACK code word for `num` elements
    pub fn unpack(unpack: VifUnpack, num: u16) -> Self {
        Self {
            interrupt: false,
            num,
            command: VifCommand::Unpack(unpack),
        }
    }

    /// A NOP code word
    pub fn nop() -> Self {
        Self {
            interrupt: false,
            num: 256,
            command: VifCommand::Nop,
        }
    }

    pub fn as_unpack(&self) -> Option<&VifUnpack> {
        match &self.command {
            VifCommand::Unpack(unpack) => Some(unpack),
            _ => None,
        }
    }

    #[inline]
    pub fn is_unpack(&self) -> bool {
        matches!(self.command, VifCommand::Unpack(_))
    }

    /// Total size of the packet this code introduces, code word included
    pub fn packet_size(&self) -> usize {
        let words = match self.command {
            VifCommand::Nop
            | VifCommand::Stcycl { .. }
            | VifCommand::Offset(_)
            | VifCommand::Base(_)
            | VifCommand::Itop(_)
            | VifCommand::Stmod(_)
            | VifCommand::Mskpath3(_)
            | VifCommand::Mark(_)
            | VifCommand::Flushe
            | VifCommand::Flush
            | VifCommand::Flusha
            | VifCommand::Mscal(_)
            | VifCommand::Mscnt
            | VifCommand::Mscalf(_) => 1,
            VifCommand::Stmask => 2,
            VifCommand::Strow | VifCommand::Stcol => 5,
            VifCommand::Mpg { .. } => 1 + self.num as usize * 2,
            VifCommand::Direct { size } | VifCommand::DirectHl { size } => 1 + size as usize * 4,
            VifCommand::Unpack(unpack) => 1 + unpack_payload_size(unpack.vnvl, self.num) / 4,
        };
        words * VIF_CODE_SIZE
    }
}

/// Payload size of an UNPACK of `num` elements, padded to a whole word
#[inline]
pub fn unpack_payload_size(vnvl: VifVnVl, num: u16) -> usize {
    let size = num as usize * vnvl.element_size();
    size.div_ceil(4) * 4
}

impl fmt::Display for VifCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.command {
            VifCommand::Nop => write!(f, "NOP")?,
            VifCommand::Stcycl { wl, cl } => write!(f, "STCYCL num={} wl={wl} cl={cl}", self.num)?,
            VifCommand::Offset(offset) => write!(f, "OFFSET offset={offset:#x}")?,
            VifCommand::Base(base) => write!(f, "BASE base={base:#x}")?,
            VifCommand::Itop(addr) => write!(f, "ITOP addr={addr:#x}")?,
            VifCommand::Stmod(mode) => write!(f, "STMOD mode={mode}")?,
            VifCommand::Mskpath3(mask) => write!(f, "MSKPATH3 mask={mask}")?,
            VifCommand::Mark(mark) => write!(f, "MARK mark={mark:#x}")?,
            VifCommand::Flushe => write!(f, "FLUSHE")?,
            VifCommand::Flush => write!(f, "FLUSH")?,
            VifCommand::Flusha => write!(f, "FLUSHA")?,
            VifCommand::Mscal(addr) => write!(f, "MSCAL execaddr={addr:#x}")?,
            VifCommand::Mscnt => write!(f, "MSCNT")?,
            VifCommand::Mscalf(addr) => write!(f, "MSCALF execaddr={addr:#x}")?,
            VifCommand::Stmask => write!(f, "STMASK")?,
            VifCommand::Strow => write!(f, "STROW")?,
            VifCommand::Stcol => write!(f, "STCOL")?,
            VifCommand::Mpg { loadaddr } => write!(f, "MPG num={} loadaddr={loadaddr:#x}", self.num)?,
            VifCommand::Direct { size } => write!(f, "DIRECT size={size}")?,
            VifCommand::DirectHl { size } => write!(f, "DIRECTHL size={size}")?,
            VifCommand::Unpack(unpack) => write!(
                f,
                "UNPACK vnvl={} num={} flg={:?} usn={:?} addr={:#x}",
                unpack.vnvl.name(),
                self.num,
                unpack.flg,
                unpack.usn,
                unpack.addr
            )?,
        }
        write!(f, " interrupt={} SIZE={:#x}", self.interrupt as u8, self.packet_size())
    }
}

/// A command together with its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VifPacket<'a> {
    /// Offset of the code word from the start of the command list
    pub offset: usize,
    pub code: VifCode,
    pub data: &'a [u8],
}

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur while splitting a VIF command list
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VifError {
    /// The list ends part way through a code word
    #[error("truncated vif code at offset {offset:#x}")]
    TruncatedCode { offset: usize },
    /// The command value is not a known VIF command
    #[error("failed to disassemble vif code {raw:#010x} at offset {offset:#x}")]
    UnknownCommand { offset: usize, raw: u32 },
    /// The packet is larger than any real command list allows
    #[error("vif packet at offset {offset:#x} is too big ({size:#x} bytes)")]
    PacketTooBig { offset: usize, size: usize },
    /// The payload runs past the end of the list
    #[error("vif packet at offset {offset:#x} overruns buffer ({size:#x} bytes, {available:#x} available)")]
    Overrun {
        offset: usize,
        size: usize,
        available: usize,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn index_unpack(num: u16) -> VifCode {
        VifCode::unpack(
            VifUnpack {
                vnvl: VifVnVl::V4_8,
                flg: VifFlg::UseTops,
                usn: VifUsn::Signed,
                addr: 0x12d,
                mask: false,
            },
            num,
        )
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(VifVnVl::S_32.element_size(), 4);
        assert_eq!(VifVnVl::V2_16.element_size(), 4);
        assert_eq!(VifVnVl::V3_8.element_size(), 3);
        assert_eq!(VifVnVl::V4_8.element_size(), 4);
        assert_eq!(VifVnVl::V4_32.element_size(), 16);
        assert_eq!(VifVnVl::V4_5.element_size(), 2);
    }

    #[test]
    fn test_vnvl_bits_roundtrip() {
        for bits in 0..16u8 {
            assert_eq!(VifVnVl::from_bits(bits).bits(), bits);
        }
    }

    #[test]
    fn test_unpack_packet_size_pads_to_word() {
        let code = VifCode::unpack(
            VifUnpack {
                vnvl: VifVnVl::V3_8,
                flg: VifFlg::DoNotUseTops,
                usn: VifUsn::Unsigned,
                addr: 0,
                mask: false,
            },
            3,
        );
        // 9 bytes of payload round up to 12, plus the code word.
        assert_eq!(code.packet_size(), 16);
    }

    #[test]
    fn test_encode_decode_unpack_code() {
        let code = index_unpack(7);
        let raw = code.encode();
        assert_eq!(raw, 0x6e07_812d);
        assert_eq!(VifCode::decode(raw), Some(code));
    }

    #[test]
    fn test_masked_unpack_code() {
        let code = VifCode::unpack(
            VifUnpack {
                vnvl: VifVnVl::V2_16,
                flg: VifFlg::UseTops,
                usn: VifUsn::Signed,
                addr: 0xc2,
                mask: true,
            },
            4,
        );
        let raw = code.encode();
        assert_eq!(raw >> 24, 0x75);
        assert_eq!(VifCode::decode(raw), Some(code));
    }

    #[test]
    fn test_num_zero_means_256() {
        let code = VifCode::decode(0x6c00_0000).unwrap();
        assert_eq!(code.num, 256);
        assert_eq!(code.encode() & 0x00ff_0000, 0);
    }

    #[test]
    fn test_display() {
        let text = index_unpack(2).to_string();
        assert!(text.starts_with("UNPACK vnvl=V4_8 num=2"));
        assert!(text.ends_with("SIZE=0xc"));
    }

    #[test]
    fn test_command_list_roundtrip() {
        let mut list = Vec::new();
        write_unpack_packet(&mut list, &index_unpack(2), &[1, 2, 3, 4, 5, 6, 7, 8]);
        write_nop(&mut list);
        write_unpack_packet(&mut list, &index_unpack(1), &[9, 10, 11]);

        let packets = read_command_list(&list).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[1].code.command, VifCommand::Nop);
        assert_eq!(packets[2].offset, 16);
        assert_eq!(packets[2].data, &[9, 10, 11, 0]);

        let unpacks = filter_unpacks(packets);
        assert_eq!(unpacks.len(), 2);
        assert_eq!(unpacks[0].data, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_overrun_is_reported() {
        let mut list = Vec::new();
        write_unpack_packet(&mut list, &index_unpack(4), &[0; 16]);
        list.truncate(12);
        assert_eq!(
            read_command_list(&list),
            Err(VifError::Overrun {
                offset: 0,
                size: 20,
                available: 12
            })
        );
    }

    #[test]
    fn test_unknown_command_is_reported() {
        let list = 0x4200_0000u32.to_le_bytes();
        assert!(matches!(
            read_command_list(&list),
            Err(VifError::UnknownCommand { offset: 0, .. })
        ));
    }
}
