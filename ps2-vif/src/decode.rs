//! VIF command list reader
//!
//! Splits a raw command list into packets. The reader stops at the first
//! malformed packet and reports it; callers decide whether that is fatal.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    VIF_CMD_UNPACK, VIF_CMD_UNPACK_MASK, VIF_CODE_SIZE, VIF_MAX_PACKET_SIZE, VifCode, VifCommand,
    VifError, VifFlg, VifPacket, VifUnpack, VifUsn, VifVnVl,
};

#[inline]
fn bit_range(value: u32, low: u32, high: u32) -> u32 {
    (value >> low) & ((1u32 << (high - low + 1)) - 1)
}

impl VifCode {
    /// Decode a code word
    ///
    /// Returns `None` if the command value is not a VIF command.
    pub fn decode(raw: u32) -> Option<Self> {
        let interrupt = bit_range(raw, 31, 31) != 0;
        let cmd = bit_range(raw, 24, 30) as u8;
        let num = match bit_range(raw, 16, 23) as u16 {
            0 => 256,
            n => n,
        };
        let imm = bit_range(raw, 0, 15);

        let command = match cmd {
            0b000_0000 => VifCommand::Nop,
            0b000_0001 => VifCommand::Stcycl {
                wl: bit_range(raw, 8, 15) as u8,
                cl: bit_range(raw, 0, 7) as u8,
            },
            0b000_0010 => VifCommand::Offset(bit_range(raw, 0, 9) as u16),
            0b000_0011 => VifCommand::Base(bit_range(raw, 0, 9) as u16),
            0b000_0100 => VifCommand::Itop(bit_range(raw, 0, 9) as u16),
            0b000_0101 => VifCommand::Stmod(bit_range(raw, 0, 1) as u8),
            0b000_0110 => VifCommand::Mskpath3(bit_range(raw, 15, 15) != 0),
            0b000_0111 => VifCommand::Mark(imm as u16),
            0b001_0000 => VifCommand::Flushe,
            0b001_0001 => VifCommand::Flush,
            0b001_0011 => VifCommand::Flusha,
            0b001_0100 => VifCommand::Mscal(imm as u16),
            0b001_0101 => VifCommand::Mscalf(imm as u16),
            0b001_0111 => VifCommand::Mscnt,
            0b010_0000 => VifCommand::Stmask,
            0b011_0000 => VifCommand::Strow,
            0b011_0001 => VifCommand::Stcol,
            0b100_1010 => VifCommand::Mpg {
                loadaddr: imm as u16,
            },
            0b101_0000 => VifCommand::Direct {
                size: if imm == 0 { 65536 } else { imm },
            },
            0b101_0001 => VifCommand::DirectHl {
                size: if imm == 0 { 65536 } else { imm },
            },
            _ if cmd & VIF_CMD_UNPACK == VIF_CMD_UNPACK => VifCommand::Unpack(VifUnpack {
                vnvl: VifVnVl::from_bits(cmd),
                flg: if bit_range(raw, 15, 15) != 0 {
                    VifFlg::UseTops
                } else {
                    VifFlg::DoNotUseTops
                },
                usn: if bit_range(raw, 14, 14) != 0 {
                    VifUsn::Unsigned
                } else {
                    VifUsn::Signed
                },
                addr: bit_range(raw, 0, 9) as u16,
                mask: cmd & VIF_CMD_UNPACK_MASK != 0,
            }),
            _ => return None,
        };

        Some(Self {
            interrupt,
            num,
            command,
        })
    }
}

/// Split a VIF command list into packets
///
/// Zero padding at the end of a list reads as NOPs.
pub fn read_command_list(src: &[u8]) -> Result<Vec<VifPacket<'_>>, VifError> {
    let mut packets = Vec::new();
    let mut offset = 0;
    while offset < src.len() {
        if offset + VIF_CODE_SIZE > src.len() {
            return Err(VifError::TruncatedCode { offset });
        }
        let raw = LittleEndian::read_u32(&src[offset..offset + VIF_CODE_SIZE]);
        let code = VifCode::decode(raw).ok_or(VifError::UnknownCommand { offset, raw })?;

        let size = code.packet_size();
        if size > VIF_MAX_PACKET_SIZE {
            return Err(VifError::PacketTooBig { offset, size });
        }
        if offset + size > src.len() {
            return Err(VifError::Overrun {
                offset,
                size,
                available: src.len() - offset,
            });
        }

        packets.push(VifPacket {
            offset,
            code,
            data: &src[offset + VIF_CODE_SIZE..offset + size],
        });
        offset += size;
    }
    Ok(packets)
}

/// Keep only the UNPACK packets, in order
pub fn filter_unpacks(packets: Vec<VifPacket<'_>>) -> Vec<VifPacket<'_>> {
    packets
        .into_iter()
        .filter(|packet| packet.code.is_unpack())
        .collect()
}
