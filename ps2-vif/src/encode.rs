//! VIF command list writer
//!
//! Only the commands asset files actually contain are supported: UNPACK
//! packets and NOP padding.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{VIF_CMD_UNPACK, VIF_CMD_UNPACK_MASK, VifCode, VifCommand, VifFlg, VifUsn};

impl VifCode {
    /// Encode to a code word
    ///
    /// Non-UNPACK commands other than NOP encode as NOP.
    pub fn encode(&self) -> u32 {
        let mut value = (self.interrupt as u32) << 31;
        if let VifCommand::Unpack(unpack) = self.command {
            let mut cmd = VIF_CMD_UNPACK | unpack.vnvl.bits();
            if unpack.mask {
                cmd |= VIF_CMD_UNPACK_MASK;
            }
            value |= (cmd as u32 & 0b111_1111) << 24;
            value |= (self.num as u32 & 0xff) << 16;
            value |= ((unpack.flg == VifFlg::UseTops) as u32) << 15;
            value |= ((unpack.usn == VifUsn::Unsigned) as u32) << 14;
            value |= unpack.addr as u32 & 0b11_1111_1111;
        }
        value
    }
}

/// Append an UNPACK packet: the code word, the payload, then zero padding to a
/// whole word
pub fn write_unpack_packet(dest: &mut Vec<u8>, code: &VifCode, data: &[u8]) {
    debug_assert!(code.is_unpack());
    // Writes into a Vec cannot fail.
    let _ = dest.write_u32::<LittleEndian>(code.encode());
    dest.extend_from_slice(data);
    while dest.len() % 4 != 0 {
        dest.push(0);
    }
}

/// Append a NOP code word
pub fn write_nop(dest: &mut Vec<u8>) {
    let _ = dest.write_u32::<LittleEndian>(VifCode::nop().encode());
}
