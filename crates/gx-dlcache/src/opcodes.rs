//! GX command-stream opcodes.
//!
//! Display lists are streams of big-endian commands. The upper bit of the
//! opcode byte selects draw-primitive records; everything else is a fixed
//! register or control command.

pub const GX_NOP: u8                 = 0x00; // No operation
pub const GX_LOAD_CP_REG: u8         = 0x08; // CP register load: u8 sub-command + u32 value
pub const GX_LOAD_XF_REG: u8         = 0x10; // XF block load: u32 header + up to 16 data words
pub const GX_LOAD_INDX_A: u8         = 0x20; // Indexed XF load, bank 0xC (position matrices)
pub const GX_LOAD_INDX_B: u8         = 0x28; // Indexed XF load, bank 0xD (normal matrices)
pub const GX_LOAD_INDX_C: u8         = 0x30; // Indexed XF load, bank 0xE (post matrices)
pub const GX_LOAD_INDX_D: u8         = 0x38; // Indexed XF load, bank 0xF (lights)
pub const GX_CMD_CALL_DL: u8         = 0x40; // Call nested display list: u32 address + u32 size
pub const GX_CMD_UNKNOWN_METRICS: u8 = 0x44; // Metrics diagnostic; accepted and ignored
pub const GX_CMD_INVL_VC: u8         = 0x48; // Invalidate vertex cache; nothing to do here
pub const GX_LOAD_BP_REG: u8         = 0x61; // BP register load: u32 value

// ─── Draw-primitive records (top bit set) ───

pub const GX_DRAW_MASK: u8      = 0x80; // Selects draw records
pub const GX_VAT_MASK: u8       = 0x07; // Vertex loader configuration index (0-7)
pub const GX_PRIMITIVE_MASK: u8 = 0x78; // Primitive kind field
pub const GX_PRIMITIVE_SHIFT: u8 = 3;

// ─── Indexed-transform banks ───

pub const XF_BANK_POS: u8    = 0xC;
pub const XF_BANK_NORMAL: u8 = 0xD;
pub const XF_BANK_POST: u8   = 0xE;
pub const XF_BANK_LIGHT: u8  = 0xF;

/// Look up a human-readable name for a command byte.
pub fn opcode_name(cmd: u8) -> &'static str {
    if cmd & GX_DRAW_MASK != 0 {
        return "GX_DRAW";
    }
    match cmd {
        GX_NOP => "GX_NOP",
        GX_LOAD_CP_REG => "GX_LOAD_CP_REG",
        GX_LOAD_XF_REG => "GX_LOAD_XF_REG",
        GX_LOAD_INDX_A => "GX_LOAD_INDX_A",
        GX_LOAD_INDX_B => "GX_LOAD_INDX_B",
        GX_LOAD_INDX_C => "GX_LOAD_INDX_C",
        GX_LOAD_INDX_D => "GX_LOAD_INDX_D",
        GX_CMD_CALL_DL => "GX_CMD_CALL_DL",
        GX_CMD_UNKNOWN_METRICS => "GX_CMD_UNKNOWN_METRICS",
        GX_CMD_INVL_VC => "GX_CMD_INVL_VC",
        GX_LOAD_BP_REG => "GX_LOAD_BP_REG",
        _ => "???",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cover_known_opcodes() {
        assert_eq!(opcode_name(GX_LOAD_CP_REG), "GX_LOAD_CP_REG");
        assert_eq!(opcode_name(GX_LOAD_BP_REG), "GX_LOAD_BP_REG");
        assert_eq!(opcode_name(0x90), "GX_DRAW");
        assert_eq!(opcode_name(0x42), "???");
    }

    #[test]
    fn draw_field_masks_split_the_opcode_byte() {
        let cmd = 0x80 | 0x18 | 0x05; // primitive 3, vat 5
        assert_eq!(cmd & GX_VAT_MASK, 5);
        assert_eq!((cmd & GX_PRIMITIVE_MASK) >> GX_PRIMITIVE_SHIFT, 3);
    }
}
