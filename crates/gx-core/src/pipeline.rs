//! GX pipeline state — the concrete target of decoded commands.
//!
//! Holds the CP/XF/BP register files and the submitted-vertex stream.
//! Vertex transformation proper belongs to a vertex loader; this software
//! pipeline passes batches through unchanged, which keeps replayed batches
//! byte-identical to freshly submitted ones.

use gx_dlcache::GxPipeline;

/// XF register words addressable by block loads.
const XF_REG_WORDS: usize = 0x1100;

pub struct GxState {
    // ─── Register files ───
    pub cp_regs: [u32; 256],
    pub bp_regs: [u32; 256],
    pub xf_regs: Vec<u32>,

    // ─── Indexed transform latches, banks 0xC-0xF ───
    pub indexed_xf: [u32; 4],

    // ─── Vertex loader configuration (bytes per inline vertex, per VAT) ───
    pub vertex_strides: [u32; 8],

    // ─── Submitted vertex stream (consumed by the rasterizer) ───
    pub submitted: Vec<u8>,

    // ─── Debug counters ───
    pub batches_submitted: u32,
    pub batches_replayed: u32,
}

impl GxState {
    pub fn new() -> Self {
        Self {
            cp_regs: [0; 256],
            bp_regs: [0; 256],
            xf_regs: vec![0; XF_REG_WORDS],
            indexed_xf: [0; 4],
            vertex_strides: [16; 8],
            submitted: Vec::new(),
            batches_submitted: 0,
            batches_replayed: 0,
        }
    }

    /// Program the byte stride of one inline vertex for loader slot `vat`.
    pub fn set_vertex_stride(&mut self, vat: u8, stride: u32) {
        if let Some(slot) = self.vertex_strides.get_mut(vat as usize) {
            *slot = stride;
        }
    }

    /// Take the vertex stream accumulated so far.
    pub fn take_submitted(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.submitted)
    }
}

impl GxPipeline for GxState {
    fn load_cp_reg(&mut self, sub_cmd: u8, value: u32) {
        self.cp_regs[sub_cmd as usize] = value;
    }

    fn load_xf_regs(&mut self, start: u16, data: &[u32]) {
        for (i, word) in data.iter().enumerate() {
            if let Some(reg) = self.xf_regs.get_mut(start as usize + i) {
                *reg = *word;
            }
        }
    }

    fn load_indexed_xf(&mut self, value: u32, bank: u8) {
        // Banks are 0xC-0xF; latch the most recent load per bank.
        self.indexed_xf[bank as usize & 0x3] = value;
    }

    fn load_bp_reg(&mut self, value: u32) {
        // Top byte selects the register, low 24 bits carry the value.
        self.bp_regs[(value >> 24) as usize] = value & 0x00FF_FFFF;
    }

    fn vertex_stride(&self, vat: u8) -> u32 {
        self.vertex_strides[vat as usize & 0x7]
    }

    fn run_vertex_batch(&mut self, _vat: u8, _primitive: u8, _count: u16, raw: &[u8]) -> Vec<u8> {
        self.batches_submitted += 1;
        self.submitted.extend_from_slice(raw);
        raw.to_vec()
    }

    fn run_captured_batch(&mut self, _vat: u8, _primitive: u8, _count: u16, data: &[u8]) {
        self.batches_replayed += 1;
        self.submitted.extend_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_loads_land_in_their_files() {
        let mut gx = GxState::new();
        gx.load_cp_reg(0x50, 0x1234_5678);
        gx.load_bp_reg(0xFE00_1234);
        gx.load_xf_regs(0x101C, &[7, 8, 9]);
        gx.load_indexed_xf(0xABCD, 0xD);

        assert_eq!(gx.cp_regs[0x50], 0x1234_5678);
        assert_eq!(gx.bp_regs[0xFE], 0x0000_1234);
        assert_eq!(&gx.xf_regs[0x101C..0x101F], &[7, 8, 9]);
        assert_eq!(gx.indexed_xf[1], 0xABCD);
    }

    #[test]
    fn xf_loads_past_the_register_file_are_clipped() {
        let mut gx = GxState::new();
        let start = (XF_REG_WORDS - 2) as u16;
        gx.load_xf_regs(start, &[1, 2, 3, 4]);
        assert_eq!(gx.xf_regs[XF_REG_WORDS - 2], 1);
        assert_eq!(gx.xf_regs[XF_REG_WORDS - 1], 2);
    }

    #[test]
    fn captured_batches_match_fresh_submissions() {
        let mut gx = GxState::new();
        let raw = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let expanded = gx.run_vertex_batch(0, 4, 2, &raw);
        let fresh = gx.take_submitted();

        gx.run_captured_batch(0, 4, 2, &expanded);
        assert_eq!(gx.take_submitted(), fresh);
        assert_eq!(gx.batches_submitted, 1);
        assert_eq!(gx.batches_replayed, 1);
    }

    #[test]
    fn vertex_stride_is_programmable_per_vat() {
        let mut gx = GxState::new();
        gx.set_vertex_stride(3, 12);
        assert_eq!(gx.vertex_stride(3), 12);
        assert_eq!(gx.vertex_stride(0), 16);
    }
}
