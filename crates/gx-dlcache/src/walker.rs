//! Display-list walks: analysis, compilation, and plain interpretation.
//!
//! All passes decode the same opcode table and issue the same pipeline
//! calls, so an occurrence produces identical side effects no matter which
//! pass serves it.

use crate::arena::TrampolineOp;
use crate::cache::{CommandCounts, DisplayListCache};
use crate::opcodes::*;
use crate::{GxPipeline, VideoMemory, WalkError};

/// Bounds-checked big-endian cursor over a resolved display list.
struct StreamReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn offset(&self) -> u32 {
        self.pos as u32
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, WalkError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(WalkError::Truncated { offset: self.offset() })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, WalkError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + 2)
            .ok_or(WalkError::Truncated { offset: self.offset() })?;
        self.pos += 2;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, WalkError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + 4)
            .ok_or(WalkError::Truncated { offset: self.offset() })?;
        self.pos += 4;
        Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    /// Take `len` raw payload bytes.
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WalkError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or(WalkError::Truncated { offset: self.offset() })?;
        self.pos += len;
        Ok(slice)
    }
}

/// One decoded command. Payloads stay borrowed from the stream.
enum Command<'a> {
    Nop,
    LoadCp { sub_cmd: u8, value: u32 },
    LoadXf { start: u16, raw: &'a [u8] },
    LoadIndexedXf { value: u32, bank: u8 },
    LoadBp { value: u32 },
    CallList { address: u32, size: u32 },
    Draw { vat: u8, primitive: u8, count: u16, raw: &'a [u8] },
}

fn read_command<'a, P: GxPipeline>(
    reader: &mut StreamReader<'a>,
    pipe: &P,
) -> Result<Command<'a>, WalkError> {
    let offset = reader.offset();
    let op = reader.read_u8()?;

    if op & GX_DRAW_MASK != 0 {
        let vat = op & GX_VAT_MASK;
        let primitive = (op & GX_PRIMITIVE_MASK) >> GX_PRIMITIVE_SHIFT;
        let count = reader.read_u16()?;
        let stride = pipe.vertex_stride(vat) as usize;
        let raw = reader.read_bytes(stride * count as usize)?;
        return Ok(Command::Draw { vat, primitive, count, raw });
    }

    match op {
        GX_NOP => Ok(Command::Nop),
        GX_CMD_UNKNOWN_METRICS => {
            log::trace!("GX metrics command at offset {:#X}", offset);
            Ok(Command::Nop)
        }
        GX_CMD_INVL_VC => {
            log::trace!("GX vertex cache invalidate at offset {:#X}", offset);
            Ok(Command::Nop)
        }
        GX_LOAD_CP_REG => {
            let sub_cmd = reader.read_u8()?;
            let value = reader.read_u32()?;
            Ok(Command::LoadCp { sub_cmd, value })
        }
        GX_LOAD_XF_REG => {
            let header = reader.read_u32()?;
            let count = ((header >> 16) & 0xF) as usize + 1;
            let start = (header & 0xFFFF) as u16;
            let raw = reader.read_bytes(count * 4)?;
            Ok(Command::LoadXf { start, raw })
        }
        GX_LOAD_INDX_A => Ok(Command::LoadIndexedXf { value: reader.read_u32()?, bank: XF_BANK_POS }),
        GX_LOAD_INDX_B => Ok(Command::LoadIndexedXf { value: reader.read_u32()?, bank: XF_BANK_NORMAL }),
        GX_LOAD_INDX_C => Ok(Command::LoadIndexedXf { value: reader.read_u32()?, bank: XF_BANK_POST }),
        GX_LOAD_INDX_D => Ok(Command::LoadIndexedXf { value: reader.read_u32()?, bank: XF_BANK_LIGHT }),
        GX_CMD_CALL_DL => {
            let address = reader.read_u32()?;
            let size = reader.read_u32()?;
            Ok(Command::CallList { address, size })
        }
        GX_LOAD_BP_REG => Ok(Command::LoadBp { value: reader.read_u32()? }),
        _ => Err(WalkError::UnknownOpcode { offset, opcode: op }),
    }
}

/// Decode big-endian payload words into `words`; returns the word count.
/// XF block loads carry at most 16 words.
pub(crate) fn decode_words(raw: &[u8], words: &mut [u32; 16]) -> usize {
    let count = raw.len() / 4;
    for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    count
}

/// First pass: execute the stream once, counting command categories.
///
/// An unresolvable address range is treated as an empty stream and still
/// reported as success; the legacy pipeline behaved this way and callers
/// depend on the occurrence being consumed.
pub(crate) fn analyze<M: VideoMemory, P: GxPipeline>(
    cache: &mut DisplayListCache,
    mem: &M,
    pipe: &mut P,
    address: u32,
    size: u32,
) -> Result<CommandCounts, WalkError> {
    let mut counts = CommandCounts::default();
    let Some(bytes) = mem.resolve(address, size) else {
        log::debug!(
            "display list at {:#010X}+{:#X} did not resolve; treating as empty",
            address,
            size
        );
        return Ok(counts);
    };

    let mut reader = StreamReader::new(bytes);
    while reader.remaining() > 0 {
        match read_command(&mut reader, pipe)? {
            Command::Nop => {}
            Command::LoadCp { sub_cmd, value } => {
                pipe.load_cp_reg(sub_cmd, value);
                counts.cp_loads += 1;
            }
            Command::LoadXf { start, raw } => {
                let mut words = [0u32; 16];
                let count = decode_words(raw, &mut words);
                pipe.load_xf_regs(start, &words[..count]);
                counts.xf_loads += 1;
            }
            Command::LoadIndexedXf { value, bank } => {
                pipe.load_indexed_xf(value, bank);
                counts.indexed_loads += 1;
            }
            Command::LoadBp { value } => {
                pipe.load_bp_reg(value);
                counts.bp_loads += 1;
            }
            Command::CallList { address, size } => {
                cache.execute_nested(mem, pipe, address, size);
            }
            Command::Draw { vat, primitive, count, raw } => {
                let _ = pipe.run_vertex_batch(vat, primitive, count, raw);
                counts.draw_calls += 1;
            }
        }
    }
    Ok(counts)
}

/// A sealed compile result: the routine's op run plus the payload captures
/// it references.
pub(crate) struct CompiledRoutine {
    pub ops: Vec<TrampolineOp>,
    pub buffers: Vec<Box<[u8]>>,
}

/// Second pass: execute the stream again while recording one trampoline op
/// per command. Variable-length payloads are snapshotted into `buffers` so
/// replay never touches emulated memory; draw records capture the expanded
/// vertex output rather than the raw stream bytes, skipping
/// re-transformation on replay.
pub(crate) fn compile<M: VideoMemory, P: GxPipeline>(
    cache: &mut DisplayListCache,
    mem: &M,
    pipe: &mut P,
    address: u32,
    size: u32,
) -> Result<CompiledRoutine, WalkError> {
    let mut routine = CompiledRoutine {
        ops: Vec::new(),
        buffers: Vec::new(),
    };
    let Some(bytes) = mem.resolve(address, size) else {
        log::debug!(
            "display list at {:#010X}+{:#X} did not resolve; compiling empty routine",
            address,
            size
        );
        return Ok(routine);
    };

    let mut reader = StreamReader::new(bytes);
    while reader.remaining() > 0 {
        match read_command(&mut reader, pipe)? {
            Command::Nop => {}
            Command::LoadCp { sub_cmd, value } => {
                pipe.load_cp_reg(sub_cmd, value);
                routine.ops.push(TrampolineOp::LoadCp { sub_cmd, value });
            }
            Command::LoadXf { start, raw } => {
                let mut words = [0u32; 16];
                let count = decode_words(raw, &mut words);
                pipe.load_xf_regs(start, &words[..count]);
                let buffer = routine.buffers.len() as u32;
                routine.buffers.push(Box::from(raw));
                routine.ops.push(TrampolineOp::LoadXf { start, buffer });
            }
            Command::LoadIndexedXf { value, bank } => {
                pipe.load_indexed_xf(value, bank);
                routine.ops.push(TrampolineOp::LoadIndexedXf { value, bank });
            }
            Command::LoadBp { value } => {
                pipe.load_bp_reg(value);
                routine.ops.push(TrampolineOp::LoadBp { value });
            }
            Command::CallList { address, size } => {
                cache.execute_nested(mem, pipe, address, size);
                routine.ops.push(TrampolineOp::CallList { address, size });
            }
            Command::Draw { vat, primitive, count, raw } => {
                let expanded = pipe.run_vertex_batch(vat, primitive, count, raw);
                let buffer = routine.buffers.len() as u32;
                routine.buffers.push(expanded.into_boxed_slice());
                routine.ops.push(TrampolineOp::DrawCaptured { vat, primitive, count, buffer });
            }
        }
    }
    Ok(routine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_rejects_reads_past_the_end() {
        let mut reader = StreamReader::new(&[0xAB, 0xCD, 0xEF]);
        assert_eq!(reader.read_u16().unwrap(), 0xABCD);
        assert_eq!(reader.read_u32(), Err(WalkError::Truncated { offset: 2 }));
        // A failed read consumes nothing.
        assert_eq!(reader.read_u8().unwrap(), 0xEF);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn words_decode_big_endian() {
        let raw = [0x00, 0x00, 0x00, 0x01, 0xDE, 0xAD, 0xBE, 0xEF];
        let mut words = [0u32; 16];
        let count = decode_words(&raw, &mut words);
        assert_eq!(count, 2);
        assert_eq!(&words[..2], &[1, 0xDEAD_BEEF]);
    }
}
