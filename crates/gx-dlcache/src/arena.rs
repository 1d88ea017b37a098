//! Trampoline arena — bulk-reclaimed storage for compiled routines.
//!
//! Routines are contiguous runs of tagged op records inside one
//! fixed-capacity buffer with an append-only write cursor. Individual
//! routines are never freed; the only reclamation is `reset`, which empties
//! the whole arena and advances its generation so every previously issued
//! handle goes dead at once.

/// One recorded primitive call with pre-decoded arguments.
///
/// `buffer` fields index into the owning cache entry's captured buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrampolineOp {
    LoadCp { sub_cmd: u8, value: u32 },
    LoadXf { start: u16, buffer: u32 },
    LoadIndexedXf { value: u32, bank: u8 },
    LoadBp { value: u32 },
    CallList { address: u32, size: u32 },
    DrawCaptured { vat: u8, primitive: u8, count: u16, buffer: u32 },
}

/// Handle to a sealed routine: a contiguous op run within one arena
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineHandle {
    generation: u32,
    start: u32,
    len: u32,
}

impl RoutineHandle {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The arena itself. Single writer; capacity never grows.
pub struct TrampolineArena {
    ops: Vec<TrampolineOp>,
    capacity: usize,
    generation: u32,
}

impl TrampolineArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
            capacity,
            generation: 0,
        }
    }

    /// Op records currently in use.
    pub fn used(&self) -> usize {
        self.ops.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Append a sealed routine as one contiguous run.
    ///
    /// The run is committed whole so routines never interleave; on overflow
    /// the arena is left untouched and `None` is returned.
    pub fn commit(&mut self, ops: &[TrampolineOp]) -> Option<RoutineHandle> {
        if self.capacity - self.ops.len() < ops.len() {
            return None;
        }
        let start = self.ops.len() as u32;
        self.ops.extend_from_slice(ops);
        Some(RoutineHandle {
            generation: self.generation,
            start,
            len: ops.len() as u32,
        })
    }

    /// Fetch one op of a routine by index.
    ///
    /// Returns `None` for a handle from a dead generation or an index past
    /// the routine's end.
    pub fn op(&self, handle: RoutineHandle, index: u32) -> Option<TrampolineOp> {
        if handle.generation != self.generation || index >= handle.len {
            return None;
        }
        self.ops.get((handle.start + index) as usize).copied()
    }

    /// Drop every routine and start a new generation.
    pub fn reset(&mut self) {
        self.ops.clear();
        self.generation = self.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop_run(len: usize) -> Vec<TrampolineOp> {
        vec![TrampolineOp::LoadBp { value: 0 }; len]
    }

    #[test]
    fn commit_returns_readable_runs() {
        let mut arena = TrampolineArena::with_capacity(8);
        let a = arena
            .commit(&[
                TrampolineOp::LoadCp { sub_cmd: 0x30, value: 7 },
                TrampolineOp::LoadBp { value: 0x01FF_0000 },
            ])
            .unwrap();
        let b = arena
            .commit(&[TrampolineOp::LoadIndexedXf { value: 3, bank: 0xD }])
            .unwrap();

        assert_eq!(arena.used(), 3);
        assert_eq!(
            arena.op(a, 0),
            Some(TrampolineOp::LoadCp { sub_cmd: 0x30, value: 7 })
        );
        assert_eq!(arena.op(a, 1), Some(TrampolineOp::LoadBp { value: 0x01FF_0000 }));
        assert_eq!(arena.op(a, 2), None);
        assert_eq!(
            arena.op(b, 0),
            Some(TrampolineOp::LoadIndexedXf { value: 3, bank: 0xD })
        );
    }

    #[test]
    fn overflow_leaves_arena_untouched() {
        let mut arena = TrampolineArena::with_capacity(4);
        assert!(arena.commit(&nop_run(3)).is_some());
        assert!(arena.commit(&nop_run(2)).is_none());
        assert_eq!(arena.used(), 3);
        assert!(arena.commit(&nop_run(1)).is_some());
        assert_eq!(arena.used(), 4);
    }

    #[test]
    fn cursor_only_advances_between_resets() {
        let mut arena = TrampolineArena::with_capacity(16);
        let mut last = 0;
        for len in [4usize, 1, 6] {
            arena.commit(&nop_run(len)).unwrap();
            assert!(arena.used() > last);
            last = arena.used();
        }
    }

    #[test]
    fn reset_invalidates_prior_handles() {
        let mut arena = TrampolineArena::with_capacity(4);
        let handle = arena.commit(&nop_run(2)).unwrap();
        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.op(handle, 0), None);

        // Same cursor positions, new generation: old handles stay dead.
        let fresh = arena.commit(&nop_run(2)).unwrap();
        assert_eq!(arena.op(handle, 0), None);
        assert!(arena.op(fresh, 0).is_some());
    }
}
