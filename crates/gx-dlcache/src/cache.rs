//! Cache store, dispatcher, and eviction.

use std::collections::HashMap;

use xxhash_rust::xxh3::xxh3_64;

use crate::arena::{RoutineHandle, TrampolineArena, TrampolineOp};
use crate::walker;
use crate::{
    DispatchResult, DlCacheConfig, GxPipeline, VideoMemory, EVICT_AGE, EVICT_AGE_UNCACHABLE,
    MAX_CHECK_INTERVAL, MAX_LIST_DEPTH, UNCACHABLE_COOLDOWN,
};

/// Cache identity of one display-list occurrence site.
///
/// Lists starting at the same address with different lengths are distinct
/// entries, so the length is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub address: u32,
    pub size: u32,
}

/// Per-category command counters, merged into statistics on every
/// compiled run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommandCounts {
    pub cp_loads: u32,
    pub xf_loads: u32,
    pub bp_loads: u32,
    pub indexed_loads: u32,
    pub draw_calls: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListPhase {
    Analyze,
    Compile,
    Run,
}

/// One cached display list.
struct CachedList {
    phase: ListPhase,
    /// Excluded from caching until the countdown runs out.
    uncachable: bool,
    /// Digest of the raw command bytes, captured when analysis succeeds.
    content_hash: u64,
    /// Occurrences left until the next hash re-check; doubles as the retry
    /// cooldown while `uncachable` is set.
    check_countdown: u32,
    /// Re-check spacing; grows while the hash keeps matching.
    check_interval: u32,
    last_used_frame: u64,
    counts: CommandCounts,
    /// Payload snapshots owned by this entry and referenced by `routine`.
    buffers: Vec<Box<[u8]>>,
    routine: Option<RoutineHandle>,
}

impl CachedList {
    fn new(frame: u64) -> Self {
        Self {
            phase: ListPhase::Analyze,
            uncachable: false,
            content_hash: 0,
            check_countdown: 1,
            check_interval: 1,
            last_used_frame: frame,
            counts: CommandCounts::default(),
            buffers: Vec::new(),
            routine: None,
        }
    }

    /// Drop captures and compiled state and sit out `cooldown` occurrences.
    fn invalidate(&mut self, cooldown: u32) {
        self.uncachable = true;
        self.check_countdown = cooldown;
        self.buffers = Vec::new();
        self.routine = None;
    }
}

/// Cache activity counters. Observational only; nothing here feeds back
/// into dispatch decisions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlCacheStats {
    pub lists_analyzed: u64,
    pub analyze_failures: u64,
    pub lists_compiled: u64,
    pub compiled_runs: u64,
    pub hash_mismatches: u64,
    pub uncachable_retries: u64,
    pub arena_full_refusals: u64,
    pub evicted_entries: u64,
    pub nested_calls: u64,
    pub interpreted_fallbacks: u64,
    pub cp_loads_replayed: u64,
    pub xf_loads_replayed: u64,
    pub bp_loads_replayed: u64,
    pub indexed_loads_replayed: u64,
    pub draw_calls_replayed: u64,
}

/// Display-list compilation cache.
///
/// One instance per GPU command-processing context. The dispatcher is not
/// safe for concurrent callers; a compiled routine may, however, re-enter
/// it recursively for nested lists on the same call stack (depth-capped at
/// [`MAX_LIST_DEPTH`]).
pub struct DisplayListCache {
    config: DlCacheConfig,
    entries: HashMap<CacheKey, CachedList>,
    arena: TrampolineArena,
    stats: DlCacheStats,
    current_frame: u64,
    depth: u32,
}

impl DisplayListCache {
    pub fn new(config: DlCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            arena: TrampolineArena::with_capacity(config.arena_capacity),
            stats: DlCacheStats::default(),
            current_frame: 0,
            depth: 0,
        }
    }

    /// Number of cached lists, including uncachable ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Arena op records in use. Never decreases except through `clear`.
    pub fn arena_used(&self) -> usize {
        self.arena.used()
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn stats(&self) -> DlCacheStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = DlCacheStats::default();
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Toggle caching. Disabling also clears, matching a configuration
    /// change at runtime.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.config.enabled && !enabled {
            self.clear();
        }
        self.config.enabled = enabled;
    }

    pub fn stats_line(&self) -> String {
        let stats = &self.stats;
        format!(
            "entries={} arena_ops={} analyzed={} analyze_failures={} compiled={} runs={} \
             hash_mismatches={} retries={} arena_full={} evicted={} nested={} interpreted={} \
             cp={} xf={} bp={} indexed={} draws={}",
            self.entries.len(),
            self.arena.used(),
            stats.lists_analyzed,
            stats.analyze_failures,
            stats.lists_compiled,
            stats.compiled_runs,
            stats.hash_mismatches,
            stats.uncachable_retries,
            stats.arena_full_refusals,
            stats.evicted_entries,
            stats.nested_calls,
            stats.interpreted_fallbacks,
            stats.cp_loads_replayed,
            stats.xf_loads_replayed,
            stats.bp_loads_replayed,
            stats.indexed_loads_replayed,
            stats.draw_calls_replayed,
        )
    }

    /// Handle one occurrence of the display list at `address`.
    ///
    /// On `Handled` the cache has already produced the full side effects of
    /// executing the list; on `NotHandled` the caller must interpret it.
    /// Either way the pipeline observes the same calls, value for value, as
    /// one linear interpretation of the stream.
    pub fn handle_display_list<M: VideoMemory, P: GxPipeline>(
        &mut self,
        mem: &M,
        pipe: &mut P,
        address: u32,
        size: u32,
    ) -> DispatchResult {
        if !self.config.enabled || size == 0 {
            return DispatchResult::NotHandled;
        }
        let key = CacheKey { address, size };

        if !self.entries.contains_key(&key) {
            self.entries.insert(key, CachedList::new(self.current_frame));
            return self.analyze_list(key, mem, pipe);
        }

        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.uncachable {
                entry.check_countdown = entry.check_countdown.saturating_sub(1);
                if entry.check_countdown > 0 {
                    return DispatchResult::NotHandled;
                }
                // Cooldown expired: forget the failure and relearn now.
                entry.uncachable = false;
                entry.phase = ListPhase::Analyze;
                entry.check_countdown = entry.check_interval;
                self.stats.uncachable_retries += 1;
            }
        }

        let phase = match self.entries.get(&key) {
            Some(entry) => entry.phase,
            None => return DispatchResult::NotHandled,
        };
        match phase {
            ListPhase::Analyze => self.analyze_list(key, mem, pipe),
            ListPhase::Compile => self.compile_list(key, mem, pipe),
            ListPhase::Run => self.run_list(key, mem, pipe),
        }
    }

    /// Plain single-pass interpretation, with no cache bookkeeping.
    ///
    /// This is the fallback for `NotHandled` occurrences; nested lists the
    /// dispatcher refuses go through it as well.
    pub fn interpret_display_list<M: VideoMemory, P: GxPipeline>(
        &mut self,
        mem: &M,
        pipe: &mut P,
        address: u32,
        size: u32,
    ) {
        self.stats.interpreted_fallbacks += 1;
        if let Err(err) = walker::analyze(self, mem, pipe, address, size) {
            log::debug!(
                "display list at {:#010X}+{:#X}: interpretation stopped early: {:?}",
                address,
                size,
                err
            );
        }
    }

    /// Per-frame maintenance: advances the frame counter and evicts lists
    /// whose unused age exceeds [`EVICT_AGE`] frames
    /// ([`EVICT_AGE_UNCACHABLE`] when uncachable).
    pub fn progressive_cleanup(&mut self) {
        self.current_frame += 1;
        let frame = self.current_frame;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let limit = if entry.uncachable { EVICT_AGE_UNCACHABLE } else { EVICT_AGE };
            frame.saturating_sub(entry.last_used_frame) <= limit
        });
        self.stats.evicted_entries += (before - self.entries.len()) as u64;
    }

    /// Drop every cached list and reclaim the arena.
    ///
    /// The only operation that frees arena space; every previously compiled
    /// routine is dead afterwards.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.arena.reset();
    }

    fn digest<M: VideoMemory>(&self, mem: &M, key: CacheKey) -> u64 {
        // An unresolvable range digests to 0 and so stays self-consistent
        // until the range becomes readable again.
        mem.resolve(key.address, key.size).map_or(0, xxh3_64)
    }

    fn analyze_list<M: VideoMemory, P: GxPipeline>(
        &mut self,
        key: CacheKey,
        mem: &M,
        pipe: &mut P,
    ) -> DispatchResult {
        match walker::analyze(self, mem, pipe, key.address, key.size) {
            Ok(counts) => {
                let hash = self.digest(mem, key);
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.counts = counts;
                    entry.content_hash = hash;
                    entry.phase = ListPhase::Compile;
                    entry.check_countdown = 1;
                    entry.check_interval = 1;
                }
                self.stats.lists_analyzed += 1;
                DispatchResult::Handled
            }
            Err(err) => {
                log::debug!(
                    "display list at {:#010X}+{:#X}: analysis failed: {:?}",
                    key.address,
                    key.size,
                    err
                );
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.invalidate(UNCACHABLE_COOLDOWN);
                }
                self.stats.analyze_failures += 1;
                // The walk already issued every call before the bad byte.
                DispatchResult::Handled
            }
        }
    }

    fn compile_list<M: VideoMemory, P: GxPipeline>(
        &mut self,
        key: CacheKey,
        mem: &M,
        pipe: &mut P,
    ) -> DispatchResult {
        let hash = self.digest(mem, key);
        match self.entries.get_mut(&key) {
            Some(entry) if entry.content_hash != hash => {
                // Changed before a single compiled run: too unstable to cache.
                entry.invalidate(UNCACHABLE_COOLDOWN);
                self.stats.hash_mismatches += 1;
                return DispatchResult::NotHandled;
            }
            Some(_) => {}
            None => return DispatchResult::NotHandled,
        }

        match walker::compile(self, mem, pipe, key.address, key.size) {
            Ok(routine) => match self.arena.commit(&routine.ops) {
                Some(handle) => {
                    if let Some(entry) = self.entries.get_mut(&key) {
                        entry.buffers = routine.buffers;
                        entry.routine = Some(handle);
                        entry.phase = ListPhase::Run;
                    }
                    self.stats.lists_compiled += 1;
                    DispatchResult::Handled
                }
                None => {
                    log::warn!(
                        "trampoline arena full ({}/{} ops); display list at {:#010X}+{:#X} left uncachable",
                        self.arena.used(),
                        self.arena.capacity(),
                        key.address,
                        key.size
                    );
                    if let Some(entry) = self.entries.get_mut(&key) {
                        entry.invalidate(UNCACHABLE_COOLDOWN);
                    }
                    self.stats.arena_full_refusals += 1;
                    // The compile walk already executed the whole list.
                    DispatchResult::Handled
                }
            },
            Err(err) => {
                log::debug!(
                    "display list at {:#010X}+{:#X}: compile walk stopped: {:?}",
                    key.address,
                    key.size,
                    err
                );
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.invalidate(UNCACHABLE_COOLDOWN);
                }
                DispatchResult::Handled
            }
        }
    }

    fn run_list<M: VideoMemory, P: GxPipeline>(
        &mut self,
        key: CacheKey,
        mem: &M,
        pipe: &mut P,
    ) -> DispatchResult {
        let due = match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.check_countdown = entry.check_countdown.saturating_sub(1);
                entry.check_countdown == 0
            }
            None => return DispatchResult::NotHandled,
        };
        if due {
            let hash = self.digest(mem, key);
            let Some(entry) = self.entries.get_mut(&key) else {
                return DispatchResult::NotHandled;
            };
            if entry.content_hash != hash {
                entry.invalidate(UNCACHABLE_COOLDOWN);
                self.stats.hash_mismatches += 1;
                return DispatchResult::NotHandled;
            }
            // The longer the list stays stable, the less often it is re-read.
            entry.check_interval = (entry.check_interval + 1).min(MAX_CHECK_INTERVAL);
            entry.check_countdown = entry.check_interval;
        }

        let frame = self.current_frame;
        let (handle, counts) = match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.last_used_frame = frame;
                (entry.routine, entry.counts)
            }
            None => return DispatchResult::NotHandled,
        };
        let Some(handle) = handle else {
            log::warn!(
                "display list at {:#010X}+{:#X} has no compiled routine; relearning",
                key.address,
                key.size
            );
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.phase = ListPhase::Analyze;
            }
            return DispatchResult::NotHandled;
        };

        self.replay(key, handle, mem, pipe);

        let stats = &mut self.stats;
        stats.compiled_runs += 1;
        stats.cp_loads_replayed += u64::from(counts.cp_loads);
        stats.xf_loads_replayed += u64::from(counts.xf_loads);
        stats.bp_loads_replayed += u64::from(counts.bp_loads);
        stats.indexed_loads_replayed += u64::from(counts.indexed_loads);
        stats.draw_calls_replayed += u64::from(counts.draw_calls);
        DispatchResult::Handled
    }

    /// Replay a sealed routine op by op. Ops are fetched by index so that
    /// nested dispatch (which may grow the arena or mutate other entries)
    /// never invalidates a held borrow.
    fn replay<M: VideoMemory, P: GxPipeline>(
        &mut self,
        key: CacheKey,
        handle: RoutineHandle,
        mem: &M,
        pipe: &mut P,
    ) {
        for index in 0..handle.len() {
            let Some(op) = self.arena.op(handle, index) else {
                break;
            };
            match op {
                TrampolineOp::LoadCp { sub_cmd, value } => pipe.load_cp_reg(sub_cmd, value),
                TrampolineOp::LoadXf { start, buffer } => {
                    let mut words = [0u32; 16];
                    let Some(count) = self
                        .captured(key, buffer)
                        .map(|raw| walker::decode_words(raw, &mut words))
                    else {
                        break;
                    };
                    pipe.load_xf_regs(start, &words[..count]);
                }
                TrampolineOp::LoadIndexedXf { value, bank } => pipe.load_indexed_xf(value, bank),
                TrampolineOp::LoadBp { value } => pipe.load_bp_reg(value),
                TrampolineOp::CallList { address, size } => {
                    self.execute_nested(mem, pipe, address, size);
                }
                TrampolineOp::DrawCaptured { vat, primitive, count, buffer } => {
                    let Some(data) = self.captured(key, buffer) else {
                        break;
                    };
                    pipe.run_captured_batch(vat, primitive, count, data);
                }
            }
        }
    }

    fn captured(&self, key: CacheKey, buffer: u32) -> Option<&[u8]> {
        self.entries
            .get(&key)?
            .buffers
            .get(buffer as usize)
            .map(|buf| &buf[..])
    }

    /// Run a nested display list through the dispatcher, interpreting it in
    /// place when the dispatcher refuses it. Depth-capped; real hardware
    /// only allows shallow call nesting.
    pub(crate) fn execute_nested<M: VideoMemory, P: GxPipeline>(
        &mut self,
        mem: &M,
        pipe: &mut P,
        address: u32,
        size: u32,
    ) {
        if self.depth >= MAX_LIST_DEPTH {
            log::warn!(
                "display list nesting exceeded {} levels at {:#010X}; skipping call",
                MAX_LIST_DEPTH,
                address
            );
            return;
        }
        self.depth += 1;
        self.stats.nested_calls += 1;
        if self.handle_display_list(mem, pipe, address, size) == DispatchResult::NotHandled {
            self.interpret_display_list(mem, pipe, address, size);
        }
        self.depth -= 1;
    }
}
