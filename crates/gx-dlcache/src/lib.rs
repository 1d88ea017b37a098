//! Display-list compilation cache shared by GX-style video backends.
//!
//! Emulated software resubmits the same display lists at the same addresses
//! frame after frame. This crate learns a list's side effects once, then
//! serves later occurrences by replaying a recorded trampoline sequence
//! instead of re-decoding the stream, while watching for lists that mutate
//! in place. Hardware state stays behind trait seams so the cache carries
//! none of its own.

mod arena;
mod cache;
pub mod opcodes;
mod walker;

pub use arena::{RoutineHandle, TrampolineArena, TrampolineOp};
pub use cache::{CacheKey, CommandCounts, DisplayListCache, DlCacheStats};

/// Default trampoline arena capacity, in op records.
pub const DEFAULT_ARENA_OPS: usize = 1 << 20;

/// Occurrences an invalidated list sits out before re-learning is attempted.
pub const UNCACHABLE_COOLDOWN: u32 = 60;

/// Upper bound on the adaptive hash re-check interval.
pub const MAX_CHECK_INTERVAL: u32 = 60;

/// Frames a cached list may go unused before the per-frame sweep drops it.
pub const EVICT_AGE: u64 = 400;

/// Unused limit for uncachable lists. Kept longer than normal entries
/// because their cooldown/retry cycle is itself long.
pub const EVICT_AGE_UNCACHABLE: u64 = 1200;

/// Maximum display-list call nesting the dispatcher will follow.
pub const MAX_LIST_DEPTH: u32 = 16;

/// Read access to emulated main memory.
pub trait VideoMemory {
    /// Resolve a physical address range to its backing bytes, or `None`
    /// when any part of the range is unmapped.
    fn resolve(&self, address: u32, len: u32) -> Option<&[u8]>;
}

/// Stateful GX pipeline driven by decoded display-list commands.
///
/// The cache issues these calls in stream order. Whether an occurrence is
/// served by first-time analysis, by the recording compile pass, or by
/// replay of a compiled routine, the pipeline observes the same calls with
/// the same values.
pub trait GxPipeline {
    /// CP register load (register class A).
    fn load_cp_reg(&mut self, sub_cmd: u8, value: u32);

    /// XF register block load (register class B), `data.len()` words
    /// starting at register `start`.
    fn load_xf_regs(&mut self, start: u16, data: &[u32]);

    /// Indexed transform load into one of the four banks `0xC..=0xF`.
    fn load_indexed_xf(&mut self, value: u32, bank: u8);

    /// BP register load (register class C).
    fn load_bp_reg(&mut self, value: u32);

    /// Byte stride of one inline vertex under loader configuration
    /// `vat` (0-7).
    fn vertex_stride(&self, vat: u8) -> u32;

    /// Transform and submit a vertex batch read from `raw`; returns the
    /// expanded output the submission produced.
    fn run_vertex_batch(&mut self, vat: u8, primitive: u8, count: u16, raw: &[u8]) -> Vec<u8>;

    /// Resubmit a previously captured expanded batch, skipping vertex
    /// transformation. Must be equivalent in observable pipeline effect to
    /// the `run_vertex_batch` call that produced `data`.
    fn run_captured_batch(&mut self, vat: u8, primitive: u8, count: u16, data: &[u8]);
}

/// Outcome of one dispatcher call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// The cache produced the full side effects of executing the list; the
    /// caller must not also interpret it.
    Handled,
    /// The caller must fall back to plain interpretation.
    NotHandled,
}

/// Why a display-list walk stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkError {
    /// Byte at `offset` is not a recognized opcode.
    UnknownOpcode { offset: u32, opcode: u8 },
    /// A command ran past the declared end of the list.
    Truncated { offset: u32 },
}

/// Cache configuration.
#[derive(Debug, Clone, Copy)]
pub struct DlCacheConfig {
    /// Master switch; when false the dispatcher refuses every list.
    pub enabled: bool,
    /// Trampoline arena capacity in op records.
    pub arena_capacity: usize,
}

impl Default for DlCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            arena_capacity: DEFAULT_ARENA_OPS,
        }
    }
}

impl DlCacheConfig {
    /// Build configuration from the environment.
    ///
    /// `GX_DLCACHE=0|off|false|no` disables caching;
    /// `GX_DLCACHE_ARENA_OPS=n` overrides the arena capacity.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("GX_DLCACHE") {
            let normalized = raw.trim().to_ascii_lowercase();
            config.enabled = !matches!(normalized.as_str(), "0" | "off" | "false" | "no");
        }
        config.arena_capacity = Self::parse_env_usize("GX_DLCACHE_ARENA_OPS", config.arena_capacity);
        config
    }

    fn parse_env_usize(name: &str, default: usize) -> usize {
        std::env::var(name)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::DlCacheConfig;

    #[test]
    fn default_config_enables_caching() {
        let config = DlCacheConfig::default();
        assert!(config.enabled);
        assert!(config.arena_capacity > 0);
    }
}
