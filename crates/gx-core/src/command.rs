//! Command processor — drives display lists through the compilation cache
//! with an interpreter fallback.

use gx_dlcache::{DispatchResult, DisplayListCache, DlCacheConfig};

use crate::memory::MainRam;
use crate::pipeline::GxState;
use crate::stats::VideoStats;

/// GPU command-processing front end.
///
/// Owns main memory, the pipeline state, and the display-list cache; every
/// display list submitted by the emulated CPU funnels through
/// [`execute_display_list`](Self::execute_display_list). Single-context:
/// callers that share one processor across threads need their own lock
/// around it.
pub struct CommandProcessor {
    pub ram: MainRam,
    pub gx: GxState,
    cache: DisplayListCache,
    stats: VideoStats,
}

impl CommandProcessor {
    pub fn new(config: DlCacheConfig) -> Self {
        Self {
            ram: MainRam::new(),
            gx: GxState::new(),
            cache: DisplayListCache::new(config),
            stats: VideoStats::default(),
        }
    }

    /// Build with configuration taken from the environment.
    pub fn from_env() -> Self {
        Self::new(DlCacheConfig::from_env())
    }

    /// Execute one display-list occurrence.
    pub fn execute_display_list(&mut self, address: u32, size: u32) {
        self.stats.this_frame.lists_called += 1;
        match self
            .cache
            .handle_display_list(&self.ram, &mut self.gx, address, size)
        {
            DispatchResult::Handled => self.stats.this_frame.lists_cached += 1,
            DispatchResult::NotHandled => {
                self.stats.this_frame.lists_interpreted += 1;
                self.cache
                    .interpret_display_list(&self.ram, &mut self.gx, address, size);
            }
        }
    }

    /// Per-frame maintenance: cache eviction sweep and stats roll.
    pub fn end_frame(&mut self) {
        self.cache.progressive_cleanup();
        self.stats.swap_frame();
    }

    /// Drop every cached list, e.g. after a configuration change.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &DisplayListCache {
        &self.cache
    }

    pub fn stats(&self) -> VideoStats {
        self.stats
    }

    pub fn stats_line(&self) -> String {
        let frame = &self.stats.last_frame;
        format!(
            "frame={} lists={} cached={} interpreted={} | {}",
            self.stats.frames,
            frame.lists_called,
            frame.lists_cached,
            frame.lists_interpreted,
            self.cache.stats_line()
        )
    }
}
