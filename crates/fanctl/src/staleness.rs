use crate::consts::STALE_CYCLES;

/// Watches the daemon tag for progress.
///
/// Only changes how far the displayed data can be trusted; polling goes on
/// regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessTracker {
    last_tag: Option<u64>,
    idle_cycles: u32,
    threshold: u32,
}

impl Default for StalenessTracker {
    fn default() -> Self {
        Self::new(STALE_CYCLES)
    }
}

impl StalenessTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            last_tag: None,
            idle_cycles: 0,
            threshold,
        }
    }

    /// Record the tag seen in this cycle.
    pub fn observe(&mut self, tag: u64) {
        match self.last_tag {
            Some(last) if tag <= last => {
                self.idle_cycles = self.idle_cycles.saturating_add(1);
            }
            _ => {
                self.last_tag = Some(tag);
                self.idle_cycles = 0;
            }
        }
    }

    pub fn idle_cycles(&self) -> u32 {
        self.idle_cycles
    }

    pub fn is_possibly_broken(&self) -> bool {
        self.idle_cycles >= self.threshold
    }
}
