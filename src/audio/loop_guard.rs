//! Loop seam masking.
//!
//! Native looping is not trusted to be gapless, so the controller restarts
//! the track itself. The guard decides when, and latches while a restart is
//! in flight so overlapping end-of-track signals cannot start a seek storm.

use super::backend::StatusUpdate;
use super::LoopMasking;

/// What to do with a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    /// Seek to the start and replay
    Restart,
    /// Nothing to do
    Ignore,
}

/// Single-writer latch around loop restarts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopGuard {
    masking: LoopMasking,
    seek_in_progress: bool,
    restarts: u64,
}

impl LoopGuard {
    pub fn new(masking: LoopMasking) -> Self {
        Self {
            masking,
            seek_in_progress: false,
            restarts: 0,
        }
    }

    /// Decide on an update. A `Restart` decision sets the latch; the caller
    /// must call [`LoopGuard::release`] once the reseek settles.
    pub fn observe(&mut self, update: &StatusUpdate) -> LoopDecision {
        if self.seek_in_progress {
            return LoopDecision::Ignore;
        }

        let due = update.did_just_finish
            || match self.masking {
                LoopMasking::EndCallback => false,
                LoopMasking::LeadSeek { lead_ms } => match update.duration_ms {
                    Some(duration_ms) if duration_ms > lead_ms => {
                        update.position_ms.saturating_add(lead_ms) >= duration_ms
                    }
                    _ => false,
                },
            };

        if due {
            self.seek_in_progress = true;
            self.restarts += 1;
            LoopDecision::Restart
        } else {
            LoopDecision::Ignore
        }
    }

    /// Clear the latch after the reseek completed or failed.
    pub fn release(&mut self) {
        self.seek_in_progress = false;
    }

    #[cfg(test)]
    pub fn seek_in_progress(&self) -> bool {
        self.seek_in_progress
    }

    /// Restarts decided so far.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }
}
