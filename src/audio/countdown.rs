//! Sleep-timer countdown bookkeeping.
//!
//! Pure state; the controller calls [`CountdownState::tick`] once per second
//! from its countdown timer and acts on the returned [`CountdownTick`].

/// Outcome of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// Time passed, nothing else to do
    Running { remaining: u32 },
    /// The final fade-out window was entered; fade over `remaining` seconds
    StartFinalFade { remaining: u32 },
    /// The countdown just reached zero
    Expired,
    /// Already at zero; late ticks are ignored
    Idle,
}

/// Remaining time and the once-only final fade flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountdownState {
    remaining_seconds: u32,
    final_fade_started: bool,
    final_fade_secs: u32,
}

impl CountdownState {
    /// Countdown with the given final-fade window (seconds).
    pub fn new(final_fade_secs: u32) -> Self {
        Self {
            remaining_seconds: 0,
            final_fade_started: false,
            final_fade_secs,
        }
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn final_fade_started(&self) -> bool {
        self.final_fade_started
    }

    /// Re-arm for `seconds`.
    pub fn reset(&mut self, seconds: u32) {
        self.remaining_seconds = seconds;
        self.final_fade_started = false;
    }

    /// Back to zero without firing anything.
    pub fn clear(&mut self) {
        self.remaining_seconds = 0;
        self.final_fade_started = false;
    }

    /// Whether the remaining time is inside the final-fade window.
    #[cfg(test)]
    pub fn in_final_window(&self) -> bool {
        self.remaining_seconds > 0 && self.remaining_seconds <= self.final_fade_secs
    }

    /// Advance by one second.
    pub fn tick(&mut self) -> CountdownTick {
        if self.remaining_seconds == 0 {
            return CountdownTick::Idle;
        }

        self.remaining_seconds -= 1;
        let remaining = self.remaining_seconds;

        if remaining == 0 {
            CountdownTick::Expired
        } else if !self.final_fade_started && remaining <= self.final_fade_secs {
            self.final_fade_started = true;
            CountdownTick::StartFinalFade { remaining }
        } else {
            CountdownTick::Running { remaining }
        }
    }
}
