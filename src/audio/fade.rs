//! Fade planning.
//!
//! A fade is a bounded ramp of gain from one value to another in discrete
//! steps. The plan is pure arithmetic; the controller drives it from a timer.

use super::clamp_volume;
use std::time::Duration;

/// Discrete ramp from `from` to `to`.
///
/// Gains are linear in the step index, never leave the `[from, to]` range,
/// and the final step is exactly `to`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadePlan {
    from: f32,
    to: f32,
    steps: u32,
    step_interval: Duration,
}

impl FadePlan {
    /// Plan a fade over `duration`, one step per `tick` but never fewer than
    /// `min_steps`. A zero duration is a single step straight to `to`.
    pub fn new(from: f32, to: f32, duration: Duration, tick: Duration, min_steps: u32) -> Self {
        let from = clamp_volume(from);
        let to = clamp_volume(to);

        if duration.is_zero() {
            return Self {
                from,
                to,
                steps: 1,
                step_interval: Duration::ZERO,
            };
        }

        let tick_ms = tick.as_millis().max(1);
        let by_tick = duration.as_millis().div_ceil(tick_ms);
        let steps = u32::try_from(by_tick)
            .unwrap_or(u32::MAX)
            .max(min_steps)
            .max(1);

        Self {
            from,
            to,
            steps,
            step_interval: duration / steps,
        }
    }

    pub fn from(&self) -> f32 {
        self.from
    }

    pub fn to(&self) -> f32 {
        self.to
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn step_interval(&self) -> Duration {
        self.step_interval
    }

    /// Total length of the fade.
    pub fn duration(&self) -> Duration {
        self.step_interval * self.steps
    }

    /// Gain commanded at step `step` (1-based; step `steps()` is the last).
    pub fn gain_at(&self, step: u32) -> f32 {
        if step >= self.steps {
            return self.to;
        }
        let progress = step as f32 / self.steps as f32;
        let gain = self.from + (self.to - self.from) * progress;
        let (low, high) = if self.from <= self.to {
            (self.from, self.to)
        } else {
            (self.to, self.from)
        };
        gain.clamp(low, high)
    }

    /// All commanded gains in order.
    pub fn gains(&self) -> impl Iterator<Item = f32> + '_ {
        (1..=self.steps).map(move |step| self.gain_at(step))
    }
}
