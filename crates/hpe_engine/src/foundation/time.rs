//! Time management utilities
//!
//! `FrameClock` turns measured wall time into simulation steps. In fixed mode
//! it accumulates real time and releases whole `fixed_dt` steps, capped per
//! real frame so an overrun cannot snowball into ever longer catch-up frames.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How simulation time follows wall time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimestepMode {
    /// Constant `fixed_dt` steps drawn from an accumulator
    #[default]
    Fixed,
    /// One step per frame using the measured delta, clamped to `max_frame_time`
    Variable,
}

/// Steps the update phase must run for one real frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepPlan {
    /// Number of update ticks to run
    pub steps: u32,
    /// Delta time of each tick in seconds
    pub dt: f32,
    /// Backlog discarded by the catch-up cap, in seconds
    pub dropped: f64,
    /// Leftover fraction of a step, for interpolation
    pub alpha: f32,
}

/// Fixed / capped-variable timestep clock
#[derive(Debug, Clone)]
pub struct FrameClock {
    mode: TimestepMode,
    fixed_dt: f64,
    max_catch_up_steps: u32,
    max_frame_time: f64,
    accumulator: f64,
    total_time: f64,
    frame_count: u64,
    step_count: u64,
}

impl FrameClock {
    /// Create a clock
    pub fn new(mode: TimestepMode, fixed_dt: f32, max_catch_up_steps: u32, max_frame_time: f32) -> Self {
        Self {
            mode,
            fixed_dt: f64::from(fixed_dt),
            max_catch_up_steps: max_catch_up_steps.max(1),
            max_frame_time: f64::from(max_frame_time),
            accumulator: 0.0,
            total_time: 0.0,
            frame_count: 0,
            step_count: 0,
        }
    }

    /// Feed one real frame's elapsed time and get the steps to simulate
    pub fn advance(&mut self, real_elapsed: Duration) -> StepPlan {
        let mut real_dt = real_elapsed.as_secs_f64();
        if real_dt > self.max_frame_time {
            log::warn!(
                "Frame took {:.1}ms, clamping to {:.1}ms",
                real_dt * 1000.0,
                self.max_frame_time * 1000.0
            );
            real_dt = self.max_frame_time;
        }
        self.frame_count += 1;

        let plan = match self.mode {
            TimestepMode::Variable => {
                let steps = u32::from(real_dt > 0.0);
                StepPlan {
                    steps,
                    dt: real_dt as f32,
                    dropped: 0.0,
                    alpha: 0.0,
                }
            }
            TimestepMode::Fixed => {
                self.accumulator += real_dt;
                let mut steps = 0;
                while self.accumulator >= self.fixed_dt && steps < self.max_catch_up_steps {
                    self.accumulator -= self.fixed_dt;
                    steps += 1;
                }
                let mut dropped = 0.0;
                if self.accumulator >= self.fixed_dt {
                    dropped = self.accumulator;
                    self.accumulator = 0.0;
                    log::warn!(
                        "Update fell behind: ran {} catch-up steps, dropped {:.1}ms of simulation time",
                        steps,
                        dropped * 1000.0
                    );
                }
                StepPlan {
                    steps,
                    dt: self.fixed_dt as f32,
                    dropped,
                    alpha: (self.accumulator / self.fixed_dt) as f32,
                }
            }
        };

        self.step_count += u64::from(plan.steps);
        self.total_time += f64::from(plan.steps) * f64::from(plan.dt);
        plan
    }

    /// Timestep mode
    pub fn mode(&self) -> TimestepMode {
        self.mode
    }

    /// Configured fixed delta in seconds
    pub fn fixed_dt(&self) -> f32 {
        self.fixed_dt as f32
    }

    /// Simulated time in seconds
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Real frames fed so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Simulation steps released so far
    pub fn step_count(&self) -> u64 {
        self.step_count
    }
}

/// Simple stopwatch for measuring elapsed time
pub struct Stopwatch {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Create a new stopped stopwatch
    pub fn new() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Create a new stopwatch and start it immediately
    pub fn start_new() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start the stopwatch
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Stop the stopwatch and accumulate elapsed time
    pub fn stop(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.elapsed += start.elapsed();
        }
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        let running = self.start_time.map_or(Duration::ZERO, |start| start.elapsed());
        self.elapsed + running
    }

    /// Get the elapsed time in milliseconds
    pub fn elapsed_millis(&self) -> f32 {
        self.elapsed().as_secs_f32() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_steps_accumulate() {
        let mut clock = FrameClock::new(TimestepMode::Fixed, 0.01, 5, 0.25);

        let plan = clock.advance(Duration::from_millis(25));
        assert_eq!(plan.steps, 2);
        assert!((plan.alpha - 0.5).abs() < 1e-3);

        let plan = clock.advance(Duration::from_millis(6));
        assert_eq!(plan.steps, 1);
        assert_eq!(clock.step_count(), 3);
    }

    #[test]
    fn test_catch_up_is_capped() {
        let mut clock = FrameClock::new(TimestepMode::Fixed, 0.01, 3, 0.25);

        let plan = clock.advance(Duration::from_millis(100));
        assert_eq!(plan.steps, 3);
        assert!(plan.dropped > 0.05);

        // Backlog was discarded, so a tiny frame yields no steps.
        let plan = clock.advance(Duration::from_millis(1));
        assert_eq!(plan.steps, 0);
    }

    #[test]
    fn test_overrun_frame_is_clamped() {
        let mut clock = FrameClock::new(TimestepMode::Variable, 0.01, 3, 0.05);

        let plan = clock.advance(Duration::from_secs(2));
        assert_eq!(plan.steps, 1);
        assert!((plan.dt - 0.05).abs() < 1e-6);

        let plan = clock.advance(Duration::ZERO);
        assert_eq!(plan.steps, 0);
    }
}
