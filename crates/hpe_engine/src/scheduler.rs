//! Frame scheduler
//!
//! Tracks the phase of the frame in flight and owns the timestep clock. A
//! frame moves `Idle → Updating → Resolving → Rendering → Presenting → Idle`
//! and nothing else; any other transition is a [`PhaseError`]. Aborting a
//! frame always lands back in `Idle`.

use crate::config::TimestepSettings;
use crate::foundation::time::{FrameClock, StepPlan};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Phase of the frame pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FramePhase {
    /// Between frames; the only phase in which the scene may be edited
    #[default]
    Idle,
    /// Kernels advancing entity state
    Updating,
    /// Building the draw list
    Resolving,
    /// Submitting draw calls
    Rendering,
    /// Presenting the finished frame
    Presenting,
}

impl FramePhase {
    /// Phase that follows this one
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::Updating,
            Self::Updating => Self::Resolving,
            Self::Resolving => Self::Rendering,
            Self::Rendering => Self::Presenting,
            Self::Presenting => Self::Idle,
        }
    }
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Updating => "updating",
            Self::Resolving => "resolving",
            Self::Rendering => "rendering",
            Self::Presenting => "presenting",
        };
        f.write_str(name)
    }
}

/// Out-of-order phase transition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Cannot move from {from} to {to}")]
pub struct PhaseError {
    /// Current phase
    pub from: FramePhase,
    /// Requested phase
    pub to: FramePhase,
}

/// Frame phase state machine plus timestep clock
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    phase: FramePhase,
    clock: FrameClock,
    frame_index: u64,
    aborted_frames: u64,
}

impl FrameScheduler {
    /// Create an idle scheduler
    pub fn new(settings: &TimestepSettings) -> Self {
        Self {
            phase: FramePhase::Idle,
            clock: FrameClock::new(
                settings.mode,
                settings.fixed_dt,
                settings.max_catch_up_steps,
                settings.max_frame_time,
            ),
            frame_index: 0,
            aborted_frames: 0,
        }
    }

    /// Open a frame and plan its update steps from the wall time since the last one
    pub fn begin_frame(&mut self, elapsed: Duration) -> Result<StepPlan, PhaseError> {
        self.advance(FramePhase::Updating)?;
        self.frame_index += 1;
        let plan = self.clock.advance(elapsed);
        log::debug!("Frame {}: {} update steps of {:.4}s", self.frame_index, plan.steps, plan.dt);
        Ok(plan)
    }

    /// Move to the next phase
    pub fn advance(&mut self, to: FramePhase) -> Result<(), PhaseError> {
        if self.phase.next() != to {
            return Err(PhaseError { from: self.phase, to });
        }
        log::trace!("Frame phase {} -> {}", self.phase, to);
        self.phase = to;
        Ok(())
    }

    /// Close the frame after presenting
    pub fn finish_frame(&mut self) -> Result<(), PhaseError> {
        if self.phase != FramePhase::Presenting {
            return Err(PhaseError {
                from: self.phase,
                to: FramePhase::Idle,
            });
        }
        self.advance(FramePhase::Idle)
    }

    /// Drop the frame in flight and return to `Idle`
    ///
    /// Returns the phase the frame was in.
    pub fn abort(&mut self) -> FramePhase {
        let was = self.phase;
        if was != FramePhase::Idle {
            self.aborted_frames += 1;
            log::error!("Frame {} aborted during {}", self.frame_index, was);
        }
        self.phase = FramePhase::Idle;
        was
    }

    /// Current phase
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// True between frames
    pub fn is_idle(&self) -> bool {
        self.phase == FramePhase::Idle
    }

    /// Frames begun so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Frames abandoned after a fatal error
    pub fn aborted_frames(&self) -> u64 {
        self.aborted_frames
    }

    /// Timestep clock
    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::time::TimestepMode;

    fn scheduler() -> FrameScheduler {
        FrameScheduler::new(&TimestepSettings {
            mode: TimestepMode::Fixed,
            fixed_dt: 0.25,
            max_catch_up_steps: 3,
            max_frame_time: 10.0,
        })
    }

    #[test]
    fn test_full_cycle() {
        let mut s = scheduler();
        let plan = s.begin_frame(Duration::from_millis(500)).unwrap();
        assert_eq!(plan.steps, 2);
        assert_eq!(s.phase(), FramePhase::Updating);

        s.advance(FramePhase::Resolving).unwrap();
        s.advance(FramePhase::Rendering).unwrap();
        s.advance(FramePhase::Presenting).unwrap();
        s.finish_frame().unwrap();
        assert!(s.is_idle());
        assert_eq!(s.frame_index(), 1);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut s = scheduler();
        assert!(s.finish_frame().is_err());
        assert_eq!(
            s.advance(FramePhase::Rendering),
            Err(PhaseError {
                from: FramePhase::Idle,
                to: FramePhase::Rendering
            })
        );

        s.begin_frame(Duration::ZERO).unwrap();
        assert!(s.begin_frame(Duration::ZERO).is_err());
        assert_eq!(s.phase(), FramePhase::Updating);
    }

    #[test]
    fn test_catch_up_is_capped() {
        let mut s = scheduler();
        let plan = s.begin_frame(Duration::from_secs(2)).unwrap();
        assert_eq!(plan.steps, 3);
        assert!(plan.dropped > 0.0);
    }

    #[test]
    fn test_abort_returns_to_idle() {
        let mut s = scheduler();
        s.begin_frame(Duration::ZERO).unwrap();
        s.advance(FramePhase::Resolving).unwrap();
        s.advance(FramePhase::Rendering).unwrap();

        assert_eq!(s.abort(), FramePhase::Rendering);
        assert!(s.is_idle());
        assert_eq!(s.aborted_frames(), 1);
        assert!(s.begin_frame(Duration::ZERO).is_ok());
    }
}
