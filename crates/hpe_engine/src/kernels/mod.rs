//! Update kernels
//!
//! A kernel advances one entity's numeric state by one simulation step. Each
//! kernel offers a scalar entry point and a batched one over packed columns;
//! both must produce the same numbers, batching being purely a throughput
//! optimisation. Kernels only ever see the state of the entity they are
//! advancing, taken from a snapshot at the start of the tick.

pub mod batch;
pub mod builtin;
pub mod dispatcher;
pub mod registry;

pub use batch::StateBatch;
pub use builtin::{Gravity, LinearMotion, Oscillate, Spin};
pub use dispatcher::{Dispatcher, TickReport};
pub use registry::{KernelId, KernelRegistry};

use crate::foundation::math::{Transform, Vec3};
use crate::scene::EntityId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-entity state advanced by kernels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelState {
    /// Local transform
    pub transform: Transform,
    /// Linear velocity, units per second
    pub velocity: Vec3,
    /// Angular velocity as a scaled axis, radians per second
    pub angular_velocity: Vec3,
    /// Mass in kilograms
    pub mass: f32,
    /// Kernel-specific scalars
    pub custom: [f32; 4],
}

impl Default for KernelState {
    fn default() -> Self {
        Self::new(Transform::identity())
    }
}

impl KernelState {
    /// At rest with unit mass
    pub fn new(transform: Transform) -> Self {
        Self {
            transform,
            velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            mass: 1.0,
            custom: [0.0; 4],
        }
    }

    /// Name of the first field holding NaN or infinity
    pub fn first_non_finite(&self) -> Option<&'static str> {
        let finite = |values: &[f32]| values.iter().all(|v| v.is_finite());

        if !finite(self.transform.position.as_slice()) {
            Some("position")
        } else if !finite(self.transform.rotation.coords.as_slice()) {
            Some("rotation")
        } else if !finite(self.transform.scale.as_slice()) {
            Some("scale")
        } else if !finite(self.velocity.as_slice()) {
            Some("velocity")
        } else if !finite(self.angular_velocity.as_slice()) {
            Some("angular_velocity")
        } else if !self.mass.is_finite() {
            Some("mass")
        } else if !finite(&self.custom) {
            Some("custom")
        } else {
            None
        }
    }
}

/// Inputs shared by every entity within one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelContext {
    /// Step length in seconds
    pub dt: f32,
    /// 1-based tick index
    pub tick: u64,
    /// Simulated time before this tick
    pub elapsed: f64,
    /// Gravity acceleration
    pub gravity: Vec3,
    /// Height of the ground plane
    pub ground_height: f32,
}

impl KernelContext {
    /// Context with default environment
    pub fn new(dt: f32, tick: u64) -> Self {
        Self {
            dt,
            tick,
            elapsed: 0.0,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            ground_height: 0.0,
        }
    }
}

/// Kernel strategy
///
/// Implementations must be pure: the result depends only on the given state
/// and context. `evaluate_batch` defaults to looping over `evaluate_scalar`;
/// overriding it is allowed as long as the results stay identical.
pub trait UpdateKernel: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Advance a single state
    fn evaluate_scalar(&self, state: &KernelState, ctx: &KernelContext) -> KernelState;

    /// Advance every state in the batch in place
    fn evaluate_batch(&self, batch: &mut StateBatch, ctx: &KernelContext) {
        for index in 0..batch.len() {
            let next = self.evaluate_scalar(&batch.get(index), ctx);
            batch.set(index, &next);
        }
    }
}

/// How kernel groups are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Batched once a group reaches the configured threshold
    #[default]
    Auto,
    /// Always per entity
    Scalar,
    /// Always batched
    Batched,
}

/// A kernel produced a non-finite value; the entity keeps its previous state
#[derive(Error, Debug, Clone, PartialEq)]
#[error("kernel '{kernel}' produced non-finite {field} for entity {entity:?} on tick {tick}")]
pub struct KernelFault {
    /// Frozen entity
    pub entity: EntityId,
    /// Kernel name
    pub kernel: String,
    /// Tick on which the fault occurred
    pub tick: u64,
    /// First offending field
    pub field: &'static str,
}
