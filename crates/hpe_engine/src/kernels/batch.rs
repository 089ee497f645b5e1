//! Packed state columns for batched kernel evaluation

use super::KernelState;
use crate::foundation::math::{Quat, Transform, Vec3};

/// Structure-of-arrays view of many [`KernelState`]s
///
/// Every column has the same length. Kernels that override
/// [`UpdateKernel::evaluate_batch`](super::UpdateKernel::evaluate_batch) walk
/// the columns they need directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateBatch {
    /// Positions
    pub positions: Vec<Vec3>,
    /// Orientations
    pub rotations: Vec<Quat>,
    /// Scales
    pub scales: Vec<Vec3>,
    /// Linear velocities
    pub velocities: Vec<Vec3>,
    /// Angular velocities
    pub angular_velocities: Vec<Vec3>,
    /// Masses
    pub masses: Vec<f32>,
    /// Kernel-specific scalars
    pub custom: Vec<[f32; 4]>,
}

impl StateBatch {
    /// Empty batch with room for `capacity` states
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            rotations: Vec::with_capacity(capacity),
            scales: Vec::with_capacity(capacity),
            velocities: Vec::with_capacity(capacity),
            angular_velocities: Vec::with_capacity(capacity),
            masses: Vec::with_capacity(capacity),
            custom: Vec::with_capacity(capacity),
        }
    }

    /// Pack a slice of states
    pub fn from_states(states: &[KernelState]) -> Self {
        let mut batch = Self::with_capacity(states.len());
        for state in states {
            batch.push(state);
        }
        batch
    }

    /// Append one state
    pub fn push(&mut self, state: &KernelState) {
        self.positions.push(state.transform.position);
        self.rotations.push(state.transform.rotation);
        self.scales.push(state.transform.scale);
        self.velocities.push(state.velocity);
        self.angular_velocities.push(state.angular_velocity);
        self.masses.push(state.mass);
        self.custom.push(state.custom);
    }

    /// Number of packed states
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True when the batch holds no states
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Unpack the state at `index`
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn get(&self, index: usize) -> KernelState {
        KernelState {
            transform: Transform {
                position: self.positions[index],
                rotation: self.rotations[index],
                scale: self.scales[index],
            },
            velocity: self.velocities[index],
            angular_velocity: self.angular_velocities[index],
            mass: self.masses[index],
            custom: self.custom[index],
        }
    }

    /// Overwrite the state at `index`
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, state: &KernelState) {
        self.positions[index] = state.transform.position;
        self.rotations[index] = state.transform.rotation;
        self.scales[index] = state.transform.scale;
        self.velocities[index] = state.velocity;
        self.angular_velocities[index] = state.angular_velocity;
        self.masses[index] = state.mass;
        self.custom[index] = state.custom;
    }

    /// Unpack every state in order
    pub fn into_states(self) -> Vec<KernelState> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }
}
