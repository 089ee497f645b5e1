//! Built-in kernels
//!
//! Each kernel funnels both entry points through one per-entity step function,
//! so batched and scalar evaluation perform the same floating-point operations
//! in the same order.

use super::{KernelContext, KernelState, StateBatch, UpdateKernel};
use crate::foundation::math::{Quat, Vec3};

/// Integrates linear velocity into position
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearMotion;

impl LinearMotion {
    /// Registry name
    pub const NAME: &'static str = "linear_motion";
}

fn integrate_position(position: &mut Vec3, velocity: &Vec3, dt: f32) {
    *position += velocity * dt;
}

impl UpdateKernel for LinearMotion {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate_scalar(&self, state: &KernelState, ctx: &KernelContext) -> KernelState {
        let mut next = *state;
        integrate_position(&mut next.transform.position, &next.velocity, ctx.dt);
        next
    }

    fn evaluate_batch(&self, batch: &mut StateBatch, ctx: &KernelContext) {
        for (position, velocity) in batch.positions.iter_mut().zip(&batch.velocities) {
            integrate_position(position, velocity, ctx.dt);
        }
    }
}

/// Integrates angular velocity into orientation
#[derive(Debug, Default, Clone, Copy)]
pub struct Spin;

impl Spin {
    /// Registry name
    pub const NAME: &'static str = "spin";
}

fn integrate_rotation(rotation: &mut Quat, angular_velocity: &Vec3, dt: f32) {
    let delta = Quat::from_scaled_axis(angular_velocity * dt);
    *rotation = delta * *rotation;
}

impl UpdateKernel for Spin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate_scalar(&self, state: &KernelState, ctx: &KernelContext) -> KernelState {
        let mut next = *state;
        integrate_rotation(&mut next.transform.rotation, &next.angular_velocity, ctx.dt);
        next
    }

    fn evaluate_batch(&self, batch: &mut StateBatch, ctx: &KernelContext) {
        for (rotation, omega) in batch.rotations.iter_mut().zip(&batch.angular_velocities) {
            integrate_rotation(rotation, omega, ctx.dt);
        }
    }
}

/// Mass-scaled gravity with air drag and a bouncing ground plane
///
/// Heavier bodies accelerate slightly faster, lose less speed to the air,
/// bounce less and grip the ground harder. The body rests on the ground when
/// its half height (half the Y scale) touches `ground_height`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Gravity;

impl Gravity {
    /// Registry name
    pub const NAME: &'static str = "gravity";
}

struct Body<'a> {
    position: &'a mut Vec3,
    rotation: &'a mut Quat,
    velocity: &'a mut Vec3,
    angular_velocity: &'a mut Vec3,
    half_height: f32,
    mass: f32,
}

fn gravity_step(body: Body<'_>, ctx: &KernelContext) {
    let mass = body.mass;

    let mass_factor = mass.min(5.0);
    *body.velocity += ctx.gravity * (ctx.dt * (0.8 + mass_factor * 0.04));

    let air_resistance = (0.98 + mass * 0.001).min(1.0);
    *body.velocity *= air_resistance;

    *body.position += *body.velocity * ctx.dt;

    let angular_damping = (0.99 - mass * 0.001).max(0.0);
    *body.angular_velocity *= angular_damping;

    if body.position.y - body.half_height <= ctx.ground_height {
        body.position.y = ctx.ground_height + body.half_height;

        let restitution = (0.5 - mass * 0.05).max(0.1);
        let friction = (0.5 + mass * 0.05).min(0.9);

        if body.velocity.y < 0.0 {
            body.velocity.y = -body.velocity.y * restitution;
        }

        let horizontal_speed = body.velocity.x.hypot(body.velocity.z);
        if horizontal_speed > 0.1 {
            body.velocity.x *= friction;
            body.velocity.z *= friction;

            // Sliding turns into rolling
            let rolling = (1.0 - friction) * mass * 0.1;
            body.angular_velocity.x += body.velocity.z * rolling;
            body.angular_velocity.z -= body.velocity.x * rolling;
        }
    }

    integrate_rotation(body.rotation, body.angular_velocity, ctx.dt);
}

impl UpdateKernel for Gravity {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate_scalar(&self, state: &KernelState, ctx: &KernelContext) -> KernelState {
        let mut next = *state;
        let half_height = next.transform.scale.y.abs() * 0.5;
        gravity_step(
            Body {
                position: &mut next.transform.position,
                rotation: &mut next.transform.rotation,
                velocity: &mut next.velocity,
                angular_velocity: &mut next.angular_velocity,
                half_height,
                mass: next.mass,
            },
            ctx,
        );
        next
    }

    fn evaluate_batch(&self, batch: &mut StateBatch, ctx: &KernelContext) {
        for i in 0..batch.len() {
            gravity_step(
                Body {
                    position: &mut batch.positions[i],
                    rotation: &mut batch.rotations[i],
                    velocity: &mut batch.velocities[i],
                    angular_velocity: &mut batch.angular_velocities[i],
                    half_height: batch.scales[i].y.abs() * 0.5,
                    mass: batch.masses[i],
                },
                ctx,
            );
        }
    }
}

/// Sinusoidal bob along Y
///
/// Custom fields: `[amplitude, angular frequency, phase, base height]`. The
/// phase advances every tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct Oscillate;

impl Oscillate {
    /// Registry name
    pub const NAME: &'static str = "oscillate";

    /// Custom fields for an oscillation starting at phase zero
    pub fn params(amplitude: f32, angular_frequency: f32, base_height: f32) -> [f32; 4] {
        [amplitude, angular_frequency, 0.0, base_height]
    }
}

fn oscillate_step(position: &mut Vec3, custom: &mut [f32; 4], dt: f32) {
    let [amplitude, frequency, phase, base] = *custom;
    let phase = phase + frequency * dt;
    custom[2] = phase;
    position.y = base + amplitude * phase.sin();
}

impl UpdateKernel for Oscillate {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate_scalar(&self, state: &KernelState, ctx: &KernelContext) -> KernelState {
        let mut next = *state;
        oscillate_step(&mut next.transform.position, &mut next.custom, ctx.dt);
        next
    }

    fn evaluate_batch(&self, batch: &mut StateBatch, ctx: &KernelContext) {
        for (position, custom) in batch.positions.iter_mut().zip(batch.custom.iter_mut()) {
            oscillate_step(position, custom, ctx.dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Transform;
    use approx::assert_relative_eq;

    fn states() -> Vec<KernelState> {
        (0..17)
            .map(|i| {
                let f = i as f32;
                let mut state = KernelState::new(Transform::from_position(Vec3::new(f, 2.0 + f * 0.3, -f)));
                state.velocity = Vec3::new(0.5 * f, 1.0 - f * 0.2, 0.25);
                state.angular_velocity = Vec3::new(0.1, f * 0.05, 0.0);
                state.mass = 0.5 + f * 0.4;
                state.custom = Oscillate::params(0.5 + f * 0.1, 2.0, 1.0);
                state
            })
            .collect()
    }

    fn assert_batch_matches_scalar(kernel: &dyn UpdateKernel) {
        let ctx = KernelContext::new(0.016, 1);
        let mut scalar = states();
        let mut batch = StateBatch::from_states(&scalar);

        for _ in 0..50 {
            scalar = scalar.iter().map(|s| kernel.evaluate_scalar(s, &ctx)).collect();
            kernel.evaluate_batch(&mut batch, &ctx);
        }

        assert_eq!(batch.into_states(), scalar, "kernel {}", kernel.name());
    }

    #[test]
    fn test_builtin_batches_match_scalar() {
        assert_batch_matches_scalar(&LinearMotion);
        assert_batch_matches_scalar(&Spin);
        assert_batch_matches_scalar(&Gravity);
        assert_batch_matches_scalar(&Oscillate);
    }

    #[test]
    fn test_linear_motion() {
        let mut state = KernelState::default();
        state.velocity = Vec3::new(1.0, 0.0, -2.0);
        let next = LinearMotion.evaluate_scalar(&state, &KernelContext::new(0.5, 1));
        assert_relative_eq!(next.transform.position, Vec3::new(0.5, 0.0, -1.0));
    }

    #[test]
    fn test_spin_quarter_turn() {
        let mut state = KernelState::default();
        state.angular_velocity = Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0);
        let next = Spin.evaluate_scalar(&state, &KernelContext::new(1.0, 1));
        let forward = next.transform.rotation * Vec3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(forward, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_gravity_falls_and_rests_on_ground() {
        let mut state = KernelState::new(Transform::from_position(Vec3::new(0.0, 3.0, 0.0)));
        let ctx = KernelContext::new(0.016, 1);

        let next = Gravity.evaluate_scalar(&state, &ctx);
        assert!(next.velocity.y < 0.0);
        assert!(next.transform.position.y < 3.0);

        for _ in 0..2000 {
            state = Gravity.evaluate_scalar(&state, &ctx);
            assert!(state.transform.position.y >= 0.5 - 1e-6);
        }
        assert_relative_eq!(state.transform.position.y, 0.5, epsilon = 0.05);
    }

    #[test]
    fn test_gravity_heavier_bounces_less() {
        let ctx = KernelContext::new(0.016, 1);
        let bounce = |mass: f32| {
            let mut state = KernelState::new(Transform::from_position(Vec3::new(0.0, 0.51, 0.0)));
            state.velocity.y = -5.0;
            state.mass = mass;
            Gravity.evaluate_scalar(&state, &ctx).velocity.y
        };
        assert!(bounce(1.0) > bounce(6.0));
        assert!(bounce(6.0) > 0.0);
    }

    #[test]
    fn test_oscillate_advances_phase() {
        let mut state = KernelState::default();
        state.custom = Oscillate::params(2.0, std::f32::consts::PI, 1.0);
        let next = Oscillate.evaluate_scalar(&state, &KernelContext::new(0.5, 1));
        assert_relative_eq!(next.custom[2], std::f32::consts::FRAC_PI_2);
        assert_relative_eq!(next.transform.position.y, 3.0);
    }
}
