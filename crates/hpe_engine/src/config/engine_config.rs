//! Engine settings
//!
//! Every table carries `#[serde(default)]`, so a partial file only overrides
//! what it names and unknown keys are ignored.

use super::{Config, ConfigError};
use crate::foundation::time::TimestepMode;
use crate::kernels::DispatchMode;
use serde::{Deserialize, Serialize};

/// Render quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenderQuality {
    /// Lowest quality
    Low,
    /// Balanced
    Medium,
    /// Full quality
    #[default]
    High,
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Window width in pixels
    pub window_width: u32,
    /// Window height in pixels
    pub window_height: u32,
    /// Frame pacing target
    pub target_fps: u32,
    /// Wait for vertical sync on present
    pub vsync: bool,
    /// Render quality preset
    pub render_quality: RenderQuality,
    /// Graphics backend name
    pub backend: String,
    /// Default camera
    pub camera: CameraSettings,
    /// Frame timestep
    pub timestep: TimestepSettings,
    /// Kernel dispatch
    pub dispatch: DispatchSettings,
    /// Asset lookup
    pub assets: AssetSettings,
    /// Environment parameters
    pub environment: EnvironmentSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_width: 1280,
            window_height: 720,
            target_fps: 60,
            vsync: true,
            render_quality: RenderQuality::High,
            backend: "headless".to_string(),
            camera: CameraSettings::default(),
            timestep: TimestepSettings::default(),
            dispatch: DispatchSettings::default(),
            assets: AssetSettings::default(),
            environment: EnvironmentSettings::default(),
        }
    }
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(ConfigError::Invalid {
                key: "window_width/window_height",
                reason: format!("{}x{} has no area", self.window_width, self.window_height),
            });
        }
        if self.target_fps == 0 {
            return Err(ConfigError::Invalid {
                key: "target_fps",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.timestep.fixed_dt > 0.0 && self.timestep.fixed_dt.is_finite()) {
            return Err(ConfigError::Invalid {
                key: "timestep.fixed_dt",
                reason: format!("{} is not a positive duration", self.timestep.fixed_dt),
            });
        }
        if self.timestep.max_catch_up_steps == 0 {
            return Err(ConfigError::Invalid {
                key: "timestep.max_catch_up_steps",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.timestep.max_frame_time > 0.0 && self.timestep.max_frame_time.is_finite()) {
            return Err(ConfigError::Invalid {
                key: "timestep.max_frame_time",
                reason: format!("{} is not a positive duration", self.timestep.max_frame_time),
            });
        }
        if !(self.camera.fov_y > 0.0 && self.camera.fov_y < 180.0) {
            return Err(ConfigError::Invalid {
                key: "camera.fov_y",
                reason: format!("{} is not between 0 and 180 degrees", self.camera.fov_y),
            });
        }
        if !(self.camera.near > 0.0 && self.camera.far > self.camera.near) {
            return Err(ConfigError::Invalid {
                key: "camera.near/camera.far",
                reason: format!("near {} / far {} do not form a depth range", self.camera.near, self.camera.far),
            });
        }
        Ok(())
    }

    /// Width over height
    pub fn aspect_ratio(&self) -> f32 {
        self.window_width as f32 / self.window_height.max(1) as f32
    }
}

/// Default camera placement and projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Eye position
    pub position: [f32; 3],
    /// Yaw in degrees
    pub yaw: f32,
    /// Pitch in degrees
    pub pitch: f32,
    /// Vertical field of view in degrees
    pub fov_y: f32,
    /// Near clip distance
    pub near: f32,
    /// Far clip distance
    pub far: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            position: [0.0, 1.0, 5.0],
            yaw: -90.0,
            pitch: 0.0,
            fov_y: 45.0,
            near: 0.1,
            far: 2000.0,
        }
    }
}

/// Frame timestep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestepSettings {
    /// Fixed or capped-variable stepping
    pub mode: TimestepMode,
    /// Simulation step in seconds
    pub fixed_dt: f32,
    /// Maximum update ticks per real frame
    pub max_catch_up_steps: u32,
    /// Longest real frame accounted for, in seconds
    pub max_frame_time: f32,
}

impl Default for TimestepSettings {
    fn default() -> Self {
        Self {
            mode: TimestepMode::Fixed,
            fixed_dt: 1.0 / 60.0,
            max_catch_up_steps: 5,
            max_frame_time: 0.25,
        }
    }
}

/// Kernel dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Scalar, batched, or chosen per kernel group
    pub mode: DispatchMode,
    /// Group size at which `Auto` switches to batched evaluation
    pub batch_threshold: usize,
    /// Worker threads for the update phase, 0 for available parallelism
    pub worker_threads: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Auto,
            batch_threshold: 32,
            worker_threads: 0,
        }
    }
}

/// Asset lookup settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    /// Directories searched before treating a path as given
    pub search_paths: Vec<String>,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            search_paths: vec!["assets".to_string()],
        }
    }
}

/// Environment parameters shared by kernels and the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Clear colour
    pub sky_color: [f32; 4],
    /// Gravity vector fed to kernels
    pub gravity: [f32; 3],
    /// Height of the ground plane kernels collide with
    pub ground_height: f32,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            sky_color: [0.53, 0.81, 0.92, 1.0],
            gravity: [0.0, -9.81, 0.0],
            ground_height: 0.0,
        }
    }
}
