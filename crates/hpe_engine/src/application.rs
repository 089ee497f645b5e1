//! Application trait and lifecycle hooks

use crate::assets::AssetError;
use crate::engine::{Engine, FrameReport};
use crate::scene::SceneError;
use thiserror::Error;

/// Application lifecycle trait
///
/// Implement this to drive scripted logic from [`Engine::run`]. Every hook runs
/// while the scheduler is idle, so the scene may be edited directly.
pub trait Application {
    /// Called once before the first frame. Load assets and build the scene here.
    fn initialize(&mut self, _engine: &mut Engine) -> Result<(), AppError> {
        Ok(())
    }

    /// Called before each frame
    fn on_idle(&mut self, _engine: &mut Engine) -> Result<(), AppError> {
        Ok(())
    }

    /// Called after each presented frame with what happened in it
    fn on_frame(&mut self, _engine: &mut Engine, _report: &FrameReport) -> Result<(), AppError> {
        Ok(())
    }

    /// Called once when the loop stops
    fn cleanup(&mut self, _engine: &mut Engine) {}
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Scene edit failed
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    /// Asset operation failed
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Custom application error
    #[error("Application error: {0}")]
    Custom(String),
}
