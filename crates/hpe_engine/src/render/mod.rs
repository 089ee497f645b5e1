//! Rendering
//!
//! Two stages per frame:
//!
//! - [`visibility`] culls and orders the scene into a [`DrawList`].
//! - [`RenderBackendAdapter`] turns the draw list into device calls, creating
//!   GPU resources lazily and skipping redundant binds.
//!
//! The [`GraphicsDevice`] trait is the graphics-API seam. [`HeadlessDevice`]
//! records every call and serves both as the default backend and as the test
//! double.

mod backend;
mod device;
pub mod visibility;

pub use backend::{FrameStats, RenderBackendAdapter};
pub use device::{BufferId, BufferKind, DeviceCommand, GraphicsDevice, HeadlessDevice, ProgramId, TextureId};
pub use visibility::{DrawItem, DrawList};

use thiserror::Error;

/// Result type for device operations
pub type BackendResult<T> = Result<T, RenderError>;

/// Rendering error types
///
/// Shader and resource failures are scoped to the draw item that needed the
/// resource; the item is skipped and the frame continues. Frame-state and
/// device errors abort the frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// A shader program failed to compile
    #[error("Shader '{shader}' failed to compile: {reason}")]
    ShaderCompilation {
        /// Shader name
        shader: String,
        /// Compiler message
        reason: String,
    },

    /// A buffer or texture could not be created
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// A frame call arrived out of order
    #[error("Frame state error: {0}")]
    FrameState(String),

    /// The device itself failed
    #[error("Device error: {0}")]
    Device(String),
}

impl RenderError {
    /// Whether the error only affects the draw item that caused it
    pub fn is_item_scoped(&self) -> bool {
        matches!(self, Self::ShaderCompilation { .. } | Self::ResourceCreation(_))
    }
}
