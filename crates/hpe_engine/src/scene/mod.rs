//! Scene management system
//!
//! ## Architecture
//!
//! ```text
//! Editor / scripts ──SceneCommand──▶ CommandQueue (drained at Idle)
//!                                         │
//!                                         ▼
//!                                   SceneGraph ──▶ kernels, visibility
//! ```
//!
//! The graph holds the entity hierarchy with its per-entity component slots.
//! Scene files and the camera live alongside it.

mod camera;
mod command;
mod scene_file;
mod scene_graph;

pub use crate::foundation::bounds::{Frustum, Plane, AABB};
pub use camera::Camera;
pub use command::{CommandQueue, CommandSender, Reply, SceneCommand};
pub use scene_file::{
    CameraRecord, EnvironmentRecord, MaterialRecord, ObjectRecord, PhysicsRecord, PrimitiveRecord,
    SceneDocument, SceneInfo, TerrainRecord, TransformRecord, PHYSICS_NONE, PHYSICS_RIGID_BODY,
    SCENE_EXTENSION,
};
pub use scene_graph::{EntityFlags, EntityId, KernelComponent, SceneGraph, TransformSnapshot};

use thiserror::Error;

/// Scene editing errors
///
/// Every mutating operation that returns one of these has left the scene
/// exactly as it was.
#[derive(Error, Debug)]
pub enum SceneError {
    /// Stale or unknown entity id
    #[error("Entity not found: {0:?}")]
    EntityNotFound(EntityId),

    /// Stale or unknown asset handle
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Kernel not present in the registry
    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    /// Re-parenting would make an entity its own ancestor
    #[error("Parenting {child:?} under {parent:?} would create a cycle")]
    Cycle {
        /// Entity being moved
        child: EntityId,
        /// Requested parent
        parent: EntityId,
    },

    /// Zero scale or non-finite components
    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    /// Scene file could not be read, parsed or written
    #[error("Scene file error: {0}")]
    File(String),
}
