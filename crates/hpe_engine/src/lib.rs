//! # HPE Engine
//!
//! Scene update and render-dispatch pipeline of the Hamid Py Engine.
//!
//! ## Features
//!
//! - **Asset Store**: reference-counted meshes and materials with versioned handles
//! - **Scene Graph**: entity hierarchy with cycle-checked parenting and lazy or eager world transforms
//! - **Update Kernels**: scalar and batched numeric kernels, evaluated on scoped worker threads
//! - **Visibility**: frustum culling and deterministic draw ordering
//! - **Render Backend Adapter**: lazy GPU resources and state-change minimisation over a device trait
//! - **Frame Scheduler**: fixed or capped-variable timestep with strict phase ordering
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hpe_engine::prelude::*;
//!
//! struct Spinner;
//!
//! impl Application for Spinner {
//!     fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
//!         let cube = engine.assets_mut().add_primitive(Primitive::Cube)?;
//!         let material = engine.assets_mut().add_material(MaterialAsset::solid("red", [1.0, 0.0, 0.0, 1.0]));
//!         let (scene, assets) = engine.scene_and_assets();
//!         let entity = scene.create_named_entity("cube", None)?;
//!         scene.attach_mesh(entity, cube, assets)?;
//!         scene.attach_material(entity, material, assets)?;
//!         engine.attach_kernel(entity, "spin")?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = Engine::new(EngineConfig::default())?;
//!     engine.run(&mut Spinner, Some(120))?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod assets;
pub mod config;
pub mod foundation;
pub mod kernels;
pub mod render;
pub mod scene;
pub mod scheduler;

mod application;
mod engine;

#[cfg(test)]
mod tests;

pub use application::{AppError, Application};
pub use engine::{Engine, EngineError, FrameReport};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::{AssetError, AssetHandle, AssetStore, MaterialAsset, MaterialHandle, MeshAsset, MeshHandle, Primitive},
        config::{Config, EngineConfig},
        foundation::math::{Mat4, Quat, Transform, Vec3},
        kernels::{DispatchMode, KernelContext, KernelRegistry, KernelState, StateBatch, UpdateKernel},
        render::{DrawList, FrameStats, GraphicsDevice, HeadlessDevice},
        scene::{Camera, CommandSender, EntityFlags, EntityId, SceneCommand, SceneError, SceneGraph},
        AppError, Application, Engine, EngineError, FrameReport,
    };
}
