//! Cross-component scenario tests

mod pipeline;

use crate::assets::{AssetStore, MaterialAsset, MaterialHandle, MeshHandle, Primitive};
use crate::config::EngineConfig;
use crate::foundation::math::{Transform, Vec3};
use crate::scene::{EntityId, SceneGraph};
use crate::Engine;

/// Headless engine with no asset search paths and a fixed worker count
pub(crate) fn test_engine(worker_threads: usize) -> Engine {
    let mut config = EngineConfig::default();
    config.assets.search_paths.clear();
    config.dispatch.worker_threads = worker_threads;
    match Engine::new(config) {
        Ok(engine) => engine,
        Err(err) => panic!("headless engine failed to start: {}", err),
    }
}

/// A shared cube mesh and an opaque material
pub(crate) fn cube_and_material(assets: &mut AssetStore, name: &str) -> (MeshHandle, MaterialHandle) {
    let cube = assets.add_primitive(Primitive::Cube).unwrap();
    let material = assets.add_material(MaterialAsset::solid(name, [0.8, 0.8, 0.8, 1.0]));
    (cube, material)
}

/// Renderable root entity at `position`
pub(crate) fn spawn(
    scene: &mut SceneGraph,
    assets: &mut AssetStore,
    position: Vec3,
    mesh: MeshHandle,
    material: MaterialHandle,
) -> EntityId {
    let entity = scene.create_entity(None).unwrap();
    scene.set_transform(entity, Transform::from_position(position)).unwrap();
    scene.attach_mesh(entity, mesh, assets).unwrap();
    scene.attach_material(entity, material, assets).unwrap();
    entity
}

/// Fresh scratch directory under the system temp dir
pub(crate) fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("hpe_engine_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
