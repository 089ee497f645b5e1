//! Render backend adapter
//!
//! Owns every GPU handle in the engine. Mesh buffers, material textures and
//! shader programs are created the first time a draw item needs them and
//! destroyed when the asset store reports the backing asset unloaded or
//! reloaded.

use super::device::{BufferId, BufferKind, GraphicsDevice, ProgramId, TextureId};
use super::visibility::{DrawItem, DrawList};
use super::{BackendResult, RenderError};
use crate::assets::{AssetEvent, AssetHandle, AssetStore, MaterialHandle, MeshHandle};
use crate::foundation::math::Mat4;
use std::collections::{HashMap, HashSet};

/// Per-frame submission statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Draw calls issued
    pub draws: usize,
    /// Draw items dropped because a resource was unavailable
    pub skipped: usize,
    /// Program binds issued
    pub program_binds: usize,
    /// Material binds issued
    pub material_binds: usize,
    /// Mesh binds issued
    pub mesh_binds: usize,
    /// GPU resources created this frame
    pub resources_created: usize,
    /// GPU resources destroyed since the previous frame began
    pub resources_destroyed: usize,
    /// Item-scoped failures raised this frame
    pub errors: Vec<RenderError>,
}

#[derive(Debug, Clone, Copy)]
struct GpuMesh {
    vertices: BufferId,
    indices: BufferId,
    index_count: u32,
}

#[derive(Debug, Clone)]
struct GpuMaterial {
    program: ProgramId,
    textures: Vec<TextureId>,
    base_color: [f32; 4],
    uniforms: Vec<(String, f32)>,
}

/// Currently bound device state
#[derive(Debug, Clone, Copy, Default)]
struct Bound {
    program: Option<ProgramId>,
    material: Option<MaterialHandle>,
    mesh: Option<MeshHandle>,
}

/// Translates draw lists into device calls
pub struct RenderBackendAdapter {
    device: Box<dyn GraphicsDevice>,
    meshes: HashMap<MeshHandle, GpuMesh>,
    materials: HashMap<MaterialHandle, GpuMaterial>,
    programs: HashMap<String, ProgramId>,
    failed: HashSet<AssetHandle>,
    bound: Bound,
    in_frame: bool,
    clear_color: [f32; 4],
    stats: FrameStats,
    destroyed_between_frames: usize,
}

impl RenderBackendAdapter {
    /// Wrap a device
    pub fn new(device: Box<dyn GraphicsDevice>, clear_color: [f32; 4]) -> Self {
        log::info!("Render backend using '{}' device", device.name());
        Self {
            device,
            meshes: HashMap::new(),
            materials: HashMap::new(),
            programs: HashMap::new(),
            failed: HashSet::new(),
            bound: Bound::default(),
            in_frame: false,
            clear_color,
            stats: FrameStats::default(),
            destroyed_between_frames: 0,
        }
    }

    /// Set the colour the next frame is cleared to
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    /// Clear colour
    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Start a frame
    pub fn begin_frame(&mut self, view_projection: &Mat4) -> BackendResult<()> {
        if self.in_frame {
            return Err(RenderError::FrameState("begin_frame called twice".to_string()));
        }
        self.device.begin_frame(self.clear_color, view_projection)?;
        self.in_frame = true;
        self.bound = Bound::default();
        self.stats = FrameStats {
            resources_destroyed: std::mem::take(&mut self.destroyed_between_frames),
            ..FrameStats::default()
        };
        Ok(())
    }

    /// Draw every item in order
    ///
    /// Shader or resource failures skip the offending item. Any other device
    /// error is returned and the frame should be aborted.
    pub fn submit(&mut self, list: &DrawList, assets: &AssetStore) -> BackendResult<()> {
        if !self.in_frame {
            return Err(RenderError::FrameState("submit called outside a frame".to_string()));
        }

        for item in &list.items {
            if self.failed.contains(&AssetHandle::Mesh(item.mesh))
                || self.failed.contains(&AssetHandle::Material(item.material))
            {
                log::trace!("Skipping {:?}: asset failed earlier", item.entity);
                self.stats.skipped += 1;
                continue;
            }

            match self.draw(item, assets) {
                Ok(()) => {}
                Err(e) if e.is_item_scoped() => {
                    log::warn!("Skipping draw of {:?}: {}", item.entity, e);
                    self.stats.skipped += 1;
                    self.stats.errors.push(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Finish recording
    pub fn end_frame(&mut self) -> BackendResult<()> {
        if !self.in_frame {
            return Err(RenderError::FrameState("end_frame called outside a frame".to_string()));
        }
        self.device.end_frame()
    }

    /// Present and close the frame
    pub fn present(&mut self) -> BackendResult<FrameStats> {
        self.device.present()?;
        self.in_frame = false;
        log::debug!(
            "Presented: {} draws, {} skipped, binds {}/{}/{} (program/material/mesh)",
            self.stats.draws,
            self.stats.skipped,
            self.stats.program_binds,
            self.stats.material_binds,
            self.stats.mesh_binds
        );
        Ok(self.stats.clone())
    }

    /// Discard the frame in progress
    pub fn abort_frame(&mut self) {
        if self.in_frame {
            log::error!("Aborting frame after {} draws", self.stats.draws);
        }
        self.device.abort_frame();
        self.in_frame = false;
        self.bound = Bound::default();
    }

    /// React to an asset store notification
    pub fn on_asset_event(&mut self, event: AssetEvent) {
        let handle = match event {
            AssetEvent::Unloaded(h) | AssetEvent::Reloaded(h) => h,
        };
        self.failed.remove(&handle);

        match handle {
            AssetHandle::Mesh(h) => {
                if let Some(gpu) = self.meshes.remove(&h) {
                    self.device.destroy_buffer(gpu.vertices);
                    self.device.destroy_buffer(gpu.indices);
                    self.destroyed_between_frames += 2;
                    log::debug!("Released GPU buffers for {}", handle);
                }
                if self.bound.mesh == Some(h) {
                    self.bound.mesh = None;
                }
            }
            AssetHandle::Material(h) => {
                if let Some(gpu) = self.materials.remove(&h) {
                    self.destroyed_between_frames += gpu.textures.len();
                    for texture in gpu.textures {
                        self.device.destroy_texture(texture);
                    }
                    log::debug!("Released GPU textures for {}", handle);
                }
                if self.bound.material == Some(h) {
                    self.bound.material = None;
                }
            }
        }
    }

    /// Release every GPU resource
    pub fn shutdown(&mut self) {
        if self.in_frame {
            self.abort_frame();
        }
        for (_, gpu) in self.meshes.drain() {
            self.device.destroy_buffer(gpu.vertices);
            self.device.destroy_buffer(gpu.indices);
        }
        for (_, gpu) in self.materials.drain() {
            for texture in gpu.textures {
                self.device.destroy_texture(texture);
            }
        }
        for (_, program) in self.programs.drain() {
            self.device.destroy_program(program);
        }
        self.failed.clear();
        log::info!("Render backend shut down");
    }

    /// Whether a GPU copy of `handle` exists
    pub fn has_gpu_resources(&self, handle: AssetHandle) -> bool {
        match handle {
            AssetHandle::Mesh(h) => self.meshes.contains_key(&h),
            AssetHandle::Material(h) => self.materials.contains_key(&h),
        }
    }

    /// Statistics of the current or last frame
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// The device behind the adapter
    pub fn device(&self) -> &dyn GraphicsDevice {
        self.device.as_ref()
    }

    /// Downcast the device to its concrete type
    pub fn device_as<T: 'static>(&self) -> Option<&T> {
        self.device.as_any().downcast_ref::<T>()
    }

    /// Mutable downcast of the device
    pub fn device_as_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.device.as_any_mut().downcast_mut::<T>()
    }

    fn draw(&mut self, item: &DrawItem, assets: &AssetStore) -> BackendResult<()> {
        let material = self.gpu_material(item.material, assets)?;
        let mesh = self.gpu_mesh(item.mesh, assets)?;

        if self.bound.program != Some(material.program) {
            self.device.bind_program(material.program);
            self.bound.program = Some(material.program);
            self.bound.material = None;
            self.stats.program_binds += 1;
        }
        if self.bound.material != Some(item.material) {
            self.device.bind_material(&material.textures, material.base_color, &material.uniforms);
            self.bound.material = Some(item.material);
            self.stats.material_binds += 1;
        }
        if self.bound.mesh != Some(item.mesh) {
            self.device.bind_mesh(mesh.vertices, mesh.indices);
            self.bound.mesh = Some(item.mesh);
            self.stats.mesh_binds += 1;
        }

        log::trace!("Draw {:?} ({} indices)", item.entity, mesh.index_count);
        self.device.draw_indexed(mesh.index_count, &item.world, item.translucent);
        self.stats.draws += 1;
        Ok(())
    }

    fn gpu_mesh(&mut self, handle: MeshHandle, assets: &AssetStore) -> BackendResult<GpuMesh> {
        if let Some(gpu) = self.meshes.get(&handle) {
            return Ok(*gpu);
        }
        let result = self.upload_mesh(handle, assets);
        self.note_result(AssetHandle::Mesh(handle), &result);
        let gpu = result?;
        self.meshes.insert(handle, gpu);
        Ok(gpu)
    }

    fn upload_mesh(&mut self, handle: MeshHandle, assets: &AssetStore) -> BackendResult<GpuMesh> {
        let mesh = assets
            .mesh(handle)
            .ok_or_else(|| RenderError::ResourceCreation(format!("mesh {:?} is not loaded", handle)))?;
        let index_count = u32::try_from(mesh.indices().len())
            .map_err(|_| RenderError::ResourceCreation("index count exceeds u32".to_string()))?;

        let vertices = self.device.create_buffer(BufferKind::Vertex, &mesh.vertex_bytes())?;
        let indices = match self.device.create_buffer(BufferKind::Index, mesh.index_bytes()) {
            Ok(indices) => indices,
            Err(e) => {
                self.device.destroy_buffer(vertices);
                return Err(e);
            }
        };
        self.stats.resources_created += 2;
        Ok(GpuMesh {
            vertices,
            indices,
            index_count,
        })
    }

    fn gpu_material(&mut self, handle: MaterialHandle, assets: &AssetStore) -> BackendResult<GpuMaterial> {
        if let Some(gpu) = self.materials.get(&handle) {
            return Ok(gpu.clone());
        }
        let result = self.upload_material(handle, assets);
        self.note_result(AssetHandle::Material(handle), &result);
        let gpu = result?;
        self.materials.insert(handle, gpu.clone());
        Ok(gpu)
    }

    fn upload_material(&mut self, handle: MaterialHandle, assets: &AssetStore) -> BackendResult<GpuMaterial> {
        let material = assets
            .material(handle)
            .ok_or_else(|| RenderError::ResourceCreation(format!("material {:?} is not loaded", handle)))?;

        let program = match self.programs.get(&material.shader) {
            Some(&program) => program,
            None => {
                let program = self.device.compile_program(&material.shader)?;
                self.programs.insert(material.shader.clone(), program);
                self.stats.resources_created += 1;
                program
            }
        };

        let mut textures = Vec::with_capacity(material.textures.len());
        for texture in &material.textures {
            let image = &texture.image;
            match self.device.create_texture(image.width, image.height, &image.data) {
                Ok(id) => textures.push(id),
                Err(e) => {
                    for id in textures {
                        self.device.destroy_texture(id);
                    }
                    return Err(e);
                }
            }
        }
        self.stats.resources_created += textures.len();

        Ok(GpuMaterial {
            program,
            textures,
            base_color: material.base_color,
            uniforms: material.uniforms.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        })
    }

    /// Remember item-scoped failures so they are not retried every frame
    fn note_result<T>(&mut self, handle: AssetHandle, result: &BackendResult<T>) {
        if let Err(e) = result {
            if e.is_item_scoped() {
                self.failed.insert(handle);
            }
        }
    }
}

impl std::fmt::Debug for RenderBackendAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBackendAdapter")
            .field("device", &self.device.name())
            .field("meshes", &self.meshes.len())
            .field("materials", &self.materials.len())
            .field("programs", &self.programs.len())
            .field("in_frame", &self.in_frame)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{MaterialAsset, Primitive};
    use crate::foundation::math::{Transform, Vec3};
    use crate::render::device::{DeviceCommand, HeadlessDevice};
    use crate::render::visibility;
    use crate::scene::{Camera, SceneGraph};

    fn adapter() -> RenderBackendAdapter {
        RenderBackendAdapter::new(Box::new(HeadlessDevice::new()), [0.0, 0.0, 0.0, 1.0])
    }

    fn scene_with(assets: &mut AssetStore, materials: &[MaterialHandle]) -> (SceneGraph, DrawList) {
        let cube = assets.add_primitive(Primitive::Cube).unwrap();
        let mut scene = SceneGraph::new();
        for (i, &material) in materials.iter().enumerate() {
            let e = scene.create_entity(None).unwrap();
            scene
                .set_transform(e, Transform::from_position(Vec3::new(i as f32, 0.0, -5.0 - i as f32)))
                .unwrap();
            scene.attach_mesh(e, cube, assets).unwrap();
            scene.attach_material(e, material, assets).unwrap();
        }
        let mut camera = Camera::default();
        camera.position = Vec3::new(0.0, 0.0, 5.0);
        let list = visibility::resolve(&scene, assets, &camera);
        (scene, list)
    }

    fn render(adapter: &mut RenderBackendAdapter, list: &DrawList, assets: &AssetStore) -> FrameStats {
        adapter.begin_frame(&Mat4::identity()).unwrap();
        adapter.submit(list, assets).unwrap();
        adapter.end_frame().unwrap();
        adapter.present().unwrap()
    }

    #[test]
    fn test_shared_material_binds_once() {
        let mut assets = AssetStore::default();
        let red = assets.add_material(MaterialAsset::solid("red", [1.0, 0.0, 0.0, 1.0]));
        let (_scene, list) = scene_with(&mut assets, &[red, red, red]);
        assert_eq!(list.len(), 3);

        let mut adapter = adapter();
        let stats = render(&mut adapter, &list, &assets);
        assert_eq!(stats.draws, 3);
        assert_eq!(stats.program_binds, 1);
        assert_eq!(stats.material_binds, 1);
        assert_eq!(stats.mesh_binds, 1);
        assert_eq!(stats.resources_created, 3);

        let second = render(&mut adapter, &list, &assets);
        assert_eq!(second.resources_created, 0);
        assert_eq!(second.material_binds, 1);
    }

    #[test]
    fn test_material_change_rebinds_material_not_program() {
        let mut assets = AssetStore::default();
        let red = assets.add_material(MaterialAsset::solid("red", [1.0, 0.0, 0.0, 1.0]));
        let blue = assets.add_material(MaterialAsset::solid("blue", [0.0, 0.0, 1.0, 1.0]));
        let (_scene, list) = scene_with(&mut assets, &[red, blue]);

        let mut adapter = adapter();
        let stats = render(&mut adapter, &list, &assets);
        assert_eq!(stats.program_binds, 1);
        assert_eq!(stats.material_binds, 2);
        assert_eq!(stats.mesh_binds, 1);
    }

    #[test]
    fn test_shader_failure_skips_item_only() {
        let mut assets = AssetStore::default();
        let good = assets.add_material(MaterialAsset::solid("good", [1.0; 4]));
        let bad = assets.add_material(MaterialAsset::solid("bad", [1.0; 4]).with_shader("broken"));
        let (_scene, list) = scene_with(&mut assets, &[good, bad, bad]);

        let mut device = HeadlessDevice::new();
        device.fail_shader("broken");
        let mut adapter = RenderBackendAdapter::new(Box::new(device), [0.0; 4]);

        let stats = render(&mut adapter, &list, &assets);
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.errors.len(), 1);
        assert!(matches!(stats.errors[0], RenderError::ShaderCompilation { .. }));
        assert_eq!(adapter.device_as::<HeadlessDevice>().unwrap().frames_presented(), 1);
    }

    #[test]
    fn test_unload_event_destroys_gpu_copy() {
        let mut assets = AssetStore::default();
        let red = assets.add_material(MaterialAsset::solid("red", [1.0; 4]));
        let (_scene, list) = scene_with(&mut assets, &[red]);
        let mesh = list.items[0].mesh;

        let mut adapter = adapter();
        render(&mut adapter, &list, &assets);
        assert!(adapter.has_gpu_resources(mesh.into()));

        adapter.on_asset_event(AssetEvent::Unloaded(mesh.into()));
        assert!(!adapter.has_gpu_resources(mesh.into()));
        let destroyed = adapter
            .device_as::<HeadlessDevice>()
            .unwrap()
            .commands()
            .iter()
            .filter(|c| matches!(c, DeviceCommand::DestroyBuffer(_)))
            .count();
        assert_eq!(destroyed, 2);

        adapter.begin_frame(&Mat4::identity()).unwrap();
        assert_eq!(adapter.stats().resources_destroyed, 2);
        adapter.abort_frame();
    }

    #[test]
    fn test_submit_outside_frame_is_rejected() {
        let assets = AssetStore::default();
        let mut adapter = adapter();
        assert!(matches!(
            adapter.submit(&DrawList::default(), &assets),
            Err(RenderError::FrameState(_))
        ));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut assets = AssetStore::default();
        let red = assets.add_material(MaterialAsset::solid("red", [1.0; 4]));
        let (_scene, list) = scene_with(&mut assets, &[red]);

        let mut adapter = adapter();
        render(&mut adapter, &list, &assets);
        assert!(adapter.device_as::<HeadlessDevice>().unwrap().live_resources() > 0);
        adapter.shutdown();
        assert_eq!(adapter.device_as::<HeadlessDevice>().unwrap().live_resources(), 0);
    }
}
