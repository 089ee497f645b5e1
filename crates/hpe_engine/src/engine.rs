//! Core engine implementation
//!
//! [`Engine`] is the explicit context object that owns every component. One
//! call to [`Engine::run_frame`] is one trip around the pipeline:
//!
//! ```text
//! Idle ── drain SceneCommands, apply in order
//!   │
//! Updating ── dispatcher ticks (0..n fixed steps)
//!   │
//! Resolving ── visibility::resolve -> DrawList
//!   │
//! Rendering ── adapter begin / submit / end
//!   │
//! Presenting ── adapter present -> FrameStats
//!   │
//! Idle
//! ```
//!
//! A fatal render error aborts the frame: the device discards what it
//! recorded and the scheduler drops back to `Idle`.

use crate::application::{AppError, Application};
use crate::assets::{AssetError, AssetEvent, AssetHandle, AssetStore};
use crate::config::{ConfigError, EngineConfig};
use crate::foundation::math::Vec3;
use crate::foundation::time::Stopwatch;
use crate::kernels::{Dispatcher, KernelFault, KernelRegistry};
use crate::render::{visibility, DrawList, FrameStats, GraphicsDevice, HeadlessDevice, RenderBackendAdapter, RenderError};
use crate::scene::{
    Camera, CommandQueue, CommandSender, EntityId, SceneCommand, SceneDocument, SceneError, SceneGraph, TransformSnapshot,
};
use crate::scheduler::{FramePhase, FrameScheduler, PhaseError};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Everything that happened in one frame
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// 1-based frame index
    pub frame: u64,
    /// Update ticks run
    pub steps: u32,
    /// Simulation time discarded by the catch-up cap, in seconds
    pub dropped: f64,
    /// Entities frozen by numeric faults
    pub faults: Vec<KernelFault>,
    /// What was drawn, in order
    pub draw_list: DrawList,
    /// Adapter statistics
    pub render: FrameStats,
    /// Queued commands applied at the start of the frame
    pub applied_commands: usize,
    /// Queued commands that failed, with the reason
    pub rejected_commands: Vec<String>,
    /// A `Quit` command arrived
    pub quit_requested: bool,
}

/// Main engine struct
///
/// Coordinates the asset store, scene graph, kernel dispatcher, render
/// backend and frame scheduler.
pub struct Engine {
    config: EngineConfig,
    assets: AssetStore,
    scene: SceneGraph,
    registry: KernelRegistry,
    dispatcher: Dispatcher,
    camera: Camera,
    renderer: RenderBackendAdapter,
    scheduler: FrameScheduler,
    commands: CommandQueue,
    saved_transforms: Option<TransformSnapshot>,
    quit_requested: bool,
    shut_down: bool,
}

impl Engine {
    /// Create an engine with the backend named in the config
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let device: Box<dyn GraphicsDevice> = match config.backend.as_str() {
            "headless" => Box::new(HeadlessDevice::new()),
            other => {
                return Err(EngineError::FatalInit(format!(
                    "no graphics context available for backend '{}'",
                    other
                )))
            }
        };
        Self::with_device(config, device)
    }

    /// Create an engine around a caller-supplied device
    pub fn with_device(config: EngineConfig, device: Box<dyn GraphicsDevice>) -> Result<Self, EngineError> {
        log::info!("Initializing engine...");
        config.validate()?;

        let mut dispatcher = Dispatcher::new(&config.dispatch);
        dispatcher.set_environment(Vec3::from(config.environment.gravity), config.environment.ground_height);

        let engine = Self {
            assets: AssetStore::new(config.assets.search_paths.iter().cloned()),
            scene: SceneGraph::new(),
            registry: KernelRegistry::with_builtins(),
            dispatcher,
            camera: Camera::from_settings(&config.camera, config.aspect_ratio()),
            renderer: RenderBackendAdapter::new(device, config.environment.sky_color),
            scheduler: FrameScheduler::new(&config.timestep),
            commands: CommandQueue::new(),
            saved_transforms: None,
            quit_requested: false,
            shut_down: false,
            config,
        };

        log::info!(
            "Engine ready: {}x{} @ {} fps, vsync {}, quality {:?}, {} kernels",
            engine.config.window_width,
            engine.config.window_height,
            engine.config.target_fps,
            engine.config.vsync,
            engine.config.render_quality,
            engine.registry.len()
        );
        Ok(engine)
    }

    /// Run the main loop until quit or `max_frames`
    ///
    /// Frames are paced to `target_fps`. Returns the number of frames run.
    pub fn run<A: Application>(&mut self, app: &mut A, max_frames: Option<u64>) -> Result<u64, EngineError> {
        app.initialize(self)?;
        log::info!("Starting main loop...");

        let target = Duration::from_secs_f64(1.0 / f64::from(self.config.target_fps));
        let mut last = Instant::now();
        let mut frames = 0;

        while !self.quit_requested && max_frames.map_or(true, |max| frames < max) {
            app.on_idle(self)?;
            if self.quit_requested {
                break;
            }

            let start = Instant::now();
            let report = self.run_frame(start - last)?;
            last = start;
            frames += 1;
            app.on_frame(self, &report)?;

            let spent = start.elapsed();
            if spent < target {
                thread::sleep(target - spent);
            }
        }

        app.cleanup(self);
        log::info!("Main loop stopped after {} frames", frames);
        Ok(frames)
    }

    /// Run one frame for `elapsed` wall time
    pub fn run_frame(&mut self, elapsed: Duration) -> Result<FrameReport, EngineError> {
        match self.frame(elapsed) {
            Ok(report) => Ok(report),
            Err(err) => {
                self.renderer.abort_frame();
                self.scheduler.abort();
                Err(err)
            }
        }
    }

    fn frame(&mut self, elapsed: Duration) -> Result<FrameReport, EngineError> {
        let mut report = FrameReport::default();
        let mut update_timer = Stopwatch::new();
        self.apply_commands(&mut report);
        self.sync_asset_events();

        let plan = self.scheduler.begin_frame(elapsed)?;
        report.frame = self.scheduler.frame_index();
        report.steps = plan.steps;
        report.dropped = plan.dropped;
        update_timer.start();
        for _ in 0..plan.steps {
            let tick = self.dispatcher.tick(&mut self.scene, &self.registry, plan.dt);
            report.faults.extend(tick.faults);
        }
        update_timer.stop();

        self.scheduler.advance(FramePhase::Resolving)?;
        report.draw_list = visibility::resolve(&self.scene, &self.assets, &self.camera);

        self.scheduler.advance(FramePhase::Rendering)?;
        let render_timer = Stopwatch::start_new();
        self.renderer.begin_frame(&self.camera.view_projection())?;
        self.renderer.submit(&report.draw_list, &self.assets)?;
        self.renderer.end_frame()?;

        self.scheduler.advance(FramePhase::Presenting)?;
        report.render = self.renderer.present()?;
        self.scheduler.finish_frame()?;
        log::debug!(
            "Frame {}: {} steps in {:.2} ms, {} draws in {:.2} ms",
            report.frame,
            report.steps,
            update_timer.elapsed_millis(),
            report.render.draws,
            render_timer.elapsed_millis()
        );

        report.quit_requested = self.quit_requested;
        Ok(report)
    }

    fn apply_commands(&mut self, report: &mut FrameReport) {
        for command in self.commands.drain() {
            let name = command.name();
            match self.apply_command(command) {
                Ok(()) => report.applied_commands += 1,
                Err(reason) => {
                    log::warn!("Queued {} rejected: {}", name, reason);
                    report.rejected_commands.push(format!("{}: {}", name, reason));
                }
            }
        }
    }

    fn apply_command(&mut self, command: SceneCommand) -> Result<(), String> {
        match command {
            SceneCommand::CreateEntity { name, parent, reply } => {
                let result = match name {
                    Some(name) => self.scene.create_named_entity(name, parent),
                    None => self.scene.create_entity(parent),
                };
                let outcome = result.as_ref().map(|_| ()).map_err(ToString::to_string);
                if let Some(reply) = reply {
                    // The requester may have stopped listening.
                    let _ = reply.send(result);
                }
                outcome
            }
            SceneCommand::DestroyEntity(id) => self
                .scene
                .destroy_entity(id, &mut self.assets)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            SceneCommand::DuplicateEntity(id) => self
                .scene
                .duplicate_entity(id, &mut self.assets)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            SceneCommand::SetTransform(id, transform) => {
                self.scene.set_transform(id, transform).map_err(|e| e.to_string())
            }
            SceneCommand::SetParent(id, parent) => self.scene.set_parent(id, parent).map_err(|e| e.to_string()),
            SceneCommand::AttachMesh(id, mesh) => self
                .scene
                .attach_mesh(id, mesh, &mut self.assets)
                .map_err(|e| e.to_string()),
            SceneCommand::AttachMaterial(id, material) => self
                .scene
                .attach_material(id, material, &mut self.assets)
                .map_err(|e| e.to_string()),
            SceneCommand::AttachKernel(id, kernel) => self.attach_kernel(id, &kernel).map_err(|e| e.to_string()),
            SceneCommand::SetFlags(id, flags) => self.scene.set_flags(id, flags).map_err(|e| e.to_string()),
            SceneCommand::LoadAsset { path, reply } => {
                let result = self.assets.load(&path);
                let outcome = result.as_ref().map(|_| ()).map_err(ToString::to_string);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                outcome
            }
            SceneCommand::UnloadAsset { handle, force } => {
                self.unload_asset(handle, force).map(|_| ()).map_err(|e| e.to_string())
            }
            SceneCommand::ReloadAsset(handle) => self.reload_asset(handle).map_err(|e| e.to_string()),
            SceneCommand::SetCamera { position, yaw, pitch } => {
                self.camera.position = position;
                self.camera.set_orientation(yaw, pitch);
                Ok(())
            }
            SceneCommand::SnapshotTransforms => {
                self.snapshot_transforms();
                Ok(())
            }
            SceneCommand::RestoreTransforms => self
                .restore_transforms()
                .map(|_| ())
                .ok_or_else(|| "no transform snapshot taken".to_string()),
            SceneCommand::Quit => {
                log::info!("Engine shutdown requested");
                self.quit_requested = true;
                Ok(())
            }
        }
    }

    /// Save every entity's transform and kernel motion, replacing any earlier save
    pub fn snapshot_transforms(&mut self) -> usize {
        let snapshot = self.scene.snapshot_transforms();
        let saved = snapshot.len();
        self.saved_transforms = Some(snapshot);
        log::info!("Saved transforms of {} entities", saved);
        saved
    }

    /// Return entities to the last saved transforms
    ///
    /// The save is kept, so it can be restored again. `None` when nothing
    /// was saved.
    pub fn restore_transforms(&mut self) -> Option<usize> {
        let snapshot = self.saved_transforms.as_ref()?;
        let restored = self.scene.restore_transforms(snapshot);
        log::info!("Restored transforms of {} entities", restored);
        Some(restored)
    }

    /// Attach a registered kernel by name
    pub fn attach_kernel(&mut self, id: EntityId, kernel: &str) -> Result<(), SceneError> {
        let kernel_id = self
            .registry
            .lookup(kernel)
            .ok_or_else(|| SceneError::KernelNotFound(kernel.to_string()))?;
        self.scene.attach_kernel(id, kernel_id, &self.registry)
    }

    /// Load an asset file
    pub fn load_asset<P: AsRef<Path>>(&mut self, path: P) -> Result<AssetHandle, AssetError> {
        self.assets.load(path)
    }

    /// Unload an asset, nulling live references when `force` is set
    pub fn unload_asset(&mut self, handle: AssetHandle, force: bool) -> Result<usize, AssetError> {
        let references = self.assets.unload(handle, force)?;
        self.sync_asset_events();
        Ok(references)
    }

    /// Hot-reload a file-backed asset
    pub fn reload_asset(&mut self, handle: AssetHandle) -> Result<(), AssetError> {
        self.assets.reload(handle)?;
        self.sync_asset_events();
        Ok(())
    }

    /// Forward asset store notifications to the scene and the renderer
    pub fn sync_asset_events(&mut self) {
        for event in self.assets.drain_events() {
            if let AssetEvent::Unloaded(handle) = event {
                let cleared = self.scene.clear_asset_refs(handle);
                if cleared > 0 {
                    log::info!("Cleared {} references to unloaded {}", cleared, handle);
                }
            }
            self.renderer.on_asset_event(event);
        }
    }

    /// Write the scene to a `.hamidmap` file
    pub fn save_scene<P: AsRef<Path>>(&self, path: P) -> Result<(), SceneError> {
        let path = path.as_ref();
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let document = SceneDocument::capture(
            &self.scene,
            &self.assets,
            &self.registry,
            &self.camera,
            self.renderer.clear_color(),
            base_dir,
        );
        document.save(path)?;
        log::info!("Saved {} objects to {}", document.objects.len(), path.display());
        Ok(())
    }

    /// Replace the scene with the contents of a `.hamidmap` file
    ///
    /// The current scene is kept if the file cannot be instantiated.
    pub fn load_scene<P: AsRef<Path>>(&mut self, path: P) -> Result<Vec<EntityId>, SceneError> {
        let path = path.as_ref();
        let document = SceneDocument::load(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let previous: Vec<EntityId> = self.scene.roots().to_vec();
        let created = document.instantiate(&mut self.scene, &mut self.assets, &self.registry, base_dir)?;
        for root in previous {
            self.scene.destroy_entity(root, &mut self.assets)?;
        }

        self.camera.position = Vec3::from(document.camera.position);
        self.camera.set_orientation(document.camera.yaw, document.camera.pitch);
        self.renderer.set_clear_color(document.environment.sky_color);
        log::info!("Loaded scene '{}' with {} objects", document.scene_info.name, created.len());
        Ok(created)
    }

    /// Ask the loop to stop after the current frame
    pub fn quit(&mut self) {
        log::info!("Engine shutdown requested");
        self.quit_requested = true;
    }

    /// Whether a quit has been requested
    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Release GPU resources; also runs on drop
    pub fn shutdown(&mut self) {
        if !self.shut_down {
            self.renderer.shutdown();
            self.shut_down = true;
            log::info!("Engine shutdown complete");
        }
    }

    /// Handle for queueing scene mutations from any thread
    pub fn command_sender(&self) -> CommandSender {
        self.commands.sender()
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Asset store
    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Mutable asset store
    ///
    /// Call [`Engine::sync_asset_events`] after unloading or reloading through
    /// this reference.
    pub fn assets_mut(&mut self) -> &mut AssetStore {
        &mut self.assets
    }

    /// Scene graph
    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    /// Mutable scene graph
    pub fn scene_mut(&mut self) -> &mut SceneGraph {
        &mut self.scene
    }

    /// Scene graph and asset store together, for calls that need both
    pub fn scene_and_assets(&mut self) -> (&mut SceneGraph, &mut AssetStore) {
        (&mut self.scene, &mut self.assets)
    }

    /// Kernel registry
    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    /// Mutable kernel registry, for registering custom kernels
    pub fn registry_mut(&mut self) -> &mut KernelRegistry {
        &mut self.registry
    }

    /// Kernel dispatcher
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Viewer camera
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Mutable viewer camera
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Render backend adapter
    pub fn renderer(&self) -> &RenderBackendAdapter {
        &self.renderer
    }

    /// Mutable render backend adapter
    pub fn renderer_mut(&mut self) -> &mut RenderBackendAdapter {
        &mut self.renderer
    }

    /// Frame scheduler
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// No renderable context could be created
    #[error("Engine initialization failed: {0}")]
    FatalInit(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Asset system error
    #[error("Asset system error: {0}")]
    Asset(#[from] AssetError),

    /// Scene error
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    /// Fatal rendering error; the frame was aborted
    #[error("Rendering error: {0}")]
    Render(#[from] RenderError),

    /// Frame phases out of order
    #[error("Scheduler error: {0}")]
    Phase(#[from] PhaseError),

    /// Application hook failed
    #[error("Application error: {0}")]
    Application(#[from] AppError),
}
