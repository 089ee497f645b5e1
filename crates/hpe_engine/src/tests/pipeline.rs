use super::{cube_and_material, scratch_dir, spawn, test_engine};
use crate::assets::{AssetError, AssetHandle, MaterialAsset};
use crate::config::EngineConfig;
use crate::foundation::math::{Transform, Vec3};
use crate::kernels::{KernelContext, KernelState, UpdateKernel};
use crate::render::{DeviceCommand, DrawList, GraphicsDevice, HeadlessDevice, RenderError};
use crate::scene::{CommandSender, EntityFlags, EntityId, SceneCommand};
use crate::scheduler::FramePhase;
use crate::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn material_binds_needed(list: &DrawList) -> usize {
    let mut binds = 0;
    let mut bound = None;
    for item in &list.items {
        if bound != Some(item.material) {
            binds += 1;
            bound = Some(item.material);
        }
    }
    binds
}

#[test]
fn entity_behind_camera_is_not_drawn() {
    let mut engine = test_engine(1);
    let (scene, assets) = engine.scene_and_assets();
    let (cube, material) = cube_and_material(assets, "grey");
    let ahead = spawn(scene, assets, Vec3::new(0.0, 1.0, -5.0), cube, material);
    let behind = spawn(scene, assets, Vec3::new(0.0, 1.0, 20.0), cube, material);

    let report = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(report.draw_list.entities(), vec![ahead]);
    assert!(!report.draw_list.entities().contains(&behind));
    assert_eq!(report.draw_list.culled, 1);
    assert_eq!(report.render.draws, 1);
}

#[test]
fn unload_of_referenced_asset_is_refused() {
    let mut engine = test_engine(1);
    let (scene, assets) = engine.scene_and_assets();
    let (cube, material) = cube_and_material(assets, "grey");
    let e = spawn(scene, assets, Vec3::new(0.0, 1.0, -5.0), cube, material);

    let err = engine.unload_asset(cube.into(), false).unwrap_err();
    assert!(matches!(err, AssetError::HandleInUse { references: 1, .. }));
    assert!(engine.assets().contains(cube.into()));
    assert_eq!(engine.scene().mesh(e), Some(cube));
    assert_eq!(engine.run_frame(Duration::ZERO).unwrap().render.draws, 1);
}

#[test]
fn forced_unload_makes_entities_invisible() {
    let mut engine = test_engine(1);
    let (scene, assets) = engine.scene_and_assets();
    let (cube, material) = cube_and_material(assets, "grey");
    let a = spawn(scene, assets, Vec3::new(-1.0, 1.0, -5.0), cube, material);
    let b = spawn(scene, assets, Vec3::new(1.0, 1.0, -5.0), cube, material);

    assert_eq!(engine.run_frame(Duration::ZERO).unwrap().render.draws, 2);
    assert!(engine.renderer().has_gpu_resources(cube.into()));

    assert_eq!(engine.unload_asset(cube.into(), true).unwrap(), 2);
    assert_eq!(engine.scene().mesh(a), None);
    assert_eq!(engine.scene().mesh(b), None);
    assert!(!engine.renderer().has_gpu_resources(cube.into()));

    let report = engine.run_frame(Duration::ZERO).unwrap();
    assert!(report.draw_list.is_empty());
    assert_eq!(report.draw_list.unbound, 2);
    assert!(report.render.errors.is_empty());
    assert_eq!(report.render.resources_destroyed, 2);
}

#[test]
fn unload_through_store_releases_gpu_copy_next_frame() {
    let mut engine = test_engine(1);
    let (scene, assets) = engine.scene_and_assets();
    let (cube, material) = cube_and_material(assets, "grey");
    let e = spawn(scene, assets, Vec3::new(0.0, 1.0, -5.0), cube, material);
    engine.run_frame(Duration::ZERO).unwrap();
    assert!(engine.renderer().has_gpu_resources(cube.into()));

    engine.assets_mut().unload(cube.into(), true).unwrap();
    let report = engine.run_frame(Duration::ZERO).unwrap();
    assert!(!engine.renderer().has_gpu_resources(cube.into()));
    assert_eq!(engine.scene().mesh(e), None);
    assert!(report.draw_list.is_empty());
    assert_eq!(report.render.resources_destroyed, 2);
}

#[test]
fn restore_undoes_kernel_motion() {
    let mut engine = test_engine(1);
    let (scene, assets) = engine.scene_and_assets();
    let (cube, material) = cube_and_material(assets, "grey");
    let ball = spawn(scene, assets, Vec3::new(0.0, 3.0, -5.0), cube, material);
    engine.attach_kernel(ball, "gravity").unwrap();
    let start = engine.scene().transform(ball).unwrap();

    let sender = engine.command_sender();
    sender.send(SceneCommand::RestoreTransforms).unwrap();
    let report = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(report.rejected_commands.len(), 1);

    sender.send(SceneCommand::SnapshotTransforms).unwrap();
    let report = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(report.applied_commands, 1);

    for _ in 0..30 {
        engine.run_frame(Duration::from_millis(16)).unwrap();
    }
    assert!(engine.scene().transform(ball).unwrap().position.y < 3.0);
    assert!(engine.scene().kernel(ball).unwrap().velocity.y < 0.0);

    assert_eq!(engine.restore_transforms(), Some(1));
    assert_eq!(engine.scene().transform(ball).unwrap(), start);
    assert_eq!(engine.scene().kernel(ball).unwrap().velocity, Vec3::zeros());

    // The save survives a restore
    engine.scene_mut().set_transform(ball, Transform::identity()).unwrap();
    assert_eq!(engine.restore_transforms(), Some(1));
    assert_eq!(engine.scene().transform(ball).unwrap(), start);
}

#[test]
fn shader_failure_skips_only_its_items() {
    let mut device = HeadlessDevice::new();
    device.fail_shader("broken");
    let mut config = EngineConfig::default();
    config.assets.search_paths.clear();
    let mut engine = Engine::with_device(config, Box::new(device)).unwrap();

    let (scene, assets) = engine.scene_and_assets();
    let (cube, good) = cube_and_material(assets, "good");
    let bad = assets.add_material(MaterialAsset::solid("bad", [1.0; 4]).with_shader("broken"));
    spawn(scene, assets, Vec3::new(-1.0, 1.0, -5.0), cube, good);
    spawn(scene, assets, Vec3::new(1.0, 1.0, -6.0), cube, bad);

    let first = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(first.render.draws, 1);
    assert_eq!(first.render.skipped, 1);
    assert!(matches!(first.render.errors.as_slice(), [RenderError::ShaderCompilation { .. }]));
    assert!(engine.scheduler().is_idle());

    // The failure is remembered rather than retried every frame
    let second = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(second.render.draws, 1);
    assert_eq!(second.render.skipped, 1);
    assert!(second.render.errors.is_empty());
}

#[test]
fn shared_state_is_bound_once_per_run() {
    let mut engine = test_engine(1);
    let (scene, assets) = engine.scene_and_assets();
    let (cube, grey) = cube_and_material(assets, "grey");
    let red = assets.add_material(MaterialAsset::solid("red", [1.0, 0.0, 0.0, 1.0]));
    let sphere = assets.add_primitive(crate::assets::Primitive::Sphere).unwrap();
    for i in 0..6 {
        let z = -4.0 - i as f32;
        spawn(scene, assets, Vec3::new(0.0, 1.0, z), cube, grey);
        spawn(scene, assets, Vec3::new(2.0, 1.0, z - 20.0), sphere, red);
    }

    let report = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(report.render.draws, 12);
    assert_eq!(report.render.program_binds, 1);
    assert_eq!(report.render.material_binds, material_binds_needed(&report.draw_list));
    assert_eq!(report.render.material_binds, 2);
    assert_eq!(report.render.mesh_binds, 2);

    let device = engine.renderer().device_as::<HeadlessDevice>().unwrap();
    let binds = device
        .commands()
        .iter()
        .filter(|c| matches!(c, DeviceCommand::BindMaterial { .. }))
        .count();
    assert_eq!(binds, 2);
}

/// Sends one command the first time it runs, from inside the update phase
struct MidFrameEditor {
    sender: CommandSender,
    target: EntityId,
    sent: AtomicBool,
}

impl UpdateKernel for MidFrameEditor {
    fn name(&self) -> &str {
        "mid_frame_editor"
    }

    fn evaluate_scalar(&self, state: &KernelState, _ctx: &KernelContext) -> KernelState {
        if !self.sent.swap(true, Ordering::SeqCst) {
            let _ = self.sender.send(SceneCommand::SetFlags(self.target, EntityFlags::HIDDEN));
        }
        *state
    }
}

#[test]
fn mid_frame_edits_wait_for_idle() {
    let mut engine = test_engine(2);
    let (scene, assets) = engine.scene_and_assets();
    let (cube, material) = cube_and_material(assets, "grey");
    let target = spawn(scene, assets, Vec3::new(0.0, 1.0, -5.0), cube, material);

    let editor = MidFrameEditor {
        sender: engine.command_sender(),
        target,
        sent: AtomicBool::new(false),
    };
    engine.registry_mut().register(editor);
    engine.attach_kernel(target, "mid_frame_editor").unwrap();

    // Frame 1 runs the kernel, which queues the edit while Updating
    let first = engine.run_frame(Duration::from_millis(20)).unwrap();
    assert_eq!(first.steps, 1);
    assert_eq!(first.draw_list.entities(), vec![target]);
    assert_eq!(first.applied_commands, 0);
    assert_eq!(engine.scene().flags(target), EntityFlags::empty());

    let second = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(second.applied_commands, 1);
    assert!(second.draw_list.is_empty());
    assert_eq!(second.draw_list.hidden, 1);
}

#[test]
fn commands_from_other_threads_apply_in_order() {
    let mut engine = test_engine(1);
    let sender = engine.command_sender();

    let worker = std::thread::spawn(move || {
        let created = sender.create_entity(Some("probe".to_string()), None);
        (sender, created)
    });
    let (sender, created) = worker.join().unwrap();
    engine.run_frame(Duration::ZERO).unwrap();
    let id = created.recv().unwrap().unwrap();

    let first = Transform::from_position(Vec3::new(1.0, 0.0, 0.0));
    let last = Transform::from_position(Vec3::new(5.0, 0.0, 0.0));
    sender.send(SceneCommand::SetTransform(id, first)).unwrap();
    sender.send(SceneCommand::SetTransform(id, last)).unwrap();
    sender
        .send(SceneCommand::SetCamera {
            position: Vec3::new(0.0, 3.0, 8.0),
            yaw: -90.0,
            pitch: 120.0,
        })
        .unwrap();
    assert_eq!(engine.scene().transform(id).unwrap(), Transform::identity());

    let report = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(report.applied_commands, 3);
    assert_eq!(engine.scene().transform(id).unwrap(), last);
    assert_eq!(engine.camera().position, Vec3::new(0.0, 3.0, 8.0));
    assert_eq!(engine.camera().pitch, 89.0);
    assert_eq!(engine.scene().name(id), Some("probe"));
}

#[test]
fn render_failure_aborts_frame_to_idle() {
    let mut device = HeadlessDevice::new();
    device.set_memory_budget(Some(64));
    let mut config = EngineConfig::default();
    config.assets.search_paths.clear();
    let mut engine = Engine::with_device(config, Box::new(device)).unwrap();

    let (scene, assets) = engine.scene_and_assets();
    let (cube, material) = cube_and_material(assets, "grey");
    spawn(scene, assets, Vec3::new(0.0, 1.0, -5.0), cube, material);

    // Out of memory is scoped to the item; the frame still presents
    let report = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(report.render.skipped, 1);
    assert!(matches!(report.render.errors.as_slice(), [RenderError::ResourceCreation(_)]));

    // A device in the wrong frame state is fatal for the frame
    engine
        .renderer_mut()
        .device_as_mut::<HeadlessDevice>()
        .unwrap()
        .begin_frame([0.0; 4], &crate::foundation::math::Mat4::identity())
        .unwrap();
    let err = engine.run_frame(Duration::ZERO).unwrap_err();
    assert!(matches!(err, crate::EngineError::Render(RenderError::FrameState(_))));
    assert_eq!(engine.scheduler().phase(), FramePhase::Idle);
    assert_eq!(engine.scheduler().aborted_frames(), 1);

    // The abort reset the device, so the next frame goes through
    assert!(engine.run_frame(Duration::ZERO).is_ok());
}

#[test]
fn reload_swaps_gpu_copy_under_same_handle() {
    let dir = scratch_dir("reload");
    let path = dir.join("tri.obj");
    std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

    let mut engine = test_engine(1);
    let handle = engine.load_asset(&path).unwrap();
    let AssetHandle::Mesh(mesh) = handle else {
        panic!("obj loaded as {:?}", handle);
    };
    let (scene, assets) = engine.scene_and_assets();
    let material = assets.add_material(MaterialAsset::solid("white", [1.0; 4]));
    spawn(scene, assets, Vec3::new(0.0, 1.0, -3.0), mesh, material);

    let first = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(first.render.draws, 1);

    std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\nf 1 2 4 3\n").unwrap();
    engine.reload_asset(handle).unwrap();
    assert_eq!(engine.assets().mesh(mesh).unwrap().triangle_count(), 2);
    assert!(!engine.renderer().has_gpu_resources(handle));

    let second = engine.run_frame(Duration::ZERO).unwrap();
    assert_eq!(second.render.draws, 1);
    assert_eq!(second.render.resources_created, 2);
    assert_eq!(second.render.resources_destroyed, 2);
    assert_eq!(engine.load_asset(&path).unwrap(), handle);

    std::fs::remove_dir_all(&dir).unwrap();
}
