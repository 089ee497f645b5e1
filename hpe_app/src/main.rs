//! `hpe` launcher
//!
//! Loads the config, builds the engine, populates the scene from the command
//! line and runs the frame loop until `quit` is typed on stdin, a frame limit
//! is reached, or an unrecoverable error occurs.

use clap::{Arg, ArgAction, Command};
use hpe_engine::foundation::logging;
use hpe_engine::kernels::Oscillate;
use hpe_engine::prelude::*;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

const DEFAULT_CONFIG: &str = "hpe.toml";

/// Populates the scene at startup and reports progress
struct Launcher {
    scene: Option<PathBuf>,
    models: Vec<PathBuf>,
    demo: usize,
}

impl Application for Launcher {
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
        if let Some(path) = &self.scene {
            let created = engine.load_scene(path)?;
            log::info!("Scene {} ready with {} entities", path.display(), created.len());
        }

        if !self.models.is_empty() {
            let material = engine
                .assets_mut()
                .add_material(MaterialAsset::solid("model", [0.8, 0.7, 0.5, 1.0]));
            for (i, path) in self.models.iter().enumerate() {
                let mesh = match engine.load_asset(path)? {
                    AssetHandle::Mesh(mesh) => mesh,
                    AssetHandle::Material(_) => {
                        return Err(AppError::Custom(format!("{} is not a mesh", path.display())))
                    }
                };
                let name = path
                    .file_stem()
                    .map_or_else(|| format!("model {}", i), |s| s.to_string_lossy().into_owned());
                let (scene, assets) = engine.scene_and_assets();
                let entity = scene.create_named_entity(name, None)?;
                scene.set_transform(entity, Transform::from_position(Vec3::new(i as f32 * 3.0, 0.0, 0.0)))?;
                scene.attach_mesh(entity, mesh, assets)?;
                scene.attach_material(entity, material, assets)?;
                engine.attach_kernel(entity, "spin")?;
                if let Some(component) = engine.scene_mut().kernel_mut(entity) {
                    component.angular_velocity = Vec3::new(0.0, 0.8, 0.0);
                }
            }
        }

        if self.demo > 0 {
            populate_demo(engine, self.demo)?;
        }
        Ok(())
    }

    fn on_frame(&mut self, _engine: &mut Engine, report: &FrameReport) -> Result<(), AppError> {
        if report.frame % 300 == 0 {
            log::info!(
                "Frame {}: {} draws, {} culled, {} skipped",
                report.frame,
                report.render.draws,
                report.draw_list.culled,
                report.render.skipped
            );
        }
        Ok(())
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        log::info!("Shutting down with {} entities", engine.scene().len());
    }
}

/// Ground plane plus a grid of falling, spinning and bobbing primitives
fn populate_demo(engine: &mut Engine, count: usize) -> Result<(), AppError> {
    let shapes = [Primitive::Cube, Primitive::Sphere, Primitive::Cylinder, Primitive::Cone, Primitive::Capsule];
    let palette = [
        [0.9, 0.3, 0.3, 1.0],
        [0.3, 0.9, 0.3, 1.0],
        [0.3, 0.3, 0.9, 1.0],
        [0.9, 0.9, 0.3, 0.5],
    ];

    let assets = engine.assets_mut();
    let plane = assets.add_primitive(Primitive::Plane)?;
    let ground = assets.add_material(MaterialAsset::solid("ground", [0.4, 0.4, 0.4, 1.0]));
    let meshes = shapes
        .iter()
        .map(|&shape| assets.add_primitive(shape))
        .collect::<Result<Vec<_>, _>>()?;
    let materials: Vec<_> = palette
        .iter()
        .enumerate()
        .map(|(i, &color)| {
            assets.add_material(MaterialAsset::solid(format!("demo {}", i), color).with_translucency(color[3] < 1.0))
        })
        .collect();

    let (scene, assets) = engine.scene_and_assets();
    let floor = scene.create_named_entity("Terrain", None)?;
    scene.set_transform(floor, Transform::identity().with_scale(Vec3::new(50.0, 1.0, 50.0)))?;
    scene.attach_mesh(floor, plane, assets)?;
    scene.attach_material(floor, ground, assets)?;

    let side = (count as f32).sqrt().ceil() as usize;
    let mut spawned = Vec::with_capacity(count);
    for i in 0..count {
        let (row, column) = (i / side, i % side);
        let position = Vec3::new(column as f32 * 1.5 - side as f32 * 0.75, 2.0 + (i % 5) as f32, -(row as f32) * 1.5);
        let entity = scene.create_named_entity(format!("{} {}", shapes[i % shapes.len()], i), None)?;
        scene.set_transform(entity, Transform::from_position(position))?;
        scene.attach_mesh(entity, meshes[i % meshes.len()], assets)?;
        scene.attach_material(entity, materials[i % materials.len()], assets)?;
        spawned.push(entity);
    }

    for (i, &entity) in spawned.iter().enumerate() {
        let kernel = match i % 3 {
            0 => "gravity",
            1 => "spin",
            _ => Oscillate::NAME,
        };
        engine.attach_kernel(entity, kernel)?;
        if let Some(component) = engine.scene_mut().kernel_mut(entity) {
            component.mass = 1.0 + (i % 4) as f32;
            component.velocity = Vec3::new(((i % 7) as f32 - 3.0) * 0.5, 0.0, 0.0);
            component.angular_velocity = Vec3::new(0.0, 1.0 + (i % 3) as f32, 0.0);
            component.custom = Oscillate::params(0.5, 2.0, 2.0 + (i % 5) as f32);
        }
    }

    log::info!("Demo scene: {} entities", spawned.len() + 1);
    Ok(())
}

/// Forward `quit` typed on stdin to the engine
fn spawn_stdin_listener(sender: CommandSender) {
    let spawned = thread::Builder::new().name("stdin".to_string()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("quit") => {
                    sender.quit();
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    log::debug!("stdin closed: {}", err);
                    break;
                }
            }
        }
    });
    if let Err(err) = spawned {
        log::warn!("No stdin listener, quit with Ctrl-C: {}", err);
    }
}

fn main() -> ExitCode {
    logging::init();

    let matches = Command::new("hpe")
        .about("Hamid Py Engine: scene update and render-dispatch pipeline")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Engine settings file (.toml or .ron)")
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::new("scene")
                .short('s')
                .long("scene")
                .value_name("PATH")
                .help("Scene file (.hamidmap) to load at startup"),
        )
        .arg(
            Arg::new("model")
                .short('m')
                .long("model")
                .value_name("PATH")
                .help("Mesh file to place in the scene; may be repeated")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("frames")
                .short('f')
                .long("frames")
                .value_name("N")
                .help("Stop after N frames")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .value_name("N")
                .help("Spawn N animated primitives")
                .value_parser(clap::value_parser!(usize))
                .default_value("0"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    let config = match EngineConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Failed to load {}: {}", config_path.display(), err);
            return ExitCode::from(1);
        }
    };

    let mut engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("{}", err);
            return ExitCode::from(1);
        }
    };

    let mut launcher = Launcher {
        scene: matches.get_one::<String>("scene").map(PathBuf::from),
        models: matches
            .get_many::<String>("model")
            .map(|values| values.map(PathBuf::from).collect())
            .unwrap_or_default(),
        demo: matches.get_one::<usize>("demo").copied().unwrap_or(0),
    };
    let max_frames = matches.get_one::<u64>("frames").copied();

    spawn_stdin_listener(engine.command_sender());

    match engine.run(&mut launcher, max_frames) {
        Ok(frames) => {
            log::info!("Clean shutdown after {} frames", frames);
            ExitCode::SUCCESS
        }
        Err(EngineError::FatalInit(reason)) => {
            log::error!("Fatal: {}", reason);
            ExitCode::from(1)
        }
        Err(err) => {
            log::error!("{}", err);
            ExitCode::from(2)
        }
    }
}
