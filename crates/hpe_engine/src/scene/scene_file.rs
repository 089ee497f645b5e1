//! `.hamidmap` scene files
//!
//! A TOML document holding scene info, the camera, environment colours and a
//! flat list of objects. Objects are written parents-first; `parent` is the
//! index of an earlier object.
//!
//! Maps written by the Python editor load as well: their `physics` table
//! carries a `physics_type` instead of a kernel name, and terrain objects
//! are described by a `terrain_data` table rather than a mesh.

use super::{Camera, EntityFlags, EntityId, SceneError, SceneGraph};
use crate::assets::{AssetSource, AssetStore, MaterialAsset, MaterialHandle, MeshHandle, Primitive};
use crate::foundation::math::{Transform, Vec3};
use crate::kernels::{Gravity, KernelRegistry};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// File extension used for scene documents
pub const SCENE_EXTENSION: &str = "hamidmap";

/// `physics_type` of an object that is not simulated
pub const PHYSICS_NONE: &str = "None";

/// `physics_type` of an object that falls under gravity
pub const PHYSICS_RIGID_BODY: &str = "RigidBody";

/// Whole scene document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDocument {
    /// Name and version stamp
    pub scene_info: SceneInfo,
    /// Viewer camera
    pub camera: CameraRecord,
    /// Environment colours
    pub environment: EnvironmentRecord,
    /// Objects, parents before children
    pub objects: Vec<ObjectRecord>,
}

/// Document header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneInfo {
    /// Scene name
    pub name: String,
    /// Format version
    pub version: String,
    /// Writer
    pub engine: String,
}

impl Default for SceneInfo {
    fn default() -> Self {
        Self {
            name: "untitled".to_string(),
            version: "1.0.0".to_string(),
            engine: format!("Hamid Py Engine {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Saved camera placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraRecord {
    /// Eye position
    pub position: [f32; 3],
    /// Yaw in degrees
    pub yaw: f32,
    /// Pitch in degrees
    pub pitch: f32,
}

impl Default for CameraRecord {
    fn default() -> Self {
        Self {
            position: [0.0, 1.0, 5.0],
            yaw: -90.0,
            pitch: 0.0,
        }
    }
}

/// Saved environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentRecord {
    /// Clear colour
    pub sky_color: [f32; 4],
}

impl Default for EnvironmentRecord {
    fn default() -> Self {
        Self {
            sky_color: [0.53, 0.81, 0.92, 1.0],
        }
    }
}

/// One saved entity
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectRecord {
    /// Display name
    pub name: String,
    /// Index of the parent object
    pub parent: Option<usize>,
    /// Mesh file, relative to the scene file when possible
    pub model_file: Option<String>,
    /// Excluded from rendering
    pub hidden: bool,
    /// Local transform
    pub transform: TransformRecord,
    /// Material parameters
    pub material: Option<MaterialRecord>,
    /// Kernel attachment
    pub physics: Option<PhysicsRecord>,
    /// Procedural mesh
    pub primitive_data: Option<PrimitiveRecord>,
    /// Ground plane sized in kilometres, takes precedence over `primitive_data`
    pub terrain_data: Option<TerrainRecord>,
}

/// Transform with Euler rotation in radians
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformRecord {
    /// Position
    pub position: [f32; 3],
    /// Euler angles in radians
    pub rotation: [f32; 3],
    /// Scale
    pub scale: [f32; 3],
}

impl Default for TransformRecord {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl From<&Transform> for TransformRecord {
    fn from(transform: &Transform) -> Self {
        let euler = transform.euler_angles();
        Self {
            position: transform.position.into(),
            rotation: euler.into(),
            scale: transform.scale.into(),
        }
    }
}

impl TransformRecord {
    /// Rebuild the transform
    pub fn to_transform(&self) -> Transform {
        Transform::from_euler(
            Vec3::from(self.position),
            Vec3::from(self.rotation),
            Vec3::from(self.scale),
        )
    }
}

/// Material parameters, or a material file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialRecord {
    /// Material description or image file
    pub file: Option<String>,
    /// RGBA base colour
    pub base_color: [f32; 4],
    /// Alpha-blended
    pub is_transparent: bool,
    /// Shader program
    pub shader: String,
}

impl Default for MaterialRecord {
    fn default() -> Self {
        Self {
            file: None,
            base_color: [1.0; 4],
            is_transparent: false,
            shader: crate::assets::DEFAULT_SHADER.to_string(),
        }
    }
}

/// Kernel attachment and its dynamic state
///
/// `kernel` wins when present. Otherwise only a `RigidBody` physics type
/// gets a kernel (gravity); `None` and `Static` objects stay put.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsRecord {
    /// `None`, `Static` or `RigidBody`
    pub physics_type: String,
    /// Collider shape, carried through untouched
    pub physics_shape: Option<String>,
    /// Registered kernel name
    pub kernel: Option<String>,
    /// Mass
    pub mass: f32,
    /// Linear velocity
    pub velocity: [f32; 3],
    /// Angular velocity
    pub angular_velocity: [f32; 3],
    /// Kernel-specific scalars
    pub custom: [f32; 4],
}

impl Default for PhysicsRecord {
    fn default() -> Self {
        Self {
            physics_type: PHYSICS_NONE.to_string(),
            physics_shape: None,
            kernel: None,
            mass: 1.0,
            velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            custom: [0.0; 4],
        }
    }
}

impl PhysicsRecord {
    /// Kernel to attach, if any
    pub fn kernel_name(&self) -> Option<&str> {
        match &self.kernel {
            Some(name) => Some(name),
            None if self.physics_type.eq_ignore_ascii_case(PHYSICS_RIGID_BODY) => Some(Gravity::NAME),
            None => None,
        }
    }
}

/// Procedural mesh marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveRecord {
    /// Always true when present
    #[serde(default = "default_true")]
    pub is_primitive: bool,
    /// Shape; unknown names load as a cube
    #[serde(default = "default_primitive", deserialize_with = "lenient_primitive")]
    pub primitive_type: Primitive,
}

fn default_true() -> bool {
    true
}

fn default_primitive() -> Primitive {
    Primitive::Cube
}

fn lenient_primitive<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Primitive, D::Error> {
    let name = String::deserialize(deserializer)?;
    Ok(name.parse().unwrap_or_else(|err| {
        log::warn!("{}, loading a cube instead", err);
        Primitive::Cube
    }))
}

/// Terrain plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainRecord {
    /// Only a set flag turns the object into terrain
    pub is_terrain: bool,
    /// Extent along X in kilometres
    pub size_x_km: f32,
    /// Extent along Z in kilometres
    pub size_y_km: f32,
    /// RGBA ground colour
    pub terrain_color: [f32; 4],
}

impl Default for TerrainRecord {
    fn default() -> Self {
        Self {
            is_terrain: false,
            size_x_km: 1.0,
            size_y_km: 1.0,
            terrain_color: [0.4, 0.6, 0.3, 1.0],
        }
    }
}

impl TerrainRecord {
    /// Scale that stretches the unit plane to the terrain size in metres
    pub fn extent(&self) -> Vec3 {
        Vec3::new(self.size_x_km * 1000.0, 1.0, self.size_y_km * 1000.0)
    }
}

impl SceneDocument {
    /// Parse TOML text
    pub fn parse(text: &str) -> Result<Self, SceneError> {
        let document: Self = toml::from_str(text).map_err(|e| SceneError::File(e.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    /// Read and parse a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SceneError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SceneError::File(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Serialise to TOML text
    pub fn to_toml_string(&self) -> Result<String, SceneError> {
        toml::to_string_pretty(self).map_err(|e| SceneError::File(e.to_string()))
    }

    /// Write to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SceneError> {
        let path = path.as_ref();
        let text = self.to_toml_string()?;
        std::fs::write(path, text).map_err(|e| SceneError::File(format!("{}: {}", path.display(), e)))
    }

    /// Check that every parent index points at an earlier object
    pub fn validate(&self) -> Result<(), SceneError> {
        for (index, object) in self.objects.iter().enumerate() {
            if let Some(parent) = object.parent {
                if parent >= index {
                    return Err(SceneError::File(format!(
                        "object {} ('{}') has parent {} which does not precede it",
                        index, object.name, parent
                    )));
                }
            }
        }
        Ok(())
    }

    /// Capture a live scene
    ///
    /// File-backed meshes are stored relative to `base_dir` when they live
    /// below it. Runtime-only meshes that are not primitives cannot be saved
    /// and are written without geometry.
    pub fn capture(
        scene: &SceneGraph,
        assets: &AssetStore,
        registry: &KernelRegistry,
        camera: &Camera,
        sky_color: [f32; 4],
        base_dir: &Path,
    ) -> Self {
        let mut objects = Vec::with_capacity(scene.len());
        let mut indices = std::collections::HashMap::with_capacity(scene.len());

        let mut stack: Vec<EntityId> = scene.roots().iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            indices.insert(id, objects.len());
            objects.push(capture_object(scene, assets, registry, id, &indices, base_dir));
            stack.extend(scene.children(id).iter().rev());
        }

        Self {
            scene_info: SceneInfo::default(),
            camera: CameraRecord {
                position: camera.position.into(),
                yaw: camera.yaw,
                pitch: camera.pitch,
            },
            environment: EnvironmentRecord { sky_color },
            objects,
        }
    }

    /// Create the document's objects in `scene`
    ///
    /// Asset files that fail to load and unknown kernel names are logged and
    /// skipped. Structural failures (an invalid transform) roll back every
    /// entity created so far.
    pub fn instantiate(
        &self,
        scene: &mut SceneGraph,
        assets: &mut AssetStore,
        registry: &KernelRegistry,
        base_dir: &Path,
    ) -> Result<Vec<EntityId>, SceneError> {
        self.validate()?;

        let mut created: Vec<EntityId> = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            let parent = object.parent.map(|index| created[index]);
            let result = instantiate_object(object, parent, scene, assets, registry, base_dir);
            match result {
                Ok(id) => created.push(id),
                Err(err) => {
                    for &id in created.iter().rev() {
                        if scene.contains(id) {
                            let _ = scene.destroy_entity(id, assets);
                        }
                    }
                    return Err(err);
                }
            }
        }

        log::info!("Instantiated {} objects from scene '{}'", created.len(), self.scene_info.name);
        Ok(created)
    }
}

fn capture_object(
    scene: &SceneGraph,
    assets: &AssetStore,
    registry: &KernelRegistry,
    id: EntityId,
    indices: &std::collections::HashMap<EntityId, usize>,
    base_dir: &Path,
) -> ObjectRecord {
    let transform = scene.transform(id).unwrap_or_default();
    let mut record = ObjectRecord {
        name: scene.name(id).unwrap_or_default().to_string(),
        parent: scene.parent(id).and_then(|p| indices.get(&p).copied()),
        hidden: scene.flags(id).contains(EntityFlags::HIDDEN),
        transform: TransformRecord::from(&transform),
        ..Default::default()
    };

    if let Some(mesh) = scene.mesh(id) {
        match assets.source(mesh.into()) {
            Some(AssetSource::File(path)) => record.model_file = Some(relative_path(path, base_dir)),
            Some(AssetSource::Generated(name)) => {
                match name.strip_prefix("primitive:").and_then(|n| n.parse::<Primitive>().ok()) {
                    Some(primitive_type) => {
                        record.primitive_data = Some(PrimitiveRecord {
                            is_primitive: true,
                            primitive_type,
                        })
                    }
                    None => log::warn!("Mesh '{}' on '{}' is runtime-only and is not saved", name, record.name),
                }
            }
            None => {}
        }
    }

    if let Some(handle) = scene.material(id) {
        if let Some(material) = assets.material(handle) {
            let file = match assets.source(handle.into()) {
                Some(AssetSource::File(path)) => Some(relative_path(path, base_dir)),
                _ => None,
            };
            record.material = Some(MaterialRecord {
                file,
                base_color: material.base_color,
                is_transparent: material.translucent,
                shader: material.shader.clone(),
            });
        }
    }

    if let Some(component) = scene.kernel(id) {
        if let Some(kernel) = registry.name(component.kernel()) {
            let physics_type = if kernel == Gravity::NAME {
                PHYSICS_RIGID_BODY
            } else {
                PHYSICS_NONE
            };
            record.physics = Some(PhysicsRecord {
                physics_type: physics_type.to_string(),
                physics_shape: None,
                kernel: Some(kernel.to_string()),
                mass: component.mass,
                velocity: component.velocity.into(),
                angular_velocity: component.angular_velocity.into(),
                custom: component.custom,
            });
        }
    }

    record
}

fn instantiate_object(
    object: &ObjectRecord,
    parent: Option<EntityId>,
    scene: &mut SceneGraph,
    assets: &mut AssetStore,
    registry: &KernelRegistry,
    base_dir: &Path,
) -> Result<EntityId, SceneError> {
    let terrain = object.terrain_data.as_ref().filter(|t| t.is_terrain);
    let mut transform = object.transform.to_transform();
    if let Some(terrain) = terrain {
        transform.scale.component_mul_assign(&terrain.extent());
    }
    if !transform.is_valid() {
        return Err(SceneError::InvalidTransform(format!("object '{}'", object.name)));
    }

    let id = scene.create_named_entity(object.name.clone(), parent)?;
    scene.set_transform(id, transform)?;
    if object.hidden {
        scene.set_flags(id, EntityFlags::HIDDEN)?;
    }

    if let Some(terrain) = terrain {
        let plane = assets
            .add_primitive(Primitive::Plane)
            .map_err(|e| SceneError::File(format!("terrain '{}': {}", object.name, e)))?;
        scene.attach_mesh(id, plane, assets)?;
        let translucent = object.material.as_ref().map_or(false, |m| m.is_transparent);
        let material = assets.add_material(
            MaterialAsset::solid(format!("{} material", object.name), terrain.terrain_color)
                .with_translucency(translucent),
        );
        scene.attach_material(id, material, assets)?;
    } else {
        if let Some(mesh) = load_mesh(object, assets, base_dir) {
            scene.attach_mesh(id, mesh, assets)?;
        }
        if let Some(record) = &object.material {
            let material = load_material(object, record, assets, base_dir);
            scene.attach_material(id, material, assets)?;
        }
    }

    let physics = object.physics.as_ref().and_then(|p| Some((p, p.kernel_name()?)));
    if let Some((physics, name)) = physics {
        match registry.lookup(name) {
            Some(kernel) => {
                scene.attach_kernel(id, kernel, registry)?;
                if let Some(component) = scene.kernel_mut(id) {
                    component.mass = physics.mass;
                    component.velocity = Vec3::from(physics.velocity);
                    component.angular_velocity = Vec3::from(physics.angular_velocity);
                    component.custom = physics.custom;
                }
            }
            None => log::warn!(
                "Object '{}' names unknown kernel '{}', left static",
                object.name,
                name
            ),
        }
    }

    Ok(id)
}

fn load_mesh(object: &ObjectRecord, assets: &mut AssetStore, base_dir: &Path) -> Option<MeshHandle> {
    if let Some(primitive) = object.primitive_data.as_ref().filter(|p| p.is_primitive) {
        return match assets.add_primitive(primitive.primitive_type) {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::warn!("Primitive for '{}' failed: {}", object.name, err);
                None
            }
        };
    }

    let file = object.model_file.as_ref()?;
    let local = base_dir.join(file);
    let result = if local.is_file() {
        assets.load_mesh(&local)
    } else {
        assets.load_mesh(file)
    };
    match result {
        Ok(handle) => Some(handle),
        Err(err) => {
            log::warn!("Model '{}' for '{}' not loaded: {}", file, object.name, err);
            None
        }
    }
}

fn load_material(
    object: &ObjectRecord,
    record: &MaterialRecord,
    assets: &mut AssetStore,
    base_dir: &Path,
) -> MaterialHandle {
    if let Some(file) = &record.file {
        let local = base_dir.join(file);
        let result = if local.is_file() {
            assets.load_material(&local)
        } else {
            assets.load_material(file)
        };
        match result {
            Ok(handle) => return handle,
            Err(err) => log::warn!(
                "Material '{}' for '{}' not loaded, using saved colour: {}",
                file,
                object.name,
                err
            ),
        }
    }

    assets.add_material(
        MaterialAsset::solid(format!("{} material", object.name), record.base_color)
            .with_shader(record.shader.clone())
            .with_translucency(record.is_transparent),
    )
}

fn relative_path(path: &Path, base_dir: &Path) -> String {
    path.strip_prefix(base_dir).unwrap_or(path).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_minimal_document() {
        let text = r#"
            [scene_info]
            name = "demo"

            [camera]
            position = [1.0, 2.0, 3.0]
            yaw = -45.0

            [[objects]]
            name = "floor"
            primitive_data = { primitive_type = "plane" }
            transform = { scale = [20.0, 1.0, 20.0] }

            [[objects]]
            name = "ball"
            parent = 0
            physics = { kernel = "gravity", mass = 2.0 }
        "#;
        let document = SceneDocument::parse(text).unwrap();
        assert_eq!(document.scene_info.name, "demo");
        assert_eq!(document.camera.pitch, 0.0);
        assert_eq!(document.environment, EnvironmentRecord::default());
        assert_eq!(document.objects.len(), 2);
        assert_eq!(document.objects[0].primitive_data.as_ref().map(|p| p.primitive_type), Some(Primitive::Plane));
        assert_eq!(document.objects[1].physics.as_ref().map(|p| p.mass), Some(2.0));
    }

    #[test]
    fn test_forward_parent_rejected() {
        let text = r#"
            [[objects]]
            name = "orphan"
            parent = 0
        "#;
        assert!(matches!(SceneDocument::parse(text), Err(SceneError::File(_))));
    }

    #[test]
    fn test_capture_and_instantiate() {
        let mut assets = AssetStore::default();
        let registry = KernelRegistry::with_builtins();
        let mut scene = SceneGraph::new();

        let cube = assets.add_primitive(Primitive::Cube).unwrap();
        let red = assets.add_material(MaterialAsset::solid("red", [1.0, 0.0, 0.0, 1.0]));
        let parent = scene.create_named_entity("crate", None).unwrap();
        let child = scene.create_named_entity("lid", Some(parent)).unwrap();
        scene.attach_mesh(parent, cube, &mut assets).unwrap();
        scene.attach_material(parent, red, &mut assets).unwrap();
        scene
            .set_transform(child, Transform::from_euler(Vec3::new(0.0, 0.5, 0.0), Vec3::new(0.0, 0.3, 0.0), Vec3::new(1.0, 0.1, 1.0)))
            .unwrap();
        scene.attach_kernel(child, registry.lookup("spin").unwrap(), &registry).unwrap();
        scene.kernel_mut(child).unwrap().angular_velocity = Vec3::new(0.0, 1.0, 0.0);

        let document = SceneDocument::capture(&scene, &assets, &registry, &Camera::default(), [0.0; 4], Path::new("."));
        let text = document.to_toml_string().unwrap();
        let reparsed = SceneDocument::parse(&text).unwrap();
        assert_eq!(reparsed.objects.len(), 2);

        let mut fresh = SceneGraph::new();
        let created = reparsed.instantiate(&mut fresh, &mut assets, &registry, Path::new(".")).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(fresh.parent(created[1]), Some(created[0]));
        assert_eq!(fresh.mesh(created[0]), Some(cube));
        assert_eq!(assets.material(fresh.material(created[0]).unwrap()).unwrap().base_color, [1.0, 0.0, 0.0, 1.0]);

        let restored = fresh.transform(created[1]).unwrap();
        assert_relative_eq!(restored.position, Vec3::new(0.0, 0.5, 0.0), epsilon = 1e-6);
        assert_relative_eq!(restored.euler_angles().y, 0.3, epsilon = 1e-5);
        assert_relative_eq!(fresh.kernel(created[1]).unwrap().angular_velocity.y, 1.0);
    }

    /// Three objects as the Python editor writes them
    const EDITOR_MAP: &str = r#"
        [scene_info]
        name = "yard"
        version = "1.0.0"
        engine = "Hamid Py Engine"

        [[objects]]
        id = 0
        name = "Terrain_1.5x0.5km"
        [objects.transform]
        position = [0.0, 0.0, 0.0]
        rotation = [0.0, 0.0, 0.0]
        scale = [1.0, 1.0, 1.0]
        [objects.material]
        base_color = [0.4, 0.6, 0.3, 1.0]
        is_transparent = false
        [objects.physics]
        physics_type = "Static"
        physics_shape = "2DPlane"
        mass = 0.0
        [objects.terrain_data]
        is_terrain = true
        size_x_km = 1.5
        size_y_km = 0.5
        terrain_color = [0.2, 0.5, 0.1, 1.0]

        [[objects]]
        id = 1
        name = "Crate"
        [objects.transform]
        position = [0.0, 3.0, 0.0]
        rotation = [0.0, 0.0, 0.0]
        scale = [1.0, 1.0, 1.0]
        [objects.material]
        base_color = [0.7, 0.5, 0.3, 1.0]
        is_transparent = false
        [objects.physics]
        physics_type = "None"
        physics_shape = "Cube"
        mass = 1.0
        [objects.primitive_data]
        is_primitive = true
        primitive_type = "cube"

        [[objects]]
        id = 2
        name = "Player"
        [objects.transform]
        position = [2.0, 3.0, 0.0]
        rotation = [0.0, 0.0, 0.0]
        scale = [1.0, 1.0, 1.0]
        [objects.material]
        base_color = [0.2, 0.2, 0.9, 1.0]
        is_transparent = false
        [objects.physics]
        physics_type = "RigidBody"
        physics_shape = "Capsule"
        mass = 2.0
        [objects.primitive_data]
        is_primitive = true
        primitive_type = "capsule"
    "#;

    fn load_editor_map() -> (SceneGraph, AssetStore, KernelRegistry, Vec<EntityId>) {
        let document = SceneDocument::parse(EDITOR_MAP).unwrap();
        let mut assets = AssetStore::default();
        let registry = KernelRegistry::with_builtins();
        let mut scene = SceneGraph::new();
        let created = document.instantiate(&mut scene, &mut assets, &registry, Path::new(".")).unwrap();
        (scene, assets, registry, created)
    }

    #[test]
    fn test_editor_map_only_rigid_bodies_move() {
        let (mut scene, _assets, registry, created) = load_editor_map();
        let (terrain, crate_box, player) = (created[0], created[1], created[2]);
        assert!(scene.kernel(terrain).is_none());
        assert!(scene.kernel(crate_box).is_none());
        let body = scene.kernel(player).unwrap();
        assert_eq!(registry.name(body.kernel()), Some(Gravity::NAME));
        assert_eq!(body.mass, 2.0);

        let mut dispatcher = crate::kernels::Dispatcher::new(&crate::config::DispatchSettings::default());
        for _ in 0..30 {
            dispatcher.tick(&mut scene, &registry, 1.0 / 60.0);
        }
        assert_eq!(scene.transform(crate_box).unwrap().position.y, 3.0);
        assert!(scene.transform(player).unwrap().position.y < 3.0);
    }

    #[test]
    fn test_editor_map_terrain_and_capsule() {
        let (scene, assets, _registry, created) = load_editor_map();

        let terrain = scene.transform(created[0]).unwrap();
        assert_relative_eq!(terrain.scale, Vec3::new(1500.0, 1.0, 500.0));
        let plane = scene.mesh(created[0]).unwrap();
        assert_eq!(assets.source(plane.into()), Some(&AssetSource::Generated("primitive:plane".to_string())));
        let ground = assets.material(scene.material(created[0]).unwrap()).unwrap();
        assert_eq!(ground.base_color, [0.2, 0.5, 0.1, 1.0]);

        let capsule = scene.mesh(created[2]).unwrap();
        assert_relative_eq!(assets.mesh(capsule).unwrap().bounds().max.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_unknown_primitive_loads_as_cube() {
        let text = r#"
            [[objects]]
            name = "odd"
            primitive_data = { is_primitive = true, primitive_type = "torus" }

            [[objects]]
            name = "bare"
            primitive_data = { is_primitive = true }
        "#;
        let document = SceneDocument::parse(text).unwrap();
        let types: Vec<_> = document
            .objects
            .iter()
            .filter_map(|o| o.primitive_data.as_ref().map(|p| p.primitive_type))
            .collect();
        assert_eq!(types, vec![Primitive::Cube, Primitive::Cube]);
    }

    #[test]
    fn test_captured_kernel_survives_as_rigid_body() {
        let mut assets = AssetStore::default();
        let registry = KernelRegistry::with_builtins();
        let mut scene = SceneGraph::new();
        let ball = scene.create_named_entity("ball", None).unwrap();
        scene.attach_kernel(ball, registry.lookup(Gravity::NAME).unwrap(), &registry).unwrap();

        let document = SceneDocument::capture(&scene, &assets, &registry, &Camera::default(), [0.0; 4], Path::new("."));
        let physics = document.objects[0].physics.clone().unwrap();
        assert_eq!(physics.physics_type, PHYSICS_RIGID_BODY);
        assert_eq!(physics.kernel_name(), Some(Gravity::NAME));

        // Dropping the kernel name still leaves a falling body
        let mut document = document;
        document.objects[0].physics.as_mut().unwrap().kernel = None;
        let mut fresh = SceneGraph::new();
        let created = document.instantiate(&mut fresh, &mut assets, &registry, Path::new(".")).unwrap();
        assert!(fresh.kernel(created[0]).is_some());
    }

    #[test]
    fn test_instantiate_rolls_back_on_invalid_transform() {
        let mut document = SceneDocument::default();
        document.objects.push(ObjectRecord {
            name: "ok".to_string(),
            ..Default::default()
        });
        document.objects.push(ObjectRecord {
            name: "flat".to_string(),
            transform: TransformRecord {
                scale: [1.0, 0.0, 1.0],
                ..Default::default()
            },
            ..Default::default()
        });

        let mut assets = AssetStore::default();
        let mut scene = SceneGraph::new();
        let result = document.instantiate(&mut scene, &mut assets, &KernelRegistry::with_builtins(), Path::new("."));
        assert!(matches!(result, Err(SceneError::InvalidTransform(_))));
        assert!(scene.is_empty());
    }
}
