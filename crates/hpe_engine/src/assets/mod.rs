//! Asset management system
//!
//! The [`AssetStore`] owns every loaded mesh and material. Handles are
//! versioned slot-map keys: once an asset is unloaded its handle never
//! resolves again, even if the slot is reused by a later load.
//!
//! Unloads and reloads are announced through [`AssetEvent`]s, which the engine
//! forwards to the scene graph and the render backend adapter.

pub mod image_loader;
pub mod material;
pub mod mesh;
pub mod obj_loader;
pub mod primitives;

pub use image_loader::ImageData;
pub use material::{MaterialAsset, MaterialDescription, MaterialTexture, DEFAULT_SHADER};
pub use mesh::{MeshAsset, Vertex};
pub use obj_loader::ObjLoader;
pub use primitives::Primitive;

use crate::foundation::collections::{DefaultKey, Key, SlotMap, TypedHandle};
use mesh::MeshDescription;
use std::fmt;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Handle to a loaded mesh
pub type MeshHandle = TypedHandle<MeshAsset>;

/// Handle to a loaded material
pub type MaterialHandle = TypedHandle<MaterialAsset>;

/// Either kind of asset handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetHandle {
    /// Mesh asset
    Mesh(MeshHandle),
    /// Material asset
    Material(MaterialHandle),
}

impl fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mesh(h) => write!(f, "mesh {:?}", h.key().data()),
            Self::Material(h) => write!(f, "material {:?}", h.key().data()),
        }
    }
}

impl From<MeshHandle> for AssetHandle {
    fn from(handle: MeshHandle) -> Self {
        Self::Mesh(handle)
    }
}

impl From<MaterialHandle> for AssetHandle {
    fn from(handle: MaterialHandle) -> Self {
        Self::Material(handle)
    }
}

/// Where an asset's contents came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// Loaded from a file; reloadable
    File(PathBuf),
    /// Built in memory (primitives, runtime materials)
    Generated(String),
}

/// Lifecycle notification for downstream owners of derived state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetEvent {
    /// The handle is gone for good
    Unloaded(AssetHandle),
    /// Same handle, new contents
    Reloaded(AssetHandle),
}

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// File missing, unreadable, or contents rejected by the parser
    #[error("Failed to load asset {path}: {reason}")]
    LoadFailed {
        /// Offending path
        path: String,
        /// Parser or filesystem message
        reason: String,
    },

    /// Unsupported asset format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Geometry that cannot form a valid vertex/index buffer
    #[error("Malformed geometry: {0}")]
    MalformedGeometry(String),

    /// Unload refused because entities still reference the asset
    #[error("Asset {handle} is still referenced by {references} entities")]
    HandleInUse {
        /// Handle description
        handle: String,
        /// Outstanding references
        references: usize,
    },

    /// Stale or unknown handle
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// IO error during asset loading
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

struct Entry<T> {
    asset: T,
    source: AssetSource,
    references: usize,
}

impl<T> Entry<T> {
    fn new(asset: T, source: AssetSource) -> Self {
        Self {
            asset,
            source,
            references: 0,
        }
    }
}

enum FileKind {
    Obj,
    RonMesh,
    Material { ron: bool },
    Image,
}

impl FileKind {
    fn classify(path: &Path) -> Result<Self, AssetError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if file_name.ends_with(".material.toml") {
            return Ok(Self::Material { ron: false });
        }
        if file_name.ends_with(".material.ron") {
            return Ok(Self::Material { ron: true });
        }

        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("obj") => Ok(Self::Obj),
            Some("ron") => Ok(Self::RonMesh),
            Some("png") | Some("jpg") | Some("jpeg") => Ok(Self::Image),
            _ => Err(AssetError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn is_mesh(&self) -> bool {
        matches!(self, Self::Obj | Self::RonMesh)
    }
}

/// Owner of all mesh and material assets
pub struct AssetStore {
    meshes: SlotMap<DefaultKey, Entry<MeshAsset>>,
    materials: SlotMap<DefaultKey, Entry<MaterialAsset>>,
    search_paths: Vec<PathBuf>,
    events: Vec<AssetEvent>,
}

impl Default for AssetStore {
    fn default() -> Self {
        Self::new(Vec::<PathBuf>::new())
    }
}

impl AssetStore {
    /// Create a store that resolves relative paths against `search_paths` first
    pub fn new<I, P>(search_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            meshes: SlotMap::new(),
            materials: SlotMap::new(),
            search_paths: search_paths.into_iter().map(Into::into).collect(),
            events: Vec::new(),
        }
    }

    /// Load any supported file, choosing mesh or material by extension
    ///
    /// Images load as a textured material using the default shader. Loading
    /// a path that is already resident returns the existing handle.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<AssetHandle, AssetError> {
        let path = self.resolve(path.as_ref())?;
        if FileKind::classify(&path)?.is_mesh() {
            self.load_mesh(&path).map(AssetHandle::Mesh)
        } else {
            self.load_material(&path).map(AssetHandle::Material)
        }
    }

    /// Load a mesh file (`.obj` or `.ron`)
    pub fn load_mesh<P: AsRef<Path>>(&mut self, path: P) -> Result<MeshHandle, AssetError> {
        let path = self.resolve(path.as_ref())?;
        if let Some(handle) = self.find_mesh_by_path(&path) {
            log::debug!("Mesh {} already loaded", path.display());
            return Ok(handle);
        }

        let mesh = read_mesh(&path)?;
        log::info!(
            "Loaded mesh {} ({} vertices, {} triangles)",
            path.display(),
            mesh.vertices().len(),
            mesh.triangle_count()
        );
        let key = self.meshes.insert(Entry::new(mesh, AssetSource::File(path)));
        Ok(MeshHandle::new(key))
    }

    /// Load a material description or image file
    pub fn load_material<P: AsRef<Path>>(&mut self, path: P) -> Result<MaterialHandle, AssetError> {
        let path = self.resolve(path.as_ref())?;
        if let Some(handle) = self.find_material_by_path(&path) {
            log::debug!("Material {} already loaded", path.display());
            return Ok(handle);
        }

        let material = read_material(&path)?;
        log::info!("Loaded material '{}' from {}", material.name, path.display());
        let key = self.materials.insert(Entry::new(material, AssetSource::File(path)));
        Ok(MaterialHandle::new(key))
    }

    /// Register an in-memory mesh
    pub fn add_mesh(&mut self, name: impl Into<String>, mesh: MeshAsset) -> MeshHandle {
        let key = self.meshes.insert(Entry::new(mesh, AssetSource::Generated(name.into())));
        MeshHandle::new(key)
    }

    /// Register an in-memory material
    pub fn add_material(&mut self, material: MaterialAsset) -> MaterialHandle {
        let source = AssetSource::Generated(material.name.clone());
        let key = self.materials.insert(Entry::new(material, source));
        MaterialHandle::new(key)
    }

    /// Get or build the mesh for a primitive shape
    pub fn add_primitive(&mut self, primitive: Primitive) -> Result<MeshHandle, AssetError> {
        let name = format!("primitive:{}", primitive);
        let existing = self
            .meshes
            .iter()
            .find(|(_, entry)| matches!(&entry.source, AssetSource::Generated(n) if *n == name));
        if let Some((key, _)) = existing {
            return Ok(MeshHandle::new(key));
        }

        let mesh = primitive.build()?;
        Ok(self.add_mesh(name, mesh))
    }

    /// Look up a mesh
    pub fn mesh(&self, handle: MeshHandle) -> Option<&MeshAsset> {
        self.meshes.get(handle.key()).map(|e| &e.asset)
    }

    /// Look up a material
    pub fn material(&self, handle: MaterialHandle) -> Option<&MaterialAsset> {
        self.materials.get(handle.key()).map(|e| &e.asset)
    }

    /// Whether the handle still resolves
    pub fn contains(&self, handle: AssetHandle) -> bool {
        match handle {
            AssetHandle::Mesh(h) => self.meshes.contains_key(h.key()),
            AssetHandle::Material(h) => self.materials.contains_key(h.key()),
        }
    }

    /// Where the asset came from
    pub fn source(&self, handle: AssetHandle) -> Option<&AssetSource> {
        match handle {
            AssetHandle::Mesh(h) => self.meshes.get(h.key()).map(|e| &e.source),
            AssetHandle::Material(h) => self.materials.get(h.key()).map(|e| &e.source),
        }
    }

    /// Record one more referencing entity
    pub fn retain(&mut self, handle: AssetHandle) -> Result<(), AssetError> {
        *self.references_mut(handle)? += 1;
        Ok(())
    }

    /// Drop one reference
    pub fn release(&mut self, handle: AssetHandle) -> Result<(), AssetError> {
        let references = self.references_mut(handle)?;
        *references = references.saturating_sub(1);
        Ok(())
    }

    /// Current reference count, `None` for a stale handle
    pub fn ref_count(&self, handle: AssetHandle) -> Option<usize> {
        match handle {
            AssetHandle::Mesh(h) => self.meshes.get(h.key()).map(|e| e.references),
            AssetHandle::Material(h) => self.materials.get(h.key()).map(|e| e.references),
        }
    }

    /// Unload an asset
    ///
    /// Refuses with [`AssetError::HandleInUse`] while entities reference it,
    /// unless `force` is set. Returns the number of references that were
    /// outstanding; the caller is responsible for nulling them out.
    pub fn unload(&mut self, handle: AssetHandle, force: bool) -> Result<usize, AssetError> {
        let references = self
            .ref_count(handle)
            .ok_or_else(|| AssetError::NotFound(handle.to_string()))?;

        if references > 0 && !force {
            return Err(AssetError::HandleInUse {
                handle: handle.to_string(),
                references,
            });
        }

        match handle {
            AssetHandle::Mesh(h) => {
                self.meshes.remove(h.key());
            }
            AssetHandle::Material(h) => {
                self.materials.remove(h.key());
            }
        }

        if references > 0 {
            log::warn!("Force-unloaded {} with {} live references", handle, references);
        } else {
            log::info!("Unloaded {}", handle);
        }
        self.events.push(AssetEvent::Unloaded(handle));
        Ok(references)
    }

    /// Re-read a file-backed asset in place
    ///
    /// On failure the previous contents stay resident.
    pub fn reload(&mut self, handle: AssetHandle) -> Result<(), AssetError> {
        let path = match self.source(handle) {
            Some(AssetSource::File(path)) => path.clone(),
            Some(AssetSource::Generated(name)) => {
                return Err(AssetError::LoadFailed {
                    path: name.clone(),
                    reason: "generated asset has no backing file".to_string(),
                })
            }
            None => return Err(AssetError::NotFound(handle.to_string())),
        };

        match handle {
            AssetHandle::Mesh(h) => {
                let mesh = read_mesh(&path)?;
                if let Some(entry) = self.meshes.get_mut(h.key()) {
                    entry.asset = mesh;
                }
            }
            AssetHandle::Material(h) => {
                let material = read_material(&path)?;
                if let Some(entry) = self.materials.get_mut(h.key()) {
                    entry.asset = material;
                }
            }
        }

        log::info!("Reloaded {} from {}", handle, path.display());
        self.events.push(AssetEvent::Reloaded(handle));
        Ok(())
    }

    /// Unload everything regardless of references
    pub fn clear(&mut self) {
        let handles: Vec<AssetHandle> = self
            .meshes
            .keys()
            .map(|k| AssetHandle::Mesh(MeshHandle::new(k)))
            .chain(self.materials.keys().map(|k| AssetHandle::Material(MaterialHandle::new(k))))
            .collect();
        self.meshes.clear();
        self.materials.clear();
        self.events.extend(handles.into_iter().map(AssetEvent::Unloaded));
    }

    /// Take pending lifecycle notifications
    pub fn drain_events(&mut self) -> Vec<AssetEvent> {
        std::mem::take(&mut self.events)
    }

    /// Number of resident meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Number of resident materials
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    fn references_mut(&mut self, handle: AssetHandle) -> Result<&mut usize, AssetError> {
        let references = match handle {
            AssetHandle::Mesh(h) => self.meshes.get_mut(h.key()).map(|e| &mut e.references),
            AssetHandle::Material(h) => self.materials.get_mut(h.key()).map(|e| &mut e.references),
        };
        references.ok_or_else(|| AssetError::NotFound(handle.to_string()))
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, AssetError> {
        if path.is_relative() {
            for search_path in &self.search_paths {
                let candidate = search_path.join(path);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }

        if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(AssetError::LoadFailed {
                path: path.display().to_string(),
                reason: "file not found".to_string(),
            })
        }
    }

    fn find_mesh_by_path(&self, path: &Path) -> Option<MeshHandle> {
        self.meshes
            .iter()
            .find(|(_, e)| matches!(&e.source, AssetSource::File(p) if p == path))
            .map(|(k, _)| MeshHandle::new(k))
    }

    fn find_material_by_path(&self, path: &Path) -> Option<MaterialHandle> {
        self.materials
            .iter()
            .find(|(_, e)| matches!(&e.source, AssetSource::File(p) if p == path))
            .map(|(k, _)| MaterialHandle::new(k))
    }
}

fn read_mesh(path: &Path) -> Result<MeshAsset, AssetError> {
    match FileKind::classify(path)? {
        FileKind::Obj => {
            let file = fs::File::open(path)?;
            ObjLoader::parse(BufReader::new(file))
        }
        FileKind::RonMesh => {
            let text = fs::read_to_string(path)?;
            MeshDescription::parse(&text)
                .map_err(|reason| AssetError::LoadFailed {
                    path: path.display().to_string(),
                    reason,
                })?
                .into_mesh()
        }
        _ => Err(AssetError::UnsupportedFormat(format!(
            "{} is not a mesh file",
            path.display()
        ))),
    }
}

fn read_material(path: &Path) -> Result<MaterialAsset, AssetError> {
    let name = asset_name(path);
    match FileKind::classify(path)? {
        FileKind::Material { ron } => {
            let text = fs::read_to_string(path)?;
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
            MaterialDescription::parse(&text, ron)
                .map_err(|reason| AssetError::LoadFailed {
                    path: path.display().to_string(),
                    reason,
                })?
                .into_material(&name, base_dir)
        }
        FileKind::Image => Ok(MaterialAsset::textured(name, ImageData::from_file(path)?)),
        _ => Err(AssetError::UnsupportedFormat(format!(
            "{} is not a material file",
            path.display()
        ))),
    }
}

/// File stem without the `.material` infix
fn asset_name(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unnamed");
    stem.strip_suffix(".material").unwrap_or(stem).to_string()
}
