//! Entity hierarchy
//!
//! Each entity owns an optional slot per component kind (mesh, material,
//! kernel) rather than an open component table. Parents are weak links used
//! only for lookup; destroying an entity destroys its subtree explicitly.

use super::SceneError;
use crate::assets::{AssetHandle, AssetStore, MaterialHandle, MeshHandle};
use crate::foundation::math::{Mat4, Transform, Vec3};
use crate::kernels::{KernelId, KernelRegistry, KernelState};
use bitflags::bitflags;
use slotmap::{new_key_type, SecondaryMap, SlotMap};

new_key_type! {
    /// Stable entity identifier; stale ids never resolve again
    pub struct EntityId;
}

bitflags! {
    /// Per-entity render flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u32 {
        /// Skipped by the visibility resolver
        const HIDDEN = 1 << 0;
        /// Forces back-to-front blending regardless of material
        const TRANSLUCENT = 1 << 1;
    }
}

/// Kernel attachment plus the dynamic state it advances
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelComponent {
    kernel: KernelId,
    /// Linear velocity
    pub velocity: Vec3,
    /// Angular velocity as scaled axis
    pub angular_velocity: Vec3,
    /// Mass in kilograms
    pub mass: f32,
    /// Kernel-specific scalars
    pub custom: [f32; 4],
    faulted: bool,
}

impl KernelComponent {
    fn new(kernel: KernelId) -> Self {
        Self {
            kernel,
            velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            mass: 1.0,
            custom: [0.0; 4],
            faulted: false,
        }
    }

    /// Attached kernel
    pub fn kernel(&self) -> KernelId {
        self.kernel
    }

    /// True while the entity is frozen after a numeric fault
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }
}

/// Local transforms and kernel motion saved by [`SceneGraph::snapshot_transforms`]
#[derive(Debug, Clone, Default)]
pub struct TransformSnapshot {
    saved: SecondaryMap<EntityId, (Transform, Option<KernelComponent>)>,
}

impl TransformSnapshot {
    /// Entities captured
    pub fn len(&self) -> usize {
        self.saved.len()
    }

    /// True when nothing was captured
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    local: Transform,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    mesh: Option<MeshHandle>,
    material: Option<MaterialHandle>,
    kernel: Option<KernelComponent>,
    flags: EntityFlags,
}

/// Scene graph
#[derive(Default)]
pub struct SceneGraph {
    nodes: SlotMap<EntityId, Node>,
    roots: Vec<EntityId>,
    order: Vec<EntityId>,
    next_index: u64,
}

impl SceneGraph {
    /// Empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity with a generated name
    pub fn create_entity(&mut self, parent: Option<EntityId>) -> Result<EntityId, SceneError> {
        let name = format!("Entity {}", self.next_index);
        self.create_named_entity(name, parent)
    }

    /// Create a named entity under `parent`, or as a root
    pub fn create_named_entity(
        &mut self,
        name: impl Into<String>,
        parent: Option<EntityId>,
    ) -> Result<EntityId, SceneError> {
        if let Some(parent) = parent {
            self.node(parent)?;
        }

        let id = self.nodes.insert(Node {
            name: name.into(),
            local: Transform::identity(),
            parent,
            children: Vec::new(),
            mesh: None,
            material: None,
            kernel: None,
            flags: EntityFlags::empty(),
        });
        self.next_index += 1;

        match parent {
            Some(parent) => self.nodes[parent].children.push(id),
            None => self.roots.push(id),
        }
        self.order.push(id);
        log::trace!("Created entity {:?} under {:?}", id, parent);
        Ok(id)
    }

    /// Destroy an entity and its whole subtree
    ///
    /// Asset references held by the destroyed entities are released. Returns
    /// the destroyed ids, parents before children.
    pub fn destroy_entity(
        &mut self,
        id: EntityId,
        assets: &mut AssetStore,
    ) -> Result<Vec<EntityId>, SceneError> {
        let parent = self.node(id)?.parent;

        let mut destroyed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(current) {
                release_refs(&node, assets);
                stack.extend(node.children.iter().rev());
                destroyed.push(current);
            }
        }

        match parent {
            Some(parent) => {
                if let Some(node) = self.nodes.get_mut(parent) {
                    node.children.retain(|&c| c != id);
                }
            }
            None => self.roots.retain(|&r| r != id),
        }
        let nodes = &self.nodes;
        self.order.retain(|&e| nodes.contains_key(e));

        log::debug!("Destroyed {} entities rooted at {:?}", destroyed.len(), id);
        Ok(destroyed)
    }

    /// Copy an entity's components (not its children) under the same parent
    pub fn duplicate_entity(
        &mut self,
        id: EntityId,
        assets: &mut AssetStore,
    ) -> Result<EntityId, SceneError> {
        let source = self.node(id)?.clone();

        if let Some(mesh) = source.mesh {
            retain(assets, mesh.into())?;
        }
        if let Some(material) = source.material {
            if let Err(err) = retain(assets, material.into()) {
                if let Some(mesh) = source.mesh {
                    let _ = assets.release(mesh.into());
                }
                return Err(err);
            }
        }

        let copy = self.create_named_entity(format!("{} copy", source.name), source.parent)?;
        let node = &mut self.nodes[copy];
        node.local = source.local;
        node.mesh = source.mesh;
        node.material = source.material;
        node.kernel = source.kernel;
        node.flags = source.flags;
        Ok(copy)
    }

    /// Replace an entity's local transform
    ///
    /// Rejects zero scale and non-finite values. Clears a kernel fault, since
    /// the entity now has externally supplied state.
    pub fn set_transform(&mut self, id: EntityId, transform: Transform) -> Result<(), SceneError> {
        if !transform.is_valid() {
            return Err(SceneError::InvalidTransform(format!("{:?}", transform)));
        }
        let node = self.node_mut(id)?;
        node.local = transform;
        if let Some(kernel) = node.kernel.as_mut() {
            kernel.faulted = false;
        }
        Ok(())
    }

    /// Local transform
    pub fn transform(&self, id: EntityId) -> Result<Transform, SceneError> {
        Ok(self.node(id)?.local)
    }

    /// Re-parent an entity, keeping its local transform
    ///
    /// Fails with [`SceneError::Cycle`] if `parent` is `id` or one of its
    /// descendants; the graph is untouched on any error.
    pub fn set_parent(&mut self, id: EntityId, parent: Option<EntityId>) -> Result<(), SceneError> {
        let old_parent = self.node(id)?.parent;

        if let Some(new_parent) = parent {
            let mut cursor = Some(new_parent);
            while let Some(ancestor) = cursor {
                if ancestor == id {
                    return Err(SceneError::Cycle {
                        child: id,
                        parent: new_parent,
                    });
                }
                cursor = self.node(ancestor)?.parent;
            }
        }

        if old_parent == parent {
            return Ok(());
        }

        match old_parent {
            Some(old) => self.nodes[old].children.retain(|&c| c != id),
            None => self.roots.retain(|&r| r != id),
        }
        match parent {
            Some(new_parent) => self.nodes[new_parent].children.push(id),
            None => self.roots.push(id),
        }
        self.nodes[id].parent = parent;
        Ok(())
    }

    /// Attach a mesh, releasing any previous one
    pub fn attach_mesh(
        &mut self,
        id: EntityId,
        mesh: MeshHandle,
        assets: &mut AssetStore,
    ) -> Result<(), SceneError> {
        self.node(id)?;
        retain(assets, mesh.into())?;
        let previous = self.nodes[id].mesh.replace(mesh);
        if let Some(previous) = previous {
            let _ = assets.release(previous.into());
        }
        Ok(())
    }

    /// Attach a material, releasing any previous one
    pub fn attach_material(
        &mut self,
        id: EntityId,
        material: MaterialHandle,
        assets: &mut AssetStore,
    ) -> Result<(), SceneError> {
        self.node(id)?;
        retain(assets, material.into())?;
        let previous = self.nodes[id].material.replace(material);
        if let Some(previous) = previous {
            let _ = assets.release(previous.into());
        }
        Ok(())
    }

    /// Remove the mesh reference
    pub fn detach_mesh(&mut self, id: EntityId, assets: &mut AssetStore) -> Result<(), SceneError> {
        if let Some(previous) = self.node_mut(id)?.mesh.take() {
            let _ = assets.release(previous.into());
        }
        Ok(())
    }

    /// Remove the material reference
    pub fn detach_material(&mut self, id: EntityId, assets: &mut AssetStore) -> Result<(), SceneError> {
        if let Some(previous) = self.node_mut(id)?.material.take() {
            let _ = assets.release(previous.into());
        }
        Ok(())
    }

    /// Attach a kernel
    ///
    /// Dynamic state (velocity, mass, custom fields) survives a kernel swap;
    /// a fault is cleared.
    pub fn attach_kernel(
        &mut self,
        id: EntityId,
        kernel: KernelId,
        registry: &KernelRegistry,
    ) -> Result<(), SceneError> {
        self.node(id)?;
        if !registry.contains(kernel) {
            return Err(SceneError::KernelNotFound(format!("{:?}", kernel)));
        }

        let node = &mut self.nodes[id];
        match node.kernel.as_mut() {
            Some(component) => {
                component.kernel = kernel;
                component.faulted = false;
            }
            None => node.kernel = Some(KernelComponent::new(kernel)),
        }
        Ok(())
    }

    /// Remove the kernel and its dynamic state
    pub fn detach_kernel(&mut self, id: EntityId) -> Result<Option<KernelComponent>, SceneError> {
        Ok(self.node_mut(id)?.kernel.take())
    }

    /// Kernel attachment
    pub fn kernel(&self, id: EntityId) -> Option<&KernelComponent> {
        self.nodes.get(id).and_then(|n| n.kernel.as_ref())
    }

    /// Mutable kernel attachment, for seeding velocity, mass and custom fields
    pub fn kernel_mut(&mut self, id: EntityId) -> Option<&mut KernelComponent> {
        self.nodes.get_mut(id).and_then(|n| n.kernel.as_mut())
    }

    /// Null out every reference to a force-unloaded asset
    ///
    /// The store has already forgotten the handle, so nothing is released.
    /// Returns how many entities were affected.
    pub fn clear_asset_refs(&mut self, handle: AssetHandle) -> usize {
        let mut cleared = 0;
        for node in self.nodes.values_mut() {
            let hit = match handle {
                AssetHandle::Mesh(mesh) if node.mesh == Some(mesh) => {
                    node.mesh = None;
                    true
                }
                AssetHandle::Material(material) if node.material == Some(material) => {
                    node.material = None;
                    true
                }
                _ => false,
            };
            cleared += usize::from(hit);
        }
        cleared
    }

    /// Mesh reference
    pub fn mesh(&self, id: EntityId) -> Option<MeshHandle> {
        self.nodes.get(id).and_then(|n| n.mesh)
    }

    /// Material reference
    pub fn material(&self, id: EntityId) -> Option<MaterialHandle> {
        self.nodes.get(id).and_then(|n| n.material)
    }

    /// Display name
    pub fn name(&self, id: EntityId) -> Option<&str> {
        self.nodes.get(id).map(|n| n.name.as_str())
    }

    /// Rename an entity
    pub fn set_name(&mut self, id: EntityId, name: impl Into<String>) -> Result<(), SceneError> {
        self.node_mut(id)?.name = name.into();
        Ok(())
    }

    /// Render flags
    pub fn flags(&self, id: EntityId) -> EntityFlags {
        self.nodes.get(id).map_or(EntityFlags::empty(), |n| n.flags)
    }

    /// Replace render flags
    pub fn set_flags(&mut self, id: EntityId, flags: EntityFlags) -> Result<(), SceneError> {
        self.node_mut(id)?.flags = flags;
        Ok(())
    }

    /// First entity, in creation order, with the given name
    pub fn find_by_name(&self, name: &str) -> Option<EntityId> {
        self.order.iter().copied().find(|&id| self.nodes[id].name == name)
    }

    /// Parent of an entity
    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    /// Children in attachment order; empty for unknown ids
    pub fn children(&self, id: EntityId) -> &[EntityId] {
        self.nodes.get(id).map_or(&[][..], |n| n.children.as_slice())
    }

    /// Root entities in attachment order
    pub fn roots(&self) -> &[EntityId] {
        &self.roots
    }

    /// Whether the id is live
    pub fn contains(&self, id: EntityId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the scene holds no entities
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Live entities in creation order
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.order.iter().copied()
    }

    /// World matrix, composed by walking up to the root
    pub fn world_matrix(&self, id: EntityId) -> Result<Mat4, SceneError> {
        let node = self.node(id)?;
        let mut world = node.local.to_matrix();
        let mut cursor = node.parent;
        while let Some(parent) = cursor {
            let parent_node = self.node(parent)?;
            world = parent_node.local.to_matrix() * world;
            cursor = parent_node.parent;
        }
        Ok(world)
    }

    /// World matrices of every entity, composed depth-first from the roots
    pub fn world_matrices(&self) -> SecondaryMap<EntityId, Mat4> {
        let mut worlds = SecondaryMap::with_capacity(self.nodes.len());
        let mut stack: Vec<(EntityId, Mat4)> =
            self.roots.iter().rev().map(|&r| (r, Mat4::identity())).collect();

        while let Some((id, parent_world)) = stack.pop() {
            let node = &self.nodes[id];
            let world = parent_world * node.local.to_matrix();
            worlds.insert(id, world);
            stack.extend(node.children.iter().rev().map(|&c| (c, world)));
        }
        worlds
    }

    /// Save every local transform and kernel state
    pub fn snapshot_transforms(&self) -> TransformSnapshot {
        TransformSnapshot {
            saved: self.nodes.iter().map(|(id, node)| (id, (node.local, node.kernel))).collect(),
        }
    }

    /// Put saved transforms back and return how many entities were restored
    ///
    /// Entities destroyed since the snapshot are skipped and entities created
    /// since are left alone. Kernel motion is reset only where the same
    /// kernel is still attached; faults are cleared either way.
    pub fn restore_transforms(&mut self, snapshot: &TransformSnapshot) -> usize {
        let mut restored = 0;
        for (id, (local, saved_kernel)) in &snapshot.saved {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            node.local = *local;
            if let Some(kernel) = node.kernel.as_mut() {
                if let Some(saved) = saved_kernel.filter(|saved| saved.kernel == kernel.kernel) {
                    *kernel = saved;
                }
                kernel.faulted = false;
            }
            restored += 1;
        }
        restored
    }

    /// Snapshot of every entity with a live (unfaulted) kernel, in creation order
    pub fn kernel_snapshot(&self) -> Vec<(EntityId, KernelId, KernelState)> {
        self.order
            .iter()
            .filter_map(|&id| {
                let node = &self.nodes[id];
                let component = node.kernel.as_ref().filter(|k| !k.faulted)?;
                Some((
                    id,
                    component.kernel,
                    KernelState {
                        transform: node.local,
                        velocity: component.velocity,
                        angular_velocity: component.angular_velocity,
                        mass: component.mass,
                        custom: component.custom,
                    },
                ))
            })
            .collect()
    }

    /// Write back a kernel result
    pub(crate) fn apply_kernel_state(&mut self, id: EntityId, state: &KernelState) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.local = state.transform;
            if let Some(component) = node.kernel.as_mut() {
                component.velocity = state.velocity;
                component.angular_velocity = state.angular_velocity;
                component.mass = state.mass;
                component.custom = state.custom;
            }
        }
    }

    /// Freeze an entity after a numeric fault
    pub(crate) fn mark_kernel_faulted(&mut self, id: EntityId) {
        if let Some(component) = self.nodes.get_mut(id).and_then(|n| n.kernel.as_mut()) {
            component.faulted = true;
        }
    }

    fn node(&self, id: EntityId) -> Result<&Node, SceneError> {
        self.nodes.get(id).ok_or(SceneError::EntityNotFound(id))
    }

    fn node_mut(&mut self, id: EntityId) -> Result<&mut Node, SceneError> {
        self.nodes.get_mut(id).ok_or(SceneError::EntityNotFound(id))
    }
}

fn retain(assets: &mut AssetStore, handle: AssetHandle) -> Result<(), SceneError> {
    assets
        .retain(handle)
        .map_err(|_| SceneError::AssetNotFound(handle.to_string()))
}

fn release_refs(node: &Node, assets: &mut AssetStore) {
    if let Some(mesh) = node.mesh {
        let _ = assets.release(mesh.into());
    }
    if let Some(material) = node.material {
        let _ = assets.release(material.into());
    }
}
