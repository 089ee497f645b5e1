//! Visibility and draw-order resolution
//!
//! Produces a fresh [`DrawList`] each frame from the scene as it stands after
//! the update phase. Opaque items come first, nearest first; translucent items
//! follow, farthest first. Equal depths fall back to material handle and then
//! entity id, so the order never depends on hash or thread scheduling.

use crate::assets::{AssetStore, MaterialHandle, MeshHandle};
use crate::foundation::math::{Mat4, Vec3};
use crate::scene::{Camera, EntityFlags, EntityId, SceneGraph};
use std::cmp::Ordering;

/// One renderable unit for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    /// Source entity
    pub entity: EntityId,
    /// Geometry
    pub mesh: MeshHandle,
    /// Shader and parameters
    pub material: MaterialHandle,
    /// World matrix at the end of the update phase
    pub world: Mat4,
    /// View-space depth of the world bounds centre
    pub depth: f32,
    /// Alpha-blended
    pub translucent: bool,
}

/// Ordered draw items plus what was left out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawList {
    /// Items in submission order
    pub items: Vec<DrawItem>,
    /// Entities outside the frustum
    pub culled: usize,
    /// Entities flagged hidden
    pub hidden: usize,
    /// Entities with a null or stale mesh/material reference
    pub unbound: usize,
}

impl DrawList {
    /// Number of draw items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing will be drawn
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entity ids in draw order
    pub fn entities(&self) -> Vec<EntityId> {
        self.items.iter().map(|item| item.entity).collect()
    }

    /// Opaque prefix of the list
    pub fn opaque(&self) -> &[DrawItem] {
        let split = self.items.iter().position(|i| i.translucent).unwrap_or(self.items.len());
        &self.items[..split]
    }

    /// Translucent suffix of the list
    pub fn translucent(&self) -> &[DrawItem] {
        let split = self.items.iter().position(|i| i.translucent).unwrap_or(self.items.len());
        &self.items[split..]
    }
}

/// Cull and sort the scene for `camera`
pub fn resolve(scene: &SceneGraph, assets: &AssetStore, camera: &Camera) -> DrawList {
    let frustum = camera.frustum();
    let worlds = scene.world_matrices();
    let mut list = DrawList::default();

    for entity in scene.iter() {
        let (mesh_ref, material_ref) = (scene.mesh(entity), scene.material(entity));
        if mesh_ref.is_none() && material_ref.is_none() {
            continue;
        }

        let resolved = mesh_ref
            .and_then(|h| assets.mesh(h).map(|m| (h, m)))
            .zip(material_ref.and_then(|h| assets.material(h).map(|m| (h, m))));
        let Some(((mesh, mesh_asset), (material, material_asset))) = resolved else {
            log::trace!("Entity {:?} has an unbound mesh or material; not drawn", entity);
            list.unbound += 1;
            continue;
        };

        let flags = scene.flags(entity);
        if flags.contains(EntityFlags::HIDDEN) {
            list.hidden += 1;
            continue;
        }

        let Some(world) = worlds.get(entity).copied() else {
            continue;
        };
        let bounds = mesh_asset.bounds().transformed(&world);
        if !frustum.intersects_aabb(&bounds) {
            list.culled += 1;
            continue;
        }

        let center: Vec3 = bounds.center();
        list.items.push(DrawItem {
            entity,
            mesh,
            material,
            world,
            depth: camera.depth(&center),
            translucent: flags.contains(EntityFlags::TRANSLUCENT) || material_asset.is_translucent(),
        });
    }

    list.items.sort_by(draw_order);
    log::debug!(
        "Resolved {} draw items ({} culled, {} hidden, {} unbound)",
        list.items.len(),
        list.culled,
        list.hidden,
        list.unbound
    );
    list
}

fn draw_order(a: &DrawItem, b: &DrawItem) -> Ordering {
    a.translucent
        .cmp(&b.translucent)
        .then_with(|| {
            if a.translucent {
                b.depth.total_cmp(&a.depth)
            } else {
                a.depth.total_cmp(&b.depth)
            }
        })
        .then_with(|| a.material.cmp(&b.material))
        .then_with(|| a.entity.cmp(&b.entity))
}
