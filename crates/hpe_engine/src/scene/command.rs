//! Scene mutation commands
//!
//! Editors, scripts and other threads never touch the scene directly while a
//! frame is in flight. They send [`SceneCommand`]s through a [`CommandSender`];
//! the engine drains the queue at the next `Idle` boundary and applies the
//! commands in arrival order.

use super::{EntityFlags, EntityId, SceneError};
use crate::assets::{AssetError, AssetHandle, MaterialHandle, MeshHandle};
use crate::foundation::math::{Transform, Vec3};
use crossbeam::channel::{self, Receiver, Sender};
use std::path::PathBuf;

/// Reply channel for commands that produce a value
pub type Reply<T> = Sender<T>;

/// A deferred scene mutation
#[derive(Debug)]
pub enum SceneCommand {
    /// Create an entity
    CreateEntity {
        /// Display name, generated when absent
        name: Option<String>,
        /// Parent, root when absent
        parent: Option<EntityId>,
        /// Receives the new id or the failure
        reply: Option<Reply<Result<EntityId, SceneError>>>,
    },
    /// Destroy an entity and its subtree
    DestroyEntity(EntityId),
    /// Copy an entity's components
    DuplicateEntity(EntityId),
    /// Replace a local transform
    SetTransform(EntityId, Transform),
    /// Re-parent an entity
    SetParent(EntityId, Option<EntityId>),
    /// Attach a mesh
    AttachMesh(EntityId, MeshHandle),
    /// Attach a material
    AttachMaterial(EntityId, MaterialHandle),
    /// Attach a registered kernel by name
    AttachKernel(EntityId, String),
    /// Replace render flags
    SetFlags(EntityId, EntityFlags),
    /// Load an asset file
    LoadAsset {
        /// File to load
        path: PathBuf,
        /// Receives the handle or the failure
        reply: Option<Reply<Result<AssetHandle, AssetError>>>,
    },
    /// Unload an asset
    UnloadAsset {
        /// Asset to drop
        handle: AssetHandle,
        /// Null out live references instead of refusing
        force: bool,
    },
    /// Re-read a file-backed asset
    ReloadAsset(AssetHandle),
    /// Move and orient the camera
    SetCamera {
        /// Eye position
        position: Vec3,
        /// Yaw in degrees
        yaw: f32,
        /// Pitch in degrees
        pitch: f32,
    },
    /// Save every transform for a later restore
    SnapshotTransforms,
    /// Return entities to the last saved transforms
    RestoreTransforms,
    /// Stop the engine loop after the current frame
    Quit,
}

impl SceneCommand {
    /// Short label for logs and rejection reports
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateEntity { .. } => "create_entity",
            Self::DestroyEntity(_) => "destroy_entity",
            Self::DuplicateEntity(_) => "duplicate_entity",
            Self::SetTransform(..) => "set_transform",
            Self::SetParent(..) => "set_parent",
            Self::AttachMesh(..) => "attach_mesh",
            Self::AttachMaterial(..) => "attach_material",
            Self::AttachKernel(..) => "attach_kernel",
            Self::SetFlags(..) => "set_flags",
            Self::LoadAsset { .. } => "load_asset",
            Self::UnloadAsset { .. } => "unload_asset",
            Self::ReloadAsset(_) => "reload_asset",
            Self::SetCamera { .. } => "set_camera",
            Self::SnapshotTransforms => "snapshot_transforms",
            Self::RestoreTransforms => "restore_transforms",
            Self::Quit => "quit",
        }
    }
}

/// Cloneable handle for submitting commands from any thread
#[derive(Debug, Clone)]
pub struct CommandSender {
    sender: Sender<SceneCommand>,
}

impl CommandSender {
    /// Queue a command; hands it back if the engine has shut down
    pub fn send(&self, command: SceneCommand) -> Result<(), SceneCommand> {
        self.sender.send(command).map_err(|e| e.into_inner())
    }

    /// Queue an entity creation and get a receiver for its id
    pub fn create_entity(
        &self,
        name: Option<String>,
        parent: Option<EntityId>,
    ) -> Receiver<Result<EntityId, SceneError>> {
        let (reply, receiver) = channel::bounded(1);
        if self
            .send(SceneCommand::CreateEntity {
                name,
                parent,
                reply: Some(reply),
            })
            .is_err()
        {
            log::warn!("Engine is gone, entity creation dropped");
        }
        receiver
    }

    /// Queue an asset load and get a receiver for its handle
    pub fn load_asset(&self, path: impl Into<PathBuf>) -> Receiver<Result<AssetHandle, AssetError>> {
        let (reply, receiver) = channel::bounded(1);
        if self
            .send(SceneCommand::LoadAsset {
                path: path.into(),
                reply: Some(reply),
            })
            .is_err()
        {
            log::warn!("Engine is gone, asset load dropped");
        }
        receiver
    }

    /// Ask the engine to stop
    pub fn quit(&self) {
        if self.send(SceneCommand::Quit).is_err() {
            log::debug!("Quit requested after engine shutdown");
        }
    }
}

/// Receiving end owned by the engine
#[derive(Debug)]
pub struct CommandQueue {
    sender: Sender<SceneCommand>,
    receiver: Receiver<SceneCommand>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    /// Unbounded queue
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self { sender, receiver }
    }

    /// New submission handle
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Take every command queued so far, in arrival order
    pub fn drain(&self) -> Vec<SceneCommand> {
        self.receiver.try_iter().collect()
    }

    /// Commands waiting
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_commands_drain_in_arrival_order() {
        let queue = CommandQueue::new();
        let sender = queue.sender();

        let worker = {
            let sender = sender.clone();
            thread::spawn(move || {
                for i in 0..3 {
                    let position = Vec3::new(i as f32, 0.0, 0.0);
                    sender
                        .send(SceneCommand::SetCamera { position, yaw: 0.0, pitch: 0.0 })
                        .unwrap();
                }
            })
        };
        worker.join().unwrap();
        sender.quit();

        let commands = queue.drain();
        assert_eq!(commands.len(), 4);
        for (i, command) in commands.iter().take(3).enumerate() {
            match command {
                SceneCommand::SetCamera { position, .. } => assert_eq!(position.x, i as f32),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(matches!(commands[3], SceneCommand::Quit));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reply_channel_is_attached() {
        let queue = CommandQueue::new();
        let receiver = queue.sender().create_entity(Some("probe".to_string()), None);

        let mut commands = queue.drain();
        let Some(SceneCommand::CreateEntity { name, reply: Some(reply), .. }) = commands.pop() else {
            panic!("expected a create command");
        };
        assert_eq!(name.as_deref(), Some("probe"));

        let err = SceneError::KernelNotFound("none".to_string());
        reply.send(Err(err)).unwrap();
        assert!(matches!(receiver.recv().unwrap(), Err(SceneError::KernelNotFound(_))));
    }
}
