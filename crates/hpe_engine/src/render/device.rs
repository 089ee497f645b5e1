//! Graphics device abstraction

use super::{BackendResult, RenderError};
use crate::foundation::math::Mat4;
use std::any::Any;
use std::collections::HashSet;

/// GPU buffer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// GPU texture handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Compiled shader program handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

/// Buffer usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Interleaved vertices
    Vertex,
    /// 32-bit indices
    Index,
}

/// Graphics-API seam used by the render backend adapter
///
/// Only the adapter holds a device; no other component sees GPU handles.
pub trait GraphicsDevice: Send {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Upload a buffer
    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BackendResult<BufferId>;

    /// Release a buffer
    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Upload an RGBA8 texture
    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> BackendResult<TextureId>;

    /// Release a texture
    fn destroy_texture(&mut self, texture: TextureId);

    /// Compile the named shader program
    fn compile_program(&mut self, shader: &str) -> BackendResult<ProgramId>;

    /// Release a program
    fn destroy_program(&mut self, program: ProgramId);

    /// Start recording a frame
    fn begin_frame(&mut self, clear_color: [f32; 4], view_projection: &Mat4) -> BackendResult<()>;

    /// Make `program` current
    fn bind_program(&mut self, program: ProgramId);

    /// Bind material textures and parameters
    fn bind_material(&mut self, textures: &[TextureId], base_color: [f32; 4], uniforms: &[(String, f32)]);

    /// Bind vertex and index buffers
    fn bind_mesh(&mut self, vertices: BufferId, indices: BufferId);

    /// Draw the bound mesh
    fn draw_indexed(&mut self, index_count: u32, model: &Mat4, blended: bool);

    /// Finish recording
    fn end_frame(&mut self) -> BackendResult<()>;

    /// Show the finished frame
    fn present(&mut self) -> BackendResult<()>;

    /// Throw away a partially recorded frame
    fn abort_frame(&mut self);

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A call recorded by [`HeadlessDevice`]
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Buffer upload
    CreateBuffer {
        /// New id
        id: BufferId,
        /// Usage
        kind: BufferKind,
        /// Size in bytes
        size: usize,
    },
    /// Buffer release
    DestroyBuffer(BufferId),
    /// Texture upload
    CreateTexture {
        /// New id
        id: TextureId,
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// Texture release
    DestroyTexture(TextureId),
    /// Program compilation
    CompileProgram {
        /// New id
        id: ProgramId,
        /// Shader name
        shader: String,
    },
    /// Program release
    DestroyProgram(ProgramId),
    /// Frame start
    BeginFrame {
        /// Clear colour
        clear_color: [f32; 4],
    },
    /// Program bind
    BindProgram(ProgramId),
    /// Material bind
    BindMaterial {
        /// Bound textures in slot order
        textures: Vec<TextureId>,
        /// Base colour
        base_color: [f32; 4],
    },
    /// Mesh bind
    BindMesh {
        /// Vertex buffer
        vertices: BufferId,
        /// Index buffer
        indices: BufferId,
    },
    /// Draw call
    Draw {
        /// Indices drawn
        index_count: u32,
        /// Model matrix
        model: Mat4,
        /// Alpha blending enabled
        blended: bool,
    },
    /// Frame end
    EndFrame,
    /// Present
    Present,
    /// Frame discarded
    AbortFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Idle,
    Recording,
    Recorded,
}

/// Device that records commands instead of talking to a GPU
#[derive(Debug)]
pub struct HeadlessDevice {
    commands: Vec<DeviceCommand>,
    next_id: u64,
    live_buffers: HashSet<BufferId>,
    live_textures: HashSet<TextureId>,
    live_programs: HashSet<ProgramId>,
    failing_shaders: HashSet<String>,
    memory_budget: Option<usize>,
    memory_used: usize,
    buffer_sizes: std::collections::HashMap<BufferId, usize>,
    state: FrameState,
    frames_presented: u64,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Fresh device with no resources
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            next_id: 1,
            live_buffers: HashSet::new(),
            live_textures: HashSet::new(),
            live_programs: HashSet::new(),
            failing_shaders: HashSet::new(),
            memory_budget: None,
            memory_used: 0,
            buffer_sizes: std::collections::HashMap::new(),
            state: FrameState::Idle,
            frames_presented: 0,
        }
    }

    /// Make compilation of `shader` fail
    pub fn fail_shader(&mut self, shader: impl Into<String>) {
        self.failing_shaders.insert(shader.into());
    }

    /// Reject buffer uploads once `bytes` are in use
    pub fn set_memory_budget(&mut self, bytes: Option<usize>) {
        self.memory_budget = bytes;
    }

    /// Everything recorded so far
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Take and clear the recording
    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Live buffers, textures and programs
    pub fn live_resources(&self) -> usize {
        self.live_buffers.len() + self.live_textures.len() + self.live_programs.len()
    }

    /// Whether a buffer is still allocated
    pub fn is_buffer_live(&self, buffer: BufferId) -> bool {
        self.live_buffers.contains(&buffer)
    }

    /// Frames that reached `present`
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn expect_state(&self, expected: FrameState, call: &str) -> BackendResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RenderError::FrameState(format!(
                "{} called while {:?}, expected {:?}",
                call, self.state, expected
            )))
        }
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BackendResult<BufferId> {
        if let Some(budget) = self.memory_budget {
            if self.memory_used + data.len() > budget {
                return Err(RenderError::ResourceCreation(format!(
                    "{:?} buffer of {} bytes exceeds budget ({} of {} used)",
                    kind,
                    data.len(),
                    self.memory_used,
                    budget
                )));
            }
        }

        let id = BufferId(self.next_id());
        self.memory_used += data.len();
        self.buffer_sizes.insert(id, data.len());
        self.live_buffers.insert(id);
        self.commands.push(DeviceCommand::CreateBuffer {
            id,
            kind,
            size: data.len(),
        });
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.live_buffers.remove(&buffer) {
            self.memory_used -= self.buffer_sizes.remove(&buffer).unwrap_or(0);
            self.commands.push(DeviceCommand::DestroyBuffer(buffer));
        } else {
            log::warn!("Destroying unknown buffer {:?}", buffer);
        }
    }

    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> BackendResult<TextureId> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(RenderError::ResourceCreation(format!(
                "texture {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                rgba.len()
            )));
        }

        let id = TextureId(self.next_id());
        self.live_textures.insert(id);
        self.commands.push(DeviceCommand::CreateTexture { id, width, height });
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.live_textures.remove(&texture) {
            self.commands.push(DeviceCommand::DestroyTexture(texture));
        }
    }

    fn compile_program(&mut self, shader: &str) -> BackendResult<ProgramId> {
        if self.failing_shaders.contains(shader) {
            return Err(RenderError::ShaderCompilation {
                shader: shader.to_string(),
                reason: "rejected by headless device".to_string(),
            });
        }

        let id = ProgramId(self.next_id());
        self.live_programs.insert(id);
        self.commands.push(DeviceCommand::CompileProgram {
            id,
            shader: shader.to_string(),
        });
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.live_programs.remove(&program) {
            self.commands.push(DeviceCommand::DestroyProgram(program));
        }
    }

    fn begin_frame(&mut self, clear_color: [f32; 4], _view_projection: &Mat4) -> BackendResult<()> {
        self.expect_state(FrameState::Idle, "begin_frame")?;
        self.state = FrameState::Recording;
        self.commands.push(DeviceCommand::BeginFrame { clear_color });
        Ok(())
    }

    fn bind_program(&mut self, program: ProgramId) {
        self.commands.push(DeviceCommand::BindProgram(program));
    }

    fn bind_material(&mut self, textures: &[TextureId], base_color: [f32; 4], _uniforms: &[(String, f32)]) {
        self.commands.push(DeviceCommand::BindMaterial {
            textures: textures.to_vec(),
            base_color,
        });
    }

    fn bind_mesh(&mut self, vertices: BufferId, indices: BufferId) {
        self.commands.push(DeviceCommand::BindMesh { vertices, indices });
    }

    fn draw_indexed(&mut self, index_count: u32, model: &Mat4, blended: bool) {
        self.commands.push(DeviceCommand::Draw {
            index_count,
            model: *model,
            blended,
        });
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.expect_state(FrameState::Recording, "end_frame")?;
        self.state = FrameState::Recorded;
        self.commands.push(DeviceCommand::EndFrame);
        Ok(())
    }

    fn present(&mut self) -> BackendResult<()> {
        self.expect_state(FrameState::Recorded, "present")?;
        self.state = FrameState::Idle;
        self.frames_presented += 1;
        self.commands.push(DeviceCommand::Present);
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.state = FrameState::Idle;
        self.commands.push(DeviceCommand::AbortFrame);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_order_enforced() {
        let mut device = HeadlessDevice::new();
        let vp = Mat4::identity();
        assert!(matches!(device.present(), Err(RenderError::FrameState(_))));

        device.begin_frame([0.0; 4], &vp).unwrap();
        assert!(device.begin_frame([0.0; 4], &vp).is_err());
        device.end_frame().unwrap();
        device.present().unwrap();
        assert_eq!(device.frames_presented(), 1);
        let recorded = device.take_commands();
        assert!(matches!(recorded.first(), Some(DeviceCommand::BeginFrame { .. })));
        assert!(matches!(recorded.as_slice(), [.., DeviceCommand::EndFrame, DeviceCommand::Present]));
        assert!(device.commands().is_empty());

        device.begin_frame([0.0; 4], &vp).unwrap();
        device.abort_frame();
        assert!(matches!(device.commands().last(), Some(DeviceCommand::AbortFrame)));
        device.begin_frame([0.0; 4], &vp).unwrap();
    }

    #[test]
    fn test_resource_tracking_and_budget() {
        let mut device = HeadlessDevice::new();
        device.set_memory_budget(Some(100));

        let a = device.create_buffer(BufferKind::Vertex, &[0; 60]).unwrap();
        assert!(matches!(
            device.create_buffer(BufferKind::Index, &[0; 60]),
            Err(RenderError::ResourceCreation(_))
        ));
        device.destroy_buffer(a);
        assert!(!device.is_buffer_live(a));
        device.create_buffer(BufferKind::Index, &[0; 60]).unwrap();
        assert_eq!(device.live_resources(), 1);
    }

    #[test]
    fn test_failing_shader() {
        let mut device = HeadlessDevice::new();
        device.fail_shader("broken");
        assert!(device.compile_program("lit").is_ok());
        assert!(matches!(
            device.compile_program("broken"),
            Err(RenderError::ShaderCompilation { .. })
        ));
    }
}
