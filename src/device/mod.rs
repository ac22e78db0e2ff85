//! CPU-simulated GPU device for the conformance harness.
//!
//! Provides the minimal device capability set the harness depends on:
//! buffer/texture creation, render-pipeline creation, command encoding,
//! in-order queue submission, and asynchronous host-readable mapping of a
//! buffer's contents. The API surface mirrors WebGPU/wgpu concepts so that
//! a real `wgpu` device can be swapped in without changing the harness.
//!
//! All GPU work is executed on the CPU: render passes run through a small
//! rasterizer (points, lines, triangles, strip primitive restart) with
//! per-pixel blending, which is what makes the shipped test suites
//! genuinely end-to-end. Shader modules are carried as opaque source
//! strings and never compiled; the fragment color comes from the bound
//! uniform buffer (or white when none is bound).

use crate::error::{Error, Result};
use crate::oracle::{BlendFactor, BlendOperation, Color};
use bitflags::bitflags;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(pub u64);

/// Unique identifier for a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureId(pub u64);

/// Unique identifier for a render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineId(pub u64);

/// Token for a pending asynchronous buffer mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapToken(pub u64);

// ---------------------------------------------------------------------------
// Usage flags
// ---------------------------------------------------------------------------

bitflags! {
    /// Buffer usage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BufferUsage: u32 {
        const MAP_READ = 1;
        const COPY_SRC = 2;
        const COPY_DST = 4;
        const INDEX = 8;
        const VERTEX = 16;
        const UNIFORM = 32;
        const INDIRECT = 64;
    }
}

bitflags! {
    /// Texture usage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1;
        const COPY_DST = 2;
        const RENDER_ATTACHMENT = 4;
    }
}

// ---------------------------------------------------------------------------
// Formats and geometry enums
// ---------------------------------------------------------------------------

/// Texture formats supported by the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureFormat {
    /// 8-bit normalized RGBA.
    Rgba8Unorm,
    /// 32-bit float RGBA.
    Rgba32Float,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureFormat::Rgba8Unorm => write!(f, "rgba8unorm"),
            TextureFormat::Rgba32Float => write!(f, "rgba32float"),
        }
    }
}

/// Primitive assembly topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    /// Every topology, in canonical order.
    pub const ALL: [PrimitiveTopology; 5] = [
        PrimitiveTopology::PointList,
        PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip,
        PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip,
    ];

    pub fn is_strip(self) -> bool {
        matches!(
            self,
            PrimitiveTopology::LineStrip | PrimitiveTopology::TriangleStrip
        )
    }
}

impl fmt::Display for PrimitiveTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveTopology::PointList => "point-list",
            PrimitiveTopology::LineList => "line-list",
            PrimitiveTopology::LineStrip => "line-strip",
            PrimitiveTopology::TriangleList => "triangle-list",
            PrimitiveTopology::TriangleStrip => "triangle-strip",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PrimitiveTopology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        for topology in PrimitiveTopology::ALL {
            if topology.to_string() == s {
                return Ok(topology);
            }
        }
        Err(Error::usage(format!("unknown topology '{}'", s)))
    }
}

/// Index element format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    fn restart_value(self) -> u32 {
        match self {
            IndexFormat::Uint16 => 0xFFFF,
            IndexFormat::Uint32 => 0xFFFF_FFFF,
        }
    }
}

// ---------------------------------------------------------------------------
// Limits / stats
// ---------------------------------------------------------------------------

/// Hardware limits reported by the simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuLimits {
    pub max_buffer_size: u64,
    pub max_texture_dimension: u32,
    pub max_color_attachments: u32,
}

impl Default for GpuLimits {
    fn default() -> Self {
        Self {
            max_buffer_size: 256 * 1024 * 1024, // 256 MiB
            max_texture_dimension: 8192,
            max_color_attachments: 8,
        }
    }
}

/// Cumulative statistics for device operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuStats {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub textures_created: u64,
    pub textures_destroyed: u64,
    pub pipelines_created: u64,
    pub pipelines_destroyed: u64,
    pub submissions: u64,
    pub draw_calls: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A GPU memory buffer (CPU-side backing).
#[derive(Debug, Clone)]
pub struct GpuBuffer {
    pub id: BufferId,
    pub size: u64,
    pub usage: BufferUsage,
    pub data: Vec<u8>,
    pub mapped: bool,
}

/// A 2D GPU texture (CPU-side backing, tightly packed).
#[derive(Debug, Clone)]
pub struct GpuTexture {
    pub id: TextureId,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub usage: TextureUsage,
    pub data: Vec<u8>,
}

/// Texture creation descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureDescriptor {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub usage: TextureUsage,
}

// ---------------------------------------------------------------------------
// Pipeline descriptors
// ---------------------------------------------------------------------------

/// A shader module: opaque source plus entry point.
///
/// The simulated device never compiles shaders; the source is carried for
/// descriptor fidelity only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderModule {
    pub source: String,
    pub entry_point: String,
}

/// One blend component (color or alpha).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl Default for BlendComponent {
    /// The passthrough component: `src * one + dst * zero`.
    fn default() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            operation: BlendOperation::Add,
        }
    }
}

/// Complete blend state for one color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

/// One color target of the fragment stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexState {
    pub module: ShaderModule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentState {
    pub module: ShaderModule,
    pub targets: Vec<ColorTargetState>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrimitiveState {
    pub topology: PrimitiveTopology,
    pub strip_index_format: Option<IndexFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPipelineDescriptor {
    pub vertex: VertexState,
    pub fragment: FragmentState,
    pub primitive: PrimitiveState,
}

/// A created render pipeline.
#[derive(Debug, Clone)]
pub struct RenderPipeline {
    pub id: PipelineId,
    pub descriptor: RenderPipelineDescriptor,
}

// ---------------------------------------------------------------------------
// Command encoding
// ---------------------------------------------------------------------------

/// Color attachment of a render pass. Only clear-loading is supported.
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub texture: TextureId,
    pub clear: Color,
}

#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub color_attachment: ColorAttachment,
}

#[derive(Debug, Clone)]
enum DrawCommand {
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
    },
    DrawIndirect {
        buffer: BufferId,
        offset: u64,
    },
    DrawIndexedIndirect {
        buffer: BufferId,
        offset: u64,
    },
}

#[derive(Debug, Clone)]
struct RenderPassRecording {
    descriptor: RenderPassDescriptor,
    pipeline: Option<PipelineId>,
    vertex_buffer: Option<BufferId>,
    index_buffer: Option<(BufferId, IndexFormat)>,
    uniform_buffer: Option<BufferId>,
    blend_constant: Option<Color>,
    draws: Vec<DrawCommand>,
}

#[derive(Debug, Clone)]
enum Command {
    CopyBufferToBuffer {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    CopyTextureToBuffer {
        src: TextureId,
        origin: (u32, u32),
        extent: (u32, u32),
        dst: BufferId,
        dst_offset: u64,
    },
    RenderPass(RenderPassRecording),
}

/// Records commands for a single queue submission.
#[derive(Debug, Default)]
pub struct CommandEncoder {
    commands: Vec<Command>,
}

/// A finished, submittable command sequence.
#[derive(Debug)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a buffer-to-buffer copy of `size` bytes.
    pub fn copy_buffer_to_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        self.commands.push(Command::CopyBufferToBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    /// Record a texture-region-to-buffer copy (tightly packed rows).
    pub fn copy_texture_to_buffer(
        &mut self,
        src: TextureId,
        origin: (u32, u32),
        extent: (u32, u32),
        dst: BufferId,
        dst_offset: u64,
    ) {
        self.commands.push(Command::CopyTextureToBuffer {
            src,
            origin,
            extent,
            dst,
            dst_offset,
        });
    }

    /// Begin recording a render pass; call [`RenderPassEncoder::end`] to
    /// append it to this encoder.
    pub fn begin_render_pass(&mut self, descriptor: RenderPassDescriptor) -> RenderPassEncoder<'_> {
        RenderPassEncoder {
            encoder: self,
            recording: RenderPassRecording {
                descriptor,
                pipeline: None,
                vertex_buffer: None,
                index_buffer: None,
                uniform_buffer: None,
                blend_constant: None,
                draws: Vec::new(),
            },
        }
    }

    pub fn finish(self) -> CommandBuffer {
        CommandBuffer {
            commands: self.commands,
        }
    }
}

/// Records the state and draws of one render pass.
pub struct RenderPassEncoder<'a> {
    encoder: &'a mut CommandEncoder,
    recording: RenderPassRecording,
}

impl RenderPassEncoder<'_> {
    pub fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.recording.pipeline = Some(pipeline);
    }

    pub fn set_vertex_buffer(&mut self, buffer: BufferId) {
        self.recording.vertex_buffer = Some(buffer);
    }

    pub fn set_index_buffer(&mut self, buffer: BufferId, format: IndexFormat) {
        self.recording.index_buffer = Some((buffer, format));
    }

    /// Bind the uniform buffer the fragment stage reads its color from.
    pub fn set_uniform_buffer(&mut self, buffer: BufferId) {
        self.recording.uniform_buffer = Some(buffer);
    }

    pub fn set_blend_constant(&mut self, color: Color) {
        self.recording.blend_constant = Some(color);
    }

    pub fn draw(&mut self, vertex_count: u32) {
        self.recording.draws.push(DrawCommand::Draw {
            vertex_count,
            first_vertex: 0,
        });
    }

    pub fn draw_indexed(&mut self, index_count: u32) {
        self.recording.draws.push(DrawCommand::DrawIndexed {
            index_count,
            first_index: 0,
        });
    }

    pub fn draw_indirect(&mut self, buffer: BufferId, offset: u64) {
        self.recording
            .draws
            .push(DrawCommand::DrawIndirect { buffer, offset });
    }

    pub fn draw_indexed_indirect(&mut self, buffer: BufferId, offset: u64) {
        self.recording
            .draws
            .push(DrawCommand::DrawIndexedIndirect { buffer, offset });
    }

    /// Finish the pass and append it to the parent encoder.
    pub fn end(self) {
        self.encoder
            .commands
            .push(Command::RenderPass(self.recording));
    }
}

// ---------------------------------------------------------------------------
// Async mapping
// ---------------------------------------------------------------------------

/// State of a pending buffer mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    /// The device-to-host transfer has not been signaled complete yet.
    Pending,
    /// The mapped range is readable.
    Ready,
}

#[derive(Debug)]
struct PendingMap {
    buffer: BufferId,
    after_submission: u64,
    state: MapState,
}

// ---------------------------------------------------------------------------
// GpuDevice
// ---------------------------------------------------------------------------

/// Shared handle to a device; cases share one device but never run
/// concurrently, so single-threaded interior mutability is sufficient.
pub type DeviceHandle = Rc<RefCell<GpuDevice>>;

/// The simulated GPU device.
pub struct GpuDevice {
    pub name: String,
    pub limits: GpuLimits,
    pub stats: GpuStats,
    buffers: HashMap<BufferId, GpuBuffer>,
    textures: HashMap<TextureId, GpuTexture>,
    pipelines: HashMap<PipelineId, RenderPipeline>,
    mappings: HashMap<MapToken, PendingMap>,
    next_buffer_id: u64,
    next_texture_id: u64,
    next_pipeline_id: u64,
    next_map_token: u64,
    submissions_executed: u64,
}

impl fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuDevice")
            .field("name", &self.name)
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("pipelines", &self.pipelines.len())
            .field("pending_maps", &self.mappings.len())
            .finish()
    }
}

impl GpuDevice {
    /// Create a new simulated device.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limits: GpuLimits::default(),
            stats: GpuStats::default(),
            buffers: HashMap::default(),
            textures: HashMap::default(),
            pipelines: HashMap::default(),
            mappings: HashMap::default(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_pipeline_id: 1,
            next_map_token: 1,
            submissions_executed: 0,
        }
    }

    /// Create a new simulated device behind a shared handle.
    pub fn shared(name: impl Into<String>) -> DeviceHandle {
        Rc::new(RefCell::new(Self::new(name)))
    }

    // -- buffer operations --------------------------------------------------

    /// Allocate a new zero-filled buffer of `size` bytes.
    pub fn create_buffer(&mut self, size: u64, usage: BufferUsage) -> Result<BufferId> {
        if size > self.limits.max_buffer_size {
            return Err(Error::device(format!(
                "buffer size {} exceeds limit {}",
                size, self.limits.max_buffer_size
            )));
        }
        let id = BufferId(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.buffers.insert(
            id,
            GpuBuffer {
                id,
                size,
                usage,
                data: vec![0u8; size as usize],
                mapped: false,
            },
        );
        self.stats.buffers_created += 1;
        Ok(id)
    }

    /// Allocate a buffer initialized with `data`.
    pub fn create_buffer_with_data(&mut self, data: &[u8], usage: BufferUsage) -> Result<BufferId> {
        let id = self.create_buffer(data.len() as u64, usage)?;
        self.write_buffer(id, 0, data)?;
        Ok(id)
    }

    /// Destroy an existing buffer.
    pub fn destroy_buffer(&mut self, id: BufferId) -> Result<()> {
        self.buffers
            .remove(&id)
            .ok_or_else(|| Error::device(format!("buffer {:?} not found", id)))?;
        self.mappings.retain(|_, m| m.buffer != id);
        self.stats.buffers_destroyed += 1;
        Ok(())
    }

    /// Write raw bytes into a buffer at `offset`.
    pub fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let buf = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| Error::device(format!("buffer {:?} not found", id)))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.data.len() {
            return Err(Error::device("buffer write out of bounds"));
        }
        buf.data[start..end].copy_from_slice(data);
        self.stats.bytes_written += data.len() as u64;
        Ok(())
    }

    fn buffer(&self, id: BufferId) -> Result<&GpuBuffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| Error::device(format!("buffer {:?} not found", id)))
    }

    fn read_buffer_bytes(&self, id: BufferId, offset: u64, len: usize) -> Result<Vec<u8>> {
        let buf = self.buffer(id)?;
        let start = offset as usize;
        let end = start + len;
        if end > buf.data.len() {
            return Err(Error::device("buffer read out of bounds"));
        }
        Ok(buf.data[start..end].to_vec())
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    // -- texture operations --------------------------------------------------

    /// Create a zero-filled 2D texture.
    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::device("texture dimensions must be non-zero"));
        }
        if desc.width > self.limits.max_texture_dimension
            || desc.height > self.limits.max_texture_dimension
        {
            return Err(Error::device(format!(
                "texture size {}x{} exceeds limit {}",
                desc.width, desc.height, self.limits.max_texture_dimension
            )));
        }
        let id = TextureId(self.next_texture_id);
        self.next_texture_id += 1;
        let byte_len = desc.width as usize * desc.height as usize * desc.format.bytes_per_texel();
        self.textures.insert(
            id,
            GpuTexture {
                id,
                format: desc.format,
                width: desc.width,
                height: desc.height,
                usage: desc.usage,
                data: vec![0u8; byte_len],
            },
        );
        self.stats.textures_created += 1;
        Ok(id)
    }

    /// Destroy an existing texture.
    pub fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        self.textures
            .remove(&id)
            .ok_or_else(|| Error::device(format!("texture {:?} not found", id)))?;
        self.stats.textures_destroyed += 1;
        Ok(())
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| Error::device(format!("texture {:?} not found", id)))
    }

    /// Format of an existing texture.
    pub fn texture_format(&self, id: TextureId) -> Result<TextureFormat> {
        Ok(self.texture(id)?.format)
    }

    // -- pipeline operations ------------------------------------------------

    /// Create a render pipeline.
    pub fn create_render_pipeline(
        &mut self,
        descriptor: RenderPipelineDescriptor,
    ) -> Result<PipelineId> {
        if descriptor.fragment.targets.is_empty() {
            return Err(Error::device("pipeline requires at least one color target"));
        }
        if descriptor.fragment.targets.len() > self.limits.max_color_attachments as usize {
            return Err(Error::device("too many color targets"));
        }
        let id = PipelineId(self.next_pipeline_id);
        self.next_pipeline_id += 1;
        self.pipelines.insert(id, RenderPipeline { id, descriptor });
        self.stats.pipelines_created += 1;
        Ok(id)
    }

    /// Destroy a render pipeline.
    pub fn destroy_pipeline(&mut self, id: PipelineId) -> Result<()> {
        self.pipelines
            .remove(&id)
            .ok_or_else(|| Error::device(format!("pipeline {:?} not found", id)))?;
        self.stats.pipelines_destroyed += 1;
        Ok(())
    }

    // -- queue ----------------------------------------------------------------

    /// Submit a command buffer. Commands execute in submission order; the
    /// simulated device completes them before returning.
    pub fn submit(&mut self, commands: CommandBuffer) -> Result<u64> {
        for command in &commands.commands {
            self.execute_command(command)?;
        }
        self.submissions_executed += 1;
        self.stats.submissions += 1;
        tracing::trace!(
            device = %self.name,
            submission = self.submissions_executed,
            "command buffer executed"
        );
        Ok(self.submissions_executed)
    }

    // -- async mapping ---------------------------------------------------------

    /// Request an asynchronous host-readable mapping of a MAP_READ buffer.
    ///
    /// The mapping stays [`MapState::Pending`] until a later [`poll`] call
    /// observes that the submissions it depends on have completed; reading
    /// before that is an internal error.
    ///
    /// [`poll`]: GpuDevice::poll
    pub fn map_read_async(&mut self, buffer: BufferId) -> Result<MapToken> {
        let buf = self.buffer(buffer)?;
        if !buf.usage.contains(BufferUsage::MAP_READ) {
            return Err(Error::device(format!(
                "buffer {:?} lacks MAP_READ usage",
                buffer
            )));
        }
        if buf.mapped {
            return Err(Error::device(format!("buffer {:?} is already mapped", buffer)));
        }
        let after_submission = self.submissions_executed;
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::device(format!("buffer {:?} not found", buffer)))?
            .mapped = true;
        let token = MapToken(self.next_map_token);
        self.next_map_token += 1;
        self.mappings.insert(
            token,
            PendingMap {
                buffer,
                after_submission,
                state: MapState::Pending,
            },
        );
        Ok(token)
    }

    /// Make progress on pending mappings: every mapping whose dependent
    /// submissions have executed becomes ready.
    pub fn poll(&mut self) {
        let executed = self.submissions_executed;
        for mapping in self.mappings.values_mut() {
            if mapping.state == MapState::Pending && mapping.after_submission <= executed {
                mapping.state = MapState::Ready;
            }
        }
    }

    /// Current state of a pending mapping.
    pub fn map_state(&self, token: MapToken) -> Result<MapState> {
        self.mappings
            .get(&token)
            .map(|m| m.state)
            .ok_or_else(|| Error::device(format!("mapping {:?} not found", token)))
    }

    /// Read the mapped bytes and unmap the buffer.
    ///
    /// Reading a mapping that has not resolved yet is an internal error:
    /// the harness must await the completion signal first.
    pub fn read_mapped(&mut self, token: MapToken) -> Result<Vec<u8>> {
        let mapping = self
            .mappings
            .remove(&token)
            .ok_or_else(|| Error::device(format!("mapping {:?} not found", token)))?;
        if mapping.state != MapState::Ready {
            self.mappings.insert(token, mapping);
            return Err(Error::Internal(
                "staging memory read before mapping resolved".into(),
            ));
        }
        let data = {
            let buf = self.buffer(mapping.buffer)?;
            buf.data.clone()
        };
        self.buffers
            .get_mut(&mapping.buffer)
            .ok_or_else(|| Error::device(format!("buffer {:?} not found", mapping.buffer)))?
            .mapped = false;
        self.stats.bytes_read += data.len() as u64;
        Ok(data)
    }

    // -- command execution ----------------------------------------------------

    fn execute_command(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::CopyBufferToBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let src_buf = self.buffer(*src)?;
                if !src_buf.usage.contains(BufferUsage::COPY_SRC) {
                    return Err(Error::device(format!("buffer {:?} lacks COPY_SRC usage", src)));
                }
                let bytes = self.read_buffer_bytes(*src, *src_offset, *size as usize)?;
                let dst_buf = self.buffer(*dst)?;
                if !dst_buf.usage.contains(BufferUsage::COPY_DST) {
                    return Err(Error::device(format!("buffer {:?} lacks COPY_DST usage", dst)));
                }
                self.write_buffer(*dst, *dst_offset, &bytes)
            }
            Command::CopyTextureToBuffer {
                src,
                origin,
                extent,
                dst,
                dst_offset,
            } => {
                let bytes = {
                    let tex = self.texture(*src)?;
                    if !tex.usage.contains(TextureUsage::COPY_SRC) {
                        return Err(Error::device(format!(
                            "texture {:?} lacks COPY_SRC usage",
                            src
                        )));
                    }
                    let (x, y) = *origin;
                    let (w, h) = *extent;
                    if x + w > tex.width || y + h > tex.height {
                        return Err(Error::device("texture copy region out of bounds"));
                    }
                    let texel = tex.format.bytes_per_texel();
                    let mut out = Vec::with_capacity(w as usize * h as usize * texel);
                    for row in y..y + h {
                        let start = (row as usize * tex.width as usize + x as usize) * texel;
                        out.extend_from_slice(&tex.data[start..start + w as usize * texel]);
                    }
                    out
                };
                let dst_buf = self.buffer(*dst)?;
                if !dst_buf.usage.contains(BufferUsage::COPY_DST) {
                    return Err(Error::device(format!("buffer {:?} lacks COPY_DST usage", dst)));
                }
                self.write_buffer(*dst, *dst_offset, &bytes)
            }
            Command::RenderPass(pass) => self.execute_render_pass(pass),
        }
    }

    // -- render pass execution -------------------------------------------------

    fn execute_render_pass(&mut self, pass: &RenderPassRecording) -> Result<()> {
        let attachment_id = pass.descriptor.color_attachment.texture;
        {
            let tex = self.texture(attachment_id)?;
            if !tex.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
                return Err(Error::device(format!(
                    "texture {:?} lacks RENDER_ATTACHMENT usage",
                    attachment_id
                )));
            }
        }

        // Clear-load the attachment.
        let clear = pass.descriptor.color_attachment.clear;
        let (width, height) = {
            let tex = self.texture(attachment_id)?;
            (tex.width, tex.height)
        };
        for y in 0..height {
            for x in 0..width {
                self.write_texel(attachment_id, x, y, clear)?;
            }
        }

        for draw in &pass.draws {
            self.execute_draw(pass, draw)?;
            self.stats.draw_calls += 1;
        }
        Ok(())
    }

    fn execute_draw(&mut self, pass: &RenderPassRecording, draw: &DrawCommand) -> Result<()> {
        let pipeline_id = pass
            .pipeline
            .ok_or_else(|| Error::device("draw without a pipeline set"))?;
        let pipeline = self
            .pipelines
            .get(&pipeline_id)
            .ok_or_else(|| Error::device(format!("pipeline {:?} not found", pipeline_id)))?
            .clone();

        // Resolve indirect draw parameters from the indirect buffer.
        let (indexed, count, first) = match *draw {
            DrawCommand::Draw {
                vertex_count,
                first_vertex,
            } => (false, vertex_count, first_vertex),
            DrawCommand::DrawIndexed {
                index_count,
                first_index,
            } => (true, index_count, first_index),
            DrawCommand::DrawIndirect { buffer, offset } => {
                let words = self.read_indirect_words(buffer, offset, 4)?;
                (false, words[0], words[2])
            }
            DrawCommand::DrawIndexedIndirect { buffer, offset } => {
                let words = self.read_indirect_words(buffer, offset, 5)?;
                (true, words[0], words[2])
            }
        };

        // Build the vertex index stream the primitive assembler consumes.
        // The restart sentinel is passed through for strip topologies.
        let topology = pipeline.descriptor.primitive.topology;
        let restart = pass
            .index_buffer
            .map(|(_, format)| format.restart_value())
            .filter(|_| topology.is_strip());
        let indices: Vec<u32> = if indexed {
            let (index_buffer, format) = pass
                .index_buffer
                .ok_or_else(|| Error::device("indexed draw without an index buffer"))?;
            self.read_indices(index_buffer, format, first, count)?
        } else {
            (first..first + count).collect()
        };

        let vertices = self.fetch_vertices(pass.vertex_buffer, &indices, restart)?;
        let fragment = self.fragment_color(pass.uniform_buffer)?;
        let target = &pipeline.descriptor.fragment.targets[0];
        let blend = target.blend;
        let blend_constant = pass.blend_constant.unwrap_or(Color::TRANSPARENT_BLACK);

        let attachment = pass.descriptor.color_attachment.texture;
        let primitives = assemble(topology, &vertices);
        for primitive in primitives {
            for (x, y) in self.rasterize(attachment, &primitive)? {
                let out = match blend {
                    Some(state) => {
                        let dst = self.read_texel(attachment, x, y)?;
                        blend_color(&state, fragment, dst, blend_constant)
                    }
                    None => fragment,
                };
                self.write_texel(attachment, x, y, out)?;
            }
        }
        Ok(())
    }

    fn read_indirect_words(&self, buffer: BufferId, offset: u64, n: usize) -> Result<Vec<u32>> {
        let buf = self.buffer(buffer)?;
        if !buf.usage.contains(BufferUsage::INDIRECT) {
            return Err(Error::device(format!(
                "buffer {:?} lacks INDIRECT usage",
                buffer
            )));
        }
        let bytes = self.read_buffer_bytes(buffer, offset, n * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn read_indices(
        &self,
        buffer: BufferId,
        format: IndexFormat,
        first: u32,
        count: u32,
    ) -> Result<Vec<u32>> {
        let buf = self.buffer(buffer)?;
        if !buf.usage.contains(BufferUsage::INDEX) {
            return Err(Error::device(format!("buffer {:?} lacks INDEX usage", buffer)));
        }
        let mut out = Vec::with_capacity(count as usize);
        match format {
            IndexFormat::Uint32 => {
                let bytes =
                    self.read_buffer_bytes(buffer, first as u64 * 4, count as usize * 4)?;
                for c in bytes.chunks_exact(4) {
                    out.push(u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
                }
            }
            IndexFormat::Uint16 => {
                let bytes =
                    self.read_buffer_bytes(buffer, first as u64 * 2, count as usize * 2)?;
                for c in bytes.chunks_exact(2) {
                    out.push(u16::from_le_bytes([c[0], c[1]]) as u32);
                }
            }
        }
        Ok(out)
    }

    /// Fetch NDC positions for an index stream. A missing vertex buffer
    /// yields the NDC origin for every vertex (the fixed-position vertex
    /// shader case); the restart sentinel is preserved as `None`.
    fn fetch_vertices(
        &self,
        vertex_buffer: Option<BufferId>,
        indices: &[u32],
        restart: Option<u32>,
    ) -> Result<Vec<Option<[f64; 2]>>> {
        let mut out = Vec::with_capacity(indices.len());
        for &index in indices {
            if restart == Some(index) {
                out.push(None);
                continue;
            }
            let ndc = match vertex_buffer {
                Some(buffer) => {
                    let bytes = self.read_buffer_bytes(buffer, index as u64 * 16, 16)?;
                    let x = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    let y = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                    [x as f64, y as f64]
                }
                None => [0.0, 0.0],
            };
            out.push(Some(ndc));
        }
        Ok(out)
    }

    /// Fragment output color: the bound uniform buffer's first vec4<f32>,
    /// or opaque white when none is bound.
    fn fragment_color(&self, uniform: Option<BufferId>) -> Result<Color> {
        match uniform {
            Some(buffer) => {
                let buf = self.buffer(buffer)?;
                if !buf.usage.contains(BufferUsage::UNIFORM) {
                    return Err(Error::device(format!(
                        "buffer {:?} lacks UNIFORM usage",
                        buffer
                    )));
                }
                let bytes = self.read_buffer_bytes(buffer, 0, 16)?;
                let channel = |i: usize| {
                    f32::from_le_bytes([
                        bytes[i * 4],
                        bytes[i * 4 + 1],
                        bytes[i * 4 + 2],
                        bytes[i * 4 + 3],
                    ]) as f64
                };
                Ok(Color::new(channel(0), channel(1), channel(2), channel(3)))
            }
            None => Ok(Color::WHITE),
        }
    }

    // -- rasterization ---------------------------------------------------------

    /// Rasterize one primitive into framebuffer pixel coordinates.
    fn rasterize(&self, attachment: TextureId, primitive: &Primitive) -> Result<Vec<(u32, u32)>> {
        let tex = self.texture(attachment)?;
        let (w, h) = (tex.width, tex.height);
        let to_pixel = |ndc: [f64; 2]| -> (f64, f64) {
            (
                (ndc[0] + 1.0) * 0.5 * w as f64 - 0.5,
                (1.0 - ndc[1]) * 0.5 * h as f64 - 0.5,
            )
        };
        let mut pixels = Vec::new();
        let mut plot = |x: f64, y: f64| {
            let (xi, yi) = (x.round() as i64, y.round() as i64);
            if xi >= 0 && yi >= 0 && (xi as u32) < w && (yi as u32) < h {
                pixels.push((xi as u32, yi as u32));
            }
        };
        match primitive {
            Primitive::Point(v) => {
                let (x, y) = to_pixel(*v);
                plot(x, y);
            }
            Primitive::Line(a, b) => {
                let (ax, ay) = to_pixel(*a);
                let (bx, by) = to_pixel(*b);
                let steps = (bx - ax).abs().max((by - ay).abs()).round() as i64;
                if steps == 0 {
                    plot(ax, ay);
                } else {
                    for t in 0..=steps {
                        let f = t as f64 / steps as f64;
                        plot(ax + (bx - ax) * f, ay + (by - ay) * f);
                    }
                }
            }
            Primitive::Triangle(a, b, c) => {
                let pa = to_pixel(*a);
                let pb = to_pixel(*b);
                let pc = to_pixel(*c);
                let area = edge(pa, pb, pc);
                if area == 0.0 {
                    return Ok(pixels);
                }
                let min_x = pa.0.min(pb.0).min(pc.0).floor().max(0.0) as u32;
                let max_x = pa.0.max(pb.0).max(pc.0).ceil().min(w as f64 - 1.0) as u32;
                let min_y = pa.1.min(pb.1).min(pc.1).floor().max(0.0) as u32;
                let max_y = pa.1.max(pb.1).max(pc.1).ceil().min(h as f64 - 1.0) as u32;
                for y in min_y..=max_y {
                    for x in min_x..=max_x {
                        let p = (x as f64, y as f64);
                        let w0 = edge(pa, pb, p) * area.signum();
                        let w1 = edge(pb, pc, p) * area.signum();
                        let w2 = edge(pc, pa, p) * area.signum();
                        if w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0 {
                            pixels.push((x, y));
                        }
                    }
                }
            }
        }
        Ok(pixels)
    }

    // -- texel access ----------------------------------------------------------

    fn read_texel(&self, id: TextureId, x: u32, y: u32) -> Result<Color> {
        let tex = self.texture(id)?;
        if x >= tex.width || y >= tex.height {
            return Err(Error::device("texel read out of bounds"));
        }
        let texel = tex.format.bytes_per_texel();
        let start = (y as usize * tex.width as usize + x as usize) * texel;
        let bytes = &tex.data[start..start + texel];
        Ok(match tex.format {
            TextureFormat::Rgba8Unorm => Color::new(
                bytes[0] as f64 / 255.0,
                bytes[1] as f64 / 255.0,
                bytes[2] as f64 / 255.0,
                bytes[3] as f64 / 255.0,
            ),
            TextureFormat::Rgba32Float => {
                let channel = |i: usize| {
                    f32::from_le_bytes([
                        bytes[i * 4],
                        bytes[i * 4 + 1],
                        bytes[i * 4 + 2],
                        bytes[i * 4 + 3],
                    ]) as f64
                };
                Color::new(channel(0), channel(1), channel(2), channel(3))
            }
        })
    }

    fn write_texel(&mut self, id: TextureId, x: u32, y: u32, color: Color) -> Result<()> {
        let tex = self
            .textures
            .get_mut(&id)
            .ok_or_else(|| Error::device(format!("texture {:?} not found", id)))?;
        if x >= tex.width || y >= tex.height {
            return Err(Error::device("texel write out of bounds"));
        }
        let texel = tex.format.bytes_per_texel();
        let start = (y as usize * tex.width as usize + x as usize) * texel;
        match tex.format {
            TextureFormat::Rgba8Unorm => {
                let encode = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
                tex.data[start] = encode(color.r);
                tex.data[start + 1] = encode(color.g);
                tex.data[start + 2] = encode(color.b);
                tex.data[start + 3] = encode(color.a);
            }
            TextureFormat::Rgba32Float => {
                let values = color.to_f32_array();
                for (i, v) in values.iter().enumerate() {
                    tex.data[start + i * 4..start + i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Primitive assembly and blending
// ---------------------------------------------------------------------------

enum Primitive {
    Point([f64; 2]),
    Line([f64; 2], [f64; 2]),
    Triangle([f64; 2], [f64; 2], [f64; 2]),
}

/// Assemble primitives from a vertex stream. `None` entries are restart
/// sentinels splitting strips; list topologies drop trailing partial
/// primitives.
fn assemble(topology: PrimitiveTopology, vertices: &[Option<[f64; 2]>]) -> Vec<Primitive> {
    let mut out = Vec::new();
    match topology {
        PrimitiveTopology::PointList => {
            for v in vertices.iter().flatten() {
                out.push(Primitive::Point(*v));
            }
        }
        PrimitiveTopology::LineList => {
            let solid: Vec<_> = vertices.iter().flatten().collect();
            for pair in solid.chunks_exact(2) {
                out.push(Primitive::Line(*pair[0], *pair[1]));
            }
        }
        PrimitiveTopology::TriangleList => {
            let solid: Vec<_> = vertices.iter().flatten().collect();
            for triple in solid.chunks_exact(3) {
                out.push(Primitive::Triangle(*triple[0], *triple[1], *triple[2]));
            }
        }
        PrimitiveTopology::LineStrip => {
            for run in vertices.split(|v| v.is_none()) {
                for window in run.windows(2) {
                    // Entries inside a run are all Some by construction.
                    if let [Some(a), Some(b)] = window {
                        out.push(Primitive::Line(*a, *b));
                    }
                }
            }
        }
        PrimitiveTopology::TriangleStrip => {
            for run in vertices.split(|v| v.is_none()) {
                for window in run.windows(3) {
                    if let [Some(a), Some(b), Some(c)] = window {
                        out.push(Primitive::Triangle(*a, *b, *c));
                    }
                }
            }
        }
    }
    out
}

fn edge(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> f64 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

/// The device's own blend implementation, independent of the reference
/// oracle so the harness actually exercises a round trip. The blend
/// constant defaults to transparent black when the pass never set one,
/// matching the API default.
fn blend_color(state: &BlendState, src: Color, dst: Color, constant: Color) -> Color {
    let color = blend_component(&state.color, src, dst, constant);
    let alpha = blend_component(&state.alpha, src, dst, constant);
    Color::new(color.r, color.g, color.b, alpha.a)
}

fn blend_component(component: &BlendComponent, src: Color, dst: Color, constant: Color) -> Color {
    let sf = device_factor(component.src_factor, src, dst, constant);
    let df = device_factor(component.dst_factor, src, dst, constant);
    match component.operation {
        BlendOperation::Add => src.zip(sf, |c, f| c * f).zip(dst.zip(df, |c, f| c * f), |s, d| s + d),
        BlendOperation::Subtract => {
            src.zip(sf, |c, f| c * f).zip(dst.zip(df, |c, f| c * f), |s, d| s - d)
        }
        BlendOperation::ReverseSubtract => {
            src.zip(sf, |c, f| c * f).zip(dst.zip(df, |c, f| c * f), |s, d| d - s)
        }
        BlendOperation::Min => src.zip(dst, f64::min),
        BlendOperation::Max => src.zip(dst, f64::max),
    }
}

fn device_factor(factor: BlendFactor, src: Color, dst: Color, constant: Color) -> Color {
    match factor {
        BlendFactor::Zero => Color::splat(0.0),
        BlendFactor::One => Color::splat(1.0),
        BlendFactor::SrcColor => src,
        BlendFactor::OneMinusSrcColor => src.map(|v| 1.0 - v),
        BlendFactor::SrcAlpha => Color::splat(src.a),
        BlendFactor::OneMinusSrcAlpha => Color::splat(1.0 - src.a),
        BlendFactor::DstColor => dst,
        BlendFactor::OneMinusDstColor => dst.map(|v| 1.0 - v),
        BlendFactor::DstAlpha => Color::splat(dst.a),
        BlendFactor::OneMinusDstAlpha => Color::splat(1.0 - dst.a),
        BlendFactor::SrcAlphaSaturated => {
            let f = src.a.min(1.0 - dst.a);
            Color::new(f, f, f, 1.0)
        }
        BlendFactor::ConstantColor => constant,
        BlendFactor::OneMinusConstantColor => constant.map(|v| 1.0 - v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated_device() -> GpuDevice {
        GpuDevice::new("Test GPU")
    }

    fn solid_pipeline(
        dev: &mut GpuDevice,
        format: TextureFormat,
        topology: PrimitiveTopology,
        blend: Option<BlendState>,
    ) -> PipelineId {
        let module = ShaderModule {
            source: String::new(),
            entry_point: "main".into(),
        };
        dev.create_render_pipeline(RenderPipelineDescriptor {
            vertex: VertexState {
                module: module.clone(),
            },
            fragment: FragmentState {
                module,
                targets: vec![ColorTargetState { format, blend }],
            },
            primitive: PrimitiveState {
                topology,
                strip_index_format: topology.is_strip().then_some(IndexFormat::Uint32),
            },
        })
        .unwrap()
    }

    fn attachment(dev: &mut GpuDevice, format: TextureFormat, size: u32) -> TextureId {
        dev.create_texture(&TextureDescriptor {
            format,
            width: size,
            height: size,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
        })
        .unwrap()
    }

    fn vertex_buffer(dev: &mut GpuDevice, ndc: &[[f64; 2]]) -> BufferId {
        let mut bytes = Vec::new();
        for v in ndc {
            for value in [v[0] as f32, v[1] as f32, 0.0f32, 1.0f32] {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        dev.create_buffer_with_data(&bytes, BufferUsage::VERTEX).unwrap()
    }

    // -- buffers ---------------------------------------------------------------

    #[test]
    fn test_create_buffer() {
        let mut dev = simulated_device();
        let id = dev.create_buffer(1024, BufferUsage::COPY_DST).unwrap();
        assert_eq!(dev.buffer_count(), 1);
        assert_eq!(dev.buffer(id).unwrap().size, 1024);
        assert_eq!(dev.stats.buffers_created, 1);
    }

    #[test]
    fn test_create_buffer_exceeds_limit() {
        let mut dev = simulated_device();
        let big = dev.limits.max_buffer_size + 1;
        assert!(dev.create_buffer(big, BufferUsage::COPY_DST).is_err());
    }

    #[test]
    fn test_destroy_nonexistent_buffer() {
        let mut dev = simulated_device();
        assert!(dev.destroy_buffer(BufferId(999)).is_err());
    }

    #[test]
    fn test_copy_buffer_to_buffer() {
        let mut dev = simulated_device();
        let src = dev
            .create_buffer_with_data(&[1, 2, 3, 4], BufferUsage::COPY_SRC)
            .unwrap();
        let dst = dev
            .create_buffer(4, BufferUsage::COPY_DST | BufferUsage::MAP_READ)
            .unwrap();
        let mut encoder = CommandEncoder::new();
        encoder.copy_buffer_to_buffer(src, 0, dst, 0, 4);
        dev.submit(encoder.finish()).unwrap();
        assert_eq!(dev.buffer(dst).unwrap().data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_requires_usages() {
        let mut dev = simulated_device();
        let src = dev.create_buffer(4, BufferUsage::VERTEX).unwrap();
        let dst = dev.create_buffer(4, BufferUsage::COPY_DST).unwrap();
        let mut encoder = CommandEncoder::new();
        encoder.copy_buffer_to_buffer(src, 0, dst, 0, 4);
        assert!(dev.submit(encoder.finish()).is_err());
    }

    // -- async mapping ---------------------------------------------------------

    #[test]
    fn test_mapping_pending_until_polled() {
        let mut dev = simulated_device();
        let buf = dev
            .create_buffer(4, BufferUsage::COPY_DST | BufferUsage::MAP_READ)
            .unwrap();
        let token = dev.map_read_async(buf).unwrap();
        assert_eq!(dev.map_state(token).unwrap(), MapState::Pending);

        // Reading before the completion signal is a harness bug.
        let err = dev.read_mapped(token).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        dev.poll();
        assert_eq!(dev.map_state(token).unwrap(), MapState::Ready);
        assert_eq!(dev.read_mapped(token).unwrap(), vec![0, 0, 0, 0]);
        assert!(!dev.buffer(buf).unwrap().mapped);
    }

    #[test]
    fn test_map_requires_usage() {
        let mut dev = simulated_device();
        let buf = dev.create_buffer(4, BufferUsage::COPY_DST).unwrap();
        assert!(dev.map_read_async(buf).is_err());
    }

    #[test]
    fn test_double_map_rejected() {
        let mut dev = simulated_device();
        let buf = dev
            .create_buffer(4, BufferUsage::MAP_READ)
            .unwrap();
        dev.map_read_async(buf).unwrap();
        assert!(dev.map_read_async(buf).is_err());
    }

    // -- render: clear and points ---------------------------------------------

    #[test]
    fn test_render_pass_clears_attachment() {
        let mut dev = simulated_device();
        let target = attachment(&mut dev, TextureFormat::Rgba8Unorm, 4);
        let mut encoder = CommandEncoder::new();
        let pass = encoder.begin_render_pass(RenderPassDescriptor {
            color_attachment: ColorAttachment {
                texture: target,
                clear: Color::new(1.0, 0.0, 0.0, 1.0),
            },
        });
        pass.end();
        dev.submit(encoder.finish()).unwrap();
        let texel = dev.read_texel(target, 2, 3).unwrap();
        assert_eq!(texel, Color::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_point_draw_covers_vertex_pixels() {
        let mut dev = simulated_device();
        let target = attachment(&mut dev, TextureFormat::Rgba8Unorm, 8);
        let pipeline = solid_pipeline(
            &mut dev,
            TextureFormat::Rgba8Unorm,
            PrimitiveTopology::PointList,
            None,
        );
        // Pixel (2, 5) in an 8x8 target.
        let ndc = [[2.0 * 2.5 / 8.0 - 1.0, -2.0 * 5.5 / 8.0 + 1.0]];
        let vb = vertex_buffer(&mut dev, &ndc);
        let green = {
            let mut bytes = Vec::new();
            for v in [0.0f32, 1.0, 0.0, 1.0] {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            dev.create_buffer_with_data(&bytes, BufferUsage::UNIFORM).unwrap()
        };

        let mut encoder = CommandEncoder::new();
        let mut pass = encoder.begin_render_pass(RenderPassDescriptor {
            color_attachment: ColorAttachment {
                texture: target,
                clear: Color::TRANSPARENT_BLACK,
            },
        });
        pass.set_pipeline(pipeline);
        pass.set_vertex_buffer(vb);
        pass.set_uniform_buffer(green);
        pass.draw(1);
        pass.end();
        dev.submit(encoder.finish()).unwrap();

        assert_eq!(dev.read_texel(target, 2, 5).unwrap(), Color::GREEN);
        assert_eq!(dev.read_texel(target, 3, 5).unwrap(), Color::TRANSPARENT_BLACK);
    }

    #[test]
    fn test_line_list_drops_partial_primitive() {
        let verts: Vec<Option<[f64; 2]>> =
            vec![Some([0.0, 0.0]), Some([0.5, 0.5]), Some([1.0, 1.0])];
        let prims = assemble(PrimitiveTopology::LineList, &verts);
        assert_eq!(prims.len(), 1);
    }

    #[test]
    fn test_strip_restart_splits_runs() {
        let verts: Vec<Option<[f64; 2]>> = vec![
            Some([0.0, 0.0]),
            Some([0.1, 0.0]),
            Some([0.2, 0.0]),
            None,
            Some([0.3, 0.0]),
            Some([0.4, 0.0]),
            Some([0.5, 0.0]),
        ];
        // Line strip: 2 + 2 segments; triangle strip: 1 + 1 triangles.
        assert_eq!(assemble(PrimitiveTopology::LineStrip, &verts).len(), 4);
        assert_eq!(assemble(PrimitiveTopology::TriangleStrip, &verts).len(), 2);
    }

    // -- blending --------------------------------------------------------------

    #[test]
    fn test_device_blend_passthrough_default() {
        let state = BlendState::default();
        let out = blend_color(
            &state,
            Color::new(0.2, 0.4, 0.6, 0.8),
            Color::new(0.9, 0.9, 0.9, 0.9),
            Color::TRANSPARENT_BLACK,
        );
        assert_eq!(out, Color::new(0.2, 0.4, 0.6, 0.8));
    }

    #[test]
    fn test_device_blend_additive() {
        let component = BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
            operation: BlendOperation::Add,
        };
        let state = BlendState {
            color: component,
            alpha: component,
        };
        let out = blend_color(
            &state,
            Color::splat(0.2),
            Color::splat(0.3),
            Color::TRANSPARENT_BLACK,
        );
        let eps = 1e-12;
        assert!((out.r - 0.5).abs() < eps && (out.a - 0.5).abs() < eps);
    }

    #[test]
    fn test_device_blend_constant_defaults_to_zero() {
        let component = BlendComponent {
            src_factor: BlendFactor::ConstantColor,
            dst_factor: BlendFactor::Zero,
            operation: BlendOperation::Add,
        };
        let state = BlendState {
            color: component,
            alpha: component,
        };
        let out = blend_color(
            &state,
            Color::splat(1.0),
            Color::splat(1.0),
            Color::TRANSPARENT_BLACK,
        );
        assert_eq!(out, Color::splat(0.0));
    }

    // -- indirect --------------------------------------------------------------

    #[test]
    fn test_draw_indirect_reads_parameters() {
        let mut dev = simulated_device();
        let target = attachment(&mut dev, TextureFormat::Rgba8Unorm, 8);
        let pipeline = solid_pipeline(
            &mut dev,
            TextureFormat::Rgba8Unorm,
            PrimitiveTopology::PointList,
            None,
        );
        let ndc = [
            [2.0 * 0.5 / 8.0 - 1.0, -2.0 * 0.5 / 8.0 + 1.0],
            [2.0 * 1.5 / 8.0 - 1.0, -2.0 * 0.5 / 8.0 + 1.0],
        ];
        let vb = vertex_buffer(&mut dev, &ndc);
        let indirect = {
            let mut bytes = Vec::new();
            for word in [2u32, 1, 0, 0] {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
            dev.create_buffer_with_data(&bytes, BufferUsage::INDIRECT).unwrap()
        };

        let mut encoder = CommandEncoder::new();
        let mut pass = encoder.begin_render_pass(RenderPassDescriptor {
            color_attachment: ColorAttachment {
                texture: target,
                clear: Color::TRANSPARENT_BLACK,
            },
        });
        pass.set_pipeline(pipeline);
        pass.set_vertex_buffer(vb);
        pass.draw_indirect(indirect, 0);
        pass.end();
        dev.submit(encoder.finish()).unwrap();

        assert_eq!(dev.read_texel(target, 0, 0).unwrap(), Color::WHITE);
        assert_eq!(dev.read_texel(target, 1, 0).unwrap(), Color::WHITE);
        assert_eq!(dev.read_texel(target, 2, 0).unwrap(), Color::TRANSPARENT_BLACK);
    }

    #[test]
    fn test_copy_texture_to_buffer_region() {
        let mut dev = simulated_device();
        let target = attachment(&mut dev, TextureFormat::Rgba8Unorm, 4);
        // Clear to solid red, then read back one texel.
        let mut encoder = CommandEncoder::new();
        let pass = encoder.begin_render_pass(RenderPassDescriptor {
            color_attachment: ColorAttachment {
                texture: target,
                clear: Color::new(1.0, 0.0, 0.0, 1.0),
            },
        });
        pass.end();
        let staging = dev
            .create_buffer(4, BufferUsage::COPY_DST | BufferUsage::MAP_READ)
            .unwrap();
        encoder.copy_texture_to_buffer(target, (1, 1), (1, 1), staging, 0);
        dev.submit(encoder.finish()).unwrap();

        let token = dev.map_read_async(staging).unwrap();
        dev.poll();
        assert_eq!(dev.read_mapped(token).unwrap(), vec![255, 0, 0, 255]);
    }
}
