use bitflags::bitflags;

use super::commands::CommandBuffer;
use super::descriptors::{DescriptorSet, DescriptorSetLayout};
use super::pipeline::PipelineLayout;
use super::resources::{AccelerationStructure, Buffer, BufferView, Image, ImageView, Sampler};
use super::swapchain::Swapchain;
use super::sync::Semaphore;
use crate::utils::Handle;

#[cfg(feature = "kage-serde")]
use serde::{Deserialize, Serialize};

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum Format {
    Unknown,
    R8Sint,
    R8Uint,
    RGB8,
    BGRA8,
    BGRA8Unorm,
    #[default]
    RGBA8,
    RGBA8Unorm,
    RGBA32F,
    D24S8,
    D32F,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum ImageTiling {
    #[default]
    Optimal,
    Linear,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum SampleCount {
    #[default]
    S1,
    S2,
    S4,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum AspectMask {
    #[default]
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC   = 0x1;
        const TRANSFER_DST   = 0x2;
        const UNIFORM_TEXEL  = 0x4;
        const STORAGE_TEXEL  = 0x8;
        const UNIFORM        = 0x10;
        const STORAGE        = 0x20;
        const INDEX          = 0x40;
        const VERTEX         = 0x80;
        const INDIRECT       = 0x100;
        const DEVICE_ADDRESS = 0x200;
        const ACCEL_INPUT    = 0x400;
        const ACCEL_STORAGE  = 0x800;
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC  = 0x1;
        const TRANSFER_DST  = 0x2;
        const SAMPLED       = 0x4;
        const STORAGE       = 0x8;
        const COLOR_RT      = 0x10;
        const DEPTH_RT      = 0x20;
        const TRANSIENT     = 0x40;
        const INPUT         = 0x80;
    }
}

bitflags! {
    /// What a format supports, resolved once at resource creation from the
    /// device's capability snapshot (or the external-format cache).
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FormatFeatures: u32 {
        const SAMPLED_IMAGE        = 0x1;
        const STORAGE_IMAGE        = 0x2;
        const UNIFORM_TEXEL_BUFFER = 0x4;
        const STORAGE_TEXEL_BUFFER = 0x8;
        const VERTEX_BUFFER        = 0x10;
        const COLOR_ATTACHMENT     = 0x20;
        const DEPTH_ATTACHMENT     = 0x40;
        const BLIT_SRC             = 0x80;
        const BLIT_DST             = 0x100;
        const TRANSFER_SRC         = 0x200;
        const TRANSFER_DST         = 0x400;
        const SAMPLED_FILTER_LINEAR = 0x800;
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProps: u32 {
        const DEVICE_LOCAL  = 0x1;
        const HOST_VISIBLE  = 0x2;
        const HOST_COHERENT = 0x4;
        const HOST_CACHED   = 0x8;
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueCaps: u32 {
        const GRAPHICS = 0x1;
        const COMPUTE  = 0x2;
        const TRANSFER = 0x4;
        const SPARSE   = 0x8;
        const PRESENT  = 0x10;
    }
}

bitflags! {
    /// One bit per piece of pipeline state that may be set dynamically at
    /// record time. Doubles as the command buffer's validity mask.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DynamicStateMask: u32 {
        const VIEWPORT        = 0x1;
        const SCISSOR         = 0x2;
        const LINE_WIDTH      = 0x4;
        const DEPTH_BIAS      = 0x8;
        const BLEND_CONSTANTS = 0x10;
        const DEPTH_BOUNDS    = 0x20;
        const STENCIL_REF     = 0x40;
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum DescriptorType {
    #[default]
    UniformBuffer,
    StorageBuffer,
    UniformTexelBuffer,
    StorageTexelBuffer,
    SampledImage,
    StorageImage,
    CombinedImageSampler,
    Sampler,
    AccelerationStructure,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum PipelineBindPoint {
    #[default]
    Graphics,
    Compute,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum SemaphoreKind {
    #[default]
    Binary,
    Timeline,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum QueryType {
    #[default]
    Occlusion,
    Timestamp,
    PipelineStatistics,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum CommandBufferLevel {
    #[default]
    Primary,
    Secondary,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum AccelStructKind {
    #[default]
    BottomLevel,
    TopLevel,
}

#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub struct Rect2D {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub struct FRect2D {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub area: FRect2D,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            area: FRect2D {
                x: 0.0,
                y: 0.0,
                w: 1024.0,
                h: 1024.0,
            },
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

// ── Creation parameters ──────────────────────────────────────────────
//
// Creation infos are retained by value on the state object for its whole
// lifetime (they are the immutable half of every shadow record), so they own
// their strings instead of borrowing them.

#[derive(Debug, Clone)]
pub struct MemoryAllocInfo {
    pub debug_name: String,
    pub byte_size: u64,
    pub memory_type: u32,
    pub external: bool,
}

impl Default for MemoryAllocInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            byte_size: 1024,
            memory_type: 0,
            external: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferInfo {
    pub debug_name: String,
    pub byte_size: u64,
    pub usage: BufferUsage,
    pub sparse: bool,
}

impl Default for BufferInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            byte_size: 1024,
            usage: BufferUsage::UNIFORM,
            sparse: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub debug_name: String,
    pub dim: [u32; 3],
    pub layers: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub tiling: ImageTiling,
    pub usage: ImageUsage,
    pub samples: SampleCount,
    /// Opaque platform format id for externally imported images. When set,
    /// format features come from the device's external-format cache instead
    /// of the capability snapshot.
    pub external_format: Option<u64>,
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            dim: [1, 1, 1],
            layers: 1,
            mip_levels: 1,
            format: Format::RGBA8,
            tiling: ImageTiling::Optimal,
            usage: ImageUsage::SAMPLED,
            samples: SampleCount::S1,
            external_format: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BufferViewInfo {
    pub debug_name: String,
    pub buffer: Handle<Buffer>,
    pub format: Format,
    pub offset: u64,
    pub range: u64,
}

#[derive(Debug, Clone)]
pub struct ImageViewInfo {
    pub debug_name: String,
    pub image: Handle<Image>,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    pub aspect: AspectMask,
}

impl Default for ImageViewInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            image: Default::default(),
            base_mip: 0,
            mip_count: 1,
            base_layer: 0,
            layer_count: 1,
            aspect: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub enum SamplerAddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub struct SamplerInfo {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub address_mode_u: SamplerAddressMode,
    pub address_mode_v: SamplerAddressMode,
    pub address_mode_w: SamplerAddressMode,
    pub anisotropy_enable: bool,
    pub max_anisotropy: f32,
    pub compare_enable: bool,
    pub unnormalized_coordinates: bool,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        SamplerInfo {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            address_mode_u: SamplerAddressMode::Repeat,
            address_mode_v: SamplerAddressMode::Repeat,
            address_mode_w: SamplerAddressMode::Repeat,
            anisotropy_enable: false,
            max_anisotropy: 1.0,
            compare_enable: false,
            unnormalized_coordinates: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccelStructInfo {
    pub debug_name: String,
    pub kind: AccelStructKind,
    pub buffer: Handle<Buffer>,
    pub offset: u64,
    pub byte_size: u64,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
}

impl Default for DescriptorBinding {
    fn default() -> Self {
        Self {
            binding: 0,
            ty: DescriptorType::UniformBuffer,
            count: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutInfo {
    pub debug_name: String,
    pub bindings: Vec<DescriptorBinding>,
}

#[derive(Debug, Clone)]
pub struct DescriptorPoolInfo {
    pub debug_name: String,
    pub max_sets: u32,
    /// Pools created without this flag manage set lifetime in bulk: sets die
    /// on pool reset/destroy and cannot be freed individually.
    pub allow_free: bool,
    pub sizes: Vec<(DescriptorType, u32)>,
}

impl Default for DescriptorPoolInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            max_sets: 64,
            allow_free: false,
            sizes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub struct UpdateTemplateEntry {
    pub binding: u32,
    pub array_element: u32,
    pub count: u32,
    pub ty: DescriptorType,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTemplateInfo {
    pub debug_name: String,
    pub entries: Vec<UpdateTemplateEntry>,
}

#[derive(Debug, Clone)]
pub struct CommandPoolInfo {
    pub debug_name: String,
    pub queue_family: u32,
    pub transient: bool,
    pub allow_reset: bool,
}

impl Default for CommandPoolInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            queue_family: 0,
            transient: false,
            allow_reset: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineLayoutInfo {
    pub debug_name: String,
    pub set_layouts: Vec<Handle<DescriptorSetLayout>>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineInfo {
    pub debug_name: String,
    pub layout: Handle<PipelineLayout>,
    /// States the pipeline leaves dynamic; everything else is baked static
    /// and trashes the command buffer's dynamic state on bind.
    pub dynamic: DynamicStateMask,
}

#[derive(Debug, Clone, Default)]
pub struct ComputePipelineInfo {
    pub debug_name: String,
    pub layout: Handle<PipelineLayout>,
}

#[derive(Debug, Clone)]
pub struct SemaphoreInfo {
    pub debug_name: String,
    pub kind: SemaphoreKind,
    pub initial_value: u64,
}

impl Default for SemaphoreInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            kind: SemaphoreKind::Binary,
            initial_value: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FenceInfo {
    pub debug_name: String,
    pub signaled: bool,
    /// Externally shared (e.g. cross-process) fences are flagged at submit so
    /// the caller can eagerly wait/notify instead of polling later.
    pub external: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EventInfo {
    pub debug_name: String,
}

#[derive(Debug, Clone)]
pub struct QueryPoolInfo {
    pub debug_name: String,
    pub ty: QueryType,
    pub count: u32,
}

impl Default for QueryPoolInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            ty: QueryType::Occlusion,
            count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "kage-serde", derive(Serialize, Deserialize))]
pub struct QueueRequest {
    pub family: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub debug_name: String,
    pub queues: Vec<QueueRequest>,
}

#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    pub debug_name: String,
    pub format: Format,
    pub extent: Extent,
    pub min_image_count: u32,
    pub usage: ImageUsage,
    pub old_swapchain: Handle<Swapchain>,
}

impl Default for SwapchainInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            format: Format::BGRA8Unorm,
            extent: Extent {
                width: 1280,
                height: 1024,
            },
            min_image_count: 2,
            usage: ImageUsage::COLOR_RT,
            old_swapchain: Default::default(),
        }
    }
}

// ── Operation payloads ───────────────────────────────────────────────

/// A wait or signal entry in a submit batch. `value` is ignored for binary
/// semaphores (their payload is an implicit 0/1).
#[derive(Debug, Clone, Copy, Default)]
pub struct SemaphoreOp {
    pub semaphore: Handle<Semaphore>,
    pub value: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitBatch {
    pub waits: Vec<SemaphoreOp>,
    pub command_buffers: Vec<Handle<CommandBuffer>>,
    pub signals: Vec<SemaphoreOp>,
}

/// A concrete resource written into a descriptor slot.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource {
    Buffer {
        buffer: Handle<Buffer>,
        offset: u64,
        range: u64,
    },
    BufferView(Handle<BufferView>),
    Image {
        view: Handle<ImageView>,
        sampler: Option<Handle<Sampler>>,
    },
    Sampler(Handle<Sampler>),
    AccelerationStructure(Handle<AccelerationStructure>),
}

#[derive(Debug, Clone)]
pub struct WriteDescriptorSet {
    pub set: Handle<DescriptorSet>,
    pub binding: u32,
    pub array_element: u32,
    pub ty: DescriptorType,
    pub resources: Vec<DescriptorResource>,
}

#[derive(Debug, Clone, Copy)]
pub struct CopyDescriptorSet {
    pub src_set: Handle<DescriptorSet>,
    pub src_binding: u32,
    pub src_array_element: u32,
    pub dst_set: Handle<DescriptorSet>,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SparseBind {
    pub resource_offset: u64,
    pub byte_size: u64,
    pub memory_offset: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PresentEntry {
    pub swapchain: Handle<Swapchain>,
    pub image_index: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PresentInfo {
    pub waits: Vec<Handle<Semaphore>>,
    pub entries: Vec<PresentEntry>,
}
