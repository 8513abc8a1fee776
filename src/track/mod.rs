use std::sync::atomic::{AtomicU32, Ordering};

pub mod address_map;
pub mod commands;
pub mod descriptors;
pub mod device;
pub mod pipeline;
pub mod resources;
pub mod queue;
pub mod structs;
pub mod swapchain;
pub mod sync;

pub use address_map::AddressMap;
pub use commands::*;
pub use descriptors::*;
pub use device::*;
pub use pipeline::*;
pub use queue::*;
pub use resources::*;
pub use structs::*;
pub use swapchain::*;
pub use sync::*;

use crate::utils::Registry;

/// Object kind tag carried by every state object, mostly for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    PhysicalDevice,
    Device,
    Queue,
    Memory,
    Buffer,
    BufferView,
    Image,
    ImageView,
    Sampler,
    AccelerationStructure,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    UpdateTemplate,
    CommandPool,
    CommandBuffer,
    PipelineLayout,
    Pipeline,
    Semaphore,
    Fence,
    Event,
    QueryPool,
    Swapchain,
}

/// Common face of every shadow record, so heterogeneous owners (a command
/// buffer's child set, a memory's bound list) can hold them uniformly.
pub trait TrackedObject: Send + Sync {
    fn raw_handle(&self) -> u64;
    fn kind(&self) -> ObjectKind;
    fn debug_name(&self) -> &str {
        ""
    }
}

/// One strongly-typed registry per object kind. Type-specific fields stay
/// fully typed; polymorphic child bookkeeping goes through [`TrackedObject`].
#[derive(Default)]
pub struct ObjectStore {
    pub physical_devices: Registry<PhysicalDevice>,
    pub devices: Registry<Device>,
    pub queues: Registry<Queue>,
    pub memories: Registry<Memory>,
    pub buffers: Registry<Buffer>,
    pub buffer_views: Registry<BufferView>,
    pub images: Registry<Image>,
    pub image_views: Registry<ImageView>,
    pub samplers: Registry<Sampler>,
    pub accel_structs: Registry<AccelerationStructure>,
    pub set_layouts: Registry<DescriptorSetLayout>,
    pub descriptor_pools: Registry<DescriptorPool>,
    pub descriptor_sets: Registry<DescriptorSet>,
    pub update_templates: Registry<UpdateTemplate>,
    pub command_pools: Registry<CommandPool>,
    pub command_buffers: Registry<CommandBuffer>,
    pub pipeline_layouts: Registry<PipelineLayout>,
    pub pipelines: Registry<Pipeline>,
    pub semaphores: Registry<Semaphore>,
    pub fences: Registry<Fence>,
    pub events: Registry<Event>,
    pub query_pools: Registry<QueryPool>,
    pub swapchains: Registry<Swapchain>,
}

/// The shadow of everything the client has created.
///
/// One instance per tracked process. All mutation happens synchronously on
/// whichever application thread entered the API; the tracker owns no threads
/// of its own. Per-object tracking fields carry their own interior locks, and
/// long-lived aggregates (address maps, per-queue submission logs) carry
/// guards distinct from any per-object lock.
pub struct StateTracker {
    store: ObjectStore,
    queue_order: AtomicU32,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            store: ObjectStore::default(),
            queue_order: AtomicU32::new(0),
        }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub(crate) fn next_queue_order(&self) -> u32 {
        self.queue_order.fetch_add(1, Ordering::Relaxed)
    }
}
