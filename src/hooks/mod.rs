//! The pre/post-call contract between the dispatch layer and the tracker.
//!
//! Every tracked entry point is a variant of [`ApiCall`]; the `pre_call` /
//! `post_call` pair is the per-entry-point handler table, dispatched by enum
//! tag. New entry points are additive: one variant, one match arm each.
//!
//! Pre-call hooks run before the call is forwarded (destruction bookkeeping,
//! while the handle still resolves) and must not assume the call will
//! succeed. Post-call hooks receive the [`CallRecord`] with the result code
//! and any freshly produced handles, and skip all mutation on failure.
//! The exception is where the tracked API mandates partial effects
//! (per-entry present results), which is handled explicitly.

use crate::error::Result;
use crate::track::*;
use crate::utils::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kage-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResultCode {
    #[default]
    Success,
    NotReady,
    Timeout,
    Suboptimal,
    OutOfDate,
    ErrorOutOfHostMemory,
    ErrorOutOfDeviceMemory,
    ErrorDeviceLost,
    ErrorSurfaceLost,
    ErrorUnknown,
}

impl ResultCode {
    /// Suboptimal is a success with a warning attached; state still mutated.
    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success | ResultCode::Suboptimal)
    }
}

/// What the forwarded call produced: its result code, any handles (or other
/// output words) it wrote, and per-entry results for batched operations.
#[derive(Debug, Clone, Default)]
pub struct CallRecord {
    pub result: ResultCode,
    pub handles: Vec<u64>,
    pub entry_results: Vec<ResultCode>,
}

impl CallRecord {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_handle(raw: u64) -> Self {
        Self {
            handles: vec![raw],
            ..Default::default()
        }
    }

    pub fn with_handles(raws: Vec<u64>) -> Self {
        Self {
            handles: raws,
            ..Default::default()
        }
    }

    pub fn err(result: ResultCode) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    pub fn first_handle<T>(&self) -> Option<Handle<T>> {
        self.handles
            .first()
            .copied()
            .filter(|raw| *raw != 0)
            .map(Handle::new)
    }
}

/// One tracked entry point with its arguments.
#[derive(Debug, Clone)]
pub enum ApiCall {
    // Device and capability snapshot
    EnumeratePhysicalDevices {
        caps: Vec<PhysicalDeviceCaps>,
    },
    CreateDevice {
        physical: Handle<PhysicalDevice>,
        info: DeviceInfo,
    },
    DestroyDevice {
        device: Handle<Device>,
    },
    GetDeviceQueue {
        device: Handle<Device>,
        family: u32,
        index: u32,
    },
    ImportExternalFormat {
        device: Handle<Device>,
        external_format: u64,
        features: FormatFeatureSet,
    },
    DeviceWaitIdle {
        device: Handle<Device>,
    },

    // Memory and resources
    AllocateMemory {
        device: Handle<Device>,
        info: MemoryAllocInfo,
    },
    FreeMemory {
        memory: Handle<Memory>,
    },
    CreateBuffer {
        device: Handle<Device>,
        info: BufferInfo,
    },
    DestroyBuffer {
        buffer: Handle<Buffer>,
    },
    BindBufferMemory {
        buffer: Handle<Buffer>,
        memory: Handle<Memory>,
        offset: u64,
    },
    BindBufferSparse {
        buffer: Handle<Buffer>,
        memory: Handle<Memory>,
        binds: Vec<SparseBind>,
    },
    GetBufferDeviceAddress {
        buffer: Handle<Buffer>,
    },
    CreateImage {
        device: Handle<Device>,
        info: ImageInfo,
    },
    DestroyImage {
        image: Handle<Image>,
    },
    BindImageMemory {
        image: Handle<Image>,
        memory: Handle<Memory>,
        offset: u64,
    },
    CreateBufferView {
        device: Handle<Device>,
        info: BufferViewInfo,
    },
    DestroyBufferView {
        view: Handle<BufferView>,
    },
    CreateImageView {
        info: ImageViewInfo,
    },
    DestroyImageView {
        view: Handle<ImageView>,
    },
    CreateSampler {
        info: SamplerInfo,
    },
    DestroySampler {
        sampler: Handle<Sampler>,
    },
    CreateAccelerationStructure {
        info: AccelStructInfo,
    },
    DestroyAccelerationStructure {
        accel: Handle<AccelerationStructure>,
    },

    // Descriptors
    CreateDescriptorSetLayout {
        info: DescriptorSetLayoutInfo,
    },
    DestroyDescriptorSetLayout {
        layout: Handle<DescriptorSetLayout>,
    },
    CreateDescriptorPool {
        info: DescriptorPoolInfo,
    },
    DestroyDescriptorPool {
        pool: Handle<DescriptorPool>,
    },
    ResetDescriptorPool {
        pool: Handle<DescriptorPool>,
    },
    AllocateDescriptorSets {
        pool: Handle<DescriptorPool>,
        layouts: Vec<Handle<DescriptorSetLayout>>,
    },
    FreeDescriptorSets {
        pool: Handle<DescriptorPool>,
        sets: Vec<Handle<DescriptorSet>>,
    },
    UpdateDescriptorSets {
        writes: Vec<WriteDescriptorSet>,
        copies: Vec<CopyDescriptorSet>,
    },
    CreateUpdateTemplate {
        info: UpdateTemplateInfo,
    },
    DestroyUpdateTemplate {
        template: Handle<UpdateTemplate>,
    },
    UpdateWithTemplate {
        set: Handle<DescriptorSet>,
        template: Handle<UpdateTemplate>,
        resources: Vec<DescriptorResource>,
    },

    // Pipelines
    CreatePipelineLayout {
        info: PipelineLayoutInfo,
    },
    DestroyPipelineLayout {
        layout: Handle<PipelineLayout>,
    },
    CreateGraphicsPipeline {
        info: GraphicsPipelineInfo,
    },
    CreateComputePipeline {
        info: ComputePipelineInfo,
    },
    DestroyPipeline {
        pipeline: Handle<Pipeline>,
    },

    // Command recording
    CreateCommandPool {
        info: CommandPoolInfo,
    },
    DestroyCommandPool {
        pool: Handle<CommandPool>,
    },
    ResetCommandPool {
        pool: Handle<CommandPool>,
    },
    AllocateCommandBuffers {
        pool: Handle<CommandPool>,
        level: CommandBufferLevel,
    },
    FreeCommandBuffers {
        pool: Handle<CommandPool>,
        buffers: Vec<Handle<CommandBuffer>>,
    },
    BeginCommandBuffer {
        buffer: Handle<CommandBuffer>,
        one_time: bool,
    },
    EndCommandBuffer {
        buffer: Handle<CommandBuffer>,
    },
    ResetCommandBuffer {
        buffer: Handle<CommandBuffer>,
    },
    /// Any `cmd_*` recording entry point; the command IR is the payload.
    RecordCommand {
        buffer: Handle<CommandBuffer>,
        command: RecordedCommand,
    },

    // Synchronization
    CreateSemaphore {
        info: SemaphoreInfo,
    },
    DestroySemaphore {
        semaphore: Handle<Semaphore>,
    },
    CreateFence {
        info: FenceInfo,
    },
    DestroyFence {
        fence: Handle<Fence>,
    },
    ResetFences {
        fences: Vec<Handle<Fence>>,
    },
    WaitForFences {
        fences: Vec<Handle<Fence>>,
        timeout_ns: u64,
    },
    GetFenceStatus {
        fence: Handle<Fence>,
    },
    SignalSemaphore {
        semaphore: Handle<Semaphore>,
        value: u64,
    },
    WaitSemaphores {
        waits: Vec<SemaphoreOp>,
        timeout_ns: u64,
    },
    CreateEvent {
        info: EventInfo,
    },
    DestroyEvent {
        event: Handle<Event>,
    },
    SetEvent {
        event: Handle<Event>,
    },
    ResetEvent {
        event: Handle<Event>,
    },
    CreateQueryPool {
        info: QueryPoolInfo,
    },
    DestroyQueryPool {
        pool: Handle<QueryPool>,
    },
    ResetQueryPool {
        pool: Handle<QueryPool>,
        first: u32,
        count: u32,
    },

    // Queue engine
    QueueSubmit {
        queue: Handle<Queue>,
        batches: Vec<SubmitBatch>,
        fence: Handle<Fence>,
    },
    QueueWaitIdle {
        queue: Handle<Queue>,
    },

    // Swapchain / presentation
    CreateSwapchain {
        device: Handle<Device>,
        info: SwapchainInfo,
    },
    GetSwapchainImages {
        swapchain: Handle<Swapchain>,
    },
    DestroySwapchain {
        swapchain: Handle<Swapchain>,
    },
    AcquireNextImage {
        swapchain: Handle<Swapchain>,
        semaphore: Handle<Semaphore>,
        fence: Handle<Fence>,
    },
    QueuePresent {
        queue: Handle<Queue>,
        info: PresentInfo,
    },
}

impl ApiCall {
    /// Destruction-shaped calls do their bookkeeping in the pre-call hook,
    /// while the handle still resolves.
    pub fn is_destruction(&self) -> bool {
        matches!(
            self,
            ApiCall::DestroyDevice { .. }
                | ApiCall::FreeMemory { .. }
                | ApiCall::DestroyBuffer { .. }
                | ApiCall::DestroyImage { .. }
                | ApiCall::DestroyBufferView { .. }
                | ApiCall::DestroyImageView { .. }
                | ApiCall::DestroySampler { .. }
                | ApiCall::DestroyAccelerationStructure { .. }
                | ApiCall::DestroyDescriptorSetLayout { .. }
                | ApiCall::DestroyDescriptorPool { .. }
                | ApiCall::FreeDescriptorSets { .. }
                | ApiCall::DestroyUpdateTemplate { .. }
                | ApiCall::DestroyPipelineLayout { .. }
                | ApiCall::DestroyPipeline { .. }
                | ApiCall::DestroyCommandPool { .. }
                | ApiCall::FreeCommandBuffers { .. }
                | ApiCall::DestroySemaphore { .. }
                | ApiCall::DestroyFence { .. }
                | ApiCall::DestroyEvent { .. }
                | ApiCall::DestroyQueryPool { .. }
                | ApiCall::DestroySwapchain { .. }
        )
    }
}

impl StateTracker {
    /// Fires before the call is forwarded to the next layer.
    pub fn pre_call(&self, call: &ApiCall) {
        match call {
            ApiCall::DestroyDevice { device } => self.pre_destroy_device(*device),
            ApiCall::FreeMemory { memory } => self.pre_free_memory(*memory),
            ApiCall::DestroyBuffer { buffer } => self.pre_destroy_buffer(*buffer),
            ApiCall::DestroyImage { image } => self.pre_destroy_image(*image),
            ApiCall::DestroyBufferView { view } => self.pre_destroy_buffer_view(*view),
            ApiCall::DestroyImageView { view } => self.pre_destroy_image_view(*view),
            ApiCall::DestroySampler { sampler } => self.pre_destroy_sampler(*sampler),
            ApiCall::DestroyAccelerationStructure { accel } => {
                self.pre_destroy_acceleration_structure(*accel)
            }
            ApiCall::DestroyDescriptorSetLayout { layout } => {
                self.pre_destroy_descriptor_set_layout(*layout)
            }
            ApiCall::DestroyDescriptorPool { pool } => self.pre_destroy_descriptor_pool(*pool),
            ApiCall::FreeDescriptorSets { pool, sets } => self.pre_free_descriptor_sets(*pool, sets),
            ApiCall::DestroyUpdateTemplate { template } => self.pre_destroy_update_template(*template),
            ApiCall::DestroyPipelineLayout { layout } => self.pre_destroy_pipeline_layout(*layout),
            ApiCall::DestroyPipeline { pipeline } => self.pre_destroy_pipeline(*pipeline),
            ApiCall::DestroyCommandPool { pool } => self.pre_destroy_command_pool(*pool),
            ApiCall::FreeCommandBuffers { pool, buffers } => {
                self.pre_free_command_buffers(*pool, buffers)
            }
            ApiCall::DestroySemaphore { semaphore } => self.pre_destroy_semaphore(*semaphore),
            ApiCall::DestroyFence { fence } => self.pre_destroy_fence(*fence),
            ApiCall::DestroyEvent { event } => self.pre_destroy_event(*event),
            ApiCall::DestroyQueryPool { pool } => self.pre_destroy_query_pool(*pool),
            ApiCall::DestroySwapchain { swapchain } => self.pre_destroy_swapchain(*swapchain),
            // Everything else tracks on the post-call side only.
            _ => {}
        }
    }

    /// Fires after the forwarded call returned; `record` carries its result.
    pub fn post_call(&self, call: &ApiCall, record: &CallRecord) -> Result<()> {
        match call {
            ApiCall::EnumeratePhysicalDevices { caps } => {
                self.post_enumerate_physical_devices(caps, record)
            }
            ApiCall::CreateDevice { physical, info } => {
                self.post_create_device(*physical, info, record)
            }
            ApiCall::GetDeviceQueue {
                device,
                family,
                index,
            } => self.post_get_device_queue(*device, *family, *index, record),
            ApiCall::ImportExternalFormat {
                device,
                external_format,
                features,
            } => self.post_import_external_format(*device, *external_format, *features, record),
            ApiCall::DeviceWaitIdle { device } => {
                return self.post_device_wait_idle(*device, record)
            }

            ApiCall::AllocateMemory { device, info } => {
                self.post_allocate_memory(*device, info, record)
            }
            ApiCall::CreateBuffer { device, info } => self.post_create_buffer(*device, info, record),
            ApiCall::BindBufferMemory {
                buffer,
                memory,
                offset,
            } => self.post_bind_buffer_memory(*buffer, *memory, *offset, record),
            ApiCall::BindBufferSparse {
                buffer,
                memory,
                binds,
            } => self.post_bind_buffer_sparse(*buffer, *memory, binds, record),
            ApiCall::GetBufferDeviceAddress { buffer } => {
                self.post_get_buffer_device_address(*buffer, record)
            }
            ApiCall::CreateImage { device, info } => self.post_create_image(*device, info, record),
            ApiCall::BindImageMemory {
                image,
                memory,
                offset,
            } => self.post_bind_image_memory(*image, *memory, *offset, record),
            ApiCall::CreateBufferView { device, info } => {
                self.post_create_buffer_view(*device, info, record)
            }
            ApiCall::CreateImageView { info } => self.post_create_image_view(info, record),
            ApiCall::CreateSampler { info } => self.post_create_sampler(info, record),
            ApiCall::CreateAccelerationStructure { info } => {
                self.post_create_acceleration_structure(info, record)
            }

            ApiCall::CreateDescriptorSetLayout { info } => {
                self.post_create_descriptor_set_layout(info, record)
            }
            ApiCall::CreateDescriptorPool { info } => self.post_create_descriptor_pool(info, record),
            ApiCall::ResetDescriptorPool { pool } => self.post_reset_descriptor_pool(*pool, record),
            ApiCall::AllocateDescriptorSets { pool, layouts } => {
                self.post_allocate_descriptor_sets(*pool, layouts, record)
            }
            ApiCall::UpdateDescriptorSets { writes, copies } => {
                if record.is_success() {
                    self.post_update_descriptor_sets(writes, copies)
                }
            }
            ApiCall::CreateUpdateTemplate { info } => self.post_create_update_template(info, record),
            ApiCall::UpdateWithTemplate {
                set,
                template,
                resources,
            } => {
                if record.is_success() {
                    self.post_update_with_template(*set, *template, resources)
                }
            }

            ApiCall::CreatePipelineLayout { info } => self.post_create_pipeline_layout(info, record),
            ApiCall::CreateGraphicsPipeline { info } => {
                self.post_create_graphics_pipeline(info, record)
            }
            ApiCall::CreateComputePipeline { info } => {
                self.post_create_compute_pipeline(info, record)
            }

            ApiCall::CreateCommandPool { info } => self.post_create_command_pool(info, record),
            ApiCall::ResetCommandPool { pool } => self.post_reset_command_pool(*pool, record),
            ApiCall::AllocateCommandBuffers { pool, level } => {
                self.post_allocate_command_buffers(*pool, *level, record)
            }
            ApiCall::BeginCommandBuffer { buffer, one_time } => {
                self.post_begin_command_buffer(*buffer, *one_time, record)
            }
            ApiCall::EndCommandBuffer { buffer } => self.post_end_command_buffer(*buffer, record),
            ApiCall::ResetCommandBuffer { buffer } => self.post_reset_command_buffer(*buffer, record),
            ApiCall::RecordCommand { buffer, command } => {
                if record.is_success() {
                    self.post_record_command(*buffer, command)
                }
            }

            ApiCall::CreateSemaphore { info } => self.post_create_semaphore(info, record),
            ApiCall::CreateFence { info } => self.post_create_fence(info, record),
            ApiCall::ResetFences { fences } => self.post_reset_fences(fences, record),
            ApiCall::WaitForFences { fences, timeout_ns } => {
                return self.post_wait_for_fences(fences, *timeout_ns, record)
            }
            ApiCall::GetFenceStatus { fence } => return self.post_get_fence_status(*fence, record),
            ApiCall::SignalSemaphore { semaphore, value } => {
                self.post_signal_semaphore(*semaphore, *value, record)
            }
            ApiCall::WaitSemaphores { waits, timeout_ns } => {
                return self.post_wait_semaphores(waits, *timeout_ns, record)
            }
            ApiCall::CreateEvent { info } => self.post_create_event(info, record),
            ApiCall::SetEvent { event } => self.post_set_event(*event, record),
            ApiCall::ResetEvent { event } => self.post_reset_event(*event, record),
            ApiCall::CreateQueryPool { info } => self.post_create_query_pool(info, record),
            ApiCall::ResetQueryPool { pool, first, count } => {
                if record.is_success() {
                    self.post_reset_query_pool(*pool, *first, *count)
                }
            }

            ApiCall::QueueSubmit {
                queue,
                batches,
                fence,
            } => {
                self.post_queue_submit(*queue, batches, *fence, record);
            }
            ApiCall::QueueWaitIdle { queue } => return self.post_queue_wait_idle(*queue, record),

            ApiCall::CreateSwapchain { device, info } => {
                self.post_create_swapchain(*device, info, record)
            }
            ApiCall::GetSwapchainImages { swapchain } => {
                self.post_get_swapchain_images(*swapchain, record)
            }
            ApiCall::AcquireNextImage {
                swapchain,
                semaphore,
                fence,
            } => self.post_acquire_next_image(*swapchain, *semaphore, *fence, record),
            ApiCall::QueuePresent { queue, info } => self.post_queue_present(*queue, info, record),

            // Destruction bookkeeping already ran in the pre-call hook.
            _ => {
                debug_assert!(call.is_destruction());
            }
        }
        Ok(())
    }
}
