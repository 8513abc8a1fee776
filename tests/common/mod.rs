use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use kage::*;

/// Hands out the raw ids a driver would produce. Monotonic per harness, so
/// handles never collide within a test.
pub struct HandleGen {
    next: AtomicU64,
}

impl HandleGen {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0x1000),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// A tracker plus one enumerated physical device, one device, and two queues
/// (family 0 and family 1): the fixture almost every scenario starts from.
pub struct Harness {
    pub tracker: StateTracker,
    pub gen: HandleGen,
    pub physical: Handle<PhysicalDevice>,
    pub device: Handle<Device>,
    pub gfx_queue: Handle<Queue>,
    pub compute_queue: Handle<Queue>,
}

impl Harness {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let tracker = StateTracker::new();
        let gen = HandleGen::new();

        let physical_raw = gen.next();
        tracker
            .post_call(
                &ApiCall::EnumeratePhysicalDevices {
                    caps: vec![test_caps()],
                },
                &CallRecord::with_handle(physical_raw),
            )
            .unwrap();
        let physical = Handle::new(physical_raw);

        let device_raw = gen.next();
        tracker
            .post_call(
                &ApiCall::CreateDevice {
                    physical,
                    info: DeviceInfo {
                        debug_name: "test-device".into(),
                        queues: vec![
                            QueueRequest { family: 0, count: 1 },
                            QueueRequest { family: 1, count: 1 },
                        ],
                    },
                },
                &CallRecord::with_handle(device_raw),
            )
            .unwrap();
        let device = Handle::new(device_raw);

        let gfx_raw = gen.next();
        tracker
            .post_call(
                &ApiCall::GetDeviceQueue {
                    device,
                    family: 0,
                    index: 0,
                },
                &CallRecord::with_handle(gfx_raw),
            )
            .unwrap();
        let compute_raw = gen.next();
        tracker
            .post_call(
                &ApiCall::GetDeviceQueue {
                    device,
                    family: 1,
                    index: 0,
                },
                &CallRecord::with_handle(compute_raw),
            )
            .unwrap();

        Self {
            tracker,
            gen,
            physical,
            device,
            gfx_queue: Handle::new(gfx_raw),
            compute_queue: Handle::new(compute_raw),
        }
    }

    /// Shorthand: run a creation call and return its typed handle.
    pub fn create<T>(&self, call: ApiCall) -> Handle<T> {
        let raw = self.gen.next();
        self.tracker
            .post_call(&call, &CallRecord::with_handle(raw))
            .unwrap();
        Handle::new(raw)
    }

    pub fn make_buffer(&self, byte_size: u64) -> Handle<Buffer> {
        self.create(ApiCall::CreateBuffer {
            device: self.device,
            info: BufferInfo {
                debug_name: "buf".into(),
                byte_size,
                usage: BufferUsage::STORAGE | BufferUsage::DEVICE_ADDRESS,
                sparse: false,
            },
        })
    }

    pub fn make_fence(&self) -> Handle<Fence> {
        self.create(ApiCall::CreateFence {
            info: FenceInfo::default(),
        })
    }

    pub fn make_semaphore(&self, kind: SemaphoreKind) -> Handle<Semaphore> {
        self.create(ApiCall::CreateSemaphore {
            info: SemaphoreInfo {
                debug_name: String::new(),
                kind,
                initial_value: 0,
            },
        })
    }

    /// Allocate one recorded-and-ended command buffer from a fresh pool.
    pub fn make_executable_cb(&self, one_time: bool) -> Handle<CommandBuffer> {
        let pool: Handle<CommandPool> = self.create(ApiCall::CreateCommandPool {
            info: CommandPoolInfo::default(),
        });
        let cb: Handle<CommandBuffer> = self.create(ApiCall::AllocateCommandBuffers {
            pool,
            level: CommandBufferLevel::Primary,
        });
        self.tracker
            .post_call(
                &ApiCall::BeginCommandBuffer {
                    buffer: cb,
                    one_time,
                },
                &CallRecord::ok(),
            )
            .unwrap();
        self.tracker
            .post_call(&ApiCall::EndCommandBuffer { buffer: cb }, &CallRecord::ok())
            .unwrap();
        cb
    }

    pub fn submit(
        &self,
        queue: Handle<Queue>,
        batches: Vec<SubmitBatch>,
        fence: Handle<Fence>,
    ) {
        self.tracker
            .post_call(
                &ApiCall::QueueSubmit {
                    queue,
                    batches,
                    fence,
                },
                &CallRecord::ok(),
            )
            .unwrap();
    }

    pub fn wait_fence(&self, fence: Handle<Fence>) {
        self.tracker
            .post_call(
                &ApiCall::WaitForFences {
                    fences: vec![fence],
                    timeout_ns: u64::MAX,
                },
                &CallRecord::ok(),
            )
            .unwrap();
    }
}

pub fn test_caps() -> PhysicalDeviceCaps {
    let mut format_features = HashMap::new();
    format_features.insert(
        Format::RGBA8,
        FormatFeatureSet {
            linear: FormatFeatures::SAMPLED_IMAGE,
            optimal: FormatFeatures::SAMPLED_IMAGE
                | FormatFeatures::COLOR_ATTACHMENT
                | FormatFeatures::TRANSFER_SRC
                | FormatFeatures::TRANSFER_DST,
            buffer: FormatFeatures::empty(),
        },
    );
    format_features.insert(
        Format::BGRA8Unorm,
        FormatFeatureSet {
            linear: FormatFeatures::empty(),
            optimal: FormatFeatures::COLOR_ATTACHMENT,
            buffer: FormatFeatures::empty(),
        },
    );
    format_features.insert(
        Format::D24S8,
        FormatFeatureSet {
            linear: FormatFeatures::empty(),
            optimal: FormatFeatures::DEPTH_ATTACHMENT,
            buffer: FormatFeatures::empty(),
        },
    );
    PhysicalDeviceCaps {
        device_name: "kage-test-gpu".into(),
        api_version: 1 << 22,
        limits: DeviceLimits::default(),
        queue_families: vec![
            QueueFamilyCaps {
                flags: QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER,
                count: 1,
                timestamp_valid_bits: 64,
            },
            QueueFamilyCaps {
                flags: QueueCaps::COMPUTE | QueueCaps::TRANSFER,
                count: 1,
                timestamp_valid_bits: 64,
            },
        ],
        memory_types: vec![
            MemoryTypeCaps {
                props: MemoryProps::DEVICE_LOCAL,
                heap: 0,
            },
            MemoryTypeCaps {
                props: MemoryProps::HOST_VISIBLE | MemoryProps::HOST_COHERENT,
                heap: 1,
            },
        ],
        format_features,
    }
}
