use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::device::{Device, FormatFeatureSet};
use super::structs::*;
use super::swapchain::Swapchain;
use super::{ObjectKind, StateTracker, TrackedObject};
use crate::hooks::CallRecord;
use crate::utils::Handle;

/// A resource registered on its memory for reverse enumeration at free time.
/// The reverse index never owns its children.
pub struct BoundChild {
    pub kind: ObjectKind,
    pub raw: u64,
    pub child: Weak<dyn TrackedObject>,
    pub offset: u64,
    pub byte_size: u64,
}

pub struct Memory {
    pub handle: Handle<Memory>,
    pub info: MemoryAllocInfo,
    pub(crate) bound: Mutex<Vec<BoundChild>>,
}

impl TrackedObject for Memory {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Memory
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl Memory {
    /// Live resources currently bound to this allocation.
    pub fn bound_children(&self) -> Vec<Arc<dyn TrackedObject>> {
        self.bound
            .lock()
            .iter()
            .filter_map(|c| c.child.upgrade())
            .collect()
    }

    fn register(&self, child: BoundChild) {
        self.bound.lock().push(child);
    }

    fn unregister(&self, kind: ObjectKind, raw: u64) {
        self.bound
            .lock()
            .retain(|c| !(c.kind == kind && c.raw == raw));
    }
}

/// The binding tuple a resource records against its memory. The `Arc` keeps
/// the memory state alive for as long as any bound resource survives, even
/// after the client frees the allocation.
#[derive(Clone)]
pub struct MemoryBinding {
    pub memory: Arc<Memory>,
    pub offset: u64,
    pub byte_size: u64,
}

/// Non-sparse resources bind at most once; sparse resources hold a bounded
/// set of disjoint ranges.
#[derive(Default)]
pub enum ResourceBinding {
    #[default]
    Unbound,
    Bound(MemoryBinding),
    Sparse(Vec<MemoryBinding>),
}

/// Where a buffer's device address landed in the per-device interval map.
#[derive(Debug, Clone, Copy)]
pub struct DeviceAddress {
    pub address: u64,
    pub(crate) interval: u64,
}

pub struct Buffer {
    pub handle: Handle<Buffer>,
    pub device: Handle<Device>,
    pub info: BufferInfo,
    pub(crate) binding: Mutex<ResourceBinding>,
    pub(crate) address: Mutex<Option<DeviceAddress>>,
}

impl TrackedObject for Buffer {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Buffer
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl Buffer {
    pub fn binding(&self) -> Option<MemoryBinding> {
        match &*self.binding.lock() {
            ResourceBinding::Bound(b) => Some(b.clone()),
            _ => None,
        }
    }

    pub fn sparse_bindings(&self) -> Vec<MemoryBinding> {
        match &*self.binding.lock() {
            ResourceBinding::Sparse(v) => v.clone(),
            _ => Vec::new(),
        }
    }

    pub fn device_address(&self) -> Option<u64> {
        self.address.lock().map(|a| a.address)
    }
}

pub struct Image {
    pub handle: Handle<Image>,
    pub device: Handle<Device>,
    pub info: ImageInfo,
    /// Resolved once at creation; immutable afterwards.
    pub features: FormatFeatureSet,
    /// Swapchain images alias their swapchain slot instead of binding memory.
    pub swapchain: Option<(Handle<Swapchain>, u32)>,
    pub(crate) binding: Mutex<ResourceBinding>,
}

impl TrackedObject for Image {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Image
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl Image {
    pub fn binding(&self) -> Option<MemoryBinding> {
        match &*self.binding.lock() {
            ResourceBinding::Bound(b) => Some(b.clone()),
            _ => None,
        }
    }
}

pub struct BufferView {
    pub handle: Handle<BufferView>,
    pub info: BufferViewInfo,
    pub buffer: Arc<Buffer>,
    pub features: FormatFeatureSet,
}

impl TrackedObject for BufferView {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::BufferView
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

pub struct ImageView {
    pub handle: Handle<ImageView>,
    pub info: ImageViewInfo,
    pub image: Arc<Image>,
}

impl TrackedObject for ImageView {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::ImageView
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

pub struct Sampler {
    pub handle: Handle<Sampler>,
    pub info: SamplerInfo,
}

impl TrackedObject for Sampler {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Sampler
    }
}

pub struct AccelerationStructure {
    pub handle: Handle<AccelerationStructure>,
    pub info: AccelStructInfo,
    /// Backing storage; held shared so the buffer outlives client destroys.
    pub buffer: Option<Arc<Buffer>>,
    pub(crate) built: std::sync::atomic::AtomicBool,
}

impl TrackedObject for AccelerationStructure {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::AccelerationStructure
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl AccelerationStructure {
    pub fn is_built(&self) -> bool {
        self.built.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl StateTracker {
    pub fn post_allocate_memory(
        &self,
        _device: Handle<Device>,
        info: &MemoryAllocInfo,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Memory>() else {
            return;
        };
        log::trace!("tracking memory {:?} ({} bytes)", handle, info.byte_size);
        self.store().memories.add(
            handle,
            Memory {
                handle,
                info: info.clone(),
                bound: Mutex::new(Vec::new()),
            },
        );
    }

    /// Freeing memory with children still bound is not our problem to flag:
    /// the bookkeeping is dropped and the rule engine sees the evidence via
    /// the bindings the children still hold.
    pub fn pre_free_memory(&self, memory: Handle<Memory>) {
        if self.store().memories.destroy(memory).is_some() {
            log::trace!("untracked memory {:?}", memory);
        }
    }

    pub fn post_create_buffer(
        &self,
        device: Handle<Device>,
        info: &BufferInfo,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Buffer>() else {
            return;
        };
        log::trace!("tracking buffer {:?} ({})", handle, info.debug_name);
        self.store().buffers.add(
            handle,
            Buffer {
                handle,
                device,
                info: info.clone(),
                binding: Mutex::new(ResourceBinding::Unbound),
                address: Mutex::new(None),
            },
        );
    }

    pub fn pre_destroy_buffer(&self, buffer: Handle<Buffer>) {
        let Some(buf) = self.store().buffers.destroy(buffer) else {
            return;
        };
        if let Some(binding) = buf.binding() {
            binding.memory.unregister(ObjectKind::Buffer, buffer.raw);
        }
        for binding in buf.sparse_bindings() {
            binding.memory.unregister(ObjectKind::Buffer, buffer.raw);
        }
        let address = *buf.address.lock();
        if let Some(address) = address {
            if let Some(dev) = self.store().devices.get(buf.device) {
                dev.address_map.lock().remove(address.interval, buffer);
            }
        }
        log::trace!("untracked buffer {:?}", buffer);
    }

    pub fn post_bind_buffer_memory(
        &self,
        buffer: Handle<Buffer>,
        memory: Handle<Memory>,
        offset: u64,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(buf) = self.store().buffers.get(buffer) else {
            return;
        };
        let Some(mem) = self.store().memories.get(memory) else {
            return;
        };
        let byte_size = buf.info.byte_size;
        {
            let mut binding = buf.binding.lock();
            if !matches!(*binding, ResourceBinding::Unbound) {
                // Rebinding a non-sparse resource is the client's mistake;
                // record the latest tuple and move on.
                log::trace!("buffer {:?} rebound to {:?}", buffer, memory);
            }
            *binding = ResourceBinding::Bound(MemoryBinding {
                memory: Arc::clone(&mem),
                offset,
                byte_size,
            });
        }
        let child: Arc<dyn TrackedObject> = buf.clone();
        mem.register(BoundChild {
            kind: ObjectKind::Buffer,
            raw: buffer.raw,
            child: Arc::downgrade(&child),
            offset,
            byte_size,
        });
    }

    /// Sparse path: each bind appends a disjoint range. Overlapping ranges
    /// are dropped from the bookkeeping (shape only; legality is downstream).
    pub fn post_bind_buffer_sparse(
        &self,
        buffer: Handle<Buffer>,
        memory: Handle<Memory>,
        binds: &[SparseBind],
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(buf) = self.store().buffers.get(buffer) else {
            return;
        };
        let Some(mem) = self.store().memories.get(memory) else {
            return;
        };
        let mut binding = buf.binding.lock();
        if matches!(*binding, ResourceBinding::Unbound) {
            *binding = ResourceBinding::Sparse(Vec::new());
        }
        let ResourceBinding::Sparse(ranges) = &mut *binding else {
            log::trace!("sparse bind on non-sparse buffer {:?}", buffer);
            return;
        };
        for bind in binds {
            let start = bind.resource_offset;
            let end = start + bind.byte_size;
            let overlaps = ranges.iter().any(|r| {
                let rs = r.offset;
                let re = r.offset + r.byte_size;
                start < re && rs < end
            });
            if overlaps {
                log::trace!("overlapping sparse bind on {:?} skipped", buffer);
                continue;
            }
            ranges.push(MemoryBinding {
                memory: Arc::clone(&mem),
                offset: bind.resource_offset,
                byte_size: bind.byte_size,
            });
            let child: Arc<dyn TrackedObject> = buf.clone();
            mem.register(BoundChild {
                kind: ObjectKind::Buffer,
                raw: buffer.raw,
                child: Arc::downgrade(&child),
                offset: bind.memory_offset,
                byte_size: bind.byte_size,
            });
        }
    }

    /// The record carries the address the driver handed back.
    pub fn post_get_buffer_device_address(&self, buffer: Handle<Buffer>, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(buf) = self.store().buffers.get(buffer) else {
            return;
        };
        let Some(address) = record.handles.first().copied().filter(|a| *a != 0) else {
            return;
        };
        let Some(dev) = self.store().devices.get(buf.device) else {
            return;
        };
        let interval =
            dev.address_map
                .lock()
                .insert(address, address + buf.info.byte_size, buffer);
        *buf.address.lock() = Some(DeviceAddress { address, interval });
    }

    pub fn post_create_image(
        &self,
        device: Handle<Device>,
        info: &ImageInfo,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Image>() else {
            return;
        };
        let features = self
            .store()
            .devices
            .get(device)
            .map(|dev| dev.resolve_format_features(info.format, info.external_format))
            .unwrap_or_default();
        log::trace!("tracking image {:?} ({})", handle, info.debug_name);
        self.store().images.add(
            handle,
            Image {
                handle,
                device,
                info: info.clone(),
                features,
                swapchain: None,
                binding: Mutex::new(ResourceBinding::Unbound),
            },
        );
    }

    pub fn pre_destroy_image(&self, image: Handle<Image>) {
        let Some(img) = self.store().images.destroy(image) else {
            return;
        };
        if let Some(binding) = img.binding() {
            binding.memory.unregister(ObjectKind::Image, image.raw);
        }
        log::trace!("untracked image {:?}", image);
    }

    pub fn post_bind_image_memory(
        &self,
        image: Handle<Image>,
        memory: Handle<Memory>,
        offset: u64,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(img) = self.store().images.get(image) else {
            return;
        };
        let Some(mem) = self.store().memories.get(memory) else {
            return;
        };
        // Shadow images do not know their driver-side allocation size; the
        // binding covers the remainder of the allocation past `offset`.
        let byte_size = mem.info.byte_size.saturating_sub(offset);
        *img.binding.lock() = ResourceBinding::Bound(MemoryBinding {
            memory: Arc::clone(&mem),
            offset,
            byte_size,
        });
        let child: Arc<dyn TrackedObject> = img.clone();
        mem.register(BoundChild {
            kind: ObjectKind::Image,
            raw: image.raw,
            child: Arc::downgrade(&child),
            offset,
            byte_size,
        });
    }

    pub fn post_create_buffer_view(
        &self,
        device: Handle<Device>,
        info: &BufferViewInfo,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<BufferView>() else {
            return;
        };
        let Some(buffer) = self.store().buffers.get(info.buffer) else {
            return;
        };
        let features = self
            .store()
            .devices
            .get(device)
            .map(|dev| dev.resolve_format_features(info.format, None))
            .unwrap_or_default();
        self.store().buffer_views.add(
            handle,
            BufferView {
                handle,
                info: info.clone(),
                buffer,
                features,
            },
        );
    }

    pub fn pre_destroy_buffer_view(&self, view: Handle<BufferView>) {
        self.store().buffer_views.destroy(view);
    }

    pub fn post_create_image_view(&self, info: &ImageViewInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<ImageView>() else {
            return;
        };
        let Some(image) = self.store().images.get(info.image) else {
            return;
        };
        self.store().image_views.add(
            handle,
            ImageView {
                handle,
                info: info.clone(),
                image,
            },
        );
    }

    pub fn pre_destroy_image_view(&self, view: Handle<ImageView>) {
        self.store().image_views.destroy(view);
    }

    pub fn post_create_sampler(&self, info: &SamplerInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Sampler>() else {
            return;
        };
        self.store().samplers.add(handle, Sampler { handle, info: *info });
    }

    pub fn pre_destroy_sampler(&self, sampler: Handle<Sampler>) {
        self.store().samplers.destroy(sampler);
    }

    pub fn post_create_acceleration_structure(&self, info: &AccelStructInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<AccelerationStructure>() else {
            return;
        };
        let buffer = self.store().buffers.get(info.buffer);
        self.store().accel_structs.add(
            handle,
            AccelerationStructure {
                handle,
                info: info.clone(),
                buffer,
                built: std::sync::atomic::AtomicBool::new(false),
            },
        );
    }

    pub fn pre_destroy_acceleration_structure(&self, accel: Handle<AccelerationStructure>) {
        self.store().accel_structs.destroy(accel);
    }
}
