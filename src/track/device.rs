use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::address_map::AddressMap;
use super::queue::Queue;
use super::structs::*;
use super::{ObjectKind, StateTracker, TrackedObject};
use crate::hooks::CallRecord;
use crate::utils::Handle;

/// Limits the capability snapshot exposes to resource creation. A small,
/// fixed subset; the rule engine owns anything fancier.
#[derive(Debug, Clone)]
pub struct DeviceLimits {
    pub max_image_dimension_2d: u32,
    pub max_image_array_layers: u32,
    pub max_bound_descriptor_sets: u32,
    pub max_memory_allocation_count: u32,
    pub max_sampler_allocation_count: u32,
    pub min_uniform_buffer_offset_alignment: u64,
    pub min_storage_buffer_offset_alignment: u64,
    pub max_timeline_semaphore_value_difference: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_image_dimension_2d: 16384,
            max_image_array_layers: 2048,
            max_bound_descriptor_sets: 8,
            max_memory_allocation_count: 4096,
            max_sampler_allocation_count: 4000,
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 64,
            max_timeline_semaphore_value_difference: u64::MAX >> 1,
        }
    }
}

/// Per-format feature sets for the three access paths a format can have.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatFeatureSet {
    pub linear: FormatFeatures,
    pub optimal: FormatFeatures,
    pub buffer: FormatFeatures,
}

#[derive(Debug, Clone, Default)]
pub struct QueueFamilyCaps {
    pub flags: QueueCaps,
    pub count: u32,
    pub timestamp_valid_bits: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTypeCaps {
    pub props: MemoryProps,
    pub heap: u32,
}

/// Everything the tracker is allowed to ask the driver: immutable capability
/// data, captured once at enumeration and read-only thereafter.
#[derive(Debug, Clone, Default)]
pub struct PhysicalDeviceCaps {
    pub device_name: String,
    pub api_version: u32,
    pub limits: DeviceLimits,
    pub queue_families: Vec<QueueFamilyCaps>,
    pub memory_types: Vec<MemoryTypeCaps>,
    pub format_features: HashMap<Format, FormatFeatureSet>,
}

pub struct PhysicalDevice {
    pub handle: Handle<PhysicalDevice>,
    pub caps: PhysicalDeviceCaps,
}

impl TrackedObject for PhysicalDevice {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::PhysicalDevice
    }
    fn debug_name(&self) -> &str {
        &self.caps.device_name
    }
}

impl PhysicalDevice {
    /// Feature set for a format, or the empty set for formats the snapshot
    /// never heard of (the rule engine flags those, not us).
    pub fn format_features(&self, format: Format) -> FormatFeatureSet {
        self.caps
            .format_features
            .get(&format)
            .copied()
            .unwrap_or_default()
    }
}

pub struct Device {
    pub handle: Handle<Device>,
    pub info: DeviceInfo,
    /// Referenced, never copied: the snapshot is shared with the physical
    /// device record for the life of the device.
    pub physical: Arc<PhysicalDevice>,
    /// Feature sets for externally imported formats, keyed by the opaque
    /// platform format id. Populated by the import hook.
    pub external_formats: DashMap<u64, FormatFeatureSet>,
    /// Interval map of buffer device addresses. Guarded separately from any
    /// per-object lock; operations on many different buffers touch it.
    pub address_map: Mutex<AddressMap>,
    pub(crate) queues: Mutex<Vec<Arc<Queue>>>,
}

impl TrackedObject for Device {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Device
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl Device {
    /// Resolve format features the way resource creation needs them: the
    /// external cache for imported formats, the snapshot otherwise.
    pub fn resolve_format_features(
        &self,
        format: Format,
        external_format: Option<u64>,
    ) -> FormatFeatureSet {
        if let Some(ext) = external_format {
            return self
                .external_formats
                .get(&ext)
                .map(|e| *e)
                .unwrap_or_default();
        }
        self.physical.format_features(format)
    }

    /// Queues of this device in creation order.
    pub fn queues(&self) -> Vec<Arc<Queue>> {
        let mut queues = self.queues.lock().clone();
        queues.sort_by_key(|q| q.order);
        queues
    }
}

impl StateTracker {
    /// Post-hook for physical device enumeration. `caps` lines up with the
    /// handles in the record; extras on either side are ignored.
    pub fn post_enumerate_physical_devices(&self, caps: &[PhysicalDeviceCaps], record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        for (raw, caps) in record.handles.iter().zip(caps.iter()) {
            let handle = Handle::new(*raw);
            if self.store().physical_devices.contains(handle) {
                // Re-enumeration returns the same handles; the snapshot is
                // immutable, so the existing record stands.
                continue;
            }
            log::trace!("tracking physical device {:#x} ({})", raw, caps.device_name);
            self.store().physical_devices.add(
                handle,
                PhysicalDevice {
                    handle,
                    caps: caps.clone(),
                },
            );
        }
    }

    pub fn post_create_device(
        &self,
        physical: Handle<PhysicalDevice>,
        info: &DeviceInfo,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(physical) = self.store().physical_devices.get(physical) else {
            return;
        };
        let Some(handle) = record.first_handle::<Device>() else {
            return;
        };
        log::trace!("tracking device {:?} ({})", handle, info.debug_name);
        self.store().devices.add(
            handle,
            Device {
                handle,
                info: info.clone(),
                physical,
                external_formats: DashMap::new(),
                address_map: Mutex::new(AddressMap::default()),
                queues: Mutex::new(Vec::new()),
            },
        );
    }

    /// Pre-hook: the handle must still resolve while we tear down.
    pub fn pre_destroy_device(&self, device: Handle<Device>) {
        if let Some(dev) = self.store().devices.destroy(device) {
            let queues = dev.queues.lock();
            for queue in queues.iter() {
                self.store().queues.destroy(queue.handle);
            }
            log::trace!("untracked device {:?}", device);
        }
    }

    pub fn post_get_device_queue(
        &self,
        device: Handle<Device>,
        family: u32,
        index: u32,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(dev) = self.store().devices.get(device) else {
            return;
        };
        let Some(handle) = record.first_handle::<Queue>() else {
            return;
        };
        if self.store().queues.contains(handle) {
            // Fetching the same queue twice hands back the same handle.
            return;
        }
        let queue = self.store().queues.add(
            handle,
            Queue::new(handle, device, family, index, self.next_queue_order()),
        );
        dev.queues.lock().push(queue);
    }

    /// Post-hook for an external-format import query: caches the feature set
    /// under the opaque platform format id.
    pub fn post_import_external_format(
        &self,
        device: Handle<Device>,
        external_format: u64,
        features: FormatFeatureSet,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        if let Some(dev) = self.store().devices.get(device) {
            dev.external_formats.insert(external_format, features);
        }
    }
}
