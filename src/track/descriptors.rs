use std::sync::Arc;

use parking_lot::Mutex;

use super::resources::{AccelerationStructure, Buffer, BufferView, ImageView, Sampler};
use super::structs::*;
use super::{ObjectKind, StateTracker, TrackedObject};
use crate::hooks::CallRecord;
use crate::utils::Handle;

pub struct DescriptorSetLayout {
    pub handle: Handle<DescriptorSetLayout>,
    pub info: DescriptorSetLayoutInfo,
    /// Bindings sorted by binding index; rollover walks this order.
    bindings: Vec<DescriptorBinding>,
}

impl TrackedObject for DescriptorSetLayout {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::DescriptorSetLayout
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl DescriptorSetLayout {
    fn new(handle: Handle<DescriptorSetLayout>, info: &DescriptorSetLayoutInfo) -> Self {
        let mut bindings = info.bindings.clone();
        bindings.sort_by_key(|b| b.binding);
        Self {
            handle,
            info: info.clone(),
            bindings,
        }
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    pub fn descriptor_count(&self) -> u32 {
        self.bindings.iter().map(|b| b.count).sum()
    }
}

pub struct DescriptorPool {
    pub handle: Handle<DescriptorPool>,
    pub info: DescriptorPoolInfo,
    pub(crate) sets: Mutex<Vec<Handle<DescriptorSet>>>,
}

impl TrackedObject for DescriptorPool {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::DescriptorPool
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

/// A concrete resource held by a descriptor slot. Written-in resources are
/// held shared, so they stay alive at least as long as the set references
/// them, client destroys notwithstanding.
#[derive(Clone)]
pub enum BoundDescriptor {
    Buffer {
        buffer: Arc<Buffer>,
        offset: u64,
        range: u64,
    },
    BufferView(Arc<BufferView>),
    Image {
        view: Arc<ImageView>,
        sampler: Option<Arc<Sampler>>,
    },
    Sampler(Arc<Sampler>),
    AccelerationStructure(Arc<AccelerationStructure>),
}

pub(crate) struct BindingArray {
    pub binding: u32,
    pub ty: DescriptorType,
    pub elements: Vec<Option<BoundDescriptor>>,
}

pub struct DescriptorSet {
    pub handle: Handle<DescriptorSet>,
    pub layout: Arc<DescriptorSetLayout>,
    /// Back-reference only; the pool owns the set, never the reverse.
    pub pool: Handle<DescriptorPool>,
    pub(crate) bindings: Mutex<Vec<BindingArray>>,
}

impl TrackedObject for DescriptorSet {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::DescriptorSet
    }
}

impl DescriptorSet {
    fn new(
        handle: Handle<DescriptorSet>,
        layout: Arc<DescriptorSetLayout>,
        pool: Handle<DescriptorPool>,
    ) -> Self {
        let bindings = layout
            .bindings()
            .iter()
            .map(|b| BindingArray {
                binding: b.binding,
                ty: b.ty,
                elements: vec![None; b.count as usize],
            })
            .collect();
        Self {
            handle,
            layout,
            pool,
            bindings: Mutex::new(bindings),
        }
    }

    pub fn bound(&self, binding: u32, element: u32) -> Option<BoundDescriptor> {
        let bindings = self.bindings.lock();
        let array = bindings.iter().find(|b| b.binding == binding)?;
        array.elements.get(element as usize)?.clone()
    }

    /// Overwrite `descriptors.len()` elements starting at
    /// `(binding, array_element)`, rolling over into subsequent bindings when
    /// an array runs out. Only structural shape is checked here.
    pub(crate) fn write(
        &self,
        binding: u32,
        array_element: u32,
        ty: DescriptorType,
        descriptors: Vec<BoundDescriptor>,
    ) {
        let mut bindings = self.bindings.lock();
        let Some(mut idx) = bindings.iter().position(|b| b.binding == binding) else {
            log::trace!("write to unknown binding {} on {:?}", binding, self.handle);
            return;
        };
        let mut element = array_element as usize;
        for descriptor in descriptors {
            // Roll past exhausted (or zero-sized) arrays.
            while idx < bindings.len() && element >= bindings[idx].elements.len() {
                element = 0;
                idx += 1;
            }
            let Some(array) = bindings.get_mut(idx) else {
                log::trace!("write ran past the last binding of {:?}", self.handle);
                return;
            };
            if array.ty != ty {
                log::trace!(
                    "descriptor type mismatch at binding {} of {:?}",
                    array.binding,
                    self.handle
                );
                return;
            }
            array.elements[element] = Some(descriptor);
            element += 1;
        }
    }

    /// Read `count` elements starting at `(binding, array_element)` with the
    /// same rollover rule the write path uses.
    pub(crate) fn read_range(
        &self,
        binding: u32,
        array_element: u32,
        count: u32,
    ) -> Vec<Option<BoundDescriptor>> {
        let bindings = self.bindings.lock();
        let mut out = Vec::with_capacity(count as usize);
        let Some(mut idx) = bindings.iter().position(|b| b.binding == binding) else {
            return out;
        };
        let mut element = array_element as usize;
        for _ in 0..count {
            while idx < bindings.len() && element >= bindings[idx].elements.len() {
                element = 0;
                idx += 1;
            }
            let Some(array) = bindings.get(idx) else {
                break;
            };
            out.push(array.elements[element].clone());
            element += 1;
        }
        out
    }

    pub(crate) fn clear(&self) {
        for array in self.bindings.lock().iter_mut() {
            array.elements.fill(None);
        }
    }
}

pub struct UpdateTemplate {
    pub handle: Handle<UpdateTemplate>,
    pub info: UpdateTemplateInfo,
}

impl TrackedObject for UpdateTemplate {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::UpdateTemplate
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl StateTracker {
    pub fn post_create_descriptor_set_layout(
        &self,
        info: &DescriptorSetLayoutInfo,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<DescriptorSetLayout>() else {
            return;
        };
        self.store()
            .set_layouts
            .add(handle, DescriptorSetLayout::new(handle, info));
    }

    pub fn pre_destroy_descriptor_set_layout(&self, layout: Handle<DescriptorSetLayout>) {
        // Sets keep their layout alive through the Arc; only discovery ends.
        self.store().set_layouts.destroy(layout);
    }

    pub fn post_create_descriptor_pool(&self, info: &DescriptorPoolInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<DescriptorPool>() else {
            return;
        };
        self.store().descriptor_pools.add(
            handle,
            DescriptorPool {
                handle,
                info: info.clone(),
                sets: Mutex::new(Vec::new()),
            },
        );
    }

    pub fn pre_destroy_descriptor_pool(&self, pool: Handle<DescriptorPool>) {
        let Some(pool_state) = self.store().descriptor_pools.destroy(pool) else {
            return;
        };
        // Pool-managed lifetime: every owned set dies with the pool.
        for set in pool_state.sets.lock().drain(..) {
            if let Some(set) = self.store().descriptor_sets.destroy(set) {
                set.clear();
            }
        }
    }

    /// Reset invalidates every set the pool owns in one pass.
    pub fn post_reset_descriptor_pool(&self, pool: Handle<DescriptorPool>, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(pool_state) = self.store().descriptor_pools.get(pool) else {
            return;
        };
        for set in pool_state.sets.lock().drain(..) {
            if let Some(set) = self.store().descriptor_sets.destroy(set) {
                set.clear();
            }
        }
        log::debug!("descriptor pool {:?} reset", pool);
    }

    /// Allocation is all-or-nothing at the driver; one handle per layout.
    pub fn post_allocate_descriptor_sets(
        &self,
        pool: Handle<DescriptorPool>,
        layouts: &[Handle<DescriptorSetLayout>],
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(pool_state) = self.store().descriptor_pools.get(pool) else {
            return;
        };
        for (raw, layout) in record.handles.iter().zip(layouts.iter()) {
            let Some(layout) = self.store().set_layouts.get(*layout) else {
                continue;
            };
            let handle = Handle::new(*raw);
            self.store()
                .descriptor_sets
                .add(handle, DescriptorSet::new(handle, layout, pool));
            pool_state.sets.lock().push(handle);
        }
    }

    /// Explicit per-set free; only meaningful on pools created with the free
    /// flag, per the shape of the tracked API.
    pub fn pre_free_descriptor_sets(
        &self,
        pool: Handle<DescriptorPool>,
        sets: &[Handle<DescriptorSet>],
    ) {
        let Some(pool_state) = self.store().descriptor_pools.get(pool) else {
            return;
        };
        if !pool_state.info.allow_free {
            log::trace!("free on bulk-lifetime pool {:?} ignored", pool);
            return;
        }
        for set in sets {
            self.store().descriptor_sets.destroy(*set);
            pool_state.sets.lock().retain(|s| s != set);
        }
    }

    pub fn post_update_descriptor_sets(
        &self,
        writes: &[WriteDescriptorSet],
        copies: &[CopyDescriptorSet],
    ) {
        for write in writes {
            self.perform_write_update(write);
        }
        for copy in copies {
            self.perform_copy_update(copy);
        }
    }

    fn perform_write_update(&self, write: &WriteDescriptorSet) {
        let Some(set) = self.store().descriptor_sets.get(write.set) else {
            return;
        };
        let descriptors: Vec<BoundDescriptor> = write
            .resources
            .iter()
            .filter_map(|r| self.resolve_descriptor(r))
            .collect();
        set.write(write.binding, write.array_element, write.ty, descriptors);
    }

    /// Copy duplicates references: source keeps its own.
    fn perform_copy_update(&self, copy: &CopyDescriptorSet) {
        let Some(src) = self.store().descriptor_sets.get(copy.src_set) else {
            return;
        };
        let Some(dst) = self.store().descriptor_sets.get(copy.dst_set) else {
            return;
        };
        let elements = src.read_range(copy.src_binding, copy.src_array_element, copy.count);

        let mut bindings = dst.bindings.lock();
        let Some(mut idx) = bindings
            .iter()
            .position(|b| b.binding == copy.dst_binding)
        else {
            return;
        };
        let mut element = copy.dst_array_element as usize;
        for value in elements {
            while idx < bindings.len() && element >= bindings[idx].elements.len() {
                element = 0;
                idx += 1;
            }
            let Some(array) = bindings.get_mut(idx) else {
                return;
            };
            array.elements[element] = value;
            element += 1;
        }
    }

    pub fn post_create_update_template(&self, info: &UpdateTemplateInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<UpdateTemplate>() else {
            return;
        };
        self.store().update_templates.add(
            handle,
            UpdateTemplate {
                handle,
                info: info.clone(),
            },
        );
    }

    pub fn pre_destroy_update_template(&self, template: Handle<UpdateTemplate>) {
        self.store().update_templates.destroy(template);
    }

    /// Replays the template's entries against `resources`, consuming them in
    /// entry order.
    pub fn post_update_with_template(
        &self,
        set: Handle<DescriptorSet>,
        template: Handle<UpdateTemplate>,
        resources: &[DescriptorResource],
    ) {
        let Some(template) = self.store().update_templates.get(template) else {
            return;
        };
        let mut cursor = resources.iter();
        for entry in &template.info.entries {
            let chunk: Vec<DescriptorResource> =
                cursor.by_ref().take(entry.count as usize).copied().collect();
            if chunk.is_empty() {
                break;
            }
            self.perform_write_update(&WriteDescriptorSet {
                set,
                binding: entry.binding,
                array_element: entry.array_element,
                ty: entry.ty,
                resources: chunk,
            });
        }
    }

    fn resolve_descriptor(&self, resource: &DescriptorResource) -> Option<BoundDescriptor> {
        match resource {
            DescriptorResource::Buffer {
                buffer,
                offset,
                range,
            } => Some(BoundDescriptor::Buffer {
                buffer: self.store().buffers.get(*buffer)?,
                offset: *offset,
                range: *range,
            }),
            DescriptorResource::BufferView(view) => Some(BoundDescriptor::BufferView(
                self.store().buffer_views.get(*view)?,
            )),
            DescriptorResource::Image { view, sampler } => Some(BoundDescriptor::Image {
                view: self.store().image_views.get(*view)?,
                sampler: sampler.and_then(|s| self.store().samplers.get(s)),
            }),
            DescriptorResource::Sampler(sampler) => Some(BoundDescriptor::Sampler(
                self.store().samplers.get(*sampler)?,
            )),
            DescriptorResource::AccelerationStructure(accel) => Some(
                BoundDescriptor::AccelerationStructure(self.store().accel_structs.get(*accel)?),
            ),
        }
    }
}
