use std::sync::Arc;

use super::descriptors::DescriptorSetLayout;
use super::structs::*;
use super::{ObjectKind, StateTracker, TrackedObject};
use crate::hooks::CallRecord;
use crate::utils::Handle;

pub struct PipelineLayout {
    pub handle: Handle<PipelineLayout>,
    pub info: PipelineLayoutInfo,
    pub set_layouts: Vec<Arc<DescriptorSetLayout>>,
}

impl TrackedObject for PipelineLayout {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::PipelineLayout
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

pub struct Pipeline {
    pub handle: Handle<Pipeline>,
    pub bind_point: PipelineBindPoint,
    pub layout: Option<Arc<PipelineLayout>>,
    /// States left dynamic by this pipeline; the complement is baked in and
    /// invalidates the command buffer's dynamic state on bind.
    pub dynamic: DynamicStateMask,
    pub debug_name: String,
}

impl TrackedObject for Pipeline {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Pipeline
    }
    fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl Pipeline {
    /// The dynamic-state bits this pipeline bakes statically.
    pub fn static_states(&self) -> DynamicStateMask {
        DynamicStateMask::all() - self.dynamic
    }
}

impl StateTracker {
    pub fn post_create_pipeline_layout(&self, info: &PipelineLayoutInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<PipelineLayout>() else {
            return;
        };
        let set_layouts = info
            .set_layouts
            .iter()
            .filter_map(|h| self.store().set_layouts.get(*h))
            .collect();
        self.store().pipeline_layouts.add(
            handle,
            PipelineLayout {
                handle,
                info: info.clone(),
                set_layouts,
            },
        );
    }

    pub fn pre_destroy_pipeline_layout(&self, layout: Handle<PipelineLayout>) {
        self.store().pipeline_layouts.destroy(layout);
    }

    pub fn post_create_graphics_pipeline(&self, info: &GraphicsPipelineInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Pipeline>() else {
            return;
        };
        self.store().pipelines.add(
            handle,
            Pipeline {
                handle,
                bind_point: PipelineBindPoint::Graphics,
                layout: self.store().pipeline_layouts.get(info.layout),
                dynamic: info.dynamic,
                debug_name: info.debug_name.clone(),
            },
        );
    }

    pub fn post_create_compute_pipeline(&self, info: &ComputePipelineInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Pipeline>() else {
            return;
        };
        self.store().pipelines.add(
            handle,
            Pipeline {
                handle,
                bind_point: PipelineBindPoint::Compute,
                layout: self.store().pipeline_layouts.get(info.layout),
                // Compute pipelines have no dynamic fixed-function state.
                dynamic: DynamicStateMask::empty(),
                debug_name: info.debug_name.clone(),
            },
        );
    }

    pub fn pre_destroy_pipeline(&self, pipeline: Handle<Pipeline>) {
        self.store().pipelines.destroy(pipeline);
    }
}
