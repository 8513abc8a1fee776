use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::descriptors::DescriptorSet;
use super::pipeline::{Pipeline, PipelineLayout};
use super::resources::{AccelerationStructure, Buffer, Image};
use super::structs::*;
use super::sync::{Event, QueryPool};
use super::{ObjectKind, StateTracker, TrackedObject};
use crate::hooks::CallRecord;
use crate::utils::Handle;

/// Lifecycle of a command buffer. Transitions are driven entirely by hooks:
/// `begin` (initial/executable -> recording), `end` (recording -> executable),
/// submit (executable -> pending), completion (pending -> executable, or
/// invalid for one-time-submit), reset (any -> initial).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbState {
    Initial,
    Recording,
    Executable,
    Pending,
    Invalid,
}

/// One recorded operation. Commands are data (an IR), not behavior; the
/// tracker replays them only for bookkeeping at submit/retire time.
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    BindPipeline {
        bind_point: PipelineBindPoint,
        pipeline: Handle<Pipeline>,
    },
    BindDescriptorSets {
        bind_point: PipelineBindPoint,
        layout: Handle<PipelineLayout>,
        first_set: u32,
        sets: Vec<Handle<DescriptorSet>>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<Handle<Buffer>>,
    },
    BindIndexBuffer {
        buffer: Handle<Buffer>,
        offset: u64,
    },
    SetViewport(Viewport),
    SetScissor(Rect2D),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: Handle<Buffer>,
        dst: Handle<Buffer>,
        src_offset: u64,
        dst_offset: u64,
        byte_size: u64,
    },
    CopyImage {
        src: Handle<Image>,
        dst: Handle<Image>,
    },
    CopyBufferToImage {
        src: Handle<Buffer>,
        dst: Handle<Image>,
    },
    PipelineBarrier {
        buffers: Vec<Handle<Buffer>>,
        images: Vec<Handle<Image>>,
    },
    BeginLabel {
        label: String,
    },
    EndLabel,
    SetEvent {
        event: Handle<Event>,
    },
    ResetEvent {
        event: Handle<Event>,
    },
    BeginQuery {
        pool: Handle<QueryPool>,
        query: u32,
    },
    EndQuery {
        pool: Handle<QueryPool>,
        query: u32,
    },
    ResetQueryPool {
        pool: Handle<QueryPool>,
        first: u32,
        count: u32,
    },
    BuildAccelerationStructure {
        dst: Handle<AccelerationStructure>,
        scratch: Handle<Buffer>,
    },
    ExecuteCommands {
        buffers: Vec<Handle<CommandBuffer>>,
    },
}

/// Side effects a recorded command applies when its submission retires.
/// Captured with shared refs at record time so retire never needs the store.
#[derive(Clone)]
pub(crate) enum DeviceEffect {
    SetEvent(Arc<Event>, bool),
    QueryBegin(Arc<QueryPool>, u32),
    QueryEnd(Arc<QueryPool>, u32),
    QueryReset(Arc<QueryPool>, u32, u32),
    AccelBuilt(Arc<AccelerationStructure>),
}

/// Per-recording scratch. Reset wholesale by `begin`.
#[derive(Default)]
pub(crate) struct RecordingState {
    pub commands: Vec<RecordedCommand>,
    /// Weak accumulation of everything the recorded commands touch. Lifetime
    /// bookkeeping only, never ownership semantics beyond keeping the shadow
    /// record alive.
    pub children: Vec<Arc<dyn TrackedObject>>,
    pub effects: Vec<DeviceEffect>,
    pub bound_pipelines: HashMap<PipelineBindPoint, Arc<Pipeline>>,
    pub bound_sets: HashMap<(PipelineBindPoint, u32), Arc<DescriptorSet>>,
    pub index_buffer: Option<Arc<Buffer>>,
    /// Which dynamic states have been set since `begin` (or since the last
    /// pipeline bind trashed them).
    pub dynamic_valid: DynamicStateMask,
    /// Which pipeline bind trashed each dynamic-state bit, for attributing a
    /// later violation to the bind that caused it.
    pub dynamic_trashed: Vec<(DynamicStateMask, Handle<Pipeline>)>,
    pub labels: Vec<String>,
}

pub struct CommandPool {
    pub handle: Handle<CommandPool>,
    pub info: CommandPoolInfo,
    pub(crate) buffers: Mutex<Vec<Handle<CommandBuffer>>>,
}

impl TrackedObject for CommandPool {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::CommandPool
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

pub struct CommandBuffer {
    pub handle: Handle<CommandBuffer>,
    pub pool: Handle<CommandPool>,
    pub level: CommandBufferLevel,
    state: Mutex<CbState>,
    pub(crate) rec: Mutex<RecordingState>,
    one_time: AtomicBool,
    submit_count: AtomicU64,
}

impl TrackedObject for CommandBuffer {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::CommandBuffer
    }
}

impl CommandBuffer {
    fn new(handle: Handle<CommandBuffer>, pool: Handle<CommandPool>, level: CommandBufferLevel) -> Self {
        Self {
            handle,
            pool,
            level,
            state: Mutex::new(CbState::Initial),
            rec: Mutex::new(RecordingState::default()),
            one_time: AtomicBool::new(false),
            submit_count: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CbState {
        *self.state.lock()
    }

    pub fn is_one_time(&self) -> bool {
        self.one_time.load(Ordering::Acquire)
    }

    pub fn submit_count(&self) -> u64 {
        self.submit_count.load(Ordering::Acquire)
    }

    pub fn children(&self) -> Vec<Arc<dyn TrackedObject>> {
        self.rec.lock().children.clone()
    }

    pub fn bound_pipeline(&self, bind_point: PipelineBindPoint) -> Option<Arc<Pipeline>> {
        self.rec.lock().bound_pipelines.get(&bind_point).cloned()
    }

    pub fn bound_descriptor_set(
        &self,
        bind_point: PipelineBindPoint,
        slot: u32,
    ) -> Option<Arc<DescriptorSet>> {
        self.rec.lock().bound_sets.get(&(bind_point, slot)).cloned()
    }

    pub fn bound_index_buffer(&self) -> Option<Arc<Buffer>> {
        self.rec.lock().index_buffer.clone()
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.rec.lock().commands.clone()
    }

    pub fn dynamic_valid(&self) -> DynamicStateMask {
        self.rec.lock().dynamic_valid
    }

    /// The pipeline bind that last trashed `bit`, if any.
    pub fn trashed_by(&self, bit: DynamicStateMask) -> Option<Handle<Pipeline>> {
        self.rec
            .lock()
            .dynamic_trashed
            .iter()
            .rev()
            .find(|(mask, _)| mask.contains(bit))
            .map(|(_, pipeline)| *pipeline)
    }

    pub(crate) fn on_begin(&self, one_time: bool) {
        *self.rec.lock() = RecordingState::default();
        self.one_time.store(one_time, Ordering::Release);
        *self.state.lock() = CbState::Recording;
    }

    pub(crate) fn on_end(&self) {
        let mut state = self.state.lock();
        if *state != CbState::Recording {
            // The collaborator rejects an end outside a recording; our shadow
            // just declines to move.
            log::trace!("end on {:?} while {:?}", self.handle, *state);
            return;
        }
        *state = CbState::Executable;
    }

    pub(crate) fn on_reset(&self) {
        *self.rec.lock() = RecordingState::default();
        self.one_time.store(false, Ordering::Release);
        *self.state.lock() = CbState::Initial;
    }

    pub(crate) fn on_submit(&self) {
        self.submit_count.fetch_add(1, Ordering::AcqRel);
        *self.state.lock() = CbState::Pending;
    }

    /// Completion notification: resettable buffers go back to executable,
    /// one-time-submit buffers are spent.
    pub(crate) fn on_retired(&self) {
        let mut state = self.state.lock();
        if *state != CbState::Pending {
            return;
        }
        *state = if self.is_one_time() {
            CbState::Invalid
        } else {
            CbState::Executable
        };
    }

    pub(crate) fn invalidate(&self) {
        *self.state.lock() = CbState::Invalid;
    }
}

impl StateTracker {
    pub fn post_create_command_pool(&self, info: &CommandPoolInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<CommandPool>() else {
            return;
        };
        self.store().command_pools.add(
            handle,
            CommandPool {
                handle,
                info: info.clone(),
                buffers: Mutex::new(Vec::new()),
            },
        );
    }

    /// Destroying a pool takes its outstanding buffers with it.
    pub fn pre_destroy_command_pool(&self, pool: Handle<CommandPool>) {
        let Some(pool_state) = self.store().command_pools.destroy(pool) else {
            return;
        };
        for buffer in pool_state.buffers.lock().drain(..) {
            if let Some(cb) = self.store().command_buffers.destroy(buffer) {
                cb.invalidate();
            }
        }
    }

    /// Pool reset returns every owned buffer to the initial state.
    pub fn post_reset_command_pool(&self, pool: Handle<CommandPool>, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(pool_state) = self.store().command_pools.get(pool) else {
            return;
        };
        for buffer in pool_state.buffers.lock().iter() {
            if let Some(cb) = self.store().command_buffers.get(*buffer) {
                cb.on_reset();
            }
        }
    }

    pub fn post_allocate_command_buffers(
        &self,
        pool: Handle<CommandPool>,
        level: CommandBufferLevel,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(pool_state) = self.store().command_pools.get(pool) else {
            return;
        };
        for raw in &record.handles {
            let handle = Handle::new(*raw);
            self.store()
                .command_buffers
                .add(handle, CommandBuffer::new(handle, pool, level));
            pool_state.buffers.lock().push(handle);
        }
    }

    pub fn pre_free_command_buffers(
        &self,
        pool: Handle<CommandPool>,
        buffers: &[Handle<CommandBuffer>],
    ) {
        let pool_state = self.store().command_pools.get(pool);
        for buffer in buffers {
            self.store().command_buffers.destroy(*buffer);
            if let Some(pool_state) = &pool_state {
                pool_state.buffers.lock().retain(|b| b != buffer);
            }
        }
    }

    pub fn post_begin_command_buffer(
        &self,
        buffer: Handle<CommandBuffer>,
        one_time: bool,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        if let Some(cb) = self.store().command_buffers.get(buffer) {
            cb.on_begin(one_time);
        }
    }

    pub fn post_end_command_buffer(&self, buffer: Handle<CommandBuffer>, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        if let Some(cb) = self.store().command_buffers.get(buffer) {
            cb.on_end();
        }
    }

    pub fn post_reset_command_buffer(&self, buffer: Handle<CommandBuffer>, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        if let Some(cb) = self.store().command_buffers.get(buffer) {
            cb.on_reset();
        }
    }

    /// Append one command to the buffer's log, accumulate the resources it
    /// references into the child set, and fold in any per-command tracking
    /// (bound state caches, dynamic-state validity, retire-time effects).
    pub fn post_record_command(&self, buffer: Handle<CommandBuffer>, command: &RecordedCommand) {
        let Some(cb) = self.store().command_buffers.get(buffer) else {
            return;
        };
        if cb.state() != CbState::Recording {
            log::trace!("command on {:?} outside a recording", buffer);
            return;
        }
        let mut rec = cb.rec.lock();
        self.track_command(&mut rec, command);
        rec.commands.push(command.clone());
    }

    fn track_command(&self, rec: &mut RecordingState, command: &RecordedCommand) {
        let store = self.store();
        match command {
            RecordedCommand::BindPipeline {
                bind_point,
                pipeline,
            } => {
                let Some(pipeline_state) = store.pipelines.get(*pipeline) else {
                    return;
                };
                // Every state the new pipeline bakes statically is no longer
                // valid, and this bind is what trashed it.
                let statics = pipeline_state.static_states();
                if rec.dynamic_valid.intersects(statics) {
                    rec.dynamic_trashed
                        .push((rec.dynamic_valid & statics, *pipeline));
                }
                rec.dynamic_valid -= statics;
                rec.children.push(pipeline_state.clone());
                rec.bound_pipelines.insert(*bind_point, pipeline_state);
            }
            RecordedCommand::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets,
            } => {
                if let Some(layout) = store.pipeline_layouts.get(*layout) {
                    rec.children.push(layout);
                }
                for (i, set) in sets.iter().enumerate() {
                    let Some(set_state) = store.descriptor_sets.get(*set) else {
                        continue;
                    };
                    rec.children
                        .push(set_state.clone());
                    rec.bound_sets
                        .insert((*bind_point, *first_set + i as u32), set_state);
                }
            }
            RecordedCommand::BindVertexBuffers { buffers, .. } => {
                for buffer in buffers {
                    if let Some(buf) = store.buffers.get(*buffer) {
                        rec.children.push(buf);
                    }
                }
            }
            RecordedCommand::BindIndexBuffer { buffer, .. } => {
                if let Some(buf) = store.buffers.get(*buffer) {
                    rec.index_buffer = Some(Arc::clone(&buf));
                    rec.children.push(buf);
                }
            }
            RecordedCommand::SetViewport(_) => {
                rec.dynamic_valid |= DynamicStateMask::VIEWPORT;
            }
            RecordedCommand::SetScissor(_) => {
                rec.dynamic_valid |= DynamicStateMask::SCISSOR;
            }
            RecordedCommand::Draw { .. }
            | RecordedCommand::DrawIndexed { .. }
            | RecordedCommand::Dispatch { .. } => {}
            RecordedCommand::CopyBuffer { src, dst, .. } => {
                if let Some(buf) = store.buffers.get(*src) {
                    rec.children.push(buf);
                }
                if let Some(buf) = store.buffers.get(*dst) {
                    rec.children.push(buf);
                }
            }
            RecordedCommand::CopyImage { src, dst } => {
                if let Some(img) = store.images.get(*src) {
                    rec.children.push(img);
                }
                if let Some(img) = store.images.get(*dst) {
                    rec.children.push(img);
                }
            }
            RecordedCommand::CopyBufferToImage { src, dst } => {
                if let Some(buf) = store.buffers.get(*src) {
                    rec.children.push(buf);
                }
                if let Some(img) = store.images.get(*dst) {
                    rec.children.push(img);
                }
            }
            RecordedCommand::PipelineBarrier { buffers, images } => {
                for buffer in buffers {
                    if let Some(buf) = store.buffers.get(*buffer) {
                        rec.children.push(buf);
                    }
                }
                for image in images {
                    if let Some(img) = store.images.get(*image) {
                        rec.children.push(img);
                    }
                }
            }
            RecordedCommand::BeginLabel { label } => {
                rec.labels.push(label.clone());
            }
            RecordedCommand::EndLabel => {
                if rec.labels.pop().is_none() {
                    log::trace!("unbalanced label end");
                }
            }
            RecordedCommand::SetEvent { event } => {
                if let Some(ev) = store.events.get(*event) {
                    rec.children.push(ev.clone());
                    rec.effects.push(DeviceEffect::SetEvent(ev, true));
                }
            }
            RecordedCommand::ResetEvent { event } => {
                if let Some(ev) = store.events.get(*event) {
                    rec.children.push(ev.clone());
                    rec.effects.push(DeviceEffect::SetEvent(ev, false));
                }
            }
            RecordedCommand::BeginQuery { pool, query } => {
                if let Some(qp) = store.query_pools.get(*pool) {
                    rec.children.push(qp.clone());
                    rec.effects.push(DeviceEffect::QueryBegin(qp, *query));
                }
            }
            RecordedCommand::EndQuery { pool, query } => {
                if let Some(qp) = store.query_pools.get(*pool) {
                    rec.effects.push(DeviceEffect::QueryEnd(qp, *query));
                }
            }
            RecordedCommand::ResetQueryPool { pool, first, count } => {
                if let Some(qp) = store.query_pools.get(*pool) {
                    rec.children.push(qp.clone());
                    rec.effects
                        .push(DeviceEffect::QueryReset(qp, *first, *count));
                }
            }
            RecordedCommand::BuildAccelerationStructure { dst, scratch } => {
                if let Some(buf) = store.buffers.get(*scratch) {
                    rec.children.push(buf);
                }
                if let Some(accel) = store.accel_structs.get(*dst) {
                    rec.children
                        .push(accel.clone());
                    rec.effects.push(DeviceEffect::AccelBuilt(accel));
                }
            }
            RecordedCommand::ExecuteCommands { buffers } => {
                for buffer in buffers {
                    if let Some(cb) = store.command_buffers.get(*buffer) {
                        rec.children.push(cb);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resettable_cb() -> CommandBuffer {
        CommandBuffer::new(Handle::new(1), Handle::new(2), CommandBufferLevel::Primary)
    }

    #[test]
    fn begin_end_reaches_executable() {
        let cb = resettable_cb();
        assert_eq!(cb.state(), CbState::Initial);
        cb.on_begin(false);
        assert_eq!(cb.state(), CbState::Recording);
        cb.on_end();
        assert_eq!(cb.state(), CbState::Executable);
    }

    #[test]
    fn retire_returns_resettable_to_executable() {
        let cb = resettable_cb();
        cb.on_begin(false);
        cb.on_end();
        cb.on_submit();
        assert_eq!(cb.state(), CbState::Pending);
        cb.on_retired();
        assert_eq!(cb.state(), CbState::Executable);
    }

    #[test]
    fn retire_spends_one_time_submit() {
        let cb = resettable_cb();
        cb.on_begin(true);
        cb.on_end();
        cb.on_submit();
        cb.on_retired();
        assert_eq!(cb.state(), CbState::Invalid);
        // Reset brings even a spent buffer back to initial.
        cb.on_reset();
        assert_eq!(cb.state(), CbState::Initial);
    }

    #[test]
    fn end_outside_recording_does_not_move() {
        let cb = resettable_cb();
        cb.on_end();
        assert_eq!(cb.state(), CbState::Initial);
    }
}
