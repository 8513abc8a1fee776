use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use super::queue::Queue;
use super::structs::*;
use super::swapchain::Swapchain;
use super::{ObjectKind, StateTracker, TrackedObject};
use crate::hooks::CallRecord;
use crate::utils::Handle;

/// The queue work a presented image depends on. Threaded through whichever
/// fence/semaphore guards the image's next acquire, so the wait that follows
/// can retire the presentation's submissions first.
#[derive(Debug, Clone, Default)]
pub struct PresentSync {
    pub swapchain: Handle<Swapchain>,
    pub image_index: u32,
    /// `(queue, seq)` pairs that must retire before the image is reusable.
    pub submissions: Vec<(Handle<Queue>, u64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemOpKind {
    Signal,
    Wait,
}

/// A pending signal or wait, tagged with the submission that carries it.
/// Acquire-side signals come from the presentation engine rather than a
/// queue and carry a null queue handle.
#[derive(Debug, Clone, Copy)]
pub struct SemOp {
    pub kind: SemOpKind,
    pub queue: Handle<Queue>,
    pub seq: u64,
    pub payload: u64,
}

pub struct Semaphore {
    pub handle: Handle<Semaphore>,
    pub info: SemaphoreInfo,
    /// Highest payload observed retired. Binary semaphores flip 0/1 on the
    /// same field so retirement logic is shared with timelines.
    completed: Mutex<u64>,
    pending: Mutex<VecDeque<SemOp>>,
    present_sync: Mutex<Option<PresentSync>>,
    pub(crate) cond: Condvar,
}

impl TrackedObject for Semaphore {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Semaphore
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl Semaphore {
    fn new(handle: Handle<Semaphore>, info: &SemaphoreInfo) -> Self {
        Self {
            handle,
            info: info.clone(),
            completed: Mutex::new(info.initial_value),
            pending: Mutex::new(VecDeque::new()),
            present_sync: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    pub fn completed_payload(&self) -> u64 {
        *self.completed.lock()
    }

    pub fn pending_ops(&self) -> Vec<SemOp> {
        self.pending.lock().iter().copied().collect()
    }

    pub(crate) fn enqueue_op(&self, op: SemOp) {
        self.pending.lock().push_back(op);
    }

    /// Presentation-engine signal: no queue behind it.
    pub(crate) fn enqueue_acquire_signal(&self) {
        self.enqueue_op(SemOp {
            kind: SemOpKind::Signal,
            queue: Handle::null(),
            seq: 0,
            payload: 1,
        });
        // Acquire signals have no submission to retire through; the payload
        // is observable immediately.
        let mut completed = self.completed.lock();
        *completed = (*completed).max(1);
    }

    /// The queues whose submissions will produce `payload` (or anything at or
    /// above it). Used to walk the dependency graph before waiting.
    pub(crate) fn signal_sources(&self, payload: u64) -> Vec<(Handle<Queue>, u64)> {
        self.pending
            .lock()
            .iter()
            .filter(|op| {
                op.kind == SemOpKind::Signal && !op.queue.is_null() && op.payload >= payload
            })
            .map(|op| (op.queue, op.seq))
            .collect()
    }

    /// All queue-side signal sources, regardless of payload.
    pub(crate) fn any_signal_sources(&self) -> Vec<(Handle<Queue>, u64)> {
        self.pending
            .lock()
            .iter()
            .filter(|op| op.kind == SemOpKind::Signal && !op.queue.is_null())
            .map(|op| (op.queue, op.seq))
            .collect()
    }

    /// Retire the signal a queue submission carried: advance the payload and
    /// drop the pending entry.
    pub(crate) fn retire_signal(&self, queue: Handle<Queue>, seq: u64, payload: u64) {
        {
            let mut completed = self.completed.lock();
            *completed = (*completed).max(payload);
        }
        self.pending
            .lock()
            .retain(|op| !(op.kind == SemOpKind::Signal && op.queue == queue && op.seq == seq));
        self.cond.notify_all();
    }

    /// Retire a queue submission's wait: drop satisfied entries; a binary
    /// wait consumes the payload back to zero.
    pub(crate) fn retire_wait(&self, queue: Handle<Queue>, seq: u64) -> Option<PresentSync> {
        self.pending
            .lock()
            .retain(|op| !(op.kind == SemOpKind::Wait && op.queue == queue && op.seq == seq));
        if self.info.kind == SemaphoreKind::Binary {
            // The acquire-side signal (if any) is consumed along with the wait.
            self.pending
                .lock()
                .retain(|op| !(op.kind == SemOpKind::Signal && op.queue.is_null()));
            *self.completed.lock() = 0;
        }
        self.take_present_sync()
    }

    /// Host-side signal: payload advances immediately.
    pub(crate) fn signal_host(&self, payload: u64) {
        let mut completed = self.completed.lock();
        *completed = (*completed).max(payload);
        drop(completed);
        self.cond.notify_all();
    }

    /// Block until the payload reaches `value` or the deadline passes.
    /// Returns whether the payload was observed.
    pub(crate) fn wait_payload(&self, value: u64, deadline: std::time::Instant) -> bool {
        let mut completed = self.completed.lock();
        while *completed < value {
            if self.cond.wait_until(&mut completed, deadline).timed_out() {
                return *completed >= value;
            }
        }
        true
    }

    /// Presentation consumed this binary semaphore's payload.
    pub(crate) fn consume_binary(&self) {
        *self.completed.lock() = 0;
    }

    pub(crate) fn attach_present_sync(&self, sync: PresentSync) {
        *self.present_sync.lock() = Some(sync);
    }

    pub(crate) fn take_present_sync(&self) -> Option<PresentSync> {
        self.present_sync.lock().take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Unsignaled,
    /// Owned by a queue submission that has not retired yet.
    Inflight { queue: Handle<Queue>, seq: u64 },
    Signaled,
}

pub struct Fence {
    pub handle: Handle<Fence>,
    pub info: FenceInfo,
    status: Mutex<FenceStatus>,
    present_sync: Mutex<Option<PresentSync>>,
    pub(crate) cond: Condvar,
}

impl TrackedObject for Fence {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Fence
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl Fence {
    fn new(handle: Handle<Fence>, info: &FenceInfo) -> Self {
        let status = if info.signaled {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        };
        Self {
            handle,
            info: info.clone(),
            status: Mutex::new(status),
            present_sync: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    pub fn status(&self) -> FenceStatus {
        *self.status.lock()
    }

    pub fn is_signaled(&self) -> bool {
        matches!(self.status(), FenceStatus::Signaled)
    }

    pub(crate) fn enqueue_signal(&self, queue: Handle<Queue>, seq: u64) {
        *self.status.lock() = FenceStatus::Inflight { queue, seq };
    }

    pub(crate) fn retire(&self) {
        *self.status.lock() = FenceStatus::Signaled;
        self.cond.notify_all();
    }

    pub(crate) fn reset(&self) {
        *self.status.lock() = FenceStatus::Unsignaled;
        // A stale present-sync is meaningless once the fence recycles.
        self.present_sync.lock().take();
    }

    /// Acquire fences signal from the presentation engine, not a queue.
    pub(crate) fn signal_external(&self) {
        *self.status.lock() = FenceStatus::Signaled;
        self.cond.notify_all();
    }

    pub(crate) fn attach_present_sync(&self, sync: PresentSync) {
        *self.present_sync.lock() = Some(sync);
    }

    pub(crate) fn take_present_sync(&self) -> Option<PresentSync> {
        self.present_sync.lock().take()
    }
}

pub struct Event {
    pub handle: Handle<Event>,
    pub info: EventInfo,
    signaled: AtomicBool,
}

impl TrackedObject for Event {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Event
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl Event {
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    pub(crate) fn set_signaled(&self, value: bool) {
        self.signaled.store(value, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    Unavailable,
    Active,
    Available,
}

pub struct QueryPool {
    pub handle: Handle<QueryPool>,
    pub info: QueryPoolInfo,
    status: Mutex<Vec<QueryStatus>>,
}

impl TrackedObject for QueryPool {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::QueryPool
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl QueryPool {
    pub fn query_status(&self, query: u32) -> QueryStatus {
        self.status
            .lock()
            .get(query as usize)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn set_status(&self, query: u32, value: QueryStatus) {
        if let Some(slot) = self.status.lock().get_mut(query as usize) {
            *slot = value;
        }
    }

    pub(crate) fn reset_range(&self, first: u32, count: u32) {
        let mut status = self.status.lock();
        for slot in status
            .iter_mut()
            .skip(first as usize)
            .take(count as usize)
        {
            *slot = QueryStatus::Unavailable;
        }
    }
}

impl StateTracker {
    pub fn post_create_semaphore(&self, info: &SemaphoreInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Semaphore>() else {
            return;
        };
        self.store()
            .semaphores
            .add(handle, Semaphore::new(handle, info));
    }

    pub fn pre_destroy_semaphore(&self, semaphore: Handle<Semaphore>) {
        self.store().semaphores.destroy(semaphore);
    }

    pub fn post_create_fence(&self, info: &FenceInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Fence>() else {
            return;
        };
        self.store().fences.add(handle, Fence::new(handle, info));
    }

    pub fn pre_destroy_fence(&self, fence: Handle<Fence>) {
        self.store().fences.destroy(fence);
    }

    pub fn post_reset_fences(&self, fences: &[Handle<Fence>], record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        for fence in fences {
            if let Some(f) = self.store().fences.get(*fence) {
                f.reset();
            }
        }
    }

    /// Host-side timeline signal.
    pub fn post_signal_semaphore(
        &self,
        semaphore: Handle<Semaphore>,
        value: u64,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        if let Some(sem) = self.store().semaphores.get(semaphore) {
            sem.signal_host(value);
        }
    }

    pub fn post_create_event(&self, info: &EventInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Event>() else {
            return;
        };
        self.store().events.add(
            handle,
            Event {
                handle,
                info: info.clone(),
                signaled: AtomicBool::new(false),
            },
        );
    }

    pub fn pre_destroy_event(&self, event: Handle<Event>) {
        self.store().events.destroy(event);
    }

    pub fn post_set_event(&self, event: Handle<Event>, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        if let Some(ev) = self.store().events.get(event) {
            ev.set_signaled(true);
        }
    }

    pub fn post_reset_event(&self, event: Handle<Event>, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        if let Some(ev) = self.store().events.get(event) {
            ev.set_signaled(false);
        }
    }

    pub fn post_create_query_pool(&self, info: &QueryPoolInfo, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<QueryPool>() else {
            return;
        };
        self.store().query_pools.add(
            handle,
            QueryPool {
                handle,
                info: info.clone(),
                status: Mutex::new(vec![QueryStatus::Unavailable; info.count as usize]),
            },
        );
    }

    pub fn pre_destroy_query_pool(&self, pool: Handle<QueryPool>) {
        self.store().query_pools.destroy(pool);
    }

    /// Host-side query reset.
    pub fn post_reset_query_pool(
        &self,
        pool: Handle<QueryPool>,
        first: u32,
        count: u32,
    ) {
        if let Some(qp) = self.store().query_pools.get(pool) {
            qp.reset_range(first, count);
        }
    }
}
