use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::commands::{CommandBuffer, DeviceEffect, RecordedCommand};
use super::device::Device;
use super::structs::*;
use super::sync::{Fence, QueryStatus, Semaphore, SemOp, SemOpKind};
use super::{ObjectKind, StateTracker, TrackedObject};
use crate::error::{Result, TrackerError};
use crate::hooks::CallRecord;
use crate::state_bug;
use crate::utils::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Queued,
    InFlight,
    Retired,
}

/// One logical submit entry: its dependencies, payload, and completion hook.
/// Sequence numbers are the sole cross-component ordering signal; they are
/// strictly increasing per queue and never reused, fence-only submissions
/// included.
pub struct QueueSubmission {
    pub queue: Handle<Queue>,
    pub seq: u64,
    state: Mutex<SubmissionState>,
    pub(crate) waits: Vec<(Arc<Semaphore>, u64)>,
    pub(crate) command_buffers: Vec<Arc<CommandBuffer>>,
    pub(crate) signals: Vec<(Arc<Semaphore>, u64)>,
    pub(crate) fence: Option<Arc<Fence>>,
}

impl QueueSubmission {
    pub fn state(&self) -> SubmissionState {
        *self.state.lock()
    }

    /// Apply every externally visible effect of completion. Runs with no
    /// queue lock held; it freely touches semaphores, fences, and other
    /// queues (through the present-sync path).
    fn retire(&self, tracker: &StateTracker) {
        for (sem, _payload) in &self.waits {
            if let Some(sync) = sem.retire_wait(self.queue, self.seq) {
                // The image this wait gated was presented earlier; its
                // presentation work must be visible as retired from here on.
                let targets: Vec<(Arc<Queue>, u64)> = sync
                    .submissions
                    .iter()
                    .filter_map(|(q, s)| tracker.store().queues.get(*q).map(|q| (q, *s)))
                    .collect();
                let _ = tracker.notify_and_wait(&targets, DEFAULT_RETIRE_TIMEOUT);
            }
        }
        for cb in &self.command_buffers {
            // Effects stay recorded: a resettable buffer resubmitted later
            // applies them again on its next retirement.
            let effects = cb.rec.lock().effects.clone();
            for effect in &effects {
                match effect {
                    DeviceEffect::SetEvent(event, value) => event.set_signaled(*value),
                    DeviceEffect::QueryBegin(pool, query) => {
                        pool.set_status(*query, QueryStatus::Active)
                    }
                    DeviceEffect::QueryEnd(pool, query) => {
                        pool.set_status(*query, QueryStatus::Available)
                    }
                    DeviceEffect::QueryReset(pool, first, count) => {
                        pool.reset_range(*first, *count)
                    }
                    DeviceEffect::AccelBuilt(accel) => {
                        accel.built.store(true, Ordering::Release)
                    }
                }
            }
            cb.on_retired();
        }
        for (sem, payload) in &self.signals {
            sem.retire_signal(self.queue, self.seq, *payload);
        }
        if let Some(fence) = &self.fence {
            fence.retire();
        }
        *self.state.lock() = SubmissionState::Retired;
        log::trace!("submission {}@{:?} retired", self.seq, self.queue);
    }
}

struct QueueInner {
    pending: VecDeque<Arc<QueueSubmission>>,
    /// Completion watermark raised by notify passes. Nothing retires past it.
    notified_seq: u64,
    retired_seq: u64,
}

pub struct Queue {
    pub handle: Handle<Queue>,
    pub device: Handle<Device>,
    pub family: u32,
    pub index: u32,
    /// Global creation order; device-idle walks queues in this order so
    /// multi-queue diagnosis stays deterministic.
    pub order: u32,
    next_seq: AtomicU64,
    inner: Mutex<QueueInner>,
    retired: Condvar,
    /// Debug-label stack replayed from submitted command buffers.
    labels: Mutex<Vec<String>>,
}

impl TrackedObject for Queue {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Queue
    }
}

const DEFAULT_RETIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Host waits are bounded by the tracker even when the client passes an
/// effectively infinite timeout: the driver already reported completion, so
/// an in-process wait that long only ever means lost bookkeeping.
fn clamp_host_timeout(timeout_ns: u64) -> Duration {
    Duration::from_nanos(timeout_ns)
        .clamp(Duration::from_millis(1), DEFAULT_RETIRE_TIMEOUT)
}

impl Queue {
    pub(crate) fn new(
        handle: Handle<Queue>,
        device: Handle<Device>,
        family: u32,
        index: u32,
        order: u32,
    ) -> Self {
        Self {
            handle,
            device,
            family,
            index,
            order,
            next_seq: AtomicU64::new(1),
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                notified_seq: 0,
                retired_seq: 0,
            }),
            retired: Condvar::new(),
            labels: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::AcqRel)
    }

    /// Highest sequence number handed out so far.
    pub fn last_seq(&self) -> u64 {
        self.next_seq.load(Ordering::Acquire) - 1
    }

    pub fn retired_seq(&self) -> u64 {
        self.inner.lock().retired_seq
    }

    pub fn pending_submissions(&self) -> Vec<Arc<QueueSubmission>> {
        self.inner.lock().pending.iter().cloned().collect()
    }

    pub fn label_stack(&self) -> Vec<String> {
        self.labels.lock().clone()
    }

    pub(crate) fn enqueue(&self, sub: Arc<QueueSubmission>) {
        let mut state = sub.state.lock();
        if *state != SubmissionState::Queued {
            state_bug!("submission {}@{:?} enqueued twice", sub.seq, sub.queue);
            return;
        }
        *state = SubmissionState::InFlight;
        drop(state);
        self.inner.lock().pending.push_back(sub);
    }

    /// Phase-1 half of the retirement protocol: raise the completion
    /// watermark and wake waiters. Never blocks, never retires by itself.
    pub(crate) fn notify(&self, seq: u64) {
        let mut inner = self.inner.lock();
        if seq > inner.notified_seq {
            inner.notified_seq = seq;
        }
        drop(inner);
        self.retired.notify_all();
    }

    /// Phase-2 half: drain and retire everything at or below the watermark
    /// until `seq` is retired, blocking (bounded by `timeout`) for watermark
    /// movement from other threads when the deque runs dry.
    pub(crate) fn wait(&self, tracker: &StateTracker, seq: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            let mut ready = Vec::new();
            while inner
                .pending
                .front()
                .is_some_and(|sub| sub.seq <= inner.notified_seq)
            {
                let sub = inner.pending.pop_front().unwrap();
                inner.retired_seq = inner.retired_seq.max(sub.seq);
                ready.push(sub);
            }
            if !ready.is_empty() {
                // Retirement effects reach into other objects (and possibly
                // other queues); never hold our own lock across them.
                drop(inner);
                for sub in &ready {
                    sub.retire(tracker);
                }
                self.retired.notify_all();
                inner = self.inner.lock();
                continue;
            }
            // A target the queue never allocated is satisfied trivially.
            if inner.retired_seq >= seq || seq > self.last_seq() {
                return Ok(());
            }
            if self
                .retired
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                return Err(TrackerError::WaitTimeout(timeout));
            }
        }
    }
}

/// What the submit hook reports back to the dispatch layer.
#[derive(Debug, Clone, Default)]
pub struct SubmitSummary {
    pub seqs: Vec<u64>,
    /// Set when a signaled fence is externally shared: the caller should
    /// eagerly notify/wait instead of relying on later polling.
    pub eager_notify: bool,
}

impl StateTracker {
    /// Submit hook. PreSubmit resolves handles and assigns sequence numbers;
    /// PostSubmit flips command buffers to pending, enqueues semaphore ops,
    /// and replays label markers onto the queue for diagnostics.
    pub fn post_queue_submit(
        &self,
        queue: Handle<Queue>,
        batches: &[SubmitBatch],
        fence: Handle<Fence>,
        record: &CallRecord,
    ) -> SubmitSummary {
        if !record.is_success() {
            return SubmitSummary::default();
        }
        let Some(queue_state) = self.store().queues.get(queue) else {
            return SubmitSummary::default();
        };
        let fence_state = self.store().fences.get(fence);

        // PreSubmit: build one submission per batch; a fence with no batches
        // still gets a (sequence-numbered) submission to ride on.
        let mut submissions = Vec::new();
        let batch_count = if batches.is_empty() && fence_state.is_some() {
            1
        } else {
            batches.len()
        };
        for i in 0..batch_count {
            let batch = batches.get(i);
            let seq = queue_state.next_seq();
            let resolve = |ops: &[SemaphoreOp]| -> Vec<(Arc<Semaphore>, u64)> {
                ops.iter()
                    .filter_map(|op| {
                        self.store().semaphores.get(op.semaphore).map(|sem| {
                            let payload = match sem.info.kind {
                                SemaphoreKind::Binary => 1,
                                SemaphoreKind::Timeline => op.value,
                            };
                            (sem, payload)
                        })
                    })
                    .collect()
            };
            let last = i + 1 == batch_count;
            submissions.push(Arc::new(QueueSubmission {
                queue,
                seq,
                state: Mutex::new(SubmissionState::Queued),
                waits: batch.map(|b| resolve(&b.waits)).unwrap_or_default(),
                command_buffers: batch
                    .map(|b| {
                        b.command_buffers
                            .iter()
                            .filter_map(|cb| self.store().command_buffers.get(*cb))
                            .collect()
                    })
                    .unwrap_or_default(),
                signals: batch.map(|b| resolve(&b.signals)).unwrap_or_default(),
                fence: if last { fence_state.clone() } else { None },
            }));
        }

        let eager_notify = fence_state
            .as_ref()
            .is_some_and(|f| f.info.external);

        // PostSubmit: make the bookkeeping visible.
        let mut summary = SubmitSummary {
            seqs: Vec::with_capacity(submissions.len()),
            eager_notify,
        };
        for sub in submissions {
            for (sem, payload) in &sub.waits {
                sem.enqueue_op(SemOp {
                    kind: SemOpKind::Wait,
                    queue,
                    seq: sub.seq,
                    payload: *payload,
                });
            }
            for (sem, payload) in &sub.signals {
                sem.enqueue_op(SemOp {
                    kind: SemOpKind::Signal,
                    queue,
                    seq: sub.seq,
                    payload: *payload,
                });
            }
            if let Some(fence) = &sub.fence {
                fence.enqueue_signal(queue, sub.seq);
            }
            for cb in &sub.command_buffers {
                cb.on_submit();
                self.replay_labels(&queue_state, cb);
            }
            summary.seqs.push(sub.seq);
            queue_state.enqueue(sub);
        }
        summary
    }

    fn replay_labels(&self, queue: &Queue, cb: &CommandBuffer) {
        let commands = cb.commands();
        let mut labels = queue.labels.lock();
        for command in &commands {
            match command {
                RecordedCommand::BeginLabel { label } => labels.push(label.clone()),
                RecordedCommand::EndLabel => {
                    labels.pop();
                }
                _ => {}
            }
        }
    }

    /// The two-phase retirement protocol. Phase 1 notifies every involved
    /// queue before phase 2 blocks on any of them; doing it per-queue instead
    /// would let queue A block on queue B before B's notify was ever issued.
    pub(crate) fn notify_and_wait(
        &self,
        targets: &[(Arc<Queue>, u64)],
        timeout: Duration,
    ) -> Result<()> {
        for (queue, seq) in targets {
            queue.notify(*seq);
        }
        for (queue, seq) in targets {
            queue.wait(self, *seq, timeout)?;
        }
        Ok(())
    }

    /// Walk wait-semaphore edges from the initial targets, pulling in the
    /// submissions whose signals satisfy them, transitively across queues.
    fn expand_dependencies(
        &self,
        initial: Vec<(Arc<Queue>, u64)>,
    ) -> Vec<(Arc<Queue>, u64)> {
        let mut frontier: Vec<(Arc<Queue>, u64)> = initial;
        let mut seen: HashSet<(u64, u64)> = frontier
            .iter()
            .map(|(q, s)| (q.handle.raw, *s))
            .collect();
        let mut max_per_queue: HashMap<u64, (Arc<Queue>, u64)> = HashMap::new();

        while let Some((queue, seq)) = frontier.pop() {
            max_per_queue
                .entry(queue.handle.raw)
                .and_modify(|entry| {
                    if seq > entry.1 {
                        entry.1 = seq;
                    }
                })
                .or_insert((Arc::clone(&queue), seq));

            for sub in queue.pending_submissions() {
                if sub.seq > seq {
                    continue;
                }
                for (sem, payload) in &sub.waits {
                    for (source_queue, source_seq) in sem.signal_sources(*payload) {
                        if !seen.insert((source_queue.raw, source_seq)) {
                            continue;
                        }
                        if let Some(q) = self.store().queues.get(source_queue) {
                            frontier.push((q, source_seq));
                        }
                    }
                }
            }
        }
        max_per_queue.into_values().collect()
    }

    /// Fence-wait hook: retire the owning submissions (and everything they
    /// depend on) so the fences read signaled.
    pub fn post_wait_for_fences(
        &self,
        fences: &[Handle<Fence>],
        timeout_ns: u64,
        record: &CallRecord,
    ) -> Result<()> {
        if !record.is_success() {
            return Ok(());
        }
        let timeout = clamp_host_timeout(timeout_ns);
        for fence in fences {
            self.retire_fence(*fence, timeout)?;
        }
        Ok(())
    }

    /// A successful status poll is a completion observation, same as a wait.
    pub fn post_get_fence_status(&self, fence: Handle<Fence>, record: &CallRecord) -> Result<()> {
        if !record.is_success() {
            return Ok(());
        }
        self.retire_fence(fence, DEFAULT_RETIRE_TIMEOUT)
    }

    fn retire_fence(&self, fence: Handle<Fence>, timeout: Duration) -> Result<()> {
        let Some(fence_state) = self.store().fences.get(fence) else {
            return Ok(());
        };
        if let Some(sync) = fence_state.take_present_sync() {
            let targets: Vec<(Arc<Queue>, u64)> = sync
                .submissions
                .iter()
                .filter_map(|(q, s)| self.store().queues.get(*q).map(|q| (q, *s)))
                .collect();
            let targets = self.expand_dependencies(targets);
            self.notify_and_wait(&targets, timeout)?;
        }
        match fence_state.status() {
            super::sync::FenceStatus::Inflight { queue, seq } => {
                let Some(queue) = self.store().queues.get(queue) else {
                    return Ok(());
                };
                let targets = self.expand_dependencies(vec![(queue, seq)]);
                self.notify_and_wait(&targets, timeout)
            }
            _ => Ok(()),
        }
    }

    /// Host wait on timeline payloads.
    pub fn post_wait_semaphores(
        &self,
        waits: &[SemaphoreOp],
        timeout_ns: u64,
        record: &CallRecord,
    ) -> Result<()> {
        if !record.is_success() {
            return Ok(());
        }
        let timeout = clamp_host_timeout(timeout_ns);
        let deadline = Instant::now() + timeout;
        for op in waits {
            let Some(sem) = self.store().semaphores.get(op.semaphore) else {
                continue;
            };
            if sem.completed_payload() >= op.value {
                continue;
            }
            let targets: Vec<(Arc<Queue>, u64)> = sem
                .signal_sources(op.value)
                .into_iter()
                .filter_map(|(q, s)| self.store().queues.get(q).map(|q| (q, s)))
                .collect();
            if !targets.is_empty() {
                let targets = self.expand_dependencies(targets);
                self.notify_and_wait(&targets, timeout)?;
            }
            // The payload may still come from a host signal on another
            // thread; block on the semaphore itself for the remainder.
            if !sem.wait_payload(op.value, deadline) {
                return Err(TrackerError::WaitTimeout(timeout));
            }
        }
        Ok(())
    }

    /// Queue-idle hook: everything the queue has accepted retires.
    pub fn post_queue_wait_idle(&self, queue: Handle<Queue>, record: &CallRecord) -> Result<()> {
        if !record.is_success() {
            return Ok(());
        }
        let Some(queue_state) = self.store().queues.get(queue) else {
            return Ok(());
        };
        let seq = queue_state.last_seq();
        let targets = self.expand_dependencies(vec![(queue_state, seq)]);
        self.notify_and_wait(&targets, DEFAULT_RETIRE_TIMEOUT)
    }

    /// Device-idle hook: every queue drains. Queues are visited in creation
    /// order to keep multi-queue diagnosis deterministic.
    pub fn post_device_wait_idle(&self, device: Handle<Device>, record: &CallRecord) -> Result<()> {
        if !record.is_success() {
            return Ok(());
        }
        let Some(device_state) = self.store().devices.get(device) else {
            return Ok(());
        };
        let targets: Vec<(Arc<Queue>, u64)> = device_state
            .queues()
            .into_iter()
            .map(|q| {
                let seq = q.last_seq();
                (q, seq)
            })
            .collect();
        self.notify_and_wait(&targets, DEFAULT_RETIRE_TIMEOUT)
    }
}
