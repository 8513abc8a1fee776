use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::device::Device;
use super::queue::Queue;
use super::resources::{Image, ResourceBinding};
use super::structs::*;
use super::sync::{Fence, PresentSync, Semaphore};
use super::{ObjectKind, StateTracker, TrackedObject};
use crate::hooks::CallRecord;
use crate::utils::Handle;

pub(crate) struct ImageSlot {
    pub image: Option<Arc<Image>>,
    pub acquired: bool,
    /// Work from the last present of this slot, owed to whichever
    /// fence/semaphore guards the next acquire.
    pub pending_sync: Option<PresentSync>,
    pub acquire_semaphore: Option<Arc<Semaphore>>,
    pub acquire_fence: Option<Arc<Fence>>,
}

pub struct Swapchain {
    pub handle: Handle<Swapchain>,
    pub device: Handle<Device>,
    pub info: SwapchainInfo,
    pub(crate) slots: Mutex<Vec<ImageSlot>>,
    /// A swapchain replaced via `old_swapchain` keeps its images addressable
    /// but can never hand out another one.
    retired: AtomicBool,
}

impl TrackedObject for Swapchain {
    fn raw_handle(&self) -> u64 {
        self.handle.raw
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Swapchain
    }
    fn debug_name(&self) -> &str {
        &self.info.debug_name
    }
}

impl Swapchain {
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn image_count(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn image(&self, index: u32) -> Option<Arc<Image>> {
        self.slots
            .lock()
            .get(index as usize)
            .and_then(|slot| slot.image.clone())
    }

    pub fn is_acquired(&self, index: u32) -> bool {
        self.slots
            .lock()
            .get(index as usize)
            .map(|slot| slot.acquired)
            .unwrap_or(false)
    }

    /// The semaphore/fence pair gating an acquired image's first use.
    pub fn acquire_gates(&self, index: u32) -> (Option<Arc<Semaphore>>, Option<Arc<Fence>>) {
        let slots = self.slots.lock();
        match slots.get(index as usize) {
            Some(slot) => (slot.acquire_semaphore.clone(), slot.acquire_fence.clone()),
            None => (None, None),
        }
    }
}

impl StateTracker {
    pub fn post_create_swapchain(
        &self,
        device: Handle<Device>,
        info: &SwapchainInfo,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(handle) = record.first_handle::<Swapchain>() else {
            return;
        };
        if !info.old_swapchain.is_null() {
            if let Some(old) = self.store().swapchains.get(info.old_swapchain) {
                old.retire();
                log::debug!("swapchain {:?} retired by recreate", info.old_swapchain);
            }
        }
        log::trace!("tracking swapchain {:?} ({})", handle, info.debug_name);
        self.store().swapchains.add(
            handle,
            Swapchain {
                handle,
                device,
                info: info.clone(),
                slots: Mutex::new(Vec::new()),
                retired: AtomicBool::new(false),
            },
        );
    }

    /// Post-hook for the image enumeration the platform call performs:
    /// builds one image state per handle, each tagged as owned by its
    /// `(swapchain, index)` pair. Aliasing, not a memory binding.
    pub fn post_get_swapchain_images(&self, swapchain: Handle<Swapchain>, record: &CallRecord) {
        if !record.is_success() {
            return;
        }
        let Some(sc) = self.store().swapchains.get(swapchain) else {
            return;
        };
        let mut slots = sc.slots.lock();
        if !slots.is_empty() {
            // Image enumeration is idempotent; the first pass built them.
            return;
        }
        for (index, raw) in record.handles.iter().enumerate() {
            let handle = Handle::new(*raw);
            let info = ImageInfo {
                debug_name: format!("{}[{}]", sc.info.debug_name, index),
                dim: [sc.info.extent.width, sc.info.extent.height, 1],
                layers: 1,
                mip_levels: 1,
                format: sc.info.format,
                tiling: ImageTiling::Optimal,
                usage: sc.info.usage,
                samples: SampleCount::S1,
                external_format: None,
            };
            let features = self
                .store()
                .devices
                .get(sc.device)
                .map(|dev| dev.resolve_format_features(info.format, None))
                .unwrap_or_default();
            let image = self.store().images.add(
                handle,
                Image {
                    handle,
                    device: sc.device,
                    info,
                    features,
                    swapchain: Some((swapchain, index as u32)),
                    binding: Mutex::new(ResourceBinding::Unbound),
                },
            );
            slots.push(ImageSlot {
                image: Some(image),
                acquired: false,
                pending_sync: None,
                acquire_semaphore: None,
                acquire_fence: None,
            });
        }
    }

    /// A destroyed swapchain takes its image states along; in-flight holders
    /// of the shared records keep them alive past discovery.
    pub fn pre_destroy_swapchain(&self, swapchain: Handle<Swapchain>) {
        let Some(sc) = self.store().swapchains.destroy(swapchain) else {
            return;
        };
        for slot in sc.slots.lock().iter() {
            if let Some(image) = &slot.image {
                self.store().images.destroy(image.handle);
            }
        }
        log::trace!("untracked swapchain {:?}", swapchain);
    }

    /// Acquire marks the image busy and ties the given semaphore/fence to it
    /// as the release gate; any present-sync owed from the image's previous
    /// present is threaded onto those same primitives.
    pub fn post_acquire_next_image(
        &self,
        swapchain: Handle<Swapchain>,
        semaphore: Handle<Semaphore>,
        fence: Handle<Fence>,
        record: &CallRecord,
    ) {
        if !record.is_success() {
            return;
        }
        let Some(sc) = self.store().swapchains.get(swapchain) else {
            return;
        };
        let Some(index) = record.handles.first().copied() else {
            return;
        };
        let mut slots = sc.slots.lock();
        let Some(slot) = slots.get_mut(index as usize) else {
            log::trace!("acquire of unknown image index {} on {:?}", index, swapchain);
            return;
        };
        slot.acquired = true;
        let pending = slot.pending_sync.take();

        let sem = self.store().semaphores.get(semaphore);
        let fen = self.store().fences.get(fence);
        if let Some(sem) = &sem {
            sem.enqueue_acquire_signal();
            if let Some(sync) = &pending {
                sem.attach_present_sync(sync.clone());
            }
        }
        if let Some(fen) = &fen {
            // The acquire returned, so the presentation engine has signaled.
            fen.signal_external();
            if let Some(sync) = &pending {
                fen.attach_present_sync(sync.clone());
            }
        }
        slot.acquire_semaphore = sem;
        slot.acquire_fence = fen;
    }

    /// Present releases each successfully presented image and records the
    /// queue submissions that must retire before it can be reacquired.
    /// Partial failure is per entry: failed entries leave no trace.
    pub fn post_queue_present(
        &self,
        queue: Handle<Queue>,
        info: &PresentInfo,
        record: &CallRecord,
    ) {
        // The aggregate result may be a partial failure; individual entry
        // results decide what gets tracked.
        let _ = queue;
        let wait_sources: Vec<(Handle<Queue>, u64)> = info
            .waits
            .iter()
            .filter_map(|sem| self.store().semaphores.get(*sem))
            .flat_map(|sem| sem.any_signal_sources())
            .collect();

        for (i, entry) in info.entries.iter().enumerate() {
            let entry_ok = record
                .entry_results
                .get(i)
                .map(|r| r.is_success())
                .unwrap_or(record.is_success());
            if !entry_ok {
                continue;
            }
            let Some(sc) = self.store().swapchains.get(entry.swapchain) else {
                continue;
            };
            let mut slots = sc.slots.lock();
            let Some(slot) = slots.get_mut(entry.image_index as usize) else {
                continue;
            };
            slot.acquired = false;
            slot.acquire_semaphore = None;
            slot.acquire_fence = None;
            slot.pending_sync = Some(PresentSync {
                swapchain: entry.swapchain,
                image_index: entry.image_index,
                submissions: wait_sources.clone(),
            });
        }

        // The presentation engine consumes the binary wait payloads.
        for sem in &info.waits {
            if let Some(sem) = self.store().semaphores.get(*sem) {
                if sem.info.kind == SemaphoreKind::Binary {
                    sem.consume_binary();
                }
            }
        }
    }
}
