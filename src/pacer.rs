// =============================================================================
// FRAME PACER - frame slots, fences and surface invalidation
// =============================================================================
//
// FRAME TIMELINE (one slot):
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ wait slot fence ─> acquire ─> wait image owner ─> claim image ─> reset   │
// │   ─> (caller records) ─> submit ─> present ─> advance slot               │
// └──────────────────────────────────────────────────────────────────────────┘
//
// The CPU can be at most `slot_count` frames ahead of the GPU: every slot's
// fence is waited on before that slot's semaphores are reused.

use anyhow::Result;
use ash::vk;

use crate::backend::{
    AcquireOutcome, FrameSubmission, FrameSyncPool, PresentOutcome, PresentTarget, SubmitQueue,
    SyncDevice,
};

/// Whether the chain still matches the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ready,
    SwapchainOutOfDate,
}

/// Image handed out for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub slot: usize,
    pub image_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Ready(AcquiredImage),
    SwapchainOutOfDate,
}

#[derive(Debug)]
pub struct FramePacer {
    slot_count: usize,
    current_slot: usize,
    swapchain_dirty: bool,
}

impl FramePacer {
    /// One slot per frame in `sync`
    pub fn new<D: SyncDevice>(sync: &FrameSyncPool<D>) -> Self {
        Self {
            slot_count: sync.len(),
            current_slot: 0,
            swapchain_dirty: false,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    #[cfg(test)]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        self.swapchain_dirty
    }

    /// Wait for the current slot, acquire an image and make the slot the
    /// image's owner.
    ///
    /// On `SwapchainOutOfDate` no fence has been reset, so nothing is left
    /// waiting on work that was never submitted.
    pub fn acquire<D, P>(
        &mut self,
        resized: bool,
        sync: &mut FrameSyncPool<D>,
        chain: &P,
    ) -> Result<Acquire>
    where
        D: SyncDevice,
        P: PresentTarget,
    {
        if resized {
            self.swapchain_dirty = true;
        }
        if self.swapchain_dirty {
            return Ok(Acquire::SwapchainOutOfDate);
        }

        let frame = sync[self.current_slot];

        // Backpressure: the GPU must be done with this slot
        sync.device().wait_for_fence(frame.in_flight)?;

        let image_index = match chain.acquire_next_image(frame.image_available)? {
            AcquireOutcome::OutOfDate => {
                log::debug!("Acquire reported swapchain out of date");
                self.swapchain_dirty = true;
                return Ok(Acquire::SwapchainOutOfDate);
            }
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                // The image is ours and its semaphore will signal; finish the
                // frame and let end-of-frame report the invalidation
                if suboptimal {
                    self.swapchain_dirty = true;
                }
                image_index
            }
        };

        if sync.images_in_flight().is_empty() {
            sync.images_in_flight_mut().reset(chain.image_count());
        }

        // Another slot may still be rendering into this image
        if let Some(owner) = sync.images_in_flight().owner(image_index) {
            if owner != frame.in_flight {
                log::trace!("Image {} still in flight, waiting on {:?}", image_index, owner);
                sync.device().wait_for_fence(owner)?;
            }
        }
        sync.images_in_flight_mut().claim(image_index, frame.in_flight)?;

        sync.device().reset_fence(frame.in_flight)?;

        Ok(Acquire::Ready(AcquiredImage {
            slot: self.current_slot,
            image_index,
        }))
    }

    /// Submit the recorded work, present it, and move to the next slot.
    ///
    /// Invalidation reported by present only marks the chain dirty; the
    /// caller recreates before the next frame.
    pub fn present<D, P>(
        &mut self,
        image: AcquiredImage,
        command_buffer: vk::CommandBuffer,
        sync: &FrameSyncPool<D>,
        chain: &P,
    ) -> Result<FrameStatus>
    where
        D: SyncDevice + SubmitQueue,
        P: PresentTarget,
    {
        debug_assert_eq!(image.slot, self.current_slot);
        let frame = sync[image.slot];

        sync.device().submit(&FrameSubmission {
            command_buffer,
            wait_semaphore: frame.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: frame.render_finished,
            fence: frame.in_flight,
        })?;

        match chain.present(image.image_index, frame.render_finished)? {
            PresentOutcome::Presented => {}
            outcome => {
                log::debug!("Present reported {:?}", outcome);
                self.swapchain_dirty = true;
            }
        }

        // Advances even when the frame ended dirty; recreation resets it
        self.current_slot = (self.current_slot + 1) % self.slot_count;

        Ok(self.status())
    }

    /// Forget all image ownership after the chain was rebuilt with
    /// `image_count` images
    pub fn reset<D: SyncDevice>(&mut self, sync: &mut FrameSyncPool<D>, image_count: usize) {
        sync.images_in_flight_mut().reset(image_count);
        self.current_slot = 0;
        self.swapchain_dirty = false;
    }

    pub fn status(&self) -> FrameStatus {
        if self.swapchain_dirty {
            FrameStatus::SwapchainOutOfDate
        } else {
            FrameStatus::Ready
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sync::mock::MockDevice;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Scripted chain: hands out queued acquire/present results
    struct MockChain {
        image_count: usize,
        acquires: RefCell<VecDeque<AcquireOutcome>>,
        presents: RefCell<VecDeque<PresentOutcome>>,
        presented: RefCell<Vec<(u32, vk::Semaphore)>>,
    }

    impl MockChain {
        fn new(image_count: usize) -> Self {
            Self {
                image_count,
                acquires: RefCell::new(VecDeque::new()),
                presents: RefCell::new(VecDeque::new()),
                presented: RefCell::new(Vec::new()),
            }
        }

        fn queue_images(&self, indices: &[u32]) {
            for &image_index in indices {
                self.acquires.borrow_mut().push_back(AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                });
            }
        }

        fn queue_acquire(&self, outcome: AcquireOutcome) {
            self.acquires.borrow_mut().push_back(outcome);
        }

        fn queue_present(&self, outcome: PresentOutcome) {
            self.presents.borrow_mut().push_back(outcome);
        }
    }

    impl PresentTarget for MockChain {
        fn image_count(&self) -> usize {
            self.image_count
        }

        fn acquire_next_image(&self, _signal: vk::Semaphore) -> Result<AcquireOutcome> {
            self.acquires
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("unexpected acquire"))
        }

        fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<PresentOutcome> {
            self.presented.borrow_mut().push((image_index, wait));
            Ok(self
                .presents
                .borrow_mut()
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }
    }

    fn setup(slots: usize) -> (Arc<MockDevice>, FrameSyncPool<MockDevice>, FramePacer) {
        let device = Arc::new(MockDevice::default());
        let pool = FrameSyncPool::new(device.clone(), slots).unwrap();
        let pacer = FramePacer::new(&pool);
        (device, pool, pacer)
    }

    fn command_buffer() -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(0xC0FFEE)
    }

    fn run_frame(
        pacer: &mut FramePacer,
        pool: &mut FrameSyncPool<MockDevice>,
        chain: &MockChain,
    ) -> (AcquiredImage, FrameStatus) {
        let image = match pacer.acquire(false, pool, chain).unwrap() {
            Acquire::Ready(image) => image,
            Acquire::SwapchainOutOfDate => panic!("unexpected out-of-date"),
        };
        let status = pacer.present(image, command_buffer(), pool, chain).unwrap();
        (image, status)
    }

    #[test]
    fn out_of_date_on_first_acquire_leaves_fence_signaled() {
        let (device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);
        chain.queue_acquire(AcquireOutcome::OutOfDate);

        let result = pacer.acquire(false, &mut pool, &chain).unwrap();

        assert_eq!(result, Acquire::SwapchainOutOfDate);
        assert!(pacer.is_dirty());
        assert!(device.is_signaled(pool[0].in_flight));
        assert!(device.submissions().is_empty());
        assert!(pool.images_in_flight().is_unclaimed());
    }

    #[test]
    fn dirty_chain_skips_sync_objects() {
        let (device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);

        let result = pacer.acquire(true, &mut pool, &chain).unwrap();
        assert_eq!(result, Acquire::SwapchainOutOfDate);

        // Still dirty on the next call, even without a new resize
        let result = pacer.acquire(false, &mut pool, &chain).unwrap();
        assert_eq!(result, Acquire::SwapchainOutOfDate);
        assert!(device.waits().is_empty());
    }

    #[test]
    fn slot_count_taken_from_the_pool() {
        let (_device, pool, pacer) = setup(3);
        assert_eq!(pacer.slot_count(), pool.len());
        assert_eq!(pacer.current_slot(), 0);
    }

    #[test]
    fn slot_counter_cycles_through_all_slots() {
        let (_device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);
        chain.queue_images(&[0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);

        let mut slots = Vec::new();
        for _ in 0..10 {
            let (image, status) = run_frame(&mut pacer, &mut pool, &chain);
            assert_eq!(status, FrameStatus::Ready);
            assert!(pacer.current_slot() < pacer.slot_count());
            slots.push(image.slot);
        }

        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn reused_image_waits_for_previous_slot_fence() {
        let (device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);
        chain.queue_images(&[0, 0]);

        run_frame(&mut pacer, &mut pool, &chain);
        let first_fence = pool[0].in_flight;
        assert!(!device.is_signaled(first_fence));

        device.clear_waits();
        let second = match pacer.acquire(false, &mut pool, &chain).unwrap() {
            Acquire::Ready(image) => image,
            Acquire::SwapchainOutOfDate => panic!("unexpected out-of-date"),
        };

        assert_eq!(second.slot, 1);
        assert_eq!(device.waits(), vec![pool[1].in_flight, first_fence]);
        assert!(device.is_signaled(first_fence));
        assert_eq!(pool.images_in_flight().owner(0), Some(pool[1].in_flight));
    }

    #[test]
    fn distinct_images_only_wait_on_slot_fences() {
        let (device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(2);
        chain.queue_images(&[0, 1, 0, 1]);

        for _ in 0..4 {
            run_frame(&mut pacer, &mut pool, &chain);
        }

        let expected = vec![pool[0].in_flight, pool[1].in_flight, pool[0].in_flight, pool[1].in_flight];
        assert_eq!(device.waits(), expected);
    }

    #[test]
    fn submission_waits_acquire_and_signals_render_finished() {
        let (device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);
        chain.queue_images(&[2]);

        let (image, _) = run_frame(&mut pacer, &mut pool, &chain);

        let submissions = device.submissions();
        assert_eq!(submissions.len(), 1);
        let submission = submissions[0];
        assert_eq!(submission.command_buffer, command_buffer());
        assert_eq!(submission.wait_semaphore, pool[0].image_available);
        assert_eq!(submission.wait_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(submission.signal_semaphore, pool[0].render_finished);
        assert_eq!(submission.fence, pool[0].in_flight);

        assert_eq!(image.image_index, 2);
        assert_eq!(*chain.presented.borrow(), vec![(2, pool[0].render_finished)]);
    }

    #[test]
    fn images_in_flight_sized_on_first_acquire() {
        let (_device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(4);
        chain.queue_images(&[3]);

        run_frame(&mut pacer, &mut pool, &chain);

        assert_eq!(pool.images_in_flight().len(), 4);
        assert_eq!(pool.images_in_flight().owner(3), Some(pool[0].in_flight));
    }

    #[test]
    fn suboptimal_present_marks_dirty_and_advances() {
        let (_device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);
        chain.queue_images(&[0]);
        chain.queue_present(PresentOutcome::Suboptimal);

        let (_, status) = run_frame(&mut pacer, &mut pool, &chain);

        assert_eq!(status, FrameStatus::SwapchainOutOfDate);
        assert_eq!(pacer.current_slot(), 1);
    }

    #[test]
    fn out_of_date_present_defers_recreation() {
        let (device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);
        chain.queue_images(&[1]);
        chain.queue_present(PresentOutcome::OutOfDate);

        let (_, status) = run_frame(&mut pacer, &mut pool, &chain);
        assert_eq!(status, FrameStatus::SwapchainOutOfDate);

        let waits_before = device.waits().len();
        let next = pacer.acquire(false, &mut pool, &chain).unwrap();
        assert_eq!(next, Acquire::SwapchainOutOfDate);
        assert_eq!(device.waits().len(), waits_before);
    }

    #[test]
    fn suboptimal_acquire_finishes_frame_then_reports() {
        let (device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);
        chain.queue_acquire(AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: true,
        });

        let image = match pacer.acquire(false, &mut pool, &chain).unwrap() {
            Acquire::Ready(image) => image,
            Acquire::SwapchainOutOfDate => panic!("suboptimal image must still be rendered"),
        };
        let status = pacer.present(image, command_buffer(), &pool, &chain).unwrap();

        assert_eq!(status, FrameStatus::SwapchainOutOfDate);
        assert_eq!(device.submissions().len(), 1);
    }

    #[test]
    fn reset_clears_ownership_and_counter() {
        let (_device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);
        chain.queue_images(&[0, 2, 1]);
        chain.queue_present(PresentOutcome::Presented);
        chain.queue_present(PresentOutcome::Presented);
        chain.queue_present(PresentOutcome::OutOfDate);

        for _ in 0..3 {
            run_frame(&mut pacer, &mut pool, &chain);
        }
        assert_eq!(pacer.current_slot(), 1);
        assert!(pacer.is_dirty());

        pacer.reset(&mut pool, 5);

        assert_eq!(pacer.current_slot(), 0);
        assert_eq!(pacer.status(), FrameStatus::Ready);
        assert_eq!(pool.images_in_flight().len(), 5);
        assert!(pool.images_in_flight().is_unclaimed());
    }

    #[test]
    fn single_slot_never_waits_on_its_own_fence_twice() {
        let (device, mut pool, mut pacer) = setup(1);
        let chain = MockChain::new(2);
        chain.queue_images(&[0, 0, 0]);

        for _ in 0..3 {
            let (image, _) = run_frame(&mut pacer, &mut pool, &chain);
            assert_eq!(image.slot, 0);
        }

        assert_eq!(device.waits(), vec![pool[0].in_flight; 3]);
    }

    #[test]
    fn acquire_errors_propagate() {
        let (_device, mut pool, mut pacer) = setup(2);
        let chain = MockChain::new(3);

        assert!(pacer.acquire(false, &mut pool, &chain).is_err());
    }
}
