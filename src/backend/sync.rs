// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// One {semaphore, semaphore, fence} triple per frame in flight, plus the
// image -> fence table that stops two frames from rendering into the same
// swapchain image at once.

use anyhow::{Context, Result};
use ash::vk;
use std::ops::Index;
use std::sync::Arc;

/// Device operations the frame pool and pacer depend on
pub trait SyncDevice {
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks with no timeout until `fence` is signaled
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
}

/// One frame's worth of queue submission
#[derive(Debug, Clone, Copy)]
pub struct FrameSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Graphics queue submission
pub trait SubmitQueue {
    fn submit(&self, submission: &FrameSubmission) -> Result<()>;
}

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Swapchain image index -> fence of the frame currently rendering into it
#[derive(Debug, Default)]
pub struct ImagesInFlight {
    owners: Vec<Option<vk::Fence>>,
}

impl ImagesInFlight {
    /// Drop every association and size the table for `image_count` images
    pub fn reset(&mut self, image_count: usize) {
        self.owners.clear();
        self.owners.resize(image_count, None);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, image_index: u32) -> Option<vk::Fence> {
        self.owners.get(image_index as usize).copied().flatten()
    }

    /// Record `fence` as the owner of `image_index`, returning the previous owner
    pub fn claim(&mut self, image_index: u32, fence: vk::Fence) -> Result<Option<vk::Fence>> {
        let len = self.owners.len();
        let slot = self.owners.get_mut(image_index as usize).with_context(|| {
            format!(
                "Image index {} outside images-in-flight table of {}",
                image_index, len
            )
        })?;
        Ok(slot.replace(fence))
    }

    #[cfg(test)]
    pub fn is_unclaimed(&self) -> bool {
        self.owners.iter().all(Option::is_none)
    }
}

/// Owns every frame slot's sync objects; destroys them on drop
pub struct FrameSyncPool<D: SyncDevice> {
    frames: Vec<FrameSync>,
    images_in_flight: ImagesInFlight,
    device: Arc<D>,
}

impl<D: SyncDevice> FrameSyncPool<D> {
    /// Allocate `slot_count` triples, fences created signaled so the first
    /// wait on an unused slot returns immediately
    pub fn new(device: Arc<D>, slot_count: usize) -> Result<Self> {
        if slot_count == 0 {
            anyhow::bail!("At least one frame slot is required");
        }

        let mut pool = Self {
            frames: Vec::with_capacity(slot_count),
            images_in_flight: ImagesInFlight::default(),
            device,
        };

        // Objects are stored as soon as they exist, so a failure part-way
        // through still releases everything on drop
        for slot in 0..slot_count {
            pool.frames.push(FrameSync::default());
            let sync = &mut pool.frames[slot];
            sync.image_available = pool
                .device
                .create_semaphore()
                .context("Failed to create image-available semaphore")?;
            sync.render_finished = pool
                .device
                .create_semaphore()
                .context("Failed to create render-finished semaphore")?;
            sync.in_flight = pool
                .device
                .create_fence(true)
                .context("Failed to create in-flight fence")?;
        }

        log::info!("Created {} frame sync slots", slot_count);
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn images_in_flight(&self) -> &ImagesInFlight {
        &self.images_in_flight
    }

    pub fn images_in_flight_mut(&mut self) -> &mut ImagesInFlight {
        &mut self.images_in_flight
    }
}

impl<D: SyncDevice> Index<usize> for FrameSyncPool<D> {
    type Output = FrameSync;

    fn index(&self, slot: usize) -> &FrameSync {
        &self.frames[slot]
    }
}

impl<D: SyncDevice> Drop for FrameSyncPool<D> {
    fn drop(&mut self) {
        // Fences referenced here are about to dangle
        self.images_in_flight.reset(0);

        for sync in self.frames.drain(..) {
            if sync.image_available != vk::Semaphore::null() {
                self.device.destroy_semaphore(sync.image_available);
            }
            if sync.render_finished != vk::Semaphore::null() {
                self.device.destroy_semaphore(sync.render_finished);
            }
            if sync.in_flight != vk::Fence::null() {
                self.device.destroy_fence(sync.in_flight);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockDevice;
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn every_slot_starts_with_a_signaled_fence() {
        let device = Arc::new(MockDevice::default());
        let pool = FrameSyncPool::new(device.clone(), 2).unwrap();

        assert_eq!(pool.len(), 2);
        for slot in 0..pool.len() {
            assert!(device.is_signaled(pool[slot].in_flight));
            assert_ne!(pool[slot].image_available, pool[slot].render_finished);
        }
        assert_ne!(pool[0].in_flight, pool[1].in_flight);
        assert!(pool.images_in_flight().is_empty());
    }

    #[test]
    fn zero_slots_is_rejected() {
        let device = Arc::new(MockDevice::default());
        assert!(FrameSyncPool::new(device.clone(), 0).is_err());
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn drop_releases_every_object() {
        let device = Arc::new(MockDevice::default());
        let pool = FrameSyncPool::new(device.clone(), 3).unwrap();
        assert_eq!(device.live_objects(), 9);

        drop(pool);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn partial_construction_releases_what_was_created() {
        let device = Arc::new(MockDevice::failing_fence_after(1));
        let result = FrameSyncPool::new(device.clone(), 2);

        assert!(result.is_err());
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn images_in_flight_reset_clears_and_resizes() {
        let mut table = ImagesInFlight::default();
        table.reset(2);
        table.claim(1, vk::Fence::from_raw(7)).unwrap();

        table.reset(4);
        assert_eq!(table.len(), 4);
        assert!(table.is_unclaimed());
    }

    #[test]
    fn claim_returns_previous_owner() {
        let mut table = ImagesInFlight::default();
        table.reset(3);
        let first = vk::Fence::from_raw(1);
        let second = vk::Fence::from_raw(2);

        assert_eq!(table.claim(2, first).unwrap(), None);
        assert_eq!(table.owner(2), Some(first));
        assert_eq!(table.claim(2, second).unwrap(), Some(first));
        assert_eq!(table.owner(2), Some(second));
        assert_eq!(table.owner(0), None);
    }

    #[test]
    fn claim_out_of_range_is_an_error() {
        let mut table = ImagesInFlight::default();
        table.reset(2);
        let err = table.claim(2, vk::Fence::from_raw(1)).unwrap_err();
        assert!(err.to_string().contains("table of 2"));
        assert_eq!(table.owner(5), None);
    }
}
