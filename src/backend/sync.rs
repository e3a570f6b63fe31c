// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync. These triples are the
// only thing stopping us from reusing an image that is still being
// presented or a command buffer that is still in flight.

use ash::vk;
use anyhow::{Context, Result};
use super::VulkanDevice;

/// One set per swapchain image
#[derive(Debug, Default)]
pub struct FrameSync {
    /// Signaled by the presentation engine when the acquired image is ready
    pub image_available: vk::Semaphore,
    /// Signaled by the queue when rendering is done; present waits on it
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    /// All three objects or none: a failure releases whatever was created.
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let mut sync = Self::default();
        if let Err(e) = sync.create(&device.device) {
            sync.destroy(&device.device);
            return Err(e);
        }
        Ok(sync)
    }

    fn create(&mut self, device: &ash::Device) -> Result<()> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED); // First wait must not block

        unsafe {
            self.image_available = device.create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;
            self.render_finished = device.create_semaphore(&semaphore_info, None)
                .context("Failed to create render-finished semaphore")?;
            self.in_flight_fence = device.create_fence(&fence_info, None)
                .context("Failed to create in-flight fence")?;
        }
        Ok(())
    }

    /// Null handles are ignored by the driver, so a half-built set is fine.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Where a frame slot is in its trip through `Presenter::draw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Available,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

impl SlotState {
    pub fn next(self) -> Self {
        match self {
            SlotState::Available => SlotState::Acquiring,
            SlotState::Acquiring => SlotState::Recording,
            SlotState::Recording => SlotState::Submitted,
            SlotState::Submitted => SlotState::Presenting,
            SlotState::Presenting => SlotState::Available,
        }
    }
}

/// Monotonic frame counter folded onto a fixed number of slots.
#[derive(Debug, Clone)]
pub struct FrameRing {
    current: usize,
    states: Vec<SlotState>,
    fence_cycles: Vec<u64>,
    completed: Vec<u64>,
}

impl FrameRing {
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "a frame ring needs at least one slot");
        Self {
            current: 0,
            states: vec![SlotState::Available; slots],
            fence_cycles: vec![0; slots],
            completed: vec![0; slots],
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// The current slot's fence has been waited on and reset.
    pub fn fence_cycled(&mut self) {
        self.fence_cycles[self.current] += 1;
    }

    /// Move the current slot one step through its state machine.
    pub fn step(&mut self) -> SlotState {
        let state = &mut self.states[self.current];
        *state = state.next();
        *state
    }

    /// Finish the current slot and move to the next one.
    pub fn advance(&mut self) -> usize {
        self.states[self.current] = SlotState::Available;
        self.completed[self.current] += 1;
        self.current = (self.current + 1) % self.states.len();
        self.current
    }

    /// Frames completed through each slot.
    pub fn completed(&self) -> &[u64] {
        &self.completed
    }

    /// Fence wait/reset cycles per slot.
    pub fn fence_cycles(&self) -> &[u64] {
        &self.fence_cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_cycles_with_period_n() {
        for slots in 1..=5 {
            let mut ring = FrameRing::new(slots);
            let visited: Vec<usize> = (0..slots * 3)
                .map(|_| {
                    let slot = ring.current();
                    ring.advance();
                    slot
                })
                .collect();

            let expected: Vec<usize> = (0..slots * 3).map(|i| i % slots).collect();
            assert_eq!(visited, expected, "{} slots", slots);
            assert_eq!(ring.current(), 0);
        }
    }

    #[test]
    fn completions_spread_evenly() {
        let mut ring = FrameRing::new(3);
        for _ in 0..100 {
            ring.advance();
        }
        assert_eq!(ring.completed(), &[34, 33, 33]);
        assert_eq!(ring.completed().iter().sum::<u64>(), 100);
    }

    #[test]
    fn slot_walks_full_state_machine() {
        let mut ring = FrameRing::new(2);
        assert_eq!(ring.state(0), SlotState::Available);
        assert_eq!(ring.step(), SlotState::Acquiring);
        assert_eq!(ring.step(), SlotState::Recording);
        assert_eq!(ring.step(), SlotState::Submitted);
        assert_eq!(ring.step(), SlotState::Presenting);
        assert_eq!(ring.state(1), SlotState::Available);

        ring.advance();
        assert_eq!(ring.state(0), SlotState::Available);
        assert_eq!(ring.current(), 1);
    }

    #[test]
    fn fence_cycles_follow_the_current_slot() {
        let mut ring = FrameRing::new(2);
        ring.fence_cycled();
        assert_eq!(ring.fence_cycles(), &[1, 0]);
        assert_eq!(ring.completed(), &[0, 0]);

        ring.advance();
        ring.fence_cycled();
        ring.advance();
        ring.fence_cycled();
        assert_eq!(ring.fence_cycles(), &[2, 1]);
        assert_eq!(ring.completed(), &[1, 1]);
    }

    #[test]
    fn unbuilt_sync_set_is_all_null() {
        let sync = FrameSync::default();
        assert_eq!(sync.image_available, vk::Semaphore::null());
        assert_eq!(sync.render_finished, vk::Semaphore::null());
        assert_eq!(sync.in_flight_fence, vk::Fence::null());
    }

    #[test]
    fn presenting_wraps_to_available() {
        assert_eq!(SlotState::Presenting.next(), SlotState::Available);
    }

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn empty_ring_is_rejected() {
        FrameRing::new(0);
    }
}
