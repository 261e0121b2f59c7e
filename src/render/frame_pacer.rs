use ash::vk;

use crate::error::Result;

use super::semaphore_pool::SemaphorePool;

/// Frames traced while the window is minimized always use this slot.
pub const OFFSCREEN_SLOT: usize = 0;

/// Where a frame goes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameRoute {
    /// Acquire a presentable image, trace, copy and present.
    Present,
    /// The surface has no extent. Only trace into the accumulation image, using slot 0.
    Offscreen,
}

impl FrameRoute {
    pub fn for_extent(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            FrameRoute::Offscreen
        } else {
            FrameRoute::Present
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Submitted,
    Presented,
}

/// Bookkeeping for the frame slots and their acquire semaphores.
///
/// A slot moves IDLE -> ACQUIRING -> SUBMITTED -> PRESENTED. It goes back to IDLE when the
/// presentation engine hands its image out again, which is also when its old acquire
/// semaphore returns to the pool.
#[derive(Debug)]
pub struct FramePacer {
    semaphores: SemaphorePool,
    slots: Vec<SlotState>,
}

/// A semaphore taken for an acquire call that has not returned an image yet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PendingAcquire {
    pub semaphore_index: usize,
}

impl FramePacer {
    pub fn new(slot_count: usize) -> Self {
        Self {
            semaphores: SemaphorePool::new(slot_count),
            slots: vec![SlotState::Idle; slot_count],
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn semaphore_count(&self) -> usize {
        self.semaphores.capacity()
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    pub fn in_use_semaphores(&self) -> usize {
        self.semaphores.in_use_count()
    }

    /// Slots that currently hold an acquire semaphore.
    pub fn active_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|state| **state != SlotState::Idle)
            .count()
    }

    pub fn begin_acquire(&mut self) -> Result<PendingAcquire> {
        let semaphore_index = self.semaphores.take()?;
        Ok(PendingAcquire { semaphore_index })
    }

    /// The acquire call failed, its semaphore was never signaled.
    pub fn abandon_acquire(&mut self, pending: PendingAcquire) {
        self.semaphores.give_back(pending.semaphore_index);
    }

    /// The acquire call returned `slot`. Returns the semaphore index the submission has to wait on.
    pub fn image_acquired(&mut self, pending: PendingAcquire, slot: usize) -> usize {
        debug_assert!(
            matches!(self.slots[slot], SlotState::Idle | SlotState::Presented),
            "slot {slot} acquired while {:?}",
            self.slots[slot]
        );
        // PRESENTED -> IDLE happens implicitly here
        self.semaphores.bind(slot, pending.semaphore_index);
        self.slots[slot] = SlotState::Acquiring;
        pending.semaphore_index
    }

    pub fn submitted(&mut self, slot: usize) {
        debug_assert_eq!(self.slots[slot], SlotState::Acquiring);
        self.slots[slot] = SlotState::Submitted;
    }

    pub fn presented(&mut self, slot: usize) {
        debug_assert_eq!(self.slots[slot], SlotState::Submitted);
        self.slots[slot] = SlotState::Presented;
    }
}

/// The device side of a frame. [`drive_frame`] decides which of these run and in which order.
pub trait FrameTarget {
    /// Asks for the next presentable image, signaling acquire semaphore `semaphore_index`.
    fn acquire(&mut self, semaphore_index: usize) -> Result<u32>;

    /// Waits for the previous work of `slot`, writes its uniform and submits its commands so
    /// that they wait on acquire semaphore `wait_semaphore`.
    fn submit(&mut self, slot: usize, wait_semaphore: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Like [`FrameTarget::submit`], but only traces and uses no semaphores at all.
    fn submit_offscreen(&mut self, slot: usize) -> Result<()>;
}

/// Runs one frame along `route` and returns the slot whose uniform was written.
///
/// The offscreen route never touches the swapchain or the pacer.
pub fn drive_frame(
    pacer: &mut FramePacer,
    route: FrameRoute,
    target: &mut impl FrameTarget,
) -> Result<usize> {
    match route {
        FrameRoute::Offscreen => {
            target.submit_offscreen(OFFSCREEN_SLOT)?;
            Ok(OFFSCREEN_SLOT)
        }
        FrameRoute::Present => {
            let pending = pacer.begin_acquire()?;
            let image_index = match target.acquire(pending.semaphore_index) {
                Ok(image_index) => image_index,
                Err(err) => {
                    pacer.abandon_acquire(pending);
                    return Err(err);
                }
            };

            let slot = image_index as usize;
            let wait_semaphore = pacer.image_acquired(pending, slot);
            target.submit(slot, wait_semaphore)?;
            pacer.submitted(slot);
            target.present(slot, image_index)?;
            pacer.presented(slot);
            Ok(slot)
        }
    }
}

/// The Vulkan objects the pacer hands out by index.
pub struct FrameSync {
    pub image_acquired: Vec<vk::Semaphore>,
    pub render_complete: Vec<vk::Semaphore>,
    pub fences: Vec<vk::Fence>,
    device: ash::Device,
}

impl FrameSync {
    pub fn new(device: &ash::Device, slot_count: usize) -> Result<Self> {
        let mut sync = Self {
            image_acquired: Vec::with_capacity(slot_count + 1),
            render_complete: Vec::with_capacity(slot_count),
            fences: Vec::with_capacity(slot_count),
            device: device.clone(),
        };

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled, so the very first wait on every slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        for _ in 0..slot_count + 1 {
            let semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }?;
            sync.image_acquired.push(semaphore);
        }
        for _ in 0..slot_count {
            let semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }?;
            sync.render_complete.push(semaphore);
            let fence = unsafe { device.create_fence(&fence_info, None) }?;
            sync.fences.push(fence);
        }

        Ok(sync)
    }

    pub fn wait_and_reset(&self, slot: usize) -> Result<()> {
        let fence = std::slice::from_ref(&self.fences[slot]);
        unsafe { self.device.wait_for_fences(fence, true, u64::MAX) }?;
        unsafe { self.device.reset_fences(fence) }?;
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        for &semaphore in self.image_acquired.iter().chain(self.render_complete.iter()) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
        for &fence in self.fences.iter() {
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RendererError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Acquire(usize),
        Submit { slot: usize, wait_semaphore: usize },
        Present(usize),
        SubmitOffscreen(usize),
    }

    /// Hands out images in a fixed order and records every call.
    struct RecordingTarget {
        images: Vec<u32>,
        fail_acquire: bool,
        calls: Vec<Call>,
    }

    impl RecordingTarget {
        fn new(images: &[u32]) -> Self {
            Self {
                images: images.iter().rev().copied().collect(),
                fail_acquire: false,
                calls: vec![],
            }
        }
    }

    impl FrameTarget for RecordingTarget {
        fn acquire(&mut self, semaphore_index: usize) -> Result<u32> {
            self.calls.push(Call::Acquire(semaphore_index));
            if self.fail_acquire {
                return Err(RendererError::SurfaceOutOfDate);
            }
            Ok(self.images.pop().expect("test ran out of images"))
        }

        fn submit(&mut self, slot: usize, wait_semaphore: usize) -> Result<()> {
            self.calls.push(Call::Submit {
                slot,
                wait_semaphore,
            });
            Ok(())
        }

        fn present(&mut self, slot: usize, _image_index: u32) -> Result<()> {
            self.calls.push(Call::Present(slot));
            Ok(())
        }

        fn submit_offscreen(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::SubmitOffscreen(slot));
            Ok(())
        }
    }

    fn snapshot(pacer: &FramePacer) -> (usize, Vec<SlotState>) {
        let states = (0..pacer.slot_count()).map(|slot| pacer.slot_state(slot)).collect();
        (pacer.in_use_semaphores(), states)
    }

    fn run_frame(pacer: &mut FramePacer, slot: usize) {
        let pending = pacer.begin_acquire().unwrap();
        let semaphore = pacer.image_acquired(pending, slot);
        assert_eq!(semaphore, pending.semaphore_index);
        pacer.submitted(slot);
        assert_eq!(pacer.in_use_semaphores(), pacer.active_slots());
        pacer.presented(slot);
    }

    #[test]
    fn zero_extent_takes_the_offscreen_route() {
        assert_eq!(FrameRoute::for_extent(0, 0), FrameRoute::Offscreen);
        assert_eq!(FrameRoute::for_extent(640, 0), FrameRoute::Offscreen);
        assert_eq!(FrameRoute::for_extent(0, 480), FrameRoute::Offscreen);
        assert_eq!(FrameRoute::for_extent(64, 64), FrameRoute::Present);
    }

    #[test]
    fn walks_through_the_slot_states() {
        let mut pacer = FramePacer::new(2);
        assert_eq!(pacer.semaphore_count(), 3);

        let pending = pacer.begin_acquire().unwrap();
        pacer.image_acquired(pending, 1);
        assert_eq!(pacer.slot_state(1), SlotState::Acquiring);
        assert_eq!(pacer.slot_state(0), SlotState::Idle);

        pacer.submitted(1);
        assert_eq!(pacer.slot_state(1), SlotState::Submitted);

        pacer.presented(1);
        assert_eq!(pacer.slot_state(1), SlotState::Presented);
    }

    #[test]
    fn in_use_semaphores_match_active_slots() {
        let mut pacer = FramePacer::new(3);
        for slot in [0, 1, 2, 0, 2, 1, 1, 0, 2, 2] {
            run_frame(&mut pacer, slot);
            assert_eq!(pacer.in_use_semaphores(), pacer.active_slots());
        }
    }

    #[test]
    fn abandoned_acquire_frees_its_semaphore() {
        let mut pacer = FramePacer::new(2);
        run_frame(&mut pacer, 0);

        let pending = pacer.begin_acquire().unwrap();
        assert_eq!(pacer.in_use_semaphores(), 2);
        pacer.abandon_acquire(pending);
        assert_eq!(pacer.in_use_semaphores(), 1);
        assert_eq!(pacer.in_use_semaphores(), pacer.active_slots());
    }

    #[test]
    fn presents_in_acquire_submit_present_order() {
        let mut pacer = FramePacer::new(2);
        let mut target = RecordingTarget::new(&[1, 0]);

        assert_eq!(drive_frame(&mut pacer, FrameRoute::Present, &mut target).unwrap(), 1);
        assert_eq!(drive_frame(&mut pacer, FrameRoute::Present, &mut target).unwrap(), 0);

        let first = match target.calls[0] {
            Call::Acquire(index) => index,
            ref call => panic!("frame started with {call:?}"),
        };
        assert_eq!(
            target.calls[1..3],
            [
                Call::Submit {
                    slot: 1,
                    wait_semaphore: first
                },
                Call::Present(1)
            ]
        );
        assert_eq!(target.calls.len(), 6);
        assert_eq!(pacer.slot_state(0), SlotState::Presented);
        assert_eq!(pacer.slot_state(1), SlotState::Presented);
        assert_eq!(pacer.in_use_semaphores(), 2);
    }

    #[test]
    fn offscreen_frames_skip_acquire_and_present() {
        let mut pacer = FramePacer::new(3);
        let mut target = RecordingTarget::new(&[2, 1]);
        drive_frame(&mut pacer, FrameRoute::Present, &mut target).unwrap();
        drive_frame(&mut pacer, FrameRoute::Present, &mut target).unwrap();
        let before = snapshot(&pacer);
        target.calls.clear();

        for _ in 0..4 {
            let slot = drive_frame(&mut pacer, FrameRoute::Offscreen, &mut target).unwrap();
            assert_eq!(slot, OFFSCREEN_SLOT);
        }

        assert_eq!(target.calls, vec![Call::SubmitOffscreen(OFFSCREEN_SLOT); 4]);
        assert_eq!(snapshot(&pacer), before);
        assert_eq!(pacer.slot_state(OFFSCREEN_SLOT), SlotState::Idle);
    }

    #[test]
    fn presenting_resumes_after_offscreen_frames() {
        let mut pacer = FramePacer::new(2);
        let mut target = RecordingTarget::new(&[0, 1]);
        drive_frame(&mut pacer, FrameRoute::Present, &mut target).unwrap();
        drive_frame(&mut pacer, FrameRoute::Offscreen, &mut target).unwrap();
        drive_frame(&mut pacer, FrameRoute::Present, &mut target).unwrap();

        assert_eq!(pacer.in_use_semaphores(), pacer.active_slots());
        assert_eq!(pacer.in_use_semaphores(), 2);
    }

    #[test]
    fn failed_acquire_submits_nothing() {
        let mut pacer = FramePacer::new(2);
        let mut target = RecordingTarget::new(&[1]);
        drive_frame(&mut pacer, FrameRoute::Present, &mut target).unwrap();
        let before = snapshot(&pacer);

        target.fail_acquire = true;
        let result = drive_frame(&mut pacer, FrameRoute::Present, &mut target);
        assert!(matches!(result, Err(RendererError::SurfaceOutOfDate)));

        assert!(matches!(target.calls.last(), Some(Call::Acquire(_))));
        assert_eq!(snapshot(&pacer), before);
    }
}
