use crate::error::{RendererError, Result};

/// Free list for the "image acquired" semaphores.
///
/// There is one semaphore more than there are presentable images. An acquire call needs its
/// semaphore before it knows which image it gets, so one index is always free to hand out.
/// Once the image index is known the semaphore is bound to that slot, and the semaphore the
/// slot used last time goes back to the free list. Reusing it is only sound because the
/// caller waits on the slot's fence before the next [`SemaphorePool::take`], which
/// `Renderer::render` does through `FrameSync::wait_and_reset` for every submitted slot.
///
/// `available[..free_count]` holds the free indices, `free_count` is the cursor.
#[derive(Debug, Clone)]
pub struct SemaphorePool {
    available: Box<[usize]>,
    free_count: usize,
    held: Box<[Option<usize>]>,
}

impl SemaphorePool {
    pub fn new(slot_count: usize) -> Self {
        let capacity = slot_count + 1;
        Self {
            available: (0..capacity).rev().collect(),
            free_count: capacity,
            held: vec![None; slot_count].into_boxed_slice(),
        }
    }

    /// Number of semaphores, which is one more than the number of slots.
    pub fn capacity(&self) -> usize {
        self.available.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn in_use_count(&self) -> usize {
        self.capacity() - self.free_count
    }

    /// The semaphore currently bound to a slot.
    pub fn held_by(&self, slot: usize) -> Option<usize> {
        self.held[slot]
    }

    /// Hands out a free semaphore for the next acquire call.
    pub fn take(&mut self) -> Result<usize> {
        if self.free_count == 0 {
            return Err(RendererError::SemaphorePoolExhausted);
        }
        self.free_count -= 1;
        Ok(self.available[self.free_count])
    }

    /// Returns a semaphore whose acquire call failed and therefore never got signaled.
    pub fn give_back(&mut self, index: usize) {
        self.release(index);
    }

    /// Binds a taken semaphore to the slot whose image it was signaled for.
    pub fn bind(&mut self, slot: usize, index: usize) {
        debug_assert!(
            !self.available[..self.free_count].contains(&index),
            "semaphore {index} is still in the free list"
        );
        if let Some(previous) = self.held[slot].replace(index) {
            self.release(previous);
        }
    }

    fn release(&mut self, index: usize) {
        debug_assert!(self.free_count < self.capacity(), "free list overflow");
        self.available[self.free_count] = index;
        self.free_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_one_more_semaphore_than_slots() {
        let pool = SemaphorePool::new(3);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.free_count(), 4);
        assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn binding_returns_the_previous_semaphore_of_the_slot() {
        let mut pool = SemaphorePool::new(2);

        let first = pool.take().unwrap();
        pool.bind(0, first);
        assert_eq!(pool.held_by(0), Some(first));

        let second = pool.take().unwrap();
        assert_ne!(first, second);
        pool.bind(0, second);

        assert_eq!(pool.held_by(0), Some(second));
        assert_eq!(pool.in_use_count(), 1);
    }

    #[test]
    fn never_hands_out_a_semaphore_that_is_in_use() {
        let mut pool = SemaphorePool::new(3);
        // Images come back in an arbitrary order
        let image_order = [0, 1, 2, 1, 0, 2, 2, 1, 0, 0, 1, 2, 1];

        for &slot in image_order.iter() {
            let index = pool.take().unwrap();
            for other in 0..3 {
                assert_ne!(pool.held_by(other), Some(index));
            }
            pool.bind(slot, index);

            let held = (0..3).filter(|&s| pool.held_by(s).is_some()).count();
            assert_eq!(pool.in_use_count(), held);
            assert!(pool.free_count() >= 1);
        }
    }

    #[test]
    fn give_back_restores_the_free_list() {
        let mut pool = SemaphorePool::new(1);
        let index = pool.take().unwrap();
        pool.give_back(index);
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.take().unwrap(), index);
    }

    #[test]
    fn reports_exhaustion_instead_of_reusing() {
        let mut pool = SemaphorePool::new(1);
        pool.take().unwrap();
        pool.take().unwrap();
        assert!(matches!(
            pool.take(),
            Err(RendererError::SemaphorePoolExhausted)
        ));
    }
}
