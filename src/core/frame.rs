//! Per-frame tool ring.
//!
//! Command pools, fences and the acquire/present semaphores live
//! inside wgpu's queue, so the ring holds what remains per in-flight
//! frame: one view-data uniform buffer per slot and the frame index
//! that advances after each submission.

use crate::camera::ViewData;

/// Maximum number of frames recorded ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// One slot of per-frame state.
pub struct FrameSlot {
    /// View-data uniform buffer, rewritten at the start of the frame.
    pub view_buffer: wgpu::Buffer,
}

/// Ring of [`FRAMES_IN_FLIGHT`] frame slots.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    index: usize,
}

impl FrameRing {
    /// Create the ring with one view uniform buffer per slot.
    pub fn new(device: &wgpu::Device) -> Self {
        let slots = (0..FRAMES_IN_FLIGHT)
            .map(|i| FrameSlot {
                view_buffer: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("View Data Buffer {i}")),
                    size: std::mem::size_of::<ViewData>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
            })
            .collect();

        Self { slots, index: 0 }
    }

    /// Current frame slot.
    #[inline]
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.index]
    }

    /// Current slot index.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// All slots, for building per-slot bind groups.
    #[inline]
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Advance to the next slot; called once after each submission.
    #[inline]
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % FRAMES_IN_FLIGHT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_wraps() {
        let mut index = 0usize;
        for _ in 0..FRAMES_IN_FLIGHT * 3 {
            index = (index + 1) % FRAMES_IN_FLIGHT;
        }
        assert_eq!(index, 0);
    }
}
