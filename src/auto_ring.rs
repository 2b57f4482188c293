//! Ring allocation that grows its own backing storage and frees by timestamp

use std::collections::VecDeque;

use ash::vk;
use log::debug;

use crate::ring_buffer::{BufferView, GrowableRing, RegionBuffer};
use crate::{Error, Result};

/// Creates and destroys the buffers backing ring regions
pub trait BackingAllocator {
    type Buffer: RegionBuffer;

    fn allocate(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self::Buffer>;

    /// Dispose of a buffer with no live allocations
    ///
    /// Work submitted before the buffer's allocations were freed may still be executing.
    fn release(&mut self, buffer: Self::Buffer);
}

/// How much larger than strictly necessary new backing regions are
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OverallocationBehavior {
    /// Multiple of the size of the allocation that triggered growth
    pub request_factor: f32,
    /// Multiple of the combined size of existing regions
    pub grow_factor: f32,
    /// Lower bound on the size of a new region, in bytes
    pub min_allocation_size: vk::DeviceSize,
}

impl OverallocationBehavior {
    /// Size of a new region for an allocation of `requested` bytes, given `pool_size` bytes of
    /// existing regions
    pub fn apply(&self, requested: vk::DeviceSize, pool_size: vk::DeviceSize) -> vk::DeviceSize {
        let by_request = (requested as f64 * f64::from(self.request_factor)) as vk::DeviceSize;
        let by_pool = (pool_size as f64 * f64::from(self.grow_factor)) as vk::DeviceSize;
        by_request
            .max(by_pool)
            .max(self.min_allocation_size)
            .max(requested)
    }
}

impl Default for OverallocationBehavior {
    fn default() -> Self {
        Self {
            request_factor: 3.0,
            grow_factor: 1.5,
            min_allocation_size: 65536,
        }
    }
}

/// A [`GrowableRing`] whose regions are obtained from a [`BackingAllocator`] on demand
///
/// Every allocation is tagged with a timestamp and freed once that timestamp is reached.
pub struct AutoRing<A: BackingAllocator> {
    ring: GrowableRing<A::Buffer>,
    allocator: A,
    usage: vk::BufferUsageFlags,
    behavior: OverallocationBehavior,
    /// Timestamp of each live allocation, oldest first
    timestamps: VecDeque<u64>,
    last_timestamp: u64,
}

impl<A: BackingAllocator> AutoRing<A> {
    pub fn new(
        allocator: A,
        usage: vk::BufferUsageFlags,
        behavior: OverallocationBehavior,
    ) -> Self {
        Self {
            ring: GrowableRing::new(),
            allocator,
            usage,
            behavior,
            timestamps: VecDeque::new(),
            last_timestamp: 0,
        }
    }

    /// Allocate `size` bytes to be freed once `timestamp` is reached
    ///
    /// `timestamp` must not precede that of any earlier allocation.
    pub fn push(&mut self, size: vk::DeviceSize, timestamp: u64) -> Result<BufferView> {
        if size == 0 {
            return Err(Error::EmptyRange);
        }
        if timestamp < self.last_timestamp {
            return Err(Error::NonMonotonicTimestamp {
                timestamp,
                last: self.last_timestamp,
            });
        }
        if let Some(view) = self.ring.push(size) {
            self.record(timestamp);
            return Ok(view);
        }
        let region = self.behavior.apply(size, self.ring.total_size());
        let buffer = self.allocator.allocate(region, self.usage)?;
        debug!(
            "growing {:?} ring by {} bytes for a {} byte allocation",
            self.usage, region, size
        );
        self.ring.grow(buffer);
        match self.ring.push(size) {
            Some(view) => {
                self.record(timestamp);
                Ok(view)
            }
            // Alignment padding can't apply to a fresh region, so this is an undersized buffer
            None => Err(Error::RegionTooSmall {
                requested: size,
                region,
            }),
        }
    }

    fn record(&mut self, timestamp: u64) {
        self.timestamps.push_back(timestamp);
        self.last_timestamp = timestamp;
    }

    /// Free every allocation tagged with a timestamp no later than `reached`, returning the
    /// number of bytes freed
    pub fn pop(&mut self, reached: u64) -> vk::DeviceSize {
        let mut freed = 0;
        while self.timestamps.front().map_or(false, |&t| t <= reached) {
            self.timestamps.pop_front();
            if let Some(view) = self.ring.pop() {
                freed += view.size;
            }
        }
        freed
    }

    /// Free the most recent allocation, returning its size
    ///
    /// Only valid while nothing has been recorded against the allocation.
    pub fn pop_newest(&mut self) -> Option<vk::DeviceSize> {
        self.timestamps.pop_back()?;
        self.ring.pop_newest().map(|view| view.size)
    }

    /// Release every region with no live allocations, returning the number of bytes released
    pub fn trim(&mut self) -> vk::DeviceSize {
        let mut released = 0;
        while let Some(buffer) = self.ring.shrink() {
            released += buffer.size();
            self.allocator.release(buffer);
        }
        if released != 0 {
            debug!("trimmed {} bytes from {:?} ring", released, self.usage);
        }
        released
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn ring(&self) -> &GrowableRing<A::Buffer> {
        &self.ring
    }

    #[inline]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

impl<A: BackingAllocator> Drop for AutoRing<A> {
    fn drop(&mut self) {
        for buffer in self.ring.drain() {
            self.allocator.release(buffer);
        }
    }
}
