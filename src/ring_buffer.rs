//! FIFO suballocation from a set of caller-supplied backing buffers

use std::collections::VecDeque;

use ash::vk;

use crate::memory::align;
use crate::{BufferRange, Error, Result};

/// A buffer that can back a ring region
pub trait RegionBuffer {
    fn handle(&self) -> vk::Buffer;

    fn size(&self) -> vk::DeviceSize;

    /// Required alignment of every offset handed out from this buffer; a power of two
    fn alignment(&self) -> vk::DeviceSize {
        1
    }
}

/// A range of bytes within a buffer
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferView {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl BufferView {
    pub const NULL: Self = Self {
        buffer: vk::Buffer::null(),
        offset: 0,
        size: 0,
    };

    #[inline]
    pub fn is_null(&self) -> bool {
        self.buffer == vk::Buffer::null()
    }

    /// The viewed bytes, in absolute buffer offsets
    #[inline]
    pub fn range(&self) -> BufferRange {
        BufferRange::new(self.offset, self.size)
    }

    /// A view of `size` bytes starting `offset` bytes into `self`
    pub fn slice(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<Self> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(Self {
                buffer: self.buffer,
                offset: self.offset + offset,
                size,
            }),
            _ => Err(Error::RangeOutOfBounds {
                offset,
                size,
                limit: self.size,
            }),
        }
    }
}

/// Ring allocation state for a single backing buffer
///
/// Live allocations occupy `[head, tail)` when `tail > head`. Otherwise the ring has wrapped and
/// they occupy `[head, truncated)` followed by `[0, tail)`.
struct Region<B> {
    buffer: B,
    size: vk::DeviceSize,
    alignment: vk::DeviceSize,
    /// Offset at which the next allocation will start, before alignment
    tail: vk::DeviceSize,
    /// Start of the oldest live allocation
    head: vk::DeviceSize,
    /// End of usable space before the most recent wraparound
    truncated: vk::DeviceSize,
    allocation_count: usize,
}

impl<B: RegionBuffer> Region<B> {
    fn new(buffer: B) -> Self {
        let size = buffer.size();
        let alignment = buffer.alignment().max(1);
        Self {
            buffer,
            size,
            alignment,
            tail: 0,
            head: 0,
            truncated: size,
            allocation_count: 0,
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.allocation_count == 0
    }

    fn reset(&mut self) {
        self.tail = 0;
        self.head = 0;
        self.truncated = self.size;
    }

    /// Returns the offset of a new allocation of `size` bytes, if there's room
    fn alloc(&mut self, size: vk::DeviceSize) -> Option<vk::DeviceSize> {
        if self.is_empty() {
            if size > self.size {
                return None;
            }
            self.reset();
            return Some(self.place(0, size));
        }
        let start = align(self.tail, self.alignment);
        if self.tail > self.head {
            // Free space runs from the tail to the end of the buffer
            if start.checked_add(size)? <= self.size {
                return Some(self.place(start, size));
            }
            // and from the start of the buffer to the head
            if size <= self.head {
                self.truncated = self.tail;
                return Some(self.place(0, size));
            }
            return None;
        }
        // Wrapped; only the gap between tail and head is free
        if start.checked_add(size)? <= self.head {
            return Some(self.place(start, size));
        }
        None
    }

    fn place(&mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> vk::DeviceSize {
        self.tail = offset + size;
        if self.tail == self.size {
            // Nothing more fits at the end
            self.tail = 0;
            self.truncated = self.size;
        }
        self.allocation_count += 1;
        offset
    }

    /// Undo the most recent allocation, restoring the cursors saved before it was made
    fn unalloc(&mut self, tail: vk::DeviceSize, truncated: vk::DeviceSize) {
        self.allocation_count -= 1;
        if self.is_empty() {
            self.reset();
            return;
        }
        self.tail = tail;
        self.truncated = truncated;
    }

    /// Release the oldest allocation, which ends at `end`
    fn free(&mut self, end: vk::DeviceSize) {
        self.allocation_count -= 1;
        if self.is_empty() {
            self.reset();
            return;
        }
        self.head = end;
        if self.tail <= self.head && self.head >= self.truncated {
            // Crossed the truncated end; everything left starts at 0
            self.head = 0;
            self.truncated = self.size;
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Allocation {
    view: BufferView,
    region: usize,
    /// Region cursors from before the allocation
    prev_tail: vk::DeviceSize,
    prev_truncated: vk::DeviceSize,
}

/// A ring allocator spanning any number of backing buffers
///
/// Allocations are released strictly in the order they were made, regardless of which buffer
/// they came from.
pub struct GrowableRing<B> {
    /// Slots vacated by `shrink` are `None` until reused by `grow`
    regions: Vec<Option<Region<B>>>,
    allocations: VecDeque<Allocation>,
    /// Region most recently allocated from
    active: Option<usize>,
    total_size: vk::DeviceSize,
    allocated_size: vk::DeviceSize,
}

impl<B: RegionBuffer> GrowableRing<B> {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            allocations: VecDeque::new(),
            active: None,
            total_size: 0,
            allocated_size: 0,
        }
    }

    /// Allocate `size` bytes, or return `None` if no region has room
    pub fn push(&mut self, size: vk::DeviceSize) -> Option<BufferView> {
        if size == 0 {
            return None;
        }
        let active = self.active;
        let rest = (0..self.regions.len()).filter(move |&i| Some(i) != active);
        for index in active.into_iter().chain(rest) {
            let Some(region) = self.regions[index].as_mut() else {
                continue;
            };
            let prev = (region.tail, region.truncated);
            if let Some(offset) = region.alloc(size) {
                let view = BufferView {
                    buffer: region.buffer.handle(),
                    offset,
                    size,
                };
                self.record(view, index, prev);
                return Some(view);
            }
        }
        None
    }

    /// Allocate `size` bytes occupying an entire otherwise-empty region
    ///
    /// Useful for isolating allocations when debugging out-of-bounds accesses.
    pub fn push_no_suballocate(&mut self, size: vk::DeviceSize) -> Option<BufferView> {
        if size == 0 {
            return None;
        }
        let index = self.regions.iter().position(|x| {
            x.as_ref()
                .map_or(false, |region| region.is_empty() && region.size >= size)
        })?;
        let region = self.regions[index].as_mut()?;
        region.reset();
        let prev = (region.tail, region.truncated);
        region.place(0, region.size);
        let view = BufferView {
            buffer: region.buffer.handle(),
            offset: 0,
            size,
        };
        self.record(view, index, prev);
        Some(view)
    }

    fn record(
        &mut self,
        view: BufferView,
        region: usize,
        prev: (vk::DeviceSize, vk::DeviceSize),
    ) {
        self.allocations.push_back(Allocation {
            view,
            region,
            prev_tail: prev.0,
            prev_truncated: prev.1,
        });
        self.allocated_size += view.size;
        self.active = Some(region);
    }

    /// Release the newest live allocation, returning its space as if it had never been pushed
    pub fn pop_newest(&mut self) -> Option<BufferView> {
        let alloc = self.allocations.pop_back()?;
        if let Some(region) = self.regions[alloc.region].as_mut() {
            region.unalloc(alloc.prev_tail, alloc.prev_truncated);
        }
        self.allocated_size -= alloc.view.size;
        Some(alloc.view)
    }

    /// Release the oldest live allocation
    pub fn pop(&mut self) -> Option<BufferView> {
        let alloc = self.allocations.pop_front()?;
        if let Some(region) = self.regions[alloc.region].as_mut() {
            region.free(alloc.view.offset + alloc.view.size);
        }
        self.allocated_size -= alloc.view.size;
        Some(alloc.view)
    }

    /// The oldest live allocation
    #[inline]
    pub fn peek(&self) -> Option<BufferView> {
        self.allocations.front().map(|x| x.view)
    }

    /// Add `buffer` as a new region to allocate from
    pub fn grow(&mut self, buffer: B) {
        let region = Region::new(buffer);
        self.total_size += region.size;
        match self.regions.iter().position(|x| x.is_none()) {
            Some(slot) => self.regions[slot] = Some(region),
            None => self.regions.push(Some(region)),
        }
    }

    /// Remove a region with no live allocations, returning its buffer
    pub fn shrink(&mut self) -> Option<B> {
        let index = self
            .regions
            .iter()
            .rposition(|x| x.as_ref().map_or(false, |region| region.is_empty()))?;
        let region = self.regions[index].take()?;
        if self.active == Some(index) {
            self.active = None;
        }
        self.total_size -= region.size;
        Some(region.buffer)
    }

    /// Remove every region regardless of live allocations, returning their buffers
    pub fn drain(&mut self) -> impl Iterator<Item = B> + '_ {
        self.allocations.clear();
        self.active = None;
        self.total_size = 0;
        self.allocated_size = 0;
        self.regions.drain(..).flatten().map(|x| x.buffer)
    }

    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.iter().filter(|x| x.is_some()).count()
    }

    #[inline]
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Combined size of every region
    #[inline]
    pub fn total_size(&self) -> vk::DeviceSize {
        self.total_size
    }

    /// Bytes covered by live allocations, excluding padding
    #[inline]
    pub fn allocated_size(&self) -> vk::DeviceSize {
        self.allocated_size
    }
}

impl<B: RegionBuffer> Default for GrowableRing<B> {
    fn default() -> Self {
        Self::new()
    }
}
