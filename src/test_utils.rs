//! In-memory stand-ins for the device, for unit tests

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use ash::{vk, vk::Handle};

use crate::auto_ring::BackingAllocator;
use crate::graveyard::Destroyer;
use crate::queue::{CompletionSource, QueueInfo, Timeline};
use crate::ring_buffer::RegionBuffer;
use crate::{DeviceQueue, Error, Graveyard, QueueType, Result};

/// Queues whose progress is set explicitly by the test
pub struct FakeDevice {
    completed: Box<[AtomicU64]>,
    lost: AtomicBool,
}

impl FakeDevice {
    pub fn new(queue_count: usize) -> Self {
        Self {
            completed: (0..queue_count).map(|_| AtomicU64::new(0)).collect(),
            lost: AtomicBool::new(false),
        }
    }

    /// Mark all work on `queue` up to `timestamp` complete
    pub fn signal(&self, queue: usize, timestamp: u64) {
        self.completed[queue].fetch_max(timestamp, Ordering::SeqCst);
    }

    pub fn lose(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }
}

impl CompletionSource for FakeDevice {
    fn completed(&self, queue: usize) -> Result<u64> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(Error::DeviceLost);
        }
        Ok(self.completed[queue].load(Ordering::SeqCst))
    }

    /// Never blocks; times out immediately if the wait isn't already satisfied
    fn wait(&self, waits: &[(usize, u64)], wait_all: bool, _timeout: Duration) -> Result<bool> {
        let mut reached = Vec::with_capacity(waits.len());
        for &(queue, timestamp) in waits {
            reached.push(self.completed(queue)? >= timestamp);
        }
        Ok(if wait_all {
            reached.iter().all(|&x| x)
        } else {
            reached.iter().any(|&x| x)
        })
    }
}

/// Records destroyed handles instead of destroying them
#[derive(Default)]
pub struct FakeDestroyer {
    destroyed: Mutex<Vec<(vk::ObjectType, u64)>>,
}

impl FakeDestroyer {
    pub fn destroyed(&self) -> Vec<(vk::ObjectType, u64)> {
        self.destroyed.lock().unwrap().clone()
    }
}

impl Destroyer for FakeDestroyer {
    unsafe fn destroy(&self, ty: vk::ObjectType, handle: u64) {
        let mut destroyed = self.destroyed.lock().unwrap();
        assert!(
            !destroyed.contains(&(ty, handle)),
            "{:?} {:#x} destroyed twice",
            ty,
            handle
        );
        destroyed.push((ty, handle));
    }
}

/// A single-queue timeline and a graveyard recording into a fake destroyer
pub fn graveyard() -> (Arc<Timeline>, Arc<FakeDestroyer>, Graveyard) {
    let timeline = Arc::new(Timeline::new([QueueInfo {
        queue: DeviceQueue::new(QueueType::Graphics, 0),
        family_index: 0,
    }]));
    let destroyer = Arc::new(FakeDestroyer::default());
    let graveyard = Graveyard::new(destroyer.clone(), timeline.clone());
    (timeline, destroyer, graveyard)
}

#[derive(Debug)]
pub struct FakeBuffer {
    id: u64,
    size: vk::DeviceSize,
    alignment: vk::DeviceSize,
}

impl FakeBuffer {
    pub fn new(id: u64, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Self {
        Self {
            id,
            size,
            alignment,
        }
    }

    pub fn handle_for(id: u64) -> vk::Buffer {
        vk::Buffer::from_raw(0x1000 + id)
    }
}

impl RegionBuffer for FakeBuffer {
    fn handle(&self) -> vk::Buffer {
        Self::handle_for(self.id)
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn alignment(&self) -> vk::DeviceSize {
        self.alignment
    }
}

/// Hands out [`FakeBuffer`]s, counting those not yet released across all clones
#[derive(Clone, Default)]
pub struct FakeAllocator {
    next_id: Arc<AtomicU64>,
    live: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl FakeAllocator {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.live.clone()
    }

    /// Make the next allocation fail as if out of device memory
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl BackingAllocator for FakeAllocator {
    type Buffer = FakeBuffer;

    fn allocate(&mut self, size: vk::DeviceSize, _: vk::BufferUsageFlags) -> Result<FakeBuffer> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(Error::OutOfDeviceMemory);
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeBuffer::new(id, size, 1))
    }

    fn release(&mut self, _: FakeBuffer) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
