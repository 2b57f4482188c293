//! Device queues and the timestamps that order work submitted to them

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use ash::{vk, Device};

use crate::{Error, Result};

/// Kind of work a logical queue is used for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum QueueType {
    #[default]
    Undefined,
    Graphics,
    Compute,
    Transfer,
    External,
}

/// Identifies one logical queue
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct DeviceQueue {
    pub ty: QueueType,
    pub index: u32,
}

impl DeviceQueue {
    pub const UNDEFINED: Self = Self::new(QueueType::Undefined, 0);

    pub const fn new(ty: QueueType, index: u32) -> Self {
        Self { ty, index }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ty == QueueType::Undefined
    }
}

/// A point on a queue's timeline, reached once all work up to and including `timestamp` has
/// finished executing there
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct JobSemaphore {
    pub queue: DeviceQueue,
    /// Zero for the null semaphore
    pub timestamp: u64,
}

impl JobSemaphore {
    pub const NULL: Self = Self {
        queue: DeviceQueue::UNDEFINED,
        timestamp: 0,
    };

    #[inline]
    pub fn is_null(&self) -> bool {
        self.timestamp == 0 || self.queue.is_null()
    }
}

/// A logical queue and the Vulkan queue family it executes on
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub queue: DeviceQueue,
    pub family_index: u32,
}

/// Source of truth for how far each queue's work has progressed on the device
///
/// Queues are identified by their registration order in [`Timeline::new`].
pub trait CompletionSource {
    /// Greatest timestamp known to be complete on `queue`
    fn completed(&self, queue: usize) -> Result<u64>;

    /// Block until every (or, if `!wait_all`, any) `(queue, timestamp)` pair is complete
    ///
    /// Returns `Ok(false)` if `timeout` elapses first.
    fn wait(&self, waits: &[(usize, u64)], wait_all: bool, timeout: Duration) -> Result<bool>;
}

/// Per-device timestamp bookkeeping
///
/// Timestamps come from a single counter shared by every queue, so they are unique device-wide
/// and strictly increasing on each queue.
pub struct Timeline {
    queues: Box<[QueueTimeline]>,
    /// Most recently assigned timestamp on any queue
    last_pending: AtomicU64,
}

struct QueueTimeline {
    info: QueueInfo,
    last_pending: AtomicU64,
    last_reached: AtomicU64,
}

impl Timeline {
    pub fn new(queues: impl IntoIterator<Item = QueueInfo>) -> Self {
        Self {
            queues: queues
                .into_iter()
                .map(|info| QueueTimeline {
                    info,
                    last_pending: AtomicU64::new(0),
                    last_reached: AtomicU64::new(0),
                })
                .collect(),
            last_pending: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Index of `queue` in registration order
    pub fn queue_index(&self, queue: DeviceQueue) -> Result<usize> {
        self.queues
            .iter()
            .position(|x| x.info.queue == queue)
            .ok_or(Error::UnknownQueue(queue))
    }

    #[inline]
    pub fn queue_info(&self, queue: usize) -> &QueueInfo {
        &self.queues[queue].info
    }

    /// Reserve the next timestamp for work on `queue`
    pub fn assign_next(&self, queue: usize) -> u64 {
        let timestamp = self.last_pending.fetch_add(1, Ordering::AcqRel) + 1;
        self.queues[queue]
            .last_pending
            .fetch_max(timestamp, Ordering::AcqRel);
        timestamp
    }

    /// Most recently assigned timestamp on any queue
    #[inline]
    pub fn last_pending(&self) -> u64 {
        self.last_pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn last_pending_in(&self, queue: usize) -> u64 {
        self.queues[queue].last_pending.load(Ordering::Acquire)
    }

    /// Greatest timestamp known to be complete on `queue` as of the last update
    #[inline]
    pub fn last_reached_in(&self, queue: usize) -> u64 {
        self.queues[queue].last_reached.load(Ordering::Acquire)
    }

    /// Greatest timestamp known to be complete on every queue as of the last update
    pub fn last_reached_in_all(&self) -> u64 {
        self.queues
            .iter()
            .map(|x| x.last_reached.load(Ordering::Acquire))
            .min()
            .unwrap_or_else(|| self.last_pending())
    }

    /// Whether `semaphore` is known to be signalled, without querying the device
    pub fn was_reached(&self, semaphore: JobSemaphore) -> Result<bool> {
        if semaphore.is_null() {
            return Ok(true);
        }
        let queue = self.queue_index(semaphore.queue)?;
        Ok(self.last_reached_in(queue) >= semaphore.timestamp)
    }

    /// Refresh the progress of `queue` from the device, returning its last reached timestamp
    ///
    /// A queue with nothing left in flight is fast-forwarded to the device-wide pending timestamp
    /// so that idle queues never hold back reclamation.
    pub fn update_queue(&self, source: &impl CompletionSource, queue: usize) -> Result<u64> {
        let state = &self.queues[queue];
        // Sample the pending values before the device so that a concurrent assignment can only make
        // us conservative
        let global_pending = self.last_pending();
        let queue_pending = state.last_pending.load(Ordering::Acquire);
        let mut reached = source.completed(queue)?;
        if reached >= queue_pending {
            reached = reached.max(global_pending);
        }
        let previous = state.last_reached.fetch_max(reached, Ordering::AcqRel);
        Ok(previous.max(reached))
    }

    /// Refresh every queue, returning the timestamp reached in all of them
    pub fn update(&self, source: &impl CompletionSource) -> Result<u64> {
        for queue in 0..self.queues.len() {
            self.update_queue(source, queue)?;
        }
        Ok(self.last_reached_in_all())
    }

    /// Whether `semaphore` is signalled, querying the device if the cached state is insufficient
    pub fn is_signalled(
        &self,
        source: &impl CompletionSource,
        semaphore: JobSemaphore,
    ) -> Result<bool> {
        if self.was_reached(semaphore)? {
            return Ok(true);
        }
        let queue = self.queue_index(semaphore.queue)?;
        Ok(self.update_queue(source, queue)? >= semaphore.timestamp)
    }

    /// Block until every (or any, if `!wait_all`) of `semaphores` is signalled
    ///
    /// Returns `Ok(false)` without side effects if `timeout` elapses first.
    pub fn wait(
        &self,
        source: &impl CompletionSource,
        semaphores: &[JobSemaphore],
        wait_all: bool,
        timeout: Duration,
    ) -> Result<bool> {
        let mut waits = Vec::with_capacity(semaphores.len());
        for semaphore in semaphores {
            if self.was_reached(*semaphore)? {
                if !wait_all {
                    return Ok(true);
                }
                continue;
            }
            let queue = self.queue_index(semaphore.queue)?;
            // Only the greatest timestamp per queue matters
            match waits.iter_mut().find(|(q, _)| *q == queue) {
                Some((_, t)) if wait_all => *t = semaphore.timestamp.max(*t),
                Some((_, t)) => *t = semaphore.timestamp.min(*t),
                None => waits.push((queue, semaphore.timestamp)),
            }
        }
        if waits.is_empty() {
            return Ok(true);
        }
        if !source.wait(&waits, wait_all, timeout)? {
            return Ok(false);
        }
        for &(queue, _) in &waits {
            self.update_queue(source, queue)?;
        }
        Ok(true)
    }
}

/// One timeline semaphore per registered queue, signalled by the caller's submissions with the
/// timestamp of each job
pub struct TimelineSemaphores {
    device: Device,
    semaphores: Box<[vk::Semaphore]>,
}

impl TimelineSemaphores {
    /// # Safety
    /// `device` must have the timeline semaphore feature enabled
    pub unsafe fn new(device: &Device, queue_count: usize) -> Result<Self> {
        let mut semaphores = Vec::with_capacity(queue_count);
        for _ in 0..queue_count {
            let semaphore = unsafe {
                device.create_semaphore(
                    &vk::SemaphoreCreateInfo::default().push_next(
                        &mut vk::SemaphoreTypeCreateInfo::default()
                            .semaphore_type(vk::SemaphoreType::TIMELINE),
                    ),
                    None,
                )
            };
            match semaphore {
                Ok(x) => semaphores.push(x),
                Err(e) => {
                    for x in semaphores {
                        unsafe {
                            device.destroy_semaphore(x, None);
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(Self {
            device: device.clone(),
            semaphores: semaphores.into(),
        })
    }

    /// Semaphore to signal with a job's timestamp when submitting it to `queue`
    #[inline]
    pub fn semaphore(&self, queue: usize) -> vk::Semaphore {
        self.semaphores[queue]
    }

    /// # Safety
    /// No work signalling or waiting on these semaphores may be in flight
    pub unsafe fn destroy(&mut self) {
        for &x in self.semaphores.iter() {
            unsafe {
                self.device.destroy_semaphore(x, None);
            }
        }
        self.semaphores = Box::new([]);
    }
}

impl CompletionSource for TimelineSemaphores {
    fn completed(&self, queue: usize) -> Result<u64> {
        Ok(unsafe {
            self.device
                .get_semaphore_counter_value(self.semaphores[queue])?
        })
    }

    fn wait(&self, waits: &[(usize, u64)], wait_all: bool, timeout: Duration) -> Result<bool> {
        let semaphores = waits
            .iter()
            .map(|&(queue, _)| self.semaphores[queue])
            .collect::<Vec<_>>();
        let values = waits.iter().map(|&(_, t)| t).collect::<Vec<_>>();
        let flags = if wait_all {
            vk::SemaphoreWaitFlags::empty()
        } else {
            vk::SemaphoreWaitFlags::ANY
        };
        let timeout = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let result = unsafe {
            self.device.wait_semaphores(
                &vk::SemaphoreWaitInfo::default()
                    .flags(flags)
                    .semaphores(&semaphores)
                    .values(&values),
                timeout,
            )
        };
        match result {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeDevice;

    fn timeline() -> Timeline {
        Timeline::new([
            QueueInfo {
                queue: DeviceQueue::new(QueueType::Graphics, 0),
                family_index: 0,
            },
            QueueInfo {
                queue: DeviceQueue::new(QueueType::Transfer, 0),
                family_index: 1,
            },
        ])
    }

    #[test]
    fn timestamps_increase() {
        let timeline = timeline();
        assert_eq!(timeline.assign_next(0), 1);
        assert_eq!(timeline.assign_next(1), 2);
        assert_eq!(timeline.assign_next(0), 3);
        assert_eq!(timeline.last_pending(), 3);
        assert_eq!(timeline.last_pending_in(0), 3);
        assert_eq!(timeline.last_pending_in(1), 2);
    }

    #[test]
    fn unknown_queue() {
        let timeline = timeline();
        let queue = DeviceQueue::new(QueueType::Compute, 3);
        assert_eq!(timeline.queue_index(queue), Err(Error::UnknownQueue(queue)));
    }

    #[test]
    fn idle_queue_fast_forwards() {
        let timeline = timeline();
        let device = FakeDevice::new(2);
        timeline.assign_next(0);
        timeline.assign_next(1);
        timeline.assign_next(0);
        // Transfer queue finished its only job; graphics is still busy with 3
        device.signal(0, 1);
        device.signal(1, 2);
        assert_eq!(timeline.update_queue(&device, 1).unwrap(), 3);
        assert_eq!(timeline.update_queue(&device, 0).unwrap(), 1);
        assert_eq!(timeline.update(&device).unwrap(), 1);
        device.signal(0, 3);
        assert_eq!(timeline.update(&device).unwrap(), 3);
    }

    #[test]
    fn signalled() {
        let timeline = timeline();
        let device = FakeDevice::new(2);
        let queue = timeline.queue_info(0).queue;
        let t = timeline.assign_next(0);
        let semaphore = JobSemaphore {
            queue,
            timestamp: t,
        };
        assert!(JobSemaphore::NULL.is_null());
        assert!(timeline.is_signalled(&device, JobSemaphore::NULL).unwrap());
        assert!(!timeline.is_signalled(&device, semaphore).unwrap());
        device.signal(0, t);
        assert!(timeline.is_signalled(&device, semaphore).unwrap());
    }

    #[test]
    fn wait_times_out() {
        let timeline = timeline();
        let device = FakeDevice::new(2);
        let queue = timeline.queue_info(0).queue;
        let semaphore = JobSemaphore {
            queue,
            timestamp: timeline.assign_next(0),
        };
        assert!(!timeline
            .wait(&device, &[semaphore], true, Duration::ZERO)
            .unwrap());
        assert_eq!(timeline.last_reached_in(0), 0);
        device.signal(0, 1);
        assert!(timeline
            .wait(&device, &[semaphore], true, Duration::ZERO)
            .unwrap());
        assert_eq!(timeline.last_reached_in(0), 1);
    }

    #[test]
    fn device_loss_propagates() {
        let timeline = timeline();
        let device = FakeDevice::new(2);
        device.lose();
        assert_eq!(timeline.update(&device), Err(Error::DeviceLost));
    }
}
