use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use ash::vk;
use log::{debug, trace, warn};

use crate::auto_ring::{AutoRing, BackingAllocator, OverallocationBehavior};
use crate::job::{Job, LocalBuffer};
use crate::queue::{CompletionSource, Timeline};
use crate::ring_buffer::BufferView;
use crate::stats::{JobStats, StatisticsObserver};
use crate::tracking::{AccessTracker, JobSync, Submission, TrackedAccess};
use crate::{Graveyard, JobSemaphore, Result, Retirer};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct JobContextConfig {
    /// Growth policy of the rings backing job-local buffers
    pub overallocation: OverallocationBehavior,
    /// Number of unfinished jobs at which a warning is logged on enqueue
    pub pending_job_warning: u64,
}

impl Default for JobContextConfig {
    fn default() -> Self {
        Self {
            overallocation: OverallocationBehavior::default(),
            pending_job_warning: 100,
        }
    }
}

/// Everything needed to record and submit an enqueued job
#[derive(Debug, Clone)]
pub struct EnqueuedJob {
    /// Must be signalled by the job's final submission
    pub semaphore: JobSemaphore,
    pub name: Option<String>,
    pub sync: JobSync,
    /// Storage for each of the job's local buffers, in allocation order
    pub local_buffers: Vec<BufferView>,
    pub stats: JobStats,
}

impl EnqueuedJob {
    #[inline]
    pub fn local_buffer(&self, buffer: LocalBuffer) -> BufferView {
        self.local_buffers[buffer.index()]
    }
}

/// Turns declared jobs into timestamps, barriers and job-local memory for one device
///
/// Must be the only source of timestamps on its [`Timeline`].
pub struct JobContext<A: BackingAllocator + Clone, S: CompletionSource> {
    config: JobContextConfig,
    timeline: Arc<Timeline>,
    source: S,
    tracker: AccessTracker,
    graveyard: Graveyard,
    allocator: A,
    /// Job-local buffer storage, one ring per usage
    rings: AHashMap<vk::BufferUsageFlags, AutoRing<A>>,
    observer: Option<Box<dyn StatisticsObserver>>,
}

impl<A: BackingAllocator + Clone, S: CompletionSource> JobContext<A, S> {
    pub fn new(
        config: JobContextConfig,
        timeline: Arc<Timeline>,
        source: S,
        graveyard: Graveyard,
        allocator: A,
    ) -> Self {
        Self {
            config,
            timeline,
            source,
            tracker: AccessTracker::new(),
            graveyard,
            allocator,
            rings: AHashMap::new(),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: impl StatisticsObserver + 'static) {
        self.observer = Some(Box::new(observer));
    }

    #[inline]
    pub fn config(&self) -> &JobContextConfig {
        &self.config
    }

    #[inline]
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[inline]
    pub fn tracker(&self) -> &AccessTracker {
        &self.tracker
    }

    /// For discarding contents or forgetting resources destroyed outside of any lifeguard
    #[inline]
    pub fn tracker_mut(&mut self) -> &mut AccessTracker {
        &mut self.tracker
    }

    #[inline]
    pub fn graveyard_mut(&mut self) -> &mut Graveyard {
        &mut self.graveyard
    }

    #[inline]
    pub fn retirer(&self) -> Retirer {
        self.graveyard.retirer()
    }

    /// Assign `job` a timestamp, allocate its local buffers and synthesize its synchronization
    ///
    /// Completed work is reclaimed first. On error no timestamp is consumed.
    pub fn enqueue(&mut self, job: Job) -> Result<EnqueuedJob> {
        self.reclaim()?;
        self.tracker.compact();

        let queue = self.timeline.queue_index(job.queue())?;
        let family = self.timeline.queue_info(queue).family_index;
        // Assigned only once nothing else can fail
        let timestamp = self.timeline.last_pending() + 1;
        let semaphore = JobSemaphore {
            queue: job.queue(),
            timestamp,
        };

        let mut stats = JobStats::default();
        let mut local_buffers = Vec::with_capacity(job.local_buffers.len());
        let accesses = match self.allocate_and_resolve(&job, timestamp, &mut local_buffers) {
            Ok(x) => x,
            Err(e) => {
                for request in job.local_buffers[..local_buffers.len()].iter().rev() {
                    if let Some(ring) = self.rings.get_mut(&request.usage) {
                        ring.pop_newest();
                    }
                }
                return Err(e);
            }
        };
        for (request, view) in job.local_buffers.iter().zip(&local_buffers) {
            // Whatever previously occupied the memory is irrelevant
            self.tracker.discard_buffer(view.buffer, view.range());
            stats.local_buffer_requested_bytes += request.size;
        }

        let submission = Submission { semaphore, family };
        let mut sync = JobSync::default();
        for (index, pass) in accesses.iter().enumerate() {
            self.tracker
                .synchronize_pass(&submission, index, pass, &mut sync);
        }
        let release_queues = sync
            .releases
            .iter()
            .map(|x| self.timeline.queue_index(x.queue))
            .collect::<Result<Vec<_>>>()?;

        let assigned = self.timeline.assign_next(queue);
        debug_assert_eq!(assigned, timestamp, "timestamp assigned outside of JobContext");
        // Each release is a separate submission on its source queue, ordered after this job
        let signals = release_queues
            .into_iter()
            .map(|x| self.timeline.assign_next(x))
            .collect::<Vec<_>>();
        sync.signal_releases(signals);

        stats.count_barriers(&sync);
        stats.local_buffer_committed_bytes =
            self.rings.values().map(|x| x.ring().total_size()).sum();
        let name = job.name().map(str::to_owned);
        debug!(
            "enqueued {} on {:?} at {}: {} passes, {} barriers ({} buffer, {} image, {} transfers), {} waits",
            name.as_deref().unwrap_or("job"),
            job.queue(),
            timestamp,
            job.pass_count(),
            stats.pipeline_barriers,
            stats.buffer_memory_barriers,
            stats.image_memory_barriers,
            stats.queue_ownership_transfers,
            sync.waits.len(),
        );
        if let Some(observer) = &self.observer {
            stats.report(observer.as_ref(), name.as_deref());
        }

        let backlog = timestamp.saturating_sub(self.timeline.last_reached_in_all());
        if backlog >= self.config.pending_job_warning {
            warn!(
                "{} jobs pending; are job semaphores being signalled and reclaim called?",
                backlog
            );
        }

        Ok(EnqueuedJob {
            semaphore,
            name,
            sync,
            local_buffers,
            stats,
        })
    }

    /// Suballocate `job`'s local buffers into `local_buffers` and resolve its passes against them
    fn allocate_and_resolve(
        &mut self,
        job: &Job,
        timestamp: u64,
        local_buffers: &mut Vec<BufferView>,
    ) -> Result<Vec<Vec<TrackedAccess>>> {
        for request in &job.local_buffers {
            let ring = self.rings.entry(request.usage).or_insert_with(|| {
                AutoRing::new(
                    self.allocator.clone(),
                    request.usage,
                    self.config.overallocation,
                )
            });
            local_buffers.push(ring.push(request.size, timestamp)?);
        }
        job.passes
            .iter()
            .map(|pass| {
                pass.iter()
                    .map(|x| x.resolve(local_buffers))
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    /// Refresh device progress, then destroy retired handles and free job-local memory of
    /// completed jobs
    ///
    /// Returns the timestamp reached on every queue.
    pub fn reclaim(&mut self) -> Result<u64> {
        let reached = self.timeline.update(&self.source)?;
        let tracker = &mut self.tracker;
        // `reached` was just observed on the device
        let destroyed = unsafe {
            self.graveyard
                .reclaim(reached, |ty, handle| tracker.forget_dynamic(ty, handle))
        };
        let freed = self
            .rings
            .values_mut()
            .map(|x| x.pop(reached))
            .sum::<vk::DeviceSize>();
        if destroyed != 0 || freed != 0 {
            trace!(
                "reached {}: destroyed {} handles, freed {} local bytes",
                reached,
                destroyed,
                freed
            );
        }
        Ok(reached)
    }

    pub fn is_signalled(&self, semaphore: JobSemaphore) -> Result<bool> {
        self.timeline.is_signalled(&self.source, semaphore)
    }

    /// Block until every (or any, if `!wait_all`) of `semaphores` is signalled, then reclaim
    ///
    /// Returns `Ok(false)` without side effects if `timeout` elapses first.
    pub fn wait(
        &mut self,
        semaphores: &[JobSemaphore],
        wait_all: bool,
        timeout: Duration,
    ) -> Result<bool> {
        if !self
            .timeline
            .wait(&self.source, semaphores, wait_all, timeout)?
        {
            return Ok(false);
        }
        self.reclaim()?;
        Ok(true)
    }

    /// Release job-local backing memory not currently in use, returning the number of bytes
    pub fn trim(&mut self) -> vk::DeviceSize {
        self.rings.values_mut().map(|x| x.trim()).sum()
    }
}
