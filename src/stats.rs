//! Per-job counters reported to an optional observer

use crate::tracking::JobSync;

/// A quantity measured for each enqueued job
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Statistic {
    PipelineBarriers,
    BufferMemoryBarriers,
    ImageMemoryBarriers,
    /// Queue family ownership transfers, counting each release/acquire pair once
    QueueOwnershipTransfers,
    /// Bytes of job-local buffers requested by the job
    LocalBufferRequestedBytes,
    /// Bytes of backing memory held by the job-local rings after the job's allocations
    LocalBufferCommittedBytes,
}

pub trait StatisticsObserver: Send + Sync {
    fn report(&self, job: Option<&str>, statistic: Statistic, value: u64);
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub pipeline_barriers: u64,
    pub buffer_memory_barriers: u64,
    pub image_memory_barriers: u64,
    pub queue_ownership_transfers: u64,
    pub local_buffer_requested_bytes: u64,
    pub local_buffer_committed_bytes: u64,
}

impl JobStats {
    pub(crate) fn count_barriers(&mut self, sync: &JobSync) {
        self.pipeline_barriers = sync.barriers.len() as u64;
        self.buffer_memory_barriers = sync.barriers.buffer_barrier_count() as u64;
        self.image_memory_barriers = sync.barriers.image_barrier_count() as u64;
        self.queue_ownership_transfers = sync.queue_transfer_count() as u64;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Statistic, u64)> {
        [
            (Statistic::PipelineBarriers, self.pipeline_barriers),
            (Statistic::BufferMemoryBarriers, self.buffer_memory_barriers),
            (Statistic::ImageMemoryBarriers, self.image_memory_barriers),
            (
                Statistic::QueueOwnershipTransfers,
                self.queue_ownership_transfers,
            ),
            (
                Statistic::LocalBufferRequestedBytes,
                self.local_buffer_requested_bytes,
            ),
            (
                Statistic::LocalBufferCommittedBytes,
                self.local_buffer_committed_bytes,
            ),
        ]
        .into_iter()
    }

    pub fn report(&self, observer: &dyn StatisticsObserver, job: Option<&str>) {
        for (statistic, value) in self.iter() {
            observer.report(job, statistic, value);
        }
    }
}
