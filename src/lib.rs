//! Automatic synchronization, transient memory and deferred destruction for Vulkan jobs
//!
//! Work is declared as [`Job`]s: ordered passes, each listing the buffers and images it touches
//! and how. A [`JobContext`] turns each job into a timestamp on a device-wide timeline, the
//! pipeline barriers, semaphore waits and queue ownership transfers its passes need, and storage
//! for its job-local buffers. Handles wrapped in [`Lifeguard`]s are destroyed once every job that
//! might use them has completed.

pub mod access;
pub mod auto_ring;
pub mod barrier;
pub mod graveyard;
pub mod job;
pub mod lifeguard;
pub mod memory;
pub mod queue;
pub mod ring_buffer;
pub mod stats;
pub mod tracking;

mod context;
mod error;
mod visit_handles;

#[cfg(test)]
mod test_utils;

pub use access::{Access, AccessMask, BufferRange, ImageRange, ResourceKind};
pub use auto_ring::{AutoRing, BackingAllocator, OverallocationBehavior};
pub use barrier::{Barrier, BarrierList, Dependency, QueueTransfer, Subresource};
pub use context::{EnqueuedJob, JobContext, JobContextConfig};
pub use error::{Error, Result};
pub use graveyard::{destroy_dynamic, Destroyer, Graveyard};
pub use job::{Job, LocalBuffer, ResourceAccess};
pub use lifeguard::{Lifeguard, Retirer};
pub use memory::{align, find_memory_type, view_alignment, DedicatedAllocator, DedicatedBuffer};
pub use queue::{
    CompletionSource, DeviceQueue, JobSemaphore, QueueInfo, QueueType, Timeline,
    TimelineSemaphores,
};
pub use ring_buffer::{BufferView, GrowableRing, RegionBuffer};
pub use stats::{JobStats, Statistic, StatisticsObserver};
pub use tracking::{AccessTracker, JobSync, QueueRelease, ResourceState, TrackedAccess};
pub use visit_handles::{Destroyable, HandleVisitor, VisitHandles};
