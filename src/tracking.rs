//! Per-resource access state and synthesis of the barriers needed between accesses
//!
//! Every tracked buffer and image carries a map from disjoint subranges to the last known use of
//! that subrange. Passes are processed strictly in declaration order. Each pass is processed in
//! three phases:
//!
//! 1. ranges last used on another queue are adopted by the job's queue, producing semaphore waits
//!    and, across queue families, ownership transfers
//! 2. every access is synchronized against the state left by earlier passes
//! 3. the state is updated with the union of the pass's accesses to each range
//!
//! Splitting synchronization from insertion keeps accesses within one pass from synchronizing
//! against each other. Ranges are split along every access of a pass before any of them is
//! adopted, so both halves of an ownership transfer cover identical ranges.

use std::collections::BTreeMap;

use ahash::AHashMap;
use ash::{vk, Device};
use log::trace;

use crate::barrier::{BarrierList, BarrierRef, Dependency, QueueTransfer, Subresource};
use crate::{
    Access, AccessMask, BufferRange, DeviceQueue, Error, ImageRange, JobSemaphore, ResourceKind,
    Result,
};

/// Last known use of a range of a resource
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResourceState {
    pub last_write: Access,
    /// Union of reads since `last_write`
    pub readers: Access,
    /// Accesses `last_write` was made visible to by a single memory dependency
    pub visible: Access,
    /// Always `UNDEFINED` for buffers
    pub layout: vk::ImageLayout,
    /// Most recent job to access the range, if any
    pub semaphore: JobSemaphore,
    /// Queue family owning the range, or `QUEUE_FAMILY_IGNORED`
    pub queue_family: u32,
}

impl ResourceState {
    pub const INITIAL: Self = Self {
        last_write: Access::NONE,
        readers: Access::NONE,
        visible: Access::NONE,
        layout: vk::ImageLayout::UNDEFINED,
        semaphore: JobSemaphore::NULL,
        queue_family: vk::QUEUE_FAMILY_IGNORED,
    };
}

/// A validated access to an absolute range of a buffer or image
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TrackedAccess {
    target: Target,
    mask: AccessMask,
    access: Access,
    layout: Option<vk::ImageLayout>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Target {
    Buffer(vk::Buffer, BufferRange),
    Image(vk::Image, ImageRange),
}

impl TrackedAccess {
    pub fn buffer(buffer: vk::Buffer, range: BufferRange, mask: AccessMask) -> Result<Self> {
        if range.is_empty() {
            return Err(Error::EmptyRange);
        }
        mask.validate(ResourceKind::Buffer)?;
        Ok(Self {
            target: Target::Buffer(buffer, range),
            mask,
            access: mask.to_access(),
            layout: None,
        })
    }

    pub fn image(image: vk::Image, range: ImageRange, mask: AccessMask) -> Result<Self> {
        if range.is_empty() {
            return Err(Error::EmptyRange);
        }
        mask.validate(ResourceKind::Image)?;
        Ok(Self {
            target: Target::Image(image, range),
            mask,
            access: mask.to_access(),
            layout: Some(mask.image_layout()?),
        })
    }

    #[inline]
    pub fn mask(&self) -> AccessMask {
        self.mask
    }

    /// Layout the image must be in, for image accesses
    #[inline]
    pub fn layout(&self) -> Option<vk::ImageLayout> {
        self.layout
    }

    /// Whether both accesses can't be satisfied by one pass: they overlap on the same image but
    /// require different layouts
    pub fn conflicts_with(&self, other: &TrackedAccess) -> bool {
        match (self.target, other.target) {
            (Target::Image(a, ra), Target::Image(b, rb)) => {
                a == b && ra.overlaps(&rb) && self.layout != other.layout
            }
            _ => false,
        }
    }
}

/// The job whose passes are being synchronized
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Submission {
    pub semaphore: JobSemaphore,
    /// Queue family of `semaphore.queue`
    pub family: u32,
}

/// Release half of queue family ownership transfers, to be recorded on `queue` after `after`
///
/// The acquiring job waits on `signal`, so the submission containing the release must signal it.
/// It must be submitted to `queue` after every job enqueued before the acquiring one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRelease {
    pub queue: DeviceQueue,
    pub after: JobSemaphore,
    /// Timestamp of the release itself; null until assigned by
    /// [`JobContext::enqueue`](crate::JobContext::enqueue)
    pub signal: JobSemaphore,
    pub dependencies: Vec<Dependency>,
}

impl QueueRelease {
    /// # Safety
    /// `cmd` must be recording and belong to `self.queue`'s family. Every referenced resource must
    /// be alive.
    pub unsafe fn record(&self, device: &Device, cmd: vk::CommandBuffer) {
        let mut buffers = Vec::new();
        let mut images = Vec::new();
        for x in &self.dependencies {
            x.to_vk(&mut buffers, &mut images);
        }
        unsafe {
            device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default()
                    .buffer_memory_barriers(&buffers)
                    .image_memory_barriers(&images),
            );
        }
    }
}

/// Synchronization required by one job
#[derive(Debug, Clone, Default)]
pub struct JobSync {
    pub barriers: BarrierList,
    /// Ownership releases to perform on other queues, one per source queue
    pub releases: Vec<QueueRelease>,
    /// Semaphores the job must wait on, at most one per queue
    pub waits: Vec<JobSemaphore>,
}

impl JobSync {
    fn wait_for(&mut self, semaphore: JobSemaphore) {
        match self.waits.iter_mut().find(|x| x.queue == semaphore.queue) {
            Some(x) => x.timestamp = x.timestamp.max(semaphore.timestamp),
            None => self.waits.push(semaphore),
        }
    }

    fn release(&mut self, after: JobSemaphore, dependency: Dependency) {
        match self.releases.iter_mut().find(|x| x.queue == after.queue) {
            Some(x) => {
                x.after.timestamp = x.after.timestamp.max(after.timestamp);
                x.dependencies.push(dependency);
            }
            None => self.releases.push(QueueRelease {
                queue: after.queue,
                after,
                signal: JobSemaphore::NULL,
                dependencies: vec![dependency],
            }),
        }
    }

    /// Give each release the timestamp it will signal, and wait on that rather than on the job
    /// the release follows
    pub fn signal_releases(&mut self, timestamps: impl IntoIterator<Item = u64>) {
        for (i, timestamp) in timestamps.into_iter().enumerate() {
            let Some(release) = self.releases.get_mut(i) else {
                break;
            };
            release.signal = JobSemaphore {
                queue: release.queue,
                timestamp,
            };
            let signal = release.signal;
            self.wait_for(signal);
        }
    }

    /// Number of acquire operations among the job's barriers
    pub fn queue_transfer_count(&self) -> usize {
        self.barriers.iter().map(|x| x.queue_transfer_count()).sum()
    }
}

/// Tracks the state of every resource used by jobs on a device
#[derive(Default)]
pub struct AccessTracker {
    buffers: AHashMap<vk::Buffer, BufferMap>,
    images: AHashMap<vk::Image, ImageMap>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronize the accesses of the pass at index `pass` of `job`, appending to `out`
    pub fn synchronize_pass(
        &mut self,
        job: &Submission,
        pass: usize,
        accesses: &[TrackedAccess],
        out: &mut JobSync,
    ) {
        for access in accesses {
            self.visit(access, job, pass, Phase::Split, out);
        }
        for access in accesses {
            self.visit(access, job, pass, Phase::Adopt, out);
        }
        for access in accesses {
            self.visit(access, job, pass, Phase::Synchronize, out);
        }
        let next = out.barriers.len();
        for access in accesses {
            self.visit(access, job, pass, Phase::Insert { next }, out);
        }
    }

    fn visit(
        &mut self,
        access: &TrackedAccess,
        job: &Submission,
        pass: usize,
        phase: Phase,
        out: &mut JobSync,
    ) {
        match access.target {
            Target::Buffer(buffer, range) => process(
                self.buffers.entry(buffer).or_default(),
                range,
                access,
                job,
                pass,
                phase,
                out,
                |range, _, _| Subresource::Buffer { buffer, range },
            ),
            Target::Image(image, range) => process(
                self.images.entry(image).or_default(),
                range,
                access,
                job,
                pass,
                phase,
                out,
                |range, old_layout, new_layout| Subresource::Image {
                    image,
                    range,
                    old_layout,
                    new_layout,
                },
            ),
        }
    }

    /// Mark the contents of `range` as undefined, so its next use needs no synchronization
    pub fn discard_buffer(&mut self, buffer: vk::Buffer, range: BufferRange) {
        if let Some(map) = self.buffers.get_mut(&buffer) {
            map.visit(range, |_, entry| *entry = Entry::INITIAL);
        }
    }

    pub fn discard_image(&mut self, image: vk::Image, range: ImageRange) {
        if let Some(map) = self.images.get_mut(&image) {
            map.visit(range, |_, entry| *entry = Entry::INITIAL);
        }
    }

    pub fn forget_buffer(&mut self, buffer: vk::Buffer) {
        self.buffers.remove(&buffer);
    }

    pub fn forget_image(&mut self, image: vk::Image) {
        self.images.remove(&image);
    }

    /// Forget a destroyed object of any type
    pub fn forget_dynamic(&mut self, ty: vk::ObjectType, handle: u64) {
        use ash::vk::Handle;
        match ty {
            vk::ObjectType::BUFFER => self.forget_buffer(vk::Buffer::from_raw(handle)),
            vk::ObjectType::IMAGE => self.forget_image(vk::Image::from_raw(handle)),
            _ => {}
        }
    }

    /// Known state of every tracked subrange of `range`
    pub fn buffer_states(
        &self,
        buffer: vk::Buffer,
        range: BufferRange,
    ) -> Vec<(BufferRange, ResourceState)> {
        let Some(map) = self.buffers.get(&buffer) else {
            return vec![(range, ResourceState::INITIAL)];
        };
        map.spans
            .iter()
            .map(|(&offset, span)| (BufferRange::new(offset, span.size), span.entry.state))
            .filter(|(x, _)| x.overlaps(&range))
            .map(|(x, state)| (x.intersection(&range), state))
            .collect()
    }

    pub fn image_states(
        &self,
        image: vk::Image,
        range: ImageRange,
    ) -> Vec<(ImageRange, ResourceState)> {
        let Some(map) = self.images.get(&image) else {
            return vec![(range, ResourceState::INITIAL)];
        };
        map.entries
            .iter()
            .filter(|(x, _)| x.overlaps(&range))
            .map(|(x, entry)| (x.intersection(&range), entry.state))
            .collect()
    }

    /// Merge adjacent ranges with identical state
    ///
    /// Must only be called between jobs.
    pub fn compact(&mut self) {
        for map in self.buffers.values_mut() {
            map.compact();
        }
        for map in self.images.values_mut() {
            map.compact();
        }
    }

    /// Number of disjoint ranges tracked, for diagnostics
    pub fn range_count(&self) -> usize {
        self.buffers.values().map(|x| x.spans.len()).sum::<usize>()
            + self.images.values().map(|x| x.entries.len()).sum::<usize>()
    }
}

#[derive(Debug, Copy, Clone)]
enum Phase {
    Split,
    Adopt,
    Synchronize,
    Insert { next: usize },
}

#[allow(clippy::too_many_arguments)]
fn process<M: RangeMap>(
    map: &mut M,
    range: M::Range,
    access: &TrackedAccess,
    job: &Submission,
    pass: usize,
    phase: Phase,
    out: &mut JobSync,
    subresource: impl Fn(M::Range, vk::ImageLayout, vk::ImageLayout) -> Subresource,
) {
    map.visit(range, |range, entry| {
        entry.refresh(job.semaphore.timestamp);
        let old_layout = entry.state.layout;
        let new_layout = access.layout.unwrap_or(old_layout);
        let resource = subresource(range, old_layout, new_layout);
        match phase {
            Phase::Split => {}
            Phase::Adopt => adopt(entry, job, resource, out),
            Phase::Synchronize => {
                let transfer = entry.transfer;
                synchronize(
                    entry,
                    access.access,
                    old_layout != new_layout,
                    pass,
                    &mut out.barriers,
                    move |src, dst| Dependency {
                        resource,
                        src,
                        dst,
                        transfer,
                    },
                );
                entry.pending = Some(match entry.pending {
                    Some((merged, _)) => (merged | access.access, new_layout),
                    None => (access.access, new_layout),
                });
            }
            Phase::Insert { next } => {
                if let Some((merged, layout)) = entry.pending.take() {
                    insert(entry, merged, layout, job, next, &out.barriers);
                }
            }
        }
    });
}

/// Take ownership of a range last used by another queue
fn adopt(entry: &mut Entry, job: &Submission, resource: Subresource, out: &mut JobSync) {
    let owner = entry.state.semaphore;
    if owner.is_null() || owner.queue == job.semaphore.queue {
        return;
    }
    trace!("{:?} adopted from {:?}", resource, owner);
    out.wait_for(owner);
    if entry.state.queue_family != job.family
        && entry.state.queue_family != vk::QUEUE_FAMILY_IGNORED
    {
        let transfer = QueueTransfer {
            src_family: entry.state.queue_family,
            dst_family: job.family,
        };
        out.release(
            owner,
            Dependency {
                resource,
                src: entry.state.last_write | entry.state.readers.execution_only(),
                dst: Access::NONE,
                transfer: Some(transfer),
            },
        );
        entry.transfer = Some(transfer);
    }
    // The semaphore orders everything before it, so nothing remains to synchronize against on
    // this queue
    entry.state.last_write = Access::NONE;
    entry.state.readers = Access::NONE;
    entry.state.visible = Access::NONE;
    entry.state.semaphore = job.semaphore;
    entry.state.queue_family = job.family;
}

fn synchronize(
    entry: &mut Entry,
    new: Access,
    transition: bool,
    pass: usize,
    barriers: &mut BarrierList,
    dependency: impl Fn(Access, Access) -> Dependency,
) {
    let state = entry.state;
    // Layout transitions and ownership acquisition write to the resource
    let forced = transition || entry.transfer.is_some();
    if !forced && new.is_read_only() {
        if state.last_write.is_null() || state.visible.contains(&new) {
            return;
        }
        let dep = dependency(state.last_write, new);
        let at = match entry.write_ref {
            Some(at) => barriers.widen(dep, at),
            None => barriers.synchronize(dep, pass, entry.barrier_after_write),
        };
        entry.write_ref = Some(at);
        entry.state.visible = barriers
            .visibility(at)
            .unwrap_or(entry.state.visible | new);
        return;
    }
    if let Some(at) = entry.transition_ref {
        // Another access in this pass already triggered the transition
        barriers.widen(dependency(Access::NONE, new), at);
        return;
    }
    let mut last = None;
    if !state.readers.is_null() {
        let dep = dependency(state.readers.execution_only(), new);
        last = Some(barriers.synchronize(dep, pass, entry.barrier_after_reads));
    }
    if !state.last_write.is_null() {
        let dep = dependency(state.last_write, new);
        last = Some(match (entry.write_ref, last) {
            // The barrier making the last write visible also orders it before this one
            (Some(at), _) if !forced => barriers.widen(dep, at),
            (_, Some(at)) => barriers.extend(dep, at),
            _ => barriers.synchronize(dep, pass, entry.barrier_after_write),
        });
    }
    if forced {
        let at = match last {
            Some(at) => at,
            None => barriers.synchronize(
                dependency(Access::TOP_OF_PIPE, new),
                pass,
                entry.barrier_after_write,
            ),
        };
        entry.transition_ref = Some(at);
    }
}

/// Record `new`, the union of one pass's accesses to the entry's range
fn insert(
    entry: &mut Entry,
    new: Access,
    layout: vk::ImageLayout,
    job: &Submission,
    next: usize,
    barriers: &BarrierList,
) {
    let forced = layout != entry.state.layout || entry.transfer.is_some();
    let state = &mut entry.state;
    if !new.is_read_only() {
        state.last_write = new;
        state.readers = Access::NONE;
        state.visible = Access::NONE;
        entry.barrier_after_write = next;
        entry.write_ref = None;
    } else if forced {
        // The transition completed before the reading stages began and is already visible to
        // them. Later readers chain off those stages or widen the transition's barrier.
        state.last_write = new.execution_only();
        state.readers = new;
        state.visible = entry
            .transition_ref
            .and_then(|at| barriers.visibility(at))
            .unwrap_or(new);
        entry.barrier_after_write = next;
        entry.barrier_after_reads = next;
        entry.write_ref = entry.transition_ref;
    } else {
        state.readers |= new;
        entry.barrier_after_reads = next;
    }
    state.layout = layout;
    state.semaphore = job.semaphore;
    state.queue_family = job.family;
    entry.transfer = None;
    entry.transition_ref = None;
}

/// Tracked state of one range plus bookkeeping for the job currently being synchronized
#[derive(Debug, Copy, Clone)]
struct Entry {
    state: ResourceState,
    /// Timestamp of the job the fields below belong to
    job: u64,
    /// First barrier that may synchronize against the last write
    barrier_after_write: usize,
    /// First barrier that may synchronize against the current readers
    barrier_after_reads: usize,
    /// Memory dependency making the last write visible, extended by later readers
    write_ref: Option<BarrierRef>,
    /// Layout transition or acquisition already scheduled by the current pass
    transition_ref: Option<BarrierRef>,
    /// Acquisition pending from another queue family
    transfer: Option<QueueTransfer>,
    /// Union of the current pass's accesses and the layout they need
    pending: Option<(Access, vk::ImageLayout)>,
}

impl Entry {
    const INITIAL: Self = Self {
        state: ResourceState::INITIAL,
        job: 0,
        barrier_after_write: 0,
        barrier_after_reads: 0,
        write_ref: None,
        transition_ref: None,
        transfer: None,
        pending: None,
    };

    fn refresh(&mut self, job: u64) {
        if self.job != job {
            self.job = job;
            self.barrier_after_write = 0;
            self.barrier_after_reads = 0;
            self.write_ref = None;
            self.transition_ref = None;
            self.transfer = None;
            self.pending = None;
        }
    }

    fn mergeable(&self, other: &Entry) -> bool {
        self.state == other.state && self.transfer.is_none() && other.transfer.is_none()
    }
}

trait RangeMap: Default {
    type Range: Copy;

    /// Split entries so that every entry overlapping `range` lies within it, then pass each of
    /// those to `f`
    fn visit(&mut self, range: Self::Range, f: impl FnMut(Self::Range, &mut Entry));
}

/// Disjoint byte ranges covering an entire buffer, keyed by offset
struct BufferMap {
    spans: BTreeMap<u64, Span>,
}

#[derive(Debug, Copy, Clone)]
struct Span {
    size: u64,
    entry: Entry,
}

impl Default for BufferMap {
    fn default() -> Self {
        let mut spans = BTreeMap::new();
        spans.insert(
            0,
            Span {
                size: u64::MAX,
                entry: Entry::INITIAL,
            },
        );
        Self { spans }
    }
}

impl BufferMap {
    /// Ensure a span boundary exists at `at`
    fn split_at(&mut self, at: u64) {
        let Some((&start, span)) = self.spans.range_mut(..=at).next_back() else {
            return;
        };
        let end = start + span.size;
        if start == at || at >= end {
            return;
        }
        let tail = Span {
            size: end - at,
            entry: span.entry,
        };
        span.size = at - start;
        self.spans.insert(at, tail);
    }

    fn compact(&mut self) {
        let keys = self.spans.keys().copied().collect::<Vec<_>>();
        let mut previous: Option<u64> = None;
        for key in keys {
            if let Some(prev) = previous {
                let current = self.spans[&key];
                if let Some(prev_span) = self.spans.get_mut(&prev) {
                    if prev_span.entry.mergeable(&current.entry) && prev + prev_span.size == key {
                        prev_span.size += current.size;
                        self.spans.remove(&key);
                        continue;
                    }
                }
            }
            previous = Some(key);
        }
    }
}

impl RangeMap for BufferMap {
    type Range = BufferRange;

    fn visit(&mut self, range: BufferRange, mut f: impl FnMut(BufferRange, &mut Entry)) {
        self.split_at(range.offset);
        self.split_at(range.end());
        for (&offset, span) in self.spans.range_mut(range.offset..range.end()) {
            f(BufferRange::new(offset, span.size), &mut span.entry);
        }
    }
}

/// Disjoint subresource ranges covering an entire image
struct ImageMap {
    entries: Vec<(ImageRange, Entry)>,
}

impl Default for ImageMap {
    fn default() -> Self {
        Self {
            entries: vec![(
                ImageRange::whole(vk::ImageAspectFlags::from_raw(!0)),
                Entry::INITIAL,
            )],
        }
    }
}

impl ImageMap {
    fn compact(&mut self) {
        'restart: loop {
            for i in 0..self.entries.len() {
                for j in i + 1..self.entries.len() {
                    let (a, x) = self.entries[i];
                    let (b, y) = self.entries[j];
                    if !x.mergeable(&y) {
                        continue;
                    }
                    if let Some(merged) = merge_image_ranges(&a, &b) {
                        self.entries[i].0 = merged;
                        self.entries.swap_remove(j);
                        continue 'restart;
                    }
                }
            }
            break;
        }
    }
}

/// The union of `a` and `b` if it is itself a range
fn merge_image_ranges(a: &ImageRange, b: &ImageRange) -> Option<ImageRange> {
    let same_layers = a.base_layer == b.base_layer && a.layer_count == b.layer_count;
    if a.aspects == b.aspects && same_layers && a.mip_mask & b.mip_mask == 0 {
        return Some(ImageRange {
            mip_mask: a.mip_mask | b.mip_mask,
            ..*a
        });
    }
    if a.mip_mask == b.mip_mask && same_layers && !a.aspects.intersects(b.aspects) {
        return Some(ImageRange {
            aspects: a.aspects | b.aspects,
            ..*a
        });
    }
    if a.aspects == b.aspects && a.mip_mask == b.mip_mask {
        if a.layer_end() == b.base_layer {
            return Some(ImageRange {
                layer_count: a.layer_count + b.layer_count,
                ..*a
            });
        }
        if b.layer_end() == a.base_layer {
            return Some(ImageRange {
                layer_count: a.layer_count + b.layer_count,
                ..*b
            });
        }
    }
    None
}

impl RangeMap for ImageMap {
    type Range = ImageRange;

    fn visit(&mut self, range: ImageRange, mut f: impl FnMut(ImageRange, &mut Entry)) {
        let count = self.entries.len();
        for i in 0..count {
            let (existing, entry) = self.entries[i];
            if !existing.overlaps(&range) || range.contains(&existing) {
                continue;
            }
            self.entries[i].0 = existing.intersection(&range);
            for piece in existing.difference(&range) {
                self.entries.push((piece, entry));
            }
        }
        for (existing, entry) in &mut self.entries {
            if range.contains(existing) && !existing.is_empty() {
                f(*existing, entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueType;
    use ash::vk::Handle;

    const GRAPHICS: DeviceQueue = DeviceQueue::new(QueueType::Graphics, 0);
    const COMPUTE: DeviceQueue = DeviceQueue::new(QueueType::Compute, 0);
    const TRANSFER: DeviceQueue = DeviceQueue::new(QueueType::Transfer, 0);

    fn job(queue: DeviceQueue, timestamp: u64) -> Submission {
        Submission {
            semaphore: JobSemaphore { queue, timestamp },
            family: if queue == TRANSFER { 1 } else { 0 },
        }
    }

    fn buffer() -> vk::Buffer {
        vk::Buffer::from_raw(0x10)
    }

    fn image() -> vk::Image {
        vk::Image::from_raw(0x20)
    }

    fn buf(range: BufferRange, mask: AccessMask) -> TrackedAccess {
        TrackedAccess::buffer(buffer(), range, mask).unwrap()
    }

    fn img(range: ImageRange, mask: AccessMask) -> TrackedAccess {
        TrackedAccess::image(image(), range, mask).unwrap()
    }

    fn color() -> ImageRange {
        ImageRange::whole(vk::ImageAspectFlags::COLOR)
    }

    /// Run `passes` as one job, returning the resulting synchronization
    fn run(tracker: &mut AccessTracker, job: Submission, passes: &[&[TrackedAccess]]) -> JobSync {
        let mut out = JobSync::default();
        for (i, pass) in passes.iter().enumerate() {
            tracker.synchronize_pass(&job, i, pass, &mut out);
        }
        out
    }

    const WHOLE: BufferRange = BufferRange::new(0, 256);

    #[test]
    fn read_after_write() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[buf(WHOLE, AccessMask::COMPUTE_STORAGE_WRITE)],
                &[buf(WHOLE, AccessMask::VERTEX_STORAGE_READ)],
            ],
        );
        assert_eq!(out.barriers.len(), 1);
        let barrier = out.barriers.before_pass(1).unwrap();
        assert_eq!(barrier.buffer_barrier_count(), 1);
        let dep = barrier.dependencies()[0];
        assert_eq!(dep.src, AccessMask::COMPUTE_STORAGE_WRITE.to_access());
        assert_eq!(dep.dst, AccessMask::VERTEX_STORAGE_READ.to_access());
        assert!(out.waits.is_empty());
        assert!(out.releases.is_empty());
    }

    #[test]
    fn disjoint_ranges() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[buf(BufferRange::new(0, 128), AccessMask::TRANSFER_WRITE)],
                &[buf(BufferRange::new(128, 128), AccessMask::TRANSFER_WRITE)],
                &[buf(BufferRange::new(0, 128), AccessMask::COMPUTE_STORAGE_WRITE)],
            ],
        );
        // Only the last pass conflicts
        assert_eq!(out.barriers.len(), 1);
        let barrier = out.barriers.before_pass(2).unwrap();
        match barrier.dependencies()[0].resource {
            Subresource::Buffer { range, .. } => assert_eq!(range, BufferRange::new(0, 128)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn read_after_read() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[buf(WHOLE, AccessMask::TRANSFER_WRITE)],
                &[buf(WHOLE, AccessMask::COMPUTE_STORAGE_READ)],
                &[buf(WHOLE, AccessMask::COMPUTE_STORAGE_READ)],
                &[buf(WHOLE, AccessMask::COMPUTE_STORAGE_READ)],
            ],
        );
        assert_eq!(out.barriers.len(), 1);
        assert!(out.barriers.before_pass(1).is_some());
    }

    #[test]
    fn later_readers_extend_barrier() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[buf(WHOLE, AccessMask::TRANSFER_WRITE)],
                &[buf(WHOLE, AccessMask::COMPUTE_STORAGE_READ)],
                &[buf(WHOLE, AccessMask::INDEX_READ)],
            ],
        );
        assert_eq!(out.barriers.len(), 1);
        let barrier = out.barriers.before_pass(1).unwrap();
        assert_eq!(barrier.dependencies().len(), 1);
        assert!(barrier.dependencies()[0]
            .dst
            .contains(&AccessMask::INDEX_READ.to_access()));
    }

    #[test]
    fn write_after_read() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[buf(WHOLE, AccessMask::VERTEX_UNIFORM_READ)],
                &[buf(WHOLE, AccessMask::TRANSFER_WRITE)],
            ],
        );
        assert_eq!(out.barriers.len(), 1);
        let barrier = out.barriers.before_pass(1).unwrap();
        assert!(barrier.has_execution_dependency());
        assert_eq!(barrier.buffer_barrier_count(), 0);
        assert_eq!(
            barrier.src_stage_mask(),
            vk::PipelineStageFlags2::VERTEX_SHADER
        );
    }

    #[test]
    fn write_after_write() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[buf(WHOLE, AccessMask::TRANSFER_WRITE)],
                &[buf(WHOLE, AccessMask::COMPUTE_STORAGE_WRITE)],
            ],
        );
        let barrier = out.barriers.before_pass(1).unwrap();
        assert_eq!(barrier.buffer_barrier_count(), 1);
        assert_eq!(
            barrier.dependencies()[0].src,
            AccessMask::TRANSFER_WRITE.to_access()
        );
    }

    #[test]
    fn partial_overlap_splits() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[buf(BufferRange::new(0, 100), AccessMask::TRANSFER_WRITE)],
                &[buf(BufferRange::new(50, 100), AccessMask::COMPUTE_STORAGE_READ)],
            ],
        );
        let barrier = out.barriers.before_pass(1).unwrap();
        assert_eq!(barrier.dependencies().len(), 1);
        match barrier.dependencies()[0].resource {
            Subresource::Buffer { range, .. } => assert_eq!(range, BufferRange::new(50, 50)),
            _ => unreachable!(),
        }
        let states = tracker.buffer_states(buffer(), BufferRange::new(0, 200));
        assert_eq!(states.len(), 4);
        assert_eq!(states[0].0, BufferRange::new(0, 50));
        assert!(states[0].1.readers.is_null());
        assert_eq!(states[1].0, BufferRange::new(50, 50));
        assert!(!states[1].1.readers.is_null());
        assert_eq!(states[2].0, BufferRange::new(100, 50));
        assert!(states[2].1.last_write.is_null());
    }

    #[test]
    fn coalesce_within_pass() {
        let mut tracker = AccessTracker::new();
        let a = BufferRange::new(0, 64);
        let b = BufferRange::new(128, 64);
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[
                    buf(a, AccessMask::COMPUTE_STORAGE_WRITE),
                    buf(b, AccessMask::COMPUTE_STORAGE_WRITE),
                ],
                &[
                    buf(a, AccessMask::COMPUTE_STORAGE_READ),
                    buf(b, AccessMask::COMPUTE_STORAGE_READ),
                ],
            ],
        );
        assert_eq!(out.barriers.len(), 1);
        assert_eq!(out.barriers.buffer_barrier_count(), 2);
    }

    #[test]
    fn image_layout_transitions() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[img(color(), AccessMask::COLOR_ATTACHMENT_WRITE)],
                &[img(color(), AccessMask::FRAGMENT_SAMPLED_READ)],
                &[img(color(), AccessMask::COMPUTE_SAMPLED_READ)],
            ],
        );
        assert_eq!(out.barriers.len(), 2);
        let first = out.barriers.before_pass(0).unwrap();
        match first.dependencies()[0].resource {
            Subresource::Image {
                old_layout,
                new_layout,
                ..
            } => {
                assert_eq!(old_layout, vk::ImageLayout::UNDEFINED);
                assert_eq!(new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
            }
            _ => unreachable!(),
        }
        let second = out.barriers.before_pass(1).unwrap();
        assert_eq!(second.image_barrier_count(), 1);
        let dep = second.dependencies()[0];
        match dep.resource {
            Subresource::Image {
                old_layout,
                new_layout,
                ..
            } => {
                assert_eq!(old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                assert_eq!(new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            }
            _ => unreachable!(),
        }
        // The compute read reuses the transition barrier
        assert!(dep
            .dst
            .stage
            .contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        let states = tracker.image_states(image(), color());
        assert!(states
            .iter()
            .all(|(_, x)| x.layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }

    #[test]
    fn partial_mip_overlap() {
        let mut tracker = AccessTracker::new();
        let mip0 = ImageRange::new(vk::ImageAspectFlags::COLOR, 0..1, 0..1);
        let mips = ImageRange::new(vk::ImageAspectFlags::COLOR, 0..2, 0..1);
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[img(mip0, AccessMask::TRANSFER_WRITE)],
                &[img(mips, AccessMask::FRAGMENT_SAMPLED_READ)],
            ],
        );
        let barrier = out.barriers.before_pass(1).unwrap();
        let mut olds = barrier
            .dependencies()
            .iter()
            .map(|x| match x.resource {
                Subresource::Image {
                    range, old_layout, ..
                } => (range.mip_mask, old_layout),
                _ => unreachable!(),
            })
            .collect::<Vec<_>>();
        olds.sort_by_key(|x| x.0);
        assert_eq!(
            olds,
            vec![
                (0b01, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                (0b10, vk::ImageLayout::UNDEFINED)
            ]
        );
        for (range, state) in tracker.image_states(image(), mips) {
            assert!(mips.contains(&range));
            assert_eq!(state.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
    }

    #[test]
    fn single_transition_per_pass() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[&[
                img(color(), AccessMask::FRAGMENT_SAMPLED_READ),
                img(color(), AccessMask::VERTEX_SAMPLED_READ),
            ]],
        );
        let barrier = out.barriers.before_pass(0).unwrap();
        assert_eq!(barrier.image_barrier_count(), 1);
        assert_eq!(
            barrier.dependencies()[0].dst.stage,
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::VERTEX_SHADER
        );
    }

    #[test]
    fn carries_across_jobs() {
        let mut tracker = AccessTracker::new();
        run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[&[buf(WHOLE, AccessMask::TRANSFER_WRITE)]],
        );
        tracker.compact();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 2),
            &[&[buf(WHOLE, AccessMask::VERTEX_ATTRIBUTE_READ)]],
        );
        assert_eq!(out.barriers.len(), 1);
        assert!(out.barriers.before_pass(0).is_some());
        assert!(out.waits.is_empty());
    }

    #[test]
    fn other_queue_same_family_waits() {
        let mut tracker = AccessTracker::new();
        let first = job(GRAPHICS, 1);
        run(
            &mut tracker,
            first,
            &[&[buf(WHOLE, AccessMask::COMPUTE_STORAGE_WRITE)]],
        );
        let out = run(
            &mut tracker,
            job(COMPUTE, 2),
            &[&[buf(WHOLE, AccessMask::COMPUTE_STORAGE_READ)]],
        );
        assert_eq!(out.waits, vec![first.semaphore]);
        assert!(out.releases.is_empty());
        assert!(out.barriers.is_empty());
    }

    #[test]
    fn queue_family_transfer() {
        let mut tracker = AccessTracker::new();
        let first = job(GRAPHICS, 1);
        run(
            &mut tracker,
            first,
            &[&[img(color(), AccessMask::COLOR_ATTACHMENT_WRITE)]],
        );
        let out = run(
            &mut tracker,
            job(TRANSFER, 2),
            &[&[
                img(color(), AccessMask::TRANSFER_READ),
                img(color(), AccessMask::TRANSFER_READ),
            ]],
        );
        assert_eq!(out.waits, vec![first.semaphore]);
        assert_eq!(out.releases.len(), 1);
        let release = &out.releases[0];
        assert_eq!(release.queue, GRAPHICS);
        assert_eq!(release.dependencies.len(), 1);
        let expected = QueueTransfer {
            src_family: 0,
            dst_family: 1,
        };
        assert_eq!(release.dependencies[0].transfer, Some(expected));
        assert_eq!(out.queue_transfer_count(), 1);
        let acquire = out.barriers.before_pass(0).unwrap().dependencies()[0];
        assert_eq!(acquire.transfer, Some(expected));
        // Both halves perform the same transition
        assert_eq!(acquire.resource, release.dependencies[0].resource);
        for (_, state) in tracker.image_states(image(), color()) {
            assert_eq!(state.queue_family, 1);
            assert_eq!(state.layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        }
    }

    #[test]
    fn write_and_read_in_one_pass() {
        let write = buf(WHOLE, AccessMask::COMPUTE_STORAGE_WRITE);
        let read = buf(WHOLE, AccessMask::COMPUTE_STORAGE_READ);
        for first in [[write, read], [read, write]] {
            let mut tracker = AccessTracker::new();
            let out = run(&mut tracker, job(GRAPHICS, 1), &[&first, &[read]]);
            // The later read must still see the write
            assert_eq!(out.barriers.len(), 1);
            let barrier = out.barriers.before_pass(1).unwrap();
            assert_eq!(barrier.buffer_barrier_count(), 1);
            let state = tracker.buffer_states(buffer(), WHOLE)[0].1;
            assert!(state.readers.contains(&read.access));
        }
    }

    #[test]
    fn reads_made_visible_by_different_barriers() {
        let mut tracker = AccessTracker::new();
        run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[buf(WHOLE, AccessMask::TRANSFER_WRITE)],
                &[buf(WHOLE, AccessMask::VERTEX_UNIFORM_READ)],
            ],
        );
        let out = run(
            &mut tracker,
            job(GRAPHICS, 2),
            &[&[buf(WHOLE, AccessMask::COMPUTE_STORAGE_READ)]],
        );
        assert_eq!(out.barriers.len(), 1);
        // Neither earlier dependency covered vertex shader storage reads
        let out = run(
            &mut tracker,
            job(GRAPHICS, 3),
            &[&[buf(WHOLE, AccessMask::VERTEX_STORAGE_READ)]],
        );
        assert_eq!(out.barriers.len(), 1);
        assert_eq!(out.barriers.buffer_barrier_count(), 1);
        // Already covered by the dependency just synthesized
        let out = run(
            &mut tracker,
            job(GRAPHICS, 4),
            &[&[buf(WHOLE, AccessMask::VERTEX_STORAGE_READ)]],
        );
        assert!(out.barriers.is_empty());
    }

    #[test]
    fn transition_source_unaffected_by_later_readers() {
        let mut tracker = AccessTracker::new();
        let out = run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[
                &[img(color(), AccessMask::TRANSFER_WRITE)],
                &[img(color(), AccessMask::FRAGMENT_SAMPLED_READ)],
                &[img(color(), AccessMask::COMPUTE_SAMPLED_READ)],
            ],
        );
        let barrier = out.barriers.before_pass(1).unwrap();
        assert_eq!(barrier.dependencies().len(), 1);
        let dep = barrier.dependencies()[0];
        assert_eq!(dep.src, AccessMask::TRANSFER_WRITE.to_access());
        assert_eq!(
            barrier.src_stage_mask(),
            AccessMask::TRANSFER_WRITE.to_access().stage
        );
        assert!(dep
            .dst
            .stage
            .contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert!(out.barriers.before_pass(2).is_none());

        // Only ordering after the transition remains for readers in other stages
        let out = run(
            &mut tracker,
            job(GRAPHICS, 2),
            &[&[img(color(), AccessMask::VERTEX_SAMPLED_READ)]],
        );
        let barrier = out.barriers.before_pass(0).unwrap();
        assert!(barrier.has_execution_dependency());
        assert_eq!(barrier.image_barrier_count(), 0);
        assert_eq!(
            barrier.src_stage_mask(),
            vk::PipelineStageFlags2::FRAGMENT_SHADER
        );
    }

    #[test]
    fn transfer_halves_cover_identical_ranges() {
        let mut tracker = AccessTracker::new();
        let first = job(GRAPHICS, 1);
        run(
            &mut tracker,
            first,
            &[&[buf(WHOLE, AccessMask::COMPUTE_STORAGE_WRITE)]],
        );
        let out = run(
            &mut tracker,
            job(TRANSFER, 2),
            &[&[
                buf(BufferRange::new(0, 128), AccessMask::TRANSFER_READ),
                buf(BufferRange::new(64, 128), AccessMask::TRANSFER_READ),
            ]],
        );
        let offset = |x: &Subresource| match *x {
            Subresource::Buffer { range, .. } => range.offset,
            Subresource::Image { .. } => unreachable!(),
        };
        assert_eq!(out.releases.len(), 1);
        let mut released = out.releases[0]
            .dependencies
            .iter()
            .map(|x| x.resource)
            .collect::<Vec<_>>();
        released.sort_by_key(offset);
        let mut acquired = out
            .barriers
            .iter()
            .flat_map(|x| x.dependencies())
            .filter(|x| x.transfer.is_some())
            .map(|x| x.resource)
            .collect::<Vec<_>>();
        acquired.sort_by_key(offset);
        assert_eq!(released.len(), 3);
        assert_eq!(released, acquired);
    }

    #[test]
    fn acquire_waits_for_release() {
        let mut tracker = AccessTracker::new();
        let first = job(GRAPHICS, 1);
        run(
            &mut tracker,
            first,
            &[&[buf(WHOLE, AccessMask::COMPUTE_STORAGE_WRITE)]],
        );
        let mut out = run(
            &mut tracker,
            job(TRANSFER, 2),
            &[&[buf(WHOLE, AccessMask::TRANSFER_READ)]],
        );
        assert!(out.releases[0].signal.is_null());
        out.signal_releases([3]);
        let signal = JobSemaphore {
            queue: GRAPHICS,
            timestamp: 3,
        };
        assert_eq!(out.releases[0].signal, signal);
        assert_eq!(out.releases[0].after, first.semaphore);
        assert_eq!(out.waits, vec![signal]);
    }

    #[test]
    fn discard_and_forget() {
        let mut tracker = AccessTracker::new();
        run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[&[buf(WHOLE, AccessMask::TRANSFER_WRITE)]],
        );
        tracker.discard_buffer(buffer(), WHOLE);
        let out = run(
            &mut tracker,
            job(GRAPHICS, 2),
            &[&[buf(WHOLE, AccessMask::COMPUTE_STORAGE_READ)]],
        );
        assert!(out.barriers.is_empty());
        tracker.forget_dynamic(vk::ObjectType::BUFFER, buffer().as_raw());
        assert_eq!(
            tracker.buffer_states(buffer(), WHOLE),
            vec![(WHOLE, ResourceState::INITIAL)]
        );
    }

    #[test]
    fn compaction_merges() {
        let mut tracker = AccessTracker::new();
        run(
            &mut tracker,
            job(GRAPHICS, 1),
            &[&[
                buf(BufferRange::new(0, 64), AccessMask::TRANSFER_WRITE),
                buf(BufferRange::new(64, 64), AccessMask::TRANSFER_WRITE),
            ]],
        );
        assert_eq!(tracker.range_count(), 3);
        tracker.compact();
        assert_eq!(tracker.range_count(), 2);
    }

    #[test]
    fn conflicting_layouts_in_pass() {
        let a = img(color(), AccessMask::FRAGMENT_SAMPLED_READ);
        let b = img(
            ImageRange::new(vk::ImageAspectFlags::COLOR, 0..1, 0..1),
            AccessMask::TRANSFER_WRITE,
        );
        assert!(a.conflicts_with(&b));
        assert!(!a.conflicts_with(&a));
        assert_eq!(
            TrackedAccess::buffer(buffer(), BufferRange::new(0, 0), AccessMask::INDEX_READ),
            Err(Error::EmptyRange)
        );
    }
}
