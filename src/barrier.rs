//! Pipeline barriers synthesized from resource dependencies

use ash::{vk, Device};
use log::trace;
use smallvec::SmallVec;

use crate::access::{extend_destination_stages, extend_source_stages};
use crate::{Access, BufferRange, ImageRange};

/// Ownership transfer of an exclusively shared resource between queue families
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct QueueTransfer {
    pub src_family: u32,
    pub dst_family: u32,
}

/// The part of a resource a dependency applies to
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Subresource {
    Buffer {
        buffer: vk::Buffer,
        range: BufferRange,
    },
    Image {
        image: vk::Image,
        range: ImageRange,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
}

impl Subresource {
    /// Whether a memory barrier for `self` also serves `other`
    fn contains(&self, other: &Subresource) -> bool {
        match (self, other) {
            (
                Subresource::Buffer { buffer, range },
                Subresource::Buffer {
                    buffer: b,
                    range: r,
                },
            ) => buffer == b && range.contains(r),
            (
                Subresource::Image {
                    image,
                    range,
                    old_layout,
                    new_layout,
                },
                Subresource::Image {
                    image: i,
                    range: r,
                    old_layout: o,
                    new_layout: n,
                },
            ) => {
                // A dependency needing no transition of its own may ride along with one that
                // ends in its layout
                image == i
                    && range.contains(r)
                    && new_layout == n
                    && (old_layout == o || o == n)
            }
            _ => false,
        }
    }
}

/// An ordering constraint between earlier accesses of a resource and a later one
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub resource: Subresource,
    pub src: Access,
    pub dst: Access,
    pub transfer: Option<QueueTransfer>,
}

impl Dependency {
    pub fn is_layout_transition(&self) -> bool {
        match self.resource {
            Subresource::Image {
                old_layout,
                new_layout,
                ..
            } => old_layout != new_layout,
            Subresource::Buffer { .. } => false,
        }
    }

    /// Whether an execution dependency alone is insufficient
    pub fn needs_memory_barrier(&self) -> bool {
        !self.src.is_read_only() || self.transfer.is_some() || self.is_layout_transition()
    }

    /// Vulkan barriers expressing this dependency, appended to the output vectors
    pub fn to_vk(
        &self,
        buffers: &mut Vec<vk::BufferMemoryBarrier2<'static>>,
        images: &mut Vec<vk::ImageMemoryBarrier2<'static>>,
    ) {
        let (src_family, dst_family) = match self.transfer {
            Some(x) => (x.src_family, x.dst_family),
            None => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
        };
        match self.resource {
            Subresource::Buffer { buffer, range } => {
                buffers.push(
                    vk::BufferMemoryBarrier2::default()
                        .src_stage_mask(self.src.stage)
                        .src_access_mask(self.src.access)
                        .dst_stage_mask(self.dst.stage)
                        .dst_access_mask(self.dst.access)
                        .src_queue_family_index(src_family)
                        .dst_queue_family_index(dst_family)
                        .buffer(buffer)
                        .offset(range.offset)
                        .size(if range.end() == u64::MAX {
                            vk::WHOLE_SIZE
                        } else {
                            range.size
                        }),
                );
            }
            Subresource::Image {
                image,
                range,
                old_layout,
                new_layout,
            } => {
                // One barrier per contiguous run of mip levels
                for (base, count) in range.mip_runs() {
                    images.push(
                        vk::ImageMemoryBarrier2::default()
                            .src_stage_mask(self.src.stage)
                            .src_access_mask(self.src.access)
                            .dst_stage_mask(self.dst.stage)
                            .dst_access_mask(self.dst.access)
                            .old_layout(old_layout)
                            .new_layout(new_layout)
                            .src_queue_family_index(src_family)
                            .dst_queue_family_index(dst_family)
                            .image(image)
                            .subresource_range(vk::ImageSubresourceRange {
                                aspect_mask: range.aspects,
                                base_mip_level: base,
                                level_count: if base + count == 32 {
                                    vk::REMAINING_MIP_LEVELS
                                } else {
                                    count
                                },
                                base_array_layer: range.base_layer,
                                layer_count: if range.layer_end() == u32::MAX {
                                    vk::REMAINING_ARRAY_LAYERS
                                } else {
                                    range.layer_count
                                },
                            }),
                    );
                }
            }
        }
    }
}

/// A single pipeline barrier command, recorded before the pass at `pass`
#[derive(Debug, Clone)]
pub struct Barrier {
    pass: usize,
    src_stage: vk::PipelineStageFlags2,
    dst_stage: vk::PipelineStageFlags2,
    /// Stages synchronized implicitly through logical pipeline ordering
    ext_src_stage: vk::PipelineStageFlags2,
    ext_dst_stage: vk::PipelineStageFlags2,
    /// Whether some dependency relies on the barrier's combined execution scopes
    execution: bool,
    dependencies: SmallVec<[Dependency; 4]>,
}

impl Barrier {
    fn new(pass: usize) -> Self {
        Self {
            pass,
            src_stage: vk::PipelineStageFlags2::empty(),
            dst_stage: vk::PipelineStageFlags2::empty(),
            ext_src_stage: vk::PipelineStageFlags2::empty(),
            ext_dst_stage: vk::PipelineStageFlags2::empty(),
            execution: false,
            dependencies: SmallVec::new(),
        }
    }

    /// Index of the pass this barrier precedes
    #[inline]
    pub fn pass(&self) -> usize {
        self.pass
    }

    #[inline]
    pub fn src_stage_mask(&self) -> vk::PipelineStageFlags2 {
        self.src_stage
    }

    #[inline]
    pub fn dst_stage_mask(&self) -> vk::PipelineStageFlags2 {
        self.dst_stage
    }

    /// Dependencies requiring buffer or image memory barriers
    #[inline]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Whether the barrier carries a global execution dependency
    #[inline]
    pub fn has_execution_dependency(&self) -> bool {
        self.execution
    }

    fn covers(&self, dependency: &Dependency) -> bool {
        self.ext_src_stage.contains(dependency.src.stage)
            && self.ext_dst_stage.contains(dependency.dst.stage)
    }

    fn add_stages(&mut self, dependency: &Dependency) {
        self.src_stage |= dependency.src.stage;
        self.dst_stage |= dependency.dst.stage;
        self.ext_src_stage = extend_source_stages(self.src_stage);
        self.ext_dst_stage = extend_destination_stages(self.dst_stage);
    }

    /// Returns the index of the memory dependency created, if any
    fn add(&mut self, dependency: &Dependency) -> Option<usize> {
        self.add_stages(dependency);
        if dependency.needs_memory_barrier() {
            self.dependencies.push(*dependency);
            Some(self.dependencies.len() - 1)
        } else {
            self.execution = true;
            None
        }
    }

    /// Widen the scopes of memory dependency `index` to include `dependency`
    fn extend(&mut self, index: usize, dependency: &Dependency) -> Option<usize> {
        let existing = &mut self.dependencies[index];
        if existing.transfer != dependency.transfer
            || !existing.resource.contains(&dependency.resource)
        {
            return self.add(dependency);
        }
        existing.src |= dependency.src;
        existing.dst |= dependency.dst;
        self.add_stages(dependency);
        Some(index)
    }

    /// Widen only the destination scope of memory dependency `index` to include `dependency`
    fn widen(&mut self, index: usize, dependency: &Dependency) -> Option<usize> {
        let existing = &mut self.dependencies[index];
        if !existing.resource.contains(&dependency.resource) {
            return self.add(dependency);
        }
        existing.dst |= dependency.dst;
        self.dst_stage |= dependency.dst.stage;
        self.ext_dst_stage = extend_destination_stages(self.dst_stage);
        Some(index)
    }

    pub fn buffer_barrier_count(&self) -> usize {
        self.dependencies
            .iter()
            .filter(|x| matches!(x.resource, Subresource::Buffer { .. }))
            .count()
    }

    pub fn image_barrier_count(&self) -> usize {
        self.dependencies
            .iter()
            .map(|x| match x.resource {
                Subresource::Image { range, .. } => range.mip_runs().count(),
                Subresource::Buffer { .. } => 0,
            })
            .sum()
    }

    pub fn queue_transfer_count(&self) -> usize {
        self.dependencies
            .iter()
            .filter(|x| x.transfer.is_some())
            .count()
    }

    /// Record the barrier into `cmd`
    ///
    /// # Safety
    /// `cmd` must be in the recording state and belong to the queue the barrier was synthesized
    /// for. Every referenced resource must be alive.
    pub unsafe fn record(&self, device: &Device, cmd: vk::CommandBuffer) {
        let mut buffers = Vec::new();
        let mut images = Vec::new();
        for x in &self.dependencies {
            x.to_vk(&mut buffers, &mut images);
        }
        let memory = [vk::MemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .dst_stage_mask(self.dst_stage)];
        let memory: &[_] = if self.execution { &memory } else { &[] };
        unsafe {
            device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default()
                    .memory_barriers(memory)
                    .buffer_memory_barriers(&buffers)
                    .image_memory_barriers(&images),
            );
        }
    }
}

/// Identifies where a dependency ended up, so later dependencies can extend it
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BarrierRef {
    pub barrier: usize,
    pub memory: Option<usize>,
}

/// Barriers of one job, ordered by the pass they precede
#[derive(Debug, Clone, Default)]
pub struct BarrierList {
    barriers: Vec<Barrier>,
}

impl BarrierList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Barrier> {
        self.barriers.iter()
    }

    /// The barrier to record immediately before `pass`, if any
    pub fn before_pass(&self, pass: usize) -> Option<&Barrier> {
        self.barriers
            .binary_search_by_key(&pass, |x| x.pass)
            .ok()
            .map(|i| &self.barriers[i])
    }

    /// Insert `dependency` ahead of `pass`, reusing a barrier at or after `first_reusable` if one
    /// already synchronizes the same stages
    pub fn synchronize(
        &mut self,
        dependency: Dependency,
        pass: usize,
        first_reusable: usize,
    ) -> BarrierRef {
        trace!(
            "dependency {:?} -> {:?} on {:?} before pass {pass}",
            dependency.src,
            dependency.dst,
            dependency.resource
        );
        for index in (first_reusable..self.barriers.len()).rev() {
            let barrier = &mut self.barriers[index];
            if barrier.covers(&dependency) {
                return BarrierRef {
                    barrier: index,
                    memory: barrier.add(&dependency),
                };
            }
        }
        let index = match self.barriers.last() {
            Some(x) if x.pass == pass && self.barriers.len() > first_reusable => {
                self.barriers.len() - 1
            }
            _ => {
                debug_assert!(self.barriers.last().map_or(true, |x| x.pass < pass));
                self.barriers.push(Barrier::new(pass));
                self.barriers.len() - 1
            }
        };
        BarrierRef {
            barrier: index,
            memory: self.barriers[index].add(&dependency),
        }
    }

    /// Fold `dependency` into the barrier previously chosen for an earlier dependency
    pub fn extend(&mut self, dependency: Dependency, at: BarrierRef) -> BarrierRef {
        let barrier = &mut self.barriers[at.barrier];
        let memory = match at.memory {
            Some(index) => barrier.extend(index, &dependency),
            None => barrier.add(&dependency),
        };
        BarrierRef {
            barrier: at.barrier,
            memory: memory.or(at.memory),
        }
    }

    /// Make the memory dependency at `at` visible to `dependency.dst` too, without widening what
    /// it waits on
    pub fn widen(&mut self, dependency: Dependency, at: BarrierRef) -> BarrierRef {
        let barrier = &mut self.barriers[at.barrier];
        let memory = match at.memory {
            Some(index) => barrier.widen(index, &dependency),
            None => barrier.add(&dependency),
        };
        BarrierRef {
            barrier: at.barrier,
            memory: memory.or(at.memory),
        }
    }

    /// Accesses made visible by the memory dependency at `at`, if it has one
    pub fn visibility(&self, at: BarrierRef) -> Option<Access> {
        let index = at.memory?;
        Some(self.barriers[at.barrier].dependencies[index].dst)
    }

    pub fn buffer_barrier_count(&self) -> usize {
        self.barriers.iter().map(|x| x.buffer_barrier_count()).sum()
    }

    pub fn image_barrier_count(&self) -> usize {
        self.barriers.iter().map(|x| x.image_barrier_count()).sum()
    }
}

impl<'a> IntoIterator for &'a BarrierList {
    type Item = &'a Barrier;
    type IntoIter = std::slice::Iter<'a, Barrier>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
