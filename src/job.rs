//! Declaration of jobs: ordered passes and the resources they access

use ash::vk;

use crate::ring_buffer::BufferView;
use crate::tracking::TrackedAccess;
use crate::{AccessMask, BufferRange, DeviceQueue, Error, ImageRange, Result};

/// A buffer allocated for the duration of a single job
///
/// Only meaningful to the job that allocated it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LocalBuffer {
    index: usize,
}

impl LocalBuffer {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Target {
    /// Range relative to the view
    View(BufferView, BufferRange),
    /// Range relative to the local buffer
    Local(LocalBuffer, BufferRange),
    Image(vk::Image, ImageRange),
}

/// Use of a resource by a pass
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResourceAccess {
    target: Target,
    mask: AccessMask,
}

impl ResourceAccess {
    /// Access to every byte of `view`
    pub fn buffer(view: BufferView, mask: AccessMask) -> Self {
        Self::buffer_range(view, BufferRange::WHOLE, mask)
    }

    /// Access to `range` of `view`, relative to the start of the view
    ///
    /// A range of size `u64::MAX` extends to the end of the view.
    pub fn buffer_range(view: BufferView, range: BufferRange, mask: AccessMask) -> Self {
        Self {
            target: Target::View(view, range),
            mask,
        }
    }

    pub fn local(buffer: LocalBuffer, mask: AccessMask) -> Self {
        Self::local_range(buffer, BufferRange::WHOLE, mask)
    }

    pub fn local_range(buffer: LocalBuffer, range: BufferRange, mask: AccessMask) -> Self {
        Self {
            target: Target::Local(buffer, range),
            mask,
        }
    }

    pub fn image(image: vk::Image, range: ImageRange, mask: AccessMask) -> Self {
        Self {
            target: Target::Image(image, range),
            mask,
        }
    }

    #[inline]
    pub fn mask(&self) -> AccessMask {
        self.mask
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct LocalBufferRequest {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

/// A validated access whose final location may not be known until enqueue
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum PassAccess {
    Resolved(TrackedAccess),
    Local {
        buffer: usize,
        range: BufferRange,
        mask: AccessMask,
    },
}

impl PassAccess {
    /// Absolute access, given the views allocated for the job's local buffers
    pub fn resolve(&self, local_buffers: &[BufferView]) -> Result<TrackedAccess> {
        match *self {
            PassAccess::Resolved(x) => Ok(x),
            PassAccess::Local {
                buffer,
                range,
                mask,
            } => {
                let view = local_buffers
                    .get(buffer)
                    .ok_or(Error::UnknownLocalBuffer(buffer))?;
                TrackedAccess::buffer(
                    view.buffer,
                    BufferRange::new(view.offset + range.offset, range.size),
                    mask,
                )
            }
        }
    }
}

/// A batch of work for one queue, made of passes that execute in declaration order
///
/// Every access is validated as it's declared, so a job that was built successfully can always be
/// enqueued unless the device fails.
#[derive(Debug, Clone)]
pub struct Job {
    queue: DeviceQueue,
    name: Option<String>,
    pub(crate) local_buffers: Vec<LocalBufferRequest>,
    pub(crate) passes: Vec<Vec<PassAccess>>,
}

impl Job {
    pub fn new(queue: DeviceQueue) -> Self {
        Self {
            queue,
            name: None,
            local_buffers: Vec::new(),
            passes: Vec::new(),
        }
    }

    /// Label used in logs and statistics
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[inline]
    pub fn queue(&self) -> DeviceQueue {
        self.queue
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Request `size` bytes of buffer memory, valid from the job's first pass until it completes
    ///
    /// Contents are undefined at the start of the job.
    pub fn allocate_local_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<LocalBuffer> {
        if size == 0 {
            return Err(Error::EmptyRange);
        }
        self.local_buffers.push(LocalBufferRequest { size, usage });
        Ok(LocalBuffer {
            index: self.local_buffers.len() - 1,
        })
    }

    /// Append a pass making `accesses`, returning its index
    ///
    /// On error the job is left unchanged.
    pub fn add_pass(
        &mut self,
        accesses: impl IntoIterator<Item = ResourceAccess>,
    ) -> Result<usize> {
        let mut pass = Vec::new();
        for access in accesses {
            pass.push(self.validate(&access)?);
        }
        for (i, a) in pass.iter().enumerate() {
            let PassAccess::Resolved(a) = a else {
                continue;
            };
            for b in &pass[i + 1..] {
                if let PassAccess::Resolved(b) = b {
                    if a.conflicts_with(b) {
                        return Err(Error::ConflictingLayouts(a.mask() | b.mask()));
                    }
                }
            }
        }
        self.passes.push(pass);
        Ok(self.passes.len() - 1)
    }

    fn validate(&self, access: &ResourceAccess) -> Result<PassAccess> {
        match access.target {
            Target::View(view, range) => {
                let range = bounded(range, view.size)?;
                let absolute = BufferRange::new(view.offset + range.offset, range.size);
                Ok(PassAccess::Resolved(TrackedAccess::buffer(
                    view.buffer,
                    absolute,
                    access.mask,
                )?))
            }
            Target::Local(buffer, range) => {
                let request = self
                    .local_buffers
                    .get(buffer.index)
                    .ok_or(Error::UnknownLocalBuffer(buffer.index))?;
                let range = bounded(range, request.size)?;
                // Validates the mask; the buffer isn't known yet
                TrackedAccess::buffer(vk::Buffer::null(), range, access.mask)?;
                Ok(PassAccess::Local {
                    buffer: buffer.index,
                    range,
                    mask: access.mask,
                })
            }
            Target::Image(image, range) => Ok(PassAccess::Resolved(TrackedAccess::image(
                image,
                range,
                access.mask,
            )?)),
        }
    }
}

/// Clamp a whole-buffer `range` to `limit` bytes, checking that any other range lies within it
fn bounded(range: BufferRange, limit: vk::DeviceSize) -> Result<BufferRange> {
    if range.is_empty() {
        return Err(Error::EmptyRange);
    }
    let out_of_bounds = Error::RangeOutOfBounds {
        offset: range.offset,
        size: range.size,
        limit,
    };
    if range.size == u64::MAX {
        if range.offset >= limit {
            return Err(out_of_bounds);
        }
        return Ok(BufferRange::new(range.offset, limit - range.offset));
    }
    match range.offset.checked_add(range.size) {
        Some(end) if end <= limit => Ok(range),
        _ => Err(out_of_bounds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{QueueType, ResourceKind};
    use ash::vk::Handle;

    const GRAPHICS: DeviceQueue = DeviceQueue::new(QueueType::Graphics, 0);

    fn view() -> BufferView {
        BufferView {
            buffer: vk::Buffer::from_raw(0x100),
            offset: 256,
            size: 1024,
        }
    }

    #[test]
    fn ranges_checked() {
        let mut job = Job::new(GRAPHICS);
        assert_eq!(
            job.add_pass([ResourceAccess::buffer_range(
                view(),
                BufferRange::new(1000, 100),
                AccessMask::TRANSFER_READ
            )]),
            Err(Error::RangeOutOfBounds {
                offset: 1000,
                size: 100,
                limit: 1024
            })
        );
        assert_eq!(
            job.add_pass([ResourceAccess::buffer_range(
                view(),
                BufferRange::new(0, 0),
                AccessMask::TRANSFER_READ
            )]),
            Err(Error::EmptyRange)
        );
        assert_eq!(
            job.add_pass([ResourceAccess::buffer_range(
                view(),
                BufferRange::new(1000, 24),
                AccessMask::TRANSFER_READ
            )]),
            Ok(0)
        );
        let PassAccess::Resolved(access) = job.passes[0][0] else {
            panic!("view accesses resolve immediately");
        };
        assert_eq!(
            access,
            TrackedAccess::buffer(
                view().buffer,
                BufferRange::new(1256, 24),
                AccessMask::TRANSFER_READ
            )
            .unwrap()
        );
    }

    #[test]
    fn whole_view() {
        let mut job = Job::new(GRAPHICS);
        job.add_pass([ResourceAccess::buffer(view(), AccessMask::INDEX_READ)])
            .unwrap();
        let PassAccess::Resolved(access) = job.passes[0][0] else {
            panic!("view accesses resolve immediately");
        };
        assert_eq!(
            access,
            TrackedAccess::buffer(
                view().buffer,
                BufferRange::new(256, 1024),
                AccessMask::INDEX_READ
            )
            .unwrap()
        );
    }

    #[test]
    fn masks_checked() {
        let mut job = Job::new(GRAPHICS);
        assert_eq!(
            job.add_pass([ResourceAccess::buffer(
                view(),
                AccessMask::COLOR_ATTACHMENT_WRITE
            )]),
            Err(Error::InvalidAccess {
                kind: ResourceKind::Buffer,
                mask: AccessMask::COLOR_ATTACHMENT_WRITE
            })
        );
        let image = vk::Image::from_raw(0x200);
        assert_eq!(
            job.add_pass([ResourceAccess::image(
                image,
                ImageRange::whole(vk::ImageAspectFlags::COLOR),
                AccessMask::INDEX_READ
            )]),
            Err(Error::InvalidAccess {
                kind: ResourceKind::Image,
                mask: AccessMask::INDEX_READ
            })
        );
        assert_eq!(job.pass_count(), 0);
    }

    #[test]
    fn local_buffers() {
        let mut job = Job::new(GRAPHICS);
        assert_eq!(
            job.allocate_local_buffer(0, vk::BufferUsageFlags::STORAGE_BUFFER),
            Err(Error::EmptyRange)
        );
        let a = job
            .allocate_local_buffer(128, vk::BufferUsageFlags::STORAGE_BUFFER)
            .unwrap();
        job.add_pass([ResourceAccess::local(a, AccessMask::COMPUTE_STORAGE_WRITE)])
            .unwrap();
        assert_eq!(
            job.passes[0][0],
            PassAccess::Local {
                buffer: 0,
                range: BufferRange::new(0, 128),
                mask: AccessMask::COMPUTE_STORAGE_WRITE
            }
        );
        assert_eq!(
            job.add_pass([ResourceAccess::local_range(
                a,
                BufferRange::new(64, 128),
                AccessMask::COMPUTE_STORAGE_READ
            )]),
            Err(Error::RangeOutOfBounds {
                offset: 64,
                size: 128,
                limit: 128
            })
        );

        let mut other = Job::new(GRAPHICS);
        other
            .allocate_local_buffer(16, vk::BufferUsageFlags::UNIFORM_BUFFER)
            .unwrap();
        let foreign = other
            .allocate_local_buffer(16, vk::BufferUsageFlags::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(
            job.add_pass([ResourceAccess::local(
                foreign,
                AccessMask::VERTEX_UNIFORM_READ
            )]),
            Err(Error::UnknownLocalBuffer(1))
        );

        let views = [BufferView {
            buffer: vk::Buffer::from_raw(0x300),
            offset: 512,
            size: 128,
        }];
        assert_eq!(
            job.passes[0][0].resolve(&views),
            TrackedAccess::buffer(
                views[0].buffer,
                BufferRange::new(512, 128),
                AccessMask::COMPUTE_STORAGE_WRITE
            )
        );
    }

    #[test]
    fn conflicting_layouts_rejected() {
        let image = vk::Image::from_raw(0x200);
        let color = ImageRange::whole(vk::ImageAspectFlags::COLOR);
        let mut job = Job::new(GRAPHICS).named("blit");
        assert_eq!(job.name(), Some("blit"));
        assert_eq!(
            job.add_pass([
                ResourceAccess::image(image, color, AccessMask::FRAGMENT_SAMPLED_READ),
                ResourceAccess::image(
                    image,
                    ImageRange::new(vk::ImageAspectFlags::COLOR, 0..1, 0..1),
                    AccessMask::TRANSFER_WRITE
                ),
            ]),
            Err(Error::ConflictingLayouts(
                AccessMask::FRAGMENT_SAMPLED_READ | AccessMask::TRANSFER_WRITE
            ))
        );
        // Disjoint subresources may use different layouts
        assert_eq!(
            job.add_pass([
                ResourceAccess::image(
                    image,
                    ImageRange::new(vk::ImageAspectFlags::COLOR, 1..2, 0..1),
                    AccessMask::FRAGMENT_SAMPLED_READ
                ),
                ResourceAccess::image(
                    image,
                    ImageRange::new(vk::ImageAspectFlags::COLOR, 0..1, 0..1),
                    AccessMask::TRANSFER_WRITE
                ),
            ]),
            Ok(0)
        );
    }
}
