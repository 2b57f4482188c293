use std::{cmp::Ordering, collections::BinaryHeap, sync::mpsc, sync::Arc};

use ash::{vk, vk::Handle, Device};
use log::{error, warn};

use crate::lifeguard::{Notice, Retirer};
use crate::queue::Timeline;
use crate::{Destroyable, HandleVisitor, VisitHandles};

/// Entry point for destroying native handles
pub trait Destroyer: Send + Sync {
    /// # Safety
    /// `handle` must be a live object of type `ty` that no pending or executing work uses
    unsafe fn destroy(&self, ty: vk::ObjectType, handle: u64);
}

impl Destroyer for Device {
    unsafe fn destroy(&self, ty: vk::ObjectType, handle: u64) {
        unsafe { destroy_dynamic(self, ty, handle) }
    }
}

/// Deferred destruction of handles that jobs may still be using
///
/// Handles are tagged with the most recently assigned timestamp when they're retired, and
/// destroyed by [`reclaim`](Self::reclaim) once that timestamp is reached on every queue.
pub struct Graveyard {
    retirer: Retirer,
    destroyer: Arc<dyn Destroyer>,
    recv: mpsc::Receiver<Notice>,
    pending: BinaryHeap<Grave>,
    /// Handles destroyed immediately, to be reported on the next reclaim
    destroyed: Vec<(vk::ObjectType, u64)>,
}

impl Graveyard {
    pub fn new(destroyer: Arc<dyn Destroyer>, timeline: Arc<Timeline>) -> Self {
        let (send, recv) = mpsc::channel();
        Self {
            retirer: Retirer::new(destroyer.clone(), timeline, send),
            destroyer,
            recv,
            pending: BinaryHeap::new(),
            destroyed: Vec::new(),
        }
    }

    /// Capability for lifeguards to retire handles into this graveyard
    #[inline]
    pub fn retirer(&self) -> Retirer {
        self.retirer.clone()
    }

    /// Free the resources in `resources` after all work enqueued so far completes
    pub fn inter(&mut self, resources: impl VisitHandles) {
        resources.visit_handles(self);
    }

    /// Free `handle` after all work enqueued so far completes
    ///
    /// Escape hatch for stuff that doesn't implement `VisitHandles`
    pub fn inter_handle<T: Destroyable>(&mut self, handle: T) {
        self.inter_handle_dynamic(T::TYPE, handle.as_raw());
    }

    /// Free `handle` after all work enqueued so far completes
    ///
    /// Escape hatch for dynamically typed handles
    pub fn inter_handle_dynamic(&mut self, ty: vk::ObjectType, handle: u64) {
        self.pending.push(Grave {
            timestamp: self.retirer.timeline().last_pending(),
            ty,
            handle,
        });
    }

    fn collect(&mut self) {
        while let Ok(notice) = self.recv.try_recv() {
            match notice {
                Notice::Retire {
                    timestamp,
                    ty,
                    handle,
                } => self.pending.push(Grave {
                    timestamp,
                    ty,
                    handle,
                }),
                Notice::Destroyed { ty, handle } => self.destroyed.push((ty, handle)),
            }
        }
    }

    /// Destroy every handle retired at or before `reached`, returning the number destroyed
    ///
    /// `on_destroy` is invoked for each destroyed handle, including those destroyed immediately
    /// by their lifeguards since the last call.
    ///
    /// # Safety
    /// `reached` must have been reached on every queue
    pub unsafe fn reclaim(
        &mut self,
        reached: u64,
        mut on_destroy: impl FnMut(vk::ObjectType, u64),
    ) -> usize {
        self.collect();
        for (ty, handle) in self.destroyed.drain(..) {
            on_destroy(ty, handle);
        }
        let mut count = 0;
        while self.pending.peek().map_or(false, |x| x.timestamp <= reached) {
            let Some(grave) = self.pending.pop() else {
                break;
            };
            unsafe {
                self.destroyer.destroy(grave.ty, grave.handle);
            }
            on_destroy(grave.ty, grave.handle);
            count += 1;
        }
        count
    }

    /// Number of handles awaiting destruction
    pub fn pending(&mut self) -> usize {
        self.collect();
        self.pending.len()
    }

    /// Free all resources immediately
    ///
    /// # Safety
    /// The device must be idle
    pub unsafe fn clear(&mut self) {
        unsafe {
            self.reclaim(u64::MAX, |_, _| {});
        }
    }
}

impl HandleVisitor for Graveyard {
    fn visit<T: Destroyable>(&mut self, x: T) {
        self.inter_handle(x);
    }
}

impl Drop for Graveyard {
    fn drop(&mut self) {
        let pending = self.pending();
        if pending != 0 {
            warn!("leaking {} handles awaiting destruction", pending);
        }
    }
}

/// A handle awaiting destruction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Grave {
    timestamp: u64,
    ty: vk::ObjectType,
    handle: u64,
}

impl Ord for Grave {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the heap yields the earliest timestamp first
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.handle.cmp(&self.handle))
    }
}

impl PartialOrd for Grave {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Destroy a handle of any [`Destroyable`] type
///
/// Handles of other types are logged and leaked.
///
/// # Safety
/// `handle` must be a live object of type `ty` created from `device` that no pending or executing
/// work uses
pub unsafe fn destroy_dynamic(device: &Device, ty: vk::ObjectType, handle: u64) {
    unsafe {
        match ty {
            vk::ObjectType::BUFFER => device.destroy_buffer(vk::Buffer::from_raw(handle), None),
            vk::ObjectType::BUFFER_VIEW => {
                device.destroy_buffer_view(vk::BufferView::from_raw(handle), None)
            }
            vk::ObjectType::IMAGE => device.destroy_image(vk::Image::from_raw(handle), None),
            vk::ObjectType::IMAGE_VIEW => {
                device.destroy_image_view(vk::ImageView::from_raw(handle), None)
            }
            vk::ObjectType::SAMPLER => device.destroy_sampler(vk::Sampler::from_raw(handle), None),
            vk::ObjectType::DEVICE_MEMORY => {
                device.free_memory(vk::DeviceMemory::from_raw(handle), None)
            }
            vk::ObjectType::FRAMEBUFFER => {
                device.destroy_framebuffer(vk::Framebuffer::from_raw(handle), None)
            }
            vk::ObjectType::SEMAPHORE => {
                device.destroy_semaphore(vk::Semaphore::from_raw(handle), None)
            }
            vk::ObjectType::PIPELINE => {
                device.destroy_pipeline(vk::Pipeline::from_raw(handle), None)
            }
            vk::ObjectType::DESCRIPTOR_POOL => {
                device.destroy_descriptor_pool(vk::DescriptorPool::from_raw(handle), None)
            }
            _ => error!("leaking {:?} handle {:#x}: unsupported type", ty, handle),
        }
    }
}
