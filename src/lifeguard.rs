//! Ownership of native handles with destruction deferred until the device is done with them

use std::{fmt, sync::mpsc, sync::Arc};

use ash::{vk, vk::Handle};
use log::warn;

use crate::graveyard::Destroyer;
use crate::queue::Timeline;
use crate::Destroyable;

/// Sent from lifeguards to the graveyard that owns the receiving end
pub(crate) enum Notice {
    /// Destroy `handle` once `timestamp` is reached on every queue
    Retire {
        timestamp: u64,
        ty: vk::ObjectType,
        handle: u64,
    },
    /// `handle` was destroyed immediately by its owner
    Destroyed { ty: vk::ObjectType, handle: u64 },
}

/// Capability to retire handles into a [`Graveyard`](crate::Graveyard)
///
/// Cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct Retirer {
    shared: Arc<Shared>,
}

struct Shared {
    destroyer: Arc<dyn Destroyer>,
    timeline: Arc<Timeline>,
    send: mpsc::Sender<Notice>,
}

impl Retirer {
    pub(crate) fn new(
        destroyer: Arc<dyn Destroyer>,
        timeline: Arc<Timeline>,
        send: mpsc::Sender<Notice>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                destroyer,
                timeline,
                send,
            }),
        }
    }

    #[inline]
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.shared.timeline
    }

    /// Destroy `handle` once all work submitted so far has completed
    pub fn retire_dynamic(&self, ty: vk::ObjectType, handle: u64) {
        let timestamp = self.shared.timeline.last_pending();
        if self
            .shared
            .send
            .send(Notice::Retire {
                timestamp,
                ty,
                handle,
            })
            .is_err()
        {
            warn!("leaking {:?} {:#x}: graveyard is gone", ty, handle);
        }
    }

    /// # Safety
    /// No work using `handle` may be pending or executing
    pub unsafe fn destroy_dynamic(&self, ty: vk::ObjectType, handle: u64) {
        unsafe {
            self.shared.destroyer.destroy(ty, handle);
        }
        // Nothing left to destroy, but whoever tracks the handle must still forget it
        let _ = self.shared.send.send(Notice::Destroyed { ty, handle });
    }
}

/// Owner of a single Vulkan handle
///
/// Dropping an owning lifeguard retires the handle, destroying it once every job enqueued up to
/// that point has finished. Non-owning lifeguards wrap handles whose lifetime is managed
/// elsewhere, such as swapchain images, and never destroy them.
pub struct Lifeguard<T: Destroyable> {
    handle: T,
    retirer: Option<Retirer>,
}

impl<T: Destroyable> Lifeguard<T> {
    pub fn new(handle: T, retirer: &Retirer) -> Self {
        Self {
            handle,
            retirer: Some(retirer.clone()),
        }
    }

    pub fn non_owning(handle: T) -> Self {
        Self {
            handle,
            retirer: None,
        }
    }

    #[inline]
    pub fn handle(&self) -> T {
        self.handle
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.handle.as_raw() == 0
    }

    #[inline]
    pub fn is_owning(&self) -> bool {
        self.retirer.is_some()
    }

    /// Destroy the handle, leaving the lifeguard null
    ///
    /// Without `immediately`, destruction is deferred until all work enqueued so far completes.
    ///
    /// # Safety
    /// If `immediately` is set, no work using the handle may be pending or executing
    pub unsafe fn destroy_handle(&mut self, immediately: bool) {
        let Some(retirer) = self.retirer.take() else {
            return;
        };
        let handle = self.release();
        if handle.as_raw() == 0 {
            return;
        }
        if immediately {
            unsafe {
                retirer.destroy_dynamic(T::TYPE, handle.as_raw());
            }
        } else {
            retirer.retire_dynamic(T::TYPE, handle.as_raw());
        }
    }

    /// Give up ownership without destroying the handle, leaving the lifeguard null
    pub fn release(&mut self) -> T {
        std::mem::replace(&mut self.handle, T::from_raw(0))
    }

    pub fn into_raw(mut self) -> T {
        self.retirer = None;
        self.release()
    }
}

impl<T: Destroyable> Default for Lifeguard<T> {
    fn default() -> Self {
        Self::non_owning(T::from_raw(0))
    }
}

impl<T: Destroyable> Drop for Lifeguard<T> {
    fn drop(&mut self) {
        unsafe {
            self.destroy_handle(false);
        }
    }
}

impl<T: Destroyable + fmt::Debug> fmt::Debug for Lifeguard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifeguard")
            .field("handle", &self.handle)
            .field("owning", &self.is_owning())
            .finish()
    }
}
