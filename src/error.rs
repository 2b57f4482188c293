use ash::vk;
use thiserror::Error;

use crate::{AccessMask, DeviceQueue, ResourceKind};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by job declaration, allocation and device queries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("access mask {mask:?} cannot be used on a {kind:?}")]
    InvalidAccess { kind: ResourceKind, mask: AccessMask },
    #[error("access mask {0:?} requires more than one image layout")]
    ConflictingLayouts(AccessMask),
    #[error("access declared over an empty range")]
    EmptyRange,
    #[error("range {offset}+{size} exceeds a view of {limit} bytes")]
    RangeOutOfBounds { offset: u64, size: u64, limit: u64 },
    #[error("local buffer {0} was not allocated by this job")]
    UnknownLocalBuffer(usize),
    #[error("queue {0:?} is not registered")]
    UnknownQueue(DeviceQueue),
    #[error("timestamp {timestamp} precedes previously pushed timestamp {last}")]
    NonMonotonicTimestamp { timestamp: u64, last: u64 },
    #[error("backing region of {region} bytes cannot hold {requested} bytes")]
    RegionTooSmall { requested: u64, region: u64 },
    #[error("device lost")]
    DeviceLost,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("no memory type satisfies {0:?}")]
    NoMemoryType(vk::MemoryPropertyFlags),
    #[error("Vulkan error: {0}")]
    Vk(vk::Result),
}

impl Error {
    /// Whether the caller broke an API contract, as opposed to the device failing
    pub fn is_contract_violation(&self) -> bool {
        use Error::*;
        matches!(
            self,
            InvalidAccess { .. }
                | ConflictingLayouts(_)
                | EmptyRange
                | RangeOutOfBounds { .. }
                | UnknownLocalBuffer(_)
                | UnknownQueue(_)
                | NonMonotonicTimestamp { .. }
                | RegionTooSmall { .. }
        )
    }

    pub fn is_device_failure(&self) -> bool {
        !self.is_contract_violation()
    }
}

impl From<vk::Result> for Error {
    fn from(x: vk::Result) -> Self {
        match x {
            vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Error::OutOfDeviceMemory,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Error::OutOfHostMemory,
            x => Error::Vk(x),
        }
    }
}
