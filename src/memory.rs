//! Backing memory for ring regions

use ash::{vk, Device};
use log::debug;

use crate::auto_ring::BackingAllocator;
use crate::ring_buffer::RegionBuffer;
use crate::{Error, Lifeguard, Result, Retirer};

/// Round `x` up to a multiple of `alignment`, which must be a power of two
pub fn align(x: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    assert!(alignment.is_power_of_two());
    (x + alignment - 1) & (!alignment + 1)
}

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    for i in 0..props.memory_type_count {
        if type_bits & (1 << i) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(flags)
        {
            return Some(i);
        }
    }
    None
}

/// Alignment that lets a view into a buffer with `usage` be bound at any offset handed out
pub fn view_alignment(
    limits: &vk::PhysicalDeviceLimits,
    usage: vk::BufferUsageFlags,
) -> vk::DeviceSize {
    // Copy and fill commands require 4 byte offsets
    let mut alignment = 4;
    if usage.intersects(
        vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
    ) {
        alignment = alignment.max(limits.min_texel_buffer_offset_alignment);
    }
    if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
        alignment = alignment.max(limits.min_uniform_buffer_offset_alignment);
    }
    if usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
        alignment = alignment.max(limits.min_storage_buffer_offset_alignment);
    }
    alignment.next_power_of_two()
}

/// A buffer with its own memory allocation
#[derive(Debug)]
pub struct DedicatedBuffer {
    handle: Lifeguard<vk::Buffer>,
    memory: Lifeguard<vk::DeviceMemory>,
    size: vk::DeviceSize,
    alignment: vk::DeviceSize,
}

impl DedicatedBuffer {
    #[inline]
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory.handle()
    }
}

impl RegionBuffer for DedicatedBuffer {
    #[inline]
    fn handle(&self) -> vk::Buffer {
        self.handle.handle()
    }

    #[inline]
    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    fn alignment(&self) -> vk::DeviceSize {
        self.alignment
    }
}

/// Allocates each ring region as a buffer bound to a dedicated memory allocation
///
/// Released buffers are retired rather than destroyed, so they outlive any work still using them.
#[derive(Clone)]
pub struct DedicatedAllocator {
    device: Device,
    props: vk::PhysicalDeviceMemoryProperties,
    limits: vk::PhysicalDeviceLimits,
    flags: vk::MemoryPropertyFlags,
    retirer: Retirer,
}

impl DedicatedAllocator {
    pub fn new(
        device: &Device,
        props: &vk::PhysicalDeviceMemoryProperties,
        limits: &vk::PhysicalDeviceLimits,
        flags: vk::MemoryPropertyFlags,
        retirer: Retirer,
    ) -> Self {
        Self {
            device: device.clone(),
            props: *props,
            limits: *limits,
            flags,
            retirer,
        }
    }
}

impl BackingAllocator for DedicatedAllocator {
    type Buffer = DedicatedBuffer;

    fn allocate(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<DedicatedBuffer> {
        unsafe {
            let handle = self.device.create_buffer(
                &vk::BufferCreateInfo::default()
                    .size(size)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )?;
            // Nothing can be using the buffer yet
            let mut handle = Lifeguard::new(handle, &self.retirer);
            let reqs = self
                .device
                .get_buffer_memory_requirements(handle.handle());
            let Some(memory_ty) = find_memory_type(&self.props, reqs.memory_type_bits, self.flags)
            else {
                handle.destroy_handle(true);
                return Err(Error::NoMemoryType(self.flags));
            };
            let memory = match self.device.allocate_memory(
                &vk::MemoryAllocateInfo::default()
                    .allocation_size(reqs.size)
                    .memory_type_index(memory_ty)
                    .push_next(
                        &mut vk::MemoryDedicatedAllocateInfo::default().buffer(handle.handle()),
                    ),
                None,
            ) {
                Ok(x) => x,
                Err(e) => {
                    handle.destroy_handle(true);
                    return Err(e.into());
                }
            };
            let mut memory = Lifeguard::new(memory, &self.retirer);
            if let Err(e) = self
                .device
                .bind_buffer_memory(handle.handle(), memory.handle(), 0)
            {
                handle.destroy_handle(true);
                memory.destroy_handle(true);
                return Err(e.into());
            }
            debug!("allocated {} byte region for {:?}", size, usage);
            Ok(DedicatedBuffer {
                handle,
                memory,
                size,
                alignment: view_alignment(&self.limits, usage),
            })
        }
    }

    fn release(&mut self, buffer: DedicatedBuffer) {
        drop(buffer);
    }
}
