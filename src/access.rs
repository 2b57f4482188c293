//! Declarative resource usage and its translation to Vulkan synchronization scopes

use std::ops::{BitOr, BitOrAssign};

use ash::vk;
use bitflags::bitflags;
use smallvec::SmallVec;

use crate::{Error, Result};

bitflags! {
    /// How a pass uses a resource
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct AccessMask: u64 {
        const COMPUTE_STORAGE_READ = 1 << 0;
        const COMPUTE_STORAGE_WRITE = 1 << 1;
        const COMPUTE_STORAGE_ATOMIC = 1 << 2;
        const COMPUTE_SAMPLED_READ = 1 << 3;
        const COMPUTE_UNIFORM_READ = 1 << 4;

        const VERTEX_STORAGE_READ = 1 << 5;
        const VERTEX_STORAGE_WRITE = 1 << 6;
        const VERTEX_STORAGE_ATOMIC = 1 << 7;
        const VERTEX_SAMPLED_READ = 1 << 8;
        const VERTEX_UNIFORM_READ = 1 << 9;

        const FRAGMENT_STORAGE_READ = 1 << 10;
        const FRAGMENT_STORAGE_WRITE = 1 << 11;
        const FRAGMENT_STORAGE_ATOMIC = 1 << 12;
        const FRAGMENT_SAMPLED_READ = 1 << 13;
        const FRAGMENT_UNIFORM_READ = 1 << 14;

        const INDIRECT_READ = 1 << 15;
        const INDEX_READ = 1 << 16;
        const VERTEX_ATTRIBUTE_READ = 1 << 17;

        const TRANSFER_READ = 1 << 18;
        const TRANSFER_WRITE = 1 << 19;

        const COLOR_ATTACHMENT_READ = 1 << 20;
        const COLOR_ATTACHMENT_WRITE = 1 << 21;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 22;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 23;

        const HOST_READ = 1 << 24;
        const HOST_WRITE = 1 << 25;

        /// Handing an image to the presentation engine
        const PRESENT = 1 << 26;
    }
}

impl AccessMask {
    /// Bits that modify the resource
    pub const WRITES: Self = Self::COMPUTE_STORAGE_WRITE
        .union(Self::COMPUTE_STORAGE_ATOMIC)
        .union(Self::VERTEX_STORAGE_WRITE)
        .union(Self::VERTEX_STORAGE_ATOMIC)
        .union(Self::FRAGMENT_STORAGE_WRITE)
        .union(Self::FRAGMENT_STORAGE_ATOMIC)
        .union(Self::TRANSFER_WRITE)
        .union(Self::COLOR_ATTACHMENT_WRITE)
        .union(Self::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .union(Self::HOST_WRITE);

    /// Bits meaningless for images
    pub const BUFFER_ONLY: Self = Self::INDIRECT_READ
        .union(Self::INDEX_READ)
        .union(Self::VERTEX_ATTRIBUTE_READ)
        .union(Self::COMPUTE_UNIFORM_READ)
        .union(Self::VERTEX_UNIFORM_READ)
        .union(Self::FRAGMENT_UNIFORM_READ);

    /// Bits meaningless for buffers
    pub const IMAGE_ONLY: Self = Self::COLOR_ATTACHMENT_READ
        .union(Self::COLOR_ATTACHMENT_WRITE)
        .union(Self::DEPTH_STENCIL_ATTACHMENT_READ)
        .union(Self::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .union(Self::PRESENT);

    #[inline]
    pub fn is_read_only(self) -> bool {
        !self.intersects(Self::WRITES)
    }

    /// Check that this mask describes a meaningful use of a resource of `kind`
    pub fn validate(self, kind: ResourceKind) -> Result<()> {
        let forbidden = match kind {
            ResourceKind::Buffer => Self::IMAGE_ONLY,
            ResourceKind::Image => Self::BUFFER_ONLY,
        };
        if self.is_empty() || self.intersects(forbidden) {
            return Err(Error::InvalidAccess { kind, mask: self });
        }
        if kind == ResourceKind::Image {
            self.image_layout()?;
        }
        Ok(())
    }

    /// Pipeline stages and memory accesses performed
    pub fn to_access(self) -> Access {
        let mut result = Access::NONE;
        for (bit, access) in ACCESS_TABLE {
            if self.contains(*bit) {
                result |= *access;
            }
        }
        result
    }

    /// The single image layout satisfying every bit
    ///
    /// `GENERAL` absorbs shader and transfer layouts; any other combination of distinct layouts is
    /// an error.
    pub fn image_layout(self) -> Result<vk::ImageLayout> {
        let mut layouts = SmallVec::<[vk::ImageLayout; 4]>::new();
        for (bit, layout) in LAYOUT_TABLE {
            if self.intersects(*bit) && !layouts.contains(layout) {
                layouts.push(*layout);
            }
        }
        if self.contains(Self::DEPTH_STENCIL_ATTACHMENT_READ)
            && !self.contains(Self::DEPTH_STENCIL_ATTACHMENT_WRITE)
        {
            layouts.push(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        }
        match *layouts {
            [] => Err(Error::InvalidAccess {
                kind: ResourceKind::Image,
                mask: self,
            }),
            [x] => Ok(x),
            ref xs
                if xs.iter().all(|x| {
                    matches!(
                        *x,
                        vk::ImageLayout::GENERAL
                            | vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                            | vk::ImageLayout::TRANSFER_SRC_OPTIMAL
                            | vk::ImageLayout::TRANSFER_DST_OPTIMAL
                    )
                }) =>
            {
                Ok(vk::ImageLayout::GENERAL)
            }
            _ => Err(Error::ConflictingLayouts(self)),
        }
    }
}

const ACCESS_TABLE: &[(AccessMask, Access)] = &[
    (
        AccessMask::COMPUTE_STORAGE_READ,
        Access::new(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ,
        ),
    ),
    (
        AccessMask::COMPUTE_STORAGE_WRITE,
        Access::new(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
    ),
    (
        AccessMask::COMPUTE_STORAGE_ATOMIC,
        Access::new(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::from_raw(
                vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
                    | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
            ),
        ),
    ),
    (
        AccessMask::COMPUTE_SAMPLED_READ,
        Access::new(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
    ),
    (
        AccessMask::COMPUTE_UNIFORM_READ,
        Access::new(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::UNIFORM_READ,
        ),
    ),
    (
        AccessMask::VERTEX_STORAGE_READ,
        Access::new(
            vk::PipelineStageFlags2::VERTEX_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ,
        ),
    ),
    (
        AccessMask::VERTEX_STORAGE_WRITE,
        Access::new(
            vk::PipelineStageFlags2::VERTEX_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
    ),
    (
        AccessMask::VERTEX_STORAGE_ATOMIC,
        Access::new(
            vk::PipelineStageFlags2::VERTEX_SHADER,
            vk::AccessFlags2::from_raw(
                vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
                    | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
            ),
        ),
    ),
    (
        AccessMask::VERTEX_SAMPLED_READ,
        Access::new(
            vk::PipelineStageFlags2::VERTEX_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
    ),
    (
        AccessMask::VERTEX_UNIFORM_READ,
        Access::new(
            vk::PipelineStageFlags2::VERTEX_SHADER,
            vk::AccessFlags2::UNIFORM_READ,
        ),
    ),
    (
        AccessMask::FRAGMENT_STORAGE_READ,
        Access::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ,
        ),
    ),
    (
        AccessMask::FRAGMENT_STORAGE_WRITE,
        Access::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
    ),
    (
        AccessMask::FRAGMENT_STORAGE_ATOMIC,
        Access::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::from_raw(
                vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
                    | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
            ),
        ),
    ),
    (
        AccessMask::FRAGMENT_SAMPLED_READ,
        Access::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
    ),
    (
        AccessMask::FRAGMENT_UNIFORM_READ,
        Access::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::UNIFORM_READ,
        ),
    ),
    (
        AccessMask::INDIRECT_READ,
        Access::new(
            vk::PipelineStageFlags2::DRAW_INDIRECT,
            vk::AccessFlags2::INDIRECT_COMMAND_READ,
        ),
    ),
    (
        AccessMask::INDEX_READ,
        Access::new(
            vk::PipelineStageFlags2::INDEX_INPUT,
            vk::AccessFlags2::INDEX_READ,
        ),
    ),
    (
        AccessMask::VERTEX_ATTRIBUTE_READ,
        Access::new(
            vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        ),
    ),
    (
        AccessMask::TRANSFER_READ,
        Access::new(
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
    ),
    (
        AccessMask::TRANSFER_WRITE,
        Access::new(
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
    ),
    (
        AccessMask::COLOR_ATTACHMENT_READ,
        Access::new(
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ,
        ),
    ),
    (
        AccessMask::COLOR_ATTACHMENT_WRITE,
        Access::new(
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
    ),
    (
        AccessMask::DEPTH_STENCIL_ATTACHMENT_READ,
        Access::new(
            vk::PipelineStageFlags2::from_raw(
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
            ),
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
    ),
    (
        AccessMask::DEPTH_STENCIL_ATTACHMENT_WRITE,
        Access::new(
            vk::PipelineStageFlags2::from_raw(
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
            ),
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
    ),
    (
        AccessMask::HOST_READ,
        Access::new(vk::PipelineStageFlags2::HOST, vk::AccessFlags2::HOST_READ),
    ),
    (
        AccessMask::HOST_WRITE,
        Access::new(vk::PipelineStageFlags2::HOST, vk::AccessFlags2::HOST_WRITE),
    ),
    (
        AccessMask::PRESENT,
        Access::new(
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::NONE,
        ),
    ),
];

const LAYOUT_TABLE: &[(AccessMask, vk::ImageLayout)] = &[
    (
        AccessMask::COMPUTE_SAMPLED_READ
            .union(AccessMask::VERTEX_SAMPLED_READ)
            .union(AccessMask::FRAGMENT_SAMPLED_READ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    ),
    (
        AccessMask::COMPUTE_STORAGE_READ
            .union(AccessMask::COMPUTE_STORAGE_WRITE)
            .union(AccessMask::COMPUTE_STORAGE_ATOMIC)
            .union(AccessMask::VERTEX_STORAGE_READ)
            .union(AccessMask::VERTEX_STORAGE_WRITE)
            .union(AccessMask::VERTEX_STORAGE_ATOMIC)
            .union(AccessMask::FRAGMENT_STORAGE_READ)
            .union(AccessMask::FRAGMENT_STORAGE_WRITE)
            .union(AccessMask::FRAGMENT_STORAGE_ATOMIC)
            .union(AccessMask::HOST_READ)
            .union(AccessMask::HOST_WRITE),
        vk::ImageLayout::GENERAL,
    ),
    (
        AccessMask::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    ),
    (
        AccessMask::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    ),
    (
        AccessMask::COLOR_ATTACHMENT_READ.union(AccessMask::COLOR_ATTACHMENT_WRITE),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    ),
    (
        AccessMask::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    ),
    (AccessMask::PRESENT, vk::ImageLayout::PRESENT_SRC_KHR),
];

/// Whether an access targets a buffer or an image
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
}

/// A set of pipeline stages and the memory accesses they perform
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Access {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl Access {
    pub const NONE: Self = Self::new(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE);
    /// Execution dependency on nothing in particular, for transitions of unused resources
    pub const TOP_OF_PIPE: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE);
    pub const BOTTOM_OF_PIPE: Self = Self::new(
        vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        vk::AccessFlags2::NONE,
    );

    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.stage.is_empty()
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.access.intersects(WRITE_BITS)
    }

    #[inline]
    pub fn contains(&self, other: &Access) -> bool {
        self.stage.contains(other.stage) && self.access.contains(other.access)
    }

    /// Same stages with no memory access, for execution-only dependencies
    #[inline]
    pub fn execution_only(&self) -> Self {
        Self::new(self.stage, vk::AccessFlags2::NONE)
    }
}

impl BitOr for Access {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self {
            stage: self.stage | rhs.stage,
            access: self.access | rhs.access,
        }
    }
}

impl BitOrAssign for Access {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

const WRITE_BITS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_WRITE.as_raw()
        | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags2::HOST_WRITE.as_raw()
        | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
);

/// A byte range of a buffer
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferRange {
    pub offset: u64,
    pub size: u64,
}

impl BufferRange {
    pub const WHOLE: Self = Self::new(0, u64::MAX);

    pub const fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// One past the last byte, saturating
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.offset <= other.offset && other.end() <= self.end()
    }

    /// Overlapping part, possibly empty
    pub fn intersection(&self, other: &Self) -> Self {
        let offset = self.offset.max(other.offset);
        let end = self.end().min(other.end());
        Self::new(offset, end.saturating_sub(offset))
    }
}

/// A set of subresources of an image: aspects × mip levels × array layers
///
/// Mip levels are a bitmask, limiting tracked images to 32 levels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ImageRange {
    pub aspects: vk::ImageAspectFlags,
    pub mip_mask: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl ImageRange {
    /// Every subresource of an image with `aspects`
    pub const fn whole(aspects: vk::ImageAspectFlags) -> Self {
        Self {
            aspects,
            mip_mask: !0,
            base_layer: 0,
            layer_count: u32::MAX,
        }
    }

    pub fn new(
        aspects: vk::ImageAspectFlags,
        mips: std::ops::Range<u32>,
        layers: std::ops::Range<u32>,
    ) -> Self {
        let mip_mask = mip_range_mask(mips.start, mips.end.saturating_sub(mips.start));
        Self {
            aspects,
            mip_mask,
            base_layer: layers.start,
            layer_count: layers.end.saturating_sub(layers.start),
        }
    }

    pub fn from_subresource(range: &vk::ImageSubresourceRange) -> Self {
        let mip_count = if range.level_count == vk::REMAINING_MIP_LEVELS {
            32u32.saturating_sub(range.base_mip_level)
        } else {
            range.level_count
        };
        Self {
            aspects: range.aspect_mask,
            mip_mask: mip_range_mask(range.base_mip_level, mip_count),
            base_layer: range.base_array_layer,
            layer_count: if range.layer_count == vk::REMAINING_ARRAY_LAYERS {
                u32::MAX - range.base_array_layer
            } else {
                range.layer_count
            },
        }
    }

    #[inline]
    pub fn layer_end(&self) -> u32 {
        self.base_layer.saturating_add(self.layer_count)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty() || self.mip_mask == 0 || self.layer_count == 0
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        !self.intersection(other).is_empty()
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.aspects.contains(other.aspects)
            && self.mip_mask & other.mip_mask == other.mip_mask
            && self.base_layer <= other.base_layer
            && other.layer_end() <= self.layer_end()
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let base_layer = self.base_layer.max(other.base_layer);
        let end = self.layer_end().min(other.layer_end());
        Self {
            aspects: self.aspects & other.aspects,
            mip_mask: self.mip_mask & other.mip_mask,
            base_layer,
            layer_count: end.saturating_sub(base_layer),
        }
    }

    /// Split `self` around `other` into disjoint pieces that together cover `self` minus `other`
    pub fn difference(&self, other: &Self) -> impl Iterator<Item = Self> {
        let middle = self.intersection(other);
        let pieces = if middle.is_empty() {
            [Some(*self), None, None, None]
        } else {
            [
                // Layers before the overlap
                Some(Self {
                    layer_count: middle.base_layer - self.base_layer,
                    ..*self
                }),
                // Layers after the overlap
                Some(Self {
                    base_layer: middle.layer_end(),
                    layer_count: self.layer_end() - middle.layer_end(),
                    ..*self
                }),
                // Overlapping layers, remaining aspects
                Some(Self {
                    aspects: self.aspects & !other.aspects,
                    mip_mask: self.mip_mask,
                    ..middle
                }),
                // Overlapping layers and aspects, remaining mips
                Some(Self {
                    mip_mask: self.mip_mask & !other.mip_mask,
                    ..middle
                }),
            ]
        };
        pieces.into_iter().flatten().filter(|x| !x.is_empty())
    }

    /// Contiguous mip level runs, as `(base, count)`
    pub fn mip_runs(&self) -> impl Iterator<Item = (u32, u32)> {
        let mut mask = self.mip_mask;
        std::iter::from_fn(move || {
            if mask == 0 {
                return None;
            }
            let base = mask.trailing_zeros();
            let count = (mask >> base).trailing_ones();
            mask &= !mip_range_mask(base, count);
            Some((base, count))
        })
    }
}

fn mip_range_mask(base: u32, count: u32) -> u32 {
    if count == 0 || base >= 32 {
        return 0;
    }
    let ones = if count >= 32 { !0 } else { (1u32 << count) - 1 };
    ones << base
}

const GRAPHICS_ORDER: [vk::PipelineStageFlags2; 11] = [
    vk::PipelineStageFlags2::DRAW_INDIRECT,
    vk::PipelineStageFlags2::INDEX_INPUT,
    vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
    vk::PipelineStageFlags2::VERTEX_SHADER,
    vk::PipelineStageFlags2::TESSELLATION_CONTROL_SHADER,
    vk::PipelineStageFlags2::TESSELLATION_EVALUATION_SHADER,
    vk::PipelineStageFlags2::GEOMETRY_SHADER,
    vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
    vk::PipelineStageFlags2::FRAGMENT_SHADER,
    vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
];

const COMPUTE_ORDER: [vk::PipelineStageFlags2; 2] = [
    vk::PipelineStageFlags2::DRAW_INDIRECT,
    vk::PipelineStageFlags2::COMPUTE_SHADER,
];

const ALL_ORDERS: [&[vk::PipelineStageFlags2]; 2] = [&GRAPHICS_ORDER, &COMPUTE_ORDER];

/// Stages implicitly covered by a source scope of `stage`, i.e. `stage` and every logically
/// earlier stage
pub fn extend_source_stages(stage: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
    if stage.is_empty() {
        return stage;
    }
    if stage.intersects(
        vk::PipelineStageFlags2::BOTTOM_OF_PIPE | vk::PipelineStageFlags2::ALL_COMMANDS,
    ) {
        return vk::PipelineStageFlags2::from_raw(!0);
    }
    let mut result = stage | vk::PipelineStageFlags2::TOP_OF_PIPE;
    for order in ALL_ORDERS {
        let mut accum = vk::PipelineStageFlags2::empty();
        for &x in order {
            accum |= x;
            if stage.contains(x) {
                result |= accum;
            }
        }
    }
    result
}

/// Stages implicitly covered by a destination scope of `stage`: `stage` and every logically later
/// stage
pub fn extend_destination_stages(stage: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
    if stage.is_empty() {
        return stage;
    }
    if stage.intersects(
        vk::PipelineStageFlags2::TOP_OF_PIPE | vk::PipelineStageFlags2::ALL_COMMANDS,
    ) {
        return vk::PipelineStageFlags2::from_raw(!0);
    }
    let mut result = stage | vk::PipelineStageFlags2::BOTTOM_OF_PIPE;
    for order in ALL_ORDERS {
        let whole = order
            .iter()
            .fold(vk::PipelineStageFlags2::empty(), |acc, &x| acc | x);
        let mut accum = vk::PipelineStageFlags2::empty();
        for &x in order {
            if stage.contains(x) {
                result |= whole & !accum;
            }
            accum |= x;
        }
    }
    result
}
