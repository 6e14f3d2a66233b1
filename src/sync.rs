//! Resource states and barrier batching.
//!
//! Passes do not place barriers by hand. Each physical resource carries a
//! tracked [`ResourceState`] (last pipeline stage, access mode and layout);
//! when a pass requests a different state, the transition is recorded into a
//! [`BarrierBatch`] and flushed as one batched barrier command before the pass
//! body runs.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::device::{BufferHandle, CommandList, ImageHandle, RenderDevice};
use crate::types::ImageAspect;

bitflags! {
    /// Pipeline stage mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StageMask: u32 {
        /// Start of the pipeline.
        const TOP_OF_PIPE = 1 << 0;
        /// Indirect argument fetch.
        const DRAW_INDIRECT = 1 << 1;
        /// Vertex shader execution.
        const VERTEX_SHADER = 1 << 2;
        /// Fragment shader execution.
        const FRAGMENT_SHADER = 1 << 3;
        /// Depth/stencil tests before fragment shading.
        const EARLY_FRAGMENT_TESTS = 1 << 4;
        /// Depth/stencil tests after fragment shading.
        const LATE_FRAGMENT_TESTS = 1 << 5;
        /// Color attachment writes.
        const COLOR_ATTACHMENT_OUTPUT = 1 << 6;
        /// Compute shader execution.
        const COMPUTE_SHADER = 1 << 7;
        /// Copy and blit operations.
        const TRANSFER = 1 << 8;
        /// End of the pipeline.
        const BOTTOM_OF_PIPE = 1 << 9;
    }
}

impl Default for StageMask {
    fn default() -> Self {
        Self::TOP_OF_PIPE
    }
}

bitflags! {
    /// Memory access mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        /// Shader read (sampled image, uniform or storage read).
        const SHADER_READ = 1 << 0;
        /// Shader storage write.
        const SHADER_WRITE = 1 << 1;
        /// Color attachment write.
        const COLOR_ATTACHMENT_WRITE = 1 << 2;
        /// Depth/stencil attachment read.
        const DEPTH_STENCIL_READ = 1 << 3;
        /// Depth/stencil attachment write.
        const DEPTH_STENCIL_WRITE = 1 << 4;
        /// Transfer source read.
        const TRANSFER_READ = 1 << 5;
        /// Transfer destination write.
        const TRANSFER_WRITE = 1 << 6;
        /// Indirect command argument read.
        const INDIRECT_COMMAND_READ = 1 << 7;
        /// Generic read visibility.
        const MEMORY_READ = 1 << 8;
        /// Generic write availability.
        const MEMORY_WRITE = 1 << 9;
    }
}

impl Default for AccessMask {
    fn default() -> Self {
        Self::empty()
    }
}

/// Image layout states.
///
/// Backend-agnostic rendition of `VkImageLayout`; a concrete device maps these
/// onto its own layout values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Initial state, contents undefined. Can transition to any layout.
    #[default]
    Undefined,
    /// Optimal for color attachment writes.
    ColorAttachment,
    /// Optimal for depth/stencil attachment writes.
    DepthStencilAttachment,
    /// Optimal for depth read-only (sampling + depth testing).
    DepthStencilReadOnly,
    /// Optimal for shader sampling.
    ShaderReadOnly,
    /// Optimal for transfer source operations.
    TransferSrc,
    /// Optimal for transfer destination operations.
    TransferDst,
    /// Optimal for presentation to a swapchain.
    PresentSrc,
    /// General layout (least optimal but most flexible).
    General,
}

/// The last known (stage, access, layout) of a physical resource.
///
/// Two equal states never produce a barrier; see
/// [`BarrierBatch::add_image_barrier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceState {
    /// Pipeline stage that last touched (or will next touch) the resource.
    pub stage: StageMask,
    /// Access mode of that use.
    pub access: AccessMask,
    /// Image layout of that use. Ignored for buffers.
    pub layout: ImageLayout,
}

impl ResourceState {
    /// Undefined sentinel; transient resources are reset to this each frame.
    pub const UNDEFINED: Self = Self {
        stage: StageMask::TOP_OF_PIPE,
        access: AccessMask::empty(),
        layout: ImageLayout::Undefined,
    };

    /// Written as a color attachment.
    pub const COLOR_ATTACHMENT: Self = Self {
        stage: StageMask::COLOR_ATTACHMENT_OUTPUT,
        access: AccessMask::COLOR_ATTACHMENT_WRITE,
        layout: ImageLayout::ColorAttachment,
    };

    /// Written as a depth/stencil attachment.
    pub const DEPTH_ATTACHMENT: Self = Self {
        stage: StageMask::EARLY_FRAGMENT_TESTS.union(StageMask::LATE_FRAGMENT_TESTS),
        access: AccessMask::DEPTH_STENCIL_WRITE,
        layout: ImageLayout::DepthStencilAttachment,
    };

    /// Sampled in a fragment shader.
    pub const SHADER_READ: Self = Self {
        stage: StageMask::FRAGMENT_SHADER,
        access: AccessMask::SHADER_READ,
        layout: ImageLayout::ShaderReadOnly,
    };

    /// Read/written as a storage image from compute.
    pub const STORAGE: Self = Self {
        stage: StageMask::COMPUTE_SHADER,
        access: AccessMask::SHADER_READ.union(AccessMask::SHADER_WRITE),
        layout: ImageLayout::General,
    };

    /// Source of a copy or blit.
    pub const TRANSFER_SRC: Self = Self {
        stage: StageMask::TRANSFER,
        access: AccessMask::TRANSFER_READ,
        layout: ImageLayout::TransferSrc,
    };

    /// Destination of a copy or blit.
    pub const TRANSFER_DST: Self = Self {
        stage: StageMask::TRANSFER,
        access: AccessMask::TRANSFER_WRITE,
        layout: ImageLayout::TransferDst,
    };

    /// Ready for presentation.
    pub const PRESENT: Self = Self {
        stage: StageMask::BOTTOM_OF_PIPE,
        access: AccessMask::empty(),
        layout: ImageLayout::PresentSrc,
    };

    /// Whether this state writes the resource.
    pub fn is_write(&self) -> bool {
        self.access.intersects(
            AccessMask::SHADER_WRITE
                | AccessMask::COLOR_ATTACHMENT_WRITE
                | AccessMask::DEPTH_STENCIL_WRITE
                | AccessMask::TRANSFER_WRITE
                | AccessMask::MEMORY_WRITE,
        )
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/// A single image layout transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBarrier {
    /// The image being transitioned.
    pub image: ImageHandle,
    /// Planes the transition applies to.
    pub aspect: ImageAspect,
    /// State the image is leaving.
    pub old_state: ResourceState,
    /// State the image is entering.
    pub new_state: ResourceState,
}

/// A single buffer memory barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferBarrier {
    /// The buffer whose writes must become visible.
    pub buffer: BufferHandle,
    /// Stage that produced the data.
    pub src_stage: StageMask,
    /// Access mode of the producer.
    pub src_access: AccessMask,
    /// Stage that will consume the data.
    pub dst_stage: StageMask,
    /// Access mode of the consumer.
    pub dst_access: AccessMask,
}

/// A batch of barriers submitted together.
///
/// Barriers are collected for all resources a pass touches, then recorded as a
/// single barrier command. Adding the same image twice keeps only the latest
/// transition; same-state transitions are skipped entirely.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    image_barriers: HashMap<ImageHandle, ImageBarrier>,
    buffer_barriers: Vec<BufferBarrier>,
    /// Source pipeline stage mask (union of all barriers).
    src_stage_mask: StageMask,
    /// Destination pipeline stage mask (union of all barriers).
    dst_stage_mask: StageMask,
}

impl BarrierBatch {
    /// Create a new empty barrier batch.
    pub fn new() -> Self {
        Self {
            image_barriers: HashMap::new(),
            buffer_barriers: Vec::new(),
            src_stage_mask: StageMask::empty(),
            dst_stage_mask: StageMask::empty(),
        }
    }

    /// Add an image state transition.
    ///
    /// Transitions where `old_state == new_state` are skipped; a second
    /// transition for the same image replaces the first.
    pub fn add_image_barrier(
        &mut self,
        image: ImageHandle,
        aspect: ImageAspect,
        old_state: ResourceState,
        new_state: ResourceState,
    ) {
        if old_state == new_state {
            return;
        }

        self.src_stage_mask |= old_state.stage;
        self.dst_stage_mask |= new_state.stage;
        self.image_barriers.insert(
            image,
            ImageBarrier {
                image,
                aspect,
                old_state,
                new_state,
            },
        );
    }

    /// Add a buffer memory barrier.
    pub fn add_buffer_barrier(&mut self, barrier: BufferBarrier) {
        self.src_stage_mask |= barrier.src_stage;
        self.dst_stage_mask |= barrier.dst_stage;
        self.buffer_barriers.push(barrier);
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.buffer_barriers.is_empty()
    }

    /// Number of barriers in the batch.
    pub fn len(&self) -> usize {
        self.image_barriers.len() + self.buffer_barriers.len()
    }

    /// Image barriers collected so far.
    pub fn image_barriers(&self) -> impl Iterator<Item = &ImageBarrier> {
        self.image_barriers.values()
    }

    /// Buffer barriers collected so far.
    pub fn buffer_barriers(&self) -> &[BufferBarrier] {
        &self.buffer_barriers
    }

    /// Source stage mask of the batched command.
    pub fn src_stage_mask(&self) -> StageMask {
        self.src_stage_mask
    }

    /// Destination stage mask of the batched command.
    pub fn dst_stage_mask(&self) -> StageMask {
        self.dst_stage_mask
    }

    /// Record the batch as a single barrier command.
    ///
    /// Does nothing if the batch is empty.
    pub fn submit(&self, device: &dyn RenderDevice, cmd: &mut CommandList) {
        if self.is_empty() {
            return;
        }
        device.record_barrier(cmd, self);
    }

    /// Clear all barriers from the batch.
    pub fn clear(&mut self) {
        self.image_barriers.clear();
        self.buffer_barriers.clear();
        self.src_stage_mask = StageMask::empty();
        self.dst_stage_mask = StageMask::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: u64) -> ImageHandle {
        ImageHandle(id)
    }

    #[test]
    fn test_barrier_batch_empty() {
        let batch = BarrierBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn test_barrier_batch_skip_same_state() {
        let mut batch = BarrierBatch::new();
        batch.add_image_barrier(
            image(1),
            ImageAspect::COLOR,
            ResourceState::COLOR_ATTACHMENT,
            ResourceState::COLOR_ATTACHMENT,
        );
        assert!(batch.is_empty());
    }

    #[test]
    fn test_barrier_batch_adds_transition() {
        let mut batch = BarrierBatch::new();
        batch.add_image_barrier(
            image(1),
            ImageAspect::COLOR,
            ResourceState::UNDEFINED,
            ResourceState::COLOR_ATTACHMENT,
        );

        assert!(!batch.is_empty());
        assert_eq!(batch.len(), 1);
        assert!(batch.src_stage_mask().contains(StageMask::TOP_OF_PIPE));
        assert!(batch
            .dst_stage_mask()
            .contains(StageMask::COLOR_ATTACHMENT_OUTPUT));
    }

    #[test]
    fn test_barrier_batch_dedups_same_image() {
        let mut batch = BarrierBatch::new();
        batch.add_image_barrier(
            image(7),
            ImageAspect::COLOR,
            ResourceState::UNDEFINED,
            ResourceState::COLOR_ATTACHMENT,
        );
        batch.add_image_barrier(
            image(7),
            ImageAspect::COLOR,
            ResourceState::COLOR_ATTACHMENT,
            ResourceState::SHADER_READ,
        );

        assert_eq!(batch.len(), 1);
        let barrier = batch.image_barriers().next().unwrap();
        assert_eq!(barrier.new_state, ResourceState::SHADER_READ);
    }

    #[test]
    fn test_barrier_batch_unions_stage_masks() {
        let mut batch = BarrierBatch::new();
        batch.add_image_barrier(
            image(1),
            ImageAspect::COLOR,
            ResourceState::COLOR_ATTACHMENT,
            ResourceState::SHADER_READ,
        );
        batch.add_image_barrier(
            image(2),
            ImageAspect::DEPTH,
            ResourceState::UNDEFINED,
            ResourceState::DEPTH_ATTACHMENT,
        );

        assert_eq!(batch.len(), 2);
        assert!(batch
            .src_stage_mask()
            .contains(StageMask::COLOR_ATTACHMENT_OUTPUT | StageMask::TOP_OF_PIPE));
        assert!(batch
            .dst_stage_mask()
            .contains(StageMask::FRAGMENT_SHADER | StageMask::EARLY_FRAGMENT_TESTS));
    }

    #[test]
    fn test_resource_state_write_classification() {
        assert!(ResourceState::COLOR_ATTACHMENT.is_write());
        assert!(ResourceState::DEPTH_ATTACHMENT.is_write());
        assert!(ResourceState::STORAGE.is_write());
        assert!(ResourceState::TRANSFER_DST.is_write());
        assert!(!ResourceState::SHADER_READ.is_write());
        assert!(!ResourceState::TRANSFER_SRC.is_write());
        assert!(!ResourceState::UNDEFINED.is_write());
    }

    #[test]
    fn test_buffer_barrier_unions() {
        let mut batch = BarrierBatch::new();
        batch.add_buffer_barrier(BufferBarrier {
            buffer: BufferHandle(3),
            src_stage: StageMask::TRANSFER,
            src_access: AccessMask::TRANSFER_WRITE,
            dst_stage: StageMask::DRAW_INDIRECT,
            dst_access: AccessMask::INDIRECT_COMMAND_READ,
        });

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.src_stage_mask(), StageMask::TRANSFER);
        assert_eq!(batch.dst_stage_mask(), StageMask::DRAW_INDIRECT);
    }
}
