//! Buffer types and descriptors.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

bitflags! {
    /// Usage flags for buffers.
    ///
    /// Pool reuse requires an exact flag match, so callers should request the
    /// same combination for buffers they intend to recycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be used as a storage buffer.
        const STORAGE = 1 << 3;
        /// Buffer can be used as an indirect argument buffer.
        const INDIRECT = 1 << 4;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 5;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 6;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Memory residency of a buffer allocation.
///
/// The vocabulary follows the usual allocator split: device-only memory for
/// GPU consumption, upload memory the CPU writes and the GPU reads, and
/// readback memory the GPU writes and the CPU reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryKind {
    /// Device-local memory, not CPU-visible.
    #[default]
    GpuOnly,
    /// Host-visible upload memory (CPU write, GPU read).
    CpuToGpu,
    /// Host-visible readback memory (GPU write, CPU read).
    GpuToCpu,
}

impl MemoryKind {
    /// Whether this kind of memory can carry a persistent host mapping.
    pub fn is_host_visible(self) -> bool {
        matches!(self, Self::CpuToGpu | Self::GpuToCpu)
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Memory residency.
    pub memory: MemoryKind,
    /// Request a persistent host mapping at creation. Only valid for
    /// host-visible memory kinds.
    pub mapped: bool,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor for device-local memory.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            memory: MemoryKind::GpuOnly,
            mapped: false,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the memory residency kind.
    pub fn with_memory(mut self, memory: MemoryKind) -> Self {
        self.memory = memory;
        self
    }

    /// Request a persistent host mapping.
    pub fn with_mapping(mut self) -> Self {
        self.mapped = true;
        self
    }
}

/// A region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCopyRegion {
    /// Offset into the source buffer.
    pub src_offset: u64,
    /// Offset into the destination buffer.
    pub dst_offset: u64,
    /// Number of bytes to copy.
    pub size: u64,
}

impl BufferCopyRegion {
    /// Create a new copy region.
    pub fn new(src_offset: u64, dst_offset: u64, size: u64) -> Self {
        Self {
            src_offset,
            dst_offset,
            size,
        }
    }
}

// ============================================================================
// Indirect Drawing Arguments
// ============================================================================

/// Arguments for a non-indexed indirect draw call.
///
/// Matches the GPU layout for `vkCmdDrawIndirect` / `wgpu::DrawIndirect`:
/// 16 bytes, 4-byte aligned. The buffer containing these arguments must have
/// [`BufferUsage::INDIRECT`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    /// Number of vertices to draw.
    pub vertex_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// Index of the first vertex to draw.
    pub first_vertex: u32,
    /// Instance ID of the first instance to draw.
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Create new indirect draw arguments.
    pub fn new(vertex_count: u32, instance_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        }
    }

    /// Set the first vertex index.
    pub fn with_first_vertex(mut self, first_vertex: u32) -> Self {
        self.first_vertex = first_vertex;
        self
    }

    /// Set the first instance index.
    pub fn with_first_instance(mut self, first_instance: u32) -> Self {
        self.first_instance = first_instance;
        self
    }

    /// Bytes for uploading to a buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Arguments for an indexed indirect draw call.
///
/// Matches the GPU layout for `vkCmdDrawIndexedIndirect` /
/// `wgpu::DrawIndexedIndirect`: 20 bytes, 4-byte aligned.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Number of indices to draw.
    pub index_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// Index of the first index to draw.
    pub first_index: u32,
    /// Value added to each index before reading from the vertex buffer.
    pub base_vertex: i32,
    /// Instance ID of the first instance to draw.
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Create new indexed indirect draw arguments.
    pub fn new(index_count: u32, instance_count: u32) -> Self {
        Self {
            index_count,
            instance_count,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        }
    }

    /// Set the first index.
    pub fn with_first_index(mut self, first_index: u32) -> Self {
        self.first_index = first_index;
        self
    }

    /// Set the base vertex offset.
    pub fn with_base_vertex(mut self, base_vertex: i32) -> Self {
        self.base_vertex = base_vertex;
        self
    }

    /// Bytes for uploading to a buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_descriptor_builder() {
        let desc = BufferDescriptor::new(4096, BufferUsage::STORAGE | BufferUsage::COPY_DST)
            .with_label("instance_transforms")
            .with_memory(MemoryKind::CpuToGpu)
            .with_mapping();

        assert_eq!(desc.size, 4096);
        assert!(desc.usage.contains(BufferUsage::STORAGE));
        assert_eq!(desc.label.as_deref(), Some("instance_transforms"));
        assert_eq!(desc.memory, MemoryKind::CpuToGpu);
        assert!(desc.mapped);
    }

    #[test]
    fn test_memory_kind_visibility() {
        assert!(!MemoryKind::GpuOnly.is_host_visible());
        assert!(MemoryKind::CpuToGpu.is_host_visible());
        assert!(MemoryKind::GpuToCpu.is_host_visible());
    }

    #[test]
    fn test_indirect_args_layout() {
        assert_eq!(DrawIndirectArgs::SIZE, 16);
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);

        let args = DrawIndirectArgs::new(36, 100).with_first_instance(4);
        let bytes = args.as_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &36u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &4u32.to_ne_bytes());
    }
}
