//! GPU device abstraction layer.
//!
//! This module provides a trait-based abstraction over the device operations
//! the frame system needs: resource creation and destruction, command
//! recording and submission.
//!
//! # Architecture
//!
//! [`RenderDevice`] is deliberately narrow. Pools, staging buffers and the
//! render graph record work into a [`CommandList`] through it and never talk
//! to a GPU API directly, so the whole crate runs unchanged against the
//! software [`DummyDevice`](dummy::DummyDevice) in tests.
//!
//! Resources are identified by opaque integer handles. Buffers additionally
//! travel as [`DeviceBuffer`] values carrying their size and, for
//! host-visible memory, a [`HostMapping`].

pub mod dummy;

pub use dummy::DummyDevice;

use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::error::DeviceResult;
use crate::sync::{BarrierBatch, BufferBarrier, ImageBarrier, StageMask};
use crate::types::{BufferCopyRegion, BufferDescriptor, ClearValue, Extent2d, ImageDescriptor};

// ============================================================================
// Handles
// ============================================================================

/// Opaque handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Opaque handle to a device image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(pub(crate) u64);

/// Opaque handle to an image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageViewHandle(pub(crate) u64);

/// Opaque handle to an allocated descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetHandle(pub(crate) u64);

/// Opaque handle to a descriptor set layout.
///
/// Layouts are owned by whoever builds pipelines; this crate only keys
/// descriptor set caching on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorLayoutHandle(pub(crate) u64);

impl BufferHandle {
    /// Raw numeric id, for logging and diagnostics.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl ImageHandle {
    /// Raw numeric id, for logging and diagnostics.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl ImageViewHandle {
    /// Raw numeric id, for logging and diagnostics.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl DescriptorSetHandle {
    /// Raw numeric id, for logging and diagnostics.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl DescriptorLayoutHandle {
    /// Wrap an externally owned layout id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric id, for logging and diagnostics.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

// ============================================================================
// Buffers and host mappings
// ============================================================================

/// Host-visible memory backing a mapped buffer.
///
/// Cloning is shallow; every clone addresses the same allocation. Writes go
/// through raw pointers so that several threads can fill disjoint ranges of a
/// staging buffer without a lock, matching how persistently mapped GPU memory
/// behaves.
#[derive(Clone)]
pub struct HostMapping {
    /// Base of the allocation, captured once at creation so reads and writes
    /// never materialize a reference to the whole buffer.
    base: *mut u8,
    len: usize,
    /// Keeps the allocation alive; accessed only at creation.
    _alloc: Arc<UnsafeCell<Box<[u8]>>>,
}

// Interior mutability is raw-pointer based; the disjoint-range contract on
// `write` is what makes concurrent use sound.
unsafe impl Send for HostMapping {}
unsafe impl Sync for HostMapping {}

impl HostMapping {
    pub(crate) fn new(size: u64) -> Self {
        let alloc = Arc::new(UnsafeCell::new(vec![0u8; size as usize].into_boxed_slice()));
        // The only reference ever taken; nothing else can alias yet.
        let base = unsafe { (&mut *alloc.get()).as_mut_ptr() };
        Self {
            base,
            len: size as usize,
            _alloc: alloc,
        }
    }

    /// Size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is zero-sized.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw pointer to the start of the mapping.
    ///
    /// Writing through it carries the same disjoint-range contract as
    /// [`write`](Self::write).
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Copy `data` into the mapping at `offset`.
    ///
    /// # Safety
    ///
    /// `offset + data.len()` must not exceed [`len`](Self::len), and no other
    /// thread may concurrently read or write an overlapping range.
    pub unsafe fn write(&self, offset: u64, data: &[u8]) {
        let offset = offset as usize;
        debug_assert!(data.len() <= self.len && offset <= self.len - data.len());
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(offset), data.len());
    }

    /// Copy `size` bytes out of the mapping at `offset`.
    ///
    /// # Safety
    ///
    /// `offset + size` must not exceed [`len`](Self::len), and no other
    /// thread may concurrently write an overlapping range.
    pub unsafe fn read(&self, offset: u64, size: u64) -> Vec<u8> {
        let offset = offset as usize;
        let size = size as usize;
        debug_assert!(size <= self.len && offset <= self.len - size);
        std::slice::from_raw_parts(self.base.add(offset), size).to_vec()
    }
}

impl std::fmt::Debug for HostMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMapping")
            .field("len", &self.len())
            .finish()
    }
}

/// A device buffer together with its creation-time properties.
///
/// Returned by [`RenderDevice::create_buffer`] and consumed back by
/// [`RenderDevice::destroy_buffer`]. `mapping` is `Some` only when the
/// descriptor requested a persistent mapping on host-visible memory.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    /// Handle identifying the buffer on the device.
    pub handle: BufferHandle,
    /// Allocated size in bytes.
    pub size: u64,
    /// Persistent CPU mapping, if one was requested.
    pub mapping: Option<HostMapping>,
}

// ============================================================================
// Command recording
// ============================================================================

/// Color attachment of a rendering bracket.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachmentInfo {
    /// View to render into.
    pub view: ImageViewHandle,
    /// Clear performed on load, or [`ClearValue::None`] to preserve contents.
    pub clear: ClearValue,
}

/// Depth attachment of a rendering bracket.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthAttachmentInfo {
    /// View to test and write depth into.
    pub view: ImageViewHandle,
    /// Clear performed on load, or [`ClearValue::None`] to preserve contents.
    pub clear: ClearValue,
}

/// A single recorded device command.
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    /// Copy regions between two buffers.
    CopyBuffer {
        /// Source buffer.
        src: BufferHandle,
        /// Destination buffer.
        dst: BufferHandle,
        /// Regions to copy.
        regions: Vec<BufferCopyRegion>,
    },
    /// Batched pipeline barrier.
    Barrier {
        /// Union of source stages across all barriers.
        src_stage: StageMask,
        /// Union of destination stages across all barriers.
        dst_stage: StageMask,
        /// Image layout transitions.
        images: Vec<ImageBarrier>,
        /// Buffer memory barriers.
        buffers: Vec<BufferBarrier>,
    },
    /// Begin dynamic rendering with the given attachments.
    BeginRendering {
        /// Color attachments, in location order.
        colors: Vec<ColorAttachmentInfo>,
        /// Optional depth attachment.
        depth: Option<DepthAttachmentInfo>,
        /// Render area.
        extent: Extent2d,
    },
    /// End the current rendering bracket.
    EndRendering,
}

/// An ordered list of recorded commands awaiting submission.
///
/// Recording only appends; nothing executes until the list is passed to
/// [`RenderDevice::submit`].
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    commands: Vec<RecordedCommand>,
}

impl CommandList {
    /// Create an empty command list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command.
    pub fn push(&mut self, command: RecordedCommand) {
        self.commands.push(command);
    }

    /// Commands recorded so far, in submission order.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// ============================================================================
// Device trait
// ============================================================================

/// Device operations the frame system is built on.
///
/// Creation returns fresh resources, destruction consumes them, `record_*`
/// methods append to a [`CommandList`] and [`submit`](Self::submit) hands a
/// finished list to the device queue.
pub trait RenderDevice: Send + Sync + 'static {
    /// Get the device name.
    fn name(&self) -> &'static str;

    /// Create a buffer resource.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> DeviceResult<DeviceBuffer>;

    /// Destroy a buffer resource.
    fn destroy_buffer(&self, buffer: DeviceBuffer);

    /// Stable device address of a buffer, for bindless access from shaders.
    fn buffer_device_address(&self, buffer: &DeviceBuffer) -> u64;

    /// Create an image resource.
    fn create_image(&self, descriptor: &ImageDescriptor) -> DeviceResult<ImageHandle>;

    /// Destroy an image resource.
    fn destroy_image(&self, image: ImageHandle);

    /// Create a full-resource view over an image.
    fn create_image_view(&self, image: ImageHandle) -> DeviceResult<ImageViewHandle>;

    /// Destroy an image view.
    fn destroy_image_view(&self, view: ImageViewHandle);

    /// Allocate a descriptor set against an externally owned layout.
    fn create_descriptor_set(
        &self,
        layout: DescriptorLayoutHandle,
    ) -> DeviceResult<DescriptorSetHandle>;

    /// Free a descriptor set.
    fn destroy_descriptor_set(&self, set: DescriptorSetHandle);

    /// Record a buffer-to-buffer copy of `regions`.
    fn record_copy_buffer(
        &self,
        cmd: &mut CommandList,
        src: &DeviceBuffer,
        dst: &DeviceBuffer,
        regions: &[BufferCopyRegion],
    );

    /// Record a batched pipeline barrier.
    fn record_barrier(&self, cmd: &mut CommandList, batch: &BarrierBatch);

    /// Record the start of a dynamic rendering bracket.
    fn record_begin_rendering(
        &self,
        cmd: &mut CommandList,
        colors: &[ColorAttachmentInfo],
        depth: Option<&DepthAttachmentInfo>,
        extent: Extent2d,
    );

    /// Record the end of the current rendering bracket.
    fn record_end_rendering(&self, cmd: &mut CommandList);

    /// Submit a finished command list to the device queue.
    fn submit(&self, cmd: CommandList) -> DeviceResult<()>;

    /// Read data back from a buffer.
    ///
    /// Blocks until the device is idle. Intended for readbacks and tests, not
    /// the frame loop.
    fn read_buffer(&self, buffer: &DeviceBuffer, offset: u64, size: u64) -> Vec<u8>;
}

// Ensure HostMapping is Send + Sync
static_assertions::assert_impl_all!(HostMapping: Send, Sync);
