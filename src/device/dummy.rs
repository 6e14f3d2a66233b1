//! Software device for testing and development.
//!
//! Unlike a no-op stub, this device keeps real bookkeeping: every buffer is
//! backed by host memory, handles are validated, and submitted copy commands
//! are executed against that memory. Tests can therefore check actual byte
//! movement instead of only call sequences.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{DeviceError, DeviceResult};
use crate::sync::BarrierBatch;
use crate::types::{BufferCopyRegion, BufferDescriptor, Extent2d, ImageDescriptor};

use super::{
    BufferHandle, ColorAttachmentInfo, CommandList, DepthAttachmentInfo, DescriptorLayoutHandle,
    DescriptorSetHandle, DeviceBuffer, HostMapping, ImageHandle, ImageViewHandle, RecordedCommand,
    RenderDevice,
};

/// Synthetic base for [`RenderDevice::buffer_device_address`] values.
const ADDRESS_BASE: u64 = 0x0001_0000_0000;
/// Spacing between synthetic buffer addresses.
const ADDRESS_STRIDE: u64 = 0x0010_0000;

struct BufferRecord {
    size: u64,
    /// Host memory standing in for the allocation, regardless of memory kind.
    storage: HostMapping,
}

struct ImageRecord {
    view_count: usize,
}

#[derive(Default)]
struct DeviceState {
    next_id: u64,
    buffers: HashMap<u64, BufferRecord>,
    images: HashMap<u64, ImageRecord>,
    /// View id to parent image id.
    views: HashMap<u64, u64>,
    /// Set id to layout id.
    descriptor_sets: HashMap<u64, u64>,
    buffers_created: u64,
    buffers_destroyed: u64,
    images_created: u64,
    images_destroyed: u64,
    submit_count: u64,
    last_submitted: Option<CommandList>,
}

impl DeviceState {
    fn mint_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Software [`RenderDevice`].
pub struct DummyDevice {
    state: Mutex<DeviceState>,
}

impl DummyDevice {
    /// Create a new software device.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Number of live images.
    pub fn image_count(&self) -> usize {
        self.state.lock().images.len()
    }

    /// Number of live descriptor sets.
    pub fn descriptor_set_count(&self) -> usize {
        self.state.lock().descriptor_sets.len()
    }

    /// Total buffers created over the device lifetime.
    pub fn buffers_created(&self) -> u64 {
        self.state.lock().buffers_created
    }

    /// Total buffers destroyed over the device lifetime.
    pub fn buffers_destroyed(&self) -> u64 {
        self.state.lock().buffers_destroyed
    }

    /// Total images created over the device lifetime.
    pub fn images_created(&self) -> u64 {
        self.state.lock().images_created
    }

    /// Total images destroyed over the device lifetime.
    pub fn images_destroyed(&self) -> u64 {
        self.state.lock().images_destroyed
    }

    /// Number of submitted command lists.
    pub fn submit_count(&self) -> u64 {
        self.state.lock().submit_count
    }

    /// Copy of the most recently submitted command list.
    pub fn last_submitted(&self) -> Option<CommandList> {
        self.state.lock().last_submitted.clone()
    }

    fn execute(state: &mut DeviceState, command: &RecordedCommand) -> DeviceResult<()> {
        match command {
            RecordedCommand::CopyBuffer { src, dst, regions } => {
                let src_record = state
                    .buffers
                    .get(&src.0)
                    .ok_or_else(|| DeviceError::InvalidParameter("Unknown source buffer".into()))?;
                let dst_record = state.buffers.get(&dst.0).ok_or_else(|| {
                    DeviceError::InvalidParameter("Unknown destination buffer".into())
                })?;
                let src_storage = src_record.storage.clone();
                let dst_storage = dst_record.storage.clone();
                let (src_size, dst_size) = (src_record.size, dst_record.size);

                for region in regions {
                    let in_bounds = region
                        .src_offset
                        .checked_add(region.size)
                        .is_some_and(|end| end <= src_size)
                        && region
                            .dst_offset
                            .checked_add(region.size)
                            .is_some_and(|end| end <= dst_size);
                    if !in_bounds {
                        log::error!(
                            "DummyDevice: copy region out of bounds ({:?}), skipped",
                            region
                        );
                        continue;
                    }
                    // The state lock is held, no other access can overlap.
                    unsafe {
                        let bytes = src_storage.read(region.src_offset, region.size);
                        dst_storage.write(region.dst_offset, &bytes);
                    }
                }
                Ok(())
            }
            // Synchronization and rendering brackets have no observable effect
            // on host memory.
            RecordedCommand::Barrier { .. }
            | RecordedCommand::BeginRendering { .. }
            | RecordedCommand::EndRendering => Ok(()),
        }
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy Device"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> DeviceResult<DeviceBuffer> {
        if descriptor.size == 0 {
            return Err(DeviceError::InvalidParameter(
                "Buffer size must be non-zero".into(),
            ));
        }
        if descriptor.mapped && !descriptor.memory.is_host_visible() {
            return Err(DeviceError::InvalidParameter(
                "Mapped buffers require host-visible memory".into(),
            ));
        }

        let storage = HostMapping::new(descriptor.size);
        let mapping = descriptor.mapped.then(|| storage.clone());

        let mut state = self.state.lock();
        let id = state.mint_id();
        state.buffers.insert(
            id,
            BufferRecord {
                size: descriptor.size,
                storage,
            },
        );
        state.buffers_created += 1;

        log::trace!(
            "DummyDevice: created buffer {} {:?} (size: {}, memory: {:?})",
            id,
            descriptor.label,
            descriptor.size,
            descriptor.memory
        );
        Ok(DeviceBuffer {
            handle: BufferHandle(id),
            size: descriptor.size,
            mapping,
        })
    }

    fn destroy_buffer(&self, buffer: DeviceBuffer) {
        let mut state = self.state.lock();
        if state.buffers.remove(&buffer.handle.0).is_some() {
            state.buffers_destroyed += 1;
            log::trace!("DummyDevice: destroyed buffer {}", buffer.handle.0);
        } else {
            log::warn!(
                "DummyDevice: destroy of unknown buffer {}, ignored",
                buffer.handle.0
            );
        }
    }

    fn buffer_device_address(&self, buffer: &DeviceBuffer) -> u64 {
        ADDRESS_BASE + buffer.handle.0 * ADDRESS_STRIDE
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> DeviceResult<ImageHandle> {
        if descriptor.size.is_empty() {
            return Err(DeviceError::InvalidParameter(
                "Image extent must be non-zero".into(),
            ));
        }

        let mut state = self.state.lock();
        let id = state.mint_id();
        state.images.insert(id, ImageRecord { view_count: 0 });
        state.images_created += 1;

        log::trace!(
            "DummyDevice: created image {} {:?} ({}x{}, {:?})",
            id,
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.format
        );
        Ok(ImageHandle(id))
    }

    fn destroy_image(&self, image: ImageHandle) {
        let mut state = self.state.lock();
        match state.images.remove(&image.0) {
            Some(record) => {
                state.images_destroyed += 1;
                if record.view_count > 0 {
                    log::warn!(
                        "DummyDevice: image {} destroyed with {} live views",
                        image.0,
                        record.view_count
                    );
                }
                log::trace!("DummyDevice: destroyed image {}", image.0);
            }
            None => {
                log::warn!("DummyDevice: destroy of unknown image {}, ignored", image.0);
            }
        }
    }

    fn create_image_view(&self, image: ImageHandle) -> DeviceResult<ImageViewHandle> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&image.0) {
            return Err(DeviceError::InvalidParameter(
                "View requested on unknown image".into(),
            ));
        }

        let id = state.mint_id();
        state.views.insert(id, image.0);
        if let Some(record) = state.images.get_mut(&image.0) {
            record.view_count += 1;
        }
        log::trace!("DummyDevice: created view {} on image {}", id, image.0);
        Ok(ImageViewHandle(id))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        let mut state = self.state.lock();
        match state.views.remove(&view.0) {
            Some(image_id) => {
                if let Some(record) = state.images.get_mut(&image_id) {
                    record.view_count -= 1;
                }
                log::trace!("DummyDevice: destroyed view {}", view.0);
            }
            None => {
                log::warn!("DummyDevice: destroy of unknown view {}, ignored", view.0);
            }
        }
    }

    fn create_descriptor_set(
        &self,
        layout: DescriptorLayoutHandle,
    ) -> DeviceResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        let id = state.mint_id();
        state.descriptor_sets.insert(id, layout.0);
        log::trace!(
            "DummyDevice: allocated descriptor set {} (layout {})",
            id,
            layout.0
        );
        Ok(DescriptorSetHandle(id))
    }

    fn destroy_descriptor_set(&self, set: DescriptorSetHandle) {
        let mut state = self.state.lock();
        if state.descriptor_sets.remove(&set.0).is_some() {
            log::trace!("DummyDevice: freed descriptor set {}", set.0);
        } else {
            log::warn!(
                "DummyDevice: free of unknown descriptor set {}, ignored",
                set.0
            );
        }
    }

    fn record_copy_buffer(
        &self,
        cmd: &mut CommandList,
        src: &DeviceBuffer,
        dst: &DeviceBuffer,
        regions: &[BufferCopyRegion],
    ) {
        log::trace!(
            "DummyDevice: record copy {} -> {} ({} regions)",
            src.handle.0,
            dst.handle.0,
            regions.len()
        );
        cmd.push(RecordedCommand::CopyBuffer {
            src: src.handle,
            dst: dst.handle,
            regions: regions.to_vec(),
        });
    }

    fn record_barrier(&self, cmd: &mut CommandList, batch: &BarrierBatch) {
        log::trace!("DummyDevice: record barrier ({} entries)", batch.len());
        cmd.push(RecordedCommand::Barrier {
            src_stage: batch.src_stage_mask(),
            dst_stage: batch.dst_stage_mask(),
            images: batch.image_barriers().cloned().collect(),
            buffers: batch.buffer_barriers().to_vec(),
        });
    }

    fn record_begin_rendering(
        &self,
        cmd: &mut CommandList,
        colors: &[ColorAttachmentInfo],
        depth: Option<&DepthAttachmentInfo>,
        extent: Extent2d,
    ) {
        log::trace!(
            "DummyDevice: record begin rendering ({} colors, depth: {}, {}x{})",
            colors.len(),
            depth.is_some(),
            extent.width,
            extent.height
        );
        cmd.push(RecordedCommand::BeginRendering {
            colors: colors.to_vec(),
            depth: depth.cloned(),
            extent,
        });
    }

    fn record_end_rendering(&self, cmd: &mut CommandList) {
        cmd.push(RecordedCommand::EndRendering);
    }

    fn submit(&self, cmd: CommandList) -> DeviceResult<()> {
        let mut state = self.state.lock();
        log::trace!("DummyDevice: submitting {} commands", cmd.len());

        for command in cmd.commands() {
            Self::execute(&mut state, command)?;
        }

        state.submit_count += 1;
        state.last_submitted = Some(cmd);
        Ok(())
    }

    fn read_buffer(&self, buffer: &DeviceBuffer, offset: u64, size: u64) -> Vec<u8> {
        let state = self.state.lock();
        match state.buffers.get(&buffer.handle.0) {
            Some(record)
                if offset
                    .checked_add(size)
                    .is_some_and(|end| end <= record.size) =>
            {
                // The state lock is held, no writer can overlap.
                unsafe { record.storage.read(offset, size) }
            }
            Some(record) => {
                log::warn!(
                    "DummyDevice: read past end of buffer {} ({} + {} > {})",
                    buffer.handle.0,
                    offset,
                    size,
                    record.size
                );
                vec![0u8; size as usize]
            }
            None => {
                log::warn!("DummyDevice: read from unknown buffer {}", buffer.handle.0);
                vec![0u8; size as usize]
            }
        }
    }
}

// Ensure DummyDevice is Send + Sync
static_assertions::assert_impl_all!(DummyDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, ImageFormat, ImageUsage, MemoryKind};

    fn mapped_descriptor(size: u64) -> BufferDescriptor {
        BufferDescriptor::new(size, BufferUsage::COPY_SRC)
            .with_memory(MemoryKind::CpuToGpu)
            .with_mapping()
    }

    #[test]
    fn test_create_destroy_buffer() {
        let device = DummyDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(256, BufferUsage::STORAGE))
            .unwrap();

        assert_eq!(buffer.size, 256);
        assert!(buffer.mapping.is_none());
        assert_eq!(device.buffer_count(), 1);

        device.destroy_buffer(buffer);
        assert_eq!(device.buffer_count(), 0);
        assert_eq!(device.buffers_destroyed(), 1);
    }

    #[test]
    fn test_zero_size_buffer_rejected() {
        let device = DummyDevice::new();
        let result = device.create_buffer(&BufferDescriptor::new(0, BufferUsage::VERTEX));
        assert!(matches!(result, Err(DeviceError::InvalidParameter(_))));
    }

    #[test]
    fn test_mapping_requires_host_visible_memory() {
        let device = DummyDevice::new();
        let descriptor = BufferDescriptor::new(64, BufferUsage::COPY_SRC).with_mapping();
        assert!(device.create_buffer(&descriptor).is_err());

        let buffer = device.create_buffer(&mapped_descriptor(64)).unwrap();
        assert!(buffer.mapping.is_some());
    }

    #[test]
    fn test_submitted_copy_moves_bytes() {
        let device = DummyDevice::new();
        let src = device.create_buffer(&mapped_descriptor(64)).unwrap();
        let dst = device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::COPY_DST))
            .unwrap();

        let mapping = src.mapping.clone().unwrap();
        unsafe {
            mapping.write(8, &[10, 20, 30, 40]);
        }

        let mut cmd = CommandList::new();
        device.record_copy_buffer(&mut cmd, &src, &dst, &[BufferCopyRegion::new(8, 16, 4)]);
        device.submit(cmd).unwrap();

        assert_eq!(device.read_buffer(&dst, 16, 4), vec![10, 20, 30, 40]);
        assert_eq!(device.submit_count(), 1);
    }

    #[test]
    fn test_out_of_bounds_copy_region_skipped() {
        let device = DummyDevice::new();
        let src = device.create_buffer(&mapped_descriptor(16)).unwrap();
        let dst = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::COPY_DST))
            .unwrap();

        let mut cmd = CommandList::new();
        device.record_copy_buffer(&mut cmd, &src, &dst, &[BufferCopyRegion::new(8, 0, 16)]);
        device.submit(cmd).unwrap();

        assert_eq!(device.read_buffer(&dst, 0, 16), vec![0u8; 16]);
    }

    #[test]
    fn test_copy_region_near_u64_max_skipped() {
        let device = DummyDevice::new();
        let src = device.create_buffer(&mapped_descriptor(16)).unwrap();
        let dst = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::COPY_DST))
            .unwrap();

        // src_offset + size wraps around u64; the region must be dropped, not copied.
        let mut cmd = CommandList::new();
        let regions = [BufferCopyRegion::new(u64::MAX - 4, 0, 8)];
        device.record_copy_buffer(&mut cmd, &src, &dst, &regions);
        device.submit(cmd).unwrap();

        assert_eq!(device.read_buffer(&dst, 0, 16), vec![0u8; 16]);
        assert_eq!(device.read_buffer(&dst, u64::MAX - 4, 8), vec![0u8; 8]);
    }

    #[test]
    fn test_copy_from_destroyed_buffer_fails_submit() {
        let device = DummyDevice::new();
        let src = device.create_buffer(&mapped_descriptor(16)).unwrap();
        let dst = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::COPY_DST))
            .unwrap();

        let mut cmd = CommandList::new();
        device.record_copy_buffer(&mut cmd, &src, &dst, &[BufferCopyRegion::new(0, 0, 16)]);
        device.destroy_buffer(src);

        assert!(device.submit(cmd).is_err());
    }

    #[test]
    fn test_image_and_view_lifecycle() {
        let device = DummyDevice::new();
        let image = device
            .create_image(&ImageDescriptor::new_2d(
                16,
                16,
                ImageFormat::Rgba8Unorm,
                ImageUsage::RENDER_ATTACHMENT,
            ))
            .unwrap();
        let view = device.create_image_view(image).unwrap();

        assert_eq!(device.image_count(), 1);
        device.destroy_image_view(view);
        device.destroy_image(image);
        assert_eq!(device.image_count(), 0);

        assert!(device.create_image_view(image).is_err());
    }

    #[test]
    fn test_device_addresses_are_distinct_and_stable() {
        let device = DummyDevice::new();
        let a = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE))
            .unwrap();
        let b = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE))
            .unwrap();

        let addr_a = device.buffer_device_address(&a);
        assert_ne!(addr_a, device.buffer_device_address(&b));
        assert_eq!(addr_a, device.buffer_device_address(&a));
    }

    #[test]
    fn test_descriptor_set_lifecycle() {
        let device = DummyDevice::new();
        let layout = DescriptorLayoutHandle::new(42);
        let set = device.create_descriptor_set(layout).unwrap();

        assert_eq!(device.descriptor_set_count(), 1);
        device.destroy_descriptor_set(set);
        assert_eq!(device.descriptor_set_count(), 0);
    }
}
