//! Single-writer staged upload buffer.

use std::sync::Arc;

use crate::device::{CommandList, DeviceBuffer, RenderDevice};
use crate::pool::{BufferPool, PooledBuffer};
use crate::sync::{AccessMask, BarrierBatch, BufferBarrier, StageMask};
use crate::types::{BufferCopyRegion, BufferUsage, MemoryKind};

/// Single-writer bump allocator over a staged upload pair.
///
/// Writes land directly in the staging mapping at the current head; `flush`
/// records exactly one copy region covering everything written since the
/// previous flush, one barrier towards the consumer stage, and rotates the
/// staging buffer through the pool. Successive flushes append to the backing
/// buffer, so its device address stays stable for the whole frame;
/// [`retire_backing_buffer`](Self::retire_backing_buffer) rotates the backing
/// buffer between frames.
///
/// Not thread-safe; one owner writes, commits and flushes.
///
/// # Example
///
/// ```
/// # use std::sync::Arc;
/// # use render_frame::device::{dummy::DummyDevice, CommandList, RenderDevice};
/// # use render_frame::frame::FrameClock;
/// # use render_frame::pool::BufferPool;
/// # use render_frame::staging::LinearWriteBuffer;
/// # use render_frame::sync::StageMask;
/// # use render_frame::types::BufferUsage;
/// let device: Arc<dyn RenderDevice> = Arc::new(DummyDevice::new());
/// let clock = Arc::new(FrameClock::new(2));
/// let pool = Arc::new(BufferPool::new(device.clone(), clock));
///
/// let mut uploads =
///     LinearWriteBuffer::new("instances", device, pool, 4096, BufferUsage::STORAGE).unwrap();
/// uploads.write(&[1u8, 2, 3, 4]);
///
/// let mut cmd = CommandList::new();
/// uploads.flush(&mut cmd, StageMask::VERTEX_SHADER);
/// assert_eq!(cmd.len(), 2);
/// ```
pub struct LinearWriteBuffer {
    name: String,
    device: Arc<dyn RenderDevice>,
    pool: Arc<BufferPool>,
    capacity: u64,
    backing_usage: BufferUsage,
    /// Device-local destination. `Some` from construction until drop.
    backing: Option<PooledBuffer>,
    /// Current staging buffer. `None` only while the pool cannot provide one.
    staging: Option<PooledBuffer>,
    /// Bytes staged since the last flush.
    head: u64,
    /// Where in the backing buffer the next flush lands.
    backing_offset: u64,
}

impl LinearWriteBuffer {
    /// Create a staged upload pair of `capacity` bytes.
    ///
    /// The backing buffer is created with `usage` plus `COPY_DST`. Returns
    /// `None` when the pool cannot provide either buffer; treat it as a
    /// transient failure and retry next frame.
    pub fn new(
        name: impl Into<String>,
        device: Arc<dyn RenderDevice>,
        pool: Arc<BufferPool>,
        capacity: u64,
        usage: BufferUsage,
    ) -> Option<Self> {
        let name = name.into();
        let backing_usage = usage | BufferUsage::COPY_DST;

        let backing = pool.get(
            &name,
            capacity,
            backing_usage,
            MemoryKind::GpuOnly,
            false,
        )?;
        let staging = match Self::acquire_staging(&pool, &name, capacity) {
            Some(staging) => staging,
            None => {
                pool.release(backing);
                return None;
            }
        };

        Some(Self {
            name,
            device,
            pool,
            capacity,
            backing_usage,
            backing: Some(backing),
            staging: Some(staging),
            head: 0,
            backing_offset: 0,
        })
    }

    /// Raw pointer into the staging region at the current head.
    ///
    /// The caller may fill up to [`remaining`](Self::remaining) bytes and must
    /// follow with [`commit_writes`](Self::commit_writes). Returns `None`
    /// while no staging buffer is available.
    pub fn write_ptr(&mut self) -> Option<*mut u8> {
        self.ensure_staging();
        let staging = self.staging.as_ref()?;
        let mapping = staging.mapping()?;
        // Head stays within capacity, commit_writes enforces it.
        Some(unsafe { mapping.as_ptr().add(self.head as usize) })
    }

    /// Advance the head past `size` bytes written through
    /// [`write_ptr`](Self::write_ptr).
    ///
    /// A commit past the staging capacity is rejected and logged; nothing is
    /// advanced.
    pub fn commit_writes(&mut self, size: u64) {
        let fits = self
            .head
            .checked_add(size)
            .is_some_and(|end| end <= self.capacity);
        if !fits {
            log::error!(
                "LinearWriteBuffer {:?}: commit of {} bytes past capacity ({} of {} used), dropped",
                self.name,
                size,
                self.head,
                self.capacity
            );
            return;
        }
        self.head += size;
    }

    /// Copy `data` to the staging buffer at the current head.
    ///
    /// Convenience wrapper over [`write_ptr`](Self::write_ptr) plus
    /// [`commit_writes`](Self::commit_writes). Returns `false` when the write
    /// does not fit or no staging buffer is available; the write is dropped
    /// for this frame.
    pub fn write(&mut self, data: &[u8]) -> bool {
        let fits = self
            .head
            .checked_add(data.len() as u64)
            .is_some_and(|end| end <= self.capacity);
        if !fits {
            log::error!(
                "LinearWriteBuffer {:?}: write of {} bytes past capacity ({} of {} used), dropped",
                self.name,
                data.len(),
                self.head,
                self.capacity
            );
            return false;
        }
        self.ensure_staging();
        let Some(staging) = self.staging.as_ref() else {
            return false;
        };
        let Some(mapping) = staging.mapping() else {
            return false;
        };

        // In-bounds by the capacity check; single writer by contract.
        unsafe { mapping.write(self.head, data) };
        self.head += data.len() as u64;
        true
    }

    /// Write one plain-old-data value at the current head.
    pub fn write_value<T: bytemuck::Pod>(&mut self, value: &T) -> bool {
        self.write(bytemuck::bytes_of(value))
    }

    /// Write a slice of plain-old-data values at the current head.
    pub fn write_slice<T: bytemuck::Pod>(&mut self, values: &[T]) -> bool {
        self.write(bytemuck::cast_slice(values))
    }

    /// Record the staged bytes as one copy plus one barrier, then rotate the
    /// staging buffer.
    ///
    /// The copy covers everything written since the previous flush and lands
    /// after any earlier flush in the backing buffer. The barrier makes the
    /// transfer visible to `consumer_stage`. Does nothing when nothing was
    /// written.
    pub fn flush(&mut self, cmd: &mut CommandList, consumer_stage: StageMask) {
        if self.head == 0 {
            return;
        }
        let (Some(staging), Some(backing)) = (self.staging.as_ref(), self.backing.as_ref()) else {
            log::warn!(
                "LinearWriteBuffer {:?}: flush without buffers, {} staged bytes dropped",
                self.name,
                self.head
            );
            self.head = 0;
            return;
        };
        let fits = self
            .backing_offset
            .checked_add(self.head)
            .is_some_and(|end| end <= backing.size());
        if !fits {
            log::error!(
                "LinearWriteBuffer {:?}: flush of {} bytes past backing buffer end ({} of {}), dropped",
                self.name,
                self.head,
                self.backing_offset,
                backing.size()
            );
            self.head = 0;
            return;
        }

        let region = BufferCopyRegion::new(0, self.backing_offset, self.head);
        self.device
            .record_copy_buffer(cmd, staging.buffer(), backing.buffer(), &[region]);

        let mut batch = BarrierBatch::new();
        batch.add_buffer_barrier(BufferBarrier {
            buffer: backing.handle(),
            src_stage: StageMask::TRANSFER,
            src_access: AccessMask::TRANSFER_WRITE,
            dst_stage: consumer_stage,
            dst_access: AccessMask::MEMORY_READ,
        });
        batch.submit(self.device.as_ref(), cmd);

        log::trace!(
            "LinearWriteBuffer {:?}: flushed {} bytes at offset {}",
            self.name,
            self.head,
            self.backing_offset
        );
        self.backing_offset += self.head;
        self.head = 0;
        self.rotate_staging();
    }

    /// Rotate the backing buffer through the pool and restart at offset zero.
    ///
    /// Call between frames, after the frame's flushes, when downstream
    /// consumers need a stable device address per frame. The old buffer is
    /// released and a fresh one acquired; on pool failure the current buffer
    /// is kept and only the offset restarts.
    pub fn retire_backing_buffer(&mut self) {
        match self.pool.get(
            &self.name,
            self.capacity,
            self.backing_usage,
            MemoryKind::GpuOnly,
            false,
        ) {
            Some(fresh) => {
                if let Some(old) = self.backing.replace(fresh) {
                    self.pool.release(old);
                }
            }
            None => {
                log::warn!(
                    "LinearWriteBuffer {:?}: backing rotation failed, keeping current buffer",
                    self.name
                );
            }
        }
        self.backing_offset = 0;
    }

    /// The device-local backing buffer.
    pub fn buffer(&self) -> Option<&DeviceBuffer> {
        self.backing.as_ref().map(|backing| backing.buffer())
    }

    /// Stable device address of the backing buffer.
    pub fn device_address(&self) -> Option<u64> {
        self.buffer()
            .map(|buffer| self.device.buffer_device_address(buffer))
    }

    /// Bytes staged since the last flush.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Staging bytes still available before the next flush.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.head
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Debug name of the upload pair.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn acquire_staging(pool: &BufferPool, name: &str, capacity: u64) -> Option<PooledBuffer> {
        let staging_name = format!("{}.staging", name);
        let staging = pool.get(
            &staging_name,
            capacity,
            BufferUsage::COPY_SRC,
            MemoryKind::CpuToGpu,
            true,
        )?;
        debug_assert!(staging.is_mapped());
        Some(staging)
    }

    /// Reacquire a staging buffer after a failed rotation.
    fn ensure_staging(&mut self) {
        if self.staging.is_none() {
            self.staging = Self::acquire_staging(&self.pool, &self.name, self.capacity);
        }
    }

    fn rotate_staging(&mut self) {
        if let Some(old) = self.staging.take() {
            self.pool.release(old);
        }
        self.staging = Self::acquire_staging(&self.pool, &self.name, self.capacity);
        if self.staging.is_none() {
            log::warn!(
                "LinearWriteBuffer {:?}: staging rotation failed, writes will drop until one is available",
                self.name
            );
        }
    }
}

impl Drop for LinearWriteBuffer {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take() {
            self.pool.release(staging);
        }
        if let Some(backing) = self.backing.take() {
            self.pool.release(backing);
        }
    }
}

impl std::fmt::Debug for LinearWriteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearWriteBuffer")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("backing_offset", &self.backing_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;
    use crate::device::RecordedCommand;
    use crate::frame::FrameClock;

    fn setup() -> (Arc<DummyDevice>, Arc<BufferPool>, LinearWriteBuffer) {
        let device = Arc::new(DummyDevice::new());
        let clock = Arc::new(FrameClock::new(2));
        let pool = Arc::new(BufferPool::new(device.clone(), clock));
        let writer = LinearWriteBuffer::new(
            "uploads",
            device.clone(),
            pool.clone(),
            64,
            BufferUsage::STORAGE,
        )
        .unwrap();
        (device, pool, writer)
    }

    #[test]
    fn test_write_flush_round_trip() {
        let (device, _pool, mut writer) = setup();

        assert!(writer.write(&[1, 2, 3, 4]));
        assert!(writer.write(&[5, 6]));
        assert_eq!(writer.head(), 6);

        let mut cmd = CommandList::new();
        writer.flush(&mut cmd, StageMask::VERTEX_SHADER);
        assert_eq!(writer.head(), 0);

        match &cmd.commands()[0] {
            RecordedCommand::CopyBuffer { regions, .. } => {
                assert_eq!(regions, &[BufferCopyRegion::new(0, 0, 6)]);
            }
            other => panic!("expected copy, got {:?}", other),
        }
        assert!(matches!(cmd.commands()[1], RecordedCommand::Barrier { .. }));

        device.submit(cmd).unwrap();
        let backing = writer.buffer().unwrap();
        assert_eq!(device.read_buffer(backing, 0, 6), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_second_flush_appends_to_backing() {
        let (device, _pool, mut writer) = setup();
        let mut cmd = CommandList::new();

        writer.write(&[10, 11, 12, 13]);
        writer.flush(&mut cmd, StageMask::COMPUTE_SHADER);
        writer.write(&[20, 21, 22, 23]);
        writer.flush(&mut cmd, StageMask::COMPUTE_SHADER);

        device.submit(cmd).unwrap();
        let backing = writer.buffer().unwrap();
        assert_eq!(
            device.read_buffer(backing, 0, 8),
            vec![10, 11, 12, 13, 20, 21, 22, 23]
        );
    }

    #[test]
    fn test_flush_rotates_staging_through_pool() {
        let (device, pool, mut writer) = setup();

        let created_before = device.buffers_created();
        writer.write(&[1]);
        let mut cmd = CommandList::new();
        writer.flush(&mut cmd, StageMask::VERTEX_SHADER);

        // Old staging went back to the pool, a fresh one was created.
        assert_eq!(pool.pending_count(), 1);
        assert_eq!(device.buffers_created(), created_before + 1);
    }

    #[test]
    fn test_empty_flush_records_nothing() {
        let (_device, _pool, mut writer) = setup();
        let mut cmd = CommandList::new();
        writer.flush(&mut cmd, StageMask::VERTEX_SHADER);
        assert!(cmd.is_empty());
    }

    #[test]
    fn test_write_past_capacity_rejected() {
        let (_device, _pool, mut writer) = setup();

        assert!(writer.write(&[0u8; 60]));
        assert!(!writer.write(&[0u8; 8]));
        assert_eq!(writer.head(), 60);
        assert_eq!(writer.remaining(), 4);
    }

    #[test]
    fn test_commit_past_capacity_rejected() {
        let (_device, _pool, mut writer) = setup();

        writer.commit_writes(64);
        assert_eq!(writer.head(), 64);
        writer.commit_writes(1);
        assert_eq!(writer.head(), 64);
    }

    #[test]
    fn test_commit_size_near_u64_max_rejected() {
        let (_device, _pool, mut writer) = setup();

        // head + size wraps around u64; the capacity check must still reject it.
        writer.commit_writes(8);
        writer.commit_writes(u64::MAX);
        assert_eq!(writer.head(), 8);
        assert_eq!(writer.remaining(), 56);
    }

    #[test]
    fn test_write_ptr_commit_round_trip() {
        let (device, _pool, mut writer) = setup();

        let ptr = writer.write_ptr().unwrap();
        unsafe {
            std::ptr::copy_nonoverlapping([7u8, 8, 9].as_ptr(), ptr, 3);
        }
        writer.commit_writes(3);
        assert_eq!(writer.head(), 3);

        let mut cmd = CommandList::new();
        writer.flush(&mut cmd, StageMask::VERTEX_SHADER);
        device.submit(cmd).unwrap();

        let backing = writer.buffer().unwrap();
        assert_eq!(device.read_buffer(backing, 0, 3), vec![7, 8, 9]);
    }

    #[test]
    fn test_retire_backing_restarts_at_zero() {
        let (device, _pool, mut writer) = setup();
        let mut cmd = CommandList::new();

        writer.write(&[1, 2, 3, 4]);
        writer.flush(&mut cmd, StageMask::VERTEX_SHADER);
        let old_address = writer.device_address().unwrap();

        writer.retire_backing_buffer();
        let new_address = writer.device_address().unwrap();
        assert_ne!(old_address, new_address);

        writer.write(&[9, 9]);
        writer.flush(&mut cmd, StageMask::VERTEX_SHADER);
        device.submit(cmd).unwrap();

        // The second flush starts at offset zero of the fresh buffer.
        let backing = writer.buffer().unwrap();
        assert_eq!(device.read_buffer(backing, 0, 2), vec![9, 9]);
    }

    #[test]
    fn test_write_value_pod() {
        let (device, _pool, mut writer) = setup();

        let args = crate::types::DrawIndirectArgs::new(3, 1);
        assert!(writer.write_value(&args));
        assert_eq!(writer.head(), crate::types::DrawIndirectArgs::SIZE);

        let mut cmd = CommandList::new();
        writer.flush(&mut cmd, StageMask::DRAW_INDIRECT);
        device.submit(cmd).unwrap();

        let backing = writer.buffer().unwrap();
        let bytes = device.read_buffer(backing, 0, 4);
        assert_eq!(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 3);
    }

    #[test]
    fn test_write_slice_pod() {
        let (device, _pool, mut writer) = setup();

        assert!(writer.write_slice(&[0x11223344u32, 0x55667788]));
        assert_eq!(writer.head(), 8);

        let mut cmd = CommandList::new();
        writer.flush(&mut cmd, StageMask::COMPUTE_SHADER);
        device.submit(cmd).unwrap();

        let backing = writer.buffer().unwrap();
        let bytes = device.read_buffer(backing, 0, 8);
        assert_eq!(
            u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            0x11223344
        );
        assert_eq!(
            u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            0x55667788
        );
    }

    #[test]
    fn test_drop_returns_buffers_to_pool() {
        let (_device, pool, writer) = setup();
        assert_eq!(pool.pending_count(), 0);
        drop(writer);
        assert_eq!(pool.pending_count(), 2);
    }
}
