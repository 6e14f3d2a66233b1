//! Thread-safe staged upload buffer with write coalescing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::device::{CommandList, DeviceBuffer, RenderDevice};
use crate::pool::{BufferPool, PooledBuffer};
use crate::sync::{AccessMask, BarrierBatch, BufferBarrier, StageMask};
use crate::types::{BufferUsage, MemoryKind};

use super::{coalesce, ScheduledWrite};

/// Atomically reserve `size` bytes below `limit` in a bump counter.
fn reserve(counter: &AtomicU64, size: u64, limit: u64) -> Option<u64> {
    let mut current = counter.load(Ordering::Relaxed);
    loop {
        let end = current.checked_add(size)?;
        if end > limit {
            return None;
        }
        match counter.compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return Some(current),
            Err(observed) => current = observed,
        }
    }
}

struct SharedBuffers {
    /// Device-local destination. `Some` from construction until drop.
    backing: Option<PooledBuffer>,
    /// Current staging buffer. `None` only while the pool cannot provide one.
    staging: Option<PooledBuffer>,
}

/// Many-writer staged upload buffer.
///
/// Worker threads carve ranges out of the logical destination with
/// [`allocate`](Self::allocate) and fill them with [`write`](Self::write);
/// both are atomic bump reservations plus a queue send, safe from any thread.
/// [`flush`](Self::flush) drains the queue on the render thread, merges
/// writes that are byte-contiguous in both the staging and the target buffer
/// into minimal copy regions, records them with one barrier, and rotates the
/// staging buffer through the pool.
///
/// `flush` must not run concurrently with `write`; an internal lock turns
/// that misuse into plain serialization rather than a data race, but writes
/// landing during a flush may be deferred to the next one.
pub struct ConcurrentWriteBuffer {
    name: String,
    device: Arc<dyn RenderDevice>,
    pool: Arc<BufferPool>,
    capacity: u64,
    backing_usage: BufferUsage,
    /// Bytes reserved in the destination. Reset by `retire_backing_buffer`.
    target_head: AtomicU64,
    /// Bytes reserved in the staging buffer. Reset by `flush`.
    staging_head: AtomicU64,
    sender: Sender<ScheduledWrite>,
    receiver: Receiver<ScheduledWrite>,
    buffers: Mutex<SharedBuffers>,
}

impl ConcurrentWriteBuffer {
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

        let (sender, receiver) = crossbeam_channel::unbounded();
        Some(Self {
            name,
            device,
            pool,
            capacity,
            backing_usage,
            target_head: AtomicU64::new(0),
            staging_head: AtomicU64::new(0),
            sender,
            receiver,
            buffers: Mutex::new(SharedBuffers {
                backing: Some(backing),
                staging: Some(staging),
            }),
        })
    }

    /// Reserve `size` bytes in the destination buffer.
    ///
    /// Returns the target offset of the reserved range, or `None` when the
    /// buffer is exhausted for this frame. Safe to call from any thread.
    pub fn allocate(&self, size: u64) -> Option<u64> {
        match reserve(&self.target_head, size, self.capacity) {
            Some(offset) => Some(offset),
            None => {
                log::error!(
                    "ConcurrentWriteBuffer {:?}: allocation of {} bytes exceeds capacity {}",
                    self.name,
                    size,
                    self.capacity
                );
                None
            }
        }
    }

    /// Schedule `data` to be copied to `target_offset` at the next flush.
    ///
    /// The range must lie inside a previous [`allocate`](Self::allocate)
    /// reservation. Rejected writes (past the allocated range, or past the
    /// staging capacity) are logged and dropped for this frame. Safe to call
    /// from any thread.
    pub fn write(&self, target_offset: u64, data: &[u8]) -> bool {
        let size = data.len() as u64;
        if size == 0 {
            return true;
        }
        let in_bounds = target_offset
            .checked_add(size)
            .is_some_and(|end| end <= self.target_head.load(Ordering::Acquire));
        if !in_bounds {
            log::error!(
                "ConcurrentWriteBuffer {:?}: {} byte write at offset {} outside allocated range, dropped",
                self.name,
                size,
                target_offset
            );
            return false;
        }
        let Some(staging_offset) = reserve(&self.staging_head, size, self.capacity) else {
            log::error!(
                "ConcurrentWriteBuffer {:?}: staging exhausted, {} byte write dropped",
                self.name,
                size
            );
            return false;
        };

        let mapping = {
            let buffers = self.buffers.lock();
            match buffers.staging.as_ref().and_then(|staging| staging.mapping()) {
                Some(mapping) => mapping.clone(),
                None => {
                    log::warn!(
                        "ConcurrentWriteBuffer {:?}: no staging buffer, write dropped",
                        self.name
                    );
                    return false;
                }
            }
        };
        // The reservation above makes this range exclusive to this thread.
        unsafe { mapping.write(staging_offset, data) };

        let scheduled = ScheduledWrite {
            target_offset,
            staging_offset,
            size,
        };
        if self.sender.send(scheduled).is_err() {
            log::error!(
                "ConcurrentWriteBuffer {:?}: write queue closed, write dropped",
                self.name
            );
            return false;
        }
        true
    }

    /// Reserve a range and schedule `data` into it in one call.
    pub fn push(&self, data: &[u8]) -> Option<u64> {
        let offset = self.allocate(data.len() as u64)?;
        self.write(offset, data).then_some(offset)
    }

    /// Schedule one plain-old-data value to be copied to `target_offset`.
    pub fn write_value<T: bytemuck::Pod>(&self, target_offset: u64, value: &T) -> bool {
        self.write(target_offset, bytemuck::bytes_of(value))
    }

    /// Schedule a slice of plain-old-data values to be copied to
    /// `target_offset`.
    pub fn write_slice<T: bytemuck::Pod>(&self, target_offset: u64, values: &[T]) -> bool {
        self.write(target_offset, bytemuck::cast_slice(values))
    }

    /// Drain scheduled writes into coalesced copy regions plus one barrier,
    /// then rotate the staging buffer.
    ///
    /// Call from one thread only, after the frame's writers are done. Does
    /// nothing when no writes are queued.
    pub fn flush(&self, cmd: &mut CommandList, consumer_stage: StageMask) {
        let mut buffers = self.buffers.lock();

        let mut writes = Vec::new();
        while let Ok(write) = self.receiver.try_recv() {
            writes.push(write);
        }
        if writes.is_empty() {
            return;
        }

        let (Some(staging), Some(backing)) = (buffers.staging.as_ref(), buffers.backing.as_ref())
        else {
            log::warn!(
                "ConcurrentWriteBuffer {:?}: flush without buffers, {} writes dropped",
                self.name,
                writes.len()
            );
            self.staging_head.store(0, Ordering::Release);
            return;
        };

        let count = writes.len();
        let regions = coalesce(writes);
        self.device
            .record_copy_buffer(cmd, staging.buffer(), backing.buffer(), &regions);

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
            "ConcurrentWriteBuffer {:?}: flushed {} writes as {} regions",
            self.name,
            count,
            regions.len()
        );

        self.staging_head.store(0, Ordering::Release);
        if let Some(old) = buffers.staging.take() {
            self.pool.release(old);
        }
        buffers.staging = Self::acquire_staging(&self.pool, &self.name, self.capacity);
        if buffers.staging.is_none() {
            log::warn!(
                "ConcurrentWriteBuffer {:?}: staging rotation failed, writes will drop until one is available",
                self.name
            );
        }
    }

    /// Rotate the backing buffer through the pool and reset the destination
    /// reservations.
    ///
    /// Call between frames, after the frame's flushes, when downstream
    /// consumers need a stable device address per frame. On pool failure the
    /// current buffer is kept and only the reservations reset.
    pub fn retire_backing_buffer(&self) {
        let mut buffers = self.buffers.lock();
        match self.pool.get(
            &self.name,
            self.capacity,
            self.backing_usage,
            MemoryKind::GpuOnly,
            false,
        ) {
            Some(fresh) => {
                if let Some(old) = buffers.backing.replace(fresh) {
                    self.pool.release(old);
                }
            }
            None => {
                log::warn!(
                    "ConcurrentWriteBuffer {:?}: backing rotation failed, keeping current buffer",
                    self.name
                );
            }
        }
        self.target_head.store(0, Ordering::Release);
    }

    /// The device-local backing buffer.
    pub fn buffer(&self) -> Option<DeviceBuffer> {
        self.buffers
            .lock()
            .backing
            .as_ref()
            .map(|backing| backing.buffer().clone())
    }

    /// Stable device address of the backing buffer.
    pub fn device_address(&self) -> Option<u64> {
        self.buffer()
            .map(|buffer| self.device.buffer_device_address(&buffer))
    }

    /// Bytes reserved in the destination so far.
    pub fn allocated_bytes(&self) -> u64 {
        self.target_head.load(Ordering::Relaxed)
    }

    /// Writes queued and not yet flushed.
    pub fn pending_writes(&self) -> usize {
        self.receiver.len()
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
        pool.get(
            &staging_name,
            capacity,
            BufferUsage::COPY_SRC,
            MemoryKind::CpuToGpu,
            true,
        )
    }
}

impl Drop for ConcurrentWriteBuffer {
    fn drop(&mut self) {
        let mut buffers = self.buffers.lock();
        if let Some(staging) = buffers.staging.take() {
            self.pool.release(staging);
        }
        if let Some(backing) = buffers.backing.take() {
            self.pool.release(backing);
        }
    }
}

impl std::fmt::Debug for ConcurrentWriteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentWriteBuffer")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("allocated", &self.target_head.load(Ordering::Relaxed))
            .field("pending_writes", &self.receiver.len())
            .finish()
    }
}

// Ensure ConcurrentWriteBuffer is Send + Sync
static_assertions::assert_impl_all!(ConcurrentWriteBuffer: Send, Sync);
