//! Staged CPU to GPU write buffers.
//!
//! Both variants pair a host-visible staging buffer with a device-local
//! backing buffer and defer the staging copy to an explicit `flush`:
//!
//! - [`LinearWriteBuffer`]: single writer, bump allocation straight into the
//!   staging mapping. One copy region per flush. The fast path for large
//!   structured uploads such as per-instance transform arrays.
//! - [`ConcurrentWriteBuffer`]: many writer threads reserve ranges with
//!   atomic counters and queue [`ScheduledWrite`]s; flush coalesces adjacent
//!   writes into the minimal set of copy regions.
//!
//! Staging buffers come from a shared [`BufferPool`](crate::pool::BufferPool)
//! and are rotated on every flush, so a new frame never writes into memory an
//! in-flight copy may still be reading.

mod concurrent;
mod linear;

pub use concurrent::ConcurrentWriteBuffer;
pub use linear::LinearWriteBuffer;

use crate::types::BufferCopyRegion;

/// A staged write queued by a writer thread.
///
/// Consumed at flush time, where neighbouring writes contiguous in both the
/// staging buffer and the target buffer collapse into one copy region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledWrite {
    /// Byte offset in the device-local target buffer.
    pub target_offset: u64,
    /// Byte offset in the staging buffer.
    pub staging_offset: u64,
    /// Length of the write in bytes.
    pub size: u64,
}

/// Merge scheduled writes into the minimal set of copy regions.
///
/// Writes are sorted by staging offset first, so the result does not depend
/// on the order writer threads enqueued them. Two neighbours merge only when
/// they are byte-contiguous on both the staging side and the target side.
pub(crate) fn coalesce(mut writes: Vec<ScheduledWrite>) -> Vec<BufferCopyRegion> {
    if writes.is_empty() {
        return Vec::new();
    }
    writes.sort_unstable_by_key(|write| write.staging_offset);

    let mut regions = Vec::new();
    let mut current = BufferCopyRegion::new(
        writes[0].staging_offset,
        writes[0].target_offset,
        writes[0].size,
    );
    for write in &writes[1..] {
        if write.staging_offset == current.src_offset + current.size
            && write.target_offset == current.dst_offset + current.size
        {
            current.size += write.size;
        } else {
            regions.push(current);
            current = BufferCopyRegion::new(write.staging_offset, write.target_offset, write.size);
        }
    }
    regions.push(current);
    regions
}
