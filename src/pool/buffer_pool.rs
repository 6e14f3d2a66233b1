//! Best-fit buffer pool with frame-delayed reuse.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{BufferHandle, DeviceBuffer, HostMapping, RenderDevice};
use crate::frame::FrameClock;
use crate::types::{BufferDescriptor, BufferUsage, MemoryKind};

/// A device buffer handed out by [`BufferPool::get`].
///
/// The holder owns it exclusively between `get` and `release`. It is not
/// cloneable, so a buffer cannot be released twice.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: DeviceBuffer,
    usage: BufferUsage,
    memory: MemoryKind,
    name: String,
}

impl PooledBuffer {
    /// The underlying device buffer.
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    /// Device handle of the buffer.
    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle
    }

    /// Allocated size in bytes. May exceed what was requested.
    pub fn size(&self) -> u64 {
        self.buffer.size
    }

    /// Usage flags the buffer was created with.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Memory residency kind.
    pub fn memory(&self) -> MemoryKind {
        self.memory
    }

    /// Debug name of the most recent `get`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persistent CPU mapping, if the buffer is host-mapped.
    pub fn mapping(&self) -> Option<&HostMapping> {
        self.buffer.mapping.as_ref()
    }

    /// Whether the buffer is host-mapped.
    pub fn is_mapped(&self) -> bool {
        self.buffer.mapping.is_some()
    }
}

/// A released buffer waiting out the frame delay.
#[derive(Debug)]
struct ReleaseRecord {
    resource: PooledBuffer,
    released_at: u64,
}

/// Aggregated per-name statistics reported by the stats visitors.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats<'a> {
    /// Debug name the resources were requested under.
    pub name: &'a str,
    /// Total bytes across the group.
    pub bytes: u64,
    /// Number of resources in the group.
    pub count: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct StatsEntry {
    bytes: u64,
    count: u32,
}

/// Tuning knobs for [`BufferPool`].
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Released bytes allowed to accumulate before garbage collection starts
    /// destroying the oldest eligible records.
    pub released_budget_bytes: u64,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            released_budget_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Default)]
struct PoolInner {
    released: Vec<ReleaseRecord>,
    released_bytes: u64,
    /// In-use resources grouped by the name they were requested under.
    allocated: HashMap<String, StatsEntry>,
}

/// Best-fit pool of device buffers with frame-delayed reuse.
///
/// `get` first scans released records whose frame delay has elapsed for the
/// smallest buffer satisfying the request (size, exact usage, memory kind,
/// mapping), and only allocates from the device when none qualifies. `release`
/// stamps the buffer with the current frame and never touches the device.
///
/// One lock guards the free list and the stats map; every pool sharing a
/// [`FrameClock`] agrees on reuse eligibility.
pub struct BufferPool {
    device: Arc<dyn RenderDevice>,
    clock: Arc<FrameClock>,
    config: BufferPoolConfig,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// Create a pool with the default budget.
    pub fn new(device: Arc<dyn RenderDevice>, clock: Arc<FrameClock>) -> Self {
        Self::with_config(device, clock, BufferPoolConfig::default())
    }

    /// Create a pool with an explicit configuration.
    pub fn with_config(
        device: Arc<dyn RenderDevice>,
        clock: Arc<FrameClock>,
        config: BufferPoolConfig,
    ) -> Self {
        Self {
            device,
            clock,
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Get a buffer of at least `min_size` bytes.
    ///
    /// Reuses the smallest eligible released buffer whose usage flags match
    /// exactly, whose memory kind matches, and which is host-mapped if
    /// `mappable` asks for it. Falls back to creating a new buffer named
    /// `name`. Returns `None` when device allocation fails; callers should
    /// skip the dependent work for this frame.
    pub fn get(
        &self,
        name: &str,
        min_size: u64,
        usage: BufferUsage,
        memory: MemoryKind,
        mappable: bool,
    ) -> Option<PooledBuffer> {
        let mut inner = self.inner.lock();

        let resource = match self.take_best_fit(&mut inner, min_size, usage, memory, mappable) {
            Some(mut reused) => {
                log::trace!(
                    "BufferPool: reusing {} byte buffer {} as {:?}",
                    reused.size(),
                    reused.buffer.handle.raw(),
                    name
                );
                reused.name = name.to_string();
                reused
            }
            None => {
                let mut descriptor = BufferDescriptor::new(min_size, usage)
                    .with_label(name)
                    .with_memory(memory);
                if mappable {
                    descriptor = descriptor.with_mapping();
                }
                match self.device.create_buffer(&descriptor) {
                    Ok(buffer) => PooledBuffer {
                        buffer,
                        usage,
                        memory,
                        name: name.to_string(),
                    },
                    Err(err) => {
                        log::warn!("BufferPool: allocation of {:?} failed: {}", name, err);
                        self.collect_garbage(&mut inner);
                        return None;
                    }
                }
            }
        };

        let entry = inner.allocated.entry(resource.name.clone()).or_default();
        entry.bytes += resource.size();
        entry.count += 1;

        self.collect_garbage(&mut inner);
        Some(resource)
    }

    /// Return a buffer to the pool.
    ///
    /// The buffer becomes reusable once `frames_in_flight` frame boundaries
    /// have passed. Nothing is destroyed here.
    pub fn release(&self, resource: PooledBuffer) {
        let mut inner = self.inner.lock();

        let emptied = match inner.allocated.get_mut(&resource.name) {
            Some(entry) => {
                entry.bytes = entry.bytes.saturating_sub(resource.size());
                entry.count = entry.count.saturating_sub(1);
                entry.count == 0
            }
            None => false,
        };
        if emptied {
            inner.allocated.remove(&resource.name);
        }

        log::trace!(
            "BufferPool: released {} byte buffer {} ({:?})",
            resource.size(),
            resource.buffer.handle.raw(),
            resource.name
        );
        inner.released_bytes += resource.size();
        inner.released.push(ReleaseRecord {
            resource,
            released_at: self.clock.current_frame(),
        });
    }

    /// Total bytes of released buffers waiting out the frame delay.
    pub fn pending_bytes(&self) -> u64 {
        self.inner.lock().released_bytes
    }

    /// Number of released buffers waiting out the frame delay.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().released.len()
    }

    /// Total bytes currently handed out to callers.
    pub fn allocated_bytes(&self) -> u64 {
        self.inner
            .lock()
            .allocated
            .values()
            .map(|entry| entry.bytes)
            .sum()
    }

    /// Visit per-name statistics of buffers currently handed out.
    ///
    /// The pool lock is held while the visitor runs.
    pub fn collect_allocated_stats(&self, mut visitor: impl FnMut(PoolStats<'_>)) {
        let inner = self.inner.lock();
        for (name, entry) in &inner.allocated {
            visitor(PoolStats {
                name,
                bytes: entry.bytes,
                count: entry.count,
            });
        }
    }

    /// Visit per-name statistics of released buffers held by the pool.
    ///
    /// The pool lock is held while the visitor runs.
    pub fn collect_cached_stats(&self, mut visitor: impl FnMut(PoolStats<'_>)) {
        let inner = self.inner.lock();
        let mut grouped: HashMap<&str, StatsEntry> = HashMap::new();
        for record in &inner.released {
            let entry = grouped.entry(record.resource.name.as_str()).or_default();
            entry.bytes += record.resource.size();
            entry.count += 1;
        }
        for (name, entry) in grouped {
            visitor(PoolStats {
                name,
                bytes: entry.bytes,
                count: entry.count,
            });
        }
    }

    /// Remove the best-fitting eligible record, smallest qualifying size first.
    fn take_best_fit(
        &self,
        inner: &mut PoolInner,
        min_size: u64,
        usage: BufferUsage,
        memory: MemoryKind,
        mappable: bool,
    ) -> Option<PooledBuffer> {
        let mut best: Option<(usize, u64)> = None;
        for (index, record) in inner.released.iter().enumerate() {
            if !self.clock.is_reuse_safe(record.released_at) {
                continue;
            }
            let resource = &record.resource;
            if resource.size() < min_size
                || resource.usage != usage
                || resource.memory != memory
                || (mappable && !resource.is_mapped())
            {
                continue;
            }
            match best {
                Some((_, best_size)) if best_size <= resource.size() => {}
                _ => best = Some((index, resource.size())),
            }
        }

        let (index, size) = best?;
        inner.released_bytes -= size;
        Some(inner.released.remove(index).resource)
    }

    /// Destroy the oldest eligible released records while over budget.
    fn collect_garbage(&self, inner: &mut PoolInner) {
        while inner.released_bytes > self.config.released_budget_bytes {
            let oldest = inner
                .released
                .iter()
                .enumerate()
                .filter(|(_, record)| self.clock.is_reuse_safe(record.released_at))
                .min_by_key(|(_, record)| record.released_at)
                .map(|(index, _)| index);

            let Some(index) = oldest else {
                break;
            };

            let record = inner.released.remove(index);
            inner.released_bytes -= record.resource.size();
            log::debug!(
                "BufferPool: over budget, destroying {} byte buffer {} ({:?})",
                record.resource.size(),
                record.resource.buffer.handle.raw(),
                record.resource.name
            );
            self.device.destroy_buffer(record.resource.buffer);
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        let count = inner.released.len();
        for record in inner.released.drain(..) {
            self.device.destroy_buffer(record.resource.buffer);
        }
        inner.released_bytes = 0;
        if count > 0 {
            log::debug!("BufferPool: destroyed {} cached buffers on drop", count);
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BufferPool")
            .field("pending_count", &inner.released.len())
            .field("pending_bytes", &inner.released_bytes)
            .field("allocated_groups", &inner.allocated.len())
            .finish()
    }
}

// Ensure BufferPool is Send + Sync
static_assertions::assert_impl_all!(BufferPool: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;
    use rstest::rstest;

    fn setup(frames_in_flight: u64) -> (Arc<DummyDevice>, Arc<FrameClock>, BufferPool) {
        let device = Arc::new(DummyDevice::new());
        let clock = Arc::new(FrameClock::new(frames_in_flight));
        let pool = BufferPool::new(device.clone(), clock.clone());
        (device, clock, pool)
    }

    fn get_storage(pool: &BufferPool, name: &str, size: u64) -> PooledBuffer {
        pool.get(name, size, BufferUsage::STORAGE, MemoryKind::GpuOnly, false)
            .unwrap()
    }

    #[test]
    fn test_release_does_not_reuse_before_delay() {
        let (device, _clock, pool) = setup(2);

        let first = get_storage(&pool, "a", 256);
        pool.release(first);
        assert_eq!(pool.pending_count(), 1);

        // Same frame: the released buffer is not eligible yet.
        let second = get_storage(&pool, "b", 256);
        assert_eq!(device.buffers_created(), 2);
        pool.release(second);
    }

    #[test]
    fn test_reuse_after_delay_renames_resource() {
        let (device, clock, pool) = setup(2);

        let first = get_storage(&pool, "a", 256);
        pool.release(first);

        clock.advance_frame();
        clock.advance_frame();

        let reused = get_storage(&pool, "b", 256);
        assert_eq!(device.buffers_created(), 1);
        assert_eq!(reused.name(), "b");
        assert_eq!(pool.pending_count(), 0);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    fn test_steady_state_buffer_count_matches_delay(#[case] frames_in_flight: u64) {
        let (device, clock, pool) = setup(frames_in_flight);

        for _ in 0..12 {
            clock.advance_frame();
            let buffer = get_storage(&pool, "per_frame", 1024);
            pool.release(buffer);
        }

        assert_eq!(device.buffers_created(), frames_in_flight);
    }

    #[test]
    fn test_best_fit_prefers_smallest_qualifying() {
        let (device, clock, pool) = setup(1);

        for (name, size) in [("small", 64u64), ("mid", 256), ("large", 1024)] {
            let buffer = get_storage(&pool, name, size);
            pool.release(buffer);
        }
        clock.advance_frame();

        let fitted = get_storage(&pool, "request", 100);
        assert_eq!(fitted.size(), 256);
        assert_eq!(device.buffers_created(), 3);
    }

    #[test]
    fn test_usage_flags_must_match_exactly() {
        let (device, clock, pool) = setup(1);

        let buffer = get_storage(&pool, "a", 256);
        pool.release(buffer);
        clock.advance_frame();

        let different = pool
            .get(
                "b",
                256,
                BufferUsage::STORAGE | BufferUsage::COPY_DST,
                MemoryKind::GpuOnly,
                false,
            )
            .unwrap();
        assert_eq!(device.buffers_created(), 2);
        pool.release(different);
    }

    #[test]
    fn test_mappable_request_skips_unmapped_buffers() {
        let (device, clock, pool) = setup(1);

        let unmapped = pool
            .get("plain", 128, BufferUsage::COPY_SRC, MemoryKind::CpuToGpu, false)
            .unwrap();
        pool.release(unmapped);
        clock.advance_frame();

        let mapped = pool
            .get("staging", 128, BufferUsage::COPY_SRC, MemoryKind::CpuToGpu, true)
            .unwrap();
        assert!(mapped.is_mapped());
        assert_eq!(device.buffers_created(), 2);
    }

    #[test]
    fn test_mapped_buffer_satisfies_plain_request() {
        let (device, clock, pool) = setup(1);

        let mapped = pool
            .get("staging", 128, BufferUsage::COPY_SRC, MemoryKind::CpuToGpu, true)
            .unwrap();
        pool.release(mapped);
        clock.advance_frame();

        let reused = pool
            .get("any", 128, BufferUsage::COPY_SRC, MemoryKind::CpuToGpu, false)
            .unwrap();
        assert_eq!(device.buffers_created(), 1);
        assert!(reused.is_mapped());
    }

    #[test]
    fn test_budget_eviction_destroys_oldest_first() {
        let device = Arc::new(DummyDevice::new());
        let clock = Arc::new(FrameClock::new(1));
        let pool = BufferPool::with_config(
            device.clone(),
            clock.clone(),
            BufferPoolConfig {
                released_budget_bytes: 512,
            },
        );

        for name in ["a", "b", "c"] {
            let buffer = get_storage(&pool, name, 512);
            pool.release(buffer);
        }
        assert_eq!(pool.pending_bytes(), 1536);

        clock.advance_frame();

        // Different usage, so nothing is reused and GC has to trim.
        let vertex = pool
            .get("d", 64, BufferUsage::VERTEX, MemoryKind::GpuOnly, false)
            .unwrap();
        assert_eq!(pool.pending_bytes(), 512);
        assert_eq!(device.buffers_destroyed(), 2);
        pool.release(vertex);
    }

    #[test]
    fn test_gc_spares_records_inside_delay_window() {
        let device = Arc::new(DummyDevice::new());
        let clock = Arc::new(FrameClock::new(2));
        let pool = BufferPool::with_config(
            device.clone(),
            clock.clone(),
            BufferPoolConfig {
                released_budget_bytes: 0,
            },
        );

        let buffer = get_storage(&pool, "a", 256);
        pool.release(buffer);
        clock.advance_frame();

        // Over budget, but the record is still inside the delay window.
        let other = pool
            .get("b", 64, BufferUsage::VERTEX, MemoryKind::GpuOnly, false)
            .unwrap();
        assert_eq!(device.buffers_destroyed(), 0);
        assert_eq!(pool.pending_count(), 1);
        pool.release(other);
    }

    #[test]
    fn test_allocation_failure_returns_none() {
        let (device, _clock, pool) = setup(2);

        let result = pool.get("broken", 0, BufferUsage::VERTEX, MemoryKind::GpuOnly, false);
        assert!(result.is_none());
        assert_eq!(device.buffer_count(), 0);
    }

    #[test]
    fn test_stats_visitors_split_allocated_and_cached() {
        let (_device, _clock, pool) = setup(2);

        let held = get_storage(&pool, "held", 128);
        let returned = get_storage(&pool, "returned", 512);
        pool.release(returned);

        let mut allocated = Vec::new();
        pool.collect_allocated_stats(|stats| allocated.push((stats.name.to_string(), stats.bytes)));
        assert_eq!(allocated, vec![("held".to_string(), 128)]);

        let mut cached = Vec::new();
        pool.collect_cached_stats(|stats| cached.push((stats.name.to_string(), stats.count)));
        assert_eq!(cached, vec![("returned".to_string(), 1)]);

        assert_eq!(pool.allocated_bytes(), 128);
        pool.release(held);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn test_drop_destroys_cached_buffers() {
        let (device, _clock, pool) = setup(1);

        let buffer = get_storage(&pool, "a", 256);
        pool.release(buffer);
        assert_eq!(device.buffer_count(), 1);

        drop(pool);
        assert_eq!(device.buffer_count(), 0);
    }
}
