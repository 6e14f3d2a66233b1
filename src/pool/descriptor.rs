//! Descriptor set pool with frame-delayed reuse.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{DescriptorLayoutHandle, DescriptorSetHandle, RenderDevice};
use crate::frame::FrameClock;

/// A descriptor set handed out by [`DescriptorSetAllocator::allocate`].
///
/// Carries the layout it was allocated against so a release can never pair a
/// set with the wrong layout. Not cloneable, so a set cannot be released
/// twice.
#[derive(Debug)]
pub struct PooledDescriptorSet {
    set: DescriptorSetHandle,
    layout: DescriptorLayoutHandle,
}

impl PooledDescriptorSet {
    /// Device handle of the set.
    pub fn set(&self) -> DescriptorSetHandle {
        self.set
    }

    /// Layout the set was allocated against.
    pub fn layout(&self) -> DescriptorLayoutHandle {
        self.layout
    }
}

#[derive(Debug)]
struct ReleaseRecord {
    set: DescriptorSetHandle,
    layout: DescriptorLayoutHandle,
    released_at: u64,
}

/// Tuning knobs for [`DescriptorSetAllocator`].
#[derive(Debug, Clone)]
pub struct DescriptorAllocatorConfig {
    /// Released sets allowed to accumulate before garbage collection starts
    /// freeing the oldest eligible records.
    pub max_cached_sets: usize,
}

impl Default for DescriptorAllocatorConfig {
    fn default() -> Self {
        Self {
            max_cached_sets: 64,
        }
    }
}

/// Pool of descriptor sets with frame-delayed reuse, keyed by layout.
///
/// Follows the same contract as [`BufferPool`](super::BufferPool): `allocate`
/// reuses a released set of the same layout once its frame delay has elapsed,
/// `release` stamps the set with the current frame, and the allocation path
/// garbage-collects the oldest eligible records past the configured cache
/// size.
pub struct DescriptorSetAllocator {
    device: Arc<dyn RenderDevice>,
    clock: Arc<FrameClock>,
    config: DescriptorAllocatorConfig,
    released: Mutex<Vec<ReleaseRecord>>,
}

impl DescriptorSetAllocator {
    /// Create an allocator with the default cache size.
    pub fn new(device: Arc<dyn RenderDevice>, clock: Arc<FrameClock>) -> Self {
        Self::with_config(device, clock, DescriptorAllocatorConfig::default())
    }

    /// Create an allocator with an explicit configuration.
    pub fn with_config(
        device: Arc<dyn RenderDevice>,
        clock: Arc<FrameClock>,
        config: DescriptorAllocatorConfig,
    ) -> Self {
        Self {
            device,
            clock,
            config,
            released: Mutex::new(Vec::new()),
        }
    }

    /// Allocate a descriptor set for `layout`.
    ///
    /// Reuses the first eligible released set of the same layout, otherwise
    /// allocates from the device. Returns `None` when device allocation
    /// fails; callers should skip the dependent work for this frame.
    pub fn allocate(&self, layout: DescriptorLayoutHandle) -> Option<PooledDescriptorSet> {
        let mut released = self.released.lock();

        let reusable = released.iter().position(|record| {
            record.layout == layout && self.clock.is_reuse_safe(record.released_at)
        });

        let resource = match reusable {
            Some(index) => {
                let record = released.remove(index);
                log::trace!(
                    "DescriptorSetAllocator: reusing set {} (layout {})",
                    record.set.raw(),
                    layout.raw()
                );
                PooledDescriptorSet {
                    set: record.set,
                    layout,
                }
            }
            None => match self.device.create_descriptor_set(layout) {
                Ok(set) => PooledDescriptorSet { set, layout },
                Err(err) => {
                    log::warn!(
                        "DescriptorSetAllocator: allocation for layout {} failed: {}",
                        layout.raw(),
                        err
                    );
                    self.collect_garbage(&mut released);
                    return None;
                }
            },
        };

        self.collect_garbage(&mut released);
        Some(resource)
    }

    /// Return a set to the pool.
    ///
    /// The set becomes reusable once `frames_in_flight` frame boundaries have
    /// passed. Nothing is freed here.
    pub fn release(&self, resource: PooledDescriptorSet) {
        log::trace!(
            "DescriptorSetAllocator: released set {} (layout {})",
            resource.set.raw(),
            resource.layout.raw()
        );
        self.released.lock().push(ReleaseRecord {
            set: resource.set,
            layout: resource.layout,
            released_at: self.clock.current_frame(),
        });
    }

    /// Number of released sets waiting out the frame delay.
    pub fn pending_count(&self) -> usize {
        self.released.lock().len()
    }

    /// Free the oldest eligible released records while over the cache size.
    fn collect_garbage(&self, released: &mut Vec<ReleaseRecord>) {
        while released.len() > self.config.max_cached_sets {
            let oldest = released
                .iter()
                .enumerate()
                .filter(|(_, record)| self.clock.is_reuse_safe(record.released_at))
                .min_by_key(|(_, record)| record.released_at)
                .map(|(index, _)| index);

            let Some(index) = oldest else {
                break;
            };

            let record = released.remove(index);
            log::debug!(
                "DescriptorSetAllocator: cache full, freeing set {} (layout {})",
                record.set.raw(),
                record.layout.raw()
            );
            self.device.destroy_descriptor_set(record.set);
        }
    }
}

impl Drop for DescriptorSetAllocator {
    fn drop(&mut self) {
        let mut released = self.released.lock();
        let count = released.len();
        for record in released.drain(..) {
            self.device.destroy_descriptor_set(record.set);
        }
        if count > 0 {
            log::debug!(
                "DescriptorSetAllocator: freed {} cached sets on drop",
                count
            );
        }
    }
}

impl std::fmt::Debug for DescriptorSetAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetAllocator")
            .field("pending_count", &self.released.lock().len())
            .finish()
    }
}

// Ensure DescriptorSetAllocator is Send + Sync
static_assertions::assert_impl_all!(DescriptorSetAllocator: Send, Sync);
