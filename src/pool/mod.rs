//! Pooled allocators with frame-delayed reuse.
//!
//! Renderer subsystems request buffers and descriptor sets every frame. Device
//! allocation is slow, so the pools keep released resources around and re-issue
//! them once the [`FrameClock`](crate::frame::FrameClock) guarantees the GPU
//! can no longer be reading them. Released resources accumulate up to a
//! configured budget; past it, a garbage-collection step on the allocation
//! path destroys the oldest eligible records until the pool is back under
//! budget.

mod buffer_pool;
mod descriptor;

pub use buffer_pool::{BufferPool, BufferPoolConfig, PoolStats, PooledBuffer};
pub use descriptor::{DescriptorAllocatorConfig, DescriptorSetAllocator, PooledDescriptorSet};
