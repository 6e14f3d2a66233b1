//! Frame progression and reuse safety.
//!
//! GPU commands execute asynchronously: when the CPU records frame `N`, the
//! GPU may still be working on frames `N-1` and `N-2`. A resource released on
//! frame `F` therefore stays off-limits until the clock reaches
//! `F + frames_in_flight`, at which point the fence wait at the frame boundary
//! guarantees the GPU is done with it.
//!
//! [`FrameClock`] is the single source of truth for that progression. Pools
//! and caches share one clock so their reuse decisions agree.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic frame counter shared by every pool and cache.
///
/// Cheap to clone behind an `Arc`; reads are relaxed atomics.
///
/// # Example
///
/// ```
/// use render_frame::frame::FrameClock;
///
/// let clock = FrameClock::new(2);
/// assert!(!clock.is_reuse_safe(0));
/// clock.advance_frame();
/// clock.advance_frame();
/// assert!(clock.is_reuse_safe(0));
/// ```
#[derive(Debug)]
pub struct FrameClock {
    /// Current frame index (monotonically increasing).
    current_frame: AtomicU64,
    /// How many frames the GPU may lag behind the CPU.
    frames_in_flight: u64,
}

impl FrameClock {
    /// Create a clock starting at frame 0.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    pub fn new(frames_in_flight: u64) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");

        Self {
            current_frame: AtomicU64::new(0),
            frames_in_flight,
        }
    }

    /// Advance to the next frame.
    ///
    /// Call once per frame boundary, after the fence for the oldest in-flight
    /// frame has been waited on. Returns the new frame index.
    pub fn advance_frame(&self) -> u64 {
        self.current_frame.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get the current frame index.
    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Relaxed)
    }

    /// How many frames the GPU may lag behind the CPU.
    pub fn frames_in_flight(&self) -> u64 {
        self.frames_in_flight
    }

    /// Whether a resource released on `release_frame` may be reused now.
    ///
    /// True once `frames_in_flight` frame boundaries have passed since the
    /// release, meaning no in-flight command list can still reference it.
    pub fn is_reuse_safe(&self, release_frame: u64) -> bool {
        self.current_frame() >= release_frame + self.frames_in_flight
    }
}
