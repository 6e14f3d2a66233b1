//! Named render target cache.
//!
//! Passes address their attachments by logical name. The cache maps each name
//! to a physical image and view, creating them lazily on first request and
//! tracking the pipeline state each target was last used with so redundant
//! barriers can be skipped within a frame.
//!
//! Targets come in two flavors:
//! - **Owned** targets are created by the cache from a [`TargetDescriptor`]
//!   and destroyed by [`RenderTargetCache::clear`] or on drop.
//! - **External** targets (swapchain images, imported attachments) are
//!   registered via [`RenderTargetCache::add_target`] and never destroyed by
//!   the cache.

use std::collections::HashMap;
use std::sync::Arc;

use crate::device::{ImageHandle, ImageViewHandle, RenderDevice};
use crate::sync::{BarrierBatch, ResourceState};
use crate::types::{Extent2d, ImageAspect, ImageDescriptor, ImageFormat, ImageUsage};

// ============================================================================
// Size policy
// ============================================================================

/// Size policy for a logical render target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSize {
    /// Fixed pixel dimensions, independent of the reference size.
    Absolute {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// Dimensions derived from the reference (swapchain) size.
    Relative {
        /// Multiplier applied to the reference width.
        width_scale: f32,
        /// Multiplier applied to the reference height.
        height_scale: f32,
    },
}

impl TargetSize {
    /// Full reference resolution.
    pub const FULL: Self = Self::Relative {
        width_scale: 1.0,
        height_scale: 1.0,
    };

    /// Half reference resolution in both dimensions.
    pub const HALF: Self = Self::Relative {
        width_scale: 0.5,
        height_scale: 0.5,
    };

    /// Fixed pixel dimensions.
    pub fn absolute(width: u32, height: u32) -> Self {
        Self::Absolute { width, height }
    }

    /// Compute concrete pixel dimensions against a reference size.
    ///
    /// Relative sizes are rounded down and clamped to at least one pixel so a
    /// small scale factor never produces an empty image.
    pub fn resolve(&self, reference: Extent2d) -> Extent2d {
        match self {
            Self::Absolute { width, height } => Extent2d::new(*width, *height),
            Self::Relative {
                width_scale,
                height_scale,
            } => Extent2d::new(
                ((reference.width as f32 * width_scale) as u32).max(1),
                ((reference.height as f32 * height_scale) as u32).max(1),
            ),
        }
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        Self::FULL
    }
}

// ============================================================================
// Target descriptor
// ============================================================================

/// Describes a logical render target.
///
/// Two descriptors with equal fields describe the same logical resource.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDescriptor {
    /// Logical name passes use to address the target.
    pub name: String,
    /// Size policy.
    pub size: TargetSize,
    /// Pixel format.
    pub format: ImageFormat,
    /// Usage flags for the backing image.
    pub usage: ImageUsage,
    /// Sample count for multisampling.
    pub sample_count: u32,
    /// Mip level count.
    pub mip_level_count: u32,
    /// Array layer count.
    pub array_layer_count: u32,
}

impl TargetDescriptor {
    /// Create a descriptor at full reference resolution.
    pub fn new(name: impl Into<String>, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            name: name.into(),
            size: TargetSize::FULL,
            format,
            usage,
            sample_count: 1,
            mip_level_count: 1,
            array_layer_count: 1,
        }
    }

    /// Shorthand for a color attachment that can also be sampled.
    pub fn color(name: impl Into<String>, format: ImageFormat) -> Self {
        Self::new(
            name,
            format,
            ImageUsage::RENDER_ATTACHMENT | ImageUsage::SAMPLED,
        )
    }

    /// Shorthand for a depth attachment that can also be sampled.
    pub fn depth(name: impl Into<String>, format: ImageFormat) -> Self {
        Self::new(
            name,
            format,
            ImageUsage::RENDER_ATTACHMENT | ImageUsage::SAMPLED,
        )
    }

    /// Set the size policy.
    pub fn with_size(mut self, size: TargetSize) -> Self {
        self.size = size;
        self
    }

    /// Set the sample count.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Set the array layer count.
    pub fn with_array_layers(mut self, count: u32) -> Self {
        self.array_layer_count = count;
        self
    }

    fn image_descriptor(&self, extent: Extent2d) -> ImageDescriptor {
        ImageDescriptor::new_2d(extent.width, extent.height, self.format, self.usage)
            .with_label(self.name.clone())
            .with_mip_levels(self.mip_level_count)
            .with_array_layers(self.array_layer_count)
            .with_sample_count(self.sample_count)
    }
}

// ============================================================================
// Physical target
// ============================================================================

/// A physical image bound to a logical target name.
#[derive(Debug)]
pub struct PhysicalTarget {
    descriptor: TargetDescriptor,
    image: ImageHandle,
    view: ImageViewHandle,
    extent: Extent2d,
    state: ResourceState,
    external: bool,
}

impl PhysicalTarget {
    /// Logical name of the target.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Backing image handle.
    pub fn image(&self) -> ImageHandle {
        self.image
    }

    /// Full-subresource view handle.
    pub fn view(&self) -> ImageViewHandle {
        self.view
    }

    /// Concrete pixel dimensions.
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Pixel format.
    pub fn format(&self) -> ImageFormat {
        self.descriptor.format
    }

    /// State the target was last transitioned to.
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Whether the image is externally owned.
    pub fn is_external(&self) -> bool {
        self.external
    }

    /// The descriptor the target was created or registered with.
    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }
}

/// A target resolved for use by a pass.
///
/// Carries everything a pass body needs to bind the attachment without going
/// back through the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Logical name the target was resolved under.
    pub name: String,
    /// Backing image handle.
    pub image: ImageHandle,
    /// Full-subresource view handle.
    pub view: ImageViewHandle,
    /// Concrete pixel dimensions.
    pub extent: Extent2d,
    /// Pixel format.
    pub format: ImageFormat,
}

// ============================================================================
// Render target cache
// ============================================================================

/// Cache of named render targets.
///
/// Owned by the rendering thread; all methods take `&mut self`. Lookup is by
/// logical name. When a cached target's descriptor no longer matches the
/// requested one, owned targets are recreated and external targets are
/// returned unchanged with a warning.
pub struct RenderTargetCache {
    device: Arc<dyn RenderDevice>,
    reference_size: Extent2d,
    targets: HashMap<String, PhysicalTarget>,
}

impl RenderTargetCache {
    /// Create an empty cache.
    ///
    /// `reference_size` is the size relative target dimensions are computed
    /// from, typically the swapchain extent.
    pub fn new(device: Arc<dyn RenderDevice>, reference_size: Extent2d) -> Self {
        Self {
            device,
            reference_size,
            targets: HashMap::new(),
        }
    }

    /// Get or create the physical target for a descriptor.
    ///
    /// Returns the cached target when its descriptor and resolved extent still
    /// match the request. An owned target that no longer matches is destroyed
    /// and recreated; a mismatched external target is returned unchanged since
    /// the cache cannot recreate an image it does not own. Returns `None` only
    /// when the device fails to create the backing image, in which case the
    /// caller should skip the associated work for this frame.
    pub fn get_target(&mut self, descriptor: &TargetDescriptor) -> Option<&PhysicalTarget> {
        let extent = descriptor.size.resolve(self.reference_size);

        let recreate = match self.targets.get(&descriptor.name) {
            Some(existing) if existing.descriptor == *descriptor && existing.extent == extent => {
                false
            }
            Some(existing) if existing.external => {
                log::warn!(
                    "RenderTargetCache: descriptor mismatch for external target '{}', returning it unchanged",
                    descriptor.name
                );
                false
            }
            Some(_) => {
                log::warn!(
                    "RenderTargetCache: descriptor mismatch for '{}', recreating target",
                    descriptor.name
                );
                true
            }
            None => true,
        };

        if recreate {
            if let Some(old) = self.targets.remove(&descriptor.name) {
                self.destroy_target(old);
            }
            let target = self.create_target(descriptor.clone(), extent)?;
            self.targets.insert(descriptor.name.clone(), target);
        }

        self.targets.get(&descriptor.name)
    }

    /// Register an externally-owned image under a logical name.
    ///
    /// The cache never destroys external images; [`Self::clear`] keeps them
    /// registered. Replacing a cache-owned target destroys its image first.
    pub fn add_target(
        &mut self,
        descriptor: TargetDescriptor,
        image: ImageHandle,
        view: ImageViewHandle,
    ) {
        let extent = descriptor.size.resolve(self.reference_size);
        let name = descriptor.name.clone();

        log::trace!("RenderTargetCache: registered external target '{}'", name);

        let target = PhysicalTarget {
            descriptor,
            image,
            view,
            extent,
            state: ResourceState::UNDEFINED,
            external: true,
        };
        if let Some(old) = self.targets.insert(name.clone(), target) {
            if !old.external {
                log::warn!(
                    "RenderTargetCache: external target '{}' replaces a cache-owned image",
                    name
                );
                self.destroy_target(old);
            }
        }
    }

    /// Look up a target without creating it.
    pub fn target(&self, name: &str) -> Option<&PhysicalTarget> {
        self.targets.get(name)
    }

    /// Check whether a target exists under a name.
    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Number of tracked targets, external ones included.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if the cache tracks no targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Reference size relative target dimensions are computed from.
    pub fn reference_size(&self) -> Extent2d {
        self.reference_size
    }

    /// Update the reference size.
    ///
    /// Existing targets are not touched; a relatively-sized target is
    /// recreated on its next [`Self::get_target`] call because its resolved
    /// extent no longer matches.
    pub fn set_reference_size(&mut self, size: Extent2d) {
        self.reference_size = size;
    }

    /// Record the barrier moving a named target into `new_state` and return
    /// the resolved handle set.
    ///
    /// No barrier is added when the target is already in the requested state.
    /// Returns `None` for names with no physical target; the caller is
    /// expected to skip the corresponding work rather than treat this as
    /// fatal.
    pub fn transition(
        &mut self,
        name: &str,
        new_state: ResourceState,
        batch: &mut BarrierBatch,
    ) -> Option<ResolvedTarget> {
        let target = self.targets.get_mut(name)?;

        if target.state != new_state {
            batch.add_image_barrier(
                target.image,
                ImageAspect::for_format(target.descriptor.format),
                target.state,
                new_state,
            );
            target.state = new_state;
        }

        Some(ResolvedTarget {
            name: target.descriptor.name.clone(),
            image: target.image,
            view: target.view,
            extent: target.extent,
            format: target.descriptor.format,
        })
    }

    /// Reset every tracked state to the undefined sentinel.
    ///
    /// Called once at the start of a frame so the first use of each target
    /// re-establishes its state. Within a frame, state carries across passes
    /// and redundant barriers are skipped.
    pub fn reset_for_new_frame(&mut self) {
        for target in self.targets.values_mut() {
            target.state = ResourceState::UNDEFINED;
        }
    }

    /// Visit every tracked target.
    pub fn visit_targets(&self, mut visitor: impl FnMut(&PhysicalTarget)) {
        for target in self.targets.values() {
            visitor(target);
        }
    }

    /// Destroy all cache-owned images.
    ///
    /// External registrations survive. Called on teardown or when the
    /// swapchain is resized and targets must be rebuilt at the new size.
    pub fn clear(&mut self) {
        let targets = std::mem::take(&mut self.targets);
        for (name, target) in targets {
            if target.external {
                self.targets.insert(name, target);
            } else {
                self.destroy_target(target);
            }
        }
    }

    fn create_target(
        &self,
        descriptor: TargetDescriptor,
        extent: Extent2d,
    ) -> Option<PhysicalTarget> {
        let image = match self.device.create_image(&descriptor.image_descriptor(extent)) {
            Ok(image) => image,
            Err(err) => {
                log::error!(
                    "RenderTargetCache: failed to create image for '{}': {}",
                    descriptor.name,
                    err
                );
                return None;
            }
        };
        let view = match self.device.create_image_view(image) {
            Ok(view) => view,
            Err(err) => {
                log::error!(
                    "RenderTargetCache: failed to create view for '{}': {}",
                    descriptor.name,
                    err
                );
                self.device.destroy_image(image);
                return None;
            }
        };

        log::trace!(
            "RenderTargetCache: created target '{}' ({}x{}, {:?})",
            descriptor.name,
            extent.width,
            extent.height,
            descriptor.format
        );

        Some(PhysicalTarget {
            descriptor,
            image,
            view,
            extent,
            state: ResourceState::UNDEFINED,
            external: false,
        })
    }

    fn destroy_target(&self, target: PhysicalTarget) {
        self.device.destroy_image_view(target.view);
        self.device.destroy_image(target.image);
    }
}

impl Drop for RenderTargetCache {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for RenderTargetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTargetCache")
            .field("device", &self.device.name())
            .field("reference_size", &self.reference_size)
            .field("targets", &self.targets.len())
            .finish()
    }
}

// Ensure RenderTargetCache is Send + Sync
static_assertions::assert_impl_all!(RenderTargetCache: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;

    fn test_cache() -> (Arc<DummyDevice>, RenderTargetCache) {
        let device = Arc::new(DummyDevice::new());
        let cache = RenderTargetCache::new(device.clone(), Extent2d::new(1920, 1080));
        (device, cache)
    }

    #[test]
    fn test_size_resolution() {
        let reference = Extent2d::new(1920, 1080);

        assert_eq!(
            TargetSize::absolute(512, 512).resolve(reference),
            Extent2d::new(512, 512)
        );
        assert_eq!(TargetSize::FULL.resolve(reference), reference);
        assert_eq!(
            TargetSize::HALF.resolve(reference),
            Extent2d::new(960, 540)
        );
    }

    #[test]
    fn test_tiny_relative_size_clamps_to_one_pixel() {
        let size = TargetSize::Relative {
            width_scale: 0.0001,
            height_scale: 0.0001,
        };
        assert_eq!(size.resolve(Extent2d::new(1920, 1080)), Extent2d::new(1, 1));
    }

    #[test]
    fn test_get_target_creates_once() {
        let (device, mut cache) = test_cache();
        let desc = TargetDescriptor::color("hdr", ImageFormat::Rgba16Float);

        let first = cache.get_target(&desc).map(|t| t.image());
        let second = cache.get_target(&desc).map(|t| t.image());

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(device.images_created(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_relative_target_resolves_against_reference() {
        let (_device, mut cache) = test_cache();
        let desc =
            TargetDescriptor::color("half_res", ImageFormat::Rgba8Unorm).with_size(TargetSize::HALF);

        let extent = cache.get_target(&desc).map(|t| t.extent());

        assert_eq!(extent, Some(Extent2d::new(960, 540)));
    }

    #[test]
    fn test_descriptor_mismatch_recreates_owned_target() {
        let (device, mut cache) = test_cache();
        let first_desc = TargetDescriptor::color("color", ImageFormat::Rgba8Unorm);
        let second_desc = TargetDescriptor::color("color", ImageFormat::Rgba16Float);

        let first = cache.get_target(&first_desc).map(|t| t.image());
        let second = cache.get_target(&second_desc).map(|t| t.image());

        assert!(second.is_some());
        assert_ne!(first, second);
        assert_eq!(device.images_created(), 2);
        assert_eq!(device.images_destroyed(), 1);
        assert_eq!(
            cache.target("color").map(|t| t.format()),
            Some(ImageFormat::Rgba16Float)
        );
    }

    #[test]
    fn test_reference_size_change_recreates_relative_target() {
        let (device, mut cache) = test_cache();
        let desc = TargetDescriptor::color("color", ImageFormat::Rgba8Unorm);

        cache.get_target(&desc);
        cache.set_reference_size(Extent2d::new(1280, 720));
        let extent = cache.get_target(&desc).map(|t| t.extent());

        assert_eq!(extent, Some(Extent2d::new(1280, 720)));
        assert_eq!(device.images_created(), 2);
        assert_eq!(device.images_destroyed(), 1);
    }

    #[test]
    fn test_external_target_mismatch_returns_unchanged() {
        let (device, mut cache) = test_cache();
        let desc = TargetDescriptor::color("swapchain", ImageFormat::Bgra8Unorm);
        cache.add_target(desc, ImageHandle(100), ImageViewHandle(101));

        let other = TargetDescriptor::color("swapchain", ImageFormat::Rgba16Float);
        let target = cache.get_target(&other);

        assert_eq!(target.map(|t| t.image()), Some(ImageHandle(100)));
        assert_eq!(target.map(|t| t.format()), Some(ImageFormat::Bgra8Unorm));
        assert_eq!(device.images_created(), 0);
    }

    #[test]
    fn test_clear_keeps_external_targets() {
        let (device, mut cache) = test_cache();
        cache.get_target(&TargetDescriptor::color("owned", ImageFormat::Rgba8Unorm));
        cache.add_target(
            TargetDescriptor::color("swapchain", ImageFormat::Bgra8Unorm),
            ImageHandle(100),
            ImageViewHandle(101),
        );

        cache.clear();

        assert!(!cache.contains("owned"));
        assert!(cache.contains("swapchain"));
        assert_eq!(device.images_destroyed(), 1);
    }

    #[test]
    fn test_transition_emits_barrier_once() {
        let (_device, mut cache) = test_cache();
        cache.get_target(&TargetDescriptor::color("color", ImageFormat::Rgba8Unorm));

        let mut batch = BarrierBatch::new();
        let resolved = cache.transition("color", ResourceState::COLOR_ATTACHMENT, &mut batch);
        assert!(resolved.is_some());
        assert_eq!(batch.len(), 1);

        let mut second = BarrierBatch::new();
        cache.transition("color", ResourceState::COLOR_ATTACHMENT, &mut second);
        assert!(second.is_empty());
    }

    #[test]
    fn test_reset_for_new_frame_forces_reestablish() {
        let (_device, mut cache) = test_cache();
        cache.get_target(&TargetDescriptor::color("color", ImageFormat::Rgba8Unorm));

        let mut batch = BarrierBatch::new();
        cache.transition("color", ResourceState::COLOR_ATTACHMENT, &mut batch);
        assert_eq!(batch.len(), 1);

        cache.reset_for_new_frame();

        let mut next_frame = BarrierBatch::new();
        cache.transition("color", ResourceState::COLOR_ATTACHMENT, &mut next_frame);
        assert_eq!(next_frame.len(), 1);
    }

    #[test]
    fn test_transition_missing_target_returns_none() {
        let (_device, mut cache) = test_cache();

        let mut batch = BarrierBatch::new();
        let resolved = cache.transition("missing", ResourceState::SHADER_READ, &mut batch);

        assert!(resolved.is_none());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_failed_creation_returns_none() {
        let (_device, mut cache) = test_cache();
        let desc = TargetDescriptor::color("broken", ImageFormat::Rgba8Unorm)
            .with_size(TargetSize::absolute(0, 0));

        assert!(cache.get_target(&desc).is_none());
        assert!(!cache.contains("broken"));
    }

    #[test]
    fn test_drop_destroys_owned_targets() {
        let (device, mut cache) = test_cache();
        cache.get_target(&TargetDescriptor::color("a", ImageFormat::Rgba8Unorm));
        cache.get_target(&TargetDescriptor::depth("b", ImageFormat::Depth32Float));
        drop(cache);

        assert_eq!(device.images_destroyed(), 2);
        assert_eq!(device.image_count(), 0);
    }

    #[test]
    fn test_visit_targets() {
        let (_device, mut cache) = test_cache();
        cache.get_target(&TargetDescriptor::color("a", ImageFormat::Rgba8Unorm));
        cache.get_target(&TargetDescriptor::color("b", ImageFormat::Rgba16Float));

        let mut names = Vec::new();
        cache.visit_targets(|target| names.push(target.name().to_string()));
        names.sort();

        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
