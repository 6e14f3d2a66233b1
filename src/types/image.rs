//! Image types and descriptors.

use bitflags::bitflags;

use super::Extent2d;

/// Image format enumeration.
///
/// A deliberately small set covering the formats render targets are made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ImageFormat {
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized. Common swapchain format.
    Bgra8Unorm,
    /// 16-bit RGBA channels, float. HDR color targets.
    Rgba16Float,
    /// 32-bit RG channels, float.
    Rg32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit depth, float.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
}

impl ImageFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8)
    }

    /// Size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::R32Uint
            | Self::R32Float
            | Self::Depth32Float
            | Self::Depth24PlusStencil8 => 4,
            Self::Rgba16Float | Self::Rg32Float => 8,
        }
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Image can be copied from.
        const COPY_SRC = 1 << 0;
        /// Image can be copied to.
        const COPY_DST = 1 << 1;
        /// Image can be sampled in a shader.
        const SAMPLED = 1 << 2;
        /// Image can be read/written as a storage image.
        const STORAGE = 1 << 3;
        /// Image can be used as a color or depth render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for ImageUsage {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Aspect flags selecting which planes of an image a view addresses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageAspect: u32 {
        /// Color plane.
        const COLOR = 1 << 0;
        /// Depth plane.
        const DEPTH = 1 << 1;
        /// Stencil plane.
        const STENCIL = 1 << 2;
    }
}

impl ImageAspect {
    /// The natural aspect for a format: depth(+stencil) planes for
    /// depth/stencil formats, the color plane otherwise.
    pub fn for_format(format: ImageFormat) -> Self {
        if format.is_depth_stencil() {
            if format.has_stencil() {
                Self::DEPTH | Self::STENCIL
            } else {
                Self::DEPTH
            }
        } else {
            Self::COLOR
        }
    }
}

impl Default for ImageAspect {
    fn default() -> Self {
        Self::COLOR
    }
}

/// Descriptor for creating a 2D image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    /// Debug label for the image.
    pub label: Option<String>,
    /// Size of the image.
    pub size: Extent2d,
    /// Mip level count.
    pub mip_level_count: u32,
    /// Array layer count.
    pub array_layer_count: u32,
    /// Sample count for multisampling.
    pub sample_count: u32,
    /// Image format.
    pub format: ImageFormat,
    /// Usage flags.
    pub usage: ImageUsage,
}

impl ImageDescriptor {
    /// Create a new 2D image descriptor.
    pub fn new_2d(width: u32, height: u32, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            label: None,
            size: Extent2d::new(width, height),
            mip_level_count: 1,
            array_layer_count: 1,
            sample_count: 1,
            format,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
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

    /// Set the sample count for multisampling.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_classification() {
        assert!(ImageFormat::Depth32Float.is_depth_stencil());
        assert!(ImageFormat::Depth24PlusStencil8.has_stencil());
        assert!(!ImageFormat::Rgba8Unorm.is_depth_stencil());
        assert_eq!(ImageFormat::Rgba16Float.block_size(), 8);
    }

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(
            ImageAspect::for_format(ImageFormat::Rgba8Unorm),
            ImageAspect::COLOR
        );
        assert_eq!(
            ImageAspect::for_format(ImageFormat::Depth32Float),
            ImageAspect::DEPTH
        );
        assert_eq!(
            ImageAspect::for_format(ImageFormat::Depth24PlusStencil8),
            ImageAspect::DEPTH | ImageAspect::STENCIL
        );
    }

    #[test]
    fn test_image_descriptor_builder() {
        let desc = ImageDescriptor::new_2d(
            1920,
            1080,
            ImageFormat::Rgba16Float,
            ImageUsage::RENDER_ATTACHMENT | ImageUsage::SAMPLED,
        )
        .with_label("hdr_color")
        .with_sample_count(4);

        assert_eq!(desc.size, Extent2d::new(1920, 1080));
        assert_eq!(desc.sample_count, 4);
        assert_eq!(desc.mip_level_count, 1);
        assert_eq!(desc.label.as_deref(), Some("hdr_color"));
    }
}
