//! Plain data types shared across the crate: usage flags, descriptors,
//! formats and copy regions.

mod buffer;
mod common;
mod image;

pub use buffer::{
    BufferCopyRegion, BufferDescriptor, BufferUsage, DrawIndexedIndirectArgs, DrawIndirectArgs,
    MemoryKind,
};
pub use common::{ClearValue, Extent2d};
pub use image::{ImageAspect, ImageDescriptor, ImageFormat, ImageUsage};
