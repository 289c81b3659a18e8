//! Device-local 2D images with a single owned view.
//!
//! Used for the MSAA color attachment, the depth attachment and textures.
//! Drop order is view, image, then memory.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub name: &'static str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Multisampled color target resolved into the swapchain image.
    pub fn color_attachment(
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            name: "color_attachment",
            extent,
            format,
            mip_levels: 1,
            samples,
            usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn depth_attachment(
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            name: "depth_attachment",
            extent,
            format,
            mip_levels: 1,
            samples,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }

    /// Sampled texture that is also the source and target of mip blits.
    pub fn texture(extent: vk::Extent2D, format: vk::Format, mip_levels: u32) -> Self {
        Self {
            name: "texture",
            extent,
            format,
            mip_levels,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }
}

pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl Image {
    pub fn new(device: Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::ZeroExtent {
                width: desc.extent.width,
                height: desc.extent.height,
            });
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            desc,
        };

        if let Some(allocation) = &this.allocation {
            unsafe {
                this.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(this.full_range());
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {}: {}x{} {:?}, {} mip(s), {:?}",
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.mip_levels,
            desc.samples
        );

        Ok(this)
    }

    /// Subresource range over every mip level.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.desc.aspect)
            .base_mip_level(0)
            .level_count(self.desc.mip_levels)
            .base_array_layer(0)
            .layer_count(1)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().free(allocation)
        {
            error!("Failed to free {} allocation: {:?}", self.desc.name, e);
        }
        debug!("Destroyed {}", self.desc.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 640,
        height: 480,
    };

    #[test]
    fn test_color_attachment_desc() {
        let desc = ImageDesc::color_attachment(
            EXTENT,
            vk::Format::B8G8R8A8_SRGB,
            vk::SampleCountFlags::TYPE_8,
        );
        assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSIENT_ATTACHMENT));
        assert!(desc.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_8);
        assert_eq!(desc.mip_levels, 1);
    }

    #[test]
    fn test_depth_attachment_desc() {
        let desc = ImageDesc::depth_attachment(
            EXTENT,
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_4,
        );
        assert_eq!(desc.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(desc.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn test_texture_desc_supports_blits() {
        let desc = ImageDesc::texture(EXTENT, vk::Format::R8G8B8A8_SRGB, 10);
        assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(desc.usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc.mip_levels, 10);
    }
}
