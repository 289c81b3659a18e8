//! Swapchain creation, image acquisition and presentation.
//!
//! A [`Swapchain`] is never rebuilt in place: recreation drops the old one
//! (views, then the swapchain object) and constructs a fresh one. Acquire and
//! present results are classified into [`AcquireOutcome`] and
//! [`PresentOutcome`] so callers can tell a stale surface from a real failure.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};
use vkr_core::VsyncMode;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Surface support: {} formats, {} present modes, image count {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Parameters chosen for one swapchain build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapchainConfig {
    /// Choose format, present mode, extent and image count.
    ///
    /// Fails when the surface offers no formats or present modes, or when the
    /// resulting extent has zero area.
    pub fn choose(
        support: &SwapchainSupportDetails,
        framebuffer: vk::Extent2D,
        vsync: VsyncMode,
    ) -> RhiResult<Self> {
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let extent = choose_extent(&support.capabilities, framebuffer);
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::ZeroExtent {
                width: extent.width,
                height: extent.height,
            });
        }

        Ok(Self {
            surface_format: choose_surface_format(&support.formats),
            present_mode: choose_present_mode(&support.present_modes, vsync),
            extent,
            image_count: determine_image_count(&support.capabilities),
        })
    }
}

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Usable image. `suboptimal` images still render correctly.
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface changed; the swapchain must be rebuilt before rendering.
    OutOfDate,
}

impl AcquireOutcome {
    pub fn classify(result: Result<(u32, bool), vk::Result>) -> RhiResult<Self> {
        match result {
            Ok((image_index, suboptimal)) => Ok(Self::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn classify(result: Result<bool, vk::Result>) -> RhiResult<Self> {
        match result {
            Ok(false) => Ok(Self::Presented),
            Ok(true) => Ok(Self::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }

    /// Whether the swapchain should be rebuilt after this present.
    #[inline]
    pub fn is_stale(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    config: SwapchainConfig,
}

impl Swapchain {
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        framebuffer: vk::Extent2D,
        vsync: VsyncMode,
    ) -> RhiResult<Self> {
        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, surface_loader)?;
        let config = SwapchainConfig::choose(&support, framebuffer, vsync)?;

        info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images",
            config.extent.width,
            config.extent.height,
            config.surface_format.format,
            config.surface_format.color_space,
            config.present_mode,
            config.image_count
        );

        let families = device.queue_families();
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, shared_families) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        } else {
            debug!(
                "CONCURRENT sharing between graphics ({}) and present ({})",
                families.graphics, families.present
            );
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

        let mut this = Self {
            device,
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            config,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain)? };
        for &image in &this.images {
            let view = create_image_view(&this.device, image, config.surface_format.format)?;
            this.image_views.push(view);
        }
        info!("Swapchain created with {} images", this.images.len());

        Ok(this)
    }

    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        AcquireOutcome::classify(result)
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };
        PresentOutcome::classify(result)
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.config.surface_format.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.config.surface_format.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.config.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.handle().destroy_image_view(view, None);
            }
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.config.extent.width,
            self.config.extent.height,
            self.images.len()
        );
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    match (preferred, formats.first()) {
        (Some(&format), _) => format,
        (None, Some(&first)) => {
            warn!("B8G8R8A8_SRGB unavailable, using {:?}", first.format);
            first
        }
        (None, None) => vk::SurfaceFormatKHR::default(),
    }
}

/// MAILBOX when preferred and offered, otherwise FIFO, which every
/// implementation supports.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: VsyncMode) -> vk::PresentModeKHR {
    if vsync == VsyncMode::Mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    vk::PresentModeKHR::FIFO
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: framebuffer.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 means no cap).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_view(device: &Device, image: vk::Image, format: vk::Format) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );
    Ok(unsafe { device.handle().create_image_view(&create_info, None)? })
}
