//! The swapchain and everything derived from it.
//!
//! [`SwapchainTargets`] owns the swapchain (with its image views), the MSAA
//! color attachment, the depth attachment and one framebuffer per swapchain
//! image. Fields drop in declaration order, so framebuffers go first and the
//! swapchain last.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use vkr_core::VsyncMode;
use vkr_platform::Surface;
use vkr_rhi::command::CommandPool;
use vkr_rhi::device::Device;
use vkr_rhi::image::{Image, ImageDesc};
use vkr_rhi::instance::Instance;
use vkr_rhi::render_pass::{Framebuffer, RenderPass};
use vkr_rhi::swapchain::Swapchain;
use vkr_rhi::transfer::{one_shot, transition_image_layout};
use vkr_rhi::{RhiError, RhiResult};

/// Long-lived objects a swapchain rebuild depends on.
pub struct TargetContext<'a> {
    pub instance: &'a Instance,
    pub device: &'a Arc<Device>,
    pub surface: &'a Surface,
    pub command_pool: &'a CommandPool,
    pub render_pass: &'a RenderPass,
    /// Format the render pass was created with.
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub vsync: VsyncMode,
}

pub fn create_swapchain(
    instance: &Instance,
    device: &Arc<Device>,
    surface: &Surface,
    extent: (u32, u32),
    vsync: VsyncMode,
) -> RhiResult<Swapchain> {
    Swapchain::new(
        instance,
        device.clone(),
        surface.handle(),
        surface.loader(),
        vk::Extent2D {
            width: extent.0,
            height: extent.1,
        },
        vsync,
    )
}

pub struct SwapchainTargets {
    framebuffers: Vec<Framebuffer>,
    // Referenced only through the framebuffers.
    _depth: Image,
    _color: Image,
    swapchain: Swapchain,
}

impl SwapchainTargets {
    /// Create a swapchain at `extent` and its dependent attachments.
    pub fn build(ctx: &TargetContext<'_>, extent: (u32, u32)) -> RhiResult<Self> {
        let swapchain = create_swapchain(ctx.instance, ctx.device, ctx.surface, extent, ctx.vsync)?;
        Self::from_swapchain(ctx, swapchain)
    }

    /// Build attachments and framebuffers for an existing swapchain.
    pub fn from_swapchain(ctx: &TargetContext<'_>, swapchain: Swapchain) -> RhiResult<Self> {
        if swapchain.format() != ctx.color_format {
            return Err(RhiError::SwapchainError(format!(
                "surface format changed from {:?} to {:?}",
                ctx.color_format,
                swapchain.format()
            )));
        }

        let extent = swapchain.extent();
        let samples = ctx.device.msaa_samples();

        let color = Image::new(
            ctx.device.clone(),
            ImageDesc::color_attachment(extent, swapchain.format(), samples),
        )?;
        let depth = Image::new(
            ctx.device.clone(),
            ImageDesc::depth_attachment(extent, ctx.depth_format, samples),
        )?;

        one_shot(ctx.command_pool, |cmd| {
            transition_image_layout(
                cmd,
                depth.handle(),
                ctx.depth_format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                1,
            )
        })?;

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(
                    ctx.device.clone(),
                    ctx.render_pass,
                    &[color.view(), depth.view(), view],
                    extent,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        info!(
            "Swapchain targets ready: {}x{}, {:?}, {:?}, {} framebuffers",
            extent.width,
            extent.height,
            swapchain.color_space(),
            swapchain.present_mode(),
            framebuffers.len()
        );

        Ok(Self {
            framebuffers,
            _depth: depth,
            _color: color,
            swapchain,
        })
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn framebuffer(&self, image_index: u32) -> RhiResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| {
                RhiError::SwapchainError(format!(
                    "image index {} out of range ({} framebuffers)",
                    image_index,
                    self.framebuffers.len()
                ))
            })
    }
}
