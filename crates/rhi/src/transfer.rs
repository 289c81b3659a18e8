//! Host-to-device uploads, layout transitions and mipmap generation.
//!
//! Every operation here records into a one-shot command buffer, submits it to
//! the graphics queue and blocks until the queue is idle. When a function
//! returns, the GPU work is complete and any staging buffer has been released.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc};
use crate::physical_device::has_stencil_component;

/// Format used for every uploaded texture.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// A command buffer that is recorded once, submitted, waited on and freed.
pub struct OneShotCommands<'a> {
    pool: &'a CommandPool,
    buffer: Option<CommandBuffer>,
}

impl<'a> OneShotCommands<'a> {
    pub fn begin(pool: &'a CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate_one()?;
        let this = Self {
            pool,
            buffer: Some(buffer),
        };
        this.cmd()?.begin_one_time()?;
        Ok(this)
    }

    pub fn cmd(&self) -> RhiResult<&CommandBuffer> {
        self.buffer
            .as_ref()
            .ok_or_else(|| RhiError::BufferError("one-shot command buffer already freed".into()))
    }

    /// End recording, submit, and wait for the graphics queue to drain.
    pub fn submit(self) -> RhiResult<()> {
        let cmd = self.cmd()?;
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let device = self.pool.device();
        unsafe {
            device.submit_graphics(std::slice::from_ref(&submit_info), vk::Fence::null())?;
        }
        device.wait_graphics_idle()
    }
}

impl Drop for OneShotCommands<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.free(buffer);
        }
    }
}

/// Record with `record` and run the result to completion.
pub fn one_shot<F>(pool: &CommandPool, record: F) -> RhiResult<()>
where
    F: FnOnce(&CommandBuffer) -> RhiResult<()>,
{
    let commands = OneShotCommands::begin(pool)?;
    record(commands.cmd()?)?;
    commands.submit()
}

/// Copy `bytes` into a new device-local buffer through a staging buffer.
pub fn upload_buffer(
    device: &Arc<Device>,
    pool: &CommandPool,
    usage: BufferUsage,
    bytes: &[u8],
) -> RhiResult<Buffer> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = Buffer::new_with_data(device.clone(), BufferUsage::Staging, bytes)?;
    let buffer = Buffer::new(device.clone(), usage, size)?;

    one_shot(pool, |cmd| {
        let region = vk::BufferCopy::default().size(size);
        cmd.copy_buffer(staging.handle(), buffer.handle(), std::slice::from_ref(&region));
        Ok(())
    })?;

    debug!("Uploaded {} bytes into {} buffer", size, usage.name());
    Ok(buffer)
}

// ===== Layout transitions =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Access and stage masks for the supported layout pairs.
pub fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> RhiResult<TransitionMasks> {
    use vk::ImageLayout as L;

    let masks = match (old_layout, new_layout) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        },
        (old, new) => return Err(RhiError::UnsupportedTransition { old, new }),
    };
    Ok(masks)
}

pub fn transition_aspect(format: vk::Format, new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Record a barrier moving all `mip_levels` of `image` between layouts.
pub fn transition_image_layout(
    cmd: &CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    mip_levels: u32,
) -> RhiResult<()> {
    let masks = transition_masks(old_layout, new_layout)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(transition_aspect(format, new_layout))
                .base_mip_level(0)
                .level_count(mip_levels)
                .base_array_layer(0)
                .layer_count(1),
        )
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    cmd.pipeline_barrier(
        masks.src_stage,
        masks.dst_stage,
        std::slice::from_ref(&barrier),
    );
    Ok(())
}

// ===== Mipmaps =====

/// `floor(log2(max(width, height))) + 1`.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Size of `level`, halving per level and never dropping below 1.
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    let shrink = |v: u32| v.checked_shr(level).unwrap_or(0).max(1);
    (shrink(width), shrink(height))
}

/// One blit in the mip chain: level `dst_level - 1` into `dst_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipBlit {
    pub dst_level: u32,
    pub src_extent: (u32, u32),
    pub dst_extent: (u32, u32),
}

pub fn mip_blits(width: u32, height: u32, mip_levels: u32) -> Vec<MipBlit> {
    (1..mip_levels)
        .map(|level| MipBlit {
            dst_level: level,
            src_extent: mip_extent(width, height, level - 1),
            dst_extent: mip_extent(width, height, level),
        })
        .collect()
}

/// Linear blits need `SAMPLED_IMAGE_FILTER_LINEAR` on optimal tiling.
pub fn check_linear_blit_support(
    format: vk::Format,
    properties: &vk::FormatProperties,
) -> RhiResult<()> {
    if properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        Ok(())
    } else {
        Err(RhiError::UnsupportedFormat(format))
    }
}

fn offset_of_extent((width, height): (u32, u32)) -> vk::Offset3D {
    vk::Offset3D {
        x: width as i32,
        y: height as i32,
        z: 1,
    }
}

fn mip_barrier(image: vk::Image, level: u32) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .image(image)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(level)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
}

/// Fill levels `1..mip_levels` by successive linear blits and leave every
/// level in `SHADER_READ_ONLY_OPTIMAL`.
///
/// All levels must be in `TRANSFER_DST_OPTIMAL` on entry, with level 0
/// holding the source pixels.
pub fn generate_mipmaps(
    cmd: &CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) {
    for blit in mip_blits(width, height, mip_levels) {
        let src_level = blit.dst_level - 1;

        let to_src = mip_barrier(image, src_level)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            std::slice::from_ref(&to_src),
        );

        let region = vk::ImageBlit::default()
            .src_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(src_level)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .src_offsets([vk::Offset3D::default(), offset_of_extent(blit.src_extent)])
            .dst_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(blit.dst_level)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .dst_offsets([vk::Offset3D::default(), offset_of_extent(blit.dst_extent)]);
        cmd.blit_image(image, &region, vk::Filter::LINEAR);

        let to_shader = mip_barrier(image, src_level)
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_access_mask(vk::AccessFlags::TRANSFER_READ)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            std::slice::from_ref(&to_shader),
        );
    }

    // The last level is only ever a blit target.
    let last = mip_barrier(image, mip_levels.saturating_sub(1))
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ);
    cmd.pipeline_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        std::slice::from_ref(&last),
    );
}

/// Upload tightly packed RGBA8 pixels into a mipmapped sampled texture.
///
/// `format_properties` are the device's properties for [`TEXTURE_FORMAT`].
pub fn upload_texture(
    device: &Arc<Device>,
    pool: &CommandPool,
    format_properties: &vk::FormatProperties,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> RhiResult<Image> {
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected {
        return Err(RhiError::BufferError(format!(
            "texture {}x{} needs {} bytes of RGBA8, got {}",
            width,
            height,
            expected,
            pixels.len()
        )));
    }
    check_linear_blit_support(TEXTURE_FORMAT, format_properties)?;

    let mip_levels = mip_level_count(width, height);
    let extent = vk::Extent2D { width, height };
    let image = Image::new(
        device.clone(),
        ImageDesc::texture(extent, TEXTURE_FORMAT, mip_levels),
    )?;
    let staging = Buffer::new_with_data(device.clone(), BufferUsage::Staging, pixels)?;

    one_shot(pool, |cmd| {
        transition_image_layout(
            cmd,
            image.handle(),
            TEXTURE_FORMAT,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            mip_levels,
        )?;

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });
        cmd.copy_buffer_to_image(
            staging.handle(),
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );

        generate_mipmaps(cmd, image.handle(), width, height, mip_levels);
        Ok(())
    })?;

    info!(
        "Texture uploaded: {}x{}, {} mip levels",
        width, height, mip_levels
    );
    Ok(image)
}
