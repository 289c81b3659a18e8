//! Command buffer recording for one frame.

use ash::vk;

use vkr_rhi::RhiResult;
use vkr_rhi::command::CommandBuffer;

/// Per-frame details passed to an [`OverlayHook`].
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub frame_index: u64,
    pub slot: usize,
    pub image_index: u32,
    pub extent: vk::Extent2D,
}

/// Draws debug UI into the active render pass, once per frame.
pub trait OverlayHook {
    fn draw(&mut self, cmd: &CommandBuffer, frame: &FrameInfo);
}

/// Everything one draw of the mesh needs.
#[derive(Debug, Clone, Copy)]
pub struct FrameDraw {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Opaque black color, far depth. Order matches the render pass attachments;
/// the resolve attachment is not cleared.
pub fn clear_values() -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Record the whole frame into `cmd`, which must be in the initial state.
pub fn record_frame(
    cmd: &CommandBuffer,
    draw: &FrameDraw,
    frame: &FrameInfo,
    overlay: Option<&mut dyn OverlayHook>,
) -> RhiResult<()> {
    cmd.begin()?;

    let clear_values = clear_values();
    let begin_info = vk::RenderPassBeginInfo::default()
        .render_pass(draw.render_pass)
        .framebuffer(draw.framebuffer)
        .render_area(full_scissor(draw.extent))
        .clear_values(&clear_values);
    cmd.begin_render_pass(&begin_info);

    cmd.bind_graphics_pipeline(draw.pipeline);
    cmd.bind_vertex_buffers(0, &[draw.vertex_buffer], &[0]);
    cmd.bind_index_buffer(draw.index_buffer, 0, vk::IndexType::UINT32);
    cmd.set_viewport(&full_viewport(draw.extent));
    cmd.set_scissor(&full_scissor(draw.extent));
    cmd.bind_graphics_descriptor_sets(draw.pipeline_layout, 0, &[draw.descriptor_set]);
    cmd.draw_indexed(draw.index_count, 1, 0, 0, 0);

    if let Some(overlay) = overlay {
        overlay.draw(cmd, frame);
    }

    cmd.end_render_pass();
    cmd.end()
}
