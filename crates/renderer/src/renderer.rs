//! Main renderer orchestration.
//!
//! [`Renderer`] owns every Vulkan object for a single window and implements
//! [`FrameBackend`] so the [`FrameScheduler`] can drive it.
//!
//! # Resource destruction order
//!
//! Fields are declared so that Rust's drop order releases them correctly:
//! frame slots, swapchain targets, pipeline objects, descriptors, the render
//! pass, mesh and texture resources, the command pool, the device, the
//! surface and finally the instance. [`Drop`] waits for the device to go idle
//! before any of that runs.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use vkr_core::{EngineConfig, VsyncMode};
use vkr_platform::{PresentationHost, ResizeFlag, Surface, Window};
use vkr_resources::{load_mesh, load_texture};
use vkr_rhi::buffer::{Buffer, BufferUsage};
use vkr_rhi::command::CommandPool;
use vkr_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, frame_pool_sizes, frame_set_bindings, write_frame_set,
};
use vkr_rhi::device::Device;
use vkr_rhi::image::Image;
use vkr_rhi::instance::{Instance, InstanceDesc};
use vkr_rhi::physical_device::{PhysicalDeviceInfo, select_physical_device};
use vkr_rhi::pipeline::{GraphicsPipelineBuilder, MIN_SAMPLE_SHADING, Pipeline, PipelineLayout};
use vkr_rhi::render_pass::RenderPass;
use vkr_rhi::sampler::{Sampler, texture_sampler_info};
use vkr_rhi::shader::{Shader, ShaderStage};
use vkr_rhi::swapchain::{AcquireOutcome, PresentOutcome};
use vkr_rhi::transfer::{TEXTURE_FORMAT, upload_buffer, upload_texture};
use vkr_rhi::vertex::Vertex;
use vkr_rhi::{RhiError, RhiResult};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::RendererResult;
use crate::frame_manager::{FrameManager, create_uniform_buffers};
use crate::recorder::{FrameDraw, FrameInfo, OverlayHook, record_frame};
use crate::scheduler::{FrameBackend, FrameOutcome, FrameScheduler, wait_for_drawable_extent};
use crate::swapchain_state::{SwapchainTargets, TargetContext, create_swapchain};
use crate::ubo::UniformBufferObject;

/// Size for the first swapchain, waiting out a minimized window.
fn initial_extent<H: PresentationHost + ?Sized>(host: &mut H) -> RendererResult<(u32, u32)> {
    wait_for_drawable_extent(host).ok_or_else(|| {
        vkr_core::Error::Window("window closed before it had a drawable size".to_string()).into()
    })
}

/// Device-local mesh buffers.
struct MeshBuffers {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

pub struct Renderer {
    frames: FrameManager,
    /// `None` only between teardown and rebuild inside a recreation.
    targets: Option<SwapchainTargets>,

    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    _descriptor_pool: DescriptorPool,
    _descriptor_set_layout: DescriptorSetLayout,
    render_pass: RenderPass,

    _texture_sampler: Sampler,
    _texture: Image,
    mesh: MeshBuffers,

    command_pool: CommandPool,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,

    physical_device: PhysicalDeviceInfo,
    color_format: vk::Format,
    depth_format: vk::Format,
    vsync: VsyncMode,

    resize: ResizeFlag,
    overlay: Option<Box<dyn OverlayHook>>,
    frames_submitted: u64,
}

impl Renderer {
    /// Build every GPU object for `window`. Blocks while the window has no
    /// drawable area.
    pub fn new(config: &EngineConfig, window: &mut Window) -> RendererResult<Self> {
        let graphics = &config.graphics;
        let assets = &config.assets;

        // ===== Instance, surface and device =====

        let surface_extensions = window.required_extensions()?;
        let instance = Instance::new(&InstanceDesc {
            application_name: c"vkr",
            enable_validation: graphics.validation,
            surface_extensions: &surface_extensions,
        })?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device = select_physical_device(
            instance.handle(),
            surface.handle(),
            surface.loader(),
            graphics.device_selection,
        )?;
        let device = Device::new(&instance, &physical_device)?;
        let command_pool = CommandPool::new(device.clone(), device.queue_families().graphics)?;

        // ===== Swapchain, render pass and targets =====

        let depth_format = physical_device.find_depth_format(instance.handle())?;
        let extent = initial_extent(window)?;
        let swapchain = create_swapchain(&instance, &device, &surface, extent, graphics.vsync_mode)?;
        let color_format = swapchain.format();

        let render_pass = RenderPass::new(
            device.clone(),
            color_format,
            depth_format,
            device.msaa_samples(),
        )?;

        let targets = SwapchainTargets::from_swapchain(
            &TargetContext {
                instance: &instance,
                device: &device,
                surface: &surface,
                command_pool: &command_pool,
                render_pass: &render_pass,
                color_format,
                depth_format,
                vsync: graphics.vsync_mode,
            },
            swapchain,
        )?;

        // ===== Pipeline =====

        let descriptor_set_layout = DescriptorSetLayout::new(device.clone(), &frame_set_bindings())?;
        let pipeline_layout = PipelineLayout::new(device.clone(), &[descriptor_set_layout.handle()])?;

        let vertex_shader =
            Shader::from_spirv_file(device.clone(), &assets.vertex_shader, ShaderStage::Vertex)?;
        let fragment_shader =
            Shader::from_spirv_file(device.clone(), &assets.fragment_shader, ShaderStage::Fragment)?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .rasterization_samples(device.msaa_samples())
            .sample_shading(device.sample_rate_shading().then_some(MIN_SAMPLE_SHADING))
            .build(device.clone(), &pipeline_layout, &render_pass)?;

        // ===== Mesh and texture =====

        let mesh = load_mesh(&assets.model)?;
        let mesh = MeshBuffers {
            vertex_buffer: upload_buffer(
                &device,
                &command_pool,
                BufferUsage::Vertex,
                bytemuck::cast_slice(&mesh.vertices),
            )?,
            index_buffer: upload_buffer(
                &device,
                &command_pool,
                BufferUsage::Index,
                bytemuck::cast_slice(&mesh.indices),
            )?,
            index_count: mesh.index_count(),
        };

        let texture_data = load_texture(&assets.texture)?;
        let texture = upload_texture(
            &device,
            &command_pool,
            &physical_device.format_properties(instance.handle(), TEXTURE_FORMAT),
            texture_data.width,
            texture_data.height,
            &texture_data.pixels,
        )?;
        let texture_sampler = Sampler::new(
            device.clone(),
            &texture_sampler_info(texture.mip_levels(), physical_device.max_sampler_anisotropy()),
        )?;

        // ===== Frame slots =====

        let (pool_sizes, max_sets) = frame_pool_sizes(MAX_FRAMES_IN_FLIGHT as u32);
        let descriptor_pool = DescriptorPool::new(device.clone(), max_sets, &pool_sizes)?;
        let descriptor_sets = descriptor_pool.allocate(&descriptor_set_layout, MAX_FRAMES_IN_FLIGHT)?;
        let uniform_buffers = create_uniform_buffers(&device, MAX_FRAMES_IN_FLIGHT)?;

        for (&set, uniform_buffer) in descriptor_sets.iter().zip(&uniform_buffers) {
            write_frame_set(
                &device,
                set,
                vk::DescriptorBufferInfo::default()
                    .buffer(uniform_buffer.handle())
                    .offset(0)
                    .range(UniformBufferObject::SIZE as vk::DeviceSize),
                vk::DescriptorImageInfo::default()
                    .sampler(texture_sampler.handle())
                    .image_view(texture.view())
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            );
        }

        let frames = FrameManager::new(
            device.clone(),
            &command_pool,
            &descriptor_sets,
            uniform_buffers,
        )?;

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight, {} indices",
            targets.swapchain().image_count(),
            MAX_FRAMES_IN_FLIGHT,
            mesh.index_count
        );

        Ok(Self {
            frames,
            targets: Some(targets),
            pipeline,
            pipeline_layout,
            _descriptor_pool: descriptor_pool,
            _descriptor_set_layout: descriptor_set_layout,
            render_pass,
            _texture_sampler: texture_sampler,
            _texture: texture,
            mesh,
            command_pool,
            device,
            surface,
            instance,
            physical_device,
            color_format,
            depth_format,
            vsync: graphics.vsync_mode,
            resize: window.resize_flag(),
            overlay: None,
            frames_submitted: 0,
        })
    }

    /// Install a hook that draws into every frame's render pass.
    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayHook>) {
        self.overlay = Some(overlay);
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Poll events and render frames until the host closes, then wait for
    /// the GPU to finish.
    pub fn run<H: PresentationHost>(&mut self, host: &mut H) -> RendererResult<()> {
        let mut scheduler = FrameScheduler::new(self.frames.len());
        let resize = self.resize.clone();
        info!("Entering render loop");

        let result = loop {
            host.poll_events();
            if host.should_close() {
                break Ok(());
            }
            match scheduler.step(self, host, &resize) {
                Ok(FrameOutcome::Closing) => break Ok(()),
                Ok(FrameOutcome::SwapchainRebuilt(reason)) => {
                    debug!("Frame {} rebuilt swapchain ({:?})", scheduler.frame_counter(), reason)
                }
                Ok(FrameOutcome::Presented) => {}
                Err(e) => break Err(e),
            }
        };

        info!(
            "Leaving render loop after {} frame attempts",
            scheduler.frame_counter()
        );
        self.device.wait_idle()?;
        result.map_err(Into::into)
    }

    fn targets(&self) -> RhiResult<&SwapchainTargets> {
        self.targets
            .as_ref()
            .ok_or_else(|| RhiError::SwapchainError("swapchain is not built".to_string()))
    }
}

impl FrameBackend for Renderer {
    type Error = RhiError;

    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.frames.slot(slot).wait()
    }

    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        let frame = self.frames.slot(slot);
        self.targets()?
            .swapchain()
            .acquire_next_image(frame.image_available().handle())
    }

    fn record_and_submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let targets = self.targets()?;
        let extent = targets.extent();
        let frame = self.frames.slot(slot);

        frame.in_flight().reset()?;
        frame.write_uniforms(&UniformBufferObject::for_extent(extent.width, extent.height))?;

        let draw = FrameDraw {
            render_pass: self.render_pass.handle(),
            framebuffer: targets.framebuffer(image_index)?,
            extent,
            pipeline: self.pipeline.handle(),
            pipeline_layout: self.pipeline_layout.handle(),
            descriptor_set: frame.descriptor_set(),
            vertex_buffer: self.mesh.vertex_buffer.handle(),
            index_buffer: self.mesh.index_buffer.handle(),
            index_count: self.mesh.index_count,
        };
        let info = FrameInfo {
            frame_index: self.frames_submitted,
            slot,
            image_index,
            extent,
        };

        let overlay: Option<&mut dyn OverlayHook> = match &mut self.overlay {
            Some(overlay) => Some(overlay.as_mut()),
            None => None,
        };

        let cmd = frame.command_buffer();
        cmd.reset()?;
        record_frame(cmd, &draw, &info, overlay)?;
        frame.submit(&self.device)?;

        self.frames_submitted += 1;
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        let frame = self.frames.slot(slot);
        self.targets()?.swapchain().present(
            self.device.present_queue(),
            image_index,
            frame.render_finished().handle(),
        )
    }

    fn recreate_swapchain(&mut self, extent: (u32, u32)) -> RhiResult<()> {
        self.device.wait_idle()?;

        // Everything swapchain-derived is destroyed before the rebuild.
        self.targets = None;

        let ctx = TargetContext {
            instance: &self.instance,
            device: &self.device,
            surface: &self.surface,
            command_pool: &self.command_pool,
            render_pass: &self.render_pass,
            color_format: self.color_format,
            depth_format: self.depth_format,
            vsync: self.vsync,
        };
        self.targets = Some(SwapchainTargets::build(&ctx, extent)?);
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {:?}", e);
        }
        info!("Destroying renderer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RendererError;

    struct SizedHost {
        sizes: Vec<(u32, u32)>,
        waits: usize,
        closing: bool,
    }

    impl PresentationHost for SizedHost {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.sizes[self.waits.min(self.sizes.len() - 1)]
        }

        fn should_close(&self) -> bool {
            self.closing
        }

        fn poll_events(&mut self) {}

        fn wait_events(&mut self) {
            self.waits += 1;
        }
    }

    #[test]
    fn test_initial_extent_waits_while_minimized() {
        let mut host = SizedHost {
            sizes: vec![(0, 0), (0, 0), (1280, 720)],
            waits: 0,
            closing: false,
        };

        assert_eq!(initial_extent(&mut host).unwrap(), (1280, 720));
        assert_eq!(host.waits, 2);
    }

    #[test]
    fn test_initial_extent_fails_when_closed_while_minimized() {
        let mut host = SizedHost {
            sizes: vec![(0, 0)],
            waits: 0,
            closing: true,
        };

        let err = initial_extent(&mut host).unwrap_err();
        assert!(matches!(err, RendererError::Platform(vkr_core::Error::Window(_))));
        assert_eq!(host.waits, 0);
    }
}
