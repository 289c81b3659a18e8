//! Per-slot frame resources.
//!
//! Each frame in flight owns a command buffer, a host-mapped uniform buffer,
//! a descriptor set pointing at that uniform buffer, and the synchronization
//! objects that order its work:
//!
//! ```text
//! 1. Wait on in_flight fence (previous use of this slot has retired)
//! 2. Acquire swapchain image (signals image_available)
//! 3. Reset fence, write uniforms, record command_buffer
//! 4. Submit: wait image_available at COLOR_ATTACHMENT_OUTPUT,
//!    signal render_finished and in_flight
//! 5. Present (waits on render_finished)
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use vkr_rhi::RhiResult;
use vkr_rhi::buffer::{Buffer, BufferUsage};
use vkr_rhi::command::{CommandBuffer, CommandPool};
use vkr_rhi::device::Device;
use vkr_rhi::sync::{Fence, Semaphore, WAIT_FOREVER};

use crate::ubo::UniformBufferObject;

pub struct FrameData {
    command_buffer: CommandBuffer,
    uniform_buffer: Buffer,
    descriptor_set: vk::DescriptorSet,
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameData {
    fn new(
        device: Arc<Device>,
        command_buffer: CommandBuffer,
        descriptor_set: vk::DescriptorSet,
        uniform_buffer: Buffer,
    ) -> RhiResult<Self> {
        Ok(Self {
            command_buffer,
            uniform_buffer,
            descriptor_set,
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            // Signaled so the first wait on a fresh slot returns immediately.
            in_flight: Fence::new(device, true)?,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }

    pub fn wait(&self) -> RhiResult<()> {
        self.in_flight.wait(WAIT_FOREVER)
    }

    /// Only valid after [`wait`](Self::wait): the GPU may still read the
    /// buffer otherwise.
    pub fn write_uniforms(&self, ubo: &UniformBufferObject) -> RhiResult<()> {
        self.uniform_buffer.write_data(0, ubo.as_bytes())
    }

    /// Submit the recorded command buffer on the graphics queue.
    pub fn submit(&self, device: &Device) -> RhiResult<()> {
        let wait_semaphores = [self.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished.handle()];
        let command_buffers = [self.command_buffer.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: all handles are owned by this slot and the fence was reset
        // by the caller after its wait returned.
        unsafe { device.submit_graphics(std::slice::from_ref(&submit_info), self.in_flight.handle()) }
    }
}

/// The ring of frame slots, indexed by `frame_counter % len`.
pub struct FrameManager {
    frames: Vec<FrameData>,
}

impl FrameManager {
    /// One slot per descriptor set. Uniform buffers are created here, one per
    /// slot, and written into each set by the caller beforehand.
    pub fn new(
        device: Arc<Device>,
        command_pool: &CommandPool,
        descriptor_sets: &[vk::DescriptorSet],
        uniform_buffers: Vec<Buffer>,
    ) -> RhiResult<Self> {
        let count = descriptor_sets.len();
        let command_buffers = command_pool.allocate(count as u32)?;

        let mut frames = Vec::with_capacity(count);
        for (i, ((command_buffer, &set), uniform_buffer)) in command_buffers
            .into_iter()
            .zip(descriptor_sets)
            .zip(uniform_buffers)
            .enumerate()
        {
            frames.push(FrameData::new(device.clone(), command_buffer, set, uniform_buffer)?);
            debug!("Created frame slot {}", i);
        }

        info!("Frame manager created with {} frames in flight", frames.len());
        Ok(Self { frames })
    }

    /// Slot for `index`, wrapping around the ring.
    #[inline]
    pub fn slot(&self, index: usize) -> &FrameData {
        &self.frames[index % self.frames.len()]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Host-visible uniform buffers, one per frame slot.
pub fn create_uniform_buffers(device: &Arc<Device>, count: usize) -> RhiResult<Vec<Buffer>> {
    (0..count)
        .map(|_| {
            Buffer::new(
                device.clone(),
                BufferUsage::Uniform,
                UniformBufferObject::SIZE as vk::DeviceSize,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_manager_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameManager>();
        assert_send::<FrameData>();
    }
}
