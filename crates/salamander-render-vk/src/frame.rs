// SPDX-License-Identifier: CEPL-1.0
//! Per-slot command buffers and sync objects, plus command recording.

use crate::pipeline::PipelineState;
use ash::vk;
use salamander_render::SetupError;
use tracing::debug;

/// One in-flight frame. `in_flight` is created signaled so the first wait
/// on a fresh slot returns immediately.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSlot {
    unsafe fn new(
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
    ) -> Result<Self, vk::Result> {
        let mut slot = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            command_buffer,
        };
        if let Err(e) = slot.create_sync(device) {
            slot.destroy_sync(device);
            return Err(e);
        }
        Ok(slot)
    }

    unsafe fn create_sync(&mut self, device: &ash::Device) -> Result<(), vk::Result> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        self.image_available = device.create_semaphore(&sem_ci, None)?;
        self.render_finished = device.create_semaphore(&sem_ci, None)?;
        self.in_flight = device.create_fence(&fence_ci, None)?;
        Ok(())
    }

    unsafe fn destroy_sync(&mut self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
    }
}

/// Command pool and `N` frame slots.
pub struct FrameSlots {
    device: ash::Device,
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        count: usize,
    ) -> Result<Self, SetupError> {
        let fail =
            |what: &str, e: vk::Result| SetupError::FrameResourcesFailed(format!("{what}: {e}"));

        // Buffers are re-recorded every frame.
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let pool = device
            .create_command_pool(&pool_info, None)
            .map_err(|e| fail("command pool", e))?;

        let mut frames = Self {
            device: device.clone(),
            pool,
            slots: Vec::with_capacity(count),
        };

        let alloc = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let buffers = device
            .allocate_command_buffers(&alloc)
            .map_err(|e| fail("command buffers", e))?;

        for cb in buffers {
            match FrameSlot::new(device, cb) {
                Ok(slot) => frames.slots.push(slot),
                Err(e) => {
                    device.free_command_buffers(pool, &[cb]);
                    return Err(fail("sync objects", e));
                }
            }
        }
        debug!(count, "frame slots created");
        Ok(frames)
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        unsafe {
            // Free command buffers BEFORE destroying their pool
            let buffers: Vec<_> = self.slots.iter().map(|s| s.command_buffer).collect();
            if !buffers.is_empty() {
                self.device.free_command_buffers(self.pool, &buffers);
            }
            for slot in &mut self.slots {
                slot.destroy_sync(&self.device);
            }
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Full-extent viewport, depth 0..1.
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

/// Records one frame into `cmd`: clear, bind, set dynamic state, draw 3 vertices.
pub unsafe fn record_frame(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    pipeline: &PipelineState,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    clear: [f32; 4],
) -> Result<(), vk::Result> {
    device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
    device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue { float32: clear },
    }];
    let rp_begin = vk::RenderPassBeginInfo::default()
        .render_pass(pipeline.render_pass)
        .framebuffer(framebuffer)
        .render_area(full_scissor(extent))
        .clear_values(&clear_values);

    device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
    device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
    device.cmd_set_scissor(cmd, 0, &[full_scissor(extent)]);
    device.cmd_draw(cmd, 3, 1, 0, 0);
    device.cmd_end_render_pass(cmd);

    device.end_command_buffer(cmd)
}
