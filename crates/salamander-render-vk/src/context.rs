// SPDX-License-Identifier: CEPL-1.0
//! The aggregate that owns every Vulkan object and drives the frame backend.

use crate::chain::ChainState;
use crate::device::{select_device, LogicalDeviceContext};
use crate::frame::{record_frame, FrameSlots};
use crate::instance::InstanceContext;
use crate::pipeline::{Framebuffers, PipelineState, ShaderCode};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use salamander_render::{
    Acquired, FrameBackend, FrameError, Presented, Rebuilt, RenderSettings, RenderSize,
    SetupError,
};
use tracing::{debug, info};

/// `DEVICE_LOST` is reported as such; anything else goes through `wrap`.
fn fatal(err: vk::Result, wrap: fn(String) -> FrameError) -> FrameError {
    if err == vk::Result::ERROR_DEVICE_LOST {
        FrameError::DeviceLost
    } else {
        wrap(err.to_string())
    }
}

// STRICT TEARDOWN ORDER:
// - Wait for the device to go idle (Drop below)
// - Frame slots (sync objects, command buffers, pool)
// - Framebuffers BEFORE the image views they wrap
// - Pipeline, layout and render pass
// - Image views, then the swap chain
// - Logical device
// - Surface, debug messenger, instance last
// Fields drop in declaration order, so the field list IS the teardown order.
pub struct RenderContext {
    frames: FrameSlots,
    framebuffers: Framebuffers,
    pipeline: PipelineState,
    chain: ChainState,
    shaders: ShaderCode,
    clear_color: [f32; 4],
    device: LogicalDeviceContext,
    instance: InstanceContext,
}

impl RenderContext {
    /// STRICT ORDER: instance + surface, device, shaders, chain, pipeline,
    /// framebuffers, frame slots. On failure everything built so far is
    /// released by its owner's Drop.
    ///
    /// A zero-area surface leaves the chain empty; the first frame with area
    /// builds it.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        frames_in_flight: usize,
    ) -> Result<Self, SetupError> {
        let instance = InstanceContext::new(window, display)?;
        let device = select_device(&instance)?;
        // Shaders MUST load before any chain or pipeline object exists, so a
        // bad path fails with nothing size-dependent to unwind.
        let shaders = ShaderCode::load(&settings.vertex_shader, &settings.fragment_shader)?;
        let chain = ChainState::create(&instance, &device, size)?;
        let pipeline = PipelineState::build(&device.device, chain.format.format, &shaders)?;
        let framebuffers = Framebuffers::create(&device.device, pipeline.render_pass, &chain)?;
        let frames = FrameSlots::new(&device.device, device.graphics_family, frames_in_flight)?;

        info!(
            images = chain.image_count(),
            chain_ready = chain.is_ready(),
            frames_in_flight,
            "render context ready"
        );

        Ok(Self {
            frames,
            framebuffers,
            pipeline,
            chain,
            shaders,
            clear_color: settings.clear_color,
            device,
            instance,
        })
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent
    }

    /// Tears down size-dependent objects and rebuilds them at `size`.
    /// Render pass and pipeline survive unless the surface format changed.
    /// When the surface has no area the chain is left empty and `Deferred`
    /// is returned.
    unsafe fn recreate(&mut self, size: RenderSize) -> Result<Rebuilt, FrameError> {
        self.device
            .device
            .device_wait_idle()
            .map_err(|e| fatal(e, FrameError::FenceWaitFailed))?;

        self.framebuffers.destroy();
        self.chain.destroy();

        self.chain = ChainState::create(&self.instance, &self.device, size)?;
        if !self.chain.is_ready() {
            return Ok(Rebuilt::Deferred);
        }
        if self.chain.format.format != self.pipeline.format {
            info!(
                old = ?self.pipeline.format,
                new = ?self.chain.format.format,
                "surface format changed; rebuilding pipeline"
            );
            self.pipeline.destroy();
            self.pipeline =
                PipelineState::build(&self.device.device, self.chain.format.format, &self.shaders)?;
        }
        self.framebuffers =
            Framebuffers::create(&self.device.device, self.pipeline.render_pass, &self.chain)?;

        debug!(
            width = self.chain.extent.width,
            height = self.chain.extent.height,
            images = self.chain.image_count(),
            "swap chain recreated"
        );
        Ok(Rebuilt::Ready)
    }
}

impl FrameBackend for RenderContext {
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = self.frames.slot(slot).in_flight;
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(|e| fatal(e, FrameError::FenceWaitFailed))
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, FrameError> {
        let semaphore = self.frames.slot(slot).image_available;
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.chain.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(fatal(e, FrameError::AcquireFailed)),
        }
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<(), FrameError> {
        let framebuffer = self.framebuffers.get(image_index).ok_or_else(|| {
            FrameError::RecordFailed(format!("no framebuffer for image {image_index}"))
        })?;
        let cmd = self.frames.slot(slot).command_buffer;
        unsafe {
            record_frame(
                &self.device.device,
                cmd,
                &self.pipeline,
                framebuffer,
                self.chain.extent,
                self.clear_color,
            )
        }
        .map_err(|e| fatal(e, FrameError::RecordFailed))
    }

    fn reset_fence(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = self.frames.slot(slot).in_flight;
        unsafe { self.device.device.reset_fences(&[fence]) }
            .map_err(|e| fatal(e, FrameError::FrameSubmitFailed))
    }

    fn submit(&mut self, slot: usize) -> Result<(), FrameError> {
        let frame = *self.frames.slot(slot);
        let wait = [frame.image_available];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let cmds = [frame.command_buffer];
        let signal = [frame.render_finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signal);
        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit], frame.in_flight)
        }
        .map_err(|e| fatal(e, FrameError::FrameSubmitFailed))
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<Presented, FrameError> {
        let wait = [self.frames.slot(slot).render_finished];
        let swapchains = [self.chain.swapchain];
        let indices = [image_index];
        let present = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &present)
        } {
            Ok(false) => Ok(Presented::Optimal),
            // Suboptimal counts as stale.
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::Stale),
            Err(e) => Err(fatal(e, FrameError::PresentFailed)),
        }
    }

    fn recreate_chain(&mut self, size: RenderSize) -> Result<Rebuilt, FrameError> {
        unsafe { self.recreate(size) }
    }

    fn chain_ready(&self) -> bool {
        self.chain.is_ready()
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        // Nothing may be in use when the owned fields start dropping.
        unsafe {
            let _ = self.device.device.device_wait_idle();
        }
        info!("render context shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_is_its_own_error() {
        assert!(matches!(
            fatal(vk::Result::ERROR_DEVICE_LOST, FrameError::FrameSubmitFailed),
            FrameError::DeviceLost
        ));
    }

    #[test]
    fn other_errors_keep_their_stage() {
        match fatal(vk::Result::ERROR_OUT_OF_HOST_MEMORY, FrameError::PresentFailed) {
            FrameError::PresentFailed(msg) => assert!(!msg.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
