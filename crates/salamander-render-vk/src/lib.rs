// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: instance, device, swap chain, pipeline and frame slots,
//! driven by the backend-agnostic [`FrameOrchestrator`].

mod chain;
mod context;
mod device;
mod frame;
mod instance;
mod pipeline;

use context::RenderContext;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use salamander_render::{
    FrameBackend, FrameError, FrameOrchestrator, FrameOutcome, RenderSettings, RenderSize,
    Renderer, SetupError,
};
use tracing::info;

pub struct VkRenderer {
    ctx: RenderContext,
    orchestrator: FrameOrchestrator,
    size: RenderSize,
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self, SetupError> {
        let orchestrator = FrameOrchestrator::new(settings.frames_in_flight);
        let ctx = unsafe {
            RenderContext::new(window, display, size, settings, orchestrator.frames_in_flight())?
        };
        if ctx.chain_ready() {
            let extent = ctx.extent();
            info!(
                "Vulkan swap chain ready ({}x{}, {} frames in flight)",
                extent.width,
                extent.height,
                orchestrator.frames_in_flight()
            );
        } else {
            info!("Vulkan ready; swap chain waits for a surface with area");
        }
        Ok(Self {
            ctx,
            orchestrator,
            size,
        })
    }

    fn resize(&mut self, size: RenderSize) {
        let paused = size.is_empty();
        if paused != self.size.is_empty() {
            info!("vk: resize to {}x{} -> paused={paused}", size.width, size.height);
        }
        self.size = size;
        self.orchestrator.resize_flag().raise();
    }

    fn render(&mut self) -> Result<FrameOutcome, FrameError> {
        self.orchestrator.draw_frame(&mut self.ctx, self.size)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.ctx.set_clear_color(rgba);
    }
}
