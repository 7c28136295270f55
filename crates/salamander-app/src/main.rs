// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{load_cfg, AppCfg, Args};
use salamander_core::init_tracing;
use salamander_platform::{framebuffer_size, to_render_size};
use salamander_render::{FrameOutcome, RenderSize, Renderer};
use salamander_render_vk::VkRenderer;
use std::time::Instant;
use tracing::{error, info, trace};

use salamander_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

struct App {
    cfg: AppCfg,
    // Renderer before window: it must be torn down while the surface's window exists.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    exiting: bool,
    fatal: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            cfg,
            renderer: None,
            window: None,
            render_size: RenderSize::new(0, 0),
            exiting: false,
            fatal: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop
            .create_window(self.cfg.window_spec().attributes())
            .context("create_window")?;
        self.render_size = framebuffer_size(&window);

        let renderer = VkRenderer::new(
            &window,
            &window,
            self.render_size,
            &self.cfg.render_settings(),
        )
        .context("Vulkan init")?;

        info!(
            "window {}x{} ready",
            self.render_size.width, self.render_size.height
        );
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Stops the loop; the renderer drops first, which waits for the device to go idle.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop, err: Option<anyhow::Error>) {
        if let Some(e) = &err {
            error!("fatal: {e:#}");
        }
        self.fatal = err;
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.init(event_loop) {
                self.shutdown(event_loop, Some(e));
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop, None);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = to_render_size(new_size);
                info!(
                    "Resized -> {}x{}",
                    self.render_size.width, self.render_size.height
                );
                if let Some(r) = &mut self.renderer {
                    r.resize(self.render_size);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                match renderer.render() {
                    Ok(FrameOutcome::Presented { slot, image_index }) => {
                        trace!(slot, image_index, "frame presented");
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(FrameOutcome::Recreated) => {
                        trace!("swap chain recreated");
                    }
                    Ok(FrameOutcome::Skipped) => {}
                    Err(e) => {
                        let err = anyhow::Error::new(e).context("frame loop");
                        self.shutdown(event_loop, Some(err));
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.render_size.is_empty() {
            // Minimised: sleep until the next event.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => {
            info!("clean shutdown");
            Ok(())
        }
    }
}
