// SPDX-License-Identifier: CEPL-1.0
//! Window-system glue. `winit` is re-exported so the app and the renderer
//! agree on one version of it.

pub use winit;

use salamander_render::RenderSize;
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            title: "Salamander".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

impl WindowSpec {
    /// Size is in physical pixels so the first chain matches it exactly.
    pub fn attributes(&self) -> WindowAttributes {
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(self.width, self.height))
            .with_resizable(self.resizable)
    }
}

pub fn to_render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Current drawable size of the window.
pub fn framebuffer_size(window: &Window) -> RenderSize {
    to_render_size(window.inner_size())
}
