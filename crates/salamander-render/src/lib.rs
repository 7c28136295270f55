// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic rendering surface.
//!
//! Holds the pieces every backend shares: sizes and settings, the
//! [`Renderer`] trait the application drives, the error taxonomy, and the
//! frame orchestrator that sequences wait/acquire/record/submit/present.

mod error;
mod frame;

pub use error::{FrameError, SetupError};
pub use frame::{
    Acquired, FrameBackend, FrameOrchestrator, FrameOutcome, Presented, Rebuilt, ResizeFlag,
    MAX_FRAMES_IN_FLIGHT,
};

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-area framebuffer, e.g. a minimised window.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self, SetupError>
    where
        Self: Sized;

    /// Records the new framebuffer size and marks the chain stale.
    /// The rebuild itself happens inside the next `render`.
    fn resize(&mut self, size: RenderSize);

    /// Runs one iteration of the frame loop.
    fn render(&mut self) -> Result<FrameOutcome, FrameError>;

    fn set_clear_color(&mut self, rgba: [f32; 4]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_empty() {
        assert!(RenderSize::new(0, 600).is_empty());
        assert!(RenderSize::new(800, 0).is_empty());
        assert!(!RenderSize::new(800, 600).is_empty());
    }

    #[test]
    fn default_settings_use_two_frames_in_flight() {
        let settings = RenderSettings::default();
        assert_eq!(settings.frames_in_flight, 2);
        assert_eq!(settings.vertex_shader, PathBuf::from("shaders/vert.spv"));
        assert_eq!(settings.fragment_shader, PathBuf::from("shaders/frag.spv"));
    }
}
