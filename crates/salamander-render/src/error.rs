// SPDX-License-Identifier: CEPL-1.0
//! Render error types.

use std::path::PathBuf;
use thiserror::Error;

/// Startup failures. All of them abort before the frame loop starts.
#[derive(Error, Debug)]
pub enum SetupError {
    /// The Vulkan loader library could not be found or loaded.
    #[error("Vulkan loader unavailable: {0}")]
    LoaderUnavailable(String),

    /// A validation layer was requested but is not installed.
    #[error("validation layer {0} requested, but not available")]
    ValidationLayerUnavailable(String),

    #[error("instance creation failed: {0}")]
    InstanceCreationFailed(String),

    #[error("surface creation failed: {0}")]
    SurfaceCreationFailed(String),

    /// The instance exposes no physical devices at all.
    #[error("no GPUs with Vulkan support found")]
    NoDeviceFound,

    /// Devices exist, but none has graphics + present queues and the
    /// required extensions for this surface.
    #[error("no GPU satisfies the graphics, present and extension requirements")]
    NoSuitableDevice,

    #[error("logical device creation failed: {0}")]
    DeviceCreationFailed(String),

    #[error("swap chain creation failed: {0}")]
    ChainCreationFailed(String),

    #[error("failed to load shader {}: {reason}", path.display())]
    ShaderLoadFailed { path: PathBuf, reason: String },

    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(String),

    /// Command pool, command buffers or synchronisation objects.
    #[error("frame resource creation failed: {0}")]
    FrameResourcesFailed(String),
}

/// Fatal failures inside the frame loop.
///
/// Out-of-date and suboptimal chains never show up here; the orchestrator
/// recovers from those by recreating the chain.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("waiting on the frame fence failed: {0}")]
    FenceWaitFailed(String),

    #[error("image acquisition failed: {0}")]
    AcquireFailed(String),

    #[error("command recording failed: {0}")]
    RecordFailed(String),

    #[error("queue submission failed: {0}")]
    FrameSubmitFailed(String),

    #[error("presentation failed: {0}")]
    PresentFailed(String),

    #[error("device lost")]
    DeviceLost,

    #[error("swap chain recreation failed: {0}")]
    RecreateFailed(#[from] SetupError),
}
