// SPDX-License-Identifier: CEPL-1.0
//! Swap chain: surface support queries, selection policy and the chain itself.

use crate::device::LogicalDeviceContext;
use crate::instance::InstanceContext;
use ash::khr::swapchain;
use ash::vk;
use salamander_render::{RenderSize, SetupError};
use tracing::{debug, info};

/// Surface support for one physical device. Always queried fresh, never cached.
#[derive(Clone, Debug, Default)]
pub struct SwapChainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapChainSupport {
    pub unsafe fn query(
        ictx: &InstanceContext,
        phys: vk::PhysicalDevice,
    ) -> Result<Self, vk::Result> {
        let loader = &ictx.surface_loader;
        Ok(Self {
            capabilities: loader.get_physical_device_surface_capabilities(phys, ictx.surface)?,
            formats: loader.get_physical_device_surface_formats(phys, ictx.surface)?,
            present_modes: loader.get_physical_device_surface_present_modes(phys, ictx.surface)?,
        })
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// 8-bit sRGB formats, in order of preference.
const SRGB_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

/// An 8-bit sRGB format (BGRA first, then RGBA), else whatever comes first.
///
/// Only pairs in the sRGB non-linear colour space qualify: the same format
/// in a wide-gamut space would be composited with the wrong primaries.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    SRGB_FORMATS
        .iter()
        .find_map(|&wanted| {
            formats.iter().copied().find(|f| {
                f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX when offered; FIFO is always available.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// `u32::MAX` in `current_extent` means the surface lets us pick; clamp the
/// framebuffer size into the supported range then. A minimised surface
/// reports 0x0, which is passed through for [`has_area`] to catch.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// A chain MUST NOT be created with a zero-area extent.
pub fn has_area(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

/// One more than the minimum, capped by the maximum (0 == no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count.saturating_add(1);
    if caps.max_image_count == 0 {
        desired
    } else {
        desired.min(caps.max_image_count)
    }
}

pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// Images are shared across families only when graphics and present differ.
pub fn choose_sharing(graphics: u32, present: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics != present {
        (vk::SharingMode::CONCURRENT, vec![graphics, present])
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

/// The swap chain plus one view per image. Views and chain live and die together.
///
/// A chain created against a zero-area surface holds no swap chain and no
/// images; see [`ChainState::is_ready`].
pub struct ChainState {
    device: ash::Device,
    loader: swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

impl ChainState {
    pub unsafe fn create(
        ictx: &InstanceContext,
        dctx: &LogicalDeviceContext,
        hint: RenderSize,
    ) -> Result<Self, SetupError> {
        let support = SwapChainSupport::query(ictx, dctx.physical)
            .map_err(|e| SetupError::ChainCreationFailed(format!("surface query: {e}")))?;
        let format = choose_surface_format(&support.formats)
            .ok_or_else(|| SetupError::ChainCreationFailed("surface reports no formats".into()))?;
        if support.present_modes.is_empty() {
            return Err(SetupError::ChainCreationFailed(
                "surface reports no present modes".into(),
            ));
        }
        let caps = &support.capabilities;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(caps, hint);
        let image_count = choose_image_count(caps);
        let (sharing_mode, families) = choose_sharing(dctx.graphics_family, dctx.present_family);

        // Drop owns cleanup from here on.
        let mut chain = Self {
            device: dctx.device.clone(),
            loader: dctx.swapchain_loader.clone(),
            swapchain: vk::SwapchainKHR::null(),
            format,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
        };
        if !has_area(extent) {
            debug!(
                "surface extent {}x{} has no area; chain left empty",
                extent.width, extent.height
            );
            return Ok(chain);
        }

        info!(
            "format: {:?} / {:?}, present_mode: {:?}, extent: {}x{}, images(min={} -> picked={})",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            caps.min_image_count,
            image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ictx.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(choose_pre_transform(caps))
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        chain.swapchain = chain
            .loader
            .create_swapchain(&create_info, None)
            .map_err(|e| SetupError::ChainCreationFailed(e.to_string()))?;
        chain.images = chain
            .loader
            .get_swapchain_images(chain.swapchain)
            .map_err(|e| SetupError::ChainCreationFailed(format!("swapchain images: {e}")))?;

        // View format MUST match the chain's image format.
        for &image in &chain.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = chain
                .device
                .create_image_view(&view_info, None)
                .map_err(|e| SetupError::ChainCreationFailed(format!("image view: {e}")))?;
            chain.image_views.push(view);
        }

        Ok(chain)
    }

    pub fn is_ready(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Views first, then the chain. Safe to call more than once.
    pub unsafe fn destroy(&mut self) {
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view, None);
        }
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
            debug!("swap chain destroyed");
        }
    }
}

impl Drop for ChainState {
    fn drop(&mut self) {
        unsafe { self.destroy() }
    }
}
