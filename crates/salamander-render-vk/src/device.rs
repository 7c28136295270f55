// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and logical device creation.

use crate::chain::SwapChainSupport;
use crate::instance::InstanceContext;
use ash::khr::swapchain;
use ash::vk;
use salamander_render::SetupError;
use std::ffi::{c_char, CStr};
use tracing::{debug, info};

pub const DEVICE_EXTENSIONS: &[&CStr] = &[swapchain::NAME];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scans families in order and keeps the first match for each role.
    /// `supports_present` answers whether a family can present to the target surface.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();
        for (i, family) in (0u32..).zip(families) {
            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics = Some(i);
            }
            if indices.present.is_none() && supports_present(i) {
                indices.present = Some(i);
            }
            if indices.is_complete() {
                break;
            }
        }
        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// One entry per distinct family, for queue creation.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics.into_iter().chain(self.present).collect();
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Required extensions the device does not expose.
pub fn missing_extensions<'a>(
    available: &[vk::ExtensionProperties],
    required: &[&'a CStr],
) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|want| {
            !available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *want))
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub extensions_supported: bool,
    /// At least one surface format and one present mode.
    pub chain_adequate: bool,
}

impl PhysicalDeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_complete() && self.extensions_supported && self.chain_adequate
    }
}

/// First suitable device in enumeration order. No scoring.
pub fn pick_first_suitable(
    candidates: &[PhysicalDeviceCandidate],
) -> Result<&PhysicalDeviceCandidate, SetupError> {
    if candidates.is_empty() {
        return Err(SetupError::NoDeviceFound);
    }
    candidates
        .iter()
        .find(|c| c.is_suitable())
        .ok_or(SetupError::NoSuitableDevice)
}

unsafe fn inspect_device(
    ictx: &InstanceContext,
    phys: vk::PhysicalDevice,
) -> PhysicalDeviceCandidate {
    let props = ictx.instance.get_physical_device_properties(phys);
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("<unnamed>"));

    let families = ictx.instance.get_physical_device_queue_family_properties(phys);
    let queue_families = QueueFamilyIndices::find(&families, |i| {
        ictx.surface_loader
            .get_physical_device_surface_support(phys, i, ictx.surface)
            .unwrap_or(false)
    });

    let available = ictx
        .instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default();
    let missing = missing_extensions(&available, DEVICE_EXTENSIONS);
    let extensions_supported = missing.is_empty();

    // Only meaningful once the swapchain extension is known to exist.
    let chain_adequate = extensions_supported
        && SwapChainSupport::query(ictx, phys).is_ok_and(|s| s.is_adequate());

    debug!(
        gpu = %name,
        ?queue_families,
        ?missing,
        chain_adequate,
        "inspected physical device"
    );

    PhysicalDeviceCandidate {
        handle: phys,
        name,
        queue_families,
        extensions_supported,
        chain_adequate,
    }
}

/// Device-scoped objects. Dropped before the instance.
pub struct LogicalDeviceContext {
    pub physical: vk::PhysicalDevice,
    pub device: ash::Device,
    pub graphics_family: u32,
    pub present_family: u32,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
}

pub unsafe fn select_device(ictx: &InstanceContext) -> Result<LogicalDeviceContext, SetupError> {
    let handles = ictx
        .instance
        .enumerate_physical_devices()
        .map_err(|e| SetupError::DeviceCreationFailed(format!("enumerate devices: {e}")))?;
    let candidates: Vec<_> = handles
        .into_iter()
        .map(|phys| inspect_device(ictx, phys))
        .collect();

    let chosen = pick_first_suitable(&candidates)?;
    info!("GPU: {}", chosen.name);
    create_logical_device(ictx, chosen)
}

unsafe fn create_logical_device(
    ictx: &InstanceContext,
    candidate: &PhysicalDeviceCandidate,
) -> Result<LogicalDeviceContext, SetupError> {
    let qf = candidate.queue_families;
    let (Some(graphics_family), Some(present_family)) = (qf.graphics, qf.present) else {
        return Err(SetupError::NoSuitableDevice);
    };

    // --- One queue per distinct family, all at the same priority ---
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = qf
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect();

    let extensions: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = ictx
        .instance
        .create_device(candidate.handle, &create_info, None)
        .map_err(|e| SetupError::DeviceCreationFailed(e.to_string()))?;

    let graphics_queue = device.get_device_queue(graphics_family, 0);
    let present_queue = device.get_device_queue(present_family, 0);
    let swapchain_loader = swapchain::Device::new(&ictx.instance, &device);

    info!(graphics_family, present_family, "logical device created");

    Ok(LogicalDeviceContext {
        physical: candidate.handle,
        device,
        graphics_family,
        present_family,
        graphics_queue,
        present_queue,
        swapchain_loader,
    })
}

impl Drop for LogicalDeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        debug!("logical device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn ext(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as c_char;
        }
        props
    }

    fn candidate(raw: u64, complete: bool, exts: bool, chain: bool) -> PhysicalDeviceCandidate {
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu{raw}"),
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: complete.then_some(0),
            },
            extensions_supported: exts,
            chain_adequate: chain,
        }
    }

    #[test]
    fn graphics_and_present_in_one_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let qf = QueueFamilyIndices::find(&families, |_| true);
        assert_eq!(qf.graphics, Some(0));
        assert_eq!(qf.present, Some(0));
        assert_eq!(qf.unique_families(), vec![0]);
    }

    #[test]
    fn split_families_are_both_requested() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let qf = QueueFamilyIndices::find(&families, |i| i == 2);
        assert_eq!(qf.graphics, Some(1));
        assert_eq!(qf.present, Some(2));
        assert_eq!(qf.unique_families(), vec![1, 2]);
    }

    #[test]
    fn no_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let qf = QueueFamilyIndices::find(&families, |_| false);
        assert!(!qf.is_complete());
        assert_eq!(qf.unique_families(), vec![0]);
    }

    #[test]
    fn first_matching_family_wins() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::GRAPHICS)];
        let qf = QueueFamilyIndices::find(&families, |_| true);
        assert_eq!(qf.graphics, Some(0));
        assert_eq!(qf.present, Some(0));
    }

    #[test]
    fn swapchain_extension_is_required() {
        let available = [ext(c"VK_KHR_maintenance1")];
        assert_eq!(missing_extensions(&available, DEVICE_EXTENSIONS), vec![swapchain::NAME]);

        let available = [ext(c"VK_KHR_maintenance1"), ext(swapchain::NAME)];
        assert!(missing_extensions(&available, DEVICE_EXTENSIONS).is_empty());
    }

    #[test]
    fn empty_device_list_is_no_device() {
        assert!(matches!(pick_first_suitable(&[]), Err(SetupError::NoDeviceFound)));
    }

    #[test]
    fn unsuitable_devices_are_rejected() {
        let list = [
            candidate(1, false, true, true),
            candidate(2, true, false, true),
            candidate(3, true, true, false),
        ];
        assert!(matches!(pick_first_suitable(&list), Err(SetupError::NoSuitableDevice)));
    }

    #[test]
    fn first_suitable_device_is_picked() {
        let list = [
            candidate(1, false, true, true),
            candidate(2, true, true, true),
            candidate(3, true, true, true),
        ];
        let chosen = pick_first_suitable(&list).unwrap();
        assert_eq!(chosen.handle.as_raw(), 2);
    }
}
