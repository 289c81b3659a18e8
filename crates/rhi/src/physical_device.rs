//! Physical device selection and capability queries.
//!
//! A device is suitable when it has:
//! 1. a graphics queue family and a present queue family (possibly the same)
//! 2. every extension in [`required_device_extensions`]
//! 3. at least one surface format and one present mode for the target surface
//! 4. sampler anisotropy
//!
//! Among suitable devices the [`DeviceSelection`] policy decides. The
//! evaluation itself runs on plain [`DeviceCandidate`] values so the policy
//! can be exercised without a GPU.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};
use vkr_core::DeviceSelection;

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Device extensions every candidate must expose.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    let mut extensions = vec![ash::khr::swapchain::NAME];
    if cfg!(target_os = "macos") {
        extensions.push(ash::khr::portability_subset::NAME);
    }
    extensions
}

/// Queue family search state. Fields fill in as families are discovered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan family properties. `present_support(i)` reports whether family
    /// `i` can present to the surface. Stops at the first index where both
    /// roles are filled.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut present_support: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_count == 0 {
                continue;
            }
            if indices.graphics_family.is_none()
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics_family = Some(i);
            }
            if indices.present_family.is_none() && present_support(i) {
                indices.present_family = Some(i);
            }
            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        match (self.graphics_family, self.present_family) {
            (Some(graphics), Some(present)) => Some(QueueFamilies { graphics, present }),
            _ => None,
        }
    }
}

/// Resolved graphics and present family indices of the selected device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Everything the selection policy looks at for one device.
#[derive(Clone, Debug, Default)]
pub struct DeviceCandidate {
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: QueueFamilyIndices,
    pub missing_extensions: Vec<String>,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    /// Reason this device cannot be used, or `None` if suitable.
    pub fn rejection(&self) -> Option<String> {
        if !self.queue_families.is_complete() {
            return Some(format!(
                "missing queue families (graphics={}, present={})",
                self.queue_families.graphics_family.is_some(),
                self.queue_families.present_family.is_some()
            ));
        }
        if !self.missing_extensions.is_empty() {
            return Some(format!(
                "missing extensions: {}",
                self.missing_extensions.join(", ")
            ));
        }
        if self.surface_format_count == 0 || self.present_mode_count == 0 {
            return Some("surface reports no formats or present modes".to_string());
        }
        if self.features.sampler_anisotropy == vk::FALSE {
            return Some("sampler anisotropy not supported".to_string());
        }
        None
    }

    #[inline]
    pub fn is_suitable(&self) -> bool {
        self.rejection().is_none()
    }

    /// Score for [`DeviceSelection::Scored`]. Zero means unusable.
    pub fn score(&self) -> u32 {
        if self.features.geometry_shader == vk::FALSE {
            return 0;
        }
        let mut score = 0u32;
        if self.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        }
        score.saturating_add(self.properties.limits.max_image_dimension2_d)
    }
}

/// Index of the candidate the policy picks, if any.
pub fn choose_device(candidates: &[DeviceCandidate], policy: DeviceSelection) -> Option<usize> {
    let mut suitable = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_suitable());

    match policy {
        DeviceSelection::FirstSuitable => suitable.next().map(|(i, _)| i),
        DeviceSelection::Scored => suitable
            .map(|(i, c)| (i, c.score()))
            .filter(|&(_, score)| score > 0)
            // max_by_key keeps the last maximum; reverse so ties go to the earliest device
            .rev()
            .max_by_key(|&(_, score)| score)
            .map(|(i, _)| i),
    }
}

/// Highest sample count usable for both color and depth attachments.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// First candidate whose properties for `tiling` contain `features`.
pub fn pick_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or(RhiError::NoSuitableFormat)
}

#[inline]
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// The negotiated device and the capabilities the renderer depends on.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
    pub msaa_samples: vk::SampleCountFlags,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    #[inline]
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }

    /// Format properties for this device.
    pub fn format_properties(
        &self,
        instance: &ash::Instance,
        format: vk::Format,
    ) -> vk::FormatProperties {
        unsafe { instance.get_physical_device_format_properties(self.device, format) }
    }

    pub fn find_supported_format(
        &self,
        instance: &ash::Instance,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> RhiResult<vk::Format> {
        pick_supported_format(candidates, tiling, features, |format| {
            self.format_properties(instance, format)
        })
    }

    pub fn find_depth_format(&self, instance: &ash::Instance) -> RhiResult<vk::Format> {
        self.find_supported_format(
            instance,
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{major}.{minor}.{patch}"))
            .field("queue_families", &self.queue_families)
            .field("msaa_samples", &self.msaa_samples)
            .finish()
    }
}

/// Enumerate devices and pick one according to `policy`.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    policy: DeviceSelection,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }
    info!("Found {} GPU(s), selection policy {:?}", devices.len(), policy);

    let mut candidates = Vec::with_capacity(devices.len());
    for &device in &devices {
        let candidate = inspect_device(instance, device, surface, surface_loader)?;
        let name = candidate
            .properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match candidate.rejection() {
            Some(reason) => debug!("GPU '{}' skipped: {}", name, reason),
            None => debug!("GPU '{}' suitable, score {}", name, candidate.score()),
        }
        candidates.push(candidate);
    }

    let index = choose_device(&candidates, policy).ok_or(RhiError::NoSuitableGpu)?;
    let candidate = &candidates[index];
    let device = devices[index];
    let queue_families = candidate
        .queue_families
        .resolve()
        .ok_or(RhiError::NoSuitableGpu)?;

    let selected = PhysicalDeviceInfo {
        device,
        properties: candidate.properties,
        features: candidate.features,
        memory_properties: unsafe { instance.get_physical_device_memory_properties(device) },
        queue_families,
        msaa_samples: max_usable_sample_count(&candidate.properties.limits),
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) Vulkan {}.{}.{}, MSAA {:?}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        selected.msaa_samples
    );

    Ok(selected)
}

fn inspect_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<DeviceCandidate> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let queue_families = QueueFamilyIndices::find(&families, |i| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, i, surface)
            .unwrap_or(false)
    });

    let available = unsafe { instance.enumerate_device_extension_properties(device)? };
    let missing_extensions = required_device_extensions()
        .into_iter()
        .filter(|required| {
            !available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().ok() == Some(*required))
        })
        .map(|name| name.to_string_lossy().into_owned())
        .collect::<Vec<_>>();

    // Surface support is only meaningful once the swapchain extension is present.
    let (surface_format_count, present_mode_count) = if missing_extensions.is_empty() {
        let support = SwapchainSupportDetails::query(device, surface, surface_loader)?;
        (support.formats.len(), support.present_modes.len())
    } else {
        (0, 0)
    };

    Ok(DeviceCandidate {
        properties,
        features,
        queue_families,
        missing_extensions,
        surface_format_count,
        present_mode_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn suitable_candidate(
        device_type: vk::PhysicalDeviceType,
        max_dim: u32,
        geometry: bool,
    ) -> DeviceCandidate {
        let mut properties = vk::PhysicalDeviceProperties {
            device_type,
            ..Default::default()
        };
        properties.limits.max_image_dimension2_d = max_dim;
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            geometry_shader: if geometry { vk::TRUE } else { vk::FALSE },
            ..Default::default()
        };
        DeviceCandidate {
            properties,
            features,
            queue_families: QueueFamilyIndices {
                graphics_family: Some(0),
                present_family: Some(0),
            },
            missing_extensions: vec![],
            surface_format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn test_find_shared_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = QueueFamilyIndices::find(&families, |_| true);
        assert_eq!(
            indices.resolve(),
            Some(QueueFamilies {
                graphics: 0,
                present: 0
            })
        );
    }

    #[test]
    fn test_find_split_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| i == 2);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(2));
        let resolved = indices.resolve().unwrap();
        assert!(!resolved.is_shared());
        assert_eq!(resolved.unique(), vec![1, 2]);
    }

    #[test]
    fn test_find_no_present() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| false);
        assert!(!indices.is_complete());
        assert!(indices.resolve().is_none());
    }

    #[test]
    fn test_empty_family_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_rejections() {
        let base = suitable_candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096, true);
        assert!(base.is_suitable());

        let mut no_ext = base.clone();
        no_ext.missing_extensions = vec!["VK_KHR_swapchain".into()];
        assert!(no_ext.rejection().unwrap().contains("VK_KHR_swapchain"));

        let mut no_modes = base.clone();
        no_modes.present_mode_count = 0;
        assert!(!no_modes.is_suitable());

        let mut no_aniso = base.clone();
        no_aniso.features.sampler_anisotropy = vk::FALSE;
        assert!(!no_aniso.is_suitable());

        let mut no_present = base;
        no_present.queue_families.present_family = None;
        assert!(!no_present.is_suitable());
    }

    #[test]
    fn test_first_suitable_ignores_score() {
        let mut unusable = suitable_candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, true);
        unusable.features.sampler_anisotropy = vk::FALSE;
        let candidates = vec![
            unusable,
            suitable_candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096, false),
            suitable_candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, true),
        ];
        assert_eq!(
            choose_device(&candidates, DeviceSelection::FirstSuitable),
            Some(1)
        );
    }

    #[test]
    fn test_scored_prefers_discrete() {
        let candidates = vec![
            suitable_candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384, true),
            suitable_candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, true),
        ];
        assert_eq!(candidates[0].score(), 16384);
        assert_eq!(candidates[1].score(), 17384);
        assert_eq!(choose_device(&candidates, DeviceSelection::Scored), Some(1));
    }

    #[test]
    fn test_scored_requires_geometry_shader() {
        let candidates = vec![suitable_candidate(
            vk::PhysicalDeviceType::DISCRETE_GPU,
            16384,
            false,
        )];
        assert_eq!(candidates[0].score(), 0);
        assert_eq!(choose_device(&candidates, DeviceSelection::Scored), None);
        assert_eq!(
            choose_device(&candidates, DeviceSelection::FirstSuitable),
            Some(0)
        );
    }

    #[test]
    fn test_scored_tie_keeps_first() {
        let candidates = vec![
            suitable_candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192, true),
            suitable_candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192, true),
        ];
        assert_eq!(choose_device(&candidates, DeviceSelection::Scored), Some(0));
    }

    #[test]
    fn test_max_usable_sample_count() {
        let mut limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);

        limits.framebuffer_color_sample_counts = vk::SampleCountFlags::TYPE_1;
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_1);

        limits.framebuffer_color_sample_counts =
            vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_32;
        limits.framebuffer_depth_sample_counts =
            vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_32;
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_32);
    }

    #[test]
    fn test_pick_supported_format() {
        let props = |format: vk::Format| {
            if format == vk::Format::D32_SFLOAT_S8_UINT {
                vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties::default()
            }
        };

        let found = pick_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            props,
        )
        .unwrap();
        assert_eq!(found, vk::Format::D32_SFLOAT_S8_UINT);

        let missing = pick_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            props,
        );
        assert!(matches!(missing, Err(RhiError::NoSuitableFormat)));
    }

    #[test]
    fn test_has_stencil_component() {
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn test_swapchain_extension_required() {
        assert!(required_device_extensions().contains(&ash::khr::swapchain::NAME));
    }
}
