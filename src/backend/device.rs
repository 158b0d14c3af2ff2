// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (prefer discrete GPU)
// - Logical device + graphics/present queue creation
// - Memory allocator setup
// - Fence/semaphore/submit primitives used by the frame pacer

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::sync::{FrameSubmission, SubmitQueue, SyncDevice};
use super::{GraphicsInstance, WindowSurface};

/// Device extensions every candidate must support
fn required_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Queue families resolved on one physical device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// One entry per distinct family; a shared graphics/present family appears once
    pub fn unique(&self) -> Vec<u32> {
        let families: BTreeSet<u32> = self.graphics.into_iter().chain(self.present).collect();
        families.into_iter().collect()
    }
}

/// Find a graphics family and (independently) a family that can present.
///
/// `present_support` is asked per family index; the first match wins for each role.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut present_support: F,
) -> Result<QueueFamilyIndices>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        if family.queue_count == 0 {
            continue;
        }
        let index = index as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }

        if indices.present.is_none() && present_support(index)? {
            indices.present = Some(index);
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Names of `required` extensions absent from `available`
pub fn missing_extensions(available: &[vk::ExtensionProperties], required: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| {
            !available.iter().any(|ext| {
                let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                ext_name == **name
            })
        })
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// What device selection needs to know about one physical device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: QueueFamilyIndices,
    pub missing_extensions: Vec<String>,
}

impl DeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_complete() && self.missing_extensions.is_empty()
    }
}

/// Index of the first suitable discrete GPU, else the first suitable device
pub fn select_device(candidates: &[DeviceCandidate]) -> Option<usize> {
    let mut selected = None;

    for (index, candidate) in candidates.iter().enumerate() {
        if !candidate.is_suitable() {
            continue;
        }
        if candidate.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            return Some(index);
        }
        selected.get_or_insert(index);
    }

    selected
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped manually before the device handle
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,

    pub properties: vk::PhysicalDeviceProperties,

    instance: Arc<GraphicsInstance>,
}

impl VulkanDevice {
    /// Select a GPU able to present to `surface` and create the logical device
    pub fn new(instance: Arc<GraphicsInstance>, surface: &WindowSurface) -> Result<Arc<Self>> {
        let (physical_device, families) = Self::pick_physical_device(&instance, surface)?;

        let graphics_queue_family = families
            .graphics
            .context("Selected device has no graphics queue family")?;
        let present_queue_family = families
            .present
            .context("Selected device has no present queue family")?;

        let device = Self::create_logical_device(&instance, physical_device, &families)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        let properties = unsafe {
            instance.instance.get_physical_device_properties(physical_device)
        };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={}, present={}",
            graphics_queue_family,
            present_queue_family
        );

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e).context("Failed to create GPU memory allocator");
            }
        };

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            graphics_queue,
            graphics_queue_family,
            present_queue,
            present_queue_family,
            properties,
            instance,
        }))
    }

    fn pick_physical_device(
        instance: &GraphicsInstance,
        surface: &WindowSurface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No GPUs with Vulkan support detected");
        }

        let mut candidates = Vec::with_capacity(devices.len());
        for &device in &devices {
            let candidate = Self::describe(instance, surface, device)?;
            log::debug!(
                "GPU candidate '{}' ({:?}): families {:?}, missing extensions {:?}",
                candidate.name,
                candidate.device_type,
                candidate.queue_families,
                candidate.missing_extensions
            );
            candidates.push(candidate);
        }

        let index = select_device(&candidates)
            .ok_or_else(|| anyhow::anyhow!("No suitable Vulkan device found"))?;

        Ok((devices[index], candidates[index].queue_families))
    }

    fn describe(
        instance: &GraphicsInstance,
        surface: &WindowSurface,
        device: vk::PhysicalDevice,
    ) -> Result<DeviceCandidate> {
        let props = unsafe { instance.instance.get_physical_device_properties(device) };
        let families = unsafe {
            instance.instance.get_physical_device_queue_family_properties(device)
        };
        let queue_families =
            find_queue_families(&families, |index| surface.supports_present(device, index))?;

        let available = unsafe { instance.instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;

        Ok(DeviceCandidate {
            name: unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            device_type: props.device_type,
            queue_families,
            missing_extensions: missing_extensions(&available, &required_extensions()),
        })
    }

    fn create_logical_device(
        instance: &GraphicsInstance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = required_extensions().iter().map(|e| e.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance.instance.create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        Ok(device)
    }

    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    /// GPU memory allocator; hold the guard only for the allocation call
    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Device wait idle failed")?;
        Ok(())
    }
}

impl SyncDevice for VulkanDevice {
    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        Ok(unsafe { self.device.create_semaphore(&info, None) }?)
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.device.create_fence(&info, None) }?)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("Failed to wait for fence")?;
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }.context("Failed to reset fence")?;
        Ok(())
    }
}

impl SubmitQueue for VulkanDevice {
    fn submit(&self, submission: &FrameSubmission) -> Result<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.queue_submit(
                self.graphics_queue,
                &[submit_info.build()],
                submission.fence,
            )
        }
        .context("Failed to submit the command buffer")?;

        Ok(())
    }
}

/// Teardown goes ahead either way; a failed idle wait is logged.
/// Returns whether the device was idle.
pub fn idle_before_teardown(result: Result<()>, stage: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            log::error!("Wait idle before {} failed: {:#}", stage, e);
            false
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        idle_before_teardown(self.wait_idle(), "device destruction");

        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_char;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as c_char;
        }
        props
    }

    fn candidate(device_type: vk::PhysicalDeviceType, suitable: bool) -> DeviceCandidate {
        DeviceCandidate {
            name: format!("{:?}", device_type),
            device_type,
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: if suitable { Some(0) } else { None },
            },
            missing_extensions: Vec::new(),
        }
    }

    #[test]
    fn single_family_serves_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();

        assert!(indices.is_complete());
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn graphics_and_present_resolved_independently() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        let indices = find_queue_families(&families, |index| Ok(index == 2)).unwrap();

        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.unique(), vec![1, 2]);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [family(vk::QueueFlags::GRAPHICS, 0), family(vk::QueueFlags::GRAPHICS, 1)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn no_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let indices = find_queue_families(&families, |_| Ok(false)).unwrap();

        assert!(!indices.is_complete());
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let result = find_queue_families(&families, |_| anyhow::bail!("surface lost"));
        assert!(result.is_err());
    }

    #[test]
    fn failed_idle_wait_is_reported_not_propagated() {
        assert!(idle_before_teardown(Ok(()), "device destruction"));
        assert!(!idle_before_teardown(
            Err(anyhow::anyhow!("ERROR_DEVICE_LOST")),
            "device destruction"
        ));
    }

    #[test]
    fn missing_swapchain_extension_is_reported() {
        let swapchain = ash::extensions::khr::Swapchain::name();
        let available = [extension(c"VK_KHR_maintenance1")];
        assert_eq!(
            missing_extensions(&available, &[swapchain]),
            vec!["VK_KHR_swapchain".to_string()]
        );

        let available = [extension(c"VK_KHR_maintenance1"), extension(swapchain)];
        assert!(missing_extensions(&available, &[swapchain]).is_empty());
    }

    #[test]
    fn discrete_gpu_preferred_over_earlier_integrated() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, true),
        ];
        assert_eq!(select_device(&candidates), Some(1));
    }

    #[test]
    fn first_suitable_device_wins_without_discrete() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::CPU, false),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true),
            candidate(vk::PhysicalDeviceType::VIRTUAL_GPU, true),
        ];
        assert_eq!(select_device(&candidates), Some(1));
    }

    #[test]
    fn unsuitable_discrete_gpu_is_skipped() {
        let mut discrete = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, true);
        discrete.missing_extensions.push("VK_KHR_swapchain".to_string());
        let candidates = [discrete, candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true)];
        assert_eq!(select_device(&candidates), Some(1));
    }

    #[test]
    fn no_suitable_device_selects_nothing() {
        let candidates = [candidate(vk::PhysicalDeviceType::DISCRETE_GPU, false)];
        assert_eq!(select_device(&candidates), None);
        assert_eq!(select_device(&[]), None);
    }
}
