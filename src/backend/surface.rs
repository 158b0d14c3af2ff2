// Window surface - connection between the instance and a native window

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::GraphicsInstance;
use crate::platform::RenderWindow;

/// Everything the surface reports about what a swapchain may look like
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct WindowSurface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
    _instance: Arc<GraphicsInstance>,
}

impl WindowSurface {
    pub fn new(instance: Arc<GraphicsInstance>, window: &dyn RenderWindow) -> Result<Self> {
        let loader = ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_surface(&instance.entry, &instance.instance)
            .context("Failed to create window surface")?;

        log::info!("Window surface created");

        Ok(Self {
            surface,
            loader,
            _instance: instance,
        })
    }

    /// Whether `queue_family` on `physical_device` can present to this surface
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        let supported = unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.surface,
            )
        }?;
        Ok(supported)
    }

    pub fn query_support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .context("Failed to query surface capabilities")?;
            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .context("Failed to query surface formats")?;
            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .context("Failed to query surface present modes")?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

impl Drop for WindowSurface {
    fn drop(&mut self) {
        log::info!("Destroying window surface...");
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
