// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Selection policies are plain functions over the surface report so they can
// be checked without a GPU.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::surface::SurfaceSupport;
use super::{VulkanDevice, WindowSurface};
use crate::platform::RenderWindow;

/// Result of asking the chain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Acquire/present half of the chain, as seen by the frame pacer
pub trait PresentTarget {
    fn image_count(&self) -> usize;
    /// Blocks with no timeout; `signal` is signaled once the image is usable
    fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<AcquireOutcome>;
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<PresentOutcome>;
}

/// Prefer 8-bit BGRA sRGB; otherwise whatever the surface lists first
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// `preferred` when offered, else FIFO (always supported)
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Fixed surface extent when reported, else the framebuffer size clamped
/// into the surface's supported range
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: framebuffer.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, bounded by the maximum (0 = unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// Everything chosen for one (re)creation
#[derive(Debug, Clone, Copy)]
struct ChainSettings {
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    image_count: u32,
    pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl ChainSettings {
    fn choose(
        support: &SurfaceSupport,
        framebuffer: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let surface_format = choose_surface_format(&support.formats)
            .context("Surface reports no supported formats")?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent: choose_extent(&support.capabilities, framebuffer),
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

pub struct PresentationChain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    /// Image count requested at creation (the driver may hand out more)
    pub min_image_count: u32,
    preferred_present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl PresentationChain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &WindowSurface,
        window: &dyn RenderWindow,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance().instance, &device.device);

        let mut chain = Self {
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            min_image_count: 0,
            preferred_present_mode,
            device,
        };
        chain.build(surface, window.framebuffer_extent())?;

        Ok(chain)
    }

    /// Build a replacement chain from the current one, then release the old
    /// views and the old chain
    pub fn recreate(&mut self, surface: &WindowSurface, window: &dyn RenderWindow) -> Result<()> {
        self.build(surface, window.framebuffer_extent())
    }

    fn build(&mut self, surface: &WindowSurface, framebuffer: vk::Extent2D) -> Result<()> {
        let support = surface.query_support(self.device.physical_device)?;
        let settings = ChainSettings::choose(&support, framebuffer, self.preferred_present_mode)?;

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            settings.extent.width,
            settings.extent.height,
            settings.image_count,
            settings.surface_format.format,
            settings.present_mode
        );

        let queue_family_indices = [
            self.device.graphics_queue_family,
            self.device.present_queue_family,
        ];
        let old_swapchain = self.swapchain;

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(settings.image_count)
            .image_format(settings.surface_format.format)
            .image_color_space(settings.surface_format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(settings.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(settings.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        create_info = if queue_family_indices[0] != queue_family_indices[1] {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // The old chain only served as a hint; its views and handle go now
        self.cleanup();
        self.swapchain = swapchain;
        self.format = settings.surface_format.format;
        self.extent = settings.extent;
        self.present_mode = settings.present_mode;
        self.min_image_count = settings.image_count;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        for &image in &self.images {
            let view = self.create_image_view(image)?;
            self.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", self.images.len());
        Ok(())
    }

    fn create_image_view(&self, image: vk::Image) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.device.device.create_image_view(&create_info, None) }
            .context("Failed to create swapchain image view")
    }

    /// Release views and the chain handle; safe to call repeatedly
    pub fn cleanup(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
            self.images.clear();

            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }
}

impl PresentTarget for PresentationChain {
    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

impl Drop for PresentationChain {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2160,
            },
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn unbounded_max_adds_one_image() {
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
    }

    #[test]
    fn image_count_clamps_to_max() {
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 8)), 3);
    }

    #[test]
    fn image_count_stays_within_bounds() {
        for min in 1..6 {
            for max in [0, min, min + 1, min + 4] {
                let count = choose_image_count(&capabilities(min, max));
                assert!(count >= min);
                if max > 0 {
                    assert!(count <= max);
                }
            }
        }
    }

    #[test]
    fn fixed_current_extent_wins() {
        let mut caps = capabilities(2, 0);
        caps.current_extent = extent(800, 600);

        for framebuffer in [extent(0, 0), extent(1920, 1080), extent(800, 600)] {
            assert_eq!(choose_extent(&caps, framebuffer), extent(800, 600));
        }
    }

    #[test]
    fn framebuffer_extent_used_when_in_range() {
        assert_eq!(
            choose_extent(&capabilities(2, 0), extent(1280, 720)),
            extent(1280, 720)
        );
    }

    #[test]
    fn framebuffer_extent_clamped_per_component() {
        let caps = capabilities(2, 0);
        assert_eq!(choose_extent(&caps, extent(8000, 10)), extent(4096, 64));
        assert_eq!(choose_extent(&caps, extent(10, 9000)), extent(64, 2160));
    }

    #[test]
    fn srgb_bgra_format_preferred() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[unorm]), Some(unorm));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn srgb_format_needs_nonlinear_color_space() {
        let wrong_space = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };
        let first = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[first, wrong_space]), Some(first));
    }

    #[test]
    fn mailbox_used_when_offered() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn fifo_fallback_when_preference_missing() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn settings_reject_surfaces_without_formats() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 0),
            formats: Vec::new(),
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(ChainSettings::choose(&support, extent(640, 480), vk::PresentModeKHR::MAILBOX).is_err());
    }
}
