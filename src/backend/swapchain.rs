// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Negotiation is strict: the desired format, color space and present mode
// must all be offered by the surface, and the surface must report a fixed
// extent. There is no recreation; a size change is fatal.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::create_color_view;
use super::VulkanDevice;
use crate::error::RendererError;

/// What we ask the surface for
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    /// Format and color space; both must match an advertised pair
    pub surface_format: vk::SurfaceFormatKHR,
    /// Used only if the surface lists it
    pub present_mode: vk::PresentModeKHR,
    /// Lower bound on image count; the driver may hand back more
    pub min_image_count: u32,
}

pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    desired: vk::SurfaceFormatKHR,
) -> Result<vk::SurfaceFormatKHR, RendererError> {
    available
        .iter()
        .copied()
        .find(|f| f.format == desired.format && f.color_space == desired.color_space)
        .ok_or(RendererError::SurfaceFormatUnavailable {
            format: desired.format,
            color_space: desired.color_space,
        })
}

pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    desired: vk::PresentModeKHR,
) -> Result<vk::PresentModeKHR, RendererError> {
    available
        .iter()
        .copied()
        .find(|&mode| mode == desired)
        .ok_or(RendererError::PresentModeUnavailable(desired))
}

/// The surface's current extent. `u32::MAX` means "pick one yourself",
/// which we don't support.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR) -> Result<vk::Extent2D, RendererError> {
    if caps.current_extent.width == u32::MAX {
        return Err(RendererError::UndefinedExtent);
    }
    Ok(caps.current_extent)
}

/// Requested count clamped into the range the surface accepts.
/// `max_image_count == 0` means no upper limit.
pub fn choose_image_count(requested: u32, caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = requested.max(caps.min_image_count);
    if caps.max_image_count > 0 {
        count = count.min(caps.max_image_count);
    }
    count
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(device: Arc<VulkanDevice>, request: &SwapchainRequest) -> Result<Self> {
        let surface = device.surface;
        let surface_loader = &device.surface_loader;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }
        .context("Failed to query surface formats")?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        }
        .context("Failed to query present modes")?;

        let surface_format = choose_surface_format(&formats, request.surface_format)?;
        let present_mode = choose_present_mode(&present_modes, request.present_mode)?;

        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(device.physical_device, surface)
        }
        .context("Failed to query surface capabilities")?;

        let extent = choose_extent(&surface_caps)?;

        // The graphics family doubles as the present family
        let supports_present = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )
        }
        .context("Failed to query surface support")?;

        if !supports_present {
            return Err(RendererError::PresentationUnsupported(device.graphics_queue_family).into());
        }

        let image_count = choose_image_count(request.min_image_count, &surface_caps);
        if image_count != request.min_image_count {
            log::warn!(
                "Requested {} swapchain images, surface allows {}..{}; using {}",
                request.min_image_count,
                surface_caps.min_image_count,
                surface_caps.max_image_count,
                image_count
            );
        }

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}",
            extent.width, extent.height, surface_format.format, present_mode
        );

        let swapchain_loader = ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe {
            swapchain_loader.create_swapchain(&create_info, None)
        }
        .context("Failed to create swapchain")?;

        // May be more than we asked for; every one of them is tracked
        let images = unsafe {
            swapchain_loader.get_swapchain_images(swapchain)
        }
        .context("Failed to get swapchain images")?;

        log::info!("Created swapchain with {} images", images.len());

        let mut this = Self {
            swapchain,
            swapchain_loader,
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            present_mode,
            extent,
            device,
        };
        this.create_image_views()?;

        Ok(this)
    }

    /// One 2D color view per swapchain image
    fn create_image_views(&mut self) -> Result<()> {
        for &image in &self.images {
            let view = create_color_view(&self.device, image, self.format)?;
            self.image_views.push(view);
        }
        Ok(())
    }

    /// Acquire next image for rendering. Blocks until one is available.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .context("Failed to acquire swapchain image")
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader.queue_present(queue, &present_info)
        }
        .context("Failed to present swapchain image")
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
