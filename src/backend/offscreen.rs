// Offscreen render target
//
// Render-to-texture scaffolding: a sampleable color target with its own
// render pass, framebuffer and sampler, plus a transfer texture meant for
// the presenter's layout transitions. Nothing in the draw path reads any
// of it.

use anyhow::{Context, Result};
use ash::vk;

use super::buffer::{create_color_image, create_color_view};
use super::pipeline::{create_framebuffer, create_render_pass, ColorPassDesc};
use super::VulkanDevice;

#[derive(Debug, Default)]
pub struct OffscreenTarget {
    /// Transfer destination that can later become a color attachment
    pub texture_image: vk::Image,
    pub texture_memory: vk::DeviceMemory,
    pub texture_view: vk::ImageView,

    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
}

/// Linear, clamped, single-level sampler
pub fn sampler_info() -> vk::SamplerCreateInfo {
    vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .mip_lod_bias(0.0)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .min_lod(0.0)
        .max_lod(1.0)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
        .build()
}

impl OffscreenTarget {
    /// Everything or nothing: a failure releases what was already built.
    pub fn new(device: &VulkanDevice, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        log::debug!("Creating offscreen target {}x{}", extent.width, extent.height);

        let mut target = Self::default();
        if let Err(e) = target.build(device, format, extent) {
            target.destroy(&device.device);
            return Err(e.context("Failed to create offscreen target"));
        }
        Ok(target)
    }

    fn build(&mut self, device: &VulkanDevice, format: vk::Format, extent: vk::Extent2D) -> Result<()> {
        (self.texture_image, self.texture_memory) = create_color_image(
            device,
            format,
            extent,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
        )?;
        self.texture_view = create_color_view(device, self.texture_image, format)?;

        // Sampled directly from the color attachment
        (self.image, self.memory) = create_color_image(
            device,
            format,
            extent,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )?;
        self.view = create_color_view(device, self.image, format)?;

        self.sampler = unsafe {
            device.device.create_sampler(&sampler_info(), None)
                .context("Failed to create offscreen sampler")?
        };

        self.render_pass = create_render_pass(device, &ColorPassDesc::offscreen(format))?;
        self.framebuffer = create_framebuffer(device, self.view, self.render_pass, extent)?;

        Ok(())
    }

    /// Null handles are skipped by the driver.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_framebuffer(self.framebuffer, None);
            device.destroy_render_pass(self.render_pass, None);
            device.destroy_sampler(self.sampler, None);
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);

            // Views go before the images they look at
            device.destroy_image_view(self.texture_view, None);
            device.destroy_image(self.texture_image, None);
            device.free_memory(self.texture_memory, None);
        }
    }
}
