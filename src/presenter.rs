// =============================================================================
// PRESENTER - Swapchain, fixed triangle pipeline and the per-frame protocol
// =============================================================================
//
// FRAME FLOW (one call to `draw`):
// ┌──────────────────────────────────────────────────────────────────────┐
// │  wait+reset slot fence ─> acquire ─> record ─> submit ─> present      │
// │                                                                      │
// │  slot  = frame counter % image count                                 │
// │  image = whatever the presentation engine hands back                 │
// └──────────────────────────────────────────────────────────────────────┘
//
// Per slot: acquire semaphore, fence, command buffer.
// Per image: framebuffer, present-ready semaphore.
// The two counts are equal, so one FrameSync triple exists per image.
//
// Single-threaded by construction. Every failure is returned to the caller
// and treated as fatal; there is no out-of-date handling. Construction fills
// a presenter whose handles start null, so a failed `new` is torn down by
// the same Drop as a finished one.

use anyhow::{Context, Result};
use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::commands::{allocate_command_buffers, create_command_pool, submit_one_time, LayoutTransition};
use crate::backend::offscreen::OffscreenTarget;
use crate::backend::buffer::{create_host_buffer_with, BoundBuffer};
use crate::backend::pipeline::{
    create_framebuffer, create_graphics_pipeline, create_render_pass, ColorPassDesc, RasterDesc,
    TRIANGLE,
};
use crate::backend::shader::{create_shader_module, load_spirv};
use crate::backend::sync::{FrameRing, FrameSync};
use crate::backend::{Swapchain, SwapchainRequest, VulkanDevice};
use crate::config::Config;

/// Everything the presenter needs besides the device
#[derive(Debug, Clone)]
pub struct PresenterSettings {
    pub swapchain: SwapchainRequest,
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    /// Build the unused render-to-texture resources
    pub offscreen: bool,
}

impl PresenterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            swapchain: SwapchainRequest {
                surface_format: config.surface_format(),
                present_mode: config.present_mode(),
                min_image_count: config.graphics.min_image_count,
            },
            clear_color: config.graphics.clear_color,
            vertex_shader: config.shaders.vertex.clone(),
            fragment_shader: config.shaders.fragment.clone(),
            offscreen: config.offscreen.enabled,
        }
    }

    /// Read both SPIR-V binaries. Done before any driver object exists.
    pub fn load_shaders(&self) -> Result<ShaderCode> {
        Ok(ShaderCode {
            vertex: load_spirv(&self.vertex_shader).context("Vertex stage")?,
            fragment: load_spirv(&self.fragment_shader).context("Fragment stage")?,
        })
    }
}

/// SPIR-V words for the two fixed stages
#[derive(Debug, Clone)]
pub struct ShaderCode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

/// IMPORTANT: `swapchain` and `device` are dropped after `Drop::drop` has
/// released everything else, in that order.
pub struct Presenter {
    vertices: BoundBuffer,

    frame_sync: Vec<FrameSync>,
    frames: FrameRing,

    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,

    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,

    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    offscreen: Option<OffscreenTarget>,

    clear_color: [f32; 4],
    wait_stages: [vk::PipelineStageFlags; 1],
    frames_drawn: u64,
    reported_suboptimal: bool,

    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
}

impl Presenter {
    pub fn new(device: Arc<VulkanDevice>, settings: &PresenterSettings) -> Result<Self> {
        log::info!("Creating presenter...");

        // Unreadable shaders fail here, before anything touches the driver
        let shaders = settings.load_shaders()?;

        // Swapchain + one view per image
        let swapchain = Swapchain::new(device.clone(), &settings.swapchain)?;
        let image_count = swapchain.images.len();

        let mut presenter = Self {
            vertices: BoundBuffer::default(),
            frame_sync: Vec::with_capacity(image_count),
            frames: FrameRing::new(image_count),
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            framebuffers: Vec::with_capacity(image_count),
            render_pass: vk::RenderPass::null(),
            offscreen: None,
            clear_color: settings.clear_color,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            frames_drawn: 0,
            reported_suboptimal: false,
            swapchain,
            device,
        };

        // On error the partially built presenter drops and releases itself
        presenter.build(settings.offscreen, &shaders)?;

        log::info!("Presenter ready: {} frame slots", image_count);
        Ok(presenter)
    }

    fn build(&mut self, offscreen: bool, shaders: &ShaderCode) -> Result<()> {
        let device = self.device.clone();
        let format = self.swapchain.format;
        let extent = self.swapchain.extent;
        let image_count = self.swapchain.images.len();

        if offscreen {
            self.offscreen = Some(OffscreenTarget::new(&device, format, extent)?);
        }

        self.render_pass = create_render_pass(&device, &ColorPassDesc::presentation(format))?;
        for &view in &self.swapchain.image_views {
            self.framebuffers.push(create_framebuffer(&device, view, self.render_pass, extent)?);
        }

        self.command_pool = create_command_pool(&device)?;
        self.command_buffers = allocate_command_buffers(&device, self.command_pool, image_count as u32)?;

        (self.pipeline, self.pipeline_layout) =
            Self::create_pipeline(&device, self.render_pass, extent, shaders)?;

        for _ in 0..image_count {
            self.frame_sync.push(FrameSync::new(&device)?);
        }

        // Written once, never touched again
        self.vertices = create_host_buffer_with(&device, vk::BufferUsageFlags::VERTEX_BUFFER, &TRIANGLE)?;

        Ok(())
    }

    fn create_pipeline(
        device: &VulkanDevice,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        shaders: &ShaderCode,
    ) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
        let vert_module = create_shader_module(device, &shaders.vertex)?;
        let frag_module = match create_shader_module(device, &shaders.fragment) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let result = create_graphics_pipeline(
            device,
            render_pass,
            extent,
            &RasterDesc::TRIANGLE_LIST,
            vert_module,
            frag_module,
        );

        // Modules are only needed while the pipeline is built
        unsafe {
            device.device.destroy_shader_module(vert_module, None);
            device.device.destroy_shader_module(frag_module, None);
        }

        result
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Draw and present one frame. Blocks on the slot fence and on acquire.
    pub fn draw(&mut self) -> Result<()> {
        let slot = self.frames.current();
        let device = &self.device.device;
        let sync = &self.frame_sync[slot];

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until this slot's previous submission has retired
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            device.wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)
                .context("Failed waiting for frame fence")?;
            device.reset_fences(&[sync.in_flight_fence])
                .context("Failed to reset frame fence")?;
        }
        self.frames.fence_cycled();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        self.frames.step();
        let (image_index, suboptimal) = self.swapchain.acquire_next_image(sync.image_available)?;
        if suboptimal && !self.reported_suboptimal {
            log::warn!("Swapchain is suboptimal for the surface; carrying on");
            self.reported_suboptimal = true;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Record this slot's command buffer against the image
        // ─────────────────────────────────────────────────────────────────────
        self.frames.step();
        let cmd = self.command_buffers[slot];
        self.record(cmd, image_index as usize)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Submit
        // ─────────────────────────────────────────────────────────────────────
        self.frames.step();
        let render_finished = self.frame_sync[image_index as usize].render_finished;

        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
            .context("Failed to submit draw commands")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Present
        // ─────────────────────────────────────────────────────────────────────
        self.frames.step();
        let suboptimal = self.swapchain.present(
            self.device.graphics_queue,
            image_index,
            &signal_semaphores,
        )?;
        if suboptimal && !self.reported_suboptimal {
            log::warn!("Present reported a suboptimal swapchain; carrying on");
            self.reported_suboptimal = true;
        }

        self.frames.advance();
        self.frames_drawn += 1;

        Ok(())
    }

    fn record(&self, cmd: vk::CommandBuffer, image_index: usize) -> Result<()> {
        let device = &self.device.device;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent,
            })
            .clear_values(&clear_values);

        // Pool was created with RESET_COMMAND_BUFFER, so begin resets it
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.buffer], &[0]);
            device.cmd_draw(cmd, TRIANGLE.len() as u32, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }

        Ok(())
    }

    // =========================================================================
    // LAYOUT TRANSITIONS
    // =========================================================================

    /// Move `image` between layouts with a blocking one-shot submission.
    /// Unknown pairs are rejected before anything touches the driver.
    pub fn change_layout(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let transition = LayoutTransition::between(old_layout, new_layout)?;

        submit_one_time(&self.device, self.command_pool, |cmd| {
            transition.record(&self.device.device, cmd, image);
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    /// Slot the next `draw` will use
    pub fn frame_slot(&self) -> usize {
        self.frames.current()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Draws completed through each slot, i.e. fence wait/reset cycles
    pub fn completed_per_slot(&self) -> &[u64] {
        self.frames.completed()
    }

    /// Fence wait/reset cycles per slot; one per draw through that slot
    pub fn fence_cycles_per_slot(&self) -> &[u64] {
        self.frames.fence_cycles()
    }

    pub fn offscreen(&self) -> Option<&OffscreenTarget> {
        self.offscreen.as_ref()
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        log::info!("Destroying presenter...");

        let _ = self.device.wait_idle();
        let device = &self.device.device;

        // Handles never created are still null; the driver ignores those
        self.vertices.destroy(device);

        unsafe {
            for sync in &self.frame_sync {
                sync.destroy(device);
            }

            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);

            // Also frees the command buffers
            device.destroy_command_pool(self.command_pool, None);

            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_render_pass(self.render_pass, None);
        }

        if let Some(offscreen) = &self.offscreen {
            offscreen.destroy(device);
        }

        // Swapchain image views and the swapchain go when the field drops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "fifo"
            min_image_count = 3
            clear_color = [0.2, 0.2, 0.2, 1.0]

            [shaders]
            vertex = "build/tri.vert.spv"

            [offscreen]
            enabled = false
            "#,
        )
        .unwrap();

        let settings = PresenterSettings::from_config(&config);
        assert_eq!(settings.swapchain.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(settings.swapchain.min_image_count, 3);
        assert_eq!(settings.swapchain.surface_format.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(settings.clear_color, [0.2, 0.2, 0.2, 1.0]);
        assert_eq!(settings.vertex_shader, PathBuf::from("build/tri.vert.spv"));
        assert_eq!(settings.fragment_shader, PathBuf::from("shaders/frag.spv"));
        assert!(!settings.offscreen);
    }

    fn temp_spirv(name: &str) -> PathBuf {
        let mut bytes = Vec::new();
        for word in [0x0723_0203u32, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let path = std::env::temp_dir().join(format!("viewport-triangle-{}-{}", std::process::id(), name));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn settings_with(vertex: PathBuf, fragment: PathBuf) -> PresenterSettings {
        let mut settings = PresenterSettings::from_config(&Config::default());
        settings.vertex_shader = vertex;
        settings.fragment_shader = fragment;
        settings
    }

    #[test]
    fn shaders_load_before_any_device_work() {
        let vert = temp_spirv("stage.vert.spv");
        let frag = temp_spirv("stage.frag.spv");

        let code = settings_with(vert.clone(), frag.clone()).load_shaders().unwrap();
        assert_eq!(code.vertex.len(), 5);
        assert_eq!(code.fragment[0], 0x0723_0203);

        std::fs::remove_file(vert).ok();
        std::fs::remove_file(frag).ok();
    }

    #[test]
    fn missing_fragment_stage_is_named() {
        let vert = temp_spirv("only.vert.spv");
        let settings = settings_with(vert.clone(), PathBuf::from("no/such/frag.spv"));

        let message = format!("{:#}", settings.load_shaders().unwrap_err());
        assert!(message.starts_with("Fragment stage"), "{}", message);
        assert!(message.contains("no/such/frag.spv"), "{}", message);

        std::fs::remove_file(vert).ok();
    }
}
