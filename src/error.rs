// Renderer errors
//
// Capability negotiation and unsupported operations get their own variants
// so callers can tell them apart. Plain driver failures travel as
// anyhow errors with context attached.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendererError {
    /// Every enumerated accelerator scored zero (or none were found).
    #[error("failed to find a suitable graphics device")]
    NoSuitableDevice,

    #[error("no queue family supports {0:?}")]
    NoQueueFamily(vk::QueueFlags),

    #[error("vkCreateDebugUtilsMessengerEXT is unavailable; is VK_EXT_debug_utils enabled?")]
    DebugMessengerUnavailable,

    #[error("surface format {format:?} / {color_space:?} is not available")]
    SurfaceFormatUnavailable {
        format: vk::Format,
        color_space: vk::ColorSpaceKHR,
    },

    #[error("present mode {0:?} is not available")]
    PresentModeUnavailable(vk::PresentModeKHR),

    /// The platform left the extent up to us, which we don't negotiate.
    #[error("surface reports an undefined extent")]
    UndefinedExtent,

    #[error("queue family {0} cannot present to this surface")]
    PresentationUnsupported(u32),

    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
}
