// Backend module - Vulkan abstraction layer
//
// Design: Thin wrappers around ash, one concern per file.
// The presenter composes them; nothing here knows about the triangle
// except the vertex layout in `pipeline`.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod offscreen;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::{VulkanDevice, WindowHandles};
pub use swapchain::{Swapchain, SwapchainRequest};
