// Minimal Vulkan presenter: one window, one colored triangle, strict
// capability negotiation and a frame-slot ring.

pub mod backend;
pub mod config;
pub mod error;
pub mod presenter;

pub use config::Config;
pub use error::RendererError;
pub use presenter::{Presenter, PresenterSettings};
