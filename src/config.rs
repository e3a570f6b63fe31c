// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
    pub offscreen: OffscreenConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Swapchain recreation is not supported, so this stays off unless
    /// you want resizes to end the program.
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Game Engine 2D".to_string(),
            width: 500,
            height: 500,
            resizable: false,
        }
    }
}

/// Swapchain and frame settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub surface_format: String,
    pub present_mode: String,
    pub min_image_count: u32,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            surface_format: "b8g8r8a8_unorm".to_string(),
            present_mode: "mailbox".to_string(),
            min_image_count: 2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Pre-compiled SPIR-V locations, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/vert.spv"),
            fragment: PathBuf::from("shaders/frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

/// Render-to-texture scaffolding. Never read by the draw path.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OffscreenConfig {
    pub enabled: bool,
}

impl Default for OffscreenConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Where the loaded values came from. Produced before the logger exists,
/// so `main` reports it once logging is up.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    /// The file exists but could not be read or parsed; defaults are in use
    Fallback { path: PathBuf, error: anyhow::Error },
}

impl ConfigSource {
    pub fn level(&self) -> log::Level {
        match self {
            ConfigSource::Fallback { .. } => log::Level::Warn,
            _ => log::Level::Info,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ConfigSource::File(path) => format!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => {
                format!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Fallback { path, error } => {
                format!("Failed to load {:?}: {:#}. Using defaults.", path, error)
            }
        }
    }

    pub fn report(&self) {
        log::log!(self.level(), "{}", self.message());
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to defaults
    pub fn load() -> (Self, ConfigSource) {
        Self::load_or_default("config.toml")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return (Config::default(), ConfigSource::Missing(path));
        }

        match Self::load_from_path(&path) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(error) => (Config::default(), ConfigSource::Fallback { path, error }),
        }
    }

    /// Read and parse a specific file; a missing file is an error here
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Desired present mode. Support is negotiated later; this only names it.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            other => {
                log::warn!("Unknown present mode '{}', defaulting to MAILBOX", other);
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Desired surface format; the color space is always sRGB-nonlinear.
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        let format = match self.graphics.surface_format.to_lowercase().as_str() {
            "b8g8r8a8_unorm" => vk::Format::B8G8R8A8_UNORM,
            "b8g8r8a8_srgb" => vk::Format::B8G8R8A8_SRGB,
            "r8g8b8a8_unorm" => vk::Format::R8G8B8A8_UNORM,
            "r8g8b8a8_srgb" => vk::Format::R8G8B8A8_SRGB,
            other => {
                log::warn!("Unknown surface format '{}', defaulting to B8G8R8A8_UNORM", other);
                vk::Format::B8G8R8A8_UNORM
            }
        };

        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        log::LevelFilter::from_str(&self.debug.log_level).unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 500);
        assert_eq!(config.graphics.min_image_count, 2);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.surface_format().format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/vert.spv"));
        assert!(config.offscreen.enabled);
        assert!(!config.window.resizable);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "FIFO"
            clear_color = [0.1, 0.2, 0.3, 1.0]

            [offscreen]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.graphics.surface_format, "b8g8r8a8_unorm");
        assert!(!config.offscreen.enabled);
        assert_eq!(config.window.title, "Game Engine 2D");
    }

    #[test]
    fn unknown_names_fall_back() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "vsync-please"
            surface_format = "rgb565"

            [debug]
            log_level = "chatty"
            "#,
        )
        .unwrap();

        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.surface_format().format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(
            config.surface_format().color_space,
            vk::ColorSpaceKHR::SRGB_NONLINEAR
        );
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window\nwidth = ").is_err());
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("viewport-triangle-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let (config, source) = Config::load_or_default("definitely/not/here/config.toml");
        assert_eq!(config.graphics.present_mode, "mailbox");
        assert!(matches!(source, ConfigSource::Missing(_)));
        assert_eq!(source.level(), log::Level::Info);
        assert!(Config::load_from_path("definitely/not/here/config.toml").is_err());
    }

    #[test]
    fn malformed_file_falls_back_with_a_warning() {
        let path = temp_config("broken.toml", "[window\nwidth = ");

        let (config, source) = Config::load_or_default(&path);
        assert_eq!(config.window.width, 500);
        assert!(matches!(source, ConfigSource::Fallback { .. }));
        assert_eq!(source.level(), log::Level::Warn);

        let message = source.message();
        assert!(message.contains("Using defaults"), "{}", message);
        assert!(message.contains("broken.toml"), "{}", message);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn readable_file_is_reported_as_loaded() {
        let path = temp_config("good.toml", "[window]\nwidth = 640\n");

        let (config, source) = Config::load_or_default(&path);
        assert_eq!(config.window.width, 640);
        assert!(matches!(source, ConfigSource::File(ref p) if *p == path));
        assert!(source.message().starts_with("Loaded configuration"));

        std::fs::remove_file(path).ok();
    }
}
