// Shader module loading
//
// Shaders arrive as pre-compiled SPIR-V files. We only read them, check
// they are word-aligned SPIR-V and hand the words to the driver.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use super::VulkanDevice;

/// Read a SPIR-V binary from disk
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to open shader file {:?}", path))?;

    // read_spv takes care of alignment and the magic number / endianness
    ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .with_context(|| format!("Shader file {:?} is not valid SPIR-V", path))
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder()
        .code(code);

    unsafe {
        device.device.create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("viewport-triangle-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_spirv(Path::new("no/such/dir/vert.spv")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open shader file"));
    }

    #[test]
    fn reads_words() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let path = temp_file("ok.spv", &bytes);

        let words = load_spirv(&path).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn truncated_file_is_rejected() {
        let path = temp_file("truncated.spv", &[0x03, 0x02, 0x23, 0x07, 0x00, 0x00]);
        assert!(load_spirv(&path).is_err());
        std::fs::remove_file(path).ok();
    }
}
