// Shader module loading
//
// Shaders are SPIR-V binaries on disk, compiled by build.rs (or by hand with
// glslc). A missing file, a length that is not a multiple of four or a bad
// magic number is reported with the offending path.

use ash::vk;
use std::fs::File;
use std::path::Path;

use super::VulkanDevice;
use crate::error::GpuError;

/// Read and validate a SPIR-V binary.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>, GpuError> {
    let shader_error = |source| GpuError::Shader {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(shader_error)?;
    ash::util::read_spv(&mut file).map_err(shader_error)
}

/// Load SPIR-V from `path` and create a shader module
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule, GpuError> {
    let code = read_spirv(path)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    let module = unsafe { device.device.create_shader_module(&create_info, None)? };
    log::debug!("Loaded shader {:?} ({} words)", path, code.len());
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn scratch_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("particle-frames-{}-{name}", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn missing_file_names_the_path() {
        let path = Path::new("definitely/not/here.spv");
        match read_spirv(path) {
            Err(GpuError::Shader { path: p, source }) => {
                assert_eq!(p, path);
                assert_eq!(source.kind(), ErrorKind::NotFound);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn truncated_binary_is_rejected() {
        let path = scratch_file("truncated.spv", &[0x03, 0x02, 0x23, 0x07, 0x00]);
        assert!(matches!(read_spirv(&path), Err(GpuError::Shader { .. })));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn bad_magic_is_rejected() {
        let path = scratch_file("magic.spv", &[0u8; 8]);
        assert!(matches!(read_spirv(&path), Err(GpuError::Shader { .. })));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn valid_header_is_accepted() {
        let mut bytes = 0x0723_0203u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let path = scratch_file("header.spv", &bytes);
        assert_eq!(read_spirv(&path).unwrap(), vec![0x0723_0203, 0x0001_0000]);
        std::fs::remove_file(path).unwrap();
    }
}
