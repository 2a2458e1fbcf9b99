//! SPIR-V shader module loading.

use std::io::Cursor;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Compiled shader module.
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Creates a module from a SPIR-V blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is not valid SPIR-V (wrong alignment,
    /// wrong magic) or module creation fails.
    pub fn from_spirv_bytes(device: Arc<Device>, bytes: &[u8], label: &str) -> RhiResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let code = ash::util::read_spv(&mut cursor)
            .map_err(|e| RhiError::ShaderError(format!("{label}: {e}")))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!("shader module '{}' created ({} bytes)", label, bytes.len());

        Ok(Self { device, module })
    }

    /// Raw module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
    }
}
