use std::{ffi::CStr, io::Cursor, path::Path, sync::Arc};

use ash::vk;

use crate::error::{RendererError, Result};

use super::context::Context;

/// A shader module loaded from a SPIR-V file, destroyed once the pipeline has been created.
pub struct ShaderCreateInfo {
    context: Arc<Context>,
    stage: vk::ShaderStageFlags,
    shader_module: vk::ShaderModule,
}

const SHADER_ENTRY_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

impl ShaderCreateInfo {
    pub fn from_file(
        context: Arc<Context>,
        stage: vk::ShaderStageFlags,
        path: &Path,
    ) -> Result<Self> {
        let shader_load_error = |source| RendererError::ShaderLoad {
            path: path.to_path_buf(),
            source,
        };

        let bytes = std::fs::read(path).map_err(shader_load_error)?;
        let shader_code =
            ash::util::read_spv(&mut Cursor::new(&bytes[..])).map_err(shader_load_error)?;

        let shader_module = {
            let create_info = vk::ShaderModuleCreateInfo::builder().code(&shader_code);
            unsafe { context.device.create_shader_module(&create_info, None) }?
        };

        log::debug!("Loaded {stage:?} shader from {}", path.display());

        Ok(Self {
            context,
            stage,
            shader_module,
        })
    }

    pub fn build(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .module(self.shader_module)
            .name(SHADER_ENTRY_NAME)
            .stage(self.stage)
            .build()
    }
}

impl Drop for ShaderCreateInfo {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device
                .destroy_shader_module(self.shader_module, None);
        }
    }
}
