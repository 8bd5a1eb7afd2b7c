//! Shader modules and shader libraries. SPIR-V enters as a raw little-endian
//! byte stream whose length must be a multiple of 4.

use std::sync::Arc;

use ash::vk;

use crate::error::{Result, RhiError};
use crate::types::{ShaderDesc, ShaderStage};

use super::VulkanContext;

pub struct Shader {
    context: Arc<VulkanContext>,
    pub(crate) module: vk::ShaderModule,
    pub desc: ShaderDesc,
    bytecode: Vec<u32>,
}

pub type ShaderHandle = Arc<Shader>;

pub(crate) fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(RhiError::InvalidArgument(
            "SPIR-V byte length must be a non-zero multiple of 4",
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub(crate) fn create_shader(
    context: &Arc<VulkanContext>,
    desc: ShaderDesc,
    bytes: &[u8],
) -> Result<ShaderHandle> {
    let bytecode = spirv_words(bytes)?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&bytecode);
    let module = unsafe { context.device.create_shader_module(&create_info, None)? };

    Ok(Arc::new(Shader {
        context: Arc::clone(context),
        module,
        desc,
        bytecode,
    }))
}

impl Shader {
    pub fn bytecode(&self) -> &[u32] {
        &self.bytecode
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_shader_module(self.module, None);
        }
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("stage", &self.desc.stage)
            .field("entry", &self.desc.entry)
            .finish_non_exhaustive()
    }
}

/// A single SPIR-V module exposing multiple entry points.
pub struct ShaderLibrary {
    context: Arc<VulkanContext>,
    bytecode: Vec<u32>,
}

pub type ShaderLibraryHandle = Arc<ShaderLibrary>;

pub(crate) fn create_shader_library(
    context: &Arc<VulkanContext>,
    bytes: &[u8],
) -> Result<ShaderLibraryHandle> {
    let bytecode = spirv_words(bytes)?;
    Ok(Arc::new(ShaderLibrary {
        context: Arc::clone(context),
        bytecode,
    }))
}

impl ShaderLibrary {
    pub fn bytecode(&self) -> &[u32] {
        &self.bytecode
    }

    /// Creates a shader for one entry point of the library.
    pub fn get_shader(&self, entry: &str, stage: ShaderStage) -> Result<ShaderHandle> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(&self.bytecode);
        let module = unsafe { self.context.device.create_shader_module(&create_info, None)? };
        Ok(Arc::new(Shader {
            context: Arc::clone(&self.context),
            module,
            desc: ShaderDesc {
                stage,
                entry: entry.to_string(),
                debug_name: String::new(),
            },
            bytecode: self.bytecode.clone(),
        }))
    }
}

impl std::fmt::Debug for ShaderLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderLibrary")
            .field("words", &self.bytecode.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_words_requires_aligned_input() {
        assert!(spirv_words(&[1, 2, 3]).is_err());
        assert!(spirv_words(&[]).is_err());
        let words = spirv_words(&[0x03, 0x02, 0x23, 0x07]).unwrap();
        assert_eq!(words, vec![0x0723_0203]);
    }
}
