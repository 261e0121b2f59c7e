use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::vulkan::window_settings::PresentMode;

/// Where the build script puts the compiled shaders.
pub const COMPILED_SHADER_DIRECTORY: &str = concat!(env!("OUT_DIR"), "/shaders");

/// Everything the renderer needs to know before it is constructed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RendererSettings {
    pub window_width: u32,
    pub window_height: u32,
    pub present_mode: PresentMode,
    pub shader_directory: PathBuf,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            window_width: 1200,
            window_height: 675,
            present_mode: PresentMode::default(),
            shader_directory: PathBuf::from(COMPILED_SHADER_DIRECTORY),
        }
    }
}
