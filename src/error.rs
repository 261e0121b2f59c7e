use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RendererError>;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Could not load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("No GPU supports the required capabilities ({missing})")]
    NoCompatibleDevice { missing: String },

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("Could not read shader binary {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("The display surface is out of date")]
    SurfaceOutOfDate,

    #[error("Timed out while waiting for a presentable image")]
    AcquireTimeout,

    #[error("No free image-acquired semaphore is left in the pool")]
    SemaphorePoolExhausted,

    #[error("Scene is full, it holds at most {capacity} primitives")]
    SceneFull { capacity: usize },

    #[error("Invalid primitive: {0}")]
    InvalidPrimitive(&'static str),

    #[error("Could not save image: {0}")]
    Image(#[from] image::ImageError),
}
