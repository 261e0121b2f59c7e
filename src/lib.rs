pub mod capture;
pub mod config_loader;
pub mod error;
pub mod render;
pub mod render_call_info;
pub mod renderer;
pub mod scene;
pub mod scene_uploader;
pub mod settings;
pub mod utility;
pub mod vulkan;
pub mod window;

pub use capture::Capture;
pub use error::{RendererError, Result};
pub use render_call_info::RenderCallInfo;
pub use renderer::Renderer;
pub use scene::{Primitive, Scene};
pub use settings::RendererSettings;
