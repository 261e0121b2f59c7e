pub mod acceleration_structure;
pub mod allocator;
pub mod buffer;
pub mod command_pool;
pub mod context;
pub mod descriptor_set;
pub mod image;
pub mod shader_binding_table;
pub mod shader_create_info;
pub mod swapchain;
pub mod window_settings;
