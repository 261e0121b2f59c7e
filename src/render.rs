pub mod frame;
pub mod frame_pacer;
pub mod pipeline;
pub mod semaphore_pool;
pub mod shader_types;
