use std::sync::Arc;

use ash::vk;
use crevice::std140::AsStd140;

use crate::{
    error::Result,
    render::shader_types::{GpuPrimitive, Std140GpuPrimitive},
    scene::{Scene, SCENE_CAPACITY},
    vulkan::{
        acceleration_structure::AccelerationStructure,
        allocator::{Allocator, MemoryUsage},
        buffer::Buffer,
        command_pool::CommandPool,
    },
};

/// The scene as the GPU sees it. Read-only once uploaded, shared by every frame slot.
// Rust will drop these fields in the order they are declared, the top level goes first
pub struct GpuScene {
    pub top: AccelerationStructure,
    pub bottom: AccelerationStructure,
    pub primitives: Buffer<Std140GpuPrimitive>,
    pub primitive_count: usize,
}

impl GpuScene {
    pub fn upload(
        allocator: Arc<Allocator>,
        command_pool: &CommandPool,
        scene: &Scene,
    ) -> Result<Self> {
        debug_assert!(scene.validate().is_ok(), "Scene contains invalid primitives");

        let gpu_primitives: Vec<Std140GpuPrimitive> = scene
            .primitives()
            .iter()
            .map(|primitive| GpuPrimitive::from(primitive).as_std140())
            .collect();

        // Sized for a full scene, so the shaders see the same buffer size regardless of the scene
        let primitives: Buffer<Std140GpuPrimitive> = Buffer::new(
            allocator.clone(),
            "scene primitives",
            (SCENE_CAPACITY * std::mem::size_of::<Std140GpuPrimitive>()) as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryUsage::HostToDevice,
        )?;
        primitives.copy_data(&gpu_primitives);

        let bottom =
            AccelerationStructure::build_bottom(allocator.clone(), command_pool, scene.primitives())?;
        let top = AccelerationStructure::build_top(allocator, command_pool, &bottom)?;

        log::info!("Uploaded scene with {} primitives", scene.len());

        Ok(Self {
            top,
            bottom,
            primitives,
            primitive_count: scene.len(),
        })
    }
}
