use std::{mem::size_of, sync::Arc};

use ash::vk;

use crate::{error::Result, scene::Primitive};

use super::{
    allocator::{Allocator, MemoryUsage},
    buffer::Buffer,
    command_pool::CommandPool,
    context::Context,
};

const IDENTITY_TRANSFORM: vk::TransformMatrixKHR = vk::TransformMatrixKHR {
    matrix: [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0,
    ],
};

// Instance records and AABBs have to start at these offsets in their buffers
const INSTANCE_BUFFER_ALIGNMENT: vk::DeviceSize = 16;
const AABB_BUFFER_ALIGNMENT: vk::DeviceSize = 8;

// Rust will drop these fields in the order they are declared
pub struct AccelerationStructure {
    pub inner: vk::AccelerationStructureKHR,
    pub device_address: vk::DeviceAddress,
    pub buffer: Buffer<u8>,
    instances: Option<Buffer<vk::AccelerationStructureInstanceKHR>>,
    context: Arc<Context>,
}

impl AccelerationStructure {
    // See https://github.com/SaschaWillems/Vulkan/blob/a467d941599a2cef5bd0eff696999bca8d75ee23/base/VulkanRaytracingSample.cpp#L149
    pub fn new(
        allocator: Arc<Allocator>,
        structure_type: vk::AccelerationStructureTypeKHR,
        build_size_info: vk::AccelerationStructureBuildSizesInfoKHR,
    ) -> Result<Self> {
        let context = allocator.context.clone();
        let buffer: Buffer<u8> = Buffer::new(
            allocator,
            "acceleration structure storage",
            build_size_info.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryUsage::DeviceLocal,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.inner)
            .size(build_size_info.acceleration_structure_size)
            .ty(structure_type);

        let inner = unsafe {
            context
                .context_raytracing
                .acceleration_structure
                .create_acceleration_structure(&create_info, None)
        }?;

        let device_address = {
            let acceleration_structure_device_address_info =
                vk::AccelerationStructureDeviceAddressInfoKHR::builder()
                    .acceleration_structure(inner);

            unsafe {
                context
                    .context_raytracing
                    .acceleration_structure
                    .get_acceleration_structure_device_address(
                        &acceleration_structure_device_address_info,
                    )
            }
        };

        Ok(Self {
            inner,
            device_address,
            buffer,
            instances: None,
            context,
        })
    }

    /// Builds the bottom level structure: one AABB geometry with a box per primitive.
    pub fn build_bottom(
        allocator: Arc<Allocator>,
        command_pool: &CommandPool,
        primitives: &[Primitive],
    ) -> Result<Self> {
        let aabbs: Vec<vk::AabbPositionsKHR> = primitives.iter().map(aabb_from_primitive).collect();

        let aabb_buffer: Buffer<vk::AabbPositionsKHR> = Buffer::with_data(
            allocator.clone(),
            "sphere bounding boxes",
            &aabbs,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            AABB_BUFFER_ALIGNMENT,
        )?;

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::AABBS)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                aabbs: vk::AccelerationStructureGeometryAabbsDataKHR::builder()
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: aabb_buffer.get_device_address(),
                    })
                    .stride(size_of::<vk::AabbPositionsKHR>() as u64)
                    .build(),
            })
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .build();

        // The AABB buffer is dropped once the build has finished
        build(
            allocator,
            command_pool,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            geometry,
            aabbs.len() as u32,
        )
    }

    /// Builds the top level structure with a single instance of `bottom`.
    pub fn build_top(
        allocator: Arc<Allocator>,
        command_pool: &CommandPool,
        bottom: &AccelerationStructure,
    ) -> Result<Self> {
        let instances = [vk::AccelerationStructureInstanceKHR {
            transform: IDENTITY_TRANSFORM,
            instance_custom_index_and_mask: vk::Packed24_8::new(0, 0xff),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                0,
                vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: bottom.device_address,
            },
        }];

        let instance_buffer: Buffer<vk::AccelerationStructureInstanceKHR> = Buffer::with_data(
            allocator.clone(),
            "top level instances",
            &instances[..],
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            INSTANCE_BUFFER_ALIGNMENT,
        )?;

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: instance_buffer.get_device_address(),
                    })
                    .build(),
            })
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .build();

        let mut top = build(
            allocator,
            command_pool,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            geometry,
            instances.len() as u32,
        )?;
        top.instances = Some(instance_buffer);
        Ok(top)
    }
}

fn build(
    allocator: Arc<Allocator>,
    command_pool: &CommandPool,
    structure_type: vk::AccelerationStructureTypeKHR,
    geometry: vk::AccelerationStructureGeometryKHR,
    primitive_count: u32,
) -> Result<AccelerationStructure> {
    let context = allocator.context.clone();
    let loader = &context.context_raytracing.acceleration_structure;

    let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
        .ty(structure_type)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(std::slice::from_ref(&geometry))
        .build();

    let build_size_info = unsafe {
        loader.get_acceleration_structure_build_sizes(
            vk::AccelerationStructureBuildTypeKHR::DEVICE,
            &build_info,
            &[primitive_count],
        )
    };
    log::info!(
        "{:?} acceleration structure: {} primitives, {} bytes storage, {} bytes scratch",
        structure_type,
        primitive_count,
        build_size_info.acceleration_structure_size,
        build_size_info.build_scratch_size
    );

    let acceleration_structure =
        AccelerationStructure::new(allocator.clone(), structure_type, build_size_info)?;

    let scratch_alignment = context
        .acceleration_structure_properties()
        .min_acceleration_structure_scratch_offset_alignment as vk::DeviceSize;
    let scratch_buffer: Buffer<u8> = Buffer::new_aligned(
        allocator,
        "acceleration structure scratch",
        build_size_info.build_scratch_size,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryUsage::DeviceLocal,
        scratch_alignment.max(1),
    )?;

    build_info.dst_acceleration_structure = acceleration_structure.inner;
    build_info.scratch_data = vk::DeviceOrHostAddressKHR {
        device_address: scratch_buffer.get_device_address(),
    };

    let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .primitive_count(primitive_count)
        .primitive_offset(0)
        .first_vertex(0)
        .transform_offset(0)
        .build();

    command_pool.submit_and_wait(|command_buffer| unsafe {
        loader.cmd_build_acceleration_structures(
            command_buffer,
            std::slice::from_ref(&build_info),
            &[std::slice::from_ref(&build_range_info)],
        )
    })?;

    // The scratch buffer is only needed while building
    drop(scratch_buffer);

    Ok(acceleration_structure)
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.context
                .context_raytracing
                .acceleration_structure
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}

/// Axis aligned box that tightly encloses a sphere primitive.
pub fn aabb_from_primitive(primitive: &Primitive) -> vk::AabbPositionsKHR {
    let center = primitive.center();
    let radius = primitive.radius();
    vk::AabbPositionsKHR {
        min_x: center.x - radius,
        min_y: center.y - radius,
        min_z: center.z - radius,
        max_x: center.x + radius,
        max_y: center.y + radius,
        max_z: center.z + radius,
    }
}
