use std::sync::Arc;

use ash::vk;

use crate::error::Result;

use super::{
    acceleration_structure::AccelerationStructure, buffer::Buffer, context::Context, image::Image,
};

pub struct DescriptorPool {
    pub inner: vk::DescriptorPool,
    context: Arc<Context>,
}

impl DescriptorPool {
    pub fn new(context: Arc<Context>, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let inner = unsafe { context.device.create_descriptor_pool(&create_info, None) }?;
        Ok(Self { inner, context })
    }

    /// Pool sizes for `set_count` sets that all use `bindings`.
    pub fn sizes_for(
        bindings: &[vk::DescriptorSetLayoutBinding],
        set_count: u32,
    ) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = vec![];
        for binding in bindings {
            let count = binding.descriptor_count * set_count;
            match sizes.iter_mut().find(|size| size.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: count,
                }),
            }
        }
        sizes
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        // Frees every set allocated from the pool
        unsafe { self.context.device.destroy_descriptor_pool(self.inner, None) };
    }
}

pub struct DescriptorSet {
    pub inner: vk::DescriptorSet,
}

impl DescriptorSet {
    pub fn new(
        context: &Context,
        descriptor_pool: &DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
        write_descriptor_sets: &[WriteDescriptorSet],
    ) -> Result<Self> {
        let device = &context.device;
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool.inner)
            .set_layouts(std::slice::from_ref(&set_layout));

        let descriptor_set = unsafe { device.allocate_descriptor_sets(&allocate_info) }?[0];

        // Acceleration structures are written through an extension struct that has to outlive the update
        let mut acceleration_structure_writes: Vec<vk::WriteDescriptorSetAccelerationStructureKHR> =
            write_descriptor_sets
                .iter()
                .map(|write| match &write.info {
                    DescriptorInfo::AccelerationStructure(handle) => {
                        vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                            .acceleration_structures(std::slice::from_ref(handle))
                            .build()
                    }
                    _ => vk::WriteDescriptorSetAccelerationStructureKHR::default(),
                })
                .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = write_descriptor_sets
            .iter()
            .zip(acceleration_structure_writes.iter_mut())
            .map(|(write, acceleration_structure_write)| {
                let mut vk_write = vk::WriteDescriptorSet::builder()
                    .dst_binding(write.binding)
                    .descriptor_type(write.info.descriptor_type())
                    .dst_set(descriptor_set);

                match &write.info {
                    DescriptorInfo::UniformBuffer(info) | DescriptorInfo::StorageBuffer(info) => {
                        vk_write = vk_write.buffer_info(std::slice::from_ref(info))
                    }
                    DescriptorInfo::StorageImage(info) => {
                        vk_write = vk_write.image_info(std::slice::from_ref(info))
                    }
                    DescriptorInfo::AccelerationStructure(_) => {
                        vk_write = vk_write.push_next(acceleration_structure_write);
                        vk_write.descriptor_count = 1;
                    }
                }
                vk_write.build()
            })
            .collect();

        unsafe { device.update_descriptor_sets(&vk_writes, &[]) };

        Ok(Self {
            inner: descriptor_set,
        })
    }
}

pub struct WriteDescriptorSet {
    binding: u32,
    info: DescriptorInfo,
}

pub enum DescriptorInfo {
    UniformBuffer(vk::DescriptorBufferInfo),
    StorageBuffer(vk::DescriptorBufferInfo),
    StorageImage(vk::DescriptorImageInfo),
    AccelerationStructure(vk::AccelerationStructureKHR),
}

impl DescriptorInfo {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            DescriptorInfo::UniformBuffer(_) => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorInfo::StorageBuffer(_) => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorInfo::StorageImage(_) => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorInfo::AccelerationStructure(_) => {
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
            }
        }
    }
}

impl WriteDescriptorSet {
    pub fn uniform_buffer<T: Copy>(binding: u32, buffer: &Buffer<T>) -> WriteDescriptorSet {
        WriteDescriptorSet {
            binding,
            info: DescriptorInfo::UniformBuffer(buffer.descriptor_info()),
        }
    }

    pub fn storage_buffer<T: Copy>(binding: u32, buffer: &Buffer<T>) -> WriteDescriptorSet {
        WriteDescriptorSet {
            binding,
            info: DescriptorInfo::StorageBuffer(buffer.descriptor_info()),
        }
    }

    pub fn storage_image_with_layout(
        binding: u32,
        image: &Image,
        image_layout: vk::ImageLayout,
    ) -> WriteDescriptorSet {
        WriteDescriptorSet {
            binding,
            info: DescriptorInfo::StorageImage(image.descriptor_info(image_layout)),
        }
    }

    pub fn acceleration_structure(
        binding: u32,
        acceleration_structure: &AccelerationStructure,
    ) -> WriteDescriptorSet {
        WriteDescriptorSet {
            binding,
            info: DescriptorInfo::AccelerationStructure(acceleration_structure.inner),
        }
    }
}
