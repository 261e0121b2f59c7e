use std::{path::Path, sync::Arc};

use ash::vk;

use crate::{
    error::Result,
    vulkan::{
        context::Context,
        shader_binding_table::{GROUP_COUNT, HIT_GROUP, MISS_GROUP, RAYGEN_GROUP},
        shader_create_info::ShaderCreateInfo,
    },
};

pub const ACCUMULATION_BINDING: u32 = 0;
pub const RENDER_TARGET_BINDING: u32 = 1;
pub const ACCELERATION_STRUCTURE_BINDING: u32 = 2;
pub const PRIMITIVE_BINDING: u32 = 3;
pub const FRAME_UNIFORM_BINDING: u32 = 4;

pub const RAYGEN_SHADER: &str = "raygen.rgen.spv";
pub const MISS_SHADER: &str = "miss.rmiss.spv";
pub const INTERSECTION_SHADER: &str = "sphere.rint.spv";
pub const CLOSEST_HIT_SHADER: &str = "sphere.rchit.spv";

// Bounces are traced in a loop in the ray generation shader, closest hit shaders do not recurse
const MAX_RAY_RECURSION_DEPTH: u32 = 1;

pub struct RayTracingPipeline {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    context: Arc<Context>,
}

impl RayTracingPipeline {
    pub fn new(context: Arc<Context>, shader_directory: &Path) -> Result<Self> {
        let descriptor_set_layout = {
            let bindings = Self::bindings();
            let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
            unsafe {
                context
                    .device
                    .create_descriptor_set_layout(&create_info, None)
            }?
        };

        // From here on the partially built pipeline cleans up after itself
        let mut pipeline = RayTracingPipeline {
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_set_layout,
            context: context.clone(),
        };

        pipeline.pipeline_layout = {
            let create_info = vk::PipelineLayoutCreateInfo::builder()
                .set_layouts(std::slice::from_ref(&descriptor_set_layout));
            unsafe { context.device.create_pipeline_layout(&create_info, None) }?
        };

        let shaders = [
            (vk::ShaderStageFlags::RAYGEN_KHR, RAYGEN_SHADER),
            (vk::ShaderStageFlags::MISS_KHR, MISS_SHADER),
            (vk::ShaderStageFlags::INTERSECTION_KHR, INTERSECTION_SHADER),
            (vk::ShaderStageFlags::CLOSEST_HIT_KHR, CLOSEST_HIT_SHADER),
        ]
        .into_iter()
        .map(|(stage, file_name)| {
            ShaderCreateInfo::from_file(context.clone(), stage, &shader_directory.join(file_name))
        })
        .collect::<Result<Vec<_>>>()?;

        let stages: Vec<vk::PipelineShaderStageCreateInfo> =
            shaders.iter().map(ShaderCreateInfo::build).collect();

        let groups = Self::shader_groups();

        let create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(MAX_RAY_RECURSION_DEPTH)
            .layout(pipeline.pipeline_layout)
            .build();

        let pipelines = unsafe {
            context
                .context_raytracing
                .ray_tracing_pipeline
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&create_info),
                    None,
                )
        }?;
        pipeline.pipeline = pipelines[0];

        Ok(pipeline)
    }

    pub fn bindings() -> [vk::DescriptorSetLayoutBinding; 5] {
        let binding = |binding: u32,
                       descriptor_type: vk::DescriptorType,
                       stage_flags: vk::ShaderStageFlags| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_count(1)
                .descriptor_type(descriptor_type)
                .stage_flags(stage_flags)
                .build()
        };

        [
            binding(
                ACCUMULATION_BINDING,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::RAYGEN_KHR,
            ),
            binding(
                RENDER_TARGET_BINDING,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::RAYGEN_KHR,
            ),
            binding(
                ACCELERATION_STRUCTURE_BINDING,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                vk::ShaderStageFlags::RAYGEN_KHR,
            ),
            binding(
                PRIMITIVE_BINDING,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::INTERSECTION_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            ),
            binding(
                FRAME_UNIFORM_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::RAYGEN_KHR,
            ),
        ]
    }

    /// Groups in table order. Stage indices refer to the order the shaders are loaded in.
    fn shader_groups() -> [vk::RayTracingShaderGroupCreateInfoKHR; GROUP_COUNT as usize] {
        let general = |shader: u32| {
            vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(shader)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
                .build()
        };

        let mut groups = [vk::RayTracingShaderGroupCreateInfoKHR::default(); GROUP_COUNT as usize];
        groups[RAYGEN_GROUP as usize] = general(0);
        groups[MISS_GROUP as usize] = general(1);
        groups[HIT_GROUP as usize] = vk::RayTracingShaderGroupCreateInfoKHR::builder()
            .ty(vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP)
            .general_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(2)
            .closest_hit_shader(3)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .build();
        groups
    }
}

impl Drop for RayTracingPipeline {
    fn drop(&mut self) {
        let device = &self.context.device;

        unsafe { device.destroy_pipeline(self.pipeline, None) };
        unsafe { device.destroy_pipeline_layout(self.pipeline_layout, None) };
        unsafe { device.destroy_descriptor_set_layout(self.descriptor_set_layout, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_match_the_table_order() {
        let groups = RayTracingPipeline::shader_groups();

        assert_eq!(groups[RAYGEN_GROUP as usize].ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(groups[RAYGEN_GROUP as usize].general_shader, 0);
        assert_eq!(groups[MISS_GROUP as usize].general_shader, 1);

        let hit = groups[HIT_GROUP as usize];
        assert_eq!(hit.ty, vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP);
        assert_eq!(hit.intersection_shader, 2);
        assert_eq!(hit.closest_hit_shader, 3);
        assert_eq!(hit.general_shader, vk::SHADER_UNUSED_KHR);
    }

    #[test]
    fn bindings_are_numbered_in_order() {
        let bindings = RayTracingPipeline::bindings();
        for (index, binding) in bindings.iter().enumerate() {
            assert_eq!(binding.binding, index as u32);
            assert_eq!(binding.descriptor_count, 1);
        }
        assert_eq!(
            bindings[PRIMITIVE_BINDING as usize].descriptor_type,
            vk::DescriptorType::STORAGE_BUFFER
        );
    }
}
