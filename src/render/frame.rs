use std::sync::Arc;

use ash::vk::{self, AccessFlags2, ImageLayout, PipelineStageFlags2};
use crevice::std140::AsStd140;

use crate::{
    error::Result,
    vulkan::{
        acceleration_structure::AccelerationStructure,
        allocator::{Allocator, MemoryUsage},
        buffer::Buffer,
        context::Context,
        descriptor_set::{DescriptorPool, DescriptorSet, WriteDescriptorSet},
        image::{
            extent_to_offset, full_subresource_layers, full_subresource_range, image_barrier, Image,
        },
        shader_binding_table::ShaderBindingTable,
    },
};

use super::{
    pipeline::{
        RayTracingPipeline, ACCELERATION_STRUCTURE_BINDING, ACCUMULATION_BINDING,
        FRAME_UNIFORM_BINDING, PRIMITIVE_BINDING, RENDER_TARGET_BINDING,
    },
    shader_types::{FrameUniform, Std140FrameUniform, Std140GpuPrimitive},
};

/// Everything one frame slot owns. Only touched after waiting on the slot's fence.
pub struct FrameResources {
    pub command_buffer: vk::CommandBuffer,
    pub descriptor_set: DescriptorSet,
    pub uniform: Buffer<Std140FrameUniform>,
}

impl FrameResources {
    pub fn new(
        allocator: Arc<Allocator>,
        descriptor_pool: &DescriptorPool,
        pipeline: &RayTracingPipeline,
        command_buffer: vk::CommandBuffer,
        bindings: &SharedBindings,
    ) -> Result<Self> {
        let context = allocator.context.clone();
        let uniform: Buffer<Std140FrameUniform> = Buffer::new(
            allocator,
            "frame uniform",
            std::mem::size_of::<Std140FrameUniform>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryUsage::HostToDevice,
        )?;
        uniform.copy_data(&FrameUniform::default().as_std140());

        let descriptor_set = DescriptorSet::new(
            &context,
            descriptor_pool,
            pipeline.descriptor_set_layout,
            &[
                WriteDescriptorSet::storage_image_with_layout(
                    ACCUMULATION_BINDING,
                    bindings.accumulation,
                    ImageLayout::GENERAL,
                ),
                WriteDescriptorSet::storage_image_with_layout(
                    RENDER_TARGET_BINDING,
                    bindings.render_target,
                    ImageLayout::GENERAL,
                ),
                WriteDescriptorSet::acceleration_structure(
                    ACCELERATION_STRUCTURE_BINDING,
                    bindings.top_level,
                ),
                WriteDescriptorSet::storage_buffer(PRIMITIVE_BINDING, bindings.primitives),
                WriteDescriptorSet::uniform_buffer(FRAME_UNIFORM_BINDING, &uniform),
            ],
        )?;

        Ok(Self {
            command_buffer,
            descriptor_set,
            uniform,
        })
    }

    pub fn write_uniform(&self, uniform: &FrameUniform) {
        self.uniform.copy_data(&uniform.as_std140());
    }

    pub fn read_uniform(&self) -> Option<FrameUniform> {
        self.uniform
            .read_data()
            .first()
            .map(|std140| FrameUniform::from_std140(*std140))
    }
}

/// Resources every frame slot binds the same way.
pub struct SharedBindings<'a> {
    pub accumulation: &'a Image,
    pub render_target: &'a Image,
    pub top_level: &'a AccelerationStructure,
    pub primitives: &'a Buffer<Std140GpuPrimitive>,
}

/// Records the commands of a frame. The command buffers are recorded once and replayed every
/// frame, the per-frame values come from the uniform buffer.
pub struct FrameRecorder<'a> {
    pub context: &'a Context,
    pub pipeline: &'a RayTracingPipeline,
    pub shader_binding_table: &'a ShaderBindingTable,
    pub render_target: &'a Image,
}

impl<'a> FrameRecorder<'a> {
    /// Trace, then copy the render target into a presentable image.
    pub fn record_present(
        &self,
        command_buffer: vk::CommandBuffer,
        descriptor_set: &DescriptorSet,
        swapchain_image: vk::Image,
        swapchain_extent: vk::Extent2D,
        blit: bool,
    ) -> Result<()> {
        self.begin(command_buffer)?;
        self.record_trace(command_buffer, descriptor_set);
        self.record_copy(command_buffer, swapchain_image, swapchain_extent, blit);
        self.end(command_buffer)
    }

    /// Trace only, for frames that have nothing to present to.
    pub fn record_offscreen(
        &self,
        command_buffer: vk::CommandBuffer,
        descriptor_set: &DescriptorSet,
    ) -> Result<()> {
        self.begin(command_buffer)?;
        self.record_trace(command_buffer, descriptor_set);
        self.end(command_buffer)
    }

    fn begin(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.context
                .device
                .begin_command_buffer(command_buffer, &begin_info)
        }?;
        Ok(())
    }

    fn end(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        unsafe { self.context.device.end_command_buffer(command_buffer) }?;
        Ok(())
    }

    fn record_trace(&self, command_buffer: vk::CommandBuffer, descriptor_set: &DescriptorSet) {
        let device = &self.context.device;

        // The previous frame may still trace into the accumulation image or copy the render target
        let memory_barrier = vk::MemoryBarrier2::builder()
            .src_stage_mask(PipelineStageFlags2::RAY_TRACING_SHADER_KHR | PipelineStageFlags2::ALL_TRANSFER)
            .src_access_mask(AccessFlags2::SHADER_STORAGE_WRITE | AccessFlags2::TRANSFER_READ)
            .dst_stage_mask(PipelineStageFlags2::RAY_TRACING_SHADER_KHR)
            .dst_access_mask(AccessFlags2::SHADER_STORAGE_READ | AccessFlags2::SHADER_STORAGE_WRITE)
            .build();
        let dependency_info =
            vk::DependencyInfo::builder().memory_barriers(std::slice::from_ref(&memory_barrier));
        unsafe {
            self.context
                .synchronisation2_loader
                .cmd_pipeline_barrier2(command_buffer, &dependency_info)
        };

        unsafe {
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipeline.pipeline,
            )
        };

        unsafe {
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipeline.pipeline_layout,
                0,
                std::slice::from_ref(&descriptor_set.inner),
                &[],
            )
        };

        let extent = self.render_target.extent;
        unsafe {
            self.context
                .context_raytracing
                .ray_tracing_pipeline
                .cmd_trace_rays(
                    command_buffer,
                    &self.shader_binding_table.raygen,
                    &self.shader_binding_table.miss,
                    &self.shader_binding_table.hit,
                    &self.shader_binding_table.callable,
                    extent.width,
                    extent.height,
                    1,
                )
        };
    }

    fn record_copy(
        &self,
        command_buffer: vk::CommandBuffer,
        swapchain_image: vk::Image,
        swapchain_extent: vk::Extent2D,
        blit: bool,
    ) {
        let device = &self.context.device;

        let barriers = [
            self.render_target.barrier(
                ImageLayout::GENERAL,
                ImageLayout::GENERAL,
                (
                    PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    AccessFlags2::SHADER_STORAGE_WRITE,
                ),
                (PipelineStageFlags2::ALL_TRANSFER, AccessFlags2::TRANSFER_READ),
            ),
            // The submission waits on the acquire semaphore at the transfer stage
            image_barrier(
                swapchain_image,
                ImageLayout::UNDEFINED,
                ImageLayout::TRANSFER_DST_OPTIMAL,
                (PipelineStageFlags2::ALL_TRANSFER, AccessFlags2::NONE),
                (PipelineStageFlags2::ALL_TRANSFER, AccessFlags2::TRANSFER_WRITE),
            ),
        ];
        self.pipeline_barrier(command_buffer, &barriers);

        if blit {
            let region = vk::ImageBlit::builder()
                .src_subresource(full_subresource_layers())
                .src_offsets([vk::Offset3D::default(), extent_to_offset(self.render_target.extent)])
                .dst_subresource(full_subresource_layers())
                .dst_offsets([vk::Offset3D::default(), extent_to_offset(swapchain_extent)])
                .build();
            unsafe {
                device.cmd_blit_image(
                    command_buffer,
                    self.render_target.inner,
                    ImageLayout::GENERAL,
                    swapchain_image,
                    ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                    vk::Filter::NEAREST,
                )
            };
        } else {
            let region = vk::ImageCopy::builder()
                .src_subresource(full_subresource_layers())
                .dst_subresource(full_subresource_layers())
                .extent(vk::Extent3D {
                    width: self.render_target.extent.width.min(swapchain_extent.width),
                    height: self.render_target.extent.height.min(swapchain_extent.height),
                    depth: 1,
                })
                .build();
            unsafe {
                device.cmd_copy_image(
                    command_buffer,
                    self.render_target.inner,
                    ImageLayout::GENERAL,
                    swapchain_image,
                    ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                )
            };
        }

        let present_barrier = image_barrier(
            swapchain_image,
            ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::PRESENT_SRC_KHR,
            (PipelineStageFlags2::ALL_TRANSFER, AccessFlags2::TRANSFER_WRITE),
            (PipelineStageFlags2::NONE, AccessFlags2::NONE),
        );
        self.pipeline_barrier(command_buffer, std::slice::from_ref(&present_barrier));
    }

    fn pipeline_barrier(&self, command_buffer: vk::CommandBuffer, barriers: &[vk::ImageMemoryBarrier2]) {
        let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(barriers);
        unsafe {
            self.context
                .synchronisation2_loader
                .cmd_pipeline_barrier2(command_buffer, &dependency_info)
        };
    }
}

/// Clears both storage images and moves them into the layout the tracer uses for good.
pub fn record_image_setup(context: &Context, command_buffer: vk::CommandBuffer, images: &[&Image]) {
    let to_clear: Vec<vk::ImageMemoryBarrier2> = images
        .iter()
        .map(|image| {
            image.barrier(
                ImageLayout::UNDEFINED,
                ImageLayout::GENERAL,
                (PipelineStageFlags2::NONE, AccessFlags2::NONE),
                (PipelineStageFlags2::CLEAR, AccessFlags2::TRANSFER_WRITE),
            )
        })
        .collect();
    let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(&to_clear);
    unsafe {
        context
            .synchronisation2_loader
            .cmd_pipeline_barrier2(command_buffer, &dependency_info)
    };

    let clear_color = vk::ClearColorValue {
        float32: [0.0, 0.0, 0.0, 0.0],
    };
    let range = full_subresource_range();
    for image in images {
        unsafe {
            context.device.cmd_clear_color_image(
                command_buffer,
                image.inner,
                ImageLayout::GENERAL,
                &clear_color,
                std::slice::from_ref(&range),
            )
        };
    }

    let to_trace: Vec<vk::ImageMemoryBarrier2> = images
        .iter()
        .map(|image| {
            image.barrier(
                ImageLayout::GENERAL,
                ImageLayout::GENERAL,
                (PipelineStageFlags2::CLEAR, AccessFlags2::TRANSFER_WRITE),
                (
                    PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    AccessFlags2::SHADER_STORAGE_READ | AccessFlags2::SHADER_STORAGE_WRITE,
                ),
            )
        })
        .collect();
    let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(&to_trace);
    unsafe {
        context
            .synchronisation2_loader
            .cmd_pipeline_barrier2(command_buffer, &dependency_info)
    };
}
