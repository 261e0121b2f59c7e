use std::sync::Arc;

use ash::vk::{
    self, AccessFlags2, Extent3D, ImageCreateFlags, ImageLayout, ImageMemoryBarrier2,
    ImageSubresourceRange, ImageTiling, ImageType, ImageUsageFlags, PipelineStageFlags2,
    SampleCountFlags, SharingMode,
};
use gpu_allocator::vulkan::Allocation;

use crate::error::Result;

use super::allocator::Allocator;

/// A device local 2D image with a single mip level and a view covering all of it.
pub struct Image {
    pub inner: vk::Image,
    pub view: vk::ImageView,

    pub format: vk::Format,
    pub extent: vk::Extent2D,

    allocation: Option<Allocation>,
    allocator: Arc<Allocator>,
}

impl Image {
    pub fn new(
        allocator: Arc<Allocator>,
        name: &str,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> Result<Image> {
        let create_info = vk::ImageCreateInfo {
            format,
            extent: Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            usage,
            ..simple_image_create_info()
        };
        let (inner, allocation) = allocator.create_image(name, &create_info)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(full_subresource_range())
            .image(inner);

        let view = match unsafe { allocator.context.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(err) => {
                unsafe { allocator.context.device.destroy_image(inner, None) };
                allocator.free(allocation);
                return Err(err.into());
            }
        };

        Ok(Self {
            inner,
            view,
            format,
            extent,
            allocation: Some(allocation),
            allocator,
        })
    }

    pub fn descriptor_info(&self, layout: vk::ImageLayout) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::builder()
            .image_view(self.view)
            .image_layout(layout)
            .build()
    }

    pub fn barrier(
        &self,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src: (PipelineStageFlags2, AccessFlags2),
        dst: (PipelineStageFlags2, AccessFlags2),
    ) -> ImageMemoryBarrier2 {
        image_barrier(self.inner, old_layout, new_layout, src, dst)
    }

    pub fn texel_count(&self) -> usize {
        self.extent.width as usize * self.extent.height as usize
    }

    /// Copy region covering the whole image, tightly packed in the buffer.
    pub fn buffer_copy_region(&self) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: full_subresource_layers(),
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
        }
    }
}

pub fn image_barrier(
    image: vk::Image,
    old_layout: ImageLayout,
    new_layout: ImageLayout,
    (src_stage_mask, src_access_mask): (PipelineStageFlags2, AccessFlags2),
    (dst_stage_mask, dst_access_mask): (PipelineStageFlags2, AccessFlags2),
) -> ImageMemoryBarrier2 {
    vk::ImageMemoryBarrier2 {
        old_layout,
        new_layout,
        src_stage_mask,
        dst_stage_mask,
        src_access_mask,
        dst_access_mask,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: full_subresource_range(),
        ..ImageMemoryBarrier2::default()
    }
}

pub fn full_subresource_range() -> ImageSubresourceRange {
    ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub fn full_subresource_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub fn extent_to_offset(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

pub fn simple_image_create_info() -> vk::ImageCreateInfo {
    vk::ImageCreateInfo {
        flags: ImageCreateFlags::empty(),
        image_type: ImageType::TYPE_2D,
        format: vk::Format::UNDEFINED,
        extent: Extent3D {
            width: 0,
            height: 0,
            depth: 0,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: SampleCountFlags::TYPE_1,
        tiling: ImageTiling::OPTIMAL,
        usage: ImageUsageFlags::empty(),
        sharing_mode: SharingMode::EXCLUSIVE,
        initial_layout: ImageLayout::UNDEFINED,
        ..Default::default()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let device = &self.allocator.context.device;
        unsafe { device.destroy_image_view(self.view, None) };
        unsafe { device.destroy_image(self.inner, None) };
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free(allocation);
        }
    }
}
