use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::{
    vulkan::{self as gpu, Allocation, AllocationCreateDesc, AllocationScheme, AllocatorCreateDesc},
    MemoryLocation,
};

use crate::error::Result;

use super::context::Context;

/// Where a resource lives and who writes it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Only touched by the GPU
    DeviceLocal,
    /// Written by the CPU, read by the GPU
    HostToDevice,
    /// Written by the GPU, read back by the CPU
    DeviceToHost,
}

impl From<MemoryUsage> for MemoryLocation {
    fn from(usage: MemoryUsage) -> Self {
        match usage {
            MemoryUsage::DeviceLocal => MemoryLocation::GpuOnly,
            MemoryUsage::HostToDevice => MemoryLocation::CpuToGpu,
            MemoryUsage::DeviceToHost => MemoryLocation::GpuToCpu,
        }
    }
}

// Rust will drop these fields in the order they are declared
pub struct Allocator {
    inner: Mutex<gpu::Allocator>,
    pub context: Arc<Context>,
}

impl Allocator {
    pub fn new(context: Arc<Context>) -> Result<Self> {
        let allocator = gpu::Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: context.device.clone(),
            physical_device: context.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            inner: Mutex::new(allocator),
            context,
        })
    }

    fn lock(&self) -> MutexGuard<'_, gpu::Allocator> {
        // A panic while holding the lock does not leave the allocator in a broken state
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates a buffer and binds freshly allocated memory to it.
    /// `alignment` raises the alignment the driver asks for, it never lowers it.
    pub fn create_buffer(
        &self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
        alignment: vk::DeviceSize,
    ) -> Result<(vk::Buffer, Allocation)> {
        let device = &self.context.device;

        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&create_info, None) }?;

        let mut requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        requirements.alignment = requirements.alignment.max(alignment);

        let allocation = self.allocate(name, requirements, memory_usage, true);
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        if let Err(err) =
            unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            unsafe { device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(err.into());
        }

        Ok((buffer, allocation))
    }

    pub fn create_image(
        &self,
        name: &str,
        create_info: &vk::ImageCreateInfo,
    ) -> Result<(vk::Image, Allocation)> {
        let device = &self.context.device;

        let image = unsafe { device.create_image(create_info, None) }?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let linear = create_info.tiling == vk::ImageTiling::LINEAR;
        let allocation = match self.allocate(name, requirements, MemoryUsage::DeviceLocal, linear) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };

        if let Err(err) =
            unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        {
            unsafe { device.destroy_image(image, None) };
            self.free(allocation);
            return Err(err.into());
        }

        Ok((image, allocation))
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        memory_usage: MemoryUsage,
        linear: bool,
    ) -> Result<Allocation> {
        let allocation = self.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: memory_usage.into(),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        Ok(allocation)
    }

    pub fn free(&self, allocation: Allocation) {
        if let Err(err) = self.lock().free(allocation) {
            log::error!("Could not free GPU allocation: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_usage_picks_the_matching_location() {
        assert_eq!(
            MemoryLocation::from(MemoryUsage::DeviceLocal),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            MemoryLocation::from(MemoryUsage::HostToDevice),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            MemoryLocation::from(MemoryUsage::DeviceToHost),
            MemoryLocation::GpuToCpu
        );
    }
}
