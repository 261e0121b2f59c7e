use std::{marker::PhantomData, mem::size_of, ops::Deref, sync::Arc};

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use crate::error::Result;
use crate::utility::slice_size;

use super::allocator::{Allocator, MemoryUsage};

pub trait IntoSlice<T> {
    fn as_sliced(&self) -> &[T];
}

impl<T> IntoSlice<T> for T {
    fn as_sliced(&self) -> &[T] {
        std::slice::from_ref(self)
    }
}

impl<T> IntoSlice<T> for [T] {
    fn as_sliced(&self) -> &[T] {
        self
    }
}

impl<T> IntoSlice<T> for Vec<T> {
    fn as_sliced(&self) -> &[T] {
        self
    }
}

/// A buffer holding elements of type `T`. The element type only describes the contents, Vulkan
/// sees plain bytes.
pub struct Buffer<T> {
    pub inner: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    allocator: Arc<Allocator>,
    _marker: PhantomData<T>,
}

impl<T: Copy> Buffer<T> {
    pub fn new(
        allocator: Arc<Allocator>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
    ) -> Result<Buffer<T>> {
        Self::new_aligned(allocator, name, size, usage, memory_usage, 1)
    }

    pub fn new_aligned(
        allocator: Arc<Allocator>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
        alignment: vk::DeviceSize,
    ) -> Result<Buffer<T>> {
        // Zero sized buffers are not allowed
        let size = size.max(1);
        let (inner, allocation) =
            allocator.create_buffer(name, size, usage, memory_usage, alignment)?;

        Ok(Buffer {
            inner,
            size,
            allocation: Some(allocation),
            allocator,
            _marker: PhantomData,
        })
    }

    /// Creates a host visible buffer and fills it with `data`.
    pub fn with_data<U: IntoSlice<T> + ?Sized>(
        allocator: Arc<Allocator>,
        name: &str,
        data: &U,
        usage: vk::BufferUsageFlags,
        alignment: vk::DeviceSize,
    ) -> Result<Buffer<T>> {
        let buffer = Self::new_aligned(
            allocator,
            name,
            slice_size(data.as_sliced()),
            usage,
            MemoryUsage::HostToDevice,
            alignment,
        )?;
        buffer.copy_data(data);
        Ok(buffer)
    }

    /// Number of whole elements that fit into the buffer.
    pub fn len(&self) -> usize {
        match size_of::<T>() {
            0 => 0,
            element_size => self.size as usize / element_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(self.inner);
        unsafe {
            self.allocator
                .context
                .buffer_device_address
                .get_buffer_device_address(&info)
        }
    }

    fn mapped_ptr(&self) -> *mut T {
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr());
        match mapped {
            Some(ptr) => ptr.as_ptr() as *mut T,
            None => panic!("Buffer memory is not host visible"),
        }
    }

    /// Writes `data` to the start of a host visible buffer.
    pub fn copy_data<U: IntoSlice<T> + ?Sized>(&self, data: &U) {
        let data = data.as_sliced();
        assert!(data.len() <= self.len(), "Data does not fit into the buffer");

        let buffer_ptr = self.mapped_ptr();
        unsafe { buffer_ptr.copy_from_nonoverlapping(data.as_ptr(), data.len()) };
    }

    /// Reads the whole contents of a host visible buffer.
    pub fn read_data(&self) -> Vec<T> {
        let buffer_ptr = self.mapped_ptr() as *const T;
        let len = self.len();
        let mut data: Vec<T> = Vec::with_capacity(len);
        unsafe {
            data.as_mut_ptr().copy_from_nonoverlapping(buffer_ptr, len);
            data.set_len(len);
        }
        data
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::builder()
            .buffer(self.inner)
            .offset(0)
            .range(vk::WHOLE_SIZE)
            .build()
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        unsafe { self.allocator.context.device.destroy_buffer(self.inner, None) };
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free(allocation);
        }
    }
}

impl<T> Deref for Buffer<T> {
    type Target = vk::Buffer;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
