use std::{ops::Deref, sync::Arc};

use ash::vk;

use crate::error::Result;

use super::context::Context;

#[derive(Clone)]
pub struct CommandPool {
    inner: Arc<CommandPoolImpl>,
}

impl CommandPool {
    pub fn new(context: Arc<Context>) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { context.device.create_command_pool(&create_info, None) }?;

        Ok(Self {
            inner: Arc::new(CommandPoolImpl {
                inner: command_pool,
                context,
            }),
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.inner.context
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(count)
            .command_pool(self.inner.inner)
            .level(vk::CommandBufferLevel::PRIMARY);

        let command_buffers = unsafe { self.context().device.allocate_command_buffers(&allocate_info) }?;
        Ok(command_buffers)
    }

    /// Records a command buffer with `record`, submits it and blocks until the GPU is done with it.
    pub fn submit_and_wait<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let device = &self.context().device;
        let command_buffer = self.allocate(1)?[0];

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(command_buffer, &begin_info) }?;
            record(command_buffer);
            unsafe { device.end_command_buffer(command_buffer) }?;

            let fence_info = vk::FenceCreateInfo::builder();
            let fence = unsafe { device.create_fence(&fence_info, None) }?;

            let submit_info = vk::SubmitInfo::builder()
                .command_buffers(std::slice::from_ref(&command_buffer))
                .build();

            let submitted = unsafe {
                device.queue_submit(
                    self.context().queue,
                    std::slice::from_ref(&submit_info),
                    fence,
                )
            }
            .and_then(|_| unsafe {
                device.wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)
            });

            unsafe { device.destroy_fence(fence, None) };
            submitted
        })();

        unsafe { device.free_command_buffers(self.inner.inner, std::slice::from_ref(&command_buffer)) };
        Ok(result?)
    }
}

struct CommandPoolImpl {
    pub inner: vk::CommandPool,
    pub context: Arc<Context>,
}

impl Drop for CommandPoolImpl {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_command_pool(self.inner, None) };
    }
}

impl Deref for CommandPool {
    type Target = vk::CommandPool;

    fn deref(&self) -> &Self::Target {
        &self.inner.inner
    }
}
