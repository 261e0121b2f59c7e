use std::{mem::size_of, sync::Arc};

use ash::vk::{self, AccessFlags2, ImageLayout, PipelineStageFlags2};
use winit::{event_loop::EventLoop, window::Window};

use crate::{
    capture::Capture,
    error::{RendererError, Result},
    render::{
        frame::{record_image_setup, FrameRecorder, FrameResources, SharedBindings},
        frame_pacer::{drive_frame, FramePacer, FrameRoute, FrameSync, FrameTarget, OFFSCREEN_SLOT},
        pipeline::RayTracingPipeline,
        shader_types::FrameUniform,
    },
    render_call_info::RenderCallInfo,
    scene::Scene,
    scene_uploader::GpuScene,
    settings::RendererSettings,
    vulkan::{
        allocator::{Allocator, MemoryUsage},
        buffer::Buffer,
        command_pool::CommandPool,
        context::Context,
        descriptor_set::DescriptorPool,
        image::Image,
        shader_binding_table::ShaderBindingTable,
        swapchain::{SwapchainContainer, PREFERRED_FORMAT},
    },
    window::RenderWindow,
};

const ACCUMULATION_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Progressive ray tracer for one window.
// Rust will drop these fields in the order they are declared
pub struct Renderer {
    sync: FrameSync,
    pacer: FramePacer,
    _pipeline: RayTracingPipeline,
    _descriptor_pool: DescriptorPool,
    gpu_scene: GpuScene,
    frames: Vec<FrameResources>,
    offscreen_command_buffer: vk::CommandBuffer,
    _shader_binding_table: ShaderBindingTable,
    accumulation: Image,
    render_target: Image,
    command_pool: CommandPool,
    swapchain: SwapchainContainer,
    allocator: Arc<Allocator>,
    context: Arc<Context>,

    route: FrameRoute,
    last_slot: Option<usize>,
    reported_suboptimal: bool,

    /// Application window, has to outlive the surface
    window: RenderWindow,
}

impl Renderer {
    pub fn new(settings: &RendererSettings, scene: &Scene) -> Result<Self> {
        Self::with_event_loop(EventLoop::new(), settings, scene)
    }

    /// Like [`Renderer::new`], but reuses an event loop. Most platforms only allow one per process.
    pub fn with_event_loop(
        event_loop: EventLoop<()>,
        settings: &RendererSettings,
        scene: &Scene,
    ) -> Result<Self> {
        let window = RenderWindow::new(event_loop, settings.window_width, settings.window_height)?;

        let context = Arc::new(Context::new(&window.window)?);
        let allocator = Arc::new(Allocator::new(context.clone())?);
        let swapchain =
            SwapchainContainer::new(context.clone(), window.size(), settings.present_mode.into())?;
        let command_pool = CommandPool::new(context.clone())?;

        let storage_usage = vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        let accumulation = Image::new(
            allocator.clone(),
            "accumulation",
            ACCUMULATION_FORMAT,
            swapchain.extent,
            storage_usage,
        )?;
        let render_target = Image::new(
            allocator.clone(),
            "render target",
            PREFERRED_FORMAT,
            swapchain.extent,
            storage_usage,
        )?;

        // The only time the accumulation image is ever cleared
        command_pool.submit_and_wait(|command_buffer| {
            record_image_setup(&context, command_buffer, &[&accumulation, &render_target])
        })?;

        let gpu_scene = GpuScene::upload(allocator.clone(), &command_pool, scene)?;

        let pipeline = RayTracingPipeline::new(context.clone(), &settings.shader_directory)?;
        let shader_binding_table = ShaderBindingTable::new(allocator.clone(), pipeline.pipeline)?;

        let slot_count = swapchain.images.len();
        let descriptor_pool = DescriptorPool::new(
            context.clone(),
            slot_count as u32,
            &DescriptorPool::sizes_for(&RayTracingPipeline::bindings(), slot_count as u32),
        )?;

        let command_buffers = command_pool.allocate(slot_count as u32 + 1)?;
        let offscreen_command_buffer = command_buffers[slot_count];

        let frames = {
            let bindings = SharedBindings {
                accumulation: &accumulation,
                render_target: &render_target,
                top_level: &gpu_scene.top,
                primitives: &gpu_scene.primitives,
            };
            command_buffers[..slot_count]
                .iter()
                .map(|&command_buffer| {
                    FrameResources::new(
                        allocator.clone(),
                        &descriptor_pool,
                        &pipeline,
                        command_buffer,
                        &bindings,
                    )
                })
                .collect::<Result<Vec<_>>>()?
        };

        {
            let recorder = FrameRecorder {
                context: &context,
                pipeline: &pipeline,
                shader_binding_table: &shader_binding_table,
                render_target: &render_target,
            };
            for (frame, &image) in frames.iter().zip(swapchain.images.iter()) {
                recorder.record_present(
                    frame.command_buffer,
                    &frame.descriptor_set,
                    image,
                    swapchain.extent,
                    swapchain.needs_blit(),
                )?;
            }
            recorder.record_offscreen(
                offscreen_command_buffer,
                &frames[OFFSCREEN_SLOT].descriptor_set,
            )?;
        }

        let sync = FrameSync::new(&context.device, slot_count)?;
        let pacer = FramePacer::new(slot_count);

        log::info!(
            "Renderer ready: {}x{}, {} frame slots, {} acquire semaphores",
            swapchain.extent.width,
            swapchain.extent.height,
            pacer.slot_count(),
            pacer.semaphore_count()
        );

        let size = window.size();
        Ok(Self {
            sync,
            pacer,
            _pipeline: pipeline,
            _descriptor_pool: descriptor_pool,
            gpu_scene,
            frames,
            offscreen_command_buffer,
            _shader_binding_table: shader_binding_table,
            accumulation,
            render_target,
            command_pool,
            swapchain,
            allocator,
            context,
            route: FrameRoute::for_extent(size.width, size.height),
            last_slot: None,
            reported_suboptimal: false,
            window,
        })
    }

    /// Lets the window process its events. Has to be called once per loop iteration.
    pub fn update(&mut self) {
        self.window.poll_events();

        let size = self.window.size();
        let route = FrameRoute::for_extent(size.width, size.height);
        if route != self.route {
            match route {
                FrameRoute::Offscreen => log::info!("Window minimized, tracing without presenting"),
                FrameRoute::Present => log::info!("Window restored, presenting again"),
            }
            self.route = route;
        }
    }

    pub fn should_exit(&self) -> bool {
        self.window.should_close()
    }

    /// Traces the samples of one render call and, if the window is visible, presents the result.
    pub fn render(&mut self, info: &RenderCallInfo) -> Result<()> {
        debug_assert!(
            info.number >= 1 && info.number <= info.total_number,
            "render call {} of {}",
            info.number,
            info.total_number
        );

        let uniform = FrameUniform::from(info);
        log::debug!(
            "Render call {}/{}: samples {:?} of {}",
            info.number,
            info.total_number,
            info.sample_range(),
            info.total_samples
        );

        let mut target = DeviceFrame {
            context: &self.context,
            swapchain: &self.swapchain,
            sync: &self.sync,
            frames: &self.frames,
            offscreen_command_buffer: self.offscreen_command_buffer,
            uniform: &uniform,
            reported_suboptimal: &mut self.reported_suboptimal,
        };
        let slot = drive_frame(&mut self.pacer, self.route, &mut target)?;
        self.last_slot = Some(slot);
        Ok(())
    }

    /// Size of the traced images.
    pub fn extent(&self) -> vk::Extent2D {
        self.render_target.extent
    }

    pub fn route(&self) -> FrameRoute {
        self.route
    }

    pub fn frame_slot_count(&self) -> usize {
        self.frames.len()
    }

    /// Slot and acquire semaphore bookkeeping of the presenting route.
    pub fn pacer(&self) -> &FramePacer {
        &self.pacer
    }

    pub fn window(&self) -> &Window {
        &self.window.window
    }

    pub fn primitive_count(&self) -> usize {
        self.gpu_scene.primitive_count
    }

    /// The uniform buffer contents of the slot used by the latest render call.
    pub fn last_frame_uniform(&self) -> Option<FrameUniform> {
        self.last_slot
            .and_then(|slot| self.frames.get(slot))
            .and_then(FrameResources::read_uniform)
    }

    /// Waits for the GPU and copies both traced images to the host.
    pub fn capture(&self) -> Result<Capture> {
        unsafe { self.context.device.device_wait_idle() }?;

        let texel_count = self.render_target.texel_count();
        let accumulation_buffer: Buffer<[f32; 4]> = Buffer::new(
            self.allocator.clone(),
            "accumulation readback",
            (texel_count * size_of::<[f32; 4]>()) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::DeviceToHost,
        )?;
        let render_target_buffer: Buffer<[u8; 4]> = Buffer::new(
            self.allocator.clone(),
            "render target readback",
            (texel_count * size_of::<[u8; 4]>()) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::DeviceToHost,
        )?;

        self.command_pool.submit_and_wait(|command_buffer| {
            let device = &self.context.device;
            let to_copy = [&self.accumulation, &self.render_target].map(|image| {
                image.barrier(
                    ImageLayout::GENERAL,
                    ImageLayout::GENERAL,
                    (
                        PipelineStageFlags2::RAY_TRACING_SHADER_KHR | PipelineStageFlags2::ALL_TRANSFER,
                        AccessFlags2::SHADER_STORAGE_WRITE | AccessFlags2::TRANSFER_READ,
                    ),
                    (PipelineStageFlags2::COPY, AccessFlags2::TRANSFER_READ),
                )
            });
            let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(&to_copy);
            unsafe {
                self.context
                    .synchronisation2_loader
                    .cmd_pipeline_barrier2(command_buffer, &dependency_info)
            };

            for (image, buffer) in [
                (&self.accumulation, accumulation_buffer.inner),
                (&self.render_target, render_target_buffer.inner),
            ] {
                unsafe {
                    device.cmd_copy_image_to_buffer(
                        command_buffer,
                        image.inner,
                        ImageLayout::GENERAL,
                        buffer,
                        std::slice::from_ref(&image.buffer_copy_region()),
                    )
                };
            }

            let to_host = vk::MemoryBarrier2::builder()
                .src_stage_mask(PipelineStageFlags2::COPY)
                .src_access_mask(AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(PipelineStageFlags2::HOST)
                .dst_access_mask(AccessFlags2::HOST_READ)
                .build();
            let dependency_info =
                vk::DependencyInfo::builder().memory_barriers(std::slice::from_ref(&to_host));
            unsafe {
                self.context
                    .synchronisation2_loader
                    .cmd_pipeline_barrier2(command_buffer, &dependency_info)
            };
        })?;

        let extent = self.extent();
        Ok(Capture {
            width: extent.width,
            height: extent.height,
            samples_so_far: self
                .last_frame_uniform()
                .map_or(0, |uniform| uniform.samples_so_far),
            accumulation: accumulation_buffer.read_data(),
            render_target: render_target_buffer.read_data(),
        })
    }

    /// Tears the renderer down and returns the event loop for a later renderer.
    pub fn into_event_loop(mut self) -> Option<EventLoop<()>> {
        self.window.take_event_loop()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Everything else is released by the fields' own Drop impls, in declaration order
        if let Err(err) = unsafe { self.context.device.device_wait_idle() } {
            log::error!("Could not wait for the device to go idle: {err}");
        }
    }
}

/// Borrows what a single frame needs from the [`Renderer`], so the pacer can be borrowed
/// mutably next to it.
struct DeviceFrame<'a> {
    context: &'a Context,
    swapchain: &'a SwapchainContainer,
    sync: &'a FrameSync,
    frames: &'a [FrameResources],
    offscreen_command_buffer: vk::CommandBuffer,
    uniform: &'a FrameUniform,
    reported_suboptimal: &'a mut bool,
}

impl DeviceFrame<'_> {
    fn queue_submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait_semaphores: &[vk::SemaphoreSubmitInfo],
        signal_semaphores: &[vk::SemaphoreSubmitInfo],
        fence: vk::Fence,
    ) -> Result<()> {
        let command_buffer_info = vk::CommandBufferSubmitInfo::builder()
            .command_buffer(command_buffer)
            .build();
        let submit_info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(wait_semaphores)
            .command_buffer_infos(std::slice::from_ref(&command_buffer_info))
            .signal_semaphore_infos(signal_semaphores)
            .build();

        unsafe {
            self.context.synchronisation2_loader.queue_submit2(
                self.context.queue,
                std::slice::from_ref(&submit_info),
                fence,
            )
        }?;
        Ok(())
    }

    fn report_suboptimal(&mut self) {
        if !*self.reported_suboptimal {
            log::warn!("Swapchain no longer matches the surface exactly, continuing anyway");
            *self.reported_suboptimal = true;
        }
    }
}

impl FrameTarget for DeviceFrame<'_> {
    fn acquire(&mut self, semaphore_index: usize) -> Result<u32> {
        let (image_index, suboptimal) = unsafe {
            self.swapchain.loader.acquire_next_image(
                self.swapchain.inner,
                u64::MAX,
                self.sync.image_acquired[semaphore_index],
                vk::Fence::null(),
            )
        }
        .map_err(surface_error)?;
        if suboptimal {
            self.report_suboptimal();
        }
        Ok(image_index)
    }

    fn submit(&mut self, slot: usize, wait_semaphore: usize) -> Result<()> {
        self.sync.wait_and_reset(slot)?;
        let frame = &self.frames[slot];
        frame.write_uniform(self.uniform);

        let wait_info = vk::SemaphoreSubmitInfo::builder()
            .semaphore(self.sync.image_acquired[wait_semaphore])
            .stage_mask(PipelineStageFlags2::ALL_TRANSFER)
            .build();
        let signal_info = vk::SemaphoreSubmitInfo::builder()
            .semaphore(self.sync.render_complete[slot])
            .stage_mask(PipelineStageFlags2::ALL_COMMANDS)
            .build();
        self.queue_submit(
            frame.command_buffer,
            std::slice::from_ref(&wait_info),
            std::slice::from_ref(&signal_info),
            self.sync.fences[slot],
        )
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(std::slice::from_ref(&self.sync.render_complete[slot]))
            .swapchains(std::slice::from_ref(&self.swapchain.inner))
            .image_indices(std::slice::from_ref(&image_index));
        let suboptimal = unsafe {
            self.swapchain
                .loader
                .queue_present(self.context.queue, &present_info)
        }
        .map_err(surface_error)?;
        if suboptimal {
            self.report_suboptimal();
        }
        Ok(())
    }

    fn submit_offscreen(&mut self, slot: usize) -> Result<()> {
        self.sync.wait_and_reset(slot)?;
        self.frames[slot].write_uniform(self.uniform);
        self.queue_submit(self.offscreen_command_buffer, &[], &[], self.sync.fences[slot])
    }
}

fn surface_error(err: vk::Result) -> RendererError {
    match err {
        vk::Result::ERROR_OUT_OF_DATE_KHR => RendererError::SurfaceOutOfDate,
        vk::Result::TIMEOUT | vk::Result::NOT_READY => RendererError::AcquireTimeout,
        err => err.into(),
    }
}
