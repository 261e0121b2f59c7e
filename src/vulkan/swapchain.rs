use std::sync::Arc;

use ash::vk::{self, SwapchainCreateInfoKHR};
use winit::dpi::PhysicalSize;

use crate::error::{RendererError, Result};
use crate::vulkan::context::Context;

/// The tracer writes RGBA8, so a swapchain in that format can take a plain copy.
pub const PREFERRED_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub struct SwapchainContainer {
    pub loader: ash::extensions::khr::Swapchain,
    pub inner: vk::SwapchainKHR,

    pub images: Vec<vk::Image>,

    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,

    _context: Arc<Context>,
}

impl SwapchainContainer {
    pub fn new(
        context: Arc<Context>,
        window_size: PhysicalSize<u32>,
        requested_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let capabilities = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, context.surface)
        }?;

        if !capabilities
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            return Err(RendererError::NoCompatibleDevice {
                missing: "surface images cannot be transfer destinations".to_string(),
            });
        }

        let formats = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, context.surface)
        }?;

        let present_modes = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_present_modes(context.physical_device, context.surface)
        }?;

        let surface_format = choose_surface_format(&formats).ok_or_else(|| {
            RendererError::NoCompatibleDevice {
                missing: "surface formats".to_string(),
            }
        })?;

        let present_mode = choose_present_mode(&present_modes, requested_present_mode);

        let swapchain_extent = choose_extent(&capabilities, window_size);

        let num_images = if capabilities.max_image_count == 0 {
            capabilities.min_image_count.max(2)
        } else {
            capabilities
                .min_image_count
                .max(2)
                .min(capabilities.max_image_count)
        };

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&context.instance, &context.device);

        let create_info = SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(num_images)
            .image_color_space(surface_format.color_space)
            .image_format(surface_format.format)
            .image_extent(swapchain_extent)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(err) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(err.into());
            }
        };

        log::info!(
            "Swapchain: {}x{}, {:?}, {} images, {:?}",
            swapchain_extent.width,
            swapchain_extent.height,
            surface_format.format,
            images.len(),
            present_mode
        );

        Ok(Self {
            loader: swapchain_loader,
            inner: swapchain,
            images,
            surface_format,
            extent: swapchain_extent,
            present_mode,

            _context: context,
        })
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Whether the rendered image can be copied as is, or has to be blitted to convert it.
    pub fn needs_blit(&self) -> bool {
        self.format() != PREFERRED_FORMAT
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .min_by_key(|fmt| match (fmt.format, fmt.color_space) {
            (PREFERRED_FORMAT, vk::ColorSpaceKHR::SRGB_NONLINEAR) => 0,
            (PREFERRED_FORMAT, _) => 1,
            (vk::Format::B8G8R8A8_UNORM, _) => 2,
            (_, _) => 3,
        })
}

fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    requested: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&requested) {
        requested
    } else {
        log::warn!("Present mode {requested:?} is not supported, falling back to FIFO");
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: PhysicalSize<u32>,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_size.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_size.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

impl Drop for SwapchainContainer {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_swapchain(self.inner, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn prefers_the_tracer_output_format() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::R8G8B8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );

        let formats = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_UNORM)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn unsupported_present_mode_falls_back_to_fifo() {
        let supported = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&supported, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&supported, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn window_size_is_clamped_when_the_surface_leaves_it_open() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, PhysicalSize::new(64, 400));
        assert_eq!((extent.width, extent.height), (64, 100));
    }
}
