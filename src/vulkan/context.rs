use std::ffi::CStr;

use ash::{
    extensions::khr::{
        AccelerationStructure, BufferDeviceAddress, DeferredHostOperations, RayTracingPipeline,
        Surface, Swapchain, Synchronization2,
    },
    vk::{self, ApplicationInfo, DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo},
};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::window::Window;

use crate::error::{RendererError, Result};

pub struct Context {
    _entry: ash::Entry,
    pub instance: ash::Instance,

    pub surface_loader: Surface,
    pub surface: vk::SurfaceKHR,

    pub context_raytracing: ContextRaytracing,
    pub synchronisation2_loader: Synchronization2,

    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,

    pub device: ash::Device,
    pub queue: vk::Queue,

    pub buffer_device_address: BufferDeviceAddress,
}

pub struct ContextRaytracing {
    pub ray_tracing_pipeline: RayTracingPipeline,
    pub physical_device_ray_tracing_pipeline_properties_khr:
        vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,

    pub acceleration_structure: AccelerationStructure,
    pub physical_device_acceleration_structure_properties_khr:
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR,
}

fn required_device_extensions() -> [&'static CStr; 6] {
    [
        Swapchain::name(),
        Synchronization2::name(),
        AccelerationStructure::name(),
        RayTracingPipeline::name(),
        DeferredHostOperations::name(),
        BufferDeviceAddress::name(),
    ]
}

impl Context {
    pub fn new(window: &Window) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }?;

        let instance = {
            let surface_extension =
                ash_window::enumerate_required_extensions(window.raw_display_handle())?;

            let app_info = ApplicationInfo::builder().api_version(vk::API_VERSION_1_3);
            let create_info = InstanceCreateInfo::builder()
                .application_info(&app_info)
                .enabled_extension_names(surface_extension);
            unsafe { entry.create_instance(&create_info, None) }?
        };

        let surface_loader = Surface::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        } {
            Ok(surface) => surface,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err.into());
            }
        };

        let device_parts = find_physical_device(&instance, surface, &surface_loader).and_then(
            |(physical_device, queue_family_index)| {
                create_logical_device(&instance, physical_device, queue_family_index)
                    .map(|device| (physical_device, queue_family_index, device))
            },
        );
        let (physical_device, queue_family_index, device) = match device_parts {
            Ok(parts) => parts,
            Err(err) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let synchronisation2_loader = Synchronization2::new(&instance, &device);

        let ray_tracing_pipeline = RayTracingPipeline::new(&instance, &device);
        let physical_device_ray_tracing_pipeline_properties_khr =
            unsafe { RayTracingPipeline::get_properties(&instance, physical_device) };

        let acceleration_structure = AccelerationStructure::new(&instance, &device);
        let physical_device_acceleration_structure_properties_khr =
            unsafe { AccelerationStructure::get_properties(&instance, physical_device) };

        let buffer_device_address = BufferDeviceAddress::new(&instance, &device);

        let context_raytracing = ContextRaytracing {
            ray_tracing_pipeline,
            physical_device_ray_tracing_pipeline_properties_khr,
            acceleration_structure,
            physical_device_acceleration_structure_properties_khr,
        };

        Ok(Self {
            _entry: entry,
            instance,

            surface,
            surface_loader,

            context_raytracing,
            synchronisation2_loader,

            physical_device,
            queue_family_index,

            device,
            queue,
            buffer_device_address,
        })
    }

    pub fn ray_tracing_properties(&self) -> &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR {
        &self
            .context_raytracing
            .physical_device_ray_tracing_pipeline_properties_khr
    }

    pub fn acceleration_structure_properties(
        &self,
    ) -> &vk::PhysicalDeviceAccelerationStructurePropertiesKHR {
        &self
            .context_raytracing
            .physical_device_acceleration_structure_properties_khr
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { self.device.destroy_device(None) };

        unsafe { self.surface_loader.destroy_surface(self.surface, None) };

        unsafe { self.instance.destroy_instance(None) };
    }
}

fn missing_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<Vec<&'static CStr>> {
    let extension_properties =
        unsafe { instance.enumerate_device_extension_properties(physical_device) }?;
    let supported: Vec<&CStr> = extension_properties
        .iter()
        .map(|property| unsafe { CStr::from_ptr(property.extension_name.as_ptr()) })
        .collect();

    Ok(required_device_extensions()
        .into_iter()
        .filter(|required| !supported.contains(required))
        .collect())
}

/// Capabilities the tracer needs besides its extensions.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
struct DeviceFeatures {
    api_version: u32,
    ray_tracing_pipeline: bool,
    acceleration_structure: bool,
    buffer_device_address: bool,
    synchronization2: bool,
}

fn query_features(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    api_version: u32,
) -> DeviceFeatures {
    // The Vulkan 1.3 feature struct must not be chained on older devices
    if api_version < vk::API_VERSION_1_3 {
        return DeviceFeatures {
            api_version,
            ..Default::default()
        };
    }

    let mut ray_tracing_pipeline = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
    let mut acceleration_structure = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::builder()
        .push_next(&mut ray_tracing_pipeline)
        .push_next(&mut acceleration_structure)
        .push_next(&mut vulkan12)
        .push_next(&mut vulkan13)
        .build();
    unsafe { instance.get_physical_device_features2(physical_device, &mut features) };

    DeviceFeatures {
        api_version,
        ray_tracing_pipeline: ray_tracing_pipeline.ray_tracing_pipeline == vk::TRUE,
        acceleration_structure: acceleration_structure.acceleration_structure == vk::TRUE,
        buffer_device_address: vulkan12.buffer_device_address == vk::TRUE,
        synchronization2: vulkan13.synchronization2 == vk::TRUE,
    }
}

/// Names of everything `create_logical_device` enables that the device cannot provide.
fn missing_features(features: &DeviceFeatures) -> Vec<&'static str> {
    if features.api_version < vk::API_VERSION_1_3 {
        return vec!["Vulkan 1.3"];
    }
    [
        (features.ray_tracing_pipeline, "rayTracingPipeline"),
        (features.acceleration_structure, "accelerationStructure"),
        (features.buffer_device_address, "bufferDeviceAddress"),
        (features.synchronization2, "synchronization2"),
    ]
    .into_iter()
    .filter(|(supported, _)| !supported)
    .map(|(_, name)| name)
    .collect()
}

fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &Surface,
) -> Result<Option<u32>> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    for (index, info) in families.iter().enumerate() {
        let supports_tracing = info
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE);
        let supports_surface = unsafe {
            surface_loader.get_physical_device_surface_support(
                physical_device,
                index as u32,
                surface,
            )
        }?;

        if supports_tracing && supports_surface {
            return Ok(Some(index as u32));
        }
    }
    Ok(None)
}

fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        vk::PhysicalDeviceType::OTHER => 4,
        _ => 5,
    }
}

fn find_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &Surface,
) -> Result<(vk::PhysicalDevice, u32)> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }?;

    let mut candidates = vec![];
    let mut rejections = vec![];
    for physical_device in physical_devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let missing = missing_extensions(instance, physical_device)?;
        if !missing.is_empty() {
            log::debug!("Skipping {name}, it lacks {missing:?}");
            rejections.push(format!("{name}: {missing:?}"));
            continue;
        }

        let missing = missing_features(&query_features(
            instance,
            physical_device,
            properties.api_version,
        ));
        if !missing.is_empty() {
            log::debug!(
                "Skipping {name} (Vulkan {}.{}), it lacks {missing:?}",
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version)
            );
            rejections.push(format!("{name}: {missing:?}"));
            continue;
        }

        match find_queue_family(instance, physical_device, surface, surface_loader)? {
            Some(queue_family_index) => candidates.push((
                device_type_rank(properties.device_type),
                physical_device,
                queue_family_index,
                name,
            )),
            None => {
                log::debug!("Skipping {name}, no queue can trace and present");
                rejections.push(format!("{name}: no graphics+compute queue with present support"));
            }
        }
    }

    let (_, physical_device, queue_family_index, name) = candidates
        .into_iter()
        .min_by_key(|(rank, ..)| *rank)
        .ok_or_else(|| RendererError::NoCompatibleDevice {
            missing: if rejections.is_empty() {
                "no Vulkan devices".to_string()
            } else {
                rejections.join("; ")
            },
        })?;

    log::info!("Using {name} with queue family {queue_family_index}");
    Ok((physical_device, queue_family_index))
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
) -> Result<ash::Device> {
    let device_extensions = required_device_extensions().map(CStr::as_ptr);

    let queue_priorities = [1.0];
    let queue_create_info = DeviceQueueCreateInfo::builder()
        .queue_family_index(queue_family_index)
        .queue_priorities(&queue_priorities);

    let mut physical_device_vulkan13_features = vk::PhysicalDeviceVulkan13Features {
        synchronization2: vk::TRUE,
        ..vk::PhysicalDeviceVulkan13Features::default()
    };

    let mut enabled_buffer_device_address_features =
        vk::PhysicalDeviceBufferDeviceAddressFeatures {
            buffer_device_address: vk::TRUE,
            ..vk::PhysicalDeviceBufferDeviceAddressFeatures::default()
        };

    let mut enabled_ray_tracing_pipeline_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR {
            ray_tracing_pipeline: vk::TRUE,
            ..vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
        };

    let mut enabled_acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR {
            acceleration_structure: vk::TRUE,
            ..vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
        };

    let create_info = DeviceCreateInfo::builder()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&device_extensions)
        .push_next(&mut physical_device_vulkan13_features)
        .push_next(&mut enabled_buffer_device_address_features)
        .push_next(&mut enabled_ray_tracing_pipeline_features)
        .push_next(&mut enabled_acceleration_structure_features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_discrete_gpus() {
        let mut types = [
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::VIRTUAL_GPU,
        ];
        types.sort_by_key(|t| device_type_rank(*t));
        assert_eq!(types[0], vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(types[3], vk::PhysicalDeviceType::CPU);
    }

    #[test]
    fn names_every_missing_feature() {
        let complete = DeviceFeatures {
            api_version: vk::API_VERSION_1_3,
            ray_tracing_pipeline: true,
            acceleration_structure: true,
            buffer_device_address: true,
            synchronization2: true,
        };
        assert!(missing_features(&complete).is_empty());

        let no_tracing = DeviceFeatures {
            ray_tracing_pipeline: false,
            synchronization2: false,
            ..complete
        };
        assert_eq!(
            missing_features(&no_tracing),
            ["rayTracingPipeline", "synchronization2"]
        );

        let no_acceleration_structures = DeviceFeatures {
            acceleration_structure: false,
            buffer_device_address: false,
            ..complete
        };
        assert_eq!(
            missing_features(&no_acceleration_structures),
            ["accelerationStructure", "bufferDeviceAddress"]
        );
    }

    #[test]
    fn rejects_devices_older_than_vulkan_1_3() {
        let vulkan12 = DeviceFeatures {
            api_version: vk::make_api_version(0, 1, 2, 198),
            ray_tracing_pipeline: true,
            acceleration_structure: true,
            buffer_device_address: true,
            synchronization2: true,
        };
        assert_eq!(missing_features(&vulkan12), ["Vulkan 1.3"]);

        // Patch versions above the minimum are fine
        let newer = DeviceFeatures {
            api_version: vk::make_api_version(0, 1, 3, 250),
            ..vulkan12
        };
        assert!(missing_features(&newer).is_empty());
    }

    #[test]
    fn requires_every_ray_tracing_extension() {
        let required = required_device_extensions();
        assert!(required.contains(&Swapchain::name()));
        assert!(required.contains(&AccelerationStructure::name()));
        assert!(required.contains(&RayTracingPipeline::name()));
        assert!(required.contains(&BufferDeviceAddress::name()));
    }
}
