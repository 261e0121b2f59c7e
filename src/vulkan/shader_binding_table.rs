use std::sync::Arc;

use ash::vk;

use crate::{error::Result, utility::aligned_size};

use super::{allocator::Allocator, buffer::Buffer};

/// Shader group indices, in the order the pipeline declares the groups.
pub const RAYGEN_GROUP: u32 = 0;
pub const MISS_GROUP: u32 = 1;
pub const HIT_GROUP: u32 = 2;
pub const GROUP_COUNT: u32 = 3;

/// Where each shader group handle lands in the table.
///
/// Every group gets its own record of `record_size` bytes. A record starts at a multiple of
/// `shaderGroupBaseAlignment`, which is also a multiple of `shaderGroupHandleAlignment`, so a
/// region with a single record can use the record size as its stride.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub handle_size: u32,
    pub record_size: u32,
    pub group_count: u32,
}

impl TableLayout {
    pub fn new(handle_size: u32, handle_alignment: u32, base_alignment: u32, group_count: u32) -> Self {
        let base_alignment = base_alignment.max(handle_alignment);
        let record_size = aligned_size(aligned_size(handle_size, handle_alignment), base_alignment);
        Self {
            handle_size,
            record_size,
            group_count,
        }
    }

    pub fn table_size(&self) -> u32 {
        self.record_size * self.group_count
    }

    pub fn record_offset(&self, group: u32) -> u32 {
        debug_assert!(group < self.group_count);
        group * self.record_size
    }

    /// Copies the tightly packed handles the driver returned into their aligned records.
    pub fn pack(&self, handles: &[u8]) -> Vec<u8> {
        let handle_size = self.handle_size as usize;
        assert_eq!(handles.len(), handle_size * self.group_count as usize);

        let mut table = vec![0u8; self.table_size() as usize];
        for (group, handle) in handles.chunks_exact(handle_size).enumerate() {
            let offset = self.record_offset(group as u32) as usize;
            table[offset..offset + handle_size].copy_from_slice(handle);
        }
        table
    }

    pub fn region(&self, table_address: vk::DeviceAddress, group: u32) -> vk::StridedDeviceAddressRegionKHR {
        vk::StridedDeviceAddressRegionKHR {
            device_address: table_address + self.record_offset(group) as u64,
            stride: self.record_size as u64,
            size: self.record_size as u64,
        }
    }
}

pub struct ShaderBindingTable {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
    _buffer: Buffer<u8>,
}

impl ShaderBindingTable {
    pub fn new(allocator: Arc<Allocator>, pipeline: vk::Pipeline) -> Result<Self> {
        let context = allocator.context.clone();
        let properties = context.ray_tracing_properties();

        let layout = TableLayout::new(
            properties.shader_group_handle_size,
            properties.shader_group_handle_alignment,
            properties.shader_group_base_alignment,
            GROUP_COUNT,
        );

        let handles = unsafe {
            context
                .context_raytracing
                .ray_tracing_pipeline
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    GROUP_COUNT,
                    (layout.handle_size * GROUP_COUNT) as usize,
                )
        }?;

        let buffer: Buffer<u8> = Buffer::with_data(
            allocator,
            "shader binding table",
            &layout.pack(&handles),
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            properties.shader_group_base_alignment as vk::DeviceSize,
        )?;

        let table_address = buffer.get_device_address();
        log::info!(
            "Shader binding table: {} byte records at {:#x}",
            layout.record_size,
            table_address
        );

        Ok(Self {
            raygen: layout.region(table_address, RAYGEN_GROUP),
            miss: layout.region(table_address, MISS_GROUP),
            hit: layout.region(table_address, HIT_GROUP),
            callable: vk::StridedDeviceAddressRegionKHR::default(),
            _buffer: buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_start_at_the_base_alignment() {
        let layout = TableLayout::new(32, 32, 64, GROUP_COUNT);
        assert_eq!(layout.record_size, 64);
        assert_eq!(layout.table_size(), 192);
        assert_eq!(layout.record_offset(MISS_GROUP), 64);
        assert_eq!(layout.record_offset(HIT_GROUP), 128);
    }

    #[test]
    fn handles_keep_their_group_order() {
        let layout = TableLayout::new(4, 4, 16, GROUP_COUNT);
        let handles = [1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3];
        let table = layout.pack(&handles);

        assert_eq!(table.len(), 48);
        assert_eq!(&table[0..4], &[1, 1, 1, 1]);
        assert_eq!(&table[16..20], &[2, 2, 2, 2]);
        assert_eq!(&table[32..36], &[3, 3, 3, 3]);
        assert!(table[4..16].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn regions_point_at_their_records() {
        let layout = TableLayout::new(32, 32, 64, GROUP_COUNT);
        let base = 0x1000;

        let raygen = layout.region(base, RAYGEN_GROUP);
        let hit = layout.region(base, HIT_GROUP);

        assert_eq!(raygen.device_address, 0x1000);
        // A ray generation region must have size equal to its stride
        assert_eq!(raygen.size, raygen.stride);
        assert_eq!(hit.device_address, 0x1000 + 128);
        assert_eq!(hit.device_address % 64, 0);
    }

    #[test]
    fn large_handles_span_several_alignment_units() {
        let layout = TableLayout::new(48, 16, 32, GROUP_COUNT);
        assert_eq!(layout.record_size, 64);
        assert_eq!(layout.record_offset(HIT_GROUP) % 32, 0);
    }
}
