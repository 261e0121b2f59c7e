pub fn aligned_size(value: u32, alignment: u32) -> u32 {
    assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Byte size of a slice, as Vulkan wants it.
pub fn slice_size<T>(data: &[T]) -> u64 {
    std::mem::size_of_val(data) as u64
}
