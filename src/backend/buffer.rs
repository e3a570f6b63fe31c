// Buffer and image memory utilities
//
// Provides helpers for creating GPU-accessible memory: the host-visible
// vertex buffer and device-local color images.

use anyhow::{Context, Result};
use ash::vk;
use super::VulkanDevice;

/// A buffer together with the memory bound to it
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    /// Bytes requested, not the driver's rounded-up allocation size
    pub size: vk::DeviceSize,
}

impl BoundBuffer {
    /// Null handles are ignored by the driver, so a half-built buffer is fine.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Byte size of `data`; zero-sized buffers are invalid.
pub fn byte_size<T>(data: &[T]) -> Result<vk::DeviceSize> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;
    if size == 0 {
        anyhow::bail!("Refusing to create an empty buffer");
    }
    Ok(size)
}

fn ensure_fits(len: vk::DeviceSize, capacity: vk::DeviceSize) -> Result<()> {
    if len > capacity {
        anyhow::bail!("{} bytes do not fit in a {}-byte buffer", len, capacity);
    }
    Ok(())
}

/// Allocate memory of a type that satisfies `requirements` and `properties`
fn allocate_memory(
    device: &VulkanDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        &device.memory_properties,
        requirements.memory_type_bits,
        properties,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe {
        device.device.allocate_memory(&alloc_info, None)
            .context("Failed to allocate device memory")
    }
}

/// Buffer of `size` bytes in memory with `properties`. On failure nothing is left behind.
pub fn allocate_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<BoundBuffer> {
    let mut bound = BoundBuffer {
        size,
        ..Default::default()
    };

    if let Err(e) = bind_new_buffer(device, &mut bound, usage, properties) {
        bound.destroy(&device.device);
        return Err(e);
    }
    Ok(bound)
}

fn bind_new_buffer(
    device: &VulkanDevice,
    bound: &mut BoundBuffer,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<()> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(bound.size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    bound.buffer = unsafe {
        device.device.create_buffer(&buffer_info, None)
            .context("Failed to create buffer")?
    };

    let requirements = unsafe { device.device.get_buffer_memory_requirements(bound.buffer) };
    bound.memory = allocate_memory(device, requirements, properties)?;

    unsafe {
        device.device.bind_buffer_memory(bound.buffer, bound.memory, 0)
            .context("Failed to bind buffer memory")
    }
}

/// Copy `data` to the start of a host-visible, host-coherent buffer
pub fn write_slice<T: Copy>(device: &ash::Device, target: &BoundBuffer, data: &[T]) -> Result<()> {
    let len = std::mem::size_of_val(data) as vk::DeviceSize;
    ensure_fits(len, target.size)?;

    // Coherent memory: no flush needed after the copy
    unsafe {
        let ptr = device
            .map_memory(target.memory, 0, len, vk::MemoryMapFlags::empty())
            .context("Failed to map buffer memory")? as *mut T;

        ptr.copy_from_nonoverlapping(data.as_ptr(), data.len());
        device.unmap_memory(target.memory);
    }
    Ok(())
}

/// Host-visible buffer holding exactly `data`
pub fn create_host_buffer_with<T: Copy>(
    device: &VulkanDevice,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<BoundBuffer> {
    let bound = allocate_buffer(
        device,
        byte_size(data)?,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    if let Err(e) = write_slice(&device.device, &bound, data) {
        bound.destroy(&device.device);
        return Err(e);
    }
    Ok(bound)
}

/// Find a memory type allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    mem_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    for i in 0..mem_properties.memory_type_count {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = mem_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    anyhow::bail!("Failed to find suitable memory type")
}

/// Create a single-mip 2D color image backed by device-local memory
pub fn create_color_image(
    device: &VulkanDevice,
    format: vk::Format,
    extent: vk::Extent2D,
    usage: vk::ImageUsageFlags,
) -> Result<(vk::Image, vk::DeviceMemory)> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .samples(vk::SampleCountFlags::TYPE_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = unsafe {
        device.device.create_image(&image_info, None)
            .context("Failed to create color image")?
    };

    let requirements = unsafe { device.device.get_image_memory_requirements(image) };

    let memory = match allocate_memory(device, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.device.destroy_image(image, None) };
            return Err(e.context("Failed to back color image"));
        }
    };

    if let Err(e) = unsafe { device.device.bind_image_memory(image, memory, 0) } {
        unsafe {
            device.device.destroy_image(image, None);
            device.device.free_memory(memory, None);
        }
        return Err(e).context("Failed to bind image memory");
    }

    Ok((image, memory))
}

/// Subresource covering the single mip level and layer of a color image
pub const COLOR_SUBRESOURCE_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// 2D view with identity swizzle over a color image
pub fn create_color_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(COLOR_SUBRESOURCE_RANGE);

    unsafe {
        device.device.create_image_view(&create_info, None)
            .context("Failed to create image view")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn finds_first_type_with_all_properties() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&props, 0b111, wanted).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn respects_type_filter() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
        assert!(find_memory_type(&props, 0b100, vk::MemoryPropertyFlags::DEVICE_LOCAL).is_err());
    }

    #[test]
    fn byte_size_covers_whole_records() {
        use crate::backend::pipeline::TRIANGLE;
        assert_eq!(byte_size(&TRIANGLE).unwrap(), 60);
        assert_eq!(byte_size(&[0u32; 4]).unwrap(), 16);
        assert!(byte_size::<u32>(&[]).is_err());
    }

    #[test]
    fn writes_must_fit_the_buffer() {
        assert!(ensure_fits(60, 60).is_ok());
        assert!(ensure_fits(0, 60).is_ok());
        let err = ensure_fits(64, 60).unwrap_err();
        assert!(err.to_string().contains("64 bytes"));
    }

    #[test]
    fn unbuilt_buffer_is_null() {
        let bound = BoundBuffer::default();
        assert_eq!(bound.buffer, vk::Buffer::null());
        assert_eq!(bound.memory, vk::DeviceMemory::null());
    }

    #[test]
    fn missing_properties_is_an_error() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }
}
