use ash::vk;
use vk_mem::Alloc;

use crate::error::{GpuError, GpuResult, VkResultExt};

/// 选择同时满足 `type_filter` 和 `properties` 的第一个 memory type
///
/// `type_filter` 来自 `vk::MemoryRequirements::memory_type_bits`，第 i 位为 1 表示可以使用第 i 个 memory type
pub fn find_memory_type(
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> GpuResult<u32> {
    mem_props.memory_types[..mem_props.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(i, mem_type)| (type_filter & (1 << i)) != 0 && mem_type.property_flags.contains(properties))
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::OutOfMemoryType {
            type_filter,
            properties,
        })
}

/// 一块独占的 GPU 内存
///
/// 由唯一的 Buffer 或者 Image 持有，随持有者一起销毁
pub struct MemoryBlock {
    pub(crate) allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    memory_type_index: u32,
    allocate_flags: vk::MemoryAllocateFlags,
    property_flags: vk::MemoryPropertyFlags,
}

impl MemoryBlock {
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
    #[inline]
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }
    #[inline]
    pub fn allocate_flags(&self) -> vk::MemoryAllocateFlags {
        self.allocate_flags
    }
    #[inline]
    pub fn property_flags(&self) -> vk::MemoryPropertyFlags {
        self.property_flags
    }
    #[inline]
    pub fn is_host_coherent(&self) -> bool {
        self.property_flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }
}

/// GPU 内存分配器，底层是 vma
///
/// memory type 由这里自己选择，然后限制 vma 只能在这个 type 上分配，
/// 这样分配失败的原因可以明确地区分为「没有合适的 memory type」和「显存不足」
pub struct MemoryAllocator {
    vma: vk_mem::Allocator,
    mem_props: vk::PhysicalDeviceMemoryProperties,
}

impl MemoryAllocator {
    /// vma 需要引用 Instance 以及 Device，因此必须在它们之后创建、在它们之前销毁
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        device: &ash::Device,
        mem_props: vk::PhysicalDeviceMemoryProperties,
    ) -> GpuResult<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        // 所有的分配都会带上 VK_MEMORY_ALLOCATE_DEVICE_ADDRESS_BIT
        vma_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;

        let vma = unsafe { vk_mem::Allocator::new(vma_ci) }.vk_context("vmaCreateAllocator")?;

        Ok(Self { vma, mem_props })
    }

    /// 分配一块满足要求的内存
    ///
    /// - `requirements`: 来自 buffer / image 的内存需求，`memory_type_bits` 作为 type filter
    /// - `allocate_flags`: 只支持 `DEVICE_ADDRESS`，由 vma 统一开启
    /// - `property_flags`: 例如 `DEVICE_LOCAL` 或者 `HOST_VISIBLE | HOST_COHERENT`
    pub fn allocate(
        &self,
        requirements: &vk::MemoryRequirements,
        allocate_flags: vk::MemoryAllocateFlags,
        property_flags: vk::MemoryPropertyFlags,
    ) -> GpuResult<MemoryBlock> {
        let memory_type_index = find_memory_type(&self.mem_props, requirements.memory_type_bits, property_flags)?;

        let host_visible = property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            flags: if host_visible {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            usage: vk_mem::MemoryUsage::Unknown,
            required_flags: property_flags,
            memory_type_bits: 1 << memory_type_index,
            ..Default::default()
        };

        let allocation = unsafe { self.vma.allocate_memory(requirements, &alloc_ci) }.vk_context("vmaAllocateMemory")?;

        log::debug!(
            "allocated {} bytes from memory type {} ({:?})",
            requirements.size,
            memory_type_index,
            property_flags
        );
        Ok(MemoryBlock {
            allocation,
            size: requirements.size,
            memory_type_index,
            allocate_flags,
            property_flags,
        })
    }

    pub fn free(&self, mut block: MemoryBlock) {
        unsafe { self.vma.free_memory(&mut block.allocation) };
    }

    pub fn bind_buffer(&self, block: &mut MemoryBlock, buffer: vk::Buffer) -> GpuResult<()> {
        unsafe { self.vma.bind_buffer_memory(&mut block.allocation, buffer) }.vk_context("vmaBindBufferMemory")
    }

    pub fn bind_image(&self, block: &mut MemoryBlock, image: vk::Image) -> GpuResult<()> {
        unsafe { self.vma.bind_image_memory(&mut block.allocation, image) }.vk_context("vmaBindImageMemory")
    }

    pub fn map(&self, block: &mut MemoryBlock) -> GpuResult<*mut u8> {
        unsafe { self.vma.map_memory(&mut block.allocation) }.vk_context("vmaMapMemory")
    }

    pub fn unmap(&self, block: &mut MemoryBlock) {
        unsafe { self.vma.unmap_memory(&mut block.allocation) }
    }

    /// 非 coherent 的内存在 host 写入后需要 flush
    pub fn flush(&self, block: &MemoryBlock, offset: vk::DeviceSize, size: vk::DeviceSize) -> GpuResult<()> {
        if block.is_host_coherent() {
            return Ok(());
        }
        self.vma.flush_allocation(&block.allocation, offset, size).vk_context("vmaFlushAllocation")
    }

    /// 非 coherent 的内存在 host 读取前需要 invalidate
    pub fn invalidate(&self, block: &MemoryBlock, offset: vk::DeviceSize, size: vk::DeviceSize) -> GpuResult<()> {
        if block.is_host_coherent() {
            return Ok(());
        }
        self.vma.invalidate_allocation(&block.allocation, offset, size).vk_context("vmaInvalidateAllocation")
    }

    #[inline]
    pub fn mem_props(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.mem_props
    }
}
