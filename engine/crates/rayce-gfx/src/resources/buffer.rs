use std::ptr;

use ash::vk;

use crate::{
    context::GpuContext,
    error::{GpuError, GpuResult, VkResultExt},
    foundation::{debug_messenger::DebugType, mem_allocator::MemoryBlock},
};

/// 线性的 GPU buffer
///
/// 创建分两步：`create` 只创建 handle，`allocate_memory` 分配并绑定内存（只能绑定一次）。
/// 在绑定内存之前访问 handle 属于编程错误，会直接 panic。
pub struct GfxBuffer {
    handle: vk::Buffer,
    memory: Option<MemoryBlock>,

    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,

    map_ptr: Option<*mut u8>,
    /// 只有在 buffer usage 包含 SHADER_DEVICE_ADDRESS 时才不为 0
    device_addr: vk::DeviceAddress,

    debug_name: String,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// init & destroy
impl GfxBuffer {
    /// 只创建 buffer handle，不分配内存
    pub fn create(
        ctx: &GpuContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { ctx.device().create_buffer(&buffer_ci, None) }.vk_context("vkCreateBuffer")?;

        let buffer = Self {
            handle,
            memory: None,
            size,
            usage,
            map_ptr: None,
            device_addr: 0,
            debug_name: name.as_ref().to_string(),

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        ctx.device().set_debug_name(&buffer, name);
        Ok(buffer)
    }

    /// 分配内存并绑定到 buffer
    ///
    /// - `min_alignment`: buffer 起始地址的最小对齐，例如 SBT 的 base alignment、scratch 的 offset alignment
    pub fn allocate_memory(
        &mut self,
        ctx: &GpuContext,
        property_flags: vk::MemoryPropertyFlags,
        min_alignment: Option<vk::DeviceSize>,
    ) -> GpuResult<()> {
        assert!(self.memory.is_none(), "buffer `{}` memory is already bound", self.debug_name);

        let mut requirements = unsafe { ctx.device().get_buffer_memory_requirements(self.handle) };
        if let Some(align) = min_alignment {
            requirements.alignment = requirements.alignment.max(align);
        }

        let allocate_flags = if self.is_address_capable() {
            vk::MemoryAllocateFlags::DEVICE_ADDRESS
        } else {
            vk::MemoryAllocateFlags::empty()
        };
        let mut block = ctx.allocator().allocate(&requirements, allocate_flags, property_flags)?;
        if let Err(e) = ctx.allocator().bind_buffer(&mut block, self.handle) {
            ctx.allocator().free(block);
            return Err(e);
        }
        self.memory = Some(block);

        if self.is_address_capable() {
            self.device_addr = unsafe {
                ctx.device().get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(self.handle))
            };
        }
        Ok(())
    }

    /// `create` + `allocate_memory`
    pub fn new(
        ctx: &GpuContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        property_flags: vk::MemoryPropertyFlags,
        min_alignment: Option<vk::DeviceSize>,
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        let mut buffer = Self::create(ctx, size, usage, name)?;
        if let Err(e) = buffer.allocate_memory(ctx, property_flags, min_alignment) {
            buffer.destroy(ctx);
            return Err(e);
        }
        Ok(buffer)
    }

    pub fn destroy(mut self, ctx: &GpuContext) {
        if let Some(mut block) = self.memory.take() {
            if self.map_ptr.take().is_some() {
                ctx.allocator().unmap(&mut block);
            }
            ctx.allocator().free(block);
        }
        unsafe { ctx.device().destroy_buffer(self.handle, None) };

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

// 常用的 buffer 类型
impl GfxBuffer {
    /// host 可见且 coherent，写入后无需 flush
    pub const HOST_VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[inline]
    pub fn new_device_buffer(
        ctx: &GpuContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        Self::new(ctx, size, usage, vk::MemoryPropertyFlags::DEVICE_LOCAL, None, name)
    }

    #[inline]
    pub fn new_stage_buffer(ctx: &GpuContext, size: vk::DeviceSize, name: impl AsRef<str>) -> GpuResult<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            Self::HOST_VISIBLE,
            None,
            name,
        )
    }

    #[inline]
    pub fn new_uniform_buffer(ctx: &GpuContext, size: vk::DeviceSize, name: impl AsRef<str>) -> GpuResult<Self> {
        Self::new(ctx, size, vk::BufferUsageFlags::UNIFORM_BUFFER, Self::HOST_VISIBLE, None, name)
    }

    /// 作为 BLAS 构建输入的顶点 buffer，同时可以在 shader 中作为 storage buffer 读取
    #[inline]
    pub fn new_vertex_buffer(ctx: &GpuContext, size: vk::DeviceSize, name: impl AsRef<str>) -> GpuResult<Self> {
        Self::new_device_buffer(
            ctx,
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            name,
        )
    }

    #[inline]
    pub fn new_index_buffer(ctx: &GpuContext, size: vk::DeviceSize, name: impl AsRef<str>) -> GpuResult<Self> {
        Self::new_device_buffer(
            ctx,
            size,
            vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            name,
        )
    }

    /// 程序化几何体的包围盒数组
    #[inline]
    pub fn new_aabb_buffer(ctx: &GpuContext, size: vk::DeviceSize, name: impl AsRef<str>) -> GpuResult<Self> {
        Self::new_device_buffer(
            ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            name,
        )
    }

    /// TLAS 的 instance 数组
    #[inline]
    pub fn new_acceleration_instance_buffer(
        ctx: &GpuContext,
        size: vk::DeviceSize,
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        // VkAccelerationStructureInstanceKHR 要求 16 字节对齐
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Some(16),
            name,
        )
    }

    /// 加速结构的存储空间
    #[inline]
    pub fn new_acceleration_buffer(ctx: &GpuContext, size: vk::DeviceSize, name: impl AsRef<str>) -> GpuResult<Self> {
        // acceleration structure 的 offset 要求 256 字节对齐
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Some(256),
            name,
        )
    }

    /// 加速结构构建时使用的 scratch buffer
    #[inline]
    pub fn new_acceleration_scratch_buffer(
        ctx: &GpuContext,
        size: vk::DeviceSize,
        scratch_alignment: vk::DeviceSize,
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Some(scratch_alignment.max(1)),
            name,
        )
    }

    /// shader binding table，host 直接写入
    #[inline]
    pub fn new_sbt_buffer(
        ctx: &GpuContext,
        size: vk::DeviceSize,
        base_alignment: vk::DeviceSize,
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            Self::HOST_VISIBLE,
            Some(base_alignment),
            name,
        )
    }
}

// getter
impl GfxBuffer {
    /// GPU 访问用的 handle，必须已经绑定了内存
    #[inline]
    pub fn vk_handle(&self) -> vk::Buffer {
        assert!(self.memory.is_some(), "buffer `{}` is used before memory is bound", self.debug_name);
        self.handle
    }

    /// 只有 usage 包含 SHADER_DEVICE_ADDRESS 的 buffer 才会返回非 0 值
    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        assert!(self.memory.is_some(), "buffer `{}` is used before memory is bound", self.debug_name);
        self.device_addr
    }

    #[inline]
    pub fn is_address_capable(&self) -> bool {
        self.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn memory(&self) -> Option<&MemoryBlock> {
        self.memory.as_ref()
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    #[inline]
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default().buffer(self.vk_handle()).offset(0).range(vk::WHOLE_SIZE)
    }
}

// host 访问
impl GfxBuffer {
    fn bound_memory_mut(&mut self) -> &mut MemoryBlock {
        let name = &self.debug_name;
        self.memory.as_mut().unwrap_or_else(|| panic!("buffer `{name}` is used before memory is bound"))
    }

    /// 映射到 host 地址空间，重复调用返回同一个指针
    pub fn map(&mut self, ctx: &GpuContext) -> GpuResult<*mut u8> {
        if let Some(ptr) = self.map_ptr {
            return Ok(ptr);
        }
        let ptr = ctx.allocator().map(self.bound_memory_mut())?;
        self.map_ptr = Some(ptr);
        Ok(ptr)
    }

    pub fn unmap(&mut self, ctx: &GpuContext) {
        if self.map_ptr.take().is_some() {
            ctx.allocator().unmap(self.bound_memory_mut());
        }
    }

    #[inline]
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.map_ptr
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> GpuResult<()> {
        let end = offset + len as vk::DeviceSize;
        if end > self.size {
            return Err(GpuError::BufferOverflow {
                name: self.debug_name.clone(),
                requested: end,
                capacity: self.size,
            });
        }
        Ok(())
    }

    /// 通过 mem map 将数据写入 buffer，必要时 flush
    ///
    /// 如果调用前没有映射，写完之后会恢复为未映射状态
    pub fn write_bytes(&mut self, ctx: &GpuContext, offset: vk::DeviceSize, data: &[u8]) -> GpuResult<()> {
        self.check_range(offset, data.len())?;
        let was_mapped = self.map_ptr.is_some();
        let ptr = self.map(ctx)?;
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        let result = ctx.allocator().flush(self.bound_memory_mut(), offset, data.len() as vk::DeviceSize);
        if !was_mapped {
            self.unmap(ctx);
        }
        result
    }

    #[inline]
    pub fn write<T: bytemuck::Pod>(&mut self, ctx: &GpuContext, data: &[T]) -> GpuResult<()> {
        self.write_bytes(ctx, 0, bytemuck::cast_slice(data))
    }

    /// 通过 mem map 读取 buffer 的内容
    pub fn read_bytes(&mut self, ctx: &GpuContext, offset: vk::DeviceSize, len: usize) -> GpuResult<Vec<u8>> {
        self.check_range(offset, len)?;
        let was_mapped = self.map_ptr.is_some();
        let ptr = self.map(ctx)?;
        let invalidated = ctx.allocator().invalidate(self.bound_memory_mut(), offset, len as vk::DeviceSize);
        let bytes = unsafe { std::slice::from_raw_parts(ptr.add(offset as usize), len).to_vec() };
        if !was_mapped {
            self.unmap(ctx);
        }
        invalidated.map(|_| bytes)
    }

    /// 创建一个临时的 stage buffer，先将数据放入 stage buffer，再 transfer 到 self
    ///
    /// sync 表示这个函数是同步等待的，返回时 stage buffer 已经销毁
    pub fn transfer_data_sync<T: bytemuck::Pod>(&self, ctx: &GpuContext, data: &[T]) -> GpuResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            return Ok(());
        }
        self.check_range(0, bytes.len())?;

        let mut stage_buffer =
            Self::new_stage_buffer(ctx, bytes.len() as vk::DeviceSize, format!("{}-stage", self.debug_name))?;
        let result = stage_buffer.write_bytes(ctx, 0, bytes).and_then(|_| {
            ctx.one_time_exec(&format!("{}-upload", self.debug_name), |cmd| {
                cmd.cmd_copy_buffer(
                    &stage_buffer,
                    self,
                    &[vk::BufferCopy {
                        size: bytes.len() as vk::DeviceSize,
                        ..Default::default()
                    }],
                );
            })
        });
        stage_buffer.destroy(ctx);
        result
    }

    /// 把 device local 的内容拷贝回 host，需要 buffer 带有 TRANSFER_SRC
    pub fn read_back_sync(&self, ctx: &GpuContext, len: usize) -> GpuResult<Vec<u8>> {
        self.check_range(0, len)?;
        // size 为 0 的 copy region 是非法的
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut stage_buffer =
            Self::new_stage_buffer(ctx, len as vk::DeviceSize, format!("{}-readback", self.debug_name))?;
        let result = ctx
            .one_time_exec(&format!("{}-readback", self.debug_name), |cmd| {
                cmd.cmd_copy_buffer(
                    self,
                    &stage_buffer,
                    &[vk::BufferCopy {
                        size: len as vk::DeviceSize,
                        ..Default::default()
                    }],
                );
            })
            .and_then(|_| stage_buffer.read_bytes(ctx, 0, len));
        stage_buffer.destroy(ctx);
        result
    }
}

impl Drop for GfxBuffer {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !self.destroyed {
            log::error!("GfxBuffer `{}` dropped without destroy()", self.debug_name);
        }
    }
}

impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
