use std::marker::PhantomData;

use ash::vk;

use crate::{
    context::GpuContext,
    error::{GpuError, GpuResult},
    resources::buffer::GfxBuffer,
};

/// 元素类型为 `T` 的数组 buffer，创建时即持久映射到 host-coherent 内存
///
/// 写入之后对 GPU 立即可见，不需要 flush；调用方需要保证 GPU 没有在读取同一块内存
/// （通过 frame in flight 的 fence 保证）。
pub struct GfxStructuredBuffer<T: bytemuck::Pod> {
    inner: GfxBuffer,
    len: usize,
    _phantom: PhantomData<T>,
}

impl<T: bytemuck::Pod> GfxStructuredBuffer<T> {
    pub fn new(ctx: &GpuContext, len: usize, usage: vk::BufferUsageFlags, name: impl AsRef<str>) -> GpuResult<Self> {
        let size = (size_of::<T>() * len.max(1)) as vk::DeviceSize;
        let mut inner = GfxBuffer::new(ctx, size, usage, GfxBuffer::HOST_VISIBLE, None, name)?;
        if let Err(e) = inner.map(ctx) {
            inner.destroy(ctx);
            return Err(e);
        }
        Ok(Self {
            inner,
            len,
            _phantom: PhantomData,
        })
    }

    #[inline]
    pub fn new_ubo(ctx: &GpuContext, len: usize, name: impl AsRef<str>) -> GpuResult<Self> {
        Self::new(ctx, len, vk::BufferUsageFlags::UNIFORM_BUFFER, name)
    }

    #[inline]
    pub fn new_ssbo(ctx: &GpuContext, len: usize, name: impl AsRef<str>) -> GpuResult<Self> {
        Self::new(ctx, len, vk::BufferUsageFlags::STORAGE_BUFFER, name)
    }

    pub fn destroy(self, ctx: &GpuContext) {
        self.inner.destroy(ctx);
    }

    #[inline]
    pub fn mapped_slice(&mut self) -> &mut [T] {
        let ptr = self.inner.mapped_ptr().unwrap_or_else(|| unreachable!("structured buffer is always mapped"));
        unsafe { std::slice::from_raw_parts_mut(ptr as *mut T, self.len) }
    }

    /// 从头开始覆盖写入，`data` 不能超过容量
    pub fn write_slice(&mut self, data: &[T]) -> GpuResult<()> {
        if data.len() > self.len {
            return Err(GpuError::BufferOverflow {
                name: self.inner.debug_name().to_string(),
                requested: (size_of_val(data)) as vk::DeviceSize,
                capacity: self.inner.size(),
            });
        }
        self.mapped_slice()[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn to_vec(&mut self) -> Vec<T> {
        self.mapped_slice().to_vec()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn buffer(&self) -> &GfxBuffer {
        &self.inner
    }

    #[inline]
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.inner.descriptor_info()
    }
}
