use ash::vk;

use crate::{
    error::{GpuResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// 查询池，目前只用于查询 BLAS compaction 之后的大小
pub struct GfxQueryPool {
    handle: vk::QueryPool,
    query_type: vk::QueryType,

    /// pool 的容量
    count: u32,
}

impl GfxQueryPool {
    pub fn new(device: &GfxDevice, ty: vk::QueryType, count: u32, debug_name: &str) -> GpuResult<Self> {
        let create_info = vk::QueryPoolCreateInfo::default().query_type(ty).query_count(count);
        let handle = unsafe { device.create_query_pool(&create_info, None) }.vk_context("vkCreateQueryPool")?;

        let query_pool = Self {
            handle,
            query_type: ty,
            count,
        };
        device.set_debug_name(&query_pool, debug_name);
        Ok(query_pool)
    }

    #[inline]
    pub fn handle(&self) -> vk::QueryPool {
        self.handle
    }

    #[inline]
    pub fn query_type(&self) -> vk::QueryType {
        self.query_type
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// 阻塞等待查询结果可用
    pub fn get_results_u64(&self, device: &GfxDevice, first_query: u32, query_count: u32) -> GpuResult<Vec<u64>> {
        debug_assert!(first_query + query_count <= self.count);
        let mut results = vec![0u64; query_count as usize];
        unsafe {
            device.get_query_pool_results(
                self.handle,
                first_query,
                &mut results,
                vk::QueryResultFlags::WAIT | vk::QueryResultFlags::TYPE_64,
            )
        }
        .vk_context("vkGetQueryPoolResults")?;
        Ok(results)
    }

    pub fn destroy(self, device: &GfxDevice) {
        unsafe { device.destroy_query_pool(self.handle, None) };
    }
}

impl DebugType for GfxQueryPool {
    fn debug_type_name() -> &'static str {
        "GfxQueryPool"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
