use std::mem::ManuallyDrop;

use ash::vk;

use crate::{
    commands::{
        command_buffer::GfxCommandBuffer,
        command_pool::GfxCommandPool,
        command_queue::GfxCommandQueue,
        transient::{ImmediateSubmitter, TransientSubmitter},
    },
    error::GpuResult,
    foundation::{
        debug_messenger::GfxDebugMsger, device::GfxDevice, instance::GfxInstance, mem_allocator::MemoryAllocator,
        physical_device::GfxPhysicalDevice,
    },
};

pub struct GpuContextCreateInfo {
    pub app_name: String,
    pub enable_validation: bool,
}

impl Default for GpuContextCreateInfo {
    fn default() -> Self {
        Self {
            app_name: "rayce".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

/// 长生命周期的 GPU 上下文
///
/// 持有 instance、device、内存分配器、队列以及临时命令使用的 command pool。
/// 其他所有组件都通过 `&GpuContext` 使用它，不会延长它的生命周期。
///
/// # 创建顺序
/// entry → instance → debug messenger → physical device → device → queue → allocator → command pool
///
/// 销毁顺序与之相反，由 `Drop` 负责。
pub struct GpuContext {
    /// vulkan 动态库的函数指针，必须比 instance 活得更久
    _entry: ash::Entry,
    instance: ManuallyDrop<GfxInstance>,
    debug_msger: ManuallyDrop<Option<GfxDebugMsger>>,
    physical_device: GfxPhysicalDevice,
    device: ManuallyDrop<GfxDevice>,
    allocator: ManuallyDrop<MemoryAllocator>,
    gfx_queue: GfxCommandQueue,
    transient_pool: ManuallyDrop<GfxCommandPool>,
    submitter: Box<dyn TransientSubmitter>,
}

// 创建
impl GpuContext {
    pub fn new(create_info: &GpuContextCreateInfo) -> GpuResult<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let instance = GfxInstance::new(&entry, &create_info.app_name, create_info.enable_validation)?;
        let debug_msger = if instance.debug_utils_enabled() {
            Some(GfxDebugMsger::new(&entry, instance.ash_instance())?)
        } else {
            None
        };

        let candidates = instance.enumerate_physical_devices()?;
        let physical_device = GfxPhysicalDevice::pick(instance.ash_instance(), &candidates)?;
        log::info!("selected gpu: {}", physical_device.name());

        let queue_priorities = [1.0];
        let queue_ci = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(physical_device.gfx_queue_family_index)
            .queue_priorities(&queue_priorities);
        let device = GfxDevice::new(
            instance.ash_instance(),
            physical_device.vk_handle(),
            std::slice::from_ref(&queue_ci),
            instance.debug_utils_enabled(),
        )?;

        let gfx_queue = GfxCommandQueue::new(&device, physical_device.gfx_queue_family_index, 0, "gfx");

        let allocator = MemoryAllocator::new(
            instance.ash_instance(),
            physical_device.vk_handle(),
            &device,
            *physical_device.mem_props(),
        )?;

        let transient_pool = GfxCommandPool::new(
            &device,
            physical_device.gfx_queue_family_index,
            vk::CommandPoolCreateFlags::TRANSIENT,
            "transient",
        )?;

        Ok(Self {
            _entry: entry,
            instance: ManuallyDrop::new(instance),
            debug_msger: ManuallyDrop::new(debug_msger),
            physical_device,
            device: ManuallyDrop::new(device),
            allocator: ManuallyDrop::new(allocator),
            gfx_queue,
            transient_pool: ManuallyDrop::new(transient_pool),
            submitter: Box::new(ImmediateSubmitter),
        })
    }

    /// 替换临时命令的提交策略
    pub fn set_transient_submitter(&mut self, submitter: Box<dyn TransientSubmitter>) {
        self.submitter = submitter;
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("device wait idle failed during teardown: {}", e);
        }
        unsafe {
            ManuallyDrop::take(&mut self.transient_pool).destroy(&self.device);
            // vma 必须在 device 之前销毁
            ManuallyDrop::drop(&mut self.allocator);
            ManuallyDrop::take(&mut self.device).destroy();
            if let Some(debug_msger) = ManuallyDrop::take(&mut self.debug_msger) {
                debug_msger.destroy();
            }
            ManuallyDrop::take(&mut self.instance).destroy();
        }
    }
}

// getters
impl GpuContext {
    #[inline]
    pub fn device(&self) -> &GfxDevice {
        &self.device
    }

    #[inline]
    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.physical_device
    }

    #[inline]
    pub fn gfx_queue(&self) -> &GfxCommandQueue {
        &self.gfx_queue
    }

    #[inline]
    pub fn rt_pipeline_props(&self) -> &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static> {
        self.physical_device.rt_pipeline_props()
    }

    #[inline]
    pub fn acc_struct_props(&self) -> &vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static> {
        self.physical_device.acc_struct_props()
    }
}

// tools
impl GpuContext {
    /// 立即执行某个 command，并同步等待执行结果
    ///
    /// 返回时 GPU 已经执行完毕，闭包内引用的临时资源可以立刻销毁
    pub fn one_time_exec<F, R>(&self, name: &str, func: F) -> GpuResult<R>
    where
        F: FnOnce(&GfxCommandBuffer<'_>) -> R,
    {
        let mut func = Some(func);
        let mut ret = None;
        self.submitter.submit_transient(
            &self.device,
            &self.gfx_queue,
            &self.transient_pool,
            name,
            &mut |cmd| {
                if let Some(f) = func.take() {
                    ret = Some(f(cmd));
                }
            },
        )?;
        Ok(ret.unwrap_or_else(|| unreachable!("transient submitter did not invoke the recorder for `{name}`")))
    }

    pub fn wait_idle(&self) -> GpuResult<()> {
        self.device.wait_idle()
    }
}
