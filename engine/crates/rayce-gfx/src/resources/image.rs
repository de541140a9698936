use ash::vk;

use crate::{
    commands::barrier::GfxImageBarrier,
    context::GpuContext,
    error::{GpuError, GpuResult, VkResultExt},
    foundation::{debug_messenger::DebugType, mem_allocator::MemoryBlock},
    resources::{buffer::GfxBuffer, layout_state::ImageLayoutState},
    utils::{format_aspect, format_byte_count},
};

#[derive(Clone, Copy, Debug)]
pub struct GfxImageCreateInfo {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub tiling: vk::ImageTiling,
}

impl GfxImageCreateInfo {
    #[inline]
    pub fn new_image_2d_info(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            tiling: vk::ImageTiling::OPTIMAL,
        }
    }

    fn vk_create_info(&self) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format)
            .extent(self.extent.into())
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(self.tiling)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            // 这里只能是 UNDEFINED 或者 PREINITIALIZED
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }
}

/// 2D image，持有自己的内存，并跟踪当前布局
pub struct GfxImage2D {
    handle: vk::Image,
    memory: Option<MemoryBlock>,

    info: GfxImageCreateInfo,
    layout: ImageLayoutState,

    debug_name: String,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// init & destroy
impl GfxImage2D {
    /// 只创建 image handle，不分配内存
    pub fn create(ctx: &GpuContext, info: &GfxImageCreateInfo, name: impl AsRef<str>) -> GpuResult<Self> {
        let handle =
            unsafe { ctx.device().create_image(&info.vk_create_info(), None) }.vk_context("vkCreateImage")?;
        let image = Self {
            handle,
            memory: None,
            info: *info,
            layout: ImageLayoutState::new(),
            debug_name: name.as_ref().to_string(),

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        ctx.device().set_debug_name(&image, name);
        Ok(image)
    }

    pub fn allocate_memory(&mut self, ctx: &GpuContext, property_flags: vk::MemoryPropertyFlags) -> GpuResult<()> {
        assert!(self.memory.is_none(), "image `{}` memory is already bound", self.debug_name);

        let requirements = unsafe { ctx.device().get_image_memory_requirements(self.handle) };
        let mut block = ctx.allocator().allocate(&requirements, vk::MemoryAllocateFlags::empty(), property_flags)?;
        if let Err(e) = ctx.allocator().bind_image(&mut block, self.handle) {
            ctx.allocator().free(block);
            return Err(e);
        }
        self.memory = Some(block);
        Ok(())
    }

    /// `create` + device local 内存
    pub fn new(ctx: &GpuContext, info: &GfxImageCreateInfo, name: impl AsRef<str>) -> GpuResult<Self> {
        let mut image = Self::create(ctx, info, name)?;
        if let Err(e) = image.allocate_memory(ctx, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            image.destroy(ctx);
            return Err(e);
        }
        Ok(image)
    }

    /// 光追输出 / 累积使用的 storage image，创建后处于 GENERAL 布局
    pub fn new_storage_image(
        ctx: &GpuContext,
        extent: vk::Extent2D,
        format: vk::Format,
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        let info = GfxImageCreateInfo::new_image_2d_info(
            extent,
            format,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
        );
        let mut image = Self::new(ctx, &info, name)?;
        if let Err(e) = image.adapt_layout(ctx, vk::ImageLayout::GENERAL) {
            image.destroy(ctx);
            return Err(e);
        }
        Ok(image)
    }

    /// 从 RGBA8 像素创建一张可采样的贴图，返回时处于 SHADER_READ_ONLY 布局
    pub fn from_rgba8(
        ctx: &GpuContext,
        width: u32,
        height: u32,
        data: &[u8],
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        let info = GfxImageCreateInfo::new_image_2d_info(
            vk::Extent2D { width, height },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        );
        let mut image = Self::new(ctx, &info, name)?;
        if let Err(e) = image.transfer_data(ctx, data) {
            image.destroy(ctx);
            return Err(e);
        }
        Ok(image)
    }

    pub fn destroy(mut self, ctx: &GpuContext) {
        if let Some(block) = self.memory.take() {
            ctx.allocator().free(block);
        }
        unsafe { ctx.device().destroy_image(self.handle, None) };

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

// 布局与数据传输
impl GfxImage2D {
    /// 立即提交一次布局转换并等待完成
    pub fn adapt_layout(&mut self, ctx: &GpuContext, new_layout: vk::ImageLayout) -> GpuResult<()> {
        let handle = self.vk_handle();
        let mut layout = self.layout;
        let transition = layout.transition(new_layout)?;
        let barrier = GfxImageBarrier::from_transition(&transition, handle, format_aspect(self.info.format));
        ctx.one_time_exec(&format!("{}-layout", self.debug_name), |cmd| {
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), &[barrier]);
        })?;
        self.layout = layout;
        Ok(())
    }

    /// 通过 staging buffer 上传像素：UNDEFINED → TRANSFER_DST → copy → SHADER_READ_ONLY
    pub fn transfer_data(&mut self, ctx: &GpuContext, data: &[u8]) -> GpuResult<()> {
        let pixel_size =
            format_byte_count(self.info.format).ok_or(GpuError::UnsupportedFormat(self.info.format))?;
        let expected = self.info.extent.width as usize * self.info.extent.height as usize * pixel_size;
        if data.len() != expected {
            return Err(GpuError::BufferOverflow {
                name: self.debug_name.clone(),
                requested: data.len() as vk::DeviceSize,
                capacity: expected as vk::DeviceSize,
            });
        }

        let mut stage_buffer =
            GfxBuffer::new_stage_buffer(ctx, data.len() as vk::DeviceSize, format!("{}-stage", self.debug_name))?;
        if let Err(e) = stage_buffer.write_bytes(ctx, 0, data) {
            stage_buffer.destroy(ctx);
            return Err(e);
        }

        let image = self.vk_handle();
        let aspect = format_aspect(self.info.format);
        let extent = self.info.extent;
        // 两次转换都先在状态机上检查，失败时不提交任何命令
        let mut layout = self.layout;
        let barriers = layout
            .transition(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .and_then(|to_dst| Ok((to_dst, layout.transition(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?)));
        let result = barriers.and_then(|(to_dst, to_read)| {
            ctx.one_time_exec(&format!("{}-upload", self.debug_name), |cmd| {
                cmd.image_memory_barrier(
                    vk::DependencyFlags::empty(),
                    &[GfxImageBarrier::from_transition(&to_dst, image, aspect)],
                );

                let buffer_image_copy = vk::BufferImageCopy2::default()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: aspect,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_offset(vk::Offset3D::default())
                    .image_extent(extent.into());
                cmd.cmd_copy_buffer_to_image(
                    &vk::CopyBufferToImageInfo2::default()
                        .src_buffer(stage_buffer.vk_handle())
                        .dst_image(image)
                        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .regions(std::slice::from_ref(&buffer_image_copy)),
                );

                cmd.image_memory_barrier(
                    vk::DependencyFlags::empty(),
                    &[GfxImageBarrier::from_transition(&to_read, image, aspect)],
                );
            })
        });
        stage_buffer.destroy(ctx);

        result?;
        self.layout = layout;
        Ok(())
    }
}

// getters
impl GfxImage2D {
    /// GPU 访问用的 handle，必须已经绑定了内存
    #[inline]
    pub fn vk_handle(&self) -> vk::Image {
        assert!(self.memory.is_some(), "image `{}` is used before memory is bound", self.debug_name);
        self.handle
    }

    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout.current()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.info.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.info.format
    }

    #[inline]
    pub fn tiling(&self) -> vk::ImageTiling {
        self.info.tiling
    }

    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.info.usage
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl Drop for GfxImage2D {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !self.destroyed {
            log::error!("GfxImage2D `{}` dropped without destroy()", self.debug_name);
        }
    }
}

impl DebugType for GfxImage2D {
    fn debug_type_name() -> &'static str {
        "GfxImage2D"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
