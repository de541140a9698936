use ash::vk;

use crate::{
    context::GpuContext,
    error::{GpuResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    resources::image::GfxImage2D,
    utils::format_aspect,
};

pub struct GfxImageView {
    handle: vk::ImageView,
    format: vk::Format,
}

impl GfxImageView {
    /// 覆盖整张 image 的 2D view
    pub fn new_2d(ctx: &GpuContext, image: &GfxImage2D, name: impl AsRef<str>) -> GpuResult<Self> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image.vk_handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: format_aspect(image.format()),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let handle =
            unsafe { ctx.device().create_image_view(&create_info, None) }.vk_context("vkCreateImageView")?;

        let view = Self {
            handle,
            format: image.format(),
        };
        ctx.device().set_debug_name(&view, name);
        Ok(view)
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn destroy(self, ctx: &GpuContext) {
        unsafe { ctx.device().destroy_image_view(self.handle, None) };
    }
}

impl DebugType for GfxImageView {
    fn debug_type_name() -> &'static str {
        "GfxImageView"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
