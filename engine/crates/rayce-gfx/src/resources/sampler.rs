use ash::vk;

use crate::{
    context::GpuContext,
    error::{GpuResult, VkResultExt},
    foundation::debug_messenger::DebugType,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub max_anisotropy: u32,
    pub mipmap_mode: vk::SamplerMipmapMode,
}

impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: 0,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        }
    }
}

pub struct GfxSampler {
    handle: vk::Sampler,
}

impl GfxSampler {
    pub fn new(ctx: &GpuContext, desc: &GfxSamplerDesc, name: impl AsRef<str>) -> GpuResult<Self> {
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .mipmap_mode(desc.mipmap_mode)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

        if desc.max_anisotropy > 0 {
            create_info = create_info.anisotropy_enable(true).max_anisotropy(desc.max_anisotropy as f32);
        }

        let handle = unsafe { ctx.device().create_sampler(&create_info, None) }.vk_context("vkCreateSampler")?;
        let sampler = Self { handle };
        ctx.device().set_debug_name(&sampler, name);
        Ok(sampler)
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }

    pub fn destroy(self, ctx: &GpuContext) {
        unsafe { ctx.device().destroy_sampler(self.handle, None) };
    }
}

impl DebugType for GfxSampler {
    fn debug_type_name() -> &'static str {
        "GfxSampler"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
