//! 不依赖窗口的光追冒烟程序
//!
//! 构建一个三角形 + 一个球体的场景，组装光追管线，向离屏图像 trace 一帧后退出。

use anyhow::Context;
use ash::vk;
use glam::{Mat4, Vec3};
use rayce_crate_tools::{init_log::init_log, resource::RaycePath};
use rayce_gfx::{
    GpuContext, GpuContextCreateInfo,
    descriptors::bindless::BindlessArena,
    raytracing::geometry::{AabbGeometryRecord, GeometryRecord},
    resources::{
        buffer::GfxBuffer,
        image::GfxImage2D,
        image_view::GfxImageView,
        sampler::{GfxSampler, GfxSamplerDesc},
        vertex::{Index, Vertex},
    },
};
use rayce_render::{
    config::RendererConfig,
    fatal::exit_on_error,
    frame_slots::FrameCounter,
    rt_bindings::ModelSetBinding,
    rt_pipeline::{ModelData, RaytracingPipelineAssembler, RtTargets},
    scene_accel::{SceneAccel, SceneInstance},
    scene_data::{CameraData, InstanceData, LightData, MaterialData, SphereData},
};

/// 场景几何与贴图，帧结束后统一销毁
struct HeadlessScene {
    vertex_buffer: GfxBuffer,
    index_buffer: GfxBuffer,
    aabb_buffer: GfxBuffer,
    texture: GfxImage2D,
    texture_view: GfxImageView,
    sampler: GfxSampler,
    sphere: SphereData,
}

impl HeadlessScene {
    const VERTICES: [Vertex; 3] = [
        Vertex::new([-1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
        Vertex::new([1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
        Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.5, 1.0]),
    ];
    const INDICES: [Index; 3] = [0, 1, 2];

    fn new(ctx: &GpuContext) -> anyhow::Result<Self> {
        let vertex_buffer =
            GfxBuffer::new_vertex_buffer(ctx, size_of_val(&Self::VERTICES) as vk::DeviceSize, "triangle-vertices")?;
        vertex_buffer.transfer_data_sync(ctx, &Self::VERTICES)?;
        let index_buffer =
            GfxBuffer::new_index_buffer(ctx, size_of_val(&Self::INDICES) as vk::DeviceSize, "triangle-indices")?;
        index_buffer.transfer_data_sync(ctx, &Self::INDICES)?;

        let sphere = SphereData::new(Vec3::new(1.5, 0.0, -1.0), 0.5, 1);
        let aabb_buffer = GfxBuffer::new_aabb_buffer(ctx, AabbGeometryRecord::AABB_STRIDE, "sphere-aabbs")?;
        aabb_buffer.transfer_data_sync(ctx, &[sphere.aabb()])?;

        // 2x2 的棋盘格
        #[rustfmt::skip]
        let checker: [u8; 16] = [
            255, 255, 255, 255,   40, 40, 40, 255,
            40, 40, 40, 255,      255, 255, 255, 255,
        ];
        let texture = GfxImage2D::from_rgba8(ctx, 2, 2, &checker, "checker")?;
        let texture_view = GfxImageView::new_2d(ctx, &texture, "checker-view")?;
        let sampler = GfxSampler::new(
            ctx,
            &GfxSamplerDesc {
                mag_filter: vk::Filter::NEAREST,
                min_filter: vk::Filter::NEAREST,
                ..Default::default()
            },
            "checker-sampler",
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            aabb_buffer,
            texture,
            texture_view,
            sampler,
            sphere,
        })
    }

    fn destroy(self, ctx: &GpuContext) {
        self.sampler.destroy(ctx);
        self.texture_view.destroy(ctx);
        self.texture.destroy(ctx);
        self.aabb_buffer.destroy(ctx);
        self.index_buffer.destroy(ctx);
        self.vertex_buffer.destroy(ctx);
    }
}

/// accum 与 output 两张 storage image
struct RenderTargets {
    accum: GfxImage2D,
    accum_view: GfxImageView,
    output: GfxImage2D,
    output_view: GfxImageView,
}

impl RenderTargets {
    fn new(ctx: &GpuContext, extent: vk::Extent2D) -> anyhow::Result<Self> {
        let accum = GfxImage2D::new_storage_image(ctx, extent, vk::Format::R32G32B32A32_SFLOAT, "rt-accum")?;
        let accum_view = GfxImageView::new_2d(ctx, &accum, "rt-accum-view")?;
        let output = GfxImage2D::new_storage_image(ctx, extent, vk::Format::R8G8B8A8_UNORM, "rt-output")?;
        let output_view = GfxImageView::new_2d(ctx, &output, "rt-output-view")?;
        Ok(Self {
            accum,
            accum_view,
            output,
            output_view,
        })
    }

    fn rt_targets(&self) -> RtTargets {
        RtTargets {
            accum_image: self.accum.vk_handle(),
            accum_view: self.accum_view.handle(),
            output_image: self.output.vk_handle(),
            output_view: self.output_view.handle(),
        }
    }

    fn destroy(self, ctx: &GpuContext) {
        self.output_view.destroy(ctx);
        self.output.destroy(ctx);
        self.accum_view.destroy(ctx);
        self.accum.destroy(ctx);
    }
}

fn render_one_frame(ctx: &GpuContext, config: &RendererConfig) -> anyhow::Result<()> {
    let extent = vk::Extent2D {
        width: config.render_extent[0],
        height: config.render_extent[1],
    };

    let scene = HeadlessScene::new(ctx).context("upload scene")?;

    let mut accel = SceneAccel::new(config.compact_blas);
    let triangle_blas = accel.add_mesh(
        ctx,
        &GeometryRecord::from_buffers(
            &scene.vertex_buffer,
            HeadlessScene::VERTICES.len() as u32,
            &scene.index_buffer,
            HeadlessScene::INDICES.len() as u32,
        ),
        "triangle-blas",
    )?;
    let sphere_blas = accel.add_aabbs(ctx, &AabbGeometryRecord::from_buffer(&scene.aabb_buffer, 1), "sphere-blas")?;

    let triangle_transform = Mat4::from_rotation_y(20f32.to_radians());
    accel.build_tlas(
        ctx,
        &[
            SceneInstance {
                blas: triangle_blas,
                transform: triangle_transform,
            },
            SceneInstance {
                blas: sphere_blas,
                transform: Mat4::IDENTITY,
            },
        ],
    )?;
    let tlas = accel.tlas().context("scene tlas was not built")?;

    let targets = RenderTargets::new(ctx, extent).context("create render targets")?;
    let mut assembler = RaytracingPipelineAssembler::new(ctx, config, tlas, targets.rt_targets())
        .context("assemble ray tracing pipeline")?;

    let instances = [
        InstanceData::new(triangle_transform, 0, 0),
        InstanceData::new(Mat4::IDENTITY, scene.sphere.material_index, 0),
    ];
    let mut textures = BindlessArena::new(ModelSetBinding::textures(config.max_textures).binding, config.max_textures);
    let (_, checker_index) = textures.insert(
        vk::DescriptorImageInfo::default()
            .sampler(scene.sampler.handle())
            .image_view(scene.texture_view.handle())
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
    )?;
    let texture_infos = textures.dense();

    let materials = [
        MaterialData::lambertian(Vec3::ONE).with_texture(checker_index),
        MaterialData::metal(Vec3::new(0.9, 0.7, 0.3), 0.2),
    ];
    let lights = [LightData::point(Vec3::new(0.0, 3.0, 3.0), Vec3::ONE, 10.0)];
    assembler.update_model_data(
        ctx,
        &ModelData {
            instances: &instances,
            materials: &materials,
            lights: &lights,
            spheres: std::slice::from_ref(&scene.sphere),
            textures: &texture_infos,
            vertex_buffers: &[scene.vertex_buffer.descriptor_info()],
            index_buffers: &[scene.index_buffer.descriptor_info()],
        },
    )?;

    let aspect = extent.width as f32 / extent.height as f32;
    assembler.update_camera_data(&CameraData::new(
        Mat4::look_at_rh(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0),
    ))?;

    let frame_counter = FrameCounter::new(0, config.frames_in_flight);
    let frame = frame_counter.frame_label();
    let push_constants = assembler.push_constants(0, false);
    ctx.one_time_exec(&format!("trace {}", frame_counter.frame_name()), |cmd| {
        assembler.record_trace(cmd, frame, &push_constants, extent)
    })?;
    ctx.wait_idle()?;
    log::info!("traced {}x{} frame {}", extent.width, extent.height, frame_counter.frame_name());

    assembler.destroy(ctx);
    targets.destroy(ctx);
    accel.destroy(ctx);
    scene.destroy(ctx);
    Ok(())
}

fn main() {
    init_log();

    let config = exit_on_error("load config", RendererConfig::load_or_default(RaycePath::default_config_path()));
    let ctx = exit_on_error(
        "create gpu context",
        GpuContext::new(&GpuContextCreateInfo {
            app_name: config.app_name.clone(),
            enable_validation: config.enable_validation,
        }),
    );

    exit_on_error("render headless frame", render_one_frame(&ctx, &config));
    log::info!("headless run finished");
}
