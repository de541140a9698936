//! 需要支持光追的 Vulkan 设备以及 `engine/shader/.build` 下编译好的光追 shader，默认忽略
//!
//! `cargo test -p rayce-render -- --ignored`

use ash::vk;
use glam::{Mat4, Vec3};
use rayce_gfx::{
    GpuContext, GpuContextCreateInfo,
    raytracing::geometry::GeometryRecord,
    resources::{
        buffer::GfxBuffer,
        image::GfxImage2D,
        image_view::GfxImageView,
        vertex::{Index, Vertex},
    },
};
use rayce_render::{
    config::RendererConfig,
    frame_slots::FrameLabel,
    rt_pipeline::{ModelData, RaytracingPipelineAssembler, RtTargets},
    scene_accel::{SceneAccel, SceneInstance},
    scene_data::{CameraData, InstanceData, LightData, MaterialData, SphereData},
};

const NEEDS_DEVICE: &str = "requires a ray tracing capable Vulkan device";

fn context() -> GpuContext {
    rayce_crate_tools::init_log::init_log();
    GpuContext::new(&GpuContextCreateInfo::default()).expect(NEEDS_DEVICE)
}

fn small_config() -> RendererConfig {
    RendererConfig {
        frames_in_flight: 2,
        max_textures: 8,
        max_geometries: 4,
        max_instances: 4,
        max_materials: 4,
        max_lights: 4,
        max_spheres: 4,
        ..Default::default()
    }
}

struct Targets {
    accum: GfxImage2D,
    accum_view: GfxImageView,
    output: GfxImage2D,
    output_view: GfxImageView,
}

impl Targets {
    fn new(ctx: &GpuContext, width: u32, height: u32) -> Self {
        let extent = vk::Extent2D { width, height };
        let accum = GfxImage2D::new_storage_image(ctx, extent, vk::Format::R32G32B32A32_SFLOAT, "test-accum").unwrap();
        let accum_view = GfxImageView::new_2d(ctx, &accum, "test-accum-view").unwrap();
        let output = GfxImage2D::new_storage_image(ctx, extent, vk::Format::R8G8B8A8_UNORM, "test-output").unwrap();
        let output_view = GfxImageView::new_2d(ctx, &output, "test-output-view").unwrap();
        Self {
            accum,
            accum_view,
            output,
            output_view,
        }
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

#[test]
#[ignore = "requires a ray tracing capable Vulkan device and compiled ray tracing shaders"]
fn updates_reach_every_frame_slot() {
    let ctx = context();
    let config = small_config();

    let vertices = [
        Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
        Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
        Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
    ];
    let indices: [Index; 3] = [0, 1, 2];
    let vb = GfxBuffer::new_vertex_buffer(&ctx, size_of_val(&vertices) as vk::DeviceSize, "test-vb").unwrap();
    vb.transfer_data_sync(&ctx, &vertices).unwrap();
    let ib = GfxBuffer::new_index_buffer(&ctx, size_of_val(&indices) as vk::DeviceSize, "test-ib").unwrap();
    ib.transfer_data_sync(&ctx, &indices).unwrap();

    let mut accel = SceneAccel::new(false);
    let blas = accel.add_mesh(&ctx, &GeometryRecord::from_buffers(&vb, 3, &ib, 3), "test-blas").unwrap();
    let one_instance = [SceneInstance {
        blas,
        transform: Mat4::IDENTITY,
    }];
    accel.build_tlas(&ctx, &one_instance).unwrap();

    let targets = Targets::new(&ctx, 16, 16);
    let mut assembler =
        RaytracingPipelineAssembler::new(&ctx, &config, accel.tlas().unwrap(), targets.rt_targets()).unwrap();
    assert_eq!(assembler.frame_count(), 2);

    // 每一帧有自己的 4 个 set，按 set 序号排列
    let labels = [FrameLabel::from_usize(0), FrameLabel::from_usize(1)];
    let sets_a = assembler.get_descriptor_sets(labels[0]);
    let sets_b = assembler.get_descriptor_sets(labels[1]);
    assert_eq!(sets_a.len(), 4);
    assert!(sets_a.iter().all(|set| *set != vk::DescriptorSet::null()));
    assert!(sets_a.iter().zip(sets_b.iter()).all(|(a, b)| a != b));
    assert_eq!(assembler.get_descriptor_sets(labels[0]), sets_a);

    let instances = [InstanceData::new(Mat4::from_translation(Vec3::X), 1, 0)];
    let materials = [MaterialData::lambertian(Vec3::ONE), MaterialData::metal(Vec3::ONE, 0.1)];
    let lights = [LightData::point(Vec3::Y, Vec3::ONE, 2.0), LightData::directional(-Vec3::Y, Vec3::ONE, 1.0)];
    let spheres = [SphereData::new(Vec3::ZERO, 0.5, 0)];
    assembler
        .update_model_data(
            &ctx,
            &ModelData {
                instances: &instances,
                materials: &materials,
                lights: &lights,
                spheres: &spheres,
                textures: &[],
                vertex_buffers: &[vb.descriptor_info()],
                index_buffers: &[ib.descriptor_info()],
            },
        )
        .unwrap();

    let camera = CameraData::new(
        Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(1.0, 1.0, 0.1, 10.0),
    );
    assembler.update_camera_data(&camera).unwrap();

    for label in labels {
        let contents = assembler.frame_contents(label);
        assert_eq!(contents.camera, camera);
        assert_eq!(contents.instances, instances);
        assert_eq!(contents.materials, materials);
        assert_eq!(contents.lights, lights);
        assert_eq!(contents.spheres, spheres);
    }
    let push = assembler.push_constants(3, true);
    assert_eq!((push.frame_index, push.accumulate, push.light_count, push.sphere_count), (3, 1, 2, 1));

    // 超出容量时任何一帧都不会被修改
    let too_many_lights = [LightData::point(Vec3::ZERO, Vec3::ONE, 1.0); 5];
    assert!(
        assembler
            .update_model_data(
                &ctx,
                &ModelData {
                    lights: &too_many_lights,
                    ..Default::default()
                },
            )
            .is_err()
    );
    assert_eq!(assembler.frame_contents(labels[1]).lights, lights);

    // TLAS 重建之后重写 set 1 的加速结构
    let version = accel.tlas_version();
    let two_instances = [
        one_instance[0],
        SceneInstance {
            blas,
            transform: Mat4::from_translation(Vec3::Z),
        },
    ];
    accel.build_tlas(&ctx, &two_instances).unwrap();
    assert_eq!(accel.tlas_version(), version + 1);
    assembler.update_tlas(&ctx, accel.tlas().unwrap()).unwrap();

    // 输出图像重建
    let resized = Targets::new(&ctx, 32, 32);
    assembler.update_targets(&ctx, resized.rt_targets()).unwrap();
    assert_eq!(assembler.get_descriptor_sets(labels[0]), sets_a);

    ctx.wait_idle().unwrap();
    assembler.destroy(&ctx);
    resized.destroy(&ctx);
    targets.destroy(&ctx);
    accel.destroy(&ctx);
    ib.destroy(&ctx);
    vb.destroy(&ctx);
}
