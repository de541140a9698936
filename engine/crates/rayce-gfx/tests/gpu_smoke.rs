//! 需要支持光追的 Vulkan 设备，默认忽略
//!
//! `cargo test -p rayce-gfx -- --ignored`

use ash::vk;
use glam::Mat4;
use rayce_gfx::{
    GpuContext, GpuContextCreateInfo, GpuError,
    descriptors::{
        layout::DescriptorBindingItem, pool::GfxDescriptorPool, registry::DescriptorLayoutRegistry,
        write::GfxDescriptorCursor,
    },
    raytracing::{
        acceleration::{AccelerationKind, AccelerationStructure, BlasBuildOptions},
        geometry::{GeometryRecord, InstanceRecord},
    },
    resources::{
        buffer::GfxBuffer,
        image::GfxImage2D,
        vertex::{Index, Vertex},
    },
};

const NEEDS_DEVICE: &str = "requires a ray tracing capable Vulkan device";

fn context() -> GpuContext {
    rayce_crate_tools::init_log::init_log();
    GpuContext::new(&GpuContextCreateInfo::default()).expect(NEEDS_DEVICE)
}

fn triangle(ctx: &GpuContext) -> (GfxBuffer, GfxBuffer) {
    let vertices = [
        Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
        Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
        Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
    ];
    let indices: [Index; 3] = [0, 1, 2];
    let vb = GfxBuffer::new_vertex_buffer(ctx, size_of_val(&vertices) as vk::DeviceSize, "test-vb").unwrap();
    vb.transfer_data_sync(ctx, &vertices).unwrap();
    let ib = GfxBuffer::new_index_buffer(ctx, size_of_val(&indices) as vk::DeviceSize, "test-ib").unwrap();
    ib.transfer_data_sync(ctx, &indices).unwrap();
    (vb, ib)
}

#[test]
#[ignore = "requires a ray tracing capable Vulkan device"]
fn device_address_only_for_address_capable_buffers() {
    let ctx = context();
    let with_address = GfxBuffer::new_device_buffer(
        &ctx,
        256,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        "with-address",
    )
    .unwrap();
    let without_address =
        GfxBuffer::new_device_buffer(&ctx, 256, vk::BufferUsageFlags::STORAGE_BUFFER, "without-address").unwrap();

    assert_ne!(with_address.device_address(), 0);
    assert_eq!(without_address.device_address(), 0);

    with_address.destroy(&ctx);
    without_address.destroy(&ctx);
}

#[test]
#[ignore = "requires a ray tracing capable Vulkan device"]
fn staging_upload_round_trip() {
    let ctx = context();
    let data: Vec<u32> = (0..1024).map(|i| i * 7 + 3).collect();
    let buffer = GfxBuffer::new_device_buffer(
        &ctx,
        size_of_val(data.as_slice()) as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
        "round-trip",
    )
    .unwrap();

    // 重复上传结果不变
    buffer.transfer_data_sync(&ctx, &data).unwrap();
    buffer.transfer_data_sync(&ctx, &data).unwrap();
    let bytes = buffer.read_back_sync(&ctx, size_of_val(data.as_slice())).unwrap();
    assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&data));

    // 空读取不录制 copy 命令
    assert!(buffer.read_back_sync(&ctx, 0).unwrap().is_empty());
    buffer.transfer_data_sync::<u32>(&ctx, &[]).unwrap();

    buffer.destroy(&ctx);
}

#[test]
#[ignore = "requires a ray tracing capable Vulkan device"]
fn uniform_buffer_map_write_read() {
    let ctx = context();
    let mut ubo = GfxBuffer::new_uniform_buffer(&ctx, 1024, "ubo").unwrap();
    let matrices = [Mat4::from_scale(glam::Vec3::splat(2.0)), Mat4::from_rotation_z(0.5)];
    let bytes: &[u8] = bytemuck::cast_slice(&matrices);
    assert_eq!(bytes.len(), 128);

    ubo.map(&ctx).unwrap();
    ubo.write_bytes(&ctx, 0, bytes).unwrap();
    ubo.unmap(&ctx);

    assert_eq!(ubo.read_bytes(&ctx, 0, 128).unwrap(), bytes);
    assert!(matches!(ubo.write_bytes(&ctx, 1000, bytes), Err(GpuError::BufferOverflow { .. })));

    ubo.destroy(&ctx);
}

#[test]
#[ignore = "requires a ray tracing capable Vulkan device"]
fn blas_from_single_triangle() {
    let ctx = context();
    let (vb, ib) = triangle(&ctx);
    let geometry = GeometryRecord::from_buffers(&vb, 3, &ib, 3);
    assert_eq!(geometry.max_vertex, 2);
    assert_eq!(geometry.primitive_count, 1);

    let sizes = AccelerationStructure::query_build_sizes(
        &ctx,
        AccelerationKind::BottomLevel,
        &geometry.vk_geometry(),
        vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
        geometry.primitive_count,
    );
    assert!(sizes.acceleration_structure_size > 0);
    assert!(sizes.build_scratch_size > 0);

    for compact in [false, true] {
        let blas = AccelerationStructure::build_blas_sync(&ctx, &geometry, BlasBuildOptions { compact }, "blas").unwrap();
        let address = blas.device_address();
        assert_ne!(address, 0);
        assert_eq!(blas.device_address(), address);
        assert_eq!(blas.kind(), AccelerationKind::BottomLevel);
        blas.destroy(&ctx);
    }

    ib.destroy(&ctx);
    vb.destroy(&ctx);
}

#[test]
#[ignore = "requires a ray tracing capable Vulkan device"]
fn tlas_size_grows_with_instances() {
    let ctx = context();
    let instances_geometry = vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: vk::AccelerationStructureGeometryInstancesDataKHR::default().array_of_pointers(false),
        });
    let size_for = |count| {
        AccelerationStructure::query_build_sizes(
            &ctx,
            AccelerationKind::TopLevel,
            &instances_geometry,
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            count,
        )
        .acceleration_structure_size
    };
    let sizes = [1, 16, 256].map(size_for);
    assert!(sizes[0] <= sizes[1] && sizes[1] <= sizes[2]);
    assert!(sizes[0] < sizes[2]);

    let (vb, ib) = triangle(&ctx);
    let blas = AccelerationStructure::build_blas_sync(
        &ctx,
        &GeometryRecord::from_buffers(&vb, 3, &ib, 3),
        BlasBuildOptions::default(),
        "blas",
    )
    .unwrap();
    let records = (0..4)
        .map(|i| InstanceRecord::new(blas.device_address(), Mat4::from_translation(glam::vec3(i as f32, 0.0, 0.0)), i))
        .collect::<Vec<_>>();
    let tlas = AccelerationStructure::build_tlas_sync(&ctx, &records, "tlas").unwrap();
    assert_ne!(tlas.device_address(), 0);
    let empty_tlas = AccelerationStructure::build_tlas_sync(&ctx, &[], "empty-tlas").unwrap();
    assert_eq!(empty_tlas.kind(), AccelerationKind::TopLevel);

    empty_tlas.destroy(&ctx);
    tlas.destroy(&ctx);
    blas.destroy(&ctx);
    ib.destroy(&ctx);
    vb.destroy(&ctx);
}

#[test]
#[ignore = "requires a ray tracing capable Vulkan device"]
fn variable_count_capacity_is_enforced() {
    const K: u32 = 4;
    let ctx = context();
    let mut registry = DescriptorLayoutRegistry::new();
    let layout = registry
        .create_layout(
            &ctx,
            vec![DescriptorBindingItem::new(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::RAYGEN_KHR,
                0,
            )],
            K,
            "bindless-test",
        )
        .unwrap();
    let desc = registry.get(layout).unwrap().desc().clone();
    let pool = GfxDescriptorPool::new(
        &ctx,
        vk::DescriptorPoolCreateFlags::empty(),
        2,
        &GfxDescriptorPool::pool_sizes_for(&[&*desc], 2),
        "bindless-test-pool",
    )
    .unwrap();

    assert!(matches!(
        registry.allocate_sets(&ctx, &pool, layout, 1, K + 1, "too-many"),
        Err(GpuError::DescriptorCapacityExceeded { requested, capacity: K, .. }) if requested == K + 1
    ));
    let set = registry.allocate_sets(&ctx, &pool, layout, 1, K, "bindless-set").unwrap().remove(0);

    let buffer = GfxBuffer::new_device_buffer(&ctx, 64, vk::BufferUsageFlags::STORAGE_BUFFER, "storage").unwrap();
    let binding = desc.bindings()[0];
    let infos = |n: u32| vec![buffer.descriptor_info(); n as usize];

    assert!(matches!(
        registry.update_set(&ctx, &set, &[binding.write_buffer(set.handle(), 0, infos(K + 1))]),
        Err(GpuError::DescriptorCapacityExceeded { .. })
    ));
    registry.update_set(&ctx, &set, &[binding.write_buffer(set.handle(), 0, infos(K))]).unwrap();

    buffer.destroy(&ctx);
    pool.destroy(&ctx);
    registry.destroy(&ctx);
}

#[test]
#[ignore = "requires a ray tracing capable Vulkan device"]
fn unsupported_layout_transition_keeps_layout() {
    let ctx = context();
    let mut image = GfxImage2D::new_storage_image(
        &ctx,
        vk::Extent2D { width: 4, height: 4 },
        vk::Format::R8G8B8A8_UNORM,
        "layout-test",
    )
    .unwrap();
    assert_eq!(image.layout(), vk::ImageLayout::GENERAL);

    let err = image.adapt_layout(&ctx, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap_err();
    assert!(matches!(err, GpuError::UnsupportedLayoutTransition { .. }));
    assert_eq!(image.layout(), vk::ImageLayout::GENERAL);

    image.destroy(&ctx);
}
