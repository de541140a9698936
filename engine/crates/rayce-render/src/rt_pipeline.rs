use ash::vk;
use itertools::Itertools;
use rayce_gfx::{
    GpuContext, GpuError, GpuResult,
    commands::{
        barrier::GfxImageBarrier,
        command_buffer::{GfxCommandBuffer, LabelColor},
    },
    descriptors::{
        bindless::contiguous_runs,
        pool::GfxDescriptorPool,
        registry::{DescriptorLayoutHandle, DescriptorLayoutRegistry, GfxDescriptorSet},
        write::{GfxDescriptorCursor, GfxWriteDescriptorSet},
    },
    pipelines::{
        rt_pipeline::{GfxRtPipeline, GfxRtPipelineCreateInfo},
        sbt::{RtPipelineProps, SbtLayout, ShaderBindingTable},
    },
    raytracing::acceleration::AccelerationStructure,
    resources::structured_buffer::GfxStructuredBuffer,
};

use crate::{
    config::RendererConfig,
    frame_slots::{FrameLabel, FrameResources},
    rt_bindings::{
        CameraSetBinding, GeometrySetBinding, ModelSetBinding, RtCoreSetBinding, SET_COUNT, rt_push_constant_range,
        rt_set_layout_infos,
    },
    rt_shaders::{RtShaderGroup, rt_stage_infos},
    scene_data::{CameraData, InstanceData, LightData, MaterialData, RtPushConstants, SphereData},
};

/// 光追输出的两张 storage image，调用方保证它们处于 GENERAL 布局
#[derive(Debug, Clone, Copy)]
pub struct RtTargets {
    pub accum_image: vk::Image,
    pub accum_view: vk::ImageView,
    pub output_image: vk::Image,
    pub output_view: vk::ImageView,
}

/// 场景内容，`update_model_data` 会整体覆盖上一次的内容
#[derive(Default)]
pub struct ModelData<'a> {
    pub instances: &'a [InstanceData],
    pub materials: &'a [MaterialData],
    pub lights: &'a [LightData],
    pub spheres: &'a [SphereData],
    /// 下标即材质中的 `texture_index`，`None` 是已经释放的空洞
    pub textures: &'a [Option<vk::DescriptorImageInfo>],
    /// 按 `InstanceData::geometry_index` 排列
    pub vertex_buffers: &'a [vk::DescriptorBufferInfo],
    pub index_buffers: &'a [vk::DescriptorBufferInfo],
}

/// 模型数据各部分的容量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapacity {
    pub instances: usize,
    pub materials: usize,
    pub lights: usize,
    pub spheres: usize,
    pub textures: u32,
    pub geometries: u32,
}

impl ModelCapacity {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            instances: config.max_instances as usize,
            materials: config.max_materials as usize,
            lights: config.max_lights as usize,
            spheres: config.max_spheres as usize,
            textures: config.max_textures,
            geometries: config.max_geometries,
        }
    }

    /// 写入任何一帧之前整体检查，保证所有帧要么全部更新，要么都不更新
    pub fn check(&self, data: &ModelData) -> GpuResult<()> {
        let overflow = |name: &str, len: usize, elem_size: usize, capacity: usize| GpuError::BufferOverflow {
            name: format!("rt-{name}"),
            requested: (len * elem_size) as vk::DeviceSize,
            capacity: (capacity * elem_size) as vk::DeviceSize,
        };
        if data.instances.len() > self.instances {
            return Err(overflow("instances", data.instances.len(), size_of::<InstanceData>(), self.instances));
        }
        if data.materials.len() > self.materials {
            return Err(overflow("materials", data.materials.len(), size_of::<MaterialData>(), self.materials));
        }
        if data.lights.len() > self.lights {
            return Err(overflow("lights", data.lights.len(), size_of::<LightData>(), self.lights));
        }
        if data.spheres.len() > self.spheres {
            return Err(overflow("spheres", data.spheres.len(), size_of::<SphereData>(), self.spheres));
        }

        let descriptor_checks = [
            (ModelSetBinding::textures(self.textures).binding, data.textures.len(), self.textures),
            (GeometrySetBinding::vertex_buffers(self.geometries).binding, data.vertex_buffers.len(), self.geometries),
            (GeometrySetBinding::index_buffers().binding, data.index_buffers.len(), self.geometries),
        ];
        for (binding, requested, capacity) in descriptor_checks {
            if requested > capacity as usize {
                return Err(GpuError::DescriptorCapacityExceeded {
                    binding,
                    requested: requested as u32,
                    capacity,
                });
            }
        }
        Ok(())
    }
}

/// `update_model_data` 对一帧的 descriptor 写入
pub struct ModelDescriptorWrites {
    /// set 3：bindless 贴图
    pub model: Vec<GfxWriteDescriptorSet>,
    /// set 0：顶点与索引 buffer
    pub geometry: Vec<GfxWriteDescriptorSet>,
}

impl ModelDescriptorWrites {
    /// 贴图数组按连续段写入，空洞保持未绑定（partially bound）
    pub fn new(
        model_set: vk::DescriptorSet,
        geometry_set: vk::DescriptorSet,
        capacity: &ModelCapacity,
        data: &ModelData,
    ) -> Self {
        let textures = ModelSetBinding::textures(capacity.textures);
        let model = contiguous_runs(data.textures)
            .into_iter()
            .map(|(start, infos)| textures.write_image(model_set, start, infos))
            .collect_vec();

        let mut geometry = Vec::with_capacity(2);
        if !data.vertex_buffers.is_empty() {
            geometry.push(GeometrySetBinding::vertex_buffers(capacity.geometries).write_buffer(
                geometry_set,
                0,
                data.vertex_buffers.to_vec(),
            ));
        }
        if !data.index_buffers.is_empty() {
            geometry.push(GeometrySetBinding::index_buffers().write_buffer(geometry_set, 0, data.index_buffers.to_vec()));
        }
        Self { model, geometry }
    }
}

/// 某一帧 buffer 中当前有效的内容，用于调试与校验
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSlotContents {
    pub camera: CameraData,
    pub instances: Vec<InstanceData>,
    pub materials: Vec<MaterialData>,
    pub lights: Vec<LightData>,
    pub spheres: Vec<SphereData>,
}

/// 每个 frame in flight 独占的资源
struct FrameSlot {
    camera: GfxStructuredBuffer<CameraData>,
    instances: GfxStructuredBuffer<InstanceData>,
    materials: GfxStructuredBuffer<MaterialData>,
    lights: GfxStructuredBuffer<LightData>,
    spheres: GfxStructuredBuffer<SphereData>,

    /// 按 set 序号排列
    sets: [GfxDescriptorSet; SET_COUNT],
}

impl FrameSlot {
    fn new(
        ctx: &GpuContext,
        config: &RendererConfig,
        registry: &DescriptorLayoutRegistry,
        pool: &GfxDescriptorPool,
        set_layouts: &[DescriptorLayoutHandle; SET_COUNT],
        label: FrameLabel,
    ) -> GpuResult<Self> {
        let mut sets = Vec::with_capacity(SET_COUNT);
        for (set_idx, layout) in set_layouts.iter().enumerate() {
            let variable_count = registry
                .get(*layout)
                .map(|l| l.desc().variable_count_capacity())
                .unwrap_or_default();
            let mut allocated =
                registry.allocate_sets(ctx, pool, *layout, 1, variable_count, format!("rt-set{set_idx}-{label}"))?;
            sets.push(allocated.remove(0));
        }
        let sets: [GfxDescriptorSet; SET_COUNT] = sets
            .try_into()
            .unwrap_or_else(|_| unreachable!("one descriptor set is allocated per layout"));

        // buffer 依次创建，中途失败时回收已经创建的
        let camera = GfxStructuredBuffer::new_ubo(ctx, 1, format!("rt-camera-{label}"))?;
        let instances = match GfxStructuredBuffer::new_ssbo(
            ctx,
            config.max_instances as usize,
            format!("rt-instances-{label}"),
        ) {
            Ok(b) => b,
            Err(e) => {
                camera.destroy(ctx);
                return Err(e);
            }
        };
        let materials = match GfxStructuredBuffer::new_ssbo(
            ctx,
            config.max_materials as usize,
            format!("rt-materials-{label}"),
        ) {
            Ok(b) => b,
            Err(e) => {
                camera.destroy(ctx);
                instances.destroy(ctx);
                return Err(e);
            }
        };
        let lights =
            match GfxStructuredBuffer::new_ssbo(ctx, config.max_lights as usize, format!("rt-lights-{label}")) {
                Ok(b) => b,
                Err(e) => {
                    camera.destroy(ctx);
                    instances.destroy(ctx);
                    materials.destroy(ctx);
                    return Err(e);
                }
            };
        let spheres =
            match GfxStructuredBuffer::new_ssbo(ctx, config.max_spheres as usize, format!("rt-spheres-{label}")) {
                Ok(b) => b,
                Err(e) => {
                    camera.destroy(ctx);
                    instances.destroy(ctx);
                    materials.destroy(ctx);
                    lights.destroy(ctx);
                    return Err(e);
                }
            };

        Ok(Self {
            camera,
            instances,
            materials,
            lights,
            spheres,
            sets,
        })
    }

    #[inline]
    fn set(&self, set: u32) -> &GfxDescriptorSet {
        &self.sets[set as usize]
    }

    /// 创建之后就固定不变的 buffer 绑定
    fn write_static_descriptors(&self, registry: &DescriptorLayoutRegistry, ctx: &GpuContext) -> GpuResult<()> {
        let camera_set = self.set(CameraSetBinding::SET);
        registry.update_set(
            ctx,
            camera_set,
            &[CameraSetBinding::camera().write_buffer(camera_set.handle(), 0, vec![self.camera.descriptor_info()])],
        )?;

        let model_set = self.set(ModelSetBinding::SET);
        registry.update_set(
            ctx,
            model_set,
            &[
                ModelSetBinding::instances().write_buffer(model_set.handle(), 0, vec![self.instances.descriptor_info()]),
                ModelSetBinding::materials().write_buffer(model_set.handle(), 0, vec![self.materials.descriptor_info()]),
                ModelSetBinding::lights().write_buffer(model_set.handle(), 0, vec![self.lights.descriptor_info()]),
                ModelSetBinding::spheres().write_buffer(model_set.handle(), 0, vec![self.spheres.descriptor_info()]),
            ],
        )
    }

    fn tlas_write(&self, tlas: &AccelerationStructure) -> GfxWriteDescriptorSet {
        RtCoreSetBinding::tlas().write_tlas(self.set(RtCoreSetBinding::SET).handle(), 0, vec![tlas.handle()])
    }

    fn target_writes(&self, targets: &RtTargets) -> [GfxWriteDescriptorSet; 2] {
        let core_set = self.set(RtCoreSetBinding::SET).handle();
        let storage_image = |view| {
            vec![vk::DescriptorImageInfo::default().image_view(view).image_layout(vk::ImageLayout::GENERAL)]
        };
        [
            RtCoreSetBinding::accum_image().write_image(core_set, 0, storage_image(targets.accum_view)),
            RtCoreSetBinding::output_image().write_image(core_set, 0, storage_image(targets.output_view)),
        ]
    }

    fn destroy(self, ctx: &GpuContext) {
        self.camera.destroy(ctx);
        self.instances.destroy(ctx);
        self.materials.destroy(ctx);
        self.lights.destroy(ctx);
        self.spheres.destroy(ctx);
    }
}

/// 光追管线以及它使用的所有资源
///
/// 创建顺序：
/// 1. 4 个 descriptor set layout
/// 2. pipeline layout（4 个 set + 1 个 push constant range）
/// 3. shader stage 与 shader group
/// 4. ray tracing pipeline
/// 5. shader binding table
/// 6. 每个 frame in flight 一份的 buffer 与 descriptor set
pub struct RaytracingPipelineAssembler {
    registry: DescriptorLayoutRegistry,
    set_layouts: [DescriptorLayoutHandle; SET_COUNT],
    descriptor_pool: Option<GfxDescriptorPool>,
    pipeline: Option<GfxRtPipeline>,
    sbt: Option<ShaderBindingTable>,
    frames: Option<FrameResources<FrameSlot>>,

    targets: RtTargets,
    capacity: ModelCapacity,
    max_depth: u32,
    instance_count: usize,
    material_count: usize,
    light_count: u32,
    sphere_count: u32,
}

impl RaytracingPipelineAssembler {
    pub fn new(
        ctx: &GpuContext,
        config: &RendererConfig,
        tlas: &AccelerationStructure,
        targets: RtTargets,
    ) -> GpuResult<Self> {
        let mut registry = DescriptorLayoutRegistry::new();
        let mut set_layouts = [DescriptorLayoutHandle::default(); SET_COUNT];
        for (idx, info) in rt_set_layout_infos(config).into_iter().enumerate() {
            match registry.create_layout(ctx, info.bindings, info.variable_count_capacity, info.name) {
                Ok(handle) => set_layouts[idx] = handle,
                Err(e) => {
                    registry.destroy(ctx);
                    return Err(e.into_pipeline("descriptor set layouts"));
                }
            }
        }

        // 之后的步骤失败时，由 destroy 回收已经创建好的部分
        let mut assembler = Self {
            registry,
            set_layouts,
            descriptor_pool: None,
            pipeline: None,
            sbt: None,
            frames: None,
            targets,
            capacity: ModelCapacity::from_config(config),
            max_depth: config.max_ray_recursion_depth,
            instance_count: 0,
            material_count: 0,
            light_count: 0,
            sphere_count: 0,
        };
        match assembler.assemble(ctx, config, tlas) {
            Ok(()) => Ok(assembler),
            Err(e) => {
                assembler.destroy(ctx);
                Err(e)
            }
        }
    }

    fn assemble(&mut self, ctx: &GpuContext, config: &RendererConfig, tlas: &AccelerationStructure) -> GpuResult<()> {
        let vk_set_layouts = self.registry.vk_layouts(&self.set_layouts)?;
        let push_constant_range = rt_push_constant_range();
        let stages = rt_stage_infos(config);
        let groups = RtShaderGroup::infos();

        let pipeline = GfxRtPipeline::new(
            ctx,
            &GfxRtPipelineCreateInfo {
                stages: &stages,
                groups: &groups,
                set_layouts: &vk_set_layouts,
                push_constant_ranges: std::slice::from_ref(&push_constant_range),
                max_recursion_depth: config.max_ray_recursion_depth,
            },
            "rt-pipeline",
        )?;
        let pipeline = self.pipeline.insert(pipeline);

        let sbt_layout = SbtLayout::new(
            RtPipelineProps::from_vk(ctx.rt_pipeline_props()),
            RtShaderGroup::RAYGEN_REGION,
            RtShaderGroup::HIT_REGION,
            RtShaderGroup::MISS_REGION,
        )?;
        self.sbt = Some(ShaderBindingTable::new(ctx, pipeline, sbt_layout, "rt-sbt")?);

        let fif = config.frames_in_flight;
        let descs = self
            .set_layouts
            .iter()
            .filter_map(|h| self.registry.get(*h))
            .map(|layout| &**layout.desc())
            .collect_vec();
        let pool_sizes = GfxDescriptorPool::pool_sizes_for(&descs, fif as u32);
        let pool = self.descriptor_pool.insert(GfxDescriptorPool::new(
            ctx,
            vk::DescriptorPoolCreateFlags::empty(),
            (SET_COUNT * fif) as u32,
            &pool_sizes,
            "rt-descriptor-pool",
        )?);

        let frames = FrameResources::try_new(
            fif,
            |label| FrameSlot::new(ctx, config, &self.registry, pool, &self.set_layouts, label),
            |slot| slot.destroy(ctx),
        )?;
        let frames = self.frames.insert(frames);

        for (_, slot) in frames.iter() {
            slot.write_static_descriptors(&self.registry, ctx)?;
            let mut core_writes = vec![slot.tlas_write(tlas)];
            core_writes.extend(slot.target_writes(&self.targets));
            self.registry.update_set(ctx, slot.set(RtCoreSetBinding::SET), &core_writes)?;
        }

        log::info!("ray tracing pipeline assembled: {} frames in flight, {} shader groups", fif, RtShaderGroup::COUNT);
        Ok(())
    }

    fn frames(&self) -> &FrameResources<FrameSlot> {
        self.frames.as_ref().unwrap_or_else(|| unreachable!("frame slots are created during assembly"))
    }

    fn frames_mut(&mut self) -> &mut FrameResources<FrameSlot> {
        self.frames.as_mut().unwrap_or_else(|| unreachable!("frame slots are created during assembly"))
    }

    fn pipeline(&self) -> &GfxRtPipeline {
        self.pipeline.as_ref().unwrap_or_else(|| unreachable!("pipeline is created during assembly"))
    }

    fn sbt(&self) -> &ShaderBindingTable {
        self.sbt.as_ref().unwrap_or_else(|| unreachable!("sbt is created during assembly"))
    }
}

// update
impl RaytracingPipelineAssembler {
    /// TLAS 重建之后，重写所有帧的 set 1 binding 0
    ///
    /// 调用方需要保证所有帧都已经执行完毕
    pub fn update_tlas(&self, ctx: &GpuContext, tlas: &AccelerationStructure) -> GpuResult<()> {
        for (_, slot) in self.frames().iter() {
            self.registry.update_set(ctx, slot.set(RtCoreSetBinding::SET), &[slot.tlas_write(tlas)])?;
        }
        Ok(())
    }

    /// 输出图像重建（例如分辨率改变）之后重写 set 1 binding 1, 2
    pub fn update_targets(&mut self, ctx: &GpuContext, targets: RtTargets) -> GpuResult<()> {
        self.targets = targets;
        for (_, slot) in self.frames().iter() {
            self.registry.update_set(ctx, slot.set(RtCoreSetBinding::SET), &slot.target_writes(&targets))?;
        }
        Ok(())
    }

    /// 覆盖所有帧的模型数据，并重写贴图与几何 buffer 的 descriptor
    ///
    /// 只在场景内容改变时调用，调用方需要保证所有帧都已经执行完毕
    pub fn update_model_data(&mut self, ctx: &GpuContext, data: &ModelData) -> GpuResult<()> {
        self.capacity.check(data)?;

        let registry = &self.registry;
        let frames = self.frames.as_mut().unwrap_or_else(|| unreachable!("frame slots are created during assembly"));
        for (_, slot) in frames.iter_mut() {
            slot.instances.write_slice(data.instances)?;
            slot.materials.write_slice(data.materials)?;
            slot.lights.write_slice(data.lights)?;
            slot.spheres.write_slice(data.spheres)?;

            let writes = ModelDescriptorWrites::new(
                slot.set(ModelSetBinding::SET).handle(),
                slot.set(GeometrySetBinding::SET).handle(),
                &self.capacity,
                data,
            );
            registry.update_set(ctx, slot.set(ModelSetBinding::SET), &writes.model)?;
            registry.update_set(ctx, slot.set(GeometrySetBinding::SET), &writes.geometry)?;
        }

        self.instance_count = data.instances.len();
        self.material_count = data.materials.len();
        self.light_count = data.lights.len() as u32;
        self.sphere_count = data.spheres.len() as u32;
        log::debug!(
            "model data updated: {} instances, {} materials, {} lights, {} spheres, {} textures",
            data.instances.len(),
            data.materials.len(),
            data.lights.len(),
            data.spheres.len(),
            data.textures.len()
        );
        Ok(())
    }

    /// 每帧调用，覆盖所有帧的 camera uniform
    pub fn update_camera_data(&mut self, camera: &CameraData) -> GpuResult<()> {
        for (_, slot) in self.frames_mut().iter_mut() {
            slot.camera.write_slice(std::slice::from_ref(camera))?;
        }
        Ok(())
    }
}

// getters
impl RaytracingPipelineAssembler {
    /// 按 set 序号排列，trace 之前绑定
    pub fn get_descriptor_sets(&self, frame: FrameLabel) -> [vk::DescriptorSet; SET_COUNT] {
        self.frames().slot(frame).sets.map(|set| set.handle())
    }

    #[inline]
    pub fn pipeline_handle(&self) -> vk::Pipeline {
        self.pipeline().handle()
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline().layout()
    }

    #[inline]
    pub fn sbt_layout(&self) -> &SbtLayout {
        self.sbt().layout()
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames().len()
    }

    /// 读回某一帧 buffer 中最近一次写入的内容
    pub fn frame_contents(&mut self, frame: FrameLabel) -> FrameSlotContents {
        let counts = (self.instance_count, self.material_count, self.light_count as usize, self.sphere_count as usize);
        let slot = self.frames_mut().slot_mut(frame);
        FrameSlotContents {
            camera: slot.camera.to_vec()[0],
            instances: slot.instances.to_vec()[..counts.0].to_vec(),
            materials: slot.materials.to_vec()[..counts.1].to_vec(),
            lights: slot.lights.to_vec()[..counts.2].to_vec(),
            spheres: slot.spheres.to_vec()[..counts.3].to_vec(),
        }
    }

    /// 使用最近一次 `update_model_data` 的数量填充 push constants
    pub fn push_constants(&self, frame_index: i32, accumulate: bool) -> RtPushConstants {
        RtPushConstants {
            frame_index,
            accumulate: accumulate as i32,
            light_count: self.light_count as i32,
            sphere_count: self.sphere_count as i32,
            max_depth: self.max_depth,
        }
    }
}

// record
impl RaytracingPipelineAssembler {
    /// 录制一次 trace rays，结果写入 output image
    pub fn record_trace(
        &self,
        cmd: &GfxCommandBuffer,
        frame: FrameLabel,
        push_constants: &RtPushConstants,
        extent: vk::Extent2D,
    ) {
        let pipeline = self.pipeline();
        let sbt = self.sbt();

        cmd.begin_label(&format!("ray trace [{frame}]"), LabelColor::COLOR_TRACE);

        // 上一次 trace 对两张图像的写入需要在本次读写之前完成
        let image_barrier = |image| {
            GfxImageBarrier::new()
                .image(image)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                .src_mask(
                    vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR | vk::PipelineStageFlags2::TRANSFER,
                    vk::AccessFlags2::SHADER_WRITE | vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::TRANSFER_READ,
                )
                .dst_mask(
                    vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
                )
        };
        cmd.image_memory_barrier(
            vk::DependencyFlags::empty(),
            &[image_barrier(self.targets.accum_image), image_barrier(self.targets.output_image)],
        );

        cmd.cmd_bind_pipeline(vk::PipelineBindPoint::RAY_TRACING_KHR, pipeline.handle());
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            pipeline.layout(),
            0,
            &self.get_descriptor_sets(frame),
        );
        cmd.cmd_push_constants(
            pipeline.layout(),
            vk::ShaderStageFlags::RAYGEN_KHR,
            0,
            bytemuck::bytes_of(push_constants),
        );
        cmd.trace_rays(
            sbt.raygen_region(),
            sbt.miss_region(),
            sbt.hit_region(),
            sbt.callable_region(),
            [extent.width, extent.height, 1],
        );

        cmd.end_label();
    }
}

// destroy
impl RaytracingPipelineAssembler {
    pub fn destroy(mut self, ctx: &GpuContext) {
        if let Some(frames) = self.frames.take() {
            frames.into_slots().for_each(|slot| slot.destroy(ctx));
        }
        if let Some(sbt) = self.sbt.take() {
            sbt.destroy(ctx);
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.destroy(ctx);
        }
        // descriptor set 随 pool 一起释放
        if let Some(pool) = self.descriptor_pool.take() {
            pool.destroy(ctx);
        }
        self.registry.destroy(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_capacity() -> ModelCapacity {
        ModelCapacity::from_config(&RendererConfig {
            max_instances: 2,
            max_materials: 2,
            max_lights: 1,
            max_spheres: 1,
            max_textures: 2,
            max_geometries: 1,
            ..Default::default()
        })
    }

    #[test]
    fn test_capacity_accepts_exact_fit() {
        let instances = [InstanceData::new(glam::Mat4::IDENTITY, 0, 0); 2];
        let textures = [Some(vk::DescriptorImageInfo::default()); 2];
        let buffers = [vk::DescriptorBufferInfo::default(); 1];
        let data = ModelData {
            instances: &instances,
            textures: &textures,
            vertex_buffers: &buffers,
            index_buffers: &buffers,
            ..Default::default()
        };
        assert!(small_capacity().check(&data).is_ok());
        assert!(small_capacity().check(&ModelData::default()).is_ok());
    }

    #[test]
    fn test_capacity_rejects_buffer_overflow() {
        let lights = [LightData::point(glam::Vec3::ZERO, glam::Vec3::ONE, 1.0); 2];
        let data = ModelData {
            lights: &lights,
            ..Default::default()
        };
        match small_capacity().check(&data) {
            Err(GpuError::BufferOverflow { name, requested, capacity }) => {
                assert_eq!(name, "rt-lights");
                assert_eq!(requested, 64);
                assert_eq!(capacity, 32);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_capacity_rejects_descriptor_overflow() {
        let textures = [Some(vk::DescriptorImageInfo::default()); 3];
        let data = ModelData {
            textures: &textures,
            ..Default::default()
        };
        match small_capacity().check(&data) {
            Err(GpuError::DescriptorCapacityExceeded {
                binding,
                requested,
                capacity,
            }) => assert_eq!((binding, requested, capacity), (0, 3, 2)),
            other => panic!("unexpected {other:?}"),
        }

        let buffers = [vk::DescriptorBufferInfo::default(); 2];
        let data = ModelData {
            index_buffers: &buffers,
            ..Default::default()
        };
        assert!(matches!(
            small_capacity().check(&data),
            Err(GpuError::DescriptorCapacityExceeded { binding: 1, .. })
        ));
    }

    #[test]
    fn test_texture_writes_follow_bindless_index() {
        use ash::vk::Handle;

        let image = |raw| Some(vk::DescriptorImageInfo::default().image_view(vk::ImageView::from_raw(raw)));
        // 下标 1 被释放，2 号贴图必须写在数组元素 2
        let textures = [image(10), None, image(12), image(13)];
        let buffers = [vk::DescriptorBufferInfo::default(); 1];
        let data = ModelData {
            textures: &textures,
            vertex_buffers: &buffers,
            index_buffers: &buffers,
            ..Default::default()
        };
        let capacity = ModelCapacity::from_config(&RendererConfig::default());
        assert!(capacity.check(&data).is_ok());

        let model_set = vk::DescriptorSet::from_raw(3);
        let geometry_set = vk::DescriptorSet::from_raw(7);
        let writes = ModelDescriptorWrites::new(model_set, geometry_set, &capacity, &data);

        let texture_binding = ModelSetBinding::textures(capacity.textures).binding;
        let runs = writes
            .model
            .iter()
            .map(|w| {
                assert_eq!(w.dst_set, model_set);
                assert_eq!(w.dst_binding, texture_binding);
                let views = w.image_infos.iter().map(|info| info.image_view.as_raw()).collect_vec();
                (w.dst_array_element, views)
            })
            .collect_vec();
        assert_eq!(runs, vec![(0, vec![10]), (2, vec![12, 13])]);

        assert_eq!(writes.geometry.len(), 2);
        assert!(writes.geometry.iter().all(|w| w.dst_set == geometry_set && w.dst_array_element == 0));
        assert_eq!(writes.geometry[1].dst_binding, GeometrySetBinding::index_buffers().binding);
    }

    #[test]
    fn test_empty_model_data_writes_nothing() {
        let capacity = ModelCapacity::from_config(&RendererConfig::default());
        let writes =
            ModelDescriptorWrites::new(vk::DescriptorSet::null(), vk::DescriptorSet::null(), &capacity, &ModelData::default());
        assert!(writes.model.is_empty());
        assert!(writes.geometry.is_empty());
    }
}
