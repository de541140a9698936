use std::mem::offset_of;

use ash::vk;

/// 交错排列的顶点：position / normal / uv
///
/// 加速结构只使用 position 和 stride，shader 侧通过 bindless storage buffer 读取完整顶点
#[repr(C)]
#[derive(Clone, Debug, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const STRIDE: vk::DeviceSize = size_of::<Vertex>() as vk::DeviceSize;
    pub const POSITION_FORMAT: vk::Format = vk::Format::R32G32B32_SFLOAT;
    pub const POSITION_OFFSET: vk::DeviceSize = offset_of!(Vertex, position) as vk::DeviceSize;

    #[inline]
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, normal, uv }
    }
}

/// 三角形索引固定为 u32
pub type Index = u32;
pub const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(Vertex::STRIDE, 32);
        assert_eq!(Vertex::POSITION_OFFSET, 0);
        assert_eq!(offset_of!(Vertex, normal), 12);
        assert_eq!(offset_of!(Vertex, uv), 24);
    }
}
