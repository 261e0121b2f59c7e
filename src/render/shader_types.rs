use crevice::std140::AsStd140;
use ultraviolet::Vec4;

use crate::{render_call_info::RenderCallInfo, scene::Primitive};

/// Per-frame uniform, binding 4 of the tracing descriptor set.
#[derive(AsStd140, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FrameUniform {
    pub samples_before: u32,
    pub samples_so_far: u32,
    pub number: u32,
    pub total_samples: u32,
}

impl From<&RenderCallInfo> for FrameUniform {
    fn from(info: &RenderCallInfo) -> Self {
        Self {
            samples_before: info.samples_before(),
            samples_so_far: info.samples_so_far(),
            number: info.number,
            total_samples: info.total_samples,
        }
    }
}

/// One element of the primitive storage buffer, binding 3.
///
/// The GLSL side declares the buffer as std430. With three vec4s followed by four scalars the
/// std140 and std430 layouts agree, so the std140 derive is used for both.
#[derive(AsStd140, Debug, Copy, Clone, PartialEq)]
pub struct GpuPrimitive {
    pub geometry: Vec4,
    pub color_a: Vec4,
    pub color_b: Vec4,
    pub material_type: u32,
    pub texture_type: u32,
    pub material_attribute: f32,
    pub _padding: u32,
}

impl From<&Primitive> for GpuPrimitive {
    fn from(primitive: &Primitive) -> Self {
        Self {
            geometry: primitive.geometry,
            color_a: primitive.colors[0],
            color_b: primitive.colors[1],
            material_type: primitive.material_type.into(),
            texture_type: primitive.texture_type.into(),
            material_attribute: primitive.material_attribute,
            _padding: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use ultraviolet::Vec3;

    use super::*;

    #[test]
    fn layouts_match_the_shaders() {
        assert_eq!(std::mem::size_of::<Std140FrameUniform>(), 16);
        assert_eq!(std::mem::size_of::<Std140GpuPrimitive>(), 64);
    }

    #[test]
    fn frame_uniform_carries_the_sample_range() {
        let uniform = FrameUniform::from(&RenderCallInfo::new(2, 4, 400));
        assert_eq!(uniform.samples_before, 100);
        assert_eq!(uniform.samples_so_far, 200);
        assert_eq!(uniform.number, 2);
        assert_eq!(uniform.total_samples, 400);

        let round_trip = FrameUniform::from_std140(uniform.as_std140());
        assert_eq!(round_trip, uniform);
    }

    #[test]
    fn gpu_primitive_uses_the_material_tags() {
        let primitive = Primitive::sphere(Vec3::new(1.0, 2.0, 3.0), 0.5).metal(Vec3::one(), 0.25);
        let gpu = GpuPrimitive::from(&primitive);
        assert_eq!(gpu.geometry, Vec4::new(1.0, 2.0, 3.0, 0.5));
        assert_eq!(gpu.material_type, 1);
        assert_eq!(gpu.texture_type, 0);
        assert_eq!(gpu.material_attribute, 0.25);
    }
}
