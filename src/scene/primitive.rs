use ultraviolet::{Vec3, Vec4};

use crate::error::{RendererError, Result};

use super::{MaterialType, TextureType};

/// A sphere with its surface description.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Primitive {
    /// Center in xyz, radius in w
    pub geometry: Vec4,
    pub material_type: MaterialType,
    pub texture_type: TextureType,
    /// The second color is only read by checkered textures
    pub colors: [Vec4; 2],
    /// Fuzziness for metal, refractive index for refractive materials, unused for diffuse ones
    pub material_attribute: f32,
}

impl Primitive {
    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Self {
            geometry: Vec4::new(center.x, center.y, center.z, radius),
            material_type: MaterialType::Diffuse,
            texture_type: TextureType::Solid,
            colors: [Vec4::one(), Vec4::one()],
            material_attribute: 0.0,
        }
    }

    pub fn diffuse(mut self, color: Vec3) -> Self {
        self.material_type = MaterialType::Diffuse;
        self.colors[0] = color.into_homogeneous_point();
        self.material_attribute = 0.0;
        self
    }

    pub fn metal(mut self, color: Vec3, fuzziness: f32) -> Self {
        self.material_type = MaterialType::Metal;
        self.colors[0] = color.into_homogeneous_point();
        self.material_attribute = fuzziness;
        self
    }

    pub fn refractive(mut self, refractive_index: f32) -> Self {
        self.material_type = MaterialType::Refractive;
        self.colors[0] = Vec4::one();
        self.material_attribute = refractive_index;
        self
    }

    pub fn checkered(mut self, even: Vec3, odd: Vec3) -> Self {
        self.texture_type = TextureType::Checkered;
        self.colors = [even.into_homogeneous_point(), odd.into_homogeneous_point()];
        self
    }

    pub fn center(&self) -> Vec3 {
        self.geometry.xyz()
    }

    pub fn radius(&self) -> f32 {
        self.geometry.w
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.radius() > 0.0) {
            return Err(RendererError::InvalidPrimitive("radius must be positive"));
        }

        let color_count = match self.texture_type {
            TextureType::Solid => 1,
            TextureType::Checkered => 2,
        };
        let colors_in_range = self.colors[..color_count].iter().all(|color| {
            [color.x, color.y, color.z, color.w]
                .iter()
                .all(|c| (0.0..=1.0).contains(c))
        });
        if !colors_in_range {
            return Err(RendererError::InvalidPrimitive(
                "color components must lie in [0, 1]",
            ));
        }

        if self.material_type == MaterialType::Refractive && !(self.material_attribute > 1.0) {
            return Err(RendererError::InvalidPrimitive(
                "refractive index must be greater than 1",
            ));
        }

        Ok(())
    }
}
