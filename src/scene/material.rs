use serde::{Deserialize, Serialize};

/// How light scatters off a primitive. The discriminants are what the hit shader switches on.
#[repr(u32)]
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum MaterialType {
    Diffuse = 0,
    Metal = 1,
    Refractive = 2,
}

#[repr(u32)]
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum TextureType {
    Solid = 0,
    /// Alternates between both colors of the primitive
    Checkered = 1,
}

impl From<MaterialType> for u32 {
    fn from(material: MaterialType) -> Self {
        material as u32
    }
}

impl From<TextureType> for u32 {
    fn from(texture: TextureType) -> Self {
        texture as u32
    }
}
