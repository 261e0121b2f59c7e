mod material;
mod primitive;
pub mod random;

pub use material::*;
pub use primitive::*;

use crate::error::{RendererError, Result};

/// Ground sphere, three large spheres and a 22x22 grid of small ones.
pub const SCENE_CAPACITY: usize = 4 + 22 * 22;

/// Ordered list of primitives. The renderer uploads it once and never changes it.
#[derive(Debug, Clone)]
pub struct Scene {
    primitives: Vec<Primitive>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            primitives: Vec::with_capacity(SCENE_CAPACITY),
        }
    }

    pub fn push(&mut self, primitive: Primitive) -> Result<()> {
        if self.primitives.len() >= SCENE_CAPACITY {
            return Err(RendererError::SceneFull {
                capacity: SCENE_CAPACITY,
            });
        }
        self.primitives.push(primitive);
        Ok(())
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn capacity(&self) -> usize {
        SCENE_CAPACITY
    }

    pub fn validate(&self) -> Result<()> {
        self.primitives.iter().try_for_each(Primitive::validate)
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Vec<Primitive>> for Scene {
    type Error = RendererError;

    fn try_from(primitives: Vec<Primitive>) -> Result<Self> {
        let mut scene = Scene::new();
        for primitive in primitives {
            scene.push(primitive)?;
        }
        Ok(scene)
    }
}

#[cfg(test)]
mod tests {
    use ultraviolet::Vec3;

    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let scene = Scene::try_from(vec![
            Primitive::sphere(Vec3::new(1.0, 0.0, 0.0), 1.0),
            Primitive::sphere(Vec3::new(2.0, 0.0, 0.0), 1.0),
        ])
        .unwrap();

        assert_eq!(scene.len(), 2);
        assert_eq!(scene.primitives()[0].center().x, 1.0);
        assert_eq!(scene.primitives()[1].center().x, 2.0);
    }

    #[test]
    fn refuses_primitives_beyond_capacity() {
        let mut scene = Scene::new();
        for _ in 0..SCENE_CAPACITY {
            scene.push(Primitive::sphere(Vec3::zero(), 1.0)).unwrap();
        }

        let result = scene.push(Primitive::sphere(Vec3::zero(), 1.0));
        assert!(matches!(
            result,
            Err(RendererError::SceneFull {
                capacity: SCENE_CAPACITY
            })
        ));
        assert_eq!(scene.len(), SCENE_CAPACITY);
    }
}
