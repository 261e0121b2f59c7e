use rand::Rng;
use ultraviolet::Vec3;

use super::{Primitive, Scene};

const GRID_HALF_EXTENT: i32 = 11;
const SMALL_RADIUS: f32 = 0.2;

/// Builds the classic "many spheres" layout: a checkered ground, three large showcase spheres
/// and a grid of small spheres with randomly chosen materials.
pub fn generate_random_scene<R: Rng + ?Sized>(rng: &mut R) -> Scene {
    let mut primitives = vec![
        Primitive::sphere(Vec3::new(0.0, -1000.0, 1.0), 1000.0)
            .diffuse(Vec3::one())
            .checkered(Vec3::broadcast(0.05), Vec3::broadcast(0.95)),
        Primitive::sphere(Vec3::new(-4.0, 1.0, 0.0), 1.0).diffuse(Vec3::new(0.4, 0.2, 0.1)),
        Primitive::sphere(Vec3::new(4.0, 1.0, 0.0), 1.0).metal(Vec3::new(0.7, 0.6, 0.5), 0.0),
        Primitive::sphere(Vec3::new(0.0, 1.0, 0.0), 1.0).refractive(1.5),
    ];

    for a in -GRID_HALF_EXTENT..GRID_HALF_EXTENT {
        for b in -GRID_HALF_EXTENT..GRID_HALF_EXTENT {
            let center = Vec3::new(
                a as f32 + 0.9 * rng.gen::<f32>(),
                SMALL_RADIUS,
                b as f32 + 0.9 * rng.gen::<f32>(),
            );
            let sphere = Primitive::sphere(center, SMALL_RADIUS);

            let material_probability: f32 = rng.gen();
            let primitive = if material_probability < 0.8 {
                sphere.diffuse(random_squared_color(rng))
            } else if material_probability < 0.95 {
                sphere.metal(random_squared_color(rng), rng.gen_range(0.0..0.5))
            } else {
                sphere.refractive(1.5)
            };
            primitives.push(primitive);
        }
    }

    // The grid is sized to the capacity, so this cannot overflow
    let mut scene = Scene::new();
    for primitive in primitives {
        if scene.push(primitive).is_err() {
            break;
        }
    }
    scene
}

fn random_squared_color<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    Vec3::new(
        rng.gen::<f32>() * rng.gen::<f32>(),
        rng.gen::<f32>() * rng.gen::<f32>(),
        rng.gen::<f32>() * rng.gen::<f32>(),
    )
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::scene::{MaterialType, TextureType, SCENE_CAPACITY};

    #[test]
    fn fills_the_scene_to_capacity() {
        let scene = generate_random_scene(&mut StdRng::seed_from_u64(7));
        assert_eq!(scene.len(), SCENE_CAPACITY);
        assert!(scene.validate().is_ok());
    }

    #[test]
    fn starts_with_the_fixed_showcase_spheres() {
        let scene = generate_random_scene(&mut StdRng::seed_from_u64(1));
        let primitives = scene.primitives();

        assert_eq!(primitives[0].texture_type, TextureType::Checkered);
        assert_eq!(primitives[0].radius(), 1000.0);
        assert_eq!(primitives[1].material_type, MaterialType::Diffuse);
        assert_eq!(primitives[2].material_type, MaterialType::Metal);
        assert_eq!(primitives[3].material_type, MaterialType::Refractive);
        assert_eq!(primitives[3].material_attribute, 1.5);
    }

    #[test]
    fn small_spheres_stay_in_their_grid_cell() {
        let scene = generate_random_scene(&mut StdRng::seed_from_u64(3));

        for (index, primitive) in scene.primitives()[4..].iter().enumerate() {
            let a = (index as i32 / 22 - GRID_HALF_EXTENT) as f32;
            let b = (index as i32 % 22 - GRID_HALF_EXTENT) as f32;
            let center = primitive.center();
            assert!(center.x >= a && center.x <= a + 0.9);
            assert!(center.z >= b && center.z <= b + 0.9);
            assert_eq!(primitive.radius(), SMALL_RADIUS);
        }
    }

    #[test]
    fn same_seed_gives_the_same_scene() {
        let first = generate_random_scene(&mut StdRng::seed_from_u64(42));
        let second = generate_random_scene(&mut StdRng::seed_from_u64(42));
        assert_eq!(first.primitives(), second.primitives());
    }
}
