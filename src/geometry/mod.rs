mod aabb;

pub use aabb::Aabb;

pub type FloatType = f32;

pub const EPSILON: FloatType = 1e-6;

/// Distance below which a surface hit is considered to be the ray origin itself.
pub const HIT_EPSILON: FloatType = 1e-4;

pub type ScreenPoint = nalgebra::Point2<u32>;
pub type ScreenSize = nalgebra::Vector2<u32>;

pub type WorldPoint = nalgebra::Point3<FloatType>;
pub type WorldVector = nalgebra::Vector3<FloatType>;
pub type TexturePoint = nalgebra::Point2<FloatType>;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Normalized direction of the ray
    pub direction: WorldVector,

    /// Componentwise inverse of the ray direction.
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero.
    pub inv_direction: WorldVector,

    /// Scene time this ray samples, for motion-blurred entities.
    pub time: FloatType,
}

impl Ray {
    pub fn new(origin: WorldPoint, direction: WorldVector, time: FloatType) -> Ray {
        let direction = direction.normalize();
        let inv_direction = direction.map(|x| if x == 0.0 { FloatType::INFINITY } else { 1.0 / x });

        Ray {
            origin,
            direction,
            inv_direction,
            time,
        }
    }

    pub fn point_at(&self, distance: FloatType) -> WorldPoint {
        self.origin + self.direction * distance
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use proptest::prelude::*;

    /// Helper macro that creates a wrapper around a type that implements Deref and Arbitrary
    macro_rules! arbitrary_wrapper {
        ( $wrapper_name:ident ( $type:ty ) -> $block:block ) => {
            #[derive(Copy, Clone, Debug)]
            pub struct $wrapper_name(pub $type);

            impl std::ops::Deref for $wrapper_name {
                type Target = $type;
                fn deref(&self) -> &$type {
                    &self.0
                }
            }

            impl Arbitrary for $wrapper_name {
                type Parameters = ();
                type Strategy = proptest::strategy::BoxedStrategy<Self>;
                fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
                    $block.prop_map(|x| $wrapper_name(x)).boxed()
                }
            }
        };
    }

    pub fn simple_float() -> BoxedStrategy<FloatType> {
        any::<i32>().prop_map(|n| n as FloatType * 1e-3).boxed()
    }

    pub fn simple_positive_float() -> BoxedStrategy<FloatType> {
        any::<u32>()
            .prop_map(|n| (n as FloatType + 1.0) * 1e-3)
            .boxed()
    }

    arbitrary_wrapper! {
        WorldPointWrapper(WorldPoint) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_map(|coords| {
                    WorldPoint::new(coords.0, coords.1, coords.2)
                })
        }
    }

    arbitrary_wrapper! {
        NonzeroWorldVectorWrapper(WorldVector) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_filter_map(
                    "vector is zero",
                    |coords| {
                        let vector = WorldVector::new(coords.0, coords.1, coords.2);
                        if vector.norm() < 1e-6 {
                            None
                        } else {
                            Some(vector)
                        }
                    })
        }
    }

    arbitrary_wrapper! {
        RayWrapper(Ray) -> {
            (
                proptest::arbitrary::any::<WorldPointWrapper>(),
                proptest::arbitrary::any::<NonzeroWorldVectorWrapper>(),
            )
                .prop_map(|(origin, direction)| Ray::new(*origin, *direction, 0.0))
        }
    }

    mod tests {
        use super::*;
        use assert2::assert;

        #[test]
        fn ray_normalizes_direction() {
            let ray = Ray::new(
                WorldPoint::new(1.0, 2.0, 3.0),
                WorldVector::new(0.0, 3.0, 4.0),
                0.0,
            );
            assert!((ray.direction.norm() - 1.0).abs() < EPSILON);
        }

        #[test]
        fn ray_inverse_direction_zero_becomes_infinity() {
            let ray = Ray::new(WorldPoint::origin(), WorldVector::new(0.0, -0.0, 1.0), 0.0);
            assert!(ray.inv_direction.x == FloatType::INFINITY);
            assert!(ray.inv_direction.y == FloatType::INFINITY);
            assert!(ray.inv_direction.z == 1.0);
        }

        #[test]
        fn point_at_walks_along_direction() {
            let ray = Ray::new(
                WorldPoint::new(1.0, 0.0, 0.0),
                WorldVector::new(0.0, 2.0, 0.0),
                0.0,
            );
            let p = ray.point_at(3.0);
            assert!((p - WorldPoint::new(1.0, 3.0, 0.0)).norm() < EPSILON);
        }
    }
}
