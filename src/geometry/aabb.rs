use crate::geometry::{FloatType, Ray, WorldPoint, WorldVector};

/// Axis-aligned bounding box.
/// Invariant: `min <= max` componentwise for any box that contains at least one point.
/// The `empty` box encodes "contains nothing" as inverted infinite bounds, so that
/// enclosing anything with it yields the other operand unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: WorldPoint,
    pub max: WorldPoint,
}

impl Aabb {
    pub fn new(min: WorldPoint, max: WorldPoint) -> Aabb {
        Aabb { min, max }
    }

    pub fn empty() -> Aabb {
        Aabb {
            min: WorldPoint::new(
                FloatType::INFINITY,
                FloatType::INFINITY,
                FloatType::INFINITY,
            ),
            max: WorldPoint::new(
                FloatType::NEG_INFINITY,
                FloatType::NEG_INFINITY,
                FloatType::NEG_INFINITY,
            ),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = WorldPoint>) -> Option<Aabb> {
        let mut result: Option<Aabb> = None;
        for point in points {
            match &mut result {
                Some(bounds) => bounds.grow(&point),
                None => result = Some(Aabb::new(point, point)),
            }
        }
        result
    }

    /// Componentwise-exact union of two boxes.
    pub fn enclose(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.coords.zip_map(&other.min.coords, FloatType::min).into(),
            max: self.max.coords.zip_map(&other.max.coords, FloatType::max).into(),
        }
    }

    pub fn grow(&mut self, point: &WorldPoint) {
        self.min = self.min.coords.zip_map(&point.coords, FloatType::min).into();
        self.max = self.max.coords.zip_map(&point.coords, FloatType::max).into();
    }

    pub fn center(&self) -> WorldPoint {
        WorldPoint::from((self.min.coords + self.max.coords) / 2.0)
    }

    pub fn size(&self) -> WorldVector {
        self.max - self.min
    }

    pub fn contains(&self, point: &WorldPoint) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    pub fn contains_box(&self, other: &Aabb) -> bool {
        self.contains(&other.min) && self.contains(&other.max)
    }

    /// Calculates ray intersection with the box using the slab method.
    /// Returns minimum and maximum distance along the ray; the ray intersects iff min <= max.
    /// The multiplication is NaN if the ray is starting inside the slab bounding plane
    /// and is parallel to it. In this case we blend to +-infinity, so that the slab range
    /// becomes infinite.
    pub fn intersect(&self, ray: &Ray) -> (FloatType, FloatType) {
        let to_box_min = (self.min - ray.origin)
            .component_mul(&ray.inv_direction)
            .map(|x| if x.is_nan() { FloatType::NEG_INFINITY } else { x });
        let to_box_max = (self.max - ray.origin)
            .component_mul(&ray.inv_direction)
            .map(|x| if x.is_nan() { FloatType::INFINITY } else { x });

        // Correctly ordered (min_t <= max_t)
        let componentwise_min_t = to_box_min.zip_map(&to_box_max, FloatType::min);
        let componentwise_max_t = to_box_min.zip_map(&to_box_max, FloatType::max);

        let min_t = componentwise_min_t
            .x
            .max(componentwise_min_t.y)
            .max(componentwise_min_t.z);
        let max_t = componentwise_max_t
            .x
            .min(componentwise_max_t.y)
            .min(componentwise_max_t.z);

        (min_t, max_t)
    }

    /// Whether the ray intersects the box anywhere within `(0, max_distance]`.
    pub fn hit(&self, ray: &Ray, max_distance: FloatType) -> bool {
        let (min_t, max_t) = self.intersect(ray);
        min_t <= max_t && max_t >= 0.0 && min_t <= max_distance
    }
}

impl Default for Aabb {
    fn default() -> Aabb {
        Aabb::empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::WorldVector;
    use crate::geometry::test::WorldPointWrapper;
    use assert2::assert;
    use test_case::test_case;
    use test_strategy::proptest;

    fn sorted_box(a: WorldPoint, b: WorldPoint) -> Aabb {
        Aabb {
            min: a.coords.zip_map(&b.coords, FloatType::min).into(),
            max: a.coords.zip_map(&b.coords, FloatType::max).into(),
        }
    }

    #[proptest]
    fn enclose_is_exact_componentwise(
        a1: WorldPointWrapper,
        a2: WorldPointWrapper,
        b1: WorldPointWrapper,
        b2: WorldPointWrapper,
    ) {
        let a = sorted_box(*a1, *a2);
        let b = sorted_box(*b1, *b2);
        let enclosed = a.enclose(&b);

        for i in 0..3 {
            assert!(enclosed.min[i] == a.min[i].min(b.min[i]));
            assert!(enclosed.max[i] == a.max[i].max(b.max[i]));
        }
    }

    #[proptest]
    fn enclose_contains_both_operands(
        a1: WorldPointWrapper,
        a2: WorldPointWrapper,
        b1: WorldPointWrapper,
        b2: WorldPointWrapper,
    ) {
        let a = sorted_box(*a1, *a2);
        let b = sorted_box(*b1, *b2);
        let enclosed = a.enclose(&b);

        assert!(enclosed.contains_box(&a));
        assert!(enclosed.contains_box(&b));
    }

    #[test]
    fn enclose_with_empty_is_identity() {
        let b = Aabb::new(
            WorldPoint::new(-1.0, 0.0, 2.0),
            WorldPoint::new(3.0, 4.0, 5.0),
        );
        assert!(Aabb::empty().enclose(&b) == b);
        assert!(b.enclose(&Aabb::empty()) == b);
    }

    #[test]
    fn from_points_of_nothing_is_none() {
        assert!(Aabb::from_points(std::iter::empty::<WorldPoint>()) == None);
    }

    #[test_case( 0.0,  7.0,  7.0,   1.0,  0.0,  0.0,  true ; "axis_hit")]
    #[test_case( 0.0,  7.0,  7.0,  -1.0,  0.0,  0.0,  false ; "pointing_away")]
    #[test_case( 7.0,  7.0,  7.0,   0.0,  1.0,  0.0,  true ; "origin_inside")]
    #[test_case( 0.0,  0.0,  7.0,   1.0,  1.0,  0.0,  false ; "diagonal_miss")]
    #[test_case( 0.0, 11.0,  7.0,   1.0,  0.0,  0.0,  false ; "parallel_outside_slab")]
    #[test_case( 0.0,  5.0,  5.0,   1.0,  0.0,  0.0,  true ; "grazing_edge")]
    fn hit_cases(px: FloatType, py: FloatType, pz: FloatType, dx: FloatType, dy: FloatType, dz: FloatType, expected: bool) {
        let b = Aabb::new(
            WorldPoint::new(5.0, 5.0, 5.0),
            WorldPoint::new(10.0, 10.0, 10.0),
        );
        let ray = Ray::new(
            WorldPoint::new(px, py, pz),
            WorldVector::new(dx, dy, dz),
            0.0,
        );
        assert!(b.hit(&ray, FloatType::INFINITY) == expected);
    }

    #[test]
    fn intersect_reports_entry_and_exit() {
        let b = Aabb::new(
            WorldPoint::new(5.0, 5.0, 5.0),
            WorldPoint::new(10.0, 10.0, 10.0),
        );
        let ray = Ray::new(
            WorldPoint::new(7.0, 7.0, 0.0),
            WorldVector::new(0.0, 0.0, 1.0),
            0.0,
        );
        let (t1, t2) = b.intersect(&ray);
        assert!(t1 == 5.0);
        assert!(t2 == 10.0);
    }

    /// A ray starting on the slab plane and parallel to it used to produce 0 * inf = NaN;
    /// the blend must turn that into an infinite slab range rather than a missed hit.
    #[test]
    fn intersect_on_face_parallel_ray_is_not_nan() {
        let b = Aabb::new(
            WorldPoint::new(5.0, 5.0, 5.0),
            WorldPoint::new(10.0, 10.0, 10.0),
        );
        let ray = Ray::new(
            WorldPoint::new(5.0, 7.0, 0.0),
            WorldVector::new(0.0, 0.0, 1.0),
            0.0,
        );
        let (t1, t2) = b.intersect(&ray);
        assert!(!t1.is_nan());
        assert!(!t2.is_nan());
        assert!(t1 <= t2);
    }
}
