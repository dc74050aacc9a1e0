use arrayvec::ArrayVec;
use nalgebra::Unit;
use rand_distr::{Distribution as _, UnitSphere};
use std::f32::consts::PI;

use crate::geometry::{Aabb, EPSILON, FloatType, Ray, TexturePoint, WorldPoint, WorldVector};

/// Padding applied to zero-thickness bounding boxes so the slab test cannot
/// degenerate to an empty interval.
const BOUNDS_PADDING: FloatType = 1e-4;

/// A single ray/primitive boundary crossing, in the primitive's local space.
/// Primitives with an interior (sphere, box) report both the entry and the exit
/// crossing so that participating media can pair them up.
#[derive(Copy, Clone, Debug)]
pub struct PrimitiveHit {
    pub t: FloatType,
    /// Outward unit normal at the crossing point.
    pub normal: Unit<WorldVector>,
    pub texture_coordinates: Option<TexturePoint>,
}

pub type PrimitiveHits = ArrayVec<PrimitiveHit, 2>;

/// Axis a rect is perpendicular to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// The two in-plane axes, in cyclic order.
    fn plane(self) -> (usize, usize) {
        match self {
            Axis::X => (1, 2),
            Axis::Y => (2, 0),
            Axis::Z => (0, 1),
        }
    }

    fn normal(self) -> Unit<WorldVector> {
        let mut v = WorldVector::zeros();
        v[self.index()] = 1.0;
        Unit::new_unchecked(v)
    }
}

#[derive(Clone, Debug)]
pub struct Sphere {
    pub center: WorldPoint,
    pub radius: FloatType,
}

#[derive(Clone, Debug)]
pub struct Rect {
    pub axis: Axis,
    /// Position of the plane along `axis`.
    pub offset: FloatType,
    /// In-plane lower corner, in the order given by `Axis::plane`.
    pub low: (FloatType, FloatType),
    /// In-plane upper corner.
    pub high: (FloatType, FloatType),
}

#[derive(Clone, Debug)]
pub struct BoxShape {
    pub min: WorldPoint,
    pub max: WorldPoint,
}

#[derive(Clone, Debug)]
pub struct Triangle {
    pub a: WorldPoint,
    pub b: WorldPoint,
    pub c: WorldPoint,
}

#[derive(Clone, Debug)]
pub enum Primitive {
    Sphere(Sphere),
    Rect(Rect),
    Box(BoxShape),
    Triangle(Triangle),
}

impl Primitive {
    /// All boundary crossings with `t` in `(t_min, t_max)`, unordered.
    pub fn intersect(&self, ray: &Ray, t_min: FloatType, t_max: FloatType) -> PrimitiveHits {
        match self {
            Primitive::Sphere(sphere) => sphere.intersect(ray, t_min, t_max),
            Primitive::Rect(rect) => rect.intersect(ray, t_min, t_max),
            Primitive::Box(shape) => shape.intersect(ray, t_min, t_max),
            Primitive::Triangle(triangle) => triangle.intersect(ray, t_min, t_max),
        }
    }

    pub fn bounding_box(&self) -> Aabb {
        let bounds = match self {
            Primitive::Sphere(sphere) => {
                let r = WorldVector::repeat(sphere.radius.abs());
                Aabb::new(sphere.center - r, sphere.center + r)
            }
            Primitive::Rect(rect) => {
                let (u, v) = rect.axis.plane();
                let mut min = WorldPoint::origin();
                let mut max = WorldPoint::origin();
                min[rect.axis.index()] = rect.offset;
                max[rect.axis.index()] = rect.offset;
                min[u] = rect.low.0;
                min[v] = rect.low.1;
                max[u] = rect.high.0;
                max[v] = rect.high.1;
                Aabb::new(min, max)
            }
            Primitive::Box(shape) => Aabb::new(shape.min, shape.max),
            Primitive::Triangle(triangle) => {
                Aabb::from_points([triangle.a, triangle.b, triangle.c])
                    .unwrap_or_else(Aabb::empty)
            }
        };
        pad_thin_axes(bounds)
    }

    pub fn area(&self) -> FloatType {
        match self {
            Primitive::Sphere(sphere) => 4.0 * PI * sphere.radius * sphere.radius,
            Primitive::Rect(rect) => {
                (rect.high.0 - rect.low.0) * (rect.high.1 - rect.low.1)
            }
            Primitive::Box(shape) => {
                let s = shape.max - shape.min;
                2.0 * (s.x * s.y + s.y * s.z + s.z * s.x)
            }
            Primitive::Triangle(triangle) => {
                (triangle.b - triangle.a).cross(&(triangle.c - triangle.a)).norm() / 2.0
            }
        }
    }

    /// Samples a direction from `origin` toward the primitive's surface.
    pub fn sample_toward(&self, origin: &WorldPoint, rng: &mut impl rand::Rng) -> WorldVector {
        match self {
            Primitive::Sphere(sphere) => sphere.sample_toward(origin, rng),
            _ => self.sample_surface_point(rng) - origin,
        }
    }

    /// Solid-angle density of `sample_toward` producing `direction` (normalized) from `origin`.
    /// Returns zero when the direction misses the primitive entirely.
    pub fn direction_pdf(&self, origin: &WorldPoint, direction: &WorldVector) -> FloatType {
        if let Primitive::Sphere(sphere) = self {
            return sphere.direction_pdf(origin, direction);
        }

        let ray = Ray::new(*origin, *direction, 0.0);
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }

        // Uniform-area sampling: every boundary crossing is a candidate sample
        // point, so the densities add up.
        let mut pdf = 0.0;
        for hit in self.intersect(&ray, EPSILON, FloatType::INFINITY) {
            let cosine = hit.normal.dot(&ray.direction).abs();
            if cosine > EPSILON {
                pdf += hit.t * hit.t / (cosine * area);
            }
        }
        pdf
    }

    fn sample_surface_point(&self, rng: &mut impl rand::Rng) -> WorldPoint {
        match self {
            Primitive::Sphere(sphere) => {
                let dir: [FloatType; 3] = UnitSphere.sample(rng);
                sphere.center + WorldVector::from(dir) * sphere.radius
            }
            Primitive::Rect(rect) => {
                let (u, v) = rect.axis.plane();
                let mut point = WorldPoint::origin();
                point[rect.axis.index()] = rect.offset;
                point[u] = rng.random_range(rect.low.0..=rect.high.0);
                point[v] = rng.random_range(rect.low.1..=rect.high.1);
                point
            }
            Primitive::Box(shape) => {
                let size = shape.max - shape.min;
                let face_areas = [
                    size.y * size.z, // x faces
                    size.z * size.x, // y faces
                    size.x * size.y, // z faces
                ];
                let total: FloatType = face_areas.iter().sum::<FloatType>() * 2.0;
                let mut pick = rng.random_range(0.0..total.max(EPSILON));
                for axis in 0..3 {
                    for side in 0..2 {
                        pick -= face_areas[axis];
                        if pick <= 0.0 || (axis, side) == (2, 1) {
                            let mut point = WorldPoint::origin();
                            point[axis] = if side == 0 { shape.min[axis] } else { shape.max[axis] };
                            let u = (axis + 1) % 3;
                            let v = (axis + 2) % 3;
                            point[u] = rng.random_range(shape.min[u]..=shape.max[u]);
                            point[v] = rng.random_range(shape.min[v]..=shape.max[v]);
                            return point;
                        }
                    }
                }
                unreachable!("face selection always terminates on the last face");
            }
            Primitive::Triangle(triangle) => {
                let mut u: FloatType = rng.random_range(0.0..1.0);
                let mut v: FloatType = rng.random_range(0.0..1.0);
                if u + v > 1.0 {
                    u = 1.0 - u;
                    v = 1.0 - v;
                }
                triangle.a + (triangle.b - triangle.a) * u + (triangle.c - triangle.a) * v
            }
        }
    }
}

impl Sphere {
    fn intersect(&self, ray: &Ray, t_min: FloatType, t_max: FloatType) -> PrimitiveHits {
        let mut hits = PrimitiveHits::new();

        let oc = ray.origin - self.center;
        let b = oc.dot(&ray.direction);
        let c = oc.dot(&oc) - self.radius * self.radius;
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            return hits;
        }

        let sqrt_disc = discriminant.sqrt();
        for t in [-b - sqrt_disc, -b + sqrt_disc] {
            if t > t_min && t < t_max {
                let point = ray.point_at(t);
                let normal = Unit::new_normalize(point - self.center);
                hits.push(PrimitiveHit {
                    t,
                    normal,
                    texture_coordinates: Some(sphere_uv(&normal)),
                });
            }
        }
        hits
    }

    fn sample_toward(&self, origin: &WorldPoint, rng: &mut impl rand::Rng) -> WorldVector {
        let to_center = self.center - origin;
        let distance_squared = to_center.norm_squared();
        if distance_squared <= self.radius * self.radius {
            // Origin inside the sphere; every direction reaches the surface.
            let dir: [FloatType; 3] = UnitSphere.sample(rng);
            return WorldVector::from(dir);
        }

        // Uniform sample of the visible cone.
        let cos_theta_max = (1.0 - self.radius * self.radius / distance_squared)
            .max(0.0)
            .sqrt();
        let r1: FloatType = rng.random_range(0.0..1.0);
        let r2: FloatType = rng.random_range(0.0..1.0);
        let z = 1.0 + r2 * (cos_theta_max - 1.0);
        let phi = 2.0 * PI * r1;
        let sin_theta = (1.0 - z * z).max(0.0).sqrt();
        let local = WorldVector::new(phi.cos() * sin_theta, phi.sin() * sin_theta, z);

        let w = Unit::new_normalize(to_center);
        let (u, v) = orthonormal_basis(&w);
        u * local.x + v * local.y + w.into_inner() * local.z
    }

    fn direction_pdf(&self, origin: &WorldPoint, direction: &WorldVector) -> FloatType {
        let to_center = self.center - origin;
        let distance_squared = to_center.norm_squared();
        if distance_squared <= self.radius * self.radius {
            return 1.0 / (4.0 * PI);
        }

        let ray = Ray::new(*origin, *direction, 0.0);
        if self.intersect(&ray, EPSILON, FloatType::INFINITY).is_empty() {
            return 0.0;
        }

        let cos_theta_max = (1.0 - self.radius * self.radius / distance_squared)
            .max(0.0)
            .sqrt();
        let solid_angle = 2.0 * PI * (1.0 - cos_theta_max);
        if solid_angle <= EPSILON {
            0.0
        } else {
            1.0 / solid_angle
        }
    }
}

impl Rect {
    fn intersect(&self, ray: &Ray, t_min: FloatType, t_max: FloatType) -> PrimitiveHits {
        let mut hits = PrimitiveHits::new();

        let axis = self.axis.index();
        let t = (self.offset - ray.origin[axis]) * ray.inv_direction[axis];
        if !t.is_finite() || t <= t_min || t >= t_max {
            return hits;
        }

        let (u_axis, v_axis) = self.axis.plane();
        let point = ray.point_at(t);
        let u = point[u_axis];
        let v = point[v_axis];
        if u < self.low.0 || u > self.high.0 || v < self.low.1 || v > self.high.1 {
            return hits;
        }

        hits.push(PrimitiveHit {
            t,
            normal: self.axis.normal(),
            texture_coordinates: Some(TexturePoint::new(
                (u - self.low.0) / (self.high.0 - self.low.0),
                (v - self.low.1) / (self.high.1 - self.low.1),
            )),
        });
        hits
    }
}

impl BoxShape {
    fn intersect(&self, ray: &Ray, t_min: FloatType, t_max: FloatType) -> PrimitiveHits {
        let mut hits = PrimitiveHits::new();

        // Slab test that remembers which axis bounded the interval, so the face
        // normals fall out of the same pass.
        let mut entry_t = FloatType::NEG_INFINITY;
        let mut exit_t = FloatType::INFINITY;
        let mut entry_axis = 0;
        let mut exit_axis = 0;

        for axis in 0..3 {
            let near = (self.min[axis] - ray.origin[axis]) * ray.inv_direction[axis];
            let far = (self.max[axis] - ray.origin[axis]) * ray.inv_direction[axis];
            let (near, far) = if near.is_nan() || far.is_nan() {
                // Parallel ray starting on a slab plane; the slab does not constrain it.
                (FloatType::NEG_INFINITY, FloatType::INFINITY)
            } else {
                (near.min(far), near.max(far))
            };
            if near > entry_t {
                entry_t = near;
                entry_axis = axis;
            }
            if far < exit_t {
                exit_t = far;
                exit_axis = axis;
            }
        }

        if entry_t > exit_t {
            return hits;
        }

        if entry_t > t_min && entry_t < t_max && entry_t.is_finite() {
            let mut normal = WorldVector::zeros();
            normal[entry_axis] = -ray.direction[entry_axis].signum();
            hits.push(PrimitiveHit {
                t: entry_t,
                normal: Unit::new_unchecked(normal),
                texture_coordinates: None,
            });
        }
        if exit_t > t_min && exit_t < t_max && exit_t.is_finite() {
            let mut normal = WorldVector::zeros();
            normal[exit_axis] = ray.direction[exit_axis].signum();
            hits.push(PrimitiveHit {
                t: exit_t,
                normal: Unit::new_unchecked(normal),
                texture_coordinates: None,
            });
        }
        hits
    }
}

impl Triangle {
    fn intersect(&self, ray: &Ray, t_min: FloatType, t_max: FloatType) -> PrimitiveHits {
        let mut hits = PrimitiveHits::new();

        let edge1 = self.b - self.a;
        let edge2 = self.c - self.a;
        let p = ray.direction.cross(&edge2);
        let determinant = edge1.dot(&p);
        if determinant.abs() < EPSILON {
            return hits;
        }

        let inv_determinant = 1.0 / determinant;
        let to_origin = ray.origin - self.a;
        let u = to_origin.dot(&p) * inv_determinant;
        if !(0.0..=1.0).contains(&u) {
            return hits;
        }
        let q = to_origin.cross(&edge1);
        let v = ray.direction.dot(&q) * inv_determinant;
        if v < 0.0 || u + v > 1.0 {
            return hits;
        }

        let t = edge2.dot(&q) * inv_determinant;
        if t > t_min && t < t_max {
            hits.push(PrimitiveHit {
                t,
                normal: Unit::new_normalize(edge1.cross(&edge2)),
                texture_coordinates: Some(TexturePoint::new(u, v)),
            });
        }
        hits
    }
}

fn pad_thin_axes(mut bounds: Aabb) -> Aabb {
    for axis in 0..3 {
        if bounds.max[axis] - bounds.min[axis] < BOUNDS_PADDING {
            bounds.min[axis] -= BOUNDS_PADDING;
            bounds.max[axis] += BOUNDS_PADDING;
        }
    }
    bounds
}

fn sphere_uv(normal: &Unit<WorldVector>) -> TexturePoint {
    let theta = (-normal.y).acos();
    let phi = (-normal.z).atan2(normal.x) + PI;
    TexturePoint::new(phi / (2.0 * PI), theta / PI)
}

/// Completes a unit vector into an orthonormal basis (u, v, w).
fn orthonormal_basis(w: &Unit<WorldVector>) -> (WorldVector, WorldVector) {
    let helper = if w.x.abs() > 0.9 {
        WorldVector::new(0.0, 1.0, 0.0)
    } else {
        WorldVector::new(1.0, 0.0, 0.0)
    };
    let v = w.cross(&helper).normalize();
    let u = w.cross(&v);
    (u, v)
}
