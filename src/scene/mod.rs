pub mod bvh;
pub mod primitives;

use std::ops::Range;
use std::sync::Arc;

use index_vec::IndexVec;
use nalgebra::{Isometry3, Unit};
use thiserror::Error;

use crate::geometry::{Aabb, FloatType, Ray, TexturePoint, WorldPoint, WorldVector};
use crate::material::Material;
use crate::scene::bvh::{Bvh, TraversalCache};
use crate::scene::primitives::{Primitive, PrimitiveHits};
use crate::util::{Rgb, lerp};

index_vec::define_index_type! {
    pub struct EntityIdx = u32;
}

index_vec::define_index_type! {
    pub struct MaterialIdx = u32;
}

/// Entity placement: either a static rigid transform, or a translation
/// interpolated from `origin` to `origin + offset` across `time_range`.
#[derive(Clone, Debug)]
pub enum Transform {
    Static(Isometry3<FloatType>),
    Moving {
        origin: WorldVector,
        offset: WorldVector,
        time_range: Range<FloatType>,
    },
}

impl Transform {
    pub fn identity() -> Transform {
        Transform::Static(Isometry3::identity())
    }

    pub fn translation(offset: WorldVector) -> Transform {
        Transform::Static(Isometry3::translation(offset.x, offset.y, offset.z))
    }

    fn moving_translation(&self, time: FloatType) -> WorldVector {
        match self {
            Transform::Static(_) => unreachable!("only meaningful for moving transforms"),
            Transform::Moving {
                origin,
                offset,
                time_range,
            } => {
                let progress = ((time - time_range.start) / (time_range.end - time_range.start))
                    .clamp(0.0, 1.0);
                origin + offset * progress
            }
        }
    }

    pub(crate) fn ray_to_local(&self, ray: &Ray) -> Ray {
        match self {
            Transform::Static(isometry) => Ray::new(
                isometry.inverse_transform_point(&ray.origin),
                isometry.inverse_transform_vector(&ray.direction),
                ray.time,
            ),
            Transform::Moving { .. } => Ray::new(
                ray.origin - self.moving_translation(ray.time),
                ray.direction,
                ray.time,
            ),
        }
    }

    pub(crate) fn point_to_local(&self, point: &WorldPoint, time: FloatType) -> WorldPoint {
        match self {
            Transform::Static(isometry) => isometry.inverse_transform_point(point),
            Transform::Moving { .. } => point - self.moving_translation(time),
        }
    }

    pub(crate) fn vector_to_local(&self, vector: &WorldVector, time: FloatType) -> WorldVector {
        match self {
            Transform::Static(isometry) => isometry.inverse_transform_vector(vector),
            Transform::Moving { .. } => {
                let _ = time;
                *vector
            }
        }
    }

    pub(crate) fn vector_to_world(&self, vector: &WorldVector, time: FloatType) -> WorldVector {
        match self {
            Transform::Static(isometry) => isometry.transform_vector(vector),
            Transform::Moving { .. } => {
                let _ = time;
                *vector
            }
        }
    }

    /// World-space bounds of `local` over every time the transform can take.
    pub(crate) fn bounds_to_world(&self, local: &Aabb) -> Aabb {
        match self {
            Transform::Static(isometry) => {
                let corners = (0..8).map(|i| {
                    let corner = WorldPoint::new(
                        if i & 1 == 0 { local.min.x } else { local.max.x },
                        if i & 2 == 0 { local.min.y } else { local.max.y },
                        if i & 4 == 0 { local.min.z } else { local.max.z },
                    );
                    isometry.transform_point(&corner)
                });
                Aabb::from_points(corners).unwrap_or_else(Aabb::empty)
            }
            Transform::Moving { origin, offset, .. } => {
                let at_start = Aabb::new(local.min + origin, local.max + origin);
                let at_end = Aabb::new(local.min + origin + offset, local.max + origin + offset);
                at_start.enclose(&at_end)
            }
        }
    }

    fn validate(&self) -> Result<(), TransformFault> {
        match self {
            Transform::Static(_) => Ok(()),
            Transform::Moving { time_range, .. } => {
                if !time_range.start.is_finite() || !time_range.end.is_finite() {
                    Err(TransformFault::NonFiniteTimeRange)
                } else if time_range.start >= time_range.end {
                    Err(TransformFault::EmptyTimeRange)
                } else {
                    Ok(())
                }
            }
        }
    }
}

enum TransformFault {
    EmptyTimeRange,
    NonFiniteTimeRange,
}

#[derive(Clone, Debug)]
pub struct Entity {
    pub primitive: Primitive,
    pub transform: Transform,
    pub material: MaterialIdx,
}

impl Entity {
    /// All boundary crossings of `ray` with this entity, in world space.
    /// `t` values carry over unchanged because the transforms are rigid.
    pub(crate) fn intersect(&self, ray: &Ray, t_min: FloatType, t_max: FloatType) -> PrimitiveHits {
        let local_ray = self.transform.ray_to_local(ray);
        let mut hits = self.primitive.intersect(&local_ray, t_min, t_max);
        for hit in &mut hits {
            hit.normal = Unit::new_normalize(
                self.transform.vector_to_world(&hit.normal, ray.time),
            );
        }
        hits
    }

    pub(crate) fn bounding_box(&self) -> Aabb {
        self.transform.bounds_to_world(&self.primitive.bounding_box())
    }

    /// Samples a world-space direction from `origin` toward the entity surface.
    pub(crate) fn sample_toward(
        &self,
        origin: &WorldPoint,
        time: FloatType,
        rng: &mut impl rand::Rng,
    ) -> WorldVector {
        let local_origin = self.transform.point_to_local(origin, time);
        let local_direction = self.primitive.sample_toward(&local_origin, rng);
        self.transform.vector_to_world(&local_direction, time)
    }

    /// Solid-angle density of `sample_toward` producing `direction` from `origin`.
    pub(crate) fn direction_pdf(
        &self,
        origin: &WorldPoint,
        direction: &WorldVector,
        time: FloatType,
    ) -> FloatType {
        let local_origin = self.transform.point_to_local(origin, time);
        let local_direction = self.transform.vector_to_local(direction, time);
        self.primitive.direction_pdf(&local_origin, &local_direction)
    }
}

/// A surface (or synthesized in-medium) hit along a ray. Transient; never persisted.
#[derive(Clone, Debug)]
pub struct HitRecord {
    pub t: FloatType,
    pub point: WorldPoint,
    pub normal: Unit<WorldVector>,
    pub entity: EntityIdx,
    pub material: MaterialIdx,
    pub texture_coordinates: Option<TexturePoint>,
}

/// What a ray sees when it leaves the scene.
#[derive(Clone)]
pub enum Environment {
    Uniform(Rgb),
    GradientSky { bottom: Rgb, top: Rgb },
    /// Arbitrary direction-to-color lookup, e.g. a cubemap sampler provided by
    /// the host.
    Custom(Arc<dyn Fn(&WorldVector) -> Rgb + Send + Sync>),
}

impl Environment {
    pub fn sample(&self, direction: &WorldVector) -> Rgb {
        match self {
            Environment::Uniform(color) => *color,
            Environment::GradientSky { bottom, top } => {
                let t = 0.5 * (direction.normalize().y + 1.0);
                lerp(*bottom, *top, t)
            }
            Environment::Custom(sampler) => sampler(direction),
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Uniform(color) => f.debug_tuple("Uniform").field(color).finish(),
            Environment::GradientSky { bottom, top } => f
                .debug_struct("GradientSky")
                .field("bottom", bottom)
                .field("top", top)
                .finish(),
            Environment::Custom(_) => f.debug_tuple("Custom").finish(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("entity {entity} references material {material} but only {count} materials exist")]
    UnknownMaterial {
        entity: usize,
        material: usize,
        count: usize,
    },

    #[error("moving entity {entity} has an empty time range")]
    EmptyTimeRange { entity: usize },

    #[error("moving entity {entity} has a non-finite time range")]
    NonFiniteTimeRange { entity: usize },

    #[error("volume material {material} has non-positive density {density}")]
    InvalidVolumeDensity { material: usize, density: FloatType },
}

/// Immutable scene snapshot: entity buffer, material table, emissive index and
/// the acceleration structure built over all of it. Rebuilt wholesale on scene
/// change and read-only during any trace.
#[derive(Debug)]
pub struct World {
    entities: IndexVec<EntityIdx, Entity>,
    materials: IndexVec<MaterialIdx, Material>,
    emissive: Vec<EntityIdx>,
    environment: Environment,
    bvh: Bvh,
}

impl World {
    /// Validates the scene description and builds the BVH. This is the only
    /// place scene-level invariants are enforced; a failure here blocks
    /// starting a trace and nothing else sees the invalid data.
    pub fn build(
        entities: Vec<Entity>,
        materials: Vec<Material>,
        environment: Environment,
    ) -> Result<World, SceneError> {
        for (index, material) in materials.iter().enumerate() {
            if let Material::ProbabilisticVolume { density, .. } = material
                && !(*density > 0.0 && density.is_finite())
            {
                return Err(SceneError::InvalidVolumeDensity {
                    material: index,
                    density: *density,
                });
            }
        }

        for (index, entity) in entities.iter().enumerate() {
            if entity.material.index() >= materials.len() {
                return Err(SceneError::UnknownMaterial {
                    entity: index,
                    material: entity.material.index(),
                    count: materials.len(),
                });
            }
            entity.transform.validate().map_err(|fault| match fault {
                TransformFault::EmptyTimeRange => SceneError::EmptyTimeRange { entity: index },
                TransformFault::NonFiniteTimeRange => {
                    SceneError::NonFiniteTimeRange { entity: index }
                }
            })?;
        }

        let entities: IndexVec<EntityIdx, Entity> = entities.into_iter().collect();
        let materials: IndexVec<MaterialIdx, Material> = materials.into_iter().collect();

        let emissive = entities
            .iter_enumerated()
            .filter(|(_, entity)| materials[entity.material].is_emissive())
            .map(|(index, _)| index)
            .collect();

        let bvh = Bvh::build(&entities, Default::default());

        Ok(World {
            entities,
            materials,
            emissive,
            environment,
            bvh,
        })
    }

    pub fn entity(&self, index: EntityIdx) -> &Entity {
        &self.entities[index]
    }

    pub fn material(&self, index: MaterialIdx) -> &Material {
        &self.materials[index]
    }

    pub fn material_of(&self, entity: EntityIdx) -> &Material {
        &self.materials[self.entities[entity].material]
    }

    pub fn emissive_entities(&self) -> &[EntityIdx] {
        &self.emissive
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Collects every entity boundary crossing along `ray`, sorted ascending by
    /// distance, stable on ties.
    pub fn intersect_all(
        &self,
        ray: &Ray,
        cache: &mut TraversalCache,
        hits: &mut Vec<HitRecord>,
    ) {
        self.bvh.intersect_all(&self.entities, ray, cache, hits);
    }
}
