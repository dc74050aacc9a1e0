use arrayvec::ArrayVec;
use nalgebra::Unit;

use crate::geometry::{FloatType, HIT_EPSILON, Ray, WorldVector};
use crate::material::{pdf_is_degenerate, sample_scatter_direction};
use crate::render::MAX_TRACE_DEPTH;
use crate::scene::bvh::TraversalCache;
use crate::scene::{EntityIdx, HitRecord, World};
use crate::util::{BLACK, Rgb, modulate};

/// Radiance and auxiliary outputs of one successful camera sample.
#[derive(Clone, Debug)]
pub(crate) struct SampleOutput {
    pub color: Rgb,
    pub normal: WorldVector,
    pub albedo: Rgb,
    /// Path length actually walked, for the diagnostics counters.
    pub bounces: u32,
}

/// Per-worker scratch reused across samples.
#[derive(Default)]
pub(crate) struct IntegratorScratch {
    pub cache: TraversalCache,
    pub hits: Vec<HitRecord>,
}

/// One per-bounce ledger entry: what the bounce emits and how it attenuates
/// everything behind it.
type BounceLedger = ArrayVec<(Rgb, Rgb), { MAX_TRACE_DEPTH as usize }>;

/// Traces one sample path up to `trace_depth` bounces.
///
/// Returns `None` for the expected, silent sample failures: depth exhaustion
/// without reaching any emission, a numerically degenerate pdf, or a missed
/// explicit-sampling target. Failed samples are excluded from the pixel
/// average entirely.
pub(crate) fn trace_sample(
    world: &World,
    camera_ray: Ray,
    trace_depth: u32,
    scratch: &mut IntegratorScratch,
    rng: &mut impl rand::Rng,
) -> Option<SampleOutput> {
    let mut ledger = BounceLedger::new();
    let mut auxiliary: Option<(WorldVector, Rgb)> = None;
    let mut explicit_target: Option<EntityIdx> = None;
    let mut ray = camera_ray;
    let mut terminated = false;
    let mut bounces = 0;

    for depth in 0..trace_depth {
        bounces = depth + 1;
        world.intersect_all(&ray, &mut scratch.cache, &mut scratch.hits);
        let resolved = resolve_scatter_hit(world, &ray, &scratch.hits, rng);

        let Some(hit) = resolved else {
            if explicit_target.is_some() {
                // The explicit light sample escaped the scene entirely.
                return None;
            }
            let sky = world.environment().sample(&ray.direction);
            ledger.push((sky, BLACK));
            if depth == 0 {
                // Sky fallback for the auxiliary planes, first bounce only.
                auxiliary = Some((-ray.direction, sky));
            }
            terminated = true;
            break;
        };

        if let Some(target) = explicit_target {
            if hit.entity != target {
                // Shadow-ray semantics without a separate occlusion trace: the
                // sampled light is occluded, so the sample is void.
                return None;
            }
            explicit_target = None;
        }

        let material = world.material(hit.material);
        let emitted = material.emit(&hit.point, &hit.normal);

        let Some(scatter) = material.scatter(
            &ray,
            &hit.point,
            &hit.normal,
            hit.texture_coordinates,
            rng,
        ) else {
            // Emissive surface or absorbed ray; either way the path ends here.
            ledger.push((emitted, BLACK));
            terminated = true;
            break;
        };

        if auxiliary.is_none() && !scatter.specular {
            auxiliary = Some((hit.normal.into_inner(), scatter.attenuation));
        }

        let (next_direction, weight, next_target) = if scatter.specular {
            (scatter.direction, 1.0, None)
        } else {
            let sample = sample_scatter_direction(
                world,
                &hit.point,
                &hit.normal,
                &ray.direction,
                &scatter.direction,
                material,
                ray.time,
                rng,
            );
            match sample.pdf {
                None => (sample.direction, 1.0, None),
                Some(pdf) => {
                    if pdf_is_degenerate(pdf) {
                        return None;
                    }
                    let material_pdf =
                        material.pdf(&sample.direction, &ray.direction, &hit.normal);
                    (sample.direction, material_pdf / pdf, sample.target)
                }
            }
        };

        ledger.push((emitted, scatter.attenuation * weight));
        explicit_target = next_target;

        // Offset the next origin along the geometric normal, signed toward the
        // scattered direction, to avoid re-hitting the surface we just left.
        let side = if next_direction.dot(&hit.normal) >= 0.0 {
            1.0
        } else {
            -1.0
        };
        let origin = hit.point + hit.normal.into_inner() * (side * HIT_EPSILON);
        ray = Ray::new(origin, next_direction, ray.time);
    }

    if !terminated {
        return None;
    }

    // Unwind the ledger from the deepest bounce toward the camera; this is the
    // iterative evaluation of the recursive rendering-equation sum.
    let mut color = BLACK;
    for (emission, attenuation) in ledger.iter().rev() {
        color = modulate(color, *attenuation) + *emission;
    }

    let (normal, albedo) = auxiliary.unwrap_or((-camera_ray.direction, color));
    Some(SampleOutput {
        color,
        normal,
        albedo,
        bounces,
    })
}

/// Scans the sorted hit list and picks the boundary the path actually scatters
/// at, resolving probabilistic-volume entry/exit pairs along the way.
///
/// The scan tracks at most one enclosing medium at a time. When volumes of
/// different materials overlap, the first boundary in scan order wins and the
/// other medium's interior is ignored for the overlapped stretch; the exact
/// behavior for that configuration is an accepted limitation.
fn resolve_scatter_hit(
    world: &World,
    ray: &Ray,
    hits: &[HitRecord],
    rng: &mut impl rand::Rng,
) -> Option<HitRecord> {
    // A volume entity whose first crossing is an exit had already enclosed the
    // ray origin; the medium is active from distance zero.
    let mut enclosing: Option<(EntityIdx, crate::scene::MaterialIdx)> = None;
    {
        let mut entered: ArrayVec<EntityIdx, 16> = ArrayVec::new();
        for hit in hits {
            if !world.material(hit.material).is_volume() {
                continue;
            }
            let entering = hit.normal.dot(&ray.direction) < 0.0;
            if entering {
                if entered.is_full() {
                    break;
                }
                entered.push(hit.entity);
            } else if !entered.contains(&hit.entity) {
                enclosing = Some((hit.entity, hit.material));
                break;
            }
        }
    }

    let mut segment_start: FloatType = 0.0;
    for hit in hits {
        let material = world.material(hit.material);

        if let Some((entity, volume_material)) = enclosing {
            // Try to terminate within the segment we just crossed.
            let volume = world.material(volume_material);
            if let Some(distance) = volume.probabilistic_hit(hit.t - segment_start, rng) {
                return Some(synthesize_volume_hit(
                    ray,
                    segment_start + distance,
                    entity,
                    volume_material,
                ));
            }
            segment_start = hit.t;

            if hit.entity == entity {
                // Matching exit boundary; back-to-back boundaries of the same
                // material produce a zero-length segment here and the scan
                // re-enters seamlessly on the next crossing.
                enclosing = None;
                continue;
            }
            if material.is_volume() {
                // Overlapping foreign volume boundary; see the limitation above.
                continue;
            }
            // A real surface inside the medium blocks the path.
            return Some(hit.clone());
        }

        if material.is_volume() {
            let entering = hit.normal.dot(&ray.direction) < 0.0;
            if entering {
                enclosing = Some((hit.entity, hit.material));
                segment_start = hit.t;
            }
            // An exit crossing with no matching entry belongs to a medium whose
            // interior was skipped (overlap limitation) or already handled by
            // the prescan; pass through either way.
            continue;
        }

        return Some(hit.clone());
    }

    // Medium with no exit boundary in range: the path length is unbounded, so
    // the exponential free-path sample always terminates.
    if let Some((entity, volume_material)) = enclosing {
        let volume = world.material(volume_material);
        if let Some(distance) = volume.probabilistic_hit(FloatType::INFINITY, rng) {
            return Some(synthesize_volume_hit(
                ray,
                segment_start + distance,
                entity,
                volume_material,
            ));
        }
    }

    None
}

fn synthesize_volume_hit(
    ray: &Ray,
    t: FloatType,
    entity: EntityIdx,
    material: crate::scene::MaterialIdx,
) -> HitRecord {
    HitRecord {
        t,
        point: ray.point_at(t),
        // The in-medium normal is undefined; it only has to be a set unit
        // vector so downstream math stays finite.
        normal: Unit::new_unchecked(ray.direction),
        entity,
        material,
        texture_coordinates: None,
    }
}
