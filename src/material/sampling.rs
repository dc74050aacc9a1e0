use nalgebra::Unit;

use crate::geometry::{FloatType, WorldPoint, WorldVector};
use crate::material::Material;
use crate::scene::{EntityIdx, World};

/// Threshold below which a combined pdf is considered numerically zero and the
/// sample must be invalidated by the caller instead of divided by.
pub(crate) const PDF_EPSILON: FloatType = 1e-8;

/// Outcome of the importance-sampling decision for one bounce.
#[derive(Clone, Debug)]
pub(crate) struct DirectionSample {
    pub direction: WorldVector,
    /// Combined balance-heuristic pdf. Only meaningful for explicit light
    /// samples; pure BSDF samples carry weight 1 and `None` here.
    pub pdf: Option<FloatType>,
    /// Entity the next bounce must hit for the sample to stay valid.
    pub target: Option<EntityIdx>,
}

/// Chooses between pure BSDF sampling and explicit sampling of an emissive
/// entity's surface, combining the two strategies with the balance heuristic.
pub(crate) fn sample_scatter_direction(
    world: &World,
    origin: &WorldPoint,
    normal: &Unit<WorldVector>,
    incoming: &WorldVector,
    bsdf_direction: &WorldVector,
    material: &Material,
    time: FloatType,
    rng: &mut impl rand::Rng,
) -> DirectionSample {
    let lights = world.emissive_entities();
    if lights.is_empty() || rng.random_range(0.0..1.0) < 0.5 {
        return DirectionSample {
            direction: *bsdf_direction,
            pdf: None,
            target: None,
        };
    }

    let target = lights[rng.random_range(0..lights.len())];
    let direction = world
        .entity(target)
        .sample_toward(origin, time, rng)
        .normalize();

    let light_pdf = light_mixture_pdf(world, origin, &direction, time);
    let bsdf_pdf = material.pdf(&direction, incoming, normal);
    let pdf = 0.5 * light_pdf + 0.5 * bsdf_pdf;

    DirectionSample {
        direction,
        pdf: Some(pdf),
        target: Some(target),
    }
}

/// Density of the uniform-over-lights strategy producing `direction`: the
/// average of the individual light pdfs.
fn light_mixture_pdf(
    world: &World,
    origin: &WorldPoint,
    direction: &WorldVector,
    time: FloatType,
) -> FloatType {
    let lights = world.emissive_entities();
    if lights.is_empty() {
        return 0.0;
    }

    let sum: FloatType = lights
        .iter()
        .map(|&light| world.entity(light).direction_pdf(origin, direction, time))
        .sum();
    sum / lights.len() as FloatType
}

/// Whether a pdf is too close to zero to divide by.
pub(crate) fn pdf_is_degenerate(pdf: FloatType) -> bool {
    !(pdf > PDF_EPSILON) || !pdf.is_finite()
}
