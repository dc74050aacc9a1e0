mod sampling;

pub(crate) use sampling::{pdf_is_degenerate, sample_scatter_direction};

use nalgebra::Unit;
use rand_distr::{Distribution as _, UnitSphere};
use std::f32::consts::PI;

use crate::geometry::{EPSILON, FloatType, Ray, TexturePoint, WorldPoint, WorldVector};
use crate::util::{BLACK, Rgb, WHITE, is_black};

/// Solid or procedural surface color.
#[derive(Clone, Debug)]
pub enum Texture {
    Solid(Rgb),
    Checker {
        even: Rgb,
        odd: Rgb,
        scale: FloatType,
    },
}

impl Texture {
    pub fn sample(&self, _texture_coordinates: Option<TexturePoint>, point: &WorldPoint) -> Rgb {
        match self {
            Texture::Solid(color) => *color,
            Texture::Checker { even, odd, scale } => {
                let cell = (point.coords * *scale).map(|x| x.floor() as i64);
                if (cell.x + cell.y + cell.z).rem_euclid(2) == 0 {
                    *even
                } else {
                    *odd
                }
            }
        }
    }
}

impl From<Rgb> for Texture {
    fn from(color: Rgb) -> Texture {
        Texture::Solid(color)
    }
}

/// Per-entity surface/medium behavior. Evaluated once per bounce per sample,
/// so the representation stays a compact tagged union.
#[derive(Clone, Debug)]
pub enum Material {
    Lambertian {
        albedo: Texture,
    },
    Metal {
        albedo: Rgb,
        fuzz: FloatType,
    },
    Dielectric {
        refractive_index: FloatType,
    },
    DiffuseLight {
        emission: Rgb,
    },
    /// Participating medium: rays passing through terminate inside with a
    /// probability governed by an exponential free-path sample.
    ProbabilisticVolume {
        albedo: Rgb,
        density: FloatType,
    },
}

/// Result of a successful scatter.
#[derive(Clone, Debug)]
pub struct Scatter {
    pub attenuation: Rgb,
    pub direction: WorldVector,
    /// Perfectly specular scatters bypass importance sampling and do not
    /// contribute to the auxiliary normal/albedo outputs.
    pub specular: bool,
}

impl Material {
    pub fn scatter(
        &self,
        ray: &Ray,
        point: &WorldPoint,
        normal: &Unit<WorldVector>,
        texture_coordinates: Option<TexturePoint>,
        rng: &mut impl rand::Rng,
    ) -> Option<Scatter> {
        match self {
            Material::Lambertian { albedo } => {
                let mut direction = facing(normal, &ray.direction).into_inner() + random_unit(rng);
                if direction.norm_squared() < EPSILON {
                    direction = facing(normal, &ray.direction).into_inner();
                }
                Some(Scatter {
                    attenuation: albedo.sample(texture_coordinates, point),
                    direction,
                    specular: false,
                })
            }
            Material::Metal { albedo, fuzz } => {
                let reflected = reflect(&ray.direction, normal);
                let direction = reflected + random_unit(rng) * *fuzz;
                if direction.dot(&facing(normal, &ray.direction)) <= 0.0 {
                    // Fuzz pushed the ray below the surface; the sample is absorbed.
                    return None;
                }
                Some(Scatter {
                    attenuation: *albedo,
                    direction,
                    specular: true,
                })
            }
            Material::Dielectric { refractive_index } => {
                let front_face = ray.direction.dot(normal) < 0.0;
                let outward = facing(normal, &ray.direction);
                let ratio = if front_face {
                    1.0 / refractive_index
                } else {
                    *refractive_index
                };

                let cos_theta = (-ray.direction).dot(&outward).min(1.0);
                let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

                let cannot_refract = ratio * sin_theta > 1.0;
                let direction = if cannot_refract
                    || reflectance(cos_theta, ratio) > rng.random_range(0.0..1.0)
                {
                    reflect(&ray.direction, &outward)
                } else {
                    refract(&ray.direction, &outward, ratio)
                };

                Some(Scatter {
                    attenuation: WHITE,
                    direction,
                    specular: true,
                })
            }
            Material::DiffuseLight { .. } => None,
            Material::ProbabilisticVolume { albedo, .. } => Some(Scatter {
                attenuation: *albedo,
                direction: random_unit(rng),
                specular: false,
            }),
        }
    }

    pub fn emit(&self, _point: &WorldPoint, _normal: &Unit<WorldVector>) -> Rgb {
        match self {
            Material::DiffuseLight { emission } => *emission,
            _ => BLACK,
        }
    }

    /// Density of `scatter` having produced `outgoing` after arriving along
    /// `incoming` at a surface with `normal`. Zero for specular variants;
    /// used to reweight explicit light samples.
    pub fn pdf(
        &self,
        outgoing: &WorldVector,
        incoming: &WorldVector,
        normal: &Unit<WorldVector>,
    ) -> FloatType {
        match self {
            Material::Lambertian { .. } => {
                let cosine = facing(normal, incoming).dot(&outgoing.normalize());
                cosine.max(0.0) / PI
            }
            Material::ProbabilisticVolume { .. } => 1.0 / (4.0 * PI),
            _ => 0.0,
        }
    }

    /// Samples an exponential free-path length through the medium. Returns the
    /// in-medium distance at which the path terminates, or `None` when it
    /// passes through the whole `path_length` (or the material is no medium).
    pub fn probabilistic_hit(
        &self,
        path_length: FloatType,
        rng: &mut impl rand::Rng,
    ) -> Option<FloatType> {
        match self {
            Material::ProbabilisticVolume { density, .. } => {
                let u: FloatType = rng.random_range(0.0..1.0);
                let free_path = -(1.0 - u).ln() / density;
                (free_path < path_length).then_some(free_path)
            }
            _ => None,
        }
    }

    pub fn is_emissive(&self) -> bool {
        match self {
            Material::DiffuseLight { emission } => !is_black(*emission),
            _ => false,
        }
    }

    pub fn is_volume(&self) -> bool {
        matches!(self, Material::ProbabilisticVolume { .. })
    }
}

/// The side of the surface the arriving ray sees.
fn facing(normal: &Unit<WorldVector>, incoming: &WorldVector) -> Unit<WorldVector> {
    if incoming.dot(normal) < 0.0 {
        *normal
    } else {
        -*normal
    }
}

fn random_unit(rng: &mut impl rand::Rng) -> WorldVector {
    let coords: [FloatType; 3] = UnitSphere.sample(rng);
    WorldVector::from(coords)
}

fn reflect(direction: &WorldVector, normal: &Unit<WorldVector>) -> WorldVector {
    direction - normal.into_inner() * (2.0 * direction.dot(normal))
}

fn refract(
    direction: &WorldVector,
    normal: &Unit<WorldVector>,
    etai_over_etat: FloatType,
) -> WorldVector {
    let cos_theta = (-direction).dot(normal).min(1.0);
    let out_perpendicular = (direction + normal.into_inner() * cos_theta) * etai_over_etat;
    let out_parallel =
        normal.into_inner() * -(1.0 - out_perpendicular.norm_squared()).abs().sqrt();
    out_perpendicular + out_parallel
}

/// Schlick approximation of the Fresnel factor.
fn reflectance(cosine: FloatType, refraction_ratio: FloatType) -> FloatType {
    let r0 = (1.0 - refraction_ratio) / (1.0 + refraction_ratio);
    let r0 = r0 * r0;
    r0 + (1.0 - r0) * (1.0 - cosine).powi(5)
}
