use thiserror::Error;

use crate::geometry::{FloatType, WorldVector};
use crate::util::{BLACK, Rgb};

/// Which denoiser runs between combine and finalize.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum DenoiseMode {
    #[default]
    None,
    /// Mode A: plain spatial smoothing of the color plane.
    Spatial,
    /// Mode B: auxiliary-guided smoothing that respects normal/albedo edges.
    Guided,
}

#[derive(Debug, Error)]
pub enum DenoiseError {
    #[error("plane length {actual} does not match {width}x{height}")]
    PlaneSizeMismatch {
        width: u32,
        height: u32,
        actual: usize,
    },

    #[error("denoise backend failed: {0}")]
    Backend(String),
}

/// Opaque buffer-in/buffer-out denoiser. Implementations receive the resolved
/// color plane plus the auxiliary planes and return a denoised color plane;
/// what happens in between is their business.
pub trait Denoiser: Send + Sync {
    fn denoise(
        &self,
        color: &[Rgb],
        normal: &[WorldVector],
        albedo: &[Rgb],
        width: u32,
        height: u32,
    ) -> Result<Vec<Rgb>, DenoiseError>;
}

pub(crate) fn denoiser_for(mode: DenoiseMode) -> Option<Box<dyn Denoiser>> {
    match mode {
        DenoiseMode::None => None,
        DenoiseMode::Spatial => Some(Box::new(SpatialDenoiser)),
        DenoiseMode::Guided => Some(Box::new(GuidedDenoiser)),
    }
}

fn check_planes(
    color: &[Rgb],
    normal: &[WorldVector],
    albedo: &[Rgb],
    width: u32,
    height: u32,
) -> Result<(), DenoiseError> {
    let expected = (width * height) as usize;
    for actual in [color.len(), normal.len(), albedo.len()] {
        if actual != expected {
            return Err(DenoiseError::PlaneSizeMismatch {
                width,
                height,
                actual,
            });
        }
    }
    Ok(())
}

/// 3x3 box filter.
struct SpatialDenoiser;

impl Denoiser for SpatialDenoiser {
    fn denoise(
        &self,
        color: &[Rgb],
        normal: &[WorldVector],
        albedo: &[Rgb],
        width: u32,
        height: u32,
    ) -> Result<Vec<Rgb>, DenoiseError> {
        check_planes(color, normal, albedo, width, height)?;
        Ok(filter(color, width, height, |_center, _neighbor| 1.0))
    }
}

/// 3x3 filter with weights falling off across normal and albedo edges, so
/// smoothing stays within surfaces instead of bleeding over silhouettes.
struct GuidedDenoiser;

impl Denoiser for GuidedDenoiser {
    fn denoise(
        &self,
        color: &[Rgb],
        normal: &[WorldVector],
        albedo: &[Rgb],
        width: u32,
        height: u32,
    ) -> Result<Vec<Rgb>, DenoiseError> {
        check_planes(color, normal, albedo, width, height)?;
        Ok(filter(color, width, height, |center, neighbor| {
            let normal_alignment = normal[center].dot(&normal[neighbor]).max(0.0);
            let albedo_delta = (albedo[center].r - albedo[neighbor].r).abs()
                + (albedo[center].g - albedo[neighbor].g).abs()
                + (albedo[center].b - albedo[neighbor].b).abs();
            normal_alignment * (1.0 - albedo_delta.min(1.0))
        }))
    }
}

fn filter(
    color: &[Rgb],
    width: u32,
    height: u32,
    weight: impl Fn(usize, usize) -> FloatType,
) -> Vec<Rgb> {
    let mut result = vec![BLACK; color.len()];
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let center = (y * width as i64 + x) as usize;
            let mut sum = BLACK;
            let mut total_weight = 0.0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let neighbor = (ny * width as i64 + nx) as usize;
                    let w = if neighbor == center {
                        1.0
                    } else {
                        weight(center, neighbor)
                    };
                    sum += color[neighbor] * w;
                    total_weight += w;
                }
            }
            result[center] = sum * (1.0 / total_weight);
        }
    }
    result
}
