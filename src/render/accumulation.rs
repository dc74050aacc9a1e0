use std::sync::Mutex;
use std::thread;

use itertools::izip;
use rand::Rng as _;
use rand::SeedableRng as _;
use rand::rngs::SmallRng;

use crate::camera::Camera;
use crate::geometry::{FloatType, ScreenPoint, WorldVector};
use crate::render::DebugVisualization;
use crate::render::integrator::{IntegratorScratch, trace_sample};
use crate::render::pipeline::CancelToken;
use crate::scene::World;
use crate::util::{BLACK, Rgb, Rgba8, Stats, is_finite, parallel_for_indices};

/// Sentinel color for zero-sample and NaN pixels in diagnostic mode.
pub(crate) const SENTINEL: Rgb = Rgb {
    r: 1.0,
    g: 0.0,
    b: 1.0,
};

const GAMMA: FloatType = 2.2;

/// Persistent per-pixel running sums. Sample counts only ever grow within one
/// trace run; `reset` is the only way down.
#[derive(Clone, Debug)]
pub struct AccumulationBuffers {
    width: u32,
    height: u32,
    pub color_sums: Vec<Rgb>,
    pub sample_counts: Vec<u32>,
    pub normal_sums: Vec<WorldVector>,
    pub albedo_sums: Vec<Rgb>,
}

impl AccumulationBuffers {
    pub fn new(width: u32, height: u32) -> AccumulationBuffers {
        let len = (width * height) as usize;
        AccumulationBuffers {
            width,
            height,
            color_sums: vec![BLACK; len],
            sample_counts: vec![0; len],
            normal_sums: vec![WorldVector::zeros(); len],
            albedo_sums: vec![BLACK; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.color_sums.len()
    }

    pub fn reset(&mut self) {
        self.color_sums.fill(BLACK);
        self.sample_counts.fill(0);
        self.normal_sums.fill(WorldVector::zeros());
        self.albedo_sums.fill(BLACK);
    }

    /// The lowest sample count over all pixels; drives run completion.
    pub fn min_sample_count(&self) -> u32 {
        self.sample_counts.iter().copied().min().unwrap_or(0)
    }
}

/// Per-pixel counters, write-only during a batch and reduced once afterwards.
#[derive(Clone, Debug)]
pub struct DiagnosticsBuffer {
    pub attempted_samples: Vec<u32>,
    pub accepted_samples: Vec<u32>,
    pub bounces: Vec<u32>,
}

impl DiagnosticsBuffer {
    pub fn new(pixel_count: usize) -> DiagnosticsBuffer {
        DiagnosticsBuffer {
            attempted_samples: vec![0; pixel_count],
            accepted_samples: vec![0; pixel_count],
            bounces: vec![0; pixel_count],
        }
    }

    pub fn reset(&mut self) {
        self.attempted_samples.fill(0);
        self.accepted_samples.fill(0);
        self.bounces.fill(0);
    }

    /// One reduction pass after batch completion.
    pub fn reduce(&self) -> DiagnosticsSummary {
        let mut attempted = Stats::default();
        let mut accepted = Stats::default();
        let mut bounces = Stats::default();
        for i in 0..self.attempted_samples.len() {
            attempted.add_sample(self.attempted_samples[i] as u64);
            accepted.add_sample(self.accepted_samples[i] as u64);
            bounces.add_sample(self.bounces[i] as u64);
        }
        DiagnosticsSummary {
            attempted,
            accepted,
            bounces,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiagnosticsSummary {
    pub attempted: Stats,
    pub accepted: Stats,
    pub bounces: Stats,
}

/// Parameters of one accumulate batch.
#[derive(Clone, Debug)]
pub(crate) struct BatchParams {
    pub batch_index: u32,
    /// Which interlaced scanline subset this batch covers.
    pub phase: u32,
    pub interlacing: u32,
    pub samples: u32,
    pub trace_depth: u32,
    pub jitter: bool,
    pub seed: u64,
    pub dithered_seed: bool,
}

/// Runs `params.samples` integrator samples for every pixel of the batch's
/// scanline subset, summing into `buffers`.
///
/// Cancellation is cooperative at pixel granularity: a cancelled batch stops
/// picking up new pixels, and since every pixel publishes its sums atomically
/// at the end of its own sample loop there are no torn writes to worry about.
pub(crate) fn accumulate_batch(
    world: &World,
    camera: &Camera,
    params: &BatchParams,
    buffers: &mut AccumulationBuffers,
    diagnostics: &mut DiagnosticsBuffer,
    cancel: &CancelToken,
) {
    let width = buffers.width;
    let rows: Vec<u32> = (0..buffers.height)
        .filter(|y| y % params.interlacing == params.phase)
        .collect();

    let shared = Mutex::new((buffers, diagnostics));
    let shared = &shared;

    parallel_for_indices(rows.len(), |_worker, row_index| {
        let y = rows[row_index];
        let mut scratch = IntegratorScratch::default();

        for x in 0..width {
            if cancel.is_cancelled() {
                return;
            }

            let pixel = (y * width + x) as usize;
            let mut rng = SmallRng::seed_from_u64(pixel_seed(params, pixel as u64));

            let mut color_sum = BLACK;
            let mut normal_sum = WorldVector::zeros();
            let mut albedo_sum = BLACK;
            let mut accepted = 0u32;
            let mut bounces = 0u32;

            for _ in 0..params.samples {
                let time = rng.random_range(0.0..1.0f32);
                let ray = camera.sample_ray(
                    &ScreenPoint::new(x, y),
                    params.jitter,
                    time,
                    &mut rng,
                );
                if let Some(output) =
                    trace_sample(world, ray, params.trace_depth, &mut scratch, &mut rng)
                {
                    color_sum += output.color;
                    normal_sum += output.normal;
                    albedo_sum += output.albedo;
                    accepted += 1;
                    bounces += output.bounces;
                }
            }

            // Atomic publication of this pixel's whole batch.
            let mut guard = shared.lock().expect("accumulation lock poisoned");
            let (buffers, diagnostics) = &mut *guard;
            buffers.color_sums[pixel] += color_sum;
            buffers.sample_counts[pixel] += accepted;
            buffers.normal_sums[pixel] += normal_sum;
            buffers.albedo_sums[pixel] += albedo_sum;
            diagnostics.attempted_samples[pixel] += params.samples;
            diagnostics.accepted_samples[pixel] += accepted;
            diagnostics.bounces[pixel] += bounces;
        }
    });
}

/// Deterministic per-pixel, per-batch seed (splitmix-style finalizer).
fn pixel_seed(params: &BatchParams, pixel: u64) -> u64 {
    let mut x = params.seed ^ ((params.batch_index as u64) << 40) ^ pixel;
    if params.dithered_seed {
        // Golden-ratio scramble decorrelating neighboring pixels' sequences.
        x ^= pixel.wrapping_mul(0x9E3779B97F4A7C15);
    }
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58476D1CE4E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

/// Resolves running sums into per-pixel averages.
///
/// NaN/Inf sums and zero-sample pixels are never propagated: in diagnostic
/// mode they become the sentinel color, otherwise they resolve to zero.
pub(crate) fn combine_planes(
    color_sums: &[Rgb],
    sample_counts: &[u32],
    normal_sums: &[WorldVector],
    albedo_sums: &[Rgb],
    out_color: &mut [Rgb],
    out_normal: &mut [WorldVector],
    out_albedo: &mut [Rgb],
    sentinels: bool,
) {
    let len = out_color.len();
    if len == 0 {
        return;
    }
    let workers = num_cpus::get().clamp(1, len);
    let chunk_len = len.div_ceil(workers);

    thread::scope(|scope| {
        let chunks = izip!(
            out_color.chunks_mut(chunk_len),
            out_normal.chunks_mut(chunk_len),
            out_albedo.chunks_mut(chunk_len),
        );

        for (chunk_index, (color, normal, albedo)) in chunks.enumerate() {
            let start = chunk_index * chunk_len;
            scope.spawn(move || {
                for i in 0..color.len() {
                    let pixel = start + i;
                    let count = sample_counts[pixel];
                    if count == 0 {
                        color[i] = if sentinels { SENTINEL } else { BLACK };
                        normal[i] = WorldVector::zeros();
                        albedo[i] = BLACK;
                        continue;
                    }

                    let scale = 1.0 / count as FloatType;
                    let averaged = color_sums[pixel] * scale;
                    color[i] = if is_finite(averaged) {
                        averaged
                    } else if sentinels {
                        SENTINEL
                    } else {
                        BLACK
                    };

                    let averaged_normal = normal_sums[pixel] * scale;
                    normal[i] = if averaged_normal.iter().all(|x| x.is_finite()) {
                        averaged_normal
                    } else {
                        WorldVector::zeros()
                    };

                    let averaged_albedo = albedo_sums[pixel] * scale;
                    albedo[i] = if is_finite(averaged_albedo) {
                        averaged_albedo
                    } else {
                        BLACK
                    };
                }
            });
        }
    });
}

/// Finalized 8-bit output images, ready for the host display.
#[derive(Clone, Debug)]
pub struct FinalFrame {
    pub width: u32,
    pub height: u32,
    pub batch_index: u32,
    pub color: Vec<Rgba8>,
    pub normal: Vec<Rgba8>,
    pub albedo: Vec<Rgba8>,
}

impl FinalFrame {
    pub fn color_image(&self) -> image::RgbaImage {
        plane_to_image(&self.color, self.width, self.height)
    }

    pub fn normal_image(&self) -> image::RgbaImage {
        plane_to_image(&self.normal, self.width, self.height)
    }

    pub fn albedo_image(&self) -> image::RgbaImage {
        plane_to_image(&self.albedo, self.width, self.height)
    }
}

fn plane_to_image(plane: &[Rgba8], width: u32, height: u32) -> image::RgbaImage {
    let bytes: &[u8] = bytemuck::cast_slice(plane);
    image::RgbaImage::from_raw(width, height, bytes.to_vec())
        .expect("plane dimensions match the byte count")
}

/// Gamma-encodes and quantizes the resolved planes to 8-bit RGBA.
pub(crate) fn finalize_frame(
    color: &[Rgb],
    normal: &[WorldVector],
    albedo: &[Rgb],
    width: u32,
    height: u32,
    batch_index: u32,
    debug_visualization: DebugVisualization,
) -> FinalFrame {
    let len = color.len();
    let mut out_color = vec![Rgba8::new(0, 0, 0, 255); len];
    let mut out_normal = vec![Rgba8::new(0, 0, 0, 255); len];
    let mut out_albedo = vec![Rgba8::new(0, 0, 0, 255); len];

    let workers = num_cpus::get().clamp(1, len.max(1));
    let chunk_len = len.div_ceil(workers).max(1);

    thread::scope(|scope| {
        let chunks = izip!(
            out_color.chunks_mut(chunk_len),
            out_normal.chunks_mut(chunk_len),
            out_albedo.chunks_mut(chunk_len),
        );

        for (chunk_index, (color_out, normal_out, albedo_out)) in chunks.enumerate() {
            let start = chunk_index * chunk_len;
            scope.spawn(move || {
                for i in 0..color_out.len() {
                    let pixel = start + i;
                    normal_out[i] = encode_normal(&normal[pixel]);
                    albedo_out[i] = encode_gamma(albedo[pixel]);
                    color_out[i] = match debug_visualization {
                        DebugVisualization::Normals => normal_out[i],
                        DebugVisualization::Albedo => albedo_out[i],
                        _ => encode_gamma(color[pixel]),
                    };
                }
            });
        }
    });

    FinalFrame {
        width,
        height,
        batch_index,
        color: out_color,
        normal: out_normal,
        albedo: out_albedo,
    }
}

fn encode_gamma(color: Rgb) -> Rgba8 {
    let quantize =
        |x: FloatType| (x.max(0.0).powf(1.0 / GAMMA) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba8::new(quantize(color.r), quantize(color.g), quantize(color.b), 255)
}

fn encode_normal(normal: &WorldVector) -> Rgba8 {
    let quantize = |x: FloatType| ((x * 0.5 + 0.5) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba8::new(quantize(normal.x), quantize(normal.y), quantize(normal.z), 255)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::geometry::{ScreenSize, WorldPoint};
    use crate::material::{Material, Texture};
    use crate::scene::primitives::{Primitive, Sphere};
    use crate::scene::{Entity, Environment, Transform, World};
    use assert2::assert;

    #[test]
    fn combine_averages_sums() {
        let color_sums = vec![Rgb::new(2.0, 4.0, 8.0)];
        let counts = vec![4u32];
        let normals = vec![WorldVector::new(0.0, 4.0, 0.0)];
        let albedos = vec![Rgb::new(1.0, 1.0, 1.0)];

        let mut out_color = vec![BLACK];
        let mut out_normal = vec![WorldVector::zeros()];
        let mut out_albedo = vec![BLACK];
        combine_planes(
            &color_sums,
            &counts,
            &normals,
            &albedos,
            &mut out_color,
            &mut out_normal,
            &mut out_albedo,
            false,
        );

        assert!(out_color[0] == Rgb::new(0.5, 1.0, 2.0));
        assert!(out_normal[0] == WorldVector::new(0.0, 1.0, 0.0));
        assert!(out_albedo[0] == Rgb::new(0.25, 0.25, 0.25));
    }

    #[test]
    fn combine_scrubs_nan_to_zero_in_normal_mode() {
        let color_sums = vec![Rgb::new(FloatType::NAN, 0.0, 0.0)];
        let counts = vec![1u32];
        let normals = vec![WorldVector::zeros()];
        let albedos = vec![BLACK];

        let mut out_color = vec![Rgb::new(9.0, 9.0, 9.0)];
        let mut out_normal = vec![WorldVector::zeros()];
        let mut out_albedo = vec![BLACK];
        combine_planes(
            &color_sums,
            &counts,
            &normals,
            &albedos,
            &mut out_color,
            &mut out_normal,
            &mut out_albedo,
            false,
        );

        assert!(out_color[0] == BLACK);
    }

    #[test]
    fn combine_flags_nan_and_empty_pixels_in_diagnostic_mode() {
        let color_sums = vec![Rgb::new(FloatType::NAN, 0.0, 0.0), BLACK];
        let counts = vec![1u32, 0u32];
        let normals = vec![WorldVector::zeros(); 2];
        let albedos = vec![BLACK; 2];

        let mut out_color = vec![BLACK; 2];
        let mut out_normal = vec![WorldVector::zeros(); 2];
        let mut out_albedo = vec![BLACK; 2];
        combine_planes(
            &color_sums,
            &counts,
            &normals,
            &albedos,
            &mut out_color,
            &mut out_normal,
            &mut out_albedo,
            true,
        );

        assert!(out_color[0] == SENTINEL);
        assert!(out_color[1] == SENTINEL);
    }

    #[test]
    fn finalize_gamma_endpoints_are_exact() {
        let color = vec![BLACK, Rgb::new(1.0, 1.0, 1.0)];
        let normal = vec![WorldVector::zeros(); 2];
        let albedo = vec![BLACK; 2];

        let frame = finalize_frame(
            &color,
            &normal,
            &albedo,
            2,
            1,
            0,
            DebugVisualization::None,
        );

        assert!(frame.color[0] == Rgba8::new(0, 0, 0, 255));
        assert!(frame.color[1] == Rgba8::new(255, 255, 255, 255));
        // Zero normal encodes to mid-gray.
        assert!(frame.normal[0] == Rgba8::new(128, 128, 128, 255));
    }

    #[test]
    fn finalize_normals_mode_swaps_the_beauty_plane() {
        let color = vec![Rgb::new(1.0, 0.0, 0.0)];
        let normal = vec![WorldVector::new(1.0, 0.0, 0.0)];
        let albedo = vec![BLACK];

        let frame = finalize_frame(
            &color,
            &normal,
            &albedo,
            1,
            1,
            0,
            DebugVisualization::Normals,
        );

        assert!(frame.color[0] == frame.normal[0]);
    }

    #[test]
    fn frame_converts_to_image() {
        let frame = FinalFrame {
            width: 2,
            height: 2,
            batch_index: 0,
            color: vec![Rgba8::new(1, 2, 3, 255); 4],
            normal: vec![Rgba8::new(0, 0, 0, 255); 4],
            albedo: vec![Rgba8::new(0, 0, 0, 255); 4],
        };
        let image = frame.color_image();
        assert!(image.dimensions() == (2, 2));
        assert!(image.get_pixel(1, 1).0 == [1, 2, 3, 255]);
    }

    #[test]
    fn diagnostics_reduce_summarizes() {
        let mut diagnostics = DiagnosticsBuffer::new(3);
        diagnostics.attempted_samples.copy_from_slice(&[4, 4, 4]);
        diagnostics.accepted_samples.copy_from_slice(&[4, 2, 0]);
        diagnostics.bounces.copy_from_slice(&[8, 3, 0]);

        let summary = diagnostics.reduce();
        assert!(summary.attempted.sum == 12);
        assert!(summary.accepted.min == 0);
        assert!(summary.accepted.max == 4);
        assert!(summary.bounces.sum == 11);
    }

    fn batch_world() -> World {
        World::build(
            vec![Entity {
                primitive: Primitive::Sphere(Sphere {
                    center: WorldPoint::new(0.0, 0.0, -4.0),
                    radius: 1.0,
                }),
                transform: Transform::identity(),
                material: 0usize.into(),
            }],
            vec![Material::Lambertian {
                albedo: Texture::Solid(Rgb::new(0.5, 0.4, 0.3)),
            }],
            Environment::Uniform(Rgb::new(0.7, 0.7, 0.7)),
        )
        .unwrap()
    }

    fn batch_camera(width: u32, height: u32) -> Camera {
        Camera::builder()
            .center(WorldPoint::origin())
            .forward(crate::geometry::WorldVector::new(0.0, 0.0, -1.0))
            .up(crate::geometry::WorldVector::new(0.0, 1.0, 0.0))
            .resolution(ScreenSize::new(width, height))
            .vertical_fov_degrees(60.0)
            .build()
    }

    fn batch_params(batch_index: u32, phase: u32, interlacing: u32) -> BatchParams {
        BatchParams {
            batch_index,
            phase,
            interlacing,
            samples: 2,
            trace_depth: 3,
            jitter: false,
            seed: 11,
            dithered_seed: false,
        }
    }

    /// Canceling a batch before its body executes must leave the accumulation
    /// buffers bit-identical to their pre-batch state.
    #[test]
    fn cancelled_batch_leaves_buffers_bit_identical() {
        let world = batch_world();
        let camera = batch_camera(4, 4);
        let mut buffers = AccumulationBuffers::new(4, 4);
        let mut diagnostics = DiagnosticsBuffer::new(16);

        // Seed the buffers with one real batch so the comparison is not
        // trivially all-zeros.
        accumulate_batch(
            &world,
            &camera,
            &batch_params(0, 0, 1),
            &mut buffers,
            &mut diagnostics,
            &CancelToken::new(),
        );

        let color_before = buffers.color_sums.clone();
        let counts_before = buffers.sample_counts.clone();
        let normals_before = buffers.normal_sums.clone();
        let albedo_before = buffers.albedo_sums.clone();

        let cancelled = CancelToken::new();
        cancelled.cancel();
        accumulate_batch(
            &world,
            &camera,
            &batch_params(1, 0, 1),
            &mut buffers,
            &mut diagnostics,
            &cancelled,
        );

        assert!(buffers.color_sums == color_before);
        assert!(buffers.sample_counts == counts_before);
        assert!(buffers.normal_sums == normals_before);
        assert!(buffers.albedo_sums == albedo_before);
    }

    #[test]
    fn interlaced_batch_touches_only_its_phase_rows() {
        let world = batch_world();
        let camera = batch_camera(4, 4);
        let mut buffers = AccumulationBuffers::new(4, 4);
        let mut diagnostics = DiagnosticsBuffer::new(16);

        accumulate_batch(
            &world,
            &camera,
            &batch_params(0, 1, 2),
            &mut buffers,
            &mut diagnostics,
            &CancelToken::new(),
        );

        for y in 0..4u32 {
            for x in 0..4u32 {
                let pixel = (y * 4 + x) as usize;
                if y % 2 == 1 {
                    assert!(diagnostics.attempted_samples[pixel] == 2);
                } else {
                    assert!(diagnostics.attempted_samples[pixel] == 0);
                    assert!(buffers.sample_counts[pixel] == 0);
                }
            }
        }
    }

    #[test]
    fn fixed_seed_batches_are_deterministic() {
        let world = batch_world();
        let camera = batch_camera(6, 6);

        let run = || {
            let mut buffers = AccumulationBuffers::new(6, 6);
            let mut diagnostics = DiagnosticsBuffer::new(36);
            accumulate_batch(
                &world,
                &camera,
                &batch_params(0, 0, 1),
                &mut buffers,
                &mut diagnostics,
                &CancelToken::new(),
            );
            buffers
        };

        let a = run();
        let b = run();
        assert!(a.color_sums == b.color_sums);
        assert!(a.sample_counts == b.sample_counts);
        assert!(a.normal_sums == b.normal_sums);
        assert!(a.albedo_sums == b.albedo_sums);
    }

    #[test]
    fn sample_counts_are_monotone_across_batches() {
        let world = batch_world();
        let camera = batch_camera(4, 4);
        let mut buffers = AccumulationBuffers::new(4, 4);
        let mut diagnostics = DiagnosticsBuffer::new(16);

        accumulate_batch(
            &world,
            &camera,
            &batch_params(0, 0, 1),
            &mut buffers,
            &mut diagnostics,
            &CancelToken::new(),
        );
        let counts_after_one = buffers.sample_counts.clone();

        accumulate_batch(
            &world,
            &camera,
            &batch_params(1, 0, 1),
            &mut buffers,
            &mut diagnostics,
            &CancelToken::new(),
        );

        for (before, after) in counts_after_one.iter().zip(buffers.sample_counts.iter()) {
            assert!(after >= before);
        }
    }

    #[test]
    fn pixel_seed_is_deterministic_and_batch_dependent() {
        let params = BatchParams {
            batch_index: 3,
            phase: 0,
            interlacing: 1,
            samples: 1,
            trace_depth: 4,
            jitter: false,
            seed: 42,
            dithered_seed: false,
        };
        assert!(pixel_seed(&params, 7) == pixel_seed(&params, 7));
        assert!(pixel_seed(&params, 7) != pixel_seed(&params, 8));

        let mut next_batch = params.clone();
        next_batch.batch_index = 4;
        assert!(pixel_seed(&params, 7) != pixel_seed(&next_batch, 7));
    }
}
