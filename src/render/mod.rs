mod accumulation;
mod denoise;
mod engine;
mod integrator;
pub mod pipeline;

pub use accumulation::{AccumulationBuffers, DiagnosticsBuffer, DiagnosticsSummary, FinalFrame};
pub use denoise::{DenoiseError, DenoiseMode, Denoiser};
pub use engine::{EngineStatus, RenderEngine};

use std::time::Duration;

use assert2::assert;
use bon::bon;

use crate::geometry::FloatType;

/// Upper bound on `trace_depth`; per-bounce stacks are sized for this.
pub const MAX_TRACE_DEPTH: u32 = 32;

/// What combine/finalize visualize instead of beauty output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum DebugVisualization {
    #[default]
    None,
    /// Beauty output with sentinel colors for zero-sample and NaN pixels.
    Diagnostics,
    Normals,
    Albedo,
}

impl DebugVisualization {
    /// Whether combine should flag anomalies with sentinel colors instead of
    /// silently zeroing them.
    pub fn wants_sentinels(self) -> bool {
        self != DebugVisualization::None
    }
}

/// The full configuration surface of a render run.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub resolution_scale: FloatType,
    pub target_samples_per_pixel: u32,
    /// Samples per pixel in the first batch; doubles per batch up to
    /// `max_batch_samples`.
    pub min_batch_samples: u32,
    pub max_batch_samples: u32,
    pub trace_depth: u32,
    /// Each accumulate batch covers every `interlacing`-th scanline, cycling
    /// through the phases, to bound per-batch latency.
    pub interlacing: u32,
    pub jitter: bool,
    pub seed: u64,
    /// Decorrelates neighboring pixels' sequences with a per-pixel seed hash.
    pub dithered_seed: bool,
    pub denoise_mode: DenoiseMode,
    pub max_duration: Option<Duration>,
    pub stop_on_completion: bool,
    /// Surfaced to the host; the engine itself never touches the filesystem.
    pub save_on_completion: bool,
    pub debug_visualization: DebugVisualization,
}

#[bon]
impl RenderSettings {
    #[builder]
    pub fn new(
        #[builder(default = 1.0)] resolution_scale: FloatType,
        #[builder(default = 256)] target_samples_per_pixel: u32,
        #[builder(default = 1)] min_batch_samples: u32,
        #[builder(default = 16)] max_batch_samples: u32,
        #[builder(default = 8)] trace_depth: u32,
        #[builder(default = 1)] interlacing: u32,
        #[builder(default = true)] jitter: bool,
        #[builder(default = 0)] seed: u64,
        #[builder(default = false)] dithered_seed: bool,
        #[builder(default = DenoiseMode::None)] denoise_mode: DenoiseMode,
        max_duration: Option<Duration>,
        #[builder(default = true)] stop_on_completion: bool,
        #[builder(default = false)] save_on_completion: bool,
        #[builder(default = DebugVisualization::None)] debug_visualization: DebugVisualization,
    ) -> Self {
        assert!(resolution_scale > 0.0);
        assert!(target_samples_per_pixel > 0);
        assert!(min_batch_samples > 0);
        assert!(max_batch_samples >= min_batch_samples);
        assert!(trace_depth > 0 && trace_depth <= MAX_TRACE_DEPTH);
        assert!(interlacing > 0);

        RenderSettings {
            resolution_scale,
            target_samples_per_pixel,
            min_batch_samples,
            max_batch_samples,
            trace_depth,
            interlacing,
            jitter,
            seed,
            dithered_seed,
            denoise_mode,
            max_duration,
            stop_on_completion,
            save_on_completion,
            debug_visualization,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings::builder().build()
    }
}
