mod camera;
pub mod geometry;
pub mod material;
pub mod render;
pub mod scene;
mod util;

pub use camera::Camera;
pub use render::{
    DebugVisualization, DenoiseError, DenoiseMode, Denoiser, EngineStatus, FinalFrame,
    RenderEngine, RenderSettings,
};
pub use scene::{Entity, Environment, SceneError, Transform, World};
pub use util::{Rgb, Rgba8, Stats};
