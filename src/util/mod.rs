mod parallel;
mod stats;

pub use parallel::parallel_for_indices;
pub use stats::Stats;

use crate::geometry::FloatType;

pub type Rgb = rgb::RGB<FloatType>;
pub type Rgba8 = rgb::RGBA<u8>;

pub const BLACK: Rgb = Rgb {
    r: 0.0,
    g: 0.0,
    b: 0.0,
};

pub const WHITE: Rgb = Rgb {
    r: 1.0,
    g: 1.0,
    b: 1.0,
};

/// Componentwise product of two colors (filtering `b` through `a`).
pub fn modulate(a: Rgb, b: Rgb) -> Rgb {
    Rgb {
        r: a.r * b.r,
        g: a.g * b.g,
        b: a.b * b.b,
    }
}

pub fn lerp(a: Rgb, b: Rgb, t: FloatType) -> Rgb {
    a * (1.0 - t) + b * t
}

pub fn is_finite(color: Rgb) -> bool {
    color.r.is_finite() && color.g.is_finite() && color.b.is_finite()
}

pub fn is_black(color: Rgb) -> bool {
    color.r == 0.0 && color.g == 0.0 && color.b == 0.0
}
