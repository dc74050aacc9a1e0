use assert2::assert;
use bon::bon;
use nalgebra::Unit;
use rand_distr::Distribution as _;

use crate::geometry::{EPSILON, FloatType, Ray, ScreenPoint, ScreenSize, WorldPoint, WorldVector};

/// Thin-lens pinhole camera. Pose and field of view come from the host; the
/// camera only turns pixel coordinates into rays.
#[derive(Copy, Clone, Debug)]
pub struct Camera {
    center: WorldPoint,

    resolution: ScreenSize,

    forward: Unit<WorldVector>,
    up: Unit<WorldVector>,
    right: Unit<WorldVector>,

    vertical_fov_degrees: FloatType,
    lens_radius: FloatType,
    focus_distance: FloatType,

    /// World-space position of the top-left viewport corner on the focus plane.
    viewport_origin: WorldPoint,
    /// World-space step per pixel along the image x axis.
    pixel_delta_u: WorldVector,
    /// World-space step per pixel along the image y axis (points down).
    pixel_delta_v: WorldVector,
}

#[bon]
impl Camera {
    #[builder]
    pub fn new(
        center: WorldPoint,
        forward: WorldVector,
        up: WorldVector,
        resolution: ScreenSize,
        vertical_fov_degrees: FloatType,
        #[builder(default = 0.0)] aperture: FloatType,
        #[builder(default = 1.0)] focus_distance: FloatType,
    ) -> Self {
        let forward = Unit::try_new(forward, EPSILON).expect("Forward vector must be non-zero");
        let up = Unit::try_new(up, EPSILON).expect("Up vector must be non-zero");
        let right = Unit::try_new(forward.cross(&up), EPSILON)
            .expect("`up` and `forward` must be linearly independent");
        let up = Unit::new_normalize(right.cross(&forward));

        assert!(resolution.x > 0);
        assert!(resolution.y > 0);
        assert!(vertical_fov_degrees > 0.0 && vertical_fov_degrees < 180.0);
        assert!(aperture >= 0.0);
        assert!(focus_distance > 0.0);

        let viewport_height =
            2.0 * (vertical_fov_degrees.to_radians() / 2.0).tan() * focus_distance;
        let viewport_width = viewport_height * (resolution.x as FloatType)
            / (resolution.y as FloatType);

        let pixel_delta_u = right.as_ref() * (viewport_width / resolution.x as FloatType);
        let pixel_delta_v = -up.as_ref() * (viewport_height / resolution.y as FloatType);
        let viewport_origin = center + forward.as_ref() * focus_distance
            - right.as_ref() * (viewport_width / 2.0)
            + up.as_ref() * (viewport_height / 2.0)
            + (pixel_delta_u + pixel_delta_v) / 2.0;

        Camera {
            center,

            resolution,

            forward,
            up,
            right,

            vertical_fov_degrees,
            lens_radius: aperture / 2.0,
            focus_distance,

            viewport_origin,
            pixel_delta_u,
            pixel_delta_v,
        }
    }
}

impl Camera {
    pub fn get_resolution(&self) -> ScreenSize {
        self.resolution
    }

    /// The same camera rendering at a different resolution (resolution-scale
    /// support; the viewport is recomputed to keep the aspect ratio honest).
    pub fn with_resolution(&self, resolution: ScreenSize) -> Camera {
        Camera::builder()
            .center(self.center)
            .forward(self.forward.into_inner())
            .up(self.up.into_inner())
            .resolution(resolution)
            .vertical_fov_degrees(self.vertical_fov_degrees)
            .aperture(self.lens_radius * 2.0)
            .focus_distance(self.focus_distance)
            .build()
    }

    /// Samples a ray for the given image pixel. With `jitter` off and a zero
    /// aperture the ray is fully deterministic and the rng is never touched.
    pub fn sample_ray(
        &self,
        point: &ScreenPoint,
        jitter: bool,
        time: FloatType,
        rng: &mut impl rand::Rng,
    ) -> Ray {
        let (offset_u, offset_v) = if jitter {
            (
                rng.random_range(-0.5..=0.5f32),
                rng.random_range(-0.5..=0.5f32),
            )
        } else {
            (0.0, 0.0)
        };

        let film_point = self.viewport_origin
            + self.pixel_delta_u * (point.x as FloatType + offset_u)
            + self.pixel_delta_v * (point.y as FloatType + offset_v);

        let origin = if self.lens_radius > 0.0 {
            let lens_uv: [FloatType; 2] = rand_distr::UnitDisc.sample(rng);
            self.center
                + self.right.as_ref() * (self.lens_radius * lens_uv[0])
                + self.up.as_ref() * (self.lens_radius * lens_uv[1])
        } else {
            self.center
        };

        Ray::new(origin, film_point - origin, time)
    }
}
