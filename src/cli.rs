use std::time::Duration;

use glint::{
    Camera, DenoiseMode, Entity, Environment, RenderEngine, RenderSettings, Rgb, Transform, World,
    geometry::{ScreenSize, WorldPoint, WorldVector},
    material::{Material, Texture},
    scene::primitives::{Axis, BoxShape, Primitive, Rect, Sphere},
};

use indicatif::ProgressBar;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let camera = Camera::builder()
        .center(WorldPoint::new(278.0, 278.0, -800.0))
        .forward(WorldVector::new(0.0, 0.0, 1.0))
        .up(WorldVector::new(0.0, 1.0, 0.0))
        .resolution(ScreenSize::new(512, 512))
        .vertical_fov_degrees(40.0)
        .build();

    let settings = RenderSettings::builder()
        .target_samples_per_pixel(64)
        .min_batch_samples(1)
        .max_batch_samples(16)
        .trace_depth(8)
        .interlacing(2)
        .denoise_mode(DenoiseMode::Guided)
        .max_duration(Duration::from_secs(120))
        .save_on_completion(true)
        .seed(1)
        .build();

    let mut engine = RenderEngine::new(cornell_box()?, camera, settings);

    let bar = ProgressBar::new(engine.settings().target_samples_per_pixel as u64);
    let mut latest_frame = None;
    loop {
        let status = engine.tick();
        bar.set_position(status.min_attempted_samples.min(status.target_samples) as u64);
        if let Some(frame) = engine.poll_frame() {
            latest_frame = Some(frame);
        }
        if status.complete || (status.stopping && status.outstanding_jobs == 0) {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    bar.finish();

    println!("diagnostics: bounces {}", engine.diagnostics().bounces);

    if engine.settings().save_on_completion
        && let Some(frame) = latest_frame
    {
        frame.color_image().save("render.png")?;
        frame.normal_image().save("render-normal.png")?;
        frame.albedo_image().save("render-albedo.png")?;
        println!("saved render.png ({}x{})", frame.width, frame.height);
    }

    Ok(())
}

/// The classic box scene: one area light, matte walls, a metal and a glass
/// sphere, a smoke box and one motion-blurred sphere.
fn cornell_box() -> anyhow::Result<World> {
    let white = Material::Lambertian {
        albedo: Texture::Solid(Rgb::new(0.73, 0.73, 0.73)),
    };
    let red = Material::Lambertian {
        albedo: Texture::Solid(Rgb::new(0.65, 0.05, 0.05)),
    };
    let green = Material::Lambertian {
        albedo: Texture::Solid(Rgb::new(0.12, 0.45, 0.15)),
    };
    let checker = Material::Lambertian {
        albedo: Texture::Checker {
            even: Rgb::new(0.73, 0.73, 0.73),
            odd: Rgb::new(0.2, 0.3, 0.1),
            scale: 0.02,
        },
    };
    let light = Material::DiffuseLight {
        emission: Rgb::new(15.0, 15.0, 15.0),
    };
    let metal = Material::Metal {
        albedo: Rgb::new(0.8, 0.85, 0.88),
        fuzz: 0.05,
    };
    let glass = Material::Dielectric {
        refractive_index: 1.5,
    };
    let smoke = Material::ProbabilisticVolume {
        albedo: Rgb::new(0.8, 0.8, 0.8),
        density: 0.01,
    };
    let materials = vec![white, red, green, checker, light, metal, glass, smoke];

    let wall = |axis, offset, material: usize| Entity {
        primitive: Primitive::Rect(Rect {
            axis,
            offset,
            low: (0.0, 0.0),
            high: (555.0, 555.0),
        }),
        transform: Transform::identity(),
        material: material.into(),
    };

    let entities = vec![
        wall(Axis::X, 555.0, 2), // green left wall
        wall(Axis::X, 0.0, 1),   // red right wall
        wall(Axis::Y, 0.0, 3),   // checker floor
        wall(Axis::Y, 555.0, 0), // white ceiling
        wall(Axis::Z, 555.0, 0), // white back wall
        Entity {
            primitive: Primitive::Rect(Rect {
                axis: Axis::Y,
                offset: 554.0,
                low: (213.0, 227.0),
                high: (343.0, 332.0),
            }),
            transform: Transform::identity(),
            material: 4usize.into(),
        },
        Entity {
            primitive: Primitive::Sphere(Sphere {
                center: WorldPoint::new(190.0, 90.0, 190.0),
                radius: 90.0,
            }),
            transform: Transform::identity(),
            material: 6usize.into(),
        },
        Entity {
            primitive: Primitive::Sphere(Sphere {
                center: WorldPoint::new(400.0, 90.0, 300.0),
                radius: 90.0,
            }),
            transform: Transform::Moving {
                origin: WorldVector::zeros(),
                offset: WorldVector::new(0.0, 20.0, 0.0),
                time_range: 0.0..1.0,
            },
            material: 5usize.into(),
        },
        Entity {
            primitive: Primitive::Box(BoxShape {
                min: WorldPoint::new(100.0, 0.0, 350.0),
                max: WorldPoint::new(250.0, 150.0, 500.0),
            }),
            transform: Transform::identity(),
            material: 7usize.into(),
        },
    ];

    Ok(World::build(
        entities,
        materials,
        Environment::Uniform(Rgb::new(0.0, 0.0, 0.0)),
    )?)
}
