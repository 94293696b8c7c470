use nalgebra::Vector3;

use voxel_compare::{
    ComparisonConfig, ComparisonMethod, EntireVolume, RoiMask, ValueRange, compare_pixels,
    volume_builder::VolumeBuilder,
};

/// Gaussian "dose" blob centred at `centre`.
fn dose(centre: Vector3<f64>, scale: f64) -> impl Fn(&Vector3<f64>) -> f32 {
    move |p: &Vector3<f64>| (scale * (-(p - centre).norm_squared() / 150.0).exp()) as f32
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let centre = Vector3::new(24.0, 24.0, 12.0);
    let reference = VolumeBuilder::from_fn(
        (24, 48, 48),
        (1.0, 1.0, 1.0),
        Vector3::zeros(),
        dose(centre, 100.0),
    )
    .expect("should have built reference volume");
    // Shifted by half a voxel and scaled by 2%.
    let test = VolumeBuilder::from_fn(
        (12, 24, 24),
        (2.0, 2.0, 2.0),
        Vector3::new(0.5, 0.5, 0.0),
        dose(centre + Vector3::new(0.5, 0.0, 0.0), 102.0),
    )
    .expect("should have built test volume");

    let rois: [&dyn RoiMask; 1] = [&EntireVolume];
    for method in [
        ComparisonMethod::Discrepancy,
        ComparisonMethod::DistanceToAgreement,
        ComparisonMethod::GammaIndex,
    ] {
        let config = ComparisonConfig {
            method,
            test_range: ValueRange::new(5.0, f64::INFINITY),
            ..ComparisonConfig::default()
        };
        let mut tests = [test.clone()];
        let summaries = compare_pixels(&mut tests, &[&reference], &rois, &config)
            .expect("should have compared volumes");
        println!(
            "{}: {:?}, window {:?}",
            tests[0].description().unwrap_or(""),
            summaries[0],
            tests[0].window()
        );
    }
}
