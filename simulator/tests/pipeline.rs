use approx::assert_abs_diff_eq;
use mslice_common::{parse_toml, PotentialSource};
use mslice_simulator::simulation_object::{load_volume, parameters_from_toml, SimulationObject};
use ndarray::{Array2, Array3};
use ndarray_npy::{read_npy, write_npy};
use std::path::{Path, PathBuf};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mslice-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A small ball of potential in the middle of an otherwise empty unbinned volume
fn write_volume(path: &Path) -> Array3<f32> {
    let volume = Array3::from_shape_fn((12, 32, 32), |(_, i, j)| {
        let r2 = (i as f32 - 16.0).powi(2) + (j as f32 - 16.0).powi(2);
        if r2 < 25.0 {
            5.0
        } else {
            0.0
        }
    });
    write_npy(path, &volume).unwrap();
    volume
}

#[test]
fn test_pipeline_from_unbinned_volume() {
    let dir = scratch_dir("pipeline");
    let volume_path = dir.join("volume.npy");
    let unbinned = write_volume(&volume_path);

    let toml = format!(
        r#"
        sim_name = "ball"
        prebinned = false
        output_dir = "{}"
        defocus_series = [-1.5, 0.0]
        dose = 50.0
        zernike = true
        seeds = "3, 7"

        [source]
        type = "Local"
        path = "{}"
        "#,
        dir.join("out").display(),
        volume_path.display(),
    );
    let toml = parse_toml(&toml).unwrap();
    assert!(matches!(toml.source, PotentialSource::Local { .. }));

    let streams = parameters_from_toml::<f64>(&toml);
    assert_eq!(streams.len(), 2);

    // binned 6 x 2 x 2 on load
    let volume = load_volume(&streams[0]).unwrap();
    assert_eq!(volume.dim(), (2, 16, 16));
    // z is summed, xy averaged, so the projected potential is preserved per unit area
    assert_abs_diff_eq!(volume.sum(), unbinned.sum() as f64 / 4.0, epsilon = 1e-6);

    for parameters in streams {
        let simulation = SimulationObject::new(volume.clone(), parameters);
        let output = simulation.run().unwrap();
        assert_eq!(output.exit_wave.dim(), (16, 16));
        assert_eq!(output.realisations.len(), 2);
        simulation.dump(&output).unwrap();

        let out = simulation.output_path();
        for seed in [3, 7] {
            let image: Array2<u64> = read_npy(out.join(format!("image_seed{seed}.npy"))).unwrap();
            assert_eq!(image.dim(), (16, 16));
            assert!(image.iter().any(|&c| c > 0));
            assert!(out.join(format!("zernike_seed{seed}.npy")).is_file());

            let figure: Array2<f64> =
                read_npy(out.join(format!("figure_seed{seed}.npy"))).unwrap();
            assert_eq!(figure.dim(), (16, 48));
        }
        let projected: Array2<f64> = read_npy(out.join("projected_potential.npy")).unwrap();
        assert_abs_diff_eq!(projected.sum(), volume.sum(), epsilon = 1e-9);
    }
    assert!(dir.join("out").join("ball-defocus-1.50um").is_dir());
    assert!(dir.join("out").join("ball-defocus+0.00um").is_dir());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_same_seed_same_image() {
    let toml = parse_toml("sim_name = \"repeat\"\nseeds = \"5, 5\"\ndose = 20.0").unwrap();
    let parameters = parameters_from_toml::<f32>(&toml).remove(0);
    let volume = Array3::from_shape_fn((3, 16, 16), |(k, i, j)| ((k + i * j) % 7) as f32);

    let simulation = SimulationObject::new(volume, parameters);
    let output = simulation.run().unwrap();
    assert_eq!(output.realisations[0].image, output.realisations[1].image);
    assert!(output.realisations[0].zernike.is_none());
}

#[test]
fn test_empty_potential_gives_uniform_expected_counts() {
    let toml = parse_toml("sim_name = \"vacuum\"\ndose = 30.0").unwrap();
    let parameters = parameters_from_toml::<f64>(&toml).remove(0);
    let simulation = SimulationObject::new(Array3::zeros((4, 8, 8)), parameters);

    let output = simulation.run().unwrap();
    let expected = simulation.imaging.expected_counts(&output.exit_wave);
    let (sx, sy) = simulation.parameters.sampling;
    for &counts in expected.iter() {
        assert_abs_diff_eq!(counts, sx * sy * 30.0, epsilon = 1e-9);
    }
}

#[test]
fn test_missing_local_volume_is_an_error() {
    let toml = parse_toml(
        r#"
        sim_name = "missing"
        [source]
        type = "Local"
        path = "/definitely/not/here.npy"
        "#,
    )
    .unwrap();
    let parameters = parameters_from_toml::<f64>(&toml).remove(0);
    assert!(load_volume(&parameters).is_err());
}

#[test]
fn test_volume_with_nans_is_rejected() {
    let dir = scratch_dir("nans");
    let path = dir.join("nans.npy");
    let mut volume = Array3::<f64>::ones((2, 4, 4));
    volume[(1, 2, 3)] = f64::NAN;
    write_npy(&path, &volume).unwrap();

    let toml = parse_toml(&format!(
        "sim_name = \"nans\"\n[source]\ntype = \"Local\"\npath = \"{}\"",
        path.display()
    ))
    .unwrap();
    let parameters = parameters_from_toml::<f64>(&toml).remove(0);
    assert!(load_volume(&parameters).is_err());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[cfg(feature = "remote-data")]
#[test]
fn test_failed_download_leaves_no_file() {
    use mslice_simulator::utils::error::RuntimeError;

    let dir = scratch_dir("unreachable");
    let toml = parse_toml(&format!(
        r#"
        sim_name = "unreachable"
        [source]
        type = "Remote"
        url = "http://127.0.0.1:9/"
        cache_dir = "{}"
        "#,
        dir.display()
    ))
    .unwrap();
    let parameters = parameters_from_toml::<f64>(&toml).remove(0);

    let result = load_volume(&parameters);
    assert!(matches!(result, Err(RuntimeError::MissingPotential { .. })));
    assert!(!parameters.source.local_path().exists());

    std::fs::remove_dir_all(&dir).unwrap();
}
