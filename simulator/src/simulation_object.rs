use anyhow::{Context, Result};
use ndarray::{Array2, Array3};
use rand::{rngs::StdRng, SeedableRng};
use rustfft::num_complex::Complex;
use std::fmt::Display;
use std::path::PathBuf;

use crate::{
    ctf::CTF,
    display::{figure_panels, normalize_for_display, ScaleBar},
    imaging::ImageFormation,
    potential::{bin_volume, PotentialArray},
    utils::{
        error::RuntimeError,
        grid::check_for_nans,
        io::{array_to_disk, complex_array_to_disk, read_volume, resolve_source},
        lit, to_f64, Real,
    },
    waves::Waves,
};
use mslice_common::{PotentialSource, TomlParameters};

/// This `SimulationParameters` struct stores the resolved parameters of one simulation
#[derive(Debug, Clone)]
pub struct SimulationParameters<T: Real> {
    // Input
    /// Where the potential volume comes from
    pub source: PotentialSource,
    /// Whether the volume on disk is already binned
    pub prebinned: bool,
    pub bin_factor_xy: usize,
    pub bin_factor_z: usize,

    // Grid Parameters
    /// Binned slice thickness (before defocus), in Å
    pub slice_thickness: T,
    /// Binned transverse pixel size, in Å
    pub sampling: (T, T),

    // Microscope Parameters
    /// Electron wavelength, in Å
    pub wavelength: T,
    /// Interaction constant, in 1/V
    pub sigma: T,
    /// Aperture semiangle and edge width, in mrad
    pub semiangle_cutoff: T,
    pub rolloff: T,
    /// Beam tilt, in mrad
    pub tilt: Option<(T, T)>,

    // Imaging Parameters
    /// Defocus, in µm
    pub defocus: T,
    /// Dose, in e/Å^2
    pub dose: T,
    pub zernike: bool,
    pub seeds: Vec<u64>,

    // Metadata
    /// Simulation name
    pub sim_name: String,
    pub output_dir: PathBuf,
    pub write_exit_wave: bool,
    pub scalebar_length: usize,
}

impl<T: Real> Display for SimulationParameters<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", "-".repeat(40))?;
        writeln!(f, "sim_name         = {}", self.sim_name)?;
        writeln!(f, "source           = {}", self.source.local_path().display())?;
        writeln!(f, "prebinned        = {}", self.prebinned)?;
        writeln!(f, "slice_thickness  = {}", self.slice_thickness)?;
        writeln!(f, "sampling         = ({}, {})", self.sampling.0, self.sampling.1)?;
        writeln!(f, "wavelength       = {}", self.wavelength)?;
        writeln!(f, "sigma            = {}", self.sigma)?;
        writeln!(f, "semiangle_cutoff = {}", self.semiangle_cutoff)?;
        writeln!(f, "rolloff          = {}", self.rolloff)?;
        match self.tilt {
            Some((tx, ty)) => writeln!(f, "tilt             = ({tx}, {ty})")?,
            None => writeln!(f, "tilt             = none")?,
        }
        writeln!(f, "defocus          = {}", self.defocus)?;
        writeln!(f, "dose             = {}", self.dose)?;
        writeln!(f, "zernike          = {}", self.zernike)?;
        writeln!(f, "seeds            = {:?}", self.seeds)?;
        writeln!(f, "output_dir       = {}", self.output_dir.display())?;
        writeln!(f, "{}", "-".repeat(40))?;
        Ok(())
    }
}

/// One simulation per defocus value. In a defocus series each simulation gets its own name.
pub fn parameters_from_toml<T: Real>(toml: &TomlParameters) -> Vec<SimulationParameters<T>> {
    let geometry = toml.geometry();
    let series = toml.defocus_series.is_some();

    toml.defocus_values()
        .into_iter()
        .map(|defocus| SimulationParameters {
            source: toml.source.clone(),
            prebinned: toml.prebinned,
            bin_factor_xy: toml.bin_factor_xy,
            bin_factor_z: toml.bin_factor_z,
            slice_thickness: lit(geometry.slice_thickness),
            sampling: (lit(geometry.sampling.0), lit(geometry.sampling.1)),
            wavelength: lit(toml.wavelength),
            sigma: lit(toml.sigma),
            semiangle_cutoff: lit(toml.semiangle_cutoff),
            rolloff: lit(toml.rolloff),
            tilt: toml.tilt().map(|(tx, ty)| (lit(tx), lit(ty))),
            defocus: lit(defocus),
            dose: lit(toml.dose),
            zernike: toml.zernike,
            seeds: toml.seeds.clone(),
            sim_name: if series {
                format!("{}-defocus{:+.2}um", toml.sim_name, defocus)
            } else {
                toml.sim_name.clone()
            },
            output_dir: PathBuf::from(&toml.output_dir),
            write_exit_wave: toml.write_exit_wave,
            scalebar_length: toml.scalebar_length,
        })
        .collect()
}

/// Fetches (if remote), reads and, unless the file is already binned, bins the potential volume
pub fn load_volume<T: Real>(parameters: &SimulationParameters<T>) -> Result<Array3<T>, RuntimeError> {
    let path = resolve_source(&parameters.source)?;
    let volume: Array3<T> = read_volume(&path)?;
    log::debug!("read volume of shape {:?} from {}", volume.dim(), path.display());
    if !check_for_nans(&volume) {
        return Err(RuntimeError::NanOrInf);
    }

    if parameters.prebinned {
        Ok(volume)
    } else {
        bin_volume(&volume, parameters.bin_factor_z, parameters.bin_factor_xy)
    }
}

/// A single noise realisation
#[derive(Debug, Clone)]
pub struct Realisation {
    pub seed: u64,
    /// CTEM image counts
    pub image: Array2<u64>,
    /// Zernike phase-plate image counts, when enabled
    pub zernike: Option<Array2<u64>>,
}

#[derive(Debug, Clone)]
pub struct SimulationOutput<T: Real> {
    pub exit_wave: Array2<Complex<T>>,
    /// Ground-truth projected potential
    pub projected_potential: Array2<f64>,
    pub bright_field_disk: Array2<f64>,
    pub realisations: Vec<Realisation>,
}

/// This stores the potential, the incident wave and the imaging setup for one simulation,
/// along with the `SimulationParameters` they were built from.
pub struct SimulationObject<T: Real> {
    pub potential: PotentialArray<T>,
    pub waves: Waves<T>,
    pub ctf: CTF<T>,
    pub imaging: ImageFormation<T>,
    pub parameters: SimulationParameters<T>,
}

impl<T: Real> SimulationObject<T> {
    pub fn new(volume: Array3<T>, parameters: SimulationParameters<T>) -> Self {
        let mut potential =
            PotentialArray::new(volume, parameters.slice_thickness, parameters.sampling);
        potential.apply_defocus(parameters.defocus);

        let waves = Waves::plane_wave(
            potential.gpts(),
            parameters.sampling,
            parameters.wavelength,
            parameters.tilt,
        )
        .with_interaction_constant(parameters.sigma);

        SimulationObject {
            potential,
            waves,
            ctf: CTF::new(parameters.semiangle_cutoff, parameters.rolloff),
            imaging: ImageFormation::new(parameters.sampling, parameters.dose),
            parameters,
        }
    }

    pub fn run(&self) -> Result<SimulationOutput<T>, RuntimeError> {
        let exit_wave = self.waves.multislice(&self.potential)?;

        let mut realisations = Vec::with_capacity(self.parameters.seeds.len());
        for &seed in &self.parameters.seeds {
            let mut rng = StdRng::seed_from_u64(seed);
            let zernike = if self.parameters.zernike {
                Some(self.imaging.form_zernike_image(&exit_wave, &mut rng)?)
            } else {
                None
            };
            let image = self.imaging.form_image(&exit_wave, &mut rng)?;
            log::debug!(
                "seed {seed}: {} electrons detected",
                image.iter().sum::<u64>()
            );
            realisations.push(Realisation {
                seed,
                image,
                zernike,
            });
        }

        Ok(SimulationOutput {
            projected_potential: self.potential.projected().mapv(to_f64),
            bright_field_disk: self.ctf.bright_field_disk(&self.waves).mapv(to_f64),
            exit_wave,
            realisations,
        })
    }

    /// Scale bar in nm matching the transverse sampling
    pub fn scalebar(&self) -> ScaleBar {
        ScaleBar::new(
            self.parameters.scalebar_length,
            to_f64(self.parameters.sampling.0) / 10.0,
            "nm",
        )
    }

    /// Display-normalised figure: projected potential, CTEM image and (if enabled) the
    /// Zernike image side by side, each with a scale bar
    pub fn figure(&self, output: &SimulationOutput<T>, realisation: &Realisation) -> Array2<f64> {
        let scalebar = self.scalebar();

        let mut potential = normalize_for_display(&output.projected_potential);
        scalebar.burn_into(&mut potential, 1.0);

        let mut image = normalize_for_display(&realisation.image.mapv(|c| c as f64));
        scalebar.burn_into(&mut image, 0.0);

        let zernike = realisation.zernike.as_ref().map(|z| {
            let mut panel = normalize_for_display(&z.mapv(|c| c as f64));
            scalebar.burn_into(&mut panel, 1.0);
            panel
        });

        figure_panels(&[Some(&potential), Some(&image), zernike.as_ref()])
    }

    pub fn output_path(&self) -> PathBuf {
        self.parameters.output_dir.join(&self.parameters.sim_name)
    }

    /// Writes every output array of `output` to `<output_dir>/<sim_name>/`
    pub fn dump(&self, output: &SimulationOutput<T>) -> Result<()> {
        let dir = self.output_path();
        std::fs::create_dir_all(&dir).with_context(|| RuntimeError::IOError {
            path: dir.display().to_string(),
        })?;
        let path = |name: &str| dir.join(name).display().to_string();

        // Exit wave goes out on its own threads while the rest is written
        let handles = if self.parameters.write_exit_wave {
            complex_array_to_disk(path("exit_wave"), &output.exit_wave)
        } else {
            vec![]
        };

        // Writers are joined even if a synchronous write failed
        let written = self.write_arrays(output, &path);
        let mut joined: Result<()> = Ok(());
        for handle in handles {
            match handle.join() {
                Ok(Ok(millis)) => log::trace!("exit wave component written after {millis} ms"),
                Ok(Err(e)) => joined = joined.and(Err(e)),
                Err(_) => {
                    joined = joined.and(Err(anyhow::anyhow!("exit wave writer panicked")))
                }
            }
        }
        written?;
        joined?;

        log::info!("wrote outputs to {}", dir.display());
        Ok(())
    }

    fn write_arrays(
        &self,
        output: &SimulationOutput<T>,
        path: &dyn Fn(&str) -> String,
    ) -> Result<()> {
        array_to_disk(&path("projected_potential.npy"), &output.projected_potential)?;
        array_to_disk(&path("bright_field_disk.npy"), &output.bright_field_disk)?;

        // Every figure panel carries the same bar
        let label = self.scalebar().label();
        std::fs::write(path("scalebar.txt"), format!("{label}\n")).with_context(|| {
            RuntimeError::IOError {
                path: path("scalebar.txt"),
            }
        })?;

        for realisation in &output.realisations {
            let seed = realisation.seed;
            array_to_disk(&path(&format!("image_seed{seed}.npy")), &realisation.image)?;
            if let Some(zernike) = &realisation.zernike {
                array_to_disk(&path(&format!("zernike_seed{seed}.npy")), zernike)?;
            }
            let figure = path(&format!("figure_seed{seed}.npy"));
            array_to_disk(&figure, &self.figure(output, realisation))?;
            log::info!("{figure}: scale bar {label}");
        }
        Ok(())
    }
}

#[cfg(test)]
fn test_parameters(toml: &str) -> SimulationParameters<f64> {
    let toml = mslice_common::parse_toml(toml).unwrap();
    parameters_from_toml(&toml).remove(0)
}

#[test]
fn test_parameters_from_toml_series() {
    let toml = mslice_common::parse_toml(
        r#"
        sim_name = "apoF"
        defocus_series = [-1.0, 0.5]
        "#,
    )
    .unwrap();
    let streams = parameters_from_toml::<f64>(&toml);
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].sim_name, "apoF-defocus-1.00um");
    assert_eq!(streams[1].sim_name, "apoF-defocus+0.50um");
    assert_eq!(streams[1].defocus, 0.5);
    assert!((streams[0].slice_thickness - 4.0).abs() < 1e-12);
}

#[test]
fn test_simulation_object_applies_defocus() {
    let parameters = test_parameters("sim_name = \"x\"\ndefocus = 1.0");
    let object = SimulationObject::new(Array3::zeros((10, 8, 8)), parameters);
    assert!((object.potential.slice_thickness - (4.0 + 1e3)).abs() < 1e-9);
    assert_eq!(object.waves.gpts(), (8, 8));
    assert_eq!(object.waves.sigma, mslice_common::SIGMA);
}

#[test]
fn test_run_produces_one_realisation_per_seed() {
    let parameters = test_parameters(
        r#"
        sim_name = "x"
        zernike = true
        seeds = "0..=2"
        dose = 100.0
        "#,
    );
    let volume = Array3::from_shape_fn((3, 16, 16), |(k, i, j)| {
        if (i as i64 - 8).pow(2) + (j as i64 - 8).pow(2) < 9 {
            20.0 + k as f64
        } else {
            0.0
        }
    });
    let object = SimulationObject::new(volume, parameters);
    let output = object.run().unwrap();

    assert_eq!(output.realisations.len(), 3);
    assert!(output.realisations.iter().all(|r| r.zernike.is_some()));
    assert_eq!(output.projected_potential[(8, 8)], 63.0);
    assert_eq!(output.bright_field_disk.dim(), (16, 16));

    let figure = object.figure(&output, &output.realisations[0]);
    assert_eq!(figure.dim(), (16, 48));
    assert!(figure.iter().all(|&x| (0.0..=1.0).contains(&x)));
}

#[test]
fn test_dump_writes_outputs() {
    use ndarray_npy::read_npy;

    let dir = std::env::temp_dir().join(format!("mslice-dump-{}", std::process::id()));
    let mut parameters = test_parameters("sim_name = \"dumped\"\nwrite_exit_wave = true");
    parameters.output_dir = dir.clone();

    let object = SimulationObject::new(Array3::from_elem((2, 8, 8), 1.0), parameters);
    let output = object.run().unwrap();
    object.dump(&output).unwrap();

    let out = dir.join("dumped");
    let image: Array2<u64> = read_npy(out.join("image_seed0.npy")).unwrap();
    assert_eq!(image, output.realisations[0].image);
    assert!(out.join("exit_wave_real.npy").is_file());
    assert!(out.join("exit_wave_imag.npy").is_file());
    assert!(out.join("figure_seed0.npy").is_file());
    assert!(!out.join("zernike_seed0.npy").exists());
    let label = std::fs::read_to_string(out.join("scalebar.txt")).unwrap();
    assert_eq!(label.trim(), object.scalebar().label());
    assert_eq!(label.trim(), "4.00 nm");

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_dump_joins_exit_wave_writers_on_error() {
    let dir = std::env::temp_dir().join(format!("mslice-dump-err-{}", std::process::id()));
    let mut parameters = test_parameters("sim_name = \"blocked\"\nwrite_exit_wave = true");
    parameters.output_dir = dir.clone();

    let object = SimulationObject::new(Array3::from_elem((2, 8, 8), 1.0), parameters);
    let output = object.run().unwrap();

    // A directory where an output file should go makes that write fail
    let out = dir.join("blocked");
    std::fs::create_dir_all(out.join("projected_potential.npy")).unwrap();
    assert!(object.dump(&output).is_err());

    // but the exit wave writers still ran to completion
    assert!(out.join("exit_wave_real.npy").is_file());
    assert!(out.join("exit_wave_imag.npy").is_file());

    std::fs::remove_dir_all(&dir).unwrap();
}
