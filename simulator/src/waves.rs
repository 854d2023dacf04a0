use ndarray::{Array1, Array2};
use rustfft::num_complex::Complex;

use crate::{
    potential::PotentialArray,
    propagator::FresnelPropagator,
    utils::{
        complex::{complex_constant, phase_grating},
        error::RuntimeError,
        fft::{fftfreq, FftObject},
        grid::check_complex_for_nans,
        lit, to_f64, Real,
    },
};
use mslice_common::SIGMA;

/// An electron wavefunction sampled on a 2-D grid
#[derive(Debug, Clone)]
pub struct Waves<T: Real> {
    /// Complex wave values, indexed (x, y)
    pub array: Array2<Complex<T>>,
    /// Pixel size (x, y), in Å
    pub sampling: (T, T),
    /// Electron wavelength, in Å
    pub wavelength: T,
    /// Incident beam tilt (x, y), in mrad
    pub tilt: Option<(T, T)>,
    /// Interaction constant, in 1/V
    pub sigma: T,
    pub propagator: FresnelPropagator<T>,
}

impl<T: Real> Waves<T> {
    pub fn new(
        array: Array2<Complex<T>>,
        sampling: (T, T),
        wavelength: T,
        tilt: Option<(T, T)>,
    ) -> Self {
        Waves {
            array,
            sampling,
            wavelength,
            tilt,
            sigma: lit(SIGMA),
            propagator: FresnelPropagator::default(),
        }
    }

    /// A uniform plane wave of unit amplitude
    pub fn plane_wave(
        gpts: (usize, usize),
        sampling: (T, T),
        wavelength: T,
        tilt: Option<(T, T)>,
    ) -> Self {
        let array = complex_constant(Complex::new(T::one(), T::zero()), gpts);
        Self::new(array, sampling, wavelength, tilt)
    }

    pub fn with_interaction_constant(mut self, sigma: T) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn gpts(&self) -> (usize, usize) {
        self.array.dim()
    }

    /// Spatial frequency axes (cycles per Å) in DFT order
    pub fn get_spatial_frequencies(&self) -> (Array1<T>, Array1<T>) {
        let (nx, ny) = self.gpts();
        let (sx, sy) = self.sampling;
        (fftfreq(nx, sx), fftfreq(ny, sy))
    }

    /// Scattering angle `alpha` (rad) and azimuth `phi` (rad) on the full grid
    pub fn get_scattering_angles(&self) -> (Array2<T>, Array2<T>) {
        let (kx, ky) = self.get_spatial_frequencies();
        let gpts = self.gpts();
        let alpha = Array2::from_shape_fn(gpts, |(i, j)| {
            (kx[i] * kx[i] + ky[j] * ky[j]).sqrt() * self.wavelength
        });
        let phi = Array2::from_shape_fn(gpts, |(i, j)| ky[j].atan2(kx[i]));
        (alpha, phi)
    }

    /// Propagates the wave through every slice of `potential` in order and returns the
    /// exit wave. Neither `self` nor the potential is modified.
    pub fn multislice(
        &self,
        potential: &PotentialArray<T>,
    ) -> Result<Array2<Complex<T>>, RuntimeError> {
        if potential.gpts() != self.gpts() {
            return Err(RuntimeError::GridMismatch {
                waves: self.gpts(),
                potential: potential.gpts(),
            });
        }
        if !sampling_matches(self.sampling, potential.sampling) {
            return Err(RuntimeError::SamplingMismatch {
                waves: (to_f64(self.sampling.0), to_f64(self.sampling.1)),
                potential: (to_f64(potential.sampling.0), to_f64(potential.sampling.1)),
            });
        }

        let dz = potential.slice_thickness;
        let mut out_array = self.array.clone();
        let prop = &self.propagator;
        let prop_array = prop.evaluate_propagator_array(
            self.gpts(),
            self.sampling,
            self.wavelength,
            dz,
            self.tilt,
        );
        let fft = FftObject::new(self.gpts());

        for (index, slice) in potential.array.outer_iter().enumerate() {
            out_array *= &phase_grating(slice, self.sigma);
            prop.propagate_inplace(&fft, &mut out_array, &prop_array)?;
            log::trace!("propagated through slice {index}");
        }
        log::debug!(
            "multislice through {} slices of {:.3} Å",
            potential.num_slices(),
            dz
        );

        if !check_complex_for_nans(&out_array) {
            return Err(RuntimeError::NanOrInf);
        }
        Ok(out_array)
    }
}

fn sampling_matches<T: Real>(a: (T, T), b: (T, T)) -> bool {
    let close = |x: T, y: T| (x - y).abs() <= lit::<T>(1e-6) * x.abs().max(y.abs());
    close(a.0, b.0) && close(a.1, b.1)
}

#[test]
fn test_spatial_frequencies() {
    let waves = Waves::<f64>::plane_wave((4, 5), (0.25, 1.0), 0.0197, None);
    let (kx, ky) = waves.get_spatial_frequencies();
    assert_eq!(kx.to_vec(), vec![0.0, 1.0, -2.0, -1.0]);
    assert_eq!(ky.len(), 5);
    assert!((ky[2] - 0.4).abs() < 1e-12);
}

#[test]
fn test_scattering_angles() {
    let waves = Waves::<f64>::plane_wave((4, 4), (1.0, 1.0), 0.02, None);
    let (alpha, phi) = waves.get_scattering_angles();
    assert_eq!(alpha.dim(), (4, 4));
    assert_eq!(alpha[(0, 0)], 0.0);
    // kx = 0.25, ky = -0.25
    assert!((alpha[(1, 3)] - 0.02 * (0.125_f64).sqrt()).abs() < 1e-12);
    assert!((phi[(1, 3)] + std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    // kx = 0, ky = 0.25
    assert!((phi[(0, 1)] - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
}

#[test]
fn test_multislice_without_slices_returns_input() {
    use ndarray::Array3;

    let mut waves = Waves::<f64>::plane_wave((8, 8), (1.0, 1.0), 0.0197, Some((0.0, 0.0)));
    waves.array[(2, 3)] = Complex::new(0.5, -0.5);
    let potential = PotentialArray::new(Array3::zeros((0, 8, 8)), 10.0, (1.0, 1.0));
    let exit = waves.multislice(&potential).unwrap();
    assert_eq!(exit, waves.array);
}

#[test]
fn test_multislice_zero_potential_preserves_amplitude() {
    use ndarray::Array3;

    let waves = Waves::<f64>::plane_wave((16, 12), (1.5, 1.5), 0.0197, Some((0.0, 0.0)));
    let potential = PotentialArray::new(Array3::zeros((5, 16, 12)), 4.0, (1.5, 1.5));
    let exit = waves.multislice(&potential).unwrap();
    for x in exit.iter() {
        assert!((x.norm() - 1.0).abs() < 1e-12);
    }
    // the input is untouched
    assert!(waves.array.iter().all(|x| *x == Complex::new(1.0, 0.0)));
}

#[test]
fn test_multislice_rejects_mismatched_grids() {
    use ndarray::Array3;

    let waves = Waves::<f32>::plane_wave((8, 8), (1.0, 1.0), 0.0197, None);
    let potential = PotentialArray::new(Array3::zeros((2, 8, 4)), 4.0, (1.0, 1.0));
    assert!(matches!(
        waves.multislice(&potential),
        Err(RuntimeError::GridMismatch { .. })
    ));

    let potential = PotentialArray::new(Array3::zeros((2, 8, 8)), 4.0, (2.0, 1.0));
    assert!(matches!(
        waves.multislice(&potential),
        Err(RuntimeError::SamplingMismatch { .. })
    ));
}

#[test]
fn test_single_thin_slice_is_phase_grating() {
    use ndarray::Array3;

    // With no propagation distance a single slice only applies exp(i sigma V)
    let waves = Waves::<f64>::plane_wave((8, 8), (1.0, 1.0), 0.0197, None);
    let potential = PotentialArray::new(Array3::from_elem((1, 8, 8), 100.0), 0.0, (1.0, 1.0));
    let exit = waves.multislice(&potential).unwrap();
    let expected = Complex::new(0.0, SIGMA * 100.0).exp();
    assert!(exit.iter().all(|x| (x - expected).norm() < 1e-12));
}
