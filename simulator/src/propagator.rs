use ndarray::Array2;
use rustfft::num_complex::Complex;

use crate::utils::{error::RuntimeError, fft::fftfreq, fft::FftObject, lit, Real};
use mslice_common::{ANTIALIAS_CUTOFF_FRACTION, ANTIALIAS_ROLLOFF};

/// Fresnel free-space propagation in the paraxial approximation.
/// Only the antialias mask geometry is stored; nothing is retained between calls.
#[derive(Debug, Clone, Copy)]
pub struct FresnelPropagator<T: Real> {
    /// Fraction of the Nyquist frequency at which the mask reaches zero
    pub cutoff_fraction: T,
    /// Width of the mask's raised-cosine edge, in 1/Å
    pub rolloff: T,
}

impl<T: Real> Default for FresnelPropagator<T> {
    fn default() -> Self {
        FresnelPropagator {
            cutoff_fraction: lit(ANTIALIAS_CUTOFF_FRACTION),
            rolloff: lit(ANTIALIAS_ROLLOFF),
        }
    }
}

impl<T: Real> FresnelPropagator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fourier-space transfer function for a step of `dz` Å, including an optional
    /// beam tilt (mrad) and the antialias mask.
    pub fn evaluate_propagator_array(
        &self,
        gpts: (usize, usize),
        sampling: (T, T),
        wavelength: T,
        dz: T,
        tilt: Option<(T, T)>,
    ) -> Array2<Complex<T>> {
        let kx = fftfreq(gpts.0, sampling.0);
        let ky = fftfreq(gpts.1, sampling.1);
        let pi = T::PI();
        let two = lit::<T>(2.0);
        let mrad = lit::<T>(1e3);

        let chirp = pi * wavelength * dz;
        let ramp = tilt.map(|(tx, ty)| {
            (
                (tx / mrad).tan() * dz * two * pi,
                (ty / mrad).tan() * dz * two * pi,
            )
        });
        let kcut = T::one() / sampling.0.max(sampling.1) / two * self.cutoff_fraction;

        Array2::from_shape_fn(gpts, |(i, j)| {
            let (kxi, kyj) = (kx[i], ky[j]);
            let mut phase = -(kxi * kxi * chirp) - kyj * kyj * chirp;
            if let Some((rx, ry)) = ramp {
                phase = phase - kxi * rx - kyj * ry;
            }
            let k = (kxi * kxi + kyj * kyj).sqrt();
            Complex::from_polar(self.mask(k, kcut), phase)
        })
    }

    /// Antialias mask value at spatial frequency `k`
    fn mask(&self, k: T, kcut: T) -> T {
        let half = lit::<T>(0.5);
        if k > kcut {
            T::zero()
        } else if k > kcut - self.rolloff {
            half * (T::one() + (T::PI() * (k - kcut + self.rolloff) / self.rolloff).cos())
        } else {
            T::one()
        }
    }

    /// `ifft2(fft2(array) * propagator_array)`
    pub fn propagate(
        &self,
        array: &Array2<Complex<T>>,
        propagator_array: &Array2<Complex<T>>,
    ) -> Result<Array2<Complex<T>>, RuntimeError> {
        let fft = FftObject::new(array.dim());
        let mut out = array.clone();
        self.propagate_inplace(&fft, &mut out, propagator_array)?;
        Ok(out)
    }

    /// Same as `propagate`, reusing planned transforms and the caller's buffer
    pub fn propagate_inplace(
        &self,
        fft: &FftObject<T>,
        array: &mut Array2<Complex<T>>,
        propagator_array: &Array2<Complex<T>>,
    ) -> Result<(), RuntimeError> {
        fft.forward(array)?;
        *array *= propagator_array;
        fft.inverse(array)
    }
}

#[cfg(test)]
fn band_limited_wave(gpts: (usize, usize)) -> Array2<Complex<f64>> {
    use std::f64::consts::PI;
    let (nx, ny) = gpts;
    Array2::from_shape_fn(gpts, |(i, j)| {
        let x = i as f64 / nx as f64;
        let y = j as f64 / ny as f64;
        Complex::new(1.0, 0.0)
            + Complex::from_polar(0.3, 2.0 * PI * (x + 2.0 * y))
            + Complex::from_polar(0.2, 2.0 * PI * (-3.0 * x + y) + 0.4)
    })
}

#[test]
fn test_fresnel_additivity() {
    let propagator = FresnelPropagator::<f64>::new();
    let gpts = (32, 24);
    let sampling = (1.0, 1.25);
    let wavelength = 0.0197;
    let tilt = Some((1.0, -0.5));

    let wave = band_limited_wave(gpts);
    let p1 = propagator.evaluate_propagator_array(gpts, sampling, wavelength, 120.0, tilt);
    let p2 = propagator.evaluate_propagator_array(gpts, sampling, wavelength, 380.0, tilt);
    let p12 = propagator.evaluate_propagator_array(gpts, sampling, wavelength, 500.0, tilt);

    let twice = propagator
        .propagate(&propagator.propagate(&wave, &p1).unwrap(), &p2)
        .unwrap();
    let once = propagator.propagate(&wave, &p12).unwrap();

    assert!((twice - &once).map(|x| x.norm()).sum() < 1e-9);
    // and something actually happened
    assert!((once - &wave).map(|x| x.norm()).sum() > 1e-3);
}

#[test]
fn test_mask_zero_at_nyquist_and_one_at_low_frequency() {
    let propagator = FresnelPropagator::<f64>::new();
    let gpts = (64, 64);
    let sampling = (1.0, 1.0);
    let p = propagator.evaluate_propagator_array(gpts, sampling, 0.0197, 0.0, None);

    // Nyquist along x sits at index n/2
    assert_eq!(p[(32, 0)].norm(), 0.0);
    assert_eq!(p[(32, 32)].norm(), 0.0);
    // DC and frequencies well below 2/3 Nyquist pass untouched
    assert!((p[(0, 0)] - Complex::new(1.0, 0.0)).norm() < 1e-12);
    // k = 4/64 = 0.0625 < kcut - rolloff = 1/3 - 0.1
    assert!((p[(4, 0)].norm() - 1.0).abs() < 1e-12);
    // Just inside the rolled-off band the mask is between the two
    let kcut = 1.0 / 3.0;
    let k = 18.0 / 64.0;
    assert!(k > kcut - 0.1 && k < kcut);
    let edge = p[(18, 0)].norm();
    assert!(edge > 0.0 && edge < 1.0);
}

#[test]
fn test_propagator_is_unimodular_inside_mask() {
    let propagator = FresnelPropagator::<f64>::new();
    let p = propagator.evaluate_propagator_array((16, 16), (2.0, 2.0), 0.0197, 1e3, Some((0.0, 0.0)));
    // kcut = 1/4 * 2/3 = 1/6 and k = 1/32 is well inside
    assert!((p[(1, 0)].norm() - 1.0).abs() < 1e-12);
    let expected = -std::f64::consts::PI * 0.0197 * 1e3 / (32.0 * 32.0);
    assert!((p[(1, 0)].arg() - expected).abs() < 1e-12);
}

#[test]
fn test_tilt_shifts_the_wave() {
    // A pure tilt ramp translates the wave by tan(tilt) * dz
    let propagator = FresnelPropagator::<f64>::new();
    let gpts = (32, 32);
    let wave = band_limited_wave(gpts);
    let dz = 1e3;
    let tilt_x = (1.0_f64 / dz).atan() * 1e3; // one pixel shift
    let p = propagator.evaluate_propagator_array(gpts, (1.0, 1.0), 0.0, dz, Some((tilt_x, 0.0)));
    let shifted = propagator.propagate(&wave, &p).unwrap();
    for i in 0..32 {
        for j in 0..32 {
            assert!((shifted[((i + 1) % 32, j)] - wave[(i, j)]).norm() < 1e-9);
        }
    }
}
