use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use rustfft::num_complex::Complex;

use crate::utils::{error::RuntimeError, fft::FftObject, grid::intensity, lit, to_f64, Real};
use mslice_common::ZERNIKE_PHASE_SHIFT;

/// Turns exit waves into shot-noise limited images
#[derive(Debug, Clone, Copy)]
pub struct ImageFormation<T: Real> {
    /// Pixel size (x, y), in Å
    pub sampling: (T, T),
    /// Incident dose, in e/Å^2
    pub dose: T,
}

impl<T: Real> ImageFormation<T> {
    pub fn new(sampling: (T, T), dose: T) -> Self {
        ImageFormation { sampling, dose }
    }

    /// Mean electron count per pixel
    pub fn expected_counts(&self, wave: &Array2<Complex<T>>) -> Array2<f64> {
        expected_counts(wave, self.sampling, self.dose)
    }

    /// Poisson-sampled CTEM image of `wave`
    pub fn form_image<R: Rng>(
        &self,
        wave: &Array2<Complex<T>>,
        rng: &mut R,
    ) -> Result<Array2<u64>, RuntimeError> {
        poisson_image(&self.expected_counts(wave), rng)
    }

    /// Poisson-sampled image of `wave` seen through a Zernike phase plate
    pub fn form_zernike_image<R: Rng>(
        &self,
        wave: &Array2<Complex<T>>,
        rng: &mut R,
    ) -> Result<Array2<u64>, RuntimeError> {
        let shifted = zernike_phase_plate(wave)?;
        poisson_image(&self.expected_counts(&shifted), rng)
    }
}

/// `|wave|^2 * sx * sy * dose`, clipped to be non-negative. Non-finite values count as zero.
pub fn expected_counts<T: Real>(
    wave: &Array2<Complex<T>>,
    sampling: (T, T),
    dose: T,
) -> Array2<f64> {
    let scale = to_f64(sampling.0 * sampling.1 * dose);
    intensity(wave).mapv(|x| {
        let lambda = to_f64(x) * scale;
        if lambda.is_finite() {
            lambda.max(0.0)
        } else {
            0.0
        }
    })
}

/// Draws one Poisson count per pixel with the given expectation
pub fn poisson_image<R: Rng>(
    expected: &Array2<f64>,
    rng: &mut R,
) -> Result<Array2<u64>, RuntimeError> {
    let mut counts = Array2::zeros(expected.dim());
    for (count, &lambda) in counts.iter_mut().zip(expected.iter()) {
        if lambda <= 0.0 {
            continue;
        }
        let poisson = Poisson::new(lambda).map_err(|_| RuntimeError::Poisson { lambda })?;
        let draw: f64 = poisson.sample(rng);
        *count = draw as u64;
    }
    Ok(counts)
}

/// Applies a phase shift of pi/2 to the unscattered (zero frequency) beam only
pub fn zernike_phase_plate<T: Real>(
    wave: &Array2<Complex<T>>,
) -> Result<Array2<Complex<T>>, RuntimeError> {
    let fft = FftObject::new(wave.dim());
    let mut spectrum = wave.clone();
    fft.forward(&mut spectrum)?;
    if let Some(dc) = spectrum.get_mut((0, 0)) {
        *dc = *dc * Complex::from_polar(T::one(), lit(ZERNIKE_PHASE_SHIFT));
    }
    fft.inverse(&mut spectrum)?;
    Ok(spectrum)
}

#[cfg(test)]
use rand::{rngs::StdRng, SeedableRng};

#[test]
fn test_expected_counts() {
    use ndarray::array;

    let wave = array![[Complex::new(1.0_f64, 0.0), Complex::new(0.0, 2.0)]];
    let counts = expected_counts(&wave, (2.0, 0.5), 10.0);
    assert_eq!(counts, array![[10.0, 40.0]]);

    let bad = array![[Complex::new(f64::NAN, 0.0)]];
    assert_eq!(expected_counts(&bad, (1.0, 1.0), 1.0), array![[0.0]]);
}

#[test]
fn test_poisson_image_mean_converges() {
    let mut rng = StdRng::seed_from_u64(0);
    let expected = Array2::from_elem((64, 64), 7.5);
    let draws = 20;
    let mut total = 0.0;
    for _ in 0..draws {
        let image = poisson_image(&expected, &mut rng).unwrap();
        total += image.iter().sum::<u64>() as f64;
    }
    let mean = total / (draws * 64 * 64) as f64;
    // standard error is sqrt(7.5 / 81920) ~ 0.01
    assert!((mean - 7.5).abs() < 0.05);
}

#[test]
fn test_poisson_image_zero_dose_is_dark() {
    let mut rng = StdRng::seed_from_u64(1);
    let expected = Array2::zeros((8, 8));
    let image = poisson_image(&expected, &mut rng).unwrap();
    assert!(image.iter().all(|&c| c == 0));
}

#[test]
fn test_images_are_reproducible_per_seed() {
    let formation = ImageFormation::new((1.0_f64, 1.0), 50.0);
    let wave = Array2::from_elem((16, 16), Complex::new(0.8, 0.3));
    let a = formation
        .form_image(&wave, &mut StdRng::seed_from_u64(42))
        .unwrap();
    let b = formation
        .form_image(&wave, &mut StdRng::seed_from_u64(42))
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_zernike_only_touches_dc() {
    let fft = FftObject::<f64>::new((8, 6));
    let wave = Array2::from_shape_fn((8, 6), |(i, j)| {
        Complex::from_polar(1.0, 0.1 * (i as f64) - 0.05 * (j * j) as f64)
    });
    let shifted = zernike_phase_plate(&wave).unwrap();

    let mut before = wave.clone();
    let mut after = shifted;
    fft.forward(&mut before).unwrap();
    fft.forward(&mut after).unwrap();

    let rotated = before[(0, 0)] * Complex::new(0.0, 1.0);
    assert!((after[(0, 0)] - rotated).norm() < 1e-9);
    for ((index, a), b) in after.indexed_iter().zip(before.iter()) {
        if index != (0, 0) {
            assert!((a - b).norm() < 1e-9);
        }
    }
}

#[test]
fn test_zernike_turns_weak_phase_into_amplitude_contrast() {
    // A weak phase object has almost no intensity contrast in focus,
    // but the phase plate makes it visible
    let wave = Array2::from_shape_fn((32, 32), |(i, _)| {
        Complex::from_polar(1.0, if i < 16 { 0.05 } else { -0.05 })
    });
    let plain = expected_counts(&wave, (1.0, 1.0), 1.0);
    let zernike = expected_counts(&zernike_phase_plate(&wave).unwrap(), (1.0, 1.0), 1.0);

    let contrast = |image: &Array2<f64>| (image[(0, 0)] - image[(20, 0)]).abs();
    assert!(contrast(&plain) < 1e-9);
    assert!(contrast(&zernike) > 0.1);
}
