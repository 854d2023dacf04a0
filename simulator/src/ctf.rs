use ndarray::{Array2, Zip};

use crate::{
    utils::{fft::fftshift, lit, Real},
    waves::Waves,
};
use mslice_common::{ROLLOFF, SEMIANGLE_CUTOFF};

/// Objective aperture of the contrast transfer function
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy)]
pub struct CTF<T: Real> {
    /// Aperture semiangle, in mrad
    pub semiangle_cutoff: T,
    /// Width of the aperture's soft edge, in mrad. Zero or less gives a hard edge.
    pub rolloff: T,
}

impl<T: Real> Default for CTF<T> {
    fn default() -> Self {
        CTF {
            semiangle_cutoff: lit(SEMIANGLE_CUTOFF),
            rolloff: lit(ROLLOFF),
        }
    }
}

impl<T: Real> CTF<T> {
    pub fn new(semiangle_cutoff: T, rolloff: T) -> Self {
        CTF {
            semiangle_cutoff,
            rolloff,
        }
    }

    /// Aperture transmission for scattering angles `alpha` (rad). The aperture is round,
    /// so `phi` does not enter.
    pub fn evaluate_aperture(&self, alpha: &Array2<T>, phi: &Array2<T>) -> Array2<T> {
        debug_assert_eq!(alpha.dim(), phi.dim());
        Zip::from(alpha).map_collect(|&a| self.aperture_value(a))
    }

    /// Aperture transmission at a single scattering angle (rad)
    pub fn aperture_value(&self, alpha: T) -> T {
        let mrad = lit::<T>(1e3);
        let cutoff = self.semiangle_cutoff / mrad;

        if self.rolloff > T::zero() {
            let rolloff = self.rolloff / mrad;
            if alpha >= cutoff {
                T::zero()
            } else if alpha > cutoff - rolloff {
                lit::<T>(0.5) * (T::one() + (T::PI() * (alpha - cutoff + rolloff) / rolloff).cos())
            } else {
                T::one()
            }
        } else if alpha < cutoff {
            T::one()
        } else {
            T::zero()
        }
    }

    /// The aperture over the wave's scattering angles, zero frequency centred
    pub fn bright_field_disk(&self, waves: &Waves<T>) -> Array2<T> {
        let (alpha, phi) = waves.get_scattering_angles();
        fftshift(&self.evaluate_aperture(&alpha, &phi))
    }
}

#[test]
fn test_soft_aperture_is_continuous_and_monotonic() {
    let ctf = CTF::<f64>::new(4.0, 0.125);
    let (cutoff, rolloff) = (4e-3, 0.125e-3);

    assert_eq!(ctf.aperture_value(0.0), 1.0);
    assert!((ctf.aperture_value(cutoff - rolloff) - 1.0).abs() < 1e-12);
    assert_eq!(ctf.aperture_value(cutoff), 0.0);
    assert_eq!(ctf.aperture_value(cutoff * 1.5), 0.0);

    let n = 200;
    let mut previous = 1.0;
    for i in 0..=n {
        let alpha = cutoff - rolloff + rolloff * i as f64 / n as f64;
        let value = ctf.aperture_value(alpha);
        assert!(value <= previous + 1e-12);
        assert!((previous - value) < 0.02);
        previous = value;
    }
    assert!(previous.abs() < 1e-12);
}

#[test]
fn test_hard_aperture_is_a_step() {
    for rolloff in [0.0, -1.0] {
        let ctf = CTF::<f64>::new(4.0, rolloff);
        assert_eq!(ctf.aperture_value(3.999e-3), 1.0);
        assert_eq!(ctf.aperture_value(4e-3), 0.0);
        assert_eq!(ctf.aperture_value(1.0), 0.0);
    }
}

#[test]
fn test_aperture_ignores_azimuth() {
    let ctf = CTF::<f32>::default();
    let alpha = Array2::from_elem((2, 2), 3.95e-3_f32);
    let phi_a = Array2::zeros((2, 2));
    let phi_b = Array2::from_elem((2, 2), 1.3_f32);
    assert_eq!(
        ctf.evaluate_aperture(&alpha, &phi_a),
        ctf.evaluate_aperture(&alpha, &phi_b)
    );
}

#[test]
fn test_bright_field_disk_is_centred() {
    let waves = Waves::<f64>::plane_wave((64, 64), (1.0, 1.0), 0.0197, None);
    let disk = CTF::default().bright_field_disk(&waves);
    assert_eq!(disk[(32, 32)], 1.0);
    assert_eq!(disk[(0, 0)], 0.0);
    // symmetric about the centre
    assert_eq!(disk[(33, 32)], disk[(31, 32)]);
}
