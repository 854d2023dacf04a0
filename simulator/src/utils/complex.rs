use ndarray::{Array2, ArrayView2};
use rustfft::num_complex::Complex;

use super::Real;

pub fn complex_constant<T: Real>(value: Complex<T>, shape: (usize, usize)) -> Array2<Complex<T>> {
    Array2::from_elem(shape, value)
}

/// Transmission function `exp(i σ V)` of a thin phase object
pub fn phase_grating<T: Real>(slice: ArrayView2<T>, sigma: T) -> Array2<Complex<T>> {
    slice.mapv(|v| Complex::new(T::zero(), sigma * v).exp())
}

#[test]
fn test_phase_grating_is_unimodular() {
    use ndarray::array;

    let slice = array![[0.0, 1.0], [-250.0, 1e4]];
    let grating = phase_grating::<f64>(slice.view(), 0.00065);
    for (t, v) in grating.iter().zip(slice.iter()) {
        assert!((t.norm() - 1.0).abs() < 1e-12);
        assert!((t.arg() - (0.00065 * v).sin().atan2((0.00065 * v).cos())).abs() < 1e-9);
    }
    assert_eq!(grating[(0, 0)], Complex::new(1.0, 0.0));
}
