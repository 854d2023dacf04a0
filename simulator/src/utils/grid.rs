use ndarray::{Array2, ArrayBase, Data, Dimension};
use rustfft::num_complex::Complex;

use super::Real;

/// Squared modulus of every element
pub fn intensity<T: Real>(array: &Array2<Complex<T>>) -> Array2<T> {
    array.mapv(|x| x.norm_sqr())
}

pub fn check_complex_for_nans<T, S, D>(array: &ArrayBase<S, D>) -> bool
where
    T: Real,
    S: Data<Elem = Complex<T>>,
    D: Dimension,
{
    // check for nans and infs in either component
    let is_bad = array
        .iter()
        .any(|x| !x.re.is_finite() || !x.im.is_finite());

    !is_bad
}

pub fn check_for_nans<T, S, D>(array: &ArrayBase<S, D>) -> bool
where
    T: Real,
    S: Data<Elem = T>,
    D: Dimension,
{
    !array.iter().any(|x| !x.is_finite())
}

#[test]
fn test_nan_checks() {
    use ndarray::array;

    let good = array![[Complex::new(1.0_f32, -2.0)]];
    assert!(check_complex_for_nans(&good));

    let bad = array![[Complex::new(1.0_f32, f32::NAN)]];
    assert!(!check_complex_for_nans(&bad));

    let inf = array![1.0_f64, f64::INFINITY];
    assert!(!check_for_nans(&inf));
    assert!(check_for_nans(&array![1.0_f64, 2.0]));
}

#[test]
fn test_intensity() {
    use ndarray::array;

    let wave = array![[Complex::new(3.0_f64, 4.0), Complex::new(0.0, 1.0)]];
    assert_eq!(intensity(&wave), array![[25.0, 1.0]]);
}
