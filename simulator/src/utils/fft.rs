use ndarray::{Array1, Array2};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;
use transpose::transpose;

use super::{error::RuntimeError, lit, Real};

/// This struct is intended to be initialized once per grid shape.
/// It holds the forward and inverse 1-D plans along both axes,
/// which are composed into 2-D transforms via a transpose.
pub struct FftObject<T: Real> {
    // Forward/inverse along the fast (y) axis
    fwd_rows: Arc<dyn Fft<T>>,
    inv_rows: Arc<dyn Fft<T>>,
    // Forward/inverse along the slow (x) axis
    fwd_cols: Arc<dyn Fft<T>>,
    inv_cols: Arc<dyn Fft<T>>,
    // Keep shape on record
    pub shape: (usize, usize),
}

impl<T: Real> FftObject<T> {
    /// Plans transforms for an `(nx, ny)` grid
    pub fn new(shape: (usize, usize)) -> Self {
        let (nx, ny) = shape;
        let mut planner = FftPlanner::<T>::new();
        FftObject {
            fwd_rows: planner.plan_fft_forward(ny),
            inv_rows: planner.plan_fft_inverse(ny),
            fwd_cols: planner.plan_fft_forward(nx),
            inv_cols: planner.plan_fft_inverse(nx),
            shape,
        }
    }

    /// Unnormalized forward transform, in place
    pub fn forward(&self, data: &mut Array2<Complex<T>>) -> Result<(), RuntimeError> {
        self.process(data, &self.fwd_rows, &self.fwd_cols)
    }

    /// Inverse transform scaled by `1/(nx*ny)`, in place
    pub fn inverse(&self, data: &mut Array2<Complex<T>>) -> Result<(), RuntimeError> {
        self.process(data, &self.inv_rows, &self.inv_cols)?;
        let (nx, ny) = self.shape;
        if nx * ny > 0 {
            let scale = T::one() / lit::<T>((nx * ny) as f64);
            data.mapv_inplace(|x| x * scale);
        }
        Ok(())
    }

    fn process(
        &self,
        data: &mut Array2<Complex<T>>,
        rows: &Arc<dyn Fft<T>>,
        cols: &Arc<dyn Fft<T>>,
    ) -> Result<(), RuntimeError> {
        // Ensure data provided is of the size supported
        if data.dim() != self.shape {
            return Err(RuntimeError::FftShape {
                expected: self.shape,
                got: data.dim(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        if !data.is_standard_layout() {
            *data = data.as_standard_layout().into_owned();
        }
        let (nx, ny) = self.shape;
        let buffer = data
            .as_slice_mut()
            .expect("standard layout arrays are contiguous");

        // rustfft processes every length-ny chunk, i.e. every row
        rows.process(buffer);

        // Transpose rows and columns, transform what were the columns, transpose back
        let mut scratch = vec![Complex::new(T::zero(), T::zero()); nx * ny];
        transpose(buffer, &mut scratch, ny, nx);
        cols.process(&mut scratch);
        transpose(&scratch, buffer, nx, ny);

        Ok(())
    }
}

/// Sample frequencies of a length-`n` DFT with spacing `d`, in numpy's order
/// (zero, positive frequencies, then negative frequencies)
pub fn fftfreq<T: Real>(n: usize, d: T) -> Array1<T> {
    let scale = T::one() / (lit::<T>(n as f64) * d);
    Array1::from_iter((0..n).map(|i| {
        let i = if i < (n + 1) / 2 {
            i as i64
        } else {
            i as i64 - n as i64
        };
        lit::<T>(i as f64) * scale
    }))
}

/// Moves the zero-frequency element to the centre of the grid
pub fn fftshift<A: Clone>(array: &Array2<A>) -> Array2<A> {
    let (nx, ny) = array.dim();
    Array2::from_shape_fn((nx, ny), |(i, j)| {
        array[((i + nx - nx / 2) % nx, (j + ny - ny / 2) % ny)].clone()
    })
}

#[test]
fn test_fftfreq_even() {
    // Generate simple k grid and ensure it's correct
    let k_grid = fftfreq::<f32>(4, 0.25);
    assert_eq!(k_grid.to_vec(), vec![0.0, 1.0, -2.0, -1.0]);
}

#[test]
fn test_fftfreq_odd() {
    let k_grid = fftfreq::<f64>(5, 1.0);
    let expected = [0.0, 0.2, 0.4, -0.4, -0.2];
    for (k, e) in k_grid.iter().zip(expected) {
        assert!((k - e).abs() < 1e-12);
    }
}

#[test]
fn test_fftshift_moves_dc_to_centre() {
    let mut array = Array2::<u8>::zeros((4, 5));
    array[(0, 0)] = 1;
    let shifted = fftshift(&array);
    assert_eq!(shifted[(2, 2)], 1);
    assert_eq!(shifted.sum(), 1);
}

#[test]
fn test_fft_object_2_d_round_trip() {
    type T = f64;
    let fft = FftObject::<T>::new((6, 4));

    // Define data to operate on
    let mut data = Array2::from_shape_fn((6, 4), |(i, j)| {
        Complex::<T>::new(i as T - 2.0 * j as T, (i * j) as T)
    });
    let orig = data.clone();

    // Carry out fwd + inv FFT
    fft.forward(&mut data).unwrap();
    fft.inverse(&mut data).unwrap();

    // Check that sum of norm of elementwise difference is tiny or zero
    assert!((data - orig).map(|x| x.norm()).sum() < 1e-9);
}

#[test]
fn test_fft_object_dc_is_sum() {
    type T = f64;
    let fft = FftObject::<T>::new((3, 8));
    let mut data = Array2::from_elem((3, 8), Complex::<T>::new(1.0, 0.0));
    fft.forward(&mut data).unwrap();
    assert!((data[(0, 0)].re - 24.0).abs() < 1e-9);
    assert!(data.iter().skip(1).all(|x| x.norm() < 1e-9));
}

#[test]
fn test_fft_object_rejects_wrong_shape() {
    let fft = FftObject::<f32>::new((4, 4));
    let mut data = Array2::from_elem((4, 2), Complex::<f32>::new(1.0, 0.0));
    assert!(matches!(
        fft.forward(&mut data),
        Err(RuntimeError::FftShape { .. })
    ));
}
