use ndarray::{s, Array2, Array3, Axis};

use crate::utils::{error::RuntimeError, lit, Real};
use mslice_common::ANGSTROM_PER_MICRON;

/// A sliced electrostatic potential volume, indexed (slice, x, y).
/// Only `slice_thickness` is expected to change after construction.
#[derive(Debug, Clone)]
pub struct PotentialArray<T: Real> {
    /// Potential of each slice
    pub array: Array3<T>,
    /// Propagation distance between slices, in Å
    pub slice_thickness: T,
    /// Transverse pixel size (x, y), in Å
    pub sampling: (T, T),
}

impl<T: Real> PotentialArray<T> {
    pub fn new(array: Array3<T>, slice_thickness: T, sampling: (T, T)) -> Self {
        PotentialArray {
            array,
            slice_thickness,
            sampling,
        }
    }

    /// Transverse grid shape
    pub fn gpts(&self) -> (usize, usize) {
        let (_, nx, ny) = self.array.dim();
        (nx, ny)
    }

    pub fn num_slices(&self) -> usize {
        self.array.len_of(Axis(0))
    }

    /// Encodes a defocus (in µm) as extra propagation distance, spread evenly
    /// over every slice.
    pub fn apply_defocus(&mut self, defocus: T) {
        let n = self.num_slices();
        if n == 0 {
            return;
        }
        self.slice_thickness =
            self.slice_thickness + lit::<T>(ANGSTROM_PER_MICRON) * defocus / lit::<T>(n as f64);
    }

    /// Potential integrated along the beam direction
    pub fn projected(&self) -> Array2<T> {
        self.array.sum_axis(Axis(0))
    }
}

/// Bins a raw (slice, x, y) volume: groups of `bin_z` slices are summed, since the
/// projected potential must be preserved, and `bin_xy` x `bin_xy` transverse blocks are
/// averaged. Trailing slices or pixels that do not fill a whole bin are dropped.
pub fn bin_volume<T: Real>(
    volume: &Array3<T>,
    bin_z: usize,
    bin_xy: usize,
) -> Result<Array3<T>, RuntimeError> {
    if bin_z == 0 || bin_xy == 0 {
        return Err(RuntimeError::InvalidBinning { bin_z, bin_xy });
    }
    let (nz, nx, ny) = volume.dim();
    let shape = (nz / bin_z, nx / bin_xy, ny / bin_xy);
    let block_area = lit::<T>((bin_xy * bin_xy) as f64);

    Ok(Array3::from_shape_fn(shape, |(k, i, j)| {
        let block = volume.slice(s![
            k * bin_z..(k + 1) * bin_z,
            i * bin_xy..(i + 1) * bin_xy,
            j * bin_xy..(j + 1) * bin_xy
        ]);
        block.sum() / block_area
    }))
}

#[test]
fn test_gpts_and_slices() {
    let potential = PotentialArray::new(Array3::<f64>::zeros((5, 8, 6)), 4.0, (1.0, 1.0));
    assert_eq!(potential.gpts(), (8, 6));
    assert_eq!(potential.num_slices(), 5);
}

#[test]
fn test_apply_defocus_spreads_over_slices() {
    let mut potential = PotentialArray::new(Array3::<f64>::zeros((4, 2, 2)), 4.0, (1.0, 1.0));
    potential.apply_defocus(1.0);
    assert!((potential.slice_thickness - (4.0 + 1e4 / 4.0)).abs() < 1e-9);

    potential.apply_defocus(-1.0);
    assert!((potential.slice_thickness - 4.0).abs() < 1e-9);
}

#[test]
fn test_apply_defocus_without_slices_is_noop() {
    let mut potential = PotentialArray::new(Array3::<f64>::zeros((0, 2, 2)), 4.0, (1.0, 1.0));
    potential.apply_defocus(2.0);
    assert_eq!(potential.slice_thickness, 4.0);
}

#[test]
fn test_projected_potential() {
    let volume = Array3::from_shape_fn((3, 2, 2), |(k, i, j)| (k + 10 * i + 100 * j) as f64);
    let projected = PotentialArray::new(volume, 1.0, (1.0, 1.0)).projected();
    assert_eq!(projected[(0, 0)], 3.0);
    assert_eq!(projected[(1, 1)], 3.0 + 3.0 * 110.0);
}

#[test]
fn test_bin_volume() {
    let volume = Array3::from_shape_fn((7, 4, 5), |(k, i, j)| (k * 20 + i * 5 + j) as f64);
    let binned = bin_volume(&volume, 3, 2).unwrap();
    assert_eq!(binned.dim(), (2, 2, 2));

    // Sum over z of the transverse block means
    let expected: f64 = volume
        .slice(s![0..3, 0..2, 0..2])
        .iter()
        .sum::<f64>()
        / 4.0;
    assert!((binned[(0, 0, 0)] - expected).abs() < 1e-9);

    // Projected potential is preserved up to the xy block mean
    let uniform = Array3::from_elem((6, 4, 4), 2.0_f64);
    let binned = bin_volume(&uniform, 6, 2).unwrap();
    assert_eq!(binned, Array3::from_elem((1, 2, 2), 12.0));
}

#[test]
fn test_bin_volume_rejects_zero_factor() {
    let volume = Array3::<f32>::zeros((2, 2, 2));
    assert!(matches!(
        bin_volume(&volume, 0, 1),
        Err(RuntimeError::InvalidBinning { .. })
    ));
}
