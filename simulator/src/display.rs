use approx::relative_eq;
use ndarray::{concatenate, s, Array2, Axis};

/// Default quantiles used to clip images for display
pub const LOWER_QUANTILE: f64 = 0.02;
pub const UPPER_QUANTILE: f64 = 0.98;

/// Clips `array` to display bounds and returns `(clipped, vmin, vmax)`.
///
/// For images with any contrast the bounds are the `lower`/`upper` quantiles of the
/// non-NaN values. A flat image falls back to `(0, max)` and an image without any
/// finite value to `(0, 1)`. NaNs never count as contrast, so an image that is flat
/// apart from NaNs is treated as flat.
pub fn scaled_histogram(array: &Array2<f64>, lower: f64, upper: f64) -> (Array2<f64>, f64, f64) {
    let mut vals: Vec<f64> = array.iter().copied().filter(|x| !x.is_nan()).collect();
    vals.sort_by(|a, b| a.total_cmp(b));

    let (vmin, vmax) = match (vals.first(), vals.last()) {
        (Some(&min), Some(&max)) if min.is_finite() && max.is_finite() => {
            if relative_eq!(min, max, epsilon = 1e-8, max_relative = 1e-5) {
                (0.0, max)
            } else {
                let last = vals.len() - 1;
                let at = |q: f64| vals[((last as f64 * q).round().max(0.0) as usize).min(last)];
                (at(lower), at(upper))
            }
        }
        (Some(_), Some(_)) => {
            let finite: Vec<f64> = vals.iter().copied().filter(|x| x.is_finite()).collect();
            match (finite.first(), finite.last()) {
                (Some(&min), Some(&max)) => (min, max),
                _ => (0.0, 1.0),
            }
        }
        _ => (0.0, 1.0),
    };

    let clipped = array.mapv(|x| if x < vmin { vmin } else if x > vmax { vmax } else { x });
    (clipped, vmin, vmax)
}

/// Maps an image onto `[0, 1]` using the default quantile clipping
pub fn normalize_for_display(array: &Array2<f64>) -> Array2<f64> {
    let (clipped, vmin, vmax) = scaled_histogram(array, LOWER_QUANTILE, UPPER_QUANTILE);
    let range = vmax - vmin;
    if range > 0.0 && range.is_finite() {
        clipped.mapv(|x| if x.is_nan() { 0.0 } else { (x - vmin) / range })
    } else {
        Array2::zeros(array.dim())
    }
}

/// A physical scale bar drawn in the lower-right corner of an image
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleBar {
    /// Length in pixels
    pub length_px: usize,
    /// Physical size of one pixel, in `units`
    pub sampling: f64,
    pub units: String,
}

impl ScaleBar {
    pub fn new(length_px: usize, sampling: f64, units: &str) -> Self {
        ScaleBar {
            length_px,
            sampling,
            units: units.to_string(),
        }
    }

    pub fn label(&self) -> String {
        format!("{:.2} {}", self.sampling * self.length_px as f64, self.units)
    }

    /// Paints a one pixel high bar, padded from the lower-right corner
    pub fn burn_into(&self, image: &mut Array2<f64>, value: f64) {
        let (rows, cols) = image.dim();
        let pad = (rows.min(cols) / 32).max(1);
        if rows <= pad || cols <= pad {
            return;
        }
        let row = rows - 1 - pad;
        let end = cols - pad;
        let start = end.saturating_sub(self.length_px);
        image.slice_mut(s![row, start..end]).fill(value);
    }
}

/// Places display-normalised panels side by side. A missing panel is left blank.
pub fn figure_panels(panels: &[Option<&Array2<f64>>]) -> Array2<f64> {
    let shape = panels
        .iter()
        .flatten()
        .map(|p| p.dim())
        .next()
        .unwrap_or((0, 0));
    let views: Vec<Array2<f64>> = panels
        .iter()
        .map(|panel| match panel {
            Some(p) if p.dim() == shape => (*p).clone(),
            _ => Array2::zeros(shape),
        })
        .collect();
    let views: Vec<_> = views.iter().map(|v| v.view()).collect();
    concatenate(Axis(1), &views).unwrap_or_else(|_| Array2::zeros((shape.0, 0)))
}

#[test]
fn test_scaled_histogram_clips_to_quantiles() {
    let array = Array2::from_shape_fn((10, 10), |(i, j)| (i * 10 + j) as f64);
    let (clipped, vmin, vmax) = scaled_histogram(&array, LOWER_QUANTILE, UPPER_QUANTILE);
    // (99 * 0.02).round() = 2 and (99 * 0.98).round() = 97
    assert_eq!(vmin, 2.0);
    assert_eq!(vmax, 97.0);
    assert_eq!(clipped[(0, 0)], 2.0);
    assert_eq!(clipped[(9, 9)], 97.0);
    assert_eq!(clipped[(5, 5)], 55.0);
}

#[test]
fn test_scaled_histogram_flat_image() {
    let array = Array2::from_elem((4, 4), 3.0);
    let (clipped, vmin, vmax) = scaled_histogram(&array, LOWER_QUANTILE, UPPER_QUANTILE);
    assert_eq!((vmin, vmax), (0.0, 3.0));
    assert_eq!(clipped, array);
    // and the display version has no contrast to show except relative to zero
    assert!(normalize_for_display(&array).iter().all(|&x| x == 1.0));
}

#[test]
fn test_scaled_histogram_ignores_nans() {
    let mut array = Array2::from_shape_fn((5, 5), |(i, j)| (i * 5 + j) as f64);
    array[(0, 0)] = f64::NAN;
    let (_, vmin, vmax) = scaled_histogram(&array, 0.0, 1.0);
    assert_eq!((vmin, vmax), (1.0, 24.0));

    let all_nan = Array2::from_elem((2, 2), f64::NAN);
    let (_, vmin, vmax) = scaled_histogram(&all_nan, LOWER_QUANTILE, UPPER_QUANTILE);
    assert_eq!((vmin, vmax), (0.0, 1.0));
    assert!(normalize_for_display(&all_nan).iter().all(|&x| x == 0.0));

    let flat_with_nan = ndarray::array![[f64::NAN, 3.0], [3.0, 3.0]];
    let (_, vmin, vmax) = scaled_histogram(&flat_with_nan, LOWER_QUANTILE, UPPER_QUANTILE);
    assert_eq!((vmin, vmax), (0.0, 3.0));
}

#[test]
fn test_scaled_histogram_with_infinities() {
    let array = ndarray::array![[f64::NEG_INFINITY, 1.0], [2.0, f64::INFINITY]];
    let (_, vmin, vmax) = scaled_histogram(&array, LOWER_QUANTILE, UPPER_QUANTILE);
    assert_eq!((vmin, vmax), (1.0, 2.0));
}

#[test]
fn test_scalebar() {
    let bar = ScaleBar::new(30, 2.0 / 3.0 * 2.0 / 10.0, "nm");
    assert_eq!(bar.label(), "4.00 nm");

    let mut image = Array2::zeros((64, 64));
    bar.burn_into(&mut image, 1.0);
    assert_eq!(image.sum(), 30.0);
    assert_eq!(image[(61, 61)], 1.0);
    assert_eq!(image[(61, 32)], 1.0);
    assert_eq!(image[(61, 31)], 0.0);
}

#[test]
fn test_figure_panels() {
    let a = Array2::from_elem((3, 2), 1.0);
    let b = Array2::from_elem((3, 2), 2.0);
    let figure = figure_panels(&[Some(&a), Some(&b), None]);
    assert_eq!(figure.dim(), (3, 6));
    assert_eq!(figure[(0, 0)], 1.0);
    assert_eq!(figure[(0, 2)], 2.0);
    assert_eq!(figure[(0, 5)], 0.0);
}
