/// Relativistic electron wavelength at 300 kV, in Å
pub const WAVELENGTH: f64 = 0.0197;

/// Interaction constant at 300 kV, in 1/V
pub const SIGMA: f64 = 0.00065;

/// Objective aperture semiangle cutoff, in mrad
pub const SEMIANGLE_CUTOFF: f64 = 4.0;

/// Width of the objective aperture's raised-cosine edge, in mrad
pub const ROLLOFF: f64 = 0.125;

/// Voxel size of the unbinned potential volume, in Å
pub const PIXEL_SIZE: f64 = 2.0 / 3.0;

/// Default transverse binning of the potential volume
pub const BIN_FACTOR_XY: usize = 2;

/// Default binning along the beam direction
pub const BIN_FACTOR_Z: usize = 6;

/// Å per µm, used to turn a defocus in µm into a propagation distance
pub const ANGSTROM_PER_MICRON: f64 = 1e4;

/// Phase shift a Zernike phase plate applies to the unscattered beam
pub const ZERNIKE_PHASE_SHIFT: f64 = std::f64::consts::FRAC_PI_2;

/// Fraction of the Nyquist frequency where the propagator's antialias mask reaches zero
pub const ANTIALIAS_CUTOFF_FRACTION: f64 = 2.0 / 3.0;

/// Width of the antialias mask edge, in 1/Å
pub const ANTIALIAS_ROLLOFF: f64 = 0.1;

/// Default incident dose, in e/Å^2
pub const DOSE: f64 = 10.0;

/// Range (inclusive) and step of the defocus control, in µm
pub const DEFOCUS_RANGE: (f64, f64) = (-2.0, 2.0);
pub const DEFOCUS_STEP: f64 = 0.05;

/// Log10 range and number of steps of the dose control
pub const DOSE_LOG10_RANGE: (f64, f64) = (1.0, 3.0);
pub const DOSE_STEPS: usize = 10;

/// Where the binned apoferritin potential is published
pub const REMOTE_DATA_URL: &str = "https://raw.githubusercontent.com/gvarnavi/py4DSTEM-lite/dev/data/";
pub const DATA_FILE_NAME: &str = "apoF-ice-embedded-potential-binned.npy";
