use mslice_common::CommonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to write {path} to disk")]
    IOError { path: String },

    #[error("A NaN or Inf value was produced")]
    NanOrInf,

    #[error("Potential volume not found at {path}")]
    MissingPotential { path: String },

    #[error("Failed to read potential volume from {path}: {msg}")]
    PotentialRead { path: String, msg: String },

    #[error("Wave grid {waves:?} does not match potential grid {potential:?}")]
    GridMismatch {
        waves: (usize, usize),
        potential: (usize, usize),
    },

    #[error("Wave sampling {waves:?} does not match potential sampling {potential:?}")]
    SamplingMismatch {
        waves: (f64, f64),
        potential: (f64, f64),
    },

    #[error("FFT planned for {expected:?} was given an array of shape {got:?}")]
    FftShape {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("Could not draw Poisson counts with expected value {lambda}")]
    Poisson { lambda: f64 },

    #[error("Invalid bin factors (z = {bin_z}, xy = {bin_xy}); factors must be at least 1")]
    InvalidBinning { bin_z: usize, bin_xy: usize },

    #[error("Remote potential sources need the `remote-data` feature")]
    RemoteDisabled,

    #[error("Error in common: {err}")]
    TomlReadError {
        #[from]
        err: CommonError,
    },
}
