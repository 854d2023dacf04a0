pub mod complex;
pub mod error;
pub mod fft;
pub mod grid;
pub mod io;

use ndarray::ScalarOperand;
use ndarray_npy::{ReadableElement, WritableElement};
use num_traits::{Float, FloatConst, FromPrimitive, NumAssign, ToPrimitive};
use rustfft::FftNum;
use std::fmt::{Display, LowerExp};

/// Floating point types the simulation can run in (`f32` and `f64`)
pub trait Real:
    FftNum
    + Float
    + FloatConst
    + NumAssign
    + FromPrimitive
    + ToPrimitive
    + Display
    + LowerExp
    + ReadableElement
    + WritableElement
    + ScalarOperand
    + Default
{
}

impl<T> Real for T where
    T: FftNum
        + Float
        + FloatConst
        + NumAssign
        + FromPrimitive
        + ToPrimitive
        + Display
        + LowerExp
        + ReadableElement
        + WritableElement
        + ScalarOperand
        + Default
{
}

/// Converts an `f64` literal or parameter into the working precision
pub fn lit<T: Real>(x: f64) -> T {
    T::from_f64(x).unwrap_or_else(T::nan)
}

/// Converts back into `f64`, mapping anything unrepresentable to NaN
pub fn to_f64<T: Real>(x: T) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}
