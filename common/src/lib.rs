pub mod constants;
pub mod error;
pub mod parameters;
pub mod source;

pub use constants::*;
pub use error::*;
pub use parameters::*;
pub use source::*;
