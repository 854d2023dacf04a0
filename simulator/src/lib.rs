pub mod ctf;
pub mod display;
pub mod imaging;
pub mod potential;
pub mod propagator;
pub mod simulation_object;
pub mod utils;
pub mod waves;

pub use ctf::CTF;
pub use imaging::ImageFormation;
pub use potential::PotentialArray;
pub use propagator::FresnelPropagator;
pub use utils::Real;
pub use waves::Waves;
