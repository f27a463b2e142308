pub mod finite_difference;
pub mod geometry;
pub mod interpolation;
