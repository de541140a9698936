pub mod acceleration;
pub mod geometry;
