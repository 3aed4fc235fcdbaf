pub mod cache;
pub mod curve;
pub mod grid;
pub mod params;
pub mod window;
