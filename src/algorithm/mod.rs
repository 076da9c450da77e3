//! Coordinate transforms for single geometries and whole tables.

pub mod albers;
pub mod epsg;
pub mod reproject;

pub use reproject::{Reproject, Transformer};
