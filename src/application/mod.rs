//! Application layer: the fetch bridge and the render entry points.

pub mod bridge;
pub mod error;
pub mod render;
