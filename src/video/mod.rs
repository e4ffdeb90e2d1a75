//! Video path: RGB image handling, grid layout, compositing and the
//! capability-aware ASCII converter.

pub mod ascii;
pub mod composite;
pub mod grid;
pub mod image;

pub use ascii::Palette;
pub use composite::{CompositeFrame, Compositor};
pub use grid::GridLayout;
pub use image::RgbImage;
