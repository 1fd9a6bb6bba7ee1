pub mod camera;
pub mod frame;
pub mod matrix;

pub use camera::Intrinsics;
pub use frame::Image;
pub use matrix::Matrix;
