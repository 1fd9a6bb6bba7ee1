pub mod adam;
pub mod builder;

pub use adam::{Adam, AdamConfig};
pub use builder::CombinedOptimizerBuilder;
