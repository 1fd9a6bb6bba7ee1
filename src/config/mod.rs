pub mod run_config;
pub mod run_dir;

pub use run_config::{DatasetFormat, LossWeights, RunConfig, MAX_VALIDATION_CHANNELS};
pub use run_dir::{run_dir, run_name, RunPaths};
