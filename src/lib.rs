pub mod baseline;
pub mod cli;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod loss;
pub mod math;
pub mod model;
pub mod optim;
pub mod train;

// Convenience re-exports
pub use config::{DatasetFormat, LossWeights, RunConfig};
pub use data::{Batch, BatchSource, DataLoader, SequenceFolder};
pub use diagnostics::{DiagnosticSink, FileSink};
pub use error::{Error, Result};
pub use loss::{LossEngine, LossTerms};
pub use math::{Image, Intrinsics, Matrix};
pub use model::{DepthModel, Mode, PoseMaskModel, TrainableModule};
pub use optim::{Adam, CombinedOptimizerBuilder};
pub use train::{RunOrchestrator, RunReport, RunState};
