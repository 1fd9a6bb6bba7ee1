pub mod engine;

pub use engine::{LossEngine, LossInputs, LossTerms, OutputGradients};
