pub mod checkpoint;
pub mod context;
pub mod epoch_stats;
pub mod log_writer;
pub mod orchestrator;
pub mod progress;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod train_epoch;
pub mod validate_epoch;
pub mod visualize;

pub use checkpoint::{
    load_pretrained, CheckpointPolicy, CheckpointRecord, CheckpointStore, JsonCheckpointStore,
    SavedModule,
};
pub use context::EpochContext;
pub use epoch_stats::EpochSummary;
pub use log_writer::AppendLog;
pub use orchestrator::{Diagnostics, RunOrchestrator, RunPhase, RunReport};
pub use progress::RunProgress;
pub use scheduler::{DiagnosticScheduler, VALIDATION_CHANNEL_STRIDE};
pub use state::RunState;
pub use stats::RunningStatistic;
pub use train_epoch::{train_epoch, TrainOutcome};
pub use validate_epoch::{validate_epoch, PoseSampleBuffer, ValidationOutcome};
