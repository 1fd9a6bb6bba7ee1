use serde::{Deserialize, Serialize};

/// What one completed epoch produced.
///
/// When the orchestrator has a progress channel it sends one `EpochSummary`
/// at the end of every epoch, after the checkpoint is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 1-based epoch number.
    pub epoch: usize,
    pub total_epochs: usize,
    /// Batch-size weighted mean of the training total loss.
    pub train_loss: f64,
    pub val_photometric_loss: f64,
    pub val_mask_loss: f64,
    pub val_total_loss: f64,
    /// Whether this epoch improved the best validation photometric loss.
    pub is_best: bool,
    /// Global step after the training phase.
    pub global_step: usize,
    /// Wall-clock duration of the epoch in milliseconds.
    pub elapsed_ms: u64,
}
