use serde::{Deserialize, Serialize};

/// Mutable state carried across epochs. Owned by the orchestrator and
/// lent to each phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Optimization steps taken so far.
    pub global_step: usize,
    /// Lowest validation photometric loss seen; unset before the first validation.
    pub best_photo_loss: Option<f64>,
}

impl RunState {
    pub fn new() -> RunState {
        RunState::default()
    }
}
