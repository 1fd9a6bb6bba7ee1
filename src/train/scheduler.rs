/// Validation batches between two channel emissions.
pub const VALIDATION_CHANNEL_STRIDE: usize = 100;

/// Decides when the expensive image and histogram diagnostics run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticScheduler {
    pub stride: usize,
    pub channel_count: usize,
}

impl DiagnosticScheduler {
    pub fn new(stride: usize, channel_count: usize) -> DiagnosticScheduler {
        DiagnosticScheduler {
            stride,
            channel_count,
        }
    }

    /// Training images go out every `stride` global steps. A zero stride never emits.
    pub fn should_emit_train(global_step: usize, stride: usize) -> bool {
        stride != 0 && global_step % stride == 0
    }

    /// Validation batch `i` feeds channel `i / 100` when it is the first
    /// batch of its block and that channel exists.
    pub fn should_emit_validate(batch_index: usize, channel_count: usize) -> bool {
        batch_index % VALIDATION_CHANNEL_STRIDE == 0
            && Self::channel_for(batch_index) < channel_count
    }

    pub fn channel_for(batch_index: usize) -> usize {
        batch_index / VALIDATION_CHANNEL_STRIDE
    }

    pub fn train(&self, global_step: usize) -> bool {
        Self::should_emit_train(global_step, self.stride)
    }

    /// The channel batch `i` writes to, if any.
    pub fn validate(&self, batch_index: usize) -> Option<usize> {
        Self::should_emit_validate(batch_index, self.channel_count)
            .then(|| Self::channel_for(batch_index))
    }
}
