use std::time::Instant;

use indicatif::ProgressBar;
use log::info;

use crate::data::batch::BatchSource;
use crate::diagnostics::sink::DiagnosticSink;
use crate::error::{Error, Result};
use crate::loss::engine::LossEngine;
use crate::model::module::{DepthModel, Mode, PoseMaskModel};
use crate::model::output::{flatten_poses, Pose, POSE_COMPONENTS};
use crate::train::context::EpochContext;
use crate::train::scheduler::DiagnosticScheduler;
use crate::train::stats::RunningStatistic;
use crate::train::visualize::emit_validation_images;

/// Poses predicted during validation, in batch order.
///
/// Sized for every batch but the last: batch `i` fills
/// `[i·step, (i+1)·step)` with `step = batch_size · (sequence_length − 1)`,
/// and the final batch is never written.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSampleBuffer {
    poses: Vec<Pose>,
    step: usize,
}

impl PoseSampleBuffer {
    pub fn new(num_batches: usize, batch_size: usize, sequence_length: usize) -> PoseSampleBuffer {
        let step = batch_size * sequence_length.saturating_sub(1);
        PoseSampleBuffer {
            poses: vec![[0.0; 6]; num_batches.saturating_sub(1) * step],
            step,
        }
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Poses written per batch.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Whether batch `batch_index` has a slot.
    pub fn accepts(&self, batch_index: usize) -> bool {
        (batch_index + 1) * self.step <= self.poses.len()
    }

    /// Writes `poses` (`[sample][reference]`, sample-major) into the slot of `batch_index`.
    pub fn write(&mut self, batch_index: usize, poses: &[Vec<Pose>]) -> Result<()> {
        if !self.accepts(batch_index) {
            return Err(Error::shape("pose buffer batches", self.poses.len() / self.step.max(1), batch_index + 1));
        }
        let flat: Vec<&Pose> = flatten_poses(poses).collect();
        if flat.len() != self.step {
            return Err(Error::shape("poses per batch", self.step, flat.len()));
        }
        let start = batch_index * self.step;
        for (slot, pose) in self.poses[start..start + self.step].iter_mut().zip(flat) {
            *slot = *pose;
        }
        Ok(())
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    /// Every value of one pose component, `0..6` in `POSE_COMPONENTS` order.
    pub fn component(&self, index: usize) -> Vec<f64> {
        self.poses.iter().map(|p| p[index]).collect()
    }
}

/// Averaged validation losses and the collected poses.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub photometric_loss: f64,
    pub mask_loss: f64,
    /// Weighted total, same weights as training.
    pub total_loss: f64,
    pub poses: PoseSampleBuffer,
}

// ---------------------------------------------------------------------------
// Validation phase
// ---------------------------------------------------------------------------

/// One full pass over `source` with both models in evaluation mode and
/// no parameter updates.
///
/// # Arguments
/// - `ctx`      — both models, the loss engine and the run configuration
/// - `source`   — validation batches, in order
/// - `channels` — diagnostic slots for images and pose histograms; empty disables them
/// - `epoch`    — 0-based epoch, used as the step of every image and histogram
/// - `bar`      — advanced once per batch and cleared on return
///
/// Batch `i` feeds channel `i / 100` on every hundredth batch while such a
/// channel exists. Pose histograms go to the first channel.
pub fn validate_epoch<B, D, P, L, S>(
    ctx: &mut EpochContext<'_, D, P, L>,
    source: &mut B,
    channels: &mut [S],
    epoch: usize,
    bar: &ProgressBar,
) -> Result<ValidationOutcome>
where
    B: BatchSource + ?Sized,
    D: DepthModel + ?Sized,
    P: PoseMaskModel + ?Sized,
    L: LossEngine + ?Sized,
    S: DiagnosticSink,
{
    let config = ctx.config;
    let num_batches = source.num_batches();
    let log_outputs = !channels.is_empty();
    let scheduler = DiagnosticScheduler::new(config.visualization_stride, channels.len());
    let mut poses = PoseSampleBuffer::new(num_batches, config.batch_size, config.sequence_length);

    let mut batch_time = RunningStatistic::new();
    let mut losses = RunningStatistic::new();
    let mut photo_losses = RunningStatistic::new();
    let mut mask_losses = RunningStatistic::new();

    ctx.depth_net.set_mode(Mode::Eval);
    ctx.pose_net.set_mode(Mode::Eval);

    let mut end = Instant::now();
    for (i, batch) in source.batches().enumerate() {
        let batch = batch?;
        let pass = ctx.forward(&batch)?;
        let (terms, total) = ctx.losses(&pass, &batch, i)?;

        // ── Diagnostics ───────────────────────────────────────────────────
        if log_outputs {
            if let Some(channel) = scheduler.validate(i) {
                emit_validation_images(&mut channels[channel], ctx.loss, &batch, &pass, epoch)?;
            }
            if i + 1 < num_batches {
                poses.write(i, &pass.pose_mask.poses)?;
            }
        }

        losses.push(total);
        photo_losses.push(terms.photometric);
        mask_losses.push(terms.mask);

        // ── Progress ──────────────────────────────────────────────────────
        batch_time.push(end.elapsed().as_secs_f64());
        end = Instant::now();
        bar.set_message(format!("loss {:.4}", losses.average()?));
        bar.inc(1);
        if i % config.print_freq == 0 {
            let line = format!(
                "valid: Time {:.3} ({:.3}) Loss {:.3} ({:.3})",
                batch_time.last(),
                batch_time.average()?,
                losses.last(),
                losses.average()?
            );
            bar.suspend(|| info!("{line}"));
        }
    }

    bar.finish_and_clear();

    if let Some(first) = channels.first_mut() {
        for (k, component) in POSE_COMPONENTS.iter().enumerate() {
            first.add_histogram(&format!("val poses_{component}"), &poses.component(k), epoch)?;
        }
    }

    Ok(ValidationOutcome {
        photometric_loss: photo_losses.average()?,
        mask_loss: mask_losses.average()?,
        total_loss: losses.average()?,
        poses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_poses(samples: usize, refs: usize, value: f64) -> Vec<Vec<Pose>> {
        vec![vec![[value; 6]; refs]; samples]
    }

    #[test]
    fn buffer_skips_final_batch() {
        let mut buffer = PoseSampleBuffer::new(5, 2, 3);
        assert_eq!(buffer.len(), 16);
        for i in 0..4 {
            assert!(buffer.accepts(i));
            buffer.write(i, &batch_poses(2, 2, i as f64 + 1.0)).unwrap();
        }
        assert!(!buffer.accepts(4));
        assert!(buffer.write(4, &batch_poses(2, 2, 9.0)).is_err());
        assert_eq!(buffer.component(0)[..4], [1.0; 4]);
        assert_eq!(buffer.component(5)[12..], [4.0; 4]);
    }

    #[test]
    fn no_batches_means_empty_buffer() {
        assert!(PoseSampleBuffer::new(0, 4, 3).is_empty());
        assert!(PoseSampleBuffer::new(1, 4, 3).is_empty());
    }

    #[test]
    fn wrong_pose_count_is_rejected() {
        let mut buffer = PoseSampleBuffer::new(3, 2, 3);
        assert!(buffer.write(0, &batch_poses(1, 2, 0.0)).is_err());
    }
}
