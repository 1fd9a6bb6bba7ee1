use std::time::Instant;

use indicatif::ProgressBar;
use log::info;

use crate::data::batch::BatchSource;
use crate::diagnostics::sink::DiagnosticSink;
use crate::error::Result;
use crate::loss::engine::LossEngine;
use crate::model::module::{DepthModel, Mode, PoseMaskModel};
use crate::optim::adam::Adam;
use crate::train::context::EpochContext;
use crate::train::log_writer::AppendLog;
use crate::train::scheduler::DiagnosticScheduler;
use crate::train::state::RunState;
use crate::train::stats::RunningStatistic;
use crate::train::visualize::emit_train_images;

/// What a training phase reports back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOutcome {
    /// Batch-size weighted mean of the total loss.
    pub average_loss: f64,
    pub steps: usize,
    /// Disparity scales the depth model produced in training mode.
    pub num_scales: usize,
}

// ---------------------------------------------------------------------------
// Training phase
// ---------------------------------------------------------------------------

/// Runs one training epoch: at most `epoch_size` batches of a fresh pass
/// over `source`, one optimizer step per batch.
///
/// # Arguments
/// - `ctx`       — both models, the loss engine and the run configuration
/// - `source`    — training batches; a new pass is started on every call
/// - `optimizer` — the combined optimizer over both models' parameters
/// - `state`     — global step, advanced once per optimizer step
/// - `full_log`  — receives one `(total, photo, exp, smooth)` row per step
/// - `writer`    — training diagnostic stream
/// - `bar`       — advanced once per batch and cleared on return
///
/// Loss scalars go to `writer` at the current global step. Images are
/// emitted every `visualization_stride` steps when `log_output` is set.
pub fn train_epoch<B, D, P, L, S>(
    ctx: &mut EpochContext<'_, D, P, L>,
    source: &mut B,
    optimizer: &mut Adam,
    state: &mut RunState,
    full_log: &mut AppendLog,
    writer: &mut S,
    bar: &ProgressBar,
) -> Result<TrainOutcome>
where
    B: BatchSource + ?Sized,
    D: DepthModel + ?Sized,
    P: PoseMaskModel + ?Sized,
    L: LossEngine + ?Sized,
    S: DiagnosticSink + ?Sized,
{
    let config = ctx.config;
    let epoch_size = config.effective_epoch_size(source.num_batches());
    let scheduler = DiagnosticScheduler::new(config.visualization_stride, config.channel_count());

    let mut batch_time = RunningStatistic::new();
    let mut data_time = RunningStatistic::new();
    let mut losses = RunningStatistic::new();
    let mut num_scales = 0;
    let mut steps = 0;

    ctx.depth_net.set_mode(Mode::Train);
    ctx.pose_net.set_mode(Mode::Train);

    let mut end = Instant::now();
    for (i, batch) in source.batches().take(epoch_size).enumerate() {
        let batch = batch?;
        data_time.push(end.elapsed().as_secs_f64());

        // ── Forward and loss ──────────────────────────────────────────────
        let pass = ctx.forward(&batch)?;
        num_scales = pass.num_scales();
        let (terms, total) = ctx.losses(&pass, &batch, state.global_step)?;

        let step = state.global_step;
        writer.add_scalar("photometric_error", terms.photometric, step)?;
        writer.add_scalar("explanability_loss", terms.mask, step)?;
        writer.add_scalar("disparity_smoothness_loss", terms.smoothness, step)?;
        writer.add_scalar("total_loss", total, step)?;

        if config.log_output && scheduler.train(step) {
            emit_train_images(writer, ctx.loss, &batch, &pass, step)?;
        }

        losses.update(total, config.batch_size);

        // ── Update ────────────────────────────────────────────────────────
        optimizer.zero_grad();
        ctx.backward(&pass, &batch)?;
        optimizer.step()?;

        batch_time.push(end.elapsed().as_secs_f64());
        end = Instant::now();

        // ── Progress ──────────────────────────────────────────────────────
        full_log.append(&[total, terms.photometric, terms.mask, terms.smoothness])?;
        bar.set_message(format!("loss {:.4}", losses.average()?));
        bar.inc(1);
        if i % config.print_freq == 0 {
            let line = format!(
                "Train: Time {:.3} ({:.3}) Data {:.3} ({:.3}) Loss {:.4} ({:.4})",
                batch_time.last(),
                batch_time.average()?,
                data_time.last(),
                data_time.average()?,
                losses.last(),
                losses.average()?
            );
            bar.suspend(|| info!("{line}"));
        }

        state.global_step += 1;
        steps += 1;
    }

    bar.finish_and_clear();
    Ok(TrainOutcome {
        average_loss: losses.average()?,
        steps,
        num_scales,
    })
}
