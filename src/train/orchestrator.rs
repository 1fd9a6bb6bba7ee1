use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::{RunConfig, RunPaths};
use crate::data::batch::BatchSource;
use crate::diagnostics::sink::{DiagnosticSink, FileSink, RecordingSink};
use crate::error::{Error, Result};
use crate::loss::engine::LossEngine;
use crate::model::module::{DepthModel, PoseMaskModel, TrainableModule};
use crate::optim::adam::Adam;
use crate::optim::builder::CombinedOptimizerBuilder;
use crate::train::checkpoint::{CheckpointPolicy, CheckpointRecord, CheckpointStore};
use crate::train::context::EpochContext;
use crate::train::epoch_stats::EpochSummary;
use crate::train::log_writer::{AppendLog, FULL_HEADER, SUMMARY_HEADER};
use crate::train::progress::RunProgress;
use crate::train::state::RunState;
use crate::train::train_epoch::train_epoch;
use crate::train::validate_epoch::{validate_epoch, ValidationOutcome};

/// The diagnostic streams of a run: training, validation, and the bounded
/// validation output channels (empty unless outputs are logged).
pub struct Diagnostics<S> {
    pub train: S,
    pub valid: S,
    pub channels: Vec<S>,
}

impl Diagnostics<FileSink> {
    /// One `FileSink` per directory of `paths`.
    pub fn create(paths: &RunPaths) -> Result<Diagnostics<FileSink>> {
        Ok(Diagnostics {
            train: FileSink::create(&paths.train)?,
            valid: FileSink::create(&paths.valid)?,
            channels: paths
                .channels
                .iter()
                .map(FileSink::create)
                .collect::<Result<_>>()?,
        })
    }
}

impl Diagnostics<RecordingSink> {
    pub fn recording(channel_count: usize) -> Diagnostics<RecordingSink> {
        Diagnostics {
            train: RecordingSink::new(),
            valid: RecordingSink::new(),
            channels: vec![RecordingSink::new(); channel_count],
        }
    }
}

/// Where the orchestrator is in its epoch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Train { epoch: usize },
    Validate { epoch: usize },
    Checkpoint { epoch: usize },
    Done,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: RunState,
    pub epochs: Vec<EpochSummary>,
}

/// Drives the epoch loop: train, validate, checkpoint, log, for every epoch
/// in order.
///
/// Owns both models, the combined optimizer built over their parameters and
/// the run state. Any error ends the run where it happened.
pub struct RunOrchestrator<D, P, L, S, C> {
    config: RunConfig,
    depth_net: D,
    pose_net: P,
    loss: L,
    optimizer: Adam,
    diagnostics: Diagnostics<S>,
    store: C,
    log_summary: PathBuf,
    log_full: PathBuf,
    state: RunState,
    phase: RunPhase,
    train_scales: Option<usize>,
    progress: RunProgress,
    progress_tx: Option<Sender<EpochSummary>>,
}

impl<D, P, L, S, C> RunOrchestrator<D, P, L, S, C>
where
    D: DepthModel,
    P: PoseMaskModel,
    L: LossEngine,
    S: DiagnosticSink,
    C: CheckpointStore,
{
    /// Validates `config` and builds one optimizer over both models.
    /// Progress logs are written under `log_dir`.
    ///
    /// `diagnostics` must carry exactly `config.channel_count()` validation
    /// channels, so that training and validation agree on whether outputs
    /// are logged.
    pub fn new(
        config: RunConfig,
        depth_net: D,
        pose_net: P,
        loss: L,
        diagnostics: Diagnostics<S>,
        store: C,
        log_dir: &Path,
    ) -> Result<Self> {
        config.validate()?;
        if diagnostics.channels.len() != config.channel_count() {
            return Err(Error::Configuration(format!(
                "{} validation channels given, {} expected (log_output = {})",
                diagnostics.channels.len(),
                config.channel_count(),
                config.log_output
            )));
        }
        info!("=> setting adam solver");
        let optimizer = CombinedOptimizerBuilder::from_run_config(&config)
            .add_modules([&depth_net as &dyn TrainableModule, &pose_net])
            .build();
        debug!(
            "optimizing {} tensors ({} scalars)",
            optimizer.num_parameters(),
            optimizer.num_scalars()
        );
        let progress = RunProgress::new(config.epochs);
        Ok(RunOrchestrator {
            log_summary: log_dir.join(&config.log_summary),
            log_full: log_dir.join(&config.log_full),
            config,
            depth_net,
            pose_net,
            loss,
            optimizer,
            diagnostics,
            store,
            state: RunState::new(),
            phase: RunPhase::Idle,
            train_scales: None,
            progress,
            progress_tx: None,
        })
    }

    /// Sends an `EpochSummary` after every epoch. A dropped receiver is ignored.
    pub fn with_progress(mut self, tx: Sender<EpochSummary>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn depth_net(&self) -> &D {
        &self.depth_net
    }

    pub fn pose_net(&self) -> &P {
        &self.pose_net
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    pub fn diagnostics(&self) -> &Diagnostics<S> {
        &self.diagnostics
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Epoch loop
    // -----------------------------------------------------------------------

    /// Trains for `config.epochs` epochs. Can run once.
    ///
    /// # Arguments
    /// - `train` — training batches, one new pass per epoch (truncated to `epoch_size`)
    /// - `val`   — validation batches, one full pass per epoch
    ///
    /// # Errors
    /// The first error of any phase ends the run. Epochs completed before it
    /// keep their checkpoints and log rows.
    pub fn run<T, V>(&mut self, train: &mut T, val: &mut V) -> Result<RunReport>
    where
        T: BatchSource + ?Sized,
        V: BatchSource + ?Sized,
    {
        if self.phase != RunPhase::Idle {
            return Err(Error::Configuration(format!(
                "run started in phase {:?}",
                self.phase
            )));
        }
        AppendLog::create(&self.log_summary, &SUMMARY_HEADER)?;
        AppendLog::create(&self.log_full, &FULL_HEADER)?;
        info!(
            "{} epochs of {} steps, {} validation batches",
            self.config.epochs,
            self.config
                .effective_epoch_size(train.num_batches())
                .min(train.num_batches()),
            val.num_batches()
        );

        let mut epochs = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            let summary = self.run_epoch(epoch, train, val)?;
            if let Some(tx) = &self.progress_tx {
                if tx.send(summary.clone()).is_err() {
                    debug!("progress receiver dropped");
                }
            }
            epochs.push(summary);
            self.progress.epoch_done();
        }

        self.progress.finish();
        self.phase = RunPhase::Done;
        Ok(RunReport {
            state: self.state,
            epochs,
        })
    }

    fn run_epoch<T, V>(&mut self, epoch: usize, train: &mut T, val: &mut V) -> Result<EpochSummary>
    where
        T: BatchSource + ?Sized,
        V: BatchSource + ?Sized,
    {
        let started = Instant::now();
        let total_epochs = self.config.epochs;
        self.progress
            .suspend(|| info!("Epoch {}/{}", epoch + 1, total_epochs));

        // ── Train ─────────────────────────────────────────────────────────
        self.phase = RunPhase::Train { epoch };
        let train_len = self
            .config
            .effective_epoch_size(train.num_batches())
            .min(train.num_batches());
        let bar = self.progress.phase(train_len, "Train");
        let mut full_log = AppendLog::open(&self.log_full)?;
        let mut ctx = EpochContext {
            depth_net: &mut self.depth_net,
            pose_net: &mut self.pose_net,
            loss: &self.loss,
            config: &self.config,
        };
        let trained = train_epoch(
            &mut ctx,
            train,
            &mut self.optimizer,
            &mut self.state,
            &mut full_log,
            &mut self.diagnostics.train,
            &bar,
        )?;
        self.train_scales = Some(trained.num_scales);
        self.progress
            .suspend(|| info!(" * Avg Loss : {:.3}", trained.average_loss));

        // ── Validate ──────────────────────────────────────────────────────
        self.phase = RunPhase::Validate { epoch };
        let validated = self.validate(epoch, val)?;
        self.emit_validation_scalars(&validated)?;

        // ── Checkpoint and summary ────────────────────────────────────────
        self.phase = RunPhase::Checkpoint { epoch };
        let (is_best, best) =
            CheckpointPolicy::decide(self.state.best_photo_loss, validated.photometric_loss);
        self.state.best_photo_loss = Some(best);
        self.store.save(&CheckpointRecord {
            epoch,
            is_best,
            depth: self.depth_net.state(),
            pose_mask: self.pose_net.state(),
        })?;
        AppendLog::open(&self.log_summary)?.append(&[trained.average_loss, validated.total_loss])?;
        if is_best {
            self.progress
                .suspend(|| info!("new best validation photometric loss {best:.4}"));
        }

        self.phase = RunPhase::Idle;
        Ok(EpochSummary {
            epoch: epoch + 1,
            total_epochs: self.config.epochs,
            train_loss: trained.average_loss,
            val_photometric_loss: validated.photometric_loss,
            val_mask_loss: validated.mask_loss,
            val_total_loss: validated.total_loss,
            is_best,
            global_step: self.state.global_step,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn validate<V: BatchSource + ?Sized>(&mut self, epoch: usize, val: &mut V) -> Result<ValidationOutcome> {
        let mut ctx = EpochContext {
            depth_net: &mut self.depth_net,
            pose_net: &mut self.pose_net,
            loss: &self.loss,
            config: &self.config,
        };
        let bar = self.progress.phase(val.num_batches(), "Valid");
        let validated = validate_epoch(&mut ctx, val, &mut self.diagnostics.channels, epoch, &bar)?;
        self.progress.suspend(|| {
            info!(
                " * Avg Photo Loss : {:.3}, Valid Loss : {:.3}, Total Loss : {:.3}",
                validated.photometric_loss, validated.mask_loss, validated.total_loss
            )
        });
        Ok(validated)
    }

    /// Validation runs at the finest scale only; its losses are scaled by the
    /// training scale count so both curves share an axis.
    fn emit_validation_scalars(&mut self, validated: &ValidationOutcome) -> Result<()> {
        let Some(scales) = self.train_scales else {
            warn!("no training scales recorded, skipping validation scalars");
            return Ok(());
        };
        let factor = scales as f64;
        let step = self.state.global_step;
        let valid = &mut self.diagnostics.valid;
        valid.add_scalar("photometric_error", validated.photometric_loss * factor, step)?;
        valid.add_scalar("explanability_loss", validated.mask_loss * factor, step)?;
        valid.add_scalar("total_loss", validated.total_loss * factor, step)?;
        Ok(())
    }

    /// A single validation pass with epoch-0 semantics and no training or
    /// checkpointing.
    pub fn evaluate_only<V: BatchSource + ?Sized>(&mut self, val: &mut V) -> Result<ValidationOutcome> {
        self.phase = RunPhase::Validate { epoch: 0 };
        let validated = self.validate(0, val);
        self.phase = RunPhase::Done;
        validated
    }
}
