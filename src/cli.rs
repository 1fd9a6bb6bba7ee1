use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use log::info;

use crate::baseline::{BaselineDispNet, BaselineLossEngine, BaselinePoseExpNet};
use crate::config::{run_dir, DatasetFormat, LossWeights, RunConfig, RunPaths};
use crate::data::{DataLoader, SequenceFolder, Split};
use crate::train::{load_pretrained, Diagnostics, JsonCheckpointStore, RunOrchestrator};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sfm-train",
    about = "Jointly train a depth network and a pose/explainability network on image sequences"
)]
pub struct TrainArgs {
    /// Path to the dataset folder.
    pub data: PathBuf,
    /// Dataset layout.
    #[arg(long, value_enum, default_value_t = DatasetFormat::Sequential)]
    pub dataset_format: DatasetFormat,
    /// Data loading threads.
    #[arg(short = 'j', long, default_value_t = 4)]
    pub workers: usize,
    #[arg(long, default_value_t = 200)]
    pub epochs: usize,
    /// Steps per epoch; 0 means a full pass over the training set.
    #[arg(long, default_value_t = 0)]
    pub epoch_size: usize,
    #[arg(short = 'b', long, default_value_t = 4)]
    pub batch_size: usize,
    #[arg(long = "lr", visible_alias = "learning-rate", default_value_t = 2e-4)]
    pub learning_rate: f64,
    /// Adam β1.
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,
    /// Adam β2.
    #[arg(long, default_value_t = 0.999)]
    pub beta: f64,
    #[arg(long = "weight-decay", visible_alias = "wd", default_value_t = 5e-3)]
    pub weight_decay: f64,
    /// Batches between progress lines.
    #[arg(long, default_value_t = 10)]
    pub print_freq: usize,
    /// Run one validation pass on the pre-trained weights and exit.
    #[arg(short = 'e', long)]
    pub evaluate: bool,
    /// Checkpoint to initialise the depth network from.
    #[arg(long)]
    pub pretrained_disp: Option<PathBuf>,
    /// Checkpoint to initialise the pose/explainability network from.
    #[arg(long = "pretrained-exppose")]
    pub pretrained_exp_pose: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Per-epoch log file name.
    #[arg(long, default_value = "progress_log_summary.csv")]
    pub log_summary: String,
    /// Per-step log file name.
    #[arg(long, default_value = "progress_log_full.csv")]
    pub log_full: String,
    #[arg(short = 'p', long, default_value_t = 1.0)]
    pub photo_loss_weight: f64,
    #[arg(short = 'm', long, default_value_t = 1.0)]
    pub mask_loss_weight: f64,
    #[arg(short = 's', long, default_value_t = 0.2)]
    pub smooth_loss_weight: f64,
    /// Frames per sample, target included. Must be odd.
    #[arg(long, default_value_t = 3)]
    pub sequence_length: usize,
    /// Log disparity maps, warped images and masks, and pose histograms.
    #[arg(long)]
    pub log_output: bool,
    /// Directory the run directories are created under.
    #[arg(long, default_value = "checkpoints")]
    pub checkpoints_root: PathBuf,
}

impl TrainArgs {
    pub fn to_config(&self) -> RunConfig {
        RunConfig {
            data: self.data.clone(),
            dataset_format: self.dataset_format,
            workers: self.workers,
            epochs: self.epochs,
            epoch_size: self.epoch_size,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            momentum: self.momentum,
            beta: self.beta,
            weight_decay: self.weight_decay,
            print_freq: self.print_freq,
            evaluate: self.evaluate,
            pretrained_disp: self.pretrained_disp.clone(),
            pretrained_exp_pose: self.pretrained_exp_pose.clone(),
            seed: self.seed,
            log_summary: self.log_summary.clone(),
            log_full: self.log_full.clone(),
            loss_weights: LossWeights {
                photometric: self.photo_loss_weight,
                mask: self.mask_loss_weight,
                smoothness: self.smooth_loss_weight,
            },
            sequence_length: self.sequence_length,
            log_output: self.log_output,
            ..RunConfig::default()
        }
    }
}

/// Builds everything from the command line and trains, or evaluates with `--evaluate`.
pub fn run(args: TrainArgs) -> anyhow::Result<()> {
    let config = args.to_config();
    config.validate()?;

    let paths = RunPaths::new(run_dir(&args.checkpoints_root, &config, Local::now()), &config);
    info!("=> will save everything to {}", paths.root.display());
    paths
        .create_dirs()
        .with_context(|| format!("creating {}", paths.root.display()))?;
    config.save_json(&paths.config)?;

    info!("=> fetching scenes in '{}'", config.data.display());
    let train_set = SequenceFolder::open(
        &config.data,
        config.dataset_format,
        Split::Train,
        config.sequence_length,
        config.seed,
    )?;
    let val_set = SequenceFolder::open(
        &config.data,
        config.dataset_format,
        Split::Validation,
        config.sequence_length,
        config.seed,
    )?;
    let mut train_loader = DataLoader::new(train_set, config.batch_size, config.workers, true, config.seed);
    let mut val_loader = DataLoader::new(val_set, config.batch_size, config.workers, false, config.seed);

    info!("=> creating model");
    let mut disp_net = BaselineDispNet::new(config.seed);
    let mut pose_net = BaselinePoseExpNet::new(config.num_references());
    if let Some(path) = &config.pretrained_exp_pose {
        load_pretrained(&mut pose_net, path)
            .with_context(|| format!("loading {}", path.display()))?;
    }
    if let Some(path) = &config.pretrained_disp {
        load_pretrained(&mut disp_net, path)
            .with_context(|| format!("loading {}", path.display()))?;
    }

    let evaluate = config.evaluate;
    let diagnostics = Diagnostics::create(&paths)?;
    let mut orchestrator = RunOrchestrator::new(
        config,
        disp_net,
        pose_net,
        BaselineLossEngine::new(),
        diagnostics,
        JsonCheckpointStore::new(&paths.root),
        &paths.root,
    )?;

    if evaluate {
        let result = orchestrator.evaluate_only(&mut val_loader)?;
        info!(
            "=> evaluation: photometric {:.4}, explainability {:.4}, total {:.4}",
            result.photometric_loss, result.mask_loss, result.total_loss
        );
        return Ok(());
    }

    let report = orchestrator.run(&mut train_loader, &mut val_loader)?;
    info!(
        "=> done: {} epochs, {} steps, best photometric loss {:.4}",
        report.epochs.len(),
        report.state.global_step,
        report.state.best_photo_loss.unwrap_or(f64::NAN)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_run_config() {
        let args = TrainArgs::parse_from(["sfm-train", "/data/kitti"]);
        let config = args.to_config();
        assert_eq!(
            config,
            RunConfig {
                data: "/data/kitti".into(),
                ..RunConfig::default()
            }
        );
    }

    #[test]
    fn short_flags_and_aliases() {
        let args = TrainArgs::parse_from([
            "sfm-train", "d", "-b", "8", "-j", "0", "--wd", "0", "-p", "2", "-m", "0.5", "-s", "0.1",
            "--dataset-format", "stacked", "--learning-rate", "0.001", "-e",
        ]);
        let config = args.to_config();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.workers, 0);
        assert_eq!(config.weight_decay, 0.0);
        assert_eq!(config.dataset_format, DatasetFormat::Stacked);
        assert_eq!(config.learning_rate, 0.001);
        assert!(config.evaluate);
        assert!((config.loss_weights.combine(1.0, 1.0, 1.0) - 2.6).abs() < 1e-12);
    }

    #[test]
    fn unknown_dataset_format_is_a_usage_error() {
        assert!(TrainArgs::try_parse_from(["sfm-train", "d", "--dataset-format", "mixed"]).is_err());
    }
}
