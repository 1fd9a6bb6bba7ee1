use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// On-disk layout of the sequence dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    /// Each image holds `sequence_length` frames concatenated horizontally.
    Stacked,
    /// One folder per scene with individual frames and a shared `cam.txt`.
    Sequential,
}

/// Weights of the three loss terms in `total = w1·photo + w2·exp + w3·smooth`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub photometric: f64,
    pub mask: f64,
    pub smoothness: f64,
}

impl LossWeights {
    pub fn combine(&self, photo: f64, exp: f64, smooth: f64) -> f64 {
        self.photometric * photo + self.mask * exp + self.smoothness * smooth
    }
}

impl Default for LossWeights {
    fn default() -> Self {
        LossWeights {
            photometric: 1.0,
            mask: 1.0,
            smoothness: 0.2,
        }
    }
}

/// Configuration for a whole training run. Read-only once training starts.
///
/// # Fields
/// - `epoch_size`           — steps per epoch; `0` means one full pass over the loader
/// - `momentum`, `beta`     — Adam's first and second moment decay rates
/// - `print_freq`           — batches between progress lines
/// - `visualization_stride` — global steps between training image dumps
/// - `validation_channels`  — diagnostic channels created when `log_output` is set
/// - `log_output`           — emit images and pose histograms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub data: PathBuf,
    pub dataset_format: DatasetFormat,
    pub workers: usize,
    pub epochs: usize,
    pub epoch_size: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    pub beta: f64,
    pub weight_decay: f64,
    pub print_freq: usize,
    pub evaluate: bool,
    pub pretrained_disp: Option<PathBuf>,
    pub pretrained_exp_pose: Option<PathBuf>,
    pub seed: u64,
    pub log_summary: String,
    pub log_full: String,
    pub loss_weights: LossWeights,
    pub sequence_length: usize,
    pub log_output: bool,
    pub visualization_stride: usize,
    pub validation_channels: usize,
}

/// Most validation channels the run directory layout provides.
pub const MAX_VALIDATION_CHANNELS: usize = 3;

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            data: PathBuf::new(),
            dataset_format: DatasetFormat::Sequential,
            workers: 4,
            epochs: 200,
            epoch_size: 0,
            batch_size: 4,
            learning_rate: 2e-4,
            momentum: 0.9,
            beta: 0.999,
            weight_decay: 5e-3,
            print_freq: 10,
            evaluate: false,
            pretrained_disp: None,
            pretrained_exp_pose: None,
            seed: 0,
            log_summary: "progress_log_summary.csv".into(),
            log_full: "progress_log_full.csv".into(),
            loss_weights: LossWeights::default(),
            sequence_length: 3,
            log_output: false,
            visualization_stride: 200,
            validation_channels: MAX_VALIDATION_CHANNELS,
        }
    }
}

impl RunConfig {
    /// Rejects values the run cannot start with. Called before any training.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Configuration(msg));

        if self.batch_size == 0 {
            return fail("batch size must be at least 1".into());
        }
        if self.sequence_length < 2 || self.sequence_length % 2 == 0 {
            return fail(format!(
                "sequence length must be an odd number >= 3, got {}",
                self.sequence_length
            ));
        }
        if self.print_freq == 0 {
            return fail("print frequency must be at least 1".into());
        }
        if self.visualization_stride == 0 {
            return fail("visualization stride must be at least 1".into());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail(format!("learning rate must be positive, got {}", self.learning_rate));
        }
        for (name, value) in [("momentum", self.momentum), ("beta", self.beta)] {
            if !(0.0..1.0).contains(&value) {
                return fail(format!("{name} must lie in [0, 1), got {value}"));
            }
        }
        if !(self.weight_decay >= 0.0 && self.weight_decay.is_finite()) {
            return fail(format!("weight decay must be non-negative, got {}", self.weight_decay));
        }
        let w = &self.loss_weights;
        for (name, value) in [
            ("photometric", w.photometric),
            ("mask", w.mask),
            ("smoothness", w.smoothness),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return fail(format!("{name} loss weight must be non-negative, got {value}"));
            }
        }
        if self.validation_channels > MAX_VALIDATION_CHANNELS {
            return fail(format!(
                "at most {MAX_VALIDATION_CHANNELS} validation channels are supported, got {}",
                self.validation_channels
            ));
        }
        if self.evaluate && (self.pretrained_disp.is_none() || self.pretrained_exp_pose.is_none()) {
            return fail("--evaluate needs both --pretrained-disp and --pretrained-exppose".into());
        }
        Ok(())
    }

    /// Number of reference frames per sample.
    pub fn num_references(&self) -> usize {
        self.sequence_length.saturating_sub(1)
    }

    /// Steps per epoch: the configured size, or one full pass when it is 0.
    pub fn effective_epoch_size(&self, loader_len: usize) -> usize {
        if self.epoch_size == 0 {
            loader_len
        } else {
            self.epoch_size
        }
    }

    /// Diagnostic channels for validation output; none unless `log_output` is set.
    pub fn channel_count(&self) -> usize {
        if self.log_output {
            self.validation_channels
        } else {
            0
        }
    }

    /// Serializes the configuration to a pretty-printed JSON file.
    pub fn save_json(&self, path: &std::path::Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: &std::path::Path) -> Result<RunConfig> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn evaluate_without_weights_is_inconsistent() {
        let config = RunConfig {
            evaluate: true,
            pretrained_disp: Some("disp.json".into()),
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn even_sequence_length_is_rejected() {
        let config = RunConfig {
            sequence_length: 4,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_dataset_format_fails_to_parse() {
        let err = serde_json::from_str::<RunConfig>(r#"{"dataset_format": "interleaved"}"#);
        assert!(err.is_err());
        let ok: RunConfig = serde_json::from_str(r#"{"dataset_format": "stacked"}"#).unwrap();
        assert_eq!(ok.dataset_format, DatasetFormat::Stacked);
    }

    #[test]
    fn epoch_size_zero_uses_loader_length() {
        let config = RunConfig::default();
        assert_eq!(config.effective_epoch_size(17), 17);
        let config = RunConfig {
            epoch_size: 3,
            ..config
        };
        assert_eq!(config.effective_epoch_size(10), 3);
    }
}
