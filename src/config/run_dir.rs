use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::config::run_config::RunConfig;
use crate::error::Result;

/// Name of the run directory derived from the hyper-parameters, e.g.
/// `200epochs,epochSize1000,b4,lr0.0002`.
pub fn run_name(config: &RunConfig) -> String {
    let epoch_size = if config.epoch_size > 0 {
        format!(",epochSize{}", config.epoch_size)
    } else {
        String::new()
    };
    format!(
        "{}epochs{},b{},lr{}",
        config.epochs, epoch_size, config.batch_size, config.learning_rate
    )
}

/// `<root>/<run name>/<month-day-hour:minute>`.
pub fn run_dir(root: &Path, config: &RunConfig, now: DateTime<Local>) -> PathBuf {
    root.join(run_name(config))
        .join(now.format("%m-%d-%H:%M").to_string())
}

/// Paths of everything a run writes.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub train: PathBuf,
    pub valid: PathBuf,
    pub channels: Vec<PathBuf>,
    pub log_summary: PathBuf,
    pub log_full: PathBuf,
    pub config: PathBuf,
}

impl RunPaths {
    pub fn new(root: PathBuf, config: &RunConfig) -> RunPaths {
        let valid = root.join("valid");
        RunPaths {
            train: root.join("train"),
            channels: (0..config.channel_count())
                .map(|i| valid.join(i.to_string()))
                .collect(),
            valid,
            log_summary: root.join(&config.log_summary),
            log_full: root.join(&config.log_full),
            config: root.join("config.json"),
            root,
        }
    }

    /// Creates the run directory tree.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.root, &self.train, &self.valid]
            .into_iter()
            .chain(self.channels.iter())
        {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn name_matches_hyper_parameters() {
        let config = RunConfig::default();
        assert_eq!(run_name(&config), "200epochs,b4,lr0.0002");
        let config = RunConfig {
            epoch_size: 1000,
            epochs: 50,
            ..config
        };
        assert_eq!(run_name(&config), "50epochs,epochSize1000,b4,lr0.0002");
    }

    #[test]
    fn timestamp_is_month_day_hour_minute() {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap();
        let dir = run_dir(Path::new("checkpoints"), &RunConfig::default(), now);
        assert_eq!(
            dir,
            Path::new("checkpoints/200epochs,b4,lr0.0002/03-07-09:05")
        );
    }

    #[test]
    fn channels_exist_only_with_log_output() {
        let mut config = RunConfig::default();
        assert!(RunPaths::new("run".into(), &config).channels.is_empty());
        config.log_output = true;
        let paths = RunPaths::new("run".into(), &config);
        assert_eq!(paths.channels.len(), 3);
        assert_eq!(paths.channels[2], Path::new("run/valid/2"));
    }
}
