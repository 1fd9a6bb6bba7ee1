use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::Serialize;

use crate::error::Result;

/// Number of equal-width buckets in a recorded histogram.
pub const HISTOGRAM_BUCKETS: usize = 30;

/// Destination for scalars, images and histograms keyed by tag and step.
pub trait DiagnosticSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    fn add_image(&mut self, tag: &str, image: &RgbImage, step: usize) -> Result<()>;

    fn add_histogram(&mut self, tag: &str, values: &[f64], step: usize) -> Result<()>;
}

#[derive(Serialize)]
struct ScalarRecord<'a> {
    tag: &'a str,
    value: f64,
    step: usize,
}

/// Summary of a value distribution as written to `histograms.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramRecord {
    pub tag: String,
    pub step: usize,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub buckets: Vec<usize>,
}

impl HistogramRecord {
    pub fn new(tag: &str, values: &[f64], step: usize) -> HistogramRecord {
        let count = values.len();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = if count == 0 {
            0.0
        } else {
            values.iter().sum::<f64>() / count as f64
        };

        let mut buckets = vec![0; HISTOGRAM_BUCKETS];
        if count > 0 {
            let width = (max - min) / HISTOGRAM_BUCKETS as f64;
            for v in values {
                let slot = if width > 0.0 {
                    (((v - min) / width) as usize).min(HISTOGRAM_BUCKETS - 1)
                } else {
                    0
                };
                buckets[slot] += 1;
            }
        }

        HistogramRecord {
            tag: tag.to_string(),
            step,
            count,
            min: if count == 0 { 0.0 } else { min },
            max: if count == 0 { 0.0 } else { max },
            mean,
            buckets,
        }
    }
}

/// Writes one diagnostic stream into a directory:
///
/// - `scalars.jsonl`     one `{"tag", "value", "step"}` object per line
/// - `histograms.jsonl`  one `HistogramRecord` per line
/// - `images/<tag>_<step>.png`
pub struct FileSink {
    dir: PathBuf,
    scalars: File,
    histograms: File,
}

impl FileSink {
    pub fn create(dir: impl Into<PathBuf>) -> Result<FileSink> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("images"))?;
        let open = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))
        };
        Ok(FileSink {
            scalars: open("scalars.jsonl")?,
            histograms: open("histograms.jsonl")?,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn image_path(&self, tag: &str, step: usize) -> PathBuf {
        self.dir
            .join("images")
            .join(format!("{}_{step:08}.png", sanitize(tag)))
    }
}

/// Tags become file names: anything other than ASCII alphanumerics turns into `_`.
fn sanitize(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl DiagnosticSink for FileSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let mut line = serde_json::to_vec(&ScalarRecord { tag, value, step })?;
        line.push(b'\n');
        self.scalars.write_all(&line)?;
        Ok(())
    }

    fn add_image(&mut self, tag: &str, image: &RgbImage, step: usize) -> Result<()> {
        image.save(self.image_path(tag, step))?;
        Ok(())
    }

    fn add_histogram(&mut self, tag: &str, values: &[f64], step: usize) -> Result<()> {
        let mut line = serde_json::to_vec(&HistogramRecord::new(tag, values, step))?;
        line.push(b'\n');
        self.histograms.write_all(&line)?;
        Ok(())
    }
}

/// One call received by a `RecordingSink`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Scalar { tag: String, value: f64, step: usize },
    Image { tag: String, step: usize, width: u32, height: u32 },
    Histogram { tag: String, step: usize, values: Vec<f64> },
}

impl Event {
    pub fn tag(&self) -> &str {
        match self {
            Event::Scalar { tag, .. } | Event::Image { tag, .. } | Event::Histogram { tag, .. } => tag,
        }
    }

    pub fn step(&self) -> usize {
        match self {
            Event::Scalar { step, .. } | Event::Image { step, .. } | Event::Histogram { step, .. } => {
                *step
            }
        }
    }
}

/// Keeps every call in memory. Handy for inspecting what a run emitted.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub events: Vec<Event>,
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        RecordingSink::default()
    }

    pub fn scalars<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.events.iter().filter_map(move |e| match e {
            Event::Scalar { tag: t, value, step } if t == tag => Some((*step, *value)),
            _ => None,
        })
    }

    pub fn images(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter().filter(|e| matches!(e, Event::Image { .. }))
    }

    pub fn histograms(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter().filter(|e| matches!(e, Event::Histogram { .. }))
    }
}

impl DiagnosticSink for RecordingSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.events.push(Event::Scalar {
            tag: tag.to_string(),
            value,
            step,
        });
        Ok(())
    }

    fn add_image(&mut self, tag: &str, image: &RgbImage, step: usize) -> Result<()> {
        self.events.push(Event::Image {
            tag: tag.to_string(),
            step,
            width: image.width(),
            height: image.height(),
        });
        Ok(())
    }

    fn add_histogram(&mut self, tag: &str, values: &[f64], step: usize) -> Result<()> {
        self.events.push(Event::Histogram {
            tag: tag.to_string(),
            step,
            values: values.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_cover_range() {
        let values: Vec<f64> = (0..60).map(f64::from).collect();
        let h = HistogramRecord::new("val poses_tx", &values, 3);
        assert_eq!(h.count, 60);
        assert_eq!(h.buckets.iter().sum::<usize>(), 60);
        assert_eq!(h.buckets[HISTOGRAM_BUCKETS - 1], 2);
        assert_eq!((h.min, h.max), (0.0, 59.0));
    }

    #[test]
    fn empty_histogram_is_all_zero() {
        let h = HistogramRecord::new("t", &[], 0);
        assert_eq!(h.count, 0);
        assert!(h.buckets.iter().all(|&b| b == 0));
        assert_eq!(h.min, 0.0);
    }

    #[test]
    fn file_sink_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(dir.path().join("train")).unwrap();
        sink.add_scalar("total_loss", 0.5, 7).unwrap();
        sink.add_scalar("total_loss", 0.25, 8).unwrap();
        sink.add_image("train Input", &RgbImage::new(2, 2), 199).unwrap();
        sink.add_histogram("val poses_rz", &[0.0, 1.0], 1).unwrap();

        let scalars = fs::read_to_string(dir.path().join("train/scalars.jsonl")).unwrap();
        assert_eq!(scalars.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(scalars.lines().next().unwrap()).unwrap();
        assert_eq!(first["step"], 7);
        assert!(dir.path().join("train/images/train_Input_00000199.png").exists());
        let hist = fs::read_to_string(dir.path().join("train/histograms.jsonl")).unwrap();
        assert!(hist.contains("\"val poses_rz\""));
    }

    #[test]
    fn reopened_sinks_append_whole_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = FileSink::create(dir.path()).unwrap();
        let mut second = FileSink::create(dir.path()).unwrap();
        for step in 0..20 {
            first.add_scalar("photometric_error", step as f64, step).unwrap();
            second.add_scalar("total_loss", -(step as f64), step).unwrap();
            first
                .add_histogram("val poses_tx", &[0.1 * step as f64; 40], step)
                .unwrap();
        }
        drop((first, second));

        let scalars = fs::read_to_string(dir.path().join("scalars.jsonl")).unwrap();
        let records: Vec<serde_json::Value> = scalars
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 40);
        assert_eq!(records[1]["tag"], "total_loss");
        assert_eq!(records[39]["step"], 19);

        let hist = fs::read_to_string(dir.path().join("histograms.jsonl")).unwrap();
        for line in hist.lines() {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(record["count"], 40);
        }
        assert_eq!(hist.lines().count(), 20);
    }
}
