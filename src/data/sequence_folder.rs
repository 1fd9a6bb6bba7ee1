use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::DatasetFormat;
use crate::data::augment::{normalize_sample, Augmentation};
use crate::data::batch::Sample;
use crate::error::{Error, Result};
use crate::math::camera::Intrinsics;
use crate::math::frame::Image;
use crate::math::matrix::Matrix;

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Random access to samples. Shared read-only between loader workers.
pub trait SampleDataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads sample `index`. `rng` drives augmentation only.
    fn sample(&self, index: usize, rng: &mut StdRng) -> Result<Sample>;
}

/// Which scene list to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Validation,
}

impl Split {
    fn list_file(self) -> &'static str {
        match self {
            Split::Train => "train.txt",
            Split::Validation => "val.txt",
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Sequential {
        target: PathBuf,
        references: Vec<PathBuf>,
        intrinsics: Intrinsics,
    },
    Stacked {
        image: PathBuf,
        intrinsics: Intrinsics,
    },
}

/// Frame sequences read from scene folders.
///
/// ```text
/// root/train.txt            scene names, one per line
/// root/val.txt
/// root/<scene>/cam.txt      sequential: 3x3 intrinsics for the scene
/// root/<scene>/0000000.jpg
/// root/<scene>/<stem>.jpg   stacked: L frames side by side
/// root/<scene>/<stem>_cam.txt
/// ```
#[derive(Debug, Clone)]
pub struct SequenceFolder {
    entries: Vec<Entry>,
    sequence_length: usize,
    augmentation: Option<Augmentation>,
}

impl SequenceFolder {
    /// Indexes every sample of `split`. Training splits get the default
    /// augmentation; the sample order is shuffled once with `seed`.
    pub fn open(
        root: &Path,
        format: DatasetFormat,
        split: Split,
        sequence_length: usize,
        seed: u64,
    ) -> Result<SequenceFolder> {
        if sequence_length < 2 || sequence_length % 2 == 0 {
            return Err(Error::Configuration(format!(
                "sequence length must be odd, got {sequence_length}"
            )));
        }
        let scenes = read_scene_list(root, split)?;
        let mut entries = Vec::new();
        for scene in &scenes {
            let found = match format {
                DatasetFormat::Sequential => sequential_entries(scene, sequence_length)?,
                DatasetFormat::Stacked => stacked_entries(scene)?,
            };
            debug!("{}: {} samples", scene.display(), found.len());
            entries.extend(found);
        }
        entries.shuffle(&mut StdRng::seed_from_u64(seed));
        info!(
            "{} samples found in {} {:?} scenes",
            entries.len(),
            scenes.len(),
            split
        );

        Ok(SequenceFolder {
            entries,
            sequence_length,
            augmentation: match split {
                Split::Train => Some(Augmentation::training()),
                Split::Validation => None,
            },
        })
    }

    pub fn with_augmentation(mut self, augmentation: Option<Augmentation>) -> Self {
        self.augmentation = augmentation;
        self
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn load(&self, entry: &Entry) -> Result<Sample> {
        match entry {
            Entry::Sequential {
                target,
                references,
                intrinsics,
            } => Ok(Sample {
                target: load_frame(target)?,
                references: references
                    .iter()
                    .map(|p| load_frame(p))
                    .collect::<Result<_>>()?,
                intrinsics: *intrinsics,
            }),
            Entry::Stacked { image, intrinsics } => {
                let stacked = load_frame(image)?;
                let mut frames = split_stacked(&stacked, self.sequence_length, image)?;
                let target = frames.remove(self.sequence_length / 2);
                Ok(Sample {
                    target,
                    references: frames,
                    intrinsics: *intrinsics,
                })
            }
        }
    }
}

impl SampleDataset for SequenceFolder {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn sample(&self, index: usize, rng: &mut StdRng) -> Result<Sample> {
        let entry = self.entries.get(index).ok_or_else(|| {
            Error::DataSource(format!(
                "sample {index} out of range ({} samples)",
                self.entries.len()
            ))
        })?;
        let mut sample = self.load(entry)?;
        if let Some(augmentation) = &self.augmentation {
            sample = augmentation.apply(sample, rng);
        }
        Ok(normalize_sample(sample))
    }
}

fn read_scene_list(root: &Path, split: Split) -> Result<Vec<PathBuf>> {
    let list = root.join(split.list_file());
    let text = fs::read_to_string(&list)
        .map_err(|e| Error::DataSource(format!("{}: {e}", list.display())))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| root.join(l))
        .collect())
}

fn read_intrinsics(path: &Path) -> Result<Intrinsics> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::DataSource(format!("{}: {e}", path.display())))?;
    Intrinsics::parse(&text)
}

fn is_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn sorted_frames(scene: &Path) -> Result<Vec<PathBuf>> {
    let dir = fs::read_dir(scene)
        .map_err(|e| Error::DataSource(format!("{}: {e}", scene.display())))?;
    let mut frames = Vec::new();
    for entry in dir {
        let path = entry?.path();
        if is_frame(&path) {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Every frame with `(L-1)/2` neighbours on each side; references ordered
/// by shift `-d..-1, 1..d`.
fn sequential_entries(scene: &Path, sequence_length: usize) -> Result<Vec<Entry>> {
    let intrinsics = read_intrinsics(&scene.join("cam.txt"))?;
    let frames = sorted_frames(scene)?;
    let demi = (sequence_length - 1) / 2;
    if frames.len() < sequence_length {
        return Ok(Vec::new());
    }
    let shifts: Vec<isize> = (-(demi as isize)..=demi as isize).filter(|&s| s != 0).collect();
    Ok((demi..frames.len() - demi)
        .map(|i| Entry::Sequential {
            target: frames[i].clone(),
            references: shifts
                .iter()
                .map(|&s| frames[(i as isize + s) as usize].clone())
                .collect(),
            intrinsics,
        })
        .collect())
}

fn stacked_entries(scene: &Path) -> Result<Vec<Entry>> {
    sorted_frames(scene)?
        .into_iter()
        .map(|image| {
            let stem = image
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let intrinsics = read_intrinsics(&scene.join(format!("{stem}_cam.txt")))?;
            Ok(Entry::Stacked { image, intrinsics })
        })
        .collect()
}

/// Decodes an image file into RGB channels scaled to `[0, 1]`.
pub fn load_frame(path: &Path) -> Result<Image> {
    let rgb = image::open(path)?.to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let mut channels = vec![Matrix::zeros(h, w); 3];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for (channel, &value) in channels.iter_mut().zip(pixel.0.iter()) {
            channel.set(y as usize, x as usize, value as f64 / 255.0);
        }
    }
    Ok(Image::new(channels))
}

fn split_stacked(stacked: &Image, sequence_length: usize, path: &Path) -> Result<Vec<Image>> {
    let width = stacked.width();
    if width % sequence_length != 0 {
        return Err(Error::DataSource(format!(
            "{}: width {width} is not a multiple of sequence length {sequence_length}",
            path.display()
        )));
    }
    let frame_width = width / sequence_length;
    let height = stacked.height();
    Ok((0..sequence_length)
        .map(|k| stacked.map_channels(|c| c.crop(0, k * frame_width, height, frame_width)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    const CAM: &str = "10 0 2\n0 10 1.5\n0 0 1\n";

    fn write_frame(path: &Path, width: u32, shade: u8) {
        RgbImage::from_pixel(width, 3, Rgb([shade, shade, shade]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn sequential_scene_yields_inner_frames() {
        let dir = tempfile::tempdir().unwrap();
        let scene = dir.path().join("scene_a");
        fs::create_dir(&scene).unwrap();
        fs::write(scene.join("cam.txt"), CAM).unwrap();
        for i in 0..5u8 {
            write_frame(&scene.join(format!("{i:07}.png")), 4, i * 50);
        }
        fs::write(dir.path().join("val.txt"), "scene_a\n").unwrap();

        let folder = SequenceFolder::open(
            dir.path(),
            DatasetFormat::Sequential,
            Split::Validation,
            3,
            0,
        )
        .unwrap();
        assert_eq!(folder.len(), 3);

        let mut rng = StdRng::seed_from_u64(0);
        for index in 0..folder.len() {
            let sample = folder.sample(index, &mut rng).unwrap();
            assert_eq!(sample.references.len(), 2);
            // Shades are increasing, so the first reference is darker than the target.
            assert!(sample.references[0].channels[0].get(0, 0) < sample.target.channels[0].get(0, 0));
            assert!(sample.references[1].channels[0].get(0, 0) > sample.target.channels[0].get(0, 0));
        }
    }

    #[test]
    fn stacked_image_is_split_around_middle_frame() {
        let dir = tempfile::tempdir().unwrap();
        let scene = dir.path().join("s");
        fs::create_dir(&scene).unwrap();
        let mut img = RgbImage::new(12, 3);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x / 4) as u8 * 100; 3]);
        }
        img.save(scene.join("000.png")).unwrap();
        fs::write(scene.join("000_cam.txt"), CAM).unwrap();
        fs::write(dir.path().join("train.txt"), "s\n").unwrap();

        let folder = SequenceFolder::open(dir.path(), DatasetFormat::Stacked, Split::Train, 3, 1)
            .unwrap()
            .with_augmentation(None);
        let sample = folder.sample(0, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(sample.target.width(), 4);
        let shade = |img: &Image| img.channels[0].get(0, 0) * 0.2 + 0.5;
        assert!((shade(&sample.target) - 100.0 / 255.0).abs() < 1e-9);
        assert!((shade(&sample.references[0]) - 0.0).abs() < 1e-9);
        assert!((shade(&sample.references[1]) - 200.0 / 255.0).abs() < 1e-9);
    }

    #[test]
    fn missing_scene_list_is_a_data_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SequenceFolder::open(dir.path(), DatasetFormat::Sequential, Split::Train, 3, 0)
            .unwrap_err();
        assert!(matches!(err, Error::DataSource(_)));
    }
}
