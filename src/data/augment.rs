use rand::Rng;

use crate::data::batch::Sample;
use crate::math::frame::Image;

/// Channel mean and standard deviation applied after augmentation.
pub const NORMALIZE_MEAN: f64 = 0.5;
pub const NORMALIZE_STD: f64 = 0.2;

/// Train-time augmentations. Every frame of a sample receives the same
/// transform so the sequence stays geometrically consistent, and the
/// intrinsics are updated to match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Augmentation {
    pub flip: bool,
    pub scale_crop: bool,
    /// Upper bound of the per-axis zoom factor drawn from `[1, max_scale]`.
    pub max_scale: f64,
}

impl Augmentation {
    pub fn training() -> Augmentation {
        Augmentation {
            flip: true,
            scale_crop: true,
            max_scale: 1.15,
        }
    }

    pub fn apply<R: Rng + ?Sized>(&self, sample: Sample, rng: &mut R) -> Sample {
        let mut sample = sample;
        if self.flip && rng.gen_bool(0.5) {
            sample = flip_horizontal(sample);
        }
        if self.scale_crop && self.max_scale > 1.0 {
            sample = random_scale_crop(sample, self.max_scale, rng);
        }
        sample
    }
}

fn flip_horizontal(sample: Sample) -> Sample {
    let width = sample.target.width();
    let flip = |img: &Image| img.map_channels(|c| c.flip_horizontal());
    Sample {
        target: flip(&sample.target),
        references: sample.references.iter().map(flip).collect(),
        intrinsics: sample.intrinsics.flipped(width),
    }
}

fn random_scale_crop<R: Rng + ?Sized>(sample: Sample, max_scale: f64, rng: &mut R) -> Sample {
    let (h, w) = (sample.target.height(), sample.target.width());
    let x_scale = rng.gen_range(1.0..max_scale);
    let y_scale = rng.gen_range(1.0..max_scale);
    let scaled_h = ((h as f64 * y_scale) as usize).max(h);
    let scaled_w = ((w as f64 * x_scale) as usize).max(w);
    let offset_y = rng.gen_range(0..=scaled_h - h);
    let offset_x = rng.gen_range(0..=scaled_w - w);

    let transform = |img: &Image| {
        img.map_channels(|c| {
            c.resize_bilinear(scaled_h, scaled_w)
                .crop(offset_y, offset_x, h, w)
        })
    };
    Sample {
        target: transform(&sample.target),
        references: sample.references.iter().map(transform).collect(),
        intrinsics: sample
            .intrinsics
            .scaled(x_scale, y_scale)
            .offset(offset_x as f64, offset_y as f64),
    }
}

/// Maps `[0, 1]` pixels to `(x − mean) / std`.
pub fn normalize(image: &Image) -> Image {
    image.map_channels(|c| c.map(|x| (x - NORMALIZE_MEAN) / NORMALIZE_STD))
}

pub fn normalize_sample(sample: Sample) -> Sample {
    Sample {
        target: normalize(&sample.target),
        references: sample.references.iter().map(normalize).collect(),
        intrinsics: sample.intrinsics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::camera::Intrinsics;
    use crate::math::matrix::Matrix;
    use rand::{rngs::StdRng, SeedableRng};

    fn sample() -> Sample {
        let ramp = Matrix::from_data(vec![vec![0.0, 0.25, 0.5, 0.75]; 3]);
        let img = Image::new(vec![ramp.clone(), ramp.clone(), ramp]);
        Sample {
            target: img.clone(),
            references: vec![img.clone(), img],
            intrinsics: Intrinsics::new(2.0, 2.0, 1.0, 1.5),
        }
    }

    #[test]
    fn flip_mirrors_frames_and_principal_point() {
        let out = flip_horizontal(sample());
        assert_eq!(out.target.channels[0].get(0, 0), 0.75);
        assert_eq!(out.intrinsics.0[0][2], 3.0);
    }

    #[test]
    fn scale_crop_keeps_frame_size() {
        let mut rng = StdRng::seed_from_u64(7);
        let out = random_scale_crop(sample(), 1.15, &mut rng);
        assert_eq!((out.target.height(), out.target.width()), (3, 4));
        assert!(out.references.iter().all(|r| r.width() == 4 && r.height() == 3));
        assert!(out.intrinsics.0[0][0] >= 2.0);
    }

    #[test]
    fn normalize_centres_mid_grey() {
        let img = Image::filled(3, 2, 2, 0.5);
        assert!(normalize(&img).channels.iter().all(|c| c.max() == 0.0));
    }
}
