use serde::{Deserialize, Serialize};

use crate::math::matrix::Matrix;

/// A multi-channel image stored as one `Matrix` per channel (C × H × W).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub channels: Vec<Matrix>,
}

impl Image {
    /// Builds an image from channels that must all share one shape.
    pub fn new(channels: Vec<Matrix>) -> Image {
        if let Some(first) = channels.first() {
            assert!(
                channels.iter().all(|c| c.same_shape(first)),
                "Image channels are of incorrect sizes"
            );
        }
        Image { channels }
    }

    pub fn filled(channels: usize, height: usize, width: usize, value: f64) -> Image {
        Image {
            channels: vec![Matrix::filled(height, width, value); channels],
        }
    }

    pub fn height(&self) -> usize {
        self.channels.first().map(|c| c.rows).unwrap_or(0)
    }

    pub fn width(&self) -> usize {
        self.channels.first().map(|c| c.cols).unwrap_or(0)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn map_channels<F>(&self, functor: F) -> Image
    where
        F: Fn(&Matrix) -> Matrix,
    {
        Image {
            channels: self.channels.iter().map(functor).collect(),
        }
    }

    /// Per-pixel mean over channels.
    pub fn grey(&self) -> Matrix {
        let mut res = Matrix::zeros(self.height(), self.width());
        if self.channels.is_empty() {
            return res;
        }
        for channel in &self.channels {
            for (acc, v) in res.data.iter_mut().zip(&channel.data) {
                *acc += v;
            }
        }
        let n = self.channels.len() as f64;
        res.map(|x| x / n)
    }

    pub fn adaptive_avg_pool(&self, height: usize, width: usize) -> Image {
        self.map_channels(|c| c.adaptive_avg_pool(height, width))
    }

    /// `0.5 · |self − other|`, the photometric residual as it is displayed.
    pub fn half_abs_diff(&self, other: &Image) -> Image {
        Image {
            channels: self
                .channels
                .iter()
                .zip(&other.channels)
                .map(|(a, b)| a.zip_map(b, |x, y| 0.5 * (x - y).abs()))
                .collect(),
        }
    }
}
