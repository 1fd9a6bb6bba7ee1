use image::{Rgb, RgbImage};

use crate::math::frame::Image;
use crate::math::matrix::Matrix;

/// Colour maps for single-channel maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    /// Grey with a blue tint; used for disparities and masks.
    Bone,
    /// Violet to red; used for depth.
    Rainbow,
}

impl Colormap {
    /// RGB in `[0, 1]` for `x` in `[0, 1]`; `x` is clamped first.
    pub fn rgb(self, x: f64) -> [f64; 3] {
        let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
        match self {
            Colormap::Bone => [
                piecewise(x, &[(0.0, 0.0), (0.746032, 0.652778), (1.0, 1.0)]),
                piecewise(
                    x,
                    &[(0.0, 0.0), (0.365079, 0.319444), (0.746032, 0.777778), (1.0, 1.0)],
                ),
                piecewise(x, &[(0.0, 0.0), (0.365079, 0.444444), (1.0, 1.0)]),
            ],
            Colormap::Rainbow => [
                (2.0 * x - 0.5).abs().min(1.0),
                (std::f64::consts::PI * x).sin().max(0.0),
                (std::f64::consts::FRAC_PI_2 * x).cos().max(0.0),
            ],
        }
    }
}

/// Linear interpolation through sorted `(x, y)` knots.
fn piecewise(x: f64, knots: &[(f64, f64)]) -> f64 {
    for pair in knots.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        if x < x1 {
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    knots.last().map(|k| k.1).unwrap_or(0.0)
}

fn to_u8(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Renders a single-channel map divided by `max_value` through `colormap`.
/// With no `max_value` the map's own maximum is used.
pub fn render_map(map: &Matrix, max_value: Option<f64>, colormap: Colormap) -> RgbImage {
    let max_value = max_value.unwrap_or_else(|| map.max());
    let scale = if max_value > 0.0 && max_value.is_finite() {
        1.0 / max_value
    } else {
        0.0
    };
    RgbImage::from_fn(map.cols as u32, map.rows as u32, |x, y| {
        let rgb = colormap.rgb(map.get(y as usize, x as usize) * scale);
        Rgb([to_u8(rgb[0]), to_u8(rgb[1]), to_u8(rgb[2])])
    })
}

/// Renders a normalized three-channel image as `0.5 + 0.5·x`.
pub fn render_image(image: &Image) -> RgbImage {
    let channel = |c: usize, x: u32, y: u32| {
        image
            .channels
            .get(c)
            .or_else(|| image.channels.first())
            .map(|m| 0.5 + 0.5 * m.get(y as usize, x as usize))
            .unwrap_or(0.0)
    };
    RgbImage::from_fn(image.width() as u32, image.height() as u32, |x, y| {
        Rgb([
            to_u8(channel(0, x, y)),
            to_u8(channel(1, x, y)),
            to_u8(channel(2, x, y)),
        ])
    })
}
