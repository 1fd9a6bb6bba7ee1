use crate::config::LossWeights;
use crate::error::{Error, Result};
use crate::loss::engine::{LossEngine, LossInputs, OutputGradients};
use crate::math::camera::Intrinsics;
use crate::math::frame::Image;
use crate::math::matrix::Matrix;
use crate::model::output::{MaskPyramid, Pose, PoseMaskGradients, Pyramid};

const EPS: f64 = 1e-12;
/// Each coarser scale's smoothness term is weighted down by this factor.
pub const SMOOTHNESS_DECAY: f64 = 2.3;

/// Binary cross-entropy of `p` against the label 1, per element.
fn bce_ones(p: f64) -> f64 {
    -(p + EPS).ln()
}

fn bce_ones_derivative(p: f64) -> f64 {
    -1.0 / (p + EPS)
}

/// Reference loss formulas.
///
/// The photometric term is the mask-weighted mean absolute difference between
/// the target and each reference synthesised into its view, summed over
/// references and scales. `warp` is the identity reprojection, so geometry
/// contributes no gradient here; a real view-synthesis engine replaces it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineLossEngine;

impl BaselineLossEngine {
    pub fn new() -> BaselineLossEngine {
        BaselineLossEngine
    }

    /// Photometric loss and its gradient with respect to the masks.
    fn photometric(&self, inputs: &LossInputs<'_>, weight: f64) -> Result<(f64, MaskPyramid)> {
        let batch = inputs.batch;
        let mut loss = 0.0;
        let mut mask_grad = inputs.masks.zeros_like();

        for (k, depth_scale) in inputs.depth.scales.iter().enumerate() {
            let masks = inputs
                .masks
                .scales
                .get(k)
                .ok_or_else(|| Error::shape("mask scales", k + 1, inputs.masks.num_scales()))?;
            for (j, references) in batch.references.iter().enumerate() {
                let mut sum = 0.0;
                let mut count = 0usize;
                let mut residuals = Vec::with_capacity(batch.len());
                for (s, (target, reference)) in batch.targets.iter().zip(references).enumerate() {
                    let depth = &depth_scale[s];
                    let (h, w) = (depth.rows, depth.cols);
                    let target = target.adaptive_avg_pool(h, w);
                    let reference = reference.adaptive_avg_pool(h, w);
                    let pose = inputs
                        .poses
                        .get(s)
                        .and_then(|p| p.get(j))
                        .ok_or_else(|| Error::shape("poses", j + 1, 0))?;
                    let warped = self.warp(
                        &reference,
                        depth,
                        pose,
                        &batch.intrinsics[s],
                        &batch.intrinsics_inv[s],
                    )?;
                    // Σ_c |target − warped| per pixel.
                    let mut residual = Matrix::zeros(h, w);
                    for (tc, wc) in target.channels.iter().zip(&warped.channels) {
                        residual = residual + tc.zip_map(wc, |a, b| (a - b).abs());
                    }
                    let mask = masks
                        .get(s)
                        .and_then(|m| m.get(j))
                        .ok_or_else(|| Error::shape("masks per sample", j + 1, 0))?;
                    if !mask.same_shape(&residual) {
                        return Err(Error::shape("explainability mask", residual.len(), mask.len()));
                    }
                    sum += residual.zip_map(mask, |r, m| r * m).sum();
                    count += residual.len() * target.num_channels();
                    residuals.push(residual);
                }
                if count == 0 {
                    continue;
                }
                loss += sum / count as f64;
                for (s, residual) in residuals.into_iter().enumerate() {
                    mask_grad.scales[k][s][j] = residual * (weight / count as f64);
                }
            }
        }
        Ok((loss, mask_grad))
    }

    /// Explainability loss and its gradient.
    fn explainability(&self, masks: &MaskPyramid, weight: f64) -> (f64, MaskPyramid) {
        let mut loss = 0.0;
        let mut grad = masks.zeros_like();
        for (k, scale) in masks.scales.iter().enumerate() {
            let count: usize = scale.iter().flatten().map(Matrix::len).sum();
            if count == 0 {
                continue;
            }
            let n = count as f64;
            for (s, sample) in scale.iter().enumerate() {
                for (j, mask) in sample.iter().enumerate() {
                    loss += mask.data.iter().map(|&p| bce_ones(p)).sum::<f64>() / n;
                    grad.scales[k][s][j] = mask.map(|p| weight * bce_ones_derivative(p) / n);
                }
            }
        }
        (loss, grad)
    }

    /// Second-order smoothness and its gradient with respect to disparity.
    fn smoothness(&self, disparities: &Pyramid, weight: f64) -> (f64, Pyramid) {
        let mut loss = 0.0;
        let mut grad = disparities.zeros_like();
        let mut scale_weight = 1.0;

        for (k, scale) in disparities.scales.iter().enumerate() {
            let Some(first) = scale.first() else { continue };
            let (rows, cols) = (first.rows, first.cols);
            let samples = scale.len();
            // Element counts of dx2, dxdy, dydx, dy2 over the batch.
            let n_dx2 = samples * rows * cols.saturating_sub(2);
            let n_dxdy = samples * rows.saturating_sub(1) * cols.saturating_sub(1);
            let n_dy2 = samples * rows.saturating_sub(2) * cols;
            let inv = |n: usize| if n == 0 { 0.0 } else { 1.0 / n as f64 };

            for (s, m) in scale.iter().enumerate() {
                let dx = m.diff_x();
                let dy = m.diff_y();
                let dx2 = dx.diff_x();
                let dxdy = dx.diff_y();
                let dydx = dy.diff_x();
                let dy2 = dy.diff_y();
                loss += scale_weight
                    * (abs_sum(&dx2) * inv(n_dx2)
                        + abs_sum(&dxdy) * inv(n_dxdy)
                        + abs_sum(&dydx) * inv(n_dxdy)
                        + abs_sum(&dy2) * inv(n_dy2));

                let c = weight * scale_weight;
                let g_dx2 = signum(&dx2) * (c * inv(n_dx2));
                let g_dxdy = signum(&dxdy) * (c * inv(n_dxdy));
                let g_dydx = signum(&dydx) * (c * inv(n_dxdy));
                let g_dy2 = signum(&dy2) * (c * inv(n_dy2));
                let g_dx = g_dx2.diff_x_adjoint(dx.cols) + g_dxdy.diff_y_adjoint(dx.rows);
                let g_dy = g_dydx.diff_x_adjoint(dy.cols) + g_dy2.diff_y_adjoint(dy.rows);
                grad.scales[k][s] = g_dx.diff_x_adjoint(cols) + g_dy.diff_y_adjoint(rows);
            }
            scale_weight /= SMOOTHNESS_DECAY;
        }
        (loss, grad)
    }
}

fn abs_sum(m: &Matrix) -> f64 {
    m.data.iter().map(|v| v.abs()).sum()
}

/// Sub-gradient of `|x|`, zero at zero.
fn signum(m: &Matrix) -> Matrix {
    m.map(|v| if v > 0.0 { 1.0 } else if v < 0.0 { -1.0 } else { 0.0 })
}

fn add_masks(a: MaskPyramid, b: &MaskPyramid) -> MaskPyramid {
    MaskPyramid::new(
        a.scales
            .into_iter()
            .zip(&b.scales)
            .map(|(sa, sb)| {
                sa.into_iter()
                    .zip(sb)
                    .map(|(ra, rb)| ra.into_iter().zip(rb).map(|(x, y)| x + y.clone()).collect())
                    .collect()
            })
            .collect(),
    )
}

impl LossEngine for BaselineLossEngine {
    fn photometric_loss(&self, inputs: &LossInputs<'_>) -> Result<f64> {
        Ok(self.photometric(inputs, 1.0)?.0)
    }

    fn mask_regularization_loss(&self, masks: &MaskPyramid) -> Result<f64> {
        Ok(self.explainability(masks, 1.0).0)
    }

    fn smoothness_loss(&self, disparities: &Pyramid) -> Result<f64> {
        Ok(self.smoothness(disparities, 1.0).0)
    }

    fn gradients(&self, inputs: &LossInputs<'_>, weights: &LossWeights) -> Result<OutputGradients> {
        let (_, photo_grad) = self.photometric(inputs, weights.photometric)?;
        let (_, exp_grad) = self.explainability(inputs.masks, weights.mask);
        let (_, smooth_grad) = self.smoothness(inputs.disparities, weights.smoothness);

        Ok(OutputGradients {
            depth: inputs.depth.zeros_like(),
            disparities: smooth_grad,
            pose_mask: PoseMaskGradients {
                masks: add_masks(photo_grad, &exp_grad),
                poses: inputs
                    .poses
                    .iter()
                    .map(|refs| vec![[0.0; 6]; refs.len()])
                    .collect(),
            },
        })
    }

    fn warp(
        &self,
        reference: &Image,
        depth: &Matrix,
        _pose: &Pose,
        _intrinsics: &Intrinsics,
        _intrinsics_inv: &Intrinsics,
    ) -> Result<Image> {
        if reference.height() != depth.rows || reference.width() != depth.cols {
            return Err(Error::shape(
                "warp reference",
                depth.len(),
                reference.height() * reference.width(),
            ));
        }
        Ok(reference.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_disparity_is_perfectly_smooth() {
        let engine = BaselineLossEngine::new();
        let disp = Pyramid::new(vec![vec![Matrix::filled(5, 6, 3.0)], vec![Matrix::filled(2, 3, 1.0)]]);
        assert_eq!(engine.smoothness_loss(&disp).unwrap(), 0.0);
    }

    #[test]
    fn coarser_scales_weigh_less() {
        let engine = BaselineLossEngine::new();
        let bumpy = Matrix::from_data(vec![
            vec![0.0, 1.0, 0.0, 1.0],
            vec![1.0, 0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.0, 1.0],
        ]);
        let one = engine
            .smoothness_loss(&Pyramid::new(vec![vec![bumpy.clone()]]))
            .unwrap();
        let two = engine
            .smoothness_loss(&Pyramid::new(vec![vec![bumpy.clone()], vec![bumpy]]))
            .unwrap();
        assert!((two - one * (1.0 + 1.0 / SMOOTHNESS_DECAY)).abs() < 1e-12);
    }

    #[test]
    fn smoothness_gradient_matches_finite_difference() {
        let engine = BaselineLossEngine::new();
        let m = Matrix::from_data(vec![
            vec![0.3, 1.2, 0.1, 0.9],
            vec![1.1, 0.2, 1.7, 0.4],
            vec![0.6, 1.4, 0.05, 1.3],
        ]);
        let (_, grad) = engine.smoothness(&Pyramid::new(vec![vec![m.clone()]]), 1.0);
        let eps = 1e-7;
        for idx in [0, 5, 10] {
            let mut up = m.clone();
            up.data[idx] += eps;
            let mut down = m.clone();
            down.data[idx] -= eps;
            let f = |x: Matrix| engine.smoothness_loss(&Pyramid::new(vec![vec![x]])).unwrap();
            let numeric = (f(up) - f(down)) / (2.0 * eps);
            assert!((grad.scales[0][0].data[idx] - numeric).abs() < 1e-5, "index {idx}");
        }
    }

    #[test]
    fn full_trust_masks_cost_nothing() {
        let engine = BaselineLossEngine::new();
        let masks = MaskPyramid::new(vec![vec![vec![Matrix::filled(2, 2, 1.0)]]]);
        assert!(engine.mask_regularization_loss(&masks).unwrap().abs() < 1e-9);
        let half = MaskPyramid::new(vec![vec![vec![Matrix::filled(2, 2, 0.5)]]]);
        assert!((engine.mask_regularization_loss(&half).unwrap() - 2f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn warp_is_identity_and_checks_shape() {
        let engine = BaselineLossEngine::new();
        let img = Image::filled(3, 2, 3, 0.25);
        let k = Intrinsics::identity();
        let out = engine.warp(&img, &Matrix::zeros(2, 3), &[0.0; 6], &k, &k).unwrap();
        assert_eq!(out, img);
        assert!(engine.warp(&img, &Matrix::zeros(3, 3), &[0.0; 6], &k, &k).is_err());
    }
}
