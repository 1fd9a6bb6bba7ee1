use crate::config::LossWeights;
use crate::data::batch::Batch;
use crate::error::{Error, Result};
use crate::math::camera::Intrinsics;
use crate::math::frame::Image;
use crate::math::matrix::Matrix;
use crate::model::output::{MaskPyramid, Pose, PoseMaskGradients, Pyramid};

/// Everything the loss terms look at for one batch.
#[derive(Debug, Clone, Copy)]
pub struct LossInputs<'a> {
    pub batch: &'a Batch,
    pub disparities: &'a Pyramid,
    pub depth: &'a Pyramid,
    pub masks: &'a MaskPyramid,
    /// `[sample][reference]`.
    pub poses: &'a [Vec<Pose>],
}

/// Gradient of the weighted total loss with respect to the model outputs.
///
/// Depth and disparity are kept apart: the orchestrator owns the
/// disparity-to-depth inversion and folds `depth` back through it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputGradients {
    pub depth: Pyramid,
    pub disparities: Pyramid,
    pub pose_mask: PoseMaskGradients,
}

/// The three scalar loss terms of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossTerms {
    pub photometric: f64,
    pub mask: f64,
    pub smoothness: f64,
}

impl LossTerms {
    pub fn evaluate<L: LossEngine + ?Sized>(engine: &L, inputs: &LossInputs<'_>) -> Result<LossTerms> {
        Ok(LossTerms {
            photometric: engine.photometric_loss(inputs)?,
            mask: engine.mask_regularization_loss(inputs.masks)?,
            smoothness: engine.smoothness_loss(inputs.disparities)?,
        })
    }

    pub fn total(&self, weights: &LossWeights) -> f64 {
        weights.combine(self.photometric, self.mask, self.smoothness)
    }

    /// Fails with `NumericalInstability` on the first non-finite term or total.
    pub fn check_finite(&self, total: f64, step: usize) -> Result<()> {
        for (what, value) in [
            ("photometric loss", self.photometric),
            ("explainability loss", self.mask),
            ("smoothness loss", self.smoothness),
            ("total loss", total),
        ] {
            if !value.is_finite() {
                return Err(Error::NumericalInstability { what, step, value });
            }
        }
        Ok(())
    }
}

/// Stateless loss formulas and view synthesis, supplied from outside the
/// orchestration core.
pub trait LossEngine {
    /// Reconstruction error between targets and references synthesised into
    /// the target view, summed over every scale present in `inputs.depth`.
    fn photometric_loss(&self, inputs: &LossInputs<'_>) -> Result<f64>;

    /// Regularizer keeping explainability masks from collapsing to zero.
    fn mask_regularization_loss(&self, masks: &MaskPyramid) -> Result<f64>;

    /// Disparity smoothness over every scale.
    fn smoothness_loss(&self, disparities: &Pyramid) -> Result<f64>;

    /// Gradient of `weights.combine(photo, exp, smooth)` with respect to the
    /// model outputs. Pyramids in the result match the shapes of `inputs`.
    fn gradients(&self, inputs: &LossInputs<'_>, weights: &LossWeights) -> Result<OutputGradients>;

    /// Synthesises `reference` in the target view from target-view `depth`
    /// and the target-to-reference `pose`. Used for diagnostics.
    fn warp(
        &self,
        reference: &Image,
        depth: &Matrix,
        pose: &Pose,
        intrinsics: &Intrinsics,
        intrinsics_inv: &Intrinsics,
    ) -> Result<Image>;
}
