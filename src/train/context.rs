use crate::config::RunConfig;
use crate::data::batch::Batch;
use crate::error::Result;
use crate::loss::engine::{LossEngine, LossInputs, LossTerms, OutputGradients};
use crate::model::module::{DepthModel, PoseMaskModel};
use crate::model::output::{PoseMaskOutput, Pyramid};

/// The two jointly trained models, their loss and the run configuration,
/// lent to one train or validation phase.
pub struct EpochContext<'a, D: ?Sized, P: ?Sized, L: ?Sized> {
    pub depth_net: &'a mut D,
    pub pose_net: &'a mut P,
    pub loss: &'a L,
    pub config: &'a RunConfig,
}

/// Model outputs for one batch, kept for loss evaluation, backward and diagnostics.
pub struct ForwardPass {
    pub disparities: Pyramid,
    pub depth: Pyramid,
    pub pose_mask: PoseMaskOutput,
}

impl ForwardPass {
    pub fn inputs<'b>(&'b self, batch: &'b Batch) -> LossInputs<'b> {
        LossInputs {
            batch,
            disparities: &self.disparities,
            depth: &self.depth,
            masks: &self.pose_mask.masks,
            poses: &self.pose_mask.poses,
        }
    }

    pub fn num_scales(&self) -> usize {
        self.disparities.num_scales()
    }
}

impl<'a, D, P, L> EpochContext<'a, D, P, L>
where
    D: DepthModel + ?Sized,
    P: PoseMaskModel + ?Sized,
    L: LossEngine + ?Sized,
{
    /// Runs both models on `batch`; depth is the per-scale inverse of disparity.
    pub fn forward(&mut self, batch: &Batch) -> Result<ForwardPass> {
        let disparities = self.depth_net.forward(&batch.targets)?;
        let depth = disparities.inverted();
        let pose_mask = self.pose_net.forward(&batch.targets, &batch.references)?;
        Ok(ForwardPass {
            disparities,
            depth,
            pose_mask,
        })
    }

    /// The three loss terms and their weighted total, rejecting non-finite values.
    pub fn losses(&self, pass: &ForwardPass, batch: &Batch, step: usize) -> Result<(LossTerms, f64)> {
        let terms = LossTerms::evaluate(self.loss, &pass.inputs(batch))?;
        let total = terms.total(&self.config.loss_weights);
        terms.check_finite(total, step)?;
        Ok((terms, total))
    }

    /// Accumulates parameter gradients of the weighted total into both models.
    pub fn backward(&mut self, pass: &ForwardPass, batch: &Batch) -> Result<()> {
        let grads = self
            .loss
            .gradients(&pass.inputs(batch), &self.config.loss_weights)?;
        let disp_grad = fold_depth_gradient(&pass.disparities, &grads)?;
        self.depth_net.backward(&disp_grad)?;
        self.pose_net.backward(&grads.pose_mask)
    }
}

/// `∂L/∂disp + ∂L/∂depth · ∂depth/∂disp` with `depth = 1 / disp`.
pub fn fold_depth_gradient(disparities: &Pyramid, grads: &OutputGradients) -> Result<Pyramid> {
    disparities.check_shape(&grads.disparities, "disparity gradient")?;
    disparities.check_shape(&grads.depth, "depth gradient")?;
    Ok(Pyramid::new(
        disparities
            .scales
            .iter()
            .zip(&grads.disparities.scales)
            .zip(&grads.depth.scales)
            .map(|((disp, g_disp), g_depth)| {
                disp.iter()
                    .zip(g_disp)
                    .zip(g_depth)
                    .map(|((d, gd), gz)| {
                        let through_depth = gz.zip_map(d, |g, x| -g / (x * x));
                        gd.clone() + through_depth
                    })
                    .collect()
            })
            .collect(),
    ))
}
