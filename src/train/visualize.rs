use crate::data::batch::Batch;
use crate::diagnostics::render::{render_image, render_map, Colormap};
use crate::diagnostics::sink::DiagnosticSink;
use crate::error::{Error, Result};
use crate::loss::engine::LossEngine;
use crate::math::matrix::Matrix;
use crate::model::output::MaskPyramid;
use crate::train::context::ForwardPass;

/// Disparities are shown against a fixed ceiling so that epochs compare.
pub const DISPARITY_DISPLAY_MAX: f64 = 10.0;

fn first<'a, T>(items: &'a [T], what: &'static str) -> Result<&'a T> {
    items.first().ok_or_else(|| Error::shape(what, 1, 0))
}

fn mask_at(masks: &MaskPyramid, scale: usize, reference: usize) -> Result<&Matrix> {
    masks
        .scales
        .get(scale)
        .and_then(|s| s.first())
        .and_then(|refs| refs.get(reference))
        .ok_or_else(|| Error::shape("explainability masks", scale + 1, masks.num_scales()))
}

/// Training images for the first sample of a batch at `step`: inputs, then per
/// scale the disparity, normalized depth and, per reference, the warped
/// reference, its residual and its mask.
pub fn emit_train_images<L, S>(
    sink: &mut S,
    loss: &L,
    batch: &Batch,
    pass: &ForwardPass,
    step: usize,
) -> Result<()>
where
    L: LossEngine + ?Sized,
    S: DiagnosticSink + ?Sized,
{
    let target = first(&batch.targets, "batch targets")?;
    // The first reference sits one step before the target, the second one after.
    if let (Some(prev), Some(reference)) = (step.checked_sub(1), batch.references.first()) {
        sink.add_image("train Input", &render_image(first(reference, "references")?), prev)?;
    }
    sink.add_image("train Input", &render_image(target), step)?;
    if let Some(reference) = batch.references.get(1) {
        sink.add_image("train Input", &render_image(first(reference, "references")?), step + 1)?;
    }

    let intrinsics = first(&batch.intrinsics, "intrinsics")?;
    let intrinsics_inv = first(&batch.intrinsics_inv, "inverse intrinsics")?;
    let poses = first(&pass.pose_mask.poses, "poses")?;

    for (k, (disp_scale, depth_scale)) in pass
        .disparities
        .scales
        .iter()
        .zip(&pass.depth.scales)
        .enumerate()
    {
        let disp = first(disp_scale, "disparities")?;
        let depth = first(depth_scale, "depth")?;
        sink.add_image(
            &format!("train Dispnet Output {k}"),
            &render_map(disp, Some(DISPARITY_DISPLAY_MAX), Colormap::Bone),
            step,
        )?;
        sink.add_image(
            &format!("train Depth Output Normalized {k}"),
            &render_map(depth, None, Colormap::Rainbow),
            step,
        )?;

        let (h, w) = (depth.rows, depth.cols);
        let downscale = target.height() as f64 / h as f64;
        let target_scaled = target.adaptive_avg_pool(h, w);
        let k_scaled = intrinsics.downscaled(downscale);
        let k_inv_scaled = intrinsics_inv.inverse_downscaled(downscale);

        for (j, reference) in batch.references.iter().enumerate() {
            let reference = first(reference, "references")?.adaptive_avg_pool(h, w);
            let pose = poses
                .get(j)
                .ok_or_else(|| Error::shape("poses per sample", j + 1, poses.len()))?;
            let warped = loss.warp(&reference, depth, pose, &k_scaled, &k_inv_scaled)?;
            sink.add_image(&format!("train Warped Outputs {k} {j}"), &render_image(&warped), step)?;
            sink.add_image(
                &format!("train Diff Outputs {k} {j}"),
                &render_image(&target_scaled.half_abs_diff(&warped)),
                step,
            )?;
            sink.add_image(
                &format!("train Exp mask Outputs {k} {j}"),
                &render_map(mask_at(&pass.pose_mask.masks, k, j)?, Some(1.0), Colormap::Bone),
                step,
            )?;
        }
    }
    Ok(())
}

/// Validation images of the first sample of a batch, written at step `epoch`.
/// On epoch 0 the raw inputs go out first: the target at step 0 and each
/// reference at step 1.
pub fn emit_validation_images<L, S>(
    sink: &mut S,
    loss: &L,
    batch: &Batch,
    pass: &ForwardPass,
    epoch: usize,
) -> Result<()>
where
    L: LossEngine + ?Sized,
    S: DiagnosticSink + ?Sized,
{
    let target = first(&batch.targets, "batch targets")?;
    if epoch == 0 {
        for (j, reference) in batch.references.iter().enumerate() {
            let tag = format!("val Input {j}");
            sink.add_image(&tag, &render_image(target), 0)?;
            sink.add_image(&tag, &render_image(first(reference, "references")?), 1)?;
        }
    }

    let disp = first(pass.disparities.finest()?, "disparities")?;
    let depth = first(pass.depth.finest()?, "depth")?;
    sink.add_image(
        "val Dispnet Output",
        &render_map(disp, Some(DISPARITY_DISPLAY_MAX), Colormap::Bone),
        epoch,
    )?;
    sink.add_image(
        "val Depth Output Normalized",
        &render_map(depth, None, Colormap::Rainbow),
        epoch,
    )?;

    let intrinsics = first(&batch.intrinsics, "intrinsics")?;
    let intrinsics_inv = first(&batch.intrinsics_inv, "inverse intrinsics")?;
    let poses = first(&pass.pose_mask.poses, "poses")?;
    for (j, reference) in batch.references.iter().enumerate() {
        let pose = poses
            .get(j)
            .ok_or_else(|| Error::shape("poses per sample", j + 1, poses.len()))?;
        let warped = loss.warp(
            first(reference, "references")?,
            depth,
            pose,
            intrinsics,
            intrinsics_inv,
        )?;
        sink.add_image(&format!("val Warped Outputs {j}"), &render_image(&warped), epoch)?;
        sink.add_image(
            &format!("val Diff Outputs {j}"),
            &render_image(&target.half_abs_diff(&warped)),
            epoch,
        )?;
        sink.add_image(
            &format!("val Exp mask Outputs {j}"),
            &render_map(mask_at(&pass.pose_mask.masks, 0, j)?, Some(1.0), Colormap::Bone),
            epoch,
        )?;
    }
    Ok(())
}
