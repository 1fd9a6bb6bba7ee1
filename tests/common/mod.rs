#![allow(dead_code)]

use std::cell::Cell;

use sfm_trainer::baseline::BaselineLossEngine;
use sfm_trainer::loss::{LossEngine, LossInputs, OutputGradients};
use sfm_trainer::math::{Image, Intrinsics, Matrix};
use sfm_trainer::model::{MaskPyramid, Pose, Pyramid};
use sfm_trainer::data::Sample;
use sfm_trainer::{Batch, LossWeights, Result, RunConfig};

pub const SIZE: usize = 8;

pub fn sample(shade: f64, num_references: usize) -> Sample {
    Sample {
        target: Image::filled(3, SIZE, SIZE, shade),
        references: (0..num_references)
            .map(|j| Image::filled(3, SIZE, SIZE, shade + 0.1 * (j as f64 + 1.0)))
            .collect(),
        intrinsics: Intrinsics::new(4.0, 4.0, 4.0, 4.0),
    }
}

/// `count` batches of `batch_size` samples with two references each.
pub fn batches(count: usize, batch_size: usize) -> Vec<Batch> {
    (0..count)
        .map(|b| {
            let samples = (0..batch_size)
                .map(|s| sample(-0.5 + 0.05 * ((b + s) % 10) as f64, 2))
                .collect();
            Batch::collate(samples).unwrap()
        })
        .collect()
}

pub fn config() -> RunConfig {
    RunConfig {
        epochs: 2,
        batch_size: 2,
        workers: 0,
        print_freq: 1,
        ..RunConfig::default()
    }
}

/// Baseline losses, except for scripted validation photometric losses and an
/// optional non-finite training loss.
pub struct ScriptedLoss {
    inner: BaselineLossEngine,
    validation_photo: Vec<f64>,
    validation_calls: Cell<usize>,
    nan_at_train_call: Option<usize>,
    train_calls: Cell<usize>,
}

impl ScriptedLoss {
    pub fn new() -> ScriptedLoss {
        ScriptedLoss {
            inner: BaselineLossEngine::new(),
            validation_photo: Vec::new(),
            validation_calls: Cell::new(0),
            nan_at_train_call: None,
            train_calls: Cell::new(0),
        }
    }

    /// Validation batch `n` overall reports `values[n]` as its photometric loss.
    pub fn with_validation_photo(mut self, values: Vec<f64>) -> ScriptedLoss {
        self.validation_photo = values;
        self
    }

    pub fn with_nan_at_train_call(mut self, call: usize) -> ScriptedLoss {
        self.nan_at_train_call = Some(call);
        self
    }
}

impl LossEngine for ScriptedLoss {
    fn photometric_loss(&self, inputs: &LossInputs<'_>) -> Result<f64> {
        // Models run a single scale in eval mode.
        if inputs.depth.num_scales() == 1 {
            let call = self.validation_calls.get();
            self.validation_calls.set(call + 1);
            if let Some(&value) = self.validation_photo.get(call) {
                return Ok(value);
            }
        } else {
            let call = self.train_calls.get();
            self.train_calls.set(call + 1);
            if self.nan_at_train_call == Some(call) {
                return Ok(f64::NAN);
            }
        }
        self.inner.photometric_loss(inputs)
    }

    fn mask_regularization_loss(&self, masks: &MaskPyramid) -> Result<f64> {
        self.inner.mask_regularization_loss(masks)
    }

    fn smoothness_loss(&self, disparities: &Pyramid) -> Result<f64> {
        self.inner.smoothness_loss(disparities)
    }

    fn gradients(&self, inputs: &LossInputs<'_>, weights: &LossWeights) -> Result<OutputGradients> {
        self.inner.gradients(inputs, weights)
    }

    fn warp(
        &self,
        reference: &Image,
        depth: &Matrix,
        pose: &Pose,
        intrinsics: &Intrinsics,
        intrinsics_inv: &Intrinsics,
    ) -> Result<Image> {
        self.inner.warp(reference, depth, pose, intrinsics, intrinsics_inv)
    }
}
