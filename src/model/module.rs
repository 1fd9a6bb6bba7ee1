use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math::frame::Image;
use crate::model::output::{PoseMaskGradients, PoseMaskOutput, Pyramid};
use crate::model::parameter::Parameter;

/// Whether a module runs with training-time behaviour (multi-scale outputs,
/// cached activations for backward) or inference behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Serializable snapshot of a module's parameters, keyed by parameter name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleState(pub BTreeMap<String, Vec<f64>>);

/// A model that can be jointly optimized.
pub trait TrainableModule {
    /// Short name used in logs and checkpoint files.
    fn name(&self) -> &str;

    /// Handles to every trainable tensor. Clones of the module's own handles.
    fn parameters(&self) -> Vec<Parameter>;

    fn set_mode(&mut self, mode: Mode);

    fn mode(&self) -> Mode;

    fn state(&self) -> ModuleState {
        ModuleState(
            self.parameters()
                .into_iter()
                .map(|p| (p.name().to_string(), p.value().to_vec()))
                .collect(),
        )
    }

    /// Restores every parameter from `state`. Names must match exactly.
    fn load_state(&mut self, state: &ModuleState) -> Result<()> {
        let params = self.parameters();
        let known: HashSet<&str> = params.iter().map(|p| p.name()).collect();
        if let Some(extra) = state.0.keys().find(|k| !known.contains(k.as_str())) {
            return Err(Error::UnknownParameter(extra.clone()));
        }
        for param in &params {
            let values = state
                .0
                .get(param.name())
                .ok_or_else(|| Error::UnknownParameter(param.name().to_string()))?;
            param.set_value(values)?;
        }
        Ok(())
    }

    /// Total number of scalar parameters.
    fn num_scalars(&self) -> usize {
        self.parameters().iter().map(Parameter::len).sum()
    }
}

/// Predicts a disparity pyramid from target frames.
///
/// In `Mode::Train` the pyramid holds every output scale; in `Mode::Eval`
/// only the finest one.
pub trait DepthModel: TrainableModule {
    fn forward(&mut self, targets: &[Image]) -> Result<Pyramid>;

    /// Accumulates parameter gradients given `∂L/∂disparity` for the last forward pass.
    fn backward(&mut self, grad: &Pyramid) -> Result<()>;
}

/// Predicts explainability masks and a relative pose per reference frame.
pub trait PoseMaskModel: TrainableModule {
    /// `references` is indexed `[reference][sample]`.
    fn forward(&mut self, targets: &[Image], references: &[Vec<Image>]) -> Result<PoseMaskOutput>;

    /// Accumulates parameter gradients given the gradient of the loss
    /// with respect to the last forward pass's masks and poses.
    fn backward(&mut self, grad: &PoseMaskGradients) -> Result<()>;
}
