use crate::error::{Error, Result};
use crate::model::parameter::{ParamId, Parameter};

/// Hyper-parameters of the Adam update with decoupled weight decay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
}

impl AdamConfig {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, weight_decay: f64) -> AdamConfig {
        AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon: 1e-8,
            weight_decay,
        }
    }
}

/// First and second moment estimates of one parameter tensor.
#[derive(Debug)]
struct Moments {
    m: Box<[f64]>,
    v: Box<[f64]>,
}

/// Adam with decoupled weight decay over a fixed set of parameters.
///
/// Built by `CombinedOptimizerBuilder`, which guarantees the set holds each
/// parameter once.
#[derive(Debug)]
pub struct Adam {
    config: AdamConfig,
    params: Vec<Parameter>,
    moments: Vec<Moments>,
    beta1_t: f64,
    beta2_t: f64,
    steps: usize,
}

impl Adam {
    pub(crate) fn new(config: AdamConfig, params: Vec<Parameter>) -> Adam {
        let moments = params
            .iter()
            .map(|p| Moments {
                m: vec![0.0; p.len()].into_boxed_slice(),
                v: vec![0.0; p.len()].into_boxed_slice(),
            })
            .collect();
        Adam {
            config,
            params,
            moments,
            beta1_t: 1.0,
            beta2_t: 1.0,
            steps: 0,
        }
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Number of parameter tensors being optimized.
    pub fn num_parameters(&self) -> usize {
        self.params.len()
    }

    /// Number of scalar parameters being optimized.
    pub fn num_scalars(&self) -> usize {
        self.params.iter().map(Parameter::len).sum()
    }

    pub fn contains(&self, id: ParamId) -> bool {
        self.params.iter().any(|p| p.id() == id)
    }

    /// Optimizer steps taken so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn zero_grad(&mut self) {
        self.params.iter().for_each(Parameter::zero_grad);
    }

    /// Applies one update to every parameter from its accumulated gradient.
    ///
    /// Fails before touching anything if a gradient is not finite.
    pub fn step(&mut self) -> Result<()> {
        for param in &self.params {
            if let Some(&value) = param.grad().iter().find(|g| !g.is_finite()) {
                return Err(Error::NumericalInstability {
                    what: "gradient",
                    step: self.steps,
                    value,
                });
            }
        }

        let AdamConfig {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            weight_decay: wd,
        } = self.config;

        self.beta1_t *= b1;
        self.beta2_t *= b2;
        let bc1 = 1.0 - self.beta1_t;
        let bc2 = 1.0 - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        for (param, moments) in self.params.iter().zip(self.moments.iter_mut()) {
            param.update(|values, grad| {
                values
                    .iter_mut()
                    .zip(grad)
                    .zip(moments.m.iter_mut())
                    .zip(moments.v.iter_mut())
                    .for_each(|(((p, g), m), v)| {
                        *p -= lr * wd * *p;
                        *m = b1 * *m + (1.0 - b1) * g;
                        *v = b2 * *v + (1.0 - b2) * g * g;
                        *p -= step_size * *m / (v.sqrt() + eps);
                    });
            });
        }

        self.steps += 1;
        Ok(())
    }
}
