use std::collections::HashSet;

use log::debug;

use crate::config::RunConfig;
use crate::model::module::TrainableModule;
use crate::model::parameter::{ParamId, Parameter};
use crate::optim::adam::{Adam, AdamConfig};

/// Collects the trainable parameters of any number of modules into one
/// optimizer. A parameter reachable from several modules is optimized once.
pub struct CombinedOptimizerBuilder {
    config: AdamConfig,
    params: Vec<Parameter>,
    seen: HashSet<ParamId>,
}

impl CombinedOptimizerBuilder {
    pub fn new(config: AdamConfig) -> Self {
        CombinedOptimizerBuilder {
            config,
            params: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Adam settings taken from the run: `momentum` is β1, `beta` is β2.
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self::new(AdamConfig::new(
            config.learning_rate,
            config.momentum,
            config.beta,
            config.weight_decay,
        ))
    }

    pub fn add_module(mut self, module: &dyn TrainableModule) -> Self {
        let before = self.params.len();
        for param in module.parameters() {
            if self.seen.insert(param.id()) {
                self.params.push(param);
            }
        }
        debug!(
            "optimizer: {} contributes {} new parameter tensors",
            module.name(),
            self.params.len() - before
        );
        self
    }

    pub fn add_modules<'m, I>(self, modules: I) -> Self
    where
        I: IntoIterator<Item = &'m dyn TrainableModule>,
    {
        modules.into_iter().fold(self, |b, m| b.add_module(m))
    }

    pub fn build(self) -> Adam {
        Adam::new(self.config, self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::module::Mode;

    struct Fixed {
        name: &'static str,
        params: Vec<Parameter>,
    }

    impl TrainableModule for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn parameters(&self) -> Vec<Parameter> {
            self.params.clone()
        }
        fn set_mode(&mut self, _mode: Mode) {}
        fn mode(&self) -> Mode {
            Mode::Train
        }
    }

    fn config() -> AdamConfig {
        AdamConfig::new(0.1, 0.9, 0.999, 0.0)
    }

    #[test]
    fn shared_parameter_is_held_once_and_stepped_once() {
        let shared = Parameter::new("encoder", vec![1.0]);
        let a = Fixed {
            name: "a",
            params: vec![shared.clone(), Parameter::new("a.head", vec![1.0])],
        };
        let b = Fixed {
            name: "b",
            params: vec![shared.clone(), Parameter::new("b.head", vec![1.0])],
        };
        let mut adam = CombinedOptimizerBuilder::new(config())
            .add_modules([&a as &dyn TrainableModule, &b])
            .build();
        assert_eq!(adam.num_parameters(), 3);

        for p in a.params.iter().chain(&b.params) {
            p.accumulate_grad(&[1.0]).unwrap();
        }
        // The shared gradient was accumulated twice, but the update is applied once:
        // the first bias-corrected Adam step moves every parameter by ~lr.
        adam.step().unwrap();
        for p in a.params.iter().chain(&b.params) {
            assert!((p.get(0) - 0.9).abs() < 1e-6, "{} = {}", p.name(), p.get(0));
        }
    }

    #[test]
    fn zero_grad_clears_every_module() {
        let a = Fixed {
            name: "a",
            params: vec![Parameter::new("w", vec![0.0, 0.0])],
        };
        let mut adam = CombinedOptimizerBuilder::new(config()).add_module(&a).build();
        a.params[0].accumulate_grad(&[1.0, -1.0]).unwrap();
        adam.zero_grad();
        assert_eq!(&*a.params[0].grad(), &[0.0, 0.0]);
        adam.step().unwrap();
        assert_eq!(&*a.params[0].value(), &[0.0, 0.0]);
    }

    #[test]
    fn decoupled_weight_decay_shrinks_without_gradient() {
        let a = Fixed {
            name: "a",
            params: vec![Parameter::new("w", vec![2.0])],
        };
        let mut adam = CombinedOptimizerBuilder::new(AdamConfig::new(0.1, 0.9, 0.999, 0.5))
            .add_module(&a)
            .build();
        adam.step().unwrap();
        assert!((a.params[0].get(0) - 1.9).abs() < 1e-12);
    }

    #[test]
    fn non_finite_gradient_is_fatal() {
        let a = Fixed {
            name: "a",
            params: vec![Parameter::new("w", vec![2.0])],
        };
        let mut adam = CombinedOptimizerBuilder::new(config()).add_module(&a).build();
        a.params[0].accumulate_grad(&[f64::NAN]).unwrap();
        assert!(matches!(
            adam.step(),
            Err(crate::error::Error::NumericalInstability { .. })
        ));
        assert_eq!(a.params[0].get(0), 2.0);
    }
}
