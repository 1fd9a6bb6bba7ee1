use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::math::frame::Image;
use crate::math::matrix::Matrix;
use crate::model::module::{DepthModel, Mode, TrainableModule};
use crate::model::output::Pyramid;
use crate::model::parameter::Parameter;

/// Output scales produced in training mode.
pub const NUM_SCALES: usize = 4;
/// `disparity = DISP_ALPHA · σ(z) + DISP_BETA` keeps disparities in `(0.01, 10.01)`.
pub const DISP_ALPHA: f64 = 10.0;
pub const DISP_BETA: f64 = 0.01;

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Scale `k` has the input resolution halved `k` times.
pub(crate) fn scale_shape(height: usize, width: usize, k: usize) -> (usize, usize) {
    ((height >> k).max(1), (width >> k).max(1))
}

/// What backward needs from one forward pass, per scale and sample.
#[derive(Debug, Default)]
struct Cache {
    /// Pooled grey input.
    inputs: Vec<Vec<Matrix>>,
    /// `σ(z)` per pixel.
    activations: Vec<Vec<Matrix>>,
}

/// Per-scale affine-sigmoid disparity head over the grey-level target.
///
/// Small enough to train on a CPU; a stand-in for a real encoder-decoder
/// behind the same `DepthModel` interface.
#[derive(Debug)]
pub struct BaselineDispNet {
    weight: Parameter,
    bias: Parameter,
    mode: Mode,
    cache: Cache,
}

impl BaselineDispNet {
    /// Weights drawn uniformly from `[-0.1, 0.1)`, biases zero.
    pub fn new(seed: u64) -> BaselineDispNet {
        let mut rng = StdRng::seed_from_u64(seed);
        BaselineDispNet {
            weight: Parameter::new(
                "disp.weight",
                (0..NUM_SCALES).map(|_| rng.gen_range(-0.1..0.1)).collect(),
            ),
            bias: Parameter::new("disp.bias", vec![0.0; NUM_SCALES]),
            mode: Mode::Train,
            cache: Cache::default(),
        }
    }

    fn active_scales(&self) -> usize {
        match self.mode {
            Mode::Train => NUM_SCALES,
            Mode::Eval => 1,
        }
    }
}

impl TrainableModule for BaselineDispNet {
    fn name(&self) -> &str {
        "dispnet"
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

impl DepthModel for BaselineDispNet {
    fn forward(&mut self, targets: &[Image]) -> Result<Pyramid> {
        let scales = self.active_scales();
        let mut cache = Cache::default();
        let mut pyramid = Vec::with_capacity(scales);
        for k in 0..scales {
            let (w, b) = (self.weight.get(k), self.bias.get(k));
            let mut inputs = Vec::with_capacity(targets.len());
            let mut activations = Vec::with_capacity(targets.len());
            let mut disparities = Vec::with_capacity(targets.len());
            for target in targets {
                let (h, wd) = scale_shape(target.height(), target.width(), k);
                let x = target.grey().adaptive_avg_pool(h, wd);
                let s = x.map(|v| sigmoid(w * v + b));
                disparities.push(s.map(|v| DISP_ALPHA * v + DISP_BETA));
                inputs.push(x);
                activations.push(s);
            }
            cache.inputs.push(inputs);
            cache.activations.push(activations);
            pyramid.push(disparities);
        }
        self.cache = cache;
        Ok(Pyramid::new(pyramid))
    }

    fn backward(&mut self, grad: &Pyramid) -> Result<()> {
        if grad.num_scales() != self.cache.activations.len() {
            return Err(Error::shape(
                "disparity gradient scales",
                self.cache.activations.len(),
                grad.num_scales(),
            ));
        }
        let mut w_grad = vec![0.0; NUM_SCALES];
        let mut b_grad = vec![0.0; NUM_SCALES];
        for (k, g_scale) in grad.scales.iter().enumerate() {
            let samples = self.cache.inputs[k].iter().zip(&self.cache.activations[k]);
            for (g, (x, s)) in g_scale.iter().zip(samples) {
                if !g.same_shape(s) {
                    return Err(Error::shape("disparity gradient", s.len(), g.len()));
                }
                for ((&g, &x), &s) in g.data.iter().zip(&x.data).zip(&s.data) {
                    let dz = g * DISP_ALPHA * s * (1.0 - s);
                    w_grad[k] += dz * x;
                    b_grad[k] += dz;
                }
            }
        }
        self.weight.accumulate_grad(&w_grad)?;
        self.bias.accumulate_grad(&b_grad)
    }
}
