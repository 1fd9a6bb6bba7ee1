use crate::baseline::disp_net::{scale_shape, sigmoid, NUM_SCALES};
use crate::error::{Error, Result};
use crate::math::frame::Image;
use crate::math::matrix::Matrix;
use crate::model::module::{Mode, PoseMaskModel, TrainableModule};
use crate::model::output::{MaskPyramid, Pose, PoseMaskGradients, PoseMaskOutput};
use crate::model::parameter::Parameter;

/// Learned per-reference poses and per-scale explainability logits.
///
/// Outputs do not depend on pixel content: every sample gets the same pose
/// per reference and a constant mask `σ(logit[k][j])` at every pixel of
/// scale `k`.
#[derive(Debug)]
pub struct BaselinePoseExpNet {
    num_references: usize,
    poses: Parameter,
    logits: Parameter,
    mode: Mode,
    /// `σ(logit)` per scale and reference from the last forward pass.
    activations: Vec<Vec<f64>>,
}

impl BaselinePoseExpNet {
    pub fn new(num_references: usize) -> BaselinePoseExpNet {
        BaselinePoseExpNet {
            num_references,
            poses: Parameter::new("pose.vectors", vec![0.0; num_references * 6]),
            // σ(2) ≈ 0.88: start out mostly trusting every pixel.
            logits: Parameter::new("exp.logits", vec![2.0; NUM_SCALES * num_references]),
            mode: Mode::Train,
            activations: Vec::new(),
        }
    }

    pub fn num_references(&self) -> usize {
        self.num_references
    }

    fn pose(&self, reference: usize) -> Pose {
        let value = self.poses.value();
        let mut pose = [0.0; 6];
        pose.copy_from_slice(&value[reference * 6..reference * 6 + 6]);
        pose
    }
}

impl TrainableModule for BaselinePoseExpNet {
    fn name(&self) -> &str {
        "exp_pose"
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![self.poses.clone(), self.logits.clone()]
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

impl PoseMaskModel for BaselinePoseExpNet {
    fn forward(&mut self, targets: &[Image], references: &[Vec<Image>]) -> Result<PoseMaskOutput> {
        if references.len() != self.num_references {
            return Err(Error::shape("reference frames", self.num_references, references.len()));
        }
        let scales = match self.mode {
            Mode::Train => NUM_SCALES,
            Mode::Eval => 1,
        };

        let activations: Vec<Vec<f64>> = (0..scales)
            .map(|k| {
                (0..self.num_references)
                    .map(|j| sigmoid(self.logits.get(k * self.num_references + j)))
                    .collect()
            })
            .collect();
        let masks = (0..scales)
            .map(|k| {
                targets
                    .iter()
                    .map(|t| {
                        let (h, w) = scale_shape(t.height(), t.width(), k);
                        activations[k].iter().map(|&m| Matrix::filled(h, w, m)).collect()
                    })
                    .collect()
            })
            .collect();
        let poses = targets
            .iter()
            .map(|_| (0..self.num_references).map(|j| self.pose(j)).collect())
            .collect();

        self.activations = activations;
        Ok(PoseMaskOutput {
            masks: MaskPyramid::new(masks),
            poses,
        })
    }

    fn backward(&mut self, grad: &PoseMaskGradients) -> Result<()> {
        let mut pose_grad = vec![0.0; self.num_references * 6];
        for sample in &grad.poses {
            for (j, pose) in sample.iter().enumerate().take(self.num_references) {
                for (c, g) in pose.iter().enumerate() {
                    pose_grad[j * 6 + c] += g;
                }
            }
        }

        let mut logit_grad = vec![0.0; NUM_SCALES * self.num_references];
        if grad.masks.num_scales() > self.activations.len() {
            return Err(Error::shape("mask gradient scales", self.activations.len(), grad.masks.num_scales()));
        }
        for (k, scale) in grad.masks.scales.iter().enumerate() {
            for sample in scale {
                for (j, g) in sample.iter().enumerate().take(self.num_references) {
                    let s = self.activations[k][j];
                    logit_grad[k * self.num_references + j] += g.sum() * s * (1.0 - s);
                }
            }
        }

        self.poses.accumulate_grad(&pose_grad)?;
        self.logits.accumulate_grad(&logit_grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_follow_scales_and_references() {
        let mut net = BaselinePoseExpNet::new(2);
        let frame = Image::filled(3, 4, 8, 0.0);
        let refs = vec![vec![frame.clone(); 3]; 2];
        let out = net.forward(&vec![frame; 3], &refs).unwrap();
        assert_eq!(out.masks.num_scales(), NUM_SCALES);
        assert_eq!(out.masks.scales[1].len(), 3);
        assert_eq!(out.masks.scales[1][0].len(), 2);
        assert_eq!((out.masks.scales[1][0][0].rows, out.masks.scales[1][0][0].cols), (2, 4));
        assert_eq!(out.poses.len(), 3);
        assert_eq!(out.poses[0].len(), 2);
    }

    #[test]
    fn wrong_reference_count_is_rejected() {
        let mut net = BaselinePoseExpNet::new(2);
        let frame = Image::filled(3, 2, 2, 0.0);
        assert!(net.forward(&[frame.clone()], &[vec![frame]]).is_err());
    }

    #[test]
    fn pose_gradient_sums_over_samples() {
        let mut net = BaselinePoseExpNet::new(1);
        let frame = Image::filled(3, 2, 2, 0.0);
        let out = net.forward(&[frame.clone(), frame.clone()], &[vec![frame.clone(), frame]]).unwrap();
        let mut grad = out.clone();
        grad.masks = out.masks.zeros_like();
        grad.poses = vec![vec![[1.0; 6]]; 2];
        net.backward(&grad).unwrap();
        assert_eq!(&*net.poses.grad(), &[2.0; 6]);
        assert!(net.logits.grad().iter().all(|&g| g == 0.0));
    }
}
