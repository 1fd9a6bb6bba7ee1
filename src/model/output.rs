use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// 6-DOF relative pose: translation `(tx, ty, tz)` then rotation `(rx, ry, rz)`.
pub type Pose = [f64; 6];

/// Histogram tag suffixes, in `Pose` component order.
pub const POSE_COMPONENTS: [&str; 6] = ["tx", "ty", "tz", "rx", "ry", "rz"];

/// Single-channel maps at decreasing resolutions, indexed `[scale][sample]`,
/// finest scale first. Used for disparities, depths and their gradients.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pyramid {
    pub scales: Vec<Vec<Matrix>>,
}

impl Pyramid {
    pub fn new(scales: Vec<Vec<Matrix>>) -> Pyramid {
        Pyramid { scales }
    }

    pub fn num_scales(&self) -> usize {
        self.scales.len()
    }

    /// Finest-scale maps, one per sample.
    pub fn finest(&self) -> Result<&[Matrix]> {
        self.scales
            .first()
            .map(Vec::as_slice)
            .ok_or_else(|| Error::shape("pyramid scales", 1, 0))
    }

    /// Element-wise reciprocal of every map: disparity to depth.
    pub fn inverted(&self) -> Pyramid {
        self.map(|m| m.map(|x| 1.0 / x))
    }

    pub fn map<F>(&self, functor: F) -> Pyramid
    where
        F: Fn(&Matrix) -> Matrix,
    {
        Pyramid {
            scales: self
                .scales
                .iter()
                .map(|scale| scale.iter().map(&functor).collect())
                .collect(),
        }
    }

    pub fn zeros_like(&self) -> Pyramid {
        self.map(|m| Matrix::zeros(m.rows, m.cols))
    }

    /// Checks that `other` has the same scales, samples and map shapes.
    pub fn check_shape(&self, other: &Pyramid, what: &'static str) -> Result<()> {
        if self.scales.len() != other.scales.len() {
            return Err(Error::shape(what, self.scales.len(), other.scales.len()));
        }
        for (a, b) in self.scales.iter().zip(&other.scales) {
            if a.len() != b.len() {
                return Err(Error::shape(what, a.len(), b.len()));
            }
            for (x, y) in a.iter().zip(b) {
                if !x.same_shape(y) {
                    return Err(Error::shape(what, x.len(), y.len()));
                }
            }
        }
        Ok(())
    }
}

/// Explainability masks indexed `[scale][sample][reference]`, finest scale first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaskPyramid {
    pub scales: Vec<Vec<Vec<Matrix>>>,
}

impl MaskPyramid {
    pub fn new(scales: Vec<Vec<Vec<Matrix>>>) -> MaskPyramid {
        MaskPyramid { scales }
    }

    pub fn num_scales(&self) -> usize {
        self.scales.len()
    }

    pub fn zeros_like(&self) -> MaskPyramid {
        MaskPyramid {
            scales: self
                .scales
                .iter()
                .map(|scale| {
                    scale
                        .iter()
                        .map(|refs| refs.iter().map(|m| Matrix::zeros(m.rows, m.cols)).collect())
                        .collect()
                })
                .collect(),
        }
    }
}

/// What the pose/mask model produces for one batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseMaskOutput {
    pub masks: MaskPyramid,
    /// `[sample][reference]`.
    pub poses: Vec<Vec<Pose>>,
}

/// Gradient of the loss with respect to a `PoseMaskOutput`, same layout.
pub type PoseMaskGradients = PoseMaskOutput;

/// Flattens `[sample][reference]` poses in sample-major order.
pub fn flatten_poses(poses: &[Vec<Pose>]) -> impl Iterator<Item = &Pose> + '_ {
    poses.iter().flatten()
}
