pub mod module;
pub mod output;
pub mod parameter;

pub use module::{DepthModel, Mode, ModuleState, PoseMaskModel, TrainableModule};
pub use output::{
    flatten_poses, MaskPyramid, Pose, PoseMaskGradients, PoseMaskOutput, Pyramid, POSE_COMPONENTS,
};
pub use parameter::{ParamId, Parameter};
