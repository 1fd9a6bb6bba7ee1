//! Small reference models and loss formulas that plug into the training core.
//!
//! They make the binary and the end-to-end tests runnable on a CPU. Real
//! architectures and view synthesis implement the same traits.

pub mod disp_net;
pub mod loss;
pub mod pose_exp_net;

pub use disp_net::{BaselineDispNet, NUM_SCALES};
pub use loss::BaselineLossEngine;
pub use pose_exp_net::BaselinePoseExpNet;
