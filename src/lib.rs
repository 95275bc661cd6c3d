//! Feed-forward softmax classifiers with linear or quadratic layers, trained full-batch with
//! hand-written back propagation.

pub use faer;

pub mod core;
pub mod metrics;

mod activation;
mod data;
mod error;
mod gym;
mod nn;
mod optim;
mod pretty_print;
mod snapshot;

pub use activation::*;
pub use crate::core::{DerivBuffer, LayerParams, OptimizerState, ParamBuffer, ParamKey, Role};
pub use data::*;
pub use error::*;
pub use gym::*;
pub use nn::*;
pub use optim::*;
pub use pretty_print::*;
pub use snapshot::*;
