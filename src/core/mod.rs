//! Core parts of the algorithms without abstraction.

pub mod deriv_buffer;
pub mod param_buffer;
pub mod result_buffer;

pub use deriv_buffer::DerivBuffer;
pub use param_buffer::{LayerParams, OptimizerState, ParamBuffer, ParamKey, Role};
pub use result_buffer::{Branches, LayerResults, ResultBuffer};

mod back_propagation;
mod forward;
mod numerical;

pub use back_propagation::*;
pub use forward::*;
pub use numerical::*;
