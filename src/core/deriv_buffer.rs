use derive_more::{Deref, DerefMut};

use crate::core::ParamBuffer;

/// Gradient of the loss with respect to every tensor of a [`ParamBuffer`].
///
/// Has exactly the layout of the parameters it was created from, so it is addressed by the
/// same `(layer, role)` keys.
#[derive(Debug, Clone, PartialEq, Deref, DerefMut)]
pub struct DerivBuffer(ParamBuffer);

impl DerivBuffer {
    pub fn zeros_like(params: &ParamBuffer) -> Self {
        Self(params.zeros_like())
    }

    pub fn into_inner(self) -> ParamBuffer {
        self.0
    }
}
