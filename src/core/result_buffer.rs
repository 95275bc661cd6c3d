use faer::prelude::*;

/// Intermediates of one layer kept for the backward pass.
#[derive(Debug, Clone)]
pub struct LayerResults {
    /// Post-activation output, one sample per row.
    pub a: Mat<f64>,
    pub branches: Branches,
}

/// Pre-activation branch values that reappear in the backward pass.
#[derive(Debug, Clone)]
pub enum Branches {
    Linear,
    /// `zr = a·Wr + br` and `zg = a·Wg + bg`.
    Quadratic { zr: Mat<f64>, zg: Mat<f64> },
}

/// Buffer for storing neural network activation results of one forward pass.
///
/// Created by [`forward_cached`](super::forward_cached), consumed by
/// [`back_propagate`](super::back_propagate).
#[derive(Debug, Clone)]
pub struct ResultBuffer {
    layers: Vec<LayerResults>,
}

impl ResultBuffer {
    pub(crate) fn with_capacity(n_layers: usize) -> Self {
        Self {
            layers: Vec::with_capacity(n_layers),
        }
    }

    pub(crate) fn push(&mut self, layer: LayerResults) {
        self.layers.push(layer);
    }

    /// Number of layers in the neural network.
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[LayerResults] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&LayerResults> {
        self.layers.get(index)
    }

    pub fn last(&self) -> Option<&LayerResults> {
        self.layers.last()
    }

    /// Output of the final layer.
    pub fn output(&self) -> Option<MatRef<'_, f64>> {
        self.last().map(|layer| layer.a.as_ref())
    }
}
