use std::{
    fmt::{self, Display},
    ops::{Index, IndexMut},
};

use faer::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::{Error, LayerKind, LayerSpec, PrettyPrintParams, Result, Topology};

/// The role a tensor plays inside its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Weight,
    Bias,
    WeightR,
    BiasR,
    WeightG,
    BiasG,
    WeightB,
    BiasB,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Weight => "w",
            Role::Bias => "b",
            Role::WeightR => "wr",
            Role::BiasR => "br",
            Role::WeightG => "wg",
            Role::BiasG => "bg",
            Role::WeightB => "wb",
            Role::BiasB => "bb",
        }
    }

    pub fn is_weight(self) -> bool {
        matches!(
            self,
            Role::Weight | Role::WeightR | Role::WeightG | Role::WeightB
        )
    }
}

impl LayerKind {
    /// Tensor roles of a layer of this kind, in storage order.
    pub fn roles(self) -> &'static [Role] {
        match self {
            LayerKind::Linear => &[Role::Weight, Role::Bias],
            LayerKind::Quadratic => &[
                Role::WeightR,
                Role::BiasR,
                Role::WeightG,
                Role::BiasG,
                Role::WeightB,
                Role::BiasB,
            ],
        }
    }
}

/// Address of a single tensor: `(layer index, role)`.
///
/// Displays as the short legacy name, e.g. `w0` or `br1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamKey {
    pub layer: usize,
    pub role: Role,
}

impl ParamKey {
    pub fn new(layer: usize, role: Role) -> Self {
        Self { layer, role }
    }
}

impl Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.role.name(), self.layer)
    }
}

/// Tensors of one layer.
///
/// Weights are `n_inputs × n_outputs`, biases are `1 × n_outputs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerParams {
    spec: LayerSpec,
    tensors: Box<[Mat<f64>]>,
}

impl LayerParams {
    fn zeroed(spec: LayerSpec) -> Self {
        let tensors = spec
            .kind
            .roles()
            .iter()
            .map(|role| match role.is_weight() {
                true => Mat::zeros(spec.n_inputs, spec.n_outputs),
                false => Mat::zeros(1, spec.n_outputs),
            })
            .collect();
        Self { spec, tensors }
    }

    pub fn spec(&self) -> &LayerSpec {
        &self.spec
    }

    fn position(&self, role: Role) -> Option<usize> {
        self.spec.kind.roles().iter().position(|&r| r == role)
    }

    pub fn get(&self, role: Role) -> Option<&Mat<f64>> {
        let i = self.position(role)?;
        self.tensors.get(i)
    }

    pub fn get_mut(&mut self, role: Role) -> Option<&mut Mat<f64>> {
        let i = self.position(role)?;
        self.tensors.get_mut(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &Mat<f64>)> {
        self.spec.kind.roles().iter().copied().zip(self.tensors.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Role, &mut Mat<f64>)> {
        self.spec
            .kind
            .roles()
            .iter()
            .copied()
            .zip(self.tensors.iter_mut())
    }
}

/// # Panics
///
/// If the layer has no tensor of this role (e.g. `Role::WeightR` on a linear layer).
impl Index<Role> for LayerParams {
    type Output = Mat<f64>;

    #[track_caller]
    fn index(&self, role: Role) -> &Mat<f64> {
        match self.get(role) {
            Some(tensor) => tensor,
            None => panic!(
                "{:?} layer {} has no `{}` tensor",
                self.spec.kind,
                self.spec.index,
                role.name()
            ),
        }
    }
}

impl IndexMut<Role> for LayerParams {
    #[track_caller]
    fn index_mut(&mut self, role: Role) -> &mut Mat<f64> {
        let (kind, index) = (self.spec.kind, self.spec.index);
        match self.get_mut(role) {
            Some(tensor) => tensor,
            None => panic!("{kind:?} layer {index} has no `{}` tensor", role.name()),
        }
    }
}

/// Buffer for storing per-layer tensors.
///
/// Used for the network parameters themselves, and (with the same layout) for gradients
/// and optimizer accumulators.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamBuffer {
    layers: Box<[LayerParams]>,
}

impl ParamBuffer {
    /// All-zero tensors for every layer of `topology`.
    pub fn create(topology: &Topology) -> Self {
        let layers = topology
            .layer_specs()
            .iter()
            .map(|&spec| LayerParams::zeroed(spec))
            .collect();
        Self { layers }
    }

    /// All-zero tensors with the same layout as `self`.
    pub fn zeros_like(&self) -> Self {
        let layers = self
            .layers
            .iter()
            .map(|layer| LayerParams::zeroed(layer.spec))
            .collect();
        Self { layers }
    }

    /// Draws every weight from `N(0, scale²)` (scale per [`Topology::init_scale`]) and zeroes
    /// every bias.
    pub fn initialize<R: Rng + ?Sized>(&mut self, topology: &Topology, rng: &mut R) -> Result<()> {
        Error::check_shape("topology layer count", topology.n_layers(), self.n_layers())?;
        for layer in self.layers.iter_mut() {
            let scale = topology.init_scale(layer.spec.index);
            let normal = Normal::new(0.0, scale)
                .map_err(|e| Error::configuration(format!("init scale {scale}: {e}")))?;
            for (role, tensor) in layer.iter_mut() {
                for j in 0..tensor.ncols() {
                    for i in 0..tensor.nrows() {
                        tensor[(i, j)] = match role.is_weight() {
                            true => normal.sample(rng),
                            false => 0.0,
                        };
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of layers in the neural network.
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Total number of scalars over all tensors.
    pub fn n_params(&self) -> usize {
        self.iter()
            .map(|(_, tensor)| tensor.nrows() * tensor.ncols())
            .sum()
    }

    pub fn layers(&self) -> &[LayerParams] {
        &self.layers
    }

    /// Get a immutable view of a layer.
    /// Returns `None` if `index` is out of range.
    pub fn layer(&self, index: usize) -> Option<&LayerParams> {
        self.layers.get(index)
    }

    /// Get a mutable view of a layer.
    /// Returns `None` if `index` is out of range.
    pub fn layer_mut(&mut self, index: usize) -> Option<&mut LayerParams> {
        self.layers.get_mut(index)
    }

    pub fn get(&self, key: ParamKey) -> Option<&Mat<f64>> {
        self.layer(key.layer)?.get(key.role)
    }

    pub fn get_mut(&mut self, key: ParamKey) -> Option<&mut Mat<f64>> {
        self.layer_mut(key.layer)?.get_mut(key.role)
    }

    /// Every tensor, layer by layer, in role order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamKey, &Mat<f64>)> {
        self.layers.iter().flat_map(|layer| {
            let index = layer.spec.index;
            layer
                .iter()
                .map(move |(role, tensor)| (ParamKey::new(index, role), tensor))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = ParamKey> + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn pretty_print_layer(&self, index: usize) -> Option<PrettyPrintParams<'_>> {
        let layer = self.layer(index)?;
        Some(PrettyPrintParams::new(layer))
    }
}

/// # Panics
///
/// If `key` does not address a tensor of this buffer.
impl Index<ParamKey> for ParamBuffer {
    type Output = Mat<f64>;

    #[track_caller]
    fn index(&self, key: ParamKey) -> &Mat<f64> {
        match self.layer(key.layer) {
            Some(layer) => &layer[key.role],
            None => panic!("no layer {} (buffer has {})", key.layer, self.n_layers()),
        }
    }
}

impl IndexMut<ParamKey> for ParamBuffer {
    #[track_caller]
    fn index_mut(&mut self, key: ParamKey) -> &mut Mat<f64> {
        let n_layers = self.n_layers();
        match self.layer_mut(key.layer) {
            Some(layer) => &mut layer[key.role],
            None => panic!("no layer {} (buffer has {n_layers})", key.layer),
        }
    }
}

/// Per-parameter optimizer accumulators.
///
/// `h` is used by AdaGrad and RMSprop, `m` and `v` by Adam. Each is shaped exactly like the
/// parameters it tracks and starts at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerState {
    pub h: ParamBuffer,
    pub m: ParamBuffer,
    pub v: ParamBuffer,
}

impl OptimizerState {
    pub fn zeros_like(params: &ParamBuffer) -> Self {
        Self {
            h: params.zeros_like(),
            m: params.zeros_like(),
            v: params.zeros_like(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::Activation;

    fn quadratic_topology() -> Topology {
        Topology::quadratic(
            3,
            vec![4, 2],
            vec![Activation::ReLU, Activation::Softmax],
        )
        .unwrap()
    }

    #[test]
    fn layout_follows_topology() {
        let params = ParamBuffer::create(&quadratic_topology());
        assert_eq!(params.n_layers(), 2);
        assert_eq!(params.iter().count(), 12);
        assert_eq!(params.n_params(), 3 * (3 * 4 + 4) + 3 * (4 * 2 + 2));
        let wb1 = &params[ParamKey::new(1, Role::WeightB)];
        assert_eq!((wb1.nrows(), wb1.ncols()), (4, 2));
        let br0 = &params[ParamKey::new(0, Role::BiasR)];
        assert_eq!((br0.nrows(), br0.ncols()), (1, 4));
        assert!(params.get(ParamKey::new(0, Role::Weight)).is_none());
        assert!(params.get(ParamKey::new(2, Role::WeightR)).is_none());
    }

    #[test]
    fn keys_use_short_names() {
        let params = ParamBuffer::create(&quadratic_topology());
        let names: Vec<String> = params.keys().map(|key| key.to_string()).collect();
        assert_eq!(&names[..6], ["wr0", "br0", "wg0", "bg0", "wb0", "bb0"]);
        assert_eq!(names[11], "bb1");
    }

    #[test]
    fn initialize_zeroes_biases_and_fills_weights() {
        let topology = quadratic_topology();
        let mut params = ParamBuffer::create(&topology);
        params
            .initialize(&topology, &mut StdRng::seed_from_u64(7))
            .unwrap();
        for (key, tensor) in params.iter() {
            let all_zero = (0..tensor.ncols())
                .all(|j| (0..tensor.nrows()).all(|i| tensor[(i, j)] == 0.0));
            assert_eq!(all_zero, !key.role.is_weight(), "{key}");
        }
    }

    #[test]
    fn optimizer_state_starts_at_zero() {
        let params = ParamBuffer::create(&quadratic_topology());
        let state = OptimizerState::zeros_like(&params);
        assert_eq!(state.h, params);
        assert_eq!(state.m, params);
        assert_eq!(state.v, params);
    }
}
