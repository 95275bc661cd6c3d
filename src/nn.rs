use faer::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    Activation, Error, Optimizer, Result, Samples, TrainConfig, TrainReport,
    core::{
        DerivBuffer, OptimizerState, ParamBuffer, ParamKey, back_propagate, forward,
        forward_cached, numerical_gradient,
    },
    gym::Gym,
    metrics,
};

/// Weight scale of every linear layer, and of quadratic layers whose activation has no
/// dedicated rule.
pub const DEFAULT_INIT_SCALE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    /// `z = a·W + b`
    Linear,
    /// `z = (a·Wr + br)∘(a·Wg + bg) + (a∘a)·Wb + bb`
    Quadratic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub index: usize,
    pub n_inputs: usize,
    pub n_outputs: usize,
    pub activation: Activation,
    pub kind: LayerKind,
}

impl LayerSpec {
    /// Standard deviation of the initial weights of this layer.
    pub fn init_scale(&self) -> f64 {
        let n_inputs = self.n_inputs as f64;
        match (self.kind, self.activation) {
            (LayerKind::Linear, _) => DEFAULT_INIT_SCALE,
            (LayerKind::Quadratic, Activation::Sigmoid) => f64::sqrt(1.0 / n_inputs),
            (LayerKind::Quadratic, Activation::ReLU) => f64::sqrt(2.0 / n_inputs),
            (LayerKind::Quadratic, Activation::Softmax) => DEFAULT_INIT_SCALE,
        }
    }
}

/// Shape of a network: input dimension plus one [`LayerSpec`] per layer.
///
/// Every layer of a topology has the same [`LayerKind`], and the last layer is always a
/// softmax layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    n_inputs: usize,
    kind: LayerKind,
    layer_specs: Vec<LayerSpec>,
}

impl Topology {
    pub fn new(
        n_inputs: usize,
        kind: LayerKind,
        widths: Vec<usize>,
        activations: Vec<Activation>,
    ) -> Result<Self> {
        if n_inputs == 0 {
            return Err(Error::configuration("input dimension must be non-zero"));
        }
        if widths.is_empty() {
            return Err(Error::configuration("a network needs at least one layer"));
        }
        if widths.len() != activations.len() {
            return Err(Error::configuration(format!(
                "{} layer widths but {} activations",
                widths.len(),
                activations.len()
            )));
        }
        if let Some(index) = widths.iter().position(|&width| width == 0) {
            return Err(Error::configuration(format!("layer {index} has width 0")));
        }
        if let Some(&last) = activations.last()
            && last != Activation::Softmax
        {
            return Err(Error::configuration(format!(
                "terminal activation must be softmax, got {}",
                last.name()
            )));
        }
        let mut n_previous = n_inputs;
        let layer_specs = std::iter::zip(widths, activations)
            .enumerate()
            .map(|(index, (n_outputs, activation))| {
                let spec = LayerSpec {
                    index,
                    n_inputs: n_previous,
                    n_outputs,
                    activation,
                    kind,
                };
                n_previous = n_outputs;
                spec
            })
            .collect();
        Ok(Self {
            n_inputs,
            kind,
            layer_specs,
        })
    }

    pub fn linear(n_inputs: usize, widths: Vec<usize>, activations: Vec<Activation>) -> Result<Self> {
        Self::new(n_inputs, LayerKind::Linear, widths, activations)
    }

    pub fn quadratic(
        n_inputs: usize,
        widths: Vec<usize>,
        activations: Vec<Activation>,
    ) -> Result<Self> {
        Self::new(n_inputs, LayerKind::Quadratic, widths, activations)
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    /// Number of classes.
    pub fn n_outputs(&self) -> usize {
        self.layer_specs
            .last()
            .map_or(self.n_inputs, |last_layer| last_layer.n_outputs)
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn layer_specs(&self) -> &[LayerSpec] {
        &self.layer_specs
    }

    pub fn n_layers(&self) -> usize {
        self.layer_specs.len()
    }

    /// See [`LayerSpec::init_scale`].
    pub fn init_scale(&self, layer: usize) -> f64 {
        self.layer_specs
            .get(layer)
            .map_or(DEFAULT_INIT_SCALE, LayerSpec::init_scale)
    }
}

/// A classifier network together with its optimizer accumulators.
#[derive(Debug, Clone)]
pub struct Network {
    topology: Topology,
    params: ParamBuffer,
    state: OptimizerState,
    par: Par,
}

impl Network {
    /// Initializes the parameters from OS entropy.
    pub fn new(topology: Topology) -> Result<Self> {
        Self::with_rng(topology, &mut rand::rng())
    }

    /// Deterministic initialization.
    pub fn with_seed(topology: Topology, seed: u64) -> Result<Self> {
        Self::with_rng(topology, &mut StdRng::seed_from_u64(seed))
    }

    pub fn with_rng<R: Rng + ?Sized>(topology: Topology, rng: &mut R) -> Result<Self> {
        let mut params = ParamBuffer::create(&topology);
        params.initialize(&topology, rng)?;
        let state = OptimizerState::zeros_like(&params);
        Ok(Self {
            topology,
            params,
            state,
            par: Par::Seq,
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.topology.n_inputs()
    }

    pub fn n_outputs(&self) -> usize {
        self.topology.n_outputs()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn params(&self) -> &ParamBuffer {
        &self.params
    }

    /// Mutable view of a single tensor. Returns `None` for a key this network doesn't have.
    pub fn param_mut(&mut self, key: ParamKey) -> Option<MatMut<'_, f64>> {
        self.params.get_mut(key).map(|tensor| tensor.as_mut())
    }

    pub fn optimizer_state(&self) -> &OptimizerState {
        &self.state
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut ParamBuffer, &mut OptimizerState) {
        (&mut self.params, &mut self.state)
    }

    pub fn parallelism(&self) -> Par {
        self.par
    }

    /// Parallelism of the dense matrix products. Defaults to [`Par::Seq`].
    pub fn set_parallelism(&mut self, par: Par) {
        self.par = par;
    }

    fn check_points(&self, points: MatRef<f64>) -> Result<()> {
        Error::check_shape("input dimension", points.ncols(), self.n_inputs())
    }

    fn check_samples(&self, samples: Samples) -> Result<()> {
        self.check_points(samples.points)?;
        Error::check_shape("class count", samples.labels.ncols(), self.n_outputs())
    }

    /// Raw softmax scores, one row per input point.
    pub fn predict(&self, points: MatRef<f64>) -> Result<Mat<f64>> {
        self.check_points(points)?;
        Ok(forward(points, &self.params, self.par))
    }

    /// Analytic gradient of the mean cross-entropy over `samples`.
    pub fn gradient(&self, samples: Samples) -> Result<DerivBuffer> {
        self.check_samples(samples)?;
        let results = forward_cached(samples.points, &self.params, self.par);
        Ok(back_propagate(
            samples.points,
            samples.labels,
            &self.params,
            &results,
            self.par,
        ))
    }

    /// Central-difference gradient. Two forward passes per parameter; meant for checking
    /// [`gradient`](Self::gradient) on small networks.
    pub fn numerical_gradient(&self, samples: Samples) -> Result<DerivBuffer> {
        self.check_samples(samples)?;
        Ok(numerical_gradient(samples.points, samples.labels, &self.params))
    }

    /// Mean cross-entropy error.
    pub fn loss(&self, samples: Samples) -> Result<f64> {
        self.check_samples(samples)?;
        let pred = forward(samples.points, &self.params, self.par);
        metrics::cross_entropy(pred.as_ref(), samples.labels)
    }

    pub fn accuracy(&self, samples: Samples) -> Result<f64> {
        self.check_samples(samples)?;
        let pred = forward(samples.points, &self.params, self.par);
        metrics::accuracy(pred.as_ref(), samples.labels)
    }

    /// Macro-averaged precision.
    pub fn precision(&self, samples: Samples) -> Result<f64> {
        self.check_samples(samples)?;
        let pred = forward(samples.points, &self.params, self.par);
        metrics::macro_precision(pred.as_ref(), samples.labels)
    }

    /// One full-batch update: analytic gradient over `samples`, then one optimizer step.
    pub fn step<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O, samples: Samples) -> Result<()> {
        let grads = self.gradient(samples)?;
        optimizer.step(&mut self.params, &mut self.state, &grads)
    }

    /// Trains until the epoch budget runs out or validation loss stops improving.
    pub fn train<O: Optimizer + ?Sized>(
        &mut self,
        optimizer: &mut O,
        train: Samples,
        valid: Option<Samples>,
        config: TrainConfig,
    ) -> Result<TrainReport> {
        Gym::new(self, config)?.run(optimizer, train, valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Role, one_hot};

    #[test]
    fn topology_chains_widths() {
        let topology = Topology::quadratic(
            3,
            vec![5, 4, 2],
            vec![Activation::ReLU, Activation::Sigmoid, Activation::Softmax],
        )
        .unwrap();
        let shapes: Vec<_> = topology
            .layer_specs()
            .iter()
            .map(|spec| (spec.n_inputs, spec.n_outputs))
            .collect();
        assert_eq!(shapes, [(3, 5), (5, 4), (4, 2)]);
        assert_eq!(topology.n_outputs(), 2);
        assert_eq!(topology.init_scale(0), f64::sqrt(2.0 / 3.0));
        assert_eq!(topology.init_scale(1), f64::sqrt(1.0 / 5.0));
        assert_eq!(topology.init_scale(2), DEFAULT_INIT_SCALE);
    }

    #[test]
    fn linear_layers_use_the_fixed_scale() {
        let topology = Topology::linear(
            3,
            vec![5, 2],
            vec![Activation::Sigmoid, Activation::Softmax],
        )
        .unwrap();
        assert_eq!(topology.init_scale(0), DEFAULT_INIT_SCALE);
        assert_eq!(topology.init_scale(1), DEFAULT_INIT_SCALE);
    }

    #[test]
    fn invalid_topologies_are_rejected() {
        let softmax = || vec![Activation::Softmax];
        assert!(Topology::linear(0, vec![2], softmax()).is_err());
        assert!(Topology::linear(2, vec![], vec![]).is_err());
        assert!(Topology::linear(2, vec![0], softmax()).is_err());
        assert!(Topology::linear(2, vec![3, 2], softmax()).is_err());
        assert!(matches!(
            Topology::quadratic(2, vec![2], vec![Activation::ReLU]),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn same_seed_same_network() {
        let topology =
            Topology::quadratic(2, vec![3, 2], vec![Activation::ReLU, Activation::Softmax])
                .unwrap();
        let a = Network::with_seed(topology.clone(), 42).unwrap();
        let b = Network::with_seed(topology, 42).unwrap();
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn dimension_mismatches_are_reported() {
        let topology = Topology::linear(2, vec![3], vec![Activation::Softmax]).unwrap();
        let nn = Network::with_seed(topology, 0).unwrap();
        let points = Mat::<f64>::zeros(4, 3);
        assert!(matches!(
            nn.predict(points.as_ref()),
            Err(Error::ShapeMismatch { got: 3, expected: 2, .. })
        ));
        let points = Mat::<f64>::zeros(2, 2);
        let labels = one_hot(&[0, 1], 2).unwrap();
        let samples = Samples::new(points.as_ref(), labels.as_ref()).unwrap();
        assert!(nn.loss(samples).is_err());
        assert!(nn.gradient(samples).is_err());
    }

    #[test]
    fn predictions_are_distributions() {
        let topology =
            Topology::quadratic(2, vec![4, 3], vec![Activation::Sigmoid, Activation::Softmax])
                .unwrap();
        let nn = Network::with_seed(topology, 3).unwrap();
        let points = Mat::from_fn(5, 2, |i, j| (i as f64 - 2.0) * (j as f64 + 0.5));
        let pred = nn.predict(points.as_ref()).unwrap();
        for i in 0..5 {
            let sum: f64 = (0..3).map(|j| pred[(i, j)]).sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn param_mut_edits_in_place() {
        let topology = Topology::linear(2, vec![2], vec![Activation::Softmax]).unwrap();
        let mut nn = Network::with_seed(topology, 0).unwrap();
        let key = ParamKey::new(0, Role::Bias);
        nn.param_mut(key).unwrap()[(0, 1)] = 2.5;
        assert_eq!(nn.params()[key][(0, 1)], 2.5);
        assert!(nn.param_mut(ParamKey::new(0, Role::WeightR)).is_none());
    }
}
