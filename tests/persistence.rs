use std::{fs, io::BufWriter};

use quadnet::{
    AdamConfig, Activation, Network, RmsProp, RmsPropConfig, Samples, Snapshot, TrainConfig,
    Topology, faer::prelude::*, one_hot,
};

fn data() -> (Mat<f64>, Mat<f64>) {
    let points = Mat::from_fn(6, 3, |i, j| f64::cos(i as f64 * 0.7 + j as f64));
    let labels = one_hot(&[0, 1, 2, 0, 1, 2], 3).unwrap();
    (points, labels)
}

fn topology() -> Topology {
    Topology::quadratic(3, vec![4, 3], vec![Activation::Sigmoid, Activation::Softmax]).unwrap()
}

#[test]
fn snapshot_file_restores_training_exactly() {
    let (points, labels) = data();
    let samples = Samples::new(points.as_ref(), labels.as_ref()).unwrap();
    let mut rmsprop = RmsProp::new(RmsPropConfig::default()).unwrap();

    let mut nn = Network::with_seed(topology(), 21).unwrap();
    for _ in 0..5 {
        nn.step(&mut rmsprop, samples).unwrap();
    }

    let path = std::env::temp_dir().join(format!("quadnet-{}.snapshot", std::process::id()));
    nn.export()
        .write_to(BufWriter::new(fs::File::create(&path).unwrap()))
        .unwrap();
    let snapshot = Snapshot::read_from(fs::File::open(&path).unwrap()).unwrap();
    fs::remove_file(&path).unwrap();

    let mut restored = Network::with_seed(topology(), 22).unwrap();
    assert_ne!(restored.params(), nn.params());
    restored.restore(&snapshot).unwrap();
    assert_eq!(restored.params(), nn.params());
    assert_eq!(restored.optimizer_state(), nn.optimizer_state());

    // Accumulators came along, so both continue identically.
    nn.step(&mut rmsprop, samples).unwrap();
    restored.step(&mut rmsprop, samples).unwrap();
    let a = nn.predict(points.as_ref()).unwrap();
    let b = restored.predict(points.as_ref()).unwrap();
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            assert_eq!(a[(i, j)].to_bits(), b[(i, j)].to_bits());
        }
    }
}

#[test]
fn snapshot_of_another_architecture_is_rejected() {
    let linear = Topology::linear(3, vec![4, 3], vec![Activation::Sigmoid, Activation::Softmax])
        .unwrap();
    let snapshot = Network::with_seed(linear, 0).unwrap().export();
    let mut nn = Network::with_seed(topology(), 0).unwrap();
    let err = nn.restore(&snapshot).unwrap_err();
    assert!(err.to_string().contains("missing tensor `para.wr0`"), "{err}");
}

#[test]
fn configs_load_from_json() {
    let config: TrainConfig = serde_json::from_str(r#"{ "epochs": 500 }"#).unwrap();
    assert_eq!(config.epochs, 500);
    assert_eq!(config.patience, TrainConfig::default().patience);

    let adam: AdamConfig =
        serde_json::from_str(r#"{ "lr": 0.001, "beta1": 0.8, "beta2": 0.99 }"#).unwrap();
    assert_eq!(adam.beta1, 0.8);
    let json = serde_json::to_string(&adam).unwrap();
    assert_eq!(serde_json::from_str::<AdamConfig>(&json).unwrap(), adam);
}

#[test]
fn training_record_serializes() {
    let (points, labels) = data();
    let samples = Samples::new(points.as_ref(), labels.as_ref()).unwrap();
    let mut nn = Network::with_seed(topology(), 4).unwrap();
    let mut rmsprop = RmsProp::new(RmsPropConfig::default()).unwrap();
    let config = TrainConfig {
        epochs: 3,
        patience: 2,
    };
    let report = nn.train(&mut rmsprop, samples, Some(samples), config).unwrap();
    let json = serde_json::to_value(&report.record).unwrap();
    let epochs = json["epochs"].as_array().unwrap();
    assert_eq!(epochs.len(), report.epochs);
    assert!(epochs[0]["valid"]["loss"].is_number());
}
