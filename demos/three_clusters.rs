//! Trains a classifier on three jittered 2-D clusters.
//!
//! ```sh
//! RUST_LOG=info cargo run --release --example three_clusters -- --arch quadratic --optimizer adam
//! ```

use std::{error::Error, fs, io::BufWriter, path::PathBuf};

use clap::{Parser, ValueEnum};
use log::info;
use quadnet::{
    AdaGrad, AdaGradConfig, Adam, AdamConfig, Activation, LayerKind, Network, Optimizer, RmsProp,
    RmsPropConfig, Samples, Sgd, SgdConfig, Topology, TrainConfig, faer::prelude::*, normalize,
    one_hot,
};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rand_distr::{Distribution, Normal};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Arch {
    Linear,
    Quadratic,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OptimizerKind {
    Sgd,
    Adagrad,
    Rmsprop,
    Adam,
}

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, value_enum, default_value_t = Arch::Quadratic)]
    arch: Arch,
    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    optimizer: OptimizerKind,
    /// Hidden layer widths, e.g. `--hidden 8,8`.
    #[arg(long, value_delimiter = ',', default_value = "6")]
    hidden: Vec<usize>,
    #[arg(long, default_value_t = 0.01)]
    lr: f64,
    #[arg(long, default_value_t = 2000)]
    epochs: usize,
    #[arg(long, default_value_t = 200)]
    patience: usize,
    #[arg(long, default_value_t = 100)]
    points_per_class: usize,
    /// Standard deviation of the cluster jitter.
    #[arg(long, default_value_t = 0.6)]
    spread: f64,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Write the trained parameters and optimizer state here.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

/// Points (one per row) and their class indices, shuffled.
fn clusters(args: &Args, rng: &mut StdRng) -> Result<(Mat<f64>, Vec<usize>), Box<dyn Error>> {
    let centres = [(0.0, 2.0), (-2.0, -1.0), (2.0, -1.0)];
    let jitter = Normal::new(0.0, args.spread)?;
    let mut rows: Vec<(f64, f64, usize)> = (0..centres.len() * args.points_per_class)
        .map(|i| {
            let class = i % centres.len();
            let (cx, cy) = centres[class];
            (cx + jitter.sample(rng), cy + jitter.sample(rng), class)
        })
        .collect();
    rows.shuffle(rng);
    let points = Mat::from_fn(rows.len(), 2, |i, j| match j {
        0 => rows[i].0,
        _ => rows[i].1,
    });
    let classes = rows.iter().map(|&(_, _, class)| class).collect();
    Ok((points, classes))
}

fn optimizer(args: &Args) -> quadnet::Result<Box<dyn Optimizer>> {
    let lr = args.lr;
    Ok(match args.optimizer {
        OptimizerKind::Sgd => Box::new(Sgd::new(SgdConfig { lr })?),
        OptimizerKind::Adagrad => Box::new(AdaGrad::new(AdaGradConfig { lr })?),
        OptimizerKind::Rmsprop => Box::new(RmsProp::new(RmsPropConfig {
            lr,
            ..RmsPropConfig::default()
        })?),
        OptimizerKind::Adam => Box::new(Adam::new(AdamConfig {
            lr,
            ..AdamConfig::default()
        })?),
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let (points, classes) = clusters(&args, &mut rng)?;
    let points = normalize(points.as_ref(), -1.0, 1.0);
    let labels = one_hot(&classes, 3)?;

    // 60% train, 20% valid, 20% test.
    let n = points.nrows();
    let (n_train, n_valid) = (n * 3 / 5, n / 5);
    let n_test = n - n_train - n_valid;
    let split = |start: usize, len: usize| {
        Samples::new(
            points.as_ref().subrows(start, len),
            labels.as_ref().subrows(start, len),
        )
    };
    let train = split(0, n_train)?;
    let valid = split(n_train, n_valid)?;
    let test = split(n_train + n_valid, n_test)?;

    let kind = match args.arch {
        Arch::Linear => LayerKind::Linear,
        Arch::Quadratic => LayerKind::Quadratic,
    };
    let mut widths = args.hidden.clone();
    widths.push(3);
    let mut activations = vec![Activation::ReLU; args.hidden.len()];
    activations.push(Activation::Softmax);
    let topology = Topology::new(2, kind, widths, activations)?;
    let mut nn = Network::with_rng(topology, &mut rng)?;

    let mut optimizer = optimizer(&args)?;
    info!(
        "training {:?} network ({} parameters) with {}",
        args.arch,
        nn.params().n_params(),
        optimizer.name()
    );
    let config = TrainConfig {
        epochs: args.epochs,
        patience: args.patience,
    };
    let report = nn.train(optimizer.as_mut(), train, Some(valid), config)?;

    println!("{:?} after {} epochs", report.state, report.epochs);
    if let Some(best) = report.best_valid_loss {
        println!("best validation loss: {best:.6}");
    }
    println!("test loss:      {:.6}", nn.loss(test)?);
    println!("test accuracy:  {:.4}", nn.accuracy(test)?);
    println!("test precision: {:.4}", nn.precision(test)?);
    for i in 0..nn.topology().n_layers() {
        if let Some(layer) = nn.params().pretty_print_layer(i) {
            println!("\n{layer}");
        }
    }

    if let Some(path) = &args.snapshot {
        nn.export().write_to(BufWriter::new(fs::File::create(path)?))?;
        println!("snapshot written to {}", path.display());
    }
    Ok(())
}
