
use std::path::PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use burn::{backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    data::dataset::Dataset, optim::AdamConfig, tensor::backend::AutodiffBackend,
};
use mnist_exp::{dataset::MnistDataset, mnist::{self, model::ModelConfig,
    training::ExperimentConfig}, sweep::{self, Settings, SweepConfig, TrackerMode}};

/// MNIST classification: dropout sweep with local experiment tracking
#[derive(Parser, Debug)] #[command(version, about)] struct Cli {
    #[arg(long, value_enum, default_value_t = BackendKind::Ndarray, global = true)]
    backend: BackendKind,
    #[command(subcommand)] command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)] enum BackendKind { Ndarray, Wgpu, }

#[derive(Subcommand, Debug)] enum Command {
    /// Train a series of runs with random dropout rates
    Sweep(SweepArgs),
    /// Classify one test image with the model of a finished run
    Infer(InferArgs),
}

#[derive(Args, Debug)] struct SweepArgs {
    #[arg(long, default_value_t = 5)] runs: usize,
    #[arg(long, default_value_t = 5)] epochs: usize,
    #[arg(long, default_value_t = 128)] batch_size: usize,
    #[arg(long, default_value_t = 1e-3)] learning_rate: f64,
    /// keep every n-th image of both splits
    #[arg(long, default_value_t = 5)] subset_step: usize,
    #[arg(long, default_value_t = 2)] num_workers: usize,
    #[arg(long, default_value_t = 42)] seed: u64,
    #[arg(long, env = "WANDB_PROJECT", default_value = "mnist-classification")] project: String,
    /// dataset root, MNIST files go under `<data-dir>/mnist/`
    #[arg(long, env = "TORCH_HUB", default_value = "data")] data_dir: PathBuf,
    /// runs are recorded under `<tracker-dir>/mnist_exp/<project>/`
    #[arg(long, env = "WANDB_DIR", default_value = "runs")] tracker_dir: PathBuf,
    #[arg(long, env = "WANDB_MODE", value_enum, default_value_t = TrackerMode::Offline)]
    mode: TrackerMode,
}

#[derive(Args, Debug)] struct InferArgs {
    /// run directory holding `config.json` and `model.mpk`
    #[arg(long)] run: PathBuf,
    /// index into the MNIST test split
    #[arg(long, default_value_t = 42)] index: usize,
    #[arg(long, env = "TORCH_HUB", default_value = "data")] data_dir: PathBuf,
}

impl SweepArgs {
    fn into_config(self) -> (SweepConfig, Settings) {
        let experiment = ExperimentConfig::new(ModelConfig::default(), AdamConfig::new())
            .with_epochs(self.epochs).with_batch_size(self.batch_size)
            .with_learning_rate(self.learning_rate).with_subset_step(self.subset_step)
            .with_num_workers(self.num_workers).with_seed(self.seed);
        (SweepConfig::new(self.project, experiment).with_runs(self.runs).with_seed(self.seed),
         Settings { data_dir: self.data_dir, tracker_dir: self.tracker_dir, mode: self.mode })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    mnist_exp::logger::init();
    let cli = Cli::parse();

    match cli.backend {
        BackendKind::Ndarray => execute::<Autodiff<NdArray>>(cli.command, NdArrayDevice::Cpu),
        BackendKind::Wgpu    => execute::<Autodiff<Wgpu>>(cli.command, WgpuDevice::default()),
    }
}

fn execute<B: AutodiffBackend>(command: Command, device: B::Device)
    -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Sweep(args) => {
            let (config, settings) = args.into_config();
            for summary in sweep::run::<B>(&config, &settings, device)? {
                log::info!("dropout {:.3}: valid loss {:.3}, accuracy {:.3}{}", summary.dropout,
                    summary.evaluation.loss, summary.evaluation.accuracy, summary.dir
                    .map_or_else(String::new, |dir| format!(" => {}", dir.display())));
            }
        }
        Command::Infer(args) => {
            let item = MnistDataset::test(&args.data_dir)?.get(args.index)
                .ok_or("Fail to get test data from MNIST dataset")?;
            let prediction = mnist::infer::<B::InnerBackend>(&args.run, device, item)?;
            println!("Predicted {} Expected {}", prediction.predicted, prediction.expected);
        }
    }   Ok(())
}
